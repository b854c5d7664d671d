use regex::Regex;
use tracing::warn;

/// Priority assigned to a pattern with no wildcard (treated as exact in
/// pattern space).
const EXACT_PRIORITY: i32 = 100;

/// A wildcard key pattern compiled to an anchored regex.
///
/// `*` matches any character run; everything else is literal. Compilation
/// happens at save/reload time so matching on the decision path is a single
/// regex test.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: String,
    priority: i32,
    regex: Regex,
}

impl CompiledPattern {
    pub fn new(pattern: &str, priority: i32) -> Option<Self> {
        let regex = match compile_wildcard(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!("Failed to compile pattern '{}': {}", pattern, e);
                return None;
            }
        };
        Some(Self {
            pattern: pattern.to_string(),
            priority,
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Convert a wildcard pattern to an anchored-exact regex: literal chunks are
/// escaped, each `*` becomes a greedy `.*`.
fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for (i, chunk) in pattern.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        regex.push_str(&regex::escape(chunk));
    }
    regex.push('$');
    Regex::new(&regex)
}

/// Auto-computed priority: exact patterns dominate; otherwise specificity
/// grows with segment count and shrinks with wildcard count.
pub fn calculate_priority(pattern: &str) -> i32 {
    if !pattern.contains('*') {
        return EXACT_PRIORITY;
    }

    let segments = pattern.split(':').count() as i32;
    let wildcards = pattern.chars().filter(|c| *c == '*').count() as i32;

    segments * 10 - wildcards * 5
}

/// Pick the highest-priority pattern matching `key`. Ties keep the first
/// match in iteration order; callers must not depend on the tie-break beyond
/// priority.
pub fn find_best_match<'a, I>(key: &str, patterns: I) -> Option<&'a CompiledPattern>
where
    I: IntoIterator<Item = &'a CompiledPattern>,
{
    let mut best: Option<&CompiledPattern> = None;
    for candidate in patterns {
        if !candidate.matches(key) {
            continue;
        }
        match best {
            Some(current) if candidate.priority() <= current.priority() => {}
            _ => best = Some(candidate),
        }
    }
    best
}
