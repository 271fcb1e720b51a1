//! Pattern-key matching for `caches`/`directories` sections: exact name
//! match first, then the first `*`-glob match in declaration order.
//!
//! Generalised from a URL-pattern matcher's pattern-type dispatch
//! (there matching a request URL against exact/prefix/suffix/contains
//! rules) down to the single wildcard shape a config key actually
//! allows: one `*` standing in for any run of characters.

/// Finds the entry in `entries` whose key best matches `name`: an exact
/// key wins outright, otherwise the first (in order) glob key that
/// matches. `key` extracts the match key from an entry so this stays
/// generic over `BackendEntry`/`DatabaseEntry`.
pub fn match_entry<'a, T>(entries: &'a [T], name: &str, key: impl Fn(&T) -> &str) -> Option<&'a T> {
    if let Some(entry) = entries.iter().find(|e| key(e) == name) {
        return Some(entry);
    }
    entries.iter().find(|e| {
        let pattern = key(e);
        pattern.contains('*') && glob_match(pattern, name)
    })
}

/// A single-`*` glob match: `*` stands for any (possibly empty) run of
/// characters, and at most one `*` is meaningful in a config key. A
/// pattern with more than one `*` is matched by its first and last
/// literal segments only, same as a shell glob with redundant stars
/// collapsed.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}
