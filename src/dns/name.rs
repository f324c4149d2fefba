//! Domain name helpers shared by the walker and the label trees.
//!
//! Names are compared and stored in a single canonical form: surrounding
//! whitespace trimmed, trailing root dot removed, ASCII-lowercased.

/// Canonical form of a domain name.
pub fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Labels of `name` in top-level-domain-first order.
///
/// `www.Example.com.` becomes `["com", "example", "www"]`. An empty name
/// has no labels.
pub fn reverse_labels(name: &str) -> Vec<String> {
    let name = normalize(name);
    if name.is_empty() {
        return Vec::new();
    }
    name.rsplit('.').map(str::to_string).collect()
}

/// Join a conventional host prefix onto a domain. An empty prefix yields the
/// bare domain.
pub fn with_prefix(prefix: &str, domain: &str) -> String {
    let prefix = prefix.trim().trim_end_matches('.');
    if prefix.is_empty() {
        normalize(domain)
    } else {
        normalize(&format!("{}.{}", prefix, domain.trim()))
    }
}
