//! Name canonicalization for comparison
//!
//! Catalog names differ in punctuation and separators ("Branch & Claw" vs
//! "Branch and Claw", "Catan: Seafarers" vs "Catan - Seafarers"). Matching
//! compares normalized forms only.

/// Canonical comparison form of a name
///
/// Lowercases, turns `:` `-` and dashes into spaces, spells `&` as `and`,
/// drops everything outside `[a-z0-9 ]`, then collapses whitespace. Stripping
/// runs before collapsing, so the result never holds a double space and
/// `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(name: &str) -> String {
    let mut mapped = String::with_capacity(name.len());

    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' => mapped.push(c),
            ':' | '-' | '\u{2013}' | '\u{2014}' => mapped.push(' '),
            '&' => mapped.push_str(" and "),
            c if c.is_whitespace() => mapped.push(' '),
            _ => {}
        }
    }

    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}
