//! Filename to SQL identifier conversion.

/// Turns an arbitrary name into a valid unquoted SQL identifier.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, a leading digit gets a
/// `_` prefix, and the result is lower-cased. An empty input maps to `_`.
///
/// Distinct inputs can collide (`a-b` and `a b` both give `a_b`); resolving
/// that is up to whoever registers the tables.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }

    name
}
