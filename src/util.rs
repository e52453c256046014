//! Small shared helpers.

/// Turn an arbitrary string into a filesystem- and env-safe slug:
/// lowercase, non-alphanumerics become hyphens, runs collapse, ends
/// trimmed. Used for plugin identifiers, mirror directory names, and the
/// agent segment of the build path.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_hyphen = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.extend(c.to_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    out.trim_matches('-').to_string()
}
