pub const MAX_NAME_LEN: usize = 250;

/// Coerces arbitrary text into a valid object name.
///
/// The result is lowercase, with each run of characters outside `[a-z0-9]`
/// collapsed into a single `-`, truncated to 250 bytes and stripped of any
/// leading or trailing characters that are not letters.
pub fn sanitize_resource_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash {
                out.push('-');
                pending_dash = false;
            }
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if pending_dash {
        out.push('-');
    }

    out.truncate(MAX_NAME_LEN);
    out.trim_matches(|c: char| !c.is_ascii_lowercase())
        .to_string()
}
