//! Gift-link detection in message content.

const GIFT_MARKER: &str = "discord.gift/";

/// Extract the gift code embedded in message content.
///
/// The code is the run of ASCII alphanumerics following the last
/// `discord.gift/` marker; anything after it (punctuation, whitespace, more
/// text) is ignored.
pub fn extract_code(content: &str) -> Option<&str> {
    let start = content.rfind(GIFT_MARKER)? + GIFT_MARKER.len();
    let rest = &content[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some(&rest[..end])
}
