//! Text shaping between the game and the chat platform.

/// Appended to lines cut down to the relay limit.
pub const TRUNCATION_MARKER: &str = " [...]";

/// Remove RoR colour codes (`#` followed by six hex digits).
pub fn strip_colour_codes(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if bytes[i] == b'#'
            && bytes.len() >= i + 7
            && bytes[i + 1..i + 7].iter().all(u8::is_ascii_hexdigit)
        {
            i += 7;
            continue;
        }
        // `i` is always on a char boundary: we only skip ASCII runs.
        let ch = text[i..].chars().next().unwrap_or_default();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Cut `text` to at most `max_chars` characters, ending in `marker` when cut
/// and there is room for it.
pub fn truncate(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_chars = marker.chars().count();
    if max_chars <= marker_chars {
        return text.chars().take(max_chars).collect();
    }
    let keep = max_chars - marker_chars;
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str(marker);
    out
}

/// Name as shown on the chat platform.
pub fn display_name(username: &str) -> String {
    let stripped = strip_colour_codes(username);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn joined(name: &str) -> String {
    format!("{name} joined the server")
}

pub fn left(name: &str) -> String {
    format!("{name} left the server")
}

/// Game chat line as posted on the platform.
pub fn relay(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

/// Platform line as posted in game chat.
pub fn tagged(author: &str, text: &str) -> String {
    format!("[{author}] {text}")
}
