//! Builders for the `input`/`wm` shell commands the control routes emit.
//!
//! Every builder returns the exact string handed to the device shell, so
//! the HTTP layer can echo it back in the response envelope.

use crate::{SWIPE_DURATION_MAX_MS, SWIPE_DURATION_MIN_MS};

/// `input tap X Y`.
pub fn tap(x: i32, y: i32) -> String {
    format!("input tap {x} {y}")
}

/// `input swipe x1 y1 x2 y2 durationMs`, duration clamped to the accepted
/// window rather than rejected.
pub fn swipe(start_x: i32, start_y: i32, end_x: i32, end_y: i32, duration_ms: i64) -> String {
    let duration = duration_ms.clamp(SWIPE_DURATION_MIN_MS, SWIPE_DURATION_MAX_MS);
    format!("input swipe {start_x} {start_y} {end_x} {end_y} {duration}")
}

/// `input text <escaped>`.
pub fn text_input(text: &str) -> String {
    format!("input text {}", escape_input_text(text))
}

/// `input keyevent 66` (Enter) for any action other than `none`.
///
/// The stock `input` tool cannot raise IME editor actions (search/send/...),
/// so every action collapses to the Enter keyevent; the IME running on the
/// device interprets it according to the focused field.
pub fn enter_keyevent(enter_action: &str, press_enter: bool) -> Option<String> {
    if press_enter || enter_action != "none" {
        Some("input keyevent 66".into())
    } else {
        None
    }
}

/// Escapes text for the `input text` argv slot.
///
/// Spaces become `%s` (the `input` tool's own convention); shell
/// metacharacters are backslash-escaped so the command survives
/// `shell:` dispatch unquoted.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '(' | ')' | '<' | '>' | '*' | '?'
            | '~' | '#' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Parses `wm size` output (`Physical size: 1080x2400`, optionally followed
/// by an `Override size:` line that wins when present).
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let mut size = None;
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line
            .strip_prefix("Physical size:")
            .or_else(|| line.strip_prefix("Override size:"))
        else {
            continue;
        };
        if let Some((w, h)) = rest.trim().split_once('x')
            && let (Ok(w), Ok(h)) = (w.trim().parse(), h.trim().parse())
        {
            size = Some((w, h));
        }
    }
    size
}
