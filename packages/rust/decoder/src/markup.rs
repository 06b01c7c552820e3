//! Last-resort text recovery from raw reader markup.
//!
//! Used only when neither substitution table can decode a chapter. Whitespace
//! fidelity is not preserved; the function never fails.

/// Characters of wrapper markup dropped before depth tracking starts.
pub const PREAMBLE_CHARS: usize = 6;

/// Recover plain text between tags by tracking angle-bracket depth.
///
/// Depth starts at 1 after the preamble is dropped (the preamble ends inside the
/// first paragraph tag). Text at depth 0 is emitted. A `p` seen at depth 1 is a
/// paragraph tag name and produces a single line break.
pub fn strip_markup(raw: &str) -> String {
    let mut depth: i64 = 1;
    let mut out = String::new();

    for c in raw.chars().skip(PREAMBLE_CHARS) {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            _ if depth == 0 => out.push(c),
            'p' if depth == 1 => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }

    out
}
