//! Fragment decoder shared by every streamed generation.
//!
//! Pure and allocation-bounded: concatenates fragments, normalizes line
//! endings, removes control and invisible formatting characters, and trims.

use futures::StreamExt;

use quiver_core::{Result, TokenStream};

/// Invisible characters models emit that break downstream parsing.
const INVISIBLE: &[char] = &[
    '\u{FEFF}', // byte order mark
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
];

/// Assemble streamed fragments into one normalized string.
///
/// - fragments are concatenated in order
/// - `\r\n` and lone `\r` become `\n`
/// - C0 controls other than `\n` and `\t`, DEL, and C1 controls are removed
/// - byte order marks and zero-width characters are removed
/// - leading and trailing whitespace is trimmed
pub fn decode_fragments<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for fragment in fragments {
        joined.push_str(fragment.as_ref());
    }

    let mut out = String::with_capacity(joined.len());
    let mut chars = joined.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\n' | '\t' => out.push(c),
            c if (c as u32) < 0x20 => {}
            '\u{7F}'..='\u{9F}' => {}
            c if INVISIBLE.contains(&c) => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Drain a token stream and decode it. The first stream error aborts.
pub async fn collect_stream(mut stream: TokenStream) -> Result<String> {
    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment?);
    }
    Ok(decode_fragments(&fragments))
}
