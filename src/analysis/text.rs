//! Transcript slicing helpers used by the repair strategies.

use unicode_segmentation::UnicodeSegmentation;

/// The longest prefix of `text` with at most `max_chars` characters, cut
/// back to the last whitespace when one exists in the prefix.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let prefix = &text[..cut];
    match prefix.rfind(char::is_whitespace) {
        Some(space) if space > 0 => prefix[..space].trim_end(),
        _ => prefix,
    }
}

/// Split text into trimmed sentences using Unicode sentence boundaries.
/// Decimals such as "2.5" stay inside their sentence.
pub fn sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split text into chunks of at most `chunk_chars` characters, packing
/// whole sentences where possible. A sentence longer than a chunk is split
/// on character boundaries.
pub fn split_chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if current_len > 0 && current_len + 1 + len > chunk_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if len > chunk_chars {
            let chars: Vec<char> = sentence.chars().collect();
            for piece in chars.chunks(chunk_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
