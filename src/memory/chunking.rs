use sha2::{Digest, Sha256};

/// A contiguous chunk of text extracted from a source file, ready for
/// embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text. Tokens on the same source line are joined with a
    /// space, tokens on different lines with a newline.
    pub text: String,
    /// 1-based start line in the original file (inclusive).
    pub start_line: u32,
    /// 1-based end line in the original file (inclusive).
    pub end_line: u32,
    /// Approximate token count (whitespace-split heuristic).
    pub token_count: u32,
    /// Content hash of `text`.
    pub hash: String,
}

/// Whitespace token estimate used for chunk and batch budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Hex SHA-256 of `text`.
pub fn hash_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Split `content` into chunks of at most `max_tokens` tokens, repeating
/// exactly `overlap` tokens between consecutive chunks.
///
/// Content that fits in one budget yields exactly one chunk. A trailing
/// window consisting only of carried-over tokens is never emitted.
pub fn chunk_text(content: &str, max_tokens: u32, overlap: u32) -> Vec<TextChunk> {
    let max_tokens = max_tokens.max(1) as usize;
    let overlap = (overlap as usize).min(max_tokens.saturating_sub(1));

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut window: Vec<(u32, &str)> = Vec::new();
    let mut carried = 0usize;

    for (line_idx, line) in content.lines().enumerate() {
        let line_number = (line_idx as u32) + 1;

        for word in line.split_whitespace() {
            if window.len() >= max_tokens {
                chunks.push(build_chunk(&window));

                // Retain the last `overlap` words for the next chunk.
                let keep_from = window.len() - overlap;
                window.drain(..keep_from);
                carried = window.len();
            }
            window.push((line_number, word));
        }
    }

    if window.len() > carried {
        chunks.push(build_chunk(&window));
    }

    chunks
}

fn build_chunk(window: &[(u32, &str)]) -> TextChunk {
    let mut text = String::new();
    let mut prev_line = None;
    for (line, word) in window {
        match prev_line {
            Some(prev) if prev == *line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        text.push_str(word);
        prev_line = Some(*line);
    }

    let start_line = window.first().map(|(l, _)| *l).unwrap_or(1);
    let end_line = window.last().map(|(l, _)| *l).unwrap_or(start_line);
    let hash = hash_text(&text);

    TextChunk {
        text,
        start_line,
        end_line,
        token_count: window.len() as u32,
        hash,
    }
}
