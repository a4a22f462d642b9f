//! Splitting newsletter text into context-sized chunks

/// Separator placed between packed paragraphs and between joined analyses
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Longest prefix of `text` with at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split a body into chunks of at most `budget` characters
///
/// Paragraphs (separated by blank lines) are packed greedily. A paragraph
/// longer than the budget is split at whitespace, or hard-split when it has
/// none. A body that already fits is returned as a single chunk unchanged.
pub fn chunk_newsletter(body: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    if body.chars().count() <= budget {
        return vec![body.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in split_paragraphs(body) {
        let paragraph_len = paragraph.chars().count();

        if paragraph_len > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(split_long_paragraph(&paragraph, budget));
            continue;
        }

        let separator_len = if current.is_empty() { 0 } else { PARAGRAPH_SEPARATOR.len() };
        if current_len + separator_len + paragraph_len > budget {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push_str(PARAGRAPH_SEPARATOR);
            current_len += PARAGRAPH_SEPARATOR.len();
        }
        current.push_str(&paragraph);
        current_len += paragraph_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        // whitespace-only body longer than the budget
        chunks.push(String::new());
    }

    chunks
}

/// Paragraphs are runs of non-blank lines; blank lines separate them
fn split_paragraphs(body: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}

fn split_long_paragraph(text: &str, budget: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + budget).min(chars.len());
        let mut cut = end;

        if end < chars.len() {
            if let Some(pos) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if pos > 0 {
                    cut = start + pos;
                }
            }
        }

        let piece: String = chars[start..cut].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        start = cut;
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
    }

    pieces
}
