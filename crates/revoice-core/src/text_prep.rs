//! Text preparation for synthesis: sentence splitting and chunk packing.
//!
//! Pure functions, no I/O. Lengths are counted in chars rather than bytes so
//! multilingual input is never cut inside a code point.

/// Default maximum chunk length for [`split_for_synthesis`], in chars.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 250;

/// Break `text` into chunks no longer than `max_len` chars for a model with a
/// bounded context.
///
/// Sentences are found first; oversized ones are sub-split with
/// [`split_text`]. Consecutive short sentences are then packed together so a
/// paragraph of one-liners costs one forward pass instead of many.
pub fn split_for_synthesis(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let pieces = if char_len(&sentence) <= max_len {
            vec![sentence]
        } else {
            split_text(&sentence, max_len)
        };

        for piece in pieces {
            if current.is_empty() {
                current = piece;
            } else if char_len(&current) + 1 + char_len(&piece) <= max_len {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split text into chunks of at most `max_len` chars.
///
/// Prefers sentence boundaries in the back half of the window, then word
/// boundaries in the back two thirds, then hard-splits.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut result = Vec::new();
    let mut remaining = text;

    while char_len(remaining) > max_len {
        let window = &remaining[..byte_index(remaining, max_len)];
        let split_at = sentence_boundary(window, max_len)
            .or_else(|| word_boundary(window, max_len))
            .unwrap_or(window.len());

        let chunk = remaining[..split_at].trim_end();
        if !chunk.is_empty() {
            result.push(chunk.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        result.push(remaining.to_string());
    }

    result
}

/// Split text into sentences at sentence-ending punctuation followed by a
/// space, at full-width terminators (`。！？`), or at paragraph breaks.
///
/// Returns non-empty, trimmed strings.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);

        // Paragraph break
        if c == '\n' && next == Some('\n') {
            push_trimmed(&mut sentences, &text[start..i]);
            while matches!(chars.peek(), Some(&(_, '\n'))) {
                chars.next();
            }
            start = chars.peek().map_or(text.len(), |&(j, _)| j);
            continue;
        }

        let ends_sentence = is_full_width_terminal(c)
            || (is_terminal(c) && next.is_some_and(|n| n.is_whitespace() && n != '\n'));

        if ends_sentence {
            let end = i + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            while let Some(&(_, n)) = chars.peek() {
                if n.is_whitespace() && n != '\n' {
                    chars.next();
                } else {
                    break;
                }
            }
            start = chars.peek().map_or(text.len(), |&(j, _)| j);
        }
    }

    if start < text.len() {
        push_trimmed(&mut sentences, &text[start..]);
    }

    sentences
}

fn push_trimmed(out: &mut Vec<String>, chunk: &str) {
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        out.push(chunk.to_string());
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_full_width_terminal(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char, or the end of the string.
fn byte_index(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Byte offset just past the last sentence terminator in the back half of
/// the window.
fn sentence_boundary(window: &str, max_len: usize) -> Option<usize> {
    let mut best = None;
    let mut chars = window.char_indices().enumerate().peekable();

    while let Some((pos, (i, c))) = chars.next() {
        let followed_by_space = chars.peek().is_some_and(|&(_, (_, n))| n == ' ');
        let terminal = is_full_width_terminal(c) || (is_terminal(c) && followed_by_space);
        if terminal && pos >= max_len / 2 {
            best = Some(i + c.len_utf8());
        }
    }

    best
}

/// Byte offset of the last space in the back two thirds of the window.
fn word_boundary(window: &str, max_len: usize) -> Option<usize> {
    let pos = window.rfind(' ')?;
    (pos > 0 && char_len(&window[..pos]) >= max_len / 3).then_some(pos)
}
