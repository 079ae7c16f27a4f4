//! Paragraph-boundary text chunker with sentence-aware overlap.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_chars` limit. Splitting occurs on blank-line boundaries to keep
//! each chunk semantically coherent; paragraphs that exceed the limit are
//! further split at sentence boundaries (and, as a last resort, at word
//! boundaries). After each flush the next buffer is seeded with the tail
//! of the previous chunk so context survives chunk boundaries.
//!
//! Chunking is a pure function of `(text, policy)`: identical input always
//! yields byte-identical output.

use crate::models::Chunk;

/// Effective overlap never drops below this many characters.
pub const MIN_OVERLAP_CHARS: usize = 50;

/// Files with less text than this are embedded as a single unit; callers
/// consult [`needs_chunking`] before invoking [`chunk`].
pub const MIN_CHUNKING_BYTES: usize = 256;

/// Whether a file's text is large enough to be worth chunking at all.
pub fn needs_chunking(text: &str) -> bool {
    text.len() >= MIN_CHUNKING_BYTES
}

/// Chunking policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPolicy {
    /// Target chunk size in characters.
    pub max_chars: usize,
    /// Overlap between consecutive chunks, as a percentage of `max_chars`
    /// (0–100). Subject to the [`MIN_OVERLAP_CHARS`] floor.
    pub overlap_percentage: u8,
    /// Keep the original separators (blank lines, inter-sentence
    /// whitespace) in chunk text instead of normalizing them to spaces.
    pub preserve_separators: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            overlap_percentage: 10,
            preserve_separators: false,
        }
    }
}

impl ChunkPolicy {
    /// Effective overlap size in characters: `overlap_percentage` of
    /// `max_chars`, floored at [`MIN_OVERLAP_CHARS`].
    pub fn overlap_chars(&self) -> usize {
        MIN_OVERLAP_CHARS.max(self.overlap_percentage as usize * self.max_chars / 100)
    }
}

/// A paragraph-like unit together with the separator that preceded it in
/// the source text.
struct Unit<'a> {
    sep: &'a str,
    text: &'a str,
}

/// Split text into overlap-seeded chunks.
///
/// Returns an empty vector for empty/whitespace input and a single
/// overlap-free chunk when the whole text fits in `max_chars`. Chunk
/// indices are contiguous from 0.
pub fn chunk(text: &str, policy: &ChunkPolicy) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_chars = policy.max_chars.max(1);
    if char_count(text) <= max_chars {
        return vec![Chunk::new(0, text, 0)];
    }

    let units = split_units(text, policy, max_chars);
    let overlap = policy.overlap_chars();

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buf = String::new();
    let mut seed_len = 0usize;
    // Whether the buffer holds anything beyond an overlap seed. A buffer
    // of pure seed text is never flushed on its own.
    let mut has_content = false;

    let n = units.len();
    for (i, unit) in units.iter().enumerate() {
        if has_content {
            let would_be = char_count(&buf) + char_count(unit.sep) + char_count(unit.text);
            if would_be > max_chars {
                flush(&mut chunks, &mut buf, &mut seed_len, overlap, unit.text);
                has_content = false;
            }
        }
        if !buf.is_empty() {
            buf.push_str(unit.sep);
        }
        buf.push_str(unit.text);
        has_content = true;

        // A sentence-complete buffer at capacity flushes right away
        // instead of waiting for the next unit to overflow it.
        if i + 1 < n && char_count(&buf) >= max_chars && ends_terminal(unit.text) {
            flush(&mut chunks, &mut buf, &mut seed_len, overlap, units[i + 1].text);
            has_content = false;
        }
    }

    if has_content && !buf.trim().is_empty() {
        let index = chunks.len() as i64;
        chunks.push(Chunk::new(index, buf, seed_len));
    }

    chunks
}

/// Emit the buffer as a chunk and reseed it with the flushed chunk's tail.
fn flush(
    chunks: &mut Vec<Chunk>,
    buf: &mut String,
    seed_len: &mut usize,
    overlap: usize,
    next_unit: &str,
) {
    let flushed = std::mem::take(buf);
    let index = chunks.len() as i64;
    chunks.push(Chunk::new(index, flushed, *seed_len));

    let (seed, len) = overlap_seed(&chunks[chunks.len() - 1].text, overlap, next_unit);
    *buf = seed;
    *seed_len = len;
}

/// Take the final `overlap` characters of a flushed chunk, trimmed to the
/// nearest word boundary, as the seed for the next buffer. Returns an
/// empty seed when the tail has no word boundary or already prefixes the
/// next unit (no point duplicating it).
fn overlap_seed(prev: &str, overlap: usize, next_unit: &str) -> (String, usize) {
    if overlap == 0 {
        return (String::new(), 0);
    }
    let total = char_count(prev);
    let tail_start = total.saturating_sub(overlap);
    let byte_start = char_floor(prev, tail_start);
    let mut tail = &prev[byte_start..];

    let cut_mid_word = tail_start > 0
        && !prev[..byte_start].ends_with(|c: char| c.is_whitespace())
        && !tail.starts_with(|c: char| c.is_whitespace());
    if cut_mid_word {
        match tail.find(|c: char| c.is_whitespace()) {
            Some(pos) => tail = tail[pos..].trim_start(),
            None => return (String::new(), 0),
        }
    } else {
        tail = tail.trim_start();
    }

    if tail.is_empty() || next_unit.starts_with(tail) {
        return (String::new(), 0);
    }
    (tail.to_string(), char_count(tail))
}

/// Split text on blank-line boundaries into paragraph units; paragraphs
/// longer than `max_chars` are split further at sentence boundaries.
fn split_units<'a>(text: &'a str, policy: &ChunkPolicy, max_chars: usize) -> Vec<Unit<'a>> {
    let mut units = Vec::new();
    for para in text.split("\n\n") {
        if para.trim().is_empty() {
            continue;
        }
        let piece = if policy.preserve_separators {
            para
        } else {
            para.trim()
        };
        let sep: &'a str = if units.is_empty() {
            ""
        } else if policy.preserve_separators {
            "\n\n"
        } else {
            " "
        };
        if char_count(piece) > max_chars {
            split_sentences(piece, sep, policy.preserve_separators, max_chars, &mut units);
        } else {
            units.push(Unit { sep, text: piece });
        }
    }
    units
}

/// Split a paragraph at sentence boundaries (terminal punctuation followed
/// by whitespace). Sentences still longer than `max_chars` fall back to
/// word-boundary hard splits.
fn split_sentences<'a>(
    text: &'a str,
    first_sep: &'a str,
    preserve: bool,
    max_chars: usize,
    out: &mut Vec<Unit<'a>>,
) {
    let mut start = 0usize;
    let mut sep = first_sep;
    let mut iter = text.char_indices().peekable();

    while let Some((_, ch)) = iter.next() {
        if !is_terminal(ch) {
            continue;
        }
        let Some(&(j, next)) = iter.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        // Consume the whitespace run; it becomes the next unit's separator.
        let mut end_ws = j;
        while let Some(&(k, c)) = iter.peek() {
            if c.is_whitespace() {
                end_ws = k + c.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        push_sentence(&text[start..j], sep, max_chars, out);
        sep = if preserve { &text[j..end_ws] } else { " " };
        start = end_ws;
    }

    if start < text.len() {
        push_sentence(&text[start..], sep, max_chars, out);
    }
}

fn push_sentence<'a>(sent: &'a str, sep: &'a str, max_chars: usize, out: &mut Vec<Unit<'a>>) {
    if char_count(sent) > max_chars {
        hard_split(sent, sep, max_chars, out);
    } else {
        out.push(Unit { sep, text: sent });
    }
}

/// Hard-split an oversized span at word boundaries, falling back to a cut
/// at `max_chars` when the window has no whitespace at all.
fn hard_split<'a>(text: &'a str, first_sep: &'a str, max_chars: usize, out: &mut Vec<Unit<'a>>) {
    let mut rest = text;
    let mut sep = first_sep;
    while !rest.is_empty() {
        if char_count(rest) <= max_chars {
            out.push(Unit { sep, text: rest });
            break;
        }
        let cut = char_floor(rest, max_chars);
        match rest[..cut].rfind(|c: char| c.is_whitespace()) {
            Some(pos) if pos > 0 => {
                let ws_len = rest[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                out.push(Unit {
                    sep,
                    text: &rest[..pos],
                });
                rest = &rest[pos + ws_len..];
                sep = " ";
            }
            _ => {
                out.push(Unit {
                    sep,
                    text: &rest[..cut],
                });
                rest = &rest[cut..];
                sep = "";
            }
        }
    }
}

fn is_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…')
}

fn ends_terminal(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(['"', '\'', ')', ']'])
        .ends_with(|c: char| is_terminal(c))
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the `chars`-th character (or `s.len()` past the end).
fn char_floor(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}
