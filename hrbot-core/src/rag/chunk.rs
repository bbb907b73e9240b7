//! Recursive-boundary text chunking.
//!
//! Text is cut into atoms at the coarsest boundary that keeps each atom within
//! `chunk_size - chunk_overlap` characters (paragraph, line, sentence, word,
//! then hard cuts). Atoms are packed greedily into chunks of at most
//! `chunk_size` characters, and every chunk after the first starts with the
//! last `chunk_overlap` characters of its predecessor. Whitespace-only chunks
//! at either end of the document are dropped. Offsets and sizes are in chars,
//! not bytes.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A bounded span of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Document file name.
    pub source: String,
    pub text: String,
    pub sequence_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Deterministic id for the `sequence_index`-th chunk of `source`.
pub fn chunk_id(prefix: &str, source: &str, sequence_index: usize) -> String {
    format!("{prefix}_{source}_chunk_{sequence_index}")
}

/// Default boundaries, coarsest first.
pub fn default_separators() -> Vec<String> {
    vec!["\n\n".into(), "\n".into(), ". ".into(), " ".into()]
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<Vec<char>>,
    id_prefix: String,
}

impl TextSplitter {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        id_prefix: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::with_separators(chunk_size, chunk_overlap, id_prefix, &default_separators())
    }

    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        id_prefix: impl Into<String>,
        separators: &[String],
    ) -> Result<Self, ConfigError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chunk_overlap ({chunk_overlap}) must be smaller than a non-zero chunk_size ({chunk_size})"
                ),
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.chars().collect())
                .collect(),
            id_prefix: id_prefix.into(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split a document into ordered chunks tagged with `source`.
    pub fn split(&self, text: &str, source: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut atoms = Vec::new();
        self.split_range(&chars, 0, chars.len(), 0, &mut atoms);

        let spans = self.pack(&atoms);
        let is_blank =
            |&(start, end): &(usize, usize)| chars[start..end].iter().all(|c| c.is_whitespace());
        // blank spans are trimmed only at the ends; an inner one carries the
        // overlap between its neighbours
        let Some(first) = spans.iter().position(|span| !is_blank(span)) else {
            return Vec::new();
        };
        let last = spans.iter().rposition(|span| !is_blank(span)).unwrap_or(first);
        let spans = &spans[first..=last];
        debug_assert!(
            spans
                .windows(2)
                .all(|pair| pair[1].0 + self.chunk_overlap == pair[0].1)
        );

        spans
            .iter()
            .map(|&(start, end)| (start, end, chars[start..end].iter().collect::<String>()))
            .enumerate()
            .map(|(sequence_index, (start_offset, end_offset, text))| Chunk {
                id: chunk_id(&self.id_prefix, source, sequence_index),
                source: source.to_string(),
                text,
                sequence_index,
                start_offset,
                end_offset,
            })
            .collect()
    }

    fn max_atom(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Break `chars[start..end]` into contiguous atoms no longer than `max_atom`.
    fn split_range(
        &self,
        chars: &[char],
        start: usize,
        end: usize,
        level: usize,
        atoms: &mut Vec<(usize, usize)>,
    ) {
        if end - start <= self.max_atom() {
            atoms.push((start, end));
            return;
        }

        let Some(separator) = self.separators.get(level) else {
            let mut pos = start;
            while pos < end {
                let next = (pos + self.max_atom()).min(end);
                atoms.push((pos, next));
                pos = next;
            }
            return;
        };

        let pieces = split_keeping_separator(chars, start, end, separator);
        if pieces.len() == 1 {
            self.split_range(chars, start, end, level + 1, atoms);
            return;
        }
        for (piece_start, piece_end) in pieces {
            self.split_range(chars, piece_start, piece_end, level + 1, atoms);
        }
    }

    /// Greedily merge atoms into chunk spans.
    ///
    /// A span is closed only when the next atom does not fit, which makes every
    /// closed span longer than `chunk_overlap`, so stepping back by the overlap
    /// never crosses the previous start and the next atom always fits.
    fn pack(&self, atoms: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let Some(&(first_start, _)) = atoms.first() else {
            return spans;
        };
        let mut current_start = first_start;
        let mut current_end = first_start;

        for &(_, atom_end) in atoms {
            if atom_end - current_start > self.chunk_size {
                spans.push((current_start, current_end));
                current_start = current_end - self.chunk_overlap;
            }
            current_end = atom_end;
        }
        if current_end > current_start {
            spans.push((current_start, current_end));
        }
        spans
    }
}

/// Split at every occurrence of `separator`, leaving it on the preceding piece.
fn split_keeping_separator(
    chars: &[char],
    start: usize,
    end: usize,
    separator: &[char],
) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut i = start;
    while i + separator.len() <= end {
        if chars[i..i + separator.len()] == *separator {
            let piece_end = i + separator.len();
            pieces.push((piece_start, piece_end));
            piece_start = piece_end;
            i = piece_end;
        } else {
            i += 1;
        }
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}
