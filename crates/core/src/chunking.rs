use crate::error::ConfigError;
use crate::models::Chunk;
use std::iter::FusedIterator;

/// Chunk geometry, measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::InvalidConfiguration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Overlapping windows over a text. Consecutive windows share exactly
/// `overlap` characters; only the last window may be shorter than `chunk_size`.
#[derive(Debug)]
pub struct Chunks<'a> {
    text: &'a str,
    boundaries: Vec<usize>,
    start: usize,
    config: ChunkingConfig,
    finished: bool,
}

impl<'a> Chunks<'a> {
    fn char_count(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.char_count();
        if self.finished || total == 0 {
            return None;
        }

        let end = (self.start + self.config.chunk_size).min(total);
        let piece = &self.text[self.boundaries[self.start]..self.boundaries[end]];

        if end == total {
            self.finished = true;
        } else {
            self.start += self.config.stride();
        }

        Some(piece)
    }
}

impl FusedIterator for Chunks<'_> {}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Chunks<'_>, ConfigError> {
    config.validate()?;

    let boundaries = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();

    Ok(Chunks {
        text,
        boundaries,
        start: 0,
        config,
        finished: false,
    })
}

pub fn build_chunks(
    document_id: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    Ok(chunk_text(text, config)?
        .enumerate()
        .map(|(chunk_index, piece)| Chunk {
            document_id: document_id.to_string(),
            chunk_index,
            text: piece.to_string(),
        })
        .collect())
}
