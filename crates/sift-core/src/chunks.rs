//! Splits free text into overlapping word windows for embedding and search.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default window length, in words.
pub const DEFAULT_CHUNK_SIZE: usize = 200;
/// Default number of words shared between consecutive windows.
pub const DEFAULT_OVERLAP: usize = 40;

/// Window size and overlap, both counted in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    /// The window must advance by at least one word per step.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Words the window moves forward per chunk.
    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Chunk `text` into windows of `chunk_size` words, each starting `chunk_size - overlap`
/// words after the previous one. Whitespace runs collapse to single spaces.
/// The last chunk is whatever is left once a window reaches the end of the text.
pub fn chunk_text(text: &str, params: ChunkParams) -> Result<Vec<String>, ConfigError> {
    params.validate()?;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + params.chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start += params.step();
    }
    Ok(chunks)
}
