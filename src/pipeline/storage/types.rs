use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::pipeline::extraction::ContentUnit;

/// A fixed-size window of a unit's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Character offset of the window in the unit's content.
    pub start_index: usize,
}

/// Chunking strategy trait
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

/// Downstream collaborator receiving each file's content units.
///
/// `store` either persists every unit or fails; the caller only marks a
/// file processed after it returns `Ok`.
pub trait ContentSink: Send + Sync {
    /// Returns the number of records written.
    fn store(&self, source: &str, units: &[ContentUnit]) -> Result<usize, StorageError>;
}
