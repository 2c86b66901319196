//! Single-session document grounding.

pub mod chunker;
pub mod index;
pub mod loader;

pub use index::{ChunkId, Document, DocumentChunk, DocumentId, DocumentIndex, StudyQuestion};
pub use loader::{DocumentLoader, LoadedDocument};
