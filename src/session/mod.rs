//! Session and chunk lifecycle store (spec §3, §4.10, C10).

pub mod chunker;
pub mod store;
pub mod types;

pub use chunker::{mix_to_mono, Chunker, ChunkerConfig, FlushedChunk};
pub use store::SessionManager;
pub use types::{Chunk, ChunkStatus, DialogueChannel, DialogueEntry, Session, SessionMetaFile, SessionStatus};
