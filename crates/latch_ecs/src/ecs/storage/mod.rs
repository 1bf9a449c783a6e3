// mod.rs - Storage module exports

mod chunk;
mod layout;

pub use chunk::{Chunk, ChunkError, ChunkState};
pub use layout::{ChunkLayout, ColumnLayout, CHUNK_ALIGN};
