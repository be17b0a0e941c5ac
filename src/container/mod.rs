//! Single-file container holding named, optionally zstd-compressed entries.
//!
//! Layout: 64-byte file header, entry payloads back to back, a binary
//! directory, and a 64-byte trailer pointing at the directory. The trailer is
//! only written on seal, and the file only appears under its final name after
//! that, so a container that opens is complete.

mod format;
mod mmap;
mod reader;
mod writer;

pub use format::{
    DirectoryEntry, CONTAINER_MAGIC, CONTAINER_VERSION, ENTRY_FLAG_ZSTD, FILE_HEADER_SIZE,
    TRAILER_SIZE,
};
pub use reader::{ContainerReader, EntryStream};
pub use writer::{ContainerWriter, PendingEntry};
