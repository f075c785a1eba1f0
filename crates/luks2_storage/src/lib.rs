//! # LUKS2 Storage
//!
//! Storage backend trait and implementations for LUKS2 header I/O.
//!
//! Backends are **opaque byte stores** addressed by absolute offset. They
//! know nothing about binary preambles, JSON areas or header slots; the
//! header controller in `luks2_core` owns all format interpretation.
//!
//! ## Design Principles
//!
//! - Positioned reads and writes of exact byte ranges
//! - Explicit `flush` / `sync` so callers decide the durability points
//! - Must be `Send + Sync` so a volume can be handed to a worker thread
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and scratch containers
//! - [`FileBackend`] - For container files and block device nodes
//!
//! ## Example
//!
//! ```rust
//! use luks2_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"LUKS").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"LUKS");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
