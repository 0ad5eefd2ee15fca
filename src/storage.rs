//! Output sinks for verified piece data.
//!
//! The engine never decides where data lives. Each verified piece is handed
//! to a [`PieceSink`] exactly once, at the piece's byte offset within the
//! torrent. Pieces complete in any order, so writes arrive out of order but
//! never overlap.
//!
//! # Components
//!
//! - [`PieceSink`] - The write interface the piece tracker calls
//! - [`FileSink`] - Positional writes into a single preallocated file
//! - [`MemorySink`] - Records writes in memory, for tests and small payloads
//!
//! # Examples
//!
//! ```no_run
//! use swarmwire::storage::{FileSink, PieceSink};
//! use bytes::Bytes;
//!
//! # fn main() -> Result<(), swarmwire::StorageError> {
//! let sink = FileSink::create("download.bin", 24)?;
//! sink.write(16, Bytes::from_static(b"tail end"))?;
//! sink.write(0, Bytes::from_static(b"sixteen bytes..."))?;
//! sink.sync()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod sink;

pub use error::StorageError;
pub use sink::{FileSink, MemorySink, PieceSink};
