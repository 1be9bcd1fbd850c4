//! Raya Heap Dump
//!
//! Writes the live object graph of a stopped VM in the binary HPROF format
//! read by Java heap analysis tools (Eclipse MAT, VisualVM, `jhat`).
//!
//! The VM describes its heap through [`HeapEnumerator`] and
//! [`HeapDumpSupport`]. Field layouts come from a metadata blob produced
//! ahead of time by [`FieldMetadataBuilder`]. The dump itself runs inside a
//! stop-the-world pause and performs no heap allocation once the metadata
//! index and the output buffer exist.
//!
//! # Example
//!
//! ```ignore
//! use raya_heapdump::{dump_heap, HeapDumper, HeapDumpOptions};
//!
//! let summary = dump_heap(&vm, "/tmp/app.hprof", true)?;
//! println!("{} bytes", summary.bytes_written);
//!
//! // Forward-only destination, always segmented
//! HeapDumper::new(&vm)
//!     .with_options(HeapDumpOptions::default())
//!     .dump_to_stream(socket, false)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod dumper;
pub mod format;
pub mod heap;
pub mod metadata;
pub mod metadata_builder;
pub mod options;
pub mod reader;
pub mod sink;
pub mod writer;

pub use dumper::{dump_heap, write_hprof, DumpCounts, DumpSummary, HeapDumper};
pub use format::{BasicType, IdSize, RecordTag, SourceLine, StorageKind, SubRecordTag};
pub use heap::{
    ClassHandle, FrameInfo, HeapDumpSupport, HeapEnumerator, HeapObject, HeapPartition,
    LoadedClass, ObjectId, ObjectKind, ObjectLayout, RawReference, StaticFields, ThreadId,
    ThreadInfo, TypeId,
};
pub use metadata::{ClassInfo, FieldInfo, MetadataError, MetadataIndex};
pub use metadata_builder::{FieldDecl, FieldMetadataBuilder};
pub use options::{HeapDumpFormat, HeapDumpOptions};
pub use reader::{HprofFile, ReadError, SubRecord};
pub use sink::{DumpTarget, HprofSink, Seekable, Streaming};
pub use writer::{HprofWriter, WriterStats};

use std::path::PathBuf;
use thiserror::Error;

/// Heap dump errors
#[derive(Debug, Error)]
pub enum HeapDumpError {
    /// Setup failed before anything was written
    #[error("Heap dump initialization failed: {0}")]
    Initialization(#[from] MetadataError),

    /// The destination could not be opened
    #[error("Cannot create heap dump file {}: {}", .path.display(), .source)]
    Create {
        /// Destination path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Writing failed; the dump data may be corrupt
    #[error("Heap dump I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output buffer could not be allocated
    #[error("Cannot allocate a heap dump buffer of {size} bytes")]
    BufferAllocation {
        /// Requested size
        size: usize,
    },
}

/// Result type for heap dump operations
pub type HeapDumpResult<T> = Result<T, HeapDumpError>;
