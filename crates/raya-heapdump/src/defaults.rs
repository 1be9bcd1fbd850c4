//! Default constants for heap dump configuration.
//!
//! Sizes follow the conventions of HPROF consumers: dumps of large heaps use
//! the segmented 1.0.2 format so no single record exceeds a 32-bit length.

/// Used heap size above which the segmented format is chosen (2 GiB).
pub const DEFAULT_SEGMENTED_THRESHOLD: u64 = 2 * 1024 * 1024 * 1024;

/// Segment size for seekable destinations (1 GiB).
pub const SEEKABLE_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Segment size for forward-only destinations (1 MiB).
///
/// A whole segment must stay in the output buffer until its length is known.
pub const STREAMING_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Extra buffer space on top of one segment for forward-only destinations.
pub const STREAMING_BUFFER_SLACK: usize = 32 * 1024;

/// Output buffer size for seekable destinations (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
