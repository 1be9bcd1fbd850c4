//! Heap dump configuration

use crate::defaults::{
    DEFAULT_BUFFER_SIZE, DEFAULT_SEGMENTED_THRESHOLD, SEEKABLE_SEGMENT_SIZE,
    STREAMING_BUFFER_SLACK, STREAMING_SEGMENT_SIZE,
};

/// HPROF flavour written by a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeapDumpFormat {
    /// Segmented when the used heap exceeds the threshold, flat otherwise.
    #[default]
    Auto,
    /// Always `JAVA PROFILE 1.0.1` with a single `HEAP_DUMP` record.
    Flat,
    /// Always `JAVA PROFILE 1.0.2` with `HEAP_DUMP_SEGMENT` records.
    Segmented,
}

/// Heap dump options.
#[derive(Debug, Clone)]
pub struct HeapDumpOptions {
    /// Output flavour (default: automatic).
    pub format: HeapDumpFormat,
    /// Used heap bytes above which `Auto` picks the segmented format (default: 2 GiB).
    pub segmented_threshold_bytes: u64,
    /// Segment body size (default: 1 GiB seekable, 1 MiB streaming).
    pub segment_size: Option<u64>,
    /// Output buffer size for seekable destinations (default: 8 KiB).
    pub buffer_size: usize,
    /// Fixed header time stamp in milliseconds (if `None`, the current time).
    pub timestamp_millis: Option<u64>,
}

impl Default for HeapDumpOptions {
    fn default() -> Self {
        Self {
            format: HeapDumpFormat::Auto,
            segmented_threshold_bytes: DEFAULT_SEGMENTED_THRESHOLD,
            segment_size: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            timestamp_millis: None,
        }
    }
}

impl HeapDumpOptions {
    /// Whether a seekable dump of a heap using `used_heap_bytes` is segmented
    pub fn is_segmented(&self, used_heap_bytes: u64) -> bool {
        match self.format {
            HeapDumpFormat::Auto => used_heap_bytes > self.segmented_threshold_bytes,
            HeapDumpFormat::Flat => false,
            HeapDumpFormat::Segmented => true,
        }
    }

    /// Segment size for a seekable destination, `None` for a flat dump
    pub fn seekable_segment_size(&self, used_heap_bytes: u64) -> Option<u64> {
        self.is_segmented(used_heap_bytes)
            .then(|| self.segment_size.unwrap_or(SEEKABLE_SEGMENT_SIZE))
    }

    /// Segment size for a forward-only destination (always segmented)
    pub fn streaming_segment_size(&self) -> u64 {
        self.segment_size.unwrap_or(STREAMING_SEGMENT_SIZE)
    }

    /// Buffer size for a forward-only destination: one segment plus slack
    pub fn streaming_buffer_size(&self) -> usize {
        usize::try_from(self.streaming_segment_size())
            .unwrap_or(usize::MAX)
            .saturating_add(STREAMING_BUFFER_SLACK)
    }
}
