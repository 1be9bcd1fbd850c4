//! HPROF record writer
//!
//! A two-level state machine on top of [`HprofSink`]: at most one top-level
//! record is open, and inside an open `HEAP_DUMP`/`HEAP_DUMP_SEGMENT` at most
//! one sub-record. Record lengths are written as placeholders and patched
//! when the record closes.
//!
//! Forward-only targets cannot seek back to a length that already left the
//! buffer. For those the writer always produces segmented dumps, makes sure
//! a whole segment fits in the buffer when it opens, and writes the length of
//! an oversized segment up front ("sealing" it) before its single
//! sub-record is written.
//!
//! Misuse (double open, unbalanced close, sub-records outside a heap dump,
//! wrong byte counts) is a programming error and panics.

use crate::format::{
    IdSize, RecordTag, SubRecordTag, HPROF_HEADER_1_0_1, HPROF_HEADER_1_0_2, RECORD_HEADER_SIZE,
};
use crate::sink::{DumpTarget, HprofSink};
use log::{error, trace, warn};
use std::io::{self, ErrorKind};

/// Largest body length a record header can express
pub const MAX_RECORD_LENGTH: u64 = u32::MAX as u64;

/// Counters collected while writing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Top-level records written, heap dump segments included
    pub records: u64,
    /// Heap dump segments written (1 for a flat dump)
    pub segments: u64,
    /// Heap dump sub-records written
    pub sub_records: u64,
    /// Arrays cut short to fit a record
    pub truncated_arrays: u64,
}

#[derive(Debug, Clone, Copy)]
struct OpenRecord {
    tag: RecordTag,
    length_position: u64,
    body_start: u64,
    /// End position whose length was already written
    sealed_end: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct OpenSubRecord {
    start: u64,
    predicted: u64,
}

/// Writes HPROF records through a [`HprofSink`]
pub struct HprofWriter<T: DumpTarget> {
    sink: HprofSink<T>,
    id_size: IdSize,
    segment_size: Option<u64>,
    record_length_limit: u64,
    record: Option<OpenRecord>,
    sub_record: Option<OpenSubRecord>,
    stats: WriterStats,
}

impl<T: DumpTarget> HprofWriter<T> {
    /// Create a writer.
    ///
    /// `segment_size` selects the segmented format (1.0.2) with segments of
    /// at most that many body bytes; `None` writes one flat `HEAP_DUMP`.
    ///
    /// # Panics
    ///
    /// Panics if the target cannot seek and the dump is flat, or if the sink
    /// buffer cannot hold a whole segment.
    pub fn new(sink: HprofSink<T>, id_size: IdSize, segment_size: Option<u64>) -> Self {
        if !sink.is_seekable() {
            let Some(segment) = segment_size else {
                panic!("flat heap dumps need a seekable target");
            };
            assert!(
                segment + RECORD_HEADER_SIZE <= sink.capacity() as u64,
                "streaming buffer of {} bytes cannot hold a {} byte segment",
                sink.capacity(),
                segment
            );
        }

        Self {
            sink,
            id_size,
            segment_size: segment_size.map(|size| size.clamp(1, MAX_RECORD_LENGTH)),
            record_length_limit: MAX_RECORD_LENGTH,
            record: None,
            sub_record: None,
            stats: WriterStats::default(),
        }
    }

    /// Lower the largest accepted record body below `u32::MAX`.
    ///
    /// Arrays are truncated to fit the limit and longer records are reported
    /// as an overflow.
    pub fn with_record_length_limit(mut self, limit: u64) -> Self {
        self.record_length_limit = limit.min(MAX_RECORD_LENGTH);
        self
    }

    /// Identifier size of the dump
    #[inline]
    pub fn id_size(&self) -> IdSize {
        self.id_size
    }

    /// Whether heap dumps are split into segments
    #[inline]
    pub fn is_segmented(&self) -> bool {
        self.segment_size.is_some()
    }

    /// Logical stream position
    #[inline]
    pub fn position(&self) -> u64 {
        self.sink.position()
    }

    /// Counters so far
    #[inline]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Largest record body the writer accepts
    #[inline]
    pub fn record_length_limit(&self) -> u64 {
        self.record_length_limit
    }

    /// Number of elements of `element_size` bytes that fit in one sub-record
    /// after a `header_size` byte header
    pub fn array_element_limit(&self, header_size: u64, element_size: u64) -> u64 {
        self.record_length_limit.saturating_sub(header_size) / element_size.max(1)
    }

    pub(crate) fn note_truncated_array(&mut self) {
        self.stats.truncated_arrays += 1;
    }

    /// First I/O error seen so far
    pub fn first_error(&self) -> Option<&io::Error> {
        self.sink.first_error()
    }

    /// Write the file header
    pub fn write_file_header(&mut self, timestamp_millis: u64) {
        let magic = if self.is_segmented() {
            HPROF_HEADER_1_0_2
        } else {
            HPROF_HEADER_1_0_1
        };
        self.sink.write_bytes(magic);
        self.sink.write_u8(0);
        self.sink.write_u32(self.id_size.bytes());
        self.sink.write_u64(timestamp_millis);
    }

    /// Open a top-level record.
    ///
    /// `body_size_hint` is the exact body length for records other than heap
    /// dumps. On a forward-only target it decides whether the buffer is
    /// flushed first, and a record too big for the buffer is sealed with it.
    ///
    /// # Panics
    ///
    /// Panics if a record is already open.
    pub fn start_top_level_record(&mut self, tag: RecordTag, body_size_hint: u64) {
        assert!(
            self.record.is_none(),
            "top-level record {tag:?} started while another is open"
        );

        let needed = RECORD_HEADER_SIZE + body_size_hint;
        let mut sealed = false;
        if !self.sink.is_seekable() && (self.sink.buffer_space() as u64) < needed {
            self.sink.flush_buffer();
            sealed = (self.sink.buffer_space() as u64) < needed;
        }

        self.sink.write_u8(tag as u8);
        self.sink.write_u32(0);
        let length_position = self.sink.position();
        let mut record = OpenRecord {
            tag,
            length_position,
            body_start: length_position + 4,
            sealed_end: None,
        };

        if sealed {
            let length = self.checked_length(tag, body_size_hint);
            self.sink.write_u32(length);
            record.sealed_end = Some(record.body_start + body_size_hint);
        } else {
            self.sink.write_u32(0);
        }
        self.record = Some(record);
    }

    /// Close the open top-level record and patch its length.
    ///
    /// # Panics
    ///
    /// Panics if no record is open, a sub-record is still open, or a sealed
    /// record did not end where its length says.
    pub fn end_top_level_record(&mut self) {
        assert!(
            self.sub_record.is_none(),
            "top-level record closed while a sub-record is open"
        );
        let Some(record) = self.record.take() else {
            panic!("no top-level record open");
        };

        let end = self.sink.position();
        match record.sealed_end {
            Some(sealed_end) => assert_eq!(
                end, sealed_end,
                "sealed {:?} record ended at {end}, length says {sealed_end}",
                record.tag
            ),
            None => {
                let length = self.checked_length(record.tag, end - record.body_start);
                self.sink.seek(record.length_position);
                self.sink.write_u32(length);
                self.sink.seek(end);
            }
        }
        self.stats.records += 1;
    }

    /// Length to write for a record body; an overflow is recorded as a failure
    fn checked_length(&mut self, tag: RecordTag, length: u64) -> u32 {
        if length > self.record_length_limit {
            error!("heap dump record length overflow: {tag:?} record of {length} bytes");
            self.sink.record_error(io::Error::from(ErrorKind::InvalidData));
        }
        length.min(MAX_RECORD_LENGTH) as u32
    }

    /// Open the heap dump: a `HEAP_DUMP` record, or the first segment
    pub fn start_heap_dump(&mut self) {
        match self.segment_size {
            Some(segment) => self.start_top_level_record(RecordTag::HeapDumpSegment, segment),
            None => self.start_top_level_record(RecordTag::HeapDump, 0),
        }
        self.stats.segments += 1;
    }

    /// Close the heap dump, followed by `HEAP_DUMP_END` when segmented
    ///
    /// # Panics
    ///
    /// Panics if the open record is not a heap dump.
    pub fn end_heap_dump(&mut self) {
        assert!(self.in_heap_dump(), "end_heap_dump without an open heap dump");
        self.end_top_level_record();
        if self.is_segmented() {
            self.start_top_level_record(RecordTag::HeapDumpEnd, 0);
            self.end_top_level_record();
        }
    }

    fn in_heap_dump(&self) -> bool {
        matches!(
            self.record,
            Some(OpenRecord {
                tag: RecordTag::HeapDump | RecordTag::HeapDumpSegment,
                ..
            })
        )
    }

    /// Close the current segment and open the next one
    fn rotate_segment(&mut self) {
        self.end_top_level_record();
        trace!("heap dump segment {} closed at {}", self.stats.segments, self.position());
        self.start_heap_dump();
    }

    /// Open a sub-record of `predicted` bytes, tag included.
    ///
    /// # Panics
    ///
    /// Panics outside of a heap dump or while another sub-record is open.
    pub fn start_sub_record(&mut self, tag: SubRecordTag, predicted: u64) {
        assert!(
            self.sub_record.is_none(),
            "sub-record {tag:?} started while another is open"
        );
        let Some(record) = self.record else {
            panic!("sub-record {tag:?} outside of a heap dump");
        };
        assert!(self.in_heap_dump(), "sub-record {tag:?} inside a {:?} record", record.tag);

        if let Some(segment) = self.segment_size {
            let body = self.sink.position() - record.body_start;
            if body > 0 && (record.sealed_end.is_some() || body + predicted > segment) {
                self.rotate_segment();
            }
        }

        let start = self.sink.position();
        if !self.sink.is_seekable() && (self.sink.buffer_space() as u64) < predicted {
            self.seal_record(start + predicted);
        }

        self.sink.write_u8(tag as u8);
        self.sub_record = Some(OpenSubRecord { start, predicted });
    }

    /// Write the final length of the open record now
    fn seal_record(&mut self, end: u64) {
        let Some(mut record) = self.record else {
            panic!("no top-level record to seal");
        };
        let length = self.checked_length(record.tag, end - record.body_start);
        let position = self.sink.position();
        self.sink.seek(record.length_position);
        self.sink.write_u32(length);
        self.sink.seek(position);
        record.sealed_end = Some(end);
        self.record = Some(record);
        warn!(
            "heap dump segment sealed early: {} byte sub-record exceeds the stream buffer",
            end - position
        );
    }

    /// Close the open sub-record.
    ///
    /// # Panics
    ///
    /// Panics if no sub-record is open, if `actual` bytes were not written
    /// since its tag, or if `actual` differs from the prediction.
    pub fn end_sub_record(&mut self, actual: u64) {
        let Some(sub_record) = self.sub_record.take() else {
            panic!("no sub-record open");
        };
        let written = self.sink.position() - sub_record.start;
        assert_eq!(written, actual, "sub-record wrote {written} bytes, expected {actual}");
        assert_eq!(
            actual, sub_record.predicted,
            "sub-record size {actual} differs from prediction {}",
            sub_record.predicted
        );
        self.stats.sub_records += 1;
    }

    /// Write a byte
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.sink.write_u8(value);
    }

    /// Write a big-endian `u16`
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.sink.write_u16(value);
    }

    /// Write a big-endian `u32`
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.sink.write_u32(value);
    }

    /// Write a big-endian `i32`
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.sink.write_i32(value);
    }

    /// Write a big-endian `u64`
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.sink.write_u64(value);
    }

    /// Write a big-endian `f32`
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.sink.write_f32(value);
    }

    /// Write a big-endian `f64`
    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.sink.write_f64(value);
    }

    /// Write an identifier
    #[inline]
    pub fn write_id(&mut self, value: u64) {
        self.sink.write_id(self.id_size, value);
    }

    /// Write raw bytes
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.sink.write_bytes(bytes);
    }

    /// Flush everything and report the first I/O error.
    ///
    /// # Panics
    ///
    /// Panics if a record is still open.
    pub fn finish(&mut self) -> io::Result<()> {
        assert!(
            self.record.is_none() && self.sub_record.is_none(),
            "heap dump finished with an open record"
        );
        self.sink.flush();
        match self.sink.take_error() {
            Some(error) => {
                warn!("heap dump data may be corrupt: {error}");
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Unwrap the target
    pub fn into_target(self) -> T {
        self.sink.into_target()
    }
}
