//! Heap dump driver
//!
//! [`write_hprof`] walks the heap through a [`HeapEnumerator`] and emits the
//! records in a fixed order:
//!
//! 1. file header
//! 2. `UTF8` class names, field names and the shared frame symbols
//! 3. `LOAD_CLASS` per class
//! 4. the empty allocation-site `TRACE`, then `FRAME`s and a `TRACE` per thread
//! 5. the heap dump: class dumps, thread roots, global roots, sticky classes,
//!    then every object (image heap first)
//! 6. `HEAP_DUMP_END` when segmented
//!
//! Once the [`MetadataIndex`] is built and the output buffer allocated,
//! nothing here allocates: callbacks are stack closures and symbol ids are
//! computed from type ids and name indices. Log records emitted during the
//! walk carry integer arguments only; whether the installed logger allocates
//! while handling them is up to the logger.
//!
//! [`HeapDumper`] and [`dump_heap`] wrap it with destination handling,
//! format selection and the safepoint.

use crate::format::{IdSize, RecordTag, StorageKind, SubRecordTag, DUMMY_STACK_TRACE_ID};
use crate::heap::{
    FrameInfo, HeapDumpSupport, HeapEnumerator, HeapObject, HeapPartition, LoadedClass, ObjectId,
    ObjectKind, ObjectLayout, StaticFields, ThreadInfo, TypeId,
};
use crate::metadata::MetadataIndex;
use crate::options::HeapDumpOptions;
use crate::sink::{DumpTarget, HprofSink, Seekable, Streaming};
use crate::writer::{HprofWriter, WriterStats};
use crate::{HeapDumpError, HeapDumpResult};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One dump at a time per process
static DUMP_LOCK: Mutex<()> = Mutex::new(());

const UNKNOWN_SOURCE: &[u8] = b"Unknown Source";

/// Scratch space for byte-swapping array elements
const SWAP_CHUNK: usize = 1024;

/// What a dump contained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpCounts {
    /// Classes dumped
    pub classes: u32,
    /// Threads dumped
    pub threads: u32,
    /// Stack frames written
    pub frames: u64,
    /// Root sub-records written
    pub roots: u64,
    /// Objects dumped (class objects excluded)
    pub objects: u64,
    /// Objects skipped because their class is unknown
    pub skipped_objects: u64,
    /// Frames skipped because their class is unknown
    pub skipped_frames: u64,
}

/// Result of a completed dump
#[derive(Debug, Clone)]
pub struct DumpSummary {
    /// Destination file, for file dumps
    pub path: Option<PathBuf>,
    /// Total bytes written
    pub bytes_written: u64,
    /// Whether the segmented format was used
    pub segmented: bool,
    /// Entity counts
    pub counts: DumpCounts,
    /// Record counts
    pub records: WriterStats,
}

/// Symbol id layout.
///
/// ```text
/// 1 + type id                      class names
/// 1 + type id slots + name index   field names
/// then                             empty signature, "Unknown Source"
/// then                             frame method and source names, in order
/// ```
#[derive(Debug, Clone, Copy)]
struct SymbolIds {
    type_id_slots: u64,
    field_name_count: u64,
}

impl SymbolIds {
    fn new(index: &MetadataIndex<'_>) -> Self {
        Self {
            type_id_slots: index.type_id_slots() as u64,
            field_name_count: index.field_name_count() as u64,
        }
    }

    fn class_name(self, type_id: TypeId) -> u64 {
        1 + type_id as u64
    }

    fn field_name(self, name: u32) -> u64 {
        1 + self.type_id_slots + name as u64
    }

    fn empty_signature(self) -> u64 {
        1 + self.type_id_slots + self.field_name_count
    }

    fn unknown_source(self) -> u64 {
        self.empty_signature() + 1
    }

    fn first_frame_symbol(self) -> u64 {
        self.unknown_source() + 1
    }
}

/// Write a complete HPROF file for `heap` to `writer`.
///
/// The caller provides the built index, a writer configured for the wanted
/// format, and the header time stamp. Returns the first I/O error, if any,
/// after the whole dump was attempted.
pub fn write_hprof<H, T>(
    heap: &H,
    index: &MetadataIndex<'_>,
    writer: &mut HprofWriter<T>,
    timestamp_millis: u64,
) -> io::Result<DumpCounts>
where
    H: HeapEnumerator + ?Sized,
    T: DumpTarget,
{
    let layout = heap.object_layout();
    debug_assert_eq!(layout.word_size, writer.id_size());

    let symbols = SymbolIds::new(index);
    let mut context = DumpContext {
        heap,
        index,
        writer,
        layout,
        statics: heap.static_fields(),
        symbols,
        next_symbol: symbols.first_frame_symbol(),
        frame_serial: 0,
        counts: DumpCounts::default(),
    };

    context.writer.write_file_header(timestamp_millis);
    context.write_symbols();
    context.write_load_classes();
    context.write_stack_traces();

    context.writer.start_heap_dump();
    context.write_class_dumps();
    context.write_thread_roots();
    context.write_global_roots();
    context.write_sticky_classes();
    context.write_objects(HeapPartition::ImageHeap);
    context.write_objects(HeapPartition::CollectedHeap);
    context.writer.end_heap_dump();

    let counts = context.counts;
    context.writer.finish()?;
    Ok(counts)
}

struct DumpContext<'d, 'm, H: ?Sized, T: DumpTarget> {
    heap: &'d H,
    index: &'d MetadataIndex<'m>,
    writer: &'d mut HprofWriter<T>,
    layout: ObjectLayout,
    statics: StaticFields<'d>,
    symbols: SymbolIds,
    next_symbol: u64,
    frame_serial: u64,
    counts: DumpCounts,
}

impl<H, T> DumpContext<'_, '_, H, T>
where
    H: HeapEnumerator + ?Sized,
    T: DumpTarget,
{
    fn id_width(&self) -> u64 {
        self.writer.id_size().width()
    }

    /// Whether `class` is the class the index attached for its type id
    fn is_dumped(&self, class: &LoadedClass<'_>) -> bool {
        self.index
            .handle(class.type_id)
            .is_some_and(|handle| handle.object == class.handle.object)
    }

    fn class_object(&self, type_id: TypeId) -> ObjectId {
        self.index
            .handle(type_id)
            .map_or(ObjectId::NULL, |handle| handle.object)
    }

    fn write_utf8(&mut self, id: u64, name: &[u8]) {
        let width = self.id_width();
        self.writer
            .start_top_level_record(RecordTag::Utf8, width + name.len() as u64);
        self.writer.write_id(id);
        self.writer.write_bytes(name);
        self.writer.end_top_level_record();
    }

    fn write_symbols(&mut self) {
        let heap = self.heap;
        heap.for_each_loaded_class(&mut |class| {
            if self.is_dumped(class) {
                self.write_utf8(self.symbols.class_name(class.type_id), class.name);
            }
        });

        let index = self.index;
        for name in 0..index.field_name_count() {
            self.write_utf8(self.symbols.field_name(name), index.field_name(name));
        }
        self.write_utf8(self.symbols.empty_signature(), b"");
        self.write_utf8(self.symbols.unknown_source(), UNKNOWN_SOURCE);
    }

    fn write_load_classes(&mut self) {
        let heap = self.heap;
        let width = self.id_width();
        heap.for_each_loaded_class(&mut |class| {
            if !self.is_dumped(class) {
                return;
            }
            let serial = self.index.serial_number(class.type_id);
            self.writer
                .start_top_level_record(RecordTag::LoadClass, 4 + width + 4 + width);
            self.writer.write_u32(serial);
            self.writer.write_id(class.handle.object.as_u64());
            self.writer.write_u32(DUMMY_STACK_TRACE_ID);
            self.writer.write_id(self.symbols.class_name(class.type_id));
            self.writer.end_top_level_record();
            self.counts.classes += 1;
        });
    }

    fn write_stack_traces(&mut self) {
        self.writer.start_top_level_record(RecordTag::Trace, 12);
        self.writer.write_u32(DUMMY_STACK_TRACE_ID);
        self.writer.write_u32(0);
        self.writer.write_u32(0);
        self.writer.end_top_level_record();

        let heap = self.heap;
        let mut thread_serial = 0u32;
        heap.for_each_thread(&mut |thread| {
            thread_serial += 1;
            self.write_thread_trace(thread, thread_serial);
        });
        self.counts.threads = thread_serial;
    }

    fn write_thread_trace(&mut self, thread: &ThreadInfo, thread_serial: u32) {
        let heap = self.heap;
        let first_frame = self.frame_serial;
        heap.for_each_frame(thread.id, &mut |frame| self.write_frame(frame));
        let depth = self.frame_serial - first_frame;

        let width = self.id_width();
        self.writer
            .start_top_level_record(RecordTag::Trace, 12 + depth * width);
        self.writer.write_u32(thread_serial + DUMMY_STACK_TRACE_ID);
        self.writer.write_u32(thread_serial);
        self.writer.write_u32(depth as u32);
        for frame in first_frame + 1..=self.frame_serial {
            self.writer.write_id(frame);
        }
        self.writer.end_top_level_record();
    }

    fn write_frame(&mut self, frame: &FrameInfo<'_>) {
        let class_serial = self.index.serial_number(frame.class);
        if class_serial == 0 {
            debug!("heap dump: frame of unknown type id {} skipped", frame.class);
            self.counts.skipped_frames += 1;
            return;
        }

        let method = self.next_symbol;
        self.next_symbol += 1;
        self.write_utf8(method, frame.method_name);

        let source = match frame.source_file {
            Some(name) if !name.is_empty() => {
                let id = self.next_symbol;
                self.next_symbol += 1;
                self.write_utf8(id, name);
                id
            }
            _ => self.symbols.unknown_source(),
        };

        self.frame_serial += 1;
        let width = self.id_width();
        self.writer
            .start_top_level_record(RecordTag::Frame, 4 * width + 8);
        self.writer.write_id(self.frame_serial);
        self.writer.write_id(method);
        self.writer.write_id(self.symbols.empty_signature());
        self.writer.write_id(source);
        self.writer.write_u32(class_serial);
        self.writer.write_i32(frame.line.to_hprof());
        self.writer.end_top_level_record();
        self.counts.frames += 1;
    }

    fn write_class_dumps(&mut self) {
        let heap = self.heap;
        heap.for_each_loaded_class(&mut |class| {
            if self.is_dumped(class) {
                self.write_class_dump(class);
            }
        });
    }

    fn write_class_dump(&mut self, class: &LoadedClass<'_>) {
        let index = self.index;
        let handle = class.handle;
        let width = self.id_width();
        let id_size = self.writer.id_size();
        let (statics, instance) = if handle.is_array {
            (&[][..], &[][..])
        } else {
            (
                index.static_fields(class.type_id),
                index.instance_fields(class.type_id),
            )
        };

        let mut size = 1 + width + 4 + 6 * width + 4 + 2 + 2 + 2;
        for field in statics {
            size += width + 1 + field.kind.dump_size(id_size) as u64;
        }
        size += instance.len() as u64 * (width + 1);

        let super_class = handle
            .super_type
            .map_or(ObjectId::NULL, |super_type| self.class_object(super_type));

        self.writer.start_sub_record(SubRecordTag::ClassDump, size);
        self.writer.write_id(handle.object.as_u64());
        self.writer.write_u32(DUMMY_STACK_TRACE_ID);
        self.writer.write_id(super_class.as_u64());
        self.writer.write_id(handle.class_loader.as_u64());
        // signers, protection domain, two reserved ids
        for _ in 0..4 {
            self.writer.write_id(0);
        }
        self.writer
            .write_u32(if handle.is_array { 0 } else { handle.instance_size });
        self.writer.write_u16(0);

        self.writer.write_u16(statics.len() as u16);
        let primitives = self.statics.primitives;
        let objects = self.statics.objects;
        for field in statics {
            self.writer.write_id(self.symbols.field_name(field.name));
            self.writer.write_u8(field.kind.basic_type() as u8);
            self.write_value(field.kind, primitives, objects, field.offset as usize);
        }

        self.writer.write_u16(instance.len() as u16);
        for field in instance {
            self.writer.write_id(self.symbols.field_name(field.name));
            self.writer.write_u8(field.kind.basic_type() as u8);
        }
        self.writer.end_sub_record(size);
    }

    fn write_thread_roots(&mut self) {
        let heap = self.heap;
        let mut thread_serial = 0u32;
        heap.for_each_thread(&mut |thread| {
            thread_serial += 1;
            self.write_thread_roots_of(thread, thread_serial);
        });
    }

    fn write_thread_roots_of(&mut self, thread: &ThreadInfo, thread_serial: u32) {
        let width = self.id_width();
        self.writer
            .start_sub_record(SubRecordTag::RootThreadObject, 1 + width + 8);
        self.writer.write_id(thread.thread_object.as_u64());
        self.writer.write_u32(thread_serial);
        self.writer.write_u32(thread_serial + DUMMY_STACK_TRACE_ID);
        self.writer.end_sub_record(1 + width + 8);
        self.counts.roots += 1;

        let heap = self.heap;
        let layout = self.layout;
        heap.for_each_on_stack_reference(thread.id, &mut |slot| {
            self.write_unknown_root(layout.decode_reference(slot.value, slot.compressed));
        });
        heap.for_each_deoptimized_reference(thread.id, &mut |object| {
            self.write_unknown_root(object);
        });
        heap.for_each_thread_local_root(thread.id, &mut |object| {
            self.write_unknown_root(object);
        });
    }

    fn write_unknown_root(&mut self, object: ObjectId) {
        if object.is_null() {
            return;
        }
        let size = 1 + self.id_width();
        self.writer.start_sub_record(SubRecordTag::RootUnknown, size);
        self.writer.write_id(object.as_u64());
        self.writer.end_sub_record(size);
        self.counts.roots += 1;
    }

    fn write_global_roots(&mut self) {
        let heap = self.heap;
        heap.for_each_heap_object(HeapPartition::ImageHeap, &mut |object| {
            if !matches!(object.kind, ObjectKind::Class { .. })
                && self.index.is_valid(object.type_id)
            {
                self.write_global_root(object.id);
            }
        });
        heap.for_each_code_metadata_root(&mut |object| {
            if !object.is_null() {
                self.write_global_root(object);
            }
        });
    }

    fn write_global_root(&mut self, object: ObjectId) {
        let size = 1 + 2 * self.id_width();
        self.writer.start_sub_record(SubRecordTag::RootJniGlobal, size);
        self.writer.write_id(object.as_u64());
        self.writer.write_id(0);
        self.writer.end_sub_record(size);
        self.counts.roots += 1;
    }

    fn write_sticky_classes(&mut self) {
        let heap = self.heap;
        let size = 1 + self.id_width();
        heap.for_each_loaded_class(&mut |class| {
            if self.is_dumped(class) {
                self.writer.start_sub_record(SubRecordTag::RootStickyClass, size);
                self.writer.write_id(class.handle.object.as_u64());
                self.writer.end_sub_record(size);
                self.counts.roots += 1;
            }
        });
    }

    fn write_objects(&mut self, partition: HeapPartition) {
        let heap = self.heap;
        heap.for_each_heap_object(partition, &mut |object| self.write_object(object));
    }

    fn write_object(&mut self, object: &HeapObject<'_>) {
        if matches!(object.kind, ObjectKind::Class { .. }) {
            return;
        }
        if !self.index.is_valid(object.type_id) {
            trace!(
                "heap dump: object {:#x} of unknown type id {} skipped",
                object.id.as_u64(),
                object.type_id
            );
            self.counts.skipped_objects += 1;
            return;
        }

        match object.kind {
            ObjectKind::Instance { storage } | ObjectKind::Hybrid { storage } => {
                self.write_instance(object, storage)
            }
            ObjectKind::ObjectArray { length, elements } => {
                self.write_object_array(object, length, elements)
            }
            ObjectKind::PrimitiveArray {
                element,
                length,
                elements,
            } => self.write_primitive_array(object, element, length, elements),
            ObjectKind::Class { .. } => return,
        }
        self.counts.objects += 1;
    }

    fn write_instance(&mut self, object: &HeapObject<'_>, storage: &[u8]) {
        let index = self.index;
        let width = self.id_width();
        let block = index
            .cached_instance_fields_dump_size(object.type_id)
            .unwrap_or(0);
        let size = 1 + width + 4 + width + 4 + block as u64;
        let class = self.class_object(object.type_id);

        self.writer.start_sub_record(SubRecordTag::InstanceDump, size);
        self.writer.write_id(object.id.as_u64());
        self.writer.write_u32(DUMMY_STACK_TRACE_ID);
        self.writer.write_id(class.as_u64());
        self.writer.write_u32(block);
        for type_id in index.superclass_chain(object.type_id) {
            for field in index.instance_fields(type_id) {
                self.write_value(field.kind, storage, storage, field.offset as usize);
            }
        }
        self.writer.end_sub_record(size);
    }

    fn write_object_array(&mut self, object: &HeapObject<'_>, length: u64, elements: &[u8]) {
        let width = self.id_width();
        let slot = self.layout.reference_size();
        let header = 1 + width + 4 + 4 + width;
        let count = self.element_count(object, length, elements.len() / slot, header, width);
        let size = header + count * width;
        let class = self.class_object(object.type_id);

        self.writer.start_sub_record(SubRecordTag::ObjectArrayDump, size);
        self.writer.write_id(object.id.as_u64());
        self.writer.write_u32(DUMMY_STACK_TRACE_ID);
        self.writer.write_u32(count as u32);
        self.writer.write_id(class.as_u64());
        for i in 0..count as usize {
            let element = self.layout.read_reference(elements, i * slot);
            self.writer.write_id(element.as_u64());
        }
        self.writer.end_sub_record(size);
    }

    fn write_primitive_array(
        &mut self,
        object: &HeapObject<'_>,
        element: StorageKind,
        length: u64,
        elements: &[u8],
    ) {
        debug_assert_ne!(element, StorageKind::Object);
        let width = self.id_width();
        let element_size = element.dump_size(IdSize::Eight) as u64;
        let header = 1 + width + 4 + 4 + 1;
        let available = elements.len() / element_size as usize;
        let count = self.element_count(object, length, available, header, element_size);
        let size = header + count * element_size;

        self.writer
            .start_sub_record(SubRecordTag::PrimitiveArrayDump, size);
        self.writer.write_id(object.id.as_u64());
        self.writer.write_u32(DUMMY_STACK_TRACE_ID);
        self.writer.write_u32(count as u32);
        self.writer.write_u8(element.basic_type() as u8);
        let bytes = (count * element_size) as usize;
        write_swapped(self.writer, &elements[..bytes], element_size as usize);
        self.writer.end_sub_record(size);
    }

    /// Elements of an array that are actually dumped
    fn element_count(
        &mut self,
        object: &HeapObject<'_>,
        length: u64,
        available: usize,
        header: u64,
        element_size: u64,
    ) -> u64 {
        let mut count = length;
        if count > available as u64 {
            debug_assert!(false, "array {:#x} storage shorter than its length", object.id.0);
            count = available as u64;
        }

        let limit = self
            .writer
            .array_element_limit(header, element_size)
            .min(u32::MAX as u64);
        if count > limit {
            warn!(
                "heap dump: array {:#x} of {} elements truncated to {} elements",
                object.id.as_u64(),
                length,
                limit
            );
            self.writer.note_truncated_array();
            count = limit;
        }
        count
    }

    /// Write one field value; primitives come from `primitives`, references
    /// from `objects`
    fn write_value(&mut self, kind: StorageKind, primitives: &[u8], objects: &[u8], offset: usize) {
        if kind == StorageKind::Object {
            let reference = self.layout.read_reference(objects, offset);
            self.writer.write_id(reference.as_u64());
            return;
        }

        let width = kind.dump_size(IdSize::Eight) as usize;
        match offset
            .checked_add(width)
            .and_then(|end| primitives.get(offset..end))
        {
            Some(bytes) => write_swapped(self.writer, bytes, width),
            None => {
                debug_assert!(false, "{kind:?} field at {offset} outside storage");
                self.writer.write_bytes(&[0u8; 8][..width]);
            }
        }
    }
}

/// Write native-order values of `width` bytes in big-endian order
fn write_swapped<T: DumpTarget>(writer: &mut HprofWriter<T>, bytes: &[u8], width: usize) {
    if width == 1 || cfg!(target_endian = "big") {
        writer.write_bytes(bytes);
        return;
    }

    let mut scratch = [0u8; SWAP_CHUNK];
    for chunk in bytes.chunks(SWAP_CHUNK) {
        let out = &mut scratch[..chunk.len()];
        for (source, target) in chunk.chunks_exact(width).zip(out.chunks_exact_mut(width)) {
            for (i, byte) in source.iter().rev().enumerate() {
                target[i] = *byte;
            }
        }
        writer.write_bytes(out);
    }
}

fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Heap dump entry point for a VM
pub struct HeapDumper<'vm, V: ?Sized> {
    vm: &'vm V,
    options: HeapDumpOptions,
}

impl<'vm, V> HeapDumper<'vm, V>
where
    V: HeapDumpSupport + ?Sized,
{
    /// Create a dumper with default options
    pub fn new(vm: &'vm V) -> Self {
        Self {
            vm,
            options: HeapDumpOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: HeapDumpOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options
    pub fn options(&self) -> &HeapDumpOptions {
        &self.options
    }

    /// Dump to a new file at `path`, replacing an existing one.
    ///
    /// The file is created before anything else happens; a failure to
    /// create it is reported without touching the heap.
    pub fn dump_to_file(
        &self,
        path: impl AsRef<Path>,
        gc_before_dump: bool,
    ) -> HeapDumpResult<DumpSummary> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| HeapDumpError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        let mut summary = self.dump_to_seekable(file, gc_before_dump)?;
        summary.path = Some(path.to_path_buf());
        Ok(summary)
    }

    /// Dump to a seekable writer; the format follows the options and the
    /// used heap size
    pub fn dump_to_seekable<W: Write + Seek>(
        &self,
        writer: W,
        gc_before_dump: bool,
    ) -> HeapDumpResult<DumpSummary> {
        let _guard = DUMP_LOCK.lock();
        if gc_before_dump {
            self.vm.collect_garbage();
        }
        let segment_size = self.options.seekable_segment_size(self.vm.used_heap_bytes());
        let sink = HprofSink::new(Seekable(writer), self.options.buffer_size)?;
        self.run(sink, segment_size)
    }

    /// Dump to a forward-only writer; always segmented
    pub fn dump_to_stream<W: Write>(
        &self,
        writer: W,
        gc_before_dump: bool,
    ) -> HeapDumpResult<DumpSummary> {
        let _guard = DUMP_LOCK.lock();
        if gc_before_dump {
            self.vm.collect_garbage();
        }
        let segment_size = self.options.streaming_segment_size();
        let sink = HprofSink::new(Streaming(writer), self.options.streaming_buffer_size())?;
        self.run(sink, Some(segment_size))
    }

    fn run<T: DumpTarget>(
        &self,
        sink: HprofSink<T>,
        segment_size: Option<u64>,
    ) -> HeapDumpResult<DumpSummary> {
        let layout = self.vm.object_layout();
        let mut writer = HprofWriter::new(sink, layout.word_size, segment_size);
        let timestamp = self
            .options
            .timestamp_millis
            .unwrap_or_else(current_time_millis);

        info!(
            "heap dump started ({} format, {}-byte ids)",
            if segment_size.is_some() { "segmented" } else { "flat" },
            layout.word_size.bytes()
        );

        let mut outcome: HeapDumpResult<DumpCounts> =
            Err(HeapDumpError::Io(io::Error::from(ErrorKind::Interrupted)));
        self.vm.stop_the_world(&mut || {
            outcome = self.dump_at_safepoint(&mut writer, timestamp);
        });
        let counts = outcome?;

        let summary = DumpSummary {
            path: None,
            bytes_written: writer.position(),
            segmented: writer.is_segmented(),
            counts,
            records: writer.stats(),
        };
        info!(
            "heap dump finished: {} bytes, {} classes, {} objects, {} threads",
            summary.bytes_written, counts.classes, counts.objects, counts.threads
        );
        Ok(summary)
    }

    fn dump_at_safepoint<T: DumpTarget>(
        &self,
        writer: &mut HprofWriter<T>,
        timestamp: u64,
    ) -> HeapDumpResult<DumpCounts> {
        let mut index = MetadataIndex::build(self.vm.field_metadata(), self.vm)?;
        let result = write_hprof(self.vm, &index, writer, timestamp);
        index.free();
        result.map_err(HeapDumpError::from)
    }
}

/// Dump the heap of `vm` to a new file at `destination`.
///
/// Collects garbage first when `gc_before_dump` is set. The segmented
/// format is used when the used heap exceeds 2 GiB.
pub fn dump_heap<V>(
    vm: &V,
    destination: impl AsRef<Path>,
    gc_before_dump: bool,
) -> HeapDumpResult<DumpSummary>
where
    V: HeapDumpSupport + ?Sized,
{
    HeapDumper::new(vm).dump_to_file(destination, gc_before_dump)
}
