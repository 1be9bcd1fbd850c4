//! HPROF reader
//!
//! A validating parser for the files produced by this crate. It checks the
//! ordering guarantees of the writer while parsing: every symbol is defined
//! before it is referenced, every class is loaded before it is dumped, every
//! frame exists before a trace lists it, and every sub-record stays inside
//! its heap dump record.

use crate::format::{BasicType, IdSize, RecordTag, SubRecordTag, HPROF_HEADER_1_0_1, HPROF_HEADER_1_0_2};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while reading an HPROF file
#[derive(Debug, Error)]
pub enum ReadError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected end of data
    #[error("Unexpected end of HPROF data at offset {0}")]
    UnexpectedEnd(usize),

    /// Not an HPROF header
    #[error("Invalid HPROF header")]
    InvalidHeader,

    /// Identifier size other than 4 or 8
    #[error("Invalid identifier size {0}")]
    InvalidIdSize(u32),

    /// Unknown top-level record tag
    #[error("Unknown record tag {0:#04x} at offset {1}")]
    UnknownRecordTag(u8, usize),

    /// Unknown heap dump sub-record tag
    #[error("Unknown sub-record tag {0:#04x} at offset {1}")]
    UnknownSubRecordTag(u8, usize),

    /// Unknown basic type
    #[error("Invalid basic type {0} at offset {1}")]
    InvalidBasicType(u8, usize),

    /// A symbol is referenced before its UTF8 record
    #[error("Symbol {0:#x} used before definition at offset {1}")]
    UndefinedSymbol(u64, usize),

    /// A class is dumped before its LOAD_CLASS record
    #[error("Class {0:#x} used before LOAD_CLASS at offset {1}")]
    UnloadedClass(u64, usize),

    /// A trace lists a frame that was not written
    #[error("Frame {0:#x} used before definition at offset {1}")]
    UndefinedFrame(u64, usize),

    /// Sub-record outside of a heap dump record
    #[error("Heap dump data after HEAP_DUMP_END at offset {0}")]
    DataAfterEnd(usize),
}

/// A top-level record and where it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    /// Record tag
    pub tag: RecordTag,
    /// Offset of the tag byte
    pub offset: usize,
    /// Body length from the header
    pub length: u32,
}

/// `LOAD_CLASS` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadClassRecord {
    /// Class serial number
    pub serial: u32,
    /// Class object id
    pub class: u64,
    /// Stack trace serial number
    pub trace_serial: u32,
    /// Class name symbol
    pub name: u64,
}

/// `FRAME` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    /// Frame id
    pub id: u64,
    /// Method name symbol
    pub method: u64,
    /// Method signature symbol
    pub signature: u64,
    /// Source file symbol
    pub source: u64,
    /// Class serial number
    pub class_serial: u32,
    /// Line number or sentinel
    pub line: i32,
}

/// `TRACE` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Trace serial number
    pub serial: u32,
    /// Thread serial number
    pub thread_serial: u32,
    /// Frame ids, innermost first
    pub frames: Vec<u64>,
}

/// Field descriptor of a class dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name symbol
    pub name: u64,
    /// Field type
    pub ty: BasicType,
}

/// Static field of a class dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFieldValue {
    /// Field name symbol
    pub name: u64,
    /// Field type
    pub ty: BasicType,
    /// Raw big-endian value, zero extended
    pub value: u64,
}

/// `GC_CLASS_DUMP` sub-record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDumpRecord {
    /// Class object id
    pub class: u64,
    /// Stack trace serial number
    pub trace_serial: u32,
    /// Superclass object id, 0 at the root
    pub super_class: u64,
    /// Class loader object id
    pub class_loader: u64,
    /// Signers, protection domain and the two reserved ids
    pub reserved: [u64; 4],
    /// Instance size in bytes
    pub instance_size: u32,
    /// Constant pool entries
    pub constant_pool_size: u16,
    /// Static fields with values
    pub statics: Vec<StaticFieldValue>,
    /// Instance field descriptors
    pub instance_fields: Vec<FieldDescriptor>,
}

/// Heap dump sub-record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubRecord {
    /// `GC_ROOT_UNKNOWN`
    RootUnknown {
        /// Referenced object
        object: u64,
    },
    /// `GC_ROOT_JNI_GLOBAL`
    RootJniGlobal {
        /// Referenced object
        object: u64,
        /// Global reference id
        reference: u64,
    },
    /// `GC_ROOT_STICKY_CLASS`
    RootStickyClass {
        /// Class object
        class: u64,
    },
    /// `GC_ROOT_THREAD_OBJ`
    RootThreadObject {
        /// Thread object
        thread: u64,
        /// Thread serial number
        thread_serial: u32,
        /// Stack trace serial number
        trace_serial: u32,
    },
    /// `GC_CLASS_DUMP`
    ClassDump(ClassDumpRecord),
    /// `GC_INSTANCE_DUMP`
    InstanceDump {
        /// Object id
        object: u64,
        /// Stack trace serial number
        trace_serial: u32,
        /// Class object id
        class: u64,
        /// Field block, big-endian
        fields: Vec<u8>,
    },
    /// `GC_OBJ_ARRAY_DUMP`
    ObjectArrayDump {
        /// Object id
        object: u64,
        /// Stack trace serial number
        trace_serial: u32,
        /// Array class object id
        class: u64,
        /// Element ids
        elements: Vec<u64>,
    },
    /// `GC_PRIM_ARRAY_DUMP`
    PrimitiveArrayDump {
        /// Object id
        object: u64,
        /// Stack trace serial number
        trace_serial: u32,
        /// Element type
        element: BasicType,
        /// Number of elements
        length: u32,
        /// Elements, big-endian
        data: Vec<u8>,
    },
}

/// Decoded instance field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldValue {
    /// Field name symbol
    pub name: u64,
    /// Field type
    pub ty: BasicType,
    /// Raw big-endian value, zero extended
    pub value: u64,
}

/// A parsed HPROF file
#[derive(Debug, Clone)]
pub struct HprofFile {
    /// Format 1.0.2
    pub segmented: bool,
    /// Identifier size
    pub id_size: IdSize,
    /// Header time stamp
    pub timestamp_millis: u64,
    /// Top-level records in file order
    pub records: Vec<RecordInfo>,
    /// UTF8 symbols by id
    pub strings: FxHashMap<u64, Vec<u8>>,
    /// LOAD_CLASS records in file order
    pub load_classes: Vec<LoadClassRecord>,
    /// FRAME records in file order
    pub frames: Vec<FrameRecord>,
    /// TRACE records in file order
    pub traces: Vec<TraceRecord>,
    /// Heap dump sub-records in file order, across segments
    pub sub_records: Vec<SubRecord>,
    /// A HEAP_DUMP_END record was seen
    pub heap_dump_end: bool,
}

impl HprofFile {
    /// Read and parse a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Parse a complete HPROF image
    pub fn parse(bytes: &[u8]) -> Result<Self, ReadError> {
        let mut reader = ByteReader::new(bytes, IdSize::Eight);

        let magic_end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(ReadError::InvalidHeader)?;
        let segmented = match &bytes[..magic_end] {
            magic if magic == HPROF_HEADER_1_0_2 => true,
            magic if magic == HPROF_HEADER_1_0_1 => false,
            _ => return Err(ReadError::InvalidHeader),
        };
        reader.skip(magic_end + 1)?;
        let raw_id_size = reader.read_u32()?;
        let id_size = IdSize::from_bytes(raw_id_size).ok_or(ReadError::InvalidIdSize(raw_id_size))?;
        reader.id_size = id_size;
        let timestamp_millis = reader.read_u64()?;

        let mut file = HprofFile {
            segmented,
            id_size,
            timestamp_millis,
            records: Vec::new(),
            strings: FxHashMap::default(),
            load_classes: Vec::new(),
            frames: Vec::new(),
            traces: Vec::new(),
            sub_records: Vec::new(),
            heap_dump_end: false,
        };
        let mut state = ParseState::default();

        while reader.remaining() > 0 {
            let offset = reader.position();
            let raw_tag = reader.read_u8()?;
            let tag = RecordTag::from_u8(raw_tag).ok_or(ReadError::UnknownRecordTag(raw_tag, offset))?;
            let _time = reader.read_u32()?;
            let length = reader.read_u32()?;
            let body_start = reader.position();
            let body = reader.read_bytes(length as usize)?;
            let mut body = ByteReader::with_base(body, id_size, body_start);

            file.records.push(RecordInfo { tag, offset, length });
            match tag {
                RecordTag::Utf8 => {
                    let id = body.read_id()?;
                    let name = body.read_bytes(body.remaining())?;
                    file.strings.insert(id, name.to_vec());
                }
                RecordTag::LoadClass => {
                    let record = LoadClassRecord {
                        serial: body.read_u32()?,
                        class: body.read_id()?,
                        trace_serial: body.read_u32()?,
                        name: body.read_id()?,
                    };
                    file.require_symbol(record.name, body_start)?;
                    state.loaded_classes.insert(record.class);
                    file.load_classes.push(record);
                }
                RecordTag::Frame => {
                    let record = FrameRecord {
                        id: body.read_id()?,
                        method: body.read_id()?,
                        signature: body.read_id()?,
                        source: body.read_id()?,
                        class_serial: body.read_u32()?,
                        line: body.read_u32()? as i32,
                    };
                    for symbol in [record.method, record.signature, record.source] {
                        file.require_symbol(symbol, body_start)?;
                    }
                    state.frames.insert(record.id);
                    file.frames.push(record);
                }
                RecordTag::Trace => {
                    let serial = body.read_u32()?;
                    let thread_serial = body.read_u32()?;
                    let count = body.read_u32()?;
                    let mut frames =
                        Vec::with_capacity(body.capacity_for(count, id_size.width() as usize));
                    for _ in 0..count {
                        let frame = body.read_id()?;
                        if !state.frames.contains(&frame) {
                            return Err(ReadError::UndefinedFrame(frame, body_start));
                        }
                        frames.push(frame);
                    }
                    file.traces.push(TraceRecord {
                        serial,
                        thread_serial,
                        frames,
                    });
                }
                RecordTag::HeapDump | RecordTag::HeapDumpSegment => {
                    if file.heap_dump_end {
                        return Err(ReadError::DataAfterEnd(offset));
                    }
                    while body.remaining() > 0 {
                        let sub_record = file.parse_sub_record(&mut body, &state)?;
                        file.sub_records.push(sub_record);
                    }
                }
                RecordTag::HeapDumpEnd => file.heap_dump_end = true,
            }
        }

        Ok(file)
    }

    fn require_symbol(&self, id: u64, offset: usize) -> Result<(), ReadError> {
        if self.strings.contains_key(&id) {
            Ok(())
        } else {
            Err(ReadError::UndefinedSymbol(id, offset))
        }
    }

    fn parse_sub_record(
        &self,
        body: &mut ByteReader<'_>,
        state: &ParseState,
    ) -> Result<SubRecord, ReadError> {
        let offset = body.position();
        let raw_tag = body.read_u8()?;
        let tag = SubRecordTag::from_u8(raw_tag)
            .ok_or(ReadError::UnknownSubRecordTag(raw_tag, offset))?;
        let require_loaded = |class: u64| {
            if state.loaded_classes.contains(&class) {
                Ok(())
            } else {
                Err(ReadError::UnloadedClass(class, offset))
            }
        };

        let record = match tag {
            SubRecordTag::RootUnknown => SubRecord::RootUnknown {
                object: body.read_id()?,
            },
            SubRecordTag::RootJniGlobal => SubRecord::RootJniGlobal {
                object: body.read_id()?,
                reference: body.read_id()?,
            },
            SubRecordTag::RootStickyClass => SubRecord::RootStickyClass {
                class: body.read_id()?,
            },
            SubRecordTag::RootThreadObject => SubRecord::RootThreadObject {
                thread: body.read_id()?,
                thread_serial: body.read_u32()?,
                trace_serial: body.read_u32()?,
            },
            SubRecordTag::ClassDump => {
                let class = body.read_id()?;
                require_loaded(class)?;
                let trace_serial = body.read_u32()?;
                let super_class = body.read_id()?;
                let class_loader = body.read_id()?;
                let reserved = [body.read_id()?, body.read_id()?, body.read_id()?, body.read_id()?];
                let instance_size = body.read_u32()?;
                let constant_pool_size = body.read_u16()?;
                for _ in 0..constant_pool_size {
                    let _index = body.read_u16()?;
                    let ty = body.read_basic_type()?;
                    body.read_value(ty)?;
                }

                let static_count = body.read_u16()?;
                let mut statics = Vec::with_capacity(static_count as usize);
                for _ in 0..static_count {
                    let name = body.read_id()?;
                    self.require_symbol(name, offset)?;
                    let ty = body.read_basic_type()?;
                    let value = body.read_value(ty)?;
                    statics.push(StaticFieldValue { name, ty, value });
                }

                let instance_count = body.read_u16()?;
                let mut instance_fields = Vec::with_capacity(instance_count as usize);
                for _ in 0..instance_count {
                    let name = body.read_id()?;
                    self.require_symbol(name, offset)?;
                    let ty = body.read_basic_type()?;
                    instance_fields.push(FieldDescriptor { name, ty });
                }

                SubRecord::ClassDump(ClassDumpRecord {
                    class,
                    trace_serial,
                    super_class,
                    class_loader,
                    reserved,
                    instance_size,
                    constant_pool_size,
                    statics,
                    instance_fields,
                })
            }
            SubRecordTag::InstanceDump => {
                let object = body.read_id()?;
                let trace_serial = body.read_u32()?;
                let class = body.read_id()?;
                require_loaded(class)?;
                let length = body.read_u32()?;
                SubRecord::InstanceDump {
                    object,
                    trace_serial,
                    class,
                    fields: body.read_bytes(length as usize)?.to_vec(),
                }
            }
            SubRecordTag::ObjectArrayDump => {
                let object = body.read_id()?;
                let trace_serial = body.read_u32()?;
                let count = body.read_u32()?;
                let class = body.read_id()?;
                require_loaded(class)?;
                let mut elements =
                    Vec::with_capacity(body.capacity_for(count, self.id_size.width() as usize));
                for _ in 0..count {
                    elements.push(body.read_id()?);
                }
                SubRecord::ObjectArrayDump {
                    object,
                    trace_serial,
                    class,
                    elements,
                }
            }
            SubRecordTag::PrimitiveArrayDump => {
                let object = body.read_id()?;
                let trace_serial = body.read_u32()?;
                let length = body.read_u32()?;
                let element = body.read_basic_type()?;
                let size = element.size(self.id_size) as usize;
                let data_len = (length as usize)
                    .checked_mul(size)
                    .ok_or(ReadError::UnexpectedEnd(body.position()))?;
                SubRecord::PrimitiveArrayDump {
                    object,
                    trace_serial,
                    element,
                    length,
                    data: body.read_bytes(data_len)?.to_vec(),
                }
            }
        };
        Ok(record)
    }

    /// UTF8 symbol by id
    pub fn string(&self, id: u64) -> Option<&[u8]> {
        self.strings.get(&id).map(Vec::as_slice)
    }

    /// Class name of a class object id
    pub fn class_name(&self, class: u64) -> Option<&[u8]> {
        let record = self.load_classes.iter().find(|record| record.class == class)?;
        self.string(record.name)
    }

    /// Class dump of a class object id
    pub fn class_dump(&self, class: u64) -> Option<&ClassDumpRecord> {
        self.sub_records.iter().find_map(|record| match record {
            SubRecord::ClassDump(dump) if dump.class == class => Some(dump),
            _ => None,
        })
    }

    /// Decode an instance field block against the class dumps, most derived
    /// class first. `None` if the block does not match the declared fields
    /// or the superclass chain is cyclic.
    pub fn instance_fields(&self, class: u64, fields: &[u8]) -> Option<Vec<FieldValue>> {
        let mut reader = ByteReader::new(fields, self.id_size);
        let mut values = Vec::new();
        let mut visited = FxHashSet::default();
        let mut current = class;
        while current != 0 {
            if !visited.insert(current) {
                return None;
            }
            let dump = self.class_dump(current)?;
            for field in &dump.instance_fields {
                let value = reader.read_value(field.ty).ok()?;
                values.push(FieldValue {
                    name: field.name,
                    ty: field.ty,
                    value,
                });
            }
            current = dump.super_class;
        }
        (reader.remaining() == 0).then_some(values)
    }

    /// Number of records with `tag`
    pub fn count_records(&self, tag: RecordTag) -> usize {
        self.records.iter().filter(|record| record.tag == tag).count()
    }
}

#[derive(Default)]
struct ParseState {
    loaded_classes: FxHashSet<u64>,
    frames: FxHashSet<u64>,
}

/// Big-endian cursor with offsets relative to the whole file
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    base: usize,
    id_size: IdSize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], id_size: IdSize) -> Self {
        Self::with_base(data, id_size, 0)
    }

    fn with_base(data: &'a [u8], id_size: IdSize, base: usize) -> Self {
        Self {
            data,
            position: 0,
            base,
            id_size,
        }
    }

    fn position(&self) -> usize {
        self.base + self.position
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Preallocation for `count` items of `width` bytes, bounded by what is
    /// left to read
    fn capacity_for(&self, count: u32, width: usize) -> usize {
        (count as usize).min(self.remaining() / width.max(1))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if len > self.remaining() {
            return Err(ReadError::UnexpectedEnd(self.position()));
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<(), ReadError> {
        self.read_bytes(len).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, ReadError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_id(&mut self) -> Result<u64, ReadError> {
        match self.id_size {
            IdSize::Four => self.read_u32().map(u64::from),
            IdSize::Eight => self.read_u64(),
        }
    }

    fn read_basic_type(&mut self) -> Result<BasicType, ReadError> {
        let offset = self.position();
        let value = self.read_u8()?;
        BasicType::from_u8(value).ok_or(ReadError::InvalidBasicType(value, offset))
    }

    fn read_value(&mut self, ty: BasicType) -> Result<u64, ReadError> {
        match ty.size(self.id_size) {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            _ => self.read_u64(),
        }
    }
}
