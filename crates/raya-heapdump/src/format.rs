//! HPROF binary format definitions
//!
//! # Byte order
//!
//! HPROF files are **big-endian**. Every multi-byte value written by this
//! crate goes through `to_be_bytes`, independent of the host byte order.
//! Object storage handed to the writer by the VM is in *native* order and is
//! converted value by value.
//!
//! # File layout
//!
//! ```text
//! "JAVA PROFILE 1.0.x\0"
//! u4   identifier size (4 or 8, the native word size)
//! u8   creation time, milliseconds since the Unix epoch
//! [record]*
//!
//! record:
//! u1   tag
//! u4   microseconds since the header time stamp (always 0 here)
//! u4   number of bytes remaining in the record
//! [u1]* body
//! ```

/// Header magic of the flat format (single `HEAP_DUMP` record).
pub const HPROF_HEADER_1_0_1: &[u8] = b"JAVA PROFILE 1.0.1";

/// Header magic of the segmented format (`HEAP_DUMP_SEGMENT`* + `HEAP_DUMP_END`).
pub const HPROF_HEADER_1_0_2: &[u8] = b"JAVA PROFILE 1.0.2";

/// Size of a top-level record header: tag + time + length.
pub const RECORD_HEADER_SIZE: u64 = 1 + 4 + 4;

/// Allocation sites are not tracked; every record that needs a stack trace
/// serial number references this empty trace.
pub const DUMMY_STACK_TRACE_ID: u32 = 1;

/// Top-level record tags
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordTag {
    /// A UTF-8 encoded name
    Utf8 = 0x01,
    /// A loaded class
    LoadClass = 0x02,
    /// A stack frame
    Frame = 0x04,
    /// A stack trace
    Trace = 0x05,
    /// A flat heap dump (format 1.0.1)
    HeapDump = 0x0C,
    /// One segment of a heap dump (format 1.0.2)
    HeapDumpSegment = 0x1C,
    /// End of a segmented heap dump
    HeapDumpEnd = 0x2C,
}

impl RecordTag {
    /// Decode a record tag byte
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(RecordTag::Utf8),
            0x02 => Some(RecordTag::LoadClass),
            0x04 => Some(RecordTag::Frame),
            0x05 => Some(RecordTag::Trace),
            0x0C => Some(RecordTag::HeapDump),
            0x1C => Some(RecordTag::HeapDumpSegment),
            0x2C => Some(RecordTag::HeapDumpEnd),
            _ => None,
        }
    }
}

/// Heap dump sub-record tags
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubRecordTag {
    /// Root of unknown origin (stack slots, thread locals)
    RootUnknown = 0xFF,
    /// Global handle root (image heap objects, code metadata)
    RootJniGlobal = 0x01,
    /// System class root
    RootStickyClass = 0x05,
    /// Thread object root
    RootThreadObject = 0x08,
    /// Dump of a class
    ClassDump = 0x20,
    /// Dump of a normal object
    InstanceDump = 0x21,
    /// Dump of an object array
    ObjectArrayDump = 0x22,
    /// Dump of a primitive array
    PrimitiveArrayDump = 0x23,
}

impl SubRecordTag {
    /// Decode a sub-record tag byte
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0xFF => Some(SubRecordTag::RootUnknown),
            0x01 => Some(SubRecordTag::RootJniGlobal),
            0x05 => Some(SubRecordTag::RootStickyClass),
            0x08 => Some(SubRecordTag::RootThreadObject),
            0x20 => Some(SubRecordTag::ClassDump),
            0x21 => Some(SubRecordTag::InstanceDump),
            0x22 => Some(SubRecordTag::ObjectArrayDump),
            0x23 => Some(SubRecordTag::PrimitiveArrayDump),
            _ => None,
        }
    }
}

/// HPROF basic type tags used in field descriptors and primitive arrays
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BasicType {
    /// Object reference
    Object = 2,
    /// `boolean`
    Boolean = 4,
    /// `char`
    Char = 5,
    /// `float`
    Float = 6,
    /// `double`
    Double = 7,
    /// `byte`
    Byte = 8,
    /// `short`
    Short = 9,
    /// `int`
    Int = 10,
    /// `long`
    Long = 11,
}

impl BasicType {
    /// Decode a basic type byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(BasicType::Object),
            4 => Some(BasicType::Boolean),
            5 => Some(BasicType::Char),
            6 => Some(BasicType::Float),
            7 => Some(BasicType::Double),
            8 => Some(BasicType::Byte),
            9 => Some(BasicType::Short),
            10 => Some(BasicType::Int),
            11 => Some(BasicType::Long),
            _ => None,
        }
    }

    /// Serialized size of one value of this type
    pub fn size(self, id_size: IdSize) -> u32 {
        match self {
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Int | BasicType::Float => 4,
            BasicType::Long | BasicType::Double => 8,
            BasicType::Object => id_size.bytes(),
        }
    }
}

/// Physical representation of a field value in object storage
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// `boolean` (1 byte)
    Boolean,
    /// `byte` (1 byte)
    Byte,
    /// `char` (2 bytes)
    Char,
    /// `short` (2 bytes)
    Short,
    /// `int` (4 bytes)
    Int,
    /// `long` (8 bytes)
    Long,
    /// `float` (4 bytes)
    Float,
    /// `double` (8 bytes)
    Double,
    /// Object reference (word sized or compressed in storage, word sized in the dump)
    Object,
}

impl StorageKind {
    /// Decode a storage signature character from the metadata blob.
    ///
    /// `A` and `[` are written by the image builder for object and array
    /// references and are treated like `L`.
    pub fn from_signature(signature: u8) -> Option<Self> {
        match signature {
            b'Z' => Some(StorageKind::Boolean),
            b'B' => Some(StorageKind::Byte),
            b'C' => Some(StorageKind::Char),
            b'S' => Some(StorageKind::Short),
            b'I' => Some(StorageKind::Int),
            b'J' => Some(StorageKind::Long),
            b'F' => Some(StorageKind::Float),
            b'D' => Some(StorageKind::Double),
            b'L' | b'A' | b'[' => Some(StorageKind::Object),
            _ => None,
        }
    }

    /// Storage signature character written to the metadata blob
    pub fn signature(self) -> u8 {
        match self {
            StorageKind::Boolean => b'Z',
            StorageKind::Byte => b'B',
            StorageKind::Char => b'C',
            StorageKind::Short => b'S',
            StorageKind::Int => b'I',
            StorageKind::Long => b'J',
            StorageKind::Float => b'F',
            StorageKind::Double => b'D',
            StorageKind::Object => b'L',
        }
    }

    /// HPROF type tag for this storage kind
    pub fn basic_type(self) -> BasicType {
        match self {
            StorageKind::Boolean => BasicType::Boolean,
            StorageKind::Byte => BasicType::Byte,
            StorageKind::Char => BasicType::Char,
            StorageKind::Short => BasicType::Short,
            StorageKind::Int => BasicType::Int,
            StorageKind::Long => BasicType::Long,
            StorageKind::Float => BasicType::Float,
            StorageKind::Double => BasicType::Double,
            StorageKind::Object => BasicType::Object,
        }
    }

    /// Serialized size of one value in the dump
    #[inline]
    pub fn dump_size(self, id_size: IdSize) -> u32 {
        self.basic_type().size(id_size)
    }
}

/// Identifier width of a dump, equal to the native word size
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IdSize {
    /// 32-bit targets
    Four,
    /// 64-bit targets
    Eight,
}

impl IdSize {
    /// Identifier size of the running process
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            IdSize::Eight
        } else {
            IdSize::Four
        }
    }

    /// Decode the header's identifier size field
    pub fn from_bytes(size: u32) -> Option<Self> {
        match size {
            4 => Some(IdSize::Four),
            8 => Some(IdSize::Eight),
            _ => None,
        }
    }

    /// Width in bytes
    #[inline]
    pub const fn bytes(self) -> u32 {
        match self {
            IdSize::Four => 4,
            IdSize::Eight => 8,
        }
    }

    /// Width in bytes, as a stream length
    #[inline]
    pub const fn width(self) -> u64 {
        self.bytes() as u64
    }
}

/// Line number field of a `FRAME` record
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceLine {
    /// A known source line
    Known(u32),
    /// No line information
    Unknown,
    /// Frame of compiled code without line information
    Compiled,
    /// Native method
    Native,
}

impl SourceLine {
    /// Encoded line number: `> 0` known, `-1` unknown, `-2` compiled, `-3` native
    pub fn to_hprof(self) -> i32 {
        match self {
            SourceLine::Known(line) => i32::try_from(line).unwrap_or(i32::MAX),
            SourceLine::Unknown => -1,
            SourceLine::Compiled => -2,
            SourceLine::Native => -3,
        }
    }
}
