//! Field metadata index
//!
//! Maps every loaded class (by dense type id) to the layout of its declared
//! fields and caches the serialized size of an instance's field block.
//!
//! The index is built from a blob produced when the image was built (see
//! [`crate::metadata_builder`]):
//!
//! ```text
//! varint  total field count
//! varint  class count
//! varint  field name count
//! varint  max type id
//! class*:
//!   varint  type id
//!   varint  instance field count
//!   varint  static field count
//!   field* (instance fields, then static fields):
//!     u1      storage signature ('Z' 'B' 'C' 'S' 'I' 'J' 'F' 'D' 'L')
//!     varint  field name index
//!     varint  byte offset
//! name*:
//!   varint  length
//!   [u1]*   UTF-8 bytes
//! ```
//!
//! All buffers are allocated once in [`MetadataIndex::build`]; lookups during
//! the dump never allocate.

use crate::format::{IdSize, StorageKind};
use crate::heap::{ClassHandle, HeapEnumerator, LoadedClass, TypeId};
use log::debug;
use thiserror::Error;

/// Sentinel for a dump size that has not been computed yet
const SIZE_NOT_COMPUTED: u32 = u32::MAX;

/// Sentinel for a dump size whose computation is on the stack
const SIZE_IN_PROGRESS: u32 = u32::MAX - 1;

/// Errors raised while building the metadata index
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The blob ended in the middle of a value
    #[error("Unexpected end of field metadata at offset {offset}")]
    UnexpectedEnd {
        /// Offset of the truncated value
        offset: usize,
    },

    /// A varint does not fit the expected width
    #[error("Varint overflow at offset {offset}")]
    VarintOverflow {
        /// Offset of the varint
        offset: usize,
    },

    /// Unknown storage signature
    #[error("Invalid storage kind {tag:#04x} at offset {offset}")]
    InvalidStorageKind {
        /// The tag byte
        tag: u8,
        /// Offset of the tag
        offset: usize,
    },

    /// A class entry names a type id beyond the declared maximum
    #[error("Type id {type_id} exceeds max type id {max}")]
    TypeIdOutOfRange {
        /// Offending type id
        type_id: u64,
        /// Declared maximum
        max: u32,
    },

    /// Two class entries for the same type id
    #[error("Duplicate field metadata for type id {type_id}")]
    DuplicateClass {
        /// Offending type id
        type_id: TypeId,
    },

    /// A field references a name outside the name table
    #[error("Field name index {index} out of range (name count {count})")]
    NameIndexOutOfRange {
        /// Offending index
        index: u64,
        /// Size of the name table
        count: u32,
    },

    /// More fields of one kind than a class dump can describe
    #[error("Type id {type_id} declares {count} fields of one kind")]
    TooManyFields {
        /// Offending type id
        type_id: TypeId,
        /// Declared count
        count: u64,
    },

    /// The class entries do not add up to the declared field count
    #[error("Field count mismatch: header declares {expected}, entries hold {actual}")]
    FieldCountMismatch {
        /// Count from the header
        expected: u32,
        /// Count found in the entries
        actual: u64,
    },

    /// Bytes after the name table
    #[error("{remaining} trailing bytes after field metadata at offset {offset}")]
    TrailingBytes {
        /// Offset of the first trailing byte
        offset: usize,
        /// Number of trailing bytes
        remaining: usize,
    },

    /// A native buffer could not be allocated
    #[error("Cannot allocate {count} entries for {what}")]
    OutOfMemory {
        /// Which table
        what: &'static str,
        /// Requested entries
        count: usize,
    },
}

/// One declared field of a class
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Storage kind, determines the wire type and width
    pub kind: StorageKind,
    /// Index into the field name table
    pub name: u32,
    /// Byte offset in the instance storage, or in the static storage for statics
    pub offset: u32,
}

/// Location of a field name inside the metadata blob
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FieldName {
    start: u32,
    len: u32,
}

/// Contiguous range of the flat field table
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
struct FieldSpan {
    start: u32,
    count: u32,
}

impl FieldSpan {
    fn range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..start + self.count as usize
    }
}

/// Per-class entry of the index
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    handle: Option<ClassHandle>,
    serial: u32,
    instance_fields: FieldSpan,
    static_fields: FieldSpan,
    instance_fields_dump_size: u32,
    has_metadata: bool,
}

impl ClassInfo {
    const EMPTY: ClassInfo = ClassInfo {
        handle: None,
        serial: 0,
        instance_fields: FieldSpan { start: 0, count: 0 },
        static_fields: FieldSpan { start: 0, count: 0 },
        instance_fields_dump_size: SIZE_NOT_COMPUTED,
        has_metadata: false,
    };

    /// Live class identity, attached while building the index
    #[inline]
    pub fn handle(&self) -> Option<&ClassHandle> {
        self.handle.as_ref()
    }

    /// Class serial number (1-based), 0 if the class was not seen
    #[inline]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Number of immediate instance fields
    #[inline]
    pub fn instance_field_count(&self) -> u32 {
        self.instance_fields.count
    }

    /// Number of static fields
    #[inline]
    pub fn static_field_count(&self) -> u32 {
        self.static_fields.count
    }

    /// Whether the class has a live handle and can be dumped
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }
}

/// Field layout index for one dump
pub struct MetadataIndex<'m> {
    blob: &'m [u8],
    id_size: IdSize,
    classes: Vec<ClassInfo>,
    fields: Vec<FieldInfo>,
    names: Vec<FieldName>,
    class_count: u32,
    valid_class_count: u32,
    size_computations: usize,
    built: bool,
}

impl<'m> MetadataIndex<'m> {
    /// Parse the metadata blob and attach the loaded classes of `heap`.
    ///
    /// Serial numbers are assigned in the order `heap` visits its classes.
    pub fn build<H>(blob: &'m [u8], heap: &H) -> Result<Self, MetadataError>
    where
        H: HeapEnumerator + ?Sized,
    {
        let mut reader = BlobReader::new(blob);
        let total_fields = reader.read_u32()?;
        let class_count = reader.read_u32()?;
        let name_count = reader.read_u32()?;
        let max_type_id = reader.read_u32()?;

        let class_slots = max_type_id as usize + 1;
        let mut classes = allocate(class_slots, "class infos")?;
        classes.resize(class_slots, ClassInfo::EMPTY);
        let mut fields: Vec<FieldInfo> = allocate(total_fields as usize, "field infos")?;
        let mut names: Vec<FieldName> = allocate(name_count as usize, "field names")?;

        for _ in 0..class_count {
            let raw_type_id = reader.read_varint()?;
            let type_id = match u32::try_from(raw_type_id) {
                Ok(id) if id <= max_type_id => id,
                _ => {
                    return Err(MetadataError::TypeIdOutOfRange {
                        type_id: raw_type_id,
                        max: max_type_id,
                    })
                }
            };
            let instance_count = reader.read_varint()?;
            let static_count = reader.read_varint()?;
            for count in [instance_count, static_count] {
                if count > u16::MAX as u64 {
                    return Err(MetadataError::TooManyFields { type_id, count });
                }
            }

            let info = &mut classes[type_id as usize];
            if info.has_metadata {
                return Err(MetadataError::DuplicateClass { type_id });
            }
            info.has_metadata = true;

            let declared = fields.len() as u64 + instance_count + static_count;
            if declared > total_fields as u64 {
                return Err(MetadataError::FieldCountMismatch {
                    expected: total_fields,
                    actual: declared,
                });
            }

            info.instance_fields = FieldSpan {
                start: fields.len() as u32,
                count: instance_count as u32,
            };
            for _ in 0..instance_count {
                fields.push(reader.read_field(name_count)?);
            }
            info.static_fields = FieldSpan {
                start: fields.len() as u32,
                count: static_count as u32,
            };
            for _ in 0..static_count {
                fields.push(reader.read_field(name_count)?);
            }
        }

        if fields.len() != total_fields as usize {
            return Err(MetadataError::FieldCountMismatch {
                expected: total_fields,
                actual: fields.len() as u64,
            });
        }

        for _ in 0..name_count {
            let len = reader.read_u32()?;
            let start = reader.position();
            reader.skip(len as usize)?;
            names.push(FieldName {
                start: start as u32,
                len,
            });
        }

        if reader.remaining() > 0 {
            return Err(MetadataError::TrailingBytes {
                offset: reader.position(),
                remaining: reader.remaining(),
            });
        }

        let mut index = Self {
            blob,
            id_size: heap.object_layout().word_size,
            classes,
            fields,
            names,
            class_count,
            valid_class_count: 0,
            size_computations: 0,
            built: true,
        };
        index.attach_classes(heap);

        for type_id in 0..index.classes.len() as TypeId {
            if index.is_valid(type_id) {
                index.instance_fields_dump_size(type_id);
            }
        }

        debug!(
            "heap dump metadata: {} classes ({} live), {} fields, {} names",
            index.class_count,
            index.valid_class_count,
            index.fields.len(),
            index.names.len()
        );
        Ok(index)
    }

    fn attach_classes<H>(&mut self, heap: &H)
    where
        H: HeapEnumerator + ?Sized,
    {
        let classes = &mut self.classes;
        let mut serial = 0u32;
        heap.for_each_loaded_class(&mut |class: &LoadedClass<'_>| {
            match classes.get_mut(class.type_id as usize) {
                Some(info) if info.handle.is_none() => {
                    serial += 1;
                    info.handle = Some(class.handle);
                    info.serial = serial;
                }
                Some(_) => {}
                None => debug!(
                    "heap dump: type id {} has no field metadata slot, class not dumped",
                    class.type_id
                ),
            }
        });
        self.valid_class_count = serial;
    }

    /// Serialized size of the instance field block of `type_id`: its own
    /// instance fields plus those of every ancestor.
    ///
    /// Memoized; each class is computed at most once per build.
    pub fn instance_fields_dump_size(&mut self, type_id: TypeId) -> u32 {
        let Some(info) = self.classes.get(type_id as usize).copied() else {
            return 0;
        };
        match info.instance_fields_dump_size {
            SIZE_NOT_COMPUTED => {}
            SIZE_IN_PROGRESS => {
                debug_assert!(false, "superclass cycle through type id {type_id}");
                return 0;
            }
            size => return size,
        }

        self.size_computations += 1;
        self.classes[type_id as usize].instance_fields_dump_size = SIZE_IN_PROGRESS;

        let own: u32 = self.fields[info.instance_fields.range()]
            .iter()
            .map(|field| field.kind.dump_size(self.id_size))
            .sum();
        let inherited = match info.handle.and_then(|handle| handle.super_type) {
            Some(super_type) => self.instance_fields_dump_size(super_type),
            None => 0,
        };

        let total = own.saturating_add(inherited);
        self.classes[type_id as usize].instance_fields_dump_size = total;
        total
    }

    /// Memoized field block size, `None` if it was never computed
    pub fn cached_instance_fields_dump_size(&self, type_id: TypeId) -> Option<u32> {
        match self.classes.get(type_id as usize)?.instance_fields_dump_size {
            SIZE_NOT_COMPUTED | SIZE_IN_PROGRESS => None,
            size => Some(size),
        }
    }

    /// Number of field block sizes computed so far
    pub fn size_computations(&self) -> usize {
        self.size_computations
    }

    /// Entry for `type_id`
    #[inline]
    pub fn class_info(&self, type_id: TypeId) -> Option<&ClassInfo> {
        self.classes.get(type_id as usize)
    }

    /// Whether `type_id` has a live class handle
    #[inline]
    pub fn is_valid(&self, type_id: TypeId) -> bool {
        self.class_info(type_id).is_some_and(ClassInfo::is_valid)
    }

    /// Serial number of `type_id`, 0 if unknown
    #[inline]
    pub fn serial_number(&self, type_id: TypeId) -> u32 {
        self.class_info(type_id).map_or(0, ClassInfo::serial)
    }

    /// Class handle of `type_id`
    #[inline]
    pub fn handle(&self, type_id: TypeId) -> Option<&ClassHandle> {
        self.class_info(type_id).and_then(ClassInfo::handle)
    }

    /// Immediate instance fields of `type_id`, in declaration order
    pub fn instance_fields(&self, type_id: TypeId) -> &[FieldInfo] {
        match self.class_info(type_id) {
            Some(info) => &self.fields[info.instance_fields.range()],
            None => &[],
        }
    }

    /// Static fields of `type_id`, in declaration order
    pub fn static_fields(&self, type_id: TypeId) -> &[FieldInfo] {
        match self.class_info(type_id) {
            Some(info) => &self.fields[info.static_fields.range()],
            None => &[],
        }
    }

    /// `type_id` followed by its ancestors, most derived first
    pub fn superclass_chain(&self, type_id: TypeId) -> SuperclassChain<'_, 'm> {
        SuperclassChain {
            index: self,
            next: self.class_info(type_id).map(|_| type_id),
            remaining: self.classes.len(),
        }
    }

    /// UTF-8 bytes of a field name
    pub fn field_name(&self, index: u32) -> &'m [u8] {
        match self.names.get(index as usize) {
            Some(name) => {
                let start = name.start as usize;
                &self.blob[start..start + name.len as usize]
            }
            None => &[],
        }
    }

    /// Number of distinct field names
    #[inline]
    pub fn field_name_count(&self) -> u32 {
        self.names.len() as u32
    }

    /// Number of class entries in the blob
    #[inline]
    pub fn class_count(&self) -> u32 {
        self.class_count
    }

    /// Number of classes with a live handle
    #[inline]
    pub fn valid_class_count(&self) -> u32 {
        self.valid_class_count
    }

    /// Number of type id slots (`max type id + 1`)
    #[inline]
    pub fn type_id_slots(&self) -> u32 {
        self.classes.len() as u32
    }

    /// Total number of declared fields
    #[inline]
    pub fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    /// Identifier size the dump sizes were computed for
    #[inline]
    pub fn id_size(&self) -> IdSize {
        self.id_size
    }

    /// Whether the index holds built tables
    #[inline]
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Release the tables and reset all counts.
    ///
    /// # Panics
    ///
    /// Panics if the index was already freed.
    pub fn free(&mut self) {
        assert!(self.built, "heap dump metadata index freed twice");
        self.classes = Vec::new();
        self.fields = Vec::new();
        self.names = Vec::new();
        self.blob = &[];
        self.class_count = 0;
        self.valid_class_count = 0;
        self.size_computations = 0;
        self.built = false;
    }
}

/// Iterator over a class and its ancestors
pub struct SuperclassChain<'i, 'm> {
    index: &'i MetadataIndex<'m>,
    next: Option<TypeId>,
    remaining: usize,
}

impl Iterator for SuperclassChain<'_, '_> {
    type Item = TypeId;

    fn next(&mut self) -> Option<TypeId> {
        let current = self.next?;
        if self.remaining == 0 {
            self.next = None;
            return None;
        }
        self.remaining -= 1;
        self.next = self
            .index
            .handle(current)
            .and_then(|handle| handle.super_type)
            .filter(|super_type| self.index.class_info(*super_type).is_some());
        Some(current)
    }
}

fn allocate<T>(count: usize, what: &'static str) -> Result<Vec<T>, MetadataError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(count)
        .map_err(|_| MetadataError::OutOfMemory { what, count })?;
    Ok(buffer)
}

/// Cursor over the metadata blob
struct BlobReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn read_u8(&mut self) -> Result<u8, MetadataError> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or(MetadataError::UnexpectedEnd {
                offset: self.position,
            })?;
        self.position += 1;
        Ok(byte)
    }

    /// Unsigned LEB128
    fn read_varint(&mut self) -> Result<u64, MetadataError> {
        let start = self.position;
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(MetadataError::VarintOverflow { offset: start });
            }
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(MetadataError::VarintOverflow { offset: start });
            }
        }
    }

    fn read_u32(&mut self) -> Result<u32, MetadataError> {
        let start = self.position;
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| MetadataError::VarintOverflow { offset: start })
    }

    fn skip(&mut self, len: usize) -> Result<(), MetadataError> {
        if len > self.remaining() {
            return Err(MetadataError::UnexpectedEnd {
                offset: self.position,
            });
        }
        self.position += len;
        Ok(())
    }

    fn read_field(&mut self, name_count: u32) -> Result<FieldInfo, MetadataError> {
        let tag_offset = self.position;
        let tag = self.read_u8()?;
        let kind = StorageKind::from_signature(tag).ok_or(MetadataError::InvalidStorageKind {
            tag,
            offset: tag_offset,
        })?;
        let name = self.read_varint()?;
        if name >= name_count as u64 {
            return Err(MetadataError::NameIndexOutOfRange {
                index: name,
                count: name_count,
            });
        }
        let offset = self.read_u32()?;
        Ok(FieldInfo {
            kind,
            name: name as u32,
            offset,
        })
    }
}
