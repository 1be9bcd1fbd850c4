//! Heap enumeration contract
//!
//! The heap dump writer never walks memory on its own. The embedding VM
//! implements [`HeapEnumerator`] (and [`HeapDumpSupport`] for the dump entry
//! points) and hands out borrowed views of its objects, classes, threads and
//! roots through stack closures.
//!
//! Every enumeration runs while all mutator threads are stopped. Callbacks
//! must not allocate and must not trigger a collection; the views they
//! receive are only valid for the duration of the call.

use crate::format::{IdSize, SourceLine, StorageKind};

/// Dense type identifier of a class, used to index the metadata tables
pub type TypeId = u32;

/// Identity of a heap object (its address). `0` is the null reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The null reference
    pub const NULL: ObjectId = ObjectId(0);

    /// Check if this is the null reference
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw address value
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Opaque thread handle, passed back to the per-thread enumerations
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// Object layout parameters of the running VM
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    /// Native word size, also the identifier size of the dump
    pub word_size: IdSize,
    /// References in object storage are 32-bit compressed values
    pub compressed_references: bool,
    /// Shift applied when decompressing a reference
    pub compression_shift: u32,
    /// Base address added when decompressing a non-null reference
    pub heap_base: u64,
}

impl ObjectLayout {
    /// Uncompressed references, native word size
    pub const fn native() -> Self {
        Self {
            word_size: IdSize::native(),
            compressed_references: false,
            compression_shift: 0,
            heap_base: 0,
        }
    }

    /// Width of a reference slot in object storage
    #[inline]
    pub fn reference_size(&self) -> usize {
        if self.compressed_references {
            4
        } else {
            self.word_size.bytes() as usize
        }
    }

    /// Turn a raw reference slot value into an object id
    #[inline]
    pub fn decode_reference(&self, raw: u64, compressed: bool) -> ObjectId {
        if raw == 0 {
            ObjectId::NULL
        } else if compressed {
            ObjectId(self.heap_base.wrapping_add(raw << self.compression_shift))
        } else {
            ObjectId(raw)
        }
    }

    /// Read the reference stored at `offset` of a native-order storage slice.
    ///
    /// Out-of-range reads yield the null reference.
    pub fn read_reference(&self, storage: &[u8], offset: usize) -> ObjectId {
        let width = self.reference_size();
        let Some(bytes) = offset
            .checked_add(width)
            .and_then(|end| storage.get(offset..end))
        else {
            debug_assert!(false, "reference slot {offset} outside storage of {} bytes", storage.len());
            return ObjectId::NULL;
        };
        let raw = match width {
            4 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
            _ => u64::from_ne_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        };
        self.decode_reference(raw, self.compressed_references)
    }
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self::native()
    }
}

/// Heap partitions visited by the dump
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeapPartition {
    /// Objects that existed before startup (the image heap); never collected
    ImageHeap,
    /// Objects allocated at run time
    CollectedHeap,
}

/// Live identity of a loaded class
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClassHandle {
    /// The class object
    pub object: ObjectId,
    /// Type id of the superclass, `None` for the root class and interfaces
    pub super_type: Option<TypeId>,
    /// Class loader object, null for the boot loader
    pub class_loader: ObjectId,
    /// Size of an instance in the heap, in bytes (0 for array classes)
    pub instance_size: u32,
    /// Array classes have no fields and a variable instance size
    pub is_array: bool,
}

/// A loaded class, as produced by [`HeapEnumerator::for_each_loaded_class`]
#[derive(Debug, Copy, Clone)]
pub struct LoadedClass<'a> {
    /// Dense type id
    pub type_id: TypeId,
    /// Binary name of the class
    pub name: &'a [u8],
    /// Live class identity
    pub handle: ClassHandle,
}

/// Object categories, decided once per object from its type layout
#[derive(Debug, Copy, Clone)]
pub enum ObjectKind<'a> {
    /// A normal object; `storage` holds its fields in native byte order
    Instance {
        /// Raw object storage, field offsets index into it
        storage: &'a [u8],
    },
    /// An object with fixed fields followed by an inline array tail
    Hybrid {
        /// Raw object storage including the array tail
        storage: &'a [u8],
    },
    /// An array of references
    ObjectArray {
        /// Number of elements
        length: u64,
        /// Packed reference slots, each [`ObjectLayout::reference_size`] wide
        elements: &'a [u8],
    },
    /// An array of primitives
    PrimitiveArray {
        /// Element kind (never [`StorageKind::Object`])
        element: StorageKind,
        /// Number of elements
        length: u64,
        /// Packed elements in native byte order
        elements: &'a [u8],
    },
    /// A class object; covered by the class dump
    Class {
        /// The type this class object describes
        described: TypeId,
    },
}

/// One live heap object
#[derive(Debug, Copy, Clone)]
pub struct HeapObject<'a> {
    /// Object identity
    pub id: ObjectId,
    /// Type id of the object's class
    pub type_id: TypeId,
    /// Layout category and storage
    pub kind: ObjectKind<'a>,
}

/// A thread whose stack is part of the dump
#[derive(Debug, Copy, Clone)]
pub struct ThreadInfo {
    /// Handle for the per-thread enumerations
    pub id: ThreadId,
    /// The thread object, null for threads without one
    pub thread_object: ObjectId,
}

/// One stack frame, innermost first
#[derive(Debug, Copy, Clone)]
pub struct FrameInfo<'a> {
    /// Class declaring the executing method
    pub class: TypeId,
    /// Method name
    pub method_name: &'a [u8],
    /// Source file name, if known
    pub source_file: Option<&'a [u8]>,
    /// Line information
    pub line: SourceLine,
}

/// A reference slot found on a thread stack
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// Slot contents
    pub value: u64,
    /// Slot holds a compressed reference
    pub compressed: bool,
}

/// Static field storage, indexed by the static field offsets of the metadata
#[derive(Debug, Copy, Clone, Default)]
pub struct StaticFields<'a> {
    /// Primitive statics, native byte order
    pub primitives: &'a [u8],
    /// Reference statics
    pub objects: &'a [u8],
}

/// Enumeration source consumed by the dump
///
/// Every enumeration must visit its elements in the same order each time it
/// is called during one dump.
pub trait HeapEnumerator {
    /// Object layout of the heap
    fn object_layout(&self) -> ObjectLayout;

    /// Visit every loaded class
    fn for_each_loaded_class(&self, visitor: &mut dyn FnMut(&LoadedClass<'_>));

    /// Visit every live object of one partition
    fn for_each_heap_object(
        &self,
        partition: HeapPartition,
        visitor: &mut dyn FnMut(&HeapObject<'_>),
    );

    /// Visit every thread, excluding the one performing the dump
    fn for_each_thread(&self, visitor: &mut dyn FnMut(&ThreadInfo));

    /// Visit the frames of a thread, innermost first
    fn for_each_frame(&self, thread: ThreadId, visitor: &mut dyn FnMut(&FrameInfo<'_>));

    /// Visit the reference slots on a thread's stack
    fn for_each_on_stack_reference(&self, thread: ThreadId, visitor: &mut dyn FnMut(RawReference));

    /// Visit references held by deoptimized frames of a thread
    fn for_each_deoptimized_reference(
        &self,
        _thread: ThreadId,
        _visitor: &mut dyn FnMut(ObjectId),
    ) {
    }

    /// Visit the thread-local roots of a thread
    fn for_each_thread_local_root(&self, thread: ThreadId, visitor: &mut dyn FnMut(ObjectId));

    /// Visit roots held by compiled-code metadata
    fn for_each_code_metadata_root(&self, visitor: &mut dyn FnMut(ObjectId));

    /// Static field storage
    fn static_fields(&self) -> StaticFields<'_>;
}

/// Dump environment provided by the VM on top of the enumerations
pub trait HeapDumpSupport: HeapEnumerator {
    /// Field metadata blob produced at build time
    fn field_metadata(&self) -> &[u8];

    /// Bytes currently in use by the heap, used to pick the dump format
    fn used_heap_bytes(&self) -> u64;

    /// Run a full collection
    fn collect_garbage(&self);

    /// Run `operation` with every other mutator thread stopped.
    ///
    /// The default runs it directly, for hosts that are already halted.
    fn stop_the_world(&self, operation: &mut dyn FnMut()) {
        operation();
    }
}
