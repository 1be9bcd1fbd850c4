//! Shared heap fixtures for the integration tests
//!
//! [`TestHeap`] is an in-memory heap that implements the enumeration
//! contract over plain vectors. [`sample_heap`] builds the standard fixture:
//!
//! - `java.lang.Object` <- `A` <- `B` <- `C` <- `D`, fields of every kind
//! - statics on `A`
//! - one array class per primitive type plus `[Ljava.lang.Object;`
//! - a loaded class without field metadata (`Empty`)
//! - two threads with frames and roots, code-metadata roots
//! - class objects and an object of an unknown type, both skipped by the dump

#![allow(dead_code)]

use raya_heapdump::{
    ClassHandle, FieldDecl, FieldMetadataBuilder, FrameInfo, HeapDumpSupport, HeapEnumerator,
    HeapObject, HeapPartition, IdSize, LoadedClass, ObjectId, ObjectKind, ObjectLayout,
    RawReference, SourceLine, StaticFields, StorageKind, ThreadId, ThreadInfo, TypeId,
};
use std::cell::Cell;

// ===== Fixture heap =====

/// A loaded class
pub struct TestClass {
    pub type_id: TypeId,
    pub name: String,
    pub handle: ClassHandle,
}

/// Object storage, owned
pub enum TestObjectKind {
    Instance(Vec<u8>),
    Hybrid(Vec<u8>),
    ObjectArray { length: u64, elements: Vec<u8> },
    PrimitiveArray { element: StorageKind, length: u64, elements: Vec<u8> },
    Class(TypeId),
}

/// A heap object
pub struct TestObject {
    pub id: ObjectId,
    pub type_id: TypeId,
    pub partition: HeapPartition,
    pub kind: TestObjectKind,
}

/// A stack frame
pub struct TestFrame {
    pub class: TypeId,
    pub method: String,
    pub source: Option<String>,
    pub line: SourceLine,
}

/// A thread with its stack and roots
pub struct TestThread {
    pub info: ThreadInfo,
    pub frames: Vec<TestFrame>,
    pub stack_references: Vec<RawReference>,
    pub deoptimized_references: Vec<ObjectId>,
    pub thread_local_roots: Vec<ObjectId>,
}

/// In-memory heap
pub struct TestHeap {
    pub layout: ObjectLayout,
    pub classes: Vec<TestClass>,
    pub objects: Vec<TestObject>,
    pub threads: Vec<TestThread>,
    pub code_roots: Vec<ObjectId>,
    pub static_primitives: Vec<u8>,
    pub static_objects: Vec<u8>,
    pub metadata: Vec<u8>,
    pub used_heap_bytes: u64,
    pub gc_runs: Cell<u32>,
    pub safepoints: Cell<u32>,
}

impl TestHeap {
    pub fn new(layout: ObjectLayout) -> Self {
        Self {
            layout,
            classes: Vec::new(),
            objects: Vec::new(),
            threads: Vec::new(),
            code_roots: Vec::new(),
            static_primitives: Vec::new(),
            static_objects: Vec::new(),
            metadata: FieldMetadataBuilder::new().encode(),
            used_heap_bytes: 64 * 1024,
            gc_runs: Cell::new(0),
            safepoints: Cell::new(0),
        }
    }

    /// Object id of the `n`th slot of the heap
    pub fn object_id(&self, n: u64) -> ObjectId {
        ObjectId(self.layout.heap_base + 0x100 * n)
    }

    /// Object id of the class object of `type_id`
    pub fn class_id(&self, type_id: TypeId) -> ObjectId {
        self.object_id(0x1000 + type_id as u64)
    }

    pub fn add_class(
        &mut self,
        type_id: TypeId,
        name: &str,
        super_type: Option<TypeId>,
        instance_size: u32,
        is_array: bool,
    ) {
        let handle = ClassHandle {
            object: self.class_id(type_id),
            super_type,
            class_loader: ObjectId::NULL,
            instance_size,
            is_array,
        };
        self.classes.push(TestClass {
            type_id,
            name: name.to_string(),
            handle,
        });
        self.objects.push(TestObject {
            id: handle.object,
            type_id: CLASS_TYPE,
            partition: HeapPartition::ImageHeap,
            kind: TestObjectKind::Class(type_id),
        });
    }

    pub fn add_object(
        &mut self,
        id: ObjectId,
        type_id: TypeId,
        partition: HeapPartition,
        kind: TestObjectKind,
    ) {
        self.objects.push(TestObject {
            id,
            type_id,
            partition,
            kind,
        });
    }

    /// Store a reference slot the way the VM would
    pub fn encode_reference(&self, object: ObjectId) -> u64 {
        if object.is_null() || !self.layout.compressed_references {
            object.as_u64()
        } else {
            (object.as_u64() - self.layout.heap_base) >> self.layout.compression_shift
        }
    }

    pub fn put_reference(&self, storage: &mut [u8], offset: usize, object: ObjectId) {
        let raw = self.encode_reference(object);
        match self.layout.reference_size() {
            4 => storage[offset..offset + 4].copy_from_slice(&(raw as u32).to_ne_bytes()),
            _ => storage[offset..offset + 8].copy_from_slice(&raw.to_ne_bytes()),
        }
    }

    /// Packed reference slots
    pub fn reference_array(&self, objects: &[ObjectId]) -> Vec<u8> {
        let width = self.layout.reference_size();
        let mut elements = vec![0u8; objects.len() * width];
        for (i, object) in objects.iter().enumerate() {
            self.put_reference(&mut elements, i * width, *object);
        }
        elements
    }

    /// Stack slot holding `object`
    pub fn stack_reference(&self, object: ObjectId) -> RawReference {
        RawReference {
            value: self.encode_reference(object),
            compressed: self.layout.compressed_references,
        }
    }

    pub fn id_size(&self) -> IdSize {
        self.layout.word_size
    }

    pub fn object(&self, id: ObjectId) -> Option<&TestObject> {
        self.objects.iter().find(|object| object.id == id)
    }
}

impl HeapEnumerator for TestHeap {
    fn object_layout(&self) -> ObjectLayout {
        self.layout
    }

    fn for_each_loaded_class(&self, visitor: &mut dyn FnMut(&LoadedClass<'_>)) {
        for class in &self.classes {
            visitor(&LoadedClass {
                type_id: class.type_id,
                name: class.name.as_bytes(),
                handle: class.handle,
            });
        }
    }

    fn for_each_heap_object(
        &self,
        partition: HeapPartition,
        visitor: &mut dyn FnMut(&HeapObject<'_>),
    ) {
        for object in self.objects.iter().filter(|object| object.partition == partition) {
            let kind = match &object.kind {
                TestObjectKind::Instance(storage) => ObjectKind::Instance { storage },
                TestObjectKind::Hybrid(storage) => ObjectKind::Hybrid { storage },
                TestObjectKind::ObjectArray { length, elements } => ObjectKind::ObjectArray {
                    length: *length,
                    elements,
                },
                TestObjectKind::PrimitiveArray {
                    element,
                    length,
                    elements,
                } => ObjectKind::PrimitiveArray {
                    element: *element,
                    length: *length,
                    elements,
                },
                TestObjectKind::Class(described) => ObjectKind::Class {
                    described: *described,
                },
            };
            visitor(&HeapObject {
                id: object.id,
                type_id: object.type_id,
                kind,
            });
        }
    }

    fn for_each_thread(&self, visitor: &mut dyn FnMut(&ThreadInfo)) {
        for thread in &self.threads {
            visitor(&thread.info);
        }
    }

    fn for_each_frame(&self, thread: ThreadId, visitor: &mut dyn FnMut(&FrameInfo<'_>)) {
        for frame in self.thread(thread).map_or(&[][..], |t| t.frames.as_slice()) {
            visitor(&FrameInfo {
                class: frame.class,
                method_name: frame.method.as_bytes(),
                source_file: frame.source.as_deref().map(str::as_bytes),
                line: frame.line,
            });
        }
    }

    fn for_each_on_stack_reference(&self, thread: ThreadId, visitor: &mut dyn FnMut(RawReference)) {
        for slot in self.thread(thread).map_or(&[][..], |t| t.stack_references.as_slice()) {
            visitor(*slot);
        }
    }

    fn for_each_deoptimized_reference(&self, thread: ThreadId, visitor: &mut dyn FnMut(ObjectId)) {
        for object in self.thread(thread).map_or(&[][..], |t| t.deoptimized_references.as_slice()) {
            visitor(*object);
        }
    }

    fn for_each_thread_local_root(&self, thread: ThreadId, visitor: &mut dyn FnMut(ObjectId)) {
        for object in self.thread(thread).map_or(&[][..], |t| t.thread_local_roots.as_slice()) {
            visitor(*object);
        }
    }

    fn for_each_code_metadata_root(&self, visitor: &mut dyn FnMut(ObjectId)) {
        for object in &self.code_roots {
            visitor(*object);
        }
    }

    fn static_fields(&self) -> StaticFields<'_> {
        StaticFields {
            primitives: &self.static_primitives,
            objects: &self.static_objects,
        }
    }
}

impl TestHeap {
    fn thread(&self, id: ThreadId) -> Option<&TestThread> {
        self.threads.iter().find(|thread| thread.info.id == id)
    }
}

impl HeapDumpSupport for TestHeap {
    fn field_metadata(&self) -> &[u8] {
        &self.metadata
    }

    fn used_heap_bytes(&self) -> u64 {
        self.used_heap_bytes
    }

    fn collect_garbage(&self) {
        self.gc_runs.set(self.gc_runs.get() + 1);
    }

    fn stop_the_world(&self, operation: &mut dyn FnMut()) {
        self.safepoints.set(self.safepoints.get() + 1);
        operation();
    }
}

// ===== Layouts =====

/// 8-byte ids, uncompressed references
pub fn wide_layout() -> ObjectLayout {
    ObjectLayout {
        word_size: IdSize::Eight,
        compressed_references: false,
        compression_shift: 0,
        heap_base: 0x7f00_0000_0000,
    }
}

/// 8-byte ids, 32-bit compressed references
pub fn compressed_layout() -> ObjectLayout {
    ObjectLayout {
        word_size: IdSize::Eight,
        compressed_references: true,
        compression_shift: 3,
        heap_base: 0x8_0000_0000,
    }
}

/// 4-byte ids
pub fn narrow_layout() -> ObjectLayout {
    ObjectLayout {
        word_size: IdSize::Four,
        compressed_references: false,
        compression_shift: 0,
        heap_base: 0x1000_0000,
    }
}

// ===== Sample heap =====

pub const OBJECT_TYPE: TypeId = 0;
pub const A_TYPE: TypeId = 1;
pub const B_TYPE: TypeId = 2;
pub const C_TYPE: TypeId = 3;
pub const D_TYPE: TypeId = 4;
pub const BOOLEAN_ARRAY_TYPE: TypeId = 5;
pub const BYTE_ARRAY_TYPE: TypeId = 6;
pub const CHAR_ARRAY_TYPE: TypeId = 7;
pub const SHORT_ARRAY_TYPE: TypeId = 8;
pub const INT_ARRAY_TYPE: TypeId = 9;
pub const LONG_ARRAY_TYPE: TypeId = 10;
pub const FLOAT_ARRAY_TYPE: TypeId = 11;
pub const DOUBLE_ARRAY_TYPE: TypeId = 12;
pub const OBJECT_ARRAY_TYPE: TypeId = 13;
pub const EMPTY_TYPE: TypeId = 14;
/// Type of class objects; deliberately absent from the metadata
pub const CLASS_TYPE: TypeId = 15;
/// Type id without metadata slot
pub const UNKNOWN_TYPE: TypeId = 99;

/// Number of classes the sample heap dumps
pub const SAMPLE_CLASS_COUNT: u32 = 15;

/// Instance sizes
pub const A_SIZE: u32 = 48;
pub const B_SIZE: u32 = 56;
pub const C_SIZE: u32 = 72;
pub const D_SIZE: u32 = 80;

/// Instance field names per class, declaration order
pub const A_FIELDS: [&str; 8] = [
    "a_flag", "a_byte", "a_char", "a_short", "a_int", "a_long", "a_float", "a_double",
];
pub const B_FIELDS: [&str; 1] = ["b_ref"];
pub const C_FIELDS: [&str; 2] = ["c_int", "c_ref"];
pub const D_FIELDS: [&str; 1] = ["d_long"];

/// Object slots of the sample heap
pub const IMAGE_A: u64 = 1;
pub const IMAGE_BYTES: u64 = 2;
pub const A_OBJ: u64 = 10;
pub const B_OBJ: u64 = 11;
pub const C_OBJ: u64 = 12;
pub const D_OBJ: u64 = 13;
pub const HYBRID_OBJ: u64 = 14;
pub const OBJECT_ARRAY_OBJ: u64 = 15;
pub const UNKNOWN_OBJ: u64 = 16;
pub const EMPTY_OBJ: u64 = 17;
/// First primitive array slot; one per primitive kind in [`PRIMITIVE_ARRAYS`] order
pub const PRIMITIVE_ARRAY_BASE: u64 = 20;
pub const THREAD_ONE_OBJ: u64 = 30;
pub const CODE_ROOT_OBJ: u64 = 31;

/// Primitive array kinds and their array classes
pub const PRIMITIVE_ARRAYS: [(StorageKind, TypeId); 8] = [
    (StorageKind::Boolean, BOOLEAN_ARRAY_TYPE),
    (StorageKind::Byte, BYTE_ARRAY_TYPE),
    (StorageKind::Char, CHAR_ARRAY_TYPE),
    (StorageKind::Short, SHORT_ARRAY_TYPE),
    (StorageKind::Int, INT_ARRAY_TYPE),
    (StorageKind::Long, LONG_ARRAY_TYPE),
    (StorageKind::Float, FLOAT_ARRAY_TYPE),
    (StorageKind::Double, DOUBLE_ARRAY_TYPE),
];

/// Field metadata of the sample hierarchy
pub fn sample_metadata() -> Vec<u8> {
    let mut builder = FieldMetadataBuilder::new();
    builder
        .add_class(
            A_TYPE,
            vec![
                FieldDecl::new("a_flag", StorageKind::Boolean, 8),
                FieldDecl::new("a_byte", StorageKind::Byte, 9),
                FieldDecl::new("a_char", StorageKind::Char, 10),
                FieldDecl::new("a_short", StorageKind::Short, 12),
                FieldDecl::new("a_int", StorageKind::Int, 16),
                FieldDecl::new("a_long", StorageKind::Long, 24),
                FieldDecl::new("a_float", StorageKind::Float, 32),
                FieldDecl::new("a_double", StorageKind::Double, 40),
            ],
            vec![
                FieldDecl::new("s_count", StorageKind::Int, 0),
                FieldDecl::new("s_instance", StorageKind::Object, 0),
                FieldDecl::new("s_ratio", StorageKind::Double, 8),
            ],
        )
        .add_class(B_TYPE, vec![FieldDecl::new("b_ref", StorageKind::Object, 48)], vec![])
        .add_class(
            C_TYPE,
            vec![
                FieldDecl::new("c_int", StorageKind::Int, 56),
                FieldDecl::new("c_ref", StorageKind::Object, 64),
            ],
            vec![],
        )
        .add_class(D_TYPE, vec![FieldDecl::new("d_long", StorageKind::Long, 72)], vec![])
        .reserve_type_id(EMPTY_TYPE);
    builder.encode()
}

/// Instance storage with the `A` fields set from `seed`
pub fn a_storage(size: u32, seed: u8) -> Vec<u8> {
    let mut storage = vec![0u8; size as usize];
    storage[8] = 1;
    storage[9] = seed;
    storage[10..12].copy_from_slice(&(0x4100u16 + seed as u16).to_ne_bytes());
    storage[12..14].copy_from_slice(&(-(seed as i16)).to_ne_bytes());
    storage[16..20].copy_from_slice(&(1000 + seed as i32).to_ne_bytes());
    storage[24..32].copy_from_slice(&(0x0102_0304_0506_0700 + seed as i64).to_ne_bytes());
    storage[32..36].copy_from_slice(&(1.5f32 + seed as f32).to_ne_bytes());
    storage[40..48].copy_from_slice(&(-2.25f64 * seed as f64).to_ne_bytes());
    storage
}

/// Elements of the sample primitive array of `kind`, native order
pub fn primitive_elements(kind: StorageKind) -> (u64, Vec<u8>) {
    let mut elements = Vec::new();
    let length = 5u64;
    for i in 0..length {
        match kind {
            StorageKind::Boolean => elements.push((i % 2) as u8),
            StorageKind::Byte => elements.push(0xF0 + i as u8),
            StorageKind::Char => elements.extend_from_slice(&(0x61u16 + i as u16).to_ne_bytes()),
            StorageKind::Short => elements.extend_from_slice(&(-300i16 + i as i16).to_ne_bytes()),
            StorageKind::Int => elements.extend_from_slice(&(0x0102_0304i32 * i as i32).to_ne_bytes()),
            StorageKind::Long => {
                elements.extend_from_slice(&(0x0102_0304_0506_0708i64 + i as i64).to_ne_bytes())
            }
            StorageKind::Float => elements.extend_from_slice(&(0.5f32 * i as f32).to_ne_bytes()),
            StorageKind::Double => elements.extend_from_slice(&(1e10f64 * i as f64).to_ne_bytes()),
            StorageKind::Object => unreachable!("not a primitive array"),
        }
    }
    (length, elements)
}

/// Convert native-order elements of `width` bytes to big-endian
pub fn to_big_endian(native: &[u8], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(native.len());
    for chunk in native.chunks(width) {
        if cfg!(target_endian = "big") {
            out.extend_from_slice(chunk);
        } else {
            out.extend(chunk.iter().rev());
        }
    }
    out
}

/// The standard fixture
pub fn sample_heap(layout: ObjectLayout) -> TestHeap {
    let mut heap = TestHeap::new(layout);
    heap.metadata = sample_metadata();

    heap.add_class(OBJECT_TYPE, "java.lang.Object", None, 8, false);
    heap.add_class(A_TYPE, "A", Some(OBJECT_TYPE), A_SIZE, false);
    heap.add_class(B_TYPE, "B", Some(A_TYPE), B_SIZE, false);
    heap.add_class(C_TYPE, "C", Some(B_TYPE), C_SIZE, false);
    heap.add_class(D_TYPE, "D", Some(C_TYPE), D_SIZE, false);
    heap.add_class(BOOLEAN_ARRAY_TYPE, "[Z", Some(OBJECT_TYPE), 0, true);
    heap.add_class(BYTE_ARRAY_TYPE, "[B", Some(OBJECT_TYPE), 0, true);
    heap.add_class(CHAR_ARRAY_TYPE, "[C", Some(OBJECT_TYPE), 0, true);
    heap.add_class(SHORT_ARRAY_TYPE, "[S", Some(OBJECT_TYPE), 0, true);
    heap.add_class(INT_ARRAY_TYPE, "[I", Some(OBJECT_TYPE), 0, true);
    heap.add_class(LONG_ARRAY_TYPE, "[J", Some(OBJECT_TYPE), 0, true);
    heap.add_class(FLOAT_ARRAY_TYPE, "[F", Some(OBJECT_TYPE), 0, true);
    heap.add_class(DOUBLE_ARRAY_TYPE, "[D", Some(OBJECT_TYPE), 0, true);
    heap.add_class(OBJECT_ARRAY_TYPE, "[Ljava.lang.Object;", Some(OBJECT_TYPE), 0, true);
    heap.add_class(EMPTY_TYPE, "Empty", Some(OBJECT_TYPE), 16, false);

    // statics of A: s_count = 7, s_ratio = 0.25, s_instance = the image A
    let mut primitives = vec![0u8; 16];
    primitives[0..4].copy_from_slice(&7i32.to_ne_bytes());
    primitives[8..16].copy_from_slice(&0.25f64.to_ne_bytes());
    heap.static_primitives = primitives;
    let mut objects = vec![0u8; 8];
    heap.put_reference(&mut objects, 0, heap.object_id(IMAGE_A));
    heap.static_objects = objects;

    // image heap
    heap.add_object(
        heap.object_id(IMAGE_A),
        A_TYPE,
        HeapPartition::ImageHeap,
        TestObjectKind::Instance(a_storage(A_SIZE, 1)),
    );
    heap.add_object(
        heap.object_id(IMAGE_BYTES),
        BYTE_ARRAY_TYPE,
        HeapPartition::ImageHeap,
        TestObjectKind::PrimitiveArray {
            element: StorageKind::Byte,
            length: 3,
            elements: b"abc".to_vec(),
        },
    );

    // collected heap: one instance per hierarchy level
    let a = heap.object_id(A_OBJ);
    let b = heap.object_id(B_OBJ);
    let c = heap.object_id(C_OBJ);
    let d = heap.object_id(D_OBJ);
    heap.add_object(
        a,
        A_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::Instance(a_storage(A_SIZE, 2)),
    );

    let mut storage = a_storage(B_SIZE, 3);
    heap.put_reference(&mut storage, 48, a);
    heap.add_object(b, B_TYPE, HeapPartition::CollectedHeap, TestObjectKind::Instance(storage));

    let mut storage = a_storage(C_SIZE, 4);
    heap.put_reference(&mut storage, 48, b);
    storage[56..60].copy_from_slice(&(-42i32).to_ne_bytes());
    heap.put_reference(&mut storage, 64, ObjectId::NULL);
    heap.add_object(c, C_TYPE, HeapPartition::CollectedHeap, TestObjectKind::Instance(storage));

    let mut storage = a_storage(D_SIZE, 5);
    heap.put_reference(&mut storage, 48, c);
    storage[56..60].copy_from_slice(&77i32.to_ne_bytes());
    heap.put_reference(&mut storage, 64, d);
    storage[72..80].copy_from_slice(&i64::MIN.to_ne_bytes());
    heap.add_object(d, D_TYPE, HeapPartition::CollectedHeap, TestObjectKind::Instance(storage));

    // hybrid of B: fixed fields plus an inline tail that is not dumped
    let mut storage = a_storage(B_SIZE, 6);
    heap.put_reference(&mut storage, 48, ObjectId::NULL);
    storage.extend_from_slice(&[0xEE; 24]);
    heap.add_object(
        heap.object_id(HYBRID_OBJ),
        B_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::Hybrid(storage),
    );

    let elements = heap.reference_array(&[a, ObjectId::NULL, d]);
    heap.add_object(
        heap.object_id(OBJECT_ARRAY_OBJ),
        OBJECT_ARRAY_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::ObjectArray {
            length: 3,
            elements,
        },
    );

    for (i, (kind, type_id)) in PRIMITIVE_ARRAYS.iter().enumerate() {
        let (length, elements) = primitive_elements(*kind);
        heap.add_object(
            heap.object_id(PRIMITIVE_ARRAY_BASE + i as u64),
            *type_id,
            HeapPartition::CollectedHeap,
            TestObjectKind::PrimitiveArray {
                element: *kind,
                length,
                elements,
            },
        );
    }

    heap.add_object(
        heap.object_id(UNKNOWN_OBJ),
        UNKNOWN_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::Instance(vec![0u8; 16]),
    );
    heap.add_object(
        heap.object_id(EMPTY_OBJ),
        EMPTY_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::Instance(vec![0u8; 16]),
    );
    heap.add_object(
        heap.object_id(THREAD_ONE_OBJ),
        A_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::Instance(a_storage(A_SIZE, 7)),
    );

    // threads
    let thread_one = TestThread {
        info: ThreadInfo {
            id: ThreadId(1),
            thread_object: heap.object_id(THREAD_ONE_OBJ),
        },
        frames: vec![
            TestFrame {
                class: D_TYPE,
                method: "run".to_string(),
                source: Some("D.java".to_string()),
                line: SourceLine::Known(42),
            },
            TestFrame {
                class: UNKNOWN_TYPE,
                method: "hidden".to_string(),
                source: None,
                line: SourceLine::Compiled,
            },
            TestFrame {
                class: C_TYPE,
                method: "call".to_string(),
                source: None,
                line: SourceLine::Unknown,
            },
            TestFrame {
                class: B_TYPE,
                method: "nativeCall".to_string(),
                source: Some(String::new()),
                line: SourceLine::Native,
            },
        ],
        stack_references: vec![
            heap.stack_reference(a),
            RawReference {
                value: 0,
                compressed: layout.compressed_references,
            },
        ],
        deoptimized_references: vec![b],
        thread_local_roots: vec![c, ObjectId::NULL],
    };
    let thread_two = TestThread {
        info: ThreadInfo {
            id: ThreadId(2),
            thread_object: ObjectId::NULL,
        },
        frames: Vec::new(),
        stack_references: Vec::new(),
        deoptimized_references: Vec::new(),
        thread_local_roots: Vec::new(),
    };
    heap.threads = vec![thread_one, thread_two];

    heap.code_roots = vec![heap.object_id(CODE_ROOT_OBJ), ObjectId::NULL];
    heap
}

/// A heap with one int array class and one int array of `length` elements
pub fn int_array_heap(layout: ObjectLayout, length: u64) -> TestHeap {
    let mut heap = TestHeap::new(layout);
    let mut builder = FieldMetadataBuilder::new();
    builder.reserve_type_id(INT_ARRAY_TYPE);
    heap.metadata = builder.encode();

    heap.add_class(INT_ARRAY_TYPE, "[I", None, 0, true);
    let mut elements = Vec::new();
    for i in 0..length as i32 {
        elements.extend_from_slice(&i.to_ne_bytes());
    }
    heap.add_object(
        heap.object_id(1),
        INT_ARRAY_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::PrimitiveArray {
            element: StorageKind::Int,
            length,
            elements,
        },
    );
    heap
}

/// A heap holding one `Object[]` of `length` references to distinct slots
pub fn object_array_heap(layout: ObjectLayout, length: u64) -> TestHeap {
    let mut heap = TestHeap::new(layout);
    let mut builder = FieldMetadataBuilder::new();
    builder.reserve_type_id(OBJECT_ARRAY_TYPE);
    heap.metadata = builder.encode();

    heap.add_class(OBJECT_ARRAY_TYPE, "[Ljava.lang.Object;", None, 0, true);
    let targets: Vec<ObjectId> = (0..length).map(|i| heap.object_id(2 + i)).collect();
    let elements = heap.reference_array(&targets);
    heap.add_object(
        heap.object_id(1),
        OBJECT_ARRAY_TYPE,
        HeapPartition::CollectedHeap,
        TestObjectKind::ObjectArray { length, elements },
    );
    heap
}
