//! Field metadata encoder
//!
//! Produces the blob read by [`crate::metadata::MetadataIndex`]. It runs when
//! the image is built (or in tests), never during a dump, so it is free to
//! allocate.

use crate::format::StorageKind;
use crate::heap::TypeId;
use rustc_hash::FxHashMap;

/// A field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Storage kind
    pub kind: StorageKind,
    /// Byte offset in instance storage, or in static storage for statics
    pub offset: u32,
}

impl FieldDecl {
    /// Create a field declaration
    pub fn new(name: impl Into<String>, kind: StorageKind, offset: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
        }
    }
}

#[derive(Debug, Clone)]
struct ClassDecl {
    type_id: TypeId,
    instance_fields: Vec<(u32, StorageKind, u32)>,
    static_fields: Vec<(u32, StorageKind, u32)>,
}

/// Builder for the field metadata blob
#[derive(Debug, Default)]
pub struct FieldMetadataBuilder {
    classes: Vec<ClassDecl>,
    names: Vec<String>,
    name_ids: FxHashMap<String, u32>,
    max_type_id: TypeId,
}

impl FieldMetadataBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve type id slots up to `type_id` even if no class declares fields
    pub fn reserve_type_id(&mut self, type_id: TypeId) -> &mut Self {
        self.max_type_id = self.max_type_id.max(type_id);
        self
    }

    /// Declare the fields of a class, in declaration order
    pub fn add_class(
        &mut self,
        type_id: TypeId,
        instance_fields: Vec<FieldDecl>,
        static_fields: Vec<FieldDecl>,
    ) -> &mut Self {
        let instance_fields = instance_fields
            .into_iter()
            .map(|field| (self.intern(field.name), field.kind, field.offset))
            .collect();
        let static_fields = static_fields
            .into_iter()
            .map(|field| (self.intern(field.name), field.kind, field.offset))
            .collect();

        self.reserve_type_id(type_id);
        self.classes.push(ClassDecl {
            type_id,
            instance_fields,
            static_fields,
        });
        self
    }

    fn intern(&mut self, name: String) -> u32 {
        if let Some(&id) = self.name_ids.get(&name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.clone());
        self.name_ids.insert(name, id);
        id
    }

    /// Number of distinct field names
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Encode the blob
    pub fn encode(&self) -> Vec<u8> {
        let total_fields: usize = self
            .classes
            .iter()
            .map(|class| class.instance_fields.len() + class.static_fields.len())
            .sum();

        let mut buf = Vec::new();
        encode_varint(&mut buf, total_fields as u64);
        encode_varint(&mut buf, self.classes.len() as u64);
        encode_varint(&mut buf, self.names.len() as u64);
        encode_varint(&mut buf, self.max_type_id as u64);

        for class in &self.classes {
            encode_varint(&mut buf, class.type_id as u64);
            encode_varint(&mut buf, class.instance_fields.len() as u64);
            encode_varint(&mut buf, class.static_fields.len() as u64);
            for &(name, kind, offset) in class.instance_fields.iter().chain(&class.static_fields) {
                buf.push(kind.signature());
                encode_varint(&mut buf, name as u64);
                encode_varint(&mut buf, offset as u64);
            }
        }

        for name in &self.names {
            encode_varint(&mut buf, name.len() as u64);
            buf.extend_from_slice(name.as_bytes());
        }
        buf
    }
}

/// Unsigned LEB128
fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}
