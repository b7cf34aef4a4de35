use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::block::Block;
use crate::element::{BoolCodec, DoubleCodec, FloatCodec, IntCodec, StrCodec, UintCodec};
use crate::error::{MarshalError, Result};
use crate::schema::{FieldKind, TypeDef};
use crate::value::{Record, Value};

/// A field's bound codec.
enum Element {
    Int(IntCodec),
    Uint(UintCodec),
    Uint64(UintCodec),
    Float(FloatCodec),
    Double(DoubleCodec),
    Bool(BoolCodec),
    Str(StrCodec),
    /// Another resolved type, by index.
    Nested { type_index: usize },
}

struct ResolvedField {
    name: String,
    /// Byte offset in the C-style layout the declaration describes.
    /// Metadata only; records are dynamic values.
    offset: usize,
    element: Element,
}

struct ResolvedType {
    name: String,
    id: u32,
    fields: Vec<ResolvedField>,
    instance_size: usize,
    max_wire_size: usize,
}

/// The registry of marshallable types.
///
/// Use in two phases: [`register`](Self::register) every [`TypeDef`] (order
/// free), then one [`startup`](Self::startup) call binds fields to codecs
/// and resolves nested references by name, pulling referenced types forward
/// out of the pending set on demand. Duplicate names, duplicate non-zero
/// ids and cyclic references fail with descriptive errors. Marshalling
/// before `startup` fails with [`MarshalError::NoSuchType`].
#[derive(Default)]
pub struct MarshalRegistry {
    pending: BTreeMap<String, TypeDef>,
    resolved: Vec<ResolvedType>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

impl MarshalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type. Only records intent; binding happens in `startup`.
    pub fn register(&mut self, def: TypeDef) -> Result<()> {
        if self.by_name.contains_key(&def.name) || self.pending.contains_key(&def.name) {
            return Err(MarshalError::DuplicateType { name: def.name });
        }
        debug!(name = %def.name, id = def.id, fields = def.fields.len(), "declared marshal type");
        self.pending.insert(def.name.clone(), def);
        Ok(())
    }

    /// Resolve every pending declaration. Registration order does not
    /// matter: a type that references a not-yet-resolved type pulls it
    /// forward. A reference that cannot be satisfied — unregistered, or
    /// already pulled out by a cycle — fails.
    pub fn startup(&mut self) -> Result<()> {
        while let Some(name) = self.pending.keys().next().cloned() {
            self.resolve_type(&name)?;
        }
        Ok(())
    }

    /// Resolved type count. Usable as a primitive protocol check if types
    /// are only ever added.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// The wire id registered for a type (0 when it has none).
    pub fn id_of(&self, type_name: &str) -> Result<u32> {
        Ok(self.resolved[self.index_of(type_name)?].id)
    }

    /// The type registered under a non-zero wire id.
    pub fn name_of_id(&self, id: u32) -> Option<&str> {
        self.by_id
            .get(&id)
            .map(|&index| self.resolved[index].name.as_str())
    }

    /// Worst-case marshalled size of a record of this type.
    pub fn max_wire_size(&self, type_name: &str) -> Result<usize> {
        Ok(self.resolved[self.index_of(type_name)?].max_wire_size)
    }

    /// The C-layout footprint the declaration describes (aligned to the
    /// largest field alignment, capped at 4).
    pub fn instance_size(&self, type_name: &str) -> Result<usize> {
        Ok(self.resolved[self.index_of(type_name)?].instance_size)
    }

    /// A record of the given type with every field at its default.
    pub fn new_record(&self, type_name: &str) -> Result<Record> {
        Ok(self.default_record(self.index_of(type_name)?))
    }

    /// Marshal a record at the block's cursor.
    ///
    /// Returns the bytes written, or `Ok(None)` — cursor restored — when
    /// the block cannot hold the record. Values violating their field
    /// constraints are hard errors.
    pub fn marshal(&self, record: &Record, block: &mut Block) -> Result<Option<usize>> {
        let index = self.index_of(record.type_name())?;
        let start = block.pos();
        if self.marshal_fields(index, record, block)? {
            Ok(Some(block.pos() - start))
        } else {
            block.seek(start);
            Ok(None)
        }
    }

    /// Demarshal a record of the named type from the block's cursor.
    ///
    /// Returns `Ok(None)` — cursor restored — when the block does not hold
    /// enough bytes. Decoded values violating their constraints are hard
    /// errors.
    pub fn demarshal(&self, type_name: &str, block: &mut Block) -> Result<Option<Record>> {
        let index = self.index_of(type_name)?;
        let start = block.pos();
        match self.demarshal_fields(index, block)? {
            Some(record) => Ok(Some(record)),
            None => {
                block.seek(start);
                Ok(None)
            }
        }
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| MarshalError::NoSuchType {
                name: name.to_string(),
            })
    }

    fn resolve_type(&mut self, name: &str) -> Result<usize> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(index);
        }
        // A name that is in neither map was never registered — or was
        // already pulled out of `pending` further up this resolution
        // chain, which is a cycle.
        let def = self
            .pending
            .remove(name)
            .ok_or_else(|| MarshalError::NoSuchType {
                name: name.to_string(),
            })?;

        let mut fields = Vec::with_capacity(def.fields.len());
        for field in def.fields {
            let element = match field.kind {
                FieldKind::Int { min, max } => {
                    Element::Int(IntCodec::new(i64::from(min), i64::from(max)))
                }
                FieldKind::Uint { bits } => Element::Uint(UintCodec::for_u32(bits)?),
                FieldKind::Uint64 { bits } => Element::Uint64(UintCodec::for_u64(bits)?),
                FieldKind::Float { min, max, prec } => {
                    Element::Float(FloatCodec::new(min, max, prec)?)
                }
                FieldKind::Double => Element::Double(DoubleCodec),
                FieldKind::Bool => Element::Bool(BoolCodec),
                FieldKind::Str { max_len } => Element::Str(StrCodec::new(max_len)),
                FieldKind::Nested { type_name } => {
                    let type_index = self.resolve_type(&type_name).map_err(|err| match err {
                        MarshalError::NoSuchType { name } => MarshalError::UnknownType {
                            referrer: def.name.clone(),
                            field: field.name.clone(),
                            name,
                        },
                        other => other,
                    })?;
                    Element::Nested { type_index }
                }
            };
            fields.push(ResolvedField {
                name: field.name,
                offset: 0,
                element,
            });
        }

        let mut max_wire_size: usize = 0;
        let mut end: usize = 0;
        let mut max_align: usize = 1;
        for field in &mut fields {
            let (size, align) = self.element_layout(&field.element);
            let offset = end.div_ceil(align) * align;
            field.offset = offset;
            end = offset + size;
            max_align = max_align.max(align);
            max_wire_size += self.element_wire_size(&field.element);
        }
        let instance_size = end.div_ceil(max_align) * max_align;

        if def.id != 0 && self.by_id.contains_key(&def.id) {
            return Err(MarshalError::DuplicateId {
                id: def.id,
                name: def.name,
            });
        }

        debug!(
            name = %def.name,
            id = def.id,
            max_wire_size,
            instance_size,
            "resolved marshal type"
        );
        let index = self.resolved.len();
        if def.id != 0 {
            self.by_id.insert(def.id, index);
        }
        self.by_name.insert(def.name.clone(), index);
        self.resolved.push(ResolvedType {
            name: def.name,
            id: def.id,
            fields,
            instance_size,
            max_wire_size,
        });
        Ok(index)
    }

    /// In-memory (size, alignment) of an element in the described C
    /// layout. Alignment follows size, capped at 4.
    fn element_layout(&self, element: &Element) -> (usize, usize) {
        let size = match element {
            Element::Int(_) | Element::Uint(_) | Element::Float(_) => 4,
            Element::Uint64(_) | Element::Double(_) => 8,
            Element::Bool(_) => 1,
            Element::Str(_) => std::mem::size_of::<String>(),
            Element::Nested { type_index } => self.resolved[*type_index].instance_size,
        };
        let align = match size {
            0 | 1 => 1,
            2 => 2,
            _ => 4,
        };
        (size, align)
    }

    fn element_wire_size(&self, element: &Element) -> usize {
        match element {
            Element::Int(codec) => codec.wire_bytes(),
            Element::Uint(codec) | Element::Uint64(codec) => codec.wire_bytes(),
            Element::Float(codec) => codec.wire_bytes(),
            Element::Double(codec) => codec.wire_bytes(),
            Element::Bool(codec) => codec.wire_bytes(),
            Element::Str(codec) => codec.wire_bytes(),
            Element::Nested { type_index } => self.resolved[*type_index].max_wire_size,
        }
    }

    fn default_record(&self, index: usize) -> Record {
        let ty = &self.resolved[index];
        let values = ty
            .fields
            .iter()
            .map(|field| (field.name.clone(), self.default_value(&field.element)))
            .collect();
        Record::new(ty.name.clone(), values)
    }

    fn default_value(&self, element: &Element) -> Value {
        match element {
            Element::Int(_) => Value::Int(0),
            Element::Uint(_) => Value::Uint(0),
            Element::Uint64(_) => Value::Uint64(0),
            Element::Float(_) => Value::Float(0.0),
            Element::Double(_) => Value::Double(0.0),
            Element::Bool(_) => Value::Bool(false),
            Element::Str(_) => Value::Str(String::new()),
            Element::Nested { type_index } => Value::Record(self.default_record(*type_index)),
        }
    }

    /// Walk the fields in declared order; `false` means the block ran out
    /// of space (caller restores the cursor).
    fn marshal_fields(&self, index: usize, record: &Record, block: &mut Block) -> Result<bool> {
        let ty = &self.resolved[index];
        for field in &ty.fields {
            let value = record
                .get(&field.name)
                .ok_or_else(|| MarshalError::NoSuchField {
                    name: field.name.clone(),
                })?;
            let wrote = match (&field.element, value) {
                (Element::Int(codec), Value::Int(v)) => {
                    codec.marshal(i64::from(*v), block)?.is_some()
                }
                (Element::Uint(codec), Value::Uint(v)) => {
                    codec.marshal(u64::from(*v), block)?.is_some()
                }
                (Element::Uint64(codec), Value::Uint64(v)) => codec.marshal(*v, block)?.is_some(),
                (Element::Float(codec), Value::Float(v)) => codec.marshal(*v, block)?.is_some(),
                (Element::Double(codec), Value::Double(v)) => codec.marshal(*v, block)?.is_some(),
                (Element::Bool(codec), Value::Bool(v)) => codec.marshal(*v, block)?.is_some(),
                (Element::Str(codec), Value::Str(v)) => codec.marshal(v, block)?.is_some(),
                (Element::Nested { type_index }, Value::Record(nested)) => {
                    let expected = self.resolved[*type_index].name.as_str();
                    if nested.type_name() != expected {
                        return Err(MarshalError::NestedTypeMismatch {
                            field: field.name.clone(),
                            expected: expected.to_string(),
                            got: nested.type_name().to_string(),
                        });
                    }
                    self.marshal_fields(*type_index, nested, block)?
                }
                (element, value) => {
                    return Err(MarshalError::TypeMismatch {
                        field: field.name.clone(),
                        expected: Self::expectation(element),
                        got: value.kind_name(),
                    });
                }
            };
            if !wrote {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Walk the fields in declared order; `None` means the block ran out
    /// of bytes (caller restores the cursor).
    fn demarshal_fields(&self, index: usize, block: &mut Block) -> Result<Option<Record>> {
        let ty = &self.resolved[index];
        let mut values = Vec::with_capacity(ty.fields.len());
        for field in &ty.fields {
            let value = match &field.element {
                Element::Int(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Int(v as i32),
                    None => return Ok(None),
                },
                Element::Uint(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Uint(v as u32),
                    None => return Ok(None),
                },
                Element::Uint64(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Uint64(v),
                    None => return Ok(None),
                },
                Element::Float(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Float(v),
                    None => return Ok(None),
                },
                Element::Double(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Double(v),
                    None => return Ok(None),
                },
                Element::Bool(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Bool(v),
                    None => return Ok(None),
                },
                Element::Str(codec) => match codec.demarshal(block)? {
                    Some(v) => Value::Str(v),
                    None => return Ok(None),
                },
                Element::Nested { type_index } => {
                    match self.demarshal_fields(*type_index, block)? {
                        Some(record) => Value::Record(record),
                        None => return Ok(None),
                    }
                }
            };
            values.push((field.name.clone(), value));
        }
        Ok(Some(Record::new(ty.name.clone(), values)))
    }

    fn expectation(element: &Element) -> &'static str {
        match element {
            Element::Int(_) => "int",
            Element::Uint(_) => "uint",
            Element::Uint64(_) => "uint64",
            Element::Float(_) => "float",
            Element::Double(_) => "double",
            Element::Bool(_) => "bool",
            Element::Str(_) => "string",
            Element::Nested { .. } => "record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_packet_registry() -> MarshalRegistry {
        let mut registry = MarshalRegistry::new();
        registry
            .register(
                TypeDef::new("AcceptPacket", 0x13)
                    .int_field("user", 0, 1000)
                    .int_field("expiry", 0, 30000)
                    .int_field("proto_count", 0, 10000),
            )
            .unwrap();
        registry.startup().unwrap();
        registry
    }

    #[test]
    fn accept_packet_roundtrip() {
        let registry = accept_packet_registry();
        let mut record = registry.new_record("AcceptPacket").unwrap();
        record.set("user", Value::Int(100)).unwrap();
        record.set("expiry", Value::Int(100)).unwrap();
        record.set("proto_count", Value::Int(4)).unwrap();

        let mut block = Block::with_capacity(100);
        let written = registry.marshal(&record, &mut block).unwrap().unwrap();
        // Three ranged ints at two bytes each.
        assert_eq!(written, 6);
        assert_eq!(registry.max_wire_size("AcceptPacket").unwrap(), 6);

        block.seek(0);
        let back = registry.demarshal("AcceptPacket", &mut block).unwrap().unwrap();
        assert_eq!(back.get("user").and_then(Value::as_int), Some(100));
        assert_eq!(back.get("expiry").and_then(Value::as_int), Some(100));
        assert_eq!(back.get("proto_count").and_then(Value::as_int), Some(4));
    }

    #[test]
    fn registration_order_does_not_matter_for_nesting() {
        let mut registry = MarshalRegistry::new();
        // Outer registered before the type it contains.
        registry
            .register(
                TypeDef::new("Outer", 2)
                    .int_field("i", 0, 2)
                    .nested_field("inner", "Inner"),
            )
            .unwrap();
        registry
            .register(
                TypeDef::new("Inner", 1)
                    .float_field("f", -1.0, 1.0, 0.01)
                    .int_field("i", 0, 200)
                    .string_field("s", 200)
                    .bool_field("b"),
            )
            .unwrap();
        registry.startup().unwrap();
        assert_eq!(registry.len(), 2);

        let mut inner = registry.new_record("Inner").unwrap();
        inner.set("f", Value::Float(0.25)).unwrap();
        inner.set("i", Value::Int(42)).unwrap();
        inner.set("s", Value::Str("nested".into())).unwrap();
        inner.set("b", Value::Bool(true)).unwrap();
        let mut outer = registry.new_record("Outer").unwrap();
        outer.set("i", Value::Int(1)).unwrap();
        outer.set("inner", Value::Record(inner)).unwrap();

        let mut block = Block::with_capacity(256);
        registry.marshal(&outer, &mut block).unwrap().unwrap();
        block.seek(0);
        let back = registry.demarshal("Outer", &mut block).unwrap().unwrap();

        assert_eq!(back.get("i").and_then(Value::as_int), Some(1));
        let inner = back.get("inner").and_then(Value::as_record).unwrap();
        assert_eq!(inner.get("i").and_then(Value::as_int), Some(42));
        assert_eq!(inner.get("s").and_then(Value::as_str), Some("nested"));
        assert_eq!(inner.get("b").and_then(Value::as_bool), Some(true));
        let f = inner.get("f").and_then(Value::as_float).unwrap();
        assert!((f - 0.25).abs() <= 0.01);
    }

    #[test]
    fn unresolved_reference_is_descriptive() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(TypeDef::new("Lonely", 0).nested_field("missing", "NeverRegistered"))
            .unwrap();
        let err = registry.startup().unwrap_err();
        assert!(matches!(err, MarshalError::UnknownType { .. }));
        assert!(err.to_string().contains("NeverRegistered"));
    }

    #[test]
    fn cycles_fail_to_resolve() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(TypeDef::new("A", 0).nested_field("b", "B"))
            .unwrap();
        registry
            .register(TypeDef::new("B", 0).nested_field("a", "A"))
            .unwrap();
        assert!(matches!(
            registry.startup(),
            Err(MarshalError::UnknownType { .. })
        ));
    }

    #[test]
    fn duplicate_names_and_ids_are_rejected() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(TypeDef::new("T", 1).bool_field("x"))
            .unwrap();
        assert!(matches!(
            registry.register(TypeDef::new("T", 2).bool_field("y")),
            Err(MarshalError::DuplicateType { .. })
        ));
        registry
            .register(TypeDef::new("U", 1).bool_field("z"))
            .unwrap();
        assert!(matches!(
            registry.startup(),
            Err(MarshalError::DuplicateId { id: 1, .. })
        ));
    }

    #[test]
    fn wire_id_lookup_is_not_auto_prefixed() {
        let registry = accept_packet_registry();
        assert_eq!(registry.id_of("AcceptPacket").unwrap(), 0x13);
        assert_eq!(registry.name_of_id(0x13), Some("AcceptPacket"));
        assert_eq!(registry.name_of_id(0x14), None);

        // The id never appears in the marshalled bytes.
        let record = registry.new_record("AcceptPacket").unwrap();
        let mut block = Block::with_capacity(16);
        let written = registry.marshal(&record, &mut block).unwrap().unwrap();
        assert_eq!(written, 6);
        assert_eq!(&block.as_slice()[..6], &[0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn short_block_restores_cursor_and_is_retryable() {
        let registry = accept_packet_registry();
        let mut record = registry.new_record("AcceptPacket").unwrap();
        record.set("user", Value::Int(900)).unwrap();

        let mut tiny = Block::with_capacity(5);
        tiny.seek(1);
        assert_eq!(registry.marshal(&record, &mut tiny).unwrap(), None);
        assert_eq!(tiny.pos(), 1);

        let mut partial = Block::from_vec(vec![0x03, 0x84, 0x00]);
        assert_eq!(registry.demarshal("AcceptPacket", &mut partial).unwrap(), None);
        assert_eq!(partial.pos(), 0);
    }

    #[test]
    fn constraint_violations_are_hard_errors() {
        let registry = accept_packet_registry();
        let mut record = registry.new_record("AcceptPacket").unwrap();
        record.set("user", Value::Int(1001)).unwrap();
        let mut block = Block::with_capacity(32);
        assert!(matches!(
            registry.marshal(&record, &mut block),
            Err(MarshalError::OutOfRange { value: 1001, .. })
        ));

        // Wrong value kind for the field.
        let mut record = registry.new_record("AcceptPacket").unwrap();
        record.set("user", Value::Bool(true)).unwrap();
        assert!(matches!(
            registry.marshal(&record, &mut block),
            Err(MarshalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn uint64_field_roundtrips_full_width() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(TypeDef::new("Wide", 0x14).uint64_field("value", 64))
            .unwrap();
        registry.startup().unwrap();

        let mut record = registry.new_record("Wide").unwrap();
        record
            .set("value", Value::Uint64(0xDEAD_BEEF_CAFE_F00D))
            .unwrap();
        let mut block = Block::with_capacity(8);
        assert_eq!(registry.marshal(&record, &mut block).unwrap(), Some(8));
        block.seek(0);
        let back = registry.demarshal("Wide", &mut block).unwrap().unwrap();
        assert_eq!(
            back.get("value").and_then(Value::as_uint64),
            Some(0xDEAD_BEEF_CAFE_F00D)
        );
    }

    #[test]
    fn instance_size_reflects_described_layout() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(
                TypeDef::new("Mixed", 0)
                    .bool_field("flag")
                    .int_field("count", 0, 100),
            )
            .unwrap();
        registry.startup().unwrap();
        // bool at 0, int aligned to 4, rounded to the 4-byte alignment.
        assert_eq!(registry.instance_size("Mixed").unwrap(), 8);
        // One byte of bool plus one byte of ranged int on the wire.
        assert_eq!(registry.max_wire_size("Mixed").unwrap(), 2);
    }

    #[test]
    fn marshalling_before_startup_fails() {
        let mut registry = MarshalRegistry::new();
        registry
            .register(TypeDef::new("T", 0).bool_field("x"))
            .unwrap();
        assert!(matches!(
            registry.new_record("T"),
            Err(MarshalError::NoSuchType { .. })
        ));
    }
}
