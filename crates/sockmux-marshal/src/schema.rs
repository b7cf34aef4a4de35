/// The constrained element kinds a field can declare.
///
/// The constraints drive the wire encoding: an `Int` bounded to a small
/// range costs fewer bytes, a `Float` is quantized to its precision, a
/// `Str` carries a length prefix sized to its maximum.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Signed integer within `[min, max]`, both inclusive.
    Int { min: i32, max: i32 },
    /// Unsigned integer of at most `bits` significant bits (≤ 32).
    Uint { bits: u32 },
    /// Unsigned integer of at most `bits` significant bits (≤ 64).
    Uint64 { bits: u32 },
    /// Float within `[min, max]`, quantized to multiples of `prec`.
    Float { min: f32, max: f32, prec: f32 },
    /// 64-bit float, bit-for-bit.
    Double,
    /// Single byte, 0 or 1.
    Bool,
    /// UTF-8 string of at most `max_len` bytes.
    Str { max_len: usize },
    /// A field of another registered type, resolved at startup.
    Nested { type_name: String },
}

/// One declared field: a name plus its constrained kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A type declaration: an ordered list of fields, a stable name, and an
/// optional non-zero wire id.
///
/// Declaring a type records intent only. Binding fields to their codecs —
/// including resolving `Nested` references by name — happens in
/// [`MarshalRegistry::startup`](crate::MarshalRegistry::startup).
///
/// ```
/// use sockmux_marshal::TypeDef;
///
/// let def = TypeDef::new("Position", 3)
///     .float_field("x", -1000.0, 1000.0, 0.01)
///     .float_field("y", -1000.0, 1000.0, 0.01)
///     .uint_field("flags", 4);
/// ```
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub(crate) name: String,
    /// Non-zero marks the type as a top-level wire message. The id is not
    /// written to the wire automatically; dispatch belongs to the
    /// application.
    pub(crate) id: u32,
    pub(crate) fields: Vec<FieldDef>,
}

impl TypeDef {
    /// Declare a type. Pass id 0 for types that never travel as top-level
    /// messages.
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// A signed integer bounded to `[min, max]`.
    pub fn int_field(self, name: impl Into<String>, min: i32, max: i32) -> Self {
        self.field(name, FieldKind::Int { min, max })
    }

    /// An unsigned integer of `bits` significant bits.
    pub fn uint_field(self, name: impl Into<String>, bits: u32) -> Self {
        self.field(name, FieldKind::Uint { bits })
    }

    /// A 64-bit unsigned integer of `bits` significant bits.
    pub fn uint64_field(self, name: impl Into<String>, bits: u32) -> Self {
        self.field(name, FieldKind::Uint64 { bits })
    }

    /// A float bounded to `[min, max]` and quantized to `prec`.
    pub fn float_field(self, name: impl Into<String>, min: f32, max: f32, prec: f32) -> Self {
        self.field(name, FieldKind::Float { min, max, prec })
    }

    /// A raw 64-bit float.
    pub fn double_field(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Double)
    }

    /// A boolean.
    pub fn bool_field(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Bool)
    }

    /// A string of at most `max_len` bytes.
    pub fn string_field(self, name: impl Into<String>, max_len: usize) -> Self {
        self.field(name, FieldKind::Str { max_len })
    }

    /// A field of another registered type, referenced by name.
    pub fn nested_field(self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Nested {
                type_name: type_name.into(),
            },
        )
    }
}
