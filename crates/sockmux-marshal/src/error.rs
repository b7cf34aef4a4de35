/// Errors raised by registration, resolution and (de)marshalling.
///
/// Constraint violations are bugs in the schema or in the record being
/// marshalled; they are hard errors. Running out of block space is not an
/// error — those paths return `Ok(None)` with the cursor restored.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// An integer value lies outside its declared `[min, max]` range.
    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    /// An unsigned value does not fit its declared bit width.
    #[error("value {value} does not fit in {bits} bits")]
    BitsExceeded { value: u64, bits: u32 },

    /// A float field's `(max - min) / prec` needs more than 31 bits.
    #[error("float range [{min}, {max}] at precision {prec} is too wide")]
    RangeTooWide { min: f32, max: f32, prec: f32 },

    /// A float value lies outside its declared range.
    #[error("float value {value} out of range [{min}, {max}]")]
    FloatOutOfRange { value: f32, min: f32, max: f32 },

    /// A string exceeds its declared maximum length.
    #[error("string of {len} bytes exceeds maximum {max}")]
    StringTooLong { len: usize, max: usize },

    /// Demarshalled string bytes are not valid UTF-8.
    #[error("marshalled string is not valid UTF-8")]
    InvalidString,

    /// A bit width outside 1..=64 was declared.
    #[error("invalid bit width {bits}")]
    InvalidBits { bits: u32 },

    /// Two types were registered under the same name.
    #[error("duplicate type registration: {name}")]
    DuplicateType { name: String },

    /// Two types were registered with the same non-zero wire id.
    #[error("duplicate wire id {id} (second type: {name})")]
    DuplicateId { id: u32, name: String },

    /// A field references a type that is not registered, or whose
    /// resolution is cyclic.
    #[error("type {referrer} field {field} uses type {name}, which is not registered (or is used cyclically)")]
    UnknownType {
        referrer: String,
        field: String,
        name: String,
    },

    /// The named type is not known to the registry.
    #[error("no such type: {name}")]
    NoSuchType { name: String },

    /// The record has no field of the given name.
    #[error("no such field: {name}")]
    NoSuchField { name: String },

    /// A value's kind does not match the field's declared kind.
    #[error("field {field} expects {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },

    /// A nested record is of the wrong type for its field.
    #[error("field {field} expects a {expected} record, got {got}")]
    NestedTypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

pub type Result<T> = std::result::Result<T, MarshalError>;
