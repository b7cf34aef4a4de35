use crate::error::{MarshalError, Result};

/// A field value in a marshallable record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Uint(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Record(Record),
}

impl Value {
    /// A short name for error messages.
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Uint64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Record(_) => "record",
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint64(&self) -> Option<u64> {
        match self {
            Value::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(v) => Some(v),
            _ => None,
        }
    }
}

/// An instance of a registered type: the type's fields, in declaration
/// order, each holding a [`Value`].
///
/// Build one with [`MarshalRegistry::new_record`](crate::MarshalRegistry::new_record)
/// (all fields at their defaults), then fill it in with [`set`](Record::set).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub(crate) fn new(type_name: String, fields: Vec<(String, Value)>) -> Self {
        Self { type_name, fields }
    }

    /// The registered type this record instantiates.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Replace a field value. The value's kind is checked at marshal time,
    /// not here.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => Err(MarshalError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    /// The fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_by_name() {
        let mut record = Record::new(
            "T".into(),
            vec![
                ("a".into(), Value::Int(0)),
                ("b".into(), Value::Bool(false)),
            ],
        );
        record.set("a", Value::Int(12)).unwrap();
        assert_eq!(record.get("a"), Some(&Value::Int(12)));
        assert_eq!(record.get("b").and_then(Value::as_bool), Some(false));
        assert!(matches!(
            record.set("missing", Value::Int(0)),
            Err(MarshalError::NoSuchField { .. })
        ));
    }
}
