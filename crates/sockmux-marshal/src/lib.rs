//! Compact, fixed-schema record marshalling.
//!
//! Declare each record type once as an ordered list of constrained fields —
//! ranged ints, bit-packed uints, quantized floats, bounded strings, nested
//! types — register the declarations with a [`MarshalRegistry`], and call
//! [`startup`](MarshalRegistry::startup) to bind them. Registration order
//! does not matter: nested references are pulled forward on demand, so a
//! type may be registered before the types it contains.
//!
//! Marshalled bytes are written through a [`Block`], a plain cursor over a
//! byte range. Encodings use the minimum bytes the declared constraints
//! allow, so an `int` bounded to `0..=1000` costs two bytes on the wire.
//!
//! ```
//! use sockmux_marshal::{Block, MarshalRegistry, TypeDef, Value};
//!
//! let mut registry = MarshalRegistry::new();
//! registry
//!     .register(
//!         TypeDef::new("Greeting", 1)
//!             .int_field("user", 0, 1000)
//!             .string_field("text", 40),
//!     )
//!     .unwrap();
//! registry.startup().unwrap();
//!
//! let mut record = registry.new_record("Greeting").unwrap();
//! record.set("user", Value::Int(7)).unwrap();
//! record.set("text", Value::Str("hi".into())).unwrap();
//!
//! let mut block = Block::with_capacity(64);
//! registry.marshal(&record, &mut block).unwrap().unwrap();
//! block.seek(0);
//! let back = registry.demarshal("Greeting", &mut block).unwrap().unwrap();
//! assert_eq!(back.get("user"), Some(&Value::Int(7)));
//! ```

pub mod block;
pub mod element;
pub mod error;
pub mod registry;
pub mod schema;
pub mod value;

pub use block::Block;
pub use error::{MarshalError, Result};
pub use registry::MarshalRegistry;
pub use schema::{FieldKind, TypeDef};
pub use value::{Record, Value};
