//! JSON Schema validation by compilation.
//!
//! A schema is compiled once into a small program (an IR tree optimized and
//! rendered for inspection) and then run against any number of instances.
//!
//! ```no_run
//! use json_schemac::SchemaRegistry;
//! use serde_json::json;
//!
//! let mut registry = SchemaRegistry::new();
//! let validator = registry.compile(json!({"type": "string", "maxLength": 3})).unwrap();
//! let outcome = validator.validate(&json!("abcd")).unwrap();
//! assert!(!outcome.valid);
//! println!("{}", json_schemac::errors_text(&outcome.errors));
//! ```
pub mod codegen;
pub mod compile;
pub mod error;
pub mod exec;
pub mod format;
pub mod ir;
pub mod optimize;
pub mod options;
pub mod path_de;
pub mod registry;
pub mod resolve;
pub mod types;
pub mod vocab;

pub use error::{CompileError, ErrorRecord, RuntimeError, ValidateError, ValidationError, errors_text};
pub use exec::Outcome;
pub use format::FormatDef;
pub use options::{CoerceTypes, Draft, InlineRefs, Options, StrictMode};
pub use registry::{SchemaRegistry, Validator};
pub use types::{JsonType, TypeSet};
pub use vocab::{DataCx, ErrorTemplate, KeywordDefinition};
