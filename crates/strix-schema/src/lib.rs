//! # Schema tree and validator
//!
//! A compact JSON Schema dialect (scalar / `anyOf` / `allOf` / `not` / list /
//! tuple / object / method) used to gate incoming RPC parameters and to feed
//! `rpc.discover`. Schemas are built once from JSON or YAML descriptors and
//! are immutable afterwards; validation walks the tree with a path stack so
//! failures carry an exact position (`.params[0]`, `.result.name`, …).

pub mod builder;
pub mod types;
pub mod validator;

pub use builder::{SchemaBuildError, SchemaBuilder};
pub use types::{NumberBounds, Schema, SchemaKind};
pub use validator::{
    validate, validate_method_envelope, validate_params, validate_result, ErrorPos,
};
