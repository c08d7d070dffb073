#![forbid(unsafe_code)]

//! Contract between the merge planner and an array database engine, plus
//! an in-memory engine that executes the same contract.
//!
//! Handles are lazy: each operation derives and checks the output schema
//! immediately and records a [`Plan`] node; data is only computed by
//! [`ArrayEngine::eval`] or [`ArrayEngine::fetch`].

use std::sync::Arc;

use am_schema::SchemaError;
use am_types::{AttrType, TypeError};
use thiserror::Error;

mod data;
mod derive;
mod memory;
mod plan;

pub use data::ArrayData;
pub use memory::{
    DEFAULT_ARENA_BUDGET_BYTES, EngineOptions, JoinExecutionOptions, MemoryEngine,
};
pub use plan::{ArrayHandle, LookupOptions, Plan};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown {kind} {name:?}")]
    UnknownName { name: String, kind: &'static str },
    #[error("unknown array alias {alias:?}")]
    UnknownAlias { alias: String },
    #[error("{name:?} has type {attr_type}, which cannot become a dimension")]
    NotIntegerLike { name: String, attr_type: AttrType },
    #[error("type mismatch on {name:?}: {left} vs {right}")]
    TypeMismatch {
        name: String,
        left: AttrType,
        right: AttrType,
    },
    #[error("invalid operand for {op}: {reason}")]
    InvalidOperand { op: &'static str, reason: String },
    #[error("length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("index_lookup found no entry for {key}={value}")]
    LookupMiss { key: String, value: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Operations the merge planner needs from an array engine.
///
/// Every method returns a new handle and never mutates its inputs.
pub trait ArrayEngine {
    /// Keep the named attributes, in the given order.
    fn project(&self, array: &ArrayHandle, attributes: &[String])
    -> Result<ArrayHandle, EngineError>;

    /// Sort cells by attribute values onto a single dense dimension.
    fn sort(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError>;

    /// Drop adjacent duplicates of a sorted single-attribute array.
    fn uniq(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError>;

    /// Place the attributes of two equal-length one-dimensional arrays side by side.
    fn hstack(&self, left: &ArrayHandle, right: &ArrayHandle) -> Result<ArrayHandle, EngineError>;

    /// Append the cells of `right` after those of `left`; both must have the
    /// same attribute names and types.
    fn concat(&self, left: &ArrayHandle, right: &ArrayHandle) -> Result<ArrayHandle, EngineError>;

    fn attribute_rename(
        &self,
        array: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError>;

    fn dimension_rename(
        &self,
        array: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError>;

    /// Name the array so that operator arguments can be qualified as `alias.name`.
    fn alias(&self, array: &ArrayHandle, alias: &str) -> Result<ArrayHandle, EngineError>;

    /// Append `output`, the index coordinate holding each cell's `key` value.
    fn index_lookup(
        &self,
        input: &ArrayHandle,
        index: &ArrayHandle,
        key: &str,
        output: &str,
        options: LookupOptions,
    ) -> Result<ArrayHandle, EngineError>;

    /// Promote integer attributes to trailing dimensions.
    fn to_dimensions(
        &self,
        array: &ArrayHandle,
        names: &[String],
    ) -> Result<ArrayHandle, EngineError>;

    /// Join on equal coordinates of each `(left_dim, right_dim)` pair.
    fn cross_join(
        &self,
        left: &ArrayHandle,
        right: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError>;

    /// Flatten all dimensions into attributes over one dense dimension.
    fn unpack(&self, array: &ArrayHandle, dimension: &str) -> Result<ArrayHandle, EngineError>;

    /// Force evaluation; the returned handle refers to the materialized result.
    fn eval(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError>;

    /// Evaluate and read back the cells.
    fn fetch(&self, array: &ArrayHandle) -> Result<Arc<ArrayData>, EngineError>;

    /// A name not used by any of `arrays`, derived from `hint`.
    fn new_attribute_label(&self, hint: &str, arrays: &[&ArrayHandle]) -> String {
        let schemas: Vec<&am_schema::Schema> = arrays.iter().map(|a| a.schema()).collect();
        am_schema::new_attribute_label(hint, &schemas)
    }
}
