use std::sync::Arc;

use am_schema::Schema;
use am_types::AttrType;
use serde::{Deserialize, Serialize};

use crate::data::ArrayData;

/// Hints for `index_lookup`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOptions {
    /// The index attribute is already sorted ascending, so lookups may
    /// binary search instead of hashing.
    pub index_sorted: bool,
}

/// Lazy operator tree behind an [`ArrayHandle`]. Nothing is computed until
/// the engine evaluates the handle.
#[derive(Debug)]
pub enum Plan {
    Source {
        label: String,
        data: Arc<ArrayData>,
    },
    Project {
        input: ArrayHandle,
        attributes: Vec<String>,
    },
    Sort {
        input: ArrayHandle,
    },
    Uniq {
        input: ArrayHandle,
    },
    Hstack {
        left: ArrayHandle,
        right: ArrayHandle,
    },
    Concat {
        left: ArrayHandle,
        right: ArrayHandle,
    },
    AttributeRename {
        input: ArrayHandle,
        pairs: Vec<(String, String)>,
    },
    DimensionRename {
        input: ArrayHandle,
        pairs: Vec<(String, String)>,
    },
    Alias {
        input: ArrayHandle,
        alias: String,
    },
    IndexLookup {
        input: ArrayHandle,
        index: ArrayHandle,
        key: String,
        output: String,
        options: LookupOptions,
    },
    ToDimensions {
        input: ArrayHandle,
        names: Vec<String>,
    },
    CrossJoin {
        left: ArrayHandle,
        right: ArrayHandle,
        pairs: Vec<(String, String)>,
    },
    Unpack {
        input: ArrayHandle,
        dimension: String,
    },
}

impl Plan {
    #[must_use]
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Project { .. } => "project",
            Self::Sort { .. } => "sort",
            Self::Uniq { .. } => "uniq",
            Self::Hstack { .. } => "hstack",
            Self::Concat { .. } => "concat",
            Self::AttributeRename { .. } => "attribute_rename",
            Self::DimensionRename { .. } => "dimension_rename",
            Self::Alias { .. } => "as",
            Self::IndexLookup { .. } => "index_lookup",
            Self::ToDimensions { .. } => "redimension",
            Self::CrossJoin { .. } => "cross_join",
            Self::Unpack { .. } => "unpack",
        }
    }
}

fn call(operator: &str, args: impl IntoIterator<Item = String>) -> String {
    let args: Vec<String> = args.into_iter().collect();
    format!("{operator}({})", args.join(","))
}

fn flatten_pairs(pairs: &[(String, String)]) -> impl Iterator<Item = String> + '_ {
    pairs.iter().flat_map(|(a, b)| [a.clone(), b.clone()])
}

/// Immutable reference to an array: its schema plus the plan producing it.
///
/// Every engine operation returns a new handle; cloning is cheap.
#[derive(Debug, Clone)]
pub struct ArrayHandle {
    schema: Arc<Schema>,
    plan: Arc<Plan>,
}

impl ArrayHandle {
    #[must_use]
    pub fn new(schema: Schema, plan: Plan) -> Self {
        Self {
            schema: Arc::new(schema),
            plan: Arc::new(plan),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    #[must_use]
    pub fn att_names(&self) -> Vec<String> {
        self.schema.att_names()
    }

    #[must_use]
    pub fn dim_names(&self) -> Vec<String> {
        self.schema.dim_names()
    }

    #[must_use]
    pub fn names(&self) -> std::collections::BTreeSet<String> {
        self.schema.names()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.schema.contains(name)
    }

    #[must_use]
    pub fn name_type(&self, name: &str) -> Option<AttrType> {
        self.schema.name_type(name)
    }

    /// Alias given by `as`, when this handle is an aliased reference.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        match &*self.plan {
            Plan::Alias { alias, .. } => Some(alias),
            _ => None,
        }
    }

    /// Query text of the plan in `operator(arg,...)` form.
    #[must_use]
    pub fn to_afl(&self) -> String {
        match &*self.plan {
            Plan::Source { label, .. } => label.clone(),
            Plan::Project { input, attributes } => call(
                "project",
                std::iter::once(input.to_afl()).chain(attributes.iter().cloned()),
            ),
            Plan::Sort { input } => call("sort", [input.to_afl()]),
            Plan::Uniq { input } => call("uniq", [input.to_afl()]),
            Plan::Hstack { left, right } => call("hstack", [left.to_afl(), right.to_afl()]),
            Plan::Concat { left, right } => call("concat", [left.to_afl(), right.to_afl()]),
            Plan::AttributeRename { input, pairs } => call(
                "attribute_rename",
                std::iter::once(input.to_afl()).chain(flatten_pairs(pairs)),
            ),
            Plan::DimensionRename { input, pairs } => call(
                "dimension_rename",
                std::iter::once(input.to_afl()).chain(flatten_pairs(pairs)),
            ),
            Plan::Alias { input, alias } => format!("{} as {alias}", input.to_afl()),
            Plan::IndexLookup {
                input,
                index,
                key,
                output,
                options,
            } => call(
                "index_lookup",
                [
                    input.to_afl(),
                    index.to_afl(),
                    key.clone(),
                    output.clone(),
                    format!("'index_sorted={}'", options.index_sorted),
                ],
            ),
            Plan::ToDimensions { input, .. } => {
                call("redimension", [input.to_afl(), format!("{:#}", self.schema)])
            }
            Plan::CrossJoin { left, right, pairs } => call(
                "cross_join",
                [left.to_afl(), right.to_afl()]
                    .into_iter()
                    .chain(flatten_pairs(pairs)),
            ),
            Plan::Unpack { input, dimension } => {
                call("unpack", [input.to_afl(), dimension.clone()])
            }
        }
    }
}
