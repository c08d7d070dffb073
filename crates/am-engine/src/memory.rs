use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use am_schema::Schema;
use am_types::Value;
use bumpalo::{Bump, collections::Vec as BumpVec};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::data::ArrayData;
use crate::plan::{ArrayHandle, LookupOptions, Plan};
use crate::{ArrayEngine, EngineError, derive};

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub join: JoinExecutionOptions,
    /// Prefix of the labels given to arrays materialized by `eval`.
    pub temp_prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            join: JoinExecutionOptions::default(),
            temp_prefix: "am_tmp_".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

/// Reference engine that keeps every array in memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    options: EngineOptions,
    calls: AtomicUsize,
    materialized: AtomicUsize,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Number of contract operations issued against this engine so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::Relaxed)
    }

    /// Register an array from rows of coordinates followed by attribute values.
    pub fn create_array(
        &self,
        label: &str,
        schema: Schema,
        rows: Vec<Vec<Value>>,
    ) -> Result<ArrayHandle, EngineError> {
        let data = ArrayData::from_rows(&schema, rows)?;
        Ok(Self::source(label, schema, data))
    }

    /// Register a one-dimensional array from attribute rows; cells are
    /// numbered from zero.
    pub fn create_array_from_attribute_rows(
        &self,
        label: &str,
        schema: Schema,
        rows: Vec<Vec<Value>>,
    ) -> Result<ArrayHandle, EngineError> {
        let data = ArrayData::from_attribute_rows(&schema, rows)?;
        Ok(Self::source(label, schema, data))
    }

    fn source(label: &str, schema: Schema, data: ArrayData) -> ArrayHandle {
        ArrayHandle::new(
            schema.with_name(Some(label.to_owned())),
            Plan::Source {
                label: label.to_owned(),
                data: Arc::new(data),
            },
        )
    }

    fn issue(&self) {
        self.calls.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn execute(&self, array: &ArrayHandle) -> Result<Arc<ArrayData>, EngineError> {
        let plan = array.plan();
        trace!(op = plan.operator(), "executing plan node");
        let out = match plan {
            Plan::Source { data, .. } => return Ok(Arc::clone(data)),
            Plan::AttributeRename { input, .. }
            | Plan::DimensionRename { input, .. }
            | Plan::Alias { input, .. } => return self.execute(input),
            Plan::Project { input, attributes } => {
                let data = self.execute(input)?;
                let columns = attributes
                    .iter()
                    .filter_map(|name| input.schema().attribute_position(name))
                    .map(|pos| data.all_columns()[pos].clone())
                    .collect();
                ArrayData::from_parts(data.all_coords().to_vec(), columns, data.len())
            }
            Plan::Sort { input } => {
                let data = self.execute(input)?;
                execute_sort(&data)
            }
            Plan::Uniq { input } => {
                let data = self.execute(input)?;
                execute_uniq(&data)
            }
            Plan::Hstack { left, right } => {
                let l = self.execute(left)?;
                let r = self.execute(right)?;
                if l.len() != r.len() {
                    return Err(EngineError::LengthMismatch {
                        left: l.len(),
                        right: r.len(),
                    });
                }
                let columns = l
                    .all_columns()
                    .iter()
                    .chain(r.all_columns())
                    .cloned()
                    .collect();
                ArrayData::from_parts(l.all_coords().to_vec(), columns, l.len())
            }
            Plan::Concat { left, right } => {
                let l = self.execute(left)?;
                let r = self.execute(right)?;
                let len = l.len() + r.len();
                let columns = l
                    .all_columns()
                    .iter()
                    .zip(r.all_columns())
                    .map(|(a, b)| a.iter().chain(b).cloned().collect())
                    .collect();
                ArrayData::from_parts(vec![dense_axis(len)], columns, len)
            }
            Plan::IndexLookup {
                input,
                index,
                key,
                options,
                ..
            } => {
                let key = derive::resolve_qualified(input.alias(), key)?;
                let key_pos = input
                    .schema()
                    .attribute_position(key)
                    .ok_or_else(|| EngineError::UnknownName {
                        name: key.to_owned(),
                        kind: "attribute",
                    })?;
                let data = self.execute(input)?;
                let index_data = self.execute(index)?;
                let surrogate =
                    execute_index_lookup(key, &data.all_columns()[key_pos], &index_data, *options)?;
                let mut columns = data.all_columns().to_vec();
                columns.push(surrogate);
                ArrayData::from_parts(data.all_coords().to_vec(), columns, data.len())
            }
            Plan::ToDimensions { input, .. } => {
                let data = self.execute(input)?;
                execute_to_dimensions(input.schema(), array.schema(), &data)
            }
            Plan::CrossJoin { left, right, pairs } => {
                let l = self.execute(left)?;
                let r = self.execute(right)?;
                let (data, join_trace) =
                    execute_cross_join(left.schema(), right.schema(), &l, &r, pairs, self.options.join);
                trace!(
                    used_arena = join_trace.used_arena,
                    output_rows = join_trace.output_rows,
                    estimated_bytes = join_trace.estimated_bytes,
                    "cross join executed"
                );
                data
            }
            Plan::Unpack { input, .. } => {
                let data = self.execute(input)?;
                execute_unpack(&data)
            }
        };
        Ok(Arc::new(out))
    }
}

fn dense_axis(len: usize) -> Vec<i64> {
    (0_i64..).take(len).collect()
}

fn compare_cells(columns: &[Vec<Value>], a: usize, b: usize) -> Ordering {
    columns
        .iter()
        .map(|c| c[a].cmp(&c[b]))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn execute_sort(data: &ArrayData) -> ArrayData {
    let mut positions: Vec<usize> = (0..data.len()).collect();
    positions.sort_by(|&a, &b| compare_cells(data.all_columns(), a, b));
    let columns = ArrayData::take_columns(data.all_columns(), &positions);
    ArrayData::from_parts(vec![dense_axis(data.len())], columns, data.len())
}

fn execute_uniq(data: &ArrayData) -> ArrayData {
    let column = data.column(0).unwrap_or_default();
    let positions: Vec<usize> = (0..column.len())
        .filter(|&pos| pos == 0 || column[pos] != column[pos - 1])
        .collect();
    let columns = ArrayData::take_columns(data.all_columns(), &positions);
    ArrayData::from_parts(vec![dense_axis(positions.len())], columns, positions.len())
}

enum KeyIndex<'a> {
    Sorted { values: &'a [Value], coords: &'a [i64] },
    Hashed(HashMap<&'a Value, i64>),
}

impl KeyIndex<'_> {
    fn find(&self, value: &Value) -> Option<i64> {
        match self {
            Self::Sorted { values, coords } => values
                .binary_search(value)
                .ok()
                .map(|pos| coords[pos]),
            Self::Hashed(map) => map.get(value).copied(),
        }
    }
}

fn execute_index_lookup(
    key: &str,
    keys: &[Value],
    index: &ArrayData,
    options: LookupOptions,
) -> Result<Vec<Value>, EngineError> {
    let values = index.column(0).unwrap_or_default();
    let coords = index.coords(0).unwrap_or_default();
    let lookup = if options.index_sorted {
        KeyIndex::Sorted { values, coords }
    } else {
        let mut map = HashMap::with_capacity(values.len());
        for (value, coord) in values.iter().zip(coords) {
            map.entry(value).or_insert(*coord);
        }
        KeyIndex::Hashed(map)
    };

    keys.iter()
        .map(|value| {
            if value.is_null() || value.is_nan() {
                return Ok(Value::Null);
            }
            lookup
                .find(value)
                .map(Value::Int64)
                .ok_or_else(|| EngineError::LookupMiss {
                    key: key.to_owned(),
                    value: value.to_string(),
                })
        })
        .collect()
}

fn execute_to_dimensions(input: &Schema, output: &Schema, data: &ArrayData) -> ArrayData {
    let promoted: Vec<usize> = output.dimensions()[input.dimensions().len()..]
        .iter()
        .filter_map(|d| input.attribute_position(&d.name))
        .collect();
    let kept: Vec<usize> = output
        .attributes()
        .iter()
        .filter_map(|a| input.attribute_position(&a.name))
        .collect();

    // Cells with a null coordinate have no place in the promoted array.
    let positions: Vec<usize> = (0..data.len())
        .filter(|&pos| {
            promoted
                .iter()
                .all(|&att| data.all_columns()[att][pos].as_i64().is_some())
        })
        .collect();

    let mut coords = ArrayData::take_coords(data.all_coords(), &positions);
    for &att in &promoted {
        let column = &data.all_columns()[att];
        coords.push(
            positions
                .iter()
                .filter_map(|&pos| column[pos].as_i64())
                .collect(),
        );
    }
    let kept_columns: Vec<Vec<Value>> = kept
        .iter()
        .map(|&att| data.all_columns()[att].clone())
        .collect();
    let columns = ArrayData::take_columns(&kept_columns, &positions);
    ArrayData::from_parts(coords, columns, positions.len())
}

fn join_key(coords: &[Vec<i64>], dims: &[usize], pos: usize) -> Vec<i64> {
    dims.iter().map(|&d| coords[d][pos]).collect()
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<usize>().saturating_mul(2))
}

fn execute_cross_join(
    left_schema: &Schema,
    right_schema: &Schema,
    left: &ArrayData,
    right: &ArrayData,
    pairs: &[(String, String)],
    options: JoinExecutionOptions,
) -> (ArrayData, JoinExecutionTrace) {
    let left_dims: Vec<usize> = pairs
        .iter()
        .filter_map(|(l, _)| left_schema.dimension_position(l))
        .collect();
    let right_dims: Vec<usize> = pairs
        .iter()
        .filter_map(|(_, r)| right_schema.dimension_position(r))
        .collect();

    let mut right_map = HashMap::<Vec<i64>, Vec<usize>>::new();
    for pos in 0..right.len() {
        right_map
            .entry(join_key(right.all_coords(), &right_dims, pos))
            .or_default()
            .push(pos);
    }

    let output_rows: usize = (0..left.len())
        .filter_map(|pos| right_map.get(&join_key(left.all_coords(), &left_dims, pos)))
        .map(Vec::len)
        .sum();
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let joined_right: BTreeSet<usize> = right_dims.iter().copied().collect();
    let ctx = JoinInputs {
        left,
        right,
        left_dims: &left_dims,
        right_map: &right_map,
        right_kept_dims: (0..right.all_coords().len())
            .filter(|d| !joined_right.contains(d))
            .collect(),
        output_rows,
    };
    let data = if use_arena {
        cross_join_with_arena(&ctx)
    } else {
        cross_join_with_global_allocator(&ctx)
    };

    (
        data,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    )
}

struct JoinInputs<'a> {
    left: &'a ArrayData,
    right: &'a ArrayData,
    left_dims: &'a [usize],
    right_map: &'a HashMap<Vec<i64>, Vec<usize>>,
    right_kept_dims: Vec<usize>,
    output_rows: usize,
}

impl JoinInputs<'_> {
    fn matches(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.left.len()).flat_map(move |left_pos| {
            self.right_map
                .get(&join_key(self.left.all_coords(), self.left_dims, left_pos))
                .into_iter()
                .flatten()
                .map(move |&right_pos| (left_pos, right_pos))
        })
    }

    fn assemble(&self, left_positions: &[usize], right_positions: &[usize]) -> ArrayData {
        let mut coords = ArrayData::take_coords(self.left.all_coords(), left_positions);
        for &dim in &self.right_kept_dims {
            let column = &self.right.all_coords()[dim];
            coords.push(right_positions.iter().map(|&p| column[p]).collect());
        }
        let mut columns = ArrayData::take_columns(self.left.all_columns(), left_positions);
        columns.extend(ArrayData::take_columns(
            self.right.all_columns(),
            right_positions,
        ));
        ArrayData::from_parts(coords, columns, left_positions.len())
    }
}

fn cross_join_with_global_allocator(inputs: &JoinInputs<'_>) -> ArrayData {
    let mut left_positions = Vec::with_capacity(inputs.output_rows);
    let mut right_positions = Vec::with_capacity(inputs.output_rows);
    for (l, r) in inputs.matches() {
        left_positions.push(l);
        right_positions.push(r);
    }
    inputs.assemble(&left_positions, &right_positions)
}

fn cross_join_with_arena(inputs: &JoinInputs<'_>) -> ArrayData {
    let arena = Bump::new();
    let mut left_positions = BumpVec::<usize>::with_capacity_in(inputs.output_rows, &arena);
    let mut right_positions = BumpVec::<usize>::with_capacity_in(inputs.output_rows, &arena);
    for (l, r) in inputs.matches() {
        left_positions.push(l);
        right_positions.push(r);
    }
    inputs.assemble(left_positions.as_slice(), right_positions.as_slice())
}

fn execute_unpack(data: &ArrayData) -> ArrayData {
    let coords = data.all_coords();
    let mut positions: Vec<usize> = (0..data.len()).collect();
    positions.sort_by(|&a, &b| {
        coords
            .iter()
            .map(|c| c[a].cmp(&c[b]))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    let mut columns: Vec<Vec<Value>> = coords
        .iter()
        .map(|c| positions.iter().map(|&p| Value::Int64(c[p])).collect())
        .collect();
    columns.extend(ArrayData::take_columns(data.all_columns(), &positions));
    ArrayData::from_parts(vec![dense_axis(data.len())], columns, data.len())
}

impl ArrayEngine for MemoryEngine {
    fn project(
        &self,
        array: &ArrayHandle,
        attributes: &[String],
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::project(array.schema(), attributes)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Project {
                input: array.clone(),
                attributes: attributes.to_vec(),
            },
        ))
    }

    fn sort(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::sort(array.schema())?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Sort {
                input: array.clone(),
            },
        ))
    }

    fn uniq(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::uniq(array.schema())?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Uniq {
                input: array.clone(),
            },
        ))
    }

    fn hstack(&self, left: &ArrayHandle, right: &ArrayHandle) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::hstack(left.schema(), right.schema())?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Hstack {
                left: left.clone(),
                right: right.clone(),
            },
        ))
    }

    fn concat(&self, left: &ArrayHandle, right: &ArrayHandle) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::concat(left.schema(), right.schema())?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Concat {
                left: left.clone(),
                right: right.clone(),
            },
        ))
    }

    fn attribute_rename(
        &self,
        array: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::attribute_rename(array.schema(), pairs)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::AttributeRename {
                input: array.clone(),
                pairs: pairs.to_vec(),
            },
        ))
    }

    fn dimension_rename(
        &self,
        array: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::dimension_rename(array.schema(), pairs)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::DimensionRename {
                input: array.clone(),
                pairs: pairs.to_vec(),
            },
        ))
    }

    fn alias(&self, array: &ArrayHandle, alias: &str) -> Result<ArrayHandle, EngineError> {
        self.issue();
        Ok(ArrayHandle::new(
            array.schema().clone(),
            Plan::Alias {
                input: array.clone(),
                alias: alias.to_owned(),
            },
        ))
    }

    fn index_lookup(
        &self,
        input: &ArrayHandle,
        index: &ArrayHandle,
        key: &str,
        output: &str,
        options: LookupOptions,
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema =
            derive::index_lookup(input.schema(), input.alias(), index.schema(), key, output)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::IndexLookup {
                input: input.clone(),
                index: index.clone(),
                key: key.to_owned(),
                output: output.to_owned(),
                options,
            },
        ))
    }

    fn to_dimensions(
        &self,
        array: &ArrayHandle,
        names: &[String],
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::to_dimensions(array.schema(), names)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::ToDimensions {
                input: array.clone(),
                names: names.to_vec(),
            },
        ))
    }

    fn cross_join(
        &self,
        left: &ArrayHandle,
        right: &ArrayHandle,
        pairs: &[(String, String)],
    ) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::cross_join(left.schema(), right.schema(), pairs)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::CrossJoin {
                left: left.clone(),
                right: right.clone(),
                pairs: pairs.to_vec(),
            },
        ))
    }

    fn unpack(&self, array: &ArrayHandle, dimension: &str) -> Result<ArrayHandle, EngineError> {
        self.issue();
        let schema = derive::unpack(array.schema(), dimension)?;
        Ok(ArrayHandle::new(
            schema,
            Plan::Unpack {
                input: array.clone(),
                dimension: dimension.to_owned(),
            },
        ))
    }

    fn eval(&self, array: &ArrayHandle) -> Result<ArrayHandle, EngineError> {
        self.issue();
        if matches!(array.plan(), Plan::Source { .. }) {
            return Ok(array.clone());
        }
        let data = self.execute(array)?;
        let id = self.materialized.fetch_add(1, AtomicOrdering::Relaxed);
        let label = format!("{}{id}", self.options.temp_prefix);
        debug!(
            label = %label,
            rows = data.len(),
            query = %array.to_afl(),
            "materialized array"
        );
        Ok(ArrayHandle::new(
            array.schema().clone(),
            Plan::Source { label, data },
        ))
    }

    fn fetch(&self, array: &ArrayHandle) -> Result<Arc<ArrayData>, EngineError> {
        self.issue();
        self.execute(array)
    }

    fn new_attribute_label(&self, hint: &str, arrays: &[&ArrayHandle]) -> String {
        self.issue();
        let schemas: Vec<&Schema> = arrays.iter().map(|a| a.schema()).collect();
        am_schema::new_attribute_label(hint, &schemas)
    }
}

#[cfg(test)]
mod tests {
    use am_schema::Schema;
    use am_types::Value;

    use super::{
        EngineOptions, JoinExecutionOptions, MemoryEngine, execute_cross_join,
    };
    use crate::{ArrayEngine, EngineError, LookupOptions};

    fn schema(text: &str) -> Schema {
        text.parse().expect("schema")
    }

    fn strings(values: &[&str]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![Value::from(*v)]).collect()
    }

    #[test]
    fn sort_then_uniq_yields_sorted_distinct_values() {
        let engine = MemoryEngine::new();
        let keys = engine
            .create_array_from_attribute_rows("keys", schema("<k:string>[i]"), strings(&["b", "a", "b", "c", "a"]))
            .expect("keys");
        let idx = engine
            .uniq(&engine.sort(&keys).expect("sort"))
            .expect("uniq");
        assert_eq!(idx.dim_names(), vec!["i"]);
        let data = engine.fetch(&idx).expect("fetch");
        assert_eq!(data.attribute_rows(), strings(&["a", "b", "c"]));
        assert_eq!(data.coords(0), Some(&[0_i64, 1, 2][..]));
    }

    #[test]
    fn sort_avoids_dimension_name_taken_by_attribute() {
        let engine = MemoryEngine::new();
        let array = engine
            .create_array_from_attribute_rows("a", schema("<n:int64>[i]"), vec![vec![2.into()]])
            .expect("array");
        let sorted = engine.sort(&array).expect("sort");
        assert_eq!(sorted.dim_names(), vec!["n_1"]);
    }

    #[test]
    fn concat_appends_cells_and_checks_types() {
        let engine = MemoryEngine::new();
        let a = engine
            .create_array_from_attribute_rows("a", schema("<k:string>[i]"), strings(&["x"]))
            .expect("a");
        let b = engine
            .create_array_from_attribute_rows("b", schema("<k:string>[j]"), strings(&["y", "z"]))
            .expect("b");
        let both = engine.concat(&a, &b).expect("concat");
        let data = engine.fetch(&both).expect("fetch");
        assert_eq!(data.attribute_rows(), strings(&["x", "y", "z"]));

        let c = engine
            .create_array_from_attribute_rows("c", schema("<k:int64>[i]"), vec![vec![1.into()]])
            .expect("c");
        let err = engine.concat(&a, &c).expect_err("type mismatch");
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn hstack_requires_equal_lengths_at_evaluation() {
        let engine = MemoryEngine::new();
        let a = engine
            .create_array_from_attribute_rows("a", schema("<x:string>[i]"), strings(&["p", "q"]))
            .expect("a");
        let b = engine
            .create_array_from_attribute_rows("b", schema("<y:string>[i]"), strings(&["r", "s"]))
            .expect("b");
        let stacked = engine.hstack(&a, &b).expect("hstack");
        assert_eq!(stacked.att_names(), vec!["x", "y"]);
        assert_eq!(
            engine.fetch(&stacked).expect("fetch").attribute_rows(),
            vec![
                vec![Value::from("p"), Value::from("r")],
                vec![Value::from("q"), Value::from("s")],
            ]
        );

        let short = engine
            .create_array_from_attribute_rows("c", schema("<z:string>[i]"), strings(&["t"]))
            .expect("c");
        let lazy = engine.hstack(&a, &short).expect("schema is fine");
        assert_eq!(
            engine.fetch(&lazy).expect_err("length"),
            EngineError::LengthMismatch { left: 2, right: 1 }
        );
    }

    #[test]
    fn renames_reject_unknown_and_colliding_names() {
        let engine = MemoryEngine::new();
        let a = engine
            .create_array_from_attribute_rows("a", schema("<x:int64, y:int64>[i]"), vec![vec![1.into(), 2.into()]])
            .expect("a");
        let err = engine
            .attribute_rename(&a, &[("nope".to_owned(), "z".to_owned())])
            .expect_err("unknown");
        assert!(matches!(err, EngineError::UnknownName { .. }));
        let err = engine
            .attribute_rename(&a, &[("x".to_owned(), "y".to_owned())])
            .expect_err("collision");
        assert!(matches!(err, EngineError::Schema(_)));
        let err = engine
            .dimension_rename(&a, &[("i".to_owned(), "x".to_owned())])
            .expect_err("collision with attribute");
        assert!(matches!(err, EngineError::Schema(_)));
        let swapped = engine
            .attribute_rename(
                &a,
                &[("x".to_owned(), "y".to_owned()), ("y".to_owned(), "x".to_owned())],
            )
            .expect("simultaneous swap");
        assert_eq!(swapped.att_names(), vec!["y", "x"]);
    }

    #[test]
    fn index_lookup_maps_values_to_index_coordinates() {
        let engine = MemoryEngine::new();
        let input = engine
            .create_array_from_attribute_rows(
                "input",
                schema("<k:string>[i]"),
                vec![vec!["b".into()], vec![Value::Null], vec!["a".into()]],
            )
            .expect("input");
        let idx = engine
            .create_array_from_attribute_rows("idx", schema("<k:string>[i]"), strings(&["a", "b"]))
            .expect("idx");

        for index_sorted in [true, false] {
            let aliased = engine.alias(&input, "L").expect("alias");
            let looked_up = engine
                .index_lookup(&aliased, &idx, "L.k", "k_idx", LookupOptions { index_sorted })
                .expect("lookup");
            assert_eq!(looked_up.att_names(), vec!["k", "k_idx"]);
            let data = engine.fetch(&looked_up).expect("fetch");
            assert_eq!(
                data.column(1).expect("k_idx"),
                &[Value::Int64(1), Value::Null, Value::Int64(0)]
            );
        }

        let err = engine
            .index_lookup(&input, &idx, "R.k", "k_idx", LookupOptions::default())
            .expect_err("unknown alias");
        assert_eq!(
            err,
            EngineError::UnknownAlias {
                alias: "R".to_owned()
            }
        );
    }

    #[test]
    fn index_lookup_folds_signed_zero_and_nulls_out_nan() {
        let engine = MemoryEngine::new();
        let input = engine
            .create_array_from_attribute_rows(
                "input",
                schema("<k:double>[i]"),
                vec![vec![(-0.0).into()], vec![f64::NAN.into()]],
            )
            .expect("input");
        let idx = engine
            .create_array_from_attribute_rows(
                "idx",
                schema("<k:double>[i]"),
                vec![vec![0.0.into()], vec![f64::NAN.into()]],
            )
            .expect("idx");

        for index_sorted in [true, false] {
            let looked_up = engine
                .index_lookup(&input, &idx, "k", "k_idx", LookupOptions { index_sorted })
                .expect("lookup");
            let data = engine.fetch(&looked_up).expect("fetch");
            assert_eq!(data.column(1).expect("k_idx"), &[Value::Int64(0), Value::Null]);
        }
    }

    #[test]
    fn index_lookup_reports_missing_values_on_evaluation() {
        let engine = MemoryEngine::new();
        let input = engine
            .create_array_from_attribute_rows("input", schema("<k:string>[i]"), strings(&["zz"]))
            .expect("input");
        let idx = engine
            .create_array_from_attribute_rows("idx", schema("<k:string>[i]"), strings(&["a"]))
            .expect("idx");
        let looked_up = engine
            .index_lookup(&input, &idx, "k", "k_idx", LookupOptions { index_sorted: true })
            .expect("schema is fine");
        let err = engine.fetch(&looked_up).expect_err("miss");
        assert!(matches!(err, EngineError::LookupMiss { .. }));
    }

    #[test]
    fn to_dimensions_promotes_integers_and_drops_null_coordinates() {
        let engine = MemoryEngine::new();
        let array = engine
            .create_array_from_attribute_rows(
                "a",
                schema("<id:int64, v:string>[i]"),
                vec![
                    vec![7.into(), "x".into()],
                    vec![Value::Null, "y".into()],
                ],
            )
            .expect("array");
        let promoted = engine
            .to_dimensions(&array, &["id".to_owned(), "i".to_owned()])
            .expect("promote");
        assert_eq!(promoted.dim_names(), vec!["i", "id"]);
        assert_eq!(promoted.att_names(), vec!["v"]);
        let data = engine.fetch(&promoted).expect("fetch");
        assert_eq!(data.rows(), vec![vec![0.into(), 7.into(), "x".into()]]);

        let err = engine
            .to_dimensions(&array, &["v".to_owned()])
            .expect_err("string");
        assert!(matches!(err, EngineError::NotIntegerLike { .. }));
    }

    #[test]
    fn cross_join_pairs_matching_coordinates_and_unpack_flattens() {
        let engine = MemoryEngine::new();
        let left = engine
            .create_array("l", schema("<v:string>[i; id]"), vec![
                vec![0.into(), 1.into(), "a".into()],
                vec![1.into(), 2.into(), "b".into()],
            ])
            .expect("left");
        let right = engine
            .create_array("r", schema("<w:string>[j; rid]"), vec![
                vec![0.into(), 1.into(), "x".into()],
                vec![1.into(), 1.into(), "y".into()],
                vec![2.into(), 3.into(), "z".into()],
            ])
            .expect("right");
        let joined = engine
            .cross_join(&left, &right, &[("id".to_owned(), "rid".to_owned())])
            .expect("join");
        assert_eq!(joined.dim_names(), vec!["i", "id", "j"]);
        assert_eq!(joined.att_names(), vec!["v", "w"]);

        let flat = engine.unpack(&joined, "row").expect("unpack");
        assert_eq!(flat.dim_names(), vec!["row"]);
        assert_eq!(flat.att_names(), vec!["i", "id", "j", "v", "w"]);
        let data = engine.fetch(&flat).expect("fetch");
        assert_eq!(
            data.attribute_rows(),
            vec![
                vec![0.into(), 1.into(), 0.into(), "a".into(), "x".into()],
                vec![0.into(), 1.into(), 1.into(), "a".into(), "y".into()],
            ]
        );
    }

    #[test]
    fn arena_join_matches_global_allocator_and_falls_back_over_budget() {
        let engine = MemoryEngine::new();
        let left = engine
            .create_array("l", schema("<v:int64>[k]"), vec![
                vec![1.into(), 10.into()],
                vec![2.into(), 20.into()],
            ])
            .expect("left");
        let right = engine
            .create_array("r", schema("<w:int64>[m; k2]"), vec![
                vec![0.into(), 1.into(), 100.into()],
                vec![1.into(), 1.into(), 200.into()],
            ])
            .expect("right");
        let l = engine.fetch(&left).expect("l");
        let r = engine.fetch(&right).expect("r");
        let pairs = [("k".to_owned(), "k2".to_owned())];

        let (arena, arena_trace) = execute_cross_join(
            left.schema(),
            right.schema(),
            &l,
            &r,
            &pairs,
            JoinExecutionOptions::default(),
        );
        let (global, global_trace) = execute_cross_join(
            left.schema(),
            right.schema(),
            &l,
            &r,
            &pairs,
            JoinExecutionOptions {
                use_arena: true,
                arena_budget_bytes: 1,
            },
        );
        assert!(arena_trace.used_arena);
        assert!(!global_trace.used_arena);
        assert_eq!(arena_trace.output_rows, 2);
        assert_eq!(arena, global);
    }

    #[test]
    fn eval_materializes_under_a_fresh_label() {
        let engine = MemoryEngine::with_options(EngineOptions {
            temp_prefix: "tmp".to_owned(),
            ..EngineOptions::default()
        });
        let keys = engine
            .create_array_from_attribute_rows("keys", schema("<k:string>[i]"), strings(&["b", "a"]))
            .expect("keys");
        let sorted = engine.sort(&keys).expect("sort");
        assert_eq!(sorted.to_afl(), "sort(keys)");
        let first = engine.eval(&sorted).expect("eval");
        let second = engine.eval(&sorted).expect("eval");
        assert_eq!(first.to_afl(), "tmp0");
        assert_eq!(second.to_afl(), "tmp1");
        assert_eq!(engine.calls(), 3);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"join": {"use_arena": false}}"#).expect("json");
        assert!(!options.join.use_arena);
        assert_eq!(options.join.arena_budget_bytes, super::DEFAULT_ARENA_BUDGET_BYTES);
        assert_eq!(options.temp_prefix, "am_tmp_");
    }
}
