use am_schema::Schema;
use am_types::Value;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Materialized cells of an array, stored column by column.
///
/// Every cell has one coordinate per dimension and one value per attribute;
/// all vectors have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    coords: Vec<Vec<i64>>,
    columns: Vec<Vec<Value>>,
    len: usize,
}

impl ArrayData {
    /// Build from per-dimension coordinates and per-attribute values,
    /// checking shape and value types against `schema`.
    pub fn new(
        schema: &Schema,
        coords: Vec<Vec<i64>>,
        columns: Vec<Vec<Value>>,
    ) -> Result<Self, EngineError> {
        if coords.len() != schema.dimensions().len() || columns.len() != schema.attributes().len()
        {
            return Err(EngineError::InvalidOperand {
                op: "build",
                reason: format!(
                    "schema has {} dimensions and {} attributes but data has {} and {}",
                    schema.dimensions().len(),
                    schema.attributes().len(),
                    coords.len(),
                    columns.len()
                ),
            });
        }
        let len = coords.first().map_or(0, Vec::len);
        for len_other in coords
            .iter()
            .map(Vec::len)
            .chain(columns.iter().map(Vec::len))
        {
            if len_other != len {
                return Err(EngineError::LengthMismatch {
                    left: len,
                    right: len_other,
                });
            }
        }
        for (attribute, column) in schema.attributes().iter().zip(&columns) {
            for value in column {
                value.check_conforms(attribute.attr_type, attribute.not_null)?;
            }
        }
        Ok(Self {
            coords,
            columns,
            len,
        })
    }

    /// Build from rows laid out as dimension coordinates followed by
    /// attribute values, the same order `unpack` produces.
    pub fn from_rows(schema: &Schema, rows: Vec<Vec<Value>>) -> Result<Self, EngineError> {
        let ndims = schema.dimensions().len();
        let natts = schema.attributes().len();
        let mut coords = vec![Vec::with_capacity(rows.len()); ndims];
        let mut columns = vec![Vec::with_capacity(rows.len()); natts];

        for row in rows {
            if row.len() != ndims + natts {
                return Err(EngineError::LengthMismatch {
                    left: ndims + natts,
                    right: row.len(),
                });
            }
            let mut values = row.into_iter();
            for (dim, coord) in schema.dimensions().iter().zip(coords.iter_mut()) {
                let value = values.next().unwrap_or(Value::Null);
                let Some(v) = value.as_i64() else {
                    return Err(EngineError::InvalidOperand {
                        op: "build",
                        reason: format!("dimension {} needs an integer, got {value}", dim.name),
                    });
                };
                coord.push(v);
            }
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }
        Self::new(schema, coords, columns)
    }

    /// Build a one-dimensional array from attribute rows, numbering cells
    /// from zero along the single dimension.
    pub fn from_attribute_rows(schema: &Schema, rows: Vec<Vec<Value>>) -> Result<Self, EngineError> {
        if schema.dimensions().len() != 1 {
            return Err(EngineError::InvalidOperand {
                op: "build",
                reason: "attribute rows need a one-dimensional schema".to_owned(),
            });
        }
        let rows = rows
            .into_iter()
            .zip(0_i64..)
            .map(|(row, coord)| {
                let mut full = Vec::with_capacity(row.len() + 1);
                full.push(Value::Int64(coord));
                full.extend(row);
                full
            })
            .collect();
        Self::from_rows(schema, rows)
    }

    pub(crate) fn from_parts(coords: Vec<Vec<i64>>, columns: Vec<Vec<Value>>, len: usize) -> Self {
        Self {
            coords,
            columns,
            len,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn coords(&self, dimension: usize) -> Option<&[i64]> {
        self.coords.get(dimension).map(Vec::as_slice)
    }

    #[must_use]
    pub fn column(&self, attribute: usize) -> Option<&[Value]> {
        self.columns.get(attribute).map(Vec::as_slice)
    }

    pub(crate) fn all_coords(&self) -> &[Vec<i64>] {
        &self.coords
    }

    pub(crate) fn all_columns(&self) -> &[Vec<Value>] {
        &self.columns
    }

    /// One cell as coordinates followed by attribute values.
    #[must_use]
    pub fn row(&self, position: usize) -> Option<Vec<Value>> {
        if position >= self.len {
            return None;
        }
        let dims = self.coords.iter().map(|c| Value::Int64(c[position]));
        let atts = self.columns.iter().map(|c| c[position].clone());
        Some(dims.chain(atts).collect())
    }

    #[must_use]
    pub fn rows(&self) -> Vec<Vec<Value>> {
        (0..self.len).filter_map(|pos| self.row(pos)).collect()
    }

    /// Attribute values of every cell, without coordinates.
    #[must_use]
    pub fn attribute_rows(&self) -> Vec<Vec<Value>> {
        (0..self.len)
            .map(|pos| self.columns.iter().map(|c| c[pos].clone()).collect())
            .collect()
    }

    pub(crate) fn take_columns(columns: &[Vec<Value>], positions: &[usize]) -> Vec<Vec<Value>> {
        columns
            .iter()
            .map(|c| positions.iter().map(|&p| c[p].clone()).collect())
            .collect()
    }

    pub(crate) fn take_coords(coords: &[Vec<i64>], positions: &[usize]) -> Vec<Vec<i64>> {
        coords
            .iter()
            .map(|c| positions.iter().map(|&p| c[p]).collect())
            .collect()
    }
}
