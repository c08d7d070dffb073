//! Output schemas of each operator. Every rule validates its inputs so that
//! name and type errors surface when the plan is built, not when it runs.

use std::collections::{BTreeMap, BTreeSet};

use am_schema::{Attribute, Dimension, Schema};
use am_types::AttrType;

use crate::EngineError;

fn unknown(name: &str, kind: &'static str) -> EngineError {
    EngineError::UnknownName {
        name: name.to_owned(),
        kind,
    }
}

fn rebuild(
    schema: &Schema,
    attributes: Vec<Attribute>,
    dimensions: Vec<Dimension>,
) -> Result<Schema, EngineError> {
    Ok(Schema::new(
        schema.name().map(str::to_owned),
        attributes,
        dimensions,
    )?)
}

pub(crate) fn project(schema: &Schema, names: &[String]) -> Result<Schema, EngineError> {
    let mut seen = BTreeSet::new();
    let mut attributes = Vec::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(EngineError::InvalidOperand {
                op: "project",
                reason: format!("attribute {name} listed twice"),
            });
        }
        let attribute = schema
            .attribute(name)
            .ok_or_else(|| unknown(name, "attribute"))?;
        attributes.push(attribute.clone());
    }
    rebuild(schema, attributes, schema.dimensions().to_vec())
}

/// Replace the dimensions by one dense row axis named `dim`, or `dim_1`,
/// `dim_2`, ... when an attribute already uses the name.
fn row_axis_schema(schema: &Schema, dim: &str) -> Result<Schema, EngineError> {
    let taken: BTreeSet<String> = schema.att_names().into_iter().collect();
    let mut name = dim.to_owned();
    let mut count = 1;
    while taken.contains(&name) {
        name = format!("{dim}_{count}");
        count += 1;
    }
    rebuild(
        schema,
        schema.attributes().to_vec(),
        vec![Dimension::row_axis(name)],
    )
}

pub(crate) fn sort(schema: &Schema) -> Result<Schema, EngineError> {
    if schema.attributes().is_empty() {
        return Err(EngineError::InvalidOperand {
            op: "sort",
            reason: "nothing to sort: no attributes".to_owned(),
        });
    }
    row_axis_schema(schema, "n")
}

pub(crate) fn uniq(schema: &Schema) -> Result<Schema, EngineError> {
    if schema.attributes().len() != 1 {
        return Err(EngineError::InvalidOperand {
            op: "uniq",
            reason: format!(
                "expected exactly one attribute, found {}",
                schema.attributes().len()
            ),
        });
    }
    row_axis_schema(schema, "i")
}

fn require_single_dimension(op: &'static str, schema: &Schema) -> Result<(), EngineError> {
    if schema.dimensions().len() == 1 {
        Ok(())
    } else {
        Err(EngineError::InvalidOperand {
            op,
            reason: format!(
                "expected a one-dimensional array, found {} dimensions",
                schema.dimensions().len()
            ),
        })
    }
}

pub(crate) fn hstack(left: &Schema, right: &Schema) -> Result<Schema, EngineError> {
    require_single_dimension("hstack", left)?;
    require_single_dimension("hstack", right)?;
    let attributes = left
        .attributes()
        .iter()
        .chain(right.attributes())
        .cloned()
        .collect();
    rebuild(left, attributes, left.dimensions().to_vec())
}

pub(crate) fn concat(left: &Schema, right: &Schema) -> Result<Schema, EngineError> {
    require_single_dimension("concat", left)?;
    require_single_dimension("concat", right)?;
    if left.attributes().len() != right.attributes().len() {
        return Err(EngineError::InvalidOperand {
            op: "concat",
            reason: format!(
                "attribute counts differ: {} vs {}",
                left.attributes().len(),
                right.attributes().len()
            ),
        });
    }
    let mut attributes = Vec::with_capacity(left.attributes().len());
    for (l, r) in left.attributes().iter().zip(right.attributes()) {
        if l.name != r.name {
            return Err(EngineError::InvalidOperand {
                op: "concat",
                reason: format!("attribute names differ: {} vs {}", l.name, r.name),
            });
        }
        if l.attr_type != r.attr_type {
            return Err(EngineError::TypeMismatch {
                name: l.name.clone(),
                left: l.attr_type,
                right: r.attr_type,
            });
        }
        let mut merged = l.clone();
        merged.not_null = l.not_null && r.not_null;
        attributes.push(merged);
    }
    let dims = vec![Dimension::row_axis(left.dimensions()[0].name.clone())];
    rebuild(left, attributes, dims)
}

fn rename_map(
    pairs: &[(String, String)],
    exists: impl Fn(&str) -> bool,
    kind: &'static str,
) -> Result<BTreeMap<String, String>, EngineError> {
    let mut map = BTreeMap::new();
    for (old, new) in pairs {
        if !exists(old) {
            return Err(unknown(old, kind));
        }
        if map.insert(old.clone(), new.clone()).is_some() {
            return Err(EngineError::InvalidOperand {
                op: "rename",
                reason: format!("{kind} {old} renamed twice"),
            });
        }
    }
    Ok(map)
}

pub(crate) fn attribute_rename(
    schema: &Schema,
    pairs: &[(String, String)],
) -> Result<Schema, EngineError> {
    let map = rename_map(pairs, |n| schema.is_attribute(n), "attribute")?;
    let attributes = schema
        .attributes()
        .iter()
        .map(|a| {
            let mut a = a.clone();
            if let Some(new) = map.get(&a.name) {
                a.name = new.clone();
            }
            a
        })
        .collect();
    rebuild(schema, attributes, schema.dimensions().to_vec())
}

pub(crate) fn dimension_rename(
    schema: &Schema,
    pairs: &[(String, String)],
) -> Result<Schema, EngineError> {
    let map = rename_map(pairs, |n| schema.is_dimension(n), "dimension")?;
    let dimensions = schema
        .dimensions()
        .iter()
        .map(|d| {
            let mut d = d.clone();
            if let Some(new) = map.get(&d.name) {
                d.name = new.clone();
            }
            d
        })
        .collect();
    rebuild(schema, schema.attributes().to_vec(), dimensions)
}

/// Strip an `alias.` qualifier, checking it against the input's alias.
pub(crate) fn resolve_qualified<'a>(
    alias: Option<&str>,
    name: &'a str,
) -> Result<&'a str, EngineError> {
    match name.split_once('.') {
        Some((qualifier, bare)) if Some(qualifier) == alias => Ok(bare),
        Some((qualifier, _)) => Err(EngineError::UnknownAlias {
            alias: qualifier.to_owned(),
        }),
        None => Ok(name),
    }
}

pub(crate) fn index_lookup(
    input: &Schema,
    input_alias: Option<&str>,
    index: &Schema,
    key: &str,
    output: &str,
) -> Result<Schema, EngineError> {
    let key = resolve_qualified(input_alias, key)?;
    let key_attr = input
        .attribute(key)
        .ok_or_else(|| unknown(key, "attribute"))?;
    require_single_dimension("index_lookup", index)?;
    let [index_attr] = index.attributes() else {
        return Err(EngineError::InvalidOperand {
            op: "index_lookup",
            reason: format!(
                "index must have exactly one attribute, found {}",
                index.attributes().len()
            ),
        });
    };
    if index_attr.attr_type != key_attr.attr_type {
        return Err(EngineError::TypeMismatch {
            name: key.to_owned(),
            left: key_attr.attr_type,
            right: index_attr.attr_type,
        });
    }
    let mut attributes = input.attributes().to_vec();
    attributes.push(Attribute::new(output, AttrType::Int64));
    rebuild(input, attributes, input.dimensions().to_vec())
}

pub(crate) fn to_dimensions(schema: &Schema, names: &[String]) -> Result<Schema, EngineError> {
    let mut promoted = Vec::new();
    for name in names {
        if schema.is_dimension(name) || promoted.contains(name) {
            continue;
        }
        let attribute = schema
            .attribute(name)
            .ok_or_else(|| unknown(name, "name"))?;
        if !attribute.attr_type.is_integer_like() {
            return Err(EngineError::NotIntegerLike {
                name: name.clone(),
                attr_type: attribute.attr_type,
            });
        }
        promoted.push(name.clone());
    }
    let attributes = schema
        .attributes()
        .iter()
        .filter(|a| !promoted.contains(&a.name))
        .cloned()
        .collect();
    let dimensions = schema
        .dimensions()
        .iter()
        .cloned()
        .chain(promoted.iter().map(Dimension::new))
        .collect();
    rebuild(schema, attributes, dimensions)
}

pub(crate) fn cross_join(
    left: &Schema,
    right: &Schema,
    pairs: &[(String, String)],
) -> Result<Schema, EngineError> {
    let mut joined_right = BTreeSet::new();
    for (l, r) in pairs {
        if !left.is_dimension(l) {
            return Err(unknown(l, "dimension"));
        }
        if !right.is_dimension(r) {
            return Err(unknown(r, "dimension"));
        }
        joined_right.insert(r.as_str());
    }
    let dimensions = left
        .dimensions()
        .iter()
        .chain(
            right
                .dimensions()
                .iter()
                .filter(|d| !joined_right.contains(d.name.as_str())),
        )
        .cloned()
        .collect();
    let attributes = left
        .attributes()
        .iter()
        .chain(right.attributes())
        .cloned()
        .collect();
    Ok(Schema::new(None, attributes, dimensions)?)
}

pub(crate) fn unpack(schema: &Schema, dimension: &str) -> Result<Schema, EngineError> {
    let attributes = schema
        .dims_as_attributes()
        .into_iter()
        .chain(schema.attributes().iter().cloned())
        .collect();
    Ok(Schema::new(
        schema.name().map(str::to_owned),
        attributes,
        vec![Dimension::row_axis(dimension)],
    )?)
}
