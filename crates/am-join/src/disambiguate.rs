use std::collections::BTreeMap;

use am_engine::{ArrayEngine, ArrayHandle};

use crate::JoinError;

/// Inputs rewritten so that no name appears on both sides.
#[derive(Debug, Clone)]
pub struct Disambiguated {
    pub left: ArrayHandle,
    pub right: ArrayHandle,
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    /// Names that were present on both sides before suffixing.
    pub duplicates: Vec<String>,
}

fn suffix_map(duplicates: &[String], suffix: &str) -> BTreeMap<String, String> {
    duplicates
        .iter()
        .map(|name| (name.clone(), format!("{name}{suffix}")))
        .collect()
}

fn renamed<'a>(map: &'a BTreeMap<String, String>, name: &'a str) -> &'a str {
    map.get(name).map_or(name, String::as_str)
}

/// `(original, renamed)` for every dimension and attribute of `array`.
fn renamed_names(array: &ArrayHandle, map: &BTreeMap<String, String>) -> Vec<(String, String)> {
    array
        .dim_names()
        .into_iter()
        .chain(array.att_names())
        .map(|name| {
            let new = renamed(map, &name).to_owned();
            (name, new)
        })
        .collect()
}

/// Rejects renames that would make two names equal, within a side or
/// across sides.
fn check_collisions(
    left: &[(String, String)],
    right: &[(String, String)],
) -> Result<(), JoinError> {
    let collision = |a: &(String, String), b: &(String, String)| {
        let (name, renamed) = if a.0 != a.1 { a } else { b };
        JoinError::SuffixCollision {
            name: name.clone(),
            renamed: renamed.clone(),
        }
    };

    let mut seen: BTreeMap<&str, &(String, String)> = BTreeMap::new();
    for side in [left, right] {
        let mut own: BTreeMap<&str, &(String, String)> = BTreeMap::new();
        for entry in side {
            if let Some(prior) = own.insert(entry.1.as_str(), entry) {
                return Err(collision(entry, prior));
            }
            if let Some(prior) = seen.get(entry.1.as_str()).copied() {
                return Err(collision(entry, prior));
            }
        }
        seen.extend(own);
    }
    Ok(())
}

fn relabel<E: ArrayEngine + ?Sized>(
    engine: &E,
    array: &ArrayHandle,
    map: &BTreeMap<String, String>,
) -> Result<ArrayHandle, JoinError> {
    let pairs_for = |names: Vec<String>| -> Vec<(String, String)> {
        names
            .into_iter()
            .filter_map(|name| map.get(&name).map(|new| (name, new.clone())))
            .collect()
    };

    // A name is either an attribute or a dimension, so the two renames are disjoint.
    let mut out = array.clone();
    let attribute_pairs = pairs_for(array.att_names());
    if !attribute_pairs.is_empty() {
        out = engine.attribute_rename(&out, &attribute_pairs)?;
    }
    let dimension_pairs = pairs_for(array.dim_names());
    if !dimension_pairs.is_empty() {
        out = engine.dimension_rename(&out, &dimension_pairs)?;
    }
    Ok(out)
}

/// Suffix every name present on both sides: `suffixes.0` on the left,
/// `suffixes.1` on the right.
///
/// Duplicates are decided on the names as given, before any suffix is
/// applied, and the key lists go through the same renames as the arrays, so
/// a key is never suffixed twice and always names a column that exists.
/// A pair without shared names is returned as is, without engine calls.
pub fn disambiguate<E: ArrayEngine + ?Sized>(
    engine: &E,
    left: &ArrayHandle,
    right: &ArrayHandle,
    left_on: &[String],
    right_on: &[String],
    suffixes: (&str, &str),
) -> Result<Disambiguated, JoinError> {
    let duplicates: Vec<String> = left.names().intersection(&right.names()).cloned().collect();
    let left_map = suffix_map(&duplicates, suffixes.0);
    let right_map = suffix_map(&duplicates, suffixes.1);

    check_collisions(
        &renamed_names(left, &left_map),
        &renamed_names(right, &right_map),
    )?;

    Ok(Disambiguated {
        left: relabel(engine, left, &left_map)?,
        right: relabel(engine, right, &right_map)?,
        left_on: left_on
            .iter()
            .map(|name| renamed(&left_map, name).to_owned())
            .collect(),
        right_on: right_on
            .iter()
            .map(|name| renamed(&right_map, name).to_owned())
            .collect(),
        duplicates,
    })
}
