use am_engine::{ArrayEngine, ArrayHandle, LookupOptions};

use crate::{JoinError, MergeObserver, Side};

const LEFT_ALIAS: &str = "L";
const RIGHT_ALIAS: &str = "R";

/// Dense integer stand-in for one non-integer key pair.
#[derive(Debug, Clone)]
pub struct SurrogateKey {
    /// Position of the pair in the key lists.
    pub position: usize,
    /// Distinct key values of both sides, sorted; the dimension is the surrogate.
    pub index: ArrayHandle,
    pub left_label: String,
    pub right_label: String,
}

/// Inputs whose join keys are all integer dimensions, positionally aligned.
#[derive(Debug, Clone)]
pub struct MaterializedKeys {
    pub left: ArrayHandle,
    pub right: ArrayHandle,
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    pub surrogates: Vec<SurrogateKey>,
}

fn distinct_values<E: ArrayEngine + ?Sized>(
    engine: &E,
    array: &ArrayHandle,
    key: &str,
) -> Result<ArrayHandle, JoinError> {
    let column = engine.project(array, &[key.to_owned()])?;
    Ok(engine.uniq(&engine.sort(&column)?)?)
}

/// Sorted union of the distinct values of `left.l` and `right.r`, evaluated
/// once so both lookups read the same index.
fn surrogate_index<E: ArrayEngine + ?Sized>(
    engine: &E,
    left: &ArrayHandle,
    right: &ArrayHandle,
    l: &str,
    r: &str,
) -> Result<ArrayHandle, JoinError> {
    let lidx = distinct_values(engine, left, l)?;
    let mut ridx = distinct_values(engine, right, r)?;
    if l != r {
        ridx = engine.attribute_rename(&ridx, &[(r.to_owned(), l.to_owned())])?;
    }
    let both = engine.concat(&lidx, &ridx)?;
    let union = engine.uniq(&engine.sort(&both)?)?;
    Ok(engine.eval(&union)?)
}

fn lookup<E: ArrayEngine + ?Sized>(
    engine: &E,
    array: &ArrayHandle,
    index: &ArrayHandle,
    alias: &str,
    key: &str,
    label: &str,
) -> Result<ArrayHandle, JoinError> {
    let aliased = engine.alias(array, alias)?;
    Ok(engine.index_lookup(
        &aliased,
        index,
        &format!("{alias}.{key}"),
        label,
        LookupOptions { index_sorted: true },
    )?)
}

/// Turn every join key into an integer dimension.
///
/// Integer-typed left keys are promoted as they are. Any other key pair gets
/// a surrogate index and each side gains a `<key>_idx` attribute holding its
/// surrogate, which replaces the key in the returned key lists.
pub fn materialize_keys<E: ArrayEngine + ?Sized>(
    engine: &E,
    left: &ArrayHandle,
    right: &ArrayHandle,
    left_on: &[String],
    right_on: &[String],
    observer: &mut dyn MergeObserver,
) -> Result<MaterializedKeys, JoinError> {
    let mut left = left.clone();
    let mut right = right.clone();
    let mut new_left = left_on.to_vec();
    let mut new_right = right_on.to_vec();
    let mut surrogates = Vec::new();

    for (position, (l, r)) in left_on.iter().zip(right_on).enumerate() {
        let key_type = left.name_type(l).ok_or_else(|| JoinError::UnknownKey {
            side: Side::Left,
            name: l.clone(),
        })?;
        if key_type.is_integer_like() {
            continue;
        }

        let index = surrogate_index(engine, &left, &right, l, r)?;

        let left_label = engine.new_attribute_label(&format!("{l}_idx"), &[&left, &right]);
        left = lookup(engine, &left, &index, LEFT_ALIAS, l, &left_label)?;
        let right_label = engine.new_attribute_label(&format!("{r}_idx"), &[&left, &right]);
        right = lookup(engine, &right, &index, RIGHT_ALIAS, r, &right_label)?;

        observer.surrogate_built(l, r, &left_label, &right_label);
        new_left[position].clone_from(&left_label);
        new_right[position].clone_from(&right_label);
        surrogates.push(SurrogateKey {
            position,
            index,
            left_label,
            right_label,
        });
    }

    Ok(MaterializedKeys {
        left: engine.to_dimensions(&left, &new_left)?,
        right: engine.to_dimensions(&right, &new_right)?,
        left_on: new_left,
        right_on: new_right,
        surrogates,
    })
}
