#![forbid(unsafe_code)]

//! Relational inner equi-join (`merge`) over arrays, planned onto the
//! engine's native `cross_join`.
//!
//! The pipeline is three stages over immutable handles:
//! [`disambiguate`] suffixes names present on both sides,
//! [`materialize_keys`] turns every join key into an integer dimension
//! (building a surrogate index for non-integer keys), and [`merge`] issues
//! the cross join, flattens it to one row dimension and drops the redundant
//! columns.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use am_engine::{ArrayEngine, ArrayHandle, EngineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod disambiguate;
mod keys;
mod observer;

pub use disambiguate::{Disambiguated, disambiguate};
pub use keys::{MaterializedKeys, SurrogateKey, materialize_keys};
pub use observer::{
    MergeEvent, MergeEventKind, MergeObserver, MergeStage, NoopObserver, RecordingObserver,
    TracingObserver,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Outer => "outer",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "outer" => Ok(Self::Outer),
            other => Err(JoinError::UnsupportedJoin {
                how: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// Coarse classification of [`JoinError`] for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    UnsupportedOperation,
    Engine,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JoinError {
    #[error("only inner joins are supported, got how={how:?}")]
    UnsupportedJoin { how: String },
    #[error("cannot specify left_on/right_on together with on")]
    ConflictingKeys,
    #[error("left_on and right_on must both be specified")]
    IncompleteKeys,
    #[error("left_on has {left} names but right_on has {right}")]
    KeyLengthMismatch { left: usize, right: usize },
    #[error("{side} array join name is invalid: {name}")]
    UnknownKey { side: Side, name: String },
    #[error("join key list is empty")]
    EmptyKeys,
    #[error("arrays share no names to join on; pass on or left_on/right_on")]
    NoCommonNames,
    #[error("suffixes must differ, both are {suffix:?}")]
    IdenticalSuffixes { suffix: String },
    #[error("suffixing {name:?} as {renamed:?} collides with an existing name")]
    SuffixCollision { name: String, renamed: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl JoinError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedJoin { .. } => ErrorKind::UnsupportedOperation,
            Self::Engine(_) => ErrorKind::Engine,
            Self::ConflictingKeys
            | Self::IncompleteKeys
            | Self::KeyLengthMismatch { .. }
            | Self::UnknownKey { .. }
            | Self::EmptyKeys
            | Self::NoCommonNames
            | Self::IdenticalSuffixes { .. }
            | Self::SuffixCollision { .. } => ErrorKind::InvalidArgument,
        }
    }
}

/// Which names to join on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKeys {
    /// Every name present on both sides.
    #[default]
    Default,
    /// The same names on both sides; empty behaves like `Default`.
    On(Vec<String>),
    /// Positionally paired names.
    Explicit {
        left_on: Vec<String>,
        right_on: Vec<String>,
    },
}

impl JoinKeys {
    #[must_use]
    pub fn on<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::On(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn explicit<L, R, S, T>(left_on: L, right_on: R) -> Self
    where
        L: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self::Explicit {
            left_on: left_on.into_iter().map(Into::into).collect(),
            right_on: right_on.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from the optional `on` / `left_on` / `right_on` trio.
    pub fn from_parts(
        on: Option<Vec<String>>,
        left_on: Option<Vec<String>>,
        right_on: Option<Vec<String>>,
    ) -> Result<Self, JoinError> {
        match (on, left_on, right_on) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(JoinError::ConflictingKeys),
            (Some(on), None, None) => Ok(Self::On(on)),
            (None, Some(_), None) | (None, None, Some(_)) => Err(JoinError::IncompleteKeys),
            (None, Some(left_on), Some(right_on)) => {
                if left_on.len() != right_on.len() {
                    return Err(JoinError::KeyLengthMismatch {
                        left: left_on.len(),
                        right: right_on.len(),
                    });
                }
                Ok(Self::Explicit { left_on, right_on })
            }
            (None, None, None) => Ok(Self::Default),
        }
    }

    /// Positional key lists for `left` and `right`, checked against both schemas.
    pub fn resolve(
        &self,
        left: &ArrayHandle,
        right: &ArrayHandle,
    ) -> Result<(Vec<String>, Vec<String>), JoinError> {
        let (left_on, right_on) = match self {
            Self::Default => common_names(left, right)?,
            Self::On(on) if on.is_empty() => common_names(left, right)?,
            Self::On(on) => (on.clone(), on.clone()),
            Self::Explicit { left_on, right_on } => (left_on.clone(), right_on.clone()),
        };

        if left_on.len() != right_on.len() {
            return Err(JoinError::KeyLengthMismatch {
                left: left_on.len(),
                right: right_on.len(),
            });
        }
        if left_on.is_empty() {
            return Err(JoinError::EmptyKeys);
        }
        for (side, array, names) in [(Side::Left, left, &left_on), (Side::Right, right, &right_on)] {
            if let Some(name) = names.iter().find(|name| !array.contains(name)) {
                return Err(JoinError::UnknownKey {
                    side,
                    name: name.clone(),
                });
            }
        }
        Ok((left_on, right_on))
    }
}

/// Names of `left` (dimensions, then attributes) that `right` also has.
fn common_names(
    left: &ArrayHandle,
    right: &ArrayHandle,
) -> Result<(Vec<String>, Vec<String>), JoinError> {
    let rnames = right.names();
    let common: Vec<String> = left
        .dim_names()
        .into_iter()
        .chain(left.att_names())
        .filter(|name| rnames.contains(name))
        .collect();
    if common.is_empty() {
        return Err(JoinError::NoCommonNames);
    }
    Ok((common.clone(), common))
}

fn default_suffixes() -> (String, String) {
    ("_x".to_owned(), "_y".to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    pub how: JoinType,
    /// Appended to names present on both sides: `.0` on the left, `.1` on the right.
    pub suffixes: (String, String),
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            how: JoinType::Inner,
            suffixes: default_suffixes(),
        }
    }
}

impl MergeOptions {
    #[must_use]
    pub fn with_suffixes(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.suffixes = (left.into(), right.into());
        self
    }

    pub fn validate(&self) -> Result<(), JoinError> {
        if self.how != JoinType::Inner {
            return Err(JoinError::UnsupportedJoin {
                how: self.how.to_string(),
            });
        }
        if self.suffixes.0 == self.suffixes.1 {
            return Err(JoinError::IdenticalSuffixes {
                suffix: self.suffixes.0.clone(),
            });
        }
        Ok(())
    }
}

/// Inner equi-join of `left` and `right`, reporting stage progress through
/// `tracing`.
///
/// The result has a single dense row dimension and one attribute per kept
/// column: every dimension and attribute of both inputs except the right
/// join keys. Row order is unspecified.
pub fn merge<E: ArrayEngine + ?Sized>(
    engine: &E,
    left: &ArrayHandle,
    right: &ArrayHandle,
    keys: &JoinKeys,
    options: &MergeOptions,
) -> Result<ArrayHandle, JoinError> {
    merge_with_observer(engine, left, right, keys, options, &mut TracingObserver)
}

fn run_stage<T>(
    observer: &mut dyn MergeObserver,
    stage: MergeStage,
    body: impl FnOnce(&mut dyn MergeObserver) -> Result<T, JoinError>,
) -> Result<T, JoinError> {
    observer.stage_started(stage);
    let started = Instant::now();
    match body(&mut *observer) {
        Ok(value) => {
            observer.stage_finished(stage, started.elapsed());
            Ok(value)
        }
        Err(error) => {
            observer.merge_failed(stage, &error);
            Err(error)
        }
    }
}

/// Renames that strip `suffixes.0` where the suffix no longer separates two
/// columns: `stem<suffixes.1>` is absent and `stem` itself is free.
fn suffix_cleanup(names: &[String], suffixes: (&str, &str)) -> Vec<(String, String)> {
    let present: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    names
        .iter()
        .filter_map(|name| {
            let stem = name.strip_suffix(suffixes.0)?;
            let counterpart = format!("{stem}{}", suffixes.1);
            (stem != name && !present.contains(counterpart.as_str()) && !present.contains(stem))
                .then(|| (name.clone(), stem.to_owned()))
        })
        .collect()
}

/// [`merge`] with caller-supplied stage hooks.
pub fn merge_with_observer<E: ArrayEngine + ?Sized>(
    engine: &E,
    left: &ArrayHandle,
    right: &ArrayHandle,
    keys: &JoinKeys,
    options: &MergeOptions,
    observer: &mut dyn MergeObserver,
) -> Result<ArrayHandle, JoinError> {
    let suffixes = (options.suffixes.0.as_str(), options.suffixes.1.as_str());

    let (left_on, right_on) = run_stage(observer, MergeStage::Validate, |_| {
        options.validate()?;
        keys.resolve(left, right)
    })?;

    let disambiguated = run_stage(observer, MergeStage::Disambiguate, |_| {
        disambiguate(engine, left, right, &left_on, &right_on, suffixes)
    })?;

    let right_keys: BTreeSet<&str> = disambiguated.right_on.iter().map(String::as_str).collect();
    let keep: BTreeSet<String> = disambiguated
        .left
        .names()
        .into_iter()
        .chain(disambiguated.right.names())
        .filter(|name| !right_keys.contains(name.as_str()))
        .collect();

    let materialized = run_stage(observer, MergeStage::MaterializeKeys, |observer| {
        materialize_keys(
            engine,
            &disambiguated.left,
            &disambiguated.right,
            &disambiguated.left_on,
            &disambiguated.right_on,
            observer,
        )
    })?;

    let joined = run_stage(observer, MergeStage::CrossJoin, |_| {
        let pairs: Vec<(String, String)> = materialized
            .left_on
            .iter()
            .cloned()
            .zip(materialized.right_on.iter().cloned())
            .collect();
        Ok(engine.cross_join(&materialized.left, &materialized.right, &pairs)?)
    })?;

    run_stage(observer, MergeStage::Finalize, |_| {
        let row = engine.new_attribute_label("_row", &[&joined]);
        let flat = engine.unpack(&joined, &row)?;
        let kept: Vec<String> = flat
            .att_names()
            .into_iter()
            .filter(|name| keep.contains(name))
            .collect();
        let projected = engine.project(&flat, &kept)?;

        let renames = suffix_cleanup(&projected.att_names(), suffixes);
        if renames.is_empty() {
            Ok(projected)
        } else {
            Ok(engine.attribute_rename(&projected, &renames)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use am_engine::{ArrayEngine, ArrayHandle, EngineError, MemoryEngine};
    use am_types::Value;

    use super::{
        ErrorKind, JoinError, JoinKeys, JoinType, MergeOptions, MergeStage, RecordingObserver,
        merge, merge_with_observer, suffix_cleanup,
    };

    fn array(engine: &MemoryEngine, label: &str, schema: &str, rows: Vec<Vec<Value>>) -> ArrayHandle {
        engine
            .create_array_from_attribute_rows(label, schema.parse().expect("schema"), rows)
            .expect("array")
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    /// Rows keyed by attribute name, sorted, for order-insensitive comparison.
    fn records(engine: &MemoryEngine, result: &ArrayHandle) -> Vec<BTreeMap<String, Value>> {
        let data = engine.fetch(result).expect("fetch");
        let columns = result.att_names();
        let mut out: Vec<BTreeMap<String, Value>> = data
            .attribute_rows()
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect();
        out.sort();
        out
    }

    fn authors_and_books(engine: &MemoryEngine) -> (ArrayHandle, ArrayHandle) {
        let authors = array(
            engine,
            "authors",
            "<surname:string, nationality:string, deceased:bool>[i0]",
            vec![
                vec!["Tukey".into(), "US".into(), true.into()],
                vec!["Venables".into(), "Australia".into(), false.into()],
                vec!["Tierney".into(), "US".into(), false.into()],
                vec!["Ripley".into(), "UK".into(), false.into()],
                vec!["McNeil".into(), "Australia".into(), false.into()],
            ],
        );
        let books = array(
            engine,
            "books",
            "<title:string, name:string>[i0]",
            vec![
                vec!["Exploratory Data Analysis".into(), "Tukey".into()],
                vec!["Modern Applied Statistics".into(), "Venables".into()],
                vec!["LISP-STAT".into(), "Tierney".into()],
                vec!["Spatial Statistics".into(), "Ripley".into()],
                vec!["Stochastic Simulation".into(), "Ripley".into()],
                vec!["Interactive Data Analysis".into(), "McNeil".into()],
                vec!["Python for Data Analysis".into(), "McKinney".into()],
            ],
        );
        (authors, books)
    }

    #[test]
    fn join_type_parses_known_names_and_rejects_others() {
        assert_eq!("inner".parse::<JoinType>().expect("inner"), JoinType::Inner);
        assert_eq!("outer".parse::<JoinType>().expect("outer"), JoinType::Outer);
        let err = "cross".parse::<JoinType>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn non_inner_joins_fail_before_any_engine_call() {
        let engine = MemoryEngine::new();
        let (authors, books) = authors_and_books(&engine);
        for how in [JoinType::Left, JoinType::Right, JoinType::Outer] {
            let options = MergeOptions {
                how,
                ..MergeOptions::default()
            };
            let err = merge(&engine, &authors, &books, &JoinKeys::Default, &options)
                .expect_err("non-inner");
            assert_eq!(
                err,
                JoinError::UnsupportedJoin {
                    how: how.to_string()
                }
            );
        }
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn key_specification_errors_are_invalid_arguments() {
        let some = |v: &[&str]| Some(names(v));
        assert_eq!(
            JoinKeys::from_parts(some(&["a"]), some(&["a"]), None),
            Err(JoinError::ConflictingKeys)
        );
        assert_eq!(
            JoinKeys::from_parts(None, some(&["a"]), None),
            Err(JoinError::IncompleteKeys)
        );
        assert_eq!(
            JoinKeys::from_parts(None, some(&["a", "b"]), some(&["c"])),
            Err(JoinError::KeyLengthMismatch { left: 2, right: 1 })
        );
        assert_eq!(JoinKeys::from_parts(None, None, None), Ok(JoinKeys::Default));

        let engine = MemoryEngine::new();
        let left = array(&engine, "l", "<a:int64>[i]", Vec::new());
        let right = array(&engine, "r", "<b:int64>[j]", Vec::new());
        let options = MergeOptions::default();
        for (keys, expected) in [
            (JoinKeys::Default, JoinError::NoCommonNames),
            (JoinKeys::on(["a"]), JoinError::UnknownKey {
                side: super::Side::Right,
                name: "a".to_owned(),
            }),
            (JoinKeys::explicit(["zz"], ["b"]), JoinError::UnknownKey {
                side: super::Side::Left,
                name: "zz".to_owned(),
            }),
            (JoinKeys::on(Vec::<String>::new()), JoinError::NoCommonNames),
            (JoinKeys::explicit(Vec::<String>::new(), Vec::<String>::new()), JoinError::EmptyKeys),
        ] {
            let err = merge(&engine, &left, &right, &keys, &options).expect_err("invalid");
            assert_eq!(err, expected);
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        let same = MergeOptions::default().with_suffixes("_s", "_s");
        let err = merge(&engine, &left, &right, &JoinKeys::explicit(["a"], ["b"]), &same)
            .expect_err("identical suffixes");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn integer_key_join_pairs_rows_without_suffixes() {
        let engine = MemoryEngine::new();
        let left = engine
            .create_array(
                "l",
                "<v:string>[id]".parse().expect("schema"),
                vec![vec![1.into(), "a".into()], vec![2.into(), "b".into()]],
            )
            .expect("left");
        let right = engine
            .create_array(
                "r",
                "<w:string>[id]".parse().expect("schema"),
                vec![vec![1.into(), "x".into()], vec![2.into(), "y".into()]],
            )
            .expect("right");

        let result = merge(&engine, &left, &right, &JoinKeys::on(["id"]), &MergeOptions::default())
            .expect("merge");

        assert_eq!(result.dim_names().len(), 1);
        assert_eq!(result.att_names(), names(&["id", "v", "w"]));
        let rows = records(&engine, &result);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], Value::Int64(1));
        assert_eq!(rows[0]["v"], Value::from("a"));
        assert_eq!(rows[0]["w"], Value::from("x"));
        assert_eq!(rows[1]["w"], Value::from("y"));
    }

    #[test]
    fn string_key_with_repeated_matches_yields_each_pair_once() {
        let engine = MemoryEngine::new();
        let left = array(&engine, "l", "<k:string, x:int64>[i]", vec![vec!["A".into(), 1.into()]]);
        let right = array(
            &engine,
            "r",
            "<k:string, y:int64>[j]",
            vec![vec!["A".into(), 10.into()], vec!["A".into(), 20.into()]],
        );

        let result = merge(&engine, &left, &right, &JoinKeys::on(["k"]), &MergeOptions::default())
            .expect("merge");

        assert_eq!(result.att_names(), names(&["i", "j", "k", "x", "y"]));
        let rows = records(&engine, &result);
        assert_eq!(rows.len(), 2);
        let ys: Vec<&Value> = rows.iter().map(|r| &r["y"]).collect();
        assert_eq!(ys, vec![&Value::Int64(10), &Value::Int64(20)]);
        assert!(rows.iter().all(|r| r["x"] == Value::Int64(1) && r["k"] == Value::from("A")));
    }

    #[test]
    fn shared_payload_keeps_both_suffixed_columns() {
        let engine = MemoryEngine::new();
        let left = array(
            &engine,
            "l",
            "<id:int64, score:double>[i]",
            vec![vec![1.into(), 0.5.into()]],
        );
        let right = array(
            &engine,
            "r",
            "<id:int64, score:double>[j]",
            vec![vec![1.into(), 0.75.into()]],
        );

        let result = merge(&engine, &left, &right, &JoinKeys::on(["id"]), &MergeOptions::default())
            .expect("merge");

        assert_eq!(result.att_names(), names(&["i", "id", "j", "score_x", "score_y"]));
        let rows = records(&engine, &result);
        assert_eq!(rows[0]["score_x"], Value::Float64(0.5));
        assert_eq!(rows[0]["score_y"], Value::Float64(0.75));
    }

    #[test]
    fn authors_and_books_reproduce_the_documented_join() {
        let engine = MemoryEngine::new();
        let (authors, books) = authors_and_books(&engine);

        let result = merge(
            &engine,
            &authors,
            &books,
            &JoinKeys::explicit(["surname"], ["name"]),
            &MergeOptions::default(),
        )
        .expect("merge");

        assert_eq!(
            result.att_names(),
            names(&["i0_x", "i0_y", "surname", "nationality", "deceased", "title"])
        );
        let rows = records(&engine, &result);
        assert_eq!(rows.len(), 6);
        let ripley: Vec<&Value> = rows
            .iter()
            .filter(|r| r["surname"] == Value::from("Ripley"))
            .map(|r| &r["title"])
            .collect();
        assert_eq!(
            ripley,
            vec![
                &Value::from("Spatial Statistics"),
                &Value::from("Stochastic Simulation")
            ]
        );
        assert!(rows.iter().all(|r| r["surname"] != Value::from("McKinney")));
    }

    #[test]
    fn null_keys_never_match() {
        let engine = MemoryEngine::new();
        let left = array(
            &engine,
            "l",
            "<k:string, x:int64>[i]",
            vec![vec![Value::Null, 1.into()], vec!["a".into(), 2.into()]],
        );
        let right = array(
            &engine,
            "r",
            "<k:string, y:int64>[j]",
            vec![vec![Value::Null, 10.into()], vec!["a".into(), 20.into()]],
        );

        let result = merge(&engine, &left, &right, &JoinKeys::on(["k"]), &MergeOptions::default())
            .expect("merge");
        let rows = records(&engine, &result);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["y"], Value::Int64(20));
    }

    #[test]
    fn signed_zero_double_keys_match_and_nan_keys_do_not() {
        let engine = MemoryEngine::new();
        let left = array(
            &engine,
            "l",
            "<k:double, x:int64>[i]",
            vec![vec![0.0.into(), 1.into()], vec![f64::NAN.into(), 2.into()]],
        );
        let right = array(
            &engine,
            "r",
            "<k:double, y:int64>[j]",
            vec![vec![(-0.0).into(), 10.into()], vec![f64::NAN.into(), 20.into()]],
        );

        let result = merge(&engine, &left, &right, &JoinKeys::on(["k"]), &MergeOptions::default())
            .expect("merge");
        let rows = records(&engine, &result);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["x"], Value::Int64(1));
        assert_eq!(rows[0]["y"], Value::Int64(10));
    }

    #[test]
    fn empty_on_list_joins_on_every_shared_name() {
        let engine = MemoryEngine::new();
        let left = array(
            &engine,
            "l",
            "<k:string, x:int64>[i]",
            vec![vec!["a".into(), 1.into()], vec!["b".into(), 2.into()]],
        );
        let right = array(
            &engine,
            "r",
            "<k:string, y:int64>[j]",
            vec![vec!["b".into(), 20.into()]],
        );

        let empty = merge(
            &engine,
            &left,
            &right,
            &JoinKeys::on(Vec::<String>::new()),
            &MergeOptions::default(),
        )
        .expect("empty on");
        let default = merge(&engine, &left, &right, &JoinKeys::Default, &MergeOptions::default())
            .expect("default keys");

        assert_eq!(empty.att_names(), names(&["i", "j", "k", "x", "y"]));
        assert_eq!(empty.att_names(), default.att_names());
        assert_eq!(records(&engine, &empty), records(&engine, &default));
        assert_eq!(records(&engine, &empty).len(), 1);
    }

    #[test]
    fn observer_sees_every_stage_and_the_surrogate() {
        let engine = MemoryEngine::new();
        let (authors, books) = authors_and_books(&engine);
        let mut log = RecordingObserver::new();

        merge_with_observer(
            &engine,
            &authors,
            &books,
            &JoinKeys::explicit(["surname"], ["name"]),
            &MergeOptions::default(),
            &mut log,
        )
        .expect("merge");

        assert_eq!(
            log.finished_stages(),
            vec![
                MergeStage::Validate,
                MergeStage::Disambiguate,
                MergeStage::MaterializeKeys,
                MergeStage::CrossJoin,
                MergeStage::Finalize,
            ]
        );
        assert!(log.to_jsonl().expect("jsonl").contains("surrogate_built"));
    }

    #[test]
    fn engine_failures_propagate_and_stop_the_pipeline() {
        let engine = MemoryEngine::new();
        let left = array(&engine, "l", "<k:string>[i]", vec![vec!["a".into()]]);
        let right = array(&engine, "r", "<k:double>[j]", vec![vec![1.5.into()]]);
        let mut log = RecordingObserver::new();

        let err = merge_with_observer(
            &engine,
            &left,
            &right,
            &JoinKeys::on(["k"]),
            &MergeOptions::default(),
            &mut log,
        )
        .expect_err("type mismatch");

        assert!(matches!(err, JoinError::Engine(EngineError::TypeMismatch { .. })));
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(
            log.finished_stages(),
            vec![MergeStage::Validate, MergeStage::Disambiguate]
        );
    }

    #[test]
    fn cleanup_strips_left_suffix_only_when_it_is_free() {
        let renames = suffix_cleanup(
            &names(&["id_x", "score_x", "score_y", "v_x", "v"]),
            ("_x", "_y"),
        );
        assert_eq!(renames, vec![("id_x".to_owned(), "id".to_owned())]);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: MergeOptions =
            serde_json::from_str(r#"{"suffixes": ["_l", "_r"]}"#).expect("json");
        assert_eq!(options.how, JoinType::Inner);
        assert_eq!(options.suffixes, ("_l".to_owned(), "_r".to_owned()));

        let keys: JoinKeys =
            serde_json::from_str(r#"{"explicit": {"left_on": ["a"], "right_on": ["b"]}}"#)
                .expect("json");
        assert_eq!(keys, JoinKeys::explicit(["a"], ["b"]));
    }
}
