#![forbid(unsafe_code)]

//! End-to-end checks of `merge` against the in-memory engine.
//!
//! A fixture is a JSON file holding two arrays (textual schema plus cells),
//! the join arguments, and either the expected result or the expected error
//! kind. Results are compared as row multisets because row order is
//! unspecified.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use am_engine::{ArrayEngine, ArrayHandle, EngineError, EngineOptions, MemoryEngine};
use am_join::{ErrorKind, JoinError, JoinKeys, MergeOptions, RecordingObserver, merge_with_observer};
use am_schema::{Schema, SchemaError};
use am_types::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureArray {
    pub label: String,
    /// Textual schema, e.g. `<k:string, v:int64>[i]`.
    pub schema: String,
    /// Attribute values per cell; with `coordinates`, each row starts with
    /// the cell's dimension coordinates.
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub coordinates: bool,
}

impl FixtureArray {
    pub fn create(&self, engine: &MemoryEngine) -> Result<ArrayHandle, HarnessError> {
        let schema: Schema = self.schema.parse()?;
        let handle = if self.coordinates {
            engine.create_array(&self.label, schema, self.rows.clone())?
        } else {
            engine.create_array_from_attribute_rows(&self.label, schema, self.rows.clone())?
        };
        Ok(handle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FixtureExpectation {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Error {
        kind: ErrorKind,
    },
}

fn default_how() -> String {
    "inner".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeFixture {
    pub case_id: String,
    pub left: FixtureArray,
    pub right: FixtureArray,
    #[serde(default)]
    pub on: Option<Vec<String>>,
    #[serde(default)]
    pub left_on: Option<Vec<String>>,
    #[serde(default)]
    pub right_on: Option<Vec<String>>,
    /// Kept as text so unknown join types reach `merge` as a parse failure.
    #[serde(default = "default_how")]
    pub how: String,
    #[serde(default)]
    pub suffixes: Option<(String, String)>,
    #[serde(default)]
    pub engine: EngineOptions,
    pub expected: FixtureExpectation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    /// Contract operations issued against the engine during `merge`.
    pub engine_calls: usize,
    pub events: RecordingObserver,
}

impl MergeFixture {
    /// Options and keys exactly as a caller would build them from the
    /// fixture's loose arguments.
    pub fn merge_arguments(&self) -> Result<(JoinKeys, MergeOptions), JoinError> {
        let how = self.how.parse()?;
        let keys = JoinKeys::from_parts(
            self.on.clone(),
            self.left_on.clone(),
            self.right_on.clone(),
        )?;
        let mut options = MergeOptions {
            how,
            ..MergeOptions::default()
        };
        if let Some(suffixes) = &self.suffixes {
            options.suffixes = suffixes.clone();
        }
        Ok((keys, options))
    }
}

/// Rows as column-name maps, sorted, so that order does not matter.
fn row_multiset(columns: &[String], rows: Vec<Vec<Value>>) -> Vec<BTreeMap<String, Value>> {
    let mut out: Vec<BTreeMap<String, Value>> = rows
        .into_iter()
        .map(|row| columns.iter().cloned().zip(row).collect())
        .collect();
    out.sort();
    out
}

fn compare(
    expected: &FixtureExpectation,
    actual: Result<(Vec<String>, Vec<Vec<Value>>), JoinError>,
) -> Option<String> {
    match (expected, actual) {
        (FixtureExpectation::Rows { columns, rows }, Ok((actual_columns, actual_rows))) => {
            if *columns != actual_columns {
                return Some(format!(
                    "columns: expected {columns:?}, got {actual_columns:?}"
                ));
            }
            let want = row_multiset(columns, rows.clone());
            let got = row_multiset(&actual_columns, actual_rows);
            (want != got).then(|| format!("rows: expected {want:?}, got {got:?}"))
        }
        (FixtureExpectation::Rows { .. }, Err(err)) => Some(format!("unexpected error: {err}")),
        (FixtureExpectation::Error { kind }, Ok(_)) => {
            Some(format!("expected {kind:?} error, merge succeeded"))
        }
        (FixtureExpectation::Error { kind }, Err(err)) => (err.kind() != *kind)
            .then(|| format!("expected {kind:?} error, got {:?}: {err}", err.kind())),
    }
}

/// Run one fixture end to end on a fresh engine.
pub fn run_fixture(fixture: &MergeFixture) -> Result<CaseResult, HarnessError> {
    let engine = MemoryEngine::with_options(fixture.engine.clone());
    let left = fixture.left.create(&engine)?;
    let right = fixture.right.create(&engine)?;
    let mut events = RecordingObserver::new();

    let actual = fixture.merge_arguments().and_then(|(keys, options)| {
        let result = merge_with_observer(&engine, &left, &right, &keys, &options, &mut events)?;
        let data = engine.fetch(&result)?;
        Ok((result.att_names(), data.attribute_rows()))
    });
    let engine_calls = engine.calls();
    let mismatch = compare(&fixture.expected, actual);

    Ok(CaseResult {
        case_id: fixture.case_id.clone(),
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        engine_calls,
        events,
    })
}

pub fn load_fixture(path: &Path) -> Result<MergeFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.is_dir() {
        return Err(HarnessError::FixtureFormat(format!(
            "fixture root {} is not a directory",
            root.display()
        )));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// All fixtures under `root`, ordered by case id.
pub fn load_fixtures(root: &Path) -> Result<Vec<MergeFixture>, HarnessError> {
    let mut fixtures = list_fixture_files(root)?
        .iter()
        .map(|path| load_fixture(path))
        .collect::<Result<Vec<_>, _>>()?;
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

/// Directory of the fixtures shipped with this crate.
#[must_use]
pub fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}
