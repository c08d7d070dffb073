use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ErrorKind, JoinError};

/// Pipeline stages of one `merge` call, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Validate,
    Disambiguate,
    MaterializeKeys,
    CrossJoin,
    Finalize,
}

impl MergeStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Disambiguate => "disambiguate",
            Self::MaterializeKeys => "materialize_keys",
            Self::CrossJoin => "cross_join",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hooks called at each stage boundary of `merge`. Default implementations are no-ops.
pub trait MergeObserver {
    fn stage_started(&mut self, _stage: MergeStage) {}
    fn stage_finished(&mut self, _stage: MergeStage, _elapsed: Duration) {}
    fn surrogate_built(
        &mut self,
        _left_key: &str,
        _right_key: &str,
        _left_label: &str,
        _right_label: &str,
    ) {
    }
    fn merge_failed(&mut self, _stage: MergeStage, _error: &JoinError) {}
}

pub struct NoopObserver;
impl MergeObserver for NoopObserver {}

/// Reports stage progress as `tracing` debug events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MergeObserver for TracingObserver {
    fn stage_started(&mut self, stage: MergeStage) {
        debug!(stage = %stage, "merge stage started");
    }

    fn stage_finished(&mut self, stage: MergeStage, elapsed: Duration) {
        debug!(
            stage = %stage,
            elapsed_us = elapsed_us(elapsed),
            "merge stage finished"
        );
    }

    fn surrogate_built(
        &mut self,
        left_key: &str,
        right_key: &str,
        left_label: &str,
        right_label: &str,
    ) {
        debug!(
            left_key,
            right_key,
            left_label,
            right_label,
            "surrogate key index built"
        );
    }

    fn merge_failed(&mut self, stage: MergeStage, error: &JoinError) {
        debug!(stage = %stage, kind = ?error.kind(), error = %error, "merge failed");
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn elapsed_us(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MergeEventKind {
    StageStarted {
        stage: MergeStage,
    },
    StageFinished {
        stage: MergeStage,
        elapsed_us: u64,
    },
    SurrogateBuilt {
        left_key: String,
        right_key: String,
        left_label: String,
        right_label: String,
    },
    MergeFailed {
        stage: MergeStage,
        error_kind: ErrorKind,
        message: String,
    },
}

/// A single recorded event with timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEvent {
    pub ts_unix_ms: u64,
    pub event: MergeEventKind,
}

/// Collects every event of a merge for later inspection or export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingObserver {
    pub events: Vec<MergeEvent>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: MergeEventKind) {
        self.events.push(MergeEvent {
            ts_unix_ms: now_unix_ms(),
            event,
        });
    }

    /// Stages that completed, in order.
    #[must_use]
    pub fn finished_stages(&self) -> Vec<MergeStage> {
        self.events
            .iter()
            .filter_map(|e| match e.event {
                MergeEventKind::StageFinished { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.events {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl MergeObserver for RecordingObserver {
    fn stage_started(&mut self, stage: MergeStage) {
        self.record(MergeEventKind::StageStarted { stage });
    }

    fn stage_finished(&mut self, stage: MergeStage, elapsed: Duration) {
        self.record(MergeEventKind::StageFinished {
            stage,
            elapsed_us: elapsed_us(elapsed),
        });
    }

    fn surrogate_built(
        &mut self,
        left_key: &str,
        right_key: &str,
        left_label: &str,
        right_label: &str,
    ) {
        self.record(MergeEventKind::SurrogateBuilt {
            left_key: left_key.to_owned(),
            right_key: right_key.to_owned(),
            left_label: left_label.to_owned(),
            right_label: right_label.to_owned(),
        });
    }

    fn merge_failed(&mut self, stage: MergeStage, error: &JoinError) {
        self.record(MergeEventKind::MergeFailed {
            stage,
            error_kind: error.kind(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MergeEventKind, MergeObserver, MergeStage, RecordingObserver};
    use crate::{ErrorKind, JoinError};

    #[test]
    fn recording_observer_keeps_events_in_order() {
        let mut log = RecordingObserver::new();
        log.stage_started(MergeStage::Validate);
        log.stage_finished(MergeStage::Validate, Duration::from_micros(12));
        log.merge_failed(
            MergeStage::Disambiguate,
            &JoinError::SuffixCollision {
                name: "a".to_owned(),
                renamed: "a_x".to_owned(),
            },
        );

        assert_eq!(log.len(), 3);
        assert_eq!(log.finished_stages(), vec![MergeStage::Validate]);
        assert_eq!(
            log.events[1].event,
            MergeEventKind::StageFinished {
                stage: MergeStage::Validate,
                elapsed_us: 12
            }
        );
        assert!(matches!(
            log.events[2].event,
            MergeEventKind::MergeFailed {
                stage: MergeStage::Disambiguate,
                error_kind: ErrorKind::InvalidArgument,
                ..
            }
        ));
    }

    #[test]
    fn jsonl_has_one_tagged_object_per_event() {
        let mut log = RecordingObserver::new();
        log.stage_started(MergeStage::CrossJoin);
        log.surrogate_built("k_x", "k_y", "k_x_idx", "k_y_idx");

        let text = log.to_jsonl().expect("jsonl");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["event"]["kind"], "stage_started");
        assert_eq!(first["event"]["stage"], "cross_join");
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["event"]["left_label"], "k_x_idx");
    }
}
