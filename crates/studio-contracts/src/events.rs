use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::generation::TokenUsage;
use crate::job::JobStatus;

/// Stage milestones recorded in the job's event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobStarted {
        subject: String,
        style: String,
        aspect_ratio: String,
        detail: String,
        count: u32,
        out_dir: String,
    },
    SearchCompleted {
        query: String,
        candidates: usize,
    },
    ReferenceFetched {
        rank: usize,
        url: String,
        content_type: String,
        bytes: usize,
        path: String,
    },
    ReferenceSkipped {
        rank: usize,
        url: String,
        reason: String,
    },
    SelectionCompleted {
        strategy: String,
        selected_ranks: Vec<usize>,
        fallback_reason: Option<String>,
    },
    GenerationCompleted {
        model: String,
        images: usize,
        references: usize,
        token_usage: TokenUsage,
        feedback: Option<String>,
    },
    JobFinished {
        status: JobStatus,
        message: String,
        files: usize,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::JobStarted { .. } => "job_started",
            PipelineEvent::SearchCompleted { .. } => "search_completed",
            PipelineEvent::ReferenceFetched { .. } => "reference_fetched",
            PipelineEvent::ReferenceSkipped { .. } => "reference_skipped",
            PipelineEvent::SelectionCompleted { .. } => "selection_completed",
            PipelineEvent::GenerationCompleted { .. } => "generation_completed",
            PipelineEvent::JobFinished { .. } => "job_finished",
        }
    }
}

/// Append-only JSONL log for one job.
///
/// - every line carries `type`, `run_id` and `ts`
/// - event fields are merged after the defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    run_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: &PipelineEvent) -> anyhow::Result<Value> {
        let mut row = Map::new();
        row.insert("type".to_string(), Value::String(event.kind().to_string()));
        row.insert(
            "run_id".to_string(),
            Value::String(self.run_id.clone()),
        );
        row.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Value::Object(fields) = serde_json::to_value(event)? {
            for (key, value) in fields {
                if key == "type" {
                    continue;
                }
                row.insert(key, value);
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let line = serde_json::to_string(&row)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(row))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
