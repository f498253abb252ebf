//! JSON output formatting
//!
//! One report per job, with the bounds, the outcome, how the job was spread
//! across sessions, and when and where it ran. Reports accumulate for the
//! life of the coordinator and the file is rewritten as a JSON array after
//! every job.

use crate::distributed::coordinator::{JobParams, SessionShare, Submission};
use crate::distributed::job::JobId;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Where and when a job ran
#[derive(Debug, Clone, Serialize)]
pub struct JsonJobInfo {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub start_time: String,
    pub duration: JsonDuration,
}

/// Complete report for one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_info: JsonJobInfo,
    pub params: JobParams,
    pub total_capacity: usize,
    pub sub_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sessions: Vec<SessionShare>,
}

impl JobReport {
    /// Build a report from a dispatched job and its outcome
    pub fn new(
        submission: &Submission,
        outcome: std::result::Result<f64, String>,
        started: DateTime<Utc>,
        elapsed: Duration,
        hostname: Option<String>,
    ) -> Self {
        let (value, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            job_info: JsonJobInfo {
                job_id: submission.job_id,
                hostname,
                start_time: started.to_rfc3339(),
                duration: JsonDuration::from_duration(elapsed),
            },
            params: submission.params,
            total_capacity: submission.total_capacity,
            sub_tasks: submission.task_count(),
            value,
            error,
            sessions: submission.shares.clone(),
        }
    }
}

/// Write all reports so far to `output_path`
pub fn write_json_output(output_path: &Path, reports: &[JobReport], pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, reports)?;
    } else {
        serde_json::to_writer(writer, reports)?;
    }

    Ok(())
}

fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    }
}
