use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One of the three scripts a zone pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogName {
    Convert,
    CopyEq,
    CopyServer,
}

impl LogName {
    pub fn as_str(self) -> &'static str {
        match self {
            LogName::Convert => "convert",
            LogName::CopyEq => "copy_eq",
            LogName::CopyServer => "copy_server",
        }
    }

    /// File name of the persisted log, e.g. `convert.log`.
    pub fn log_file(self) -> String {
        format!("{}.log", self.as_str())
    }

    /// File name of the batch script this step runs, e.g. `convert.bat`.
    pub fn script_file(self) -> String {
        format!("{}.bat", self.as_str())
    }
}

impl fmt::Display for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to launch the pipeline for one zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub zone: String,
    pub blender_path: String,
    pub eq_path: String,
    pub server_path: String,
    pub eq_copy: bool,
    pub server_copy: bool,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn zone_dir(&self) -> PathBuf {
        self.work_dir.join("zones").join(&self.zone)
    }

    /// Steps in the order they run, skipping disabled copy steps.
    pub fn steps(&self) -> Vec<LogName> {
        let mut steps = vec![LogName::Convert];
        if self.eq_copy {
            steps.push(LogName::CopyEq);
        }
        if self.server_copy {
            steps.push(LogName::CopyServer);
        }
        steps
    }
}

/// Events emitted while a pipeline runs, consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    StepStarted {
        log: LogName,
    },
    Line {
        log: LogName,
        number: usize,
        text: String,
    },
    StepReached {
        step: u32,
    },
    Info(InfoEvent),
    StepFinished {
        log: LogName,
        ok: bool,
    },
}

/// Structured info events emitted by the runner and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    MinorNote {
        log: LogName,
        number: usize,
        line: String,
        reason: String,
    },
    TimedOut {
        log: LogName,
        after: Duration,
    },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::MinorNote {
                log,
                number,
                line,
                reason,
            } => format!("minor note {}:{} {} {}", log.log_file(), number, line, reason),
            InfoEvent::TimedOut { log, after } => format!(
                "{} exceeded {}, killing it",
                log.script_file(),
                humantime::format_duration(*after)
            ),
        }
    }
}

/// Outcome of a single script run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub log: LogName,
    pub log_path: PathBuf,
    pub lines: usize,
    pub step: u32,
    pub ok: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

/// Outcome of a whole pipeline, in the order the steps ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub zone: String,
    pub steps: Vec<StepReport>,
    pub ok: bool,
}

impl PipelineReport {
    /// First failure message, if any step failed.
    pub fn failure(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| s.failure.as_deref())
    }
}
