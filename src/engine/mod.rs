mod classify;
mod process;

pub use classify::{Effect, KillReason, ProcessExit, RunOutcome, Scan, StepMarker, FINAL_STEP};
pub use process::{exit_from_status, kill_tree, merged_lines, script_command};

use crate::model::{InfoEvent, LogName, RunEvent};
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Failures of the run machinery itself, as opposed to a failed conversion.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("create {}: {source}", path.display())]
    CreateLog { path: PathBuf, source: io::Error },

    #[error("write to {}: {source}", path.display())]
    WriteLog { path: PathBuf, source: io::Error },

    #[error("read {log} output: {source}")]
    ReadOutput { log: LogName, source: io::Error },

    #[error("failed to run {}: {source}", script.display())]
    Spawn { script: PathBuf, source: io::Error },

    #[error("wait for {}: {source}", script.display())]
    Wait { script: PathBuf, source: io::Error },

    #[error("{0} pipe was not captured")]
    MissingPipe(&'static str),
}

/// A fully drained output stream, waiting for the process exit status.
#[derive(Debug)]
pub struct Drained {
    pub scan: Scan,
    pub lines: usize,
    pub log_path: PathBuf,
}

impl Drained {
    pub fn finish(self, exit: ProcessExit) -> RunOutcome {
        self.scan.finish(exit)
    }
}

/// Streams one script's output into `<dest>/<log>.log` while classifying it.
pub struct ConversionRunner {
    log: LogName,
    dest_dir: PathBuf,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl ConversionRunner {
    pub fn new(log: LogName, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            log,
            dest_dir: dest_dir.into(),
            event_tx: None,
        }
    }

    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, ev: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// Consume `lines` to end-of-input. Each item is one line including its terminator.
    ///
    /// The log file is created before the first line is read; failing to create or
    /// write it aborts the run regardless of what the output says.
    pub async fn run<S>(self, mut lines: S) -> Result<Drained, RunError>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
    {
        let log_path = self.dest_dir.join(self.log.log_file());
        let file = tokio::fs::File::create(&log_path)
            .await
            .map_err(|source| RunError::CreateLog {
                path: log_path.clone(),
                source,
            })?;
        let mut out = BufWriter::new(file);
        write_all(&mut out, &log_path, banner().as_bytes()).await?;

        let mut scan = Scan::new(self.log);
        let mut number = 0usize;
        while let Some(item) = lines.next().await {
            let raw = item.map_err(|source| RunError::ReadOutput {
                log: self.log,
                source,
            })?;
            number += 1;
            write_all(&mut out, &log_path, &raw).await?;

            let text = String::from_utf8_lossy(&raw);
            self.emit(RunEvent::Line {
                log: self.log,
                number,
                text: text.trim_end_matches(['\n', '\r']).to_string(),
            });
            let observation = scan.observe(number, &text);
            match observation.marker {
                Some(StepMarker::Reached(step)) => self.emit(RunEvent::StepReached { step }),
                Some(StepMarker::Malformed(reason)) => {
                    tracing::warn!(log = %self.log, line = number, %reason, "minor note");
                    self.emit(RunEvent::Info(InfoEvent::MinorNote {
                        log: self.log,
                        number,
                        line: text.trim_end().to_string(),
                        reason,
                    }));
                }
                None => {}
            }
            match observation.effect {
                Effect::Failed => {
                    if let Some(failure) = scan.failure() {
                        tracing::debug!(%failure, "failure signature detected");
                    }
                }
                Effect::Armed => {
                    tracing::debug!(log = %self.log, line = number, "wrapped command error, next line holds the cause");
                }
                Effect::Quiet | Effect::Ignored => {}
            }
        }

        out.flush().await.map_err(|source| RunError::WriteLog {
            path: log_path.clone(),
            source,
        })?;
        tracing::debug!(log = %self.log, lines = number, step = scan.step(), "output drained");

        Ok(Drained {
            scan,
            lines: number,
            log_path,
        })
    }
}

fn banner() -> String {
    format!("Initialized from eqgzi-manager v{VERSION}\n")
}

async fn write_all(
    out: &mut BufWriter<tokio::fs::File>,
    path: &Path,
    bytes: &[u8],
) -> Result<(), RunError> {
    out.write_all(bytes)
        .await
        .map_err(|source| RunError::WriteLog {
            path: path.to_path_buf(),
            source,
        })
}
