//! Failure detection for conversion script output.
//!
//! The conversion scripts rarely exit non-zero when something breaks, so the
//! only usable signal is the text they print. Each line is run through an
//! ordered rule list; the first failing line is kept and everything after it
//! is only logged.

use crate::model::LogName;
use std::fmt;
use std::time::Duration;

/// Lowest `Step N` marker a successful conversion reaches.
pub const FINAL_STEP: u32 = 7;

const STEP_PREFIX: &str = "Step";
const STEP_DIGIT_OFFSET: usize = 5;

/// A line that matched a failure rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFailure {
    pub log: LogName,
    pub number: usize,
    pub line: String,
    pub annotation: Option<&'static str>,
}

impl fmt::Display for LineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.log.log_file(), self.number, self.line)?;
        if let Some(annotation) = self.annotation {
            write!(f, " {annotation}")?;
        }
        Ok(())
    }
}

/// How the external process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failed(String),
    Killed(KillReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout(Duration),
    Interrupted,
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Line(LineFailure),
    Stalled { step: u32 },
    Killed { log: LogName, reason: KillReason },
    Exit { log: LogName, status: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Line(failure) => failure.fmt(f),
            FailureReason::Stalled { step } => write!(f, "conversion stalled at step {step}"),
            FailureReason::Killed {
                log,
                reason: KillReason::Timeout(after),
            } => write!(
                f,
                "{} timed out after {}",
                log.script_file(),
                humantime::format_duration(*after)
            ),
            FailureReason::Killed {
                log,
                reason: KillReason::Interrupted,
            } => write!(f, "{} was interrupted", log.script_file()),
            FailureReason::Exit { log, status } => {
                write!(f, "{} failed: {status}", log.script_file())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Failed(FailureReason),
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RunOutcome::Ok)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            RunOutcome::Ok => None,
            RunOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Set by a `main_cmd error:` marker: the line after it carries the real cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    Idle,
    Armed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    KeyError,
    TextureNotLoaded,
    DeferredCommandError,
    MissingNotCopying,
    GenericError,
    WrappedCommandMarker,
    EmbeddedImagePermission,
}

/// Evaluated top to bottom; the first rule that fires ends evaluation of the line.
const RULES: [Rule; 7] = [
    Rule::KeyError,
    Rule::TextureNotLoaded,
    Rule::DeferredCommandError,
    Rule::MissingNotCopying,
    Rule::GenericError,
    Rule::WrappedCommandMarker,
    Rule::EmbeddedImagePermission,
];

enum Verdict {
    Pass,
    Fail(Option<&'static str>),
    Arm,
}

impl Rule {
    fn check(self, line: &str, step: u32, pending: Pending) -> Verdict {
        match self {
            Rule::KeyError => {
                if !line.starts_with("KeyError:") {
                    return Verdict::Pass;
                }
                if line.contains("not found") && line.contains("bpy_prop_collection") {
                    Verdict::Fail(Some("(an image texture is not properly exported)"))
                } else {
                    Verdict::Fail(None)
                }
            }
            Rule::TextureNotLoaded => {
                if line.contains("GPUTexture: Blender Texture Not Loaded!") {
                    Verdict::Fail(Some("(a reference to a texture in blender is broken)"))
                } else {
                    Verdict::Pass
                }
            }
            Rule::DeferredCommandError => match pending {
                Pending::Armed => Verdict::Fail(None),
                Pending::Idle => Verdict::Pass,
            },
            Rule::MissingNotCopying => {
                if line.contains("missing") && line.contains("not copying") {
                    Verdict::Fail(None)
                } else {
                    Verdict::Pass
                }
            }
            Rule::GenericError => {
                if line.contains("error") && !line.contains("main_cmd error") {
                    Verdict::Fail(None)
                } else {
                    Verdict::Pass
                }
            }
            Rule::WrappedCommandMarker => {
                if step >= FINAL_STEP && line.contains("main_cmd error:") {
                    Verdict::Arm
                } else {
                    Verdict::Pass
                }
            }
            Rule::EmbeddedImagePermission => {
                if line.contains("PermissionError: [Errno 13] Permission denied: '.'") {
                    Verdict::Fail(Some("(This is usually caused by an embedded image)"))
                } else {
                    Verdict::Pass
                }
            }
        }
    }
}

/// What a `Step` marker on the convert log said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepMarker {
    Reached(u32),
    /// The digit did not parse. Never fails the run.
    Malformed(String),
}

/// What the failure rules made of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    Quiet,
    Failed,
    Armed,
    /// A failure was already recorded; the line is only logged.
    Ignored,
}

/// What a single line did to the scan. A marker and a failure can come from the same line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Observation {
    pub marker: Option<StepMarker>,
    pub effect: Effect,
}

impl Observation {
    fn with_effect(effect: Effect) -> Self {
        Self {
            marker: None,
            effect,
        }
    }
}

/// Classification state for one script run.
#[derive(Debug)]
pub struct Scan {
    log: LogName,
    step: u32,
    failure: Option<LineFailure>,
    pending: Pending,
}

impl Scan {
    pub fn new(log: LogName) -> Self {
        Self {
            log,
            step: 0,
            failure: None,
            pending: Pending::Idle,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn failure(&self) -> Option<&LineFailure> {
        self.failure.as_ref()
    }

    /// Classify one line. `number` is 1-based; `raw` may carry its line terminator.
    pub fn observe(&mut self, number: usize, raw: &str) -> Observation {
        if self.failure.is_some() {
            return Observation::with_effect(Effect::Ignored);
        }
        let line = raw.trim_end_matches(['\n', '\r']);

        let mut observation = Observation::default();
        if self.log == LogName::Convert
            && line.starts_with(STEP_PREFIX)
            && line.len() > STEP_DIGIT_OFFSET
        {
            match line
                .get(STEP_DIGIT_OFFSET..=STEP_DIGIT_OFFSET)
                .and_then(|digit| digit.parse::<u32>().ok())
            {
                // Overwrite, not max: the scripts may report steps out of order.
                Some(step) => {
                    self.step = step;
                    observation.marker = Some(StepMarker::Reached(step));
                }
                None => {
                    observation.marker = Some(StepMarker::Malformed(format!(
                        "step marker has no digit at offset {STEP_DIGIT_OFFSET}"
                    )));
                }
            }
        }

        for rule in RULES {
            match rule.check(line, self.step, self.pending) {
                Verdict::Pass => continue,
                Verdict::Fail(annotation) => {
                    if rule == Rule::DeferredCommandError {
                        self.pending = Pending::Idle;
                    }
                    self.failure = Some(LineFailure {
                        log: self.log,
                        number,
                        line: line.to_string(),
                        annotation,
                    });
                    observation.effect = Effect::Failed;
                    return observation;
                }
                Verdict::Arm => {
                    self.pending = Pending::Armed;
                    observation.effect = Effect::Armed;
                    return observation;
                }
            }
        }
        observation
    }

    /// Decide the run outcome once output is drained and the process has exited.
    pub fn finish(self, exit: ProcessExit) -> RunOutcome {
        if let Some(failure) = self.failure {
            return RunOutcome::Failed(FailureReason::Line(failure));
        }
        if let ProcessExit::Killed(reason) = exit {
            return RunOutcome::Failed(FailureReason::Killed {
                log: self.log,
                reason,
            });
        }
        if self.log == LogName::Convert && self.step < FINAL_STEP {
            return RunOutcome::Failed(FailureReason::Stalled { step: self.step });
        }
        if let ProcessExit::Failed(status) = exit {
            return RunOutcome::Failed(FailureReason::Exit {
                log: self.log,
                status,
            });
        }
        RunOutcome::Ok
    }
}
