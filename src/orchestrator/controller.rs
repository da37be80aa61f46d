//! Pipeline lifecycle controller.
//!
//! Runs the zone scripts one after another, each with its own log and scan,
//! and emits events for presentation layers. The first failing step stops the
//! pipeline.

use crate::engine::{
    exit_from_status, kill_tree, merged_lines, script_command, ConversionRunner, Drained,
    KillReason, ProcessExit, RunError, RunOutcome,
};
use crate::model::{InfoEvent, LogName, PipelineConfig, RunEvent, StepReport};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How long output may keep flowing after a kill before the stream is cut.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Run the configured steps in order, stopping at the first failure.
pub(crate) async fn run_pipeline(
    cfg: &PipelineConfig,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<Vec<StepReport>, RunError> {
    let mut reports = Vec::new();
    for log in cfg.steps() {
        let report = run_step(cfg, log, event_tx.clone()).await?;
        let ok = report.ok;
        reports.push(report);
        if !ok {
            tracing::info!(step = %log, "pipeline aborted");
            break;
        }
    }
    Ok(reports)
}

/// Spawn one script and drive its output to completion.
pub(crate) async fn run_step(
    cfg: &PipelineConfig,
    log: LogName,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<StepReport, RunError> {
    let zone_dir = cfg.zone_dir();
    let script = zone_dir.join(log.script_file());
    let _ = event_tx.send(RunEvent::StepStarted { log });
    tracing::info!(script = %script.display(), "starting");

    let mut child = script_command(cfg, log)
        .spawn()
        .map_err(|source| RunError::Spawn {
            script: script.clone(),
            source,
        })?;
    // Cut the stream if something outside the killed tree still holds the pipes.
    let (cut_tx, cut_rx) = oneshot::channel::<()>();
    let mut cut_tx = Some(cut_tx);
    let lines = merged_lines(&mut child)?.take_until(cut_rx);

    let drain = ConversionRunner::new(log, &zone_dir)
        .with_events(event_tx.clone())
        .run(lines);
    tokio::pin!(drain);

    let deadline = cfg.timeout.map(|t| Instant::now() + t);
    let mut killed: Option<KillReason> = None;
    let mut grace: Option<Instant> = None;
    // Killing the process tree ends its output; the runner drains to end-of-input.
    let drained: Drained = loop {
        tokio::select! {
            res = &mut drain => break res?,
            _ = sleep_until(grace), if grace.is_some() => {
                tracing::warn!(script = %script.display(), "output still open after kill, closing");
                if let Some(tx) = cut_tx.take() {
                    let _ = tx.send(());
                }
                grace = None;
            }
            _ = sleep_until(deadline), if killed.is_none() && deadline.is_some() => {
                let limit = cfg.timeout.unwrap_or_default();
                tracing::warn!(script = %script.display(), "timed out, killing");
                let _ = event_tx.send(RunEvent::Info(InfoEvent::TimedOut { log, after: limit }));
                kill_tree(&mut child).await;
                killed = Some(KillReason::Timeout(limit));
                grace = Some(Instant::now() + KILL_GRACE);
            }
            _ = tokio::signal::ctrl_c(), if killed.is_none() => {
                tracing::warn!(script = %script.display(), "interrupted, killing");
                let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(format!(
                    "Interrupted, stopping {}…",
                    log.script_file()
                ))));
                kill_tree(&mut child).await;
                killed = Some(KillReason::Interrupted);
                grace = Some(Instant::now() + KILL_GRACE);
            }
        }
    };

    let status = child.wait().await.map_err(|source| RunError::Wait {
        script: script.clone(),
        source,
    })?;
    let exit = match killed {
        Some(reason) => ProcessExit::Killed(reason),
        None => exit_from_status(status),
    };

    let lines = drained.lines;
    let log_path = drained.log_path.clone();
    let step = drained.scan.step();
    let outcome = drained.finish(exit);
    let ok = outcome.is_ok();
    let _ = event_tx.send(RunEvent::StepFinished { log, ok });
    match &outcome {
        RunOutcome::Ok => tracing::info!(step = %log, lines, "finished"),
        RunOutcome::Failed(reason) => tracing::warn!(step = %log, %reason, "failed"),
    }

    Ok(StepReport {
        log,
        log_path,
        lines,
        step,
        ok,
        failure: outcome.failure().map(|r| r.to_string()),
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio::sync::mpsc;

    fn write_script(zone_dir: &Path, log: LogName, body: &str) {
        let path = zone_dir.join(log.script_file());
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn setup(eq_copy: bool, server_copy: bool) -> (tempfile::TempDir, PipelineConfig) {
        let work = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            work_dir: work.path().to_path_buf(),
            zone: "arena".into(),
            blender_path: String::new(),
            eq_path: "/eq".into(),
            server_path: String::new(),
            eq_copy,
            server_copy,
            timeout: None,
        };
        std::fs::create_dir_all(cfg.zone_dir()).unwrap();
        (work, cfg)
    }

    #[tokio::test]
    async fn full_pipeline_succeeds() {
        let (_work, cfg) = setup(true, false);
        let zone_dir = cfg.zone_dir();
        write_script(&zone_dir, LogName::Convert, "echo \"Step 1 $ZONE\"\necho 'Step 7 done'");
        write_script(&zone_dir, LogName::CopyEq, "echo \"copied to $EQPATH\"");

        let (tx, _rx) = mpsc::unbounded_channel();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.ok));
        assert_eq!(reports[0].step, 7);

        let log = std::fs::read_to_string(zone_dir.join("copy_eq.log")).unwrap();
        assert!(log.starts_with("Initialized from eqgzi-manager v"));
        assert!(log.ends_with("copied to /eq\n"));
        let log = std::fs::read_to_string(zone_dir.join("convert.log")).unwrap();
        assert!(log.contains("Step 1 arena\n"));
    }

    #[tokio::test]
    async fn failing_convert_skips_copy_steps() {
        let (_work, cfg) = setup(true, true);
        let zone_dir = cfg.zone_dir();
        write_script(&zone_dir, LogName::Convert, "echo 'Step 4'");
        write_script(&zone_dir, LogName::CopyEq, "echo never");
        write_script(&zone_dir, LogName::CopyServer, "echo never");

        let (tx, _rx) = mpsc::unbounded_channel();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].failure.as_deref(),
            Some("conversion stalled at step 4")
        );
        assert!(!zone_dir.join("copy_eq.log").exists());
    }

    #[tokio::test]
    async fn stderr_failures_are_detected() {
        let (_work, cfg) = setup(true, false);
        let zone_dir = cfg.zone_dir();
        write_script(&zone_dir, LogName::Convert, "echo 'Step 7'");
        write_script(&zone_dir, LogName::CopyEq, "echo 'arena.eqg missing, not copying' 1>&2");

        let (tx, _rx) = mpsc::unbounded_channel();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[1].failure.as_deref(),
            Some("copy_eq.log:1 arena.eqg missing, not copying")
        );
    }

    #[tokio::test]
    async fn non_zero_exit_without_signature_fails() {
        let (_work, cfg) = setup(false, true);
        let zone_dir = cfg.zone_dir();
        write_script(&zone_dir, LogName::Convert, "echo 'Step 7'");
        write_script(&zone_dir, LogName::CopyServer, "echo partial\nexit 2");

        let (tx, _rx) = mpsc::unbounded_channel();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        let failure = reports[1].failure.as_deref().unwrap();
        assert!(failure.starts_with("copy_server.bat failed:"), "{failure}");
    }

    #[tokio::test]
    async fn timeout_kills_the_script() {
        let (_work, mut cfg) = setup(false, false);
        cfg.timeout = Some(Duration::from_millis(200));
        write_script(&cfg.zone_dir(), LogName::Convert, "echo 'Step 1'\nexec sleep 30");

        let (tx, _rx) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(20));
        let failure = reports[0].failure.as_deref().unwrap();
        assert!(failure.starts_with("convert.bat timed out"), "{failure}");
    }

    #[tokio::test]
    async fn timeout_also_stops_processes_the_script_started() {
        let (_work, mut cfg) = setup(false, false);
        cfg.timeout = Some(Duration::from_millis(200));
        // No exec: sleep runs as a grandchild holding the output pipes.
        write_script(&cfg.zone_dir(), LogName::Convert, "echo 'Step 1'\nsleep 30\necho 'Step 7'");

        let (tx, _rx) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let reports = run_pipeline(&cfg, tx).await.unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(reports[0].step, 1);
        assert_eq!(
            reports[0].failure.as_deref(),
            Some("convert.bat timed out after 200ms")
        );
    }

    #[tokio::test]
    async fn missing_script_is_a_spawn_error() {
        let (_work, cfg) = setup(false, false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = run_pipeline(&cfg, tx).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
