//! Post-run processing utilities.
//!
//! Builds the pipeline report, remembers the zone, and handles exports after a
//! pipeline finishes.

use crate::context::AppContext;
use crate::model::{PipelineReport, StepReport};
use anyhow::{Context, Result};
use std::path::Path;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub report: PipelineReport,
    pub export_messages: Vec<String>,
}

/// Assemble the report for `zone`, persist `last_zone`, and export if requested.
pub(crate) fn process_pipeline_completion(
    ctx: &mut AppContext,
    zone: &str,
    steps: Vec<StepReport>,
    export_json: Option<&Path>,
) -> ProcessedRun {
    let ok = !steps.is_empty() && steps.iter().all(|s| s.ok);
    let report = PipelineReport {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        zone: zone.to_string(),
        steps,
        ok,
    };

    let mut export_messages = Vec::new();
    if ctx.config.last_zone != zone {
        ctx.config.last_zone = zone.to_string();
        if let Err(e) = ctx.save() {
            export_messages.push(format!("Failed saving last zone: {e}"));
        }
    }

    if let Some(path) = export_json {
        match export_report(path, &report) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        report,
        export_messages,
    }
}

pub(crate) fn export_report(path: &Path, report: &PipelineReport) -> Result<()> {
    let body = serde_json::to_string_pretty(report).context("serialize pipeline report")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
