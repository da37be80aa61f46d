//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for pipeline results, tool status
//! and update checks.

use crate::context::AppContext;
use crate::model::PipelineReport;
use crate::release::{Tool, UpdateStatus};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_pipeline_summary(report: &PipelineReport) -> TextSummary {
    let mut lines = Vec::new();
    for step in &report.steps {
        let state = if step.ok { "ok" } else { "FAILED" };
        lines.push(format!(
            "{:<12} {:<6} {} lines, log {}",
            step.log.script_file(),
            state,
            step.lines,
            step.log_path.display()
        ));
    }
    match report.failure() {
        Some(reason) => lines.push(format!("Failed: {reason}")),
        None if report.ok => lines.push(format!("Created {}.eqg", report.zone)),
        None => lines.push("Nothing ran".to_string()),
    }
    TextSummary { lines }
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}

pub(crate) fn build_status_summary(ctx: &AppContext, zones: &[String]) -> TextSummary {
    let cfg = &ctx.config;
    let mut lines = vec![
        format!("Working dir:   {}", ctx.work_dir.display()),
        format!("Blender path:  {}", or_unset(&cfg.blender_path)),
        format!("Zone:          {}", or_unset(&cfg.last_zone)),
        format!("Zones:         {}", zones.len()),
        format!(
            "Copy to EQ:    {} {}",
            if cfg.is_eq_copy { "on " } else { "off" },
            or_unset(&cfg.eq_path)
        ),
        format!(
            "Copy to server: {} {}",
            if cfg.is_server_copy { "on " } else { "off" },
            or_unset(&cfg.server_path)
        ),
    ];
    for tool in Tool::ALL {
        let installed = ctx.tools_dir().join(tool.executable()).is_file();
        lines.push(format!(
            "{:<17} {} ({})",
            format!("{}:", tool.label()),
            or_unset(tool.installed_version(cfg)),
            if installed { "installed" } else { "missing" }
        ));
    }
    TextSummary { lines }
}

pub(crate) fn build_update_summary(statuses: &[UpdateStatus]) -> TextSummary {
    let lines = statuses
        .iter()
        .map(|s| {
            let verdict = if !s.asset_available {
                "no downloadable asset"
            } else if s.needs_update() {
                "update available"
            } else {
                "up to date"
            };
            format!(
                "{}: installed {} latest {} ({verdict})",
                s.tool.label(),
                or_unset(&s.installed),
                s.latest
            )
        })
        .collect();
    TextSummary { lines }
}
