//! Fire-and-forget launchers for Blender and the system file browser.

use crate::context::AppContext;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

fn blender_executable(blender_path: &str) -> PathBuf {
    let exe = if cfg!(windows) { "blender.exe" } else { "blender" };
    if blender_path.is_empty() {
        return PathBuf::from(exe);
    }
    let path = PathBuf::from(blender_path);
    // Older configs stored the binary itself.
    if path.is_file() {
        path
    } else {
        path.join(exe)
    }
}

fn file_browser() -> &'static str {
    if cfg!(windows) {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

/// Start Blender on the zone's `.blend` file without waiting for it.
pub(crate) fn open_in_blender(ctx: &AppContext, zone: &str) -> Result<()> {
    let exe = blender_executable(&ctx.config.blender_path);
    let blend = ctx.zones_dir().join(zone).join(format!("{zone}.blend"));
    // New zones only carry the scripts; the .blend is saved from Blender.
    if !blend.is_file() {
        bail!(
            "{} does not exist, save the zone from Blender first",
            blend.display()
        );
    }
    Command::new(&exe)
        .arg(&blend)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to run {}", exe.display()))?;
    tracing::info!(zone, exe = %exe.display(), "opened in blender");
    Ok(())
}

/// Open the zone folder in the platform file browser.
pub(crate) fn open_folder(ctx: &AppContext, zone: &str) -> Result<()> {
    let dir = ctx.zones_dir().join(zone);
    Command::new(file_browser())
        .arg(&dir)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to open {}", dir.display()))?;
    Ok(())
}
