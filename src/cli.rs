use crate::context::AppContext;
use crate::model::{PipelineConfig, RunEvent};
use crate::release::{self, GithubClient, Tool};
use crate::{engine, launch, orchestrator, paths, text_summary, zone};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

type OutputWriter = (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
);

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> OutputWriter {
    spawn_output_writer_to(std::io::stdout(), std::io::stderr())
}

fn spawn_output_writer_to<O, E>(stdout: O, stderr: E) -> OutputWriter
where
    O: Write + Send + 'static,
    E: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut out = std::io::LineWriter::new(stdout);
        let mut err = std::io::LineWriter::new(stderr);

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Close the channel and wait until everything queued has been written.
async fn close_output((tx, handle): OutputWriter) {
    drop(tx);
    let _ = handle.await;
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "eqgzi-manager",
    version,
    about = "Build eqgzi zones from Blender and keep the eqgzi toolchain up to date"
)]
pub struct Cli {
    /// Folder holding zones/, tools/ and eqgzi-manager.conf
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show settings, selected zone and tool versions
    Status,

    /// List zones
    Zones,

    /// Create a zone folder with the pipeline scripts
    NewZone { name: String },

    /// Select the zone other commands act on
    Select { zone: String },

    /// Run convert.bat, then the enabled copy steps
    Convert {
        /// Zone to convert (defaults to the selected zone)
        #[arg(long)]
        zone: Option<String>,

        /// Kill a step that runs longer than this (e.g. 10m)
        #[arg(long)]
        timeout: Option<humantime::Duration>,

        /// Echo every script line as it is read
        #[arg(long, short)]
        verbose: bool,

        /// Print the pipeline report as JSON
        #[arg(long)]
        json: bool,

        /// Write the pipeline report as JSON
        #[arg(long)]
        export_json: Option<PathBuf>,
    },

    /// Set the EverQuest client folder zones are copied to
    SetEq { path: String },

    /// Set the EQEmu server folder nav data is copied to
    SetServer { path: String },

    /// Use --enabled true or --enabled false
    CopyEq {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Use --enabled true or --enabled false
    CopyServer {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Set the Blender folder, or detect it when no path is given
    Blender { path: Option<String> },

    /// Download and unpack the latest eqgzi and/or LanternExtractor
    Download {
        #[arg(value_enum, default_value_t = ToolArg::All)]
        tool: ToolArg,
    },

    /// Check whether newer tool releases exist
    UpdateCheck,

    /// Open the zone's .blend file in Blender
    Open {
        zone: Option<String>,
    },

    /// Open the zone folder in the file browser
    Folder {
        zone: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToolArg {
    Eqgzi,
    Lantern,
    All,
}

impl ToolArg {
    fn tools(self) -> Vec<Tool> {
        match self {
            ToolArg::Eqgzi => vec![Tool::Eqgzi],
            ToolArg::Lantern => vec![Tool::Lantern],
            ToolArg::All => Tool::ALL.to_vec(),
        }
    }
}

/// A pipeline step failed; the reason has already been printed.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PipelineFailed(pub String);

fn user_agent() -> String {
    format!("eqgzi-manager/{}", engine::VERSION)
}

pub async fn run(args: Cli) -> Result<()> {
    let work_dir = match args.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("get current directory")?,
    };
    let mut ctx = AppContext::load(&work_dir).context("failed to load config")?;

    match args.command {
        Command::Status => {
            let zones = zone::list_zones(&ctx.zones_dir())?;
            let (_, changed) = ctx.resolve_zone(&zones);
            if changed {
                ctx.save()?;
            }
            print_lines(text_summary::build_status_summary(&ctx, &zones).lines);
        }
        Command::Zones => {
            let zones = zone::list_zones(&ctx.zones_dir())?;
            let selected = ctx.config.last_zone.clone();
            for z in zones {
                let marker = if z == selected { "*" } else { " " };
                println!("{marker} {z}");
            }
        }
        Command::NewZone { name } => {
            let created = zone::create_zone(&ctx.zones_dir(), &name)?;
            ctx.config.last_zone = created.clone();
            ctx.save()?;
            println!("Created zones/{created}");
        }
        Command::Select { zone: name } => {
            zone::ensure_zone(&ctx.zones_dir(), &name)?;
            ctx.config.last_zone = name.clone();
            ctx.save()?;
            println!("Focused on {name}");
        }
        Command::Convert {
            zone,
            timeout,
            verbose,
            json,
            export_json,
        } => {
            let zone = pick_zone(&mut ctx, zone)?;
            let cfg = ctx.pipeline_config(&zone, timeout.map(Duration::from));
            let output = spawn_output_writer();
            run_convert(&mut ctx, cfg, verbose, json, export_json, output).await?;
        }
        Command::SetEq { path } => {
            let saved = paths::set_eq_path(&mut ctx, &path)?;
            println!("Updated EQ Path to {saved}");
        }
        Command::SetServer { path } => {
            let saved = paths::set_server_path(&mut ctx, &path)?;
            println!("Updated Server Path to {saved}");
        }
        Command::CopyEq { enabled } => {
            ctx.config.is_eq_copy = enabled;
            ctx.save()?;
            if enabled && ctx.config.eq_path.is_empty() {
                eprintln!("EQ path is not set yet, use set-eq");
            }
        }
        Command::CopyServer { enabled } => {
            ctx.config.is_server_copy = enabled;
            ctx.save()?;
            if enabled && ctx.config.server_path.is_empty() {
                eprintln!("Server path is not set yet, use set-server");
            }
        }
        Command::Blender { path } => {
            let saved = match path {
                Some(p) => {
                    ctx.config.blender_path = p.trim().to_string();
                    ctx.save()?;
                    ctx.config.blender_path.clone()
                }
                None => paths::detect_blender(&mut ctx, &paths::SystemProbe)?,
            };
            println!("Updated blender path to {saved}");
        }
        Command::Download { tool } => {
            let client = GithubClient::new(&user_agent())?;
            for t in tool.tools() {
                let report = release::install_latest(&mut ctx, &client, t)
                    .await
                    .with_context(|| format!("failed {}", t.label()))?;
                println!(
                    "{} {}: {} files{}",
                    t.label(),
                    report.tag,
                    report.files,
                    if report.cached { " (cached)" } else { "" }
                );
            }
        }
        Command::UpdateCheck => {
            let client = GithubClient::new(&user_agent())?;
            let statuses = release::check_updates(&ctx.config, &client).await?;
            print_lines(text_summary::build_update_summary(&statuses).lines);
        }
        Command::Open { zone } => {
            let zone = pick_zone(&mut ctx, zone)?;
            launch::open_in_blender(&ctx, &zone)?;
            println!("Opening {zone} in Blender");
        }
        Command::Folder { zone } => {
            let zone = pick_zone(&mut ctx, zone)?;
            launch::open_folder(&ctx, &zone)?;
            println!("Opened {zone} folder");
        }
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

/// Explicit zone if given and valid, else the selected one (or the first zone).
fn pick_zone(ctx: &mut AppContext, requested: Option<String>) -> Result<String> {
    let zones_dir = ctx.zones_dir();
    if let Some(z) = requested {
        zone::ensure_zone(&zones_dir, &z)?;
        return Ok(z);
    }
    let zones = zone::list_zones(&zones_dir)?;
    let (picked, changed) = ctx.resolve_zone(&zones);
    if changed {
        ctx.save()?;
    }
    picked.context("no zones found, create one with new-zone")
}

async fn run_convert(
    ctx: &mut AppContext,
    cfg: PipelineConfig,
    verbose: bool,
    json: bool,
    export_json: Option<PathBuf>,
    output: OutputWriter,
) -> Result<()> {
    let (out_tx, out_handle) = output;
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();

    let _ = out_tx.send(OutputLine::Stderr(format!("Converting {}", cfg.zone)));
    let pipeline_cfg = cfg.clone();
    let handle =
        tokio::spawn(async move { orchestrator::run_pipeline(&pipeline_cfg, evt_tx).await });

    while let Some(ev) = evt_rx.recv().await {
        if json {
            continue;
        }
        match ev {
            RunEvent::StepStarted { log } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {} ==", log.script_file())));
            }
            RunEvent::Line { log, number, text } => {
                if verbose {
                    let _ = out_tx.send(OutputLine::Stdout(format!(
                        "{}:{} {}",
                        log.log_file(),
                        number,
                        text
                    )));
                }
            }
            RunEvent::StepReached { step } => {
                if !verbose {
                    let _ = out_tx.send(OutputLine::Stderr(format!(
                        "step {step}/{}",
                        engine::FINAL_STEP
                    )));
                }
            }
            RunEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            RunEvent::StepFinished { .. } => {}
        }
    }

    let result = handle
        .await
        .context("pipeline task failed")
        .and_then(|r| r.map_err(anyhow::Error::from));
    let steps = match result {
        Ok(steps) => steps,
        Err(e) => {
            close_output((out_tx, out_handle)).await;
            return Err(e);
        }
    };
    let processed =
        orchestrator::process_pipeline_completion(ctx, &cfg.zone, steps, export_json.as_deref());

    if json {
        let out = serde_json::to_string_pretty(&processed.report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in text_summary::build_pipeline_summary(&processed.report).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    close_output((out_tx, out_handle)).await;

    match processed.report.failure() {
        Some(reason) => Err(PipelineFailed(reason.to_string()).into()),
        None => Ok(()),
    }
}
