//! Launching zone scripts and merging their output.

use super::{ProcessExit, RunError};
use crate::model::{LogName, PipelineConfig};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Lines from a process, each including its terminator when one was read.
pub type LineStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// Build the command for one pipeline step. stdout and stderr are piped.
pub fn script_command(cfg: &PipelineConfig, log: LogName) -> Command {
    let zone_dir = cfg.zone_dir();
    let mut cmd = Command::new(zone_dir.join(log.script_file()));
    cmd.current_dir(&zone_dir)
        .envs(script_env(cfg))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own group, so a kill reaches whatever the script started.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Kill `child` and everything it started.
///
/// Grandchildren such as Blender inherit the output pipes, so killing only the
/// direct child would leave the stream open.
pub async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        let result = tree_kill_command(pid)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!(pid, %status, "process tree kill failed"),
            Err(e) => tracing::debug!(pid, error = %e, "process tree kill failed"),
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed");
    }
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/T", "/F", "/PID"]).arg(pid.to_string());
    cmd
}

#[cfg(not(windows))]
fn tree_kill_command(pid: u32) -> Command {
    let mut cmd = Command::new("kill");
    cmd.args(["-KILL", "--"]).arg(format!("-{pid}"));
    cmd
}

/// Environment the zone scripts expect, layered over the inherited one.
fn script_env(cfg: &PipelineConfig) -> Vec<(&'static str, OsString)> {
    let tools_dir = cfg.work_dir.join("tools");
    let blender_dir = blender_dir(&cfg.blender_path);

    let mut search: Vec<PathBuf> = vec![blender_dir.clone(), tools_dir.clone()];
    if let Some(existing) = std::env::var_os("PATH") {
        search.extend(std::env::split_paths(&existing));
    }
    let path = std::env::join_paths(search).unwrap_or_else(|_| tools_dir.clone().into_os_string());

    let mut eqgzi = tools_dir.into_os_string();
    eqgzi.push(std::path::MAIN_SEPARATOR_STR);

    let server_path = if cfg!(windows) {
        cfg.server_path.replace('/', "\\")
    } else {
        cfg.server_path.clone()
    };

    vec![
        ("PATH", path),
        ("EQPATH", OsString::from(&cfg.eq_path)),
        ("EQGZI", eqgzi),
        ("ZONE", OsString::from(&cfg.zone)),
        ("EQSERVERPATH", OsString::from(server_path)),
        ("BLENDERPATH", blender_dir.into_os_string()),
    ]
}

/// Directory holding the Blender executable. Older configs may name the binary itself.
fn blender_dir(blender_path: &str) -> PathBuf {
    let path = PathBuf::from(blender_path);
    match path.parent() {
        Some(parent) if path.is_file() => parent.to_path_buf(),
        _ => path,
    }
}

fn line_stream<R>(reader: R) -> LineStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf), Some(reader))),
            // Stop after the first read error.
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Merge stdout and stderr of `child` into one stream, interleaved by arrival.
pub fn merged_lines(child: &mut Child) -> Result<LineStream, RunError> {
    let stdout = child.stdout.take().ok_or(RunError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(RunError::MissingPipe("stderr"))?;
    Ok(stream::select(line_stream(stdout), line_stream(stderr)).boxed())
}

pub fn exit_from_status(status: ExitStatus) -> ProcessExit {
    if status.success() {
        ProcessExit::Success
    } else {
        ProcessExit::Failed(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(work_dir: PathBuf) -> PipelineConfig {
        PipelineConfig {
            work_dir,
            zone: "arena".into(),
            blender_path: "/opt/blender".into(),
            eq_path: "C:/eq".into(),
            server_path: "/srv/eqemu/".into(),
            eq_copy: false,
            server_copy: false,
            timeout: None,
        }
    }

    #[test]
    fn env_carries_zone_settings() {
        let env = script_env(&cfg(PathBuf::from("/work")));
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("ZONE"), OsString::from("arena"));
        assert_eq!(get("EQPATH"), OsString::from("C:/eq"));
        assert_eq!(get("BLENDERPATH"), OsString::from("/opt/blender"));

        let search: Vec<PathBuf> = std::env::split_paths(&get("PATH")).collect();
        assert_eq!(search[0], PathBuf::from("/opt/blender"));
        assert_eq!(search[1], PathBuf::from("/work").join("tools"));

        let eqgzi = get("EQGZI").into_string().unwrap();
        assert!(eqgzi.ends_with(std::path::MAIN_SEPARATOR));
    }

    #[test]
    fn blender_binary_path_is_reduced_to_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("Blender");
        std::fs::write(&bin, "").unwrap();

        let mut c = cfg(PathBuf::from("/work"));
        c.blender_path = bin.display().to_string();
        let env = script_env(&c);
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(PathBuf::from(get("BLENDERPATH")), dir.path());
        let search: Vec<PathBuf> = std::env::split_paths(&get("PATH")).collect();
        assert_eq!(search[0], dir.path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merged_lines_reads_both_pipes() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2; printf tail")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let lines: Vec<Vec<u8>> = merged_lines(&mut child)
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        let status = child.wait().await.unwrap();
        assert_eq!(exit_from_status(status), ProcessExit::Success);

        let mut text: Vec<String> = lines
            .into_iter()
            .map(|l| String::from_utf8(l).unwrap())
            .collect();
        text.sort();
        assert_eq!(text, vec!["err\n", "out\n", "tail"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_tree_closes_pipes_held_by_grandchildren() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo started; sleep 30; echo never")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut lines = merged_lines(&mut child).unwrap();
        assert_eq!(lines.next().await.unwrap().unwrap(), b"started\n");

        let started = std::time::Instant::now();
        kill_tree(&mut child).await;
        assert!(lines.next().await.is_none());
        child.wait().await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let status = Command::new("sh")
            .arg("-c")
            .arg("exit 3")
            .status()
            .await
            .unwrap();
        assert!(matches!(exit_from_status(status), ProcessExit::Failed(_)));
    }
}
