//! Client, server and Blender locations, and the tool files that mirror them.

use crate::config::ConfigError;
use crate::context::AppContext;
use std::path::{Path, PathBuf};

pub const MACOS_BLENDER_APP: &str = "/Applications/Blender.app";
pub const MACOS_BLENDER_DIR: &str = "/Applications/Blender.app/Contents/MacOS/";

/// Subdirectories an EQEmu server folder must contain.
const SERVER_SUBDIRS: [&str; 4] = ["base", "nav", "volume", "water"];

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path cannot be empty")]
    Empty,

    #[error("path {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("path {} is not a directory", .0.display())]
    NotDirectory(PathBuf),

    #[error("blender was not found")]
    BlenderNotFound,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("encode map_edit config: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn require_dir(path: &Path) -> Result<(), PathError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PathError::NotDirectory(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PathError::NotFound(path.to_path_buf()))
        }
        Err(source) => Err(PathError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn normalize_eq_path(input: &str) -> Result<String, PathError> {
    let path = input.trim().replace('\\', "/");
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(path)
}

/// Server paths always end with a `/` so subdirectories can be appended directly.
pub fn normalize_server_path(input: &str) -> Result<String, PathError> {
    let mut path = input.trim().replace('\\', "/");
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    Ok(path)
}

pub fn validate_server_path(path: &str) -> Result<(), PathError> {
    require_dir(Path::new(path))?;
    for sub in SERVER_SUBDIRS {
        require_dir(&Path::new(path).join(sub))?;
    }
    Ok(())
}

/// Replace every line containing `needle` with `replacement`. Returns whether anything changed.
pub fn rewrite_setting_line(
    path: &Path,
    needle: &str,
    replacement: &str,
) -> Result<bool, PathError> {
    let io_err = |source: std::io::Error| PathError::Io {
        path: path.to_path_buf(),
        source,
    };
    let contents = std::fs::read_to_string(path).map_err(io_err)?;
    let mut changed = false;
    let mut out = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        if line.contains(needle) {
            out.push_str(replacement);
            changed = true;
        } else {
            out.push_str(line);
        }
    }
    if changed {
        std::fs::write(path, out).map_err(io_err)?;
    }
    Ok(changed)
}

/// Point the client copy step at `input` and mirror it into `tools/settings.txt`.
pub fn set_eq_path(ctx: &mut AppContext, input: &str) -> Result<String, PathError> {
    let eq_path = normalize_eq_path(input)?;
    require_dir(Path::new(&eq_path))?;

    let settings = ctx.tools_dir().join("settings.txt");
    if settings.is_file() {
        let line = format!("EverQuestDirectory = {eq_path}\r\n");
        if !rewrite_setting_line(&settings, "EverQuestDirectory =", &line)? {
            tracing::warn!(path = %settings.display(), "no EverQuestDirectory entry to update");
        }
    } else {
        tracing::debug!(path = %settings.display(), "settings.txt not present, skipping");
    }

    ctx.config.eq_path = eq_path.clone();
    ctx.save()?;
    Ok(eq_path)
}

/// Point the server copy step at `input` and write the navmesh editor's config for it.
pub fn set_server_path(ctx: &mut AppContext, input: &str) -> Result<String, PathError> {
    let server_path = normalize_server_path(input)?;
    validate_server_path(&server_path)?;

    ctx.config.server_path = server_path.clone();
    ctx.save()?;

    let map_edit_dir = ctx.tools_dir().join("map_edit");
    std::fs::create_dir_all(&map_edit_dir).map_err(|source| PathError::Io {
        path: map_edit_dir.clone(),
        source,
    })?;
    let config_path = map_edit_dir.join("config.json");
    let body = serde_json::to_string_pretty(&map_edit_config(&server_path))?;
    std::fs::write(&config_path, body).map_err(|source| PathError::Io {
        path: config_path,
        source,
    })?;
    Ok(server_path)
}

fn map_edit_config(server_path: &str) -> serde_json::Value {
    serde_json::json!({
        "paths": {
            "base": format!("{server_path}base/"),
            "project": "project/",
            "nav": format!("{server_path}nav/"),
            "water": format!("{server_path}water/"),
            "volume": format!("{server_path}volume/"),
        }
    })
}

/// Finds a Blender installation directory.
pub trait PathProbe {
    fn blender_dir(&self) -> Option<PathBuf>;
}

/// Looks in the macOS app bundle, then along `PATH`.
pub struct SystemProbe;

impl PathProbe for SystemProbe {
    fn blender_dir(&self) -> Option<PathBuf> {
        if cfg!(target_os = "macos") && Path::new(MACOS_BLENDER_APP).exists() {
            return Some(PathBuf::from(MACOS_BLENDER_DIR));
        }
        let exe = if cfg!(windows) { "blender.exe" } else { "blender" };
        let search = std::env::var_os("PATH")?;
        std::env::split_paths(&search).find(|dir| dir.join(exe).is_file())
    }
}

/// Store the directory reported by `probe` as the Blender path.
pub fn detect_blender(ctx: &mut AppContext, probe: &dyn PathProbe) -> Result<String, PathError> {
    let dir = probe.blender_dir().ok_or(PathError::BlenderNotFound)?;
    let mut blender_path = dir.to_string_lossy().into_owned();
    if !blender_path.ends_with(['/', '\\']) {
        blender_path.push(std::path::MAIN_SEPARATOR);
    }
    ctx.config.blender_path = blender_path.clone();
    ctx.save()?;
    Ok(blender_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;

    fn ctx(dir: &Path) -> AppContext {
        AppContext::load(dir).unwrap()
    }

    #[test]
    fn server_path_is_normalized() {
        assert_eq!(
            normalize_server_path(" C:\\eqemu\\server ").unwrap(),
            "C:/eqemu/server/"
        );
        assert_eq!(normalize_server_path("/srv/eq/").unwrap(), "/srv/eq/");
        assert!(matches!(normalize_server_path("  "), Err(PathError::Empty)));
    }

    #[test]
    fn server_path_needs_all_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = format!("{}/", dir.path().display());
        for sub in ["base", "nav", "volume"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }
        assert!(matches!(
            validate_server_path(&root),
            Err(PathError::NotFound(p)) if p.ends_with("water")
        ));
        std::fs::write(dir.path().join("water"), "").unwrap();
        assert!(matches!(
            validate_server_path(&root),
            Err(PathError::NotDirectory(_))
        ));
    }

    #[test]
    fn set_server_path_writes_map_edit_config() {
        let work = tempfile::tempdir().unwrap();
        let server = tempfile::tempdir().unwrap();
        for sub in SERVER_SUBDIRS {
            std::fs::create_dir(server.path().join(sub)).unwrap();
        }
        let mut c = ctx(work.path());
        let saved = set_server_path(&mut c, &server.path().display().to_string()).unwrap();
        assert!(saved.ends_with('/'));

        let raw = std::fs::read_to_string(work.path().join("tools/map_edit/config.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["paths"]["project"], "project/");
        assert_eq!(json["paths"]["nav"], format!("{saved}nav/"));

        let reloaded = AppContext::load(work.path()).unwrap();
        assert_eq!(reloaded.config.server_path, saved);
    }

    #[test]
    fn set_eq_path_rewrites_settings_txt() {
        let work = tempfile::tempdir().unwrap();
        let eq = tempfile::tempdir().unwrap();
        std::fs::create_dir(work.path().join("tools")).unwrap();
        let settings = work.path().join("tools/settings.txt");
        std::fs::write(
            &settings,
            "[Options]\r\nEverQuestDirectory = old\r\nLogging = 1\r\n",
        )
        .unwrap();

        let mut c = ctx(work.path());
        let saved = set_eq_path(&mut c, &eq.path().display().to_string()).unwrap();
        let raw = std::fs::read_to_string(&settings).unwrap();
        assert_eq!(
            raw,
            format!("[Options]\r\nEverQuestDirectory = {saved}\r\nLogging = 1\r\n")
        );
        assert!(work.path().join(CONFIG_FILE).is_file());
        assert_eq!(c.config.eq_path, saved);
    }

    #[test]
    fn set_eq_path_requires_directory() {
        let work = tempfile::tempdir().unwrap();
        let mut c = ctx(work.path());
        let missing = work.path().join("no-such-client");
        assert!(matches!(
            set_eq_path(&mut c, &missing.display().to_string()),
            Err(PathError::NotFound(_))
        ));
    }

    struct FixedProbe(Option<PathBuf>);

    impl PathProbe for FixedProbe {
        fn blender_dir(&self) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    #[test]
    fn detected_blender_path_is_saved_with_separator() {
        let work = tempfile::tempdir().unwrap();
        let mut c = ctx(work.path());
        let path = detect_blender(&mut c, &FixedProbe(Some(PathBuf::from("/opt/blender")))).unwrap();
        assert_eq!(path, format!("/opt/blender{}", std::path::MAIN_SEPARATOR));
        assert_eq!(AppContext::load(work.path()).unwrap().config.blender_path, path);

        assert!(matches!(
            detect_blender(&mut c, &FixedProbe(None)),
            Err(PathError::BlenderNotFound)
        ));
    }
}
