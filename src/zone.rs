//! Zone project folders under `zones/`.

use crate::model::LogName;
use std::path::{Path, PathBuf};

const CONVERT_TEMPLATE: &str = include_str!("../templates/convert.bat");
const COPY_EQ_TEMPLATE: &str = include_str!("../templates/copy_eq.bat");
const COPY_SERVER_TEMPLATE: &str = include_str!("../templates/copy_server.bat");

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("zone cannot be empty")]
    EmptyName,

    #[error("zone {0} shouldn't have a period")]
    HasPeriod(String),

    #[error("zone {0} shouldn't contain path separators")]
    HasSeparator(String),

    #[error("zone {0} already exists")]
    AlreadyExists(String),

    #[error("zone {0} does not exist")]
    Unknown(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ZoneError + '_ {
    move |source| ZoneError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Zone names are the subdirectories of `zones_dir`, sorted. The folder is created if missing.
pub fn list_zones(zones_dir: &Path) -> Result<Vec<String>, ZoneError> {
    std::fs::create_dir_all(zones_dir).map_err(io_err(zones_dir))?;
    let mut zones = Vec::new();
    for entry in std::fs::read_dir(zones_dir).map_err(io_err(zones_dir))? {
        let entry = entry.map_err(io_err(zones_dir))?;
        if !entry.file_type().map_err(io_err(zones_dir))?.is_dir() {
            continue;
        }
        zones.push(entry.file_name().to_string_lossy().into_owned());
    }
    zones.sort();
    Ok(zones)
}

/// Trim and lower-case a user supplied zone name, rejecting unusable ones.
pub fn normalize_zone_name(input: &str) -> Result<String, ZoneError> {
    let name = input.trim().to_lowercase();
    if name.is_empty() {
        return Err(ZoneError::EmptyName);
    }
    if name.contains('.') {
        return Err(ZoneError::HasPeriod(name));
    }
    if name.contains(['/', '\\']) {
        return Err(ZoneError::HasSeparator(name));
    }
    Ok(name)
}

/// Create a zone folder holding the pipeline scripts. Returns the normalized name.
pub fn create_zone(zones_dir: &Path, input: &str) -> Result<String, ZoneError> {
    let name = normalize_zone_name(input)?;
    std::fs::create_dir_all(zones_dir).map_err(io_err(zones_dir))?;

    let dir = zones_dir.join(&name);
    match std::fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(ZoneError::AlreadyExists(name));
        }
        Err(e) => return Err(io_err(&dir)(e)),
    }

    for (log, body) in [
        (LogName::Convert, CONVERT_TEMPLATE),
        (LogName::CopyEq, COPY_EQ_TEMPLATE),
        (LogName::CopyServer, COPY_SERVER_TEMPLATE),
    ] {
        let path = dir.join(log.script_file());
        std::fs::write(&path, body).map_err(io_err(&path))?;
    }
    tracing::info!(zone = %name, "created zone");
    Ok(name)
}

/// Fail unless `zone` is one of the folders in `zones_dir`.
pub fn ensure_zone(zones_dir: &Path, zone: &str) -> Result<(), ZoneError> {
    if list_zones(zones_dir)?.iter().any(|z| z == zone) {
        Ok(())
    } else {
        Err(ZoneError::Unknown(zone.to_string()))
    }
}
