use super::ReleaseError;
use std::io::Cursor;
use std::path::Path;

/// Unpack a zip archive into `dest`, returning the number of files written.
///
/// Entries whose path would land outside `dest` abort the extraction.
pub fn extract_zip(archive: &[u8], dest: &Path) -> Result<usize, ReleaseError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| ReleaseError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(ReleaseError::io(&out_path))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(ReleaseError::io(parent))?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(ReleaseError::io(&out_path))?;
        std::io::copy(&mut entry, &mut out).map_err(ReleaseError::io(&out_path))?;

        set_mode(&out_path, entry.unix_mode())?;
        written += 1;
    }
    Ok(written)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<(), ReleaseError> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(ReleaseError::io(path)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<(), ReleaseError> {
    Ok(())
}
