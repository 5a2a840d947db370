//! Well-known filesystem locations and atomic writes
//!
//! Paths are computed from the standard OS environment (`ProgramData`,
//! `APPDATA`, `TEMP`); no extra environment contract exists. Writers of
//! shared state rename into place so readers never observe partial files.

use crate::error::Result;
use std::path::PathBuf;

/// Directory name used under the machine-wide and per-user data roots
const APP_DIR_NAME: &str = "mstoolkit";

/// Machine-wide shared data directory for this toolkit
///
/// `%ProgramData%\mstoolkit` on Windows, falling back to the user data
/// directory, then the current directory.
pub fn shared_data_dir() -> PathBuf {
    if let Ok(program_data) = std::env::var("ProgramData") {
        return PathBuf::from(program_data).join(APP_DIR_NAME);
    }
    app_data_dir().unwrap_or_else(|_| PathBuf::from(".").join(APP_DIR_NAME))
}

/// Per-user application data directory for this toolkit
///
/// `%APPDATA%\mstoolkit` on Windows, `~/.local/share/mstoolkit`-style via
/// `HOME` elsewhere, `./mstoolkit` as the last resort.
pub fn app_data_dir() -> Result<PathBuf> {
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Ok(PathBuf::from(appdata).join(APP_DIR_NAME));
    }
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR_NAME));
    }
    Ok(PathBuf::from(".").join(APP_DIR_NAME))
}

/// Scratch directory for downloads and extractions, uniquely named
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{APP_DIR_NAME}-{label}-{}", uuid::Uuid::new_v4()))
}

/// Write a small file atomically: temp file in the same directory + rename
pub fn write_atomic(path: &std::path::Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let temp = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "atomic".to_string())
    ));
    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_round_trip() {
        let dir = std::env::temp_dir().join(format!("mstoolkit-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("token.txt");
        write_atomic(&path, "<Device>abc</Device>").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "<Device>abc</Device>"
        );
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_scratch_dirs_are_unique() {
        assert_ne!(scratch_dir("winget"), scratch_dir("winget"));
    }
}
