//! Index schema version gate.
//!
//! The root directory carries a tiny ASCII version file. Any mismatch with
//! the compiled-in version is a signal to wipe and rebuild the whole root,
//! never to migrate: the index is derived data, rebuilding is always safe.

use std::fs;
use std::io;
use std::path::Path;

use covmap_error::{CovmapError, Result};

/// Current schema version of the index root.
pub const INDEX_FORMAT_VERSION: u32 = 3;

/// Name of the version file inside the index root.
pub const VERSION_FILE_NAME: &str = "index.version";

/// Read the schema version recorded in `root`, `None` when the file does
/// not exist yet.
pub fn read_version(root: &Path) -> Result<Option<u32>> {
    let path = root.join(VERSION_FILE_NAME);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = text.trim().parse::<u32>().map_err(|err| {
        CovmapError::corrupt(format!(
            "unreadable version file {}: {err}",
            path.display()
        ))
    })?;
    Ok(Some(version))
}

/// Record `version` as the schema version of `root`.
pub fn write_version(root: &Path, version: u32) -> Result<()> {
    fs::write(root.join(VERSION_FILE_NAME), format!("{version}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(read_version(dir.path()).expect("read"), None);
    }

    #[test]
    fn version_round_trips() {
        let dir = tempdir().expect("tempdir");
        write_version(dir.path(), INDEX_FORMAT_VERSION).expect("write");
        assert_eq!(
            read_version(dir.path()).expect("read"),
            Some(INDEX_FORMAT_VERSION)
        );
    }

    #[test]
    fn garbage_version_file_is_corruption() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(VERSION_FILE_NAME), "not-a-number")
            .expect("write garbage");
        let err = read_version(dir.path()).expect_err("garbage must surface");
        assert!(err.to_string().contains("unreadable version file"));
        assert!(err.triggers_rebuild());
    }
}
