use crate::error::PersistenceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the data directory, both local and in the home directory
pub const DATA_DIR_NAME: &str = ".daykeeper";

pub const CONFIG_FILE: &str = "config.toml";
pub const BACKLOG_FILE: &str = "backlog.json";
pub const STREAKS_FILE: &str = "streaks.json";
pub const DAY_FILE: &str = "day.json";

/// Get the data directory - an explicit override, then a local .daykeeper, then ~/.daykeeper
pub fn get_data_dir(explicit: Option<&Path>) -> Result<PathBuf, PersistenceError> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }

    // Check for local .daykeeper directory
    if let Ok(current_dir) = env::current_dir() {
        if let Some(local_dir) = find_local_data_dir(&current_dir) {
            return Ok(local_dir);
        }
    }

    // Fall back to global ~/.daykeeper
    let home = dirs::home_dir().ok_or(PersistenceError::NoDataDir)?;
    Ok(home.join(DATA_DIR_NAME))
}

/// Find local .daykeeper directory by walking up the directory tree
fn find_local_data_dir(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let data_dir = current.join(DATA_DIR_NAME);
        if data_dir.is_dir() {
            return Some(data_dir);
        }

        // Move up to parent directory
        current = current.parent()?;
    }
}

/// Ensure the data directory exists
pub fn ensure_data_dir(explicit: Option<&Path>) -> Result<PathBuf, PersistenceError> {
    let dir = get_data_dir(explicit)?;
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(dir)
}

pub fn config_file(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

pub fn backlog_file(dir: &Path) -> PathBuf {
    dir.join(BACKLOG_FILE)
}

pub fn streaks_file(dir: &Path) -> PathBuf {
    dir.join(STREAKS_FILE)
}

pub fn day_file(dir: &Path) -> PathBuf {
    dir.join(DAY_FILE)
}

/// Atomically write content to a file using temp file + rename
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Create temp file in the same directory
    let mut temp_file = NamedTempFile::new_in(dir).map_err(io_err)?;

    temp_file.write_all(content.as_bytes()).map_err(io_err)?;

    // Sync to disk
    temp_file.as_file().sync_all().map_err(io_err)?;

    // Atomically rename temp file to target
    temp_file.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}

/// Read file content, None if the file doesn't exist
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Option<String>, PersistenceError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Load a JSON document, None if the file doesn't exist
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Option<T>, PersistenceError> {
    let path = path.as_ref();
    let Some(content) = read_file(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Move an unreadable file aside to `<name>.corrupt`, returning the new path
pub fn quarantine<P: AsRef<Path>>(path: P) -> Result<PathBuf, PersistenceError> {
    let path = path.as_ref();
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    let target = path.with_file_name(name);
    fs::rename(path, &target).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(target)
}

/// Save a value as pretty JSON through `atomic_write`
pub fn save_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_explicit_data_dir_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = get_data_dir(Some(temp_dir.path())).unwrap();
        assert_eq!(dir, temp_dir.path());
    }

    #[test]
    fn test_find_local_data_dir_walks_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let local = temp_dir.path().join(DATA_DIR_NAME);
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_local_data_dir(&nested), Some(local));
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("backlog.json");
        fs::write(&path, "{ truncated").unwrap();

        let moved = quarantine(&path).unwrap();
        assert_eq!(moved, temp_dir.path().join("backlog.json.corrupt"));
        assert!(!path.exists());
        assert_eq!(fs::read_to_string(moved).unwrap(), "{ truncated");
    }

    #[test]
    fn test_ensure_data_dir_creates_it() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("state");
        ensure_data_dir(Some(&target)).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        atomic_write(&test_file, "Hello, world!").unwrap();
        atomic_write(&test_file, "Replaced").unwrap();

        assert_eq!(read_file(&test_file).unwrap().as_deref(), Some("Replaced"));
    }

    #[test]
    fn test_read_nonexistent_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("nonexistent.txt");
        assert_eq!(read_file(&test_file).unwrap(), None);
    }

    #[test]
    fn test_json_round_trip_and_malformed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1);
        save_json(&path, &value).unwrap();
        let loaded: Option<BTreeMap<String, i32>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));

        fs::write(&path, "{ not json").unwrap();
        let broken = load_json::<BTreeMap<String, i32>, _>(&path);
        assert!(matches!(broken, Err(PersistenceError::Json { .. })));
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing").join("x.json");
        assert!(matches!(atomic_write(&path, "{}"), Err(PersistenceError::Io { .. })));
    }
}
