//! Instance configuration store.
//!
//! The store is a TOML file with one table per instance, each a flat map of
//! string values:
//!
//! ```toml
//! [main]
//! source = "postgresql"
//! username = "app"
//! password = "secret"
//! host = "db.local"
//! port = "5432"
//! base = "app"
//! ```
//!
//! Writes go to a temporary file in the target's directory which is synced
//! and then renamed over the target, so readers never observe a partially
//! written file. A failed write leaves the original untouched and removes
//! the temporary file.

use crate::error::{DbError, DbResult};
use crate::models::Section;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// All instance sections, keyed by instance name.
pub type Sections = BTreeMap<String, Section>;

const TEMP_PREFIX: &str = ".tmp_db_";

/// Read every section from `path`. A missing file yields no sections.
pub fn read(path: &Path) -> DbResult<Sections> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Configuration store missing, starting empty");
            return Ok(Sections::new());
        }
        Err(e) => {
            return Err(DbError::config(
                format!("Failed to read: {}", e),
                path.display().to_string(),
            ));
        }
    };
    parse(&content).map_err(|message| DbError::config(message, path.display().to_string()))
}

/// Parse store content. Scalar values are stringified; nested values are
/// rejected.
pub fn parse(content: &str) -> Result<Sections, String> {
    let table: toml::Table = content
        .parse()
        .map_err(|e: toml::de::Error| format!("Invalid TOML: {}", e.message()))?;

    let mut sections = Sections::new();
    for (name, value) in table {
        let toml::Value::Table(entries) = value else {
            return Err(format!("Top-level key '{}' is not a section", name));
        };

        let mut section = Section::new();
        for (key, value) in entries {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(format!(
                        "Key '{}.{}' must be a scalar, found {}",
                        name,
                        key,
                        other.type_str()
                    ));
                }
            };
            section.insert(key, value);
        }
        sections.insert(name, section);
    }
    Ok(sections)
}

/// Serialize sections to store content.
pub fn render(sections: &Sections) -> DbResult<String> {
    toml::to_string(sections)
        .map_err(|e| DbError::internal(format!("Failed to serialize sections: {}", e)))
}

/// Atomically replace `path` with `sections`.
pub fn write_atomic(path: &Path, sections: &Sections) -> DbResult<()> {
    let content = render(sections)?;
    let target = path.display().to_string();
    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // The temp file deletes itself on drop, which covers every error path
    // up to the rename.
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(directory)
        .map_err(|e| DbError::config(format!("Failed to create temp file: {}", e), &target))?;

    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| DbError::config(format!("Failed to write temp file: {}", e), &target))?;

    tmp.persist(path)
        .map_err(|e| DbError::config(format!("Failed to replace file: {}", e.error), &target))?;

    info!(path = %target, sections = sections.len(), "Configuration store saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Sections {
        let mut main = Section::new();
        main.insert("source".into(), "postgresql".into());
        main.insert("password".into(), "p@ss \"quoted\"".into());
        main.insert("base".into(), "".into());
        let mut sections = Sections::new();
        sections.insert("main".into(), main);
        sections
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let sections = read(&dir.path().join("absent.toml")).unwrap();
        assert!(sections.is_empty());
    }

    #[test]
    fn test_write_then_read_preserves_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.toml");
        write_atomic(&path, &sample()).unwrap();
        assert_eq!(read(&path).unwrap(), sample());
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.toml");
        write_atomic(&path, &sample()).unwrap();
        write_atomic(&path, &Sections::new()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["source.toml"]);
        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.toml");
        write_atomic(&path, &sample()).unwrap();

        // A directory at the target path makes the rename fail.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();
        let err = write_atomic(&blocked, &sample()).unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));

        assert_eq!(read(&path).unwrap(), sample());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_scalars_are_stringified() {
        let sections = parse("[db]\nport = 5432\nssl = true\nsource = \"mysql\"\n").unwrap();
        assert_eq!(sections["db"]["port"], "5432");
        assert_eq!(sections["db"]["ssl"], "true");
        assert_eq!(sections["db"]["source"], "mysql");
    }

    #[test]
    fn test_rejects_non_section_values() {
        assert!(parse("loose = 1\n").unwrap_err().contains("not a section"));
        assert!(parse("[db]\nhosts = [\"a\"]\n").unwrap_err().contains("scalar"));
        assert!(parse("[db\n").is_err());
    }
}
