//! Entity template.
//!
//! One TOML asset with two substitution tokens, `{ClassName}` and
//! `{table_name}`, describes how a reflected table is bound to an entity
//! type. The asset is resolved once per registry: a configured path, or the
//! copy bundled with the crate.

use crate::error::{DbError, DbResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CLASS_NAME_TOKEN: &str = "{ClassName}";
pub const TABLE_NAME_TOKEN: &str = "{table_name}";

const BUNDLED_TEMPLATE: &str = include_str!("../../assets/model_template.toml");

/// Result of rendering the template for one table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateBinding {
    pub type_name: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct ModelTemplate {
    source: String,
    /// `None` for the bundled template
    origin: Option<PathBuf>,
}

impl ModelTemplate {
    pub fn bundled() -> Self {
        Self {
            source: BUNDLED_TEMPLATE.to_string(),
            origin: None,
        }
    }

    /// Load the template from `path`, or the bundled copy when `None`.
    pub fn load(path: Option<&Path>) -> DbResult<Self> {
        let Some(path) = path else {
            debug!("Using bundled entity template");
            return Ok(Self::bundled());
        };
        let source = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(
                format!("Failed to read entity template: {}", e),
                path.display().to_string(),
            )
        })?;
        let mut template = Self::from_source(source)
            .map_err(|e| DbError::config(e.to_string(), path.display().to_string()))?;
        template.origin = Some(path.to_path_buf());
        debug!(path = %path.display(), "Loaded entity template");
        Ok(template)
    }

    /// Build a template from text; both tokens must be present.
    pub fn from_source(source: impl Into<String>) -> DbResult<Self> {
        let source = source.into();
        for token in [CLASS_NAME_TOKEN, TABLE_NAME_TOKEN] {
            if !source.contains(token) {
                return Err(DbError::invalid_input(format!(
                    "Entity template is missing the {} token",
                    token
                )));
            }
        }
        Ok(Self {
            source,
            origin: None,
        })
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Substitute both tokens. Values are escaped for a TOML basic string.
    pub fn render(&self, type_name: &str, table: &str) -> String {
        self.source
            .replace(CLASS_NAME_TOKEN, &escape(type_name))
            .replace(TABLE_NAME_TOKEN, &escape(table))
    }

    /// Render and parse the binding for `table`.
    pub fn bind(&self, type_name: &str, table: &str) -> DbResult<TemplateBinding> {
        let binding: TemplateBinding = toml::from_str(&self.render(type_name, table))
            .map_err(|e| DbError::schema(format!("Invalid entity template: {}", e.message()), table))?;
        if binding.table != table {
            return Err(DbError::schema(
                format!(
                    "Entity template binds table '{}' instead of '{}'",
                    binding.table, table
                ),
                table,
            ));
        }
        if binding.type_name.is_empty() {
            return Err(DbError::schema("Entity template yields an empty type name", table));
        }
        Ok(binding)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_template_binds() {
        let binding = ModelTemplate::bundled().bind("Users", "users").unwrap();
        assert_eq!(
            binding,
            TemplateBinding {
                type_name: "Users".into(),
                table: "users".into(),
            }
        );
    }

    #[test]
    fn test_awkward_table_names_survive_rendering() {
        let template = ModelTemplate::bundled();
        let binding = template.bind("Odd\"name\\", "odd\"name\\").unwrap();
        assert_eq!(binding.table, "odd\"name\\");
    }

    #[test]
    fn test_template_must_carry_both_tokens() {
        assert!(ModelTemplate::from_source("type_name = \"{ClassName}\"").is_err());
        assert!(ModelTemplate::from_source("table = \"{table_name}\"").is_err());
    }

    #[test]
    fn test_template_binding_wrong_table() {
        let template = ModelTemplate::from_source(
            "type_name = \"{ClassName}\"\ntable = \"fixed\"\n# {table_name}\n",
        )
        .unwrap();
        let err = template.bind("Users", "users").unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
    }

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entity.toml");
        std::fs::write(
            &path,
            "type_name = \"Db{ClassName}\"\ntable = \"{table_name}\"\n",
        )
        .unwrap();

        let template = ModelTemplate::load(Some(&path)).unwrap();
        assert_eq!(template.origin(), Some(path.as_path()));
        assert_eq!(template.bind("Users", "users").unwrap().type_name, "DbUsers");

        let missing = ModelTemplate::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(missing, DbError::Config { .. }));
        assert!(ModelTemplate::load(None).unwrap().origin().is_none());
    }
}
