//! Package manifest types.
//!
//! A manifest arrives embedded in a repository's package list, so it is
//! untrusted input. Nothing downstream reads a manifest that has not passed
//! [`PackageManifest::validate`].

use std::path::{Component, Path};

use nodehost_core::PackageId;
use serde::{Deserialize, Serialize};

use crate::error::{PackageError, PackageResult};

/// Maximum length of a manifest type tag.
const MAX_TYPE_LEN: usize = 64;

/// Maximum length of an entry-point reference.
const MAX_ENTRY_POINT_LEN: usize = 512;

/// Maximum number of declared dependencies.
const MAX_DEPENDENCIES: usize = 64;

/// What a package declares about how it is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Loading-strategy tag (e.g. `bundle`, `script`, `native`).
    #[serde(rename = "type")]
    pub manifest_type: String,
    /// Entry point, relative to the package artifact.
    pub entry_point: String,
    /// Ids of packages this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the controller starts this package automatically.
    #[serde(default)]
    pub autoload: bool,
}

impl PackageManifest {
    /// Create a manifest with no dependencies.
    #[must_use]
    pub fn new(manifest_type: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            manifest_type: manifest_type.into(),
            entry_point: entry_point.into(),
            dependencies: Vec::new(),
            autoload: false,
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Set the autoload flag.
    #[must_use]
    pub fn with_autoload(mut self, autoload: bool) -> Self {
        self.autoload = autoload;
        self
    }

    /// Validate the manifest for `package`.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidManifest`] describing the first
    /// problem found.
    pub fn validate(&self, package: &PackageId) -> PackageResult<()> {
        let invalid = |message: String| PackageError::InvalidManifest {
            package: package.id().to_string(),
            message,
        };

        if self.manifest_type.is_empty() || self.manifest_type.len() > MAX_TYPE_LEN {
            return Err(invalid(format!(
                "type must be 1..={MAX_TYPE_LEN} characters"
            )));
        }
        if !self
            .manifest_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(invalid(format!(
                "type '{}' must be lowercase alphanumeric",
                self.manifest_type
            )));
        }

        validate_entry_point(&self.entry_point).map_err(invalid)?;

        if self.dependencies.len() > MAX_DEPENDENCIES {
            return Err(invalid(format!(
                "declares {} dependencies, limit is {MAX_DEPENDENCIES}",
                self.dependencies.len()
            )));
        }
        for dep in &self.dependencies {
            if !PackageId::is_valid_id(dep) {
                return Err(invalid(format!("dependency '{dep}' is not a valid package id")));
            }
            if dep == package.id() {
                return Err(invalid("package depends on itself".to_string()));
            }
        }
        Ok(())
    }

    /// Parse and validate a manifest object.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidManifest`] if the value does not have
    /// the manifest shape or fails validation.
    pub fn from_value(package: &PackageId, value: serde_json::Value) -> PackageResult<Self> {
        let manifest: Self =
            serde_json::from_value(value).map_err(|e| PackageError::InvalidManifest {
                package: package.id().to_string(),
                message: e.to_string(),
            })?;
        manifest.validate(package)?;
        Ok(manifest)
    }
}

fn validate_entry_point(entry_point: &str) -> Result<(), String> {
    if entry_point.is_empty() {
        return Err("entry point must not be empty".to_string());
    }
    if entry_point.len() > MAX_ENTRY_POINT_LEN {
        return Err(format!(
            "entry point longer than {MAX_ENTRY_POINT_LEN} characters"
        ));
    }
    if entry_point.contains('\0') {
        return Err("entry point contains a NUL byte".to_string());
    }
    let path = Path::new(entry_point);
    if entry_point.starts_with('/') || path.is_absolute() {
        return Err(format!("entry point '{entry_point}' must be relative"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(format!("entry point '{entry_point}' escapes the package"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg() -> PackageId {
        PackageId::new("weather", "1.0.0").unwrap()
    }

    #[test]
    fn valid_manifest() {
        let manifest = PackageManifest::new("bundle", "dist/index.js")
            .with_dependency("http-client")
            .with_autoload(true);
        assert!(manifest.validate(&pkg()).is_ok());
    }

    #[test]
    fn rejects_escaping_entry_points() {
        for entry in ["", "/etc/passwd", "../outside.js", "a/../../b", "a\0b"] {
            let manifest = PackageManifest::new("bundle", entry);
            assert!(manifest.validate(&pkg()).is_err(), "accepted {entry:?}");
        }
    }

    #[test]
    fn rejects_bad_type_and_dependencies() {
        assert!(PackageManifest::new("Bundle!", "main").validate(&pkg()).is_err());
        assert!(
            PackageManifest::new("bundle", "main")
                .with_dependency("../x")
                .validate(&pkg())
                .is_err()
        );
        assert!(
            PackageManifest::new("bundle", "main")
                .with_dependency("weather")
                .validate(&pkg())
                .is_err()
        );
    }

    #[test]
    fn from_value_parses_and_ignores_unknown_fields() {
        let value = serde_json::json!({
            "type": "script",
            "entry_point": "main.lua",
            "dependencies": ["base"],
            "autoload": true,
            "homepage": "https://example.com"
        });
        let manifest = PackageManifest::from_value(&pkg(), value).unwrap();
        assert_eq!(manifest.manifest_type, "script");
        assert_eq!(manifest.dependencies, vec!["base"]);
        assert!(manifest.autoload);
    }

    #[test]
    fn from_value_requires_entry_point() {
        let value = serde_json::json!({ "type": "script" });
        assert!(matches!(
            PackageManifest::from_value(&pkg(), value),
            Err(PackageError::InvalidManifest { .. })
        ));
    }
}
