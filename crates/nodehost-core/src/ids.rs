//! Package and process namespace identifiers.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum identifier length in bytes.
const MAX_ID_LEN: usize = 128;

/// Validate an identifier that will be used as a single path segment.
///
/// Identifiers are lowercase ASCII alphanumerics plus `.`, `_` and `-`,
/// and must start with an alphanumeric character. This keeps them free of
/// path separators and glob metacharacters.
pub(crate) fn validate_segment(kind: &'static str, value: &str) -> CoreResult<()> {
    let invalid = |reason: &str| CoreError::InvalidId {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(invalid("longer than 128 bytes"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid(
            "must contain only lowercase alphanumerics, '.', '_' and '-'",
        ));
    }
    if !value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(invalid("must start with an alphanumeric character"));
    }
    Ok(())
}

/// Identity of an installable package.
///
/// Equality and hashing consider the identifier only; the version is
/// carried along for display and persistence. Two ids with different
/// versions therefore name the same installation slot.
#[derive(Debug, Clone, Serialize)]
pub struct PackageId {
    id: String,
    version: String,
}

#[derive(Deserialize)]
struct RawPackageId {
    id: String,
    #[serde(default)]
    version: String,
}

/// Deserialize with validation so crafted registry files cannot smuggle
/// path separators into derived paths.
impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPackageId::deserialize(deserializer)?;
        Self::new(raw.id, raw.version).map_err(serde::de::Error::custom)
    }
}

impl PackageId {
    /// Create a new `PackageId`, validating the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the identifier is malformed.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        validate_segment("package", &id)?;
        Ok(Self {
            id,
            version: version.into(),
        })
    }

    /// Create a version-less id for lookups.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the identifier is malformed.
    pub fn lookup(id: impl Into<String>) -> CoreResult<Self> {
        Self::new(id, String::new())
    }

    /// The opaque identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The informational version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether `s` would be accepted as a package identifier.
    #[must_use]
    pub fn is_valid_id(s: &str) -> bool {
        validate_segment("package", s).is_ok()
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.id)
        } else {
            write!(f, "{}@{}", self.id, self.version)
        }
    }
}

/// Key of a process namespace.
///
/// Several packages may share one process id (shared inheritance) or a
/// package may own its own (standalone).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(String);

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl ProcessId {
    /// Create a new `ProcessId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the id is malformed.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        validate_segment("process", &id)?;
        Ok(Self(id))
    }

    /// The process id of a package that owns its own namespace.
    #[must_use]
    pub fn for_package(package: &PackageId) -> Self {
        Self(package.id().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProcessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn valid_package_ids() {
        assert!(PackageId::new("weather", "1.0.0").is_ok());
        assert!(PackageId::new("com.example.weather", "1.0.0").is_ok());
        assert!(PackageId::new("node_2-b", "").is_ok());
    }

    #[test]
    fn invalid_package_ids() {
        assert!(PackageId::new("", "1.0").is_err());
        assert!(PackageId::new("Weather", "1.0").is_err());
        assert!(PackageId::new("a/b", "1.0").is_err());
        assert!(PackageId::new("..", "1.0").is_err());
        assert!(PackageId::new(".hidden", "1.0").is_err());
        assert!(PackageId::new("star*", "1.0").is_err());
        assert!(PackageId::new("x".repeat(129), "1.0").is_err());
    }

    #[test]
    fn equality_ignores_version() {
        let a = PackageId::new("weather", "1.0.0").unwrap();
        let b = PackageId::new("weather", "2.0.0").unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&PackageId::lookup("weather").unwrap()));
        assert!(!set.insert(b));
    }

    #[test]
    fn display_includes_version_when_present() {
        assert_eq!(
            PackageId::new("weather", "1.2.0").unwrap().to_string(),
            "weather@1.2.0"
        );
        assert_eq!(PackageId::lookup("weather").unwrap().to_string(), "weather");
    }

    #[test]
    fn deserialize_rejects_bad_ids() {
        let bad = r#"{"id":"../etc","version":"1"}"#;
        assert!(serde_json::from_str::<PackageId>(bad).is_err());

        let good = r#"{"id":"weather","version":"1"}"#;
        let id: PackageId = serde_json::from_str(good).unwrap();
        assert_eq!(id.version(), "1");
    }

    #[test]
    fn process_id_for_package() {
        let pkg = PackageId::new("weather", "1.0.0").unwrap();
        assert_eq!(ProcessId::for_package(&pkg).as_str(), "weather");
        assert!(ProcessId::new("Shared").is_err());
    }
}
