//! Glob patterns over process paths.
//!
//! Patterns are absolute paths that may contain glob syntax:
//! - `/flows/shared/weather` - exact match
//! - `/flows/shared/*` - any direct child of `/flows/shared`
//! - `/flows/*/*` - every node flow path
//! - `/system/runtime/shared/weather/**` - the path and everything below it
//!
//! `*` and `?` never cross a `/`. A trailing `/**` also matches the base
//! path itself, so a subtree pattern covers its root.

use std::fmt;
use std::hash::{Hash, Hasher};

use globset::{GlobBuilder, GlobMatcher};
use nodehost_core::NodePath;
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// A compiled pattern matching [`NodePath`]s.
#[derive(Debug, Clone)]
pub struct PathPattern {
    /// The original pattern string.
    pattern: String,
    /// Compiled glob matcher (None for exact matches).
    matcher: Option<GlobMatcher>,
    /// Base path a trailing `/**` also matches.
    subtree_base: Option<String>,
}

impl PathPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPattern`] if the pattern is not
    /// absolute, contains a `..` segment, or fails to compile.
    pub fn new(pattern: impl Into<String>) -> CapabilityResult<Self> {
        let pattern = pattern.into();
        let invalid = |reason: &str| CapabilityError::InvalidPattern {
            pattern: pattern.clone(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("pattern must be absolute"));
        }
        if pattern.split('/').any(|segment| segment == "..") {
            return Err(invalid(
                "path traversal detected: pattern contains '..' segment",
            ));
        }

        let is_glob = pattern.contains(['*', '?', '[', '{']);
        let matcher = if is_glob {
            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| invalid(&e.to_string()))?;
            Some(glob.compile_matcher())
        } else {
            None
        };

        let subtree_base = pattern.strip_suffix("/**").map(|base| {
            if base.is_empty() {
                "/".to_string()
            } else {
                base.to_string()
            }
        });

        Ok(Self {
            pattern,
            matcher,
            subtree_base,
        })
    }

    /// A pattern matching exactly one path.
    #[must_use]
    pub fn exact(path: &NodePath) -> Self {
        Self {
            pattern: path.as_str().to_string(),
            matcher: None,
            subtree_base: None,
        }
    }

    /// A pattern matching `path` and every path below it.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPattern`] if the glob fails to
    /// compile.
    pub fn subtree(path: &NodePath) -> CapabilityResult<Self> {
        if path.is_root() {
            Self::new("/**")
        } else {
            Self::new(format!("{path}/**"))
        }
    }

    /// Check if this pattern matches a path.
    #[must_use]
    pub fn matches(&self, path: &NodePath) -> bool {
        let candidate = path.as_str();
        if self
            .subtree_base
            .as_deref()
            .is_some_and(|base| base == candidate)
        {
            return true;
        }
        match &self.matcher {
            Some(matcher) => matcher.is_match(candidate),
            None => self.pattern == candidate,
        }
    }

    /// Get the pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Check if this is a glob pattern.
    #[must_use]
    pub fn is_glob(&self) -> bool {
        self.matcher.is_some()
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PathPattern {}

impl Hash for PathPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl Serialize for PathPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    #[test]
    fn exact_match() {
        let pattern = PathPattern::new("/flows/shared/weather").unwrap();
        assert!(!pattern.is_glob());
        assert!(pattern.matches(&p("/flows/shared/weather")));
        assert!(!pattern.matches(&p("/flows/shared/weather/child")));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let pattern = PathPattern::new("/flows/*/*").unwrap();
        assert!(pattern.matches(&p("/flows/shared/weather")));
        assert!(!pattern.matches(&p("/flows/shared")));
        assert!(!pattern.matches(&p("/flows/shared/weather/child")));
    }

    #[test]
    fn double_star_covers_base_and_descendants() {
        let pattern = PathPattern::new("/system/runtime/shared/**").unwrap();
        assert!(pattern.matches(&p("/system/runtime/shared")));
        assert!(pattern.matches(&p("/system/runtime/shared/weather")));
        assert!(pattern.matches(&p("/system/runtime/shared/weather/a/b")));
        assert!(!pattern.matches(&p("/system/runtime/sharedx")));
        assert!(!pattern.matches(&p("/system/runtime")));
    }

    #[test]
    fn subtree_constructor() {
        let pattern = PathPattern::subtree(&p("/flows/shared")).unwrap();
        assert_eq!(pattern.as_str(), "/flows/shared/**");
        assert!(pattern.matches(&p("/flows/shared")));

        let everything = PathPattern::subtree(&NodePath::root()).unwrap();
        assert!(everything.matches(&NodePath::root()));
        assert!(everything.matches(&p("/system/node-controller")));
    }

    #[test]
    fn rejects_traversal_and_relative() {
        assert!(PathPattern::new("/flows/../system/**").is_err());
        assert!(PathPattern::new("flows/*").is_err());
        assert!(PathPattern::new("/flows/[").is_err());
    }

    #[test]
    fn serde_as_string() {
        let pattern = PathPattern::new("/data/*/weather").unwrap();
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, "\"/data/*/weather\"");
        let back: PathPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pattern);
        assert!(back.matches(&p("/data/shared/weather")));
    }
}
