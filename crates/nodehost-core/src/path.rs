//! Addresses in the process hierarchy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum path length in bytes.
const MAX_PATH_LEN: usize = 1024;

/// An absolute, normalised path in the process hierarchy.
///
/// Paths are `/`-separated and every segment is a non-empty run of
/// lowercase alphanumerics, `.`, `_` or `-` that is not `.` or `..`.
/// The root path `/` contains every other path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Parse and validate a path.
    ///
    /// A single trailing slash is tolerated and stripped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] if the path is relative, contains
    /// empty or dot segments, or uses characters outside the allowed set.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let invalid = |reason: &str| CoreError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.len() > MAX_PATH_LEN {
            return Err(invalid("path too long"));
        }
        if !raw.starts_with('/') {
            return Err(invalid("path must be absolute"));
        }
        if raw == "/" {
            return Ok(Self::root());
        }

        let trimmed = raw.strip_suffix('/').unwrap_or(raw);
        for segment in trimmed[1..].split('/') {
            check_segment(segment).map_err(|reason| invalid(reason))?;
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Build a path from segments already validated as identifiers.
    pub(crate) fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Append a single segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] if `segment` is not a valid
    /// single path segment.
    pub fn join(&self, segment: &str) -> CoreResult<Self> {
        check_segment(segment).map_err(|reason| CoreError::InvalidPath {
            path: format!("{}/{segment}", self.0.trim_end_matches('/')),
            reason: reason.to_string(),
        })?;
        if self.is_root() {
            Ok(Self(format!("/{segment}")))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Whether `self` equals `ancestor` or lies below it.
    #[must_use]
    pub fn is_within(&self, ancestor: &NodePath) -> bool {
        if ancestor.is_root() || self.0 == ancestor.0 {
            return true;
        }
        self.0
            .strip_prefix(ancestor.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Whether `self` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_strictly_within(&self, ancestor: &NodePath) -> bool {
        self != ancestor && self.is_within(ancestor)
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (`0` for the root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The final segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty path segment");
    }
    if segment == "." || segment == ".." {
        return Err("dot segments are not allowed");
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err("segments may contain only lowercase alphanumerics, '.', '_' and '-'");
    }
    Ok(())
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl FromStr for NodePath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    #[test]
    fn parse_valid_paths() {
        assert_eq!(p("/").as_str(), "/");
        assert_eq!(p("/flows/weather").as_str(), "/flows/weather");
        assert_eq!(p("/flows/weather/").as_str(), "/flows/weather");
        assert_eq!(p("/system/node-controller").depth(), 2);
    }

    #[test]
    fn parse_rejects_bad_paths() {
        for bad in [
            "",
            "flows",
            "//flows",
            "/flows//x",
            "/flows/../system",
            "/flows/./x",
            "/Flows",
            "/flows/a b",
            "/flows/*",
        ] {
            assert!(NodePath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn is_within_respects_segment_boundaries() {
        assert!(p("/flows/a/b").is_within(&p("/flows/a")));
        assert!(p("/flows/a").is_within(&p("/flows/a")));
        assert!(!p("/flows/ab").is_within(&p("/flows/a")));
        assert!(!p("/flows").is_within(&p("/flows/a")));
        assert!(p("/anything").is_within(&NodePath::root()));
        assert!(!p("/flows/a").is_strictly_within(&p("/flows/a")));
    }

    #[test]
    fn join_and_parent() {
        let base = p("/flows");
        let child = base.join("weather").unwrap();
        assert_eq!(child.as_str(), "/flows/weather");
        assert_eq!(child.parent(), Some(base.clone()));
        assert_eq!(p("/flows").parent(), Some(NodePath::root()));
        assert_eq!(NodePath::root().parent(), None);
        assert_eq!(NodePath::root().join("data").unwrap().as_str(), "/data");
        assert!(base.join("..").is_err());
        assert!(base.join("a/b").is_err());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&p("/data/x")).unwrap();
        assert_eq!(json, "\"/data/x\"");
        assert!(serde_json::from_str::<NodePath>("\"/data/../x\"").is_err());
    }

    proptest! {
        #[test]
        fn joined_paths_are_within_base(segs in proptest::collection::vec("[a-z0-9_-]{1,8}", 1..6)) {
            let base = p("/flows");
            let mut path = base.clone();
            for s in &segs {
                path = path.join(s).unwrap();
            }
            prop_assert!(path.is_within(&base));
            prop_assert_eq!(path.depth(), segs.len().saturating_add(1));
            prop_assert_eq!(NodePath::parse(path.as_str()).unwrap(), path);
        }
    }
}
