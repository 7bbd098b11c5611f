use std::fmt;
use std::str::FromStr;

use nodehost_core::NodePath;
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};
use crate::operation::Operation;
use crate::pattern::PathPattern;

/// A single permission: `operation` against paths matching `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathCapability {
    /// Which paths this grant covers.
    pub pattern: PathPattern,
    /// Which operation it permits.
    pub operation: Operation,
    /// Human-readable reason shown at approval time.
    pub justification: String,
}

impl PathCapability {
    /// Create a capability.
    #[must_use]
    pub fn new(pattern: PathPattern, operation: Operation, justification: impl Into<String>) -> Self {
        Self {
            pattern,
            operation,
            justification: justification.into(),
        }
    }

    /// Whether this grant permits `operation` on `path`.
    #[must_use]
    pub fn permits(&self, path: &NodePath, operation: Operation) -> bool {
        self.operation == operation && self.pattern.matches(path)
    }
}

impl fmt::Display for PathCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.pattern)
    }
}

/// Parses `operation:pattern:justification`.
impl FromStr for PathCapability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(op), Some(pattern), Some(justification)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CapabilityError::InvalidCapability(format!(
                "expected operation:pattern:justification, got '{s}'"
            )));
        };
        let capability = Self::new(
            PathPattern::new(pattern)?,
            op.parse()?,
            justification.trim(),
        );
        if capability.justification.is_empty() {
            return Err(CapabilityError::InvalidCapability(format!(
                "grant '{capability}' has an empty justification"
            )));
        }
        Ok(capability)
    }
}

/// The capabilities a user approved for a package at install time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    /// Requested grants.
    #[serde(default)]
    pub capabilities: Vec<PathCapability>,
}

impl CapabilityManifest {
    /// An empty manifest (defaults only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a grant.
    #[must_use]
    pub fn with(mut self, capability: PathCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Check that every grant carries a justification.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidCapability`] naming the first
    /// offending grant.
    pub fn validate(&self) -> CapabilityResult<()> {
        if let Some(bad) = self
            .capabilities
            .iter()
            .find(|c| c.justification.trim().is_empty())
        {
            return Err(CapabilityError::InvalidCapability(format!(
                "grant '{bad}' has an empty justification"
            )));
        }
        Ok(())
    }

    /// Number of requested grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether no grants were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_grant_string() {
        let cap: PathCapability = "message:/flows/*/*:talk to siblings".parse().unwrap();
        assert_eq!(cap.operation, Operation::Message);
        assert_eq!(cap.pattern.as_str(), "/flows/*/*");
        assert_eq!(cap.justification, "talk to siblings");
        assert!(cap.permits(&NodePath::parse("/flows/a/b").unwrap(), Operation::Message));
        assert!(!cap.permits(&NodePath::parse("/flows/a/b").unwrap(), Operation::Kill));
    }

    #[test]
    fn parse_grant_rejects_malformed() {
        assert!("message:/flows/*".parse::<PathCapability>().is_err());
        assert!("fly:/flows/*:why".parse::<PathCapability>().is_err());
        assert!("message:/flows/*:   ".parse::<PathCapability>().is_err());
        assert!("message:flows:why".parse::<PathCapability>().is_err());
    }

    #[test]
    fn manifest_validation() {
        let ok = CapabilityManifest::new().with(PathCapability::new(
            PathPattern::new("/flows/x/**").unwrap(),
            Operation::Stream,
            "reason",
        ));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.len(), 1);

        let bad = CapabilityManifest::new().with(PathCapability::new(
            PathPattern::new("/flows/x/**").unwrap(),
            Operation::Stream,
            " ",
        ));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn manifest_deserialize_rejects_bad_pattern() {
        let json = r#"{"capabilities":[{"pattern":"/a/../b","operation":"message","justification":"x"}]}"#;
        assert!(serde_json::from_str::<CapabilityManifest>(json).is_err());
    }
}
