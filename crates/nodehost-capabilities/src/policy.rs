//! Per-node security policy and the access-decision seam.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use nodehost_core::{NodePath, PackageId, ProcessId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capability::{CapabilityManifest, PathCapability};
use crate::error::{CapabilityError, CapabilityResult};
use crate::operation::Operation;

/// Maximum retained audit entries per policy; older entries are evicted.
pub const MAX_AUDIT_ENTRIES: usize = 1024;

/// Record of one granted runtime access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the access was granted.
    pub timestamp: Timestamp,
    /// Path of the process that made the call.
    pub caller: NodePath,
    /// Path the call targeted.
    pub target: NodePath,
    /// What was attempted.
    pub operation: Operation,
}

/// Decision function consulted by the process sandbox.
///
/// Implementations must be safe to call concurrently from many node
/// operations at once.
pub trait AccessPolicy: Send + Sync + std::fmt::Debug {
    /// Whether `operation` on `target` is permitted.
    fn can_access(&self, target: &NodePath, operation: Operation) -> bool;

    /// Note that an access was granted.
    fn record_grant(&self, caller: &NodePath, target: &NodePath, operation: Operation);

    /// Check and, on success, record the access.
    fn authorize(&self, caller: &NodePath, target: &NodePath, operation: Operation) -> bool {
        if self.can_access(target, operation) {
            self.record_grant(caller, target, operation);
            true
        } else {
            false
        }
    }
}

/// Capability grants for one installed package.
///
/// The grant set is mutable only until [`approve`](Self::approve) is
/// called. After that every access decision is a pure read of the grants
/// plus an append to the audit log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(into = "PolicyRecord", from = "PolicyRecord")]
pub struct NodeSecurityPolicy {
    owner_package: PackageId,
    owner_process: ProcessId,
    grants: Vec<PathCapability>,
    approved: bool,
    audit: Mutex<VecDeque<AuditEntry>>,
}

/// Persisted shape of a policy. The runtime audit log is not persisted.
#[derive(Serialize, Deserialize)]
struct PolicyRecord {
    owner_package: PackageId,
    owner_process: ProcessId,
    #[serde(default)]
    capabilities: Vec<PathCapability>,
    #[serde(default)]
    approved: bool,
}

impl From<NodeSecurityPolicy> for PolicyRecord {
    fn from(policy: NodeSecurityPolicy) -> Self {
        Self {
            owner_package: policy.owner_package,
            owner_process: policy.owner_process,
            capabilities: policy.grants,
            approved: policy.approved,
        }
    }
}

impl From<PolicyRecord> for NodeSecurityPolicy {
    fn from(record: PolicyRecord) -> Self {
        let mut policy = Self::new(record.owner_package, record.owner_process);
        for capability in record.capabilities {
            policy.insert(capability);
        }
        policy.approved = record.approved;
        policy
    }
}

impl NodeSecurityPolicy {
    /// Create an unapproved policy with no grants.
    #[must_use]
    pub fn new(owner_package: PackageId, owner_process: ProcessId) -> Self {
        Self {
            owner_package,
            owner_process,
            grants: Vec::new(),
            approved: false,
            audit: Mutex::new(VecDeque::new()),
        }
    }

    /// Create an unapproved policy holding every grant in `manifest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest fails validation.
    pub fn from_manifest(
        owner_package: PackageId,
        owner_process: ProcessId,
        manifest: &CapabilityManifest,
    ) -> CapabilityResult<Self> {
        manifest.validate()?;
        let mut policy = Self::new(owner_package, owner_process);
        for capability in &manifest.capabilities {
            policy.insert(capability.clone());
        }
        Ok(policy)
    }

    /// Add a grant. Duplicate grants are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::AlreadyApproved`] once the policy is
    /// approved.
    pub fn grant(&mut self, capability: PathCapability) -> CapabilityResult<()> {
        if self.approved {
            return Err(CapabilityError::AlreadyApproved {
                package: self.owner_package.to_string(),
            });
        }
        self.insert(capability);
        Ok(())
    }

    fn insert(&mut self, capability: PathCapability) {
        let duplicate = self
            .grants
            .iter()
            .any(|g| g.pattern == capability.pattern && g.operation == capability.operation);
        if !duplicate {
            self.grants.push(capability);
        }
    }

    /// Freeze the grant set and enable access decisions. Idempotent.
    pub fn approve(&mut self) {
        if !self.approved {
            debug!(
                package_id = %self.owner_package,
                grants = self.grants.len(),
                "Security policy approved"
            );
        }
        self.approved = true;
    }

    /// Whether the policy has been approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approved
    }

    /// The owning package.
    #[must_use]
    pub fn owner_package(&self) -> &PackageId {
        &self.owner_package
    }

    /// The owning process namespace.
    #[must_use]
    pub fn owner_process(&self) -> &ProcessId {
        &self.owner_process
    }

    /// The granted capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[PathCapability] {
        &self.grants
    }

    /// Snapshot of the runtime audit log, oldest first.
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl AccessPolicy for NodeSecurityPolicy {
    fn can_access(&self, target: &NodePath, operation: Operation) -> bool {
        self.approved && self.grants.iter().any(|g| g.permits(target, operation))
    }

    fn record_grant(&self, caller: &NodePath, target: &NodePath, operation: Operation) {
        trace!(
            package_id = %self.owner_package,
            caller = %caller,
            target = %target,
            operation = %operation,
            "Access granted"
        );
        let mut audit = self.audit.lock().unwrap_or_else(|e| {
            tracing::warn!("Audit log lock poisoned, recovering");
            e.into_inner()
        });
        while audit.len() >= MAX_AUDIT_ENTRIES {
            audit.pop_front();
        }
        audit.push_back(AuditEntry {
            timestamp: Timestamp::now(),
            caller: caller.clone(),
            target: target.clone(),
            operation,
        });
    }
}

impl Clone for NodeSecurityPolicy {
    fn clone(&self) -> Self {
        Self {
            owner_package: self.owner_package.clone(),
            owner_process: self.owner_process.clone(),
            grants: self.grants.clone(),
            approved: self.approved,
            audit: Mutex::new(
                self.audit
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
        }
    }
}

/// Compares owners, grants and approval. The audit log is runtime state.
impl PartialEq for NodeSecurityPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.owner_package == other.owner_package
            && self.owner_process == other.owner_process
            && self.grants == other.grants
            && self.approved == other.approved
    }
}

impl Eq for NodeSecurityPolicy {}

/// Intersection of two policies: access requires both to agree.
///
/// Grants are recorded on `inner` only. The outer policy belongs to the
/// parent interface, which records its own grant when the call is
/// delegated to it.
#[derive(Debug, Clone)]
pub struct ComposedPolicy {
    outer: Arc<dyn AccessPolicy>,
    inner: Arc<dyn AccessPolicy>,
}

impl ComposedPolicy {
    /// Compose `outer` (the parent's effective policy) with `inner`.
    #[must_use]
    pub fn new(outer: Arc<dyn AccessPolicy>, inner: Arc<dyn AccessPolicy>) -> Self {
        Self { outer, inner }
    }
}

impl AccessPolicy for ComposedPolicy {
    fn can_access(&self, target: &NodePath, operation: Operation) -> bool {
        self.outer.can_access(target, operation) && self.inner.can_access(target, operation)
    }

    fn record_grant(&self, caller: &NodePath, target: &NodePath, operation: Operation) {
        self.inner.record_grant(caller, target, operation);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::pattern::PathPattern;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn cap(pattern: &str, op: Operation) -> PathCapability {
        PathCapability::new(PathPattern::new(pattern).unwrap(), op, "test")
    }

    fn policy() -> NodeSecurityPolicy {
        NodeSecurityPolicy::new(
            PackageId::new("weather", "1.0.0").unwrap(),
            ProcessId::new("weather").unwrap(),
        )
    }

    #[test]
    fn unapproved_policy_denies_everything() {
        let mut pol = policy();
        pol.grant(cap("/flows/**", Operation::Message)).unwrap();
        assert!(!pol.can_access(&p("/flows/a"), Operation::Message));
        pol.approve();
        assert!(pol.can_access(&p("/flows/a"), Operation::Message));
        assert!(!pol.can_access(&p("/flows/a"), Operation::Kill));
        assert!(!pol.can_access(&p("/data/a"), Operation::Message));
    }

    #[test]
    fn grants_frozen_after_approve() {
        let mut pol = policy();
        pol.approve();
        let err = pol.grant(cap("/flows/**", Operation::Message)).unwrap_err();
        assert!(matches!(err, CapabilityError::AlreadyApproved { .. }));
        assert!(pol.capabilities().is_empty());
    }

    #[test]
    fn duplicate_grants_collapse() {
        let mut pol = policy();
        pol.grant(cap("/flows/**", Operation::Message)).unwrap();
        pol.grant(cap("/flows/**", Operation::Message)).unwrap();
        pol.grant(cap("/flows/**", Operation::Stream)).unwrap();
        assert_eq!(pol.capabilities().len(), 2);
    }

    #[test]
    fn authorize_appends_audit_only_on_grant() {
        let mut pol = policy();
        pol.grant(cap("/flows/x/**", Operation::Message)).unwrap();
        pol.approve();

        assert!(pol.authorize(&p("/flows/x"), &p("/flows/x/y"), Operation::Message));
        assert!(!pol.authorize(&p("/flows/x"), &p("/flows/z"), Operation::Message));

        let log = pol.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].target, p("/flows/x/y"));
        assert_eq!(log[0].operation, Operation::Message);
    }

    #[test]
    fn audit_log_is_bounded() {
        let mut pol = policy();
        pol.grant(cap("/**", Operation::Message)).unwrap();
        pol.approve();
        let caller = p("/flows/x");
        for i in 0..(MAX_AUDIT_ENTRIES.saturating_add(10)) {
            let target = p(&format!("/flows/t{i}"));
            pol.record_grant(&caller, &target, Operation::Message);
        }
        let log = pol.audit_log();
        assert_eq!(log.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(log[0].target, p("/flows/t10"));
    }

    #[test]
    fn serde_round_trip_skips_audit() {
        let mut pol = policy();
        pol.grant(cap("/flows/weather/**", Operation::Stream)).unwrap();
        pol.approve();
        pol.record_grant(&p("/flows/a"), &p("/flows/weather/b"), Operation::Stream);

        let json = serde_json::to_string(&pol).unwrap();
        assert!(!json.contains("audit"));
        let back: NodeSecurityPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pol);
        assert!(back.is_approved());
        assert!(back.audit_log().is_empty());
    }

    #[test]
    fn composed_policy_is_intersection() {
        let mut outer = policy();
        outer.grant(cap("/flows/**", Operation::Message)).unwrap();
        outer.approve();
        let mut inner = policy();
        inner.grant(cap("/flows/shared/**", Operation::Message)).unwrap();
        inner.grant(cap("/data/**", Operation::Message)).unwrap();
        inner.approve();

        let composed = ComposedPolicy::new(Arc::new(outer), Arc::new(inner));
        assert!(composed.can_access(&p("/flows/shared/a"), Operation::Message));
        assert!(!composed.can_access(&p("/flows/other/a"), Operation::Message));
        assert!(!composed.can_access(&p("/data/a"), Operation::Message));
    }

    #[test]
    fn composed_policy_audits_inner_only() {
        let mut outer = policy();
        outer.grant(cap("/flows/**", Operation::Message)).unwrap();
        outer.approve();
        let outer = Arc::new(outer);
        let mut inner = policy();
        inner.grant(cap("/flows/**", Operation::Message)).unwrap();
        inner.approve();
        let inner = Arc::new(inner);

        let composed = ComposedPolicy::new(
            Arc::clone(&outer) as Arc<dyn AccessPolicy>,
            Arc::clone(&inner) as Arc<dyn AccessPolicy>,
        );
        composed.record_grant(&p("/flows/a/a"), &p("/flows/b/b"), Operation::Message);
        assert!(outer.audit_log().is_empty());
        assert_eq!(inner.audit_log().len(), 1);
    }

    fn arb_path() -> impl Strategy<Value = NodePath> {
        proptest::collection::vec(
            proptest::sample::select(vec!["flows", "data", "a", "b", "c"]),
            1..5,
        )
            .prop_map(|segs| p(&format!("/{}", segs.join("/"))))
    }

    fn arb_pattern() -> impl Strategy<Value = String> {
        let segs = proptest::collection::vec(
            proptest::sample::select(vec!["flows", "data", "a", "b", "*"]),
            1..4,
        );
        (segs, any::<bool>()).prop_map(|(segs, subtree)| {
            let base = format!("/{}", segs.join("/"));
            if subtree { format!("{base}/**") } else { base }
        })
    }

    proptest! {
        #[test]
        fn composition_never_widens(
            outer_pats in proptest::collection::vec(arb_pattern(), 0..4),
            inner_pats in proptest::collection::vec(arb_pattern(), 0..4),
            path in arb_path(),
        ) {
            let mut outer = policy();
            for pat in &outer_pats {
                outer.grant(cap(pat, Operation::Message)).unwrap();
            }
            outer.approve();
            let mut inner = policy();
            for pat in &inner_pats {
                inner.grant(cap(pat, Operation::Message)).unwrap();
            }
            inner.approve();

            let outer: Arc<dyn AccessPolicy> = Arc::new(outer);
            let composed = ComposedPolicy::new(Arc::clone(&outer), Arc::new(inner));
            if composed.can_access(&path, Operation::Message) {
                prop_assert!(outer.can_access(&path, Operation::Message));
            }
        }
    }
}
