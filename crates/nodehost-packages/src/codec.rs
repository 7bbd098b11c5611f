//! Encoding of the persisted installation registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PackageError, PackageResult};
use crate::types::InstalledPackage;

/// Installed packages keyed by package id (without version).
pub type InstalledState = BTreeMap<String, InstalledPackage>;

/// Current registry schema version.
const SCHEMA_VERSION: u32 = 1;

/// Encode/decode pair for the persisted registry.
///
/// Implementations must be lossless: decoding an encoded state yields an
/// equal state.
pub trait RecordCodec: Send + Sync + std::fmt::Debug {
    /// Encode the full registry state.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Codec`] if the state cannot be encoded.
    fn encode(&self, state: &InstalledState) -> PackageResult<Vec<u8>>;

    /// Decode a full registry state.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Codec`] if the bytes are not a valid record.
    fn decode(&self, bytes: &[u8]) -> PackageResult<InstalledState>;
}

/// Pretty-printed JSON codec with a schema version header.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordCodec;

#[derive(Serialize)]
struct DocumentRef<'a> {
    schema_version: u32,
    packages: Vec<&'a InstalledPackage>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    packages: Vec<InstalledPackage>,
}

impl RecordCodec for JsonRecordCodec {
    fn encode(&self, state: &InstalledState) -> PackageResult<Vec<u8>> {
        let doc = DocumentRef {
            schema_version: SCHEMA_VERSION,
            packages: state.values().collect(),
        };
        serde_json::to_vec_pretty(&doc).map_err(|e| PackageError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> PackageResult<InstalledState> {
        let doc: Document =
            serde_json::from_slice(bytes).map_err(|e| PackageError::Codec(e.to_string()))?;

        if doc.schema_version != SCHEMA_VERSION {
            warn!(
                found = doc.schema_version,
                expected = SCHEMA_VERSION,
                "Registry schema version mismatch, attempting best-effort load"
            );
        }

        let mut state = InstalledState::new();
        for package in doc.packages {
            let key = package.package_id.id().to_string();
            if state.insert(key.clone(), package).is_some() {
                return Err(PackageError::Codec(format!(
                    "duplicate registry entry for '{key}'"
                )));
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use nodehost_capabilities::{CapabilityManifest, NodeSecurityPolicy, PathCapability};
    use nodehost_core::{PackageId, ProcessId, Timestamp};
    use proptest::prelude::*;

    use super::*;
    use crate::manifest::PackageManifest;
    use crate::types::{InheritanceMode, ProcessConfig};

    fn installed(id: &str, process: &str, mode: InheritanceMode, grants: &[String]) -> InstalledPackage {
        let package_id = PackageId::new(id, "1.2.3").unwrap();
        let process_config = ProcessConfig::new(ProcessId::new(process).unwrap(), mode);
        let mut manifest = CapabilityManifest::new();
        for grant in grants {
            manifest = manifest.with(grant.parse::<PathCapability>().unwrap());
        }
        let mut policy = NodeSecurityPolicy::from_manifest(
            package_id.clone(),
            process_config.process_id().clone(),
            &manifest,
        )
        .unwrap();
        policy.approve();
        InstalledPackage {
            name: format!("{id} package"),
            description: "test".into(),
            manifest: PackageManifest::new("bundle", "main.js").with_autoload(true),
            process_config,
            policy,
            origin_repository: "main".into(),
            installed_at: Timestamp::now(),
            install_path: PathBuf::from(format!("/var/nodehost/packages/{id}/abc")),
            package_id,
        }
    }

    #[test]
    fn encode_decode_preserves_every_field() {
        let mut state = InstalledState::new();
        let pkg = installed(
            "weather",
            "home",
            InheritanceMode::Shared,
            &["message:/flows/*/*:siblings".to_string()],
        );
        state.insert("weather".into(), pkg.clone());

        let codec = JsonRecordCodec;
        let decoded = codec.decode(&codec.encode(&state).unwrap()).unwrap();
        let back = &decoded["weather"];
        assert_eq!(back, &pkg);
        assert_eq!(back.package_id.version(), "1.2.3");
        assert!(back.policy.is_approved());
        assert_eq!(back.policy.capabilities().len(), 1);
        assert_eq!(back.installed_at, pkg.installed_at);
    }

    #[test]
    fn duplicate_entries_rejected() {
        let pkg = installed("weather", "home", InheritanceMode::Standalone, &[]);
        let doc = serde_json::json!({
            "schema_version": 1,
            "packages": [pkg, pkg],
        });
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert!(matches!(
            JsonRecordCodec.decode(&bytes),
            Err(PackageError::Codec(_))
        ));
    }

    #[test]
    fn schema_mismatch_is_best_effort() {
        let doc = serde_json::json!({ "schema_version": 99, "packages": [] });
        let state = JsonRecordCodec
            .decode(&serde_json::to_vec(&doc).unwrap())
            .unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn garbage_is_codec_error() {
        assert!(JsonRecordCodec.decode(b"not json").is_err());
    }

    fn arb_mode() -> impl Strategy<Value = InheritanceMode> {
        proptest::sample::select(vec![
            InheritanceMode::Standalone,
            InheritanceMode::Shared,
            InheritanceMode::ClusterLeader,
            InheritanceMode::ClusterMember,
        ])
    }

    fn arb_grant() -> impl Strategy<Value = String> {
        (
            proptest::sample::select(vec!["message", "stream", "connect", "kill"]),
            proptest::sample::select(vec!["/flows/*/*", "/flows/a/**", "/system/node-controller"]),
        )
            .prop_map(|(op, pattern)| format!("{op}:{pattern}:because"))
    }

    proptest! {
        #[test]
        fn round_trip_non_empty_state(
            entries in proptest::collection::btree_map(
                "[a-z][a-z0-9-]{0,12}",
                ("[a-z][a-z0-9]{0,8}", arb_mode(), proptest::collection::vec(arb_grant(), 0..4)),
                1..6,
            )
        ) {
            let state: InstalledState = entries
                .iter()
                .map(|(id, (process, mode, grants))| {
                    (id.clone(), installed(id, process, *mode, grants))
                })
                .collect();
            let codec = JsonRecordCodec;
            let decoded = codec.decode(&codec.encode(&state).unwrap()).unwrap();
            prop_assert_eq!(decoded, state);
        }
    }
}
