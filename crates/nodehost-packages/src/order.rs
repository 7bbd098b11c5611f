//! Dependency ordering of installed packages.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PackageError, PackageResult};
use crate::types::InstalledPackage;

/// Order `packages` so every package follows the packages it depends on.
///
/// Dependencies on packages outside the given set are ignored. Ties are
/// broken by package id so the result is deterministic.
///
/// # Errors
///
/// Returns [`PackageError::DependencyCycle`] naming every package that
/// could not be ordered.
pub fn load_order(packages: &[InstalledPackage]) -> PackageResult<Vec<InstalledPackage>> {
    let by_id: BTreeMap<&str, &InstalledPackage> = packages
        .iter()
        .map(|p| (p.package_id.id(), p))
        .collect();

    let mut pending: BTreeMap<&str, BTreeSet<&str>> = by_id
        .iter()
        .map(|(id, pkg)| {
            let deps = pkg
                .manifest
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| by_id.contains_key(dep) && dep != id)
                .collect();
            (*id, deps)
        })
        .collect();

    let mut ordered = Vec::with_capacity(by_id.len());
    loop {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            pending.remove(id);
            for deps in pending.values_mut() {
                deps.remove(id);
            }
            if let Some(pkg) = by_id.get(id) {
                ordered.push((*pkg).clone());
            }
        }
    }

    if !pending.is_empty() {
        return Err(PackageError::DependencyCycle {
            members: pending.keys().map(|id| (*id).to_string()).collect(),
        });
    }
    Ok(ordered)
}
