//! Package commands - search, install, uninstall, and list.

use anyhow::{Context, bail};
use nodehost_capabilities::{CapabilityManifest, PathCapability};
use nodehost_core::{PackageId, ProcessId};
use nodehost_packages::{
    ConfirmationToken, InheritanceMode, InstallationRequest, PackageInfo, PackageManager,
    ProcessConfig,
};

use crate::theme::{Status, Theme};

/// Options collected from `nodehost install`.
pub(crate) struct InstallOptions<'a> {
    pub(crate) package: &'a str,
    pub(crate) process: Option<&'a str>,
    pub(crate) mode: InheritanceMode,
    pub(crate) grants: &'a [PathCapability],
    pub(crate) yes: bool,
}

pub(crate) async fn search_packages(
    manager: &PackageManager,
    query: Option<&str>,
) -> anyhow::Result<()> {
    manager.update_repositories().await;
    let packages = match query {
        Some(q) => manager.repositories().search(q).await,
        None => manager.repositories().available_packages().await,
    };

    if packages.is_empty() {
        println!("{}", Theme::status(Status::Note, "No matching packages"));
        return Ok(());
    }

    println!("{}", Theme::heading("Available Packages"));
    println!(
        "  {:<20} {:<10} {:<16} DESCRIPTION",
        "ID", "VERSION", "REPOSITORY"
    );
    println!("{}", Theme::rule());
    for p in &packages {
        let installed = manager.registry().is_installed(&p.id);
        println!(
            "  {} {:<10} {:<16} {}",
            Theme::package_cell(p.id.id(), installed, 20),
            p.version(),
            p.repository,
            Theme::muted(p.description.as_deref().unwrap_or(""))
        );
    }
    println!(
        "\n{}",
        Theme::muted(&format!("{} package(s)", packages.len()))
    );
    Ok(())
}

pub(crate) async fn install_package(
    manager: &PackageManager,
    options: InstallOptions<'_>,
) -> anyhow::Result<()> {
    let package_id = parse_package_ref(options.package)?;
    let capabilities = options
        .grants
        .iter()
        .cloned()
        .fold(CapabilityManifest::new(), CapabilityManifest::with);

    manager.update_repositories().await;
    let Some(info) = manager.repositories().find_available(&package_id).await else {
        bail!(
            "package '{}' is not offered by any enabled repository",
            options.package
        );
    };

    let process_id = match options.process {
        Some(raw) => ProcessId::new(raw).context("invalid process id")?,
        None => ProcessId::for_package(&info.id),
    };
    let process_config = ProcessConfig::new(process_id, options.mode);

    print_install_summary(&info, &process_config, &capabilities);
    if !options.yes {
        println!(
            "{}",
            Theme::status(Status::Caution, "Nothing installed. Review the grants above and re-run with --yes")
        );
        bail!("installation not confirmed");
    }

    let request = InstallationRequest::new()
        .package(info)
        .process_config(process_config)
        .capabilities(capabilities)
        .confirmed(ConfirmationToken::new("cli"));
    let installed = manager.install(request).await?;

    println!(
        "{}",
        Theme::status(Status::Done, &format!(
            "Installed {} {} into {}",
            installed.package_id.id(),
            installed.package_id.version(),
            installed.flow_path()
        ))
    );
    Ok(())
}

pub(crate) async fn uninstall_package(manager: &PackageManager, id: &str) -> anyhow::Result<()> {
    let package_id = PackageId::lookup(id).context("invalid package id")?;
    println!("{}", Theme::status(Status::Note, &format!("Removing package: {id}")));
    let removed = manager.uninstall(&package_id).await?;
    println!(
        "{}",
        Theme::status(Status::Done, &format!(
            "Package '{}' {} removed",
            removed.package_id.id(),
            removed.package_id.version()
        ))
    );
    Ok(())
}

pub(crate) fn list_installed(manager: &PackageManager) {
    let mut installed = manager.installed();
    if installed.is_empty() {
        println!("{}", Theme::status(Status::Note, "No packages installed"));
        return;
    }
    installed.sort_by(|a, b| a.package_id.id().cmp(b.package_id.id()));

    println!("{}", Theme::heading("Installed Packages"));
    println!(
        "  {:<20} {:<10} {:<16} {:<15} {:>6}  INSTALLED",
        "ID", "VERSION", "PROCESS", "MODE", "GRANTS"
    );
    println!("{}", Theme::rule());
    for p in &installed {
        println!(
            "  {:<20} {:<10} {:<16} {} {:>6}  {}",
            p.package_id.id(),
            p.package_id.version(),
            p.process_config.process_id().as_str(),
            Theme::inheritance_mode(p.process_config.inheritance_mode(), 15),
            p.policy.capabilities().len(),
            Theme::muted(
                &p.installed_at
                    .into_inner()
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            )
        );
    }
    println!(
        "\n{}",
        Theme::muted(&format!("{} package(s)", installed.len()))
    );
}

fn print_install_summary(
    info: &PackageInfo,
    process_config: &ProcessConfig,
    capabilities: &CapabilityManifest,
) {
    println!("{}", Theme::heading(&format!("{} {}", info.name, info.version())));
    println!("  repository: {}", info.repository);
    println!(
        "  namespace:  {} ({})",
        process_config.process_id(),
        process_config.inheritance_mode()
    );
    println!("  node path:  {}", process_config.node_flow_path(&info.id));
    if capabilities.is_empty() {
        println!("  grants:     {}", Theme::muted("own subtrees only"));
    } else {
        println!("  grants:");
        for grant in &capabilities.capabilities {
            println!("    - {}", Theme::grant(grant));
        }
    }
}

/// `id` or `id@version`.
fn parse_package_ref(raw: &str) -> anyhow::Result<PackageId> {
    let id = match raw.split_once('@') {
        Some((id, version)) => PackageId::new(id, version),
        None => PackageId::lookup(raw),
    };
    id.with_context(|| format!("invalid package reference '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_refs_accept_versions() {
        let id = parse_package_ref("weather@2.1.0").unwrap();
        assert_eq!(id.id(), "weather");
        assert_eq!(id.version(), "2.1.0");
        assert_eq!(parse_package_ref("weather").unwrap().version(), "");
        assert!(parse_package_ref("Bad Id").is_err());
    }
}
