//! Repository management commands.

use nodehost_packages::{PackageManager, Repository};

use crate::theme::{Status, Theme};

pub(crate) async fn list_repositories(manager: &PackageManager) -> anyhow::Result<()> {
    let repositories = manager.repositories().repositories().await;
    if repositories.is_empty() {
        println!("{}", Theme::status(Status::Note, "No repositories configured"));
        return Ok(());
    }

    println!("{}", Theme::heading("Repositories"));
    println!("  {:<16} {:<20} {:<10} URL", "ID", "NAME", "STATE");
    println!("{}", Theme::rule());
    for repo in &repositories {
        println!(
            "  {:<16} {:<20} {} {}",
            repo.id,
            repo.name,
            Theme::repository_state(repo.enabled, 10),
            Theme::muted(&repo.url)
        );
    }
    println!(
        "\n{}",
        Theme::muted(&format!("{} repository(ies)", repositories.len()))
    );
    Ok(())
}

pub(crate) async fn add_repository(
    manager: &PackageManager,
    id: &str,
    url: &str,
    name: Option<&str>,
    key_url: Option<&str>,
) -> anyhow::Result<()> {
    let mut repository = Repository::new(id, name.unwrap_or(id), url)?;
    if let Some(key_url) = key_url {
        repository = repository.with_key_url(key_url)?;
    }
    manager.repositories().add(repository).await?;
    println!("{}", Theme::status(Status::Done, &format!("Repository '{id}' added")));
    Ok(())
}

pub(crate) async fn remove_repository(manager: &PackageManager, id: &str) -> anyhow::Result<()> {
    let removed = manager.repositories().remove(id).await?;
    println!(
        "{}",
        Theme::status(Status::Done, &format!("Repository '{}' removed", removed.id))
    );
    Ok(())
}

pub(crate) async fn set_repository_enabled(
    manager: &PackageManager,
    id: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    manager.repositories().set_enabled(id, enabled).await?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("{}", Theme::status(Status::Done, &format!("Repository '{id}' {state}")));
    Ok(())
}
