//! Terminal styling for nodehost output.
//!
//! Table cells are padded before they are coloured, since escape codes
//! would otherwise count toward the column width.

use colored::{ColoredString, Colorize};
use nodehost_capabilities::{Operation, PathCapability};
use nodehost_packages::InheritanceMode;

const RULE_WIDTH: usize = 72;

/// Kind of a one-line status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Done,
    Failed,
    Caution,
    Note,
}

impl Status {
    fn marker(self) -> ColoredString {
        match self {
            Self::Done => "✓".green(),
            Self::Failed => "✗".red(),
            Self::Caution => "!".yellow(),
            Self::Note => "i".blue(),
        }
    }
}

pub(crate) struct Theme;

impl Theme {
    /// A status line with its marker.
    pub(crate) fn status(kind: Status, text: &str) -> String {
        let body = match kind {
            Status::Failed => text.red(),
            Status::Caution => text.yellow(),
            Status::Done | Status::Note => text.normal(),
        };
        format!("{} {body}", kind.marker())
    }

    pub(crate) fn heading(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    pub(crate) fn muted(text: &str) -> String {
        text.dimmed().to_string()
    }

    pub(crate) fn rule() -> String {
        "━".repeat(RULE_WIDTH).dimmed().to_string()
    }

    /// Package id cell; installed packages are highlighted.
    pub(crate) fn package_cell(id: &str, installed: bool, width: usize) -> String {
        let cell = format!("{id:<width$}");
        if installed {
            cell.green().bold().to_string()
        } else {
            cell
        }
    }

    /// Repository state cell.
    pub(crate) fn repository_state(enabled: bool, width: usize) -> String {
        if enabled {
            format!("{:<width$}", "enabled").green().to_string()
        } else {
            format!("{:<width$}", "disabled").dimmed().to_string()
        }
    }

    /// Inheritance mode cell. Anything but a private namespace stands out.
    pub(crate) fn inheritance_mode(mode: InheritanceMode, width: usize) -> String {
        let cell = format!("{:<width$}", mode.as_str());
        match mode {
            InheritanceMode::Standalone => cell,
            InheritanceMode::Shared => cell.yellow().to_string(),
            InheritanceMode::ClusterLeader | InheritanceMode::ClusterMember => {
                cell.magenta().to_string()
            },
        }
    }

    /// One grant for the approval summary: operation, pattern, and the
    /// stated reason. `kill` is flagged since it can end other nodes.
    pub(crate) fn grant(grant: &PathCapability) -> String {
        let operation = match grant.operation {
            Operation::Kill => grant.operation.as_str().red().bold(),
            Operation::Connect => grant.operation.as_str().yellow(),
            Operation::Message | Operation::Stream => grant.operation.as_str().cyan(),
        };
        format!(
            "{operation} {} {}",
            grant.pattern,
            format!("({})", grant.justification).dimmed()
        )
    }
}
