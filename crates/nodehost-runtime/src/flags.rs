//! Controller activity flags.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// What the controller is doing right now. `READY` can be set alongside
    /// the transient load and unload flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerFlags: u8 {
        /// Start-up in progress.
        const INITIALIZING = 0b0001;
        /// Started and accepting commands.
        const READY = 0b0010;
        /// At least one load in flight.
        const LOADING_NODE = 0b0100;
        /// At least one unload in flight.
        const UNLOADING_NODE = 0b1000;
    }
}

impl ControllerFlags {
    /// Flag names, for status replies.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl Serialize for ControllerFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Coarse controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Initializing,
    Ready,
    ShuttingDown,
    Stopped,
}

impl Lifecycle {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Created => "not started",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_flags() {
        let flags = ControllerFlags::READY | ControllerFlags::LOADING_NODE;
        assert!(flags.contains(ControllerFlags::READY));
        assert_eq!(flags.names(), vec!["READY", "LOADING_NODE"]);
        assert_eq!(
            serde_json::to_value(flags).unwrap(),
            serde_json::json!(["READY", "LOADING_NODE"])
        );
    }
}
