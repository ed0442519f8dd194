use std::fmt;

/// Lifecycle of the supervised server child.
///
/// `Stopped` and `Crashed` are terminal for one lifecycle; only the next
/// `start()` returns the supervisor to a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProcessState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl ProcessState {
    /// A child is live (or being torn down) in these states; a second
    /// `start()` must be rejected while one of them holds.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }
}

/// Snapshot returned by `status()` and by a completed stop.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

/// Server flavor selected by the operator.
///
/// NOTE: This is a selector, not a command. The launch resolver maps it to a
/// fixed artifact name under the server directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerType {
    #[default]
    Vanilla,
    Fabric,
    Forge,
    Paper,
    PocketEdition,
    Custom,
}

impl ServerType {
    /// Parses the operator-facing selector. The GUI-era labels
    /// ("Pocket Edition (PHP)", "Custom (Browse)") are accepted as aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Some(Self::Vanilla),
            "fabric" => Some(Self::Fabric),
            "forge" => Some(Self::Forge),
            "paper" | "papermc" => Some(Self::Paper),
            "pocketedition" | "pocket edition" | "pocket edition (php)" => {
                Some(Self::PocketEdition)
            }
            "custom" | "custom (browse)" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vanilla => "Vanilla",
            Self::Fabric => "Fabric",
            Self::Forge => "Forge",
            Self::Paper => "Paper",
            Self::PocketEdition => "PocketEdition",
            Self::Custom => "Custom",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_are_disjoint() {
        for state in [
            ProcessState::Idle,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Stopping,
            ProcessState::Stopped,
            ProcessState::Crashed,
        ] {
            assert!(!(state.is_active() && state.is_terminal()));
        }
        assert!(ProcessState::Stopping.is_active());
        assert!(ProcessState::Crashed.is_terminal());
        assert!(!ProcessState::Idle.is_active());
    }

    #[test]
    fn parse_accepts_gui_era_labels() {
        assert_eq!(
            ServerType::parse("Pocket Edition (PHP)"),
            Some(ServerType::PocketEdition)
        );
        assert_eq!(ServerType::parse("Custom (Browse)"), Some(ServerType::Custom));
        assert_eq!(ServerType::parse("  vanilla "), Some(ServerType::Vanilla));
        assert_eq!(ServerType::parse("Skyblock"), None);
    }

    #[test]
    fn parse_round_trips_canonical_names() {
        for ty in [
            ServerType::Vanilla,
            ServerType::Fabric,
            ServerType::Forge,
            ServerType::Paper,
            ServerType::PocketEdition,
            ServerType::Custom,
        ] {
            assert_eq!(ServerType::parse(ty.as_str()), Some(ty));
        }
    }
}
