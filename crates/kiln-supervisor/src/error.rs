use std::path::PathBuf;

use thiserror::Error;

/// Failures turning a server-type selector into a concrete command line.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unknown server type: {0:?}")]
    UnknownType(String),
    #[error("server file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("invalid memory bounds: -Xms{xms}M -Xmx{xmx}M (need 0 < Xms <= Xmx)")]
    InvalidMemoryBounds { xms: u32, xmx: u32 },
}

/// Failures of supervisor operations on the managed child.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a server is already starting or running")]
    AlreadyRunning,
    #[error("no server is running")]
    NotRunning,
    #[error("this server does not accept console input")]
    NotInteractive,
    #[error("failed to spawn server: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("failed to write to server console: {0}")]
    WriteFailed(#[source] std::io::Error),
    /// The documented no-op outcome of `stop()` when nothing is live.
    #[error("no active server process to stop")]
    NoActiveProcess,
    /// The child survived SIGKILL. No further escalation is attempted; the
    /// process may be orphaned.
    #[error("server did not die after forced kill; the process may be orphaned")]
    ForceKillFailed,
    /// The grace timeout elapsed and the policy declined escalation.
    #[error("server did not exit within the grace timeout")]
    StopTimedOut,
}
