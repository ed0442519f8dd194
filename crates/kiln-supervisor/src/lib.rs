//! Process supervision core for console-driven game servers.
//!
//! The crate turns a server-type selector into a spawnable command line
//! ([`resolve_launch_spec`]), runs at most one child per [`Supervisor`]
//! with its output pumped into a bounded log buffer, and implements a
//! graceful-stop protocol with signal escalation and per-dimension lock
//! cleanup.

pub mod error;
pub mod launch;
pub mod locks;
pub mod logs;
pub mod profile;
pub mod supervisor;

pub use error::{ResolutionError, SupervisorError};
pub use kiln_process::{ProcessState, ProcessStatus, ServerType};
pub use launch::{LaunchSpec, MemoryBounds, resolve_launch_spec, server_file_name};
pub use locks::SESSION_LOCKS;
pub use profile::{PROFILE_FILE, Profile};
pub use supervisor::{ShutdownPolicy, Supervisor};
