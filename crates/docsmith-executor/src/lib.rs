//! Local process and git backends for docsmith.
//!
//! Provides:
//! - `LocalCommandRunner`, running build and deploy commands as child processes
//! - `GitCli`, a source-control connector shelling out to `git`

pub mod git;
pub mod process;

pub use docsmith_core::executor::{CommandOutput, CommandRunner, CommandSpec};
pub use git::{GitCli, GitError};
pub use process::LocalCommandRunner;
