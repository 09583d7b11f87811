//! Git observation of the workspace.

mod git;

pub use git::GitTracker;
