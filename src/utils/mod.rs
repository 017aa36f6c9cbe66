//! Shared helpers: the command line, git plumbing, interrupt handling and paths.

pub mod cli;
pub mod git;
pub mod interrupt;
pub mod paths;
