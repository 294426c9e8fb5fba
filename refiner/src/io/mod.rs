//! Side-effecting adapters: configuration, build processes, prompts.

pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
