//! Core domain types shared across the llmproxy workspace.

pub mod types;
