//! `mcpboot-mcp` crate (library surface).
//!
//! The primary entrypoint for end users is the `mcpboot` binary. This
//! library module exposes the orchestrator, config, and server pieces so
//! integration tests (and embedders) don't need to shell out to the binary.

pub mod config;
pub mod mcp_server;
pub mod orchestrator;

pub use mcpboot_core as core;
