//! Public facade crate for `mcpboot`.
//!
//! Contains no IO or provider-specific logic. Re-exports the
//! backend-agnostic types/traits from `mcpboot-core`.

pub use mcpboot_core::*;
