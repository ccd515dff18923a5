//! Public facade crate for `answerpipe`.
//!
//! This crate contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `answerpipe-core`.

pub use answerpipe_core::*;
