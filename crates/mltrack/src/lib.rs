#![doc = include_str!("../../../README.md")]
//!

//! This crate re-exports the tracking client from `mltrack-core` and the
//! GPU probe from `mltrack-gpu` under [`gpu`].

pub use mltrack_core::*;
pub use mltrack_gpu as gpu;
