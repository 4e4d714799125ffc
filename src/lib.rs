//! VoxWeave Library
//!
//! Orchestration layer for voice agent pipelines: event bus, metrics,
//! interruption handling, and the extension module system.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod frames;
pub mod interruption;
pub mod metrics;
pub mod modules;
