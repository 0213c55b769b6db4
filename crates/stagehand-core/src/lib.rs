//! Core state for `stagehand`: the stage gate that orders a campaign's
//! pipeline stages, and the provider availability cache plus model selector
//! that decide which AI model to try next.
//!
//! Everything is persisted to disk and shared between processes through
//! [`store::LockedFile`]; nothing is held in memory between invocations.

pub mod availability;
pub mod config;
pub mod error;
pub mod gate;
pub mod io;
pub mod paths;
pub mod retry;
pub mod selector;
pub mod stage;
pub mod store;
pub mod types;

pub use error::{Result, StagehandError};
