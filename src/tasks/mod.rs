//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweeper: removes expired cache entries in bounded batches

mod sweeper;

pub use sweeper::{spawn_sweeper, sweep_once};
