//! Batch Execution Module
//!
//! This module handles running batches of SQL operations:
//! - BatchExecutor: Executes one batch serially on one connection
//! - BatchDispatcher: Moves batches onto the worker pool

mod engine;
mod dispatcher;


pub use engine::BatchExecutor;
pub use dispatcher::BatchDispatcher;
