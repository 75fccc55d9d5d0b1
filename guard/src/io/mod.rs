//! Side-effecting operations: filesystem state, process execution, watching.

pub mod config;
pub mod process;
pub mod state_store;
pub mod watcher;
