//! Parallel, order-preserving block device transfer.
//!
//! `read` mode streams a device to standard output in offset order using a
//! pool of positioned-read workers; `write` mode streams standard input into
//! a device at computed offsets using positioned-write workers.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipeline;
