//! proctrace - per-process resource tracer.
//!
//! Follows a process and every descendant it spawns, sampling CPU, memory,
//! I/O, descriptors and scheduler state into one delimited table per
//! (entity, metric), alongside system-wide CPU, memory and swap.

pub mod collector;
pub mod config;
pub mod dispatch;
pub mod fmt;
pub mod frontend;
pub mod monitor;
pub mod storage;
pub mod util;

#[cfg(test)]
mod testing;
