//! Test doubles for the metric source.
//!
//! `MockFs` feeds the procfs source canned `/proc` files; `MockSource` skips
//! procfs entirely and serves readings from a mutable process table.

mod filesystem;
mod source;

pub use filesystem::MockFs;
pub use source::{MockMetric, MockProcess, MockSource};
