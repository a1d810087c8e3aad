//! Metric source for the Linux `/proc` filesystem.
//!
//! `parser` holds pure functions over file contents; `source` wires them to a
//! [`FileSystem`](crate::collector::traits::FileSystem) and implements
//! [`MetricSource`](crate::collector::source::MetricSource).

pub mod parser;
mod source;

pub use source::ProcfsSource;
