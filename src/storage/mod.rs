//! Append-only tabular sinks.
//!
//! A sink receives a fixed header once and then equal-arity rows. Concrete
//! serialisations live in submodules; the dispatch core only sees the traits.

mod delimited;
mod memory;
mod registry;

pub use delimited::{FileSinkFactory, OutputFormat};
pub use memory::{MemorySinkFactory, MemoryTable};
pub use registry::{REGISTRY_TABLE, RegistryLog};

use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Rendered as `NA`.
    Missing,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.2}", v),
            Value::Missing => f.write_str("NA"),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Missing, Into::into)
    }
}

/// Error type for sink operations.
#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Csv(csv::Error),
    /// A row did not match the header.
    Arity {
        table: String,
        expected: usize,
        got: usize,
    },
    /// The sink was already closed.
    Closed(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "I/O error: {}", e),
            SinkError::Csv(e) => write!(f, "write error: {}", e),
            SinkError::Arity {
                table,
                expected,
                got,
            } => write!(
                f,
                "row for {} has {} columns, header has {}",
                table, got, expected
            ),
            SinkError::Closed(table) => write!(f, "sink {} is closed", table),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            SinkError::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

impl From<csv::Error> for SinkError {
    fn from(e: csv::Error) -> Self {
        SinkError::Csv(e)
    }
}

/// An open table.
pub trait Sink: Send {
    /// Appends one row. Its length must match the header.
    fn append(&mut self, row: Vec<Value>) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flushes and releases the table. Further appends fail.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Opens tables by name. The header is written on open.
pub trait SinkFactory: Send + Sync {
    fn open(&self, name: &str, header: &[&str]) -> Result<Box<dyn Sink>, SinkError>;
}

pub(crate) fn check_arity(table: &str, expected: usize, row: &[Value]) -> Result<(), SinkError> {
    if row.len() != expected {
        return Err(SinkError::Arity {
            table: table.to_string(),
            expected,
            got: row.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::from(42u64).to_string(), "42");
        assert_eq!(Value::from(-3i32).to_string(), "-3");
        assert_eq!(Value::from(12.3456).to_string(), "12.35");
        assert_eq!(Value::from(None::<u64>).to_string(), "NA");
        assert_eq!(Value::from(Some(7u32)), Value::UInt(7));
    }

    #[test]
    fn test_check_arity() {
        let row = vec![Value::from(1u64), Value::from(2u64)];
        assert!(check_arity("t", 2, &row).is_ok());
        let err = check_arity("t", 3, &row).unwrap_err();
        assert_eq!(err.to_string(), "row for t has 2 columns, header has 3");
    }
}
