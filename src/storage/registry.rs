//! The shared registry table: one line per attached process.

use super::{Sink, SinkError, SinkFactory, Value};
use crate::collector::ProcessMetadata;
use crate::util::timestamp;
use parking_lot::Mutex;

/// Table name of the registry.
pub const REGISTRY_TABLE: &str = "reg";

const HEADER: [&str; 5] = ["TIME", "PID", "CMD", "EXE", "CWD"];

/// Cross-dispatcher registry log.
///
/// Sibling dispatchers attach concurrently; the mutex keeps each line whole.
pub struct RegistryLog {
    sink: Mutex<Box<dyn Sink>>,
}

impl RegistryLog {
    /// Opens the registry table and writes its header.
    pub fn open(factory: &dyn SinkFactory) -> Result<Self, SinkError> {
        Ok(Self {
            sink: Mutex::new(factory.open(REGISTRY_TABLE, &HEADER)?),
        })
    }

    /// Appends and flushes the line for a newly attached process.
    pub fn record(&self, meta: &ProcessMetadata) -> Result<(), SinkError> {
        let mut sink = self.sink.lock();
        sink.append(vec![
            Value::from(timestamp()),
            Value::from(meta.pid),
            Value::from(meta.cmdline.as_str()),
            Value::from(meta.exe.as_str()),
            Value::from(meta.cwd.as_str()),
        ])?;
        sink.flush()
    }

    pub fn close(&self) -> Result<(), SinkError> {
        self.sink.lock().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySinkFactory;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_records_stay_whole() {
        let factory = MemorySinkFactory::new();
        let log = Arc::new(RegistryLog::open(&factory).unwrap());

        let handles: Vec<_> = (0..8u32)
            .map(|pid| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    log.record(&ProcessMetadata {
                        pid,
                        cmdline: format!("worker --id {}", pid),
                        ..ProcessMetadata::default()
                    })
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let table = factory.table(REGISTRY_TABLE).unwrap();
        assert_eq!(table.header, HEADER.to_vec());
        assert_eq!(table.rows.len(), 8);
        for row in &table.rows {
            let Value::UInt(pid) = row[1] else {
                panic!("pid column is not numeric");
            };
            assert_eq!(row[2], Value::from(format!("worker --id {}", pid)));
        }
    }
}
