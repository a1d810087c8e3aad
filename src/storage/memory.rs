//! In-memory tables, used by tests and by callers that only want the live view.

use super::{Sink, SinkError, SinkFactory, Value, check_arity};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Contents of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct Tables {
    tables: BTreeMap<String, MemoryTable>,
    failing: HashSet<String>,
}

/// Records every table in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    inner: Arc<Mutex<Tables>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table, if it was ever opened.
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.inner.lock().tables.get(name).cloned()
    }

    /// Names of every table opened so far.
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().tables.keys().cloned().collect()
    }

    /// Number of rows appended to `name` so far (0 if never opened).
    pub fn row_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .tables
            .get(name)
            .map_or(0, |t| t.rows.len())
    }

    /// Makes every append to `name` fail with an I/O error.
    pub fn fail_table(&self, name: &str) {
        self.inner.lock().failing.insert(name.to_string());
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&self, name: &str, header: &[&str]) -> Result<Box<dyn Sink>, SinkError> {
        self.inner.lock().tables.insert(
            name.to_string(),
            MemoryTable {
                header: header.iter().map(|h| h.to_string()).collect(),
                ..MemoryTable::default()
            },
        );
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            arity: header.len(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemorySink {
    name: String,
    arity: usize,
    inner: Arc<Mutex<Tables>>,
}

impl Sink for MemorySink {
    fn append(&mut self, row: Vec<Value>) -> Result<(), SinkError> {
        check_arity(&self.name, self.arity, &row)?;
        let mut inner = self.inner.lock();
        if inner.failing.contains(&self.name) {
            return Err(SinkError::Io(std::io::Error::other("injected failure")));
        }
        let table = inner
            .tables
            .get_mut(&self.name)
            .filter(|t| !t.closed)
            .ok_or_else(|| SinkError::Closed(self.name.clone()))?;
        table.rows.push(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(table) = self.inner.lock().tables.get_mut(&self.name) {
            table.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_shared_between_clones() {
        let factory = MemorySinkFactory::new();
        let observer = factory.clone();

        let mut sink = factory.open("1.stat", &["TIME", "STAT"]).unwrap();
        sink.append(vec![Value::from("t"), Value::from("running")])
            .unwrap();

        let table = observer.table("1.stat").unwrap();
        assert_eq!(table.header, vec!["TIME", "STAT"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(observer.names(), vec!["1.stat".to_string()]);
    }

    #[test]
    fn test_closed_table_rejects_rows() {
        let factory = MemorySinkFactory::new();
        let mut sink = factory.open("mnt", &["DEVICE"]).unwrap();
        sink.close().unwrap();

        assert!(factory.table("mnt").unwrap().closed);
        assert!(sink.append(vec![Value::from("/dev/sda")]).is_err());
    }

    #[test]
    fn test_injected_failure() {
        let factory = MemorySinkFactory::new();
        let mut sink = factory.open("sys.mem", &["TIME"]).unwrap();
        factory.fail_table("sys.mem");

        assert!(matches!(
            sink.append(vec![Value::from("t")]),
            Err(SinkError::Io(_))
        ));
        assert_eq!(factory.row_count("sys.mem"), 0);
    }
}
