//! Delimited-text tables on disk, one file per table.

use super::{Sink, SinkError, SinkFactory, Value, check_arity};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;

/// On-disk format of every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tab separated, `.tsv`.
    #[default]
    Tsv,
    /// Comma separated, `.csv`.
    Csv,
    /// Discard everything.
    Null,
}

impl OutputFormat {
    fn delimiter(self) -> u8 {
        match self {
            OutputFormat::Csv => b',',
            _ => b'\t',
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            _ => "tsv",
        }
    }
}

/// Creates `<basename>.<table>.<ext>` files.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    basename: PathBuf,
    format: OutputFormat,
}

impl FileSinkFactory {
    pub fn new(basename: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            basename: basename.into(),
            format,
        }
    }

    /// Path of the file backing `table`.
    pub fn path_for(&self, table: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}.{}.{}",
            self.basename.display(),
            table,
            self.format.extension()
        ))
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&self, name: &str, header: &[&str]) -> Result<Box<dyn Sink>, SinkError> {
        if self.format == OutputFormat::Null {
            return Ok(Box::new(NullSink {
                name: name.to_string(),
                arity: header.len(),
            }));
        }

        let path = self.path_for(name);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.format.delimiter())
            .from_writer(File::create(&path)?);
        writer.write_record(header)?;
        writer.flush()?;

        Ok(Box::new(DelimitedSink {
            name: name.to_string(),
            arity: header.len(),
            writer: Some(writer),
        }))
    }
}

struct DelimitedSink {
    name: String,
    arity: usize,
    writer: Option<csv::Writer<File>>,
}

impl Sink for DelimitedSink {
    fn append(&mut self, row: Vec<Value>) -> Result<(), SinkError> {
        check_arity(&self.name, self.arity, &row)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.name.clone()))?;
        writer.write_record(row.iter().map(|v| v.to_string()))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        match self.writer.take() {
            Some(mut writer) => Ok(writer.flush()?),
            None => Ok(()),
        }
    }
}

struct NullSink {
    name: String,
    arity: usize,
}

impl Sink for NullSink {
    fn append(&mut self, row: Vec<Value>) -> Result<(), SinkError> {
        check_arity(&self.name, self.arity, &row)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
