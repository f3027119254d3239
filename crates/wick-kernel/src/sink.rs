//! Output sink: formats results, prints them, appends them to the log.
//!
//! All writes go through one mutex so lines from concurrent workers never
//! interleave. Ordering across targets is whatever order workers finish in.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use wick_types::{OutputFormat, Record};

/// Sink I/O errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("write to {path} failed: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("write to stdout failed: {0}")]
    Stdout(#[source] io::Error),
}

/// Build a record stamped with a fresh id and the current local time.
pub fn new_record(value: &str, module: &str, function: &str) -> Record {
    Record {
        id: uuid::Uuid::new_v4().to_string(),
        data: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        value: value.to_string(),
        module: module.to_string(),
        function: function.to_string(),
    }
}

/// Format `values` in `format`.
///
/// Text is one value per line. CSV is a header row plus one row per value.
/// JSON is a one-line array of records.
pub fn format_values(format: OutputFormat, values: &[String], module: &str, function: &str) -> String {
    match format {
        OutputFormat::Text => values.join("\n"),
        OutputFormat::Csv => {
            let mut out = String::from(Record::CSV_HEADER);
            for value in values {
                let r = new_record(value, module, function);
                out.push('\n');
                out.push_str(&format!(
                    "{},{},{},{},{}",
                    csv_field(&r.id),
                    csv_field(&r.data),
                    csv_field(&r.value),
                    csv_field(&r.module),
                    csv_field(&r.function)
                ));
            }
            out
        }
        OutputFormat::Json => {
            let records: Vec<Record> = values
                .iter()
                .map(|v| new_record(v, module, function))
                .collect();
            serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

/// Quote a CSV field when it contains a separator, quote, or line break.
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

struct FileState {
    path: PathBuf,
    file: File,
}

impl FileState {
    /// Create or truncate `path`, creating parent directories.
    fn open(path: &Path) -> Result<Self, SinkError> {
        let err = |source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn append_line(&mut self, line: &str) -> Result<(), SinkError> {
        writeln!(self.file, "{}", line).map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Default)]
struct SinkState {
    echo: Option<Box<dyn Write + Send>>,
    log: Option<FileState>,
    last: Option<FileState>,
    last_value: Option<String>,
    records: u64,
    captured: Option<Vec<String>>,
}

/// What the sink has seen, for the final summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub last_value: Option<String>,
    pub output: Option<PathBuf>,
    pub last_file: Option<PathBuf>,
    pub records: u64,
}

/// Process-wide output: stdout, the results log, and the last-value file.
pub struct OutputSink {
    format: OutputFormat,
    state: Mutex<SinkState>,
}

impl OutputSink {
    /// Open (and truncate) both files. Failing here is fatal for the run.
    pub fn open(format: OutputFormat, output: &Path, last_file: &Path) -> Result<Self, SinkError> {
        let state = SinkState {
            echo: Some(Box::new(io::stdout())),
            log: Some(FileState::open(output)?),
            last: Some(FileState::open(last_file)?),
            ..Default::default()
        };
        Ok(Self {
            format,
            state: Mutex::new(state),
        })
    }

    /// A sink with no files and no stdout that keeps formatted output in memory.
    pub fn capture(format: OutputFormat) -> Self {
        Self {
            format,
            state: Mutex::new(SinkState {
                captured: Some(Vec::new()),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Format and write `values`. Empty input writes nothing.
    pub fn emit(&self, values: &[String], module: &str, function: &str) -> Result<(), SinkError> {
        self.write(None, values, module, function)
    }

    /// Like `emit`, preceded by a section header in text format.
    pub fn emit_section(
        &self,
        header: &str,
        values: &[String],
        module: &str,
        function: &str,
    ) -> Result<(), SinkError> {
        self.write(Some(header), values, module, function)
    }

    fn write(
        &self,
        header: Option<&str>,
        values: &[String],
        module: &str,
        function: &str,
    ) -> Result<(), SinkError> {
        if values.is_empty() {
            return Ok(());
        }
        let body = format_values(self.format, values, module, function);
        let text = match (header, self.format) {
            (Some(h), OutputFormat::Text) => format!("{}\n{}", h, body),
            _ => body,
        };

        let mut state = self.lock();
        // The log still gets the text when stdout is gone.
        let echoed = match state.echo.as_mut() {
            Some(out) => writeln!(out, "{}", text).and_then(|()| out.flush()),
            None => Ok(()),
        };
        if let Some(log) = state.log.as_mut() {
            log.append_line(&text)?;
        }
        if let Some(captured) = state.captured.as_mut() {
            captured.push(text);
        }
        state.records += values.len() as u64;
        echoed.map_err(SinkError::Stdout)
    }

    /// Record the most recently processed value.
    pub fn set_last_value(&self, value: &str) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.last_value = Some(value.to_string());
        if let Some(last) = state.last.as_mut() {
            last.append_line(value)?;
        }
        Ok(())
    }

    pub fn last_value(&self) -> Option<String> {
        self.lock().last_value.clone()
    }

    /// Formatted writes kept by a `capture` sink.
    pub fn captured(&self) -> Vec<String> {
        self.lock().captured.clone().unwrap_or_default()
    }

    pub fn summary(&self) -> SinkSummary {
        let state = self.lock();
        SinkSummary {
            last_value: state.last_value.clone(),
            output: state.log.as_ref().map(|f| f.path.clone()),
            last_file: state.last.as_ref().map(|f| f.path.clone()),
            records: state.records,
        }
    }
}
