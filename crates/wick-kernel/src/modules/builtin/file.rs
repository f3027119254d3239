//! out:file: append input lines to a file and pass them through.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use wick_types::{ModuleKind, ModuleMetadata, ModuleOptions};

use crate::modules::{Module, ModuleError, ResultBuffer};

pub const DEFAULT_PATH: &str = "wick-module-output.txt";

pub struct FileOutput {
    data: String,
    path: PathBuf,
    buffer: ResultBuffer,
}

impl FileOutput {
    pub fn new() -> Self {
        Self { data: String::new(), path: PathBuf::from(DEFAULT_PATH), buffer: ResultBuffer::new() }
    }
}

impl Default for FileOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for FileOutput {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new("file", ModuleKind::Output, "Append input lines to a file (option: path)")
    }

    fn configure(&mut self, options: ModuleOptions) {
        self.path = PathBuf::from(options.extra("path").unwrap_or(DEFAULT_PATH));
        self.data = options.data;
        self.buffer.set_accumulate(options.accumulate);
    }

    async fn run(&mut self) -> Result<(), ModuleError> {
        self.buffer.begin();
        let lines: Vec<&str> = self.data.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return Ok(());
        }

        let fail = |e: std::io::Error| ModuleError::Failed(format!("{}: {}", self.path.display(), e));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(fail)?;
        let mut chunk = lines.join("\n");
        chunk.push('\n');
        file.write_all(chunk.as_bytes()).await.map_err(fail)?;
        file.flush().await.map_err(fail)?;

        for line in lines {
            self.buffer.push(line);
        }
        Ok(())
    }

    fn results(&self) -> &[String] {
        self.buffer.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appends_and_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        for data in ["a\nb", "c"] {
            let mut options = ModuleOptions::new(data);
            options.extra.insert("path".into(), path.display().to_string());
            let mut module = FileOutput::new();
            module.configure(options);
            module.run().await.unwrap();
            assert!(!module.results().is_empty());
        }

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ModuleOptions::new("x");
        // A directory cannot be opened for append.
        options.extra.insert("path".into(), dir.path().display().to_string());
        let mut module = FileOutput::new();
        module.configure(options);
        assert!(matches!(module.run().await, Err(ModuleError::Failed(_))));
    }
}
