// Append one formatted line per consumed record to a plain text file.
// The file is opened fresh for every write in append mode; no rotation.

use std::path::PathBuf;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::domain::{LogRecord, RecordParseError};
use crate::error::SinkError;
use crate::port::{LogSink, PersistOutcome};

#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn write_record(&self, json_text: &str) -> Result<String, SinkError> {
        let record = LogRecord::from_slice(json_text.as_bytes()).map_err(|e| match e {
            RecordParseError::Json(source) => SinkError::Parse(source),
            RecordParseError::NotAnObject => SinkError::NotAnObject,
        })?;
        let line = record.format_line(Utc::now());

        self.append(&line).await.map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;

        info!("Processed: {}", line.trim_end());
        Ok(line)
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

impl LogSink for FileSink {
    fn persist<'a>(&'a self, json_text: &'a str) -> BoxFuture<'a, PersistOutcome> {
        Box::pin(async move {
            match self.write_record(json_text).await {
                Ok(line) => PersistOutcome::Written { line },
                Err(e) => PersistOutcome::Suppressed(e),
            }
        })
    }
}
