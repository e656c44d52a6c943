//! CSV output
//!
//! [`RecordWriter`] owns the output file and writes one flushed row per record.
//! [`RecordSink`] runs a writer on a dedicated blocking thread and hands out cloneable
//! [`SinkHandle`]s, so any number of channel workers can submit records while exactly
//! one thread touches the file. A write only returns after the row is flushed.

use crate::error::{Error, Result, WriterError};
use crate::types::OutputRecord;
use crate::utils::format_timestamp;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Column names of the output file
pub const HEADER: [&str; 6] = [
    "Channel Title",
    "Channel Username",
    "ID",
    "Message",
    "Date",
    "Media Path",
];

/// Records queued ahead of the writer before submitters wait
const SINK_QUEUE: usize = 256;

/// Writes records as CSV rows
pub struct RecordWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    sync: bool,
    rows: u64,
    #[cfg(test)]
    fail_after: Option<u64>,
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("rows", &self.rows)
            .finish()
    }
}

impl RecordWriter {
    /// Open `path` for writing, creating parent directories.
    ///
    /// Without `append` the file is truncated and a fresh header written. With
    /// `append`, rows go after the existing content and the header is written only if
    /// the file is empty. With `sync`, every row is fsynced as well as flushed.
    pub fn open(path: &Path, append: bool, sync: bool) -> std::result::Result<Self, WriterError> {
        let open_error = |e: std::io::Error| WriterError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }

        let file = if append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(open_error)?
        } else {
            File::create(path).map_err(open_error)?
        };
        let needs_header = file.metadata().map_err(open_error)?.len() == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let mut this = Self {
            writer,
            path: path.to_path_buf(),
            sync,
            rows: 0,
            #[cfg(test)]
            fail_after: None,
        };
        if needs_header {
            this.writer.write_record(HEADER)?;
            this.commit()?;
        }
        Ok(this)
    }

    /// Fail every write once `rows` rows have been written
    #[cfg(test)]
    pub(crate) fn fail_after(mut self, rows: u64) -> Self {
        self.fail_after = Some(rows);
        self
    }

    /// Append one row and flush it to the file.
    pub fn write(&mut self, record: &OutputRecord) -> std::result::Result<(), WriterError> {
        #[cfg(test)]
        if self.fail_after.is_some_and(|limit| self.rows >= limit) {
            return Err(std::io::Error::other("no space left on device").into());
        }
        let media_path = record
            .media_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let message_id = record.message_id.to_string();
        let date = format_timestamp(&record.date);
        self.writer.write_record([
            record.channel_title.as_str(),
            record.channel_reference.as_str(),
            message_id.as_str(),
            record.text.as_str(),
            date.as_str(),
            media_path.as_str(),
        ])?;
        self.commit()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written by this writer (header excluded)
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self) -> std::result::Result<(), WriterError> {
        self.writer.flush()?;
        if self.sync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

enum SinkCommand {
    Write {
        record: Box<OutputRecord>,
        ack: oneshot::Sender<std::result::Result<(), WriterError>>,
    },
    Shutdown,
}

/// Cloneable submitter for a [`RecordSink`]
#[derive(Clone, Debug)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkCommand>,
}

impl SinkHandle {
    /// Submit a record and wait until it is flushed.
    ///
    /// # Errors
    /// The writer's error if this row failed, or [`WriterError::Closed`] if the sink
    /// has shut down (closed, or stopped after an earlier failure).
    pub async fn write(&self, record: OutputRecord) -> std::result::Result<(), WriterError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(SinkCommand::Write {
                record: Box::new(record),
                ack,
            })
            .await
            .map_err(|_| WriterError::Closed)?;
        done.await.map_err(|_| WriterError::Closed)?
    }
}

impl std::fmt::Debug for SinkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkCommand::Write { record, .. } => f
                .debug_struct("Write")
                .field("message_id", &record.message_id)
                .finish(),
            SinkCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Single-writer actor around a [`RecordWriter`]
pub struct RecordSink {
    handle: SinkHandle,
    task: JoinHandle<u64>,
}

impl RecordSink {
    /// Move `writer` onto a blocking thread and start serving records.
    pub fn spawn(mut writer: RecordWriter) -> Self {
        let (tx, mut rx) = mpsc::channel(SINK_QUEUE);
        let task = tokio::task::spawn_blocking(move || {
            while let Some(command) = rx.blocking_recv() {
                match command {
                    SinkCommand::Write { record, ack } => {
                        let result = writer.write(&record);
                        let failed = result.is_err();
                        if let Err(e) = &result {
                            tracing::error!(
                                path = %writer.path().display(),
                                channel = %record.channel_reference,
                                message_id = %record.message_id,
                                error = %e,
                                "failed to write record, closing sink"
                            );
                        }
                        let _ = ack.send(result);
                        if failed {
                            break;
                        }
                    }
                    SinkCommand::Shutdown => break,
                }
            }
            writer.rows_written()
        });
        Self {
            handle: SinkHandle { tx },
            task,
        }
    }

    /// New submitter
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Stop accepting records and wait for the writer thread.
    ///
    /// Records submitted before the call are written first. Returns the number of rows
    /// written.
    pub async fn close(self) -> Result<u64> {
        // A send failure means the writer already stopped
        let _ = self.handle.tx.send(SinkCommand::Shutdown).await;
        drop(self.handle);
        self.task
            .await
            .map_err(|e| Error::Other(format!("record writer thread failed: {}", e)))
    }
}
