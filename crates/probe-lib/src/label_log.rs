//! Append-only log of classification labels
//!
//! One JSON object per line. Each record is written with a single
//! `write_all` while holding the file lock, so concurrent workers never
//! interleave partial lines. After a failed write the next append first
//! terminates whatever fragment was left behind.

use crate::error::LabelLogError;
use crate::models::LabelRecord;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Destination for label records
#[async_trait]
pub trait LabelSink: Send + Sync {
    async fn append(&self, record: &LabelRecord) -> Result<(), LabelLogError>;
}

/// Label log backed by a JSON-lines file
pub struct FileLabelLog {
    path: PathBuf,
    file: Mutex<LogFile>,
}

struct LogFile {
    file: File,
    /// The last write failed and may have left an unterminated line
    torn: bool,
}

async fn write_line<W>(writer: &mut W, torn: &mut bool, line: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if *torn {
        writer.write_all(b"\n").await?;
        *torn = false;
    }

    let result = async {
        writer.write_all(line).await?;
        writer.flush().await
    }
    .await;
    if result.is_err() {
        *torn = true;
    }
    result
}

impl FileLabelLog {
    /// Open (or create) the log for appending
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LabelLogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LabelLogError::Open {
                    path: path.clone(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LabelLogError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(LogFile { file, torn: false }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LabelSink for FileLabelLog {
    async fn append(&self, record: &LabelRecord) -> Result<(), LabelLogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let LogFile { file, torn } = &mut *guard;
        write_line(file, torn, &line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_writes_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labels.jsonl");
        let log = FileLabelLog::open(path.clone()).await.unwrap();

        log.append(&LabelRecord::now(Label::Normal)).await.unwrap();
        log.append(&LabelRecord::now(Label::RateLimited)).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let labels: Vec<Label> = content
            .lines()
            .map(|line| serde_json::from_str::<LabelRecord>(line).unwrap().label)
            .collect();
        assert_eq!(labels, vec![Label::Normal, Label::RateLimited]);
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("labels.jsonl");

        {
            let log = FileLabelLog::open(path.clone()).await.unwrap();
            log.append(&LabelRecord::now(Label::Normal)).await.unwrap();
        }
        let log = FileLabelLog::open(path.clone()).await.unwrap();
        log.append(&LabelRecord::now(Label::Normal)).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labels.jsonl");
        let log = Arc::new(FileLabelLog::open(path.clone()).await.unwrap());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let label = if worker % 2 == 0 {
                    Label::Normal
                } else {
                    Label::RateLimited
                };
                for _ in 0..50 {
                    log.append(&LabelRecord::now(label)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<LabelRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 400);
        assert_eq!(
            records.iter().filter(|r| r.label == Label::RateLimited).count(),
            200
        );
    }

    /// Accepts `budget` bytes, then fails every write
    struct FullDisk {
        written: Vec<u8>,
        budget: usize,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn record_line(label: Label) -> Vec<u8> {
        let mut line = serde_json::to_vec(&LabelRecord::now(label)).unwrap();
        line.push(b'\n');
        line
    }

    #[tokio::test]
    async fn test_failed_write_does_not_corrupt_next_record() {
        let mut disk = FullDisk {
            written: Vec::new(),
            budget: 10,
        };
        let mut torn = false;

        let first = record_line(Label::RateLimited);
        assert!(write_line(&mut disk, &mut torn, &first).await.is_err());
        assert!(torn);

        disk.budget = usize::MAX;
        let second = record_line(Label::Normal);
        write_line(&mut disk, &mut torn, &second).await.unwrap();
        assert!(!torn);

        let content = String::from_utf8(disk.written).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(serde_json::from_str::<LabelRecord>(lines[0]).is_err());
        let record: LabelRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record.label, Label::Normal);
    }

    #[tokio::test]
    async fn test_open_fails_on_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = FileLabelLog::open(temp_dir.path().to_path_buf()).await;
        assert!(matches!(result, Err(LabelLogError::Open { .. })));
    }
}
