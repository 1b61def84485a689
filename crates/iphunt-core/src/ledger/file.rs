// # File Capture Ledger
//
// Append-only JSON-lines implementation of CaptureLedger.
//
// ## Durability
//
// - One capture per line, appended and fsync'd before `record` returns
// - Appends are serialized under one lock (single writer)
// - Captures are kept in memory as well, so stats and `recent` never touch disk
//
// ## Crash Recovery
//
// - A torn or corrupted line (e.g. power loss mid-write) is skipped on load
//   with a warning; every intact line before and after it is kept
// - A file whose last line has no newline gets one before the next append,
//   so a new row never lands on the end of a torn fragment
//
// ## File Format
//
// ```text
// {"account":"acc-1","address":"203.0.113.55","range":"203.0.113.0/24","timestamp":"2025-01-09T12:00:00Z"}
// {"account":"acc-2","address":"198.51.100.4","range":"198.51.100.0/24","timestamp":"2025-01-09T12:03:11Z"}
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::config::LedgerConfig;
use crate::traits::capture_ledger::{
    Capture, CaptureLedger, CaptureLedgerFactory, count_by_account, newest_first,
};

/// JSON-lines capture ledger
///
/// # Example
///
/// ```rust,no_run
/// use iphunt_core::ledger::FileLedger;
/// use iphunt_core::traits::{Capture, CaptureLedger};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = FileLedger::open("/var/lib/iphunt/captures.jsonl").await?;
///     ledger.record(&Capture::new("acc-1", "203.0.113.55", "203.0.113.0/24")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    captures: Mutex<Vec<Capture>>,
    /// The file does not end in a newline; only touched under `captures`
    torn_tail: AtomicBool,
}

impl FileLedger {
    /// Open (or create) a ledger file
    ///
    /// Creates parent directories if needed and loads existing captures.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create ledger directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let (captures, torn_tail) = Self::load(&path).await?;
        if torn_tail {
            tracing::warn!(
                "Ledger {} ends with an unterminated line; next append starts a new line",
                path.display()
            );
        }
        tracing::debug!(
            "Loaded capture ledger {}: {} captures",
            path.display(),
            captures.len()
        );

        Ok(Self {
            path,
            captures: Mutex::new(captures),
            torn_tail: AtomicBool::new(torn_tail),
        })
    }

    /// Path of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read existing captures, and whether the file ends mid-line
    async fn load(path: &Path) -> Result<(Vec<Capture>, bool), Error> {
        if !path.exists() {
            return Ok((Vec::new(), false));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::ledger(format!(
                "Failed to read ledger file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut captures = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Capture>(line) {
                Ok(capture) => captures.push(capture),
                Err(e) => {
                    tracing::warn!(
                        "Skipping corrupted ledger line {} in {}: {}",
                        line_no + 1,
                        path.display(),
                        e
                    );
                }
            }
        }

        let torn_tail = !content.is_empty() && !content.ends_with('\n');
        Ok((captures, torn_tail))
    }

    async fn append_line(&self, line: &str) -> Result<(), Error> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                Error::ledger(format!(
                    "Failed to open ledger file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(line.as_bytes()).await.map_err(|e| {
            Error::ledger(format!(
                "Failed to append to ledger file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        file.flush().await.map_err(|e| {
            Error::ledger(format!(
                "Failed to flush ledger file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        file.sync_data().await.map_err(|e| {
            Error::ledger(format!(
                "Failed to sync ledger file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

#[async_trait]
impl CaptureLedger for FileLedger {
    async fn record(&self, capture: &Capture) -> Result<(), Error> {
        let row = serde_json::to_string(capture)
            .map_err(|e| Error::ledger(format!("Failed to serialize capture: {}", e)))?;

        // The lock is held across the write: one writer at a time
        let mut guard = self.captures.lock().await;
        guard.push(capture.clone());

        let mut line = String::with_capacity(row.len() + 2);
        if self.torn_tail.load(Ordering::Acquire) {
            line.push('\n');
        }
        line.push_str(&row);
        line.push('\n');

        let result = self.append_line(&line).await;
        // A failed write may itself leave a partial line behind; an extra
        // empty line is skipped on load
        self.torn_tail.store(result.is_err(), Ordering::Release);
        drop(guard);

        if result.is_ok() {
            tracing::trace!("Capture appended to {}", self.path.display());
        }
        result
    }

    async fn stats_by_account(&self) -> Result<BTreeMap<String, usize>, Error> {
        let guard = self.captures.lock().await;
        Ok(count_by_account(&guard))
    }

    async fn recent(&self, n: usize) -> Result<Vec<Capture>, Error> {
        let guard = self.captures.lock().await;
        Ok(newest_first(&guard, n))
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every append is already synced
        Ok(())
    }
}

/// Factory for [`FileLedger`]
pub struct FileLedgerFactory;

#[async_trait]
impl CaptureLedgerFactory for FileLedgerFactory {
    async fn create(&self, config: &LedgerConfig) -> Result<Arc<dyn CaptureLedger>, Error> {
        match config {
            LedgerConfig::File { path } => {
                if path.is_empty() {
                    return Err(Error::config("Ledger file path cannot be empty"));
                }
                Ok(Arc::new(FileLedger::open(path).await?))
            }
            other => Err(Error::config(format!(
                "File ledger factory cannot build a '{}' ledger",
                other.type_name()
            ))),
        }
    }
}
