//! Explicit execution context for the build and merge pipelines.
//!
//! Nothing in the library reaches for global state: the temp directory,
//! thread count, memory budget, progress callback and cancellation token all
//! travel through a [`Context`] value handed to the long-running stages.
//! Stages sample the cancellation flag at iteration boundaries and return
//! [`SeqstoreError::Cancelled`] when it is set; callers are then expected to
//! delete partial outputs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SeqstoreError;
use crate::Result;

/// Default memory budget for the seqset builder: 4 GiB.
pub const DEFAULT_MAX_MEM: u64 = 4 * 1024 * 1024 * 1024;

pub type ProgressFn = dyn Fn(f64) + Send + Sync;

pub struct Context {
    tmpdir: PathBuf,
    threads: usize,
    max_mem: u64,
    keep_tmp: bool,
    progress: Option<Box<ProgressFn>>,
    cancel: Arc<AtomicBool>,
}

impl Default for Context {
    fn default() -> Context {
        Context {
            tmpdir: std::env::temp_dir(),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_mem: DEFAULT_MAX_MEM,
            keep_tmp: false,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Directory for intermediate files.
    pub fn with_tmpdir<P: AsRef<Path>>(mut self, tmpdir: P) -> Context {
        self.tmpdir = tmpdir.as_ref().to_path_buf();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Context {
        self.threads = threads.max(1);
        self
    }

    /// Memory budget in bytes for the seqset builder.
    pub fn with_max_mem(mut self, max_mem: u64) -> Context {
        self.max_mem = max_mem;
        self
    }

    /// Keep intermediate files instead of deleting them.
    pub fn with_keep_tmp(mut self, keep_tmp: bool) -> Context {
        self.keep_tmp = keep_tmp;
        self
    }

    pub fn with_progress(mut self, progress: Box<ProgressFn>) -> Context {
        self.progress = Some(progress);
        self
    }

    /// Share a cancellation flag, e.g. one set by a SIGINT handler.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Context {
        self.cancel = cancel;
        self
    }

    pub fn tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn max_mem(&self) -> u64 {
        self.max_mem
    }

    pub fn keep_tmp(&self) -> bool {
        self.keep_tmp
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Report fractional progress of the current stage.
    pub fn progress(&self, fraction: f64) {
        if let Some(cb) = &self.progress {
            cb(fraction.clamp(0.0, 1.0));
        }
    }

    /// Err with [`SeqstoreError::Cancelled`] once the flag is set.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(SeqstoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
