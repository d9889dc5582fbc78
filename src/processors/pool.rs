//! Fixed-size worker pool for per-file jobs.
//!
//! Workers are OS threads competing on a shared bounded dispatch channel,
//! so faster workers naturally take more files. Outcomes stream back on an
//! unbounded channel in completion order; callers that need input order
//! reorder by [`FileRef::ordinal`]. A panicking job is contained and
//! surfaced as a failed outcome for that file only.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver};

use crate::core::locator::FileRef;

/// Result of one file's job.
#[derive(Debug)]
pub enum PoolOutcome<T> {
    Done { file: FileRef, value: T },
    Failed { file: FileRef, error: String },
}

impl<T> PoolOutcome<T> {
    pub fn file(&self) -> &FileRef {
        match self {
            PoolOutcome::Done { file, .. } => file,
            PoolOutcome::Failed { file, .. } => file,
        }
    }
}

/// A pool of `workers` threads that applies a job to a list of files.
pub struct FilterPool {
    workers: usize,
}

impl FilterPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `job` over `files`, returning a receiver of outcomes.
    ///
    /// The receiver yields exactly one outcome per file, in completion
    /// order, then disconnects once all workers have drained the dispatch
    /// channel. Dropping the receiver early cancels remaining sends and
    /// the pool winds down.
    pub fn run<T, F>(&self, files: Vec<FileRef>, job: F) -> Receiver<PoolOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(&FileRef) -> Result<T, String> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let (file_tx, file_rx) = bounded::<FileRef>(self.workers * 2);
        let (out_tx, out_rx) = unbounded::<PoolOutcome<T>>();

        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let job = Arc::clone(&job);
            let rx = file_rx.clone();
            let tx = out_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("filter-worker-{}", id))
                .spawn(move || {
                    for file in rx.iter() {
                        let result = catch_unwind(AssertUnwindSafe(|| job(&file)));
                        let outcome = match result {
                            Ok(Ok(value)) => PoolOutcome::Done { file, value },
                            Ok(Err(error)) => PoolOutcome::Failed { file, error },
                            Err(payload) => PoolOutcome::Failed {
                                file,
                                error: panic_message(payload),
                            },
                        };
                        if tx.send(outcome).is_err() {
                            // Receiver dropped, stop taking work.
                            break;
                        }
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        drop(file_rx);
        drop(out_tx);

        thread::Builder::new()
            .name("filter-dispatch".to_string())
            .spawn(move || {
                for file in files {
                    if file_tx.send(file).is_err() {
                        break;
                    }
                }
                drop(file_tx);
                for handle in handles {
                    if handle.join().is_err() {
                        log::error!("worker thread terminated abnormally");
                    }
                }
            })
            .expect("failed to spawn dispatch thread");

        out_rx
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "worker panicked".to_string()
    }
}
