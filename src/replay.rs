//! Parallel replay of archived invocations.
//!
//! Workers pull record indices from a shared counter. Each replay decodes its
//! record, builds a private extension loader, hands both to the front-end and
//! disposes the loader afterwards. Failures stay with their invocation;
//! cancellation is checked between invocations only.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::blob::ContentKey;
use crate::config::ReplayConfig;
use crate::loader::{self, ExtensionLoader};
use crate::reader::ArchiveReader;
use crate::record::{ContentEntry, InvocationRecord, ReferenceEntry};

/// Cooperative stop flag shared between a driver and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a front-end gets for one invocation.
pub struct ReplayRequest<'a> {
    pub index: usize,
    pub record: InvocationRecord,
    pub reader: &'a ArchiveReader,
    pub loader: &'a dyn ExtensionLoader,
}

impl ReplayRequest<'_> {
    /// Content inputs with their bytes, in stored order.
    pub fn contents(&self) -> crate::Result<Vec<(&ContentEntry, Vec<u8>)>> {
        self.record
            .contents
            .iter()
            .map(|entry| -> crate::Result<_> {
                Ok((entry, self.reader.blob_bytes(&entry.key)?))
            })
            .collect()
    }

    /// Reference modules with their bytes, in stored order.
    pub fn references(&self) -> crate::Result<Vec<(&ReferenceEntry, Vec<u8>)>> {
        self.record
            .references
            .iter()
            .map(|entry| -> crate::Result<_> {
                Ok((entry, self.reader.module_bytes(&entry.module)?))
            })
            .collect()
    }

    pub fn blob(&self, key: &ContentKey) -> crate::Result<Vec<u8>> {
        self.reader.blob_bytes(key)
    }
}

/// External compiler front-end.
pub trait CompilerFrontEnd: Sync {
    type Output: Send;

    fn replay(&self, request: &ReplayRequest<'_>) -> Result<Self::Output>;
}

#[derive(Debug)]
pub enum ReplayOutcome<T> {
    Completed(T),
    Failed(anyhow::Error),
}

impl<T> ReplayOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ReplayOutcome::Completed(_))
    }
}

#[derive(Debug)]
pub struct ReplayReport<T> {
    /// Outcomes for every attempted invocation, ordered by index.
    pub outcomes: Vec<(usize, ReplayOutcome<T>)>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl<T> ReplayReport<T> {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.outcomes.len() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Replays every record of `reader` with `config.workers` threads.
pub fn replay_all<F>(
    reader: &ArchiveReader,
    front_end: &F,
    config: &ReplayConfig,
    cancel: &CancelToken,
) -> Result<ReplayReport<F::Output>>
where
    F: CompilerFrontEnd,
{
    let count = reader.count();
    let worker_count = config.workers.max(1).min(count.max(1));
    let next = AtomicUsize::new(0);
    let start = Instant::now();

    let mut outcomes = thread::scope(|scope| -> Result<Vec<_>> {
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let next = &next;
            let handle = thread::Builder::new()
                .name(format!("replay-worker-{worker_id}"))
                .spawn_scoped(scope, move || {
                    let mut done = Vec::new();
                    while !cancel.is_cancelled() {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        if index >= count {
                            break;
                        }
                        done.push((index, replay_one(reader, front_end, config, index)));
                    }
                    done
                })
                .map_err(|e| anyhow!("failed to spawn replay worker: {e}"))?;
            handles.push(handle);
        }

        let mut outcomes = Vec::with_capacity(count);
        for handle in handles {
            outcomes.extend(
                handle
                    .join()
                    .map_err(|_| anyhow!("replay worker panicked"))?,
            );
        }
        Ok(outcomes)
    })?;
    outcomes.sort_by_key(|(index, _)| *index);

    let report = ReplayReport {
        cancelled: cancel.is_cancelled() && outcomes.len() < count,
        outcomes,
        duration: start.elapsed(),
    };
    log::info!(
        "replayed {} of {} invocations ({} failed) in {:.2?} ({:.1} inv/sec)",
        report.outcomes.len(),
        count,
        report.failed(),
        report.duration,
        report.throughput()
    );
    Ok(report)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

fn replay_one<F: CompilerFrontEnd>(
    reader: &ArchiveReader,
    front_end: &F,
    config: &ReplayConfig,
    index: usize,
) -> ReplayOutcome<F::Output> {
    let record = match reader.record(index) {
        Ok(record) => record,
        Err(err) => return ReplayOutcome::Failed(err.into()),
    };
    let mut loader = match loader::create(&config.loader, reader, &record) {
        Ok(loader) => loader,
        Err(err) => {
            log::warn!("invocation {index} ({}): {err}", record.project_path);
            return ReplayOutcome::Failed(err.into());
        }
    };
    let request = ReplayRequest {
        index,
        record,
        reader,
        loader: &*loader,
    };
    // A panicking front end fails its own invocation only.
    let result = panic::catch_unwind(AssertUnwindSafe(|| front_end.replay(&request)))
        .unwrap_or_else(|payload| {
            Err(anyhow!("front end panicked: {}", panic_message(&*payload)))
        });
    drop(request);
    loader.dispose();
    match result {
        Ok(output) => ReplayOutcome::Completed(output),
        Err(err) => {
            log::warn!("invocation {index} failed: {err:#}");
            ReplayOutcome::Failed(err)
        }
    }
}
