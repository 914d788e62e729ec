//! Stage executor.
//!
//! [`Dispatch`] realizes a `map`, `filter` or `for_each` stage under the
//! [`ExecMode`] chosen for it. Every mode releases results in the order
//! their inputs were pulled.
//!
//! - Sequential: one element per pull, on the calling thread.
//! - Parallel: a batch of upstream elements is applied across a worker pool
//!   that lives only for that batch; results are buffered and released in
//!   submission order.
//! - Vectorized: the whole upstream is applied as one numeric array.

use std::collections::VecDeque;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::{BoxError, FlowError};
use crate::mode::ExecMode;
use crate::stage::StageKind;
use crate::vector;

/// A mode-dispatched stage.
///
/// The stage function maps one element to `Some(output)`, to `None` when
/// the element is filtered out, or to an error.
pub struct Dispatch<I, F, R> {
    upstream: I,
    f: F,
    mode: ExecMode,
    kind: StageKind,
    ready: VecDeque<Result<R, FlowError>>,
    position: usize,
    done: bool,
}

impl<I, F, R> Dispatch<I, F, R> {
    pub(crate) fn new(upstream: I, f: F, mode: ExecMode, kind: StageKind) -> Self {
        debug!(stage = %kind, %mode, "stage dispatch configured");
        Self {
            upstream,
            f,
            mode,
            kind,
            ready: VecDeque::new(),
            position: 0,
            done: false,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }
}

impl<I, T, F, R> Dispatch<I, F, R>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: Clone + Send + 'static,
    R: Send,
    F: Fn(T) -> Result<Option<R>, BoxError> + Sync,
{
    fn pull_sequential(&mut self) -> Option<Result<R, FlowError>> {
        loop {
            match self.upstream.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(x)) => {
                    self.position += 1;
                    match (self.f)(x) {
                        Ok(Some(r)) => return Some(Ok(r)),
                        Ok(None) => {}
                        Err(e) => return Some(Err(FlowError::UserFunction(e))),
                    }
                }
            }
        }
    }

    fn fill_parallel(&mut self, workers: usize) {
        let capacity = ExecMode::batch_size(workers);
        let mut batch = Vec::with_capacity(capacity);
        let mut upstream_error = None;
        while batch.len() < capacity {
            match self.upstream.next() {
                Some(Ok(x)) => batch.push(x),
                Some(Err(e)) => {
                    upstream_error = Some(e);
                    break;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        let offset = self.position;
        self.position += batch.len();
        if !batch.is_empty() {
            trace!(stage = %self.kind, offset, len = batch.len(), workers, "dispatching batch");
            match run_batch(batch, &self.f, workers, offset) {
                Ok(outputs) => self.ready.extend(outputs.into_iter().flatten().map(Ok)),
                Err(e) => {
                    debug!(stage = %self.kind, error = %e, "parallel batch failed");
                    self.ready.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
        if let Some(e) = upstream_error {
            self.ready.push_back(Err(e));
        }
    }

    fn fill_vectorized(&mut self) {
        self.done = true;
        let mut elements = Vec::new();
        for item in self.upstream.by_ref() {
            match item {
                Ok(x) => elements.push(x),
                Err(e) => {
                    self.ready.push_back(Err(e));
                    return;
                }
            }
        }
        self.position += elements.len();
        trace!(stage = %self.kind, len = elements.len(), "applying vectorized stage");
        match vector::apply(elements, &self.f) {
            Ok(outputs) => self.ready.extend(outputs.into_iter().flatten().map(Ok)),
            Err(e) => self.ready.push_back(Err(e)),
        }
    }
}

impl<I, T, F, R> Iterator for Dispatch<I, F, R>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: Clone + Send + 'static,
    R: Send,
    F: Fn(T) -> Result<Option<R>, BoxError> + Sync,
{
    type Item = Result<R, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            match self.mode {
                ExecMode::Sequential => return self.pull_sequential(),
                ExecMode::Parallel { max_workers } => self.fill_parallel(max_workers.get()),
                ExecMode::Vectorized => self.fill_vectorized(),
            }
        }
    }
}

/// Apply `f` to one batch on a pool of at most `workers` threads.
///
/// Outputs keep the batch order. When invocations fail, the error of the
/// lowest input position wins and the rest of the batch is discarded.
fn run_batch<T, R, F>(
    batch: Vec<T>,
    f: &F,
    workers: usize,
    offset: usize,
) -> Result<Vec<Option<R>>, FlowError>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<Option<R>, BoxError> + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.min(batch.len()))
        .thread_name(|i| format!("libloop-worker-{i}"))
        .build()?;

    let results: Vec<Result<Option<R>, BoxError>> =
        pool.install(|| batch.into_par_iter().map(f).collect());

    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| {
            result.map_err(|source| FlowError::ParallelStage {
                index: offset + i,
                source,
            })
        })
        .collect()
}
