//! A fixed set of independent contexts behind one dispatch channel.
//!
//! Each member context is driven by a worker thread pulling jobs from a shared
//! queue, so a job lands on whichever member is free first. Definitions and
//! `exec_all` are broadcast to every member instead.
//!
//! # Example
//!
//! ```no_run
//! use tether_runtime::Pool;
//!
//! let pool = Pool::new(4).unwrap();
//! pool.define_function("double", |x: f64| x * 2.0).unwrap();
//! let result: f64 = pool.eval("double(21)").unwrap();
//! assert_eq!(result, 42.0);
//! ```

use crate::api::{Definer, Evaluator};
use crate::config::{ContextConfig, PoolConfig};
use crate::context::{Context, ContextHandle, ObjectHandle};
use crate::error::{TetherError, TetherResult};
use crate::function::{HostFunction, IntoHostFunction};
use crate::proxy::Proxy;
use crate::report::READER_LABEL;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info_span, warn};

type Job = Box<dyn FnOnce(&ContextHandle) + Send>;

/// Job counters shared by the pool and its workers.
///
/// Only work sent through the shared queue is counted; broadcasts are not.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Jobs put on the shared queue.
    pub jobs_submitted: AtomicU64,
    /// Jobs whose result has been sent back, failed ones included.
    pub jobs_completed: AtomicU64,
    /// Completed jobs that returned an error.
    pub jobs_failed: AtomicU64,
}

impl PoolStats {
    /// Copy the counters out. Reads are relaxed, so the three values may be
    /// a job apart from each other under load.
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }

    /// Submitted jobs that have not reported back yet.
    pub fn jobs_in_flight(&self) -> u64 {
        let submitted = self.jobs_submitted.load(Ordering::Relaxed);
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        submitted.saturating_sub(completed)
    }

    fn record<T>(&self, result: &TetherResult<T>) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Plain copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

impl PoolStatsSnapshot {
    /// Percentage of completed jobs that succeeded; 100 before any job completes.
    pub fn success_rate(&self) -> f64 {
        if self.jobs_completed == 0 {
            100.0
        } else {
            let succeeded = self.jobs_completed - self.jobs_failed;
            (succeeded as f64 / self.jobs_completed as f64) * 100.0
        }
    }
}

/// Configures a [`Pool`] before its members are started.
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Member count, clamped to at least one. Defaults to the logical CPU count.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.size = size.max(1);
        self
    }

    /// Engine limits applied to each member.
    pub fn context_config(mut self, config: ContextConfig) -> Self {
        self.config.context = config;
        self
    }

    /// Start the members and their workers. Fails if any member fails to start.
    pub fn build(self) -> TetherResult<Pool> {
        Pool::with_config(self.config)
    }
}

/// A pool of independent contexts.
///
/// Member contexts are never handed out; every operation goes through the pool.
pub struct Pool {
    members: Vec<ContextHandle>,
    job_tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    valid: AtomicBool,
    stats: Arc<PoolStats>,
}

impl Pool {
    /// Create a pool of `size` contexts (at least one).
    pub fn new(size: usize) -> TetherResult<Pool> {
        Self::builder().pool_size(size).build()
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    pub fn with_config(config: PoolConfig) -> TetherResult<Pool> {
        let size = config.size.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();
        let stats = Arc::new(PoolStats::default());

        let mut members = Vec::with_capacity(size);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(size);
        for index in 0..size {
            let context = match Context::with_config(config.context.clone()) {
                Ok(context) => context,
                Err(err) => {
                    // Close the queue so the workers already started exit.
                    drop(job_tx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(err);
                }
            };
            members.push(context.handle());

            let job_rx = job_rx.clone();
            let worker = thread::Builder::new()
                .name(format!("tether-pool-{index}"))
                .spawn(move || run_pool_worker(context, job_rx))?;
            workers.push(worker);
        }

        debug!(size, "pool started");
        Ok(Pool {
            members,
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            valid: AtomicBool::new(true),
            stats,
        })
    }

    /// Number of member contexts
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn check_valid(&self) -> TetherResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TetherError::DestroyedPool)
        }
    }

    /// Run `f` on whichever member is free first and wait for the result.
    fn one<R, F>(&self, f: F) -> TetherResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ContextHandle) -> TetherResult<R> + Send + 'static,
    {
        self.check_valid()?;
        let job_tx = self
            .job_tx
            .lock()
            .clone()
            .ok_or(TetherError::DestroyedPool)?;

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let stats = Arc::clone(&self.stats);
        stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        let job: Job = Box::new(move |context: &ContextHandle| {
            let result = f(context);
            stats.record(&result);
            let _ = done_tx.send(result);
        });
        job_tx.send(job).map_err(|_| TetherError::DestroyedPool)?;
        drop(job_tx);

        done_rx
            .recv()
            .map_err(|_| TetherError::internal("pool job was dropped before completing"))?
    }

    /// Run `f` against every member in order, stopping at the first error.
    fn each<R>(&self, mut f: impl FnMut(&ContextHandle) -> TetherResult<R>) -> TetherResult<Vec<R>> {
        self.check_valid()?;
        self.members.iter().map(|member| f(member)).collect()
    }

    /// Expose a host function in every member.
    pub fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        let host: HostFunction = function.into_host_function();
        self.each(|member| member.define_function(name, host.clone()))?;
        Ok(())
    }

    /// Create the same object in every member.
    pub fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectPool> {
        let objects = self.each(|member| member.define_object(name, proxy.clone()))?;
        Ok(ObjectPool { objects })
    }

    /// Run `source` in one member.
    pub fn exec(&self, source: &str) -> TetherResult<()> {
        let source = source.to_string();
        self.one(move |member| member.exec(&source))
    }

    /// Run `source` in one member and decode the result.
    pub fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T> {
        let source = source.to_string();
        let json = self.one(move |member| member.eval_json(source))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Run a script file in one member.
    pub fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let label = path.display().to_string();
        self.one(move |member| member.exec_labeled(source, label))
    }

    /// Read a whole script from `reader` and run it in one member.
    pub fn exec_from(&self, mut reader: impl Read) -> TetherResult<()> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.one(move |member| member.exec_labeled(source, READER_LABEL.to_string()))
    }

    /// Run `source` in every member, stopping at the first error.
    pub fn exec_all(&self, source: &str) -> TetherResult<()> {
        self.each(|member| member.exec(source))?;
        Ok(())
    }

    /// Run a script file in every member, stopping at the first error.
    pub fn exec_file_all(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let label = path.display().to_string();
        self.each(|member| member.exec_labeled(source.clone(), label.clone()))?;
        Ok(())
    }

    /// Close the dispatch channel and wait for every member to shut down.
    ///
    /// Calling it again does nothing. From inside a host function running in
    /// a member, the wait is skipped since that member cannot finish until
    /// the call returns.
    pub fn destroy(&self) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(size = self.members.len(), "destroying pool");
        drop(self.job_tx.lock().take());

        if self.members.iter().any(ContextHandle::is_owner_thread) {
            warn!("pool destroyed from one of its own contexts; not waiting for workers");
            return;
        }
        self.wait();
    }

    /// Block until every worker has exited.
    pub fn wait(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("pool worker panicked");
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.members.len())
            .field("valid", &self.is_valid())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

fn run_pool_worker(context: Context, job_rx: Receiver<Job>) {
    let _span = info_span!("pool_worker", context = %context.id()).entered();
    debug!("pool worker starting");

    for job in job_rx.iter() {
        job(&*context);
    }

    debug!("pool worker shutting down");
    // Dropping the owner destroys the context.
    drop(context);
}

/// The same object defined in every member of a pool.
#[derive(Debug, Clone)]
pub struct ObjectPool {
    objects: Vec<ObjectHandle>,
}

impl ObjectPool {
    /// Expose a host function as a method of every copy of this object.
    pub fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        let host = function.into_host_function();
        for object in &self.objects {
            object.define_function(name, host.clone())?;
        }
        Ok(())
    }

    /// Create a nested object under every copy of this one.
    pub fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectPool> {
        let objects = self
            .objects
            .iter()
            .map(|object| object.define_object(name, proxy.clone()))
            .collect::<TetherResult<Vec<_>>>()?;
        Ok(ObjectPool { objects })
    }
}

impl Definer for Pool {
    type Object = ObjectPool;

    fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        Pool::define_function(self, name, function)
    }

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectPool> {
        Pool::define_object(self, name, proxy)
    }
}

impl Definer for ObjectPool {
    type Object = ObjectPool;

    fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        ObjectPool::define_function(self, name, function)
    }

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectPool> {
        ObjectPool::define_object(self, name, proxy)
    }
}

impl Evaluator for Pool {
    fn exec(&self, source: &str) -> TetherResult<()> {
        Pool::exec(self, source)
    }

    fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T> {
        Pool::eval(self, source)
    }

    fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        Pool::exec_file(self, path)
    }

    fn exec_from(&self, reader: impl Read) -> TetherResult<()> {
        Pool::exec_from(self, reader)
    }
}
