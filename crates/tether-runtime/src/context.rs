//! Script contexts and their thread-confined dispatch.
//!
//! A [`Context`] is one isolated script global namespace. All of its engine work
//! runs on a dedicated owning thread; callers on any other thread enqueue a task
//! and block until it has run, so every public operation is synchronous and
//! totally ordered per context. Calls made from the owning thread itself (from
//! inside a host function) run inline, which keeps reentrant definitions from
//! deadlocking.
//!
//! # Example
//!
//! ```no_run
//! use tether_runtime::Context;
//!
//! let cx = Context::new().unwrap();
//! cx.define_function("add", |a: i64, b: i64| a + b).unwrap();
//! let sum: i64 = cx.eval("add(1, 2)").unwrap();
//! assert_eq!(sum, 3);
//! ```

use crate::config::ContextConfig;
use crate::error::{TetherError, TetherResult};
use crate::function::IntoHostFunction;
use crate::proxy::Proxy;
use crate::report::{EVAL_LABEL, EXEC_LABEL, READER_LABEL};
use crate::runtime;
use crate::uid::{Uid, next_uid};
use crate::worker::{self, ContextState, Task};
use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;
use rquickjs::Ctx;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

struct Shared {
    id: Uid,
    owner: ThreadId,
    valid: AtomicBool,
    task_tx: Mutex<Option<Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable, thread-safe handle to a context.
///
/// Handles do not keep the context alive past [`destroy`](ContextHandle::destroy);
/// afterwards every operation fails with [`TetherError::DestroyedContext`].
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<Shared>,
}

/// Owner of a context. Dropping it destroys the context.
pub struct Context {
    handle: ContextHandle,
}

impl Context {
    /// Create a context with default engine limits.
    pub fn new() -> TetherResult<Context> {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context, blocking until its engine is ready.
    pub fn with_config(config: ContextConfig) -> TetherResult<Context> {
        let id = next_uid();
        let (task_tx, task_rx) = unbounded::<Task>();
        let (ready_tx, ready_rx) = bounded(1);
        let thread_name = format!("tether-context-{id}");

        let thread = runtime::run_exclusively(move || -> TetherResult<JoinHandle<()>> {
            let thread = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker::run_context(id, config, task_rx, ready_tx))?;
            runtime::register(id, thread_name)?;
            Ok(thread)
        })??;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(TetherError::internal(
                "context thread exited before signaling readiness",
            ))
        });
        if let Err(err) = ready {
            let _ = thread.join();
            return Err(TetherError::ContextCreation(err.to_string()));
        }

        debug!(context = %id, "context created");
        Ok(Context {
            handle: ContextHandle {
                shared: Arc::new(Shared {
                    id,
                    owner: thread.thread().id(),
                    valid: AtomicBool::new(true),
                    task_tx: Mutex::new(Some(task_tx)),
                    thread: Mutex::new(Some(thread)),
                }),
            },
        })
    }

    /// A non-owning handle, e.g. for host functions that call back in.
    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }
}

impl Deref for Context {
    type Target = ContextHandle;

    fn deref(&self) -> &ContextHandle {
        &self.handle
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.handle.destroy();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.handle, f)
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl ContextHandle {
    pub fn id(&self) -> Uid {
        self.shared.id
    }

    /// False once `destroy` has been called.
    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Acquire)
    }

    /// Whether the calling thread is this context's owning thread.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Run `f` on the owning thread and wait for its result.
    pub(crate) fn dispatch<R, F>(&self, f: F) -> TetherResult<R>
    where
        R: Send + 'static,
        F: for<'js> FnOnce(&ContextState, &Ctx<'js>) -> R + Send + 'static,
    {
        if !self.is_valid() {
            return Err(TetherError::DestroyedContext);
        }
        if self.is_owner_thread() {
            trace!(context = %self.shared.id, "dispatch inline");
            return worker::run_inline(f);
        }

        let task_tx = self
            .shared
            .task_tx
            .lock()
            .clone()
            .ok_or(TetherError::DestroyedContext)?;
        let (done_tx, done_rx) = bounded(1);
        let task: Task = Box::new(move |state: &ContextState, ctx: &Ctx<'_>| {
            let _ = done_tx.send(f(state, ctx));
        });
        task_tx
            .send(task)
            .map_err(|_| TetherError::DestroyedContext)?;
        drop(task_tx);

        done_rx
            .recv()
            .map_err(|_| TetherError::internal("context task was dropped before completing"))
    }

    /// Run `source` for its side effects.
    pub fn exec(&self, source: &str) -> TetherResult<()> {
        self.exec_labeled(source.to_string(), EXEC_LABEL.to_string())
    }

    pub(crate) fn exec_labeled(&self, source: String, label: String) -> TetherResult<()> {
        self.dispatch(move |state, ctx| state.exec(ctx, &source, &label))?
    }

    /// Run `source` and decode its completion value into `T`.
    ///
    /// The value goes through the engine's `JSON.stringify`, so `undefined`
    /// and functions come back as `null`. Use [`Raw`](crate::Raw) to get the
    /// JSON text itself.
    pub fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T> {
        let json = self.eval_json(source.to_string())?;
        Ok(serde_json::from_str(&json)?)
    }

    pub(crate) fn eval_json(&self, source: String) -> TetherResult<String> {
        self.dispatch(move |state, ctx| state.eval(ctx, &source, EVAL_LABEL))?
    }

    /// Read and run a script file. Errors are labeled with the path.
    pub fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        self.exec_labeled(source, path.display().to_string())
    }

    /// Read a whole script from `reader` and run it.
    pub fn exec_from(&self, mut reader: impl Read) -> TetherResult<()> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.exec_labeled(source, READER_LABEL.to_string())
    }

    /// Expose a host function as a global.
    pub fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        self.define_function_in(Uid::ROOT, name, function)
    }

    pub(crate) fn define_function_in<M>(
        &self,
        parent: Uid,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        let host = function.into_host_function();
        let id = next_uid();
        let name = name.to_string();
        self.dispatch(move |state, ctx| state.define_function(ctx, parent, &name, id, host))?
    }

    /// Create a global object, optionally bound to a host value.
    ///
    /// Without a proxy the object is an empty namespace for nested definitions.
    pub fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectHandle> {
        self.define_object_in(Uid::ROOT, name, proxy)
    }

    pub(crate) fn define_object_in(
        &self,
        parent: Uid,
        name: &str,
        proxy: Option<Proxy>,
    ) -> TetherResult<ObjectHandle> {
        let id = next_uid();
        let name = name.to_string();
        self.dispatch(move |state, ctx| state.define_object(ctx, parent, &name, id, proxy))??;
        Ok(ObjectHandle {
            context: self.clone(),
            id,
        })
    }

    /// Tear the context down. Calling it again does nothing.
    ///
    /// Work already queued still runs; the owning thread then exits and is
    /// joined, unless `destroy` is called from that thread.
    pub fn destroy(&self) {
        if !self.shared.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(context = %self.shared.id, "destroying context");
        drop(self.shared.task_tx.lock().take());

        if self.is_owner_thread() {
            return;
        }
        let thread = self.shared.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!(context = %self.shared.id, "context thread panicked during teardown");
            }
        }
    }
}

/// A script object created by `define_object`, usable as a parent for nested
/// definitions.
#[derive(Clone)]
pub struct ObjectHandle {
    context: ContextHandle,
    id: Uid,
}

impl ObjectHandle {
    pub fn id(&self) -> Uid {
        self.id
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Expose a host function as a method of this object.
    pub fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        self.context.define_function_in(self.id, name, function)
    }

    /// Create a nested object under this one.
    pub fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectHandle> {
        self.context.define_object_in(self.id, name, proxy)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("context", &self.context.id())
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_runs_on_owning_thread() {
        let cx = Context::new().unwrap();
        let (name, id) = cx
            .dispatch(|state, _ctx| (thread::current().name().map(str::to_string), state.id()))
            .unwrap();
        assert_eq!(name, Some(format!("tether-context-{}", cx.id())));
        assert_eq!(id, cx.id());
        assert!(!cx.is_owner_thread());
    }

    #[test]
    fn test_context_is_registered_until_destroyed() {
        let cx = Context::new().unwrap();
        let id = cx.id();
        assert!(runtime::is_registered(id));

        cx.destroy();
        assert!(!runtime::is_registered(id));
        assert!(!cx.is_valid());
    }

    #[test]
    fn test_drop_destroys() {
        let cx = Context::new().unwrap();
        let handle = cx.handle();
        drop(cx);

        assert!(!handle.is_valid());
        assert!(matches!(
            handle.exec("1"),
            Err(TetherError::DestroyedContext)
        ));
        assert!(!runtime::is_registered(handle.id()));
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let cx = Context::new().unwrap();
        let other = Context::new().unwrap();
        let foreign = other.define_object("ns", None).unwrap();

        let err = cx
            .define_function_in(foreign.id(), "f", || 1)
            .unwrap_err();
        assert!(matches!(err, TetherError::UnknownEntity { kind: "object", .. }));
    }
}
