//! The owning thread of a context.
//!
//! Each context runs on its own thread, which holds the engine runtime, the
//! registry of exposed objects and functions, and the error buffer. Tasks
//! arrive over a channel and run one at a time. A task that calls back into the
//! same context (a host function defining another function, say) runs inline
//! against the engine context already entered further up the stack.

use crate::bootstrap::{Bridge, Described, PRELUDE_FILENAME, eval_named, register_bootstrap};
use crate::config::ContextConfig;
use crate::error::{ErrorReport, TetherError, TetherResult};
use crate::function::HostFunction;
use crate::proxy::{FunctionEntry, ObjectEntry, Proxy, Registry};
use crate::report::{ErrorBuffer, FATAL_LABEL, line_from_stack};
use crate::runtime;
use crate::uid::Uid;
use crossbeam_channel::{Receiver, Sender};
use rquickjs::Ctx;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{debug, error, info_span, trace, warn};

/// Unit of work for a context's owning thread.
pub(crate) type Task = Box<dyn for<'js> FnOnce(&ContextState, &Ctx<'js>) + Send>;

thread_local! {
    static CURRENT: RefCell<Option<Rc<ContextState>>> = const { RefCell::new(None) };
    // Raw engine context of the innermost task running on this thread.
    static ACTIVE_CTX: Cell<Option<NonNull<c_void>>> = const { Cell::new(None) };
}

/// State of the context bound to the calling thread, if any.
pub(crate) fn current_state() -> Option<Rc<ContextState>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Engine-side state of one context. Never leaves its owning thread.
pub(crate) struct ContextState {
    id: Uid,
    registry: Registry,
    errors: RefCell<ErrorBuffer>,
    // Dropped after the registry, runtime last.
    context: rquickjs::Context,
    runtime: rquickjs::Runtime,
}

impl ContextState {
    fn new(id: Uid, config: &ContextConfig) -> TetherResult<Self> {
        let runtime = rquickjs::Runtime::new()?;
        config.apply(&runtime);
        let context = rquickjs::Context::full(&runtime)?;
        context.with(|ctx| register_bootstrap(&ctx))?;

        Ok(Self {
            id,
            registry: Registry::default(),
            errors: RefCell::new(ErrorBuffer::new()),
            context,
            runtime,
        })
    }

    pub(crate) fn id(&self) -> Uid {
        self.id
    }

    /// Run `source` for its side effects. `label` doubles as the engine filename.
    pub(crate) fn exec<'js>(&self, ctx: &Ctx<'js>, source: &str, label: &str) -> TetherResult<()> {
        eval_named::<()>(ctx, source, label).map_err(|err| self.failure(ctx, err, label, "exec"))
    }

    /// Run `source` and return its completion value as JSON text.
    pub(crate) fn eval<'js>(&self, ctx: &Ctx<'js>, source: &str, label: &str) -> TetherResult<String> {
        let value = eval_named::<rquickjs::Value>(ctx, source, label)
            .map_err(|err| self.failure(ctx, err, label, "eval"))?;
        match ctx.json_stringify(value) {
            Ok(Some(json)) => Ok(json.to_string()?),
            Ok(None) => Ok("null".to_string()),
            Err(err) => Err(self.failure(ctx, err, label, "eval")),
        }
    }

    pub(crate) fn define_object<'js>(
        &self,
        ctx: &Ctx<'js>,
        parent: Uid,
        name: &str,
        id: Uid,
        proxy: Option<Proxy>,
    ) -> TetherResult<()> {
        self.require_parent(parent)?;
        let entry = ObjectEntry::new(name, parent, proxy.as_ref())?;

        let bridge = Bridge::get(ctx).map_err(|err| self.engine_error(ctx, err))?;
        bridge
            .define_object(parent, name, id)
            .map_err(|err| self.engine_error(ctx, err))?;
        for field in entry.property_names() {
            bridge
                .define_property(id, field)
                .map_err(|err| self.engine_error(ctx, err))?;
        }

        trace!(object = %id, parent = %entry.parent, name = %entry.name, "defined object");
        self.registry.insert_object(id, entry);
        Ok(())
    }

    pub(crate) fn define_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        parent: Uid,
        name: &str,
        id: Uid,
        host: HostFunction,
    ) -> TetherResult<()> {
        self.require_parent(parent)?;
        let entry = FunctionEntry::new(host);

        Bridge::get(ctx)
            .and_then(|bridge| bridge.define_function(parent, name, id))
            .map_err(|err| self.engine_error(ctx, err))?;

        trace!(function = %id, parent = %parent, name, "defined function");
        self.registry.insert_function(id, entry.named(name));
        Ok(())
    }

    pub(crate) fn call_function(&self, id: Uid, args_json: &str) -> TetherResult<String> {
        let function = self.registry.function(id)?;
        trace!(function = %id, name = function.name(), "host call");
        function.call(args_json)
    }

    pub(crate) fn get_property(&self, id: Uid, name: &str) -> TetherResult<String> {
        let object = self.registry.object(id)?;
        object.property(name)?.get()
    }

    pub(crate) fn set_property(&self, id: Uid, name: &str, json: &str) -> TetherResult<()> {
        let object = self.registry.object(id)?;
        object.property(name)?.set(json)
    }

    fn require_parent(&self, parent: Uid) -> TetherResult<()> {
        if self.registry.contains_object(parent) {
            Ok(())
        } else {
            Err(TetherError::UnknownEntity {
                kind: "object",
                id: parent,
            })
        }
    }

    /// Turn a failed evaluation into the report raised for it, if any.
    fn failure<'js>(
        &self,
        ctx: &Ctx<'js>,
        err: rquickjs::Error,
        label: &str,
        operation: &'static str,
    ) -> TetherError {
        let thrown = matches!(err, rquickjs::Error::Exception);
        if thrown {
            self.record_exception(ctx, label);
        }
        let claimed = self.errors.borrow_mut().claim(label);
        match claimed {
            Some(report) => TetherError::Script(report),
            None => TetherError::EvaluationFailed {
                operation,
                detail: (!thrown).then(|| err.to_string()),
            },
        }
    }

    /// Error for a failed bridge call, carrying the exception text if one was thrown.
    fn engine_error<'js>(&self, ctx: &Ctx<'js>, err: rquickjs::Error) -> TetherError {
        if matches!(err, rquickjs::Error::Exception) {
            let report = self.describe_pending(ctx, FATAL_LABEL);
            TetherError::Engine(report.message)
        } else {
            TetherError::from(err)
        }
    }

    /// Take the pending exception and park its report under `label`.
    fn record_exception<'js>(&self, ctx: &Ctx<'js>, label: &str) {
        let report = self.describe_pending(ctx, label);
        trace!(label, line = report.line, message = %report.message, "uncaught exception");
        self.errors.borrow_mut().record(report);
    }

    fn describe_pending<'js>(&self, ctx: &Ctx<'js>, label: &str) -> ErrorReport {
        let exception = ctx.catch();
        let described = Bridge::get(ctx)
            .and_then(|bridge| bridge.describe(exception))
            .ok()
            .and_then(|json| serde_json::from_str::<Described>(&json).ok());

        match described {
            Some(described) => ErrorReport {
                filename: label.to_string(),
                line: line_from_stack(&described.stack, PRELUDE_FILENAME)
                    .or((described.line > 0).then_some(described.line))
                    .unwrap_or(0),
                message: described.message,
            },
            None => {
                // describe itself threw; clear that one too
                let _ = ctx.catch();
                ErrorReport {
                    filename: label.to_string(),
                    line: 0,
                    message: "uncaught exception".to_string(),
                }
            }
        }
    }

    /// Run queued promise jobs until none are left.
    fn drain_jobs(&self) {
        // Jobs may call host functions that reenter this context.
        let previous = ACTIVE_CTX.with(|slot| slot.replace(Some(self.context.as_raw().cast())));
        let _restore = scopeguard::guard(previous, |previous| {
            ACTIVE_CTX.with(|slot| slot.set(previous));
        });
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(job) => {
                    job.0.with(|ctx| self.record_exception(&ctx, FATAL_LABEL));
                }
            }
        }
    }
}

/// Run `f` with the engine context entered, publishing it for inline reentry.
fn enter<'js, R>(
    state: &ContextState,
    ctx: Ctx<'js>,
    f: impl FnOnce(&ContextState, &Ctx<'js>) -> R,
) -> R {
    let previous = ACTIVE_CTX.with(|slot| slot.replace(Some(ctx.as_raw().cast())));
    let _restore = scopeguard::guard(previous, |previous| {
        ACTIVE_CTX.with(|slot| slot.set(previous));
    });
    f(state, &ctx)
}

/// Run `f` on the calling thread, which must be the context's owning thread.
pub(crate) fn run_inline<R, F>(f: F) -> TetherResult<R>
where
    F: for<'js> FnOnce(&ContextState, &Ctx<'js>) -> R,
{
    let state =
        current_state().ok_or_else(|| TetherError::internal("no context bound to this thread"))?;
    match ACTIVE_CTX.with(Cell::get) {
        Some(raw) => {
            // SAFETY: the pointer was published by `enter` for a `Ctx` that is still
            // alive further up this thread's stack, so the engine context is valid
            // and its runtime lock is already held by this thread.
            let ctx = unsafe { Ctx::from_raw(raw.cast()) };
            Ok(f(&state, &ctx))
        }
        None => Ok(state.context.with(|ctx| enter(&state, ctx, f))),
    }
}

/// Body of a context's owning thread.
///
/// Signals `ready` once the engine is up, then runs tasks until every sender
/// is gone, and tears down in order: registry, engine context, runtime.
pub(crate) fn run_context(
    id: Uid,
    config: ContextConfig,
    task_rx: Receiver<Task>,
    ready: Sender<TetherResult<()>>,
) {
    let _span = info_span!("context", id = %id).entered();

    let state = match ContextState::new(id, &config) {
        Ok(state) => Rc::new(state),
        Err(err) => {
            error!(error = %err, "failed to create engine context");
            let _ = ready.send(Err(err));
            if let Err(err) = runtime::unregister(id) {
                warn!(error = %err, "failed to unregister context");
            }
            return;
        }
    };
    CURRENT.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&state)));
    let _ = ready.send(Ok(()));
    debug!("context ready");

    for task in task_rx.iter() {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            state.context.with(|ctx| enter(&state, ctx, task));
        }));
        if outcome.is_err() {
            error!("context task panicked; continuing with the next task");
        }
        state.drain_jobs();
    }

    debug!(context = %state.id(), "dispatch closed, tearing down");
    CURRENT.with(|slot| slot.borrow_mut().take());
    let (objects, functions) = state.registry.counts();
    let unclaimed = state.errors.borrow().len();
    if unclaimed > 0 {
        debug!(unclaimed, "dropping unclaimed error reports");
    }
    state.registry.clear();
    drop(state);

    if let Err(err) = runtime::unregister(id) {
        warn!(error = %err, "failed to unregister context");
    }
    debug!(objects, functions, "context destroyed");
}
