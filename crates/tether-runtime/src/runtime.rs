//! The process-wide engine runtime thread.
//!
//! One dedicated thread owns engine bring-up and the directory of live
//! contexts. Everything that touches that state goes through
//! [`run_exclusively`], which runs inline when already on the runtime thread and
//! otherwise hands the task over and blocks until it has run.

use crate::error::{TetherError, TetherResult};
use crate::uid::Uid;
use crossbeam_channel::{Sender, bounded};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, info_span, trace};

const RUNTIME_THREAD_NAME: &str = "tether-runtime";
const QUEUE_CAPACITY: usize = 64;

type Task = Box<dyn FnOnce() + Send>;

struct EngineRuntime {
    task_tx: Sender<Task>,
    owner: ThreadId,
}

static RUNTIME: LazyLock<EngineRuntime> = LazyLock::new(EngineRuntime::start);

thread_local! {
    static DIRECTORY: RefCell<Directory> = RefCell::new(Directory::default());
}

/// Live contexts, keyed by id. Only touched on the runtime thread.
#[derive(Default)]
struct Directory {
    contexts: HashMap<Uid, ContextRecord>,
}

struct ContextRecord {
    thread_name: String,
    created: Instant,
}

impl EngineRuntime {
    fn start() -> EngineRuntime {
        let (task_tx, task_rx) = bounded::<Task>(QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let spawned = thread::Builder::new()
            .name(RUNTIME_THREAD_NAME.to_string())
            .spawn(move || {
                let _span = info_span!("runtime").entered();
                let _ = ready_tx.send(bring_up());
                for task in task_rx.iter() {
                    task();
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => panic!("could not start the script engine runtime thread: {err}"),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => debug!("script engine runtime ready"),
            Ok(Err(err)) => panic!("could not initialize the script engine: {err}"),
            Err(_) => panic!("script engine runtime thread exited during bring-up"),
        }

        EngineRuntime {
            task_tx,
            owner: handle.thread().id(),
        }
    }
}

/// Create a throwaway engine instance to make sure the engine works at all.
fn bring_up() -> Result<(), String> {
    let runtime = rquickjs::Runtime::new().map_err(|e| e.to_string())?;
    let context = rquickjs::Context::full(&runtime).map_err(|e| e.to_string())?;
    let two = context.with(|ctx| ctx.eval::<i32, _>("1 + 1").map_err(|e| e.to_string()))?;
    if two == 2 {
        Ok(())
    } else {
        Err(format!("smoke evaluation returned {two}"))
    }
}

/// Whether the calling thread is the runtime thread.
pub fn is_runtime_thread() -> bool {
    thread::current().id() == RUNTIME.owner
}

/// Run `task` on the runtime thread and return its result.
///
/// Runs immediately when called from the runtime thread; otherwise blocks
/// until the runtime thread has run it. Tasks run one at a time.
pub fn run_exclusively<R, F>(task: F) -> TetherResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let runtime = &*RUNTIME;
    if thread::current().id() == runtime.owner {
        return Ok(task());
    }

    let (done_tx, done_rx) = bounded(1);
    runtime
        .task_tx
        .send(Box::new(move || {
            let _ = done_tx.send(task());
        }))
        .map_err(|_| TetherError::internal("script engine runtime thread is gone"))?;
    done_rx
        .recv()
        .map_err(|_| TetherError::internal("runtime task was dropped before completing"))
}

fn with_directory<R>(f: impl FnOnce(&mut Directory) -> R) -> R {
    debug_assert!(is_runtime_thread());
    DIRECTORY.with(|directory| f(&mut directory.borrow_mut()))
}

pub(crate) fn register(id: Uid, thread_name: String) -> TetherResult<()> {
    run_exclusively(move || {
        with_directory(|dir| {
            trace!(context = %id, thread = %thread_name, "registering context");
            dir.contexts.insert(
                id,
                ContextRecord {
                    thread_name,
                    created: Instant::now(),
                },
            );
        })
    })
}

pub(crate) fn unregister(id: Uid) -> TetherResult<()> {
    run_exclusively(move || {
        with_directory(|dir| {
            if let Some(record) = dir.contexts.remove(&id) {
                trace!(
                    context = %id,
                    thread = %record.thread_name,
                    lifetime_ms = record.created.elapsed().as_millis() as u64,
                    "unregistered context"
                );
            }
        })
    })
}

/// Number of contexts currently alive in the process.
pub fn live_contexts() -> usize {
    run_exclusively(|| with_directory(|dir| dir.contexts.len())).unwrap_or(0)
}

/// Whether a context with this id is alive.
pub fn is_registered(id: Uid) -> bool {
    run_exclusively(move || with_directory(|dir| dir.contexts.contains_key(&id))).unwrap_or(false)
}
