//! tether-runtime - a thread-confined JavaScript runtime for multi-threaded hosts.
//!
//! The embedded engine (QuickJS) is single-threaded. This crate pins every
//! engine operation to one owning thread per context, so callers on any
//! thread get a synchronous, blocking, thread-safe API. Host functions and host
//! structs are exposed to script through JSON-encoded proxies.
//!
//! # Features
//!
//! - **Thread confinement**: each context has an owning thread; calls from other
//!   threads are queued and run in order
//! - **Reentrancy**: host functions may call back into their own context
//!   (defining more functions, evaluating more code) without deadlocking
//! - **Host proxies**: typed Rust closures and serde structs become script
//!   functions and live objects
//! - **Error correlation**: uncaught exceptions come back as [`ErrorReport`]s
//!   tied to the evaluation that raised them
//! - **Pools**: a fixed set of contexts with first-available dispatch and
//!   broadcast definitions
//!
//! # Example
//!
//! ```no_run
//! use tether_runtime::{Context, Pool};
//!
//! let cx = Context::new().unwrap();
//! cx.define_function("greet", |name: String| format!("Hello, {name}!")).unwrap();
//! let greeting: String = cx.eval("greet('world')").unwrap();
//! assert_eq!(greeting, "Hello, world!");
//!
//! let pool = Pool::new(4).unwrap();
//! pool.exec_all("var base = 40;").unwrap();
//! assert_eq!(pool.eval::<i32>("base + 2").unwrap(), 42);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Pool                                │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │ pool worker │ │ pool worker │ │ pool worker │  ...       │
//! │  └─────────────┘ └─────────────┘ └─────────────┘            │
//! │         └───────────────┼───────────────┘                    │
//! │                  shared job channel                          │
//! └─────────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ContextHandle                            │
//! │  dispatch: inline on the owning thread, else enqueue + wait  │
//! └─────────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │              context owning thread (worker)                  │
//! │  - QuickJS runtime + context                                 │
//! │  - registry of proxied objects and host functions            │
//! │  - error buffer keyed by evaluation label                    │
//! └─────────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 runtime thread (singleton)                   │
//! │  engine bring-up, directory of live contexts                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod function;
pub mod pool;
pub mod proxy;
pub mod report;
pub mod runtime;
pub mod uid;
pub mod value;
mod worker;

pub use api::{Definer, Evaluator};
pub use config::{ContextConfig, PoolConfig};
pub use context::{Context, ContextHandle, ObjectHandle};
pub use error::{ErrorReport, TetherError, TetherResult};
pub use function::{HostArg, HostFunction, IntoFallibleHostFunction, IntoHostFunction, Json, Variadic};
pub use pool::{ObjectPool, Pool, PoolBuilder, PoolStats, PoolStatsSnapshot};
pub use proxy::{Proxy, ProxyTarget};
pub use uid::Uid;
pub use value::{Raw, ValueKind};

/// Commonly used types
pub mod prelude {
    pub use crate::api::{Definer, Evaluator};
    pub use crate::context::{Context, ContextHandle};
    pub use crate::error::{ErrorReport, TetherError, TetherResult};
    pub use crate::function::{HostFunction, Json, Variadic};
    pub use crate::pool::Pool;
    pub use crate::proxy::Proxy;
    pub use crate::value::Raw;
}
