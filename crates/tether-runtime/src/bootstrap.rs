//! Script-side half of the host bridge.
//!
//! Every context evaluates [`PRELUDE`] once. It keeps the id -> object table,
//! builds wrapper functions and accessor properties, and talks to the host
//! through three native trampolines that exchange JSON text.

use crate::error::{TetherError, TetherResult};
use crate::uid::Uid;
use crate::worker::{ContextState, current_state};
use rquickjs::{Ctx, Exception, FromJs, Function, Object, Value, qjs};
use serde::Deserialize;
use std::ffi::CString;

/// Global under which the prelude publishes its helpers.
pub(crate) const BRIDGE_GLOBAL: &str = "__tether";

/// Engine filename of the prelude. Its frames never show up in reports.
pub(crate) const PRELUDE_FILENAME: &str = "tether:prelude";

const PRELUDE: &str = r#"
(function (hostCall, hostGet, hostSet) {
  "use strict";
  const global = globalThis;
  const objects = new Map();

  function target(id) {
    if (id === 0) return global;
    const object = objects.get(id);
    if (object === undefined) throw new Error("object " + id + " does not exist");
    return object;
  }

  function decode(text) {
    return text === "" ? undefined : JSON.parse(text);
  }

  function encode(value) {
    const text = JSON.stringify(value);
    return text === undefined ? "null" : text;
  }

  const bridge = {
    defineObject(parent, name, id) {
      const object = {};
      objects.set(id, object);
      target(parent)[name] = object;
    },

    defineFunction(parent, name, id) {
      const fn = function (...args) {
        return decode(hostCall(id, encode(args)));
      };
      Object.defineProperty(fn, "name", { value: name });
      target(parent)[name] = fn;
    },

    defineProperty(id, name) {
      Object.defineProperty(target(id), name, {
        enumerable: true,
        configurable: false,
        get() {
          return decode(hostGet(id, name));
        },
        set(value) {
          hostSet(id, name, encode(value));
        },
      });
    },

    describe(error) {
      let message;
      try {
        message = String(error);
      } catch (_) {
        message = "uncaught exception";
      }
      let line = 0;
      let stack = "";
      if (error !== null && typeof error === "object") {
        if (typeof error.lineNumber === "number") line = error.lineNumber;
        if (typeof error.stack === "string") stack = error.stack;
      }
      return JSON.stringify({ message, line, stack });
    },
  };

  Object.defineProperty(global, "__tether", { value: Object.freeze(bridge) });
})
"#;

/// Install the prelude and its native trampolines into a fresh context.
pub(crate) fn register_bootstrap<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let call = Function::new(ctx.clone(), |ctx: Ctx<'js>, id: f64, args: String| {
        host_call(&ctx, id, &args)
    })?;
    let get = Function::new(ctx.clone(), |ctx: Ctx<'js>, id: f64, name: String| {
        host_get(&ctx, id, &name)
    })?;
    let set = Function::new(
        ctx.clone(),
        |ctx: Ctx<'js>, id: f64, name: String, json: String| host_set(&ctx, id, &name, &json),
    )?;

    let install: Function = eval_named(ctx, PRELUDE, PRELUDE_FILENAME)?;
    install.call::<_, ()>((call, get, set))
}

/// Evaluate global code with `filename` as the engine-side file name, so stack
/// frames and syntax errors point at it.
pub(crate) fn eval_named<'js, V: FromJs<'js>>(
    ctx: &Ctx<'js>,
    source: &str,
    filename: &str,
) -> rquickjs::Result<V> {
    let source = CString::new(source)?;
    let filename = CString::new(filename)?;
    // SAFETY: the context is entered by the caller, both strings are
    // NUL-terminated and outlive the call, and `JS_Eval` hands back an owned
    // value which `Value::from_raw` takes over.
    let value = unsafe {
        let raw = qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            source.as_ptr(),
            source.as_bytes().len() as _,
            filename.as_ptr(),
            qjs::JS_EVAL_TYPE_GLOBAL as _,
        );
        if qjs::JS_IsException(raw) {
            return Err(rquickjs::Error::Exception);
        }
        Value::from_raw(ctx.clone(), raw)
    };
    V::from_js(ctx, value)
}

fn host_call(ctx: &Ctx<'_>, id: f64, args: &str) -> rquickjs::Result<String> {
    throw_on_error(ctx, with_entity(id, |state, id| state.call_function(id, args)))
}

fn host_get(ctx: &Ctx<'_>, id: f64, name: &str) -> rquickjs::Result<String> {
    throw_on_error(ctx, with_entity(id, |state, id| state.get_property(id, name)))
}

fn host_set(ctx: &Ctx<'_>, id: f64, name: &str, json: &str) -> rquickjs::Result<()> {
    throw_on_error(ctx, with_entity(id, |state, id| state.set_property(id, name, json)))
}

fn with_entity<R>(
    id: f64,
    f: impl FnOnce(&ContextState, Uid) -> TetherResult<R>,
) -> TetherResult<R> {
    let state =
        current_state().ok_or_else(|| TetherError::internal("no context bound to this thread"))?;
    let id = Uid::from_f64(id)
        .ok_or_else(|| TetherError::internal(format!("malformed bridge id {id}")))?;
    f(&state, id)
}

/// Rethrow a host-side failure as a script `Error`.
fn throw_on_error<T>(ctx: &Ctx<'_>, result: TetherResult<T>) -> rquickjs::Result<T> {
    result.map_err(|err| Exception::throw_message(ctx, &err.to_string()))
}

/// Typed access to the prelude's helpers.
pub(crate) struct Bridge<'js> {
    object: Object<'js>,
}

/// What `describe` returns for an exception value.
#[derive(Debug, Deserialize)]
pub(crate) struct Described {
    pub(crate) message: String,
    pub(crate) line: u32,
    pub(crate) stack: String,
}

impl<'js> Bridge<'js> {
    pub(crate) fn get(ctx: &Ctx<'js>) -> rquickjs::Result<Self> {
        Ok(Self {
            object: ctx.globals().get(BRIDGE_GLOBAL)?,
        })
    }

    fn method(&self, name: &str) -> rquickjs::Result<Function<'js>> {
        self.object.get(name)
    }

    pub(crate) fn define_object(&self, parent: Uid, name: &str, id: Uid) -> rquickjs::Result<()> {
        self.method("defineObject")?
            .call((parent.as_f64(), name, id.as_f64()))
    }

    pub(crate) fn define_function(&self, parent: Uid, name: &str, id: Uid) -> rquickjs::Result<()> {
        self.method("defineFunction")?
            .call((parent.as_f64(), name, id.as_f64()))
    }

    pub(crate) fn define_property(&self, id: Uid, name: &str) -> rquickjs::Result<()> {
        self.method("defineProperty")?.call((id.as_f64(), name))
    }

    /// JSON text of a [`Described`] for an exception value.
    pub(crate) fn describe(&self, exception: Value<'js>) -> rquickjs::Result<String> {
        self.method("describe")?.call((exception,))
    }
}
