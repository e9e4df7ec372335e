//! Capability traits shared by contexts, objects and pools.
//!
//! Code that only needs to define bindings or run scripts can be written once
//! against these traits and used with a single [`Context`](crate::Context) or a
//! whole [`Pool`](crate::Pool).

use crate::context::{Context, ContextHandle, ObjectHandle};
use crate::error::TetherResult;
use crate::function::IntoHostFunction;
use crate::proxy::Proxy;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;

/// Something host functions and objects can be defined on.
pub trait Definer {
    /// Handle returned by `define_object`, itself a definer for nesting.
    type Object: Definer;

    fn define_function<M>(&self, name: &str, function: impl IntoHostFunction<M>)
    -> TetherResult<()>;

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<Self::Object>;
}

/// Something scripts can be run in.
pub trait Evaluator {
    fn exec(&self, source: &str) -> TetherResult<()>;

    fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T>;

    fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()>;

    fn exec_from(&self, reader: impl Read) -> TetherResult<()>;
}

impl Definer for ContextHandle {
    type Object = ObjectHandle;

    fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        ContextHandle::define_function(self, name, function)
    }

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectHandle> {
        ContextHandle::define_object(self, name, proxy)
    }
}

impl Definer for Context {
    type Object = ObjectHandle;

    fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        ContextHandle::define_function(self, name, function)
    }

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectHandle> {
        ContextHandle::define_object(self, name, proxy)
    }
}

impl Definer for ObjectHandle {
    type Object = ObjectHandle;

    fn define_function<M>(
        &self,
        name: &str,
        function: impl IntoHostFunction<M>,
    ) -> TetherResult<()> {
        ObjectHandle::define_function(self, name, function)
    }

    fn define_object(&self, name: &str, proxy: Option<Proxy>) -> TetherResult<ObjectHandle> {
        ObjectHandle::define_object(self, name, proxy)
    }
}

impl Evaluator for ContextHandle {
    fn exec(&self, source: &str) -> TetherResult<()> {
        ContextHandle::exec(self, source)
    }

    fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T> {
        ContextHandle::eval(self, source)
    }

    fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        ContextHandle::exec_file(self, path)
    }

    fn exec_from(&self, reader: impl Read) -> TetherResult<()> {
        ContextHandle::exec_from(self, reader)
    }
}

impl Evaluator for Context {
    fn exec(&self, source: &str) -> TetherResult<()> {
        ContextHandle::exec(self, source)
    }

    fn eval<T: DeserializeOwned>(&self, source: &str) -> TetherResult<T> {
        ContextHandle::eval(self, source)
    }

    fn exec_file(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        ContextHandle::exec_file(self, path)
    }

    fn exec_from(&self, reader: impl Read) -> TetherResult<()> {
        ContextHandle::exec_from(self, reader)
    }
}
