//! Host functions callable from script.
//!
//! A [`HostFunction`] is a descriptor built once from a typed Rust closure: the
//! ordered parameter kinds, an optional variadic element kind, and an invoke
//! closure that decodes wire arguments positionally and encodes the return
//! value. No reflection happens at call time.
//!
//! ```no_run
//! use tether_runtime::{Context, HostFunction, Variadic};
//!
//! let cx = Context::new().unwrap();
//! cx.define_function("add", |a: i64, b: i64| a + b).unwrap();
//! cx.define_function("join", |sep: String, parts: Variadic<String>| parts.join(sep.as_str()))
//!     .unwrap();
//! cx.define_function(
//!     "parse",
//!     HostFunction::fallible(|s: String| s.parse::<i64>()),
//! )
//! .unwrap();
//! ```

use crate::error::{TetherError, TetherResult};
use crate::value::{ValueKind, decode_as, encode_return};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Display name of a function before it is registered.
pub const ANONYMOUS: &str = "[anon]";

type InvokeFn = dyn Fn(&str, Vec<Value>) -> TetherResult<String> + Send + Sync;

/// A host type accepted as a script-callable parameter.
pub trait HostArg: Sized {
    /// Kind incoming values are coerced to before decoding.
    const KIND: ValueKind;

    fn from_value(value: Value) -> TetherResult<Self>;
}

macro_rules! host_arg {
    ($kind:expr => $($ty:ty),+) => {
        $(
            impl HostArg for $ty {
                const KIND: ValueKind = $kind;

                fn from_value(value: Value) -> TetherResult<Self> {
                    decode_as(value, Self::KIND)
                }
            }
        )+
    };
}

host_arg!(ValueKind::Bool => bool);
host_arg!(ValueKind::Int => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
host_arg!(ValueKind::Float => f32, f64);
host_arg!(ValueKind::String => String);
host_arg!(ValueKind::Map => Map<String, Value>);

impl HostArg for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn from_value(value: Value) -> TetherResult<Self> {
        Ok(value)
    }
}

impl<T: HostArg> HostArg for Vec<T> {
    const KIND: ValueKind = ValueKind::Seq;

    fn from_value(value: Value) -> TetherResult<Self> {
        match crate::value::coerce(value, Self::KIND)? {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(TetherError::type_mismatch(
                Self::KIND.name(),
                crate::value::type_name(&other),
            )),
        }
    }
}

fn map_entries<T: HostArg>(value: Value) -> TetherResult<impl Iterator<Item = TetherResult<(String, T)>>> {
    match crate::value::coerce(value, ValueKind::Map)? {
        Value::Object(entries) => Ok(entries
            .into_iter()
            .map(|(key, value)| T::from_value(value).map(|value| (key, value)))),
        other => Err(TetherError::type_mismatch(
            ValueKind::Map.name(),
            crate::value::type_name(&other),
        )),
    }
}

impl<T: HostArg> HostArg for HashMap<String, T> {
    const KIND: ValueKind = ValueKind::Map;

    fn from_value(value: Value) -> TetherResult<Self> {
        map_entries(value)?.collect()
    }
}

impl<T: HostArg> HostArg for BTreeMap<String, T> {
    const KIND: ValueKind = ValueKind::Map;

    fn from_value(value: Value) -> TetherResult<Self> {
        map_entries(value)?.collect()
    }
}

/// A struct parameter, decoded from a script object.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> HostArg for Json<T> {
    const KIND: ValueKind = ValueKind::Struct;

    fn from_value(value: Value) -> TetherResult<Self> {
        decode_as(value, Self::KIND).map(Json)
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Trailing parameter collecting every remaining argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Variadic<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T> DerefMut for Variadic<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.0
    }
}

/// Descriptor of a host function exposed to script.
#[derive(Clone)]
pub struct HostFunction {
    params: Vec<ValueKind>,
    variadic: Option<ValueKind>,
    invoke: Arc<InvokeFn>,
}

impl HostFunction {
    fn from_parts(
        params: Vec<ValueKind>,
        variadic: Option<ValueKind>,
        invoke: impl Fn(&str, Vec<Value>) -> TetherResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            variadic,
            invoke: Arc::new(invoke),
        }
    }

    /// Build from any supported closure.
    pub fn new<M>(function: impl IntoHostFunction<M>) -> Self {
        function.into_host_function()
    }

    /// Build from a closure returning `Result`; `Err` is thrown into script.
    pub fn fallible<M>(function: impl IntoFallibleHostFunction<M>) -> Self {
        function.into_fallible_host_function()
    }

    /// Declared kinds of the fixed parameters.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    /// Element kind of the trailing variadic parameter, if any.
    pub fn variadic(&self) -> Option<ValueKind> {
        self.variadic
    }

    /// Invoke with arguments given as a JSON array, returning wire text.
    ///
    /// `name` is used to attribute failures of the host closure.
    pub(crate) fn call(&self, name: &str, args_json: &str) -> TetherResult<String> {
        let args: Vec<Value> = serde_json::from_str(args_json)?;
        self.check_arity(args.len())?;
        (self.invoke)(name, args)
    }

    fn check_arity(&self, actual: usize) -> TetherResult<()> {
        let expected = self.params.len();
        let ok = match self.variadic {
            Some(_) => actual >= expected,
            None => actual == expected,
        };
        if ok {
            Ok(())
        } else {
            Err(TetherError::ArgumentCount {
                expected,
                actual,
                variadic: self.variadic.is_some(),
            })
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish_non_exhaustive()
    }
}

/// Conversion of a closure into a [`HostFunction`].
///
/// `M` is a marker describing the closure signature; it is always inferred.
pub trait IntoHostFunction<M> {
    fn into_host_function(self) -> HostFunction;
}

/// Conversion of a closure returning `Result<R, E>` into a [`HostFunction`].
pub trait IntoFallibleHostFunction<M> {
    fn into_fallible_host_function(self) -> HostFunction;
}

impl IntoHostFunction<HostFunction> for HostFunction {
    fn into_host_function(self) -> HostFunction {
        self
    }
}

/// Signature marker for closures with a trailing [`Variadic`] parameter.
pub struct VariadicArgs<Args, V>(PhantomData<fn(Args, V)>);

fn next_arg(args: &mut std::vec::IntoIter<Value>) -> TetherResult<Value> {
    args.next()
        .ok_or_else(|| TetherError::internal("argument list shorter than checked arity"))
}

fn host_failure(name: &str, err: impl fmt::Display) -> TetherError {
    TetherError::HostFailure {
        function: name.to_string(),
        message: err.to_string(),
    }
}

macro_rules! impl_into_host_function {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg,)*> IntoHostFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: Serialize + 'static,
            $($arg: HostArg,)*
        {
            fn into_host_function(self) -> HostFunction {
                HostFunction::from_parts(vec![$($arg::KIND),*], None, move |_name, args| {
                    let mut args = args.into_iter();
                    $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                    encode_return(&(self)($($arg),*))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, V, $($arg,)*> IntoHostFunction<VariadicArgs<($($arg,)*), V>> for F
        where
            F: Fn($($arg,)* Variadic<V>) -> R + Send + Sync + 'static,
            R: Serialize + 'static,
            V: HostArg,
            $($arg: HostArg,)*
        {
            fn into_host_function(self) -> HostFunction {
                HostFunction::from_parts(vec![$($arg::KIND),*], Some(V::KIND), move |_name, args| {
                    let mut args = args.into_iter();
                    $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                    let rest = args.map(V::from_value).collect::<TetherResult<Vec<_>>>()?;
                    encode_return(&(self)($($arg,)* Variadic(rest)))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, E, $($arg,)*> IntoFallibleHostFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Result<R, E> + Send + Sync + 'static,
            R: Serialize + 'static,
            E: fmt::Display,
            $($arg: HostArg,)*
        {
            fn into_fallible_host_function(self) -> HostFunction {
                HostFunction::from_parts(vec![$($arg::KIND),*], None, move |name, args| {
                    let mut args = args.into_iter();
                    $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                    let value = (self)($($arg),*).map_err(|err| host_failure(name, err))?;
                    encode_return(&value)
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, E, V, $($arg,)*> IntoFallibleHostFunction<VariadicArgs<($($arg,)*), V>> for F
        where
            F: Fn($($arg,)* Variadic<V>) -> Result<R, E> + Send + Sync + 'static,
            R: Serialize + 'static,
            E: fmt::Display,
            V: HostArg,
            $($arg: HostArg,)*
        {
            fn into_fallible_host_function(self) -> HostFunction {
                HostFunction::from_parts(vec![$($arg::KIND),*], Some(V::KIND), move |name, args| {
                    let mut args = args.into_iter();
                    $(let $arg = $arg::from_value(next_arg(&mut args)?)?;)*
                    let rest = args.map(V::from_value).collect::<TetherResult<Vec<_>>>()?;
                    let value = (self)($($arg,)* Variadic(rest)).map_err(|err| host_failure(name, err))?;
                    encode_return(&value)
                })
            }
        }
    };
}

impl_into_host_function!();
impl_into_host_function!(A1);
impl_into_host_function!(A1, A2);
impl_into_host_function!(A1, A2, A3);
impl_into_host_function!(A1, A2, A3, A4);
impl_into_host_function!(A1, A2, A3, A4, A5);
impl_into_host_function!(A1, A2, A3, A4, A5, A6);
impl_into_host_function!(A1, A2, A3, A4, A5, A6, A7);
impl_into_host_function!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_typed_call() {
        let add = HostFunction::new(|a: i64, b: i64| a + b);
        assert_eq!(add.params(), &[ValueKind::Int, ValueKind::Int]);
        assert_eq!(add.call("add", "[1, 2]").unwrap(), "3");
    }

    #[test]
    fn test_arity_mismatch() {
        let add = HostFunction::new(|a: i64, b: i64| a + b);
        let err = add.call("add", "[1]").unwrap_err();
        assert_eq!(err.to_string(), "Invalid number of arguments: expected 2 got 1");
        assert!(add.call("add", "[1, 2, 3]").is_err());
    }

    #[test]
    fn test_unit_return_is_undefined() {
        let noop = HostFunction::new(|| {});
        assert_eq!(noop.call("noop", "[]").unwrap(), "");
    }

    #[test]
    fn test_variadic() {
        let sprintf = HostFunction::new(|format: String, args: Variadic<Value>| {
            args.iter().fold(format, |acc, arg| acc.replacen("%v", &arg.to_string(), 1))
        });
        assert_eq!(sprintf.variadic(), Some(ValueKind::Any));
        assert_eq!(sprintf.call("sprintf", r#"["a"]"#).unwrap(), r#""a""#);
        assert_eq!(
            sprintf.call("sprintf", r#"["%v-%v", 1, true]"#).unwrap(),
            r#""1-true""#
        );
        let err = sprintf.call("sprintf", "[]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid number of arguments: expected at least 1 got 0"
        );
    }

    #[test]
    fn test_variadic_elements_are_coerced() {
        let sum = HostFunction::new(|xs: Variadic<i32>| xs.iter().sum::<i32>());
        assert_eq!(sum.call("sum", "[]").unwrap(), "0");
        assert_eq!(sum.call("sum", "[1, 2.7, 3]").unwrap(), "6");
        assert!(sum.call("sum", r#"[1, "2"]"#).is_err());
    }

    #[test]
    fn test_struct_parameter() {
        #[derive(Deserialize)]
        struct Person {
            name: String,
            age: u32,
        }

        let greet = HostFunction::new(|p: Json<Person>| format!("{} ({})", p.name, p.age));
        assert_eq!(greet.params(), &[ValueKind::Struct]);
        assert_eq!(
            greet.call("greet", r#"[{"name": "Ada", "age": 36}]"#).unwrap(),
            r#""Ada (36)""#
        );
        assert!(greet.call("greet", r#"["Ada"]"#).is_err());
    }

    #[test]
    fn test_collection_parameters() {
        let total = HostFunction::new(|m: HashMap<String, f64>, xs: Vec<u8>| {
            m.values().sum::<f64>() + xs.iter().map(|x| *x as f64).sum::<f64>()
        });
        assert_eq!(total.params(), &[ValueKind::Map, ValueKind::Seq]);
        assert_eq!(
            total.call("total", r#"[{"a": 1.5, "b": 2}, [1, 2]]"#).unwrap(),
            "6.5"
        );
    }

    #[test]
    fn test_tuple_return_packs_sequence() {
        let pair = HostFunction::new(|| (1, "two"));
        assert_eq!(pair.call("pair", "[]").unwrap(), r#"[1,"two"]"#);
    }

    #[test]
    fn test_fallible() {
        let parse = HostFunction::fallible(|s: String| s.parse::<i64>());
        assert_eq!(parse.call("parse", r#"["42"]"#).unwrap(), "42");

        let err = parse.call("parse", r#"["x"]"#).unwrap_err();
        assert_eq!(err.to_string(), "parse: invalid digit found in string");
    }

    #[test]
    fn test_malformed_arguments() {
        let f = HostFunction::new(|a: bool| !a);
        assert!(matches!(f.call("f", "not json"), Err(TetherError::Json(_))));
        assert_eq!(
            f.call("f", "[1]").unwrap_err().to_string(),
            "cannot cast number to bool"
        );
    }
}
