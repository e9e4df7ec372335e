//! Host values and functions exposed to script, and the per-context registry
//! that resolves script-side ids back to them.
//!
//! A proxied value is seen through its serde representation: it must serialize
//! to a keyed map, each key becomes a script property, and reads and writes go
//! through the live value every time.
//!
//! ```no_run
//! use parking_lot::Mutex;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tether_runtime::{Context, Proxy};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! let person = Arc::new(Mutex::new(Person { name: "Ada".into(), age: 36 }));
//! let cx = Context::new().unwrap();
//! cx.define_object("person", Some(Proxy::shared(&person))).unwrap();
//! cx.exec("person.age += 1").unwrap();
//! assert_eq!(person.lock().age, 37);
//! ```

use crate::error::{TetherError, TetherResult};
use crate::function::{ANONYMOUS, HostFunction};
use crate::uid::Uid;
use crate::value::{ValueKind, coerce, type_name};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{error, trace};

/// A host value whose fields are readable, and optionally writable, from script.
pub trait ProxyTarget: Send + Sync + 'static {
    /// Current value. Must be a JSON object for the target to be proxied.
    fn snapshot(&self) -> TetherResult<Value>;

    /// Replace one field with an already coerced value.
    fn assign(&self, field: &str, value: Value) -> TetherResult<()>;

    fn is_settable(&self) -> bool {
        true
    }

    /// Name used in error messages.
    fn type_name(&self) -> &'static str {
        "proxy"
    }
}

/// Handle to a host value bound into script by `define_object`.
#[derive(Clone)]
pub struct Proxy {
    target: Arc<dyn ProxyTarget>,
}

impl Proxy {
    /// Live two-way binding: script writes land in `value`, host writes are
    /// visible on the next script read.
    pub fn shared<T>(value: &Arc<Mutex<T>>) -> Proxy
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Self::custom(SharedTarget(Arc::clone(value)))
    }

    /// Read-only binding; assignments from script fail.
    pub fn frozen<T>(value: Arc<T>) -> Proxy
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::custom(FrozenTarget(value))
    }

    pub fn custom(target: impl ProxyTarget) -> Proxy {
        Proxy {
            target: Arc::new(target),
        }
    }

    /// Field names and their declared kinds, validating the shape.
    pub(crate) fn fields(&self) -> TetherResult<Vec<(String, ValueKind)>> {
        match self.target.snapshot()? {
            Value::Object(fields) => Ok(fields
                .iter()
                .map(|(name, value)| (name.clone(), ValueKind::of_field(value)))
                .collect()),
            other => Err(TetherError::InvalidProxy(format!(
                "{} serializes to {}, expected a struct or map",
                self.target.type_name(),
                type_name(&other)
            ))),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("type", &self.target.type_name())
            .field("settable", &self.target.is_settable())
            .finish()
    }
}

struct SharedTarget<T>(Arc<Mutex<T>>);

impl<T> ProxyTarget for SharedTarget<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn snapshot(&self) -> TetherResult<Value> {
        Ok(serde_json::to_value(&*self.0.lock())?)
    }

    fn assign(&self, field: &str, value: Value) -> TetherResult<()> {
        let mut guard = self.0.lock();
        let mut fields = match serde_json::to_value(&*guard)? {
            Value::Object(fields) => fields,
            other => {
                return Err(TetherError::InvalidProxy(format!(
                    "{} serializes to {}",
                    self.type_name(),
                    type_name(&other)
                )));
            }
        };
        let actual = type_name(&value);
        fields.insert(field.to_string(), value);
        *guard = serde_json::from_value(Value::Object(fields))
            .map_err(|err| TetherError::type_mismatch_with(self.type_name(), actual, err))?;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

struct FrozenTarget<T>(Arc<T>);

impl<T> ProxyTarget for FrozenTarget<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn snapshot(&self) -> TetherResult<Value> {
        Ok(serde_json::to_value(&*self.0)?)
    }

    fn assign(&self, field: &str, _value: Value) -> TetherResult<()> {
        Err(TetherError::NotSettable(field.to_string()))
    }

    fn is_settable(&self) -> bool {
        false
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// One field of a proxied value.
pub(crate) struct Property {
    name: String,
    kind: ValueKind,
    target: Arc<dyn ProxyTarget>,
}

impl Property {
    /// Wire text of the field's current value.
    pub(crate) fn get(&self) -> TetherResult<String> {
        let mut fields = match self.target.snapshot()? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        let value = fields
            .remove(&self.name)
            .ok_or_else(|| TetherError::UnknownProperty(self.name.clone()))?;
        Ok(serde_json::to_string(&value)?)
    }

    pub(crate) fn set(&self, json: &str) -> TetherResult<()> {
        if !self.target.is_settable() {
            return Err(TetherError::NotSettable(self.name.clone()));
        }
        let value: Value = serde_json::from_str(json)?;
        let value = coerce(value, self.kind)?;
        self.target.assign(&self.name, value)
    }
}

/// A script object registered with a context.
pub(crate) struct ObjectEntry {
    pub(crate) name: String,
    pub(crate) parent: Uid,
    properties: HashMap<String, Property>,
}

impl ObjectEntry {
    pub(crate) fn new(name: &str, parent: Uid, proxy: Option<&Proxy>) -> TetherResult<Self> {
        let mut properties = HashMap::new();
        if let Some(proxy) = proxy {
            for (field, kind) in proxy.fields()? {
                let property = Property {
                    name: field.clone(),
                    kind,
                    target: Arc::clone(&proxy.target),
                };
                properties.insert(field, property);
            }
        }
        Ok(Self {
            name: name.to_string(),
            parent,
            properties,
        })
    }

    pub(crate) fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub(crate) fn property(&self, name: &str) -> TetherResult<&Property> {
        self.properties
            .get(name)
            .ok_or_else(|| TetherError::UnknownProperty(name.to_string()))
    }
}

/// A host function registered with a context.
pub(crate) struct FunctionEntry {
    name: String,
    host: HostFunction,
}

impl FunctionEntry {
    pub(crate) fn new(host: HostFunction) -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            host,
        }
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with wire arguments. Panics in the host closure are contained.
    pub(crate) fn call(&self, args_json: &str) -> TetherResult<String> {
        trace!(function = %self.name, "host call");
        execute_with_panic_handler(&self.name, || self.host.call(&self.name, args_json))
    }
}

/// Run `f`, turning a panic into an error attributed to `function`.
fn execute_with_panic_handler<F>(function: &str, f: F) -> TetherResult<String>
where
    F: FnOnce() -> TetherResult<String>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let payload = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(function, payload = %payload, "host function panicked");
            Err(TetherError::HostPanic {
                function: function.to_string(),
                payload,
            })
        }
    }
}

/// Objects and functions of one context, keyed by id.
///
/// Lives on the context's owning thread only.
#[derive(Default)]
pub(crate) struct Registry {
    objects: RefCell<HashMap<Uid, Rc<ObjectEntry>>>,
    functions: RefCell<HashMap<Uid, Rc<FunctionEntry>>>,
}

impl Registry {
    pub(crate) fn insert_object(&self, id: Uid, entry: ObjectEntry) {
        self.objects.borrow_mut().insert(id, Rc::new(entry));
    }

    pub(crate) fn insert_function(&self, id: Uid, entry: FunctionEntry) {
        self.functions.borrow_mut().insert(id, Rc::new(entry));
    }

    pub(crate) fn contains_object(&self, id: Uid) -> bool {
        id.is_root() || self.objects.borrow().contains_key(&id)
    }

    pub(crate) fn object(&self, id: Uid) -> TetherResult<Rc<ObjectEntry>> {
        self.objects
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(TetherError::UnknownEntity { kind: "object", id })
    }

    pub(crate) fn function(&self, id: Uid) -> TetherResult<Rc<FunctionEntry>> {
        self.functions
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(TetherError::UnknownEntity {
                kind: "function",
                id,
            })
    }

    pub(crate) fn counts(&self) -> (usize, usize) {
        (self.objects.borrow().len(), self.functions.borrow().len())
    }

    /// Drop every entry, releasing captured host state.
    pub(crate) fn clear(&self) {
        let objects = std::mem::take(&mut *self.objects.borrow_mut());
        let functions = std::mem::take(&mut *self.functions.borrow_mut());
        drop(objects);
        drop(functions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uid::next_uid;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct Person {
        name: String,
        age: u32,
        score: f64,
    }

    fn ada() -> Arc<Mutex<Person>> {
        Arc::new(Mutex::new(Person {
            name: "Ada".into(),
            age: 36,
            score: 1.5,
        }))
    }

    #[test]
    fn test_fields_follow_the_struct() {
        let proxy = Proxy::shared(&ada());
        let mut fields = proxy.fields().unwrap();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            fields,
            vec![
                ("age".to_string(), ValueKind::Int),
                ("name".to_string(), ValueKind::String),
                ("score".to_string(), ValueKind::Float),
            ]
        );
    }

    #[test]
    fn test_non_struct_is_rejected() {
        let proxy = Proxy::frozen(Arc::new(vec![1, 2, 3]));
        let err = proxy.fields().unwrap_err();
        assert!(matches!(err, TetherError::InvalidProxy(_)));

        let proxy = Proxy::shared(&Arc::new(Mutex::new(42)));
        assert!(proxy.fields().is_err());
    }

    #[test]
    fn test_property_reads_live_value() {
        let person = ada();
        let entry = ObjectEntry::new("p", Uid::ROOT, Some(&Proxy::shared(&person))).unwrap();

        assert_eq!(entry.property("age").unwrap().get().unwrap(), "36");
        person.lock().age = 40;
        assert_eq!(entry.property("age").unwrap().get().unwrap(), "40");
    }

    #[test]
    fn test_property_writes_through() {
        let person = ada();
        let entry = ObjectEntry::new("p", Uid::ROOT, Some(&Proxy::shared(&person))).unwrap();

        entry.property("name").unwrap().set(r#""Grace""#).unwrap();
        entry.property("age").unwrap().set("41.9").unwrap();
        entry.property("score").unwrap().set("2").unwrap();

        let person = person.lock().clone();
        assert_eq!(person.name, "Grace");
        assert_eq!(person.age, 41);
        assert_eq!(person.score, 2.0);
    }

    #[test]
    fn test_property_type_mismatch_keeps_value() {
        let person = ada();
        let entry = ObjectEntry::new("p", Uid::ROOT, Some(&Proxy::shared(&person))).unwrap();

        let err = entry.property("age").unwrap().set(r#""old""#).unwrap_err();
        assert_eq!(err.to_string(), "cannot cast string to int");
        assert!(entry.property("age").unwrap().set("-1").is_err());
        assert_eq!(person.lock().age, 36);
    }

    #[test]
    fn test_frozen_is_not_settable() {
        let entry = ObjectEntry::new(
            "p",
            Uid::ROOT,
            Some(&Proxy::frozen(Arc::new(ada().lock().clone()))),
        )
        .unwrap();

        assert_eq!(entry.property("name").unwrap().get().unwrap(), r#""Ada""#);
        let err = entry.property("name").unwrap().set(r#""x""#).unwrap_err();
        assert_eq!(err.to_string(), "property name is not settable");
    }

    #[test]
    fn test_unknown_property() {
        let entry = ObjectEntry::new("p", Uid::ROOT, None).unwrap();
        assert_eq!(entry.property_names().count(), 0);
        assert!(matches!(
            entry.property("missing"),
            Err(TetherError::UnknownProperty(_))
        ));
    }

    #[test]
    fn test_function_entry_contains_panics() {
        let entry = FunctionEntry::new(HostFunction::new(|| -> i32 { panic!("BANG") }));
        assert_eq!(entry.name(), ANONYMOUS);

        let entry = entry.named("raise");
        let err = entry.call("[]").unwrap_err();
        assert_eq!(err.to_string(), "raise: BANG");

        let entry = FunctionEntry::new(HostFunction::new(|n: usize| -> usize {
            panic!("{} failures", n)
        }))
        .named("fmt");
        assert_eq!(entry.call("[3]").unwrap_err().to_string(), "fmt: 3 failures");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = Registry::default();
        let oid = next_uid();
        let fid = next_uid();
        registry.insert_object(oid, ObjectEntry::new("o", Uid::ROOT, None).unwrap());
        registry.insert_function(fid, FunctionEntry::new(HostFunction::new(|| 1)).named("one"));

        assert!(registry.contains_object(Uid::ROOT));
        assert!(registry.contains_object(oid));
        assert_eq!(registry.object(oid).unwrap().name, "o");
        assert_eq!(registry.function(fid).unwrap().call("[]").unwrap(), "1");
        assert!(matches!(
            registry.function(oid),
            Err(TetherError::UnknownEntity { kind: "function", .. })
        ));
        assert_eq!(registry.counts(), (1, 1));

        registry.clear();
        assert_eq!(registry.counts(), (0, 0));
    }
}
