//! Values crossing the isolate boundary.
//!
//! Host data is deep-copied in through JSON, and results are deep-copied out
//! as `serde_json::Value`, so neither side can observe later mutations made
//! by the other. The only live reference into host code is a [`Callback`],
//! which itself only ever sees copied JSON.

use std::fmt;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as Json;

type CallbackFn = dyn Fn(Vec<Json>) -> anyhow::Result<Json> + Send + Sync;

/// Host function a snippet may call.
///
/// Arguments are copied out of the isolate as JSON and the return value is
/// copied back in. An `Err` surfaces in the script as a catchable `Error`.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    /// Wrap a host closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Json>) -> anyhow::Result<Json> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the callback directly.
    pub fn invoke(&self, args: Vec<Json>) -> anyhow::Result<Json> {
        (self.0)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// A value injected under a variable name.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// Plain data, deep-copied into the isolate.
    Data(Json),
    /// A host function callable from the snippet.
    Callback(Callback),
}

impl From<Json> for HostValue {
    fn from(json: Json) -> Self {
        HostValue::Data(json)
    }
}

impl From<Callback> for HostValue {
    fn from(callback: Callback) -> Self {
        HostValue::Callback(callback)
    }
}

/// Named inputs of one execution, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    entries: IndexMap<String, HostValue>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Variables from the members of a JSON object; other JSON values yield
    /// no variables.
    pub fn from_json(json: Json) -> Self {
        let mut variables = Self::new();
        if let Json::Object(map) = json {
            for (name, value) in map {
                variables.insert(name, value);
            }
        }
        variables
    }
}

impl<K: Into<String>, V: Into<HostValue>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut variables = Self::new();
        for (name, value) in iter {
            variables.insert(name, value);
        }
        variables
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

/// Whether `name` can be bound as a snippet parameter.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Host callbacks of the running job, indexed by slot. Stored in an isolate
/// slot while the job runs.
#[derive(Debug, Default)]
pub(crate) struct JobCallbacks(Vec<Callback>);

impl JobCallbacks {
    pub(crate) fn from_variables(variables: &Variables) -> Self {
        let callbacks = variables
            .iter()
            .filter_map(|(_, value)| match value {
                HostValue::Callback(callback) => Some(callback.clone()),
                HostValue::Data(_) => None,
            })
            .collect();
        Self(callbacks)
    }
}

/// Arguments for the job function, one per variable.
///
/// Returns `None` with an exception pending if a value cannot be copied in.
pub(crate) fn inject<'s>(
    scope: &mut v8::HandleScope<'s>,
    bind_callback: &v8::Global<v8::Function>,
    variables: &Variables,
) -> Option<Vec<v8::Local<'s, v8::Value>>> {
    let bind = v8::Local::new(scope, bind_callback);
    let mut args = Vec::with_capacity(variables.len());
    let mut slot = 0;
    for (_, value) in variables.iter() {
        let arg = match value {
            HostValue::Data(json) => copy_in(scope, json)?,
            HostValue::Callback(_) => {
                let index = v8::Integer::new(scope, slot).into();
                slot += 1;
                let receiver = v8::undefined(scope).into();
                bind.call(scope, receiver, &[index])?
            }
        };
        args.push(arg);
    }
    Some(args)
}

fn copy_in<'s>(scope: &mut v8::HandleScope<'s>, json: &Json) -> Option<v8::Local<'s, v8::Value>> {
    let Some(text) = v8::String::new(scope, &json.to_string()) else {
        throw_range_error(scope, "variable is too large");
        return None;
    };
    v8::json::parse(scope, text)
}

/// Detached JSON copy of a result.
///
/// `undefined` becomes `null`; a function cannot leave the isolate.
pub(crate) fn extract(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Json> {
    copy_out(scope, value, "functions cannot be returned from the sandbox")
}

fn copy_out(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>, function_error: &str) -> Option<Json> {
    if value.is_undefined() || value.is_symbol() {
        return Some(Json::Null);
    }
    if value.is_function() {
        throw_type_error(scope, function_error);
        return None;
    }
    let text = v8::json::stringify(scope, value)?.to_rust_string_lossy(scope);
    // `toJSON` may return undefined
    if text == "undefined" {
        return Some(Json::Null);
    }
    match serde_json::from_str(&text) {
        Ok(json) => Some(json),
        Err(err) => {
            throw_type_error(scope, &format!("value is not representable as JSON: {err}"));
            None
        }
    }
}

/// Native behind every callback the snippet sees: `invoke(slot, args)`.
pub(crate) fn invoke_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let Some(slot) = args.get(0).uint32_value(scope) else {
        return;
    };
    let callback = scope
        .get_slot::<JobCallbacks>()
        .and_then(|callbacks| callbacks.0.get(slot as usize))
        .cloned();
    let Some(callback) = callback else {
        throw_error(scope, "callback is no longer available");
        return;
    };

    let Ok(list) = v8::Local::<v8::Array>::try_from(args.get(1)) else {
        throw_type_error(scope, "callback arguments must be an array");
        return;
    };
    let mut copied = Vec::with_capacity(list.length() as usize);
    for index in 0..list.length() {
        let Some(value) = list.get_index(scope, index) else {
            return;
        };
        let Some(json) = copy_out(scope, value, "functions cannot be passed to a host callback") else {
            return;
        };
        copied.push(json);
    }

    match callback.invoke(copied) {
        Ok(json) => {
            if let Some(value) = copy_in(scope, &json) {
                rv.set(value);
            }
        }
        Err(err) => throw_error(scope, &err.to_string()),
    }
}

pub(crate) fn throw_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::error(scope, message);
        scope.throw_exception(exception);
    }
}

pub(crate) fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, message);
        scope.throw_exception(exception);
    }
}

pub(crate) fn throw_range_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::range_error(scope, message);
        scope.throw_exception(exception);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::sandbox::executor::wrap;
    use crate::sandbox::runtime::{JobError, Runtime};

    fn run(code: &str, variables: &Variables) -> Result<Json, String> {
        let mut runtime = Runtime::new(16 * 1024 * 1024).unwrap();
        runtime
            .run(&wrap(code), variables)
            .result
            .map_err(|err| match err {
                JobError::Script(message) => message,
                other => format!("{other:?}"),
            })
    }

    #[test]
    fn test_data_is_copied_in_and_out() {
        let variables = Variables::new().with("x", json!({"y": 42, "list": [1, 2]}));
        assert_eq!(run("x.y", &variables), Ok(json!(42)));
        assert_eq!(
            run("x.list.push(3); return x;", &variables),
            Ok(json!({"y": 42, "list": [1, 2, 3]}))
        );
        // the host copy is untouched
        assert_eq!(
            variables.get("x").map(|v| matches!(v, HostValue::Data(d) if d["list"] == json!([1, 2]))),
            Some(true)
        );
    }

    #[test]
    fn test_results_follow_json_semantics() {
        let none = Variables::new();
        assert_eq!(run("undefined", &none), Ok(Json::Null));
        assert_eq!(run("0 / 0", &none), Ok(Json::Null));
        assert_eq!(run("Symbol('s')", &none), Ok(Json::Null));
        assert_eq!(run("({ a: undefined, b: 1 })", &none), Ok(json!({"b": 1})));
        assert_eq!(run("new Date(0)", &none), Ok(json!("1970-01-01T00:00:00.000Z")));
        assert_eq!(run("new Map([[1, 2]])", &none), Ok(json!({})));
    }

    #[test]
    fn test_function_result_is_rejected() {
        let err = run("(() => 1)", &Variables::new()).unwrap_err();
        assert!(err.starts_with("TypeError"), "{err}");
    }

    #[test]
    fn test_bigint_result_is_an_error() {
        let err = run("10n", &Variables::new()).unwrap_err();
        assert!(err.starts_with("TypeError"), "{err}");
    }

    #[test]
    fn test_callback_round_trip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let double = Callback::new(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = args.first().and_then(Json::as_f64).unwrap_or(0.0);
            Ok(json!(n * 2.0))
        });
        let variables = Variables::new().with("double", double);
        assert_eq!(run("double(21)", &variables), Ok(json!(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_sees_copied_arguments() {
        let echo = Callback::new(|args| Ok(Json::Array(args)));
        let variables = Variables::new().with("echo", echo);
        assert_eq!(
            run("echo(1, undefined, { a: [true] })", &variables),
            Ok(json!([1, null, {"a": [true]}]))
        );
        let err = run("echo(() => 1)", &variables).unwrap_err();
        assert!(err.starts_with("TypeError"), "{err}");
    }

    #[test]
    fn test_callback_error_is_catchable() {
        let failing = Callback::new(|_| Err(anyhow::anyhow!("host refused")));
        let variables = Variables::new().with("ask", failing);
        assert_eq!(
            run("let m; try { ask() } catch (e) { m = e.message } return m;", &variables),
            Ok(json!("host refused"))
        );
    }

    #[test]
    fn test_variables_from_json_object() {
        let variables = Variables::from_json(json!({"a": 1, "b": "two"}));
        assert_eq!(variables.names(), vec!["a", "b"]);
        assert!(Variables::from_json(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_identifier_names() {
        assert!(is_identifier("record"));
        assert!(is_identifier("$el"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("a){};(b"));
    }
}
