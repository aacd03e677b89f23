//! Global namespace of an isolate.
//!
//! Standard ECMAScript globals stay available, frozen together with every
//! intrinsic reachable from them. The template helpers below are added as
//! read-only globals, and every deny-listed or withdrawn name is bound to
//! `undefined` so host-capability names never fall through to anything.

use std::sync::LazyLock;

use anyhow::{anyhow, Context as _};
use chrono::{Local, SecondsFormat, Utc};
use rand::Rng;
use regex::{Captures, Regex};

use crate::sandbox::io::{LogBuffer, LogEntry, LogLevel};
use crate::sandbox::limits::HeapLimit;
use crate::sandbox::marshal::{invoke_callback, throw_range_error};

/// Script that freezes the context and installs the helpers.
const BOOTSTRAP: &str = include_str!("environment.js");

/// Names that must never resolve to a host capability.
pub const DENY_LIST: &[&str] = &[
    "eval",
    "Function",
    "require",
    "module",
    "exports",
    "__dirname",
    "__filename",
    "process",
    "Buffer",
    "global",
    "globalThis",
    "window",
    "document",
    "fs",
    "child_process",
    "net",
    "http",
    "https",
    "crypto",
    "os",
    "path",
    "vm",
    "worker_threads",
    "cluster",
    "dgram",
    "dns",
    "domain",
    "events",
    "readline",
    "repl",
    "stream",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "zlib",
];

/// Standard globals removed from every context. Their backing stores live
/// outside the V8 heap, or they compile native code.
pub const WITHDRAWN_GLOBALS: &[&str] = &[
    "WebAssembly",
    "SharedArrayBuffer",
    "Atomics",
    "ArrayBuffer",
    "DataView",
    "Int8Array",
    "Uint8Array",
    "Uint8ClampedArray",
    "Int16Array",
    "Uint16Array",
    "Int32Array",
    "Uint32Array",
    "Float16Array",
    "Float32Array",
    "Float64Array",
    "BigInt64Array",
    "BigUint64Array",
];

/// Upper bound of `repeat(str, count)`.
pub const MAX_REPEAT_COUNT: f64 = 1_000.0;
/// Upper bound of `truncate(str, length)`.
pub const MAX_TRUNCATE_LENGTH: f64 = 10_000.0;
/// Upper bound of `random.string(length)`.
pub const MAX_RANDOM_STRING_LENGTH: f64 = 1_000.0;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Whether `name` resolves to `undefined` in every isolate.
pub fn is_denied(name: &str) -> bool {
    DENY_LIST.contains(&name)
}

/// Shape the globals of a fresh context and return the callback binder.
///
/// Fails if the environment has already been built in this context.
pub(crate) fn build(scope: &mut v8::HandleScope) -> anyhow::Result<v8::Global<v8::Function>> {
    let scope = &mut v8::TryCatch::new(scope);
    let host = host_object(scope)?;
    let denied = name_list(scope, DENY_LIST)?;
    let withdrawn = name_list(scope, WITHDRAWN_GLOBALS)?;

    let source = v8::String::new(scope, BOOTSTRAP).context("bootstrap source")?;
    let installer = v8::Script::compile(scope, source, None)
        .and_then(|script| script.run(scope))
        .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok());
    let Some(installer) = installer else {
        return Err(bootstrap_error(scope));
    };
    let receiver = v8::undefined(scope).into();
    let bind = installer
        .call(scope, receiver, &[host.into(), denied.into(), withdrawn.into()])
        .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok());
    let Some(bind) = bind else {
        return Err(bootstrap_error(scope));
    };

    tracing::debug!(
        denied = DENY_LIST.len(),
        withdrawn = WITHDRAWN_GLOBALS.len(),
        "built sandbox environment"
    );
    Ok(v8::Global::new(scope, bind))
}

fn bootstrap_error(scope: &mut v8::TryCatch<v8::HandleScope>) -> anyhow::Error {
    let message = scope
        .exception()
        .and_then(|exception| exception.to_string(scope))
        .map(|text| text.to_rust_string_lossy(scope))
        .unwrap_or_else(|| "bootstrap did not produce a function".to_string());
    anyhow!("environment bootstrap failed: {message}")
}

fn name_list<'s>(
    scope: &mut v8::HandleScope<'s>,
    names: &[&str],
) -> anyhow::Result<v8::Local<'s, v8::Array>> {
    let mut elements = Vec::with_capacity(names.len());
    for name in names {
        let name = v8::String::new(scope, name).with_context(|| format!("global name {name}"))?;
        elements.push(name.into());
    }
    Ok(v8::Array::new_with_elements(scope, &elements))
}

/// The natives handed to the bootstrap script.
fn host_object<'s>(scope: &mut v8::HandleScope<'s>) -> anyhow::Result<v8::Local<'s, v8::Object>> {
    let host = v8::Object::new(scope);
    set_native(scope, host, "now", now)?;
    set_native(scope, host, "today", today)?;
    set_native(scope, host, "time", time)?;
    set_native(scope, host, "timestamp", timestamp)?;
    set_native(scope, host, "uuid", uuid)?;
    set_native(scope, host, "format", format)?;
    set_native(scope, host, "repeat", repeat)?;
    set_native(scope, host, "truncate", truncate)?;
    set_native(scope, host, "slugify", slugify)?;
    set_native(scope, host, "randomInt", random_int)?;
    set_native(scope, host, "randomFloat", random_float)?;
    set_native(scope, host, "randomBool", random_bool)?;
    set_native(scope, host, "randomChoice", random_choice)?;
    set_native(scope, host, "randomString", random_string)?;
    set_native(scope, host, "log", console_log)?;
    set_native(scope, host, "info", console_info)?;
    set_native(scope, host, "warn", console_warn)?;
    set_native(scope, host, "error", console_error)?;
    set_native(scope, host, "debug", console_debug)?;
    set_native(scope, host, "invoke", invoke_callback)?;
    Ok(host)
}

fn set_native(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> anyhow::Result<()> {
    let key = v8::String::new(scope, name).with_context(|| format!("helper name {name}"))?;
    let function = v8::Function::new(scope, callback).with_context(|| format!("helper {name}"))?;
    function.set_name(key);
    target
        .set(scope, key.into(), function.into())
        .with_context(|| format!("install helper {name}"))?;
    Ok(())
}

// ----------------------------------------------------------------------
// argument helpers
// ----------------------------------------------------------------------

/// `String(value)`; `None` leaves the conversion's exception pending.
fn display(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<String> {
    value
        .to_string(scope)
        .map(|text| text.to_rust_string_lossy(scope))
}

/// Numeric argument, `default` when it is `undefined`.
fn number(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    index: i32,
    default: f64,
) -> Option<f64> {
    let value = args.get(index);
    if value.is_undefined() {
        return Some(default);
    }
    value.number_value(scope)
}

/// ToIntegerOrInfinity.
fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

fn set_string(scope: &mut v8::HandleScope, rv: &mut v8::ReturnValue, text: &str) {
    match v8::String::new(scope, text) {
        Some(text) => rv.set(text.into()),
        None => throw_range_error(scope, "Invalid string length"),
    }
}

// ----------------------------------------------------------------------
// time
// ----------------------------------------------------------------------

/// `now()`: current instant as an ISO 8601 string.
fn now(scope: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let text = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    set_string(scope, &mut rv, &text);
}

/// `today()`: local date as `YYYY-MM-DD`.
fn today(scope: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    set_string(scope, &mut rv, &Local::now().format("%Y-%m-%d").to_string());
}

/// `time()`: local wall-clock time as `HH:MM:SS`.
fn time(scope: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    set_string(scope, &mut rv, &Local::now().format("%H:%M:%S").to_string());
}

/// `timestamp()`: milliseconds since the Unix epoch.
fn timestamp(_: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    rv.set_double(Utc::now().timestamp_millis() as f64);
}

// ----------------------------------------------------------------------
// strings
// ----------------------------------------------------------------------

fn uuid(scope: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    let text = format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    );
    set_string(scope, &mut rv, &text);
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}").expect("placeholder pattern is valid"));

/// `format(template, ...args)`: replace `{n}` with the n-th extra argument.
/// Placeholders without a defined argument stay as written.
fn format(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let template = args.get(0);
    if !template.is_string() {
        rv.set(template);
        return;
    }
    let Some(template) = display(scope, template) else {
        return;
    };
    let mut values = Vec::with_capacity(args.length().max(1) as usize - 1);
    for index in 1..args.length() {
        let value = args.get(index);
        if value.is_undefined() {
            values.push(None);
            continue;
        }
        let Some(text) = display(scope, value) else {
            return;
        };
        values.push(Some(text));
    }
    let replaced = PLACEHOLDER.replace_all(&template, |caps: &Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| values.get(index))
            .and_then(|value| value.clone())
            .unwrap_or_else(|| caps[0].to_string())
    });
    set_string(scope, &mut rv, &replaced);
}

fn repeat(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(text) = display(scope, args.get(0)) else {
        return;
    };
    let Some(count) = number(scope, &args, 1, 0.0) else {
        return;
    };
    let count = to_integer(count).clamp(0.0, MAX_REPEAT_COUNT) as usize;
    // the result is assembled outside the V8 heap first
    let limit = scope.get_slot::<HeapLimit>().map_or(usize::MAX, |limit| limit.0);
    if text.len().saturating_mul(count) > limit {
        throw_range_error(scope, "Invalid string length");
        return;
    }
    set_string(scope, &mut rv, &text.repeat(count));
}

/// `truncate(str, length)`: the first `length` UTF-16 units.
fn truncate(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(text) = display(scope, args.get(0)) else {
        return;
    };
    let Some(length) = number(scope, &args, 1, MAX_TRUNCATE_LENGTH) else {
        return;
    };
    let length = to_integer(length).clamp(0.0, MAX_TRUNCATE_LENGTH) as usize;
    let units: Vec<u16> = text.encode_utf16().take(length).collect();
    set_string(scope, &mut rv, &String::from_utf16_lossy(&units));
}

static SLUG_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\s-]").expect("slug strip pattern is valid"));
static SLUG_COLLAPSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_-]+").expect("slug collapse pattern is valid"));

pub(crate) fn slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = SLUG_STRIP.replace_all(lowered.trim(), "");
    let collapsed = SLUG_COLLAPSE.replace_all(&stripped, "-");
    collapsed.trim_matches('-').to_string()
}

fn slugify(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(text) = display(scope, args.get(0)) {
        set_string(scope, &mut rv, &slug(&text));
    }
}

// ----------------------------------------------------------------------
// random
// ----------------------------------------------------------------------

/// `random.int(min, max)`: integer in `[min, max]`.
fn random_int(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(low), Some(high)) = (number(scope, &args, 0, 0.0), number(scope, &args, 1, 100.0)) else {
        return;
    };
    rv.set_double(pick_int(&mut rand::thread_rng(), low, high));
}

pub(crate) fn pick_int(rng: &mut impl Rng, low: f64, high: f64) -> f64 {
    let (mut low, mut high) = (low.ceil(), high.floor());
    if low.is_nan() || high.is_nan() {
        return f64::NAN;
    }
    if low > high {
        std::mem::swap(&mut low, &mut high);
    }
    let span = high - low + 1.0;
    low + (rng.gen::<f64>() * span).floor()
}

/// `random.float(min, max)`: number in `[min, max)`.
fn random_float(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(low), Some(high)) = (number(scope, &args, 0, 0.0), number(scope, &args, 1, 1.0)) else {
        return;
    };
    rv.set_double(low + rand::thread_rng().gen::<f64>() * (high - low));
}

fn random_bool(_: &mut v8::HandleScope, _: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    rv.set_bool(rand::thread_rng().gen::<bool>());
}

fn random_choice(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Ok(array) = v8::Local::<v8::Array>::try_from(args.get(0)) else {
        return;
    };
    if array.length() == 0 {
        return;
    }
    let index = rand::thread_rng().gen_range(0..array.length());
    if let Some(item) = array.get_index(scope, index) {
        rv.set(item);
    }
}

fn random_string(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(length) = number(scope, &args, 0, 10.0) else {
        return;
    };
    let length = to_integer(length).clamp(0.0, MAX_RANDOM_STRING_LENGTH) as usize;
    let mut rng = rand::thread_rng();
    let text: String = (0..length)
        .map(|_| char::from(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]))
        .collect();
    set_string(scope, &mut rv, &text);
}

// ----------------------------------------------------------------------
// console
// ----------------------------------------------------------------------

/// One console argument: objects as JSON where possible, else `String(v)`.
fn console_part(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<String> {
    if value.is_object() && !value.is_function() {
        let scope = &mut v8::TryCatch::new(scope);
        if let Some(json) = v8::json::stringify(scope, value) {
            return Some(json.to_rust_string_lossy(scope));
        }
    }
    display(scope, value)
}

fn record(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, level: LogLevel) {
    let mut parts = Vec::with_capacity(args.length() as usize);
    for index in 0..args.length() {
        let Some(part) = console_part(scope, args.get(index)) else {
            return;
        };
        parts.push(part);
    }
    let entry = LogEntry::new(level, &parts.join(" "));
    if let Some(console) = scope.get_slot_mut::<LogBuffer>() {
        console.push(entry);
    }
}

macro_rules! console_methods {
    ($($name:ident => $level:expr),* $(,)?) => {
        $(
            fn $name(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _: v8::ReturnValue) {
                record(scope, &args, $level);
            }
        )*
    };
}

console_methods! {
    console_log => LogLevel::Log,
    console_info => LogLevel::Info,
    console_warn => LogLevel::Warn,
    console_error => LogLevel::Error,
    console_debug => LogLevel::Debug,
}
