//! The engine behind an isolate: one V8 isolate with one context whose
//! globals are built once and shared by every job.
//!
//! A job is compiled as a strict-mode function whose parameters are the
//! injected variables, so nothing a snippet declares outlives its call.

use std::sync::Once;

use serde_json::Value as Json;

use crate::sandbox::environment;
use crate::sandbox::io::{LogBuffer, LogEntry, MAX_LOG_ENTRIES};
use crate::sandbox::limits::{self, HeapCeiling, HeapLimit};
use crate::sandbox::marshal::{self, JobCallbacks, Variables};

static V8_INIT: Once = Once::new();

/// Initialize the process-wide V8 platform.
pub(crate) fn init_platform() {
    V8_INIT.call_once(|| {
        v8::V8::set_flags_from_string("--disallow-code-generation-from-strings");
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform);
        v8::V8::initialize();
    });
}

/// How a job failed inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobError {
    /// The snippet threw, or did not compile.
    Script(String),
    /// Execution was terminated from outside.
    Terminated,
    /// The heap ceiling was reached.
    OutOfMemory,
}

/// What the engine hands back for one job.
#[derive(Debug)]
pub(crate) struct JobReport {
    pub(crate) result: Result<Json, JobError>,
    pub(crate) logs: Vec<LogEntry>,
    pub(crate) memory_used: usize,
}

impl JobReport {
    pub(crate) fn failed(err: JobError) -> Self {
        Self {
            result: Err(err),
            logs: Vec::new(),
            memory_used: 0,
        }
    }
}

/// A V8 isolate with its sandboxed context.
///
/// Fields drop in declaration order: the globals need the isolate alive,
/// and the ceiling must outlive the isolate that points at it.
pub(crate) struct Runtime {
    context: v8::Global<v8::Context>,
    bind_callback: v8::Global<v8::Function>,
    isolate: v8::OwnedIsolate,
    ceiling: Box<HeapCeiling>,
}

impl Runtime {
    /// Create an isolate capped at `memory_limit` bytes of heap and build
    /// its environment.
    pub(crate) fn new(memory_limit: usize) -> anyhow::Result<Self> {
        init_platform();
        let mut isolate = v8::Isolate::new(limits::create_params(memory_limit));
        let ceiling = HeapCeiling::install(&mut isolate);
        isolate.set_slot(HeapLimit(memory_limit));
        isolate.set_slot(LogBuffer::new(MAX_LOG_ENTRIES));
        isolate.set_slot(JobCallbacks::default());

        let built = {
            let scope = &mut v8::HandleScope::new(&mut isolate);
            let context = v8::Context::new(scope, Default::default());
            let scope = &mut v8::ContextScope::new(scope, context);
            environment::build(scope).map(|bind| (v8::Global::new(scope, context), bind))
        };
        let (context, bind_callback) = match built {
            Ok(built) => built,
            Err(err) => {
                drop(isolate);
                drop(ceiling);
                return Err(err);
            }
        };
        tracing::debug!(memory_limit, "V8 isolate created");

        Ok(Self {
            context,
            bind_callback,
            isolate,
            ceiling,
        })
    }

    pub(crate) fn thread_safe_handle(&self) -> v8::IsolateHandle {
        self.isolate.thread_safe_handle()
    }

    /// Run a wrapped snippet with `variables` bound as parameters.
    pub(crate) fn run(&mut self, source: &str, variables: &Variables) -> JobReport {
        // a termination aimed at an earlier job may still be pending
        self.isolate.cancel_terminate_execution();
        self.ceiling.reset();
        self.isolate.set_slot(JobCallbacks::from_variables(variables));

        let result = {
            let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
            let scope = &mut v8::TryCatch::new(scope);
            evaluate(scope, &self.bind_callback, source, variables)
        };

        self.isolate.cancel_terminate_execution();
        self.isolate.set_slot(JobCallbacks::default());
        let result = match result {
            _ if self.ceiling.triggered() => Err(JobError::OutOfMemory),
            other => other,
        };
        let logs = self
            .isolate
            .get_slot_mut::<LogBuffer>()
            .map(LogBuffer::drain)
            .unwrap_or_default();

        JobReport {
            result,
            logs,
            memory_used: limits::heap_used(&mut self.isolate),
        }
    }

    /// Evaluate bare snippet code. Test convenience.
    #[cfg(test)]
    pub(crate) fn eval(&mut self, code: &str) -> Result<Json, JobError> {
        let source = crate::sandbox::executor::wrap(code);
        self.run(&source, &Variables::new()).result
    }
}

/// Source of the function a job compiles to.
fn entry_point(source: &str, variables: &Variables) -> String {
    let params = variables.names().join(", ");
    format!("(function({params}) {{ \"use strict\"; return {source};\n}})")
}

fn evaluate(
    scope: &mut v8::TryCatch<v8::HandleScope>,
    bind_callback: &v8::Global<v8::Function>,
    source: &str,
    variables: &Variables,
) -> Result<Json, JobError> {
    let program = entry_point(source, variables);
    let Some(code) = v8::String::new(scope, &program) else {
        return Err(JobError::Script("RangeError: snippet is too large".to_string()));
    };
    let Some(script) = v8::Script::compile(scope, code, None) else {
        return Err(caught(scope));
    };
    let Some(entry) = script.run(scope) else {
        return Err(caught(scope));
    };
    let Ok(entry) = v8::Local::<v8::Function>::try_from(entry) else {
        return Err(JobError::Script(
            "TypeError: snippet did not compile to a function".to_string(),
        ));
    };
    let Some(args) = marshal::inject(scope, bind_callback, variables) else {
        return Err(caught(scope));
    };
    let receiver = v8::undefined(scope).into();
    let Some(value) = entry.call(scope, receiver, &args) else {
        return Err(caught(scope));
    };
    marshal::extract(scope, value).ok_or_else(|| caught(scope))
}

/// Turn the pending exception into a [`JobError`].
fn caught(scope: &mut v8::TryCatch<v8::HandleScope>) -> JobError {
    if scope.has_terminated() {
        return JobError::Terminated;
    }
    JobError::Script(describe_exception(scope))
}

/// `Name: message` of the caught exception; syntax errors carry their line.
fn describe_exception(scope: &mut v8::TryCatch<v8::HandleScope>) -> String {
    let Some(exception) = scope.exception() else {
        return "Error: unknown failure".to_string();
    };
    let text = exception
        .to_string(scope)
        .map(|text| text.to_rust_string_lossy(scope))
        .unwrap_or_else(|| "Error: exception could not be printed".to_string());
    if !text.starts_with("SyntaxError") {
        return text;
    }
    let line = scope
        .message()
        .and_then(|message| message.get_line_number(scope));
    match line {
        Some(line) => format!("{text} (line {line})"),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::sandbox::marshal::Callback;

    fn runtime() -> Runtime {
        Runtime::new(16 * 1024 * 1024).unwrap()
    }

    #[test]
    fn test_entry_point_binds_variables_as_parameters() {
        let variables = Variables::new().with("a", json!(1)).with("b", json!(2));
        assert_eq!(
            entry_point("(a + b\n)", &variables),
            "(function(a, b) { \"use strict\"; return (a + b\n);\n})"
        );
    }

    #[test]
    fn test_runs_expressions_and_statements() {
        let mut runtime = runtime();
        assert_eq!(runtime.eval("1 + 2").unwrap(), json!(3));
        assert_eq!(
            runtime.eval("const xs = [3, 1, 2]; xs.sort(); return xs;").unwrap(),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn test_variables_and_callbacks() {
        let mut runtime = runtime();
        let variables = Variables::new()
            .with("name", json!("Ada"))
            .with("double", Callback::new(|args| Ok(json!(args[0].as_f64().unwrap_or(0.0) * 2.0))));
        let report = runtime.run("(`${name}:${double(21)}`\n)", &variables);
        assert_eq!(report.result.unwrap(), json!("Ada:42"));

        let failing = Variables::new().with("fail", Callback::new(|_| anyhow::bail!("no record")));
        let report = runtime.run("(fail()\n)", &failing);
        assert_eq!(report.result, Err(JobError::Script("Error: no record".to_string())));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let mut runtime = runtime();
        match runtime.eval("const a = 1;\nconst = 2;") {
            Err(JobError::Script(message)) => {
                assert!(message.starts_with("SyntaxError"), "{message}");
                assert!(message.ends_with("(line 2)"), "{message}");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_declarations_do_not_survive_the_job() {
        let mut runtime = runtime();
        runtime.eval("var leaked = 1; return leaked;").unwrap();
        assert_eq!(runtime.eval("typeof leaked").unwrap(), json!("undefined"));
    }

    #[test]
    fn test_memory_used_is_reported() {
        let mut runtime = runtime();
        let report = runtime.run("([1, 2, 3].length\n)", &Variables::new());
        assert_eq!(report.result.unwrap(), json!(3));
        assert!(report.memory_used > 0);
    }

    #[test]
    fn test_heap_ceiling_reports_out_of_memory() {
        let mut runtime = Runtime::new(8 * 1024 * 1024).unwrap();
        let report = runtime.run(
            &crate::sandbox::executor::wrap("const parts = []; while (true) { parts.push('x'.repeat(1024) + parts.length) }"),
            &Variables::new(),
        );
        assert_eq!(report.result, Err(JobError::OutOfMemory));
    }

    #[test]
    fn test_terminated_job_leaves_runtime_usable() {
        let mut runtime = runtime();
        let handle = runtime.thread_safe_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(100));
            handle.terminate_execution();
        });
        assert_eq!(runtime.eval("while (true) {}"), Err(JobError::Terminated));
        stopper.join().unwrap();
        assert_eq!(runtime.eval("'alive'").unwrap(), json!("alive"));
    }
}
