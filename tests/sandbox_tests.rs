//! Behavioural tests for the public sandbox API.

use regex::Regex;
use serde_json::{json, Value as Json};
use snippet_sandbox::prelude::*;
use snippet_sandbox::{LifecycleState, LogLevel};
use tokio_test::{assert_err, assert_ok};

async fn eval(sandbox: &mut Sandbox, code: &str) -> Json {
    match sandbox
        .execute(code, Variables::new(), ExecuteOptions::default())
        .await
    {
        Ok(value) => value,
        Err(err) => panic!("{code:?} failed: {err}"),
    }
}

#[tokio::test]
async fn test_expressions() {
    let mut sandbox = Sandbox::default();

    assert_eq!(eval(&mut sandbox, "2 + 2").await, json!(4));
    assert_eq!(eval(&mut sandbox, r#""a" + "b""#).await, json!("ab"));
    assert_eq!(eval(&mut sandbox, "[1, 2, 3].map(n => n * n)").await, json!([1, 4, 9]));
    assert_eq!(eval(&mut sandbox, "({ a: 1, b: [true, null] })").await, json!({"a": 1, "b": [true, null]}));
    assert_eq!(eval(&mut sandbox, "1 / 0").await, Json::Null);
    assert_eq!(eval(&mut sandbox, "Math.max(3, 7, 5)").await, json!(7));
}

#[tokio::test]
async fn test_statements() {
    let mut sandbox = Sandbox::default();

    let code = r#"
        const words = ['alpha', 'beta', 'gamma'];
        let out = [];
        for (const [i, w] of words.entries()) {
            if (i % 2 === 0) out.push(w.toUpperCase());
        }
        return out.join('-');
    "#;
    assert_eq!(eval(&mut sandbox, code).await, json!("ALPHA-GAMMA"));

    // a body without `return` yields nothing
    assert_eq!(eval(&mut sandbox, "const x = 1;").await, Json::Null);
}

#[tokio::test]
async fn test_variables() {
    let mut sandbox = Sandbox::default();

    let variables = Variables::new().with("x", json!({"y": 42}));
    let result = sandbox
        .execute("x.y", variables, ExecuteOptions::default())
        .await;
    assert_eq!(assert_ok!(result), json!(42));

    let variables = Variables::from_json(json!({"tags": ["a", "b"], "title": "Plan"}));
    let result = sandbox
        .execute("`${title}: ${tags.join(', ')}`", variables, ExecuteOptions::default())
        .await;
    assert_eq!(assert_ok!(result), json!("Plan: a, b"));
}

#[tokio::test]
async fn test_callbacks() {
    let mut sandbox = Sandbox::default();

    let lookup = Callback::new(|args| {
        let key = args.first().and_then(Json::as_str).unwrap_or_default();
        Ok(json!({ "key": key, "found": key == "known" }))
    });
    let variables = Variables::new().with("lookup", lookup);
    let result = sandbox
        .execute("lookup('known').found && !lookup('other').found", variables, ExecuteOptions::default())
        .await;
    assert_eq!(assert_ok!(result), json!(true));
}

#[tokio::test]
async fn test_helpers() {
    let mut sandbox = Sandbox::default();

    assert_eq!(eval(&mut sandbox, "slugify('Hello World!')").await, json!("hello-world"));
    assert_eq!(eval(&mut sandbox, "format('Hello {0}!', 'World')").await, json!("Hello World!"));
    assert_eq!(eval(&mut sandbox, "truncate('Hello World', 5)").await, json!("Hello"));
    assert_eq!(eval(&mut sandbox, "repeat('ab', 3)").await, json!("ababab"));

    let uuid = eval(&mut sandbox, "uuid()").await;
    let shape = Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$").unwrap();
    assert!(shape.is_match(uuid.as_str().unwrap_or_default()), "{uuid}");

    let today = eval(&mut sandbox, "today()").await;
    assert!(Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap().is_match(today.as_str().unwrap_or_default()));
    assert!(eval(&mut sandbox, "timestamp()").await.as_f64().unwrap_or_default() > 1.6e12);
}

#[tokio::test]
async fn test_script_errors() {
    let mut sandbox = Sandbox::default();

    let result = sandbox
        .execute("x", Variables::new(), ExecuteOptions::default())
        .await;
    match assert_err!(result) {
        SandboxError::ExecutionError(message) => {
            assert_eq!(message, "ReferenceError: x is not defined")
        }
        other => panic!("unexpected error {other}"),
    }

    let result = sandbox
        .execute("throw new RangeError('too far');", Variables::new(), ExecuteOptions::default())
        .await;
    match assert_err!(result) {
        SandboxError::ExecutionError(message) => assert_eq!(message, "RangeError: too far"),
        other => panic!("unexpected error {other}"),
    }

    let result = sandbox
        .execute("let = ;", Variables::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(result, Err(SandboxError::ExecutionError(m)) if m.contains("SyntaxError")));

    let result = sandbox
        .execute("() => 1", Variables::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(result, Err(SandboxError::ExecutionError(_))));
}

#[tokio::test]
async fn test_per_call_timeout() {
    let mut sandbox = Sandbox::default();

    let result = sandbox
        .execute("while (true) {}", Variables::new(), ExecuteOptions::with_timeout_ms(150))
        .await;
    assert!(matches!(result, Err(SandboxError::Timeout(150))));

    // the sandbox stays usable after a timeout
    assert_eq!(eval(&mut sandbox, "'fine'").await, json!("fine"));
}

#[tokio::test]
async fn test_lifecycle() {
    let mut sandbox = Sandbox::default();
    assert_eq!(sandbox.state(), LifecycleState::Uninitialized);

    assert_ok!(sandbox.configure(SandboxOptions {
        timeout_ms: Some(1_000),
        ..Default::default()
    }));
    assert_ok!(sandbox.initialize());
    assert_eq!(sandbox.state(), LifecycleState::Initialized);

    let err = assert_err!(sandbox.configure(SandboxOptions::default()));
    assert!(matches!(err, SandboxError::AlreadyInitialized));

    sandbox.dispose();
    sandbox.dispose();
    assert_eq!(sandbox.state(), LifecycleState::Disposed);
    assert_ok!(sandbox.configure(SandboxOptions {
        memory_limit_mb: Some(64),
        ..Default::default()
    }));

    let result = sandbox
        .execute("1", Variables::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(result, Err(SandboxError::NotInitialized)));

    assert_ok!(sandbox.reset());
    assert_eq!(sandbox.config().memory_limit_mb(), 64);
    assert_eq!(eval(&mut sandbox, "1 + 1").await, json!(2));
}

#[tokio::test]
async fn test_dry_run() {
    let mut sandbox = Sandbox::new(SandboxConfig::builder().dry_run(true).build());

    let variables = Variables::new().with("items", json!([1, 2, 3]));
    let report = sandbox
        .execute("for (const i of items) { total += i }", variables, ExecuteOptions::default())
        .await;
    let report = assert_ok!(report);
    assert_eq!(report["dryRun"], json!(true));
    assert_eq!(report["result"], json!("[DRY RUN - Not executed]"));
    assert_eq!(report["variables"], json!(["items"]));
    assert!(!report["warnings"].as_array().map(Vec::is_empty).unwrap_or(true));

    // validation still applies
    let result = sandbox
        .execute("eval('1')", Variables::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(result, Err(SandboxError::BlockedPattern(_))));
}

#[tokio::test]
async fn test_test_report() {
    let mut sandbox = Sandbox::default();

    let report = sandbox
        .test("console.log('checking', 1); console.warn('odd'); return 5;", Variables::new())
        .await;
    assert!(report.success);
    assert_eq!(report.result, Some(json!(5)));
    assert_eq!(report.error, None);
    assert_eq!(report.logs.len(), 2);
    assert_eq!(report.logs[0].message, "checking 1");
    assert_eq!(report.logs[1].level, LogLevel::Warn);

    let report = sandbox.test("require('fs')", Variables::new()).await;
    assert!(!report.success);
    assert!(report.error.unwrap_or_default().contains("require("));

    let report = sandbox.test("", Variables::new()).await;
    assert!(!report.success);
}

#[tokio::test]
async fn test_logs_are_bounded() {
    let mut sandbox = Sandbox::default();

    eval(&mut sandbox, "for (let i = 0; i < 150; i++) { console.log('line ' + i) }").await;
    let logs = sandbox.logs();
    assert_eq!(logs.len(), 100);
    assert_eq!(logs[0].message, "line 50");
    assert_eq!(logs[99].message, "line 149");

    eval(&mut sandbox, "console.error('x'.repeat(5000))").await;
    let logs = sandbox.logs();
    assert_eq!(logs.last().map(|e| e.message.chars().count()), Some(1_000));

    sandbox.clear_logs();
    assert!(sandbox.logs().is_empty());
}

#[tokio::test]
async fn test_capabilities() {
    let sandbox = Sandbox::new(SandboxConfig::builder().timeout_ms(3_000).build());
    let capabilities = serde_json::to_value(sandbox.capabilities()).unwrap();

    assert_eq!(capabilities["limits"]["timeoutMs"], json!(3_000));
    assert_eq!(capabilities["limits"]["memoryLimitMb"], json!(128));
    assert_eq!(capabilities["blockedPatterns"][5], json!("process."));
    assert_eq!(capabilities["features"]["console"], json!(true));
    assert_eq!(capabilities["restrictions"]["network"], json!(false));
}

#[test]
fn test_blocking_use() {
    let mut sandbox = Sandbox::default();
    let result = tokio_test::block_on(sandbox.execute(
        "Number.parseFloat('2.5') * 2",
        Variables::new(),
        ExecuteOptions::default(),
    ));
    assert_eq!(assert_ok!(result), json!(5));
}
