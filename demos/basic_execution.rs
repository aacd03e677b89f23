//! Basic example of evaluating template snippets in the sandbox.
//!
//! Run with: cargo run --example basic_execution

use serde_json::json;
use snippet_sandbox::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Configure the sandbox
    let config = SandboxConfig::builder()
        .timeout_ms(2_000)
        .memory_limit_mb(32)
        .build();

    println!("Creating sandbox with config: {:?}", config);
    let mut sandbox = Sandbox::new(config);

    // A bare expression
    println!("\n=== Test 1: Expression ===");
    match sandbox
        .execute("2 + 2", Variables::new(), ExecuteOptions::default())
        .await
    {
        Ok(value) => println!("result: {}", value),
        Err(e) => eprintln!("Error: {}", e),
    }

    // A statement body with variables from the host
    println!("\n=== Test 2: Statements with variables ===");
    let code = r#"
const done = tasks.filter(t => t.done).length;
return format('{0}: {1}/{2} done', title, done, tasks.length);
"#;
    let variables = Variables::new().with("title", json!("Weekly Review")).with(
        "tasks",
        json!([
            { "name": "inbox", "done": true },
            { "name": "calendar", "done": false },
            { "name": "projects", "done": true }
        ]),
    );
    match sandbox.execute(code, variables, ExecuteOptions::default()).await {
        Ok(value) => println!("result: {}", value),
        Err(e) => eprintln!("Error: {}", e),
    }

    // Host callbacks
    println!("\n=== Test 3: Callback ===");
    let lookup = Callback::new(|args| {
        let key = args.first().and_then(|v| v.as_str()).unwrap_or_default();
        Ok(json!(format!("value for {key}")))
    });
    let variables = Variables::new().with("lookup", lookup);
    match sandbox
        .execute("lookup('project').toUpperCase()", variables, ExecuteOptions::default())
        .await
    {
        Ok(value) => println!("result: {}", value),
        Err(e) => eprintln!("Error: {}", e),
    }

    // Console output is captured, not printed
    println!("\n=== Test 4: Captured logs ===");
    let report = sandbox
        .test("console.log('today is', today()); return slugify('Daily Note');", Variables::new())
        .await;
    println!("success: {}", report.success);
    println!("result: {:?}", report.result);
    for entry in &report.logs {
        println!("[{:?}] {}", entry.level, entry.message);
    }

    sandbox.dispose();
    Ok(())
}
