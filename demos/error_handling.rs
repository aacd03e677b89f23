//! Example demonstrating error handling patterns.
//!
//! This example shows how to handle the ways a snippet can fail:
//! - Rejected source (blocked patterns, empty or oversized code)
//! - Script errors
//! - Timeouts
//! - Memory limits
//! - Lifecycle misuse
//!
//! Run with: cargo run --example error_handling

use snippet_sandbox::prelude::*;
use snippet_sandbox::ErrorKind;

async fn run(sandbox: &mut Sandbox, code: &str) -> Result<serde_json::Value> {
    sandbox
        .execute(code, Variables::new(), ExecuteOptions::default())
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Error Handling Example ===\n");

    let config = SandboxConfig::builder()
        .timeout_ms(500)
        .memory_limit_mb(16)
        .build();
    let mut sandbox = Sandbox::new(config);

    // Example 1: blocked pattern
    println!("--- Test 1: Blocked pattern ---");
    match run(&mut sandbox, "require('fs').readFileSync('/etc/passwd')").await {
        Err(SandboxError::BlockedPattern(pattern)) => {
            println!("Rejected before execution, matched: {}", pattern)
        }
        other => println!("Unexpected: {:?}", other),
    }

    // Example 2: script error
    println!("\n--- Test 2: Script error ---");
    match run(&mut sandbox, "null.title").await {
        Err(SandboxError::ExecutionError(message)) => println!("Script failed: {}", message),
        other => println!("Unexpected: {:?}", other),
    }

    // Example 3: timeout
    println!("\n--- Test 3: Timeout ---");
    match run(&mut sandbox, "while (true) {}").await {
        Err(e) if e.is_timeout() => println!("Stopped: {}", e),
        other => println!("Unexpected: {:?}", other),
    }

    // Example 4: memory limit
    println!("\n--- Test 4: Memory limit ---");
    let code = "const parts = []; while (true) { parts.push('x'.repeat(1000) + parts.length) }";
    match run(&mut sandbox, code).await {
        Err(e) if e.is_memory_limit() => println!("Stopped: {}", e),
        other => println!("Unexpected: {:?}", other),
    }

    // The sandbox is still usable after limit faults
    println!("\n--- Test 5: Recovery ---");
    println!("result: {}", run(&mut sandbox, "'still alive'").await?);

    // Example 6: lifecycle misuse
    println!("\n--- Test 6: Lifecycle ---");
    sandbox.initialize()?;
    if let Err(e) = sandbox.configure(SandboxOptions::default()) {
        println!("configure while initialized: {} ({:?})", e, e.kind());
    }
    sandbox.dispose();
    match run(&mut sandbox, "1").await {
        Err(e) if e.kind() == ErrorKind::NotInitialized => println!("after dispose: {}", e),
        other => println!("Unexpected: {:?}", other),
    }
    sandbox.reset()?;
    println!("after reset: {}", run(&mut sandbox, "1 + 1").await?);

    Ok(())
}
