// CLI commands: thin client over the Crucible HTTP API
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

const TERMINAL_STATUSES: &[&str] = &[
    "completed",
    "compile_error",
    "runtime_error",
    "timeout",
    "internal_error",
];

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

async fn get_json(url: &str) -> Result<Value> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("response was not valid JSON")?;

    if !status.is_success() {
        bail!(
            "{} returned {}: {}",
            url,
            status,
            body.get("error").and_then(Value::as_str).unwrap_or("unknown error")
        );
    }
    Ok(body)
}

pub async fn submit(
    server: &str,
    language: &str,
    file: &str,
    stdin_file: Option<&str>,
    timeout_ms: Option<u64>,
    memory_limit_mib: Option<u64>,
    wait: bool,
) -> Result<()> {
    let source_code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read source file {file}"))?;

    let stdin = match stdin_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read stdin file {path}"))?,
        None => String::new(),
    };

    let mut payload = json!({
        "language": language,
        "source_code": source_code,
        "stdin": stdin,
    });
    if let Some(timeout_ms) = timeout_ms {
        payload["timeout_ms"] = json!(timeout_ms);
    }
    if let Some(memory_limit_mib) = memory_limit_mib {
        payload["memory_limit_mib"] = json!(memory_limit_mib);
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/submissions"))
        .json(&payload)
        .send()
        .await
        .context("submission request failed")?;

    let status = response.status();
    let body: Value = response.json().await.context("response was not valid JSON")?;

    if !status.is_success() {
        bail!(
            "submission rejected ({}): {}",
            status,
            serde_json::to_string_pretty(&body)?
        );
    }

    let job_id = body
        .get("job_id")
        .and_then(Value::as_str)
        .context("response is missing job_id")?
        .to_string();

    println!("job_id: {job_id}");

    if wait {
        let record = wait_for_terminal(server, &job_id).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    Ok(())
}

async fn wait_for_terminal(server: &str, job_id: &str) -> Result<Value> {
    loop {
        let record = get_json(&format!("{server}/submissions/{job_id}")).await?;
        let status = record
            .get("status")
            .and_then(Value::as_str)
            .context("record is missing status")?;

        if is_terminal(status) {
            return Ok(record);
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

pub async fn status(server: &str, job_id: &str) -> Result<()> {
    let record = get_json(&format!("{server}/submissions/{job_id}")).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn health(server: &str) -> Result<()> {
    let body = get_json(&format!("{server}/health")).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn languages(server: &str) -> Result<()> {
    let body = get_json(&format!("{server}/languages")).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_detection() {
        assert!(is_terminal("completed"));
        assert!(is_terminal("compile_error"));
        assert!(is_terminal("runtime_error"));
        assert!(is_terminal("timeout"));
        assert!(is_terminal("internal_error"));

        assert!(!is_terminal("pending"));
        assert!(!is_terminal("running"));
        assert!(!is_terminal(""));
    }
}
