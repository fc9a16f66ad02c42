//! Controller-side commands against a running relay

use anyhow::{bail, Context, Result};
use neurone_client::ControllerClient;
use neurone_core::{ExecutionContext, RemoteTool, Tool};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::server::config::AppConfig;

/// Timeout and retry settings for `neurone call`
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

async fn connect(config: &AppConfig) -> Result<ControllerClient> {
    let client = ControllerClient::new(config.client.clone());
    client
        .connect()
        .await
        .with_context(|| format!("Failed to reach relay at {}", config.client.url()))?;
    Ok(client)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn status(config: &AppConfig) -> Result<()> {
    let client = connect(config).await?;
    let status = client.get_status().await?;
    print_json(&status)?;
    client.close().await;
    Ok(())
}

pub async fn tools(config: &AppConfig) -> Result<()> {
    let client = connect(config).await?;
    let tools = client.list_tools().await?;
    if !tools.extension_connected {
        eprintln!("No agent connected");
    }
    for tool in &tools.tools {
        println!("{tool}");
    }
    client.close().await;
    Ok(())
}

pub async fn call(config: &AppConfig, name: &str, args: &str, options: CallOptions) -> Result<()> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    if !args.is_object() {
        bail!("--args must be a JSON object");
    }

    let client = Arc::new(connect(config).await?);
    let ctx = ExecutionContext::new()
        .with_transport(client.clone())
        .with_timeout_ms(options.timeout_ms)
        .with_retry(options.retry_count, options.retry_delay_ms);

    let result = RemoteTool::named(name).execute_with_retry(args, &ctx).await;
    print_json(&result)?;
    client.close().await;

    match result.error() {
        Some(error) => bail!("{name} failed: {error}"),
        None => Ok(()),
    }
}

pub async fn wait(config: &AppConfig, timeout_secs: u64) -> Result<()> {
    let client = connect(config).await?;
    client
        .wait_for_extension(Duration::from_secs(timeout_secs))
        .await?;
    println!("Agent connected: {}", client.tools().join(", "));
    client.close().await;
    Ok(())
}
