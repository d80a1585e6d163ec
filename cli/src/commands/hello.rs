use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;

/// Unprotected `GET /hello`, no attestation and no dynamic pin
pub async fn run(host: &str, timeout: Duration) -> Result<()> {
    let url = format!("https://{}/hello", host);
    println!("{}", format!("Saying hello to {}...", url).cyan());

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    if !status.is_success() {
        anyhow::bail!("Server responded with {}: {}", status, body.trim());
    }

    println!("\n{}", body.trim().green());
    Ok(())
}
