use anyhow::{Context, Result};
use attested_executor::pinning::{decode_pin, pin_fingerprint};
use attested_executor::{AttestationProvider, LocalDevProvider};
use colored::Colorize;
use std::sync::Arc;

pub async fn run(provider: Arc<LocalDevProvider>, host: &str) -> Result<()> {
    println!("{}", format!("Fetching token and pin for {}...", host).cyan());

    let hostname = host.to_string();
    let fetch_provider = provider.clone();
    let fetch = tokio::task::spawn_blocking(move || fetch_provider.fetch_token_and_wait(&hostname))
        .await
        .context("Token fetch task failed")?;

    if fetch.is_success() {
        println!("{}", "✓ Token issued".green());
    } else {
        println!("{}", "Token fetch failed".yellow());
    }

    let Some(pin) = provider.cached_pin(host) else {
        anyhow::bail!("No pin cached for {}", host);
    };

    let cert = decode_pin(&pin).context("Cached pin is not a certificate")?;

    println!("\n{}", "Pinned certificate:".green().bold());
    println!("Subject:  {}", cert.tbs_certificate.subject);
    println!("Issuer:   {}", cert.tbs_certificate.issuer);
    println!("SHA-256:  {}", pin_fingerprint(&pin)?);

    Ok(())
}
