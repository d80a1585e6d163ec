use crate::shape::Shape;
use anyhow::{bail, Result};
use attested_executor::{AttestedRequestExecutor, RequestOutcome};
use colored::Colorize;
use reqwest::header::HeaderMap;

pub async fn run(executor: &AttestedRequestExecutor, host: &str) -> Result<()> {
    println!(
        "{}",
        format!("Requesting a shape from {} ({} transport)...", host, executor.transport_name()).cyan()
    );

    let outcome = executor.execute(host, "/shapes", HeaderMap::new()).await;

    match &outcome {
        RequestOutcome::Success { body, .. } => {
            let shape = Shape::from_body(&String::from_utf8_lossy(&body));
            println!("\n{} {}", shape.glyph(), shape.to_string().green().bold());
            if let Shape::Unknown(name) = &shape {
                println!("{}", format!("Server returned '{}'", name).yellow());
            }
            Ok(())
        }
        RequestOutcome::ServerRejected(status) | RequestOutcome::ServerError(status) => {
            let message = outcome.user_message().unwrap_or("Request failed");
            println!("\n{}", message.red().bold());
            bail!("Server responded with {}", status)
        }
        RequestOutcome::PinMismatch => {
            println!(
                "\n{}",
                "Server certificate does not match the attested pin".red().bold()
            );
            bail!("Dynamic pinning rejected {}", host)
        }
        RequestOutcome::TransportError(message) => {
            println!("\n{}", "Could not reach the shapes server".red().bold());
            bail!("{}", message)
        }
    }
}
