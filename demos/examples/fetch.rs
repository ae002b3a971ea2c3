//! Fetches a USPTO assignment record twice and prints cache statistics.
//!
//! ```sh
//! RUST_LOG=ipcache=debug cargo run -p ipcache-demos --example fetch
//! ```

use ipcache::{Client, Source};
use ipcache_reqwest::ReqwestTransport;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ipcache=debug")),
        )
        .init();

    let client = Client::for_source(Source::UsptoAssignments)?.build(ReqwestTransport::new()?)?;
    let query = [("query", "10000000"), ("filter", "PatentNumber")];

    for round in 1..=2 {
        println!("=== Request {round} ===");
        match client
            .get("/patent-assignment-search/search", query)
            .await
        {
            Ok(response) => {
                println!("Status: {}", response.status);
                println!("Cache: {}", response.cache_status.as_str());
                println!("Body length: {} bytes", response.body.len());
            }
            Err(error) if error.is_not_found() => println!("No assignment found"),
            Err(error) => println!("Request failed ({}): {error}", error.kind()),
        }
    }

    let stats = client.cache_stats().await?;
    println!("\n=== Cache ===");
    println!("Entries: {}", stats.entry_count);
    println!("Hit rate: {:.1}%", stats.hit_rate());
    println!("Size: {:.3} MB", stats.size_mb());
    if let Some(location) = &stats.location {
        println!("File: {}", location.display());
    }

    client.shutdown().await?;
    Ok(())
}
