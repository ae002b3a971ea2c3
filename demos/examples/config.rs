//! Builds a client from YAML and walks through the cache management surface.
//!
//! ```sh
//! cargo run -p ipcache-demos --example config
//! ```

use std::time::Duration;

use ipcache::{Client, ClientConfig};
use ipcache_reqwest::ReqwestTransport;

const CONFIG: &str = r#"
name: google_patents
base_url: https://patents.google.com
ttl: 12h
timeout: 20s
rate_limit:
  capacity: 2
  refill_per_second: 0.2
retry:
  max_retries: 2
  base_delay: 500ms
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("ipcache=info").init();

    let config = ClientConfig::from_yaml(CONFIG)?;
    println!("Cache directory: {}", config.resolved_cache_dir().display());

    let transport = ReqwestTransport::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let client = Client::from_config(config, transport)?;

    for patent in ["US9000000B2", "US9000001B2"] {
        let response = client.get(&format!("/patent/{patent}/en"), [("oq", patent)]).await?;
        println!(
            "{patent}: HTTP {} ({}), {} bytes",
            response.status,
            response.cache_status.as_str(),
            response.body.len()
        );
    }

    let stats = client.cache_stats().await?;
    println!("Entries: {}, hit rate {:.1}%", stats.entry_count, stats.hit_rate());

    let invalidated = client.cache_invalidate(r"/patent/US9000000B2/").await?;
    println!("Invalidated {invalidated} entries");

    let expired = client
        .cache_clear_expired(Some(Duration::from_secs(3600)))
        .await?;
    println!("Removed {expired} entries older than an hour");

    let cleared = client.cache_clear().await?;
    println!("Cleared {cleared} remaining entries");

    client.shutdown().await?;
    Ok(())
}
