//! # Gold Page Scrape Test
//!
//! Fetches the live gold page once through lib_common, parses it and prints
//! what came out. Exits with status 1 when the page cannot be fetched.

use clap::Parser;
use lib_common::markets::gold::parse;
use lib_common::retrieve::page_fetch::{HttpPageFetcher, MarkupFetcher};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "One-shot fetch and parse of the gold price page", long_about = None)]
struct Args {
    /// Page to fetch
    #[clap(long, default_value = "https://anlikaltinfiyatlari.com/altin/bursa")]
    url: String,

    /// Request timeout in seconds
    #[clap(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Pause in milliseconds before reading the body
    #[clap(long, default_value_t = 0)]
    settle_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // // Statement: Build the same fetcher the server uses
    let fetcher = HttpPageFetcher::new(
        Duration::from_secs(args.timeout_secs),
        Duration::from_millis(args.settle_ms),
    )?;

    println!("[*] Requesting {} ...", args.url);

    let markup = match fetcher.fetch_raw_markup(&args.url).await {
        Ok(markup) => markup,
        Err(e) => {
            eprintln!("\n[ERROR] Fetch failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    };

    let records = parse(&markup);
    println!("[INFO] {} bytes received, {} records parsed", markup.len(), records.len());

    match records.first() {
        Some(first) => {
            println!("\n[SUCCESS] First record:");
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(first)?);
            println!("-----------------------------------------------");
        }
        None => println!("[WARN] No records found. The page layout may have changed."),
    }

    Ok(())
}
