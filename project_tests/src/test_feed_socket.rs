//! # Gold Feed WebSocket Probe
//!
//! Connects to a running `server_gold`, prints the size and first item of
//! every `gold-update` frame, and disconnects after a fixed time.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Prints gold-update frames from the live feed", long_about = None)]
struct Args {
    /// WebSocket endpoint of the feed
    #[clap(long, default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    /// Seconds to stay connected
    #[clap(short, long, default_value_t = 60)]
    seconds: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateFrame {
    #[serde(rename = "type")]
    msg_type: String,
    data: Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("[*] Connecting to {} for {}s ...", args.url, args.seconds);
    let (mut ws, _) = connect_async(args.url.as_str()).await?;
    println!("[INFO] Connected.");

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    let mut frames = 0usize;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("[INFO] Time is up after {} updates. Disconnecting.", frames);
                break;
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<UpdateFrame>(text.as_str()) {
                            Ok(update) if update.msg_type == "gold-update" => {
                                frames += 1;
                                println!(
                                    "[{}] {} items at {}",
                                    frames,
                                    update.data.len(),
                                    chrono::Local::now().format("%H:%M:%S")
                                );
                                if let Some(first) = update.data.first() {
                                    println!("    first: {}", first);
                                }
                            }
                            Ok(other) => println!("[WARN] Unexpected message type: {}", other.msg_type),
                            Err(e) => eprintln!("[ERROR] Undecodable frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        println!("[INFO] Server closed the connection: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("[ERROR] Connection error: {}", e);
                        std::process::exit(1);
                    }
                    None => {
                        println!("[INFO] Stream ended.");
                        return Ok(());
                    }
                }
            }
        }
    }

    ws.send(Message::Close(None)).await?;
    Ok(())
}
