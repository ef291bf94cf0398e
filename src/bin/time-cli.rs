//! Thin CLI client for the raw-TCP JSON-RPC introspection surface.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "time-cli")]
#[command(about = "Introspection client for the consensus node's RPC surface", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:24101")]
    rpc_addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every masternode the registry currently knows about.
    Masternodelist,
    /// Signature count and finality status of a block.
    Finalitystatus {
        block_hash: String,
    },
    /// Current (or historical) settlement snapshot.
    Settlementsnapshot {
        height: Option<u64>,
    },
}

async fn call(addr: &str, method: &str, params: Value) -> Result<Value, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = json!({ "method": method, "params": params });
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    stream.write_all(&line).await?;

    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    Ok(serde_json::from_str(&response_line)?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (method, params) = match &args.command {
        Commands::Masternodelist => ("getmasternodes", json!({})),
        Commands::Finalitystatus { block_hash } => {
            ("getfinalitystatus", json!({ "block_hash": block_hash }))
        }
        Commands::Settlementsnapshot { height } => {
            ("getsettlementsnapshot", json!({ "height": height }))
        }
    };

    match call(&args.rpc_addr, method, params).await {
        Ok(response) => println!("{}", serde_json::to_string_pretty(&response).unwrap()),
        Err(e) => {
            eprintln!("rpc call failed: {e}");
            std::process::exit(1);
        }
    }
}
