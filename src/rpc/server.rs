//! Raw-TCP JSON-RPC server for the introspection surface.
//!
//! One line-delimited JSON request per connection turn, the way the
//! teacher's alternative TCP RPC server works — no HTTP framework pulled in
//! for what's explicitly a thin, non-load-bearing surface.

use super::handler::RpcHandler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub async fn bind(addr: &str, handler: Arc<RpcHandler>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    pub async fn run(&self) -> std::io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "rpc server listening");
        loop {
            let (socket, _addr) = self.listener.accept().await?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(socket, handler).await {
                    warn!(error = %e, "rpc connection error");
                }
            });
        }
    }

    async fn handle_connection(
        socket: tokio::net::TcpStream,
        handler: Arc<RpcHandler>,
    ) -> std::io::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(req) => dispatch(&handler, req),
                Err(e) => RpcResponse {
                    result: None,
                    error: Some(format!("malformed request: {e}")),
                },
            };
            let mut bytes = serde_json::to_vec(&response).unwrap_or_default();
            bytes.push(b'\n');
            if let Err(e) = write_half.write_all(&bytes).await {
                error!(error = %e, "rpc write failed");
                break;
            }
        }
        Ok(())
    }
}

fn dispatch(handler: &RpcHandler, req: RpcRequest) -> RpcResponse {
    match req.method.as_str() {
        "getmasternodes" => RpcResponse {
            result: Some(handler.list_masternodes()),
            error: None,
        },
        "getfinalitystatus" => {
            let hash_hex = req.params.get("block_hash").and_then(Value::as_str);
            match hash_hex.and_then(|h| hex::decode(h).ok()) {
                Some(bytes) if bytes.len() == 32 => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&bytes);
                    match handler.finality_status(hash) {
                        Ok(v) => RpcResponse {
                            result: Some(v),
                            error: None,
                        },
                        Err(e) => RpcResponse {
                            result: None,
                            error: Some(e),
                        },
                    }
                }
                _ => RpcResponse {
                    result: None,
                    error: Some("missing or malformed block_hash param".to_string()),
                },
            }
        }
        "getsettlementsnapshot" => {
            let height = req.params.get("height").and_then(Value::as_u64);
            match handler.settlement_snapshot(height) {
                Ok(v) => RpcResponse {
                    result: Some(v),
                    error: None,
                },
                Err(e) => RpcResponse {
                    result: None,
                    error: Some(e),
                },
            }
        }
        other => RpcResponse {
            result: None,
            error: Some(format!("unknown method: {other}")),
        },
    }
}
