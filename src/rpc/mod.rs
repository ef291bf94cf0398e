//! Thin RPC/CLI introspection surface (SPEC_FULL.md supplemental
//! features): masternode list, finality status of a block, current
//! settlement snapshot. Explicitly "the thin CLI excluded from the budget"
//! per spec.md §2 — not load-bearing for consensus, just observability.

pub mod handler;
pub mod server;

pub use handler::RpcHandler;
pub use server::RpcServer;
