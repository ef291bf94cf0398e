//! C9 — Sync-State Gate (§4.9).
//!
//! A single boolean the scheduler (§4.2) and finality aggregator (§4.5)
//! consult before acting on local chain state: is this node's view of the
//! chain fresh enough to trust for production or voting? Holds no chain
//! state itself — every call takes the measurements it needs and returns a
//! fresh verdict, since "synced" can flip from one tick to the next as peers
//! advance or go quiet.

use crate::constants::NetworkParams;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncGateError {
    #[error("best known peer header is {lead} blocks ahead, exceeding tolerance {tolerance}")]
    TooFarBehind { lead: u64, tolerance: u64 },
}

/// Inputs to one sync-state evaluation. All heights/timestamps are the
/// caller's current view; nothing here is cached across calls.
#[derive(Debug, Clone, Copy)]
pub struct SyncInputs {
    pub local_height: u64,
    pub local_tip_timestamp: i64,
    /// Best header height known from any peer; `None` if no peer has replied yet.
    pub best_peer_header_height: Option<u64>,
    /// Whether a block/header download is currently in flight.
    pub downloading: bool,
    /// Height of the most recent block that reached finality (§4.6), if any.
    pub last_finalized_height: Option<u64>,
    pub now: i64,
}

/// Whether recent finality is recent enough, by itself, to call the node
/// synced even if peer comparison can't (§4.9's short-window exception).
const RECENT_FINALITY_WINDOW_SECS: i64 = 600;

/// Evaluate sync state (§4.9). Returns `Ok(true)` if synced, `Ok(false)` if
/// not-yet-determined-synced (e.g. still downloading with peers ahead by an
/// acceptable margin), and `Err` if peers are far enough ahead that this
/// node must not produce or vote.
pub fn is_synced(inputs: &SyncInputs, params: &NetworkParams) -> Result<bool, SyncGateError> {
    if inputs.local_height <= params.bootstrap_height {
        return Ok(true);
    }

    // Recent-finality short-circuit must win over the peer-lead disqualification
    // below (§4.9): finality progress is itself evidence of sync, even while a
    // peer comparison would otherwise reject this node as too far behind.
    if let Some(finalized_height) = inputs.last_finalized_height {
        if finalized_height + 1 >= inputs.local_height {
            let since_tip = inputs.now - inputs.local_tip_timestamp;
            if since_tip.abs() < RECENT_FINALITY_WINDOW_SECS {
                return Ok(true);
            }
        }
    }

    if let Some(peer_height) = inputs.best_peer_header_height {
        if peer_height > inputs.local_height {
            let lead = peer_height - inputs.local_height;
            if lead > params.peer_height_tolerance {
                // Cold-start override: if our own tip is ancient, a large
                // peer lead is expected and not itself disqualifying — the
                // node is simply behind, not byzantine-faulty. It still
                // isn't "synced" yet, just not an error.
                let tip_age = inputs.now - inputs.local_tip_timestamp;
                if tip_age > params.stale_chain_timeout {
                    return Ok(false);
                }
                return Err(SyncGateError::TooFarBehind {
                    lead,
                    tolerance: params.peer_height_tolerance,
                });
            }
        }
    }

    if inputs.downloading {
        return Ok(false);
    }

    let tip_age = inputs.now - inputs.local_tip_timestamp;
    let header_within_one = inputs
        .best_peer_header_height
        .map(|h| h <= inputs.local_height + 1)
        .unwrap_or(true);

    Ok(header_within_one && tip_age <= 2 * params.target_spacing)
}
