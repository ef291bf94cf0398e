//! Request dispatch for the introspection RPC surface.

use crate::finality::aggregator::FinalityAggregator;
use crate::finality::enforcement::FinalityEnforcer;
use crate::masternode_registry::MasternodeRegistry;
use crate::storage::{CommitParticipant, Stores};
use crate::types::Hash256;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RpcHandler {
    registry: Arc<MasternodeRegistry>,
    stores: Arc<Stores>,
    aggregator: Arc<FinalityAggregator>,
    enforcer: Arc<FinalityEnforcer>,
}

impl RpcHandler {
    pub fn new(
        registry: Arc<MasternodeRegistry>,
        stores: Arc<Stores>,
        aggregator: Arc<FinalityAggregator>,
        enforcer: Arc<FinalityEnforcer>,
    ) -> Self {
        Self {
            registry,
            stores,
            aggregator,
            enforcer,
        }
    }

    /// `getmasternodes`: every masternode the registry currently knows
    /// about (operator-centric view, §9).
    pub fn list_masternodes(&self) -> Value {
        let records: Vec<Value> = self
            .registry
            .list_at()
            .into_iter()
            .map(|r| {
                json!({
                    "mn_id": hex::encode(r.mn_id),
                    "operator_pubkey": hex::encode(r.operator_pubkey),
                    "pose_banned": r.pose_banned,
                    "penalty_score": r.penalty_score,
                    "confirmed": r.confirmation_height.is_some(),
                })
            })
            .collect();
        json!({ "masternodes": records })
    }

    /// `getfinalitystatus <block_hash_hex>`: signature count and whether the
    /// block has reached finality.
    pub fn finality_status(&self, block_hash: Hash256) -> Result<Value, String> {
        let record = self
            .aggregator
            .record_for(&block_hash)
            .map_err(|e| e.to_string())?;
        let is_final = self.enforcer.is_final(
            record.as_ref().map(|r| r.height).unwrap_or_default(),
        ) && self.enforcer.final_hash_at(
            record.as_ref().map(|r| r.height).unwrap_or_default(),
        ) == Some(block_hash);
        Ok(json!({
            "block_hash": hex::encode(block_hash),
            "signature_count": record.as_ref().map(|r| r.count()).unwrap_or(0),
            "height": record.as_ref().map(|r| r.height),
            "is_final": is_final,
        }))
    }

    /// `getsettlementsnapshot <height>`: the committed A5/A6 figures as of
    /// `height`, or the latest known snapshot if `height` is `None`.
    pub fn settlement_snapshot(&self, height: Option<u64>) -> Result<Value, String> {
        let height = match height {
            Some(h) => h,
            None => self
                .stores
                .settlement
                .best_block_height()
                .map_err(|e| e.to_string())?
                .unwrap_or(0),
        };
        let snapshot = self
            .stores
            .settlement
            .get_snapshot(height)
            .map_err(|e| e.to_string())?;
        match snapshot {
            Some(s) => Ok(json!({
                "height": s.height,
                "m0_vaulted": s.m0_vaulted,
                "m1_supply": s.m1_supply,
                "m0_shielded": s.m0_shielded,
                "m0_total_supply": s.m0_total_supply,
                "block_hash": hex::encode(s.block_hash),
            })),
            None => Err(format!("no settlement snapshot at height {height}")),
        }
    }
}
