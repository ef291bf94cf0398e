//! Finality: signature aggregation (C5), enforcement against reorgs (C6),
//! and light-client proof serialization/verification (C10). See §4.5, §4.6
//! and §4.10.

pub mod aggregator;
pub mod enforcement;
pub mod proof;
