#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! The consistent-hash ring that maps collection keys to shards and shards
//! to nodes, with rebalance planning on membership change.

pub mod error;
pub mod ring;
pub mod shard;

pub use error::{Result, RingError};
pub use ring::{HashRing, RebalanceMove, RebalancePlan, DEFAULT_REPLICATION_FACTOR, DEFAULT_VIRTUAL_NODES};
pub use shard::{NodeId, Shard, ShardId, ShardState};
