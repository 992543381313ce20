//! Concurrent map primitives
//!
//! - **ShardedMap**: N shards, each behind its own lock, routed by a
//!   caller-supplied sharding function
//! - **LockedMap**: one lock for the whole map, for low-cardinality or
//!   rarely contended data
//!
//! The query path uses a `ShardedMap` as its merge sink. With one shard it
//! behaves exactly like a `LockedMap`; more shards only pay off once several
//! writers fill the same sink at the same time.

mod locked;
mod sharded;

pub use locked::LockedMap;
pub use sharded::{ShardFn, ShardedMap};
