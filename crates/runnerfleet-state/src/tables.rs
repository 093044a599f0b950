//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Pool records (spec + status) keyed by pool name.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Worker pods keyed by `{pool}:{pod_name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");
