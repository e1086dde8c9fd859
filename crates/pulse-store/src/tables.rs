//! redb table definitions for the transactional backend.
//!
//! Gauges and counters are separate tables keyed by metric id, which keeps
//! the two key-spaces apart without composite keys.

use redb::TableDefinition;

/// Schema bookkeeping, e.g. `schema_version`.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Current gauge readings keyed by metric id.
pub const GAUGES: TableDefinition<&str, f64> = TableDefinition::new("gauges");

/// Running counter sums keyed by metric id.
pub const COUNTERS: TableDefinition<&str, i64> = TableDefinition::new("counters");

/// Key in [`META`] holding the applied schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";
