//! redb table definitions for the history store.

use redb::TableDefinition;

/// Deploy records keyed by a monotonically increasing sequence number.
/// Iterating in reverse yields newest first.
pub const HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("deploy_history");
