//! SQL text for the Zabbix MySQL schema, nothing more.

/// Source-side clock, as epoch seconds.
pub const CLOCK_QUERY: &str = "SELECT unix_timestamp() AS clock";

/// Shared FROM/JOIN clause resolving item keys and host names for a
/// history table.
fn base_clause(table: &str) -> String {
    format!(
        " FROM {table} AS hi \
         INNER JOIN items AS i ON hi.itemid = i.itemid \
         INNER JOIN hosts AS h USE INDEX (hosts_1) ON i.hostid = h.hostid \
         WHERE hi.itemid IN (SELECT DISTINCT itemid FROM items)"
    )
}

/// Windowed sample query: rows with clock strictly greater than the bound
/// placeholder.
pub fn window_query(table: &str) -> String {
    format!(
        "SELECT hi.clock, hi.value, h.host, i.key_{} AND hi.clock > ?",
        base_clause(table)
    )
}

/// Windowed sample query capped at a row limit placeholder.
pub fn window_query_with_limit(table: &str) -> String {
    format!("{} LIMIT ?", window_query(table))
}

/// Row count between two clock bounds (exclusive lower, inclusive upper).
pub fn count_query(table: &str) -> String {
    format!(
        "SELECT count(*) AS count{} AND hi.clock > ? AND hi.clock <= ?",
        base_clause(table)
    )
}
