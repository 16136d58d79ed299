//! Prepared statements and the per-connection statement cache.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use crate::protocol::backend::RowDescription;
use crate::protocol::types::{FormatCode, Oid};
use crate::types::registry;

/// One result column, as reported by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_oid: Oid,
    /// Fixed size in bytes, or negative for variable-length types
    pub type_size: i16,
    pub type_modifier: i32,
    /// Wire format of this column's values
    pub format: FormatCode,
}

impl ColumnDescription {
    pub(crate) fn from_row_description(desc: &RowDescription<'_>) -> Vec<Self> {
        desc.fields()
            .iter()
            .map(|field| Self {
                name: field.name.to_string(),
                type_oid: field.type_oid(),
                type_size: field.type_size(),
                type_modifier: field.type_modifier(),
                format: field.format(),
            })
            .collect()
    }
}

/// A statement parsed on the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name; empty for the unnamed statement
    pub name: String,
    pub query: String,
    /// Parameter types, as resolved by the server
    pub param_oids: Vec<Oid>,
    /// `None` if the statement returns no rows
    pub columns: Option<Vec<ColumnDescription>>,
}

impl PreparedStatement {
    /// Result format to request for each column.
    pub fn result_formats(&self) -> Vec<FormatCode> {
        self.columns
            .iter()
            .flatten()
            .map(|column| registry::result_format(column.type_oid))
            .collect()
    }

    /// Column oids, for comparison against a later RowDescription.
    pub fn column_oids(&self) -> Vec<Oid> {
        self.columns
            .iter()
            .flatten()
            .map(|column| column.type_oid)
            .collect()
    }
}

/// Statements are keyed by translated query text and the oids of the
/// parameters bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    query: String,
    param_oids: Vec<Oid>,
}

impl StatementKey {
    fn new(query: &str, param_oids: &[Oid]) -> Self {
        Self {
            query: query.to_string(),
            param_oids: param_oids.to_vec(),
        }
    }
}

/// LRU cache of named statements.
///
/// Statements pushed out of the cache are queued for Close; the connection
/// sends those Close messages in front of its next request.
pub struct StatementCache {
    entries: Option<LruCache<StatementKey, PreparedStatement>>,
    counter: u64,
    pending_close: Vec<String>,
}

impl StatementCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            counter: 0,
            pending_close: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh statement name, unique on this connection.
    pub fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("zc_stmt_{}", self.counter)
    }

    pub fn get(&mut self, query: &str, param_oids: &[Oid]) -> Option<&PreparedStatement> {
        self.entries.as_mut()?.get(&StatementKey::new(query, param_oids))
    }

    /// Cache a statement prepared for `param_oids`, which may differ from
    /// the oids the server resolved.
    pub fn insert(&mut self, param_oids: &[Oid], statement: PreparedStatement) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let key = StatementKey::new(&statement.query, param_oids);
        let name = statement.name.clone();
        if let Some((_, old)) = entries.push(key, statement)
            && old.name != name
        {
            debug!(statement = %old.name, "evicting cached statement");
            self.pending_close.push(old.name);
        }
    }

    /// Drop a statement the server rejected. It is closed on the next request.
    pub fn invalidate(&mut self, query: &str, param_oids: &[Oid]) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        if let Some(old) = entries.pop(&StatementKey::new(query, param_oids)) {
            debug!(statement = %old.name, "invalidating cached statement");
            self.pending_close.push(old.name);
        }
    }

    /// Record a new result shape for a cached statement.
    pub fn update_columns(
        &mut self,
        query: &str,
        param_oids: &[Oid],
        columns: Option<Vec<ColumnDescription>>,
    ) {
        if let Some(statement) = self
            .entries
            .as_mut()
            .and_then(|entries| entries.get_mut(&StatementKey::new(query, param_oids)))
        {
            debug!(statement = %statement.name, "result shape changed");
            statement.columns = columns;
        }
    }

    /// Names queued for Close.
    pub fn take_pending_close(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_close)
    }

    /// Forget every statement once the server has dropped them all, as
    /// after `DISCARD ALL`. Nothing is queued for Close.
    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.pending_close.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(cache: &mut StatementCache, query: &str) -> PreparedStatement {
        PreparedStatement {
            name: cache.next_name(),
            query: query.to_string(),
            param_oids: vec![23],
            columns: None,
        }
    }

    #[test]
    fn names_are_unique() {
        let mut cache = StatementCache::new(4);
        assert_eq!(cache.next_name(), "zc_stmt_1");
        assert_eq!(cache.next_name(), "zc_stmt_2");
    }

    #[test]
    fn keyed_by_query_and_param_oids() {
        let mut cache = StatementCache::new(4);
        let stmt = statement(&mut cache, "SELECT $1");
        cache.insert(&[23], stmt);
        assert!(cache.get("SELECT $1", &[23]).is_some());
        assert!(cache.get("SELECT $1", &[20]).is_none());
        assert!(cache.get("SELECT $2", &[23]).is_none());
    }

    #[test]
    fn eviction_queues_close() {
        let mut cache = StatementCache::new(2);
        for query in ["SELECT 1", "SELECT 2", "SELECT 3"] {
            let stmt = statement(&mut cache, query);
            cache.insert(&[], stmt);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("SELECT 1", &[]).is_none());
        assert_eq!(cache.take_pending_close(), vec!["zc_stmt_1".to_string()]);
        assert!(cache.take_pending_close().is_empty());
    }

    #[test]
    fn invalidation_queues_close() {
        let mut cache = StatementCache::new(2);
        let stmt = statement(&mut cache, "SELECT 1");
        cache.insert(&[], stmt);
        cache.invalidate("SELECT 1", &[]);
        assert!(cache.is_empty());
        assert_eq!(cache.take_pending_close(), vec!["zc_stmt_1".to_string()]);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = StatementCache::new(0);
        assert!(!cache.is_enabled());
        let stmt = statement(&mut cache, "SELECT 1");
        cache.insert(&[], stmt);
        assert!(cache.get("SELECT 1", &[]).is_none());
    }

    #[test]
    fn result_formats_follow_registry() {
        let column = |type_oid| ColumnDescription {
            name: "c".into(),
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        };
        let stmt = PreparedStatement {
            name: String::new(),
            query: "SELECT".into(),
            param_oids: vec![],
            columns: Some(vec![column(23), column(869)]),
        };
        assert_eq!(
            stmt.result_formats(),
            vec![FormatCode::Binary, FormatCode::Text]
        );
        assert_eq!(stmt.column_oids(), vec![23, 869]);
    }
}
