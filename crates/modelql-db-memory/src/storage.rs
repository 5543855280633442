use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use modelql_core::Record;
use modelql_storage::{EntityStorage, QuerySpec, StorageError, values_equal};
use serde_json::Value;
use tracing::{debug, trace};

use crate::eval::{Snapshot, annotate, matches_filter, sort_records};

/// Default identifier column for tables registered without one.
const DEFAULT_IDENTIFIER: &str = "id";

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) identifier: String,
    pub(crate) rows: Vec<Record>,
}

/// In-memory storage backend.
///
/// Tables live in a `DashMap` keyed by entity name; rows keep insertion
/// order, which is the natural order of unordered queries. Every executed
/// [`QuerySpec`] is appended to a query log so callers can inspect what the
/// planner asked for.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: DashMap<String, Table>,
    query_log: Mutex<Vec<QuerySpec>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers a table with a non-default identifier column.
    pub fn register_table(&self, entity: impl Into<String>, identifier: impl Into<String>) {
        let identifier = identifier.into();
        self.tables
            .entry(entity.into())
            .and_modify(|t| t.identifier = identifier.clone())
            .or_insert_with(|| Table {
                identifier,
                rows: Vec::new(),
            });
    }

    /// Inserts a row, replacing any row with the same identifier.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidQuery` if the value is not an object or
    /// lacks the identifier column.
    pub fn insert(&self, entity: &str, value: Value) -> Result<(), StorageError> {
        let Value::Object(record) = value else {
            return Err(StorageError::invalid_query(format!(
                "{entity} rows must be JSON objects"
            )));
        };

        let mut table = self.tables.entry(entity.to_string()).or_insert_with(|| Table {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            rows: Vec::new(),
        });
        let id = record.get(&table.identifier).cloned().ok_or_else(|| {
            StorageError::invalid_query(format!(
                "{entity} row is missing identifier column {}",
                table.identifier
            ))
        })?;

        let identifier = table.identifier.clone();
        match table
            .rows
            .iter_mut()
            .find(|row| row.get(&identifier).is_some_and(|v| values_equal(v, &id)))
        {
            Some(existing) => *existing = record,
            None => table.rows.push(record),
        }
        trace!(entity = %entity, "Row stored");
        Ok(())
    }

    /// Inserts many rows.
    pub fn insert_many(
        &self,
        entity: &str,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<(), StorageError> {
        for value in values {
            self.insert(entity, value)?;
        }
        Ok(())
    }

    /// Removes a row by identifier, returning whether it existed.
    pub fn remove(&self, entity: &str, id: &Value) -> bool {
        let Some(mut table) = self.tables.get_mut(entity) else {
            return false;
        };
        let identifier = table.identifier.clone();
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !row.get(&identifier).is_some_and(|v| values_equal(v, id)));
        before != table.rows.len()
    }

    /// Number of rows stored for an entity.
    pub fn len(&self, entity: &str) -> usize {
        self.tables.get(entity).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, entity: &str) -> bool {
        self.len(entity) == 0
    }

    /// Drains the log of executed queries (fetch and count).
    pub fn take_query_log(&self) -> Vec<QuerySpec> {
        self.query_log
            .lock()
            .map(|mut log| std::mem::take(&mut *log))
            .unwrap_or_default()
    }

    fn log(&self, spec: &QuerySpec) {
        if let Ok(mut log) = self.query_log.lock() {
            log.push(spec.clone());
        }
    }

    /// Copies one table out of the map so no shard lock is held while
    /// evaluating relationship hops against other tables.
    pub(crate) fn table(&self, entity: &str) -> Option<Table> {
        self.tables.get(entity).map(|t| t.value().clone())
    }

    fn matching_rows(&self, spec: &QuerySpec) -> Result<(Vec<Record>, Snapshot<'_>), StorageError> {
        let table = self
            .table(&spec.entity)
            .ok_or_else(|| StorageError::unknown_entity(&spec.entity))?;
        let mut snapshot = Snapshot::new(self);
        let rows = match &spec.filter {
            Some(filter) => table
                .rows
                .into_iter()
                .filter(|row| matches_filter(&mut snapshot, row, filter))
                .collect(),
            None => table.rows,
        };
        Ok((rows, snapshot))
    }
}

#[async_trait]
impl EntityStorage for InMemoryStorage {
    async fn get_by_id(&self, entity: &str, id: &Value) -> Result<Option<Record>, StorageError> {
        let table = self
            .table(entity)
            .ok_or_else(|| StorageError::unknown_entity(entity))?;
        Ok(table.rows.into_iter().find(|row| {
            row.get(&table.identifier)
                .is_some_and(|v| values_equal(v, id))
        }))
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<Record>, StorageError> {
        self.log(spec);
        if !spec.eager_load.is_empty() {
            debug!(
                entity = %spec.entity,
                hints = spec.eager_load.len(),
                "Eager-load hints accepted (rows are already resident)"
            );
        }

        let (mut rows, mut snapshot) = self.matching_rows(spec)?;
        for annotation in &spec.annotations {
            annotate(&mut snapshot, &mut rows, annotation);
        }
        sort_records(&mut rows, &spec.order_by);

        let rows: Vec<Record> = match spec.limit {
            Some(limit) => rows.into_iter().skip(spec.offset).take(limit).collect(),
            None => rows.into_iter().skip(spec.offset).collect(),
        };
        debug!(entity = %spec.entity, returned = rows.len(), "In-memory fetch");
        Ok(rows)
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64, StorageError> {
        self.log(spec);
        let (rows, _) = self.matching_rows(spec)?;
        Ok(rows.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Index of tables loaded during one query.
pub(crate) type TableCache = HashMap<String, Option<Table>>;
