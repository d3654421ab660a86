use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::catalog::schema::Schema;
use crate::common::types::{IndexOid, TableOid};
use crate::index::btree::{BPlusTreeIndex, BTreeError};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableError, TableHeap};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Index '{0}' already exists on table '{1}'")]
    IndexExists(String, String),

    #[error("Key column {0} out of range")]
    InvalidKeyColumn(usize),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

/// Metadata for one table.
pub struct TableInfo {
    pub name: String,
    pub oid: TableOid,
    pub schema: Schema,
    pub table: Arc<TableHeap>,
}

/// Metadata for one index.
pub struct IndexInfo {
    pub name: String,
    pub oid: IndexOid,
    pub table_name: String,
    /// Column of the table schema the index is keyed on.
    pub key_attr: usize,
    pub index: Arc<BPlusTreeIndex>,
}

struct CatalogInner {
    tables: HashMap<String, Arc<TableInfo>>,
    table_names_by_oid: HashMap<TableOid, String>,
    // table name -> index name -> info
    indexes: HashMap<String, HashMap<String, Arc<IndexInfo>>>,
    next_table_oid: TableOid,
    next_index_oid: IndexOid,
}

/// Name -> metadata mapping for tables and indexes.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    inner: Mutex<CatalogInner>,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            inner: Mutex::new(CatalogInner {
                tables: HashMap::new(),
                table_names_by_oid: HashMap::new(),
                indexes: HashMap::new(),
                next_table_oid: 0,
                next_index_oid: 0,
            }),
        }
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<TableInfo>, CatalogError> {
        let mut inner = self.inner.lock();
        if inner.tables.contains_key(name) {
            return Err(CatalogError::TableExists(name.to_string()));
        }

        let table = Arc::new(TableHeap::new(self.buffer_pool.clone())?);
        let oid = inner.next_table_oid;
        inner.next_table_oid += 1;

        let info = Arc::new(TableInfo {
            name: name.to_string(),
            oid,
            schema,
            table,
        });
        inner.tables.insert(name.to_string(), info.clone());
        inner.table_names_by_oid.insert(oid, name.to_string());
        inner.indexes.insert(name.to_string(), HashMap::new());

        debug!("created table '{}' (oid {})", name, oid);
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<TableInfo>> {
        self.inner.lock().tables.get(name).cloned()
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        let inner = self.inner.lock();
        let name = inner.table_names_by_oid.get(&oid)?;
        inner.tables.get(name).cloned()
    }

    /// Create an index keyed on one column and backfill it from the table's
    /// current rows.
    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_attr: usize,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        // Modest fan-outs keep multi-level trees reachable in tests while
        // staying well under page capacity.
        self.create_index_with_sizes(index_name, table_name, key_attr, 128, 128)
    }

    pub fn create_index_with_sizes(
        &self,
        index_name: &str,
        table_name: &str,
        key_attr: usize,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let mut inner = self.inner.lock();

        let table_info = inner
            .tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
        if key_attr >= table_info.schema.column_count() {
            return Err(CatalogError::InvalidKeyColumn(key_attr));
        }

        let table_indexes = inner.indexes.entry(table_name.to_string()).or_default();
        if table_indexes.contains_key(index_name) {
            return Err(CatalogError::IndexExists(
                index_name.to_string(),
                table_name.to_string(),
            ));
        }

        let index = Arc::new(BPlusTreeIndex::new(
            index_name,
            self.buffer_pool.clone(),
            leaf_max_size,
            internal_max_size,
        )?);

        // Backfill from existing rows.
        for entry in table_info.table.iter() {
            let (rid, tuple) = entry?;
            index.insert_entry(&tuple.value(key_attr), rid)?;
        }

        let oid = inner.next_index_oid;
        inner.next_index_oid += 1;

        let info = Arc::new(IndexInfo {
            name: index_name.to_string(),
            oid,
            table_name: table_name.to_string(),
            key_attr,
            index,
        });
        inner
            .indexes
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), info.clone());

        debug!("created index '{}' on '{}'", index_name, table_name);
        Ok(info)
    }

    pub fn get_index(&self, index_name: &str, table_name: &str) -> Option<Arc<IndexInfo>> {
        self.inner
            .lock()
            .indexes
            .get(table_name)?
            .get(index_name)
            .cloned()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.inner
            .lock()
            .indexes
            .get(table_name)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}
