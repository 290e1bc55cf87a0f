//! Core Store implementation

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use tracing::{debug, info};

use crate::record::{Filter, FilterOp, ListOptions, Record};

/// File name of the SQLite database inside the store directory
pub const DB_FILE_NAME: &str = "planstore.db";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (collection, id, field),
    FOREIGN KEY (collection, id) REFERENCES records(collection, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_record_indexes_lookup ON record_indexes (collection, field, value);
CREATE INDEX IF NOT EXISTS idx_records_updated ON records (collection, updated_at);
";

const SELECT_RECORD_SQL: &str = "SELECT data FROM records WHERE collection = ?1 AND id = ?2";
const CHECK_RECORD_EXISTS_SQL: &str = "SELECT EXISTS(SELECT 1 FROM records WHERE collection = ?1 AND id = ?2)";
const INSERT_RECORD_SQL: &str = "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)";
const UPDATE_RECORD_SQL: &str = "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2";
const DELETE_RECORD_SQL: &str = "DELETE FROM records WHERE collection = ?1 AND id = ?2";
const DELETE_INDEXES_SQL: &str = "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2";
const INSERT_INDEX_SQL: &str = "INSERT INTO record_indexes (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)";

/// SQLite-backed document store
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).context(format!("Failed to create store directory {}", dir.display()))?;
        let db_path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path).context(format!("Failed to open database {}", db_path.display()))?;
        let store = Self {
            conn,
            path: Some(db_path),
        };
        store.initialize_schema()?;
        info!(path = %dir.display(), "Opened plan store");
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn, path: None };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Path of the backing database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", [])
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Insert a new record; fails if the id is already taken
    pub fn create<T: Record>(&mut self, record: T) -> Result<String> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(collection, %id, "create: called");

        if self.exists::<T>(&id)? {
            return Err(eyre!("Record already exists: {}/{}", collection, id));
        }

        let data = serde_json::to_string(&record).context("Failed to serialize record")?;
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        tx.execute(INSERT_RECORD_SQL, params![collection, id, data, record.updated_at()])
            .context("Failed to insert record")?;
        write_indexes(&tx, &record)?;
        tx.commit().context("Failed to commit transaction")?;

        Ok(id)
    }

    /// Fetch a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        debug!(collection = T::collection_name(), %id, "get: called");
        let data: Option<String> = self
            .conn
            .query_row(SELECT_RECORD_SQL, params![T::collection_name(), id], |row| row.get(0))
            .optional()
            .context("Failed to query record")?;

        data.map(|d| serde_json::from_str(&d).context(format!("Failed to deserialize record {}", id)))
            .transpose()
    }

    /// Replace an existing record; fails if it does not exist
    pub fn update<T: Record>(&mut self, record: T) -> Result<()> {
        let collection = T::collection_name();
        debug!(collection, id = %record.id(), "update: called");

        let data = serde_json::to_string(&record).context("Failed to serialize record")?;
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        let changed = tx
            .execute(UPDATE_RECORD_SQL, params![collection, record.id(), data, record.updated_at()])
            .context("Failed to update record")?;
        if changed == 0 {
            return Err(eyre!("Record not found: {}/{}", collection, record.id()));
        }
        write_indexes(&tx, &record)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(())
    }

    /// Insert or replace a record
    pub fn upsert<T: Record>(&mut self, record: T) -> Result<()> {
        if self.exists::<T>(record.id())? {
            self.update(record)
        } else {
            self.create(record).map(|_| ())
        }
    }

    /// Delete a record; returns whether anything was removed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        debug!(collection = T::collection_name(), %id, "delete: called");
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        tx.execute(DELETE_INDEXES_SQL, params![T::collection_name(), id])
            .context("Failed to delete indexes")?;
        let removed = tx
            .execute(DELETE_RECORD_SQL, params![T::collection_name(), id])
            .context("Failed to delete record")?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(removed > 0)
    }

    /// Check whether a record exists
    pub fn exists<T: Record>(&self, id: &str) -> Result<bool> {
        self.conn
            .query_row(CHECK_RECORD_EXISTS_SQL, params![T::collection_name(), id], |row| row.get(0))
            .context("Failed to check record existence")
    }

    /// List records matching all filters, newest first
    pub fn list<T: Record>(&self, filters: &[Filter], options: &ListOptions) -> Result<Vec<T>> {
        debug!(collection = T::collection_name(), filter_count = filters.len(), ?options, "list: called");
        let (where_sql, mut values) = build_where(T::collection_name(), filters);

        let mut sql = format!("SELECT r.data FROM records r WHERE {} ORDER BY r.updated_at DESC, r.id ASC", where_sql);
        // SQLite requires a LIMIT when OFFSET is present; -1 means unbounded
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", values.len() + 1, values.len() + 2));
        values.push(Value::Integer(options.limit.map(|l| l as i64).unwrap_or(-1)));
        values.push(Value::Integer(options.offset as i64));

        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .context("Failed to run list query")?;

        let mut records = Vec::new();
        for row in rows {
            let data = row.context("Failed to read row")?;
            records.push(serde_json::from_str(&data).context("Failed to deserialize record")?);
        }
        debug!(count = records.len(), "list: complete");
        Ok(records)
    }

    /// Count records matching all filters
    pub fn count<T: Record>(&self, filters: &[Filter]) -> Result<usize> {
        let (where_sql, values) = build_where(T::collection_name(), filters);
        let sql = format!("SELECT COUNT(*) FROM records r WHERE {}", where_sql);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to count records")?;
        Ok(count as usize)
    }

    /// Recompute the index rows for every record of a collection
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        let collection = T::collection_name();
        debug!(collection, "rebuild_indexes: called");
        let records: Vec<T> = self.list(&[], &ListOptions::default())?;

        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        tx.execute("DELETE FROM record_indexes WHERE collection = ?1", params![collection])
            .context("Failed to clear indexes")?;
        for record in &records {
            write_indexes(&tx, record)?;
        }
        tx.commit().context("Failed to commit transaction")?;

        info!(collection, count = records.len(), "Rebuilt indexes");
        Ok(records.len())
    }
}

fn write_indexes<T: Record>(tx: &Transaction<'_>, record: &T) -> Result<()> {
    let collection = T::collection_name();
    tx.execute(DELETE_INDEXES_SQL, params![collection, record.id()])
        .context("Failed to clear record indexes")?;
    for (field, value) in record.indexed_fields() {
        tx.execute(
            INSERT_INDEX_SQL,
            params![collection, record.id(), field, value.as_index_text()],
        )
        .context(format!("Failed to write index {}", field))?;
    }
    Ok(())
}

fn build_where(collection: &str, filters: &[Filter]) -> (String, Vec<Value>) {
    let mut clauses = vec!["r.collection = ?1".to_string()];
    let mut values = vec![Value::Text(collection.to_string())];

    for filter in filters {
        let field_param = values.len() + 1;
        let value_param = values.len() + 2;
        let (comparison, value) = match filter.op {
            FilterOp::Eq => ("i.value = ", filter.value.as_index_text()),
            FilterOp::Ne => ("i.value <> ", filter.value.as_index_text()),
            FilterOp::Contains => (
                "i.value LIKE ",
                format!("%{}%", escape_like(&filter.value.as_index_text())),
            ),
        };
        let escape = if filter.op == FilterOp::Contains { " ESCAPE '\\'" } else { "" };
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM record_indexes i WHERE i.collection = r.collection AND i.id = r.id \
             AND i.field = ?{} AND {}?{}{})",
            field_param, comparison, value_param, escape
        ));
        values.push(Value::Text(filter.field.clone()));
        values.push(Value::Text(value));
    }

    (clauses.join(" AND "), values)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
