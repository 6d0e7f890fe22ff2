//! SQLite-backed table store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::schema::{has_commits, initialize_layout, TABLE_FILE};
use super::types::{Field, RecordBatch, TableSchema, Value};
use super::{
    CommitInfo, CompactionMetrics, MergeMetrics, TableStore, TableUri, VacuumMetrics, WriteMode,
};
use crate::error::{Error, Result};

/// Configuration for [`SqliteTableStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// How long a writer waits on a locked table before reporting contention.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging so readers keep their snapshot during writes.
    pub wal: bool,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

impl SqliteStoreConfig {
    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

/// Table store keeping each table in its own SQLite database.
///
/// Rows are never updated in place: a write marks the superseded row
/// versions with the commit version that removed them and inserts new
/// versions. Readers see rows whose `removed_in` is unset. Vacuum is what
/// physically drops superseded versions.
#[derive(Debug, Clone, Default)]
pub struct SqliteTableStore {
    config: SqliteStoreConfig,
}

struct LiveRow {
    id: i64,
    position: i64,
    values: Vec<Value>,
}

impl SqliteTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SqliteStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    fn db_path(uri: &TableUri) -> PathBuf {
        uri.path().join(TABLE_FILE)
    }

    /// Run `f` against the table's database on the blocking pool.
    async fn with_conn<F, T>(
        &self,
        operation: &'static str,
        uri: &TableUri,
        create: bool,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        let uri = uri.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = open_table(&config, &uri, create)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("Table task failed: {}", e)))?
        .map_err(|e| e.in_operation(operation))
    }
}

fn open_table(config: &SqliteStoreConfig, uri: &TableUri, create: bool) -> Result<Connection> {
    let path = SqliteTableStore::db_path(uri);

    if create {
        std::fs::create_dir_all(uri.path())?;
    } else if !path.exists() {
        return Err(Error::transient("open", format!("no table at {}", uri)));
    }

    let conn = Connection::open(&path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if create {
        initialize_layout(&conn, config.wal)?;
    }
    Ok(conn)
}

/// Commits at or before this instant are past retention. Saturates at the
/// Unix epoch for retention windows chrono cannot represent.
fn retention_cutoff(now: DateTime<Utc>, retention_hours: u64) -> DateTime<Utc> {
    i64::try_from(retention_hours)
        .ok()
        .and_then(ChronoDuration::try_hours)
        .and_then(|retention| now.checked_sub_signed(retention))
        .map_or(DateTime::UNIX_EPOCH, |cutoff| cutoff.max(DateTime::UNIX_EPOCH))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn load_schema(conn: &Connection) -> Result<TableSchema> {
    let mut stmt = conn.prepare("SELECT name, data_type FROM table_fields ORDER BY position")?;
    let raw = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let fields = raw
        .into_iter()
        .map(|(name, data_type)| Ok(Field::new(name, data_type.parse()?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(TableSchema::new(fields))
}

fn write_schema(tx: &Transaction, schema: &TableSchema) -> Result<()> {
    tx.execute("DELETE FROM table_fields", [])?;
    for (position, field) in schema.fields().iter().enumerate() {
        tx.execute(
            "INSERT INTO table_fields (position, name, data_type) VALUES (?1, ?2, ?3)",
            params![position as i64, field.name, field.data_type.to_string()],
        )?;
    }
    Ok(())
}

fn encode_row(row: &[Value]) -> Result<String> {
    let cells: Vec<JsonValue> = row.iter().map(Value::to_json).collect();
    Ok(serde_json::to_string(&cells)?)
}

fn decode_row(schema: &TableSchema, data: &str) -> Result<Vec<Value>> {
    let cells: Vec<JsonValue> = serde_json::from_str(data)?;
    if cells.len() != schema.len() {
        return Err(Error::Internal(format!(
            "Stored row has {} cells, table has {} columns",
            cells.len(),
            schema.len()
        )));
    }
    schema
        .fields()
        .iter()
        .zip(&cells)
        .map(|(field, cell)| Value::from_json(field.data_type, cell))
        .collect()
}

fn live_rows(conn: &Connection, schema: &TableSchema) -> Result<Vec<LiveRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, position, data FROM rows WHERE removed_in IS NULL ORDER BY position, id",
    )?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|(id, position, data)| {
            Ok(LiveRow {
                id,
                position,
                values: decode_row(schema, &data)?,
            })
        })
        .collect()
}

fn next_version(tx: &Transaction) -> Result<u64> {
    let version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), -1) + 1 FROM commits",
        [],
        |row| row.get(0),
    )?;
    Ok(version as u64)
}

fn record_commit(
    tx: &Transaction,
    version: u64,
    operation: &str,
    rows_added: usize,
    rows_removed: usize,
) -> Result<()> {
    tx.execute(
        "INSERT INTO commits (version, operation, committed_at, rows_added, rows_removed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            version as i64,
            operation,
            timestamp(Utc::now()),
            rows_added as i64,
            rows_removed as i64,
        ],
    )?;
    Ok(())
}

fn insert_row(tx: &Transaction, position: i64, row: &[Value], version: u64) -> Result<()> {
    tx.execute(
        "INSERT INTO rows (position, data, added_in) VALUES (?1, ?2, ?3)",
        params![position, encode_row(row)?, version as i64],
    )?;
    Ok(())
}

fn retire_row(tx: &Transaction, id: i64, version: u64) -> Result<()> {
    tx.execute(
        "UPDATE rows SET removed_in = ?1 WHERE id = ?2",
        params![version as i64, id],
    )?;
    Ok(())
}

fn require_table(conn: &Connection, uri: &TableUri) -> Result<()> {
    if has_commits(conn) {
        Ok(())
    } else {
        Err(Error::transient("open", format!("table at {} has no commits", uri)))
    }
}

/// Key used to match rows by value. JSON text is stable per type.
fn key_of(value: &Value) -> String {
    value.to_json().to_string()
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn exists(&self, uri: &TableUri) -> Result<bool> {
        if !Self::db_path(uri).exists() {
            return Ok(false);
        }
        self.with_conn("exists", uri, false, |conn| Ok(has_commits(conn)))
            .await
    }

    async fn create(&self, uri: &TableUri, batch: &RecordBatch, mode: WriteMode) -> Result<()> {
        let batch = batch.clone();
        let uri_owned = uri.clone();

        self.with_conn("create", uri, true, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (version, operation, removed) = if has_commits(&tx) {
                if mode == WriteMode::Ignore {
                    debug!(uri = %uri_owned, "Table exists, create ignored");
                    return Ok(());
                }
                let version = next_version(&tx)?;
                let removed = tx.execute(
                    "UPDATE rows SET removed_in = ?1 WHERE removed_in IS NULL",
                    params![version as i64],
                )?;
                (version, "OVERWRITE", removed)
            } else {
                (0, "CREATE", 0)
            };

            write_schema(&tx, batch.schema())?;
            for (position, row) in batch.rows().iter().enumerate() {
                insert_row(&tx, position as i64, row, version)?;
            }
            record_commit(&tx, version, operation, batch.num_rows(), removed)?;
            tx.commit()?;

            debug!(
                uri = %uri_owned,
                version,
                operation,
                rows = batch.num_rows(),
                "Table written"
            );
            Ok(())
        })
        .await
    }

    async fn read(&self, uri: &TableUri) -> Result<RecordBatch> {
        let uri_owned = uri.clone();

        self.with_conn("read", uri, false, move |conn| {
            let tx = conn.transaction()?;
            require_table(&tx, &uri_owned)?;
            let schema = load_schema(&tx)?;
            let rows = live_rows(&tx, &schema)?
                .into_iter()
                .map(|r| r.values)
                .collect();
            tx.finish()?;
            RecordBatch::try_new(schema, rows)
        })
        .await
    }

    async fn append(&self, uri: &TableUri, batch: &RecordBatch) -> Result<()> {
        if batch.is_empty() {
            return Err(Error::empty_input("append"));
        }
        let batch = batch.clone();
        let uri_owned = uri.clone();

        self.with_conn("append", uri, false, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_table(&tx, &uri_owned)?;
            load_schema(&tx)?.validate_batch(&batch)?;

            let version = next_version(&tx)?;
            let start: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM rows",
                [],
                |row| row.get(0),
            )?;
            for (offset, row) in batch.rows().iter().enumerate() {
                insert_row(&tx, start + offset as i64, row, version)?;
            }
            record_commit(&tx, version, "APPEND", batch.num_rows(), 0)?;
            tx.commit()?;

            debug!(uri = %uri_owned, version, rows = batch.num_rows(), "Rows appended");
            Ok(())
        })
        .await
    }

    async fn merge_update(
        &self,
        uri: &TableUri,
        batch: &RecordBatch,
        match_column: &str,
    ) -> Result<MergeMetrics> {
        if batch.is_empty() {
            return Err(Error::empty_input("merge_update"));
        }
        let batch = batch.clone();
        let match_column = match_column.to_string();
        let uri_owned = uri.clone();

        self.with_conn("merge_update", uri, false, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_table(&tx, &uri_owned)?;
            let target = load_schema(&tx)?;

            // Source columns must be a typed subset of the target
            let names: Vec<String> = batch.schema().names();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let projected = target.project(&name_refs)?;
            projected.validate_batch(&batch)?;

            let source_key_idx = batch.schema().index_of(&match_column).ok_or_else(|| {
                Error::schema_mismatch(
                    format!("merge key '{}' missing from source", match_column),
                    target.names(),
                )
            })?;
            let target_key_idx = target.index_of(&match_column).ok_or_else(|| {
                Error::schema_mismatch(
                    format!("merge key '{}' missing from target", match_column),
                    target.names(),
                )
            })?;
            let column_map: Vec<usize> = names
                .iter()
                .filter_map(|name| target.index_of(name))
                .collect();

            // Last source row wins for duplicate keys
            let source_by_key: HashMap<String, &Vec<Value>> = batch
                .rows()
                .iter()
                .map(|row| (key_of(&row[source_key_idx]), row))
                .collect();

            let version = next_version(&tx)?;
            let mut matched: HashSet<String> = HashSet::new();
            let mut rows_updated = 0;

            for live in live_rows(&tx, &target)? {
                let key = key_of(&live.values[target_key_idx]);
                let Some(source_row) = source_by_key.get(&key) else {
                    continue;
                };

                let mut values = live.values;
                for (source_idx, &target_idx) in column_map.iter().enumerate() {
                    values[target_idx] = source_row[source_idx].clone();
                }
                retire_row(&tx, live.id, version)?;
                insert_row(&tx, live.position, &values, version)?;
                matched.insert(key);
                rows_updated += 1;
            }

            let unmatched_keys: Vec<Value> = batch
                .rows()
                .iter()
                .map(|row| &row[source_key_idx])
                .filter(|key| !matched.contains(&key_of(key)))
                .cloned()
                .collect();

            let committed = if rows_updated > 0 {
                record_commit(&tx, version, "MERGE", rows_updated, rows_updated)?;
                Some(version)
            } else {
                None
            };
            tx.commit()?;

            debug!(
                uri = %uri_owned,
                rows_updated,
                unmatched = unmatched_keys.len(),
                "Merge applied"
            );
            Ok(MergeMetrics {
                rows_updated,
                unmatched_keys,
                version: committed,
            })
        })
        .await
    }

    async fn delete_where(&self, uri: &TableUri, column: &str, keys: &[Value]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let column = column.to_string();
        let keys: HashSet<String> = keys.iter().map(key_of).collect();
        let uri_owned = uri.clone();

        self.with_conn("delete_where", uri, false, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_table(&tx, &uri_owned)?;
            let schema = load_schema(&tx)?;
            let idx = schema.index_of(&column).ok_or_else(|| {
                Error::schema_mismatch(format!("unknown column '{}'", column), schema.names())
            })?;

            let version = next_version(&tx)?;
            let mut removed = 0;
            for live in live_rows(&tx, &schema)? {
                if keys.contains(&key_of(&live.values[idx])) {
                    retire_row(&tx, live.id, version)?;
                    removed += 1;
                }
            }
            if removed > 0 {
                record_commit(&tx, version, "DELETE", 0, removed)?;
            }
            tx.commit()?;

            debug!(uri = %uri_owned, removed, "Rows deleted");
            Ok(removed)
        })
        .await
    }

    async fn compact(
        &self,
        uri: &TableUri,
        cluster_columns: Option<&[String]>,
    ) -> Result<CompactionMetrics> {
        let cluster_columns: Vec<String> =
            cluster_columns.map(<[String]>::to_vec).unwrap_or_default();
        let uri_owned = uri.clone();

        self.with_conn("compact", uri, false, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_table(&tx, &uri_owned)?;
            let schema = load_schema(&tx)?;

            let mut cluster_idx = Vec::with_capacity(cluster_columns.len());
            for name in &cluster_columns {
                let idx = schema.index_of(name).ok_or_else(|| {
                    Error::schema_mismatch(
                        format!("unknown cluster column '{}'", name),
                        schema.names(),
                    )
                })?;
                cluster_idx.push(idx);
            }

            let mut rows = live_rows(&tx, &schema)?;
            if rows.is_empty() {
                tx.finish()?;
                return Ok(CompactionMetrics {
                    rows_rewritten: 0,
                    clustered_by: cluster_columns,
                    version: None,
                });
            }

            rows.sort_by(|a, b| {
                cluster_idx
                    .iter()
                    .map(|&i| a.values[i].cluster_cmp(&b.values[i]))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let version = next_version(&tx)?;
            for (position, live) in rows.iter().enumerate() {
                retire_row(&tx, live.id, version)?;
                insert_row(&tx, position as i64, &live.values, version)?;
            }
            record_commit(&tx, version, "OPTIMIZE", rows.len(), rows.len())?;
            tx.commit()?;

            debug!(uri = %uri_owned, version, rows = rows.len(), "Table compacted");
            Ok(CompactionMetrics {
                rows_rewritten: rows.len(),
                clustered_by: cluster_columns,
                version: Some(version),
            })
        })
        .await
    }

    async fn vacuum(
        &self,
        uri: &TableUri,
        retention_hours: u64,
        dry_run: bool,
    ) -> Result<VacuumMetrics> {
        let cutoff = timestamp(retention_cutoff(Utc::now(), retention_hours));
        let uri_owned = uri.clone();

        self.with_conn("vacuum", uri, false, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_table(&tx, &uri_owned)?;

            let rows_reclaimable: i64 = tx.query_row(
                "SELECT COUNT(*) FROM rows r JOIN commits c ON r.removed_in = c.version
                 WHERE c.committed_at <= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;

            if dry_run {
                tx.finish()?;
                return Ok(VacuumMetrics {
                    rows_reclaimable: rows_reclaimable as usize,
                    rows_removed: 0,
                    dry_run,
                });
            }

            let rows_removed = tx.execute(
                "DELETE FROM rows WHERE removed_in IN
                    (SELECT version FROM commits WHERE committed_at <= ?1)",
                params![cutoff],
            )?;
            tx.commit()?;
            if rows_removed > 0 {
                conn.execute_batch("VACUUM")?;
            }

            debug!(uri = %uri_owned, rows_removed, "Table vacuumed");
            Ok(VacuumMetrics {
                rows_reclaimable: rows_reclaimable as usize,
                rows_removed,
                dry_run,
            })
        })
        .await
    }

    async fn history(&self, uri: &TableUri) -> Result<Vec<CommitInfo>> {
        self.with_conn("history", uri, false, |conn| {
            let mut stmt = conn.prepare(
                "SELECT version, operation, committed_at, rows_added, rows_removed
                 FROM commits ORDER BY version",
            )?;
            let raw = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            raw.into_iter()
                .map(|(version, operation, committed_at, added, removed)| {
                    let committed_at = DateTime::parse_from_rfc3339(&committed_at)
                        .map_err(|e| Error::Internal(format!("Bad commit timestamp: {}", e)))?
                        .with_timezone(&Utc);
                    Ok(CommitInfo {
                        version: version as u64,
                        operation,
                        committed_at,
                        rows_added: added as usize,
                        rows_removed: removed as usize,
                    })
                })
                .collect()
        })
        .await
    }
}
