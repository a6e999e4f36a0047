//! `PostgreSQL` backend.
//!
//! Per channel the backend owns two tables: `<base>_txs` holding the records
//! (the `BIGSERIAL` id is the ordering token) and `<base>_payload_keys`
//! holding one row per payload key per record. `<base>` is a readable
//! `<prefix>_<channel>` stem followed by a digest of the exact prefix and
//! channel name, so distinct channels never share tables and every
//! identifier fits the 63-byte limit. The `<prefix>_last_entry` table is
//! shared by all channels and keeps one pointer row per channel.

use super::{StorageBackend, check_block_records};
use crate::types::{Payload, Tx};
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sha2::{Digest, Sha256};
use std::time::Duration;

const DEFAULT_TABLE_PREFIX: &str = "fabric_indexer";

/// Longest identifier `PostgreSQL` keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;
/// Longest suffix appended to a channel's base name.
const LONGEST_SUFFIX: &str = "_payload_keys";
/// Hex characters of the channel digest kept in table names.
const CHANNEL_DIGEST_LEN: usize = 12;
const LAST_ENTRY_SUFFIX: &str = "_last_entry";

/// Table and index names of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChannelTables {
    base: String,
    txs: String,
    keys: String,
}

impl ChannelTables {
    fn new(table_prefix: &str, channel: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(table_prefix.as_bytes());
        hasher.update([0u8]);
        hasher.update(channel.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let stem_budget = MAX_IDENTIFIER_LEN - LONGEST_SUFFIX.len() - CHANNEL_DIGEST_LEN - 1;
        let mut stem = sanitize_identifier(&format!("{table_prefix}_{channel}"));
        stem.truncate(stem_budget);

        let base = format!("{stem}_{}", &digest[..CHANNEL_DIGEST_LEN]);
        Self {
            txs: format!("{base}_txs"),
            keys: format!("{base}{LONGEST_SUFFIX}"),
            base,
        }
    }

    fn index(&self, column: &str) -> String {
        format!("{}_{column}_idx", self.base)
    }
}

#[derive(sqlx::FromRow)]
struct TxRow {
    channel_id: String,
    tx_id: String,
    namespace: String,
    block_hash: String,
    previous_block_hash: String,
    block_number: i64,
    payload: String,
    validation_code: i32,
    tx_time: i64,
}

impl TryFrom<TxRow> for Tx {
    type Error = IndexerError;

    fn try_from(row: TxRow) -> Result<Self> {
        Ok(Tx {
            channel_id: row.channel_id,
            tx_id: row.tx_id,
            namespace: row.namespace,
            block_hash: row.block_hash,
            previous_block_hash: row.previous_block_hash,
            block_number: u64::try_from(row.block_number).map_err(|_| {
                IndexerError::StorageError(format!("negative block number {}", row.block_number))
            })?,
            payload: Payload::from_json(&row.payload)?,
            validation_code: row.validation_code,
            time: row.tx_time,
        })
    }
}

fn into_txs(rows: Vec<TxRow>) -> Result<Vec<Tx>> {
    rows.into_iter().map(Tx::try_from).collect()
}

fn to_db_block_number(block_number: u64) -> Result<i64> {
    i64::try_from(block_number).map_err(|_| {
        IndexerError::StorageError(format!("block number {block_number} exceeds BIGINT"))
    })
}

/// Maps a name onto the characters of an unquoted SQL identifier.
fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Connectivity failures are reported as `ConnectionError` so the
/// supervisor can restart workers after them.
fn connect_error(err: sqlx::Error) -> IndexerError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            IndexerError::ConnectionError(format!("failed to connect to PostgreSQL: {err}"))
        }
        other => IndexerError::DatabaseError(other),
    }
}

/// `PostgreSQL` storage for indexed records.
///
/// # Example
///
/// ```no_run
/// use fabric_indexer::{PostgresStorage, StorageBackend};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = PostgresStorage::new("postgresql://localhost/ledger").await?;
/// storage.init("mychannel").await?;
/// # Ok(())
/// # }
/// ```
pub struct PostgresStorage {
    /// `PostgreSQL` connection pool
    pool: PgPool,
    table_prefix: String,
}

impl PostgresStorage {
    /// Creates a new storage instance with a connection pool.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::ConnectionError` if the server is unreachable
    /// and `IndexerError::DatabaseError` for any other connect failure.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_options(database_url, 5, DEFAULT_TABLE_PREFIX).await
    }

    /// Creates a storage instance with an explicit pool size and table prefix.
    ///
    /// # Errors
    ///
    /// Same as [`PostgresStorage::new`].
    pub async fn with_options(
        database_url: &str,
        max_connections: u32,
        table_prefix: &str,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(connect_error)?;

        Ok(Self {
            pool,
            table_prefix: table_prefix.to_string(),
        })
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the database connection pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    fn tables(&self, channel: &str) -> ChannelTables {
        ChannelTables::new(&self.table_prefix, channel)
    }

    fn last_entry_table(&self) -> String {
        last_entry_table(&self.table_prefix)
    }

    async fn fetch_where(
        &self,
        channel: &str,
        condition: &str,
        param: Option<Param>,
    ) -> Result<Vec<Tx>> {
        let tables = self.tables(channel);
        let sql = format!(
            "SELECT channel_id, tx_id, namespace, block_hash, previous_block_hash, block_number, \
             payload, validation_code, tx_time FROM {txs} t WHERE {condition} ORDER BY t.id",
            txs = tables.txs
        );
        let query = sqlx::query_as::<_, TxRow>(&sql);
        let query = match param {
            Some(Param::Text(value)) => query.bind(value),
            Some(Param::BigInt(value)) => query.bind(value),
            None => query,
        };
        let rows = query.fetch_all(&self.pool).await?;
        into_txs(rows)
    }
}

fn last_entry_table(table_prefix: &str) -> String {
    let mut stem = sanitize_identifier(table_prefix);
    stem.truncate(MAX_IDENTIFIER_LEN - LAST_ENTRY_SUFFIX.len());
    format!("{stem}{LAST_ENTRY_SUFFIX}")
}

/// Single bind parameter of a record lookup.
enum Param {
    Text(String),
    BigInt(i64),
}

/// Upserts one record and rebuilds its payload key rows. Returns the row id.
async fn insert_tx(conn: &mut PgConnection, tables: &ChannelTables, tx: &Tx) -> Result<i64> {
    let sql = format!(
        r"
        INSERT INTO {txs} (channel_id, tx_id, namespace, block_hash, previous_block_hash,
                           block_number, payload, validation_code, tx_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (block_number, tx_id, namespace) DO UPDATE SET
            channel_id = EXCLUDED.channel_id,
            block_hash = EXCLUDED.block_hash,
            previous_block_hash = EXCLUDED.previous_block_hash,
            payload = EXCLUDED.payload,
            validation_code = EXCLUDED.validation_code,
            tx_time = EXCLUDED.tx_time
        RETURNING id
        ",
        txs = tables.txs
    );
    let row_id = sqlx::query_scalar::<_, i64>(&sql)
        .bind(&tx.channel_id)
        .bind(&tx.tx_id)
        .bind(&tx.namespace)
        .bind(&tx.block_hash)
        .bind(&tx.previous_block_hash)
        .bind(to_db_block_number(tx.block_number)?)
        .bind(tx.payload.to_json()?)
        .bind(tx.validation_code)
        .bind(tx.time)
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(&format!("DELETE FROM {} WHERE tx_row = $1", tables.keys))
        .bind(row_id)
        .execute(&mut *conn)
        .await?;

    let insert_key = format!(
        "INSERT INTO {} (tx_row, key) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        tables.keys
    );
    for key in tx.payload.index_keys() {
        sqlx::query(&insert_key)
            .bind(row_id)
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }

    Ok(row_id)
}

/// Points the channel's marker at the stored row of `tx`, unless the marker
/// already points at a higher block.
async fn upsert_last_entry(
    conn: &mut PgConnection,
    last_entry_table: &str,
    tables: &ChannelTables,
    channel: &str,
    tx: &Tx,
) -> Result<()> {
    let block_number = to_db_block_number(tx.block_number)?;
    let row_id = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT id FROM {} WHERE block_number = $1 AND tx_id = $2 AND namespace = $3",
        tables.txs
    ))
    .bind(block_number)
    .bind(&tx.tx_id)
    .bind(&tx.namespace)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row_id) = row_id else {
        return Err(IndexerError::StorageError(format!(
            "cannot point last entry of '{channel}' at record {} that was never inserted",
            tx.tx_id
        )));
    };

    sqlx::query(&format!(
        r"
        INSERT INTO {table} (channel_id, tx_row, block_number) VALUES ($1, $2, $3)
        ON CONFLICT (channel_id) DO UPDATE SET
            tx_row = EXCLUDED.tx_row,
            block_number = EXCLUDED.block_number
        WHERE {table}.block_number <= EXCLUDED.block_number
        ",
        table = last_entry_table
    ))
    .bind(channel)
    .bind(row_id)
    .bind(block_number)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl StorageBackend for PostgresStorage {
    async fn init(&self, channel: &str) -> Result<()> {
        let tables = self.tables(channel);

        let statements = [
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {txs} (
                    id BIGSERIAL PRIMARY KEY,
                    channel_id TEXT NOT NULL,
                    tx_id TEXT NOT NULL,
                    namespace TEXT NOT NULL DEFAULT '',
                    block_hash TEXT NOT NULL,
                    previous_block_hash TEXT NOT NULL,
                    block_number BIGINT NOT NULL,
                    payload TEXT NOT NULL,
                    validation_code INTEGER NOT NULL,
                    tx_time BIGINT NOT NULL,
                    indexed_at TIMESTAMPTZ DEFAULT NOW(),
                    UNIQUE (block_number, tx_id, namespace)
                )
                ",
                txs = tables.txs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(tx_id)",
                tables.index("txid"),
                tables.txs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(block_number)",
                tables.index("bnum"),
                tables.txs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(block_hash)",
                tables.index("bhash"),
                tables.txs
            ),
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {keys} (
                    tx_row BIGINT NOT NULL REFERENCES {txs}(id) ON DELETE CASCADE,
                    key TEXT NOT NULL,
                    PRIMARY KEY (tx_row, key)
                )
                ",
                keys = tables.keys,
                txs = tables.txs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(key)",
                tables.index("key"),
                tables.keys
            ),
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {} (
                    channel_id TEXT PRIMARY KEY,
                    tx_row BIGINT NOT NULL,
                    block_number BIGINT NOT NULL,
                    updated_at TIMESTAMPTZ DEFAULT NOW()
                )
                ",
                self.last_entry_table()
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::debug!(channel = channel, table = %tables.txs, "Initialized channel storage");
        Ok(())
    }

    async fn insert(&self, channel: &str, tx: &Tx) -> Result<()> {
        let tables = self.tables(channel);
        let mut conn = self.pool.acquire().await?;
        insert_tx(&mut conn, &tables, tx).await?;
        Ok(())
    }

    async fn get_by_tx_id(&self, channel: &str, tx_id: &str) -> Result<Vec<Tx>> {
        let tx_id = tx_id.to_string();
        self.fetch_where(channel, "t.tx_id = $1", Some(Param::Text(tx_id)))
            .await
    }

    async fn get_by_block_number(&self, channel: &str, block_number: u64) -> Result<Vec<Tx>> {
        let block_number = to_db_block_number(block_number)?;
        self.fetch_where(channel, "t.block_number = $1", Some(Param::BigInt(block_number)))
            .await
    }

    async fn get_by_payload_substring(&self, channel: &str, needle: &str) -> Result<Vec<Tx>> {
        let tables = self.tables(channel);
        let condition = format!(
            "EXISTS (SELECT 1 FROM {} k WHERE k.tx_row = t.id AND strpos(k.key, $1) > 0)",
            tables.keys
        );
        let needle = needle.to_string();
        self.fetch_where(channel, &condition, Some(Param::Text(needle)))
            .await
    }

    async fn query_block_by_hash(&self, channel: &str, block_hash: &str) -> Result<Vec<Tx>> {
        let block_hash = block_hash.to_string();
        self.fetch_where(channel, "t.block_hash = $1", Some(Param::Text(block_hash)))
            .await
    }

    async fn query_all(&self, channel: &str) -> Result<Vec<Tx>> {
        self.fetch_where(channel, "TRUE", None).await
    }

    async fn get_last_entry(&self, channel: &str) -> Result<Option<Tx>> {
        let tables = self.tables(channel);
        let sql = format!(
            r"
            SELECT t.channel_id, t.tx_id, t.namespace, t.block_hash, t.previous_block_hash,
                   t.block_number, t.payload, t.validation_code, t.tx_time
            FROM {last} l JOIN {txs} t ON t.id = l.tx_row
            WHERE l.channel_id = $1
            ",
            last = self.last_entry_table(),
            txs = tables.txs
        );
        let row = sqlx::query_as::<_, TxRow>(&sql)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Tx::try_from).transpose()
    }

    async fn update_last_entry(&self, channel: &str, tx: &Tx) -> Result<()> {
        let tables = self.tables(channel);
        let mut conn = self.pool.acquire().await?;
        upsert_last_entry(&mut conn, &self.last_entry_table(), &tables, channel, tx).await
    }

    async fn insert_block(&self, channel: &str, block_number: u64, txs: &[Tx]) -> Result<()> {
        check_block_records(block_number, txs)?;
        let Some(last) = txs.last() else {
            return Ok(());
        };

        let tables = self.tables(channel);
        let mut db_tx = self.pool.begin().await?;
        for tx in txs {
            insert_tx(&mut db_tx, &tables, tx).await?;
        }
        upsert_last_entry(&mut db_tx, &self.last_entry_table(), &tables, channel, last).await?;
        db_tx.commit().await?;

        Ok(())
    }

    async fn get_block_range(&self, channel: &str, from: u64, to: u64) -> Result<Vec<Tx>> {
        let from = to_db_block_number(from)?;
        let to = to_db_block_number(to)?;
        let tables = self.tables(channel);
        let sql = format!(
            "SELECT channel_id, tx_id, namespace, block_hash, previous_block_hash, block_number, \
             payload, validation_code, tx_time FROM {} WHERE block_number BETWEEN $1 AND $2 \
             ORDER BY block_number, id",
            tables.txs
        );
        let rows = sqlx::query_as::<_, TxRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        into_txs(rows)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
