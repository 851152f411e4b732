//! SQLite storage for wallet history and sync bookkeeping.
//!
//! Uses WAL mode and prepared statements inside explicit transactions for batch
//! writes. Hashes and addresses are stored as lowercase `0x` hex text, 256-bit and
//! 128-bit amounts as decimal text, block numbers and counters as integers.

use alloy::hex;
use alloy::primitives::{Address, Bytes, B256, U256};
use eyre::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{
    AccountState, DroppedTransaction, InternalTransaction, NotSyncedTransaction, Transaction,
    TransactionLog, TransactionReceipt, TransactionSyncerState,
};

/// SQLite caps bound parameters per statement; hash lists are queried in chunks.
const HASH_CHUNK: usize = 500;

const TRANSACTION_COLUMNS: &str = "
    tx.hash, tx.timestamp, tx.is_failed, tx.block_number, tx.transaction_index,
    tx.from_address, tx.to_address, tx.value, tx.input, tx.nonce, tx.gas_price,
    tx.max_fee_per_gas, tx.max_priority_fee_per_gas, tx.gas_limit, tx.gas_used,
    tx.replaced_with, tx.sync_order
";

/// Sender, recipient, internal-transfer participant, or indexed log topic.
const RELEVANCE_CLAUSE: &str = "
    (tx.from_address = ? OR tx.to_address = ?
     OR EXISTS (SELECT 1 FROM internal_transactions it
                WHERE it.hash = tx.hash AND (it.from_address = ? OR it.to_address = ?))
     OR EXISTS (SELECT 1 FROM transaction_logs lg
                WHERE lg.transaction_hash = tx.hash
                  AND (lg.topic1 = ? OR lg.topic2 = ? OR lg.topic3 = ?)))
";

/// Strictly older than the cursor in (timestamp, transaction_index, sync_order) order.
const CURSOR_CLAUSE: &str = "
    (tx.timestamp < ?
     OR (tx.timestamp = ?
         AND (COALESCE(tx.transaction_index, -1) < ?
              OR (COALESCE(tx.transaction_index, -1) = ? AND tx.sync_order < ?))))
";

const HISTORY_ORDER: &str =
    "ORDER BY tx.timestamp DESC, COALESCE(tx.transaction_index, -1) DESC, tx.sync_order DESC";

/// Filter for history queries.
#[derive(Clone, Debug, Default)]
pub struct TransactionQuery {
    /// Only transactions relevant to this account.
    pub address: Option<Address>,
    /// Every group must match; within a group any tag matches.
    pub tags: Vec<Vec<String>>,
    /// Only transactions strictly older than this one.
    pub from_hash: Option<B256>,
    pub limit: Option<usize>,
    /// Only unmined, not-replaced transactions.
    pub pending_only: bool,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("failed to open database at {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                is_failed INTEGER NOT NULL,
                block_number INTEGER,
                transaction_index INTEGER,
                from_address TEXT,
                to_address TEXT,
                value TEXT,
                input TEXT,
                nonce INTEGER,
                gas_price TEXT,
                max_fee_per_gas TEXT,
                max_priority_fee_per_gas TEXT,
                gas_limit INTEGER,
                gas_used INTEGER,
                replaced_with TEXT,
                sync_order INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_history
                ON transactions (timestamp, transaction_index, sync_order);
            CREATE INDEX IF NOT EXISTS idx_transactions_sender_nonce
                ON transactions (from_address, nonce);

            CREATE TABLE IF NOT EXISTS transaction_receipts (
                transaction_hash TEXT PRIMARY KEY,
                transaction_index INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                cumulative_gas_used INTEGER NOT NULL,
                gas_used INTEGER NOT NULL,
                effective_gas_price TEXT,
                contract_address TEXT,
                logs_bloom TEXT NOT NULL,
                status INTEGER
            );

            CREATE TABLE IF NOT EXISTS transaction_logs (
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                transaction_index INTEGER NOT NULL,
                address TEXT NOT NULL,
                topic0 TEXT,
                topic1 TEXT,
                topic2 TEXT,
                topic3 TEXT,
                data TEXT NOT NULL,
                removed INTEGER NOT NULL,
                PRIMARY KEY (transaction_hash, log_index)
            );

            CREATE TABLE IF NOT EXISTS internal_transactions (
                hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                value TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                PRIMARY KEY (hash, trace_id)
            );

            CREATE TABLE IF NOT EXISTS not_synced_transactions (
                hash TEXT PRIMARY KEY,
                rpc_transaction TEXT,
                timestamp INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS transaction_syncer_states (
                syncer_id TEXT PRIMARY KEY,
                last_block_number INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transaction_tags (
                hash TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (hash, name)
            );

            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                balance TEXT NOT NULL,
                nonce INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS last_block_height (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                height INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // --- transactions -------------------------------------------------------------

    /// Upserts transactions, never overwriting a stored value with an absent one.
    ///
    /// New hashes get the next `sync_order`; existing rows keep theirs.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn save_transactions(&self, txs: &[Transaction]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO transactions (
                    hash, timestamp, is_failed, block_number, transaction_index,
                    from_address, to_address, value, input, nonce, gas_price,
                    max_fee_per_gas, max_priority_fee_per_gas, gas_limit, gas_used,
                    replaced_with, sync_order
                ) VALUES (
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(sync_order), 0) + 1 FROM transactions)
                )
                ON CONFLICT(hash) DO UPDATE SET
                    timestamp = CASE WHEN excluded.timestamp = 0
                                     THEN transactions.timestamp
                                     ELSE excluded.timestamp END,
                    is_failed = MAX(transactions.is_failed, excluded.is_failed),
                    block_number = COALESCE(excluded.block_number, transactions.block_number),
                    transaction_index = COALESCE(excluded.transaction_index, transactions.transaction_index),
                    from_address = COALESCE(excluded.from_address, transactions.from_address),
                    to_address = COALESCE(excluded.to_address, transactions.to_address),
                    value = COALESCE(excluded.value, transactions.value),
                    input = COALESCE(excluded.input, transactions.input),
                    nonce = COALESCE(excluded.nonce, transactions.nonce),
                    gas_price = COALESCE(excluded.gas_price, transactions.gas_price),
                    max_fee_per_gas = COALESCE(excluded.max_fee_per_gas, transactions.max_fee_per_gas),
                    max_priority_fee_per_gas = COALESCE(excluded.max_priority_fee_per_gas, transactions.max_priority_fee_per_gas),
                    gas_limit = COALESCE(excluded.gas_limit, transactions.gas_limit),
                    gas_used = COALESCE(excluded.gas_used, transactions.gas_used),
                    replaced_with = COALESCE(excluded.replaced_with, transactions.replaced_with)
                ",
            )?;

            for t in txs {
                stmt.execute(rusqlite::params![
                    hex::encode_prefixed(t.hash),
                    t.timestamp,
                    t.is_failed,
                    t.block_number,
                    t.transaction_index,
                    t.from.map(hex::encode_prefixed),
                    t.to.map(hex::encode_prefixed),
                    t.value.map(|v| v.to_string()),
                    t.input.as_ref().map(hex::encode_prefixed),
                    t.nonce,
                    t.gas_price.map(|v| v.to_string()),
                    t.max_fee_per_gas.map(|v| v.to_string()),
                    t.max_priority_fee_per_gas.map(|v| v.to_string()),
                    t.gas_limit,
                    t.gas_used,
                    t.replaced_with.map(hex::encode_prefixed),
                ])?;
            }
        }

        let count = txs.len();
        tx.commit()?;
        Ok(count)
    }

    pub fn transaction(&self, hash: &B256) -> Result<Option<Transaction>> {
        let conn = self.conn();
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions tx WHERE tx.hash = ?");
        let row = conn
            .query_row(&sql, [hex::encode_prefixed(hash)], TransactionRow::read)
            .optional()?;
        row.map(Transaction::try_from).transpose()
    }

    /// Stored records for the given hashes, in insertion order. Unknown hashes are skipped.
    pub fn transactions_by_hashes(&self, hashes: &[B256]) -> Result<Vec<Transaction>> {
        let conn = self.conn();
        let mut out = Vec::with_capacity(hashes.len());
        for chunk in hashes.chunks(HASH_CHUNK) {
            let sql = format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions tx WHERE tx.hash IN ({}) ORDER BY tx.sync_order",
                placeholders(chunk.len())
            );
            out.extend(query_transactions(
                &conn,
                &sql,
                params_from_iter(chunk.iter().map(hex::encode_prefixed)),
            )?);
        }
        // Each chunk is ordered on its own; restore the order across chunks.
        out.sort_by_key(|tx| tx.sync_order);
        Ok(out)
    }

    /// History page, newest first.
    ///
    /// An unknown `from_hash` is ignored and the page starts from the newest record.
    pub fn transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let conn = self.conn();
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(address) = query.address {
            let account = hex::encode_prefixed(address);
            let topic = hex::encode_prefixed(address.into_word());
            clauses.push(RELEVANCE_CLAUSE.to_string());
            values.extend(std::iter::repeat(Value::Text(account)).take(4));
            values.extend(std::iter::repeat(Value::Text(topic)).take(3));
        }

        for group in query.tags.iter().filter(|g| !g.is_empty()) {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM transaction_tags tg WHERE tg.hash = tx.hash AND tg.name IN ({}))",
                placeholders(group.len())
            ));
            values.extend(group.iter().cloned().map(Value::Text));
        }

        if query.pending_only {
            clauses.push("(tx.block_number IS NULL AND tx.replaced_with IS NULL)".to_string());
        }

        if let Some(from_hash) = &query.from_hash {
            if let Some((timestamp, index, order)) = order_key(&conn, from_hash)? {
                clauses.push(CURSOR_CLAUSE.to_string());
                values.extend([
                    Value::Integer(timestamp),
                    Value::Integer(timestamp),
                    Value::Integer(index),
                    Value::Integer(index),
                    Value::Integer(order),
                ]);
            }
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        values.push(Value::Integer(limit));

        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions tx {filter} {HISTORY_ORDER} LIMIT ?"
        );
        query_transactions(&conn, &sql, params_from_iter(values.iter()))
    }

    /// Every stored transaction that is still pending.
    pub fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        self.transactions(&TransactionQuery {
            pending_only: true,
            ..Default::default()
        })
    }

    /// Pending transactions from `from` with the given nonce.
    pub fn pending_transactions_with_nonce(
        &self,
        from: &Address,
        nonce: u64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions tx
             WHERE tx.from_address = ? AND tx.nonce = ?
               AND tx.block_number IS NULL AND tx.replaced_with IS NULL
             ORDER BY tx.sync_order"
        );
        query_transactions(
            &conn,
            &sql,
            rusqlite::params![hex::encode_prefixed(from), nonce],
        )
    }

    /// Marks pending transactions as replaced. Returns the number of rows updated.
    pub fn mark_dropped(&self, dropped: &[DroppedTransaction]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE transactions SET replaced_with = ? WHERE hash = ? AND block_number IS NULL",
            )?;
            for d in dropped {
                updated += stmt.execute(rusqlite::params![
                    hex::encode_prefixed(d.replaced_with),
                    hex::encode_prefixed(d.hash),
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    // --- receipts, logs, internal transfers ----------------------------------------

    pub fn save_receipts(&self, receipts: &[TransactionReceipt]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO transaction_receipts (
                    transaction_hash, transaction_index, block_hash, block_number,
                    from_address, to_address, cumulative_gas_used, gas_used,
                    effective_gas_price, contract_address, logs_bloom, status
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for r in receipts {
                stmt.execute(rusqlite::params![
                    hex::encode_prefixed(r.transaction_hash),
                    r.transaction_index,
                    hex::encode_prefixed(r.block_hash),
                    r.block_number,
                    hex::encode_prefixed(r.from),
                    r.to.map(hex::encode_prefixed),
                    r.cumulative_gas_used,
                    r.gas_used,
                    r.effective_gas_price.map(|p| p.to_string()),
                    r.contract_address.map(hex::encode_prefixed),
                    hex::encode_prefixed(&r.logs_bloom),
                    r.status,
                ])?;
            }
        }

        let count = receipts.len();
        tx.commit()?;
        Ok(count)
    }

    pub fn receipt(&self, hash: &B256) -> Result<Option<TransactionReceipt>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "
                SELECT transaction_hash, transaction_index, block_hash, block_number,
                       from_address, to_address, cumulative_gas_used, gas_used,
                       effective_gas_price, contract_address, logs_bloom, status
                FROM transaction_receipts WHERE transaction_hash = ?
                ",
                [hex::encode_prefixed(hash)],
                ReceiptRow::read,
            )
            .optional()?;
        row.map(TransactionReceipt::try_from).transpose()
    }

    /// Whether the transaction has been finalized (a receipt is stored).
    pub fn has_receipt(&self, hash: &B256) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM transaction_receipts WHERE transaction_hash = ?",
                [hex::encode_prefixed(hash)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn save_logs(&self, logs: &[TransactionLog]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO transaction_logs (
                    transaction_hash, log_index, block_number, transaction_index, address,
                    topic0, topic1, topic2, topic3, data, removed
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for l in logs {
                let topic = |i: usize| l.topic(i).map(hex::encode_prefixed);
                stmt.execute(rusqlite::params![
                    hex::encode_prefixed(l.transaction_hash),
                    l.log_index,
                    l.block_number,
                    l.transaction_index,
                    hex::encode_prefixed(l.address),
                    topic(0),
                    topic(1),
                    topic(2),
                    topic(3),
                    hex::encode_prefixed(&l.data),
                    l.removed,
                ])?;
            }
        }

        let count = logs.len();
        tx.commit()?;
        Ok(count)
    }

    /// Logs of the given transactions, ordered by transaction then log index.
    pub fn logs(&self, hashes: &[B256]) -> Result<Vec<TransactionLog>> {
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in hashes.chunks(HASH_CHUNK) {
            let sql = format!(
                "SELECT transaction_hash, log_index, block_number, transaction_index, address,
                        topic0, topic1, topic2, topic3, data, removed
                 FROM transaction_logs WHERE transaction_hash IN ({})
                 ORDER BY transaction_hash, log_index",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(hex::encode_prefixed)),
                    LogRow::read,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for row in rows {
                out.push(TransactionLog::try_from(row)?);
            }
        }
        Ok(out)
    }

    pub fn save_internal_transactions(&self, internals: &[InternalTransaction]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO internal_transactions (
                    hash, block_number, from_address, to_address, value, trace_id
                ) VALUES (?, ?, ?, ?, ?, ?)
                ",
            )?;

            for i in internals {
                stmt.execute(rusqlite::params![
                    hex::encode_prefixed(i.hash),
                    i.block_number,
                    hex::encode_prefixed(i.from),
                    hex::encode_prefixed(i.to),
                    i.value.to_string(),
                    i.trace_id,
                ])?;
            }
        }

        let count = internals.len();
        tx.commit()?;
        Ok(count)
    }

    pub fn internal_transactions(&self, hashes: &[B256]) -> Result<Vec<InternalTransaction>> {
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in hashes.chunks(HASH_CHUNK) {
            let sql = format!(
                "SELECT hash, block_number, from_address, to_address, value, trace_id
                 FROM internal_transactions WHERE hash IN ({}) ORDER BY hash, trace_id",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(hex::encode_prefixed)),
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (hash, block_number, from, to, value, trace_id) in rows {
                out.push(InternalTransaction {
                    hash: parse_b256(&hash)?,
                    block_number,
                    from: parse_address(&from)?,
                    to: parse_address(&to)?,
                    value: parse_u256(&value)?,
                    trace_id,
                });
            }
        }
        Ok(out)
    }

    // --- not-synced pool -------------------------------------------------------------

    /// Adds hashes to the pool. Hashes already pooled are left untouched.
    ///
    /// Returns how many entries were actually inserted.
    pub fn add_not_synced(&self, entries: &[NotSyncedTransaction]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO not_synced_transactions (
                    hash, rpc_transaction, timestamp, retry_count
                ) VALUES (?, ?, ?, ?)
                ",
            )?;

            for e in entries {
                let body = e
                    .transaction
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .wrap_err("failed to encode pooled transaction body")?;
                inserted += stmt.execute(rusqlite::params![
                    hex::encode_prefixed(e.hash),
                    body,
                    e.timestamp,
                    e.retry_count,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Up to `limit` pooled entries, least-retried first, then oldest first.
    pub fn not_synced_transactions(&self, limit: usize) -> Result<Vec<NotSyncedTransaction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT hash, rpc_transaction, timestamp, retry_count
            FROM not_synced_transactions
            ORDER BY retry_count ASC, rowid ASC
            LIMIT ?
            ",
        )?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<u64>>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(hash, body, timestamp, retry_count)| {
                Ok(NotSyncedTransaction {
                    hash: parse_b256(&hash)?,
                    transaction: body
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()
                        .wrap_err("failed to decode pooled transaction body")?,
                    timestamp,
                    retry_count,
                })
            })
            .collect()
    }

    /// Rewrites the mutable fields (body, timestamp, retry count) of a pooled entry.
    pub fn update_not_synced(&self, entry: &NotSyncedTransaction) -> Result<()> {
        let body = entry
            .transaction
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .wrap_err("failed to encode pooled transaction body")?;
        self.conn().execute(
            "UPDATE not_synced_transactions SET rpc_transaction = ?, timestamp = ?, retry_count = ? WHERE hash = ?",
            rusqlite::params![
                body,
                entry.timestamp,
                entry.retry_count,
                hex::encode_prefixed(entry.hash)
            ],
        )?;
        Ok(())
    }

    pub fn remove_not_synced(&self, hash: &B256) -> Result<()> {
        self.conn().execute(
            "DELETE FROM not_synced_transactions WHERE hash = ?",
            [hex::encode_prefixed(hash)],
        )?;
        Ok(())
    }

    pub fn not_synced_count(&self) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM not_synced_transactions",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // --- syncer cursors --------------------------------------------------------------

    pub fn syncer_state(&self, syncer_id: &str) -> Result<Option<TransactionSyncerState>> {
        let state = self
            .conn()
            .query_row(
                "SELECT syncer_id, last_block_number FROM transaction_syncer_states WHERE syncer_id = ?",
                [syncer_id],
                |row| {
                    Ok(TransactionSyncerState {
                        syncer_id: row.get(0)?,
                        last_block_number: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Upserts a syncer cursor. A stored cursor never moves backwards.
    pub fn save_syncer_state(&self, state: &TransactionSyncerState) -> Result<()> {
        self.conn().execute(
            "
            INSERT INTO transaction_syncer_states (syncer_id, last_block_number)
            VALUES (?, ?)
            ON CONFLICT(syncer_id) DO UPDATE SET
                last_block_number = MAX(transaction_syncer_states.last_block_number,
                                        excluded.last_block_number)
            ",
            rusqlite::params![state.syncer_id, state.last_block_number],
        )?;
        Ok(())
    }

    // --- tags ------------------------------------------------------------------------

    /// Replaces the tag set of every listed transaction.
    pub fn save_tags(&self, tags_by_hash: &[(B256, Vec<String>)]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut clear = tx.prepare("DELETE FROM transaction_tags WHERE hash = ?")?;
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO transaction_tags (hash, name) VALUES (?, ?)")?;
            for (hash, names) in tags_by_hash {
                let hash = hex::encode_prefixed(hash);
                clear.execute([&hash])?;
                for name in names {
                    count += insert.execute(rusqlite::params![hash, name])?;
                }
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn tags(&self, hash: &B256) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name FROM transaction_tags WHERE hash = ? ORDER BY name")?;
        let names = stmt
            .query_map([hex::encode_prefixed(hash)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // --- account ---------------------------------------------------------------------

    pub fn account_state(&self) -> Result<Option<AccountState>> {
        let row: Option<(String, u64)> = self
            .conn()
            .query_row(
                "SELECT balance, nonce FROM account_state WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(balance, nonce)| {
            Ok(AccountState {
                balance: parse_u256(&balance)?,
                nonce,
            })
        })
        .transpose()
    }

    pub fn save_account_state(&self, state: &AccountState) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO account_state (id, balance, nonce) VALUES (0, ?, ?)",
            rusqlite::params![state.balance.to_string(), state.nonce],
        )?;
        Ok(())
    }

    pub fn last_block_height(&self) -> Result<Option<u64>> {
        let height = self
            .conn()
            .query_row("SELECT height FROM last_block_height WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(height)
    }

    pub fn save_last_block_height(&self, height: u64) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO last_block_height (id, height) VALUES (0, ?)",
            [height],
        )?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// History sort key of a stored transaction.
fn order_key(conn: &Connection, hash: &B256) -> Result<Option<(i64, i64, i64)>> {
    let key = conn
        .query_row(
            "SELECT timestamp, COALESCE(transaction_index, -1), sync_order FROM transactions WHERE hash = ?",
            [hex::encode_prefixed(hash)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(key)
}

fn query_transactions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, TransactionRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(Transaction::try_from).collect()
}

fn parse_b256(s: &str) -> Result<B256> {
    s.parse().wrap_err_with(|| format!("invalid hash in store: {s}"))
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse()
        .wrap_err_with(|| format!("invalid address in store: {s}"))
}

fn parse_bytes(s: &str) -> Result<Bytes> {
    s.parse()
        .wrap_err_with(|| format!("invalid hex bytes in store: {s}"))
}

fn parse_u256(s: &str) -> Result<U256> {
    U256::from_str_radix(s, 10).wrap_err_with(|| format!("invalid amount in store: {s}"))
}

fn parse_u128(s: &str) -> Result<u128> {
    s.parse()
        .wrap_err_with(|| format!("invalid gas price in store: {s}"))
}

fn parse_opt<T>(value: Option<String>, parse: fn(&str) -> Result<T>) -> Result<Option<T>> {
    value.as_deref().map(parse).transpose()
}

/// Raw `transactions` row, in [`TRANSACTION_COLUMNS`] order.
struct TransactionRow {
    hash: String,
    timestamp: u64,
    is_failed: bool,
    block_number: Option<u64>,
    transaction_index: Option<u64>,
    from_address: Option<String>,
    to_address: Option<String>,
    value: Option<String>,
    input: Option<String>,
    nonce: Option<u64>,
    gas_price: Option<String>,
    max_fee_per_gas: Option<String>,
    max_priority_fee_per_gas: Option<String>,
    gas_limit: Option<u64>,
    gas_used: Option<u64>,
    replaced_with: Option<String>,
    sync_order: u64,
}

impl TransactionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            hash: row.get(0)?,
            timestamp: row.get(1)?,
            is_failed: row.get(2)?,
            block_number: row.get(3)?,
            transaction_index: row.get(4)?,
            from_address: row.get(5)?,
            to_address: row.get(6)?,
            value: row.get(7)?,
            input: row.get(8)?,
            nonce: row.get(9)?,
            gas_price: row.get(10)?,
            max_fee_per_gas: row.get(11)?,
            max_priority_fee_per_gas: row.get(12)?,
            gas_limit: row.get(13)?,
            gas_used: row.get(14)?,
            replaced_with: row.get(15)?,
            sync_order: row.get(16)?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = eyre::Report;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            hash: parse_b256(&row.hash)?,
            timestamp: row.timestamp,
            is_failed: row.is_failed,
            block_number: row.block_number,
            transaction_index: row.transaction_index,
            from: parse_opt(row.from_address, parse_address)?,
            to: parse_opt(row.to_address, parse_address)?,
            value: parse_opt(row.value, parse_u256)?,
            input: parse_opt(row.input, parse_bytes)?,
            nonce: row.nonce,
            gas_price: parse_opt(row.gas_price, parse_u128)?,
            max_fee_per_gas: parse_opt(row.max_fee_per_gas, parse_u128)?,
            max_priority_fee_per_gas: parse_opt(row.max_priority_fee_per_gas, parse_u128)?,
            gas_limit: row.gas_limit,
            gas_used: row.gas_used,
            replaced_with: parse_opt(row.replaced_with, parse_b256)?,
            sync_order: Some(row.sync_order),
        })
    }
}

struct ReceiptRow {
    transaction_hash: String,
    transaction_index: u64,
    block_hash: String,
    block_number: u64,
    from_address: String,
    to_address: Option<String>,
    cumulative_gas_used: u64,
    gas_used: u64,
    effective_gas_price: Option<String>,
    contract_address: Option<String>,
    logs_bloom: String,
    status: Option<bool>,
}

impl ReceiptRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction_hash: row.get(0)?,
            transaction_index: row.get(1)?,
            block_hash: row.get(2)?,
            block_number: row.get(3)?,
            from_address: row.get(4)?,
            to_address: row.get(5)?,
            cumulative_gas_used: row.get(6)?,
            gas_used: row.get(7)?,
            effective_gas_price: row.get(8)?,
            contract_address: row.get(9)?,
            logs_bloom: row.get(10)?,
            status: row.get(11)?,
        })
    }
}

impl TryFrom<ReceiptRow> for TransactionReceipt {
    type Error = eyre::Report;

    fn try_from(row: ReceiptRow) -> Result<Self> {
        Ok(TransactionReceipt {
            transaction_hash: parse_b256(&row.transaction_hash)?,
            transaction_index: row.transaction_index,
            block_hash: parse_b256(&row.block_hash)?,
            block_number: row.block_number,
            from: parse_address(&row.from_address)?,
            to: parse_opt(row.to_address, parse_address)?,
            cumulative_gas_used: row.cumulative_gas_used,
            gas_used: row.gas_used,
            effective_gas_price: parse_opt(row.effective_gas_price, parse_u128)?,
            contract_address: parse_opt(row.contract_address, parse_address)?,
            logs_bloom: parse_bytes(&row.logs_bloom)?,
            status: row.status,
        })
    }
}

struct LogRow {
    transaction_hash: String,
    log_index: u64,
    block_number: u64,
    transaction_index: u64,
    address: String,
    topics: [Option<String>; 4],
    data: String,
    removed: bool,
}

impl LogRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction_hash: row.get(0)?,
            log_index: row.get(1)?,
            block_number: row.get(2)?,
            transaction_index: row.get(3)?,
            address: row.get(4)?,
            topics: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
            data: row.get(9)?,
            removed: row.get(10)?,
        })
    }
}

impl TryFrom<LogRow> for TransactionLog {
    type Error = eyre::Report;

    fn try_from(row: LogRow) -> Result<Self> {
        let mut topics = Vec::with_capacity(4);
        for topic in row.topics.iter().map_while(|t| t.as_deref()) {
            topics.push(parse_b256(topic)?);
        }
        Ok(TransactionLog {
            transaction_hash: parse_b256(&row.transaction_hash)?,
            log_index: row.log_index,
            block_number: row.block_number,
            transaction_index: row.transaction_index,
            address: parse_address(&row.address)?,
            topics,
            data: parse_bytes(&row.data)?,
            removed: row.removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    const ALICE: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
    const BOB: Address = address!("f02c1c8e6114b1dbe8937a39260b5b0a374432bb");

    fn hash(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    fn mined(n: u8, timestamp: u64, index: u64) -> Transaction {
        Transaction {
            from: Some(ALICE),
            to: Some(BOB),
            block_number: Some(100),
            transaction_index: Some(index),
            ..Transaction::new(hash(n), timestamp)
        }
    }

    #[test]
    fn migrations_create_tables() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let conn = store.conn();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<Result<Vec<_>, _>>()
            .expect("all rows should parse");

        for table in [
            "account_state",
            "internal_transactions",
            "last_block_height",
            "not_synced_transactions",
            "transaction_logs",
            "transaction_receipts",
            "transaction_syncer_states",
            "transaction_tags",
            "transactions",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn transaction_roundtrip_keeps_every_field() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let tx = Transaction {
            is_failed: true,
            value: Some(U256::from(10).pow(U256::from(20))),
            input: Some(Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb])),
            nonce: Some(3),
            gas_price: Some(30_000_000_000),
            max_fee_per_gas: Some(u128::MAX),
            gas_limit: Some(21_000),
            gas_used: Some(21_000),
            ..mined(1, 1_700_000_000, 4)
        };

        store.save_transactions(&[tx.clone()]).expect("save should succeed");
        let loaded = store
            .transaction(&tx.hash)
            .expect("query should succeed")
            .expect("transaction should exist");

        assert_eq!(loaded.sync_order, Some(1));
        assert_eq!(
            loaded,
            Transaction {
                sync_order: Some(1),
                ..tx
            }
        );
    }

    #[test]
    fn upsert_never_overwrites_with_absent_values() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        store
            .save_transactions(&[mined(1, 1_000, 0)])
            .expect("save should succeed");

        let partial = Transaction {
            gas_used: Some(50_000),
            ..Transaction::new(hash(1), 0)
        };
        store.save_transactions(&[partial]).expect("save should succeed");

        let loaded = store
            .transaction(&hash(1))
            .expect("query should succeed")
            .expect("transaction should exist");
        assert_eq!(loaded.timestamp, 1_000);
        assert_eq!(loaded.from, Some(ALICE));
        assert_eq!(loaded.block_number, Some(100));
        assert_eq!(loaded.gas_used, Some(50_000));
        assert_eq!(loaded.sync_order, Some(1), "existing rows keep their order");
    }

    #[test]
    fn lookup_by_hashes_keeps_insertion_order_across_chunks() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let txs: Vec<Transaction> = (0..HASH_CHUNK as u64 + 20)
            .map(|i| Transaction::new(B256::from(U256::from(i + 1)), 1_700_000_000 + i))
            .collect();
        store.save_transactions(&txs).expect("save should succeed");

        let reversed: Vec<B256> = txs.iter().rev().map(|t| t.hash).collect();
        let loaded = store
            .transactions_by_hashes(&reversed)
            .expect("query should succeed");

        assert_eq!(loaded.len(), txs.len());
        assert!(loaded.windows(2).all(|w| w[0].sync_order < w[1].sync_order));
        assert_eq!(loaded[0].hash, txs[0].hash);
    }

    #[test]
    fn history_orders_by_timestamp_index_and_pages_by_hash() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        store
            .save_transactions(&[
                mined(1, 100, 0),
                mined(2, 200, 0),
                mined(3, 200, 1),
                mined(4, 300, 0),
            ])
            .expect("save should succeed");

        let page = store
            .transactions(&TransactionQuery {
                limit: Some(2),
                ..Default::default()
            })
            .expect("query should succeed");
        let hashes: Vec<B256> = page.iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![hash(4), hash(3)]);

        let next = store
            .transactions(&TransactionQuery {
                from_hash: Some(hash(3)),
                ..Default::default()
            })
            .expect("query should succeed");
        let hashes: Vec<B256> = next.iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![hash(2), hash(1)]);
    }

    #[test]
    fn history_filters_by_tag_groups() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        store
            .save_transactions(&[mined(1, 100, 0), mined(2, 200, 0), mined(3, 300, 0)])
            .expect("save should succeed");
        store
            .save_tags(&[
                (hash(1), vec!["outgoing".into(), "ETH".into()]),
                (hash(2), vec!["incoming".into(), "ETH".into()]),
                (hash(3), vec!["outgoing".into(), "eip20".into()]),
            ])
            .expect("tags should save");

        let found = store
            .transactions(&TransactionQuery {
                tags: vec![vec!["outgoing".into()], vec!["ETH".into(), "swap".into()]],
                ..Default::default()
            })
            .expect("query should succeed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hash, hash(1));
    }

    #[test]
    fn relevance_includes_internal_and_log_participants() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let carol = address!("1111111111111111111111111111111111111111");
        let stranger = Transaction {
            from: Some(BOB),
            to: Some(BOB),
            ..mined(9, 900, 0)
        };
        let via_internal = Transaction {
            from: Some(BOB),
            to: Some(BOB),
            ..mined(8, 800, 0)
        };
        let via_log = Transaction {
            from: Some(BOB),
            to: Some(BOB),
            ..mined(7, 700, 0)
        };
        store
            .save_transactions(&[stranger, via_internal, via_log])
            .expect("save should succeed");
        store
            .save_internal_transactions(&[InternalTransaction {
                hash: hash(8),
                block_number: 100,
                from: BOB,
                to: carol,
                value: U256::from(1),
                trace_id: "0_1".into(),
            }])
            .expect("internal save should succeed");
        store
            .save_logs(&[TransactionLog {
                transaction_hash: hash(7),
                log_index: 0,
                block_number: 100,
                transaction_index: 0,
                address: BOB,
                topics: vec![
                    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"),
                    BOB.into_word(),
                    carol.into_word(),
                ],
                data: Bytes::new(),
                removed: false,
            }])
            .expect("log save should succeed");

        let found = store
            .transactions(&TransactionQuery {
                address: Some(carol),
                ..Default::default()
            })
            .expect("query should succeed");
        let hashes: Vec<B256> = found.iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![hash(8), hash(7)]);
    }

    #[test]
    fn logs_roundtrip_preserves_topic_count() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let log = TransactionLog {
            transaction_hash: hash(1),
            log_index: 3,
            block_number: 10,
            transaction_index: 2,
            address: ALICE,
            topics: vec![hash(0xaa), hash(0xbb)],
            data: Bytes::from_static(&[1, 2, 3]),
            removed: false,
        };
        store.save_logs(&[log.clone()]).expect("save should succeed");
        assert_eq!(store.logs(&[hash(1)]).expect("query should succeed"), vec![log]);
    }

    #[test]
    fn not_synced_pool_deduplicates_and_orders_by_retry() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let inserted = store
            .add_not_synced(&[
                NotSyncedTransaction::new(hash(1)),
                NotSyncedTransaction::new(hash(2)),
                NotSyncedTransaction::new(hash(1)),
            ])
            .expect("add should succeed");
        assert_eq!(inserted, 2);
        assert_eq!(store.not_synced_count().expect("count"), 2);

        let mut first = NotSyncedTransaction::new(hash(1));
        first.retry_count = 1;
        store.update_not_synced(&first).expect("update should succeed");

        let ordered = store.not_synced_transactions(10).expect("query should succeed");
        let hashes: Vec<B256> = ordered.iter().map(|e| e.hash).collect();
        assert_eq!(hashes, vec![hash(2), hash(1)]);

        store.remove_not_synced(&hash(2)).expect("remove should succeed");
        assert_eq!(store.not_synced_transactions(1).expect("query")[0].hash, hash(1));
    }

    #[test]
    fn syncer_cursor_never_regresses() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let save = |n| {
            store
                .save_syncer_state(&TransactionSyncerState {
                    syncer_id: "ethereum_transaction_syncer".into(),
                    last_block_number: n,
                })
                .expect("save should succeed")
        };
        save(120);
        save(90);

        let state = store
            .syncer_state("ethereum_transaction_syncer")
            .expect("query should succeed")
            .expect("state should exist");
        assert_eq!(state.last_block_number, 120);
        assert!(store.syncer_state("unknown").expect("query").is_none());
    }

    #[test]
    fn dropped_marking_only_touches_pending() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let pending = Transaction {
            from: Some(ALICE),
            nonce: Some(5),
            ..Transaction::new(hash(1), 100)
        };
        store
            .save_transactions(&[pending, mined(2, 100, 0)])
            .expect("save should succeed");

        let with_nonce = store
            .pending_transactions_with_nonce(&ALICE, 5)
            .expect("query should succeed");
        assert_eq!(with_nonce.len(), 1);

        let updated = store
            .mark_dropped(&[
                DroppedTransaction {
                    hash: hash(1),
                    replaced_with: hash(2),
                },
                DroppedTransaction {
                    hash: hash(2),
                    replaced_with: hash(3),
                },
            ])
            .expect("mark should succeed");
        assert_eq!(updated, 1);
        assert!(store.pending_transactions().expect("query").is_empty());
    }

    #[test]
    fn account_state_and_block_height_persist() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("wallet.db");
        let path = path.to_str().expect("utf8 path");

        {
            let store = Store::new(path).expect("store should open");
            store
                .save_account_state(&AccountState {
                    balance: U256::from(42u64),
                    nonce: 7,
                })
                .expect("save should succeed");
            store.save_last_block_height(19_000_000).expect("save should succeed");
        }

        let store = Store::new(path).expect("store should reopen");
        let state = store.account_state().expect("query").expect("state");
        assert_eq!(state.balance, U256::from(42u64));
        assert_eq!(state.nonce, 7);
        assert_eq!(store.last_block_height().expect("query"), Some(19_000_000));
    }
}
