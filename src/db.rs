//! SQLite persistence for the transaction ledger.
//!
//! One `transactions` table keyed by payment hash. The `seq` column keeps
//! insertion order, which is the display order of the ledger.

use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::DB_FILENAME;
use crate::error::StoreError;
use crate::transaction::{Geolocation, Preimage, Transaction, TxOrigin};
use crate::types::Amount;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given directory path.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join(DB_FILENAME))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payment_hash TEXT NOT NULL UNIQUE,
                payment_request TEXT,
                amount_sat INTEGER NOT NULL,
                fee_sat INTEGER,
                status TEXT NOT NULL DEFAULT 'OPEN',
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                preimage TEXT,
                description TEXT,
                payer TEXT,
                remote_pubkey TEXT,
                value_fiat REAL,
                value_fiat_currency TEXT,
                origin TEXT NOT NULL DEFAULT '{\"type\":\"normal\"}',
                note TEXT,
                location_lat REAL,
                location_long REAL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;

        // Secondary lookup while an invoice screen waits for settlement
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_payment_request
             ON transactions(payment_request)",
            [],
        )?;

        Ok(())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Insert or update a single transaction
    pub fn save_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let conn = self.conn();
        upsert_row(&conn, tx)
    }

    /// Insert or update many transactions atomically. Either every row is
    /// written or none is.
    pub fn save_transactions(&self, txs: &[Transaction]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let db_tx = conn.transaction()?;
        for tx in txs {
            upsert_row(&db_tx, tx)?;
        }
        db_tx.commit()?;
        Ok(())
    }

    /// Load every transaction in insertion order (oldest first)
    pub fn load_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payment_hash, payment_request, amount_sat, fee_sat, status, created_at,
                    expires_at, preimage, description, payer, remote_pubkey, value_fiat,
                    value_fiat_currency, origin, note, location_lat, location_long
             FROM transactions
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([], TransactionRow::from_row)?;

        let mut txs = Vec::new();
        for row in rows {
            txs.push(row?.into_transaction()?);
        }
        Ok(txs)
    }

    /// Load one transaction by payment hash
    #[cfg(test)]
    pub fn load_transaction(&self, payment_hash: &str) -> Result<Option<Transaction>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payment_hash, payment_request, amount_sat, fee_sat, status, created_at,
                    expires_at, preimage, description, payer, remote_pubkey, value_fiat,
                    value_fiat_currency, origin, note, location_lat, location_long
             FROM transactions WHERE payment_hash = ?1",
        )?;

        let mut rows = stmt.query(params![payment_hash])?;
        match rows.next()? {
            Some(row) => Ok(Some(TransactionRow::from_row(row)?.into_transaction()?)),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub fn transaction_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn upsert_row(conn: &Connection, tx: &Transaction) -> Result<(), StoreError> {
    let origin = serde_json::to_string(&tx.origin)?;
    conn.execute(
        "INSERT INTO transactions (payment_hash, payment_request, amount_sat, fee_sat, status,
                                   created_at, expires_at, preimage, description, payer,
                                   remote_pubkey, value_fiat, value_fiat_currency, origin,
                                   note, location_lat, location_long)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(payment_hash) DO UPDATE SET
            payment_request = ?2,
            amount_sat = ?3,
            fee_sat = ?4,
            status = ?5,
            created_at = ?6,
            expires_at = ?7,
            preimage = ?8,
            description = ?9,
            payer = ?10,
            remote_pubkey = ?11,
            value_fiat = ?12,
            value_fiat_currency = ?13,
            origin = ?14,
            note = ?15,
            location_lat = ?16,
            location_long = ?17,
            updated_at = strftime('%s', 'now')",
        params![
            tx.payment_hash,
            tx.payment_request,
            tx.amount.to_sats(),
            tx.fee.map(Amount::to_sats),
            tx.status.as_str(),
            tx.created_at,
            tx.expires_at,
            tx.preimage.map(|p| p.to_hex()),
            tx.description,
            tx.payer,
            tx.remote_pubkey,
            tx.value_fiat,
            tx.value_fiat_currency,
            origin,
            tx.note,
            tx.location.map(|l| l.latitude),
            tx.location.map(|l| l.longitude),
        ],
    )?;
    Ok(())
}

// =============================================================================
// Record Types
// =============================================================================

struct TransactionRow {
    payment_hash: String,
    payment_request: Option<String>,
    amount_sat: i64,
    fee_sat: Option<i64>,
    status: String,
    created_at: i64,
    expires_at: i64,
    preimage: Option<String>,
    description: Option<String>,
    payer: Option<String>,
    remote_pubkey: Option<String>,
    value_fiat: Option<f64>,
    value_fiat_currency: Option<String>,
    origin: String,
    note: Option<String>,
    location_lat: Option<f64>,
    location_long: Option<f64>,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            payment_hash: row.get(0)?,
            payment_request: row.get(1)?,
            amount_sat: row.get(2)?,
            fee_sat: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            expires_at: row.get(6)?,
            preimage: row.get(7)?,
            description: row.get(8)?,
            payer: row.get(9)?,
            remote_pubkey: row.get(10)?,
            value_fiat: row.get(11)?,
            value_fiat_currency: row.get(12)?,
            origin: row.get(13)?,
            note: row.get(14)?,
            location_lat: row.get(15)?,
            location_long: row.get(16)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction, StoreError> {
        let status = self.status.parse().map_err(|reason| StoreError::Corrupt {
            hash: self.payment_hash.clone(),
            reason,
        })?;
        let preimage = self
            .preimage
            .as_deref()
            .map(Preimage::from_hex)
            .transpose()
            .map_err(|reason| StoreError::Corrupt {
                hash: self.payment_hash.clone(),
                reason,
            })?;
        let origin: TxOrigin = serde_json::from_str(&self.origin)?;
        let location = match (self.location_lat, self.location_long) {
            (Some(latitude), Some(longitude)) => Some(Geolocation { latitude, longitude }),
            _ => None,
        };

        Ok(Transaction {
            payment_hash: self.payment_hash,
            payment_request: self.payment_request,
            amount: Amount::from_sats(self.amount_sat),
            fee: self.fee_sat.map(Amount::from_sats),
            status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            preimage,
            description: self.description,
            payer: self.payer,
            remote_pubkey: self.remote_pubkey,
            value_fiat: self.value_fiat,
            value_fiat_currency: self.value_fiat_currency,
            origin,
            note: self.note,
            location,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
