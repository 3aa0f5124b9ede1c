//! The transaction ledger: an ordered, persisted set of transactions keyed by
//! payment hash.
//!
//! All mutation goes through `upsert`, `cancel`, `expire_overdue`,
//! `apply_batch` and the local note/location edits. Every status transition is
//! persisted first, then applied in memory, then announced on a broadcast
//! channel and written to the audit log.

use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audit::audit_event;
use crate::constants::LEDGER_EVENT_BUFFER;
use crate::db::Database;
use crate::error::{LedgerError, MergeRejection, StoreError};
use crate::transaction::{Direction, Geolocation, Transaction, TxStatus};
use crate::types::Amount;

/// Change notification for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub payment_hash: String,
    /// `None` when the record was just inserted.
    pub from: Option<TxStatus>,
    pub to: TxStatus,
}

/// Filter for `Ledger::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxFilter {
    /// Hide EXPIRED and CANCELED transactions.
    pub hide_archived: bool,
    pub direction: Option<Direction>,
    pub status: Option<TxStatus>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl TxFilter {
    pub fn hide_archived(mut self, hide: bool) -> Self {
        self.hide_archived = hide;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn status(mut self, status: TxStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Page `page` (zero based) of `per_page` items.
    pub fn page(mut self, page: usize, per_page: usize) -> Self {
        self.offset = page.saturating_mul(per_page);
        self.limit = Some(per_page);
        self
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        if self.hide_archived && tx.is_archived() {
            return false;
        }
        if self.direction.is_some_and(|d| d != tx.direction()) {
            return false;
        }
        if self.status.is_some_and(|s| s != tx.status) {
            return false;
        }
        true
    }
}

/// A copy of the ledger taken at one point in time, most recent first.
/// Iterating is lazy and can be restarted; later ledger mutations never
/// affect it.
#[derive(Debug, Clone)]
pub struct TransactionList {
    items: Arc<[Transaction]>,
    filter: TxFilter,
}

impl TransactionList {
    pub fn new(items: Arc<[Transaction]>, filter: TxFilter) -> Self {
        Self { items, filter }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.items
            .iter()
            .filter(move |tx| self.filter.matches(tx))
            .skip(self.filter.offset)
            .take(self.filter.limit.unwrap_or(usize::MAX))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<Transaction> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a TransactionList {
    type Item = &'a Transaction;
    type IntoIter = Box<dyn Iterator<Item = &'a Transaction> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated { from: TxStatus, to: TxStatus },
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    /// Already in a terminal state; nothing changed.
    AlreadyFinal(TxStatus),
    /// In-flight payments cannot be canceled locally.
    NotCancelable(TxStatus),
}

/// Summary of one `apply_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub expired: usize,
    /// Node still reports a non-terminal status for a locally terminal record.
    pub stale: usize,
    pub rejected: Vec<MergeRejection>,
}

enum Merge {
    Apply(Transaction),
    Unchanged,
    Stale,
}

/// A preimage is only kept once a transaction is SETTLED.
fn strip_unsettled_preimage(tx: &mut Transaction) {
    if tx.status != TxStatus::Settled {
        tx.preimage = None;
    }
}

/// Merge node data into an existing record.
///
/// Node data wins for status and node-owned fields. Note and location are
/// local only and always kept. A specific local origin payload (LNURL,
/// keysend, on-chain) is kept when the node only knows a plain payment.
fn merge(existing: &Transaction, incoming: Transaction) -> Result<Merge, MergeRejection> {
    if existing.direction() != incoming.direction() {
        return Err(MergeRejection::DirectionMismatch {
            hash: existing.payment_hash.clone(),
            stored: existing.direction(),
            reported: incoming.direction(),
        });
    }

    if !existing.status.can_transition_to(incoming.status) {
        if !incoming.status.is_terminal() {
            return Ok(Merge::Stale);
        }
        return Err(MergeRejection::StatusRegression {
            hash: existing.payment_hash.clone(),
            from: existing.status,
            to: incoming.status,
        });
    }

    let mut merged = incoming;
    merged.created_at = existing.created_at;
    merged.payment_request = merged.payment_request.or_else(|| existing.payment_request.clone());
    merged.description = merged.description.or_else(|| existing.description.clone());
    merged.payer = merged.payer.or_else(|| existing.payer.clone());
    merged.remote_pubkey = merged.remote_pubkey.or_else(|| existing.remote_pubkey.clone());
    merged.fee = merged.fee.or(existing.fee);
    merged.preimage = merged.preimage.or(existing.preimage);
    if merged.value_fiat.is_none() {
        merged.value_fiat = existing.value_fiat;
        merged.value_fiat_currency = existing.value_fiat_currency.clone();
    }
    if merged.origin == Default::default() {
        merged.origin = existing.origin.clone();
    }
    merged.note = existing.note.clone();
    merged.location = existing.location;
    strip_unsettled_preimage(&mut merged);

    if merged == *existing {
        Ok(Merge::Unchanged)
    } else {
        Ok(Merge::Apply(merged))
    }
}

pub struct Ledger {
    /// Insertion order, oldest first.
    records: Vec<Transaction>,
    by_hash: HashMap<String, usize>,
    by_request: HashMap<String, String>,
    db: Database,
    events: broadcast::Sender<LedgerEvent>,
}

impl Ledger {
    /// Load the ledger from the database.
    pub fn load(db: Database) -> Result<Self, StoreError> {
        let records = db.load_transactions()?;
        let (events, _) = broadcast::channel(LEDGER_EVENT_BUFFER);
        let mut ledger = Self {
            records,
            by_hash: HashMap::new(),
            by_request: HashMap::new(),
            db,
            events,
        };
        ledger.reindex();
        debug!(count = ledger.records.len(), "ledger loaded");
        Ok(ledger)
    }

    fn reindex(&mut self) {
        self.by_hash.clear();
        self.by_request.clear();
        for (i, tx) in self.records.iter().enumerate() {
            self.by_hash.insert(tx.payment_hash.clone(), i);
            if let Some(request) = &tx.payment_request {
                self.by_request.insert(request.clone(), tx.payment_hash.clone());
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get_by_hash(&self, payment_hash: &str) -> Option<Transaction> {
        self.by_hash.get(payment_hash).map(|&i| self.records[i].clone())
    }

    pub fn get_by_payment_request(&self, payment_request: &str) -> Option<Transaction> {
        self.by_request
            .get(payment_request)
            .and_then(|hash| self.get_by_hash(hash))
    }

    /// Copy of every transaction, most recent first.
    pub fn snapshot(&self) -> Arc<[Transaction]> {
        self.records.iter().rev().cloned().collect()
    }

    pub fn list(&self, filter: TxFilter) -> TransactionList {
        TransactionList::new(self.snapshot(), filter)
    }

    /// Insert a new transaction or merge node data into an existing one.
    pub fn upsert(&mut self, mut tx: Transaction) -> Result<UpsertOutcome, LedgerError> {
        let Some(&i) = self.by_hash.get(&tx.payment_hash) else {
            strip_unsettled_preimage(&mut tx);
            self.db.save_transaction(&tx)?;
            self.insert(tx);
            return Ok(UpsertOutcome::Inserted);
        };

        let existing = &self.records[i];
        match merge(existing, tx) {
            Ok(Merge::Apply(merged)) => {
                let from = existing.status;
                let to = merged.status;
                self.db.save_transaction(&merged)?;
                self.replace(i, merged);
                if from != to {
                    self.announce(&self.records[i].payment_hash.clone(), Some(from), to);
                }
                Ok(UpsertOutcome::Updated { from, to })
            }
            Ok(Merge::Unchanged) | Ok(Merge::Stale) => Ok(UpsertOutcome::Unchanged),
            Err(rejection) => {
                warn!(
                    payment_hash = rejection.payment_hash(),
                    %rejection,
                    "rejected transaction update"
                );
                Err(rejection.into())
            }
        }
    }

    fn insert(&mut self, tx: Transaction) {
        let hash = tx.payment_hash.clone();
        let status = tx.status;
        if let Some(request) = &tx.payment_request {
            self.by_request.insert(request.clone(), hash.clone());
        }
        self.by_hash.insert(hash.clone(), self.records.len());
        self.records.push(tx);
        self.announce(&hash, None, status);
    }

    fn replace(&mut self, i: usize, tx: Transaction) {
        if let Some(request) = &tx.payment_request {
            self.by_request.insert(request.clone(), tx.payment_hash.clone());
        }
        self.records[i] = tx;
    }

    fn announce(&self, payment_hash: &str, from: Option<TxStatus>, to: TxStatus) {
        match from {
            Some(from) => info!(payment_hash, %from, %to, "transaction status changed"),
            None => debug!(payment_hash, %to, "transaction recorded"),
        }
        audit_event(
            "TX_STATUS",
            json!({
                "payment_hash": payment_hash,
                "from": from.map(|s| s.as_str()),
                "to": to.as_str(),
            }),
        );
        // No receivers is fine
        let _ = self.events.send(LedgerEvent {
            payment_hash: payment_hash.to_string(),
            from,
            to,
        });
    }

    /// Cancel an open invoice. Terminal transactions are left untouched, so a
    /// cancel racing a settlement never un-settles it.
    pub fn cancel(&mut self, payment_hash: &str) -> Result<CancelOutcome, LedgerError> {
        let i = *self
            .by_hash
            .get(payment_hash)
            .ok_or_else(|| LedgerError::NotFound(payment_hash.to_string()))?;

        let current = self.records[i].status;
        match current {
            TxStatus::Open => {
                let canceled = self.records[i].clone().with_status(TxStatus::Canceled);
                self.db.save_transaction(&canceled)?;
                self.replace(i, canceled);
                self.announce(payment_hash, Some(current), TxStatus::Canceled);
                Ok(CancelOutcome::Canceled)
            }
            TxStatus::InFlight => Ok(CancelOutcome::NotCancelable(current)),
            terminal => {
                debug!(payment_hash, status = %terminal, "cancel ignored for final transaction");
                Ok(CancelOutcome::AlreadyFinal(terminal))
            }
        }
    }

    /// Move every OPEN transaction whose expiry has passed to EXPIRED.
    /// Returns the number of transactions expired.
    pub fn expire_overdue(&mut self, now: i64) -> Result<usize, StoreError> {
        let overdue: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.is_overdue(now))
            .map(|(i, _)| i)
            .collect();
        if overdue.is_empty() {
            return Ok(0);
        }

        let expired: Vec<Transaction> = overdue
            .iter()
            .map(|&i| self.records[i].clone().with_status(TxStatus::Expired))
            .collect();
        self.db.save_transactions(&expired)?;

        for (i, tx) in overdue.iter().copied().zip(expired) {
            let hash = tx.payment_hash.clone();
            self.replace(i, tx);
            self.announce(&hash, Some(TxStatus::Open), TxStatus::Expired);
        }
        Ok(overdue.len())
    }

    /// Sum of OPEN receive invoices. Expires overdue invoices first.
    pub fn open_invoice_total(&mut self, now: i64) -> Result<Amount, StoreError> {
        self.expire_overdue(now)?;
        Ok(self
            .records
            .iter()
            .filter(|tx| tx.status == TxStatus::Open && tx.direction() == Direction::Receive)
            .map(|tx| tx.amount)
            .sum())
    }

    /// Local edit; never touched by node merges.
    pub fn set_note(&mut self, payment_hash: &str, note: Option<String>) -> Result<(), LedgerError> {
        self.edit_local(payment_hash, |tx| tx.note = note)
    }

    /// Local edit; never touched by node merges.
    pub fn set_location(
        &mut self,
        payment_hash: &str,
        location: Option<Geolocation>,
    ) -> Result<(), LedgerError> {
        self.edit_local(payment_hash, |tx| tx.location = location)
    }

    fn edit_local(
        &mut self,
        payment_hash: &str,
        edit: impl FnOnce(&mut Transaction),
    ) -> Result<(), LedgerError> {
        let i = *self
            .by_hash
            .get(payment_hash)
            .ok_or_else(|| LedgerError::NotFound(payment_hash.to_string()))?;
        let mut tx = self.records[i].clone();
        edit(&mut tx);
        self.db.save_transaction(&tx)?;
        self.records[i] = tx;
        Ok(())
    }

    /// Merge one reconciliation pass worth of node records.
    ///
    /// Overdue invoices are expired first, except those the node reports in a
    /// non-OPEN state so a settlement seen in the same pass wins over local
    /// expiry. Each record is then merged on a staging copy; rejected records
    /// are skipped and reported. All changed rows are written in one SQLite
    /// transaction and only then swapped in, so a storage failure leaves the
    /// ledger untouched.
    pub fn apply_batch(
        &mut self,
        now: i64,
        incoming: Vec<Transaction>,
    ) -> Result<MergeReport, StoreError> {
        let mut report = MergeReport::default();
        let reported_final: HashSet<String> = incoming
            .iter()
            .filter(|tx| tx.status != TxStatus::Open)
            .map(|tx| tx.payment_hash.clone())
            .collect();

        let mut staged = self.records.clone();
        let mut index = self.by_hash.clone();
        // staged index -> status before this batch (None for inserts)
        let mut changed: BTreeMap<usize, Option<TxStatus>> = BTreeMap::new();

        for (i, tx) in staged.iter_mut().enumerate() {
            if tx.is_overdue(now) && !reported_final.contains(&tx.payment_hash) {
                changed.entry(i).or_insert(Some(tx.status));
                tx.status = TxStatus::Expired;
                report.expired += 1;
            }
        }

        for tx in incoming {
            match index.get(&tx.payment_hash).copied() {
                None => {
                    let mut tx = tx;
                    if tx.is_overdue(now) {
                        tx.status = TxStatus::Expired;
                    }
                    strip_unsettled_preimage(&mut tx);
                    index.insert(tx.payment_hash.clone(), staged.len());
                    changed.insert(staged.len(), None);
                    staged.push(tx);
                    report.inserted += 1;
                }
                Some(i) => match merge(&staged[i], tx) {
                    Ok(Merge::Apply(merged)) => {
                        changed.entry(i).or_insert(Some(staged[i].status));
                        staged[i] = merged;
                        report.updated += 1;
                    }
                    Ok(Merge::Unchanged) => {}
                    Ok(Merge::Stale) => report.stale += 1,
                    Err(rejection) => {
                        warn!(
                            payment_hash = rejection.payment_hash(),
                            %rejection,
                            "rejected node record"
                        );
                        report.rejected.push(rejection);
                    }
                },
            }
        }

        if changed.is_empty() {
            return Ok(report);
        }

        let rows: Vec<Transaction> = changed.keys().map(|&i| staged[i].clone()).collect();
        self.db.save_transactions(&rows)?;

        self.records = staged;
        self.reindex();
        for (i, from) in changed {
            let tx = &self.records[i];
            if from != Some(tx.status) {
                self.announce(&tx.payment_hash, from, tx.status);
            }
        }

        Ok(report)
    }
}
