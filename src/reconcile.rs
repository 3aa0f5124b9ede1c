//! Reconciliation engine.
//!
//! `WalletCore` owns the ledger and the current channel set. A pass pulls
//! channels and transactions from the node, merges them into the ledger and
//! recomputes balances. Concurrent triggers share a single in-flight pass. The
//! pass runs on its own task, so dropping a `refresh` future never aborts it.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audit::audit_event;
use crate::channels::{Balances, ChannelBalance, ChannelSet, ChannelSnapshot};
use crate::config::Config;
use crate::constants::{NUM_TRANSACTIONS_PER_LOAD, POST_ACTION_SYNC_DELAY_MS};
use crate::error::{ActionError, DecodeError, LedgerError, NodeError, StoreError, SyncError};
use crate::ledger::{CancelOutcome, Ledger, LedgerEvent, MergeReport, TransactionList, TxFilter};
use crate::lnurl::{self, DecodedSuccessAction, SuccessAction};
use crate::node::{NodeSource, SendRequest};
use crate::transaction::{Geolocation, Transaction, TxOrigin, TxStatus};
use crate::types::Amount;

/// What asked for a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Periodic,
    Foreground,
    /// Follow-up after a send, cancel or channel close.
    PostAction,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Manual => "manual",
            Trigger::Periodic => "periodic",
            Trigger::Foreground => "foreground",
            Trigger::PostAction => "post-action",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle {
        last_synced: Option<i64>,
        last_error: Option<SyncError>,
    },
    Syncing {
        trigger: Trigger,
        last_synced: Option<i64>,
    },
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing { .. })
    }

    pub fn last_synced(&self) -> Option<i64> {
        match self {
            SyncState::Idle { last_synced, .. } | SyncState::Syncing { last_synced, .. } => {
                *last_synced
            }
        }
    }
}

/// Result of one completed pass, shared by every caller attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: Trigger,
    pub synced_at: i64,
    pub channels: usize,
    pub merge: MergeReport,
    pub balances: Balances,
}

/// Point-in-time copy of everything a reader may display.
#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    /// Most recent first.
    pub transactions: Arc<[Transaction]>,
    pub channels: Arc<[ChannelSnapshot]>,
    pub balances: Balances,
    pub last_synced: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub follow_up_delay: Duration,
    pub hide_archived: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            follow_up_delay: Duration::from_millis(POST_ACTION_SYNC_DELAY_MS),
            hide_archived: true,
        }
    }
}

impl From<&Config> for CoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            follow_up_delay: Duration::from_millis(config.sync.follow_up_delay_ms),
            hide_archived: config.hide_archived,
        }
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;
type PassFuture = Shared<BoxFuture<'static, Result<SyncReport, SyncError>>>;

struct WalletState {
    ledger: Ledger,
    channels: ChannelSet,
    balances: Balances,
}

struct Inner<N> {
    node: Arc<N>,
    state: Mutex<WalletState>,
    in_flight: Mutex<Option<PassFuture>>,
    status: Mutex<SyncState>,
    options: CoreOptions,
    clock: Clock,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn system_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Clears the in-flight slot when the pass task ends, even by panic.
struct PassGuard<N>(Arc<Inner<N>>);

impl<N> Drop for PassGuard<N> {
    fn drop(&mut self) {
        *lock(&self.0.in_flight) = None;
    }
}

impl<N: NodeSource> Inner<N> {
    fn now(&self) -> i64 {
        (self.clock)()
    }

    async fn run_pass(&self, trigger: Trigger) -> Result<SyncReport, SyncError> {
        let last_synced = {
            let mut status = lock(&self.status);
            let last_synced = status.last_synced();
            *status = SyncState::Syncing {
                trigger,
                last_synced,
            };
            last_synced
        };
        debug!(%trigger, "reconciliation pass started");

        let result = self.pass(trigger).await;

        let mut status = lock(&self.status);
        *status = match &result {
            Ok(report) => SyncState::Idle {
                last_synced: Some(report.synced_at),
                last_error: None,
            },
            Err(e) => SyncState::Idle {
                last_synced,
                last_error: Some(e.clone()),
            },
        };
        result
    }

    async fn pass(&self, trigger: Trigger) -> Result<SyncReport, SyncError> {
        let (channels, transactions) =
            tokio::try_join!(self.node.list_channels(), self.node.list_transactions())
                .map_err(|e| {
                    warn!(%trigger, error = %e, "node fetch failed, keeping current state");
                    SyncError::from(e)
                })?;

        let now = self.now();
        let mut state = lock(&self.state);
        let merge = state.ledger.apply_batch(now, transactions)?;
        state.channels = ChannelSet::new(channels);
        state.balances = state.channels.balances();

        let report = SyncReport {
            trigger,
            synced_at: now,
            channels: state.channels.channels().len(),
            merge,
            balances: state.balances,
        };
        info!(
            %trigger,
            channels = report.channels,
            inserted = report.merge.inserted,
            updated = report.merge.updated,
            expired = report.merge.expired,
            stale = report.merge.stale,
            rejected = report.merge.rejected.len(),
            total = %report.balances.total,
            "reconciliation pass complete"
        );
        Ok(report)
    }
}

/// Single owner of the wallet's ledger and channel state.
pub struct WalletCore<N> {
    inner: Arc<Inner<N>>,
}

impl<N> Clone for WalletCore<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: NodeSource> WalletCore<N> {
    pub fn new(node: Arc<N>, ledger: Ledger, options: CoreOptions) -> Self {
        Self::with_clock(node, ledger, options, system_now)
    }

    /// Use `clock` (unix seconds) for expiry decisions and sync timestamps.
    pub fn with_clock(
        node: Arc<N>,
        ledger: Ledger,
        options: CoreOptions,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        let inner = Inner {
            node,
            state: Mutex::new(WalletState {
                ledger,
                channels: ChannelSet::default(),
                balances: Balances::default(),
            }),
            in_flight: Mutex::new(None),
            status: Mutex::new(SyncState::Idle {
                last_synced: None,
                last_error: None,
            }),
            options,
            clock: Arc::new(clock),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Run a reconciliation pass, or attach to the one already running.
    pub async fn refresh(&self, trigger: Trigger) -> Result<SyncReport, SyncError> {
        let pass = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(pass) => {
                    debug!(%trigger, "attaching to in-flight pass");
                    pass.clone()
                }
                None => {
                    let guard = PassGuard(Arc::clone(&self.inner));
                    let handle = tokio::spawn(async move {
                        let guard = guard;
                        guard.0.run_pass(trigger).await
                    });
                    let pass = async move { handle.await.unwrap_or(Err(SyncError::Aborted)) }
                        .boxed()
                        .shared();
                    *slot = Some(pass.clone());
                    pass
                }
            }
        };
        pass.await
    }

    /// Drive `Periodic` passes every `interval` until the handle is aborted.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = core.refresh(Trigger::Periodic).await {
                    warn!(error = %e, retryable = e.is_retryable(), "periodic sync failed");
                }
            }
        })
    }

    /// One extra pass after the configured delay; node state lags actions.
    fn schedule_follow_up(&self) {
        let core = self.clone();
        let delay = self.inner.options.follow_up_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = core.refresh(Trigger::PostAction).await {
                warn!(error = %e, "follow-up sync failed");
            }
        });
    }

    pub fn sync_status(&self) -> SyncState {
        lock(&self.inner.status).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        lock(&self.inner.state).ledger.subscribe()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn snapshot(&self) -> WalletSnapshot {
        let last_synced = self.sync_status().last_synced();
        let state = lock(&self.inner.state);
        WalletSnapshot {
            transactions: state.ledger.snapshot(),
            channels: state.channels.channels(),
            balances: state.balances,
            last_synced,
        }
    }

    pub fn get_transaction(&self, payment_hash: &str) -> Option<Transaction> {
        lock(&self.inner.state).ledger.get_by_hash(payment_hash)
    }

    pub fn get_transaction_by_payment_request(&self, payment_request: &str) -> Option<Transaction> {
        lock(&self.inner.state)
            .ledger
            .get_by_payment_request(payment_request)
    }

    /// First page of the transaction list, honouring the archive setting.
    pub fn default_filter(&self) -> TxFilter {
        TxFilter::default()
            .hide_archived(self.inner.options.hide_archived)
            .page(0, NUM_TRANSACTIONS_PER_LOAD)
    }

    pub fn list_transactions(&self, filter: TxFilter) -> TransactionList {
        lock(&self.inner.state).ledger.list(filter)
    }

    /// Spendable balance over active channels.
    pub fn balance(&self) -> Amount {
        lock(&self.inner.state).balances.total
    }

    pub fn pending_open_balance(&self) -> Amount {
        lock(&self.inner.state).balances.pending_open
    }

    pub fn balances(&self) -> Balances {
        lock(&self.inner.state).balances
    }

    pub fn per_channel_balances(&self) -> Vec<ChannelBalance> {
        lock(&self.inner.state).channels.per_channel()
    }

    /// Sum of invoices still waiting for payment.
    pub fn open_invoice_total(&self) -> Result<Amount, StoreError> {
        let now = self.inner.now();
        lock(&self.inner.state).ledger.open_invoice_total(now)
    }

    /// Decode the LNURL success action attached to `tx`. The encrypted
    /// variant is only opened once the payment has settled.
    pub fn decode_success_action(&self, tx: &Transaction) -> Result<DecodedSuccessAction, DecodeError> {
        let action = tx
            .origin
            .success_action()
            .ok_or(DecodeError::NoSuccessAction)?;
        if matches!(action, SuccessAction::Aes { .. }) && tx.status != TxStatus::Settled {
            return Err(DecodeError::NotSettled);
        }
        lnurl::decode(action, tx.preimage.as_ref())
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    pub fn set_note(&self, payment_hash: &str, note: Option<String>) -> Result<(), LedgerError> {
        lock(&self.inner.state).ledger.set_note(payment_hash, note)
    }

    pub fn set_location(
        &self,
        payment_hash: &str,
        location: Option<Geolocation>,
    ) -> Result<(), LedgerError> {
        lock(&self.inner.state)
            .ledger
            .set_location(payment_hash, location)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Cancel an open invoice on the node, then locally. A settlement that
    /// lands first wins: the local cancel becomes a no-op.
    pub async fn cancel_invoice(&self, payment_hash: &str) -> Result<CancelOutcome, ActionError> {
        let current = self
            .get_transaction(payment_hash)
            .ok_or_else(|| LedgerError::NotFound(payment_hash.to_string()))?;
        match current.status {
            TxStatus::Open => {}
            TxStatus::InFlight => return Ok(CancelOutcome::NotCancelable(TxStatus::InFlight)),
            terminal => return Ok(CancelOutcome::AlreadyFinal(terminal)),
        }

        let result = self.inner.node.cancel_invoice(payment_hash).await;
        self.schedule_follow_up();
        if let Err(e) = result {
            // The node may have settled it before we asked.
            if let Err(sync) = self.refresh(Trigger::PostAction).await {
                debug!(payment_hash, error = %sync, "recheck after cancel refusal failed");
            }
            if let Some(status) = self
                .get_transaction(payment_hash)
                .map(|tx| tx.status)
                .filter(|status| status.is_terminal())
            {
                info!(payment_hash, %status, "invoice finalized on the node before cancel");
                return Ok(CancelOutcome::AlreadyFinal(status));
            }
            warn!(payment_hash, error = %e, "node refused invoice cancel");
            return Err(e.into());
        }

        let outcome = lock(&self.inner.state).ledger.cancel(payment_hash)?;
        audit_event(
            "INVOICE_CANCEL",
            json!({ "payment_hash": payment_hash, "outcome": format!("{:?}", outcome) }),
        );
        Ok(outcome)
    }

    /// Pay a Lightning invoice. The payment is recorded IN_FLIGHT before it is
    /// handed to the node. A definite failure marks it FAILED; a transport
    /// error leaves it IN_FLIGHT for the follow-up pass to resolve.
    ///
    /// A hash the ledger already holds as IN_FLIGHT or terminal is never sent
    /// again.
    pub async fn send_payment(&self, request: SendRequest) -> Result<Transaction, ActionError> {
        if let Some(existing) = self.get_transaction(&request.payment_hash) {
            if existing.status != TxStatus::Open {
                warn!(
                    payment_hash = %request.payment_hash,
                    status = %existing.status,
                    "refusing duplicate payment"
                );
                return Err(ActionError::AlreadyRecorded {
                    hash: request.payment_hash,
                    status: existing.status,
                });
            }
        }

        let now = self.inner.now();
        let mut pending = Transaction::outgoing(
            request.payment_hash.clone(),
            Some(request.payment_request.clone()),
            request.amount,
            now,
            request.expires_at,
        )
        .with_origin(request.origin.clone());
        pending.description = request.description.clone();
        self.record(pending.clone())?;

        audit_event(
            "PAYMENT_SEND",
            json!({ "payment_hash": request.payment_hash, "amount_sat": request.amount.to_sats() }),
        );

        let result = self.inner.node.send_payment(&request).await;
        self.schedule_follow_up();

        match result {
            Ok(success) => {
                let mut settled = pending.with_status(TxStatus::Settled).with_preimage(success.preimage);
                settled.fee = Some(success.fee);
                self.record(settled)?;
                info!(payment_hash = %request.payment_hash, fee = %success.fee, "payment settled");
                Ok(self.get_transaction(&request.payment_hash).ok_or_else(|| {
                    LedgerError::NotFound(request.payment_hash.clone())
                })?)
            }
            Err(e @ NodeError::PaymentFailed(_)) => {
                self.record(pending.with_status(TxStatus::Failed))?;
                audit_event(
                    "PAYMENT_FAILED",
                    json!({ "payment_hash": request.payment_hash, "error": e.to_string() }),
                );
                Err(e.into())
            }
            Err(e) => {
                warn!(payment_hash = %request.payment_hash, error = %e, "payment outcome unknown");
                Err(e.into())
            }
        }
    }

    /// Broadcast an on-chain send and record it under its txid.
    pub async fn send_onchain(&self, address: &str, amount: Amount) -> Result<Transaction, ActionError> {
        let result = self.inner.node.send_onchain(address, amount).await;
        self.schedule_follow_up();
        let txid = result?;

        let now = self.inner.now();
        let tx = Transaction::outgoing(txid.clone(), None, amount, now, now)
            .with_status(TxStatus::Settled)
            .with_origin(TxOrigin::Onchain {
                address: Some(address.to_string()),
            });
        self.record(tx.clone())?;
        audit_event(
            "ONCHAIN_SEND",
            json!({ "txid": txid, "address": address, "amount_sat": amount.to_sats() }),
        );
        Ok(tx)
    }

    pub async fn close_channel(&self, channel_point: &str, force: bool) -> Result<(), ActionError> {
        let result = self.inner.node.close_channel(channel_point, force).await;
        self.schedule_follow_up();
        result?;
        info!(channel_point, force, "channel close requested");
        audit_event(
            "CHANNEL_CLOSE",
            json!({ "channel_point": channel_point, "force": force }),
        );
        Ok(())
    }

    fn record(&self, tx: Transaction) -> Result<(), LedgerError> {
        lock(&self.inner.state).ledger.upsert(tx).map(|_| ())
    }
}
