#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wallet_ledger::{
    Amount, ChannelSnapshot, CoreOptions, Database, Ledger, NodeError, NodeSource, PaymentSuccess,
    Preimage, SendRequest, Transaction, TxStatus, WalletCore,
};

// ================================================================
// Scripted node
// ================================================================

#[derive(Default)]
struct MockState {
    channels: Vec<ChannelSnapshot>,
    transactions: Vec<Transaction>,
    send_result: Option<Result<PaymentSuccess, NodeError>>,
    onchain_txid: Option<String>,
    canceled: Vec<String>,
    closed: Vec<(String, bool)>,
}

/// In-memory node whose reported state is set by the test.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<MockState>,
    fetch_delay: Mutex<Duration>,
    fail_fetch: AtomicBool,
    fetches: AtomicUsize,
    sends: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_channels(&self, channels: Vec<ChannelSnapshot>) {
        self.state.lock().unwrap().channels = channels;
    }

    /// Add a transaction or replace the one with the same payment hash.
    pub fn report(&self, tx: Transaction) {
        let mut state = self.state.lock().unwrap();
        match state
            .transactions
            .iter_mut()
            .find(|t| t.payment_hash == tx.payment_hash)
        {
            Some(existing) => *existing = tx,
            None => state.transactions.push(tx),
        }
    }

    pub fn settle(&self, payment_hash: &str, preimage: Preimage) {
        let mut state = self.state.lock().unwrap();
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.payment_hash == payment_hash)
            .expect("unknown payment hash");
        tx.status = TxStatus::Settled;
        tx.preimage = Some(preimage);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn set_fetch_failure(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_send_result(&self, result: Result<PaymentSuccess, NodeError>) {
        self.state.lock().unwrap().send_result = Some(result);
    }

    pub fn set_onchain_txid(&self, txid: &str) {
        self.state.lock().unwrap().onchain_txid = Some(txid.to_string());
    }

    /// Number of transaction fetches, one per reconciliation pass.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of Lightning payments handed to the node.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state.lock().unwrap().canceled.clone()
    }

    pub fn closed(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().closed.clone()
    }

    async fn fetch_delay(&self) {
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_reachable(&self) -> Result<(), NodeError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(NodeError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeSource for MockNode {
    async fn list_channels(&self) -> Result<Vec<ChannelSnapshot>, NodeError> {
        self.fetch_delay().await;
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().channels.clone())
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>, NodeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_delay().await;
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().transactions.clone())
    }

    async fn cancel_invoice(&self, payment_hash: &str) -> Result<(), NodeError> {
        let mut state = self.state.lock().unwrap();
        state.canceled.push(payment_hash.to_string());
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.payment_hash == payment_hash)
            .ok_or_else(|| NodeError::Rejected("unknown invoice".into()))?;
        if tx.status != TxStatus::Open {
            return Err(NodeError::Rejected(format!("invoice is {}", tx.status)));
        }
        tx.status = TxStatus::Canceled;
        Ok(())
    }

    async fn send_payment(&self, _request: &SendRequest) -> Result<PaymentSuccess, NodeError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .send_result
            .clone()
            .unwrap_or(Err(NodeError::Unsupported("send_payment")))
    }

    async fn send_onchain(&self, _address: &str, _amount: Amount) -> Result<String, NodeError> {
        self.state
            .lock()
            .unwrap()
            .onchain_txid
            .clone()
            .ok_or(NodeError::Unsupported("send_onchain"))
    }

    async fn close_channel(&self, channel_point: &str, force: bool) -> Result<(), NodeError> {
        self.state
            .lock()
            .unwrap()
            .closed
            .push((channel_point.to_string(), force));
        Ok(())
    }
}

// ================================================================
// Fixtures
// ================================================================

/// Settable wall clock in unix seconds.
#[derive(Clone)]
pub struct TestClock(Arc<AtomicI64>);

impl TestClock {
    pub fn at(now: i64) -> Self {
        Self(Arc::new(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub const START: i64 = 1_700_000_000;

pub fn setup_core(node: &Arc<MockNode>, clock: &TestClock) -> WalletCore<MockNode> {
    let ledger = Ledger::load(Database::open_in_memory().unwrap()).unwrap();
    setup_core_with_ledger(node, clock, ledger)
}

pub fn setup_core_with_ledger(
    node: &Arc<MockNode>,
    clock: &TestClock,
    ledger: Ledger,
) -> WalletCore<MockNode> {
    let clock = clock.clone();
    WalletCore::with_clock(Arc::clone(node), ledger, CoreOptions::default(), move || {
        clock.now()
    })
}

pub fn channel(id: &str, capacity: i64, local: i64, remote: i64, reserve: i64) -> ChannelSnapshot {
    ChannelSnapshot {
        channel_id: id.to_string(),
        remote_pubkey: format!("02{:0>64}", id),
        channel_point: Some(format!("{:0>64}:0", id)),
        capacity: Amount::from_sats(capacity),
        local_balance: Amount::from_sats(local),
        remote_balance: Amount::from_sats(remote),
        local_reserve: Amount::from_sats(reserve),
        remote_reserve: Amount::ZERO,
        commit_fee: Amount::from_sats(180),
        active: true,
        public: false,
        pending_open: false,
    }
}

/// Receive invoice created at `START`, valid for an hour.
pub fn invoice(hash: &str, sats: i64) -> Transaction {
    Transaction::invoice(
        hash,
        format!("lnbc{}n1{}", sats, hash),
        Amount::from_sats(sats),
        START,
        START + 3_600,
    )
}

pub fn send_request(hash: &str, sats: i64) -> SendRequest {
    SendRequest {
        payment_hash: hash.to_string(),
        payment_request: format!("lnbc{}n1{}", sats, hash),
        amount: Amount::from_sats(sats),
        description: Some("test payment".to_string()),
        expires_at: START + 3_600,
        origin: Default::default(),
    }
}
