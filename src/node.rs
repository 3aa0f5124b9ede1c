//! Boundary to the Lightning node. The node is the source of truth for
//! channels and invoice/payment state; the wallet core only pulls from it and
//! forwards user commands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::channels::ChannelSnapshot;
use crate::error::NodeError;
use crate::transaction::{Preimage, Transaction, TxOrigin, TxStatus};
use crate::types::Amount;

/// Outgoing Lightning payment, built by the caller from a decoded invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub payment_hash: String,
    pub payment_request: String,
    /// Amount to send, as a positive value.
    pub amount: Amount,
    pub description: Option<String>,
    pub expires_at: i64,
    pub origin: TxOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentSuccess {
    pub preimage: Preimage,
    pub fee: Amount,
}

#[async_trait]
pub trait NodeSource: Send + Sync + 'static {
    async fn list_channels(&self) -> Result<Vec<ChannelSnapshot>, NodeError>;

    /// Invoices and payments the node knows about, preimages included once
    /// settled.
    async fn list_transactions(&self) -> Result<Vec<Transaction>, NodeError>;

    async fn cancel_invoice(&self, payment_hash: &str) -> Result<(), NodeError>;

    async fn send_payment(&self, request: &SendRequest) -> Result<PaymentSuccess, NodeError>;

    /// Broadcast an on-chain send, returning the txid.
    async fn send_onchain(&self, address: &str, amount: Amount) -> Result<String, NodeError>;

    async fn close_channel(&self, channel_point: &str, force: bool) -> Result<(), NodeError>;
}

/// Node state dumped to a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(default)]
    pub channels: Vec<ChannelSnapshot>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Read-mostly node source backed by a JSON snapshot file, for inspecting a
/// ledger offline. Invoice cancellation is written back to the file; sends and
/// channel closes are not supported.
pub struct JsonSnapshotNode {
    path: PathBuf,
}

impl JsonSnapshotNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<NodeSnapshot, NodeError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| NodeError::Unreachable(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| NodeError::Rejected(format!("malformed node snapshot: {}", e)))
    }

    async fn write(&self, snapshot: &NodeSnapshot) -> Result<(), NodeError> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| NodeError::Rejected(e.to_string()))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| NodeError::Unreachable(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl NodeSource for JsonSnapshotNode {
    async fn list_channels(&self) -> Result<Vec<ChannelSnapshot>, NodeError> {
        Ok(self.read().await?.channels)
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>, NodeError> {
        Ok(self.read().await?.transactions)
    }

    async fn cancel_invoice(&self, payment_hash: &str) -> Result<(), NodeError> {
        let mut snapshot = self.read().await?;
        let invoice = snapshot
            .transactions
            .iter_mut()
            .find(|tx| tx.payment_hash == payment_hash)
            .ok_or_else(|| NodeError::Rejected(format!("unknown invoice {}", payment_hash)))?;

        match invoice.status {
            TxStatus::Open => invoice.status = TxStatus::Canceled,
            TxStatus::Canceled => return Ok(()),
            other => {
                return Err(NodeError::Rejected(format!(
                    "invoice {} is {}",
                    payment_hash, other
                )))
            }
        }
        debug!(payment_hash, "invoice canceled in snapshot");
        self.write(&snapshot).await
    }

    async fn send_payment(&self, _request: &SendRequest) -> Result<PaymentSuccess, NodeError> {
        Err(NodeError::Unsupported("send_payment"))
    }

    async fn send_onchain(&self, _address: &str, _amount: Amount) -> Result<String, NodeError> {
        Err(NodeError::Unsupported("send_onchain"))
    }

    async fn close_channel(&self, _channel_point: &str, _force: bool) -> Result<(), NodeError> {
        Err(NodeError::Unsupported("close_channel"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_snapshot(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("node.json");
        let snapshot = serde_json::json!({
            "channels": [{
                "channel_id": "chan1",
                "remote_pubkey": "02aa",
                "capacity": 100000,
                "local_balance": 60000,
                "remote_balance": 40000,
                "local_reserve": 1000,
                "active": true
            }],
            "transactions": [
                { "payment_hash": "h1", "amount": 500, "status": "OPEN",
                  "created_at": 1, "expires_at": 3601 },
                { "payment_hash": "h2", "amount": -200, "status": "SETTLED",
                  "created_at": 2, "expires_at": 3602,
                  "preimage": "abababababababababababababababababababababababababababababababab" }
            ]
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_snapshot_node_lists_state() {
        let dir = tempfile::tempdir().unwrap();
        let node = JsonSnapshotNode::new(write_snapshot(&dir));

        let channels = node.list_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].remote_reserve, Amount::ZERO);

        let txs = node.list_transactions().await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[1].preimage, Some(Preimage::from_bytes([0xab; 32])));
    }

    #[tokio::test]
    async fn test_snapshot_node_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let node = JsonSnapshotNode::new(write_snapshot(&dir));

        node.cancel_invoice("h1").await.unwrap();
        let txs = node.list_transactions().await.unwrap();
        assert_eq!(txs[0].status, TxStatus::Canceled);

        assert!(matches!(node.cancel_invoice("h2").await, Err(NodeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_retryable() {
        let node = JsonSnapshotNode::new("/nonexistent/node.json");
        let err = node.list_channels().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
