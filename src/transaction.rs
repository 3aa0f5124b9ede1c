use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::lnurl::SuccessAction;
use crate::types::Amount;

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Open,
    InFlight,
    Settled,
    Expired,
    Canceled,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Open => "OPEN",
            TxStatus::InFlight => "IN_FLIGHT",
            TxStatus::Settled => "SETTLED",
            TxStatus::Expired => "EXPIRED",
            TxStatus::Canceled => "CANCELED",
            TxStatus::Failed => "FAILED",
        }
    }

    /// Terminal states are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Settled | TxStatus::Expired | TxStatus::Canceled | TxStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TxStatus::Open),
            "IN_FLIGHT" => Ok(TxStatus::InFlight),
            "SETTLED" => Ok(TxStatus::Settled),
            "EXPIRED" => Ok(TxStatus::Expired),
            "CANCELED" => Ok(TxStatus::Canceled),
            "FAILED" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    /// Zero-value records (amountless invoices) count as receives.
    pub fn of(amount: Amount) -> Direction {
        if amount.is_negative() {
            Direction::Send
        } else {
            Direction::Receive
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

/// 32-byte payment preimage, hex encoded on the wire and on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Preimage([u8; 32]);

impl Preimage {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| e.to_string())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("preimage must be 32 bytes, got {}", b.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage({})", self.to_hex())
    }
}

impl Serialize for Preimage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Preimage::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where a transaction came from, with the payload only that origin carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TxOrigin {
    #[default]
    Normal,
    Lnurl {
        website: Option<String>,
        lightning_address: Option<String>,
        success_action: Option<SuccessAction>,
    },
    Keysend {
        tlv_record_name: Option<String>,
    },
    Onchain {
        address: Option<String>,
    },
}

impl TxOrigin {
    pub fn kind(&self) -> &'static str {
        match self {
            TxOrigin::Normal => "NORMAL",
            TxOrigin::Lnurl { .. } => "LNURL",
            TxOrigin::Keysend { .. } => "KEYSEND",
            TxOrigin::Onchain { .. } => "ONCHAIN",
        }
    }

    pub fn success_action(&self) -> Option<&SuccessAction> {
        match self {
            TxOrigin::Lnurl { success_action, .. } => success_action.as_ref(),
            _ => None,
        }
    }
}

/// One invoice, payment attempt or on-chain send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique key. The txid for on-chain sends.
    pub payment_hash: String,
    #[serde(default)]
    pub payment_request: Option<String>,
    /// Positive when received, negative when sent.
    pub amount: Amount,
    #[serde(default)]
    pub fee: Option<Amount>,
    pub status: TxStatus,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub preimage: Option<Preimage>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub remote_pubkey: Option<String>,
    #[serde(default)]
    pub value_fiat: Option<f64>,
    #[serde(default)]
    pub value_fiat_currency: Option<String>,
    #[serde(default)]
    pub origin: TxOrigin,

    // Local only. Never taken from node data.
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<Geolocation>,
}

impl Transaction {
    /// A freshly issued invoice.
    pub fn invoice(
        payment_hash: impl Into<String>,
        payment_request: impl Into<String>,
        amount: Amount,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self::new(
            payment_hash.into(),
            Some(payment_request.into()),
            amount.abs(),
            TxStatus::Open,
            created_at,
            expires_at,
        )
    }

    /// An outgoing payment that has just been handed to the node.
    pub fn outgoing(
        payment_hash: impl Into<String>,
        payment_request: Option<String>,
        amount: Amount,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self::new(
            payment_hash.into(),
            payment_request,
            -amount.abs(),
            TxStatus::InFlight,
            created_at,
            expires_at,
        )
    }

    fn new(
        payment_hash: String,
        payment_request: Option<String>,
        amount: Amount,
        status: TxStatus,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            payment_hash,
            payment_request,
            amount,
            fee: None,
            status,
            created_at,
            expires_at,
            preimage: None,
            description: None,
            payer: None,
            remote_pubkey: None,
            value_fiat: None,
            value_fiat_currency: None,
            origin: TxOrigin::Normal,
            note: None,
            location: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_origin(mut self, origin: TxOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_status(mut self, status: TxStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_preimage(mut self, preimage: Preimage) -> Self {
        self.preimage = Some(preimage);
        self
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.amount)
    }

    /// Expired and canceled invoices, hidden from the list by default.
    pub fn is_archived(&self) -> bool {
        matches!(self.status, TxStatus::Expired | TxStatus::Canceled)
    }

    pub fn is_overdue(&self, now: i64) -> bool {
        self.status == TxStatus::Open && now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_sign() {
        let rx = Transaction::invoice("h1", "lnbc1", Amount::from_sats(1_000), 0, 3600);
        assert_eq!(rx.direction(), Direction::Receive);

        let tx = Transaction::outgoing("h2", None, Amount::from_sats(1_000), 0, 3600);
        assert_eq!(tx.amount, Amount::from_sats(-1_000));
        assert_eq!(tx.direction(), Direction::Send);
        assert_eq!(tx.status, TxStatus::InFlight);

        let amountless = Transaction::invoice("h3", "lnbc1", Amount::ZERO, 0, 3600);
        assert_eq!(amountless.direction(), Direction::Receive);
    }

    #[test]
    fn test_terminal_statuses_are_sticky() {
        for status in [TxStatus::Settled, TxStatus::Expired, TxStatus::Canceled, TxStatus::Failed] {
            assert!(status.is_terminal());
            assert!(status.can_transition_to(status));
            assert!(!status.can_transition_to(TxStatus::Open));
        }
        assert!(TxStatus::Open.can_transition_to(TxStatus::Settled));
        assert!(TxStatus::InFlight.can_transition_to(TxStatus::Failed));
    }

    #[test]
    fn test_status_string_roundtrip() {
        assert_eq!("IN_FLIGHT".parse::<TxStatus>().unwrap(), TxStatus::InFlight);
        assert_eq!(TxStatus::Canceled.to_string(), "CANCELED");
        assert!("PENDING".parse::<TxStatus>().is_err());
    }

    #[test]
    fn test_preimage_hex() {
        let preimage = Preimage::from_bytes([0xab; 32]);
        assert_eq!(Preimage::from_hex(&preimage.to_hex()).unwrap(), preimage);
        assert!(Preimage::from_hex("abcd").is_err());
    }

    #[test]
    fn test_overdue_only_when_open() {
        let invoice = Transaction::invoice("h1", "lnbc1", Amount::from_sats(10), 0, 100);
        assert!(!invoice.is_overdue(100));
        assert!(invoice.is_overdue(101));
        assert!(!invoice.with_status(TxStatus::Settled).is_overdue(101));
    }

    #[test]
    fn test_origin_json_shape() {
        let origin = TxOrigin::Keysend { tlv_record_name: Some("alice".into()) };
        let json = serde_json::to_value(&origin).unwrap();
        assert_eq!(json["type"], "keysend");
        assert_eq!(json["tlv_record_name"], "alice");

        let parsed: Transaction = serde_json::from_value(serde_json::json!({
            "payment_hash": "aa",
            "amount": -500,
            "status": "SETTLED",
            "created_at": 1,
            "expires_at": 2
        }))
        .unwrap();
        assert_eq!(parsed.origin, TxOrigin::Normal);
        assert_eq!(parsed.direction(), Direction::Send);
    }
}
