pub mod audit;
pub mod channels;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod ledger;
pub mod lnurl;
pub mod node;
pub mod reconcile;
pub mod transaction;
pub mod types;

pub use channels::{Balances, ChannelBalance, ChannelSet, ChannelSnapshot, ReserveDisplay};
pub use config::Config;
pub use db::Database;
pub use error::{
    ActionError, DecodeError, LedgerError, MergeRejection, NodeError, StoreError, SyncError,
};
pub use ledger::{CancelOutcome, Ledger, LedgerEvent, MergeReport, TxFilter};
pub use lnurl::{DecodedSuccessAction, SuccessAction};
pub use node::{JsonSnapshotNode, NodeSource, PaymentSuccess, SendRequest};
pub use reconcile::{CoreOptions, SyncReport, SyncState, Trigger, WalletCore, WalletSnapshot};
pub use transaction::{Direction, Geolocation, Preimage, Transaction, TxOrigin, TxStatus};
pub use types::{Amount, BitcoinUnit};
