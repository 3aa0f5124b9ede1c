// ============================================================================
// UNIT CONSTANTS
// ============================================================================

/// Satoshis in one Bitcoin
pub const SATS_IN_BTC: i64 = 100_000_000;

/// Satoshis in one milliBitcoin
pub const SATS_IN_MBTC: i64 = 100_000;

/// Satoshis in one bit (μBTC)
pub const SATS_IN_BIT: i64 = 100;

// ============================================================================
// STORAGE
// ============================================================================

/// SQLite database file name inside the data directory
pub const DB_FILENAME: &str = "ledger.db";

/// Audit log file name inside the data directory
pub const AUDIT_LOG_FILENAME: &str = "audit_log.txt";

/// Default data directory
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "data/config.toml";

/// Node snapshot file read by the inspector when none is configured
pub const NODE_SNAPSHOT_FILENAME: &str = "node.json";

// ============================================================================
// TIMING CONSTANTS
// ============================================================================

/// Background reconciliation interval (in seconds)
pub const PERIODIC_SYNC_INTERVAL_SECS: u64 = 60;

/// Delay before the follow-up pass after a close/send/cancel (in milliseconds).
/// Node state lags the action that produced it.
pub const POST_ACTION_SYNC_DELAY_MS: u64 = 3000;

/// Broadcast buffer for ledger change notifications
pub const LEDGER_EVENT_BUFFER: usize = 256;

// ============================================================================
// LNURL-PAY (LUD-09 / LUD-10)
// ============================================================================

/// AES-CBC initialisation vector length
pub const AES_IV_LEN: usize = 16;

/// Maximum base64 ciphertext length accepted for an `aes` success action
pub const MAX_AES_CIPHERTEXT_B64_LEN: usize = 4096;

/// Rendered in place of a success action that cannot be decoded
pub const SUCCESS_ACTION_PLACEHOLDER: &str = "Unable to decrypt message";

// ============================================================================
// DISPLAY
// ============================================================================

/// Transactions shown per page in incremental list loads
pub const NUM_TRANSACTIONS_PER_LOAD: usize = 25;

/// Default fiat currency code
pub const DEFAULT_FIAT_UNIT: &str = "USD";
