//! Wire types for the venue's REST API responses.
//!
//! Every numeric field arrives as a string; amounts are converted to base
//! units inside the client, so these structs keep them as strings.

use serde::Deserialize;

/// Response envelope common to every endpoint. A non-"0" code is a venue
/// error.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One deposit address entry; the venue returns one per supported chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositAddressEntry {
    pub addr: String,
    pub chain: String,
    #[serde(default)]
    pub selected: bool,
}

/// Lightning deposit invoice entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningDepositEntry {
    pub invoice: String,
}

/// Deposit history entry matched by txid.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEntry {
    pub dep_id: String,
    /// "0" pending, "1" credited (tradable, not withdrawable), "2" done.
    pub state: String,
}

/// Order placement acknowledgement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub ord_id: String,
}

/// Order detail looked up by client order id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub ord_id: String,
    /// canceled | live | partially_filled | filled | mmp_canceled
    pub state: String,
    #[serde(default)]
    pub avg_px: String,
}

/// Transfer acknowledgement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAck {
    pub trans_id: String,
}

/// Transfer state looked up by client id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStateEntry {
    pub trans_id: String,
    /// success | pending | failed
    pub state: String,
}

/// Per-chain currency listing, carries the withdrawal fee.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyEntry {
    pub ccy: String,
    pub chain: String,
    #[serde(default)]
    pub min_fee: String,
}

/// Withdrawal acknowledgement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAck {
    pub wd_id: String,
}

/// Withdrawal history entry looked up by client id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEntry {
    #[serde(default)]
    pub tx_id: String,
    /// "2" completed, "1" broadcasting, "0" pending, negative = failed.
    pub state: String,
}

/// Trading-account balance detail for one currency.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    pub ccy: String,
    #[serde(default)]
    pub avail_bal: String,
}

/// Trading-account balance envelope entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    #[serde(default = "Vec::new")]
    pub details: Vec<BalanceDetail>,
}
