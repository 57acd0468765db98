//! Adapter contracts for the external rails the engine drives.
//!
//! Four transport rails and one read-only oracle:
//! - `SwapContract`: smart-chain wallet + escrow contract
//! - `BitcoinBackend`: on-chain UTXO wallet (PSBT fund/sign/broadcast)
//! - `LightningBackend`: invoice pay/create and payment lookup
//! - `Exchange`: CEX spot trading, transfers and withdrawals
//! - `InventoryOracle`: BTC-equivalent pricing and swap-store balances
//!
//! Every amount crossing these boundaries is in integer base units; the
//! CEX client converts to decimal strings internally. No adapter talks to
//! another adapter.

pub mod mock;

use crate::token::{Amount, Token};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Observed status of a smart-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    NotFound,
    Pending,
    Reverted,
    Success,
}

/// A built and signed smart-chain transaction. The id is known before
/// broadcast, which is what lets the engine checkpoint candidates first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTx {
    pub tx_id: String,
    pub raw: String,
}

/// Invoked with `(tx_id, raw_tx)` for each candidate before its broadcast
/// is acknowledged.
pub type BroadcastHook = Box<dyn FnMut(&str, &str) + Send>;

/// Invoked as `(old_raw, old_tx_id, new_raw, new_tx_id)` when a published
/// transaction is about to be replaced (e.g. a fee bump).
pub type ReplaceHook = Box<dyn Fn(&str, &str, &str, &str) + Send + Sync>;

/// Smart-chain wallet plus the intermediary's escrow contract.
#[async_trait]
pub trait SwapContract: Send + Sync {
    /// Contract-held balance of `token`; `usable` restricts to what is
    /// spendable right now (excludes in-flight commitments).
    async fn get_balance(&self, token: Token, usable: bool) -> Result<Amount>;

    /// Build signed txs moving `amount` out of the contract to the own
    /// wallet.
    async fn txs_withdraw(&self, token: Token, amount: Amount) -> Result<Vec<ContractTx>>;

    /// Build signed txs transferring `amount` from the own wallet to `to`.
    async fn txs_transfer(&self, token: Token, amount: Amount, to: &str)
        -> Result<Vec<ContractTx>>;

    /// Build signed txs depositing `amount` from the own wallet into the
    /// contract.
    async fn txs_deposit(&self, token: Token, amount: Amount) -> Result<Vec<ContractTx>>;

    /// Broadcast `txs` and drive them to confirmation, possibly publishing
    /// fee-bumped replacements along the way. `on_broadcast` fires per tx
    /// before the broadcast is acknowledged.
    async fn send_and_confirm(&self, txs: Vec<ContractTx>, on_broadcast: BroadcastHook)
        -> Result<()>;

    /// Status of a raw candidate transaction.
    async fn get_tx_status(&self, raw: &str) -> Result<TxStatus>;

    /// Status by transaction id (used for CEX-originated txs).
    async fn get_tx_id_status(&self, tx_id: &str) -> Result<TxStatus>;

    /// Register the replacement hook. At most one hook is active; the
    /// Supervisor installs it once at bootstrap.
    async fn on_before_tx_replace(&self, hook: ReplaceHook);

    /// The wallet's own smart-chain address.
    fn get_address(&self) -> String;

    /// Parse and normalize a token contract address.
    fn to_token_address(&self, address: &str) -> Result<String>;
}

/// An on-chain transaction as seen by the wallet.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub confirmations: u32,
}

/// Requested output of a funded PSBT.
#[derive(Debug, Clone)]
pub struct PsbtOutput {
    pub address: String,
    pub sats: Amount,
}

/// Lease on a UTXO reserved while a PSBT is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoLock {
    pub lock_id: String,
    pub transaction_id: String,
    pub transaction_vout: u32,
}

/// Result of funding a PSBT.
#[derive(Debug, Clone)]
pub struct FundedPsbt {
    pub psbt: String,
    pub inputs: Vec<UtxoLock>,
}

/// Result of signing a funded PSBT. The txid is final before broadcast.
#[derive(Debug, Clone)]
pub struct SignedPsbt {
    pub tx_id: String,
    pub transaction: String,
}

/// On-chain Bitcoin wallet.
#[async_trait]
pub trait BitcoinBackend: Send + Sync {
    async fn get_transaction(&self, tx_id: &str) -> Result<Option<ChainTransaction>>;

    async fn fund_psbt(
        &self,
        outputs: &[PsbtOutput],
        min_confirmations: u32,
        target_confirmations: u32,
    ) -> Result<FundedPsbt>;

    async fn sign_psbt(&self, psbt: &str) -> Result<SignedPsbt>;

    async fn broadcast_chain_transaction(&self, tx: &str) -> Result<()>;

    /// Release a UTXO lease after an abandoned PSBT.
    async fn unlock_utxo(&self, lock: &UtxoLock) -> Result<()>;

    /// Fresh non-change receive addresses, first entry preferred.
    async fn get_chain_addresses(&self) -> Result<Vec<String>>;

    async fn get_chain_balance(&self) -> Result<Amount>;
}

/// A Lightning payment as seen by the node.
#[derive(Debug, Clone)]
pub struct LnPayment {
    pub is_confirmed: bool,
    pub is_failed: bool,
}

/// A freshly created invoice: BOLT-11 request plus payment hash.
#[derive(Debug, Clone)]
pub struct LnInvoice {
    pub request: String,
    pub id: String,
}

/// Settlement status of a created invoice.
#[derive(Debug, Clone)]
pub struct LnInvoiceStatus {
    pub is_confirmed: bool,
    pub is_canceled: bool,
}

/// Lightning node.
#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Pay a BOLT-11 request. The payment hash encoded in the request is
    /// the stable identifier for later lookup.
    async fn pay(&self, request: &str) -> Result<()>;

    /// Look up an outgoing payment by payment hash.
    async fn get_payment(&self, id: &str) -> Result<Option<LnPayment>>;

    /// Create an invoice for `mtokens` millisatoshis.
    async fn create_invoice(&self, mtokens: Amount) -> Result<LnInvoice>;

    /// Look up an own invoice by payment hash.
    async fn get_invoice(&self, id: &str) -> Result<LnInvoiceStatus>;

    async fn get_channel_balance(&self) -> Result<Amount>;
}

/// CEX subaccount selector. Trades settle in `Trading`; deposits land in
/// and withdrawals leave from `Funding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Funding,
    Trading,
}

/// Deposit destination issued by the CEX: an on-chain address, a
/// smart-chain address, or a BOLT-11 invoice for Lightning ingress.
#[derive(Debug, Clone)]
pub struct DepositAddress {
    pub address: String,
}

/// Credit status of an observed deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositState {
    Pending,
    /// Credited but not yet withdrawable; sufficient to trade against.
    Credited,
    Completed,
}

/// A deposit record matched by txid.
#[derive(Debug, Clone)]
pub struct DepositRecord {
    pub deposit_id: String,
    pub state: DepositState,
}

/// Lifecycle of a spot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Canceled,
    Live,
    PartiallyFilled,
    Filled,
    MmpCanceled,
}

/// A spot order looked up by client order id.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub order_id: String,
    pub average_price: Decimal,
    pub state: OrderState,
}

/// Lifecycle of an intra-account transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Success,
    Pending,
    Failed,
}

/// A funding/trading transfer looked up by client id.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub transfer_id: String,
    pub state: TransferState,
}

/// Venue-reported withdrawal status code: `2` completed, `1` broadcasting,
/// `0` pending, negative values terminal failures.
pub type WithdrawalState = i8;

/// A withdrawal looked up by client withdrawal id.
#[derive(Debug, Clone)]
pub struct WithdrawalRecord {
    pub tx_id: String,
    pub state: WithdrawalState,
}

/// Centralized exchange with spot trading and asset movement. Every
/// mutating operation takes a client-chosen idempotency key so retries
/// deduplicate venue-side.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Issue a deposit address for `token` on `chain`. Lightning ingress
    /// passes `amount` and receives a BOLT-11 invoice instead of an
    /// address.
    async fn get_deposit_address(
        &self,
        token: Token,
        chain: Option<&str>,
        amount: Option<Amount>,
    ) -> Result<DepositAddress>;

    /// Find a deposit record by the originating txid or payment hash.
    async fn get_deposit(&self, tx_id: &str) -> Result<Option<DepositRecord>>;

    /// Submit a market order converting `amount` of `src` into `dst`.
    /// Returns the venue order id.
    async fn market_trade(
        &self,
        src: Token,
        dst: Token,
        amount: Amount,
        client_order_id: &str,
    ) -> Result<String>;

    /// Look up an order by client order id. `None` when the venue reports
    /// the order as unknown.
    async fn get_trade(
        &self,
        src: Token,
        dst: Token,
        client_order_id: &str,
    ) -> Result<Option<TradeRecord>>;

    /// Move `amount` of `token` between subaccounts. Returns the venue
    /// transfer id.
    async fn funds_transfer(
        &self,
        token: Token,
        from: AccountType,
        to: AccountType,
        amount: Amount,
        client_id: &str,
    ) -> Result<String>;

    /// Look up a transfer by client id.
    async fn get_funds_transfer(&self, client_id: &str) -> Result<Option<TransferRecord>>;

    /// Network fee the venue charges to withdraw `token` over `chain`.
    async fn get_withdrawal_fee(
        &self,
        token: Token,
        chain: Option<&str>,
        amount: Option<Amount>,
    ) -> Result<Amount>;

    /// Submit a withdrawal. Lightning egress passes the BOLT-11 invoice in
    /// `address` and derives the amount from it. Returns the venue
    /// withdrawal id.
    async fn withdraw(
        &self,
        token: Token,
        chain: Option<&str>,
        address: &str,
        client_wd_id: &str,
        fee: Amount,
        amount: Option<Amount>,
    ) -> Result<String>;

    /// Look up a withdrawal by client withdrawal id.
    async fn get_withdrawal(&self, client_wd_id: &str) -> Result<Option<WithdrawalRecord>>;

    /// Trading-subaccount balance of `token` in base units.
    async fn get_balance(&self, token: Token) -> Result<Amount>;
}

/// Rounding direction for price conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// Read-only snapshot of inventory pricing and open customer swaps.
#[async_trait]
pub trait InventoryOracle: Send + Sync {
    /// BTC base-unit value of `amount` of `token`.
    async fn to_btc(&self, amount: Amount, token: Token) -> Result<Amount>;

    /// Inverse of `to_btc`, with explicit rounding.
    async fn from_btc(&self, amount_btc: Amount, token: Token, rounding: Rounding)
        -> Result<Amount>;

    /// Commitments covering outbound claims of open swaps.
    async fn locked_balance(&self, token: Token) -> Result<Amount>;

    /// Funds en route back to the intermediary from refunding swaps.
    async fn returning_balance(&self, token: Token) -> Result<Amount>;
}
