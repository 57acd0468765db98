//! Scripted in-memory rails for tests and paper trading.
//!
//! Each mock keeps its observable state behind a `tokio::sync::RwLock` so
//! tests can adjust responses between engine ticks and inspect the calls a
//! scenario produced. Defaults are inert: lookups return "not seen yet"
//! until a test scripts them.

use super::*;
use crate::token::{Amount, Token};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Scripted smart-chain wallet + escrow contract.
#[derive(Default)]
pub struct MockSwapContract {
    inner: RwLock<ContractState>,
    replace_hook: RwLock<Option<ReplaceHook>>,
}

#[derive(Default)]
struct ContractState {
    balances: HashMap<Token, Amount>,
    /// Status by raw tx, consulted by `get_tx_status`.
    tx_status: HashMap<String, TxStatus>,
    /// Status by tx id, consulted by `get_tx_id_status`.
    tx_id_status: HashMap<String, TxStatus>,
    tx_counter: u64,
    broadcasts: Vec<String>,
    transfer_destinations: Vec<String>,
}

fn next_txs(state: &mut ContractState, prefix: &str) -> Vec<ContractTx> {
    state.tx_counter += 1;
    let n = state.tx_counter;
    vec![ContractTx {
        tx_id: format!("{}-{}", prefix, n),
        raw: format!("raw-{}-{}", prefix, n),
    }]
}

impl MockSwapContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, token: Token, amount: Amount) {
        self.inner.write().await.balances.insert(token, amount);
    }

    pub async fn set_tx_status(&self, raw: &str, status: TxStatus) {
        self.inner
            .write()
            .await
            .tx_status
            .insert(raw.to_string(), status);
    }

    pub async fn set_tx_id_status(&self, tx_id: &str, status: TxStatus) {
        self.inner
            .write()
            .await
            .tx_id_status
            .insert(tx_id.to_string(), status);
    }

    /// Raw txs handed to `send_and_confirm` so far.
    pub async fn broadcasts(&self) -> Vec<String> {
        self.inner.read().await.broadcasts.clone()
    }

    /// Destination addresses of built transfer txs.
    pub async fn transfer_destinations(&self) -> Vec<String> {
        self.inner.read().await.transfer_destinations.clone()
    }

    /// Fire the registered replacement hook, as the wallet would when
    /// bumping a fee.
    pub async fn fire_replacement(
        &self,
        old_raw: &str,
        old_tx_id: &str,
        new_raw: &str,
        new_tx_id: &str,
    ) {
        if let Some(hook) = self.replace_hook.read().await.as_ref() {
            hook(old_raw, old_tx_id, new_raw, new_tx_id);
        }
    }
}

#[async_trait]
impl SwapContract for MockSwapContract {
    async fn get_balance(&self, token: Token, _usable: bool) -> Result<Amount> {
        Ok(*self.inner.read().await.balances.get(&token).unwrap_or(&0))
    }

    async fn txs_withdraw(&self, _token: Token, _amount: Amount) -> Result<Vec<ContractTx>> {
        Ok(next_txs(&mut *self.inner.write().await, "scw"))
    }

    async fn txs_transfer(
        &self,
        _token: Token,
        _amount: Amount,
        to: &str,
    ) -> Result<Vec<ContractTx>> {
        let mut state = self.inner.write().await;
        state.transfer_destinations.push(to.to_string());
        Ok(next_txs(&mut state, "sct"))
    }

    async fn txs_deposit(&self, _token: Token, _amount: Amount) -> Result<Vec<ContractTx>> {
        Ok(next_txs(&mut *self.inner.write().await, "scd"))
    }

    async fn send_and_confirm(
        &self,
        txs: Vec<ContractTx>,
        mut on_broadcast: BroadcastHook,
    ) -> Result<()> {
        let mut state = self.inner.write().await;
        for tx in txs {
            on_broadcast(&tx.tx_id, &tx.raw);
            state.broadcasts.push(tx.raw);
        }
        Ok(())
    }

    async fn get_tx_status(&self, raw: &str) -> Result<TxStatus> {
        Ok(*self
            .inner
            .read()
            .await
            .tx_status
            .get(raw)
            .unwrap_or(&TxStatus::Pending))
    }

    async fn get_tx_id_status(&self, tx_id: &str) -> Result<TxStatus> {
        Ok(*self
            .inner
            .read()
            .await
            .tx_id_status
            .get(tx_id)
            .unwrap_or(&TxStatus::NotFound))
    }

    async fn on_before_tx_replace(&self, hook: ReplaceHook) {
        *self.replace_hook.write().await = Some(hook);
    }

    fn get_address(&self) -> String {
        "sc-own-address".to_string()
    }

    fn to_token_address(&self, address: &str) -> Result<String> {
        Ok(address.to_string())
    }
}

/// Scripted on-chain bitcoin wallet.
pub struct MockBitcoinBackend {
    inner: RwLock<BitcoinState>,
}

#[derive(Default)]
struct BitcoinState {
    transactions: HashMap<String, u32>,
    chain_balance: Amount,
    addresses: Vec<String>,
    psbt_counter: u64,
    fail_funding: bool,
    fail_signing: bool,
    broadcasts: Vec<String>,
    unlocked: Vec<UtxoLock>,
    funded_outputs: Vec<PsbtOutput>,
}

impl Default for MockBitcoinBackend {
    fn default() -> Self {
        Self {
            inner: RwLock::new(BitcoinState {
                addresses: vec!["bc1qreceive".to_string()],
                ..BitcoinState::default()
            }),
        }
    }
}

impl MockBitcoinBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_transaction(&self, tx_id: &str, confirmations: u32) {
        self.inner
            .write()
            .await
            .transactions
            .insert(tx_id.to_string(), confirmations);
    }

    pub async fn set_chain_balance(&self, sats: Amount) {
        self.inner.write().await.chain_balance = sats;
    }

    pub async fn set_fail_funding(&self, fail: bool) {
        self.inner.write().await.fail_funding = fail;
    }

    pub async fn set_fail_signing(&self, fail: bool) {
        self.inner.write().await.fail_signing = fail;
    }

    pub async fn broadcasts(&self) -> Vec<String> {
        self.inner.read().await.broadcasts.clone()
    }

    pub async fn unlocked_utxos(&self) -> Vec<UtxoLock> {
        self.inner.read().await.unlocked.clone()
    }

    pub async fn funded_outputs(&self) -> Vec<PsbtOutput> {
        self.inner.read().await.funded_outputs.clone()
    }
}

#[async_trait]
impl BitcoinBackend for MockBitcoinBackend {
    async fn get_transaction(&self, tx_id: &str) -> Result<Option<ChainTransaction>> {
        Ok(self
            .inner
            .read()
            .await
            .transactions
            .get(tx_id)
            .map(|confirmations| ChainTransaction {
                confirmations: *confirmations,
            }))
    }

    async fn fund_psbt(
        &self,
        outputs: &[PsbtOutput],
        _min_confirmations: u32,
        _target_confirmations: u32,
    ) -> Result<FundedPsbt> {
        let mut state = self.inner.write().await;
        if state.fail_funding {
            return Err(anyhow!("insufficient confirmed funds"));
        }
        state.funded_outputs.extend(outputs.iter().cloned());
        state.psbt_counter += 1;
        let n = state.psbt_counter;
        Ok(FundedPsbt {
            psbt: format!("psbt-{}", n),
            inputs: vec![UtxoLock {
                lock_id: format!("lock-{}", n),
                transaction_id: format!("utxo-{}", n),
                transaction_vout: 0,
            }],
        })
    }

    async fn sign_psbt(&self, psbt: &str) -> Result<SignedPsbt> {
        let state = self.inner.read().await;
        if state.fail_signing {
            return Err(anyhow!("signer unavailable"));
        }
        Ok(SignedPsbt {
            tx_id: format!("btc-tx-for-{}", psbt),
            transaction: format!("btc-raw-for-{}", psbt),
        })
    }

    async fn broadcast_chain_transaction(&self, tx: &str) -> Result<()> {
        self.inner.write().await.broadcasts.push(tx.to_string());
        Ok(())
    }

    async fn unlock_utxo(&self, lock: &UtxoLock) -> Result<()> {
        self.inner.write().await.unlocked.push(lock.clone());
        Ok(())
    }

    async fn get_chain_addresses(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.addresses.clone())
    }

    async fn get_chain_balance(&self) -> Result<Amount> {
        Ok(self.inner.read().await.chain_balance)
    }
}

/// Scripted Lightning node.
#[derive(Default)]
pub struct MockLightningBackend {
    inner: RwLock<LightningState>,
}

#[derive(Default)]
struct LightningState {
    payments: HashMap<String, LnPayment>,
    invoices: HashMap<String, LnInvoiceStatus>,
    channel_balance: Amount,
    invoice_counter: u64,
    paid_requests: Vec<String>,
    created_invoice_mtokens: Vec<Amount>,
    fail_pay: bool,
}

impl MockLightningBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_payment(&self, payment_hash: &str, is_confirmed: bool, is_failed: bool) {
        self.inner.write().await.payments.insert(
            payment_hash.to_string(),
            LnPayment {
                is_confirmed,
                is_failed,
            },
        );
    }

    pub async fn set_invoice_status(
        &self,
        payment_hash: &str,
        is_confirmed: bool,
        is_canceled: bool,
    ) {
        self.inner.write().await.invoices.insert(
            payment_hash.to_string(),
            LnInvoiceStatus {
                is_confirmed,
                is_canceled,
            },
        );
    }

    pub async fn set_channel_balance(&self, sats: Amount) {
        self.inner.write().await.channel_balance = sats;
    }

    pub async fn set_fail_pay(&self, fail: bool) {
        self.inner.write().await.fail_pay = fail;
    }

    pub async fn paid_requests(&self) -> Vec<String> {
        self.inner.read().await.paid_requests.clone()
    }

    pub async fn created_invoice_mtokens(&self) -> Vec<Amount> {
        self.inner.read().await.created_invoice_mtokens.clone()
    }
}

#[async_trait]
impl LightningBackend for MockLightningBackend {
    async fn pay(&self, request: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        if state.fail_pay {
            return Err(anyhow!("no route"));
        }
        state.paid_requests.push(request.to_string());
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<LnPayment>> {
        Ok(self.inner.read().await.payments.get(id).cloned())
    }

    async fn create_invoice(&self, mtokens: Amount) -> Result<LnInvoice> {
        let mut state = self.inner.write().await;
        state.created_invoice_mtokens.push(mtokens);
        state.invoice_counter += 1;
        let n = state.invoice_counter;
        Ok(LnInvoice {
            request: format!("lnbc-mock-{}", n),
            id: format!("ln-hash-{}", n),
        })
    }

    async fn get_invoice(&self, id: &str) -> Result<LnInvoiceStatus> {
        Ok(self
            .inner
            .read()
            .await
            .invoices
            .get(id)
            .cloned()
            .unwrap_or(LnInvoiceStatus {
                is_confirmed: false,
                is_canceled: false,
            }))
    }

    async fn get_channel_balance(&self) -> Result<Amount> {
        Ok(self.inner.read().await.channel_balance)
    }
}

/// Scripted CEX.
#[derive(Default)]
pub struct MockExchange {
    inner: RwLock<ExchangeState>,
}

#[derive(Default)]
struct ExchangeState {
    deposit_addresses: HashMap<Token, String>,
    deposits: HashMap<String, DepositRecord>,
    trade_result: Option<TradeRecord>,
    transfer_result: Option<TransferRecord>,
    withdrawal_result: Option<WithdrawalRecord>,
    balances: HashMap<Token, Amount>,
    withdrawal_fee: Amount,
    fail_withdraw: bool,
    order_counter: u64,
    transfer_counter: u64,
    withdrawal_counter: u64,
    trade_submissions: Vec<TradeSubmission>,
    transfer_submissions: Vec<String>,
    withdrawal_submissions: Vec<WithdrawalSubmission>,
    deposit_address_amounts: Vec<Option<Amount>>,
}

/// Journal entry of a submitted market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSubmission {
    pub src: Token,
    pub dst: Token,
    pub amount: Amount,
    pub client_order_id: String,
}

/// Journal entry of a submitted withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalSubmission {
    pub token: Token,
    pub chain: Option<String>,
    pub address: String,
    pub client_wd_id: String,
    pub fee: Amount,
    pub amount: Option<Amount>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_deposit_address(&self, token: Token, address: &str) {
        self.inner
            .write()
            .await
            .deposit_addresses
            .insert(token, address.to_string());
    }

    pub async fn set_deposit(&self, tx_id: &str, deposit_id: &str, state: DepositState) {
        self.inner.write().await.deposits.insert(
            tx_id.to_string(),
            DepositRecord {
                deposit_id: deposit_id.to_string(),
                state,
            },
        );
    }

    pub async fn set_trade_result(&self, result: Option<TradeRecord>) {
        self.inner.write().await.trade_result = result;
    }

    pub async fn set_transfer_result(&self, result: Option<TransferRecord>) {
        self.inner.write().await.transfer_result = result;
    }

    pub async fn set_withdrawal_result(&self, result: Option<WithdrawalRecord>) {
        self.inner.write().await.withdrawal_result = result;
    }

    pub async fn set_balance(&self, token: Token, amount: Amount) {
        self.inner.write().await.balances.insert(token, amount);
    }

    pub async fn set_withdrawal_fee(&self, fee: Amount) {
        self.inner.write().await.withdrawal_fee = fee;
    }

    pub async fn set_fail_withdraw(&self, fail: bool) {
        self.inner.write().await.fail_withdraw = fail;
    }

    pub async fn trade_submissions(&self) -> Vec<TradeSubmission> {
        self.inner.read().await.trade_submissions.clone()
    }

    pub async fn transfer_submissions(&self) -> Vec<String> {
        self.inner.read().await.transfer_submissions.clone()
    }

    pub async fn withdrawal_submissions(&self) -> Vec<WithdrawalSubmission> {
        self.inner.read().await.withdrawal_submissions.clone()
    }

    pub async fn deposit_address_amounts(&self) -> Vec<Option<Amount>> {
        self.inner.read().await.deposit_address_amounts.clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_deposit_address(
        &self,
        token: Token,
        _chain: Option<&str>,
        amount: Option<Amount>,
    ) -> Result<DepositAddress> {
        let mut state = self.inner.write().await;
        state.deposit_address_amounts.push(amount);
        let address = state
            .deposit_addresses
            .get(&token)
            .cloned()
            .ok_or_else(|| anyhow!("no deposit address scripted for {}", token))?;
        Ok(DepositAddress { address })
    }

    async fn get_deposit(&self, tx_id: &str) -> Result<Option<DepositRecord>> {
        Ok(self.inner.read().await.deposits.get(tx_id).cloned())
    }

    async fn market_trade(
        &self,
        src: Token,
        dst: Token,
        amount: Amount,
        client_order_id: &str,
    ) -> Result<String> {
        let mut state = self.inner.write().await;
        state.order_counter += 1;
        let n = state.order_counter;
        state.trade_submissions.push(TradeSubmission {
            src,
            dst,
            amount,
            client_order_id: client_order_id.to_string(),
        });
        Ok(format!("ord-{}", n))
    }

    async fn get_trade(
        &self,
        _src: Token,
        _dst: Token,
        _client_order_id: &str,
    ) -> Result<Option<TradeRecord>> {
        Ok(self.inner.read().await.trade_result.clone())
    }

    async fn funds_transfer(
        &self,
        _token: Token,
        _from: AccountType,
        _to: AccountType,
        _amount: Amount,
        client_id: &str,
    ) -> Result<String> {
        let mut state = self.inner.write().await;
        state.transfer_counter += 1;
        let n = state.transfer_counter;
        state.transfer_submissions.push(client_id.to_string());
        Ok(format!("trans-{}", n))
    }

    async fn get_funds_transfer(&self, _client_id: &str) -> Result<Option<TransferRecord>> {
        Ok(self.inner.read().await.transfer_result.clone())
    }

    async fn get_withdrawal_fee(
        &self,
        _token: Token,
        _chain: Option<&str>,
        _amount: Option<Amount>,
    ) -> Result<Amount> {
        Ok(self.inner.read().await.withdrawal_fee)
    }

    async fn withdraw(
        &self,
        token: Token,
        chain: Option<&str>,
        address: &str,
        client_wd_id: &str,
        fee: Amount,
        amount: Option<Amount>,
    ) -> Result<String> {
        let mut state = self.inner.write().await;
        if state.fail_withdraw {
            return Err(anyhow!("withdrawal rejected"));
        }
        state.withdrawal_counter += 1;
        let n = state.withdrawal_counter;
        state.withdrawal_submissions.push(WithdrawalSubmission {
            token,
            chain: chain.map(str::to_string),
            address: address.to_string(),
            client_wd_id: client_wd_id.to_string(),
            fee,
            amount,
        });
        Ok(format!("wd-{}", n))
    }

    async fn get_withdrawal(&self, _client_wd_id: &str) -> Result<Option<WithdrawalRecord>> {
        Ok(self.inner.read().await.withdrawal_result.clone())
    }

    async fn get_balance(&self, token: Token) -> Result<Amount> {
        Ok(*self.inner.read().await.balances.get(&token).unwrap_or(&0))
    }
}

/// Fixed-rate oracle: `to_btc` multiplies by `rate_num / rate_den`.
pub struct MockInventoryOracle {
    inner: RwLock<OracleState>,
}

struct OracleState {
    rate_num: u128,
    rate_den: u128,
    locked: HashMap<Token, Amount>,
    returning: HashMap<Token, Amount>,
}

impl Default for MockInventoryOracle {
    fn default() -> Self {
        Self {
            inner: RwLock::new(OracleState {
                rate_num: 1,
                rate_den: 1,
                locked: HashMap::new(),
                returning: HashMap::new(),
            }),
        }
    }
}

impl MockInventoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the BTC price of one base unit as the ratio `num / den`.
    pub async fn set_rate(&self, num: u128, den: u128) {
        let mut state = self.inner.write().await;
        state.rate_num = num;
        state.rate_den = den;
    }

    pub async fn set_locked(&self, token: Token, amount: Amount) {
        self.inner.write().await.locked.insert(token, amount);
    }

    pub async fn set_returning(&self, token: Token, amount: Amount) {
        self.inner.write().await.returning.insert(token, amount);
    }
}

#[async_trait]
impl InventoryOracle for MockInventoryOracle {
    async fn to_btc(&self, amount: Amount, _token: Token) -> Result<Amount> {
        let state = self.inner.read().await;
        Ok(amount * state.rate_num / state.rate_den)
    }

    async fn from_btc(
        &self,
        amount_btc: Amount,
        _token: Token,
        rounding: Rounding,
    ) -> Result<Amount> {
        let state = self.inner.read().await;
        let scaled = amount_btc * state.rate_den;
        let amount = match rounding {
            Rounding::Down => scaled / state.rate_num,
            Rounding::Up => scaled.div_ceil(state.rate_num),
        };
        Ok(amount)
    }

    async fn locked_balance(&self, token: Token) -> Result<Amount> {
        Ok(*self.inner.read().await.locked.get(&token).unwrap_or(&0))
    }

    async fn returning_balance(&self, token: Token) -> Result<Amount> {
        Ok(*self.inner.read().await.returning.get(&token).unwrap_or(&0))
    }
}
