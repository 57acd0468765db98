//! The rebalancing pipeline: a durable state machine moving value from the
//! heavy inventory side to the light one through the CEX spot market.
//!
//! One `check` pass is the only mutator of the live job. It drains chain
//! events (broadcast acknowledgements, tx replacements), then advances the
//! job phase in a loop until no transition fires, persisting the document
//! before any side effect of the new phase is issued. Crash recovery
//! follows from that ordering plus venue-side idempotency keys.

pub mod job;

use crate::adapters::{
    AccountType, BitcoinBackend, BroadcastHook, ContractTx, DepositState, Exchange,
    InventoryOracle, LightningBackend, OrderState, PsbtOutput, SwapContract, TransferState,
    TxStatus,
};
use crate::config::TimingConfig;
use crate::error::EngineError;
use crate::persistence::StateStore;
use crate::token::Token;
use crate::utils::ids::random_id;
use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use job::{JobSpec, PayoutPlan, RebalanceJob, RebalancePhase, TradeFill, TxCandidates};
use lightning_invoice::Bolt11Invoice;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Venue chain selectors for the bitcoin rails.
const BTC_CHAIN: &str = "Bitcoin";
const LIGHTNING_CHAIN: &str = "Lightning";

/// Confirmations required of on-chain legs.
const MIN_TX_CONFIRMATIONS: u32 = 1;

/// UTXO selection parameters for the outgoing PSBT.
const UTXO_MIN_CONFS: u32 = 1;
const UTXO_TARGET_CONFS: u32 = 2;

/// The external rails the engine drives. No rail talks to another.
#[derive(Clone)]
pub struct Rails {
    pub contract: Arc<dyn SwapContract>,
    pub bitcoin: Arc<dyn BitcoinBackend>,
    pub lightning: Arc<dyn LightningBackend>,
    pub exchange: Arc<dyn Exchange>,
    pub oracle: Arc<dyn InventoryOracle>,
}

/// Timing and venue knobs resolved from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry_time: Duration,
    pub cooldown: Duration,
    pub smart_chain_name: String,
}

impl EngineSettings {
    pub fn new(timing: &TimingConfig, smart_chain_name: impl Into<String>) -> Self {
        Self {
            retry_time: Duration::seconds(timing.retry_time_secs as i64),
            cooldown: Duration::seconds(timing.cooldown_secs as i64),
            smart_chain_name: smart_chain_name.into(),
        }
    }
}

/// Events produced outside the tick: broadcast acknowledgements from
/// detached send tasks and fee-bump replacements from the contract wallet.
#[derive(Debug)]
pub enum ChainEvent {
    Broadcast {
        tx_id: String,
        raw: String,
    },
    Replacement {
        old_tx_id: String,
        new_tx_id: String,
        new_raw: String,
    },
}

struct EngineCore {
    job: Option<RebalanceJob>,
    store: StateStore,
    events: mpsc::UnboundedReceiver<ChainEvent>,
}

/// The rebalance state machine.
pub struct RebalanceEngine {
    rails: Rails,
    settings: EngineSettings,
    core: Mutex<EngineCore>,
    events_tx: mpsc::UnboundedSender<ChainEvent>,
}

impl RebalanceEngine {
    /// Create the engine, restoring any persisted job.
    pub fn new(rails: Rails, store: StateStore, settings: EngineSettings) -> Result<Self> {
        let job = store.load()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            rails,
            settings,
            core: Mutex::new(EngineCore {
                job,
                store,
                events: events_rx,
            }),
            events_tx,
        })
    }

    /// Sender feeding chain events into the engine; the Supervisor wires
    /// the contract's replacement hook to this.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ChainEvent> {
        self.events_tx.clone()
    }

    /// True when no job is in flight and the monitor may seed one.
    pub async fn is_idle(&self) -> bool {
        let core = self.core.lock().await;
        matches!(
            core.job.as_ref().map(|j| &j.phase),
            None | Some(RebalancePhase::Idle)
        )
    }

    /// Clone of the live job, for observation.
    pub async fn snapshot(&self) -> Option<RebalanceJob> {
        self.core.lock().await.job.clone()
    }

    /// Seed a fresh job and immediately run the machine. Fails if a job is
    /// already in flight.
    pub async fn trigger(&self, spec: JobSpec) -> Result<()> {
        {
            let mut core = self.core.lock().await;
            let idle = matches!(
                core.job.as_ref().map(|j| &j.phase),
                None | Some(RebalancePhase::Idle)
            );
            if !idle {
                bail!("a rebalance job is already in flight");
            }
            info!(
                src = %spec.src_token,
                dst = %spec.dst_token,
                amount_out = spec.amount_out,
                "Seeding rebalance job"
            );
            self.commit(&mut core, RebalancePhase::Triggered { spec }, false)?;
        }
        self.check().await;
        Ok(())
    }

    /// One external tick. Advances the job through as many phases as it
    /// can; a set cooldown or a phase waiting on the outside world ends
    /// the pass. Failures are logged and retried by the next tick.
    pub async fn check(&self) {
        let mut core = self.core.lock().await;

        if let Err(e) = self.drain_events(&mut core) {
            warn!(error = %e, "Failed to apply chain events");
        }

        loop {
            let Some(job) = core.job.as_ref() else { return };
            if job.cooling_down(Utc::now()) {
                return;
            }
            let state = job.phase.name();

            match self.step(&mut core).await {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    match e.downcast_ref::<EngineError>() {
                        Some(venue) if venue.is_fatal() => {
                            error!(state, error = %e, "Rebalance requires operator intervention");
                        }
                        _ => warn!(state, error = %e, "Rebalance tick failed, retrying next tick"),
                    }
                    return;
                }
            }
        }
    }

    /// Apply queued broadcast/replacement events to the active candidate
    /// map and persist if anything changed. Each applied event extends the
    /// cooldown so fresh transactions get time to propagate.
    fn drain_events(&self, core: &mut EngineCore) -> Result<()> {
        let mut dirty = false;
        while let Ok(event) = core.events.try_recv() {
            let Some(job) = core.job.as_mut() else { continue };
            let Some(candidates) = job.phase.candidates_mut() else {
                continue;
            };
            match event {
                ChainEvent::Broadcast { tx_id, raw } => {
                    candidates.entry(tx_id).or_insert(raw);
                }
                ChainEvent::Replacement {
                    old_tx_id,
                    new_tx_id,
                    new_raw,
                } => {
                    if !candidates.contains_key(&old_tx_id) {
                        continue;
                    }
                    info!(%old_tx_id, %new_tx_id, "Candidate transaction replaced");
                    candidates.insert(new_tx_id, new_raw);
                }
            }
            job.cooldown = Some(Utc::now() + self.settings.cooldown);
            dirty = true;
        }
        if dirty {
            if let Some(job) = core.job.as_ref() {
                core.store.save(job)?;
            }
        }
        Ok(())
    }

    /// Persist and install a new phase. The document hits disk before the
    /// in-memory job moves, so a failed save leaves the prior state
    /// untouched.
    fn commit(&self, core: &mut EngineCore, phase: RebalancePhase, cooldown: bool) -> Result<()> {
        let from = core
            .job
            .as_ref()
            .map(|j| j.phase.name())
            .unwrap_or("(none)");
        let job = RebalanceJob {
            cooldown: cooldown.then(|| Utc::now() + self.settings.cooldown),
            phase,
        };
        core.store.save(&job)?;
        info!(from, to = job.phase.name(), "Rebalance state advanced");
        core.job = Some(job);
        Ok(())
    }

    /// Schedule the RETRYING wormhole back to a previously visited phase.
    fn commit_retry(&self, core: &mut EngineCore, resume: RebalancePhase) -> Result<()> {
        let retry_at = Utc::now() + self.settings.retry_time;
        self.commit(
            core,
            RebalancePhase::Retrying {
                retry_at,
                resume: Box::new(resume),
            },
            false,
        )
    }

    /// Broadcast candidates in a detached task; the hook feeds broadcast
    /// acknowledgements back through the event channel so the tick never
    /// blocks on confirmation.
    fn spawn_send(&self, txs: Vec<ContractTx>) {
        let contract = self.rails.contract.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let hook: BroadcastHook = Box::new(move |tx_id: &str, raw: &str| {
                let _ = events.send(ChainEvent::Broadcast {
                    tx_id: tx_id.to_string(),
                    raw: raw.to_string(),
                });
            });
            if let Err(e) = contract.send_and_confirm(txs, hook).await {
                warn!(error = %e, "Smart-chain send failed");
            }
        });
    }

    /// Venue chain selector for a payout/deposit of `token`.
    fn chain_of(&self, token: Token) -> &str {
        match token {
            Token::Btc => BTC_CHAIN,
            Token::BtcLn => LIGHTNING_CHAIN,
            _ => &self.settings.smart_chain_name,
        }
    }

    /// Advance the current phase by one transition. Returns `true` when a
    /// transition was committed and the loop should run again.
    async fn step(&self, core: &mut EngineCore) -> Result<bool> {
        let phase = core
            .job
            .as_ref()
            .expect("step requires a live job")
            .phase
            .clone();

        match phase {
            RebalancePhase::Idle => Ok(false),

            RebalancePhase::Triggered { spec } => self.tick_triggered(core, spec).await,

            RebalancePhase::ScWithdrawing {
                spec,
                sc_withdraw_txs,
            } => match self.scan_candidates(&sc_withdraw_txs).await? {
                CandidateScan::Confirmed(tx_id) => {
                    self.commit(
                        core,
                        RebalancePhase::ScWithdrawalConfirmed {
                            spec,
                            sc_withdraw_tx_id: tx_id,
                        },
                        false,
                    )?;
                    Ok(true)
                }
                CandidateScan::AllFailed => {
                    warn!("Every contract withdrawal candidate reverted, funds never left");
                    self.commit(core, RebalancePhase::Idle, false)?;
                    Ok(true)
                }
                CandidateScan::Pending => Ok(false),
            },

            RebalancePhase::ScWithdrawalConfirmed {
                spec,
                sc_withdraw_tx_id,
            } => {
                self.tick_sc_withdrawal_confirmed(core, spec, sc_withdraw_tx_id)
                    .await
            }

            RebalancePhase::OutTx {
                spec,
                sc_withdraw_tx_id,
                out_txs,
            } => self.tick_out_tx(core, spec, sc_withdraw_tx_id, out_txs).await,

            RebalancePhase::OutTxConfirmed { spec, out_tx_id } => {
                let Some(deposit) = self.rails.exchange.get_deposit(&out_tx_id).await? else {
                    return Ok(false);
                };
                match deposit.state {
                    DepositState::Credited | DepositState::Completed => {
                        self.commit(
                            core,
                            RebalancePhase::DepositReceived {
                                spec,
                                deposit_id: deposit.deposit_id,
                            },
                            false,
                        )?;
                        Ok(true)
                    }
                    DepositState::Pending => Ok(false),
                }
            }

            RebalancePhase::DepositReceived { spec, deposit_id } => {
                let client_order_id = random_id();
                self.commit(
                    core,
                    RebalancePhase::TradeExecuting {
                        spec: spec.clone(),
                        deposit_id,
                        client_order_id: client_order_id.clone(),
                    },
                    true,
                )?;

                // Submission errors are swallowed; TRADE_EXECUTING
                // reconciles against the venue by client order id.
                if let Err(e) = self
                    .rails
                    .exchange
                    .market_trade(
                        spec.src_token,
                        spec.dst_token,
                        spec.amount_out,
                        &client_order_id,
                    )
                    .await
                {
                    warn!(error = %e, "Market order submission failed");
                }
                Ok(true)
            }

            RebalancePhase::TradeExecuting {
                spec,
                deposit_id,
                client_order_id,
            } => {
                self.tick_trade_executing(core, spec, deposit_id, client_order_id)
                    .await
            }

            RebalancePhase::TradeExecuted { spec, trade } => {
                let client_transfer_id = random_id();
                self.commit(
                    core,
                    RebalancePhase::FundsTransfering {
                        spec: spec.clone(),
                        trade: trade.clone(),
                        client_transfer_id: client_transfer_id.clone(),
                    },
                    true,
                )?;

                if let Err(e) = self
                    .rails
                    .exchange
                    .funds_transfer(
                        spec.dst_token,
                        AccountType::Trading,
                        AccountType::Funding,
                        trade.amount_in,
                        &client_transfer_id,
                    )
                    .await
                {
                    warn!(error = %e, "Funds transfer submission failed");
                }
                Ok(true)
            }

            RebalancePhase::FundsTransfering {
                spec,
                trade,
                client_transfer_id,
            } => {
                let record = self
                    .rails
                    .exchange
                    .get_funds_transfer(&client_transfer_id)
                    .await?;
                match record {
                    Some(r) if r.state == TransferState::Success => {
                        self.commit(
                            core,
                            RebalancePhase::FundsTransfered {
                                spec,
                                trade,
                                transfer_id: r.transfer_id,
                            },
                            false,
                        )?;
                        Ok(true)
                    }
                    Some(r) if r.state == TransferState::Pending => Ok(false),
                    _ => {
                        warn!("Funds transfer failed or unknown, retrying from TRADE_EXECUTED");
                        self.commit_retry(core, RebalancePhase::TradeExecuted { spec, trade })?;
                        Ok(true)
                    }
                }
            }

            RebalancePhase::FundsTransfered {
                spec,
                trade,
                transfer_id,
            } => self.tick_funds_transfered(core, spec, trade, transfer_id).await,

            RebalancePhase::Withdrawing {
                spec,
                trade,
                transfer_id,
                payout,
            } => {
                let record = self
                    .rails
                    .exchange
                    .get_withdrawal(&payout.withdrawal_id)
                    .await?;
                match record {
                    Some(r) if r.state == 2 => {
                        self.commit(
                            core,
                            RebalancePhase::WithdrawalSent {
                                spec,
                                trade,
                                transfer_id,
                                payout,
                                in_tx_id: r.tx_id,
                            },
                            false,
                        )?;
                        Ok(true)
                    }
                    Some(r) if r.state >= 0 => Ok(false),
                    _ => {
                        warn!("Withdrawal failed or unknown, retrying from FUNDS_TRANSFERED");
                        self.commit_retry(
                            core,
                            RebalancePhase::FundsTransfered {
                                spec,
                                trade,
                                transfer_id,
                            },
                        )?;
                        Ok(true)
                    }
                }
            }

            RebalancePhase::WithdrawalSent {
                spec,
                trade,
                transfer_id,
                payout,
                in_tx_id,
            } => {
                self.tick_withdrawal_sent(core, spec, trade, transfer_id, payout, in_tx_id)
                    .await
            }

            RebalancePhase::InTxConfirmed { spec, trade, payout } => {
                if spec.dst_token.is_bitcoin() {
                    self.commit(core, RebalancePhase::Finished, false)?;
                    return Ok(true);
                }
                let amount = trade
                    .amount_in
                    .checked_sub(payout.withdrawal_fee)
                    .context("withdrawal fee exceeds traded amount")?;
                let txs = self
                    .rails
                    .contract
                    .txs_deposit(spec.dst_token, amount)
                    .await?;
                let candidates: TxCandidates = txs
                    .iter()
                    .map(|t| (t.tx_id.clone(), t.raw.clone()))
                    .collect();
                self.commit(
                    core,
                    RebalancePhase::ScDepositing {
                        spec,
                        trade,
                        payout,
                        sc_deposit_txs: candidates,
                    },
                    true,
                )?;
                self.spawn_send(txs);
                Ok(true)
            }

            RebalancePhase::ScDepositing {
                spec,
                trade,
                payout,
                sc_deposit_txs,
            } => match self.scan_candidates(&sc_deposit_txs).await? {
                CandidateScan::Confirmed(tx_id) => {
                    self.commit(
                        core,
                        RebalancePhase::ScDeposited {
                            spec,
                            sc_deposit_tx_id: tx_id,
                        },
                        false,
                    )?;
                    Ok(true)
                }
                CandidateScan::AllFailed => {
                    warn!("Every contract deposit candidate reverted, rebuilding deposit");
                    self.commit_retry(
                        core,
                        RebalancePhase::InTxConfirmed { spec, trade, payout },
                    )?;
                    Ok(true)
                }
                CandidateScan::Pending => Ok(false),
            },

            RebalancePhase::ScDeposited { .. } => {
                self.commit(core, RebalancePhase::Finished, false)?;
                Ok(true)
            }

            RebalancePhase::Finished => {
                core.store.archive()?;
                core.job = None;
                info!("Rebalance finished and archived");
                Ok(true)
            }

            RebalancePhase::Retrying { retry_at, resume } => {
                if Utc::now() < retry_at {
                    return Ok(false);
                }
                self.commit(core, *resume, false)?;
                Ok(true)
            }
        }
    }

    /// TRIGGERED: open the outgoing leg toward the CEX.
    async fn tick_triggered(&self, core: &mut EngineCore, spec: JobSpec) -> Result<bool> {
        match spec.src_token {
            Token::BtcLn => {
                let deposit = self
                    .rails
                    .exchange
                    .get_deposit_address(
                        Token::BtcLn,
                        Some(LIGHTNING_CHAIN),
                        Some(spec.amount_out),
                    )
                    .await?;

                let invoice = Bolt11Invoice::from_str(&deposit.address)
                    .map_err(|e| anyhow::anyhow!("venue returned invalid invoice: {e:?}"))?;
                let expected_msat = spec.amount_out * 1000;
                let invoice_msat = invoice.amount_milli_satoshis().unwrap_or(0) as u128;
                if invoice_msat != expected_msat {
                    return Err(EngineError::InvoiceAmountMismatch {
                        expected_msat,
                        invoice_msat,
                    }
                    .into());
                }

                let payment_hash = invoice.payment_hash().to_string();
                let mut out_txs = TxCandidates::new();
                out_txs.insert(payment_hash, deposit.address.clone());
                self.commit(
                    core,
                    RebalancePhase::OutTx {
                        spec,
                        sc_withdraw_tx_id: None,
                        out_txs,
                    },
                    true,
                )?;

                if let Err(e) = self.rails.lightning.pay(&deposit.address).await {
                    warn!(error = %e, "Lightning payment failed, funds never left");
                    self.commit(core, RebalancePhase::Idle, false)?;
                }
                Ok(true)
            }

            Token::Btc => {
                let deposit = self
                    .rails
                    .exchange
                    .get_deposit_address(Token::Btc, Some(BTC_CHAIN), None)
                    .await?;

                let outputs = [PsbtOutput {
                    address: deposit.address,
                    sats: spec.amount_out,
                }];
                let funded = match self
                    .rails
                    .bitcoin
                    .fund_psbt(&outputs, UTXO_MIN_CONFS, UTXO_TARGET_CONFS)
                    .await
                {
                    Ok(funded) => funded,
                    Err(e) => {
                        warn!(error = %e, "PSBT funding failed, funds never left");
                        self.commit(core, RebalancePhase::Idle, false)?;
                        return Ok(true);
                    }
                };

                let signed = match self.rails.bitcoin.sign_psbt(&funded.psbt).await {
                    Ok(signed) => signed,
                    Err(e) => {
                        warn!(error = %e, "PSBT signing failed, releasing reserved UTXOs");
                        for lock in &funded.inputs {
                            if let Err(e) = self.rails.bitcoin.unlock_utxo(lock).await {
                                warn!(error = %e, lock_id = %lock.lock_id, "UTXO unlock failed");
                            }
                        }
                        self.commit(core, RebalancePhase::Idle, false)?;
                        return Ok(true);
                    }
                };

                let mut out_txs = TxCandidates::new();
                out_txs.insert(signed.tx_id.clone(), signed.transaction.clone());
                self.commit(
                    core,
                    RebalancePhase::OutTx {
                        spec,
                        sc_withdraw_tx_id: None,
                        out_txs,
                    },
                    true,
                )?;

                if let Err(e) = self
                    .rails
                    .bitcoin
                    .broadcast_chain_transaction(&signed.transaction)
                    .await
                {
                    // OUT_TX treats a tx the chain never saw as a dead end
                    // back to IDLE, so a lost broadcast self-heals there.
                    warn!(error = %e, tx_id = %signed.tx_id, "Broadcast failed");
                }
                Ok(true)
            }

            _ => {
                let txs = self
                    .rails
                    .contract
                    .txs_withdraw(spec.src_token, spec.amount_out)
                    .await?;
                let candidates: TxCandidates = txs
                    .iter()
                    .map(|t| (t.tx_id.clone(), t.raw.clone()))
                    .collect();
                self.commit(
                    core,
                    RebalancePhase::ScWithdrawing {
                        spec,
                        sc_withdraw_txs: candidates,
                    },
                    true,
                )?;
                self.spawn_send(txs);
                Ok(true)
            }
        }
    }

    /// SC_WITHDRAWAL_CONFIRMED: move the withdrawn funds to the CEX
    /// deposit address.
    async fn tick_sc_withdrawal_confirmed(
        &self,
        core: &mut EngineCore,
        spec: JobSpec,
        sc_withdraw_tx_id: String,
    ) -> Result<bool> {
        let deposit = self
            .rails
            .exchange
            .get_deposit_address(spec.src_token, Some(&self.settings.smart_chain_name), None)
            .await?;

        let txs = self
            .rails
            .contract
            .txs_transfer(spec.src_token, spec.amount_out, &deposit.address)
            .await?;
        let candidates: TxCandidates = txs
            .iter()
            .map(|t| (t.tx_id.clone(), t.raw.clone()))
            .collect();
        self.commit(
            core,
            RebalancePhase::OutTx {
                spec,
                sc_withdraw_tx_id: Some(sc_withdraw_tx_id),
                out_txs: candidates,
            },
            true,
        )?;
        self.spawn_send(txs);
        Ok(true)
    }

    /// OUT_TX: wait for the outgoing leg to confirm on its rail.
    async fn tick_out_tx(
        &self,
        core: &mut EngineCore,
        spec: JobSpec,
        sc_withdraw_tx_id: Option<String>,
        out_txs: TxCandidates,
    ) -> Result<bool> {
        match spec.src_token {
            Token::Btc => {
                let (tx_id, _) = out_txs.iter().next().context("OUT_TX without candidate")?;
                match self.rails.bitcoin.get_transaction(tx_id).await? {
                    None => {
                        warn!(%tx_id, "Outgoing chain tx unknown to the wallet, funds never left");
                        self.commit(core, RebalancePhase::Idle, false)?;
                        Ok(true)
                    }
                    Some(tx) if tx.confirmations >= MIN_TX_CONFIRMATIONS => {
                        self.commit(
                            core,
                            RebalancePhase::OutTxConfirmed {
                                spec,
                                out_tx_id: tx_id.clone(),
                            },
                            false,
                        )?;
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                }
            }

            Token::BtcLn => {
                let (payment_hash, _) =
                    out_txs.iter().next().context("OUT_TX without candidate")?;
                match self.rails.lightning.get_payment(payment_hash).await? {
                    None => {
                        warn!(%payment_hash, "Lightning payment unknown, funds never left");
                        self.commit(core, RebalancePhase::Idle, false)?;
                        Ok(true)
                    }
                    Some(p) if p.is_failed => {
                        warn!(%payment_hash, "Lightning payment failed, funds never left");
                        self.commit(core, RebalancePhase::Idle, false)?;
                        Ok(true)
                    }
                    Some(p) if p.is_confirmed => {
                        self.commit(
                            core,
                            RebalancePhase::OutTxConfirmed {
                                spec,
                                out_tx_id: payment_hash.clone(),
                            },
                            false,
                        )?;
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                }
            }

            _ => match self.scan_candidates(&out_txs).await? {
                CandidateScan::Confirmed(tx_id) => {
                    self.commit(
                        core,
                        RebalancePhase::OutTxConfirmed {
                            spec,
                            out_tx_id: tx_id,
                        },
                        false,
                    )?;
                    Ok(true)
                }
                CandidateScan::AllFailed => {
                    let sc_withdraw_tx_id = sc_withdraw_tx_id
                        .expect("smart-chain OUT_TX carries the confirmed withdrawal txid");
                    warn!("Every transfer candidate reverted, retrying from SC_WITHDRAWAL_CONFIRMED");
                    self.commit_retry(
                        core,
                        RebalancePhase::ScWithdrawalConfirmed {
                            spec,
                            sc_withdraw_tx_id,
                        },
                    )?;
                    Ok(true)
                }
                CandidateScan::Pending => Ok(false),
            },
        }
    }

    /// TRADE_EXECUTING: reconcile the market order by client order id.
    async fn tick_trade_executing(
        &self,
        core: &mut EngineCore,
        spec: JobSpec,
        deposit_id: String,
        client_order_id: String,
    ) -> Result<bool> {
        let record = self
            .rails
            .exchange
            .get_trade(spec.src_token, spec.dst_token, &client_order_id)
            .await?;

        let Some(record) = record else {
            warn!("Order unknown to the venue, retrying from DEPOSIT_RECEIVED");
            self.commit_retry(core, RebalancePhase::DepositReceived { spec, deposit_id })?;
            return Ok(true);
        };

        match record.state {
            OrderState::Canceled | OrderState::MmpCanceled => {
                warn!(order_id = %record.order_id, "Order canceled, retrying from DEPOSIT_RECEIVED");
                self.commit_retry(core, RebalancePhase::DepositReceived { spec, deposit_id })?;
                Ok(true)
            }
            OrderState::Filled => {
                // amount_in is the full post-trade balance, dust included.
                let amount_in = self.rails.exchange.get_balance(spec.dst_token).await?;
                self.commit(
                    core,
                    RebalancePhase::TradeExecuted {
                        spec,
                        trade: TradeFill {
                            order_id: record.order_id,
                            price: record.average_price,
                            amount_in,
                        },
                    },
                    false,
                )?;
                Ok(true)
            }
            OrderState::Live | OrderState::PartiallyFilled => Ok(false),
        }
    }

    /// FUNDS_TRANSFERED: compute the payout plan and submit the
    /// withdrawal.
    async fn tick_funds_transfered(
        &self,
        core: &mut EngineCore,
        spec: JobSpec,
        trade: TradeFill,
        transfer_id: String,
    ) -> Result<bool> {
        let dst = spec.dst_token;
        let chain = self.chain_of(dst).to_string();
        let fee = self
            .rails
            .exchange
            .get_withdrawal_fee(dst, Some(&chain), Some(trade.amount_in))
            .await?;
        let net = trade
            .amount_in
            .checked_sub(fee)
            .context("withdrawal fee exceeds traded amount")?;

        let receiving_address = match dst {
            Token::Btc => self
                .rails
                .bitcoin
                .get_chain_addresses()
                .await?
                .into_iter()
                .next()
                .context("wallet returned no receive address")?,
            Token::BtcLn => {
                let invoice = self.rails.lightning.create_invoice(net * 1000).await?;
                invoice.request
            }
            _ => self.rails.contract.get_address(),
        };

        let withdrawal_id = random_id();
        let payout = PayoutPlan {
            receiving_address: receiving_address.clone(),
            withdrawal_fee: fee,
            withdrawal_id: withdrawal_id.clone(),
        };
        self.commit(
            core,
            RebalancePhase::Withdrawing {
                spec: spec.clone(),
                trade: trade.clone(),
                transfer_id: transfer_id.clone(),
                payout,
            },
            true,
        )?;

        // Lightning withdrawals derive their amount from the invoice.
        let amount = (dst != Token::BtcLn).then_some(net);
        if let Err(e) = self
            .rails
            .exchange
            .withdraw(
                dst,
                Some(&chain),
                &receiving_address,
                &withdrawal_id,
                fee,
                amount,
            )
            .await
        {
            warn!(error = %e, "Withdrawal submission failed, retrying from FUNDS_TRANSFERED");
            self.commit_retry(
                core,
                RebalancePhase::FundsTransfered {
                    spec,
                    trade,
                    transfer_id,
                },
            )?;
        }
        Ok(true)
    }

    /// WITHDRAWAL_SENT: wait for the payout to land on its rail.
    async fn tick_withdrawal_sent(
        &self,
        core: &mut EngineCore,
        spec: JobSpec,
        trade: TradeFill,
        transfer_id: String,
        payout: PayoutPlan,
        in_tx_id: String,
    ) -> Result<bool> {
        let back_to_withdrawing = RebalancePhase::Withdrawing {
            spec: spec.clone(),
            trade: trade.clone(),
            transfer_id: transfer_id.clone(),
            payout: payout.clone(),
        };
        let confirmed = RebalancePhase::InTxConfirmed {
            spec: spec.clone(),
            trade,
            payout: payout.clone(),
        };

        match spec.dst_token {
            Token::Btc => match self.rails.bitcoin.get_transaction(&in_tx_id).await? {
                None => {
                    warn!(%in_tx_id, "Payout tx not seen on chain, retrying from WITHDRAWING");
                    self.commit_retry(core, back_to_withdrawing)?;
                    Ok(true)
                }
                Some(tx) if tx.confirmations >= MIN_TX_CONFIRMATIONS => {
                    self.commit(core, confirmed, false)?;
                    Ok(true)
                }
                Some(_) => Ok(false),
            },

            Token::BtcLn => {
                let status = self.rails.lightning.get_invoice(&in_tx_id).await?;
                if status.is_confirmed {
                    self.commit(core, confirmed, false)?;
                    Ok(true)
                } else if status.is_canceled {
                    warn!(%in_tx_id, "Payout invoice canceled, retrying from WITHDRAWING");
                    self.commit_retry(core, back_to_withdrawing)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }

            _ => match self.rails.contract.get_tx_id_status(&in_tx_id).await? {
                TxStatus::Success => {
                    self.commit(core, confirmed, false)?;
                    Ok(true)
                }
                TxStatus::Reverted => {
                    warn!(%in_tx_id, "Payout tx reverted, retrying from WITHDRAWING");
                    self.commit_retry(core, back_to_withdrawing)?;
                    Ok(true)
                }
                TxStatus::Pending | TxStatus::NotFound => Ok(false),
            },
        }
    }

    /// Poll every candidate of a smart-chain leg. The first success wins;
    /// the leg fails only when no candidate can still confirm.
    async fn scan_candidates(&self, candidates: &TxCandidates) -> Result<CandidateScan> {
        let mut any_pending = false;
        for (tx_id, raw) in candidates {
            match self.rails.contract.get_tx_status(raw).await? {
                TxStatus::Success => return Ok(CandidateScan::Confirmed(tx_id.clone())),
                TxStatus::Pending => any_pending = true,
                TxStatus::Reverted | TxStatus::NotFound => {}
            }
        }
        if any_pending || candidates.is_empty() {
            Ok(CandidateScan::Pending)
        } else {
            Ok(CandidateScan::AllFailed)
        }
    }
}

/// Outcome of scanning a candidate map.
enum CandidateScan {
    Confirmed(String),
    AllFailed,
    Pending,
}
