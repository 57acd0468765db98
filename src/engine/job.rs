//! The persisted rebalance job: a tagged union with one variant per phase.
//!
//! Each variant carries exactly the fields that must be present while the
//! job occupies that phase, so the required-field invariant is discharged
//! by construction instead of runtime checks. `Retrying` boxes the full
//! record of the phase it will re-enter, which is how the wormhole restores
//! a previously visited phase with its fields intact.
//!
//! Big-integer fields serialize as decimal strings (`token::amount_str`).

use crate::token::{amount_str, Amount, Token};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candidate transaction set keyed by txid. Replacements are added next to
/// the originals; the confirmation scan considers every entry.
pub type TxCandidates = BTreeMap<String, String>;

/// What to convert, fixed when the job is triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub src_token: Token,
    /// Contract address of the source token; absent on bitcoin rails.
    pub src_token_address: Option<String>,
    pub dst_token: Token,
    /// Contract address of the destination token; absent on bitcoin rails.
    pub dst_token_address: Option<String>,
    #[serde(with = "amount_str")]
    pub amount_out: Amount,
}

/// Outcome of the CEX market trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFill {
    pub order_id: String,
    /// Average fill price as reported by the venue.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Full post-trade balance of the destination token in the trading
    /// subaccount. May include dust from prior cycles.
    #[serde(with = "amount_str")]
    pub amount_in: Amount,
}

/// Where and how the CEX pays out the destination leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutPlan {
    /// On-chain address, BOLT-11 invoice, or own contract address.
    pub receiving_address: String,
    #[serde(with = "amount_str")]
    pub withdrawal_fee: Amount,
    /// Client-chosen withdrawal idempotency key.
    pub withdrawal_id: String,
}

/// The rebalance phase graph, one variant per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalancePhase {
    Idle,

    #[serde(rename_all = "camelCase")]
    Triggered { spec: JobSpec },

    #[serde(rename_all = "camelCase")]
    ScWithdrawing {
        spec: JobSpec,
        sc_withdraw_txs: TxCandidates,
    },

    #[serde(rename_all = "camelCase")]
    ScWithdrawalConfirmed {
        spec: JobSpec,
        sc_withdraw_tx_id: String,
    },

    #[serde(rename_all = "camelCase")]
    OutTx {
        spec: JobSpec,
        /// Present when the source leg came out of the contract; it is the
        /// retry anchor if every outgoing candidate reverts.
        sc_withdraw_tx_id: Option<String>,
        out_txs: TxCandidates,
    },

    #[serde(rename_all = "camelCase")]
    OutTxConfirmed { spec: JobSpec, out_tx_id: String },

    #[serde(rename_all = "camelCase")]
    DepositReceived { spec: JobSpec, deposit_id: String },

    #[serde(rename_all = "camelCase")]
    TradeExecuting {
        spec: JobSpec,
        deposit_id: String,
        client_order_id: String,
    },

    #[serde(rename_all = "camelCase")]
    TradeExecuted { spec: JobSpec, trade: TradeFill },

    #[serde(rename_all = "camelCase")]
    FundsTransfering {
        spec: JobSpec,
        trade: TradeFill,
        client_transfer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    FundsTransfered {
        spec: JobSpec,
        trade: TradeFill,
        transfer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    Withdrawing {
        spec: JobSpec,
        trade: TradeFill,
        transfer_id: String,
        payout: PayoutPlan,
    },

    #[serde(rename_all = "camelCase")]
    WithdrawalSent {
        spec: JobSpec,
        trade: TradeFill,
        transfer_id: String,
        payout: PayoutPlan,
        in_tx_id: String,
    },

    #[serde(rename_all = "camelCase")]
    InTxConfirmed {
        spec: JobSpec,
        trade: TradeFill,
        payout: PayoutPlan,
    },

    #[serde(rename_all = "camelCase")]
    ScDepositing {
        spec: JobSpec,
        trade: TradeFill,
        payout: PayoutPlan,
        sc_deposit_txs: TxCandidates,
    },

    #[serde(rename_all = "camelCase")]
    ScDeposited {
        spec: JobSpec,
        sc_deposit_tx_id: String,
    },

    Finished,

    #[serde(rename_all = "camelCase")]
    Retrying {
        retry_at: DateTime<Utc>,
        /// Full record of the previously visited phase to re-enter.
        resume: Box<RebalancePhase>,
    },
}

impl RebalancePhase {
    /// Tag name as persisted, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RebalancePhase::Idle => "IDLE",
            RebalancePhase::Triggered { .. } => "TRIGGERED",
            RebalancePhase::ScWithdrawing { .. } => "SC_WITHDRAWING",
            RebalancePhase::ScWithdrawalConfirmed { .. } => "SC_WITHDRAWAL_CONFIRMED",
            RebalancePhase::OutTx { .. } => "OUT_TX",
            RebalancePhase::OutTxConfirmed { .. } => "OUT_TX_CONFIRMED",
            RebalancePhase::DepositReceived { .. } => "DEPOSIT_RECEIVED",
            RebalancePhase::TradeExecuting { .. } => "TRADE_EXECUTING",
            RebalancePhase::TradeExecuted { .. } => "TRADE_EXECUTED",
            RebalancePhase::FundsTransfering { .. } => "FUNDS_TRANSFERING",
            RebalancePhase::FundsTransfered { .. } => "FUNDS_TRANSFERED",
            RebalancePhase::Withdrawing { .. } => "WITHDRAWING",
            RebalancePhase::WithdrawalSent { .. } => "WITHDRAWAL_SENT",
            RebalancePhase::InTxConfirmed { .. } => "IN_TX_CONFIRMED",
            RebalancePhase::ScDepositing { .. } => "SC_DEPOSITING",
            RebalancePhase::ScDeposited { .. } => "SC_DEPOSITED",
            RebalancePhase::Finished => "FINISHED",
            RebalancePhase::Retrying { .. } => "RETRYING",
        }
    }

    /// The active candidate map of the current phase, if it has one.
    pub fn candidates_mut(&mut self) -> Option<&mut TxCandidates> {
        match self {
            RebalancePhase::ScWithdrawing { sc_withdraw_txs, .. } => Some(sc_withdraw_txs),
            RebalancePhase::OutTx { out_txs, .. } => Some(out_txs),
            RebalancePhase::ScDepositing { sc_deposit_txs, .. } => Some(sc_deposit_txs),
            _ => None,
        }
    }
}

/// The live job document. At most one exists at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceJob {
    /// Earliest wall-clock time the engine may tick this job again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub phase: RebalancePhase,
}

impl RebalanceJob {
    pub fn new(phase: RebalancePhase) -> Self {
        Self {
            cooldown: None,
            phase,
        }
    }

    /// True if the cooldown gate is still closed at `now`.
    pub fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown, Some(until) if now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> JobSpec {
        JobSpec {
            src_token: Token::Btc,
            src_token_address: None,
            dst_token: Token::Usdc,
            dst_token_address: Some("usdc-mint".to_string()),
            amount_out: 100_000,
        }
    }

    fn fill() -> TradeFill {
        TradeFill {
            order_id: "o-1".to_string(),
            price: dec!(24.5),
            amount_in: 20_000_000,
        }
    }

    fn payout() -> PayoutPlan {
        PayoutPlan {
            receiving_address: "bc1qexample".to_string(),
            withdrawal_fee: 1_000,
            withdrawal_id: "wd-1".to_string(),
        }
    }

    fn all_phases() -> Vec<RebalancePhase> {
        let mut txs = TxCandidates::new();
        txs.insert("t1".to_string(), "raw1".to_string());
        vec![
            RebalancePhase::Idle,
            RebalancePhase::Triggered { spec: spec() },
            RebalancePhase::ScWithdrawing {
                spec: spec(),
                sc_withdraw_txs: txs.clone(),
            },
            RebalancePhase::ScWithdrawalConfirmed {
                spec: spec(),
                sc_withdraw_tx_id: "t1".to_string(),
            },
            RebalancePhase::OutTx {
                spec: spec(),
                sc_withdraw_tx_id: Some("t1".to_string()),
                out_txs: txs.clone(),
            },
            RebalancePhase::OutTxConfirmed {
                spec: spec(),
                out_tx_id: "t1".to_string(),
            },
            RebalancePhase::DepositReceived {
                spec: spec(),
                deposit_id: "d1".to_string(),
            },
            RebalancePhase::TradeExecuting {
                spec: spec(),
                deposit_id: "d1".to_string(),
                client_order_id: "c1".to_string(),
            },
            RebalancePhase::TradeExecuted {
                spec: spec(),
                trade: fill(),
            },
            RebalancePhase::FundsTransfering {
                spec: spec(),
                trade: fill(),
                client_transfer_id: "ct1".to_string(),
            },
            RebalancePhase::FundsTransfered {
                spec: spec(),
                trade: fill(),
                transfer_id: "tr1".to_string(),
            },
            RebalancePhase::Withdrawing {
                spec: spec(),
                trade: fill(),
                transfer_id: "tr1".to_string(),
                payout: payout(),
            },
            RebalancePhase::WithdrawalSent {
                spec: spec(),
                trade: fill(),
                transfer_id: "tr1".to_string(),
                payout: payout(),
                in_tx_id: "in1".to_string(),
            },
            RebalancePhase::InTxConfirmed {
                spec: spec(),
                trade: fill(),
                payout: payout(),
            },
            RebalancePhase::ScDepositing {
                spec: spec(),
                trade: fill(),
                payout: payout(),
                sc_deposit_txs: txs,
            },
            RebalancePhase::ScDeposited {
                spec: spec(),
                sc_deposit_tx_id: "t9".to_string(),
            },
            RebalancePhase::Finished,
            RebalancePhase::Retrying {
                retry_at: Utc::now(),
                resume: Box::new(RebalancePhase::DepositReceived {
                    spec: spec(),
                    deposit_id: "d1".to_string(),
                }),
            },
        ]
    }

    #[test]
    fn test_every_phase_round_trips_with_its_fields() {
        for phase in all_phases() {
            let job = RebalanceJob::new(phase.clone());
            let json = serde_json::to_string(&job).unwrap();
            let back: RebalanceJob = serde_json::from_str(&json).unwrap();
            assert_eq!(back.phase, phase, "phase {}", phase.name());
        }
    }

    #[test]
    fn test_discriminator_is_the_state_field() {
        let job = RebalanceJob::new(RebalancePhase::Triggered { spec: spec() });
        let value: serde_json::Value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["state"], "TRIGGERED");
        assert_eq!(value["spec"]["amountOut"], "100000");
    }

    #[test]
    fn test_amounts_persist_as_decimal_strings() {
        let job = RebalanceJob::new(RebalancePhase::TradeExecuted {
            spec: spec(),
            trade: fill(),
        });
        let value: serde_json::Value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["trade"]["amountIn"], "20000000");
        assert_eq!(value["trade"]["price"], "24.5");
    }

    #[test]
    fn test_hex_amounts_accepted_on_read() {
        let json = r#"{
            "state": "TRIGGERED",
            "spec": {
                "srcToken": "BTC",
                "srcTokenAddress": null,
                "dstToken": "USDC",
                "dstTokenAddress": "usdc-mint",
                "amountOut": "0x186a0"
            }
        }"#;
        let job: RebalanceJob = serde_json::from_str(json).unwrap();
        match job.phase {
            RebalancePhase::Triggered { spec } => assert_eq!(spec.amount_out, 100_000),
            other => panic!("unexpected phase {}", other.name()),
        }
    }

    #[test]
    fn test_retrying_preserves_resume_record() {
        let retry = RebalancePhase::Retrying {
            retry_at: Utc::now(),
            resume: Box::new(RebalancePhase::FundsTransfered {
                spec: spec(),
                trade: fill(),
                transfer_id: "tr1".to_string(),
            }),
        };
        let json = serde_json::to_string(&retry).unwrap();
        let back: RebalancePhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, retry);
    }

    #[test]
    fn test_cooldown_gate() {
        let now = Utc::now();
        let mut job = RebalanceJob::new(RebalancePhase::Finished);
        assert!(!job.cooling_down(now));
        job.cooldown = Some(now + chrono::Duration::seconds(5));
        assert!(job.cooling_down(now));
        assert!(!job.cooling_down(now + chrono::Duration::seconds(6)));
    }
}
