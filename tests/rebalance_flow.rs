//! Black-box rebalance scenarios through the public crate surface:
//! full pipelines from seed to archived terminal state, and the balance
//! monitor seeding the engine. Transition-level coverage of the state
//! machine lives with the engine itself.

use inventory_hedger::adapters::mock::{
    MockBitcoinBackend, MockExchange, MockInventoryOracle, MockLightningBackend, MockSwapContract,
};
use inventory_hedger::adapters::{
    DepositState, OrderState, TradeRecord, TransferRecord, TransferState, TxStatus,
    WithdrawalRecord,
};
use inventory_hedger::config::{RebalanceSettings, TokenAddresses};
use inventory_hedger::engine::job::{JobSpec, RebalancePhase};
use inventory_hedger::engine::{EngineSettings, Rails, RebalanceEngine};
use inventory_hedger::monitor::BalanceMonitor;
use inventory_hedger::persistence::StateStore;
use inventory_hedger::token::Token;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Harness {
    contract: Arc<MockSwapContract>,
    bitcoin: Arc<MockBitcoinBackend>,
    lightning: Arc<MockLightningBackend>,
    exchange: Arc<MockExchange>,
    oracle: Arc<MockInventoryOracle>,
    engine: Arc<RebalanceEngine>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let contract = Arc::new(MockSwapContract::new());
        let bitcoin = Arc::new(MockBitcoinBackend::new());
        let lightning = Arc::new(MockLightningBackend::new());
        let exchange = Arc::new(MockExchange::new());
        let oracle = Arc::new(MockInventoryOracle::new());

        let rails = Rails {
            contract: contract.clone(),
            bitcoin: bitcoin.clone(),
            lightning: lightning.clone(),
            exchange: exchange.clone(),
            oracle: oracle.clone(),
        };
        let settings = EngineSettings {
            retry_time: chrono::Duration::milliseconds(200),
            cooldown: chrono::Duration::zero(),
            smart_chain_name: "Solana".to_string(),
        };
        let store = StateStore::new(dir.path(), "state");
        let engine = Arc::new(RebalanceEngine::new(rails, store, settings).unwrap());

        Self {
            contract,
            bitcoin,
            lightning,
            exchange,
            oracle,
            engine,
            dir,
        }
    }

    fn rails(&self) -> Rails {
        Rails {
            contract: self.contract.clone(),
            bitcoin: self.bitcoin.clone(),
            lightning: self.lightning.clone(),
            exchange: self.exchange.clone(),
            oracle: self.oracle.clone(),
        }
    }

    fn archived_files(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(self.dir.path().join("archive")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn btc_to_usdc_spec(amount_out: u128) -> JobSpec {
    JobSpec {
        src_token: Token::Btc,
        src_token_address: None,
        dst_token: Token::Usdc,
        dst_token_address: Some("usdc-mint".to_string()),
        amount_out,
    }
}

fn usdc_to_btc_spec(amount_out: u128) -> JobSpec {
    JobSpec {
        src_token: Token::Usdc,
        src_token_address: Some("usdc-mint".to_string()),
        dst_token: Token::Btc,
        dst_token_address: None,
        amount_out,
    }
}

/// Script the CEX half shared by the happy-path scenarios: deposit
/// credited, trade filled, transfer succeeded, withdrawal completed.
async fn script_cex_leg(h: &Harness, out_tx_id: &str, in_tx_id: &str, dst: Token, amount_in: u128) {
    h.exchange
        .set_deposit(out_tx_id, "dep-1", DepositState::Completed)
        .await;
    h.exchange
        .set_trade_result(Some(TradeRecord {
            order_id: "ord-filled".to_string(),
            average_price: dec!(24.5),
            state: OrderState::Filled,
        }))
        .await;
    h.exchange.set_balance(dst, amount_in).await;
    h.exchange
        .set_transfer_result(Some(TransferRecord {
            transfer_id: "transfer-1".to_string(),
            state: TransferState::Success,
        }))
        .await;
    h.exchange.set_withdrawal_fee(1_000).await;
    h.exchange
        .set_withdrawal_result(Some(WithdrawalRecord {
            tx_id: in_tx_id.to_string(),
            state: 2,
        }))
        .await;
}

#[tokio::test]
async fn btc_to_usdc_happy_path_archives_terminal_state() {
    let h = Harness::new();

    h.exchange.set_deposit_address(Token::Btc, "bc1qcexdeposit").await;
    // First PSBT signs to a deterministic txid; confirmed on chain.
    h.bitcoin.set_transaction("btc-tx-for-psbt-1", 1).await;
    script_cex_leg(&h, "btc-tx-for-psbt-1", "t-in", Token::Usdc, 20_000_000).await;
    // Payout lands on the smart chain, then the deposit into the contract
    // confirms.
    h.contract.set_tx_id_status("t-in", TxStatus::Success).await;
    h.contract.set_tx_status("raw-scd-1", TxStatus::Success).await;

    h.engine.trigger(btc_to_usdc_spec(100_000)).await.unwrap();

    // Terminal: document archived, live slot empty.
    assert!(h.engine.snapshot().await.is_none());
    assert_eq!(h.archived_files().len(), 1);
    assert!(!h.dir.path().join("state.json").exists());

    // Outgoing leg: one funded output to the CEX address, broadcast once.
    let outputs = h.bitcoin.funded_outputs().await;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].address, "bc1qcexdeposit");
    assert_eq!(outputs[0].sats, 100_000);
    assert_eq!(
        h.bitcoin.broadcasts().await,
        vec!["btc-raw-for-psbt-1".to_string()]
    );

    // Trade: full amount_out of the source token.
    let trades = h.exchange.trade_submissions().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].src, Token::Btc);
    assert_eq!(trades[0].dst, Token::Usdc);
    assert_eq!(trades[0].amount, 100_000);

    // One transfer, one withdrawal of amount_in minus fee to the contract.
    assert_eq!(h.exchange.transfer_submissions().await.len(), 1);
    let withdrawals = h.exchange.withdrawal_submissions().await;
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].token, Token::Usdc);
    assert_eq!(withdrawals[0].chain.as_deref(), Some("Solana"));
    assert_eq!(withdrawals[0].address, "sc-own-address");
    assert_eq!(withdrawals[0].fee, 1_000);
    assert_eq!(withdrawals[0].amount, Some(19_999_000));

    // Destination leg deposited into the contract. The detached send task
    // runs once the test yields.
    tokio::task::yield_now().await;
    assert!(h.contract.broadcasts().await.contains(&"raw-scd-1".to_string()));
}

#[tokio::test]
async fn usdc_to_btc_payout_finishes_without_contract_deposit() {
    let h = Harness::new();

    h.contract.set_tx_status("raw-scw-1", TxStatus::Success).await;
    h.exchange.set_deposit_address(Token::Usdc, "cex-sc-deposit").await;
    h.contract.set_tx_status("raw-sct-2", TxStatus::Success).await;
    script_cex_leg(&h, "sct-2", "t-in-btc", Token::Btc, 40_000).await;
    h.bitcoin.set_transaction("t-in-btc", 1).await;

    h.engine.trigger(usdc_to_btc_spec(5_000_000)).await.unwrap();

    assert!(h.engine.snapshot().await.is_none());
    assert_eq!(h.archived_files().len(), 1);

    // The payout went to the wallet's fresh receive address, and no
    // contract deposit leg was built for a bitcoin destination.
    let withdrawals = h.exchange.withdrawal_submissions().await;
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].address, "bc1qreceive");
    assert_eq!(withdrawals[0].chain.as_deref(), Some("Bitcoin"));
    assert_eq!(withdrawals[0].amount, Some(39_000));
    assert_eq!(
        h.contract.transfer_destinations().await,
        vec!["cex-sc-deposit".to_string()]
    );
}

#[tokio::test]
async fn monitor_seeds_job_when_sc_heavy() {
    let h = Harness::new();

    // 70/30 split in BTC units with a 1:1 oracle rate.
    h.contract.set_balance(Token::Usdc, 70_000_000).await;
    h.bitcoin.set_chain_balance(30_000_000).await;
    h.oracle.set_rate(1, 1).await;

    let monitor = BalanceMonitor::new(
        h.rails(),
        h.engine.clone(),
        TokenAddresses {
            wbtc: "wbtc-mint".to_string(),
            usdc: "usdc-mint".to_string(),
            usdt: "usdt-mint".to_string(),
            eth: "0x0".to_string(),
            sol: "0x0".to_string(),
        },
        &RebalanceSettings {
            threshold_ppm: 100_000,
            amount_ppm: 500_000,
            state_dir: h.dir.path().to_string_lossy().to_string(),
            state_file: "state".to_string(),
        },
    );

    monitor.check_balance().await.unwrap();

    // sum 1e8, diff 400_000 PPM, notional 20e6 sats, 1:1 into USDC units.
    let job = h.engine.snapshot().await.unwrap();
    match &job.phase {
        RebalancePhase::ScWithdrawing { spec, .. } => {
            assert_eq!(spec.src_token, Token::Usdc);
            assert_eq!(spec.dst_token, Token::Btc);
            assert_eq!(spec.amount_out, 20_000_000);
        }
        other => panic!("expected SC_WITHDRAWING, got {}", other.name()),
    }

    // While the job is in flight the monitor is a no-op.
    monitor.check_balance().await.unwrap();
    assert_eq!(h.engine.snapshot().await.unwrap().phase, job.phase);
}
