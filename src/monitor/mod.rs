//! Inventory balance monitor.
//!
//! Periodically measures the BTC-side vs smart-chain-side inventory split
//! in common BTC units and seeds a rebalance job when the split drifts
//! past the configured threshold. A no-op while a job is in flight.

use crate::adapters::Rounding;
use crate::config::{RebalanceSettings, TokenAddresses};
use crate::engine::job::JobSpec;
use crate::engine::{Rails, RebalanceEngine};
use crate::token::{Amount, Token};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PPM: u128 = 1_000_000;

/// Which inventory side is heavy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeavySide {
    Btc,
    SmartChain,
}

/// A measured imbalance worth correcting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imbalance {
    pub side: HeavySide,
    /// BTC-equivalent notional to move this cycle, in satoshis.
    pub notional_btc: Amount,
    /// Signed split difference in PPM (smart-chain share minus BTC share).
    pub diff_ppm: i64,
}

/// Compute the split and the corrective notional.
///
/// Shares are in parts-per-million of the combined BTC-denominated
/// inventory; the notional is `sum * |diff| * amount_ppm / 10^12`.
pub fn measure_imbalance(
    btc_value_sc: Amount,
    balance_btc: Amount,
    threshold_ppm: u64,
    amount_ppm: u64,
) -> Option<Imbalance> {
    let sum = btc_value_sc + balance_btc;
    if sum == 0 {
        return None;
    }

    let ppm_sc = (btc_value_sc * PPM / sum) as i128;
    let ppm_btc = (balance_btc * PPM / sum) as i128;
    let diff = ppm_sc - ppm_btc;

    if diff.unsigned_abs() <= threshold_ppm as u128 {
        return None;
    }

    let notional_btc = sum * diff.unsigned_abs() * amount_ppm as u128 / (PPM * PPM);
    let side = if diff < 0 {
        HeavySide::Btc
    } else {
        HeavySide::SmartChain
    };

    Some(Imbalance {
        side,
        notional_btc,
        diff_ppm: diff as i64,
    })
}

/// Periodic inventory check that seeds the engine.
pub struct BalanceMonitor {
    rails: Rails,
    engine: Arc<RebalanceEngine>,
    tokens: TokenAddresses,
    threshold_ppm: u64,
    amount_ppm: u64,
}

impl BalanceMonitor {
    pub fn new(
        rails: Rails,
        engine: Arc<RebalanceEngine>,
        tokens: TokenAddresses,
        settings: &RebalanceSettings,
    ) -> Self {
        Self {
            rails,
            engine,
            tokens,
            threshold_ppm: settings.threshold_ppm,
            amount_ppm: settings.amount_ppm,
        }
    }

    /// One monitor pass: measure the split and, when the engine is idle
    /// and the drift exceeds the threshold, seed a job.
    pub async fn check_balance(&self) -> Result<()> {
        if !self.engine.is_idle().await {
            debug!("Rebalance in flight, skipping balance check");
            return Ok(());
        }

        let token = Token::Usdc;
        let usable_sc = self.rails.contract.get_balance(token, true).await?;
        let balance_btc = self.rails.bitcoin.get_chain_balance().await?;

        // Channel balance is observed but intentionally left out of the
        // split; Lightning liquidity is managed separately.
        let balance_ln = self.rails.lightning.get_channel_balance().await?;

        let locked = self.rails.oracle.locked_balance(token).await?;
        let returning = self.rails.oracle.returning_balance(token).await?;
        let balance_sc = usable_sc + locked + returning;

        let btc_value_sc = self.rails.oracle.to_btc(balance_sc, token).await?;

        debug!(
            usable_sc,
            locked,
            returning,
            btc_value_sc,
            balance_btc,
            balance_ln,
            "Inventory snapshot"
        );

        let Some(imbalance) = measure_imbalance(
            btc_value_sc,
            balance_btc,
            self.threshold_ppm,
            self.amount_ppm,
        ) else {
            return Ok(());
        };

        info!(
            diff_ppm = imbalance.diff_ppm,
            notional_btc = imbalance.notional_btc,
            side = ?imbalance.side,
            "Inventory split exceeds threshold"
        );

        let usdc_address = self
            .rails
            .contract
            .to_token_address(&self.tokens.usdc)?;

        let spec = match imbalance.side {
            HeavySide::Btc => JobSpec {
                src_token: Token::Btc,
                src_token_address: None,
                dst_token: token,
                dst_token_address: Some(usdc_address),
                amount_out: imbalance.notional_btc,
            },
            HeavySide::SmartChain => {
                let amount_out = self
                    .rails
                    .oracle
                    .from_btc(imbalance.notional_btc, token, Rounding::Down)
                    .await?;
                if amount_out > usable_sc {
                    warn!(
                        amount_out,
                        usable_sc,
                        "Corrective amount exceeds spendable contract balance, skipping cycle"
                    );
                    return Ok(());
                }
                JobSpec {
                    src_token: token,
                    src_token_address: Some(usdc_address),
                    dst_token: Token::Btc,
                    dst_token_address: None,
                    amount_out,
                }
            }
        };

        self.engine.trigger(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_inventory_is_quiet() {
        assert_eq!(measure_imbalance(50_000_000, 50_000_000, 100_000, 500_000), None);
        assert_eq!(measure_imbalance(0, 0, 100_000, 500_000), None);
    }

    #[test]
    fn test_drift_below_threshold_is_quiet() {
        // 52/48 split: diff 40_000 PPM, threshold 100_000.
        assert_eq!(measure_imbalance(52_000_000, 48_000_000, 100_000, 500_000), None);
    }

    #[test]
    fn test_btc_heavy_drift_triggers() {
        // 30/70 split: diff is -400_000 PPM.
        let imbalance = measure_imbalance(30_000_000, 70_000_000, 100_000, 500_000).unwrap();
        assert_eq!(imbalance.side, HeavySide::Btc);
        assert_eq!(imbalance.diff_ppm, -400_000);
        // sum(1e8) * 400_000 * 500_000 / 1e12 = 20_000_000 sats.
        assert_eq!(imbalance.notional_btc, 20_000_000);
    }

    #[test]
    fn test_sc_heavy_drift_triggers() {
        let imbalance = measure_imbalance(70_000_000, 30_000_000, 100_000, 500_000).unwrap();
        assert_eq!(imbalance.side, HeavySide::SmartChain);
        assert_eq!(imbalance.diff_ppm, 400_000);
        assert_eq!(imbalance.notional_btc, 20_000_000);
    }

    #[test]
    fn test_one_sided_inventory() {
        let imbalance = measure_imbalance(100_000_000, 0, 100_000, 1_000_000).unwrap();
        assert_eq!(imbalance.side, HeavySide::SmartChain);
        assert_eq!(imbalance.diff_ppm, 1_000_000);
        assert_eq!(imbalance.notional_btc, 100_000_000);
    }
}
