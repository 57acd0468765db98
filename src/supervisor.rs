//! Process bootstrap and run loop.
//!
//! Wires the adapters into the engine, restores persisted state, installs
//! the tx-replacement hook, and drives the two periodic tasks: the engine
//! tick and the balance monitor.

use crate::config::Config;
use crate::engine::{ChainEvent, EngineSettings, Rails, RebalanceEngine};
use crate::monitor::BalanceMonitor;
use crate::persistence::StateStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

pub struct Supervisor {
    engine: Arc<RebalanceEngine>,
    monitor: BalanceMonitor,
    check_interval: Duration,
    monitor_interval: Duration,
}

impl Supervisor {
    /// Build the engine and monitor around the given rails, restoring any
    /// persisted job, and register the replacement hook with the contract
    /// wallet.
    pub async fn new(config: &Config, rails: Rails) -> Result<Self> {
        let store = StateStore::new(&config.rebalance.state_dir, &config.rebalance.state_file);
        let settings =
            EngineSettings::new(&config.timing, config.exchange.smart_chain_name.clone());
        let engine = Arc::new(RebalanceEngine::new(rails.clone(), store, settings)?);

        let events = engine.event_sender();
        rails
            .contract
            .on_before_tx_replace(Box::new(
                move |_old_raw, old_tx_id, new_raw, new_tx_id| {
                    let _ = events.send(ChainEvent::Replacement {
                        old_tx_id: old_tx_id.to_string(),
                        new_tx_id: new_tx_id.to_string(),
                        new_raw: new_raw.to_string(),
                    });
                },
            ))
            .await;

        let monitor = BalanceMonitor::new(
            rails,
            engine.clone(),
            config.tokens.clone(),
            &config.rebalance,
        );

        Ok(Self {
            engine,
            monitor,
            check_interval: Duration::from_secs(config.timing.check_interval_secs),
            monitor_interval: Duration::from_secs(config.timing.monitor_interval_secs),
        })
    }

    pub fn engine(&self) -> Arc<RebalanceEngine> {
        self.engine.clone()
    }

    /// Run until ctrl-c. The state document is left as-is on shutdown; a
    /// restart resumes from the last persisted phase.
    pub async fn run(&self) -> Result<()> {
        let mut check_timer = interval(self.check_interval);
        let mut monitor_timer = interval(self.monitor_interval);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        monitor_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Supervisor started");

        loop {
            tokio::select! {
                _ = check_timer.tick() => {
                    self.engine.check().await;
                }
                _ = monitor_timer.tick() => {
                    if let Err(e) = self.monitor.check_balance().await {
                        warn!(error = %e, "Balance check failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, exiting...");
                    break;
                }
            }
        }

        Ok(())
    }
}
