//! Escrow Sweeper
//!
//! Background worker that closes campaigns whose end date has passed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::engine::{EscrowEngine, SweepReport};
use crate::config::EscrowConfig;
use crate::error::LedgerError;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pause between sweeps
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

impl From<&EscrowConfig> for SweeperConfig {
    fn from(config: &EscrowConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }
}

/// Periodically closes due campaigns: payout when the goal is reached,
/// refund otherwise. A close interrupted by a crash is finished by the next
/// sweep.
pub struct EscrowSweeper {
    engine: Arc<EscrowEngine>,
    config: SweeperConfig,
}

impl EscrowSweeper {
    pub fn new(engine: Arc<EscrowEngine>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    pub fn with_defaults(engine: Arc<EscrowEngine>) -> Self {
        Self::new(engine, SweeperConfig::default())
    }

    /// Sweep forever
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting escrow sweeper"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Escrow sweep failed");
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Run a single sweep at the current time
    pub async fn sweep_once(&self) -> Result<SweepReport, LedgerError> {
        let report = self.engine.close_due(Utc::now()).await?;

        if report == SweepReport::default() {
            debug!("No due companies");
        } else {
            info!(
                closed = report.closed,
                failed = report.failed,
                refunded = report.refunded,
                "Escrow sweep finished"
            );
        }
        Ok(report)
    }
}
