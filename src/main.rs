//! spledger - ledger daemon
//!
//! Wires the ledger services together and runs the escrow sweeper:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  Config  │───▶│  Store   │───▶│   Services   │───▶│ Sweeper  │
//! │  (YAML)  │    │(PG / mem)│    │(xfer/pay/esc)│    │ (hourly) │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! HTTP handlers live outside this crate and call into the services.

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tracing::{error, info, warn};

use spledger::account::AccountService;
use spledger::config::AppConfig;
use spledger::core_types::Scope;
use spledger::db::Database;
use spledger::escrow::{EscrowEngine, EscrowSweeper, SweeperConfig};
use spledger::gateway::{PaymentGateway, SpWorldsClient};
use spledger::guard::AbuseGuard;
use spledger::payment::PaymentService;
use spledger::store::{AccountStore, CrowdfundStore, GuardStore, MemoryStore, PaymentStore, PgStore};
use spledger::transfer::TransferService;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Everything a request handler needs
struct Services {
    #[allow(dead_code)]
    accounts: AccountService,
    transfers: Arc<TransferService>,
    #[allow(dead_code)]
    payments: PaymentService,
    escrow: Arc<EscrowEngine>,
}

fn build_services<S>(
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    config: &AppConfig,
) -> anyhow::Result<Services>
where
    S: AccountStore + PaymentStore + CrowdfundStore + GuardStore + 'static,
{
    let guard = Arc::new(AbuseGuard::new(store.clone()));
    let transfers = Arc::new(TransferService::new(
        store.clone(),
        guard.clone(),
        gateway.clone(),
    ));
    let payments = PaymentService::new(
        store.clone(),
        store.clone(),
        guard.clone(),
        gateway,
        &config.app_url,
        config.payments.clone(),
    )?;
    let escrow = Arc::new(EscrowEngine::new(
        store.clone(),
        store.clone(),
        guard,
        transfers.clone(),
    ));
    Ok(Services {
        accounts: AccountService::new(store),
        transfers,
        payments,
        escrow,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).with_context(|| format!("loading config {}", env))?;
    let _log_guard = spledger::logging::init_logging(&app_config);

    info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "Starting spledger"
    );

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        SpWorldsClient::new(&app_config.gateway).context("building gateway client")?,
    );

    let services = match &app_config.postgres {
        Some(pg) => {
            let db = Database::connect_with(pg)
                .await
                .context("connecting to PostgreSQL")?;
            db.health_check().await.context("PostgreSQL health check")?;
            db.migrate().await.context("applying schema")?;
            info!(max_connections = pg.max_connections, "PostgreSQL ledger store ready");
            build_services(Arc::new(PgStore::new(db.pool().clone())), gateway, &app_config)?
        }
        None => {
            warn!("No postgres section configured; balances live in memory only");
            build_services(Arc::new(MemoryStore::new()), gateway, &app_config)?
        }
    };

    let configured: Vec<Scope> = Scope::ALL
        .into_iter()
        .filter(|scope| {
            let has = app_config.gateway.credentials(*scope).is_some();
            if !has {
                warn!(scope = %scope, "No merchant credentials; gateway calls will fail");
            }
            has
        })
        .collect();
    let reports = join_all(
        configured
            .iter()
            .map(|scope| services.transfers.treasury_report(*scope)),
    )
    .await;
    for (scope, report) in configured.iter().zip(reports) {
        match report {
            Ok(report) => info!(
                scope = %scope,
                ledger_total = %report.ledger_total,
                provider_balance = ?report.provider_balance,
                "Treasury"
            ),
            Err(e) => error!(scope = %scope, error = %e, "Treasury report failed"),
        }
    }

    let sweeper = EscrowSweeper::new(
        services.escrow.clone(),
        SweeperConfig::from(&app_config.escrow),
    );
    let sweeper_task = tokio::spawn(async move {
        sweeper.run().await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    sweeper_task.abort();

    Ok(())
}
