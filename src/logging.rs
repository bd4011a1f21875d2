use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target used by per-request money-movement spans; muted unless `enable_tracing`
pub const LEDGER_TRACE_TARGET: &str = "SPLEDGER";

/// Per-statement sqlx logs and HTTP client internals drown the ledger events
const QUIET_DEPENDENCIES: &str = "sqlx::query=warn,hyper_util=warn,reqwest=warn";

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

fn filter_directives(config: &AppConfig) -> String {
    if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!(
            "{},{},{}=off",
            config.log_level, QUIET_DEPENDENCIES, LEDGER_TRACE_TARGET
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_target_muted_by_default() {
        let cfg = AppConfig::default();
        assert_eq!(
            filter_directives(&cfg),
            "info,sqlx::query=warn,hyper_util=warn,reqwest=warn,SPLEDGER=off"
        );
        assert!(filter_directives(&cfg).parse::<EnvFilter>().is_ok());

        let cfg = AppConfig {
            enable_tracing: true,
            log_level: "debug".into(),
            ..AppConfig::default()
        };
        assert_eq!(filter_directives(&cfg), "debug");
    }
}
