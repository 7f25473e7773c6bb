// # portshimd - Port-Binding Shim Daemon
//
// Thin integration layer only: reads configuration from environment
// variables, initializes tracing and the runtime, registers the built-in
// backend drivers, and runs the watch loop until a shutdown signal. All
// coordination logic lives in portshim-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// - `PORTSHIM_NAME`: identity of this shim process (required); becomes the
//   `controller` field of every binding-result key it claims
// - `PORTSHIM_HOST_LIST`: comma-separated hosts this shim may bind
//   (default `*` = all hosts)
// - `PORTSHIM_HANDLERS`: comma-separated `service:backend` pairs
//   (default `net-l3vpn:dummy`)
// - `PORTSHIM_CONTROLLER_URL`: controller base URL for `http` backends
// - `PORTSHIM_SOURCE_TAG`: canonical snapshot namespace tag
//   (default `proton`)
// - `PORTSHIM_STORE_TYPE`: coordination store selection; this binary ships
//   `memory` only, networked stores are wired up through the library API
// - `PORTSHIM_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export PORTSHIM_NAME=shim-compute-1
// export PORTSHIM_HOST_LIST=compute-1,compute-2
// export PORTSHIM_HANDLERS=net-l3vpn:dummy
//
// portshimd
// ```

use anyhow::Result;
use portshim_core::config::{BackendConfig, BindSettings, ShimConfig, StoreConfig, WatchSettings};
use portshim_core::{BackendRegistry, MemoryCoordinationStore, ShimContext, WatchLoop};
use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: clean shutdown
/// - 1: configuration or startup error
/// - 2: runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ShimExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ShimExitCode> for ExitCode {
    fn from(code: ShimExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    shim: ShimConfig,
    store_type: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let shim_name = env::var("PORTSHIM_NAME")
            .map_err(|_| anyhow::anyhow!("PORTSHIM_NAME is required"))?;

        let host_list: Vec<String> = env::var("PORTSHIM_HOST_LIST")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let controller_url = env::var("PORTSHIM_CONTROLLER_URL").ok();
        let handlers = parse_handlers(
            &env::var("PORTSHIM_HANDLERS").unwrap_or_else(|_| "net-l3vpn:dummy".to_string()),
            controller_url.as_deref(),
        )?;

        let shim = ShimConfig {
            shim_name,
            host_list,
            handlers,
            store: StoreConfig::default(),
            source_tag: env::var("PORTSHIM_SOURCE_TAG")
                .unwrap_or_else(|_| portshim_core::config::DEFAULT_SOURCE_TAG.to_string()),
            watch: WatchSettings::default(),
            bind: BindSettings::default(),
        };

        Ok(Self {
            shim,
            store_type: env::var("PORTSHIM_STORE_TYPE").unwrap_or_else(|_| "memory".to_string()),
            log_level: env::var("PORTSHIM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.shim.validate()?;

        match self.store_type.as_str() {
            "memory" => {}
            other => anyhow::bail!(
                "PORTSHIM_STORE_TYPE '{other}' is not supported by this binary. \
                Supported types: memory. Networked stores are wired up through \
                the portshim-core library API."
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "PORTSHIM_LOG_LEVEL '{other}' is not valid. \
                Valid levels: trace, debug, info, warn, error"
            ),
        }

        Ok(())
    }
}

/// Parse the `service:backend` pair list from `PORTSHIM_HANDLERS`
fn parse_handlers(
    raw: &str,
    controller_url: Option<&str>,
) -> Result<HashMap<String, BackendConfig>> {
    let mut handlers = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (service, backend) = pair
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("PORTSHIM_HANDLERS entry '{pair}' is not service:backend"))?;
        let config = match backend.trim() {
            "dummy" => BackendConfig::Dummy,
            "http" => BackendConfig::Http {
                controller_url: controller_url
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "PORTSHIM_CONTROLLER_URL is required for the http backend"
                        )
                    })?
                    .to_string(),
                timeout_secs: None,
            },
            other => BackendConfig::Custom {
                factory: other.to_string(),
                config: serde_json::Value::Null,
            },
        };
        handlers.insert(service.trim().to_string(), config);
    }
    Ok(handlers)
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ShimExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {e}");
        return ShimExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ShimExitCode::ConfigError.into();
    }

    info!("starting portshimd in PID {}", std::process::id());
    info!("identity: {}", config.shim.shim_name);
    info!("host list: {:?}", config.shim.host_list);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {e}");
            return ShimExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => ShimExitCode::CleanShutdown,
            Err(e) => {
                error!("daemon error: {e}");
                ShimExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let registry = BackendRegistry::new();

    #[cfg(feature = "dummy")]
    {
        info!("registering dummy backend");
        portshim_backend_dummy::register(&registry);
    }

    #[cfg(feature = "http")]
    {
        info!("registering http backend");
        portshim_backend_http::register(&registry);
    }

    let store = Arc::new(MemoryCoordinationStore::new());
    let ctx = Arc::new(ShimContext::new(&config.shim, store));

    let handlers = registry.build_handlers(&config.shim.handlers);
    if handlers.is_empty() {
        anyhow::bail!("no service handler could be loaded");
    }

    let watch_loop = WatchLoop::new(ctx, handlers, config.shim.watch.clone());
    info!("entering watch loop");
    watch_loop.run().await?;
    info!("shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_parse_into_backend_configs() {
        let handlers =
            parse_handlers("net-l3vpn:dummy, net-other:custom-x", None).unwrap();
        assert!(matches!(handlers["net-l3vpn"], BackendConfig::Dummy));
        assert!(matches!(
            handlers["net-other"],
            BackendConfig::Custom { ref factory, .. } if factory == "custom-x"
        ));
    }

    #[test]
    fn http_backend_requires_a_controller_url() {
        assert!(parse_handlers("net-l3vpn:http", None).is_err());
        let handlers =
            parse_handlers("net-l3vpn:http", Some("http://ctrl:8080")).unwrap();
        assert!(matches!(handlers["net-l3vpn"], BackendConfig::Http { .. }));
    }

    #[test]
    fn malformed_handler_entries_are_rejected() {
        assert!(parse_handlers("net-l3vpn", None).is_err());
    }
}
