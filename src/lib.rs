pub mod billing;
pub mod commands;
pub mod config;
pub mod notifications;
pub mod storage;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use billing::{AccountTier, BillingState, SystemClock};
use commands::{Command, Reply};
use config::EngineConfig;
use notifications::ExpiryPrompt;
use storage::KeyValueStore;

/// Queues the renewal prompt as an event line.
///
/// The serve loop is the only writer to stdout; it drains these between replies so
/// events never split a reply line.
struct ConsoleExpiryPrompt {
    events: mpsc::UnboundedSender<String>,
}

impl ExpiryPrompt for ConsoleExpiryPrompt {
    fn show_expired(&self, lapsed_tier: AccountTier) {
        let event = serde_json::json!({
            "event": "packageExpired",
            "tier": lapsed_tier,
            "message": format!(
                "Your {} package has expired. Renew to keep using the advanced features.",
                lapsed_tier.label()
            ),
        });
        if self.events.send(event.to_string()).is_err() {
            debug!("Event channel closed, dropping expiry prompt");
        }
    }
}

fn build_state(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    events: &mpsc::UnboundedSender<String>,
) -> BillingState {
    let state = BillingState::new(
        store,
        Arc::new(SystemClock),
        Arc::new(ConsoleExpiryPrompt {
            events: events.clone(),
        }),
        &config.upgrade_url,
        config.watchdog_interval,
    );
    state.start_watchdog();
    state
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<(), String> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    out.write_all(buf.as_bytes())
        .await
        .map_err(|e| format!("Failed to write reply: {}", e))?;
    out.flush()
        .await
        .map_err(|e| format!("Failed to write reply: {}", e))
}

async fn serve(config: EngineConfig) -> Result<(), String> {
    let store = config
        .open_store()
        .map_err(|e| format!("Failed to open storage: {}", e))?;
    info!(dir = %config.data_dir.display(), backend = ?config.storage, "Storage opened");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
    let mut billing = build_state(store, &config, &events_tx);
    info!(state = ?billing.subscription_manager.state(), "Entitlement engine ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let out = tokio::select! {
            Some(event) = events_rx.recv() => event,
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| format!("Failed to read input: {}", e))? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        let result = commands::dispatch(&billing, &command);
                        if command == Command::Reset && result.is_ok() {
                            // Same as a reload: the old session is gone, start from the empty store
                            let store = billing.store.clone();
                            drop(billing);
                            billing = build_state(store, &config, &events_tx);
                        }
                        Reply::from_result(result)
                    }
                    Err(e) => Reply::from_result(Err(e)),
                };
                reply.to_line()
            }
        };

        write_line(&mut stdout, &out).await?;
    }

    billing.stop_watchdog();
    info!("Entitlement engine stopped");
    Ok(())
}

pub fn run() {
    // Load .env file: current dir first, then the parent
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    // Default: warn for dependencies, info for the engine
    // Use RUST_LOG=debug for per-action metering logs
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tutor_entitlements_lib=info")),
        )
        .init();

    let config = EngineConfig::from_env();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return;
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        error!("{}", e);
    }
}
