use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use aleph_runtime::{Config, Error, ErrorCode, Runtime};

const SYMBOLS: [&str; 6] = ["AAPL", "MSFT", "NVDA", "SPY", "QQQ", "TSLA"];

fn main() -> anyhow::Result<()> {
    // Optional first argument: path to a config file
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::load_default(),
    };

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("🦀 Aleph runtime starting...");

    // 2. Shared services
    let runtime = Runtime::from_config(&config)?;
    let cache = Arc::clone(runtime.cache());

    // 3. Warm the bar cache in parallel, twice; the second pass is all hits
    for pass in 1..=2 {
        let tasks: Vec<_> = SYMBOLS
            .iter()
            .map(|symbol| {
                let cache = Arc::clone(&cache);
                let symbol = symbol.to_string();
                move || {
                    cache.get_cached("bars", symbol.clone(), || -> aleph_runtime::Result<f64> {
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(synthetic_close(&symbol))
                    })
                }
            })
            .collect();

        let closes = runtime
            .executor()
            .execute_all(tasks, Duration::from_secs(5))?;
        tracing::info!("📈 Pass {}: {} closes loaded", pass, closes.len());
    }

    // 4. A flaky feed recovers inside the retry budget
    let attempts = AtomicU32::new(0);
    let quote = runtime.retrier().execute_with_retry(
        |ctx| {
            attempts.fetch_add(1, Ordering::Relaxed);
            if ctx.attempt < 2 {
                Err(Error::Connectivity("quote feed reset".into()))
            } else {
                Ok(synthetic_close("SPY"))
            }
        },
        3,
        Duration::from_millis(50),
        "fetch_quote",
    )?;
    tracing::info!(
        "💹 SPY quote {:.2} after {} attempts",
        quote,
        attempts.load(Ordering::Relaxed)
    );

    // 5. Best-effort lookup with a fallback
    let spread = runtime.retrier().execute_safely(
        || Err(Error::operation(ErrorCode::DataNotFound, "no book for XYZ")),
        0.0,
        "spread",
        Some("XYZ"),
    );
    tracing::info!("📉 XYZ spread fallback {:.2}", spread);

    // 6. Report and stop
    for stats in cache.stats() {
        println!("{}", serde_json::to_string(&stats)?);
    }

    let drained = runtime.shutdown();
    tracing::info!("👋 Shutdown complete (drained: {})", drained);
    Ok(())
}

fn synthetic_close(symbol: &str) -> f64 {
    let seed: u32 = symbol.bytes().map(u32::from).sum();
    100.0 + f64::from(seed % 400) + f64::from(seed % 7) / 8.0
}
