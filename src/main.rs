//! deltapager CLI - replay recorded listings through the enumeration engine
//!
//! Prints the Added/Removed set and the next delta token as JSON.

use clap::Parser;
use deltapager::config::{CliArgs, EnumerationConfig};
use deltapager::error::{PagerError, Result};
use deltapager::pagers::{filter_include_all, get_added_and_removed_item_ids, ItemFilter};
use deltapager::replay::{Fixture, ReplayItem};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = EnumerationConfig::from_cli(&args)?;
    let fixture = Fixture::from_file(&args.fixture)?;

    if args.verbose > 0 {
        print_config(&config, &args);
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| PagerError::config(format!("Failed to create runtime: {}", e)))?;

    let aar = rt.block_on(async {
        let ctx = CancellationToken::new();

        let interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling enumeration");
                interrupt.cancel();
            }
        });

        let filters: Vec<ItemFilter<ReplayItem>> = vec![Box::new(filter_include_all::<ReplayItem>)];

        get_added_and_removed_item_ids(
            &ctx,
            config.to_limiter(),
            fixture.pager(),
            fixture.delta_pager(),
            &config.options(&args.prev_delta),
            config.strategy.classify_fn(),
            &filters,
        )
        .await
    })?;

    let output = serde_json::to_string_pretty(&aar)?;
    println!("{}", output);

    Ok(())
}

fn print_config(config: &EnumerationConfig, args: &CliArgs) {
    eprintln!("=== Configuration ===");
    eprintln!("Fixture:     {:?}", args.fixture);
    eprintln!("Prev delta:  {:?}", args.prev_delta);
    eprintln!("Delta:       {}", config.can_make_delta_queries);
    eprintln!("Strategy:    {}", config.strategy.name());
    eprintln!(
        "Item limit:  {}",
        if config.item_limit == 0 {
            "unlimited".to_string()
        } else {
            config.item_limit.to_string()
        }
    );
    eprintln!(
        "Rate:        {}",
        if config.requests_per_second == 0 {
            "unlimited".to_string()
        } else {
            format!("{}/s, burst {}", config.requests_per_second, config.burst)
        }
    );
    eprintln!();
}
