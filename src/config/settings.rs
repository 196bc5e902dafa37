//! Configuration settings for deltapager
//!
//! Defines the enumeration options, CLI arguments, and defaults for the
//! replay binary.

use crate::error::{PagerError, Result};
use crate::limiter::{CostTable, RequestBudget, RequestLimiter, Unlimited};
use crate::pagers::{
    added_and_removed_add_all, added_and_removed_by_additional_data,
    added_and_removed_by_deleted_date_time, AddedAndRemovedOptions, ClassifyFn, PagedItem,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// deltapager - replay a recorded container listing through the enumeration engine
#[derive(Parser, Debug, Clone)]
#[command(name = "deltapager")]
#[command(author = "deltapager Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compute the Added/Removed set of a recorded paged listing")]
#[command(long_about = r#"
deltapager runs the incremental enumeration engine against a JSON fixture of
recorded pages and prints the resulting Added/Removed set with the delta
token to resume from.

Examples:
  deltapager inbox.json                          # Delta run, no previous token
  deltapager inbox.json --prev-delta delta-1     # Resume from a token
  deltapager inbox.json --no-delta               # Full listing only
  deltapager inbox.json --strategy deleted-date-time --item-limit 500
"#)]
pub struct CliArgs {
    /// Fixture with the recorded pages
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,

    /// JSON file with enumeration settings
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Delta link returned by the previous run
    #[arg(short = 'p', long, default_value = "", value_name = "LINK")]
    pub prev_delta: String,

    /// Never make delta queries; always list everything
    #[arg(long)]
    pub no_delta: bool,

    /// Stop after this many added items (0 = unlimited)
    #[arg(short = 'l', long, value_name = "NUM")]
    pub item_limit: Option<usize>,

    /// How items are classified into Added and Removed
    #[arg(short = 's', long, value_enum, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Sustained request rate (0 = unlimited)
    #[arg(long, value_name = "NUM")]
    pub rps: Option<u32>,

    /// Request burst size
    #[arg(long, value_name = "NUM")]
    pub burst: Option<u32>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Classification strategy
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Everything is added; the source has no deletion signal
    AddAll,
    /// `@removed` marker in the additional data
    #[default]
    AdditionalData,
    /// Deleted timestamp on the item
    DeletedDateTime,
}

impl Strategy {
    /// The classification function for this strategy
    pub fn classify_fn<T: PagedItem>(self) -> ClassifyFn<T> {
        match self {
            Self::AddAll => added_and_removed_add_all,
            Self::AdditionalData => added_and_removed_by_additional_data,
            Self::DeletedDateTime => added_and_removed_by_deleted_date_time,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddAll => "add all",
            Self::AdditionalData => "additional data",
            Self::DeletedDateTime => "deleted date time",
        }
    }
}

/// Enumeration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
    /// Stop after this many added items (0 = unlimited)
    pub item_limit: usize,
    /// Whether delta queries may be made
    pub can_make_delta_queries: bool,
    /// Sustained request rate (0 = unlimited)
    pub requests_per_second: u32,
    /// Request burst size
    pub burst: u32,
    /// Token cost per request class
    pub costs: CostTable,
    /// Classification strategy
    pub strategy: Strategy,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            item_limit: 0,
            can_make_delta_queries: true,
            requests_per_second: 16,
            burst: 200,
            costs: CostTable::default(),
            strategy: Strategy::default(),
        }
    }
}

impl EnumerationConfig {
    /// Load settings from a JSON file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PagerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| PagerError::config(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Create config from CLI arguments, layered over the config file if any
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if args.no_delta {
            config.can_make_delta_queries = false;
        }
        if let Some(limit) = args.item_limit {
            config.item_limit = limit;
        }
        if let Some(strategy) = args.strategy {
            config.strategy = strategy;
        }
        if let Some(rps) = args.rps {
            config.requests_per_second = rps;
        }
        if let Some(burst) = args.burst {
            config.burst = burst;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_second > 0 && self.burst == 0 {
            return Err(PagerError::config("burst must be at least 1 when rate limiting"));
        }

        let largest = self
            .costs
            .default
            .max(self.costs.single_get_or_delta)
            .max(self.costs.delta_no_token);
        if self.requests_per_second > 0 && largest > self.burst {
            tracing::warn!(
                largest_cost = largest,
                burst = self.burst,
                "request cost exceeds burst size; such requests wait for refills"
            );
        }

        Ok(())
    }

    /// Build the request limiter these settings describe
    pub fn to_limiter(&self) -> Arc<dyn RequestLimiter> {
        if self.requests_per_second == 0 {
            return Arc::new(Unlimited);
        }

        Arc::new(RequestBudget::new(self.requests_per_second, self.burst).with_costs(self.costs))
    }

    /// Orchestrator options for a run resuming from `prev_delta_link`
    pub fn options(&self, prev_delta_link: &str) -> AddedAndRemovedOptions {
        AddedAndRemovedOptions {
            prev_delta_link: prev_delta_link.to_string(),
            can_make_delta_queries: self.can_make_delta_queries,
            item_limit: self.item_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::CostClass;
    use crate::replay::ReplayItem;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["deltapager", "fixture.json"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = EnumerationConfig::from_cli(&args(&[])).unwrap();
        assert_eq!(config, EnumerationConfig::default());
        assert!(config.can_make_delta_queries);
        assert_eq!(config.options("").item_limit, 0);
    }

    #[test]
    fn test_cli_overrides() {
        let config = EnumerationConfig::from_cli(&args(&[
            "--no-delta",
            "--item-limit",
            "25",
            "--strategy",
            "deleted-date-time",
            "--rps",
            "0",
        ]))
        .unwrap();

        assert!(!config.can_make_delta_queries);
        assert_eq!(config.item_limit, 25);
        assert_eq!(config.strategy, Strategy::DeletedDateTime);

        let options = config.options("delta-1");
        assert_eq!(options.prev_delta_link, "delta-1");
        assert!(!options.can_make_delta_queries);
    }

    #[test]
    fn test_config_file_with_cli_on_top() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"item_limit": 10, "strategy": "add_all", "costs": {{"delta_no_token": 8}}}}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = EnumerationConfig::from_cli(&args(&["--config", &path, "--item-limit", "3"])).unwrap();

        assert_eq!(config.item_limit, 3);
        assert_eq!(config.strategy, Strategy::AddAll);
        assert_eq!(config.costs.tokens(CostClass::DeltaNoToken), 8);
        assert_eq!(config.costs.tokens(CostClass::Default), 1);
        assert_eq!(config.requests_per_second, 16);
    }

    #[test]
    fn test_bad_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = EnumerationConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PagerError::ConfigError(_)));

        let err = EnumerationConfig::from_file(Path::new("/nonexistent/deltapager.json")).unwrap_err();
        assert!(matches!(err, PagerError::Io { .. }));
    }

    #[test]
    fn test_zero_burst_rejected() {
        let err = EnumerationConfig::from_cli(&args(&["--burst", "0"])).unwrap_err();
        assert!(err.to_string().contains("burst"));
    }

    #[test]
    fn test_strategy_classify_fn() {
        let items = vec![ReplayItem::new("a")];
        for strategy in [Strategy::AddAll, Strategy::AdditionalData, Strategy::DeletedDateTime] {
            let classify = strategy.classify_fn::<ReplayItem>();
            let changes = classify(&items, &[]).unwrap();
            assert!(changes.added().contains_key("a"), "{}", strategy.name());
        }
    }

    #[tokio::test]
    async fn test_unlimited_when_rate_is_zero() {
        let config = EnumerationConfig {
            requests_per_second: 0,
            ..Default::default()
        };
        let limiter = config.to_limiter();

        let ctx = CancellationToken::new();
        for _ in 0..1000 {
            limiter.consume(&ctx, CostClass::DeltaNoToken).await.unwrap();
        }
    }
}
