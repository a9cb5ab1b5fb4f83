//! Sweep command - removes one batch of expired keys

use chrono::{Duration, Utc};
use clap::Args;
use tracing::info;

use crate::domain::DomainError;
use crate::infrastructure::factory;
use crate::infrastructure::key::{SweepOptions, DEFAULT_SWEEP_BATCH};

/// Arguments for the sweep command
#[derive(Args, Clone, Debug)]
pub struct SweepArgs {
    /// Records handled in this run (1-1000)
    #[arg(long, default_value_t = DEFAULT_SWEEP_BATCH)]
    pub batch_size: usize,

    /// Only remove keys that expired at least this many seconds ago
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    pub older_than_secs: Option<i64>,
}

impl SweepArgs {
    fn options(&self) -> Result<SweepOptions, DomainError> {
        let options = SweepOptions::default().with_batch_size(self.batch_size);

        let Some(secs) = self.older_than_secs else {
            return Ok(options);
        };

        let cutoff = Duration::try_seconds(secs)
            .filter(|age| *age >= Duration::zero())
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                DomainError::validation(format!("--older-than-secs {} is out of range", secs))
            })?;

        Ok(options.with_older_than(cutoff))
    }
}

/// Run the sweep command
pub async fn run(args: SweepArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let options = args.options()?;
    let service = factory::key_store_service_builder(&config)
        .await?
        .build()
        .await?;
    let result = service.sweep_expired(options).await?;

    info!(
        processed = result.processed,
        removed = result.removed,
        failed = result.failed,
        "Sweep finished"
    );

    println!(
        "processed={} removed={} failed={} more_remaining={}",
        result.processed, result.removed, result.failed, result.remaining_hint
    );

    Ok(())
}
