use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::db::Repository;
use crate::error::Result;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub by_age: usize,
    pub by_count: usize,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.by_age + self.by_count
    }
}

/// Prunes stored items across all feeds in one statement per rule.
pub struct RetentionManager {
    repo: Arc<Repository>,
}

impl RetentionManager {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Deletes items published strictly before `now - days`. Zero days
    /// disables the rule, and so does a cutoff before the earliest
    /// representable date.
    pub async fn prune_by_age(&self, now: DateTime<Utc>, days: u32) -> Result<usize> {
        if days == 0 {
            return Ok(0);
        }
        let Some(cutoff) = TimeDelta::try_days(i64::from(days))
            .and_then(|age| now.checked_sub_signed(age))
        else {
            tracing::warn!(
                "Retention of {} days reaches past the calendar, nothing pruned",
                days
            );
            return Ok(0);
        };
        self.repo.delete_items_older_than(cutoff).await
    }

    /// Keeps the `keep` most recently published items of every feed. Zero
    /// disables the rule.
    pub async fn prune_by_count(&self, keep: u32) -> Result<usize> {
        if keep == 0 {
            return Ok(0);
        }
        self.repo.delete_items_beyond_count_per_source(keep).await
    }

    pub async fn run(&self, settings: &Settings, now: DateTime<Utc>) -> Result<RetentionReport> {
        let by_age = self.prune_by_age(now, settings.retention_days).await?;
        let by_count = self.prune_by_count(settings.retention_count).await?;

        let report = RetentionReport { by_age, by_count };
        tracing::info!(
            "Retention removed {} items ({} older than {} days, {} beyond {} per feed)",
            report.total(),
            by_age,
            settings.retention_days,
            by_count,
            settings.retention_count
        );
        Ok(report)
    }
}
