use crate::data_structures::{Entitlement, Feature, UserId};
use crate::entitlements::EntitlementStore;
use crate::error::FileBotError;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};

/// Counters for one reporting period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageStats {
    new_users: BTreeSet<UserId>,
    files_processed: u64,
    feature_counts: BTreeMap<Feature, u64>,
}

impl UsageStats {
    pub fn new_users(&self) -> &BTreeSet<UserId> {
        &self.new_users
    }

    pub fn new_user_count(&self) -> usize {
        self.new_users.len()
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed
    }

    pub fn feature_count(&self, feature: Feature) -> u64 {
        self.feature_counts.get(&feature).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.new_users.is_empty() && self.files_processed == 0 && self.feature_counts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    generated_at: DateTime<Utc>,
    total_subscribers: usize,
    new_users: usize,
    files_processed: u64,
    feature_counts: Vec<(Feature, u64)>,
    expiring: Vec<Entitlement>,
}

impl UsageReport {
    pub fn compose(
        stats: &UsageStats,
        store: &EntitlementStore,
        now: DateTime<Utc>,
        warning_window: Duration,
    ) -> Self {
        Self {
            generated_at: now,
            total_subscribers: store.active_count(now),
            new_users: stats.new_user_count(),
            files_processed: stats.files_processed(),
            feature_counts: Feature::ALL
                .iter()
                .map(|feature| (*feature, stats.feature_count(*feature)))
                .collect(),
            expiring: store.expiring_within(now, warning_window),
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn total_subscribers(&self) -> usize {
        self.total_subscribers
    }

    pub fn new_users(&self) -> usize {
        self.new_users
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed
    }

    pub fn feature_counts(&self) -> &[(Feature, u64)] {
        &self.feature_counts
    }

    pub fn feature_count(&self, feature: Feature) -> u64 {
        self.feature_counts
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn expiring(&self) -> &[Entitlement] {
        &self.expiring
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Daily Summary ({})", self.generated_at.format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(f, "- Subscribers: {}", self.total_subscribers)?;
        writeln!(f, "- New users: {}", self.new_users)?;
        writeln!(f, "- Files processed: {}", self.files_processed)?;
        writeln!(f, "- Features:")?;
        for (feature, count) in &self.feature_counts {
            writeln!(f, "  - {}: {}", feature, count)?;
        }
        if self.expiring.is_empty() {
            write!(f, "- Expiring soon: none")
        } else {
            write!(f, "- Expiring soon:")?;
            for entitlement in &self.expiring {
                write!(
                    f,
                    "\n  - User {} ({}) on {}",
                    entitlement.user_id(),
                    entitlement.plan(),
                    entitlement.expires_at().format("%Y-%m-%d")
                )?;
            }
            Ok(())
        }
    }
}

/// Destination for the periodic report.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &UsageReport) -> Result<()>;
}

/// Writes the report to the log only.
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &UsageReport) -> Result<()> {
        info!(report = %report, "Usage report");
        Ok(())
    }
}

/// Appends each report to a file.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for FileSink {
    fn emit(&self, report: &UsageReport) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open report file: {}", self.path.display()))?;
        writeln!(file, "{}\n", report)
            .with_context(|| format!("Failed to write report file: {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct UsageAggregator {
    stats: Mutex<UsageStats>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_new_user(&self, user_id: UserId) {
        self.lock().new_users.insert(user_id);
    }

    pub fn record_file_processed(&self) {
        self.lock().files_processed += 1;
    }

    pub fn record_feature(&self, feature: Feature) {
        *self.lock().feature_counts.entry(feature).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> UsageStats {
        self.lock().clone()
    }

    /// Swaps in empty counters and returns the old ones. Anything recorded
    /// after this call belongs to the next period.
    pub fn take_period(&self) -> UsageStats {
        std::mem::take(&mut *self.lock())
    }

    /// Closes the period: counters are reset first, then the report is
    /// composed and emitted. A failing sink is logged and nothing is retried.
    #[instrument(skip(self, store, sink))]
    pub fn on_period_boundary(
        &self,
        now: DateTime<Utc>,
        store: &EntitlementStore,
        warning_window: Duration,
        sink: &dyn ReportSink,
    ) -> UsageReport {
        let stats = self.take_period();
        let report = UsageReport::compose(&stats, store, now, warning_window);

        if let Err(err) = sink.emit(&report) {
            let err = FileBotError::ReportSink(format!("{:#}", err));
            warn!(error = %err, "Usage report was not delivered");
        }

        report
    }

    fn lock(&self) -> MutexGuard<'_, UsageStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Plan;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl ReportSink for FailingSink {
        fn emit(&self, _report: &UsageReport) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("admin chat unreachable"))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_new_users_are_a_set() {
        let aggregator = UsageAggregator::new();
        aggregator.record_new_user(1);
        aggregator.record_new_user(1);
        aggregator.record_new_user(2);
        assert_eq!(aggregator.snapshot().new_user_count(), 2);
    }

    #[test]
    fn test_boundary_reports_and_clears() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path().join("subs.json")).unwrap();
        store.grant(10, 2, Plan::Pro, now()).unwrap();
        store.grant(11, 60, Plan::Premium, now()).unwrap();

        let aggregator = UsageAggregator::new();
        aggregator.record_new_user(1);
        aggregator.record_file_processed();
        aggregator.record_file_processed();
        aggregator.record_feature(Feature::Merge);

        let report = aggregator.on_period_boundary(now(), &store, Duration::days(3), &LogSink);
        assert_eq!(report.total_subscribers(), 2);
        assert_eq!(report.new_users(), 1);
        assert_eq!(report.files_processed(), 2);
        assert_eq!(report.feature_count(Feature::Merge), 1);
        assert_eq!(report.feature_count(Feature::Split), 0);
        assert_eq!(report.feature_counts().len(), Feature::ALL.len());
        assert_eq!(report.expiring().len(), 1);
        assert_eq!(report.expiring()[0].user_id(), 10);

        assert!(aggregator.snapshot().is_empty());
    }

    #[test]
    fn test_record_after_boundary_goes_to_next_period() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path().join("subs.json")).unwrap();
        let aggregator = UsageAggregator::new();
        aggregator.record_file_processed();

        let report = aggregator.on_period_boundary(now(), &store, Duration::days(3), &LogSink);
        aggregator.record_file_processed();

        assert_eq!(report.files_processed(), 1);
        assert_eq!(aggregator.snapshot().files_processed(), 1);
    }

    #[test]
    fn test_failing_sink_still_clears() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path().join("subs.json")).unwrap();
        let aggregator = UsageAggregator::new();
        aggregator.record_feature(Feature::Split);
        let sink = FailingSink {
            attempts: AtomicUsize::new(0),
        };

        aggregator.on_period_boundary(now(), &store, Duration::days(3), &sink);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert!(aggregator.snapshot().is_empty());
    }

    #[test]
    fn test_no_increment_lost_across_concurrent_boundaries() {
        let aggregator = Arc::new(UsageAggregator::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        aggregator.record_file_processed();
                    }
                })
            })
            .collect();

        let mut reported = 0;
        for _ in 0..20 {
            reported += aggregator.take_period().files_processed();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        reported += aggregator.take_period().files_processed();

        assert_eq!(reported, 4000);
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path().join("subs.json")).unwrap();
        let path = dir.path().join("reports.log");
        let sink = FileSink::new(&path);
        let aggregator = UsageAggregator::new();

        aggregator.on_period_boundary(now(), &store, Duration::days(3), &sink);
        aggregator.on_period_boundary(now(), &store, Duration::days(3), &sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("Daily Summary").count(), 2);
        assert!(content.contains("- Expiring soon: none"));
    }
}
