//! Replay tracker (C5): a watermark timestamp plus a bounded, insertion-ordered
//! set of recently processed event ids, persisted to two JSON files with a
//! documented fallback to memory-only mode.
//!
//! The on-disk cache is a hint, not a source of truth: any read that fails
//! validation is treated as absent, and any write that fails disables
//! persistence for the remainder of the tracker's lifetime. This is tracked
//! as explicit state (`persistence_enabled`), not hidden behind a retried
//! exception path.

mod config;

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

pub use config::TrackerConfig;
use serde::{Deserialize, Serialize};

const TIMESTAMP_FILE: &str = "timestamp.json";
const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Serialize, Deserialize)]
struct TimestampFile {
    #[serde(rename = "lastProcessed")]
    last_processed: i64,
    #[serde(rename = "updatedAt")]
    updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(rename = "eventIds")]
    event_ids: Vec<String>,
    #[serde(rename = "createdAt")]
    created_at: i64,
    count: usize,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// Bounded, insertion-ordered id set: `contains` is O(1), eviction removes
/// the oldest insertion once `limit` is exceeded.
struct RecentEvents {
    order: VecDeque<String>,
    set: HashSet<String>,
    limit: usize,
}

impl RecentEvents {
    fn new(limit: usize) -> Self {
        Self { order: VecDeque::new(), set: HashSet::new(), limit }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    /// Insert `id`, evicting the oldest entry if now over `limit`. Returns
    /// true if an eviction occurred.
    fn insert(&mut self, id: String) -> bool {
        if self.set.contains(&id) {
            return false;
        }
        self.set.insert(id.clone());
        self.order.push_back(id);
        if self.order.len() > self.limit {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
            return true;
        }
        false
    }

    fn snapshot(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    /// Load ids in insertion order, keeping only the last `limit` entries.
    fn load(&mut self, ids: Vec<String>) {
        let start = ids.len().saturating_sub(self.limit);
        for id in ids.into_iter().skip(start) {
            self.set.insert(id.clone());
            self.order.push_back(id);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct ReplayTracker {
    config: TrackerConfig,
    last_processed: i64,
    recent: RecentEvents,
    persistence_enabled: bool,
}

impl ReplayTracker {
    pub async fn new(config: TrackerConfig) -> Self {
        let mut tracker = Self {
            recent: RecentEvents::new(config.track_limit),
            last_processed: now() - config.lookback_seconds,
            persistence_enabled: false,
            config,
        };

        if !tracker.config.enable_persistence {
            return tracker;
        }

        if let Err(err) = tokio::fs::create_dir_all(&tracker.config.cache_dir).await {
            tracing::warn!(error = %err, dir = %tracker.config.cache_dir.display(), "failed to create tracker cache dir; falling back to memory-only");
            return tracker;
        }
        tracker.persistence_enabled = true;

        if let Some(loaded) = tracker.try_load_timestamp().await {
            if loaded.last_processed > 0 {
                tracker.last_processed = loaded.last_processed.max(now() - 2 * tracker.config.lookback_seconds);
            }
        }

        if let Some(loaded) = tracker.try_load_snapshot().await {
            tracker.recent.load(loaded.event_ids);
        }

        tracker
    }

    /// The `since` value to use in a relay subscription filter.
    pub fn subscription_since(&self) -> i64 {
        self.last_processed
    }

    /// True iff `ts` is at or before the watermark, or `id` is in the
    /// recently-processed set. An event at exactly `last_processed` counts
    /// as already processed.
    pub fn has_processed(&self, id: &str, ts: i64) -> bool {
        ts <= self.last_processed || self.recent.contains(id)
    }

    /// Record `id`/`ts` as processed. Persistence failures are logged and
    /// swallowed; they never propagate to the caller.
    pub async fn mark_processed(&mut self, id: &str, ts: i64) {
        if ts > self.last_processed {
            self.last_processed = ts;
            self.persist_timestamp().await;
        }

        if self.recent.insert(id.to_owned()) {
            self.persist_snapshot().await;
        }
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence_enabled
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    async fn try_load_timestamp(&self) -> Option<TimestampFile> {
        let path = self.config.cache_dir.join(TIMESTAMP_FILE);
        let contents = tokio::fs::read_to_string(&path).await.ok()?;
        serde_json::from_str(&contents).ok()
    }

    async fn try_load_snapshot(&self) -> Option<SnapshotFile> {
        let path = self.config.cache_dir.join(SNAPSHOT_FILE);
        let contents = tokio::fs::read_to_string(&path).await.ok()?;
        serde_json::from_str(&contents).ok()
    }

    async fn persist_timestamp(&mut self) {
        if !self.persistence_enabled {
            return;
        }
        let file = TimestampFile { last_processed: self.last_processed, updated_at: now() };
        self.write_json(TIMESTAMP_FILE, &file).await;
    }

    async fn persist_snapshot(&mut self) {
        if !self.persistence_enabled {
            return;
        }
        let ids = self.recent.snapshot();
        let file = SnapshotFile { count: ids.len(), event_ids: ids, created_at: now() };
        self.write_json(SNAPSHOT_FILE, &file).await;
    }

    async fn write_json(&mut self, file_name: &str, value: &impl Serialize) {
        let path = self.config.cache_dir.join(file_name);
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, file = file_name, "failed to serialize tracker cache file");
                self.persistence_enabled = false;
                return;
            }
        };
        if let Err(err) = tokio::fs::write(&path, json).await {
            tracing::warn!(error = %err, path = %path.display(), "failed to persist tracker cache file; disabling persistence");
            self.persistence_enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> TrackerConfig {
        TrackerConfig::new().cache_dir(dir).lookback_seconds(3600).track_limit(10)
    }

    #[tokio::test]
    async fn boundary_rule_treats_equal_timestamp_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ReplayTracker::new(config(dir.path())).await;
        let ts = now();
        tracker.mark_processed(&"a".repeat(64), ts).await;
        assert!(tracker.has_processed(&"z".repeat(64), ts));
        assert!(!tracker.has_processed(&"z".repeat(64), ts + 1));
    }

    #[tokio::test]
    async fn eviction_keeps_bounded_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ReplayTracker::new(config(dir.path())).await;
        let base = now();
        let ids: Vec<String> = (0..20).map(|i| format!("{i:064x}")).collect();
        for (i, id) in ids.iter().enumerate() {
            tracker.mark_processed(id, base + i as i64).await;
        }
        assert_eq!(tracker.recent_len(), 10);

        let watermark = tracker.subscription_since();
        // Evicted ids are still considered processed via the watermark.
        for id in &ids[..10] {
            assert!(tracker.has_processed(id, watermark));
        }
        // Retained ids are found via the id set even past the watermark.
        for id in &ids[10..] {
            assert!(tracker.has_processed(id, watermark + 1));
        }

        let snapshot_path = dir.path().join(SNAPSHOT_FILE);
        let contents = tokio::fs::read_to_string(&snapshot_path).await.unwrap();
        let file: SnapshotFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(file.event_ids, ids[10..]);
    }

    #[tokio::test]
    async fn restart_resumes_watermark_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ts = now();
        {
            let mut tracker = ReplayTracker::new(config(dir.path())).await;
            tracker.mark_processed(&"a".repeat(64), ts).await;
        }
        let tracker = ReplayTracker::new(config(dir.path())).await;
        assert_eq!(tracker.subscription_since(), ts);
    }

    #[tokio::test]
    async fn unwritable_cache_dir_falls_back_to_memory_only() {
        let file_not_dir = tempfile::NamedTempFile::new().unwrap();
        let cfg = TrackerConfig::new().cache_dir(file_not_dir.path());
        let mut tracker = ReplayTracker::new(cfg).await;
        assert!(!tracker.persistence_enabled());

        let ts = now();
        tracker.mark_processed(&"a".repeat(64), ts).await;
        assert!(tracker.has_processed(&"a".repeat(64), ts + 1));
    }

    #[tokio::test]
    async fn disabled_persistence_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrackerConfig::new().cache_dir(dir.path()).enable_persistence(false);
        let mut tracker = ReplayTracker::new(cfg).await;
        tracker.mark_processed(&"a".repeat(64), 999).await;
        assert!(tokio::fs::metadata(dir.path().join(TIMESTAMP_FILE)).await.is_err());
    }
}
