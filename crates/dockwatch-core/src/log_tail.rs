use crate::error::RuntimeError;
use crate::model::{short_id, Entity};
use crate::notifier::NoticeSink;
use crate::render::Notice;
use crate::runtime::RuntimeClient;
use crate::text::{fingerprint, sanitize_line, split_lines};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TAIL_LINES: usize = 100;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REPORTED_LINES: usize = 3;

fn error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)error").expect("valid regex"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub interval: Duration,
    pub tail_lines: usize,
    pub fetch_timeout: Duration,
    pub max_reported: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            tail_lines: DEFAULT_TAIL_LINES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_reported: MAX_REPORTED_LINES,
        }
    }
}

/// Fingerprint of the newest already-scanned log line, per entity.
///
/// Entries are never removed; an entity that disappears leaves a stale but
/// harmless marker behind.
#[derive(Debug, Default)]
pub struct MarkerStore {
    markers: Mutex<HashMap<String, u64>>,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<u64> {
        lock(&self.markers).get(entity_id).copied()
    }

    pub fn set(&self, entity_id: &str, marker: u64) {
        lock(&self.markers).insert(entity_id.to_string(), marker);
    }

    pub fn len(&self) -> usize {
        lock(&self.markers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of comparing one fetched tail window with the entity's marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailDiff {
    pub total_lines: usize,
    /// Index of the first line not seen by a previous scan.
    pub window_start: usize,
    /// Whether the previous marker was located in this window.
    pub marker_found: bool,
    /// Error lines in the new window, before capping.
    pub matched: usize,
    /// Sanitized error lines to report, capped.
    pub reported: Vec<String>,
    /// Marker to store after this scan; `None` when nothing was fetched.
    pub next_marker: Option<u64>,
}

impl TailDiff {
    pub fn new_lines(&self) -> usize {
        self.total_lines - self.window_start
    }
}

/// Position right after the first line carrying `marker`, or 0 when there is
/// no marker or it rotated out of the window.
pub fn window_start(fingerprints: &[u64], marker: Option<u64>) -> (usize, bool) {
    let Some(marker) = marker else {
        return (0, false);
    };
    match fingerprints.iter().position(|fp| *fp == marker) {
        Some(idx) => (idx + 1, true),
        None => (0, false),
    }
}

pub fn diff_tail(raw: &[u8], marker: Option<u64>, max_reported: usize) -> TailDiff {
    let lines = split_lines(raw);
    let fingerprints: Vec<u64> = lines.iter().map(|line| fingerprint(line)).collect();
    let (start, marker_found) = window_start(&fingerprints, marker);

    let pattern = error_pattern();
    let errors: Vec<&[u8]> = lines[start..]
        .iter()
        .copied()
        .filter(|line| pattern.is_match(&String::from_utf8_lossy(line)))
        .collect();
    let reported = errors
        .iter()
        .take(max_reported)
        .map(|line| sanitize_line(line))
        .collect();

    TailDiff {
        total_lines: lines.len(),
        window_start: start,
        marker_found,
        matched: errors.len(),
        reported,
        next_marker: fingerprints.last().copied(),
    }
}

/// Removes the entity from the in-flight set when its scan task ends,
/// including by panic.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    entity_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.entity_id);
    }
}

/// Periodic per-entity log scanner reporting new error lines.
pub struct LogTailScanner {
    runtime: Arc<dyn RuntimeClient>,
    sink: NoticeSink,
    config: ScanConfig,
    markers: Arc<MarkerStore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl LogTailScanner {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        sink: NoticeSink,
        config: ScanConfig,
        markers: Arc<MarkerStore>,
    ) -> Self {
        Self {
            runtime,
            sink,
            config,
            markers,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn markers(&self) -> &Arc<MarkerStore> {
        &self.markers
    }

    /// Fetches, diffs and reports one entity, then advances its marker.
    pub async fn scan_entity(&self, entity: &Entity) -> Result<TailDiff, RuntimeError> {
        let fetch = self
            .runtime
            .fetch_recent_log(&entity.id, self.config.tail_lines);
        let raw = tokio::time::timeout(self.config.fetch_timeout, fetch)
            .await
            .map_err(|_| RuntimeError::Timeout(self.config.fetch_timeout))??;

        let previous = self.markers.get(&entity.id);
        let diff = diff_tail(&raw, previous, self.config.max_reported);
        if previous.is_some() && diff.total_lines > 0 && !diff.marker_found {
            debug!(event = "log_marker_rotated", entity_id = %entity.short_id());
        }
        if !diff.reported.is_empty() {
            info!(
                event = "log_errors_detected",
                entity_id = %entity.short_id(),
                name = %entity.name,
                matched = diff.matched,
                reported = diff.reported.len()
            );
            self.sink
                .deliver(&Notice::LogErrors {
                    entity_name: entity.name.clone(),
                    lines: diff.reported.clone(),
                })
                .await;
        }
        if let Some(marker) = diff.next_marker {
            self.markers.set(&entity.id, marker);
        }
        Ok(diff)
    }

    /// Lists entities and dispatches one scan task per entity. Entities whose
    /// previous scan is still running are skipped. The returned handles are
    /// only needed by callers that want to fence the cycle.
    pub async fn run_cycle(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let listing = tokio::time::timeout(
            self.config.fetch_timeout,
            self.runtime.list_entities(true),
        )
        .await
        .map_err(|_| RuntimeError::Timeout(self.config.fetch_timeout));
        let entities = match listing {
            Ok(Ok(entities)) => entities,
            Ok(Err(err)) | Err(err) => {
                warn!(event = "log_scan_list_failed", error = %err);
                return Vec::new();
            }
        };

        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            if !lock(&self.in_flight).insert(entity.id.clone()) {
                debug!(event = "log_scan_in_flight", entity_id = %entity.short_id());
                continue;
            }
            let guard = InFlightGuard {
                in_flight: self.in_flight.clone(),
                entity_id: entity.id.clone(),
            };
            let scanner = self.clone();
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                if let Err(err) = scanner.scan_entity(&entity).await {
                    warn!(
                        event = "log_fetch_failed",
                        entity_id = %short_id(&entity.id),
                        name = %entity.name,
                        error = %err
                    );
                }
            }));
        }
        handles
    }

    /// Ticks every `interval` until `shutdown` turns true. The first cycle
    /// runs one interval after start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            event = "log_scanner_start",
            interval_ms = period.as_millis() as u64,
            tail_lines = self.config.tail_lines
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let dispatched = self.run_cycle().await.len();
                    debug!(event = "log_scan_cycle", dispatched = dispatched);
                }
            }
        }
        info!(event = "log_scanner_stop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRuntime, RecordingNotifier, RuntimeCall};
    use crate::model::Phase;
    use chrono::Utc;

    fn numbered(range: std::ops::Range<usize>) -> String {
        range.map(|idx| format!("line {idx}\n")).collect()
    }

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            phase: Phase::Running,
            created: Utc::now(),
            image: "busybox".to_string(),
        }
    }

    fn scanner(
        runtime: Arc<MemoryRuntime>,
        notifier: Arc<RecordingNotifier>,
        config: ScanConfig,
    ) -> Arc<LogTailScanner> {
        Arc::new(LogTailScanner::new(
            runtime,
            NoticeSink::new(notifier, 7),
            config,
            Arc::new(MarkerStore::new()),
        ))
    }

    #[test]
    fn unchanged_window_has_no_new_lines() {
        let raw = numbered(0..20);
        let first = diff_tail(raw.as_bytes(), None, MAX_REPORTED_LINES);
        assert_eq!(first.new_lines(), 20);

        let second = diff_tail(raw.as_bytes(), first.next_marker, MAX_REPORTED_LINES);
        assert!(second.marker_found);
        assert_eq!(second.new_lines(), 0);
        assert!(second.reported.is_empty());
    }

    #[test]
    fn growth_by_k_yields_window_of_k_regardless_of_tail_size() {
        let before_tail = numbered(50..150);
        let first = diff_tail(before_tail.as_bytes(), None, MAX_REPORTED_LINES);
        assert_eq!(first.total_lines, 100);

        for k in [1usize, 7, 99] {
            let after_tail = numbered(50 + k..150 + k);
            let diff = diff_tail(after_tail.as_bytes(), first.next_marker, MAX_REPORTED_LINES);
            assert_eq!(diff.total_lines, 100);
            assert_eq!(diff.new_lines(), k, "k = {k}");
        }
    }

    #[test]
    fn rotated_marker_treats_whole_window_as_new() {
        let old = diff_tail(b"old 1\nold 2\n", None, MAX_REPORTED_LINES);
        let diff = diff_tail(
            b"fresh error one\nfresh two\n",
            old.next_marker,
            MAX_REPORTED_LINES,
        );
        assert!(!diff.marker_found);
        assert_eq!(diff.window_start, 0);
        assert_eq!(diff.new_lines(), 2);
        assert_eq!(diff.reported, vec!["fresh error one".to_string()]);
    }

    #[test]
    fn at_most_three_matches_are_reported() {
        let raw = "ERROR a\nok\nError b\nerror c\nsome error d\nmisc ErRoR e\n";
        let diff = diff_tail(raw.as_bytes(), None, MAX_REPORTED_LINES);
        assert_eq!(diff.matched, 5);
        assert_eq!(diff.reported, vec!["ERROR a", "Error b", "error c"]);
    }

    #[test]
    fn marker_advances_without_errors_and_stays_on_empty_fetch() {
        let quiet = diff_tail(b"all good\nstill good\n", None, MAX_REPORTED_LINES);
        assert!(quiet.reported.is_empty());
        assert_eq!(quiet.next_marker, Some(fingerprint(b"still good")));

        let empty = diff_tail(b"", quiet.next_marker, MAX_REPORTED_LINES);
        assert_eq!(empty.total_lines, 0);
        assert_eq!(empty.next_marker, None);
    }

    #[test]
    fn repeated_marker_line_rereports_rather_than_misses() {
        let raw = b"health ok\nERROR db connection refused\nhealth ok\n";
        let first = diff_tail(raw, None, MAX_REPORTED_LINES);
        assert_eq!(first.next_marker, Some(fingerprint(b"health ok")));

        let second = diff_tail(raw, first.next_marker, MAX_REPORTED_LINES);
        assert!(second.marker_found);
        assert_eq!(second.window_start, 1);
        assert_eq!(second.reported, vec!["ERROR db connection refused"]);
    }

    #[test]
    fn oversized_error_lines_fit_in_one_notice() {
        let long = format!("ERROR {}\n", "x".repeat(5000));
        let raw = long.repeat(4);
        let diff = diff_tail(raw.as_bytes(), None, MAX_REPORTED_LINES);
        assert_eq!(diff.reported.len(), 3);

        let text = Notice::LogErrors {
            entity_name: "api".to_string(),
            lines: diff.reported,
        }
        .render();
        assert!(text.chars().count() <= 4096, "notice has {} chars", text.chars().count());
        assert_eq!(text.matches("…</pre>").count(), 3);
    }

    #[test]
    fn reported_lines_are_sanitized() {
        let diff = diff_tail(b"\x1b[1mERROR\x1b[0m <tag> & more\n", None, 3);
        assert_eq!(diff.reported, vec!["[1mERROR[0m &lt;tag&gt; &amp; more"]);
    }

    #[tokio::test]
    async fn scan_reports_once_and_then_only_new_lines() {
        let runtime = Arc::new(MemoryRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let web = entity("aaaaaaaaaaaa1111", "web");
        runtime.set_log(&web.id, "boot\nerror: disk full\nready\n");
        let scanner = scanner(runtime.clone(), notifier.clone(), ScanConfig::default());

        let first = scanner.scan_entity(&web).await.expect("first scan");
        assert_eq!(first.reported.len(), 1);
        assert_eq!(scanner.markers().get(&web.id), Some(fingerprint(b"ready")));

        let second = scanner.scan_entity(&web).await.expect("second scan");
        assert_eq!(second.new_lines(), 0);
        assert_eq!(notifier.sent_texts().len(), 1);

        runtime.append_log(&web.id, "request ok\nERROR: timeout\n");
        let third = scanner.scan_entity(&web).await.expect("third scan");
        assert_eq!(third.new_lines(), 2);
        let texts = notifier.sent_texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("ERROR: timeout"));
        assert!(!texts[1].contains("disk full"));
        assert!(runtime.calls().contains(&RuntimeCall::FetchLog {
            id: web.id.clone(),
            tail_lines: DEFAULT_TAIL_LINES,
        }));
    }

    #[tokio::test]
    async fn one_failing_fetch_does_not_block_other_entities() {
        let runtime = Arc::new(MemoryRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let broken = entity("bbbbbbbbbbbb2222", "broken");
        let healthy = entity("cccccccccccc3333", "healthy");
        runtime.set_entities(vec![broken.clone(), healthy.clone()]);
        runtime.fail_log(&broken.id, RuntimeError::Backend("socket closed".to_string()));
        runtime.set_log(&healthy.id, "fatal error here\n");
        let scanner = scanner(runtime.clone(), notifier.clone(), ScanConfig::default());

        for handle in scanner.run_cycle().await {
            handle.await.expect("scan task");
        }

        let texts = notifier.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("healthy"));
        assert_eq!(scanner.markers().get(&broken.id), None);
        assert!(scanner.markers().get(&healthy.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_entity_is_skipped_while_in_flight_and_times_out() {
        let runtime = Arc::new(MemoryRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let slow = entity("dddddddddddd4444", "slow");
        let fast = entity("eeeeeeeeeeee5555", "fast");
        runtime.set_entities(vec![slow.clone(), fast.clone()]);
        runtime.delay_log(&slow.id, Duration::from_secs(3600));
        runtime.set_log(&fast.id, "error once\n");
        let config = ScanConfig {
            fetch_timeout: Duration::from_secs(5),
            ..ScanConfig::default()
        };
        let scanner = scanner(runtime.clone(), notifier.clone(), config);

        let first = scanner.run_cycle().await;
        assert_eq!(first.len(), 2);
        assert!(notifier.wait_for(1, Duration::from_secs(1)).await);

        let second = scanner.run_cycle().await;
        assert_eq!(second.len(), 1, "slow entity still in flight");

        for handle in first.into_iter().chain(second) {
            handle.await.expect("scan task");
        }
        assert_eq!(scanner.markers().get(&slow.id), None);
        assert_eq!(notifier.sent_texts().len(), 1);

        let third = scanner.run_cycle().await;
        assert_eq!(third.len(), 2, "slow entity released after timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_listing_skips_the_cycle_and_the_next_tick_recovers() {
        let runtime = Arc::new(MemoryRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let web = entity("999999999999abcd", "web");
        runtime.set_entities(vec![web.clone()]);
        runtime.set_log(&web.id, "error after outage\n");
        runtime.fail_listing(Some(RuntimeError::Backend("daemon restarting".to_string())));
        let scanner = scanner(runtime.clone(), notifier.clone(), ScanConfig::default());

        assert!(scanner.run_cycle().await.is_empty());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scanner.clone().run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(notifier.deliveries().is_empty());
        assert!(!runtime
            .calls()
            .iter()
            .any(|call| matches!(call, RuntimeCall::FetchLog { .. })));

        runtime.fail_listing(None);
        assert!(notifier.wait_for(1, Duration::from_secs(61)).await);
        assert!(notifier.sent_texts()[0].contains("error after outage"));

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("scanner exits");
        let listings = runtime
            .calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::List { .. }))
            .count();
        assert_eq!(listings, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_cycles_until_shutdown() {
        let runtime = Arc::new(MemoryRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let web = entity("ffffffffffff6666", "web");
        runtime.set_entities(vec![web.clone()]);
        runtime.set_log(&web.id, "error at boot\n");
        let scanner = scanner(runtime.clone(), notifier.clone(), ScanConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scanner.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(runtime.calls().is_empty(), "no cycle before the first period");

        assert!(notifier.wait_for(1, Duration::from_secs(60)).await);
        runtime.append_log(&web.id, "second error\n");
        assert!(notifier.wait_for(2, Duration::from_secs(61)).await);

        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("scanner exits");
        let listings = runtime
            .calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::List { include_stopped: true }))
            .count();
        assert_eq!(listings, 2);
    }
}
