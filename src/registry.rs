//! The engine facade: one handle that wires the monitor, the tracker, the
//! system-shortcut collector, and the catalog together.
//!
//! Threading model: capture threads (the event tap, menu-scan workers, the
//! system collector) only ever send immutable [`CatalogMessage`] values into
//! a bounded channel. One dedicated state thread drains that channel and is
//! the sole writer of the catalog; readers go through the `RwLock` without
//! ever holding it across a scan or a callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogMessage, Scope, ShortcutCatalog, ShortcutRecord};
use crate::config::Config;
use crate::error::ResultExt;
use crate::frontmost_tracker::{start_tracking, TrackerContext};
use crate::key_monitor::{CaptureSlot, KeyMonitor};
use crate::menu_scanner::{has_accessibility_permission, ScanLimits};
use crate::system_shortcuts::collect_system_shortcuts;

/// Depth of the capture-to-state channel. Bursts beyond this are dropped by
/// the tap rather than blocking it.
const STATE_CHANNEL_DEPTH: usize = 256;

/// Handle to the discovery engine. Cheap queries, idempotent lifecycle.
pub struct ShortcutScout {
    config: Config,
    catalog: Arc<RwLock<ShortcutCatalog>>,
    sender: Sender<CatalogMessage>,
    capture: CaptureSlot,
    monitor: KeyMonitor,
    frontmost: Arc<RwLock<Option<Scope>>>,
    running: Arc<AtomicBool>,
}

impl ShortcutScout {
    /// Build the engine and spawn its state thread. Nothing observes the
    /// system until [`start`](Self::start).
    pub fn new(config: Config) -> Self {
        let catalog = Arc::new(RwLock::new(ShortcutCatalog::new()));
        let (sender, receiver) = async_channel::bounded(STATE_CHANNEL_DEPTH);
        let capture = CaptureSlot::new();
        let monitor = KeyMonitor::new(sender.clone(), capture.clone());

        spawn_state_thread(Arc::clone(&catalog), receiver);

        Self {
            config,
            catalog,
            sender,
            capture,
            monitor,
            frontmost: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start observing: seed the System scope, open the event tap, and begin
    /// tracking frontmost applications. Idempotent while running, and safe
    /// to call again after `stop()`; the catalog carries over.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting shortcut discovery engine");

        // Preferences reads can stall on a cold prefs daemon; keep them off
        // the caller's thread.
        let sender = self.sender.clone();
        let config = self.config.clone();
        std::thread::Builder::new()
            .name("system-shortcuts".into())
            .spawn(move || {
                let combos = collect_system_shortcuts(&config);
                let _ = sender.send_blocking(CatalogMessage::ReplaceScope {
                    scope: Scope::System,
                    combos,
                });
            })
            .log_err();

        if !has_accessibility_permission() {
            warn!("Accessibility permission not granted; menu scans will come up empty");
        }

        self.monitor.start();
        start_tracking(TrackerContext {
            sender: self.sender.clone(),
            frontmost: Arc::clone(&self.frontmost),
            scanning: Arc::clone(&self.running),
            limits: ScanLimits::from_config(&self.config),
        });
    }

    /// Stop observing. Discovered records stay in the catalog so queries
    /// keep answering; `start()` resumes from where things left off.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.stop();
        self.capture.disarm();
        info!("Shortcut discovery engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether `combo` is already bound in `scope`, or in any scope when
    /// `scope` is None.
    pub fn is_taken(&self, combo: &str, scope: Option<&Scope>) -> bool {
        self.catalog.read().contains(combo, scope)
    }

    /// Snapshot of every known record, in discovery order.
    pub fn rows(&self) -> Vec<ShortcutRecord> {
        self.catalog.read().records().to_vec()
    }

    pub fn record_count(&self) -> usize {
        self.catalog.read().len()
    }

    /// The currently frontmost application scope, if one has been observed.
    pub fn frontmost_scope(&self) -> Option<Scope> {
        self.frontmost.read().clone()
    }

    /// Whether the OS granted the global event tap.
    pub fn tap_acquired(&self) -> bool {
        self.monitor.tap_acquired()
    }

    /// Wait up to `timeout` for the tap thread to report acquisition.
    /// `start()` returns before the tap thread has run, so callers that
    /// want a definitive permission answer poll through here.
    pub fn wait_for_tap(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.monitor.tap_acquired() {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    /// Whether menu scanning has the Accessibility permission.
    pub fn accessibility_granted(&self) -> bool {
        has_accessibility_permission()
    }

    /// Arm try-a-shortcut mode: the next qualifying key press system-wide is
    /// delivered on the returned receiver instead of entering the catalog.
    /// Re-arming replaces a pending capture.
    pub fn capture_next(&self) -> Receiver<String> {
        debug!("Armed shortcut capture");
        self.capture.arm()
    }

    /// Cancel a pending capture; subsequent presses flow to the catalog.
    pub fn cancel_capture(&self) {
        self.capture.disarm();
    }

    #[cfg(test)]
    pub(crate) fn message_sender(&self) -> Sender<CatalogMessage> {
        self.sender.clone()
    }
}

impl Drop for ShortcutScout {
    fn drop(&mut self) {
        self.stop();
        let _ = self.sender.try_send(CatalogMessage::Shutdown);
    }
}

/// The single writer: drains mutation messages until shutdown or until every
/// sender is gone.
fn spawn_state_thread(catalog: Arc<RwLock<ShortcutCatalog>>, receiver: Receiver<CatalogMessage>) {
    std::thread::Builder::new()
        .name("catalog-state".into())
        .spawn(move || {
            while let Ok(message) = receiver.recv_blocking() {
                if matches!(message, CatalogMessage::Shutdown) {
                    break;
                }
                catalog.write().apply(message);
            }
            debug!("Catalog state thread exited");
        })
        .log_err();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until(deadline_ms: u64, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    fn engine() -> ShortcutScout {
        ShortcutScout::new(Config::default())
    }

    #[test]
    fn inserts_flow_through_state_thread() {
        let scout = engine();
        let tx = scout.message_sender();
        tx.send_blocking(CatalogMessage::Insert {
            combo: "⌘S".into(),
            scope: Scope::application(9, "Editor"),
        })
        .unwrap();

        assert!(wait_until(1000, || scout.record_count() == 1));
        assert!(scout.is_taken("⌘S", Some(&Scope::application(9, "x"))));
        assert!(scout.is_taken("⌘S", None));
        assert!(!scout.is_taken("⌘S", Some(&Scope::System)));
    }

    #[test]
    fn duplicate_inserts_keep_one_record() {
        let scout = engine();
        let tx = scout.message_sender();
        for _ in 0..3 {
            tx.send_blocking(CatalogMessage::Insert {
                combo: "⌘K".into(),
                scope: Scope::System,
            })
            .unwrap();
        }

        assert!(wait_until(1000, || scout.record_count() >= 1));
        // Give the state thread a chance to process the trailing duplicates.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(scout.record_count(), 1);
    }

    #[test]
    fn scope_replacement_is_atomic_from_readers_view() {
        let scout = engine();
        let tx = scout.message_sender();
        let scope = Scope::application(4, "Mail");

        tx.send_blocking(CatalogMessage::ReplaceScope {
            scope: scope.clone(),
            combos: vec!["⌘1".into(), "⌘2".into()],
        })
        .unwrap();
        assert!(wait_until(1000, || scout.record_count() == 2));

        tx.send_blocking(CatalogMessage::ReplaceScope {
            scope: scope.clone(),
            combos: vec!["⌘3".into()],
        })
        .unwrap();
        assert!(wait_until(1000, || {
            scout.is_taken("⌘3", Some(&scope)) && !scout.is_taken("⌘1", Some(&scope))
        }));
        assert_eq!(scout.record_count(), 1);
    }

    #[test]
    fn rows_snapshot_is_detached() {
        let scout = engine();
        let tx = scout.message_sender();
        tx.send_blocking(CatalogMessage::Insert {
            combo: "⌘A".into(),
            scope: Scope::System,
        })
        .unwrap();
        assert!(wait_until(1000, || scout.record_count() == 1));

        let snapshot = scout.rows();
        tx.send_blocking(CatalogMessage::Insert {
            combo: "⌘B".into(),
            scope: Scope::System,
        })
        .unwrap();
        assert!(wait_until(1000, || scout.record_count() == 2));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn wait_for_tap_times_out_when_tap_never_arrives() {
        let scout = engine();
        let started = Instant::now();
        assert!(!scout.wait_for_tap(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn capture_receiver_is_replaced_on_rearm() {
        let scout = engine();
        let first = scout.capture_next();
        let second = scout.capture_next();
        drop(second);
        scout.cancel_capture();
        assert!(first.is_empty());
    }

    #[test]
    fn lifecycle_is_idempotent_and_preserves_catalog() {
        let scout = engine();
        let tx = scout.message_sender();
        scout.start();
        scout.start();
        assert!(scout.is_running());

        // Use an application scope; the System scope is concurrently being
        // seeded by start() and an insert there could be replaced.
        let scope = Scope::application(77, "Notes");
        tx.send_blocking(CatalogMessage::Insert {
            combo: "⌘P".into(),
            scope: scope.clone(),
        })
        .unwrap();
        assert!(wait_until(1000, || scout.is_taken("⌘P", Some(&scope))));

        scout.stop();
        scout.stop();
        assert!(!scout.is_running());
        assert!(scout.is_taken("⌘P", Some(&scope)));
    }
}
