//! Shared service object: board, template, work queue and sessions.
//!
//! Every mutation of shared state goes through a method here. Worker
//! connections only call [`Coordinator::pop`] and the session manager; the
//! maintenance task drives region application, template refresh and
//! reconciliation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::auth::AdminAuth;
use crate::board::{Board, RegionReport};
use crate::error::{DecodeError, RefreshError};
use crate::palette::ColorId;
use crate::queue::WorkQueue;
use crate::reconcile::{MismatchEntry, Reconciler};
use crate::session::{DEFAULT_MAX_CAPACITY, SessionManager};
use crate::source::TemplateSource;
use crate::template::{RefreshGate, TargetTemplate};

/// Construction parameters.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub width: u32,
    pub height: u32,
    pub background: Option<ColorId>,
    pub refresh_interval: Duration,
    pub max_capacity: u32,
    pub seed: Option<u64>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            width: 2000,
            height: 2000,
            background: Some(crate::palette::WHITE),
            refresh_interval: Duration::from_secs(60),
            max_capacity: DEFAULT_MAX_CAPACITY,
            seed: None,
        }
    }
}

/// Result of a template refresh attempt that did not fail.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Interval not yet elapsed; nothing fetched.
    Skipped,
    Refreshed(Arc<TargetTemplate>),
}

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub mismatches: usize,
    pub generation: u64,
}

/// Point-in-time counters for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub connections: usize,
    pub advertised_capacity: u64,
    pub mismatches: usize,
    pub queued: usize,
    pub target_pixels: usize,
    pub queue_generation: u64,
    pub template_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Coordinator {
    board: Board,
    template: RwLock<Arc<TargetTemplate>>,
    refresh_gate: Mutex<RefreshGate>,
    reconciler: Mutex<Reconciler>,
    queue: WorkQueue,
    sessions: Arc<SessionManager>,
    admin: AdminAuth,
    mismatches: AtomicUsize,
}

impl Coordinator {
    pub fn new(options: &CoordinatorOptions, admin: AdminAuth) -> Self {
        Self {
            board: Board::new(options.width, options.height, options.background),
            template: RwLock::new(Arc::new(TargetTemplate::empty())),
            refresh_gate: Mutex::new(RefreshGate::new(options.refresh_interval)),
            reconciler: Mutex::new(Reconciler::new(options.seed)),
            queue: WorkQueue::new(),
            sessions: Arc::new(SessionManager::new(options.max_capacity)),
            admin,
            mismatches: AtomicUsize::new(0),
        }
    }

    pub const fn board(&self) -> &Board {
        &self.board
    }

    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub const fn admin(&self) -> &AdminAuth {
        &self.admin
    }

    /// Current template. Cheap; the template itself is never mutated.
    pub fn template(&self) -> Arc<TargetTemplate> {
        Arc::clone(&*self.template.read())
    }

    pub fn apply_region(&self, image: &RgbImage, offset_x: u32, offset_y: u32) -> RegionReport {
        self.board.apply_region(image, offset_x, offset_y)
    }

    /// Swap in a new template unconditionally.
    pub fn install_template(&self, template: TargetTemplate) -> Arc<TargetTemplate> {
        let template = Arc::new(template);
        *self.template.write() = Arc::clone(&template);
        self.refresh_gate.lock().mark_success(Instant::now());
        template
    }

    /// Fetch and install a new template if the refresh interval has elapsed
    /// or `forced` is set. Blocks on the source; call from a blocking context.
    ///
    /// On failure the previous template stays in effect.
    pub fn refresh_template(
        &self,
        source: &dyn TemplateSource,
        forced: bool,
    ) -> Result<RefreshOutcome, RefreshError> {
        if !self.refresh_gate.lock().is_due(Instant::now(), forced) {
            return Ok(RefreshOutcome::Skipped);
        }

        tracing::info!(source = %source.describe(), forced, "refreshing target template");
        let text = String::from_utf8(source.fetch_document()?).map_err(DecodeError::from)?;
        let template = TargetTemplate::parse(&text, self.board.width(), self.board.height())?;
        let template = self.install_template(template);

        tracing::info!(
            structures = template.structures().len(),
            pixels = template.len(),
            platforms = template.versions().len(),
            "target template installed"
        );
        Ok(RefreshOutcome::Refreshed(template))
    }

    /// Recompute mismatches against a consistent board snapshot and install
    /// them as the next queue generation.
    pub fn reconcile(&self) -> ReconcileReport {
        let template = self.template();
        let entries = {
            let snapshot = self.board.snapshot();
            self.reconciler.lock().recompute(&snapshot, &template)
        };
        let mismatches = entries.len();
        self.mismatches.store(mismatches, Ordering::Relaxed);
        let generation = self.queue.replace(entries);

        tracing::debug!(mismatches, generation, "work queue replaced");
        ReconcileReport {
            mismatches,
            generation,
        }
    }

    /// Hand out the next assignment, if any.
    pub fn pop(&self) -> Option<MismatchEntry> {
        self.queue.pop()
    }

    pub fn live_connection_count(&self) -> usize {
        self.sessions.connection_count()
    }

    pub fn aggregate_advertised_capacity(&self) -> u64 {
        self.sessions.aggregate_capacity()
    }

    /// Mismatches found by the latest reconciliation.
    pub fn current_mismatch_count(&self) -> usize {
        self.mismatches.load(Ordering::Relaxed)
    }

    pub fn total_target_pixel_count(&self) -> usize {
        self.template.read().len()
    }

    pub fn stats(&self) -> Stats {
        let template = self.template();
        Stats {
            connections: self.live_connection_count(),
            advertised_capacity: self.aggregate_advertised_capacity(),
            mismatches: self.current_mismatch_count(),
            queued: self.queue.len(),
            target_pixels: template.len(),
            queue_generation: self.queue.generation(),
            template_refreshed_at: template.refreshed_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use image::Rgb;

    use super::*;
    use crate::board::{ColorLookup, Coord};
    use crate::error::FetchError;

    struct CountingSource {
        document: Result<Vec<u8>, u16>,
        calls: AtomicU32,
    }

    impl CountingSource {
        fn ok(document: &str) -> Self {
            Self::raw(document.as_bytes())
        }

        fn raw(bytes: &[u8]) -> Self {
            Self {
                document: Ok(bytes.to_vec()),
                calls: AtomicU32::new(0),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                document: Err(status),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl TemplateSource for CountingSource {
        fn fetch_document(&self) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.document.clone().map_err(|status| FetchError::Status {
                    url: "test".into(),
                    status,
                })
        }

        fn describe(&self) -> String {
            "test".into()
        }
    }

    const ONE_PIXEL: &str = r#"{"structures":[{"weight":10,"pixels":[{"x":5,"y":5,"color":2,"weight":1}]}],"versions":{"bot-v2":3}}"#;

    fn small() -> Coordinator {
        let options = CoordinatorOptions {
            width: 10,
            height: 10,
            seed: Some(1),
            ..CoordinatorOptions::default()
        };
        Coordinator::new(&options, AdminAuth::disabled())
    }

    #[test]
    fn refresh_is_gated_by_interval_unless_forced() {
        let coordinator = small();
        let source = CountingSource::ok(ONE_PIXEL);

        assert!(matches!(
            coordinator.refresh_template(&source, false),
            Ok(RefreshOutcome::Refreshed(_))
        ));
        assert!(matches!(
            coordinator.refresh_template(&source, false),
            Ok(RefreshOutcome::Skipped)
        ));
        assert!(matches!(
            coordinator.refresh_template(&source, true),
            Ok(RefreshOutcome::Refreshed(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.total_target_pixel_count(), 1);
    }

    #[test]
    fn failed_refresh_keeps_previous_template() {
        let coordinator = small();
        coordinator
            .refresh_template(&CountingSource::ok(ONE_PIXEL), true)
            .unwrap();

        let fetch = coordinator.refresh_template(&CountingSource::failing(500), true);
        assert!(matches!(fetch, Err(RefreshError::Fetch(_))));
        let decode = coordinator.refresh_template(&CountingSource::ok("{oops"), true);
        assert!(matches!(decode, Err(RefreshError::Decode(_))));

        let mut corrupt = br#"{"structures":[{"weight":10,"pixels":[]}],"versions":{"bot-"#.to_vec();
        corrupt.extend_from_slice(&[0xFF, 0xFE]);
        corrupt.extend_from_slice(br#"":9}}"#);
        let encoding = coordinator.refresh_template(&CountingSource::raw(&corrupt), true);
        assert!(matches!(
            encoding,
            Err(RefreshError::Decode(DecodeError::Encoding(_)))
        ));

        assert_eq!(coordinator.total_target_pixel_count(), 1);
        assert_eq!(coordinator.template().min_version("bot-v2"), Some(3));
    }

    #[test]
    fn reconcile_fills_queue_and_repaint_empties_it() {
        let coordinator = small();
        coordinator
            .refresh_template(&CountingSource::ok(ONE_PIXEL), true)
            .unwrap();

        let report = coordinator.reconcile();
        assert_eq!(report.mismatches, 1);
        assert_eq!(report.generation, 1);
        assert_eq!(coordinator.current_mismatch_count(), 1);

        coordinator.apply_region(&RgbImage::from_pixel(1, 1, Rgb([0xFF, 0x45, 0x00])), 5, 5);
        assert_eq!(coordinator.board().color_at(Coord::new(5, 5)), Some(2));

        let report = coordinator.reconcile();
        assert_eq!(report.mismatches, 0);
        assert!(coordinator.pop().is_none());
    }

    #[test]
    fn stats_reflect_state() {
        let coordinator = small();
        coordinator
            .refresh_template(&CountingSource::ok(ONE_PIXEL), true)
            .unwrap();
        coordinator.reconcile();
        let id = coordinator.sessions().register(None);
        coordinator.sessions().set_capacity(id, 4);

        let stats = coordinator.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.advertised_capacity, 4);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.target_pixels, 1);
        assert_eq!(stats.queue_generation, 1);
        assert!(stats.template_refreshed_at.is_some());
    }
}
