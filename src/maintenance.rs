//! Periodic maintenance: observe the canvas, refresh the template, rebuild
//! the work queue.
//!
//! One cycle runs these steps in order and never aborts early. A failed
//! region fetch or template refresh is logged and the cycle carries on with
//! whatever state is already in place.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::coordinator::{Coordinator, RefreshOutcome};
use crate::source::{CanvasSource, TemplateSource};

/// Default pause between cycles.
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_secs(30);

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub regions_applied: usize,
    pub regions_failed: usize,
    pub template_refreshed: bool,
    pub template_failed: bool,
    pub mismatches: usize,
    pub generation: u64,
}

pub struct Maintenance {
    coordinator: Arc<Coordinator>,
    canvas: Arc<dyn CanvasSource>,
    template: Arc<dyn TemplateSource>,
    delay: Duration,
}

impl Maintenance {
    pub fn new(
        coordinator: Arc<Coordinator>,
        canvas: Arc<dyn CanvasSource>,
        template: Arc<dyn TemplateSource>,
    ) -> Self {
        Self {
            coordinator,
            canvas,
            template,
            delay: DEFAULT_CYCLE_DELAY,
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run one cycle. Collaborator I/O and the reconcile pass run on the
    /// blocking pool.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let canvas = Arc::clone(&self.canvas);
        let coordinator = Arc::clone(&self.coordinator);
        match tokio::task::spawn_blocking(move || apply_regions(&coordinator, canvas.as_ref())).await
        {
            Ok((applied, failed)) => {
                report.regions_applied = applied;
                report.regions_failed = failed;
            }
            Err(e) => {
                warn!(error = %e, "canvas observation task failed");
            }
        }

        let source = Arc::clone(&self.template);
        let coordinator = Arc::clone(&self.coordinator);
        let refresh =
            tokio::task::spawn_blocking(move || coordinator.refresh_template(source.as_ref(), false))
                .await;
        match refresh {
            Ok(Ok(RefreshOutcome::Refreshed(_))) => report.template_refreshed = true,
            Ok(Ok(RefreshOutcome::Skipped)) => debug!("template refresh not due"),
            Ok(Err(e)) => {
                report.template_failed = true;
                warn!(error = %e, "template refresh failed, keeping previous template");
            }
            Err(e) => {
                report.template_failed = true;
                warn!(error = %e, "template refresh task failed");
            }
        }

        let coordinator = Arc::clone(&self.coordinator);
        match tokio::task::spawn_blocking(move || coordinator.reconcile()).await {
            Ok(reconciled) => {
                report.mismatches = reconciled.mismatches;
                report.generation = reconciled.generation;
            }
            Err(e) => warn!(error = %e, "reconcile task failed"),
        }

        report
    }

    /// Cycle until `shutdown` is cancelled. The first cycle starts immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(delay_secs = self.delay.as_secs(), "maintenance task starting");

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let report = self
                .run_cycle()
                .instrument(tracing::info_span!("cycle", n = cycle))
                .await;
            info!(
                cycle,
                regions = report.regions_applied,
                failed_regions = report.regions_failed,
                refreshed = report.template_refreshed,
                mismatches = report.mismatches,
                connections = self.coordinator.live_connection_count(),
                capacity = self.coordinator.aggregate_advertised_capacity(),
                "maintenance cycle complete"
            );

            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("maintenance task shutting down");
                    break;
                }

                () = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}

fn apply_regions(coordinator: &Coordinator, canvas: &dyn CanvasSource) -> (usize, usize) {
    let mut applied = 0;
    let mut failed = 0;
    let template = coordinator.template();
    for fetched in canvas.fetch_regions(template.enabled_regions()) {
        let region = match fetched {
            Ok(region) => region,
            Err(e) => {
                warn!(error = %e, "canvas region fetch failed");
                failed += 1;
                continue;
            }
        };
        match region.decode() {
            Ok(image) => {
                let written =
                    coordinator.apply_region(&image, region.offset_x, region.offset_y);
                debug!(
                    origin = %region.origin,
                    written = written.written,
                    unmatched = written.unmatched,
                    clipped = written.clipped,
                    "canvas region applied"
                );
                applied += 1;
            }
            Err(e) => {
                warn!(origin = %region.origin, error = %e, "canvas region undecodable");
                failed += 1;
            }
        }
    }
    (applied, failed)
}
