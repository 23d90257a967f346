//! Catch-Up Runner
//!
//! Replays one daily tick for every local calendar day between the processing
//! marker (last processed day) and today. A daily tick is:
//!
//! 1. one scheduler pass
//! 2. one update generator pass
//! 3. one settle pass moving fully revealed resolutions to `reflecting`
//!
//! The tick for a past day runs at the last second of that day; today's tick
//! runs at `now`. The marker is advanced (compare-and-swap) after each day, so
//! an interrupted replay resumes where it stopped and a second run on the same
//! day does nothing.
//!
//! Once the scheduler pass has written, the rest of the tick cannot abort the
//! day: generator and settle failures are logged and counted, and the day is
//! checkpointed anyway. If the checkpoint itself fails, the replayed scheduler
//! pass skips storylines that already moved on that day.

use super::closure::ClosureBuilder;
use super::phase_scheduler::{PhaseScheduler, SchedulerPassReport};
use super::update_generator::UpdateGenerator;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storyline_core::{Result, StorylineError, StorylineStore};
use tokio::sync::Mutex;

/// What one catch-up run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpReport {
    /// Marker found at the start
    pub start_marker: Option<NaiveDate>,
    /// Marker after the run
    pub end_marker: Option<NaiveDate>,
    /// Daily ticks executed and checkpointed
    pub days_processed: usize,
    /// Phase transitions across all ticks
    pub transitions: usize,
    /// Updates generated across all ticks
    pub updates_generated: usize,
    /// Storylines moved to reflecting
    pub settled: usize,
    /// Generator or settle passes that failed and were skipped
    #[serde(default)]
    pub failed_stages: usize,
    /// Stopped early by a cancel request
    pub interrupted: bool,
    /// Another run was already in progress
    pub skipped: bool,
}

impl CatchUpReport {
    fn absorb(&mut self, scheduler: &SchedulerPassReport) {
        self.transitions += scheduler.transitions();
    }
}

/// Local calendar day containing `instant`
pub fn local_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// First instant of the local calendar day `day`
pub fn day_start(day: NaiveDate, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| StorylineError::other(format!("no midnight on {}", day)))?;
    Ok(offset
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(|| StorylineError::other(format!("ambiguous midnight on {}", day)))?
        .with_timezone(&Utc))
}

/// Instant a daily tick for `day` runs at: the last second of the day, or
/// `now` if that is earlier.
pub fn tick_instant(
    day: NaiveDate,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let next = day
        .succ_opt()
        .ok_or_else(|| StorylineError::other(format!("no day after {}", day)))?;
    let end_of_day = day_start(next, offset)? - Duration::seconds(1);
    Ok(end_of_day.min(now))
}

/// Replays missed daily ticks
pub struct CatchUpRunner {
    store: Arc<dyn StorylineStore>,
    scheduler: Arc<PhaseScheduler>,
    generator: Arc<UpdateGenerator>,
    closure: Arc<ClosureBuilder>,
    offset: FixedOffset,
    cancel: Arc<AtomicBool>,
    running: Mutex<()>,
}

impl CatchUpRunner {
    pub fn new(
        store: Arc<dyn StorylineStore>,
        scheduler: Arc<PhaseScheduler>,
        generator: Arc<UpdateGenerator>,
        closure: Arc<ClosureBuilder>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            scheduler,
            generator,
            closure,
            offset,
            cancel: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(()),
        }
    }

    /// Ask a running replay to stop after the current day
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Allow replays again after [`cancel`](Self::cancel)
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Whether a cancel request is pending
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Process every unprocessed day up to and including today.
    ///
    /// A first run only records today. `Err` means the scheduler could not read
    /// its storylines or the marker could not be read or written; days already
    /// checkpointed stay processed.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CatchUpReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Catch-up already running, skipping");
            return Ok(CatchUpReport {
                skipped: true,
                ..Default::default()
            });
        };

        let today = local_day(now, self.offset);
        let start = self.store.get_processing_marker().await?;
        let mut report = CatchUpReport {
            start_marker: start,
            end_marker: start,
            ..Default::default()
        };

        let Some(mut marker) = start else {
            if self.store.advance_processing_marker(None, today).await? {
                report.end_marker = Some(today);
                tracing::info!(day = %today, "Processing marker initialized");
            }
            return Ok(report);
        };

        if marker >= today {
            return Ok(report);
        }

        tracing::info!(
            from = %marker,
            to = %today,
            days_missed = (today - marker).num_days(),
            "Catching up missed days"
        );

        while marker < today {
            if self.is_cancelled() {
                report.interrupted = true;
                tracing::info!(marker = %marker, "Catch-up interrupted");
                break;
            }

            let Some(day) = marker.succ_opt() else { break };
            let at = tick_instant(day, self.offset, now)?;

            let scheduled = self
                .scheduler
                .run_daily_pass(at, day_start(day, self.offset)?)
                .await?;
            report.absorb(&scheduled);

            let generated = match self.generator.run_pass(at).await {
                Ok(pass) => pass.generated,
                Err(e) => {
                    report.failed_stages += 1;
                    tracing::warn!(day = %day, error = %e, "Update generator pass failed, continuing");
                    0
                }
            };
            report.updates_generated += generated;
            match self.closure.settle_resolved(at).await {
                Ok(settled) => report.settled += settled,
                Err(e) => {
                    report.failed_stages += 1;
                    tracing::warn!(day = %day, error = %e, "Settle pass failed, continuing");
                }
            }

            if !self
                .store
                .advance_processing_marker(Some(marker), day)
                .await?
            {
                tracing::warn!(day = %day, "Processing marker moved by another runner, stopping");
                break;
            }
            marker = day;
            report.days_processed += 1;
            report.end_marker = Some(day);

            tracing::debug!(
                day = %day,
                transitions = scheduled.transitions(),
                updates = generated,
                "Daily tick checkpointed"
            );
        }

        tracing::info!(
            days = report.days_processed,
            transitions = report.transitions,
            updates = report.updates_generated,
            settled = report.settled,
            failed_stages = report.failed_stages,
            "Catch-up finished"
        );
        Ok(report)
    }
}
