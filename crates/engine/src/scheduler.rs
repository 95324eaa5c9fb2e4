//! Cron-style timer for recurring scans
//!
//! Each job fires at fixed UTC hours on a fixed minute. The loop sleeps until
//! the earliest due job, then runs its scan unless the system switch is off.

use crate::scanner::{run_claimed_scan, ScanDeps, ScanProgress, ScanRequest};
use crate::system::SystemSwitch;
use crate::types::Timeframe;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use persistence::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fires at `minute` past each hour in `hours` (UTC)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    pub hours: Vec<u32>,
    pub minute: u32,
}

impl CronSchedule {
    pub fn new(hours: &[u32], minute: u32) -> Self {
        let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
        hours.sort_unstable();
        hours.dedup();
        Self {
            hours,
            minute: minute.min(59),
        }
    }

    /// Every fourth hour starting at `first_hour`
    pub fn every_four_hours(first_hour: u32, minute: u32) -> Self {
        let hours: Vec<u32> = (0..6).map(|i| (first_hour + i * 4) % 24).collect();
        Self::new(&hours, minute)
    }

    /// First firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        [today, today + ChronoDuration::days(1)]
            .into_iter()
            .flat_map(|day| {
                self.hours.iter().filter_map(move |h| {
                    NaiveTime::from_hms_opt(*h, self.minute, 0).map(|t| day.and_time(t).and_utc())
                })
            })
            .find(|at| *at > now)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub schedule: CronSchedule,
    pub request: ScanRequest,
}

fn preset_job(name: &str, preset: &str, schedule: CronSchedule, min_score: f64) -> ScheduledJob {
    ScheduledJob {
        name: name.to_string(),
        schedule,
        request: ScanRequest {
            timeframe: Timeframe::H4,
            min_score,
            notify: true,
            scan_type: "scheduled".to_string(),
            ..ScanRequest::preset(preset)
        },
    }
}

/// Crypto, commodity and index scans on the 4h timeframe, staggered so
/// they never overlap
pub fn default_jobs(min_score: f64) -> Vec<ScheduledJob> {
    vec![
        preset_job(
            "crypto-4h",
            "crypto",
            CronSchedule::every_four_hours(3, 0),
            min_score,
        ),
        preset_job(
            "commodities-4h",
            "commodities",
            CronSchedule::every_four_hours(0, 30),
            min_score,
        ),
        preset_job(
            "indices-4h",
            "indices",
            CronSchedule::every_four_hours(1, 0),
            min_score,
        ),
    ]
}

/// Earliest due job after `now`
pub fn next_job(jobs: &[ScheduledJob], now: DateTime<Utc>) -> Option<(usize, DateTime<Utc>)> {
    jobs.iter()
        .enumerate()
        .filter_map(|(i, job)| job.schedule.next_after(now).map(|at| (i, at)))
        .min_by_key(|(_, at)| *at)
}

/// Run jobs forever (until `stop` is set)
pub async fn run_scheduler(
    jobs: Vec<ScheduledJob>,
    deps: &ScanDeps,
    pool: SqlitePool,
    switch: &SystemSwitch,
    progress: &ScanProgress,
    stop: &AtomicBool,
) {
    for job in &jobs {
        info!(job = %job.name, hours = ?job.schedule.hours, minute = job.schedule.minute, "Scheduled scan registered");
    }

    while !stop.load(Ordering::Relaxed) {
        let Some((index, due)) = next_job(&jobs, Utc::now()) else {
            warn!("No schedulable jobs, scheduler exiting");
            return;
        };
        let job = &jobs[index];
        info!(job = %job.name, due = %due.to_rfc3339(), "Next scheduled scan");

        // Sleep in slices so a stop request is noticed
        while Utc::now() < due {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let remaining = (due - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }

        if !switch.is_enabled() {
            info!(job = %job.name, "System disabled, skipping scheduled scan");
            continue;
        }
        if !progress.try_start() {
            warn!(job = %job.name, "A scan is already running, skipping");
            continue;
        }

        match run_claimed_scan(job.request.clone(), deps, progress, &pool).await {
            Ok(outcome) => info!(
                job = %job.name,
                scan_id = outcome.scan_id,
                found = outcome.setups.len(),
                saved = outcome.saved,
                "Scheduled scan finished"
            ),
            Err(e) => error!(job = %job.name, error = %e, "Scheduled scan failed"),
        }
    }
}
