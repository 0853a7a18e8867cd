//! When the usage report runs.
//!
//! The schedule is a fixed time of day in UTC. The scheduler itself never
//! spawns anything; the caller waits for `next_after` and then feeds a
//! boundary event through the same path as user events.

use chrono::{DateTime, Duration, NaiveTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    at: NaiveTime,
}

impl ReportSchedule {
    /// Out-of-range values fall back to midnight.
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            at: NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    pub fn wait_from(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self::daily(0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Armed,
    Reporting,
}

/// State of the report scheduler
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub phase: SchedulerPhase,

    /// Last time a report was emitted
    pub last_report: Option<DateTime<Utc>>,

    /// Next scheduled report time
    pub next_report: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReportScheduler {
    schedule: ReportSchedule,
    state: SchedulerState,
}

impl ReportScheduler {
    pub fn new(schedule: ReportSchedule, now: DateTime<Utc>) -> Self {
        Self {
            schedule,
            state: SchedulerState {
                phase: SchedulerPhase::Armed,
                last_report: None,
                next_report: schedule.next_after(now),
            },
        }
    }

    pub fn schedule(&self) -> ReportSchedule {
        self.schedule
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Armed → Reporting. Returns false if a report is already running.
    pub fn begin(&mut self) -> bool {
        if self.state.phase == SchedulerPhase::Reporting {
            return false;
        }
        self.state.phase = SchedulerPhase::Reporting;
        true
    }

    /// Reporting → Armed, scheduling the next run after `now`.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state.phase = SchedulerPhase::Armed;
        self.state.last_report = Some(now);
        self.state.next_report = self.schedule.next_after(now);
    }
}
