//! Refresh triggers checked by the polling loop on each wake.

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::base::RefreshType;

const MAX_GAP_MINUTES: i64 = 3 * 60;

pub trait Trigger {
    fn refresh_type(&self) -> RefreshType;

    fn next_run(&self) -> DateTime<Utc>;

    /// Records a run at `now` and schedules the next one
    fn mark_run(&mut self, now: DateTime<Utc>);

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run()
    }
}

/// Fires a fixed interval after the previous run
pub struct IntervalTrigger {
    refresh_type: RefreshType,
    interval: Duration,
    next_run: DateTime<Utc>,
}

impl IntervalTrigger {
    pub fn new(refresh_type: RefreshType, interval: Duration, start: DateTime<Utc>) -> Self {
        IntervalTrigger { refresh_type, interval, next_run: offset_or_max(start, interval) }
    }

    pub fn hourly(hours: u32, start: DateTime<Utc>) -> Self {
        IntervalTrigger::new(RefreshType::Hourly, Duration::hours(hours as i64), start)
    }
}

impl Trigger for IntervalTrigger {
    fn refresh_type(&self) -> RefreshType {
        self.refresh_type
    }

    fn next_run(&self) -> DateTime<Utc> {
        self.next_run
    }

    fn mark_run(&mut self, now: DateTime<Utc>) {
        self.next_run = offset_or_max(now, self.interval);
    }
}

/// `from + interval`, saturating at the latest representable instant
fn offset_or_max(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    from.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fires once a day at a wall-clock time in `tz`
pub struct DailyTrigger {
    refresh_type: RefreshType,
    at: NaiveTime,
    tz: Tz,
    next_run: DateTime<Utc>,
}

impl DailyTrigger {
    pub fn new(refresh_type: RefreshType, at: NaiveTime, tz: Tz, start: DateTime<Utc>) -> Self {
        DailyTrigger { refresh_type, at, tz, next_run: next_occurrence(at, &tz, start) }
    }

    pub fn daily(at: NaiveTime, tz: Tz, start: DateTime<Utc>) -> Self {
        DailyTrigger::new(RefreshType::Daily, at, tz, start)
    }
}

impl Trigger for DailyTrigger {
    fn refresh_type(&self) -> RefreshType {
        self.refresh_type
    }

    fn next_run(&self) -> DateTime<Utc> {
        self.next_run
    }

    fn mark_run(&mut self, now: DateTime<Utc>) {
        self.next_run = next_occurrence(self.at, &self.tz, now);
    }
}

/// Maps a local wall-clock time to an instant.
///
/// Ambiguous times take the earlier instant. Times inside a DST gap move forward to
/// the first minute that exists.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(ts) => ts.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _latest) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            for minutes in 1..=MAX_GAP_MINUTES {
                if let Some(ts) = tz.from_local_datetime(&(local + Duration::minutes(minutes))).earliest() {
                    return ts.with_timezone(&Utc);
                }
            }
            tracing::warn!(%local, %tz, "Unable to resolve local time, treating as UTC");
            local.and_utc()
        }
    }
}

/// First occurrence of `at` in `tz` strictly after `after`
pub fn next_occurrence(at: NaiveTime, tz: &Tz, after: DateTime<Utc>) -> DateTime<Utc> {
    let local_date = after.with_timezone(tz).date_naive();
    for offset in 0..3 {
        if let Some(date) = local_date.checked_add_days(Days::new(offset)) {
            let candidate = resolve_local(tz, date.and_time(at));
            if candidate > after {
                return candidate;
            }
        }
    }
    after + Duration::days(1)
}

/// Set of triggers; reports which refreshes are due at a given time
pub struct Scheduler {
    triggers: Vec<Box<dyn Trigger>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { triggers: Vec::new() }
    }

    pub fn trigger<T: Trigger + 'static>(mut self, trigger: T) -> Self {
        self.triggers.push(Box::new(trigger));
        self
    }

    /// Hourly interval trigger plus a once-daily trigger, both measured from `start`
    pub fn hourly_and_daily(interval_hours: u32, daily_at: NaiveTime, tz: Tz, start: DateTime<Utc>) -> Self {
        Scheduler::new()
            .trigger(IntervalTrigger::hourly(interval_hours, start))
            .trigger(DailyTrigger::daily(daily_at, tz, start))
    }

    /// Refreshes due at `now`, ordered by scheduled time. Each returned trigger is rescheduled.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<RefreshType> {
        let mut due: Vec<(DateTime<Utc>, usize)> = self.triggers.iter()
            .enumerate()
            .filter(|(_pos, trigger)| trigger.is_due(now))
            .map(|(pos, trigger)| (trigger.next_run(), pos))
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_scheduled, pos)| {
                let trigger = &mut self.triggers[pos];
                trigger.mark_run(now);
                trigger.refresh_type()
            })
            .collect()
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.triggers.iter().map(|t| t.next_run()).min()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}
