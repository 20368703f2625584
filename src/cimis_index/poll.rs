// cimis_index - Daily watering index from CIMIS reference evapotranspiration
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::aggregate::{Aggregator, Indexes, Selected, Totals};
use crate::client::ClientError;
use crate::index::{IndexSelection, ReferenceSet};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike};

/// Minimum number of seconds between two requests that did not succeed.
pub const RETRY_SPACING_SECS: i64 = 300;
/// Time given to CIMIS after midnight to compute the daily Et0 of the previous day.
pub const UPDATE_GRACE_SECS: i64 = 3600;
/// Default maximum number of requests made to CIMIS per calendar day.
pub const DEFAULT_DAILY_LIMIT: u32 = 16;

const SECS_PER_DAY: i64 = 24 * 3600;

/// Health of the CIMIS data, reported as a single character token.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    #[default]
    Unknown,
    Active,
    Error,
    Failed,
}

impl State {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Unknown => "u",
            Self::Active => "a",
            Self::Error => "e",
            Self::Failed => "f",
        }
    }
}

/// Result of the most recent poll cycle. Times are Unix timestamps in seconds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollState {
    pub state: State,
    pub error: Option<String>,
    pub updated: Option<i64>,
    pub received: Option<i64>,
}

/// Number of requests made during a single calendar day.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct RequestBudget {
    day: Option<NaiveDate>,
    count: u32,
    limit_logged: bool,
}

/// Outcome of a scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do on this tick.
    Idle,
    /// The daily request limit was reached. Only returned once per day.
    Suspended { limit: u32 },
    /// Request the daily Et0 for the given date.
    Fetch(NaiveDate),
}

/// Decides when to ask CIMIS for a new daily Et0.
///
/// The request budget and the staleness check are independent: the budget resets
/// each day whether or not requests succeeded, and caps requests whether or not
/// they failed.
#[derive(Debug, Clone)]
pub struct Scheduler {
    daily_limit: u32,
    last_tick: Option<i64>,
    queried: Option<i64>,
    budget: RequestBudget,
}

impl Scheduler {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            last_tick: None,
            queried: None,
            budget: RequestBudget::default(),
        }
    }

    /// Decide whether a request should be issued at `now`, given the start of the
    /// day of the last successful update.
    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>, updated: Option<i64>) -> Decision {
        let ts = now.timestamp();
        if self.last_tick == Some(ts) {
            return Decision::Idle;
        }
        self.last_tick = Some(ts);

        if let Some(queried) = self.queried {
            if ts < queried + RETRY_SPACING_SECS {
                return Decision::Idle;
            }
        }

        let today = now.date_naive();
        if self.budget.day != Some(today) {
            self.budget = RequestBudget {
                day: Some(today),
                count: 0,
                limit_logged: false,
            };
        }

        if self.budget.count >= self.daily_limit {
            if self.budget.limit_logged {
                return Decision::Idle;
            }

            self.budget.limit_logged = true;
            return Decision::Suspended {
                limit: self.daily_limit,
            };
        }

        let yesterday = now.clone() - Duration::seconds(SECS_PER_DAY);
        if let Some(updated) = updated {
            if yesterday.timestamp() < updated + UPDATE_GRACE_SECS {
                return Decision::Idle;
            }
        }

        self.budget.count += 1;
        self.queried = Some(ts);
        Decision::Fetch(yesterday.date_naive())
    }

    /// Mark the outstanding request as complete so the next one only waits on staleness.
    pub fn resolved(&mut self) {
        self.queried = None;
    }

    pub fn requests_today(&self) -> u32 {
        self.budget.count
    }
}

/// Snapshot of everything the status document and metrics need after a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub poll: PollState,
    pub refs: ReferenceSet,
    pub totals: Totals,
    pub indexes: Indexes,
}

impl Report {
    pub fn selected(&self, selection: IndexSelection) -> Selected {
        Selected {
            reference: self.refs.get(selection),
            accumulated: self.totals.get(selection),
            index: self.indexes.get(selection),
        }
    }
}

/// Owner of all polling state: schedule, rolling buffers, and health.
///
/// Meant to be driven from a single task: `tick` on every timer tick and, when it
/// returns `Decision::Fetch`, `complete` with the result of that fetch before the
/// next tick.
#[derive(Debug, Clone)]
pub struct Poller {
    scheduler: Scheduler,
    aggregator: Aggregator,
    refs: ReferenceSet,
    state: PollState,
}

impl Poller {
    pub fn new(refs: ReferenceSet, daily_limit: u32) -> Self {
        Self {
            scheduler: Scheduler::new(daily_limit),
            aggregator: Aggregator::new(),
            refs,
            state: PollState::default(),
        }
    }

    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Decision {
        self.scheduler.tick(now, self.state.updated)
    }

    /// Apply the result of a fetch made at the request of `tick`.
    ///
    /// Failures only change the state and error message, never the buffers or indexes.
    pub fn complete<Tz: TimeZone>(&mut self, result: Result<i64, ClientError>, now: &DateTime<Tz>) {
        match result {
            Ok(et0) => {
                self.aggregator.record(et0, now.date_naive(), &self.refs);

                let ts = now.timestamp();
                self.state = PollState {
                    state: State::Active,
                    error: None,
                    updated: Some(ts - i64::from(now.num_seconds_from_midnight())),
                    received: Some(ts),
                };
                self.scheduler.resolved();
            }
            Err(e) => {
                self.state.state = if e.is_transport() { State::Failed } else { State::Error };
                self.state.error = Some(e.to_string());
            }
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn report(&self) -> Report {
        Report {
            poll: self.state.clone(),
            refs: self.refs,
            totals: self.aggregator.totals(),
            indexes: self.aggregator.indexes(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Decision, Poller, Scheduler, State, RETRY_SPACING_SECS};
    use crate::client::ClientError;
    use crate::index::{IndexSelection, ReferenceSet};
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use reqwest::{StatusCode, Url};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn poller() -> Poller {
        Poller::new(ReferenceSet::new(2100).unwrap(), 16)
    }

    fn unavailable() -> ClientError {
        ClientError::Unexpected(
            StatusCode::SERVICE_UNAVAILABLE,
            Url::parse("https://et.water.ca.gov/api/data").unwrap(),
        )
    }

    #[test]
    fn test_first_tick_fetches_yesterday() {
        let mut sched = Scheduler::new(16);
        let now = at(2024, 7, 10, 0, 30, 0);

        assert_eq!(Decision::Fetch(day(2024, 7, 9)), sched.tick(&now, None));
        assert_eq!(1, sched.requests_today());
    }

    #[test]
    fn test_same_second_is_ignored() {
        let mut sched = Scheduler::new(16);
        let now = at(2024, 7, 10, 8, 0, 0);

        assert!(matches!(sched.tick(&now, None), Decision::Fetch(_)));
        sched.resolved();
        assert_eq!(Decision::Idle, sched.tick(&now, None));
        assert_eq!(1, sched.requests_today());
    }

    #[test]
    fn test_retry_spacing() {
        let mut sched = Scheduler::new(16);
        let start = at(2024, 7, 10, 8, 0, 0);

        assert!(matches!(sched.tick(&start, None), Decision::Fetch(_)));
        for secs in [1, 60, RETRY_SPACING_SECS - 1] {
            let now = start + Duration::seconds(secs);
            assert_eq!(Decision::Idle, sched.tick(&now, None));
        }

        let now = start + Duration::seconds(RETRY_SPACING_SECS);
        assert!(matches!(sched.tick(&now, None), Decision::Fetch(_)));
        assert_eq!(2, sched.requests_today());
    }

    #[test]
    fn test_resolved_skips_retry_spacing() {
        let mut sched = Scheduler::new(16);
        let start = at(2024, 7, 10, 8, 0, 0);

        assert!(matches!(sched.tick(&start, None), Decision::Fetch(_)));
        sched.resolved();

        let now = start + Duration::seconds(1);
        assert!(matches!(sched.tick(&now, None), Decision::Fetch(_)));
    }

    #[test]
    fn test_updated_today_waits_for_grace_period() {
        let mut sched = Scheduler::new(16);
        let midnight = at(2024, 7, 10, 0, 0, 0).timestamp();

        let now = at(2024, 7, 10, 15, 0, 0);
        assert_eq!(Decision::Idle, sched.tick(&now, Some(midnight)));

        // Next day, but before CIMIS had an hour to compute the daily value
        let now = at(2024, 7, 11, 0, 59, 59);
        assert_eq!(Decision::Idle, sched.tick(&now, Some(midnight)));

        let now = at(2024, 7, 11, 1, 0, 0);
        assert_eq!(Decision::Fetch(day(2024, 7, 10)), sched.tick(&now, Some(midnight)));
    }

    #[test]
    fn test_daily_limit_suspends_once() {
        let mut sched = Scheduler::new(16);
        let start = at(2024, 7, 10, 1, 0, 0);

        for i in 0..16 {
            let now = start + Duration::seconds(i * RETRY_SPACING_SECS);
            assert!(matches!(sched.tick(&now, None), Decision::Fetch(_)), "attempt {}", i + 1);
        }
        assert_eq!(16, sched.requests_today());

        let now = start + Duration::seconds(16 * RETRY_SPACING_SECS);
        assert_eq!(Decision::Suspended { limit: 16 }, sched.tick(&now, None));

        for i in 17..30 {
            let now = start + Duration::seconds(i * RETRY_SPACING_SECS);
            assert_eq!(Decision::Idle, sched.tick(&now, None));
        }
        assert_eq!(16, sched.requests_today());
    }

    #[test]
    fn test_daily_limit_resets_next_day() {
        let mut sched = Scheduler::new(2);
        let first = at(2024, 7, 10, 22, 0, 0);

        assert!(matches!(sched.tick(&first, None), Decision::Fetch(_)));
        let second = first + Duration::seconds(RETRY_SPACING_SECS);
        assert!(matches!(sched.tick(&second, None), Decision::Fetch(_)));
        let third = second + Duration::seconds(RETRY_SPACING_SECS);
        assert_eq!(Decision::Suspended { limit: 2 }, sched.tick(&third, None));

        let next_day = at(2024, 7, 11, 0, 5, 0);
        assert_eq!(Decision::Fetch(day(2024, 7, 10)), sched.tick(&next_day, None));
        assert_eq!(1, sched.requests_today());
    }

    #[test]
    fn test_poller_success() {
        let mut poller = poller();
        let now = at(2024, 7, 10, 1, 30, 15);

        assert!(matches!(poller.tick(&now), Decision::Fetch(_)));
        poller.complete(Ok(105), &now);

        let state = poller.state();
        assert_eq!(State::Active, state.state);
        assert_eq!(None, state.error);
        assert_eq!(Some(now.timestamp()), state.received);
        assert_eq!(Some(at(2024, 7, 10, 0, 0, 0).timestamp()), state.updated);

        let report = poller.report();
        assert_eq!(5, report.indexes.daily);
        assert_eq!(5, report.selected(IndexSelection::Weekly).index);
        assert_eq!(735, report.selected(IndexSelection::Weekly).accumulated);
        // 2024-07-10 is a Wednesday
        assert_eq!(105, poller.aggregator().weekly_slots()[3]);
        assert_eq!(105, poller.aggregator().monthly_slots()[10]);

        // Fresh data, nothing more to do today
        let later = now + Duration::seconds(RETRY_SPACING_SECS * 2);
        assert_eq!(Decision::Idle, poller.tick(&later));
    }

    #[test]
    fn test_poller_http_error_keeps_indexes() {
        let mut poller = poller();
        let first = at(2024, 7, 10, 1, 30, 0);
        poller.tick(&first);
        poller.complete(Ok(600), &first);
        let before = poller.report();

        let next = at(2024, 7, 11, 2, 0, 0);
        assert_eq!(Decision::Fetch(day(2024, 7, 10)), poller.tick(&next));
        poller.complete(Err(unavailable()), &next);

        let after = poller.report();
        assert_eq!(State::Error, after.poll.state);
        assert_eq!(
            Some("HTTP 503 on https://et.water.ca.gov/api/data".to_owned()),
            after.poll.error
        );
        assert_eq!(before.indexes, after.indexes);
        assert_eq!(before.totals, after.totals);
        assert_eq!(before.poll.updated, after.poll.updated);
    }

    #[test]
    fn test_poller_error_then_retry() {
        let mut poller = poller();
        let now = at(2024, 7, 10, 3, 0, 0);

        assert!(matches!(poller.tick(&now), Decision::Fetch(_)));
        poller.complete(Err(ClientError::Rejected("AB123".to_owned())), &now);
        assert_eq!(State::Error, poller.state().state);
        assert!(poller.state().error.as_deref().unwrap().contains("AB123"));

        let soon = now + Duration::seconds(10);
        assert_eq!(Decision::Idle, poller.tick(&soon));

        let later = now + Duration::seconds(RETRY_SPACING_SECS);
        assert!(matches!(poller.tick(&later), Decision::Fetch(_)));
        poller.complete(Ok(300), &later);
        assert_eq!(State::Active, poller.state().state);
        assert_eq!(None, poller.state().error);
    }

    async fn connection_refused() -> ClientError {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/api/data")
            .send()
            .await
            .unwrap_err();
        ClientError::Transport(err)
    }

    #[tokio::test]
    async fn test_poller_transport_error_is_failed() {
        let mut poller = poller();
        let first = at(2024, 7, 10, 1, 30, 0);
        poller.tick(&first);
        poller.complete(Ok(600), &first);
        let before = poller.report();

        let next = at(2024, 7, 11, 2, 0, 0);
        assert_eq!(Decision::Fetch(day(2024, 7, 10)), poller.tick(&next));
        poller.complete(Err(connection_refused().await), &next);

        let after = poller.report();
        assert_eq!(State::Failed, after.poll.state);
        assert_eq!("f", after.poll.state.token());
        assert!(after.poll.error.as_deref().unwrap().starts_with("cannot connect, "));
        assert_eq!(before.indexes, after.indexes);
        assert_eq!(before.totals, after.totals);
        assert_eq!(before.poll.received, after.poll.received);
    }

    #[test]
    fn test_unknown_until_first_result() {
        let poller = poller();
        assert_eq!(State::Unknown, poller.state().state);
        assert_eq!("u", poller.state().state.token());
        assert_eq!(None, poller.state().received);
    }
}
