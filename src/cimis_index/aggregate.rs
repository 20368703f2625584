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

use crate::index::{IndexSelection, ReferenceSet};
use chrono::{Datelike, NaiveDate};

const WEEKLY_SLOTS: usize = 7;
const MONTHLY_SLOTS: usize = 32;
const LAST_DAY_OF_MONTH: usize = 31;

/// Sums of the rolling buffers, in hundredths of an inch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
}

/// Percentages of accumulated Et0 relative to the matching reference.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Indexes {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
}

/// The reference, accumulated Et0, and index for a single `IndexSelection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub reference: i64,
    pub accumulated: i64,
    pub index: i64,
}

impl Totals {
    pub fn get(&self, selection: IndexSelection) -> i64 {
        match selection {
            IndexSelection::Daily => self.daily,
            IndexSelection::Weekly => self.weekly,
            IndexSelection::Monthly => self.monthly,
        }
    }
}

impl Indexes {
    pub fn get(&self, selection: IndexSelection) -> i64 {
        match selection {
            IndexSelection::Daily => self.daily,
            IndexSelection::Weekly => self.weekly,
            IndexSelection::Monthly => self.monthly,
        }
    }
}

/// Rolling per-weekday and per-day-of-month Et0 buffers.
///
/// Slots are indexed by calendar position and overwritten as days recur rather than
/// cleared between cycles. Unobserved (zero) slots count as the latest observation
/// when totals are computed, so early in a week or month the weekly and monthly
/// indexes lean toward the most recent value instead of undercounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregator {
    weekly: [i64; WEEKLY_SLOTS],
    monthly: [i64; MONTHLY_SLOTS],
    last_day: Option<u32>,
    totals: Totals,
    indexes: Indexes,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            weekly: [0; WEEKLY_SLOTS],
            monthly: [0; MONTHLY_SLOTS],
            last_day: None,
            totals: Totals::default(),
            indexes: Indexes::default(),
        }
    }

    /// Record a daily Et0 observation (hundredths of an inch) made on the given local
    /// date and recompute all totals and indexes from the buffers.
    pub fn record(&mut self, et0: i64, date: NaiveDate, refs: &ReferenceSet) {
        let day = date.day();
        self.weekly[date.weekday().num_days_from_sunday() as usize] = et0;
        self.monthly[day as usize] = et0;

        // A new month started: the 31st from two months ago must not linger
        // into a month that might not have one.
        if matches!(self.last_day, Some(last) if day < last) {
            self.monthly[LAST_DAY_OF_MONTH] = 0;
        }
        self.last_day = Some(day);

        let weekly = Self::accumulate(&self.weekly, et0);
        let monthly = Self::accumulate(&self.monthly[1..], et0);

        self.totals = Totals {
            daily: et0,
            weekly,
            monthly,
        };

        self.indexes = Indexes {
            daily: 100 * et0 / refs.daily(),
            weekly: 100 * weekly / refs.weekly(),
            monthly: 100 * monthly / refs.monthly(),
        };
    }

    fn accumulate(slots: &[i64], fallback: i64) -> i64 {
        slots.iter().map(|&v| if v > 0 { v } else { fallback }).sum()
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn indexes(&self) -> Indexes {
        self.indexes
    }

    pub fn weekly_slots(&self) -> &[i64] {
        &self.weekly
    }

    pub fn monthly_slots(&self) -> &[i64] {
        &self.monthly
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
