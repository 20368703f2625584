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

use std::error;
use std::fmt;
use std::str::FromStr;

const DAYS_PER_WEEK: i64 = 7;
const DAYS_PER_MONTH: i64 = 31;

/// Largest Et0 value accepted anywhere, in hundredths of an inch.
///
/// Keeps every sum and percentage computed from up to 31 days of readings well
/// inside `i64`.
pub const MAX_ET0: i64 = i32::MAX as i64;

/// Which of the three computed indexes is reported as "the" index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IndexSelection {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl IndexSelection {
    pub const ALL: [IndexSelection; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Lowercase name, used as a metric label value.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for IndexSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "Daily"),
            Self::Weekly => write!(f, "Weekly"),
            Self::Monthly => write!(f, "Monthly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSelection(pub String);

impl fmt::Display for UnknownSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown index type {} (expected daily, weekly, or monthly)", self.0)
    }
}

impl error::Error for UnknownSelection {}

impl FromStr for IndexSelection {
    type Err = UnknownSelection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("daily") {
            Ok(Self::Daily)
        } else if s.eq_ignore_ascii_case("weekly") {
            Ok(Self::Weekly)
        } else if s.eq_ignore_ascii_case("monthly") {
            Ok(Self::Monthly)
        } else {
            Err(UnknownSelection(s.to_owned()))
        }
    }
}

/// Baseline Et0 values that indexes are computed against, in hundredths of an inch.
///
/// Only the daily reference is configured. The weekly and monthly references are
/// always derived from it so they stay exact multiples of the daily value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSet {
    daily: i64,
}

impl ReferenceSet {
    /// Create a new `ReferenceSet` from a daily reference, or `None` if the
    /// reference is not strictly positive or is larger than `MAX_ET0`.
    pub fn new(daily: i64) -> Option<Self> {
        if daily > 0 && daily <= MAX_ET0 {
            Some(Self { daily })
        } else {
            None
        }
    }

    pub fn daily(&self) -> i64 {
        self.daily
    }

    pub fn weekly(&self) -> i64 {
        self.daily * DAYS_PER_WEEK
    }

    pub fn monthly(&self) -> i64 {
        self.daily * DAYS_PER_MONTH
    }

    pub fn get(&self, selection: IndexSelection) -> i64 {
        match selection {
            IndexSelection::Daily => self.daily(),
            IndexSelection::Weekly => self.weekly(),
            IndexSelection::Monthly => self.monthly(),
        }
    }
}
