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

//! Daily watering index from CIMIS reference evapotranspiration
//!
//! ## Features
//!
//! `cimis_index` asks the [CIMIS] API once a day for the reference evapotranspiration (Et0)
//! measured the previous day at a particular station, and turns it into a watering index: a
//! percentage of a configured reference Et0. Three indexes are computed after every update.
//!
//! * Daily - The latest Et0 compared to the daily reference.
//! * Weekly - The Et0 of the last seven days compared to seven times the daily reference.
//! * Monthly - The Et0 of the last 31 days compared to 31 times the daily reference.
//!
//! Days without a measurement (for example, right after starting) count as the latest
//! measurement. One of the three indexes is reported as "the" index by the status endpoint.
//! The weekly index is used by default.
//!
//! The following Prometheus metrics are also emitted after each update.
//!
//! * `cimis_et0_inches` - Latest daily Et0, in inches.
//! * `cimis_index_percent{period=$PERIOD}` - Index for the daily, weekly, or monthly period.
//! * `cimis_accumulated_et0_inches{period=$PERIOD}` - Et0 accumulated over the period, in inches.
//! * `cimis_last_update_timestamp_seconds` - Start of the day of the last update.
//! * `cimis_requests_total` - Requests made to CIMIS.
//! * `cimis_failures_total{reason=$REASON}` - Failed requests by reason.
//!
//! [CIMIS]: https://et.water.ca.gov/Rest/Index
//!
//! ## Build
//!
//! `cimis_index` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/cimis_index.git && cd cimis_index
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Application key and station
//!
//! CIMIS requires an application key, which you get by registering an account on the CIMIS
//! website. You also need the number of a station near you, which you can find on the CIMIS
//! station list. Both must be passed on the command line.
//!
//! ```text
//! ./cimis_index --key YOUR_APP_KEY --station 2
//! ```
//!
//! CIMIS limits how many requests an application key may make. `cimis_index` makes at most one
//! request every five minutes while it doesn't have data for the previous day, and no more than
//! `--daily-limit` requests (16 by default) per day, no matter whether requests succeed.
//!
//! ### Reference and index
//!
//! The daily reference Et0, in inches, is set with `--reference` (`21.00` by default). The index
//! reported by the status endpoint is picked with `--index` (`daily`, `weekly`, or `monthly`)
//! and can be changed at runtime.
//!
//! ```text
//! curl -sS 'http://localhost:9783/cimis/set?index=monthly'
//! ```
//!
//! ### Endpoints
//!
//! * `/cimis/status` - JSON document with the selected index and the health of the service.
//! * `/cimis/set?index=$INDEX` - Select the reported index, then same as `/cimis/status`.
//! * `/metrics` - Prometheus metrics.
//!

pub mod aggregate;
pub mod client;
pub mod http;
pub mod index;
pub mod metrics;
pub mod poll;
pub mod status;
