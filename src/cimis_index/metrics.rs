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

use crate::client::ClientError;
use crate::index::IndexSelection;
use crate::poll::Report;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

const HUNDREDTHS_PER_INCH: f64 = 100.0;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PeriodLabels {
    period: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReasonLabels {
    reason: String,
}

/// Holder for metrics that are set from each poll of CIMIS.
///
/// All metrics are created and registered upon call to `IndexMetrics::new()` and
/// share the prefix "cimis_". Index and accumulated Et0 metrics have a "period"
/// label of "daily", "weekly", or "monthly".
#[derive(Debug)]
pub struct IndexMetrics {
    et0: Gauge<f64, AtomicU64>,
    index: Family<PeriodLabels, Gauge>,
    accumulated: Family<PeriodLabels, Gauge<f64, AtomicU64>>,
    updated: Gauge,
    requests: Counter,
    failures: Family<ReasonLabels, Counter>,
}

impl IndexMetrics {
    /// Create a new `IndexMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let et0 = Gauge::<f64, AtomicU64>::default();
        let index = Family::<PeriodLabels, Gauge>::default();
        let accumulated = Family::<PeriodLabels, Gauge<f64, AtomicU64>>::default();
        let updated = Gauge::default();
        let requests = Counter::default();
        let failures = Family::<ReasonLabels, Counter>::default();

        reg.register("cimis_et0_inches", "Latest daily reference Et0 in inches", et0.clone());
        reg.register(
            "cimis_index_percent",
            "Watering index, accumulated Et0 as a percentage of the reference",
            index.clone(),
        );
        reg.register(
            "cimis_accumulated_et0_inches",
            "Accumulated reference Et0 over the period in inches",
            accumulated.clone(),
        );
        reg.register(
            "cimis_last_update_timestamp_seconds",
            "Start of the day of the last successful update",
            updated.clone(),
        );
        reg.register("cimis_requests", "Requests made to CIMIS", requests.clone());
        reg.register("cimis_failures", "Failed requests to CIMIS by reason", failures.clone());

        Self {
            et0,
            index,
            accumulated,
            updated,
            requests,
            failures,
        }
    }

    /// Count a request issued to CIMIS.
    pub fn request(&self) {
        self.requests.inc();
    }

    /// Count a failed request by the kind of failure.
    pub fn failure(&self, err: &ClientError) {
        self.failures
            .get_or_create(&ReasonLabels {
                reason: err.reason().to_owned(),
            })
            .inc();
    }

    /// Set metrics from a report produced after a successful update.
    pub fn observe(&self, report: &Report) {
        self.et0.set(report.totals.daily as f64 / HUNDREDTHS_PER_INCH);
        if let Some(updated) = report.poll.updated {
            self.updated.set(updated);
        }

        for selection in IndexSelection::ALL {
            let labels = PeriodLabels {
                period: selection.as_label().to_owned(),
            };
            let selected = report.selected(selection);

            self.index.get_or_create(&labels).set(selected.index);
            self.accumulated
                .get_or_create(&labels)
                .set(selected.accumulated as f64 / HUNDREDTHS_PER_INCH);
        }
    }
}
