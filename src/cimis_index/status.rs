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

use crate::index::IndexSelection;
use crate::poll::Report;
use serde::Serialize;
use tokio::sync::watch;

const PROVIDER_NAME: &str = "cimis";

/// Latest poll report along with the index currently selected for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub report: Report,
    pub selection: IndexSelection,
}

/// Shared, always current `Status`.
///
/// The polling task publishes a new report after every cycle and HTTP handlers
/// change the selection. Readers always get a consistent copy of both.
#[derive(Debug)]
pub struct StatusBoard {
    tx: watch::Sender<Status>,
}

impl StatusBoard {
    pub fn new(report: Report, selection: IndexSelection) -> Self {
        let (tx, _) = watch::channel(Status { report, selection });
        Self { tx }
    }

    pub fn publish(&self, report: Report) {
        self.tx.send_modify(|s| s.report = report);
    }

    pub fn select(&self, selection: IndexSelection) {
        self.tx.send_modify(|s| s.selection = selection);
    }

    pub fn snapshot(&self) -> Status {
        self.tx.borrow().clone()
    }
}

/// Static facts about this service that appear in every status document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub host: String,
    pub proxy: String,
    pub origin: String,
    pub priority: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusDocument {
    pub host: String,
    pub proxy: String,
    pub timestamp: i64,
    pub waterindex: WaterIndex,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WaterIndex {
    pub status: IndexStatus,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub origin: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub value: Option<IndexValue>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexValue {
    pub index: i64,
    pub received: i64,
    pub updated: i64,
    pub priority: u32,
    pub et0: i64,
    #[serde(rename = "et0Reference")]
    pub et0_reference: i64,
}

impl StatusDocument {
    /// Render the status of the selected index at Unix time `timestamp`.
    ///
    /// Values are only included when no error is recorded, otherwise just the error is.
    pub fn render(status: &Status, info: &ServiceInfo, timestamp: i64) -> Self {
        let poll = &status.report.poll;
        let value = match poll.error {
            Some(_) => None,
            None => {
                let selected = status.report.selected(status.selection);
                Some(IndexValue {
                    index: selected.index,
                    received: poll.received.unwrap_or(0),
                    updated: poll.updated.unwrap_or(0),
                    priority: info.priority,
                    et0: selected.accumulated,
                    et0_reference: selected.reference,
                })
            }
        };

        StatusDocument {
            host: info.host.clone(),
            proxy: info.proxy.clone(),
            timestamp,
            waterindex: WaterIndex {
                status: IndexStatus {
                    name: PROVIDER_NAME.to_owned(),
                    type_: status.selection.to_string(),
                    origin: info.origin.clone(),
                    state: poll.state.token().to_owned(),
                    error: poll.error.clone(),
                    value,
                },
            },
        }
    }
}
