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

use crate::index::MAX_ET0;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::error;
use std::fmt;

const SUPPORT_ID_MARKER: &str = "Your support ID is: ";
const ET0_POINTER: &str = "/Data/Providers/0/Records/0/DayEto/Value";

#[derive(Debug)]
pub enum ClientError {
    Transport(reqwest::Error),
    Unexpected(StatusCode, Url),
    Rejected(String),
    Syntax(serde_json::Error),
    NoData,
    MissingEt0,
    InvalidEt0(String),
}

impl ClientError {
    /// True if the request never produced a response from CIMIS.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short, stable name for the kind of failure, suitable for a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Unexpected(_, _) => "http",
            Self::Rejected(_) => "rejected",
            Self::Syntax(_) | Self::NoData | Self::MissingEt0 | Self::InvalidEt0(_) => "parse",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "cannot connect, {}", e),
            Self::Unexpected(status, url) => write!(f, "HTTP {} on {}", status.as_u16(), url),
            Self::Rejected(id) => write!(f, "REQUEST REJECTED, ID {}", id),
            Self::Syntax(e) => write!(f, "JSON syntax error {}", e),
            Self::NoData => write!(f, "no data"),
            Self::MissingEt0 => write!(f, "no daily Et0 found"),
            Self::InvalidEt0(v) => write!(f, "invalid daily Et0 {}", v),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Syntax(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for the daily Et0 of a single CIMIS station.
///
/// Redirects are followed by the underlying `reqwest::Client` according to its
/// redirect policy. The application key is only ever put into request URLs, never
/// into logs or error messages.
#[derive(Debug)]
pub struct CimisClient {
    client: Client,
    base_url: Url,
    app_key: String,
    station: String,
}

impl CimisClient {
    const USER_AGENT: &'static str = "CIMIS Index (https://github.com/56quarters/cimis_index)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new<K, S>(client: Client, base_url: Url, app_key: K, station: S) -> Self
    where
        K: Into<String>,
        S: Into<String>,
    {
        CimisClient {
            client,
            base_url,
            app_key: app_key.into(),
            station: station.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    /// Fetch the daily Et0 for `date`, in hundredths of an inch.
    pub async fn daily_et0(&self, date: NaiveDate) -> Result<i64, ClientError> {
        let request_url = self.request_url(date);
        tracing::debug!(message = "making daily Et0 request", url = %self.base_url, station = %self.station, date = %date);

        let res = self
            .client
            .get(request_url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Transport)?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ClientError::Unexpected(status, self.base_url.clone()));
        }

        let body = res.text().await.map_err(ClientError::Transport)?;
        tracing::debug!(message = "received daily Et0 response", num_bytes = body.len(), body = %body);
        parse_et0(&body)
    }

    fn request_url(&self, date: NaiveDate) -> Url {
        let day = date.format("%Y-%m-%d").to_string();
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("appkey", &self.app_key)
            .append_pair("targets", &self.station)
            .append_pair("startDate", &day)
            .append_pair("endDate", &day)
            .append_pair("dataItems", "day-eto");

        url
    }
}

/// Extract the daily Et0, in hundredths of an inch, from a CIMIS response body.
///
/// CIMIS rejects some requests with an HTML page instead of JSON. That page carries a
/// support ID which is returned as `ClientError::Rejected` so that it can be logged
/// while it is still valid.
pub fn parse_et0(body: &str) -> Result<i64, ClientError> {
    if let Some(id) = support_id(body) {
        return Err(ClientError::Rejected(id.to_owned()));
    }

    let doc: Value = serde_json::from_str(body).map_err(ClientError::Syntax)?;
    let empty = match &doc {
        Value::Null => true,
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    };

    if empty {
        return Err(ClientError::NoData);
    }

    let raw = match doc.pointer(ET0_POINTER) {
        None | Some(Value::Null) => return Err(ClientError::MissingEt0),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    };

    convert_et0(&raw).ok_or(ClientError::InvalidEt0(raw))
}

/// Convert a decimal Et0 in inches to hundredths of an inch, rounding half away from zero.
///
/// Returns `None` for anything that isn't a finite, non-negative number or that would
/// be larger than `MAX_ET0` hundredths.
pub fn convert_et0(input: &str) -> Option<i64> {
    let v: f64 = input.trim().parse().ok()?;
    if !v.is_finite() || v < 0.0 {
        return None;
    }

    let hundredths = (v * 100.0).round();
    if hundredths > MAX_ET0 as f64 {
        return None;
    }

    Some(hundredths as i64)
}

fn support_id(body: &str) -> Option<&str> {
    let start = body.find(SUPPORT_ID_MARKER)? + SUPPORT_ID_MARKER.len();
    let rest = &body[start..];
    let end = rest.find('<')?;
    let id = rest[..end].trim();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
