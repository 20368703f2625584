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

use chrono::Local;
use cimis_index::client::{convert_et0, CimisClient, ClientError};
use cimis_index::http::RequestContext;
use cimis_index::index::{IndexSelection, ReferenceSet};
use cimis_index::metrics::IndexMetrics;
use cimis_index::poll::{Decision, Poller, DEFAULT_DAILY_LIMIT};
use cimis_index::status::{ServiceInfo, StatusBoard};
use clap::Parser;
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use std::env;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://et.water.ca.gov/api/data";
const DEFAULT_STATION: &str = "0";
const DEFAULT_REFERENCE: &str = "21.00";
const DEFAULT_PRIORITY: u32 = 9;
const DEFAULT_HOST: &str = "localhost";
const TICK_MILLIS: u64 = 1000;

#[derive(Debug, Parser)]
#[clap(name = "cimis_index", version = clap::crate_version!())]
struct CimisIndexApplication {
    /// CIMIS application key used for all requests
    #[clap(long)]
    key: String,

    /// CIMIS station number to fetch the daily Et0 for
    #[clap(long, default_value_t = DEFAULT_STATION.into())]
    station: String,

    /// Daily reference Et0 in inches. Indexes are percentages of this value (or seven and
    /// 31 times this value for weekly and monthly indexes).
    #[clap(long, default_value_t = DEFAULT_REFERENCE.into())]
    reference: String,

    /// Index reported by the status endpoint. Allowed values are 'daily', 'weekly', and
    /// 'monthly' (case insensitive)
    #[clap(long, default_value_t = IndexSelection::default())]
    index: IndexSelection,

    /// Priority of this index relative to other watering index sources, must be at least 1
    #[clap(long, default_value_t = DEFAULT_PRIORITY)]
    priority: u32,

    /// Maximum number of requests made to CIMIS per day, successful or not
    #[clap(long, default_value_t = DEFAULT_DAILY_LIMIT)]
    daily_limit: u32,

    /// Base URL for the CIMIS data API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Host name reported in status documents. Defaults to $HOSTNAME
    #[clap(long)]
    host: Option<String>,

    /// Name of the portal proxying requests to this service, reported in status
    /// documents. Defaults to the host name
    #[clap(long)]
    proxy: Option<String>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Enable debug logging, including full CIMIS responses. Same as '--log-level debug'
    #[clap(short, long)]
    debug: bool,

    /// Timeout for fetching the daily Et0 from the CIMIS API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to. By default, cimis_index will bind to public address since
    /// the purpose is to expose the index to other services on the network.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = CimisIndexApplication::parse();
    let level = if opts.debug { Level::DEBUG } else { opts.log_level };
    tracing::subscriber::set_global_default(tracing_subscriber::FmtSubscriber::builder().with_max_level(level).finish())
        .expect("failed to set tracing subscriber");

    if opts.priority == 0 {
        tracing::error!(message = "invalid index priority, must be at least 1", priority = opts.priority);
        process::exit(2);
    }

    let refs = convert_et0(&opts.reference)
        .and_then(ReferenceSet::new)
        .unwrap_or_else(|| {
            tracing::error!(message = "invalid reference Et0, must be a positive number", reference = %opts.reference);
            process::exit(2)
        });

    let api_url = Url::parse(&opts.api_url).unwrap_or_else(|e| {
        tracing::error!(message = "invalid CIMIS API URL", api_url = %opts.api_url, error = %e);
        process::exit(1)
    });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let host = opts
        .host
        .clone()
        .or_else(|| env::var("HOSTNAME").ok())
        .unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let info = ServiceInfo {
        proxy: opts.proxy.clone().unwrap_or_else(|| host.clone()),
        host,
        origin: api_url.to_string(),
        priority: opts.priority,
    };

    let client = CimisClient::new(http_client, api_url, opts.key.clone(), opts.station.clone());
    let mut poller = Poller::new(refs, opts.daily_limit);
    let board = Arc::new(StatusBoard::new(poller.report(), opts.index));
    let mut registry = Registry::default();
    let metrics = IndexMetrics::new(&mut registry);

    let poll_board = board.clone();
    let mut interval = tokio::time::interval(Duration::from_millis(TICK_MILLIS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::spawn(async move {
        tracing::info!(
            message = "CIMIS polling started",
            api_url = %client.base_url(),
            station = %client.station(),
            reference = refs.daily(),
        );

        loop {
            let _ = interval.tick().await;
            let now = Local::now();

            let date = match poller.tick(&now) {
                Decision::Idle => continue,
                Decision::Suspended { limit } => {
                    tracing::warn!(message = "daily request limit reached, polling suspended", limit = limit);
                    continue;
                }
                Decision::Fetch(date) => date,
            };

            metrics.request();
            tracing::info!(
                message = "requesting daily Et0",
                api_url = %client.base_url(),
                date = %date,
                requests_today = poller.scheduler().requests_today(),
            );

            let result = client
                .daily_et0(date)
                .instrument(tracing::span!(Level::DEBUG, "cimis_daily_et0"))
                .await;

            if let Err(e) = &result {
                metrics.failure(e);
                log_failure(e);
            }

            let success = result.is_ok();
            poller.complete(result, &Local::now());
            let report = poller.report();

            if success {
                metrics.observe(&report);
                tracing::info!(
                    message = "new index",
                    et0 = report.totals.daily,
                    daily = report.indexes.daily,
                    weekly = report.indexes.weekly,
                    monthly = report.indexes.monthly,
                );
            }

            poll_board.publish(report);
        }
    });

    let context = Arc::new(RequestContext::new(registry, board, info));
    let app = cimis_index::http::router(context);
    let server = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "server started", address = %opts.bind);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Log a failed request with the fields relevant to its kind.
fn log_failure(err: &ClientError) {
    match err {
        // Support IDs expire quickly so make sure they stand out
        ClientError::Rejected(id) => {
            tracing::error!(message = "CIMIS rejected the request", support_id = %id);
        }
        ClientError::Transport(e) => {
            tracing::error!(message = "failed to connect to CIMIS", error = %e);
        }
        e => {
            tracing::error!(message = "failed to fetch daily Et0", error = %e);
        }
    }
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
