/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The control plane: a small axum status/control API running on the tokio
//! runtime, talking to the OS-thread hot path only through `Beam`'s own
//! locks. `ChannelizerApi` is the thin actor handle the HTTP layer drives
//! and, if embedded, a future CLI or test harness can drive directly.

use crate::beam::{Beam, BeamState};
use crate::config::WebServerConfig;
use crate::stats::BeamStatistics;
use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub stats: BeamStatistics,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartRequest {
    pub start_time_sec: Option<i64>,
    pub center_freq: Option<f64>,
}

enum ControlMessage {
    Start(StartRequest, oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Status(oneshot::Sender<StatusResponse>),
}

/// Handle cloned into every axum handler; the actual beam mutation happens
/// on a dedicated control task so handlers never touch `Beam` directly.
#[derive(Clone)]
pub struct ChannelizerApi {
    tx: mpsc::Sender<ControlMessage>,
}

impl ChannelizerApi {
    pub fn spawn(beam: Arc<Beam>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(control_actor(beam, rx));
        Self { tx }
    }

    pub async fn start(&self, req: StartRequest) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(ControlMessage::Start(req, resp_tx)).await.is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub async fn stop(&self) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(ControlMessage::Stop(resp_tx)).await.is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub async fn status(&self) -> Option<StatusResponse> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(ControlMessage::Status(resp_tx)).await.ok()?;
        resp_rx.await.ok()
    }
}

async fn control_actor(beam: Arc<Beam>, mut rx: mpsc::Receiver<ControlMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ControlMessage::Start(req, resp) => {
                beam.start(req.start_time_sec, req.center_freq);
                let _ = resp.send(());
            }
            ControlMessage::Stop(resp) => {
                beam.stop();
                let _ = resp.send(());
            }
            ControlMessage::Status(resp) => {
                let stats = beam.stats_snapshot();
                let state = format_state(beam.state());
                let _ = resp.send(StatusResponse { state, stats });
            }
        }
    }
}

fn format_state(state: BeamState) -> String {
    match state {
        BeamState::Pending => "pending",
        BeamState::Running => "running",
        BeamState::Idle => "idle",
    }
    .to_owned()
}

fn router(api: ChannelizerApi) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .with_state(api)
}

async fn status_handler(State(api): State<ChannelizerApi>) -> Json<Option<StatusResponse>> {
    Json(api.status().await)
}

async fn start_handler(State(api): State<ChannelizerApi>, body: Option<Json<StartRequest>>) {
    api.start(body.map(|Json(b)| b).unwrap_or_default()).await;
}

async fn stop_handler(State(api): State<ChannelizerApi>) {
    api.stop().await;
}

#[instrument(skip(subsys, api))]
pub fn start_webserver(subsys: &SubsystemHandle, config: WebServerConfig, api: ChannelizerApi) {
    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new("webserver", move |s| {
        run_webserver(s, config, api)
    }));
}

async fn run_webserver(
    subsys: SubsystemHandle,
    config: WebServerConfig,
    api: ChannelizerApi,
) -> crate::error::ChannelizerResult<()> {
    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(addr).await?;
    info!("control API listening on {addr}");

    let app = router(api).layer(tower_http::trace::TraceLayer::new_for_http());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { subsys.on_shutdown_requested().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn status_reflects_beam_state() {
        let cfg = Config::default();
        let (work_tx, _work_rx) = crossbeam::channel::unbounded();
        let beam = Arc::new(Beam::new(&cfg, 1 << 16, work_tx));
        let api = ChannelizerApi::spawn(beam);

        let status = api.status().await.unwrap();
        assert_eq!(status.state, "idle");

        api.start(StartRequest { start_time_sec: None, center_freq: None }).await;
        let status = api.status().await.unwrap();
        assert_eq!(status.state, "pending");
    }
}
