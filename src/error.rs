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

use axum::{http::StatusCode, response::IntoResponse};
use miette::Diagnostic;
use std::io;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing_subscriber::{filter::ParseError, util::TryInitError};

/// Recoverable and startup errors. The two conditions the design calls fatal
/// (`NO_BUFFER_AVAIL`, `NO_PACKET_VECTOR`) are not represented here: they end
/// the process via `panic!` at the point of detection, see [`crate::beam`].
#[derive(Error, Debug, Diagnostic)]
pub enum ChannelizerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("JSON serde error: {0}")]
    JsonSerdeError(#[from] serde_json::Error),
    #[error("Tracing init error: {0}")]
    TryInitError(#[from] TryInitError),
    #[error("Tracing config parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("API error.")]
    ApiError(#[from] oneshot::error::RecvError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Packet protocol version did not match the configured version while
    /// the beam was in state PENDING. Transitions the beam to IDLE.
    #[error("packet protocol version mismatch")]
    Ipv,
    /// A packet's absolute time was already past the configured start time
    /// and the beam never saw an earlier waiting packet. Logged; the packet
    /// itself is dropped uncounted and the beam starts on the next one.
    #[error("start time already passed")]
    Stap,
    #[error("general error: {0}")]
    Other(String),
}

impl IntoResponse for ChannelizerError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{self}")).into_response()
    }
}

pub type ChannelizerResult<T> = Result<T, ChannelizerError>;
