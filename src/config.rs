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

use crate::error::ChannelizerResult;
use clap::Parser;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about, long_about)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, env = "CHAND_CONFIG")]
    config: Option<PathBuf>,
    /// CPU core to pin the receiver thread to
    #[arg(long, env = "CHAND_RECEIVER_CPU")]
    receiver_cpu: Option<usize>,
}

impl Args {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8870,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    pub addr: Ipv4Addr,
    pub port: u16,
}

/// Channelization layout: total FFT width, how many of those channels are
/// actually usable (the rest fall in the oversampling guard band), and how
/// many polyphase foldings the filter bank applies.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    pub total: u32,
    pub usable: u32,
    pub foldings: u32,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            total: 256,
            usable: 230,
            foldings: 7,
        }
    }
}

/// Beam-level RF parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeamSpec {
    pub src: u32,
    pub pol: u8,
    pub freq: f64,
    pub bandwidth: f64,
    pub oversampling: f64,
}

impl Default for BeamSpec {
    fn default() -> Self {
        Self {
            src: 0,
            pol: 0,
            freq: 1420.0,
            bandwidth: 104.8576,
            oversampling: 0.203125,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub channels: ChannelSpec,
    #[serde(default)]
    pub beam: BeamSpec,
    #[serde(default = "default_channel_src")]
    pub channel_src: u32,
    pub input: HostSpec,
    pub output: HostSpec,
    #[serde(default = "default_interface_ip")]
    pub interface_ip: IpAddr,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_decimation")]
    pub decimation: u32,
    #[serde(default)]
    pub swap_inputs: bool,
    /// Start-of-data collection time, in whole seconds. `None` means "idle
    /// forever until an explicit start command arrives" rather than relying
    /// on a magic sentinel value.
    #[serde(default)]
    pub start_time_sec: Option<i64>,
    #[serde(default)]
    pub filter_file: Option<PathBuf>,
    #[serde(default)]
    pub webserver: WebServerConfig,
    #[serde(skip)]
    pub receiver_cpu: Option<usize>,
}

fn default_name() -> String {
    format!("chan-{}", gethostname().to_string_lossy())
}

fn default_interface_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_workers() -> u32 {
    1
}

fn default_decimation() -> u32 {
    1
}

fn default_channel_src() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            channels: ChannelSpec::default(),
            beam: BeamSpec::default(),
            channel_src: default_channel_src(),
            input: HostSpec {
                addr: Ipv4Addr::new(226, 1, 50, 1),
                port: 50000,
            },
            output: HostSpec {
                addr: Ipv4Addr::new(227, 1, 1, 1),
                port: 51000,
            },
            interface_ip: default_interface_ip(),
            workers: default_workers(),
            decimation: default_decimation(),
            swap_inputs: false,
            start_time_sec: None,
            filter_file: None,
            webserver: WebServerConfig::default(),
            receiver_cpu: None,
        }
    }
}

impl Config {
    #[instrument]
    pub async fn load() -> ChannelizerResult<Config> {
        let args = Args::parse();

        info!("Loading config …");

        let mut config = Config::load_from_file(args.config_path()).await?;
        config.receiver_cpu = args.receiver_cpu;
        Ok(config)
    }

    #[instrument]
    async fn load_from_file(path: Option<&Path>) -> ChannelizerResult<Config> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(&path).await?;
                let config = serde_yaml::from_str(&content)?;
                info!("Config loaded from {}", path.to_string_lossy());
                Ok(config)
            }
            None => {
                let path = if cfg!(debug_assertions) {
                    let it = "./config-dev.yaml";
                    warn!("No config file specified, using {it}");
                    it
                } else {
                    let it = "/etc/chand/config.yaml";
                    warn!("No config file specified, using {it}");
                    it
                };
                match fs::read_to_string(path).await {
                    Ok(it) => {
                        let config = serde_yaml::from_str(&it)?;
                        info!("Config loaded from {path}");
                        Ok(config)
                    }
                    Err(_) => {
                        warn!("Could not read config file {path}, using default config.");
                        Ok(Config::default())
                    }
                }
            }
        }
    }

    /// Overlap channel count; must be even (see `dfb::consumed`/`dfb::threshold`).
    pub fn overlap(&self) -> u32 {
        (self.channels.total as f64 * self.beam.oversampling).round() as u32
    }

    pub fn validate(&self) -> ChannelizerResult<()> {
        if self.overlap() % 2 != 0 {
            return Err(crate::error::ChannelizerError::InvalidConfig(format!(
                "overlap ({}) must be even; adjust totalChannels or oversampling",
                self.overlap()
            )));
        }
        if self.channels.usable > self.channels.total {
            return Err(crate::error::ChannelizerError::InvalidConfig(
                "usable channels cannot exceed total channels".to_owned(),
            ));
        }
        if self.workers == 0 {
            return Err(crate::error::ChannelizerError::InvalidConfig(
                "at least one worker is required".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn odd_overlap_is_rejected() {
        let mut cfg = Config::default();
        cfg.channels.total = 101;
        cfg.beam.oversampling = 0.5; // overlap = round(50.5) = 51, odd
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn usable_over_total_is_rejected() {
        let mut cfg = Config::default();
        cfg.channels.usable = cfg.channels.total + 1;
        assert!(cfg.validate().is_err());
    }
}
