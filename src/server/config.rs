//! Server configuration
//!
//! Loaded once at startup from a YAML file (or standard input when the
//! configured path is the literal `stdin`); never reloaded. Invalid
//! configuration is fatal and makes the process exit nonzero.
//!
//! ```yaml
//! rtspPort: 8554
//! rtpPort: 8000
//! rtcpPort: 8001
//! pprof: false
//! paths:
//!   cam:
//!     source: record
//!   relayed:
//!     source: rtsp://upstream:8554/feed
//!     sourceProtocol: udp
//! ```

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::transport::StreamProtocol;

/// Default configuration file path; `stdin` reads YAML from standard input.
pub const DEFAULT_CONF_PATH: &str = "rtsp-simple-server.yml";

/// A `source` value of `"record"` means "accept a publisher"; anything else
/// is dialed as an upstream RTSP URL.
pub const SOURCE_RECORD: &str = "record";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// RTSP control port.
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    /// UDP port receiving/sending RTP. Must be even.
    #[serde(default = "default_rtp_port")]
    pub rtp_port: u16,
    /// UDP port receiving/sending RTCP. Must be `rtpPort + 1`.
    #[serde(default = "default_rtcp_port")]
    pub rtcp_port: u16,
    /// Serve the introspection endpoint.
    #[serde(default)]
    pub pprof: bool,
    /// Stream paths. Entries with an upstream URL spawn source workers.
    #[serde(default)]
    pub paths: HashMap<String, PathConfig>,
}

/// Per-path configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PathConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub source_protocol: SourceProtocol,
}

/// Preferred transport a source worker negotiates with its upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProtocol {
    #[default]
    Udp,
    Tcp,
}

impl From<SourceProtocol> for StreamProtocol {
    fn from(p: SourceProtocol) -> Self {
        match p {
            SourceProtocol::Udp => StreamProtocol::Udp,
            SourceProtocol::Tcp => StreamProtocol::Tcp,
        }
    }
}

impl PathConfig {
    /// Whether this path accepts a publisher instead of pulling upstream.
    pub fn is_record(&self) -> bool {
        self.source == SOURCE_RECORD
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rtsp_port: default_rtsp_port(),
            rtp_port: default_rtp_port(),
            rtcp_port: default_rtcp_port(),
            pprof: false,
            paths: HashMap::new(),
        }
    }
}

impl Config {
    /// Load and validate. `path == "stdin"` reads from standard input.
    pub fn load(path: &str) -> Result<Config> {
        let raw = if path == "stdin" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| Error::Config(format!("reading stdin: {}", e)))?;
            buf
        } else {
            std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("reading '{}': {}", path, e)))?
        };
        Self::parse(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn parse(raw: &str) -> Result<Config> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rtp_port % 2 != 0 {
            return Err(Error::Config("rtp port must be even".to_string()));
        }
        if self.rtcp_port != self.rtp_port + 1 {
            return Err(Error::Config("rtcp port must be rtp port + 1".to_string()));
        }
        for (name, path) in &self.paths {
            if name.is_empty() {
                return Err(Error::Config("path name can not be empty".to_string()));
            }
            if name.contains('/') {
                return Err(Error::Config(format!(
                    "path name '{}' can not contain '/'",
                    name
                )));
            }
            if !path.is_record() {
                let url = url::Url::parse(&path.source)
                    .map_err(|e| Error::Config(format!("path '{}' source: {}", name, e)))?;
                if url.scheme() != "rtsp" {
                    return Err(Error::Config(format!(
                        "path '{}' source must be 'record' or an rtsp:// url",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_rtsp_port() -> u16 {
    8554
}

fn default_rtp_port() -> u16 {
    8000
}

fn default_rtcp_port() -> u16 {
    8001
}

fn default_source() -> String {
    SOURCE_RECORD.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.rtsp_port, 8554);
        assert_eq!(config.rtp_port, 8000);
        assert_eq!(config.rtcp_port, 8001);
        assert!(!config.pprof);
        assert!(config.paths.is_empty());
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::parse(
            "rtspPort: 8555\n\
             rtpPort: 8100\n\
             rtcpPort: 8101\n\
             pprof: true\n\
             paths:\n\
             \x20 cam:\n\
             \x20   source: record\n\
             \x20 relay:\n\
             \x20   source: rtsp://up:8554/feed\n\
             \x20   sourceProtocol: tcp\n",
        )
        .unwrap();

        assert_eq!(config.rtsp_port, 8555);
        assert!(config.pprof);
        assert!(config.paths["cam"].is_record());
        let relay = &config.paths["relay"];
        assert!(!relay.is_record());
        assert_eq!(relay.source, "rtsp://up:8554/feed");
        assert_eq!(relay.source_protocol, SourceProtocol::Tcp);
    }

    #[test]
    fn test_source_protocol_defaults_to_udp() {
        let config =
            Config::parse("paths:\n  relay:\n    source: rtsp://up/feed\n").unwrap();
        assert_eq!(config.paths["relay"].source_protocol, SourceProtocol::Udp);
    }

    #[test]
    fn test_rejects_odd_rtp_port() {
        assert!(Config::parse("rtpPort: 8001\nrtcpPort: 8002\n").is_err());
    }

    #[test]
    fn test_rejects_non_adjacent_rtcp_port() {
        assert!(Config::parse("rtpPort: 8000\nrtcpPort: 8005\n").is_err());
    }

    #[test]
    fn test_rejects_bad_path_names_and_sources() {
        assert!(Config::parse("paths:\n  a/b:\n    source: record\n").is_err());
        assert!(Config::parse("paths:\n  x:\n    source: http://up/feed\n").is_err());
        assert!(Config::parse("paths:\n  x:\n    source: ':bad:'\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(Config::parse("rtspPortt: 8554\n").is_err());
    }
}
