//! Command-line configuration for `dissect_pcap`.

use crate::session::{Registry, SessionError};
use crate::walk::WalkLimits;
use std::path::PathBuf;

pub const USAGE: &str = "usage: dissect_pcap [--verbose|-v] [--dump[=PATH]] [--frame=N] [--port=PORT:PROTO]... [--max-depth=N] CAPTURE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{}", USAGE)]
    Help,
    #[error("missing capture file\n{}", USAGE)]
    MissingCapture,
    #[error("invalid value for {flag}: {value:?}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unknown option: {0}")]
    UnknownFlag(String),
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub capture: PathBuf,
    pub verbose: bool,
    /// Dump destination; `-` is stdout.
    pub dump: Option<PathBuf>,
    /// Only dump this frame (all frames are still dissected, for matching).
    pub frame: Option<u32>,
    /// Extra `port → protocol` routes, applied after the defaults.
    pub ports: Vec<(u16, String)>,
    pub limits: WalkLimits,
}

fn parse_value<T: std::str::FromStr>(flag: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue { flag, value: value.to_string() })
}

impl Config {
    pub fn from_args<I>(args: I) -> Result<Config, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut capture = None;
        let mut verbose = false;
        let mut dump = None;
        let mut frame = None;
        let mut ports = Vec::new();
        let mut limits = WalkLimits::default();

        for arg in args {
            if arg == "--help" || arg == "-h" {
                return Err(ConfigError::Help);
            } else if arg == "--verbose" || arg == "-v" {
                verbose = true;
            } else if arg == "--dump" {
                dump = Some(PathBuf::from("-"));
            } else if let Some(p) = arg.strip_prefix("--dump=") {
                dump = Some(PathBuf::from(p));
            } else if let Some(n) = arg.strip_prefix("--frame=") {
                frame = Some(parse_value("--frame", n)?);
            } else if let Some(n) = arg.strip_prefix("--max-depth=") {
                limits.max_depth = parse_value("--max-depth", n)?;
            } else if let Some(mapping) = arg.strip_prefix("--port=") {
                let (port, proto) = mapping
                    .split_once(':')
                    .filter(|(_, proto)| !proto.is_empty())
                    .ok_or_else(|| ConfigError::InvalidValue { flag: "--port", value: mapping.to_string() })?;
                ports.push((parse_value("--port", port)?, proto.to_string()));
            } else if arg.starts_with('-') && arg != "-" {
                return Err(ConfigError::UnknownFlag(arg));
            } else if capture.is_none() {
                capture = Some(PathBuf::from(arg));
            } else {
                return Err(ConfigError::UnexpectedArgument(arg));
            }
        }

        Ok(Config { capture: capture.ok_or(ConfigError::MissingCapture)?, verbose, dump, frame, ports, limits })
    }

    /// Add the port overrides to `registry`.
    pub fn apply_ports(&self, registry: &mut Registry) -> Result<(), SessionError> {
        for (port, proto) in &self.ports {
            registry.map_port(*port, proto)?;
        }
        Ok(())
    }

    /// Whether frame `frame` goes to the dump.
    pub fn dumps_frame(&self, frame: u32) -> bool {
        self.dump.is_some() && self.frame.map_or(true, |f| f == frame)
    }
}
