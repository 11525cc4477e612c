//! The immutable rewrite policy handed to the pipeline.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::{ConfigError, RewriteError};
use crate::frame::{ETHERNET_HEADER_LEN, IPV4_HEADER_LEN};

/// Option value meaning "not set"; never accepted as a real value.
pub const SENTINEL: &str = "none";

/// Smallest threshold that still leaves room for a bare IPv4 header.
pub const MIN_THRESHOLD: usize = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN;
/// Largest threshold the 16-bit total-length field can express.
pub const MAX_THRESHOLD: usize = ETHERNET_HEADER_LEN + u16::MAX as usize;

pub const DEFAULT_MTU: usize = 1500;

/// Outer addresses of the IP-in-IP tunnel, kept as configured literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoints {
    pub outer_source: String,
    pub outer_destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePolicy {
    destination_override: Option<String>,
    tunnel: Option<TunnelEndpoints>,
    truncation_threshold: usize,
    recompute_checksums: bool,
}

impl RewritePolicy {
    pub fn new(truncation_threshold: usize) -> Result<Self, ConfigError> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&truncation_threshold) {
            return Err(ConfigError::ThresholdOutOfRange {
                threshold: truncation_threshold,
                min: MIN_THRESHOLD,
                max: MAX_THRESHOLD,
            });
        }
        Ok(Self {
            destination_override: None,
            tunnel: None,
            truncation_threshold,
            recompute_checksums: false,
        })
    }

    pub fn with_destination_override(mut self, addr: impl Into<String>) -> Self {
        self.destination_override = Some(addr.into());
        self
    }

    pub fn with_tunnel(mut self, outer_source: impl Into<String>, outer_destination: impl Into<String>) -> Self {
        self.tunnel = Some(TunnelEndpoints {
            outer_source: outer_source.into(),
            outer_destination: outer_destination.into(),
        });
        self
    }

    pub fn with_checksums(mut self, recompute: bool) -> Self {
        self.recompute_checksums = recompute;
        self
    }

    pub fn destination_override(&self) -> Option<&str> {
        self.destination_override.as_deref()
    }

    pub fn tunnel(&self) -> Option<&TunnelEndpoints> {
        self.tunnel.as_ref()
    }

    pub fn truncation_threshold(&self) -> usize {
        self.truncation_threshold
    }

    pub fn recompute_checksums(&self) -> bool {
        self.recompute_checksums
    }
}

/// Parses a configured address literal at the point of use.
pub fn parse_addr(option: &'static str, value: &str) -> Result<Ipv4Addr, RewriteError> {
    value.parse().map_err(|source| RewriteError::MalformedIpLiteral {
        option,
        value: value.to_string(),
        source,
    })
}

/// Rejects the reserved "not set" value.
pub fn reject_sentinel(option: &'static str, value: &str) -> Result<(), ConfigError> {
    if value == SENTINEL {
        return Err(ConfigError::Sentinel { option, value: value.to_string() });
    }
    Ok(())
}

/// Everything a run needs, validated once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub policy: RewritePolicy,
}
