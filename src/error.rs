//! Error types for the rewriter.

use std::io;
use std::net::AddrParseError;

use thiserror::Error;

/// Fatal errors: any of these ends the run.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("invalid IPv4 address for --{option}: {value:?}")]
    MalformedIpLiteral {
        option: &'static str,
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("unsupported frame: {0}")]
    Unsupported(#[from] UnsupportedFrame),

    #[error("not a readable legacy pcap capture: {0}")]
    InvalidCapture(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Startup configuration errors, reported before any frame is read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for --{option}: {value:?}")]
    Sentinel { option: &'static str, value: String },

    #[error("--{present} requires --{missing} to enable tunneling")]
    IncompleteTunnel {
        present: &'static str,
        missing: &'static str,
    },

    #[error("truncation threshold {threshold} outside {min}..={max}")]
    ThresholdOutOfRange { threshold: usize, min: usize, max: usize },
}

/// Reasons a frame is dropped. Never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnsupportedFrame {
    #[error("frame too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported ethernet type: {0:#06x}")]
    EtherType(u16),

    #[error("invalid IP header length: {0} bytes")]
    HeaderLength(usize),

    #[error("unsupported ip proto: {0}")]
    Protocol(u8),

    #[error("tunnel total length {0} exceeds 65535")]
    TunnelOverflow(usize),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversize(usize),
}

pub type Result<T> = std::result::Result<T, RewriteError>;
