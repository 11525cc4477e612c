//! Drives frames from a source, through the validator and stages, into a sink.

use std::io;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::recompute_checksums;
use crate::error::{Result, RewriteError};
use crate::frame::{CapturedFrame, ETHERNET_HEADER_LEN};
use crate::policy::RewritePolicy;
use crate::stages::{encapsulate, rewrite_destination, truncate};
use crate::validator::validate;

/// What a source hands back for one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(CapturedFrame),
    EndOfStream,
    /// The container could not be parsed any further. Ends the run like
    /// `EndOfStream`.
    MalformedInput(String),
}

pub trait PacketSource {
    fn next_frame(&mut self) -> ReadOutcome;
}

pub trait PacketSink {
    /// Appends one record. Order of calls is the order in the output.
    fn append(&mut self, frame: CapturedFrame) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    #[default]
    EndOfStream,
    MalformedInput,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    pub frames_processed:            u64,
    pub frames_written:              u64,
    pub frames_rejected:             u64,
    pub destinations_rewritten:      u64,
    pub frames_truncated:            u64,
    pub frames_tunneled:             u64,
    pub over_threshold_after_tunnel: u64,
    pub checksums_recomputed:        u64,
    pub termination:                 Termination,
}

pub struct RewritePipeline<S, K> {
    source: S,
    sink: K,
    policy: RewritePolicy,
    stats: RewriteStats,
}

impl<S: PacketSource, K: PacketSink> RewritePipeline<S, K> {
    pub fn new(source: S, sink: K, policy: RewritePolicy) -> Self {
        Self { source, sink, policy, stats: RewriteStats::default() }
    }

    /// Runs until the source is exhausted or a stage fails fatally.
    ///
    /// Frames written before a fatal error are flushed and kept.
    pub fn run(&mut self) -> Result<&RewriteStats> {
        loop {
            let mut frame = match self.source.next_frame() {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::EndOfStream => {
                    self.stats.termination = Termination::EndOfStream;
                    info!("End of pcap file, {} frames processed", self.stats.frames_processed);
                    break;
                }
                ReadOutcome::MalformedInput(reason) => {
                    self.stats.termination = Termination::MalformedInput;
                    warn!("stopping at malformed input: {}", reason);
                    info!("{} frames processed", self.stats.frames_processed);
                    break;
                }
            };
            self.stats.frames_processed += 1;

            match self.process_frame(&mut frame) {
                Ok(()) => {
                    self.sink.append(frame)?;
                    self.stats.frames_written += 1;
                }
                Err(RewriteError::Unsupported(reason)) => {
                    self.stats.frames_rejected += 1;
                    warn!("frame {}: {}", self.stats.frames_processed, reason);
                }
                Err(e) => {
                    if let Err(flush_err) = self.sink.flush() {
                        warn!("flush after fatal error failed: {}", flush_err);
                    }
                    return Err(e);
                }
            }
        }

        self.sink.flush()?;
        Ok(&self.stats)
    }

    /// Validates and mutates one frame in place.
    ///
    /// `Err(RewriteError::Unsupported)` means the frame must be dropped; any
    /// other error is fatal.
    pub fn process_frame(&mut self, frame: &mut CapturedFrame) -> Result<()> {
        validate(frame)?;

        if let Some(literal) = self.policy.destination_override() {
            rewrite_destination(frame, literal)?;
            self.stats.destinations_rewritten += 1;
        }

        let threshold = self.policy.truncation_threshold();
        if truncate(frame, threshold)? {
            self.stats.frames_truncated += 1;
        }

        if let Some(endpoints) = self.policy.tunnel() {
            encapsulate(frame, endpoints)?;
            self.stats.frames_tunneled += 1;
            // on-wire size, so snaplen-cut captures are counted too
            let wire_len = ETHERNET_HEADER_LEN + frame.ipv4()?.total_len() as usize;
            if wire_len > threshold {
                self.stats.over_threshold_after_tunnel += 1;
                debug!("frame {} is {} bytes after tunneling, above {}",
                    self.stats.frames_processed, wire_len, threshold);
            }
        }

        if self.policy.recompute_checksums() {
            self.stats.checksums_recomputed += recompute_checksums(frame)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn into_sink(self) -> K {
        self.sink
    }
}
