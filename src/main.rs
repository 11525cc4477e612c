use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tracing::info;

mod checksum;
mod error;
mod frame;
mod pcap_io;
mod pipeline;
mod policy;
mod stages;
mod validator;

use error::ConfigError;
use frame::IPV4_HEADER_LEN;
use pcap_io::{PcapFileSink, PcapFileSource};
use pipeline::{RewritePipeline, RewriteStats, Termination};
use policy::{reject_sentinel, RewritePolicy, RunConfig, DEFAULT_MTU};

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Rewrite destination addresses, truncate frames to an MTU and wrap packets in an IP-in-IP tunnel in legacy .pcap captures.")]
struct Args {
    /// Input .pcap file
    #[arg(short = 'f', long)]
    input: PathBuf,

    /// Output (rewritten) .pcap file
    #[arg(short = 'w', long)]
    output: PathBuf,

    /// Rewrite every destination address to this IPv4 address
    #[arg(long = "dst-ip", visible_alias = "dstipmap")]
    dst_ip: Option<String>,

    /// Add an IP-in-IP tunnel with this outer source address (needs --outer-dst-ip)
    #[arg(long = "outer-src-ip", visible_alias = "osrcip")]
    outer_src_ip: Option<String>,

    /// Add an IP-in-IP tunnel with this outer destination address (needs --outer-src-ip)
    #[arg(long = "outer-dst-ip", visible_alias = "odstip")]
    outer_dst_ip: Option<String>,

    /// Truncate frames larger than this many bytes (Ethernet header included)
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: usize,

    /// Recompute IPv4 header and TCP/UDP checksums after rewriting
    #[arg(long, default_value_t = false)]
    fix_checksums: bool,

    /// Print run statistics as JSON to stdout
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<RunConfig, ConfigError> {
        reject_sentinel("input", &self.input.to_string_lossy())?;
        reject_sentinel("output", &self.output.to_string_lossy())?;
        for (option, value) in [
            ("dst-ip", &self.dst_ip),
            ("outer-src-ip", &self.outer_src_ip),
            ("outer-dst-ip", &self.outer_dst_ip),
        ] {
            if let Some(v) = value {
                reject_sentinel(option, v)?;
            }
        }

        let mut policy = RewritePolicy::new(self.mtu)?.with_checksums(self.fix_checksums);
        if let Some(dst) = self.dst_ip {
            policy = policy.with_destination_override(dst);
        }
        policy = match (self.outer_src_ip, self.outer_dst_ip) {
            (Some(src), Some(dst)) => policy.with_tunnel(src, dst),
            (Some(_), None) => {
                return Err(ConfigError::IncompleteTunnel { present: "outer-src-ip", missing: "outer-dst-ip" })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteTunnel { present: "outer-dst-ip", missing: "outer-src-ip" })
            }
            (None, None) => policy,
        };

        Ok(RunConfig { input: self.input, output: self.output, policy })
    }
}

// ─── Run ──────────────────────────────────────────────────────────────────────

fn rewrite_capture(config: RunConfig) -> Result<RewriteStats> {
    info!("Opening {:?}", config.input);
    let file   = File::open(&config.input).with_context(|| format!("Cannot open {:?}", config.input))?;
    let source = PcapFileSource::new(BufReader::new(file))
                     .with_context(|| format!("Not a valid legacy pcap file: {:?}", config.input))?;

    let mut header = source.header().clone();
    if config.policy.tunnel().is_some() {
        header.snaplen = header.snaplen.saturating_add(IPV4_HEADER_LEN as u32);
    }

    info!("Writing {:?}", config.output);
    let out_file = File::create(&config.output).with_context(|| format!("Cannot create {:?}", config.output))?;
    let sink     = PcapFileSink::new(BufWriter::new(out_file), &header)?;

    let mut pipeline = RewritePipeline::new(source, sink, config.policy);
    pipeline.run()?;
    Ok(pipeline.stats().clone())
}

fn print_summary(stats: &RewriteStats) {
    println!("=== Rewrite Summary ===");
    println!("Frames processed:            {}", stats.frames_processed);
    println!("Frames written:              {}", stats.frames_written);
    println!("Frames rejected:             {}", stats.frames_rejected);
    println!("Destinations rewritten:      {}", stats.destinations_rewritten);
    println!("Frames truncated:            {}", stats.frames_truncated);
    println!("Frames tunneled:             {}", stats.frames_tunneled);
    println!("Over MTU after tunneling:    {}", stats.over_threshold_after_tunnel);
    println!("Checksums recomputed:        {}", stats.checksums_recomputed);
    if stats.termination == Termination::MalformedInput {
        println!("Stopped early:               malformed input");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).with_writer(std::io::stderr).init();

    let report = args.report;
    let config = args.into_config()?;
    let stats  = rewrite_capture(config)?;

    if report {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_summary(&stats);
    }

    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn minimal_args() {
        let cfg = parse(&["pcap-rewrite", "-f", "in.pcap", "-w", "out.pcap"]).into_config().unwrap();
        assert_eq!(cfg.input, PathBuf::from("in.pcap"));
        assert_eq!(cfg.policy.truncation_threshold(), 1500);
        assert!(cfg.policy.destination_override().is_none());
        assert!(cfg.policy.tunnel().is_none());
        assert!(!cfg.policy.recompute_checksums());
    }

    #[test]
    fn legacy_flag_names() {
        let cfg = parse(&[
            "pcap-rewrite", "-f", "in.pcap", "-w", "out.pcap",
            "--dstipmap", "10.0.0.9", "--osrcip", "1.1.1.1", "--odstip", "2.2.2.2",
        ]).into_config().unwrap();
        assert_eq!(cfg.policy.destination_override(), Some("10.0.0.9"));
        let tunnel = cfg.policy.tunnel().unwrap();
        assert_eq!(tunnel.outer_source, "1.1.1.1");
        assert_eq!(tunnel.outer_destination, "2.2.2.2");
    }

    #[test]
    fn sentinel_rejected() {
        let err = parse(&["pcap-rewrite", "-f", "none", "-w", "out.pcap"]).into_config().unwrap_err();
        assert_eq!(err, ConfigError::Sentinel { option: "input", value: "none".into() });

        let err = parse(&["pcap-rewrite", "-f", "in.pcap", "-w", "out.pcap", "--dst-ip", "none"])
            .into_config().unwrap_err();
        assert_eq!(err, ConfigError::Sentinel { option: "dst-ip", value: "none".into() });
    }

    #[test]
    fn tunnel_needs_both_addresses() {
        let err = parse(&["pcap-rewrite", "-f", "a", "-w", "b", "--outer-src-ip", "1.1.1.1"])
            .into_config().unwrap_err();
        assert_eq!(err, ConfigError::IncompleteTunnel { present: "outer-src-ip", missing: "outer-dst-ip" });
    }

    #[test]
    fn mtu_range_checked() {
        let err = parse(&["pcap-rewrite", "-f", "a", "-w", "b", "--mtu", "20"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOutOfRange { threshold: 20, .. }));
    }

    #[test]
    fn address_literals_not_parsed_at_startup() {
        // Malformed literals surface when the first accepted frame uses them.
        let cfg = parse(&["pcap-rewrite", "-f", "a", "-w", "b", "--dst-ip", "10.0.0"]).into_config().unwrap();
        assert_eq!(cfg.policy.destination_override(), Some("10.0.0"));
    }

    #[test]
    fn stats_report_is_json() {
        let stats = RewriteStats { frames_processed: 3, frames_written: 2, ..Default::default() };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["frames_processed"], 3);
        assert_eq!(json["termination"], "end_of_stream");
    }
}
