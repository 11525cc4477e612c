//! The mutation stages, applied in order: destination rewrite, truncation,
//! IP-in-IP encapsulation.

use tracing::debug;

use crate::error::{Result, UnsupportedFrame};
use crate::frame::{
    CapturedFrame, OuterHeader, ETHERNET_HEADER_LEN, IPPROTO_IPIP, IPV4_HEADER_LEN, IPV4_VERSION_IHL, TUNNEL_TTL,
};
use crate::policy::{parse_addr, TunnelEndpoints};

// ─── Destination rewrite ──────────────────────────────────────────────────────

/// Overwrites the IPv4 destination with `literal`. Lengths and checksums are
/// left alone.
pub fn rewrite_destination(frame: &mut CapturedFrame, literal: &str) -> Result<()> {
    let addr = parse_addr("dst-ip", literal)?;
    frame.ipv4_mut()?.set_destination(addr);
    Ok(())
}

// ─── Truncation ───────────────────────────────────────────────────────────────

/// Shrinks the declared lengths of a frame larger than `threshold`.
///
/// Only the IPv4 total-length field and the capture lengths change; bytes past
/// the new captured length stay in the buffer and are never written out.
/// Returns whether the frame was truncated.
pub fn truncate(frame: &mut CapturedFrame, threshold: usize) -> Result<bool> {
    let total_len = frame.ipv4()?.total_len() as usize;
    let frame_size = ETHERNET_HEADER_LEN + total_len;
    if frame_size <= threshold {
        return Ok(false);
    }

    let new_len = u16::try_from(threshold.saturating_sub(ETHERNET_HEADER_LEN)).unwrap_or(u16::MAX);
    debug!("truncating frame from {} to {} bytes", frame_size, threshold);
    frame.ipv4_mut()?.set_total_len(new_len);

    let cap = u32::try_from(threshold).unwrap_or(u32::MAX);
    frame.captured_len = frame.captured_len.min(cap);
    frame.original_len = frame.original_len.min(cap);
    Ok(true)
}

// ─── IP-in-IP tunnel ──────────────────────────────────────────────────────────

/// Wraps the IPv4 datagram in a new 20-byte outer header.
///
/// The outer header starts as a copy of the inner one; version/IHL, total
/// length, TTL, protocol and both addresses are then replaced. The inner
/// datagram moves 20 bytes forward unchanged and both capture lengths grow by
/// 20. The result may exceed the truncation threshold again.
pub fn encapsulate(frame: &mut CapturedFrame, endpoints: &TunnelEndpoints) -> Result<()> {
    let (template, inner_len) = {
        let ip = frame.ipv4()?;
        (ip.fixed_header(), ip.total_len() as usize)
    };

    let outer_len = inner_len + IPV4_HEADER_LEN;
    let outer_len = u16::try_from(outer_len).map_err(|_| UnsupportedFrame::TunnelOverflow(outer_len))?;

    let mut outer = OuterHeader::from_template(template);
    outer.set_version_ihl(IPV4_VERSION_IHL);
    outer.set_total_len(outer_len);
    outer.set_ttl(TUNNEL_TTL);
    outer.set_protocol(IPPROTO_IPIP);
    outer.set_source(parse_addr("outer-src-ip", &endpoints.outer_source)?);
    outer.set_destination(parse_addr("outer-dst-ip", &endpoints.outer_destination)?);

    frame.insert_after_link(outer.as_bytes())?;

    let grow = IPV4_HEADER_LEN as u32;
    frame.captured_len = frame.captured_len.saturating_add(grow);
    frame.original_len = frame.original_len.saturating_add(grow);
    Ok(())
}
