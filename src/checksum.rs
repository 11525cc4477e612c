//! Optional checksum recomputation, run after every other stage.
//!
//! Rewrites the header checksum of each IPv4 header in the frame (outer and,
//! for IP-in-IP, inner) and the TCP/UDP checksum of the innermost segment when
//! the whole segment was captured.

use std::net::Ipv4Addr;

use crate::error::UnsupportedFrame;
use crate::frame::{
    CapturedFrame, Ipv4View, Ipv4ViewMut, ETHERNET_HEADER_LEN, IPPROTO_IPIP, IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_LEN,
};

const TCP_SUM: usize = 16;
const UDP_SUM: usize = 6;

/// One's-complement sum folded to 16 bits, not yet inverted.
fn ones_complement_sum(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum += u16::from_be_bytes([c[0], c[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}

pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    !(ones_complement_sum(header, 0) as u16)
}

fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = proto;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    let sum = ones_complement_sum(&pseudo, 0);
    !(ones_complement_sum(segment, sum) as u16)
}

/// Recomputes the checksums of one IPv4 datagram, descending into an
/// IP-in-IP payload. `captured` is how many bytes of `bytes` are real.
/// Returns the number of checksums written; a header that was not fully
/// captured is left untouched.
fn fix_datagram(bytes: &mut [u8], captured: usize) -> Result<u64, UnsupportedFrame> {
    let (ihl, total, proto, src, dst) = match Ipv4View::new(bytes) {
        Ok(ip) => (ip.header_len(), ip.total_len() as usize, ip.protocol(), ip.source(), ip.destination()),
        Err(_) => return Ok(0),
    };
    if ihl < IPV4_HEADER_LEN || ihl > captured {
        return Ok(0);
    }

    let mut written = 0;
    let end = total.min(captured);
    if proto == IPPROTO_IPIP && end > ihl {
        written += fix_datagram(&mut bytes[ihl..end], end - ihl)?;
    } else if total <= captured && total > ihl {
        let segment = &mut bytes[ihl..total];
        let sum_off = match proto {
            IPPROTO_TCP if segment.len() >= TCP_SUM + 2 => Some(TCP_SUM),
            // zero means the sender did not compute one
            IPPROTO_UDP if segment.len() >= UDP_SUM + 2 && segment[UDP_SUM..UDP_SUM + 2] != [0u8, 0] => Some(UDP_SUM),
            _ => None,
        };
        if let Some(off) = sum_off {
            segment[off..off + 2].fill(0);
            let mut sum = transport_checksum(src, dst, proto, segment);
            if proto == IPPROTO_UDP && sum == 0 {
                sum = 0xFFFF;
            }
            segment[off..off + 2].copy_from_slice(&sum.to_be_bytes());
            written += 1;
        }
    }

    Ipv4ViewMut::new(bytes)?.set_checksum(0);
    let sum = ipv4_header_checksum(&bytes[..ihl]);
    Ipv4ViewMut::new(bytes)?.set_checksum(sum);
    Ok(written + 1)
}

/// Returns how many checksums were rewritten.
pub fn recompute_checksums(frame: &mut CapturedFrame) -> Result<u64, UnsupportedFrame> {
    let captured = (frame.captured_len as usize)
        .min(frame.data().len())
        .saturating_sub(ETHERNET_HEADER_LEN);
    fix_datagram(frame.network_layer_mut()?, captured)
}
