//! Accept only Ethernet / IPv4 / TCP-or-UDP frames.

use crate::error::UnsupportedFrame;
use crate::frame::{CapturedFrame, ETHERTYPE_IPV4, IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_LEN};

pub fn validate(frame: &CapturedFrame) -> Result<(), UnsupportedFrame> {
    let ether_type = frame.ethernet()?.ether_type();
    if ether_type != ETHERTYPE_IPV4 {
        return Err(UnsupportedFrame::EtherType(ether_type));
    }

    let ip = frame.ipv4()?;
    if ip.header_len() < IPV4_HEADER_LEN {
        return Err(UnsupportedFrame::HeaderLength(ip.header_len()));
    }

    match ip.protocol() {
        IPPROTO_TCP | IPPROTO_UDP => Ok(()),
        other => Err(UnsupportedFrame::Protocol(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{frame, ipv4_frame};

    #[test]
    fn accepts_tcp_and_udp() {
        assert!(validate(&frame(ipv4_frame(IPPROTO_TCP, 60))).is_ok());
        assert!(validate(&frame(ipv4_frame(IPPROTO_UDP, 60))).is_ok());
    }

    #[test]
    fn rejects_arp() {
        let mut pkt = vec![0u8; 42];
        pkt[12] = 0x08; pkt[13] = 0x06;
        assert_eq!(validate(&frame(pkt)), Err(UnsupportedFrame::EtherType(0x0806)));
    }

    #[test]
    fn rejects_short_header_length() {
        let mut pkt = ipv4_frame(IPPROTO_TCP, 60);
        pkt[14] = 0x44;
        assert_eq!(validate(&frame(pkt)), Err(UnsupportedFrame::HeaderLength(16)));
    }

    #[test]
    fn rejects_icmp() {
        assert_eq!(validate(&frame(ipv4_frame(1, 60))), Err(UnsupportedFrame::Protocol(1)));
    }

    #[test]
    fn rejects_runt_frames() {
        let mut pkt = vec![0u8; 20];
        pkt[12] = 0x08; pkt[13] = 0x00;
        assert_eq!(
            validate(&frame(pkt)),
            Err(UnsupportedFrame::Truncated { needed: 20, available: 6 })
        );
        assert!(matches!(validate(&frame(vec![0u8; 4])), Err(UnsupportedFrame::Truncated { .. })));
    }
}
