//! Captured frames and bounds-checked header views over their bytes.
//!
//! Views never alias the buffer as a struct. Each one checks on construction
//! that the slice is long enough for every fixed field it exposes, so the
//! accessors below index inside a range that is already known to exist.

use std::net::Ipv4Addr;

use crate::error::UnsupportedFrame;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPV4_HEADER_LEN: usize = 20;
/// Version 4, IHL 5: a 20-byte header without options.
pub const IPV4_VERSION_IHL: u8 = 0x45;
pub const IPPROTO_IPIP: u8 = 4;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const TUNNEL_TTL: u8 = 0xFE;
/// Largest frame buffer accepted from a capture (libpcap's maximum snaplen).
pub const MAX_FRAME_SIZE: usize = 262_144;

// IPv4 field offsets
const IP_VHL: usize = 0;
const IP_LEN: usize = 2;
const IP_TTL: usize = 8;
const IP_PROTO: usize = 9;
const IP_SUM: usize = 10;
const IP_SRC: usize = 12;
const IP_DST: usize = 16;

fn require(bytes: &[u8], needed: usize) -> Result<(), UnsupportedFrame> {
    if bytes.len() < needed {
        return Err(UnsupportedFrame::Truncated { needed, available: bytes.len() });
    }
    Ok(())
}

/// One capture record: timestamp, lengths and the stored link-layer bytes.
///
/// `data` may hold more bytes than `captured_len` after truncation; only the
/// first `captured_len` bytes belong to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub ts_sec: u32,
    /// Microseconds or nanoseconds, depending on the container's precision.
    pub ts_frac: u32,
    pub captured_len: u32,
    pub original_len: u32,
    data: Vec<u8>,
}

impl CapturedFrame {
    /// Wraps record bytes. `captured_len` is taken from the buffer itself.
    pub fn new(ts_sec: u32, ts_frac: u32, original_len: u32, data: Vec<u8>) -> Result<Self, UnsupportedFrame> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(UnsupportedFrame::Oversize(data.len()));
        }
        Ok(Self { ts_sec, ts_frac, captured_len: data.len() as u32, original_len, data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes that belong to the record.
    pub fn captured(&self) -> &[u8] {
        let end = (self.captured_len as usize).min(self.data.len());
        &self.data[..end]
    }

    pub fn ethernet(&self) -> Result<EthernetView<'_>, UnsupportedFrame> {
        EthernetView::new(&self.data)
    }

    pub fn ipv4(&self) -> Result<Ipv4View<'_>, UnsupportedFrame> {
        Ipv4View::new(self.network_layer()?)
    }

    pub fn ipv4_mut(&mut self) -> Result<Ipv4ViewMut<'_>, UnsupportedFrame> {
        require(&self.data, ETHERNET_HEADER_LEN)?;
        Ipv4ViewMut::new(&mut self.data[ETHERNET_HEADER_LEN..])
    }

    /// Everything after the Ethernet header.
    pub fn network_layer(&self) -> Result<&[u8], UnsupportedFrame> {
        require(&self.data, ETHERNET_HEADER_LEN)?;
        Ok(&self.data[ETHERNET_HEADER_LEN..])
    }

    pub(crate) fn network_layer_mut(&mut self) -> Result<&mut [u8], UnsupportedFrame> {
        require(&self.data, ETHERNET_HEADER_LEN)?;
        Ok(&mut self.data[ETHERNET_HEADER_LEN..])
    }

    /// Inserts `header` right after the Ethernet header, moving the network
    /// layer forward by `header.len()` bytes.
    pub(crate) fn insert_after_link(&mut self, header: &[u8]) -> Result<(), UnsupportedFrame> {
        require(&self.data, ETHERNET_HEADER_LEN)?;
        let grown = self.data.len() + header.len();
        if grown > MAX_FRAME_SIZE {
            return Err(UnsupportedFrame::Oversize(grown));
        }
        let old_len = self.data.len();
        let start = ETHERNET_HEADER_LEN + header.len();
        self.data.resize(grown, 0);
        self.data.copy_within(ETHERNET_HEADER_LEN..old_len, start);
        self.data[ETHERNET_HEADER_LEN..start].copy_from_slice(header);
        Ok(())
    }
}

/// Ethernet II header view.
#[derive(Debug, Clone, Copy)]
pub struct EthernetView<'a> {
    bytes: &'a [u8],
}

impl<'a> EthernetView<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, UnsupportedFrame> {
        require(bytes, ETHERNET_HEADER_LEN)?;
        Ok(Self { bytes })
    }

    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }
}

/// Read-only view of a fixed IPv4 header (options are not interpreted).
#[derive(Debug, Clone, Copy)]
pub struct Ipv4View<'a> {
    bytes: &'a [u8],
}

impl<'a> Ipv4View<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, UnsupportedFrame> {
        require(bytes, IPV4_HEADER_LEN)?;
        Ok(Self { bytes })
    }

    #[cfg(test)]
    pub fn version(&self) -> u8 {
        self.bytes[IP_VHL] >> 4
    }

    /// IHL in bytes.
    pub fn header_len(&self) -> usize {
        ((self.bytes[IP_VHL] & 0x0f) as usize) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes([self.bytes[IP_LEN], self.bytes[IP_LEN + 1]])
    }

    #[cfg(test)]
    pub fn ttl(&self) -> u8 {
        self.bytes[IP_TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.bytes[IP_PROTO]
    }

    pub fn source(&self) -> Ipv4Addr {
        addr_at(self.bytes, IP_SRC)
    }

    pub fn destination(&self) -> Ipv4Addr {
        addr_at(self.bytes, IP_DST)
    }

    /// The 20 fixed header bytes.
    pub fn fixed_header(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut out = [0u8; IPV4_HEADER_LEN];
        out.copy_from_slice(&self.bytes[..IPV4_HEADER_LEN]);
        out
    }
}

fn addr_at(bytes: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3])
}

/// Mutable counterpart of [`Ipv4View`].
#[derive(Debug)]
pub struct Ipv4ViewMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Ipv4ViewMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Result<Self, UnsupportedFrame> {
        require(bytes, IPV4_HEADER_LEN)?;
        Ok(Self { bytes })
    }

    pub fn set_total_len(&mut self, len: u16) {
        self.bytes[IP_LEN..IP_LEN + 2].copy_from_slice(&len.to_be_bytes());
    }

    pub fn set_checksum(&mut self, sum: u16) {
        self.bytes[IP_SUM..IP_SUM + 2].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn set_destination(&mut self, addr: Ipv4Addr) {
        self.bytes[IP_DST..IP_DST + 4].copy_from_slice(&addr.octets());
    }
}

/// Builds a standalone 20-byte outer header from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterHeader([u8; IPV4_HEADER_LEN]);

impl OuterHeader {
    pub fn from_template(template: [u8; IPV4_HEADER_LEN]) -> Self {
        Self(template)
    }

    pub fn set_version_ihl(&mut self, vhl: u8) {
        self.0[IP_VHL] = vhl;
    }

    pub fn set_total_len(&mut self, len: u16) {
        self.0[IP_LEN..IP_LEN + 2].copy_from_slice(&len.to_be_bytes());
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.0[IP_TTL] = ttl;
    }

    pub fn set_protocol(&mut self, proto: u8) {
        self.0[IP_PROTO] = proto;
    }

    pub fn set_source(&mut self, addr: Ipv4Addr) {
        self.0[IP_SRC..IP_SRC + 4].copy_from_slice(&addr.octets());
    }

    pub fn set_destination(&mut self, addr: Ipv4Addr) {
        self.0[IP_DST..IP_DST + 4].copy_from_slice(&addr.octets());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
