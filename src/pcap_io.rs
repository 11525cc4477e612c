//! Legacy pcap source and sink.
//!
//! Input is read with `pcap-parser`'s streaming reader, so any byte order and
//! either timestamp precision is accepted. Output is always little endian and
//! keeps the input's timestamp precision.

use std::io::{self, Read, Write};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapHeader};
use tracing::warn;

use crate::error::{Result, RewriteError};
use crate::frame::{CapturedFrame, MAX_FRAME_SIZE};
use crate::pipeline::{PacketSink, PacketSource, ReadOutcome};

/// Room for one maximum-size record plus read-ahead.
const READER_CAPACITY: usize = MAX_FRAME_SIZE + 65536;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

pub struct PcapFileSource<R: Read> {
    reader: LegacyPcapReader<R>,
    header: PcapHeader,
}

impl<R: Read> PcapFileSource<R> {
    /// Reads the global header; fails if `input` is not a legacy pcap stream.
    pub fn new(input: R) -> Result<Self> {
        let mut reader = LegacyPcapReader::new(READER_CAPACITY, input)
            .map_err(|e| RewriteError::InvalidCapture(format!("{:?}", e)))?;
        let (offset, header) = match reader.next() {
            Ok((offset, PcapBlockOwned::LegacyHeader(hdr))) => (offset, hdr),
            Ok(_) => return Err(RewriteError::InvalidCapture("missing global header".into())),
            Err(e) => return Err(RewriteError::InvalidCapture(format!("{:?}", e))),
        };
        reader.consume(offset);

        if header.network != Linktype::ETHERNET {
            warn!("link type {} is not Ethernet; frames will be read as Ethernet II", header.network.0);
        }
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &PcapHeader {
        &self.header
    }
}

impl<R: Read> PacketSource for PcapFileSource<R> {
    fn next_frame(&mut self) -> ReadOutcome {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::Legacy(pkt) => {
                            Some(CapturedFrame::new(pkt.ts_sec, pkt.ts_usec, pkt.origlen, pkt.data.to_vec()))
                        }
                        PcapBlockOwned::LegacyHeader(_) => None,
                        PcapBlockOwned::NG(_) => {
                            warn!("pcapng block encountered – only legacy pcap supported");
                            None
                        }
                    };
                    self.reader.consume(offset);
                    match frame {
                        Some(Ok(frame)) => return ReadOutcome::Frame(frame),
                        Some(Err(e)) => return ReadOutcome::MalformedInput(e.to_string()),
                        None => continue,
                    }
                }
                Err(PcapError::Eof) => return ReadOutcome::EndOfStream,
                Err(PcapError::Incomplete(_)) => {
                    if let Err(e) = self.reader.refill() {
                        return ReadOutcome::MalformedInput(format!("refill error: {:?}", e));
                    }
                }
                Err(e) => return ReadOutcome::MalformedInput(format!("pcap parse error: {:?}", e)),
            }
        }
    }
}

pub struct PcapFileSink<W: Write> {
    writer: W,
}

impl<W: Write> PcapFileSink<W> {
    /// Writes the global header immediately.
    pub fn new(mut writer: W, header: &PcapHeader) -> Result<Self> {
        write_global_header(&mut writer, header)?;
        Ok(Self { writer })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PacketSink for PcapFileSink<W> {
    fn append(&mut self, frame: CapturedFrame) -> io::Result<()> {
        write_record(&mut self.writer, &frame)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn write_global_header(w: &mut impl Write, hdr: &PcapHeader) -> io::Result<()> {
    let magic = if hdr.is_nanosecond_precision() { MAGIC_NANOS } else { MAGIC_MICROS };
    w.write_all(&magic.to_le_bytes())?;
    w.write_all(&hdr.version_major.to_le_bytes())?;
    w.write_all(&hdr.version_minor.to_le_bytes())?;
    w.write_all(&hdr.thiszone.to_le_bytes())?;
    w.write_all(&hdr.sigfigs.to_le_bytes())?;
    w.write_all(&hdr.snaplen.to_le_bytes())?;
    w.write_all(&(hdr.network.0 as u32).to_le_bytes())?;
    Ok(())
}

/// Only the first `captured_len` bytes of the buffer are written.
fn write_record(w: &mut impl Write, frame: &CapturedFrame) -> io::Result<()> {
    let data = frame.captured();
    w.write_all(&frame.ts_sec.to_le_bytes())?;
    w.write_all(&frame.ts_frac.to_le_bytes())?;
    w.write_all(&(data.len() as u32).to_le_bytes())?;
    w.write_all(&frame.original_len.to_le_bytes())?;
    w.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::frame::tests::ipv4_frame;
    use crate::frame::IPPROTO_TCP;
    use crate::pipeline::RewritePipeline;
    use crate::policy::{RewritePolicy, MAX_THRESHOLD};

    fn le_header(magic: u32, snaplen: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&magic.to_le_bytes());
        v.extend_from_slice(&2u16.to_le_bytes());
        v.extend_from_slice(&4u16.to_le_bytes());
        v.extend_from_slice(&0i32.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&snaplen.to_le_bytes());
        v.extend_from_slice(&1u32.to_le_bytes());
        v
    }

    fn le_record(ts_sec: u32, ts_usec: u32, data: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&ts_sec.to_le_bytes());
        v.extend_from_slice(&ts_usec.to_le_bytes());
        v.extend_from_slice(&(data.len() as u32).to_le_bytes());
        v.extend_from_slice(&(data.len() as u32).to_le_bytes());
        v.extend_from_slice(data);
        v
    }

    fn arp() -> Vec<u8> {
        let mut pkt = vec![0u8; 42];
        pkt[12] = 0x08; pkt[13] = 0x06;
        pkt
    }

    fn capture(magic: u32, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = le_header(magic, 65535);
        for (i, f) in frames.iter().enumerate() {
            out.extend(le_record(1_700_000_000 + i as u32, 250 * i as u32, f));
        }
        out
    }

    fn rewrite(input: &[u8], policy: RewritePolicy) -> Vec<u8> {
        let source = PcapFileSource::new(Cursor::new(input.to_vec())).unwrap();
        let sink = PcapFileSink::new(Vec::new(), source.header()).unwrap();
        let mut p = RewritePipeline::new(source, sink, policy);
        p.run().unwrap();
        p.into_sink().into_inner()
    }

    fn read_all(bytes: &[u8]) -> (PcapHeader, Vec<CapturedFrame>) {
        let mut source = PcapFileSource::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut frames = Vec::new();
        loop {
            match source.next_frame() {
                ReadOutcome::Frame(f) => frames.push(f),
                ReadOutcome::EndOfStream => break,
                ReadOutcome::MalformedInput(e) => panic!("malformed: {}", e),
            }
        }
        (source.header().clone(), frames)
    }

    #[test]
    fn passthrough_is_byte_identical() {
        let input = capture(MAGIC_MICROS, &[
            ipv4_frame(IPPROTO_TCP, 60),
            ipv4_frame(IPPROTO_TCP, 1514),
            ipv4_frame(17, 342),
        ]);
        let output = rewrite(&input, RewritePolicy::new(MAX_THRESHOLD).unwrap());
        assert_eq!(output, input);
    }

    #[test]
    fn nanosecond_precision_kept() {
        let input = capture(MAGIC_NANOS, &[ipv4_frame(IPPROTO_TCP, 60)]);
        let output = rewrite(&input, RewritePolicy::new(1500).unwrap());
        assert_eq!(output, input);
        let (hdr, _) = read_all(&output);
        assert!(hdr.is_nanosecond_precision());
    }

    #[test]
    fn rejected_frames_absent_and_order_kept() {
        let a = ipv4_frame(IPPROTO_TCP, 80);
        let b = ipv4_frame(IPPROTO_TCP, 90);
        let input = capture(MAGIC_MICROS, &[a.clone(), arp(), b.clone()]);
        let (_, frames) = read_all(&rewrite(&input, RewritePolicy::new(1500).unwrap()));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data(), &a[..]);
        assert_eq!(frames[1].data(), &b[..]);
        assert_eq!(frames[0].ts_sec, 1_700_000_000);
        assert_eq!(frames[1].ts_sec, 1_700_000_002);
        assert_eq!(frames[1].ts_frac, 500);
    }

    #[test]
    fn truncated_record_written_short() {
        let input = capture(MAGIC_MICROS, &[ipv4_frame(IPPROTO_TCP, 1514)]);
        let (_, frames) = read_all(&rewrite(&input, RewritePolicy::new(1000).unwrap()));

        assert_eq!(frames[0].captured_len, 1000);
        assert_eq!(frames[0].original_len, 1000);
        assert_eq!(frames[0].data().len(), 1000);
        assert_eq!(frames[0].ipv4().unwrap().total_len(), 986);
    }

    #[test]
    fn big_endian_input_written_little_endian() {
        let frame = ipv4_frame(IPPROTO_TCP, 60);
        let mut input = Vec::new();
        input.extend_from_slice(&MAGIC_MICROS.to_be_bytes());
        input.extend_from_slice(&2u16.to_be_bytes());
        input.extend_from_slice(&4u16.to_be_bytes());
        input.extend_from_slice(&0i32.to_be_bytes());
        input.extend_from_slice(&0u32.to_be_bytes());
        input.extend_from_slice(&65535u32.to_be_bytes());
        input.extend_from_slice(&1u32.to_be_bytes());
        input.extend_from_slice(&7u32.to_be_bytes());
        input.extend_from_slice(&9u32.to_be_bytes());
        input.extend_from_slice(&60u32.to_be_bytes());
        input.extend_from_slice(&60u32.to_be_bytes());
        input.extend_from_slice(&frame);

        let output = rewrite(&input, RewritePolicy::new(1500).unwrap());
        assert_eq!(output, capture_with_ts(&frame, 7, 9));
    }

    fn capture_with_ts(frame: &[u8], ts_sec: u32, ts_usec: u32) -> Vec<u8> {
        let mut out = le_header(MAGIC_MICROS, 65535);
        out.extend(le_record(ts_sec, ts_usec, frame));
        out
    }

    #[test]
    fn cut_off_capture_reports_malformed_input() {
        let mut input = capture(MAGIC_MICROS, &[ipv4_frame(IPPROTO_TCP, 60), ipv4_frame(IPPROTO_TCP, 60)]);
        input.truncate(input.len() - 10);
        let mut source = PcapFileSource::new(Cursor::new(input)).unwrap();
        assert!(matches!(source.next_frame(), ReadOutcome::Frame(_)));
        assert!(matches!(source.next_frame(), ReadOutcome::MalformedInput(_)));
    }

    #[test]
    fn pcapng_refused_at_open() {
        let mut input = vec![0x0a, 0x0d, 0x0d, 0x0a];
        input.extend_from_slice(&[0u8; 60]);
        assert!(matches!(PcapFileSource::new(Cursor::new(input)), Err(RewriteError::InvalidCapture(_))));
    }
}
