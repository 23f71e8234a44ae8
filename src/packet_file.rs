// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet capture file reader and writer.
//!
//! [`PacketFileReader`] loads a capture (legacy PCAP or PCAPNG) into memory
//! and yields UDP payloads in capture order. Positions are opaque
//! [`FilePosition`] handles taken before a packet is read, so a frame index
//! can seek back to the packet that starts any frame in O(1).
//!
//! [`PacketFileWriter`] writes legacy PCAP, used to copy frame ranges into
//! a new capture. Raw link-layer records are preserved byte-for-byte.

use crate::hdl::Error;
use pcap_parser::traits::PcapReaderIterator;
use std::io::Write as _;
use std::path::Path;

/// Opaque capture position, taken with [`PacketFileReader::get_position`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FilePosition(usize);

/// One captured UDP packet with its link-layer record and timestamps.
#[derive(Clone, Debug)]
pub struct CapturedPacket {
    /// Capture timestamp, seconds part.
    pub ts_sec: u32,
    /// Capture timestamp, microseconds part.
    pub ts_usec: u32,
    /// Original on-wire length.
    pub orig_len: u32,
    /// Raw link-layer record (Ethernet + IP + UDP + payload).
    pub frame: Vec<u8>,
    /// UDP payload.
    pub payload: Vec<u8>,
}

/// In-memory packet capture reader with seekable positions.
pub struct PacketFileReader {
    packets: Vec<CapturedPacket>,
    index: usize,
}

impl PacketFileReader {
    /// Load a capture file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = std::fs::read(path.as_ref()).map_err(Error::Io)?;
        Self::from_bytes(&data)
    }

    /// Load a capture from bytes. Supports legacy PCAP and PCAPNG; only
    /// UDP packets are kept.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut packets = Vec::new();

        if data.len() >= 4 && data[0..4] == [0x0a, 0x0d, 0x0d, 0x0a] {
            // PCAPNG format (Section Header Block magic)
            Self::load_pcapng(data, &mut packets)?;
        } else {
            Self::load_legacy_pcap(data, &mut packets)?;
        }

        Ok(Self { packets, index: 0 })
    }

    fn load_legacy_pcap(data: &[u8], packets: &mut Vec<CapturedPacket>) -> Result<(), Error> {
        use pcap_parser::*;

        // Buffer size must cover the whole input to avoid Incomplete errors
        let mut reader = LegacyPcapReader::new(data.len().max(65536), data)
            .map_err(|e| Error::InvalidCapture(format!("failed to create PCAP reader: {:?}", e)))?;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    if let PcapBlockOwned::Legacy(packet) = block
                        && let Some(payload) = Self::extract_udp_payload(packet.data)
                    {
                        packets.push(CapturedPacket {
                            ts_sec: packet.ts_sec,
                            ts_usec: packet.ts_usec,
                            orig_len: packet.origlen,
                            frame: packet.data.to_vec(),
                            payload,
                        });
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => break,
                Err(e) => {
                    return Err(Error::InvalidCapture(format!("PCAP parse error: {:?}", e)));
                }
            }
        }

        Ok(())
    }

    fn load_pcapng(data: &[u8], packets: &mut Vec<CapturedPacket>) -> Result<(), Error> {
        use pcap_parser::*;

        let mut reader = PcapNGReader::new(data.len().max(65536), data).map_err(|e| {
            Error::InvalidCapture(format!("failed to create PCAPNG reader: {:?}", e))
        })?;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let caplen = (epb.caplen as usize).min(epb.data.len());
                            let frame = &epb.data[..caplen];
                            if let Some(payload) = Self::extract_udp_payload(frame) {
                                // Assumes the default microsecond if_tsresol.
                                let ts = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                                packets.push(CapturedPacket {
                                    ts_sec: (ts / 1_000_000) as u32,
                                    ts_usec: (ts % 1_000_000) as u32,
                                    orig_len: epb.origlen,
                                    frame: frame.to_vec(),
                                    payload,
                                });
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            if let Some(payload) = Self::extract_udp_payload(spb.data) {
                                packets.push(CapturedPacket {
                                    ts_sec: 0,
                                    ts_usec: 0,
                                    orig_len: spb.origlen,
                                    frame: spb.data.to_vec(),
                                    payload,
                                });
                            }
                        }
                        _ => {
                            // Skip other block types (SHB, IDB, etc.)
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => break,
                Err(e) => {
                    return Err(Error::InvalidCapture(format!(
                        "PCAPNG parse error: {:?}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Extract the UDP payload from a raw Ethernet frame.
    fn extract_udp_payload(data: &[u8]) -> Option<Vec<u8>> {
        use etherparse::SlicedPacket;

        let packet = SlicedPacket::from_ethernet(data).ok()?;

        let udp = match packet.transport {
            Some(etherparse::TransportSlice::Udp(udp)) => udp,
            _ => return None,
        };

        let payload = udp.payload().to_vec();
        if payload.is_empty() {
            return None;
        }

        Some(payload)
    }

    /// Yield the next packet, advancing the position.
    pub fn next_packet(&mut self) -> Option<&CapturedPacket> {
        let packet = self.packets.get(self.index)?;
        self.index += 1;
        Some(packet)
    }

    /// Current position; taken before a `next_packet` call it names the
    /// packet that call will yield.
    pub fn get_position(&self) -> FilePosition {
        FilePosition(self.index)
    }

    /// Seek to a previously taken position.
    pub fn set_position(&mut self, position: FilePosition) {
        self.index = position.0.min(self.packets.len());
    }

    /// Rewind to the start of the capture.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Total number of UDP packets in the capture.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if the capture contains no packets.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Legacy PCAP writer preserving raw link-layer records.
pub struct PacketFileWriter {
    file: std::io::BufWriter<std::fs::File>,
}

impl PacketFileWriter {
    /// Create the output capture and write its global header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::create(path.as_ref()).map_err(Error::Io)?;
        let mut writer = Self {
            file: std::io::BufWriter::new(file),
        };
        writer.write_global_header()?;
        Ok(writer)
    }

    fn write_global_header(&mut self) -> Result<(), Error> {
        self.file.write_all(&0xa1b2c3d4u32.to_le_bytes())?; // magic
        self.file.write_all(&2u16.to_le_bytes())?; // major version
        self.file.write_all(&4u16.to_le_bytes())?; // minor version
        self.file.write_all(&0i32.to_le_bytes())?; // timezone
        self.file.write_all(&0u32.to_le_bytes())?; // timestamp accuracy
        self.file.write_all(&65535u32.to_le_bytes())?; // snap length
        self.file.write_all(&1u32.to_le_bytes())?; // network type (Ethernet)
        Ok(())
    }

    /// Append one record, preserving its raw bytes and timestamps.
    pub fn write_packet(&mut self, packet: &CapturedPacket) -> Result<(), Error> {
        self.file.write_all(&packet.ts_sec.to_le_bytes())?;
        self.file.write_all(&packet.ts_usec.to_le_bytes())?;
        self.file
            .write_all(&(packet.frame.len() as u32).to_le_bytes())?;
        self.file.write_all(&packet.orig_len.to_le_bytes())?;
        self.file.write_all(&packet.frame)?;
        Ok(())
    }

    /// Flush and close, surfacing any write error. Dropping the writer
    /// also flushes, but swallows errors.
    pub fn finish(mut self) -> Result<(), Error> {
        self.file.flush()?;
        Ok(())
    }
}
