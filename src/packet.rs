// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! HDL wire format.
//!
//! An HDL data payload is exactly 1,206 bytes, little-endian, packed:
//!
//! - 12 firing blocks of 100 bytes each: u16 block identifier, u16
//!   rotational position (hundredths of a degree), then 32 laser returns of
//!   (u16 distance, u8 intensity)
//! - u32 GPS timestamp (microseconds within the GPS hour)
//! - 2 padding bytes
//!
//! Distances are in 2 mm units; a zero distance means no return. The block
//! identifier selects the laser bank: `0xEEFF` is lasers 0-31, `0xDDFF` is
//! lasers 32-63.
//!
//! All multi-byte fields are read field-by-field with `from_le_bytes`, so
//! the on-wire packed layout never requires unaligned loads.

use crate::hdl::Error;

/// HDL data payload length in bytes/octets.
pub const PACKET_SIZE: usize = 1206;

/// Firing blocks per data packet.
pub const FIRINGS_PER_PACKET: usize = 12;

/// Concurrent laser firings per block.
pub const LASERS_PER_FIRING: usize = 32;

/// Maximum lasers across both banks (64-laser systems).
pub const MAX_LASERS: usize = 64;

/// Block identifier for lasers 0-31.
pub const BLOCK_0_TO_31: u16 = 0xeeff;

/// Block identifier for lasers 32-63.
pub const BLOCK_32_TO_63: u16 = 0xddff;

/// Link-layer (Ethernet + IPv4 + UDP) header length in a captured record.
pub const LINK_HEADER_SIZE: usize = 42;

/// Full captured record length for an HDL data packet.
pub const CAPTURED_PACKET_SIZE: usize = PACKET_SIZE + LINK_HEADER_SIZE;

/// Distance resolution in meters (2 mm).
pub const DISTANCE_RESOLUTION: f64 = 0.002;

/// A single echo in a firing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LaserReturn {
    /// Raw distance in 2 mm units; zero means no return.
    pub distance: u16,
    /// Raw intensity, 0-255.
    pub intensity: u8,
}

impl LaserReturn {
    /// Length of a laser return in bytes/octets.
    pub const LEN: usize = 3;
}

/// One firing block: 32 concurrent laser returns sharing an azimuth.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FiringBlock {
    /// Bank selector, [`BLOCK_0_TO_31`] or [`BLOCK_32_TO_63`].
    pub block_identifier: u16,
    /// Azimuth in hundredths of a degree, 0-35999.
    pub rotational_position: u16,
    /// Returns for lasers 0-31 within the bank.
    pub laser_returns: [LaserReturn; LASERS_PER_FIRING],
}

impl FiringBlock {
    /// Length of a firing block in bytes/octets.
    pub const LEN: usize = 100;

    fn write_to(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.block_identifier.to_le_bytes());
        out[2..4].copy_from_slice(&self.rotational_position.to_le_bytes());
        for (j, ret) in self.laser_returns.iter().enumerate() {
            let offset = 4 + j * LaserReturn::LEN;
            out[offset..offset + 2].copy_from_slice(&ret.distance.to_le_bytes());
            out[offset + 2] = ret.intensity;
        }
    }
}

impl Default for FiringBlock {
    fn default() -> Self {
        Self {
            block_identifier: BLOCK_0_TO_31,
            rotational_position: 0,
            laser_returns: [LaserReturn::default(); LASERS_PER_FIRING],
        }
    }
}

/// Owned HDL data packet, mainly for synthesizing test and benchmark data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataPacket {
    pub firings: [FiringBlock; FIRINGS_PER_PACKET],
    /// Microseconds within the GPS hour.
    pub gps_timestamp: u32,
}

impl DataPacket {
    /// Serialize to the 1,206-byte wire layout.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        for (i, firing) in self.firings.iter().enumerate() {
            firing.write_to(&mut buf[i * FiringBlock::LEN..(i + 1) * FiringBlock::LEN]);
        }
        buf[1200..1204].copy_from_slice(&self.gps_timestamp.to_le_bytes());
        buf
    }
}

impl Default for DataPacket {
    fn default() -> Self {
        Self {
            firings: [FiringBlock::default(); FIRINGS_PER_PACKET],
            gps_timestamp: 0,
        }
    }
}

/// Borrowed view of a validated 1,206-byte HDL payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DataPacketSlice<'a> {
    slice: &'a [u8],
}

impl<'a> DataPacketSlice<'a> {
    /// Validate a payload as an HDL data packet.
    ///
    /// Any length other than exactly [`PACKET_SIZE`] is rejected; the
    /// sensor also emits positioning packets which are filtered out here.
    pub fn from_slice(slice: &'a [u8]) -> Result<DataPacketSlice<'a>, Error> {
        if slice.len() != PACKET_SIZE {
            return Err(Error::InvalidPacket(format!(
                "not a data packet: {} bytes",
                slice.len()
            )));
        }
        Ok(DataPacketSlice { slice })
    }

    /// Returns the firing block at the given index (0-11).
    pub fn firing(&self, index: usize) -> FiringBlockSlice<'a> {
        let offset = index * FiringBlock::LEN;
        FiringBlockSlice {
            slice: &self.slice[offset..offset + FiringBlock::LEN],
        }
    }

    /// Microseconds within the GPS hour.
    pub fn gps_timestamp(&self) -> u32 {
        u32::from_le_bytes([
            self.slice[1200],
            self.slice[1201],
            self.slice[1202],
            self.slice[1203],
        ])
    }

    /// Copy out the whole packet.
    pub fn to_packet(&self) -> DataPacket {
        let mut packet = DataPacket {
            firings: [FiringBlock::default(); FIRINGS_PER_PACKET],
            gps_timestamp: self.gps_timestamp(),
        };
        for i in 0..FIRINGS_PER_PACKET {
            packet.firings[i] = self.firing(i).to_firing();
        }
        packet
    }
}

/// Borrowed view of one 100-byte firing block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FiringBlockSlice<'a> {
    slice: &'a [u8],
}

impl<'a> FiringBlockSlice<'a> {
    pub fn block_identifier(&self) -> u16 {
        u16::from_le_bytes([self.slice[0], self.slice[1]])
    }

    pub fn rotational_position(&self) -> u16 {
        u16::from_le_bytes([self.slice[2], self.slice[3]])
    }

    /// Laser index offset selected by the block identifier: 0 for the
    /// lower bank, 32 for the upper.
    pub fn laser_offset(&self) -> usize {
        if self.block_identifier() == BLOCK_0_TO_31 {
            0
        } else {
            32
        }
    }

    /// Returns the echo for laser `j` (0-31) within this block.
    pub fn laser_return(&self, j: usize) -> LaserReturn {
        let offset = 4 + j * LaserReturn::LEN;
        LaserReturn {
            distance: u16::from_le_bytes([self.slice[offset], self.slice[offset + 1]]),
            intensity: self.slice[offset + 2],
        }
    }

    /// Copy out the whole block.
    pub fn to_firing(&self) -> FiringBlock {
        let mut firing = FiringBlock {
            block_identifier: self.block_identifier(),
            rotational_position: self.rotational_position(),
            laser_returns: [LaserReturn::default(); LASERS_PER_FIRING],
        };
        for j in 0..LASERS_PER_FIRING {
            firing.laser_returns[j] = self.laser_return(j);
        }
        firing
    }
}
