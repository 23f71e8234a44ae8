// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame index pre-scan.
//!
//! A single sequential pass over the capture records, for every frame, the
//! position of the packet containing its first firing and how many leading
//! firing blocks of that packet still belong to the previous frame. Random
//! access frame requests then seek straight to the right packet.

use crate::packet::{DataPacketSlice, FIRINGS_PER_PACKET};
use crate::packet_file::{FilePosition, PacketFileReader};

/// Nominal HDL data packet period in microseconds at 10 Hz rotation.
const NOMINAL_PACKET_PERIOD_US: f64 = 553.0;

/// Timestamp gap above which packets are assumed to have been dropped.
const PACKET_GAP_THRESHOLD_US: u32 = 600;

/// Where a frame starts: the packet position and the number of leading
/// firing blocks belonging to the previous frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameIndexEntry {
    pub position: FilePosition,
    pub skip: usize,
}

/// Ordered frame start entries for one capture.
#[derive(Clone, Debug, Default)]
pub struct FrameIndex {
    entries: Vec<FrameIndexEntry>,
}

impl FrameIndex {
    /// Scan the capture from the start and index every frame boundary.
    ///
    /// Mis-sized payloads are skipped without losing position. Timestamp
    /// gaps larger than the drop threshold are reported as a diagnostic
    /// only; they do not affect frame boundaries.
    pub fn scan(reader: &mut PacketFileReader) -> FrameIndex {
        reader.reset();

        let mut entries = Vec::new();
        let mut last_azimuth: u32 = 0;
        let mut last_timestamp: u32 = 0;
        let mut saw_data_packet = false;

        entries.push(FrameIndexEntry {
            position: reader.get_position(),
            skip: 0,
        });

        loop {
            let position = reader.get_position();
            let Some(packet) = reader.next_packet() else {
                break;
            };

            let Ok(data) = DataPacketSlice::from_slice(&packet.payload) else {
                continue;
            };
            saw_data_packet = true;

            let timestamp = data.gps_timestamp();
            let gap = timestamp.wrapping_sub(last_timestamp);
            if gap > PACKET_GAP_THRESHOLD_US && last_timestamp != 0 {
                log::warn!(
                    "missed {} packets",
                    (gap as f64 / NOMINAL_PACKET_PERIOD_US).round() as u32
                );
            }

            for i in 0..FIRINGS_PER_PACKET {
                let azimuth = data.firing(i).rotational_position() as u32;
                if azimuth < last_azimuth {
                    entries.push(FrameIndexEntry { position, skip: i });
                }
                last_azimuth = azimuth;
            }

            last_timestamp = timestamp;
        }

        // A capture without a single data packet has no frames at all.
        if !saw_data_packet {
            entries.clear();
        }

        FrameIndex { entries }
    }

    /// Number of indexed frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the capture held no frames.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start entry for the given frame.
    pub fn get(&self, frame: usize) -> Option<&FrameIndexEntry> {
        self.entries.get(frame)
    }

    /// All entries, in frame order.
    pub fn entries(&self) -> &[FrameIndexEntry] {
        &self.entries
    }
}
