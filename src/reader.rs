// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Random-access frame reader.
//!
//! [`HdlReader`] ties the pieces together: it owns the capture handle, the
//! frame index, and the assembler, and serves random-access frame requests
//! by seeking to an indexed packet position and running the assembler until
//! a frame completes. It also copies raw packet ranges between frame
//! boundaries into a new capture.
//!
//! A reader is single-threaded and owns its capture exclusively; two
//! readers on the same file are independent.

use crate::assembler::FrameAssembler;
use crate::calib::CalibrationTable;
use crate::frame::HdlFrame;
use crate::hdl::{Error, PoseInterpolator};
use crate::index::FrameIndex;
use crate::packet::{CAPTURED_PACKET_SIZE, DataPacketSlice, FIRINGS_PER_PACKET, MAX_LASERS};
use crate::packet_file::{PacketFileReader, PacketFileWriter};
use std::path::{Path, PathBuf};

/// Facade serving random-access frame requests from a packet capture.
pub struct HdlReader {
    file_name: Option<PathBuf>,
    capture: Option<PacketFileReader>,
    index: Option<FrameIndex>,
    assembler: FrameAssembler,
}

impl HdlReader {
    /// Create a reader with the built-in HDL-32 calibration.
    pub fn new() -> Self {
        Self {
            file_name: None,
            capture: None,
            index: None,
            assembler: FrameAssembler::new(CalibrationTable::hdl32()),
        }
    }

    /// Set the capture file to read. Invalidates the index and unloads any
    /// decoded data; the file is opened lazily on the next request.
    pub fn set_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.file_name = Some(path.into());
        self.capture = None;
        self.index = None;
        self.assembler.unload();
    }

    /// Set the calibration file. An empty path restores the HDL-32
    /// defaults; an unreadable or malformed file is reported and leaves
    /// the previous table in place.
    pub fn set_calibration_file<P: AsRef<Path>>(&mut self, path: P) {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            self.assembler.calibration_mut().load_hdl32_defaults();
        } else {
            // Errors are already logged by the loader; the table keeps
            // whatever it held before.
            let _ = self.assembler.calibration_mut().load_xml_file(path);
        }
    }

    /// Replace the laser keep/suppress mask.
    pub fn set_laser_selection(&mut self, mask: [bool; MAX_LASERS]) {
        self.assembler.calibration_mut().set_laser_selection(mask);
    }

    /// Keep only every (N+1)-th firing block; zero keeps everything.
    pub fn set_points_skip(&mut self, points_skip: usize) {
        self.assembler.set_points_skip(points_skip);
    }

    /// Install or remove a sensor-pose interpolator.
    pub fn set_pose_interpolator(
        &mut self,
        interpolator: Option<Box<dyn PoseInterpolator + Send>>,
    ) {
        self.assembler.set_interpolator(interpolator);
    }

    /// Enable or disable applying the interpolated pose to points.
    pub fn set_apply_transform(&mut self, apply: bool) {
        self.assembler.set_apply_transform(apply);
    }

    /// The active calibration table.
    pub fn calibration(&self) -> &CalibrationTable {
        self.assembler.calibration()
    }

    /// Build the frame index if it does not exist yet; returns the frame
    /// count. Rebuilding after `set_file` starts from scratch.
    pub fn build_index(&mut self) -> Result<usize, Error> {
        if self.index.is_none() {
            let capture = self.capture_mut()?;
            let index = FrameIndex::scan(capture);
            self.index = Some(index);
        }
        Ok(self.number_of_frames())
    }

    /// Number of indexed frames; zero until the index is built.
    pub fn number_of_frames(&self) -> usize {
        self.index.as_ref().map_or(0, FrameIndex::len)
    }

    /// Decode a single frame.
    ///
    /// Builds the index on demand. Requests at or past the frame count
    /// fail with [`Error::FrameOutOfRange`] and decode nothing.
    pub fn get_frame(&mut self, frame_number: usize) -> Result<HdlFrame, Error> {
        self.build_index()?;
        let entry = self.index_entry(frame_number)?;

        self.assembler.unload();
        self.assembler.set_skip(entry.skip);
        let capture = self.capture_mut()?;
        capture.set_position(entry.position);

        self.run_until_frame()
    }

    /// Decode `count + 1` consecutive frames starting at `start_frame`
    /// into one aggregate frame: the frame itself plus `count` trailing
    /// rotations merged in packet order.
    ///
    /// A negative start is clamped to zero; the count grows by the same
    /// amount so the window keeps its far end.
    pub fn get_frame_range(&mut self, start_frame: i64, count: u32) -> Result<HdlFrame, Error> {
        self.build_index()?;

        // A window reaching before the first frame keeps its far end:
        // clamp the start and extend the count to match.
        let (start_frame, count) = if start_frame < 0 {
            (0, count + (-start_frame) as u32)
        } else {
            (start_frame as usize, count)
        };
        let entry = self.index_entry(start_frame)?;

        self.assembler.unload();
        self.assembler.set_skip(entry.skip);
        self.assembler.set_split_counter(count);
        let capture = self.capture_mut()?;
        capture.set_position(entry.position);

        let result = self.run_until_frame();
        self.assembler.set_split_counter(0);
        result
    }

    /// Copy every captured record between the start of `start_frame` and
    /// the end of `end_frame` (inclusive) into a new capture file. Only
    /// full 1,248-byte HDL records are written.
    pub fn dump_frames<P: AsRef<Path>>(
        &mut self,
        start_frame: usize,
        end_frame: usize,
        path: P,
    ) -> Result<(), Error> {
        self.build_index()?;
        let entry = self.index_entry(start_frame)?;

        let mut writer = PacketFileWriter::create(path)?;
        let capture = self.capture_mut()?;
        capture.set_position(entry.position);

        let mut skip = entry.skip;
        let mut last_azimuth: u32 = 0;
        let mut current_frame = start_frame;

        while current_frame <= end_frame {
            let Some(packet) = capture.next_packet() else {
                break;
            };

            if packet.frame.len() == CAPTURED_PACKET_SIZE {
                writer.write_packet(packet)?;
            }

            // Count the frame boundaries this packet crosses.
            let Ok(data) = DataPacketSlice::from_slice(&packet.payload) else {
                skip = 0;
                continue;
            };
            for i in skip..FIRINGS_PER_PACKET {
                let azimuth = data.firing(i).rotational_position() as u32;
                if azimuth < last_azimuth {
                    current_frame += 1;
                    if current_frame > end_frame {
                        break;
                    }
                }
                last_azimuth = azimuth;
            }
            skip = 0;
        }

        writer.finish()
    }

    fn index_entry(&self, frame_number: usize) -> Result<crate::index::FrameIndexEntry, Error> {
        let available = self.number_of_frames();
        self.index
            .as_ref()
            .and_then(|index| index.get(frame_number))
            .copied()
            .ok_or(Error::FrameOutOfRange {
                requested: frame_number,
                available,
            })
    }

    fn capture_mut(&mut self) -> Result<&mut PacketFileReader, Error> {
        if self.capture.is_none() {
            let path = self.file_name.as_deref().ok_or(Error::FileNotSet)?;
            self.capture = Some(PacketFileReader::open(path)?);
        }
        self.capture.as_mut().ok_or(Error::FileNotSet)
    }

    /// Feed packets to the assembler until a frame completes; the end of
    /// the stream forces out whatever is under construction.
    fn run_until_frame(&mut self) -> Result<HdlFrame, Error> {
        let Self {
            capture, assembler, ..
        } = self;
        let capture = capture.as_mut().ok_or(Error::FileNotSet)?;

        loop {
            let Some(packet) = capture.next_packet() else {
                break;
            };
            if assembler.process_packet(&packet.payload)
                && let Some(frame) = assembler.take_frame()
            {
                return Ok(frame);
            }
        }

        assembler.split_frame(true);
        match assembler.take_frame() {
            Some(frame) => Ok(frame),
            None => Ok(HdlFrame::new()),
        }
    }
}

impl Default for HdlReader {
    fn default() -> Self {
        Self::new()
    }
}
