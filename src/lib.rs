// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne HDL Capture Replay Library
//!
//! This library decodes captured Velodyne HDL-32/64 sensor packets into
//! columnar point cloud frames with random access by frame number.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │ PacketFileReader │ ──► │ FrameAssembler│ ──► │  HdlFrame       │
//! │ (pcap capture)   │     │ (azimuth wrap │     │  (columnar SoA) │
//! │                  │     │  + dual pairs)│     │                 │
//! └──────────────────┘     └───────────────┘     └─────────────────┘
//!          ▲                       ▲
//!          │ seek                  │ per-firing lookup
//! ┌──────────────────┐     ┌───────────────────────┐
//! │   FrameIndex     │     │ CalibrationTable +    │
//! │ (pre-scan, one   │     │ TrigTables            │
//! │  entry per frame)│     │ (immutable inputs)    │
//! └──────────────────┘     └───────────────────────┘
//! ```
//!
//! [`HdlReader`] orchestrates the pieces: it builds the index on demand,
//! seeks the capture to a frame boundary, and runs the assembler until the
//! frame completes. Frames are cut wherever the reported rotational
//! position wraps low; dual-return echo pairs are reconciled in place as
//! the second echo arrives.
//!
//! # Example
//!
//! ```ignore
//! use velodyne_replay::HdlReader;
//!
//! let mut reader = HdlReader::new();
//! reader.set_file("capture.pcap");
//! reader.set_calibration_file("");   // built-in HDL-32 table
//!
//! let frames = reader.build_index()?;
//! for n in 0..frames {
//!     let frame = reader.get_frame(n)?;
//!     println!("frame {}: {} points", n, frame.len());
//! }
//! ```
//!
//! # Modules
//!
//! - [`packet`]: 1,206-byte HDL wire format
//! - [`calib`]: per-laser geometric calibration and XML loading
//! - [`assembler`]: streaming frame assembly and dual-return pairing
//! - [`frame`]: columnar point cloud output
//! - [`index`]: frame boundary pre-scan
//! - [`packet_file`]: pcap capture reading/writing with seekable positions
//! - [`reader`]: random-access facade

pub mod assembler;
pub mod calib;
pub mod frame;
pub mod hdl;
pub mod index;
pub mod packet;
pub mod packet_file;
pub mod reader;
pub mod trig;

// Re-exports for convenience
pub use assembler::FrameAssembler;
pub use calib::{CalibrationTable, HDL32_VERTICAL_CORRECTIONS, LaserCorrection};
pub use frame::HdlFrame;
pub use hdl::{
    DUAL_DISTANCE_FAR, DUAL_DISTANCE_NEAR, DUAL_DOUBLED, DUAL_INTENSITY_HIGH, DUAL_INTENSITY_LOW,
    Error, PoseInterpolator, PoseSample,
};
pub use index::{FrameIndex, FrameIndexEntry};
pub use packet::{DataPacket, DataPacketSlice, FiringBlock, LaserReturn};
pub use packet_file::{CapturedPacket, FilePosition, PacketFileReader, PacketFileWriter};
pub use reader::HdlReader;
pub use trig::TrigTables;
