// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Packet capture file to replay (pcap or pcapng).
    #[arg(env)]
    pub capture: String,

    /// Calibration XML file.  Leave empty to use the built-in HDL-32
    /// table.
    #[arg(long, env, default_value = "")]
    pub calibration: String,

    /// Decode a single frame and print a summary.
    #[arg(long, env)]
    pub frame: Option<usize>,

    /// Merge this many trailing frames into the decoded frame.
    #[arg(long, env, default_value = "0")]
    pub trailing_frames: u32,

    /// Keep only every (N+1)-th firing block while decoding.
    #[arg(long, env, default_value = "0")]
    pub points_skip: usize,

    /// Write the decoded frame as CSV to this path.
    #[arg(long, env)]
    pub csv: Option<String>,

    /// Copy a frame range into this capture file instead of decoding.
    #[arg(long, env)]
    pub dump: Option<String>,

    /// First frame of the dump range.
    #[arg(long, env, default_value = "0")]
    pub start: usize,

    /// Last frame of the dump range, inclusive.  Defaults to the last
    /// frame of the capture.
    #[arg(long, env)]
    pub end: Option<usize>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}
