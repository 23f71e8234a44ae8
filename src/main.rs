// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture replay CLI: index a capture, decode frames to CSV, or copy a
//! frame range into a new capture.

mod args;

use args::Args;
use clap::Parser as _;
use std::io::Write as _;
use tracing::info;
use tracing_subscriber::{Layer as _, Registry, layer::SubscriberExt as _};
use velodyne_replay::{HdlFrame, HdlReader};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(args.rust_log);
    let subscriber = Registry::default().with(stdout_log);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    tracing_log::LogTracer::init()?;

    let mut reader = HdlReader::new();
    reader.set_file(&args.capture);
    reader.set_calibration_file(&args.calibration);
    reader.set_points_skip(args.points_skip);

    let frames = reader.build_index()?;
    info!("{}: {} frames", args.capture, frames);

    if let Some(out) = &args.dump {
        let end = args.end.unwrap_or(frames.saturating_sub(1));
        reader.dump_frames(args.start, end, out)?;
        info!("wrote frames {}..={} to {}", args.start, end, out);
        return Ok(());
    }

    if let Some(frame_number) = args.frame {
        let frame = if args.trailing_frames > 0 {
            reader.get_frame_range(
                frame_number as i64 - args.trailing_frames as i64,
                args.trailing_frames,
            )?
        } else {
            reader.get_frame(frame_number)?
        };

        println!("frame {}: {} points", frame_number, frame.len());
        if let Some(path) = &args.csv {
            write_csv(&frame, path)?;
            println!("wrote {} rows to {}", frame.len(), path);
        }
        return Ok(());
    }

    // Default action: decode everything and print per-frame point counts.
    for n in 0..frames {
        let frame = reader.get_frame(n)?;
        println!("frame {:4}: {} points", n, frame.len());
    }

    Ok(())
}

fn write_csv(frame: &HdlFrame, path: &str) -> std::io::Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "{}", HdlFrame::csv_header())?;
    for i in 0..frame.len() {
        writeln!(out, "{}", frame.csv_row(i))?;
    }
    out.flush()
}
