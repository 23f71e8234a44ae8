// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Streaming frame assembly.
//!
//! The assembler consumes HDL data payloads in capture order and cuts the
//! firing stream into full 360° frames wherever the rotational position
//! wraps low. Each kept return is projected through the per-laser
//! calibration into Cartesian space; dual-return pairs (two adjacent
//! firing blocks sharing a rotational position) are reconciled by
//! rewriting the earlier point's flag and delta columns once the second
//! echo arrives.
//!
//! # State
//!
//! The per-laser back-references in `last_point_id` are plain indices into
//! the current frame's columns, not references: the columns grow while a
//! frame is under construction, and an index stays valid across any
//! reallocation.

use crate::calib::CalibrationTable;
use crate::frame::HdlFrame;
use crate::hdl::{
    DUAL_DISTANCE_FAR, DUAL_DISTANCE_NEAR, DUAL_DOUBLED, DUAL_INTENSITY_HIGH, DUAL_INTENSITY_LOW,
    PoseInterpolator,
};
use crate::packet::{
    DISTANCE_RESOLUTION, DataPacketSlice, FIRINGS_PER_PACKET, FiringBlockSlice, LASERS_PER_FIRING,
    LaserReturn, MAX_LASERS,
};
use crate::trig::TrigTables;

/// Streaming state machine turning packets into completed [`HdlFrame`]s.
pub struct FrameAssembler {
    current: HdlFrame,
    completed: Vec<HdlFrame>,
    /// Last seen rotational position, hundredths of a degree.
    last_azimuth: u32,
    /// Per-laser index of the most recent point in the current frame,
    /// -1 if none since the last split.
    last_point_id: [i64; MAX_LASERS],
    /// Point count at the start of the current first-return block; a dual
    /// return only has a matching partner if its laser fired at or past
    /// this mark.
    first_point_id_this_return: i64,
    /// Leading firing blocks to ignore on the next packet, set after
    /// seeking to a mid-packet frame boundary.
    skip: usize,
    /// Remaining frame splits to swallow when merging consecutive frames.
    split_counter: u32,
    /// Keep only every (N+1)-th firing block when nonzero.
    points_skip: usize,
    apply_transform: bool,
    interpolator: Option<Box<dyn PoseInterpolator + Send>>,
    calibration: CalibrationTable,
    trig: TrigTables,
}

impl FrameAssembler {
    pub fn new(calibration: CalibrationTable) -> Self {
        Self {
            current: HdlFrame::new(),
            completed: Vec::new(),
            last_azimuth: 0,
            last_point_id: [-1; MAX_LASERS],
            first_point_id_this_return: 0,
            skip: 0,
            split_counter: 0,
            points_skip: 0,
            apply_transform: false,
            interpolator: None,
            calibration,
            trig: TrigTables::new(),
        }
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationTable {
        &mut self.calibration
    }

    /// Ignore the first `skip` firing blocks of the next packet.
    pub fn set_skip(&mut self, skip: usize) {
        self.skip = skip;
    }

    /// Swallow the next `count` frame boundaries, merging the frames they
    /// would have separated.
    pub fn set_split_counter(&mut self, count: u32) {
        self.split_counter = count;
    }

    /// Keep only every (N+1)-th firing block; zero keeps everything.
    pub fn set_points_skip(&mut self, points_skip: usize) {
        self.points_skip = points_skip;
    }

    pub fn set_apply_transform(&mut self, apply: bool) {
        self.apply_transform = apply;
    }

    /// Install or remove the sensor-pose interpolator. Poses are only
    /// applied while `apply_transform` is set.
    pub fn set_interpolator(&mut self, interpolator: Option<Box<dyn PoseInterpolator + Send>>) {
        self.interpolator = interpolator;
    }

    /// Reset all per-run state: discards the frame under construction and
    /// any completed frames. Called before each seek.
    pub fn unload(&mut self) {
        self.last_point_id = [-1; MAX_LASERS];
        self.last_azimuth = 0;
        self.completed.clear();
        self.current = HdlFrame::new();
    }

    /// The frame currently under construction.
    pub fn current_frame(&self) -> &HdlFrame {
        &self.current
    }

    /// Remove and return the oldest completed frame, if any.
    pub fn take_frame(&mut self) -> Option<HdlFrame> {
        if self.completed.is_empty() {
            None
        } else {
            Some(self.completed.remove(0))
        }
    }

    /// Decode one payload into the current frame.
    ///
    /// Payloads that are not 1,206-byte data packets are skipped silently.
    /// Returns true when the packet completed at least one frame.
    pub fn process_packet(&mut self, data: &[u8]) -> bool {
        let Ok(packet) = DataPacketSlice::from_slice(data) else {
            return false;
        };

        let gps_timestamp = packet.gps_timestamp();
        let (azimuth_offset, translation) = self.compute_orientation(gps_timestamp);

        let completed_before = self.completed.len();
        let start = self.skip;
        self.skip = 0;

        for i in start..FIRINGS_PER_PACKET {
            let firing = packet.firing(i);
            let rotational_position = firing.rotational_position() as u32;

            if rotational_position < self.last_azimuth {
                self.split_frame(false);
            }

            if self.points_skip == 0 || i % (self.points_skip + 1) == 0 {
                self.process_firing(&firing, gps_timestamp, azimuth_offset, translation);
            }

            self.last_azimuth = rotational_position;
        }

        self.completed.len() > completed_before
    }

    /// Close the current frame and start a new one.
    ///
    /// While the split counter is positive an unforced split is swallowed
    /// instead, which concatenates consecutive rotations into one frame.
    pub fn split_frame(&mut self, force: bool) {
        if self.split_counter > 0 && !force {
            self.split_counter -= 1;
            return;
        }

        self.last_point_id = [-1; MAX_LASERS];
        self.completed.push(std::mem::take(&mut self.current));
    }

    fn compute_orientation(&self, timestamp: u32) -> (u32, [f64; 3]) {
        if self.apply_transform
            && let Some(interpolator) = &self.interpolator
        {
            let pose = interpolator.sample(timestamp);
            let mut yaw = pose.sin_yaw.atan2(pose.cos_yaw);
            if yaw < 0.0 {
                yaw += 2.0 * std::f64::consts::PI;
            }
            let azimuth_offset = (yaw.to_degrees() * 100.0).round() as u32;
            (azimuth_offset, [pose.x, pose.y, pose.z])
        } else {
            (0, [0.0; 3])
        }
    }

    fn process_firing(
        &mut self,
        firing: &FiringBlockSlice,
        gps_timestamp: u32,
        azimuth_offset: u32,
        translation: [f64; 3],
    ) {
        let offset = firing.laser_offset();
        let azimuth = firing.rotational_position();

        // A dual-return sensor emits two adjacent blocks with identical
        // rotational position; the second of the pair reconciles against
        // the first.
        let dual = self.last_azimuth == azimuth as u32;
        if !dual {
            self.first_point_id_this_return = self.current.len() as i64;
        }

        for j in 0..LASERS_PER_FIRING {
            let laser_id = (j + offset) as u8;
            let laser_return = firing.laser_return(j);
            if laser_return.distance != 0 && self.calibration.selection(laser_id as usize) {
                self.push_firing(
                    laser_id,
                    azimuth,
                    gps_timestamp,
                    laser_return,
                    azimuth_offset,
                    translation,
                    dual,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_firing(
        &mut self,
        laser_id: u8,
        azimuth: u16,
        timestamp: u32,
        laser_return: LaserReturn,
        azimuth_offset: u32,
        translation: [f64; 3],
        dual: bool,
    ) {
        let correction = *self.calibration.correction(laser_id as usize);
        let this_point_id = self.current.len() as i64;

        let adjusted = (azimuth as u32 + azimuth_offset) % 36000;

        // The table holds plain azimuth trig; a corrected laser shifts the
        // angle and must compute directly.
        let (sin_azimuth, cos_azimuth) = if correction.azimuth_correction == 0.0 {
            (self.trig.sin(adjusted), self.trig.cos(adjusted))
        } else {
            let rad = ((adjusted as f64 / 100.0) - correction.azimuth_correction).to_radians();
            (rad.sin(), rad.cos())
        };

        let distance_m =
            laser_return.distance as f64 * DISTANCE_RESOLUTION + correction.distance_correction;
        let xy_distance = distance_m * correction.cos_vert - correction.sin_vert_offset;

        let x = xy_distance * sin_azimuth - correction.horizontal_offset_correction * cos_azimuth
            + translation[0];
        let y = xy_distance * cos_azimuth
            + correction.horizontal_offset_correction * sin_azimuth
            + translation[1];
        let z = distance_m * correction.sin_vert + correction.cos_vert_offset + translation[2];

        let (flags, intensity_delta, distance_delta) = if dual {
            self.reconcile_dual(laser_id, laser_return.intensity, distance_m)
        } else {
            (DUAL_DOUBLED, 0, 0.0)
        };

        self.current.push(
            azimuth,
            laser_return.intensity,
            laser_id,
            timestamp,
            [x as f32, y as f32, z as f32],
            distance_m,
            flags,
            intensity_delta,
            distance_delta,
        );
        self.last_point_id[laser_id as usize] = this_point_id;
    }

    /// Pair the incoming second return with its first-return partner,
    /// rewriting the partner's flags and deltas in place. Returns the
    /// columns for the incoming point.
    fn reconcile_dual(&mut self, laser_id: u8, intensity: u8, distance_m: f64) -> (u32, i16, f64) {
        let partner = self.last_point_id[laser_id as usize];
        if partner < self.first_point_id_this_return {
            // No matching point from the first return (skipped?)
            return (DUAL_DOUBLED, 0, 0.0);
        }

        let partner = partner as usize;
        let intensity = intensity as i16;
        let partner_intensity = self.current.intensity_at(partner) as i16;
        let partner_distance = self.current.distance_at(partner);

        let mut first_flags = self.current.flags_at(partner);
        let mut second_flags = 0u32;

        if partner_intensity < intensity {
            first_flags &= !DUAL_INTENSITY_HIGH;
            second_flags |= DUAL_INTENSITY_HIGH;
        } else {
            first_flags &= !DUAL_INTENSITY_LOW;
            second_flags |= DUAL_INTENSITY_LOW;
        }

        if partner_distance < distance_m {
            first_flags &= !DUAL_DISTANCE_FAR;
            second_flags |= DUAL_DISTANCE_FAR;
        } else {
            first_flags &= !DUAL_DISTANCE_NEAR;
            second_flags |= DUAL_DISTANCE_NEAR;
        }

        let intensity_sum = partner_intensity + intensity;
        let mean_distance = 0.5 * (partner_distance + distance_m);

        self.current.set_flags_at(partner, first_flags);
        self.current
            .set_intensity_delta_at(partner, 2 * partner_intensity - intensity_sum);
        self.current
            .set_distance_delta_at(partner, partner_distance - mean_distance);

        (
            second_flags,
            2 * intensity - intensity_sum,
            distance_m - mean_distance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdl::PoseSample;
    use crate::packet::{BLOCK_0_TO_31, DataPacket, PACKET_SIZE};

    /// Packet with the given per-block azimuths; laser 0 of every block
    /// fires with the given distance/intensity.
    fn make_packet(azimuths: [u16; FIRINGS_PER_PACKET], distance: u16, intensity: u8) -> Vec<u8> {
        let mut packet = DataPacket::default();
        for (i, firing) in packet.firings.iter_mut().enumerate() {
            firing.block_identifier = BLOCK_0_TO_31;
            firing.rotational_position = azimuths[i];
            firing.laser_returns[0] = LaserReturn {
                distance,
                intensity,
            };
        }
        packet.to_bytes().to_vec()
    }

    fn ramp(start: u16, step: u16) -> [u16; FIRINGS_PER_PACKET] {
        let mut azimuths = [0u16; FIRINGS_PER_PACKET];
        for (i, az) in azimuths.iter_mut().enumerate() {
            *az = start + i as u16 * step;
        }
        azimuths
    }

    fn assembler() -> FrameAssembler {
        FrameAssembler::new(CalibrationTable::hdl32())
    }

    #[test]
    fn test_ignores_mis_sized_payload() {
        let mut assembler = assembler();
        assert!(!assembler.process_packet(&[0u8; 100]));
        assert!(!assembler.process_packet(&[0u8; PACKET_SIZE + 1]));
        assert!(assembler.current_frame().is_empty());
    }

    #[test]
    fn test_all_zero_distances_make_no_points() {
        let mut assembler = assembler();
        assembler.process_packet(&make_packet(ramp(0, 100), 0, 0));
        assert!(assembler.current_frame().is_empty());
        assert!(assembler.take_frame().is_none());
    }

    #[test]
    fn test_splits_on_azimuth_wrap() {
        let mut assembler = assembler();
        assert!(!assembler.process_packet(&make_packet(ramp(30000, 100), 1000, 50)));
        // Azimuth wraps low at the first firing of the second packet.
        assert!(assembler.process_packet(&make_packet(ramp(100, 100), 1000, 50)));

        let frame = assembler.take_frame().unwrap();
        assert_eq!(frame.len(), 12);
        assert!(frame.columns_consistent());
        assert!(frame.azimuth().iter().all(|&az| az >= 30000));
        // Second rotation is under construction.
        assert_eq!(assembler.current_frame().len(), 12);
        assert!(assembler.take_frame().is_none());
    }

    #[test]
    fn test_split_counter_merges_rotations() {
        let mut assembler = assembler();
        assembler.set_split_counter(1);
        assembler.process_packet(&make_packet(ramp(30000, 100), 1000, 50));
        // First wrap is swallowed by the counter.
        assert!(!assembler.process_packet(&make_packet(ramp(100, 100), 1000, 50)));
        // Second wrap splits the two merged rotations off.
        assert!(assembler.process_packet(&make_packet(ramp(50, 100), 1000, 50)));

        let frame = assembler.take_frame().unwrap();
        assert_eq!(frame.len(), 24);
    }

    #[test]
    fn test_forced_split_ignores_counter() {
        let mut assembler = assembler();
        assembler.set_split_counter(5);
        assembler.process_packet(&make_packet(ramp(0, 100), 1000, 50));
        assembler.split_frame(true);
        assert_eq!(assembler.take_frame().unwrap().len(), 12);
    }

    #[test]
    fn test_skip_drops_leading_firings() {
        let mut assembler = assembler();
        assembler.set_skip(6);
        assembler.process_packet(&make_packet(ramp(0, 100), 1000, 50));
        assert_eq!(assembler.current_frame().len(), 6);
        assert_eq!(assembler.current_frame().azimuth()[0], 600);
    }

    #[test]
    fn test_points_skip_decimates_blocks() {
        let mut assembler = assembler();
        assembler.set_points_skip(1);
        assembler.process_packet(&make_packet(ramp(0, 100), 1000, 50));
        // Even block indices only.
        assert_eq!(assembler.current_frame().len(), 6);
        assert_eq!(assembler.current_frame().azimuth()[1], 200);
    }

    #[test]
    fn test_laser_selection_suppresses_points() {
        let mut assembler = assembler();
        let mut mask = [true; MAX_LASERS];
        mask[0] = false;
        assembler.calibration_mut().set_laser_selection(mask);
        assembler.process_packet(&make_packet(ramp(0, 100), 1000, 50));
        assert!(assembler.current_frame().is_empty());
    }

    #[test]
    fn test_projection_flat_laser() {
        // Laser 15 has zero vertical correction in the HDL-32 schedule, so
        // a firing at azimuth 9000 (90°) lands on the +X axis.
        let mut packet = DataPacket::default();
        for firing in packet.firings.iter_mut() {
            firing.rotational_position = 9000;
        }
        packet.firings[0].laser_returns[15] = LaserReturn {
            distance: 1000,
            intensity: 99,
        };

        let mut assembler = assembler();
        assembler.process_packet(&packet.to_bytes());

        let frame = assembler.current_frame();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.laser_id()[0], 15);
        assert_eq!(frame.distance_m()[0], 2.0);
        assert!((frame.x()[0] - 2.0).abs() < 1e-6);
        assert!(frame.y()[0].abs() < 1e-6);
        assert!(frame.z()[0].abs() < 1e-6);
    }

    #[test]
    fn test_dual_return_reconciliation() {
        // Two consecutive blocks at azimuth 18000, laser 0 distances
        // 1000/2000 raw, intensities 40/80.
        let mut packet = DataPacket::default();
        for firing in packet.firings.iter_mut() {
            firing.rotational_position = 18000;
        }
        packet.firings[0].laser_returns[0] = LaserReturn {
            distance: 1000,
            intensity: 40,
        };
        packet.firings[1].laser_returns[0] = LaserReturn {
            distance: 2000,
            intensity: 80,
        };

        let mut assembler = assembler();
        assembler.process_packet(&packet.to_bytes());

        let frame = assembler.current_frame();
        assert_eq!(frame.len(), 2);

        // The first point loses HIGH (its intensity is lower) and FAR (its
        // distance is nearer); the second keeps exactly those.
        assert_eq!(
            frame.dual_flags()[0],
            DUAL_DISTANCE_NEAR | DUAL_INTENSITY_LOW
        );
        assert_eq!(
            frame.dual_flags()[1],
            DUAL_DISTANCE_FAR | DUAL_INTENSITY_HIGH
        );

        // Deltas are pre-doubled and symmetric around the pair mean.
        assert_eq!(frame.dual_intensity_delta()[0], -40);
        assert_eq!(frame.dual_intensity_delta()[1], 40);
        assert_eq!(frame.dual_distance_delta()[0], -1.0);
        assert_eq!(frame.dual_distance_delta()[1], 1.0);

        // distance_m column carries the calibrated ranges.
        assert_eq!(frame.distance_m()[0], 2.0);
        assert_eq!(frame.distance_m()[1], 4.0);
    }

    #[test]
    fn test_dual_return_without_partner_keeps_doubled() {
        // Laser 0 fires only in the second block of the pair: there is no
        // first-return partner to reconcile against.
        let mut packet = DataPacket::default();
        for firing in packet.firings.iter_mut() {
            firing.rotational_position = 18000;
        }
        packet.firings[0].laser_returns[1] = LaserReturn {
            distance: 1500,
            intensity: 10,
        };
        packet.firings[1].laser_returns[0] = LaserReturn {
            distance: 2000,
            intensity: 80,
        };

        let mut assembler = assembler();
        assembler.process_packet(&packet.to_bytes());

        let frame = assembler.current_frame();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.dual_flags()[1], DUAL_DOUBLED);
        assert_eq!(frame.dual_intensity_delta()[1], 0);
        assert_eq!(frame.dual_distance_delta()[1], 0.0);
    }

    #[test]
    fn test_azimuth_correction_bypasses_tables() {
        // Laser 5 with a 1° azimuth correction at raw azimuth 18000 must
        // project through (180 - 1)°, not the table entry for 180°.
        let mut assembler = assembler();
        assembler.calibration_mut().load_xml(
            r#"<boost_serialization><DB><points_><item><px>
                <id_>5</id_>
                <rotCorrection_>1.0</rotCorrection_>
                <vertCorrection_>0</vertCorrection_>
                <distCorrection_>0</distCorrection_>
                <vertOffsetCorrection_>0</vertOffsetCorrection_>
                <horizOffsetCorrection_>0</horizOffsetCorrection_>
            </px></item></points_></DB></boost_serialization>"#,
        )
        .unwrap();

        let mut packet = DataPacket::default();
        for firing in packet.firings.iter_mut() {
            firing.rotational_position = 18000;
        }
        packet.firings[0].laser_returns[5] = LaserReturn {
            distance: 1000,
            intensity: 10,
        };
        assembler.process_packet(&packet.to_bytes());

        let frame = assembler.current_frame();
        let rad = (179.0f64).to_radians();
        assert!((frame.x()[0] as f64 - 2.0 * rad.sin()).abs() < 1e-6);
        assert!((frame.y()[0] as f64 - 2.0 * rad.cos()).abs() < 1e-6);
        // The table path would have produced sin(180°) ≈ 0.
        assert!(frame.x()[0].abs() > 0.03);
    }

    #[test]
    fn test_distance_correction_applies() {
        // XML distCorrection_ of 25 cm: raw distance 500 (1.0 m) becomes
        // 1.25 m.
        let mut assembler = assembler();
        assembler.calibration_mut().load_xml(
            r#"<boost_serialization><DB><points_><item><px>
                <id_>0</id_>
                <rotCorrection_>0</rotCorrection_>
                <vertCorrection_>0</vertCorrection_>
                <distCorrection_>25</distCorrection_>
                <vertOffsetCorrection_>0</vertOffsetCorrection_>
                <horizOffsetCorrection_>0</horizOffsetCorrection_>
            </px></item></points_></DB></boost_serialization>"#,
        )
        .unwrap();

        let mut packet = DataPacket::default();
        packet.firings[0].laser_returns[0] = LaserReturn {
            distance: 500,
            intensity: 10,
        };
        assembler.process_packet(&packet.to_bytes());
        assert_eq!(assembler.current_frame().distance_m()[0], 1.25);
    }

    #[test]
    fn test_pose_transform_offsets_azimuth_and_translates() {
        let mut assembler = assembler();
        assembler.set_apply_transform(true);
        assembler.set_interpolator(Some(Box::new(|_ts: u32| PoseSample {
            x: 10.0,
            y: 20.0,
            z: 30.0,
            cos_yaw: 0.0,
            sin_yaw: 1.0,
        })));

        // Flat laser at raw azimuth 0 with a 90° yaw offset lands on +X,
        // then the translation moves it.
        let mut packet = DataPacket::default();
        packet.firings[0].laser_returns[15] = LaserReturn {
            distance: 1000,
            intensity: 1,
        };
        assembler.process_packet(&packet.to_bytes());

        let frame = assembler.current_frame();
        // Raw azimuth column is unaffected by the pose offset.
        assert_eq!(frame.azimuth()[0], 0);
        assert!((frame.x()[0] - 12.0).abs() < 1e-5);
        assert!((frame.y()[0] - 20.0).abs() < 1e-5);
        assert!((frame.z()[0] - 30.0).abs() < 1e-5);
    }

    #[test]
    fn test_transform_disabled_ignores_interpolator() {
        let mut assembler = assembler();
        assembler.set_interpolator(Some(Box::new(|_ts: u32| PoseSample {
            x: 100.0,
            y: 0.0,
            z: 0.0,
            cos_yaw: 1.0,
            sin_yaw: 0.0,
        })));

        let mut packet = DataPacket::default();
        packet.firings[0].laser_returns[15] = LaserReturn {
            distance: 1000,
            intensity: 1,
        };
        assembler.process_packet(&packet.to_bytes());
        assert!(assembler.current_frame().x()[0].abs() < 1.0);
    }

    #[test]
    fn test_unload_resets_state() {
        let mut assembler = assembler();
        assembler.process_packet(&make_packet(ramp(30000, 100), 1000, 50));
        assembler.process_packet(&make_packet(ramp(100, 100), 1000, 50));
        assert!(assembler.take_frame().is_some());

        assembler.unload();
        assert!(assembler.take_frame().is_none());
        assert!(assembler.current_frame().is_empty());
        // last_azimuth reset: a low azimuth no longer looks like a wrap.
        assert!(!assembler.process_packet(&make_packet(ramp(100, 100), 1000, 50)));
    }
}
