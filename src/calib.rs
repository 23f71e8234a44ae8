// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-laser geometric calibration.
//!
//! Each laser carries angular corrections (azimuth, vertical) and linear
//! offsets (distance, vertical, horizontal) plus derived trig products that
//! are recomputed whenever a source field changes. Tables come from either
//! the built-in HDL-32 schedule or a vendor calibration XML file.

use crate::hdl::Error;
use crate::packet::{LASERS_PER_FIRING, MAX_LASERS};
use std::path::Path;

/// HDL-32 vertical correction schedule in degrees, by laser index.
///
/// The interleaving is the sensor's physical firing order; the exact vendor
/// constants are preserved, including the non-round float literals.
pub const HDL32_VERTICAL_CORRECTIONS: [f64; LASERS_PER_FIRING] = [
    -30.67, -9.3299999, -29.33, -8.0, -28.0, -6.6700001, -26.67, -5.3299999, -25.33, -4.0, -24.0,
    -2.6700001, -22.67, -1.33, -21.33, 0.0, -20.0, 1.33, -18.67, 2.6700001, -17.33, 4.0, -16.0,
    5.3299999, -14.67, 6.6700001, -13.33, 8.0, -12.0, 9.3299999, -10.67, 10.67,
];

/// Calibration values for a single laser.
///
/// Angles are degrees, linear offsets meters. The `sin_vert`/`cos_vert`
/// pair and the offset products are derived and must stay consistent with
/// the source fields; the table loaders recompute them on every change.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaserCorrection {
    pub azimuth_correction: f64,
    pub vertical_correction: f64,
    pub distance_correction: f64,
    pub vertical_offset_correction: f64,
    pub horizontal_offset_correction: f64,
    pub sin_vert: f64,
    pub cos_vert: f64,
    pub sin_vert_offset: f64,
    pub cos_vert_offset: f64,
}

/// 64-laser correction table with a keep/suppress selection mask.
#[derive(Clone, Debug)]
pub struct CalibrationTable {
    corrections: [LaserCorrection; MAX_LASERS],
    laser_selection: [bool; MAX_LASERS],
}

impl CalibrationTable {
    /// Create a table populated with the HDL-32 defaults.
    pub fn hdl32() -> Self {
        let mut table = Self {
            corrections: [LaserCorrection::default(); MAX_LASERS],
            laser_selection: [true; MAX_LASERS],
        };
        table.load_hdl32_defaults();
        table
    }

    /// Fill lasers 0-31 with the HDL-32 vertical-angle schedule and zero
    /// the upper bank. Idempotent.
    pub fn load_hdl32_defaults(&mut self) {
        for (i, correction) in self.corrections.iter_mut().enumerate() {
            *correction = LaserCorrection::default();
            if i < LASERS_PER_FIRING {
                let vertical = HDL32_VERTICAL_CORRECTIONS[i];
                correction.vertical_correction = vertical;
                correction.sin_vert = vertical.to_radians().sin();
                correction.cos_vert = vertical.to_radians().cos();
            } else {
                correction.cos_vert = 1.0;
            }
        }
        self.recompute_offset_products();
    }

    /// Load a vendor calibration XML file.
    ///
    /// The expected structure is
    /// `boost_serialization/DB/points_/item/px` with the per-laser fields
    /// `id_`, `rotCorrection_`, `vertCorrection_`, `distCorrection_`,
    /// `vertOffsetCorrection_`, and `horizOffsetCorrection_`. The three
    /// linear corrections are given in centimeters and converted to meters
    /// here. Entries without a parsable `id_` are dropped.
    ///
    /// A file or parse error logs a warning and leaves the table unchanged.
    pub fn load_xml_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("error reading calibration file {}: {}", path.display(), err);
                return Err(Error::Calibration(err.to_string()));
            }
        };
        match self.load_xml(&text) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("error parsing calibration file {}: {}", path.display(), err);
                Err(err)
            }
        }
    }

    /// Parse calibration XML from a string. See [`Self::load_xml_file`].
    pub fn load_xml(&mut self, text: &str) -> Result<(), Error> {
        let doc =
            roxmltree::Document::parse(text).map_err(|err| Error::Calibration(err.to_string()))?;

        let points = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name("DB"))
            .and_then(|db| db.children().find(|n| n.has_tag_name("points_")))
            .ok_or_else(|| Error::Calibration("missing boost_serialization.DB.points_".into()))?;

        for item in points.children().filter(|n| n.has_tag_name("item")) {
            for px in item.children().filter(|n| n.has_tag_name("px")) {
                let mut id = None;
                let mut azimuth = 0.0;
                let mut vertical = 0.0;
                let mut distance = 0.0;
                let mut vertical_offset = 0.0;
                let mut horizontal_offset = 0.0;

                for field in px.children().filter(|n| n.is_element()) {
                    let value = field.text().unwrap_or("").trim();
                    match field.tag_name().name() {
                        "id_" => id = value.parse::<usize>().ok(),
                        "rotCorrection_" => azimuth = value.parse().unwrap_or(0.0),
                        "vertCorrection_" => vertical = value.parse().unwrap_or(0.0),
                        "distCorrection_" => distance = value.parse().unwrap_or(0.0),
                        "vertOffsetCorrection_" => vertical_offset = value.parse().unwrap_or(0.0),
                        "horizOffsetCorrection_" => {
                            horizontal_offset = value.parse().unwrap_or(0.0)
                        }
                        _ => {}
                    }
                }

                // Entries without a parsable laser id are dropped silently.
                let Some(id) = id else { continue };
                if id >= MAX_LASERS {
                    continue;
                }

                let correction = &mut self.corrections[id];
                correction.azimuth_correction = azimuth;
                correction.vertical_correction = vertical;
                correction.distance_correction = distance / 100.0;
                correction.vertical_offset_correction = vertical_offset / 100.0;
                correction.horizontal_offset_correction = horizontal_offset / 100.0;
                correction.sin_vert = vertical.to_radians().sin();
                correction.cos_vert = vertical.to_radians().cos();
            }
        }
        self.recompute_offset_products();
        Ok(())
    }

    /// Replace the keep/suppress mask.
    pub fn set_laser_selection(&mut self, mask: [bool; MAX_LASERS]) {
        self.laser_selection = mask;
    }

    /// Whether the given laser is kept.
    #[inline]
    pub fn selection(&self, laser: usize) -> bool {
        self.laser_selection[laser]
    }

    /// Correction entry for the given laser.
    #[inline]
    pub fn correction(&self, laser: usize) -> &LaserCorrection {
        &self.corrections[laser]
    }

    /// Vertical correction in degrees for the given laser.
    pub fn vertical_correction(&self, laser: usize) -> f64 {
        self.corrections[laser].vertical_correction
    }

    fn recompute_offset_products(&mut self) {
        for correction in self.corrections.iter_mut() {
            correction.sin_vert_offset = correction.vertical_offset_correction * correction.sin_vert;
            correction.cos_vert_offset = correction.vertical_offset_correction * correction.cos_vert;
        }
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::hdl32()
    }
}
