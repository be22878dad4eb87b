// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Image-quality controls.
//!
//! Controls are identified by their V4L2 control ids so callers coming from a
//! V4L2 front end can pass ids straight through. Values are validated the way
//! V4L2 does it: integers are rounded to the nearest step and clamped, menu
//! entries must be in range and not masked out.

use crate::{
    bus::{RegisterBus, Regmap},
    regs::{self, awb, flicker, scene, sfx},
    Error,
};
use log::warn;
use std::fmt;

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_SATURATION: u32 = 0x0098_0902;
const CID_GAMMA: u32 = 0x0098_0910;
const CID_EXPOSURE: u32 = 0x0098_0911;
const CID_GAIN: u32 = 0x0098_0913;
const CID_POWER_LINE_FREQUENCY: u32 = 0x0098_0918;
const CID_COLORFX: u32 = 0x0098_091f;
const CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;
const CID_AUTO_N_PRESET_WHITE_BALANCE: u32 = 0x009a_0914;
const CID_EXPOSURE_METERING: u32 = 0x009a_0919;
const CID_SCENE_MODE: u32 = 0x009a_091a;
const CID_LINK_FREQ: u32 = 0x009f_0901;

/// Link frequencies the ISP can report, in Hz.
pub const LINK_FREQUENCIES: &[i64] = &[445_000_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    WhiteBalance,
    Gamma,
    Contrast,
    Brightness,
    Saturation,
    Exposure,
    ExposureMetering,
    Gain,
    Zoom,
    ColorEffect,
    SceneMode,
    PowerLineFrequency,
    LinkFrequency,
}

impl ControlId {
    pub const ALL: [ControlId; 13] = [
        ControlId::WhiteBalance,
        ControlId::Gamma,
        ControlId::Contrast,
        ControlId::Brightness,
        ControlId::Saturation,
        ControlId::Exposure,
        ControlId::ExposureMetering,
        ControlId::Gain,
        ControlId::Zoom,
        ControlId::ColorEffect,
        ControlId::SceneMode,
        ControlId::PowerLineFrequency,
        ControlId::LinkFrequency,
    ];

    pub fn cid(&self) -> u32 {
        match self {
            ControlId::WhiteBalance => CID_AUTO_N_PRESET_WHITE_BALANCE,
            ControlId::Gamma => CID_GAMMA,
            ControlId::Contrast => CID_CONTRAST,
            ControlId::Brightness => CID_BRIGHTNESS,
            ControlId::Saturation => CID_SATURATION,
            ControlId::Exposure => CID_EXPOSURE,
            ControlId::ExposureMetering => CID_EXPOSURE_METERING,
            ControlId::Gain => CID_GAIN,
            ControlId::Zoom => CID_ZOOM_ABSOLUTE,
            ControlId::ColorEffect => CID_COLORFX,
            ControlId::SceneMode => CID_SCENE_MODE,
            ControlId::PowerLineFrequency => CID_POWER_LINE_FREQUENCY,
            ControlId::LinkFrequency => CID_LINK_FREQ,
        }
    }

    pub fn spec(&self) -> &'static ControlSpec {
        // SPECS is ordered by discriminant
        &SPECS[self.index()]
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<u32> for ControlId {
    type Error = Error;

    fn try_from(cid: u32) -> Result<Self, Self::Error> {
        ControlId::ALL
            .into_iter()
            .find(|id| id.cid() == cid)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown control 0x{:08x}", cid)))
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Integer { step: i32 },
    Menu { skip_mask: u64 },
    IntegerMenu(&'static [i64]),
}

/// Range, default and flags of one control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSpec {
    pub id: ControlId,
    pub name: &'static str,
    pub kind: ControlKind,
    pub min: i32,
    pub max: i32,
    pub default: i32,
    pub read_only: bool,
    pub volatile: bool,
}

const fn integer(id: ControlId, name: &'static str, min: i32, max: i32, step: i32, default: i32) -> ControlSpec {
    ControlSpec {
        id,
        name,
        kind: ControlKind::Integer { step },
        min,
        max,
        default,
        read_only: false,
        volatile: false,
    }
}

const fn menu(id: ControlId, name: &'static str, max: i32, skip_mask: u64, default: i32) -> ControlSpec {
    ControlSpec {
        id,
        name,
        kind: ControlKind::Menu { skip_mask },
        min: 0,
        max,
        default,
        read_only: false,
        volatile: false,
    }
}

pub const SPECS: [ControlSpec; 13] = [
    menu(ControlId::WhiteBalance, "White Balance, Auto & Preset", 9, 0, 1),
    integer(ControlId::Gamma, "Gamma", 0x100, 0xffff, 0x100, 0x1000),
    integer(ControlId::Contrast, "Contrast", 0x100, 0xffff, 0x100, 0x100),
    integer(ControlId::Brightness, "Brightness", 0x100, 0xffff, 0x100, 0x100),
    integer(ControlId::Saturation, "Saturation", 0x100, 0xffff, 0x100, 0x1000),
    integer(ControlId::Exposure, "Exposure", 0, 0xc, 1, 0xc),
    integer(ControlId::ExposureMetering, "Exposure Metering", 0, 3, 1, 1),
    integer(ControlId::Gain, "Gain", 0x100, 0xffff, 0x100, 0x100),
    integer(ControlId::Zoom, "Zoom, Absolute", 0x100, 0x1000, 1, 0x100),
    menu(
        ControlId::ColorEffect,
        "Color Effects",
        15,
        (1 << 15) | (1 << 12) | (1 << 11) | (1 << 10) | (1 << 9),
        0,
    ),
    menu(ControlId::SceneMode, "Scene Mode", 13, (1 << 5) | (1 << 4), 0),
    menu(ControlId::PowerLineFrequency, "Power Line Frequency", 3, 0, 3),
    ControlSpec {
        id: ControlId::LinkFrequency,
        name: "Link Frequency",
        kind: ControlKind::IntegerMenu(LINK_FREQUENCIES),
        min: 0,
        max: LINK_FREQUENCIES.len() as i32 - 1,
        default: 0,
        read_only: true,
        volatile: true,
    },
];

impl ControlSpec {
    /// Validate `value`, returning the value that would be stored.
    pub fn validate(&self, value: i32) -> Result<i32, Error> {
        if self.read_only {
            return Err(Error::InvalidArgument(format!("{} is read-only", self.name)));
        }

        match self.kind {
            ControlKind::Integer { step } => Ok(round_to_range(value, self.min, self.max, step)),
            ControlKind::Menu { skip_mask } => {
                if value < self.min || value > self.max {
                    return Err(Error::InvalidArgument(format!(
                        "{} value {} out of range {}..={}",
                        self.name, value, self.min, self.max
                    )));
                }
                if skip_mask & (1u64 << value) != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "{} value {} is not supported",
                        self.name, value
                    )));
                }
                Ok(value)
            }
            ControlKind::IntegerMenu(_) => Err(Error::InvalidArgument(format!(
                "{} cannot be set",
                self.name
            ))),
        }
    }
}

/// Round to the nearest step from `min`, then clamp to the range.
fn round_to_range(value: i32, min: i32, max: i32, step: i32) -> i32 {
    let value = i64::from(value);
    let (min, max, step) = (i64::from(min), i64::from(max), i64::from(step));

    let rounded = if max >= 0 && value >= max - step / 2 {
        max
    } else {
        value + step / 2
    };
    let clamped = rounded.clamp(min, max);
    let offset = (clamped - min) / step * step;
    (min + offset) as i32
}

const WB_VALUES: [u32; 10] = [
    awb::OFF,
    awb::AUTO,
    awb::A,
    awb::D50,
    awb::D65,
    awb::HORIZON,
    awb::D65,
    awb::AUTO,
    awb::D75,
    awb::D75,
];

/// Index of the flash white balance preset.
const WB_FLASH: i32 = 7;

const SFX_VALUES: [u32; 16] = [
    sfx::NORMAL,
    sfx::BW,
    sfx::SEPIA1,
    sfx::NEGATIVE,
    sfx::EMBOSS,
    sfx::SKETCH,
    sfx::BLUISH,
    sfx::GREENISH,
    sfx::REDISH,
    sfx::NORMAL,
    sfx::NORMAL,
    sfx::NORMAL,
    sfx::NORMAL,
    sfx::SOLARIZE,
    sfx::ANTIQUE,
    sfx::NORMAL,
];

const SCENE_VALUES: [u32; 14] = [
    scene::NORMAL,
    scene::BACKLIGHT,
    scene::BEACH,
    scene::TWILIGHT,
    scene::NORMAL,
    scene::NORMAL,
    scene::FIREWORKS,
    scene::LANDSCAPE,
    scene::NIGHT,
    scene::PARTY,
    scene::PORTRAIT,
    scene::SPORT,
    scene::SUNSET,
    scene::DOCUMENT,
];

const FLICKER_VALUES: [u32; 4] = [
    flicker::DISABLED,
    flicker::freq(50) | flicker::MANUAL,
    flicker::freq(60) | flicker::MANUAL,
    flicker::AUTO,
];

fn table(values: &[u32], id: ControlId, value: i32) -> Result<u32, Error> {
    usize::try_from(value)
        .ok()
        .and_then(|i| values.get(i).copied())
        .ok_or_else(|| Error::InvalidArgument(format!("{} value {} has no encoding", id, value)))
}

/// Write `value` of control `id` to the ISP. `value` must already be valid.
pub fn apply<B: RegisterBus>(map: &mut Regmap<B>, id: ControlId, value: i32) -> Result<(), Error> {
    match id {
        ControlId::WhiteBalance => {
            let mode = table(&WB_VALUES, id, value)?;
            let flash = if value == WB_FLASH { awb::FLASH } else { 0 };
            map.update_bits(regs::AWB_CTRL, awb::MODE_MASK | awb::FLASH, mode | flash)
        }
        ControlId::Exposure => {
            map.update_bits(regs::AE_CTRL, regs::AE_CTRL_MODE_MASK, value as u32)
        }
        ControlId::ExposureMetering => map.write(regs::AE_MET, value as u32),
        ControlId::Gain => map.write(regs::AE_MANUAL_GAIN, value as u32),
        ControlId::Gamma => map.write(regs::GAMMA, value as u32),
        ControlId::Contrast => map.write(regs::CONTRAST, value as u32),
        ControlId::Brightness => map.write(regs::BRIGHTNESS, value as u32),
        ControlId::Saturation => map.write(regs::SATURATION, value as u32),
        ControlId::Zoom => map.write(regs::DZ_TGT_FCT, value as u32),
        ControlId::ColorEffect => map.write(regs::SFX_MODE, table(&SFX_VALUES, id, value)?),
        ControlId::SceneMode => map.write(regs::SCENE_CTRL, table(&SCENE_VALUES, id, value)?),
        ControlId::PowerLineFrequency => {
            map.write(regs::FLICK_CTRL, table(&FLICKER_VALUES, id, value)?)
        }
        ControlId::LinkFrequency => Ok(()),
    }
}

/// Current link frequency menu index, read back from the ISP.
pub fn read_link_frequency<B: RegisterBus>(map: &mut Regmap<B>) -> Result<i32, Error> {
    let raw = map.read(regs::LINK_FREQ)?;
    let hz = i64::from(raw / 2) * 1_000_000;
    match LINK_FREQUENCIES.iter().position(|f| *f == hz) {
        Some(index) => Ok(index as i32),
        None => {
            warn!("ISP reports unexpected link frequency {} Hz", hz);
            Err(Error::Device(format!("unexpected link frequency {} Hz", hz)))
        }
    }
}

/// Cached control values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controls {
    values: [i32; 13],
}

impl Default for Controls {
    fn default() -> Self {
        let mut values = [0; 13];
        for spec in &SPECS {
            values[spec.id.index()] = spec.default;
        }
        Controls { values }
    }
}

impl Controls {
    pub fn get(&self, id: ControlId) -> i32 {
        self.values[id.index()]
    }

    pub fn set(&mut self, id: ControlId, value: i32) {
        self.values[id.index()] = value;
    }

    /// Write every writable control to the ISP, stopping at the first failure.
    pub fn apply_all<B: RegisterBus>(&self, map: &mut Regmap<B>) -> Result<(), Error> {
        SPECS
            .iter()
            .filter(|spec| !spec.read_only)
            .try_for_each(|spec| apply(map, spec.id, self.get(spec.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;

    #[test]
    fn test_specs_match_ids() {
        for (i, id) in ControlId::ALL.iter().enumerate() {
            assert_eq!(SPECS[i].id, *id);
            assert_eq!(id.index(), i);
            assert_eq!(id.spec().id, *id);
        }
    }

    #[test]
    fn test_cid_lookup() {
        assert_eq!(ControlId::try_from(0x0098_0900).unwrap(), ControlId::Brightness);
        assert_eq!(ControlId::try_from(0x009a_091a).unwrap(), ControlId::SceneMode);
        assert!(matches!(
            ControlId::try_from(0x0098_0999),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_integer_rounding() {
        let gamma = ControlId::Gamma.spec();
        assert_eq!(gamma.validate(0x1000).unwrap(), 0x1000);
        assert_eq!(gamma.validate(0x1080).unwrap(), 0x1100);
        assert_eq!(gamma.validate(0x107f).unwrap(), 0x1000);
        assert_eq!(gamma.validate(0).unwrap(), 0x100);
        assert_eq!(gamma.validate(0x20000).unwrap(), 0xff00);

        let zoom = ControlId::Zoom.spec();
        assert_eq!(zoom.validate(0x1234).unwrap(), 0x1000);
        assert_eq!(zoom.validate(0x200).unwrap(), 0x200);
    }

    #[test]
    fn test_menu_validation() {
        let colorfx = ControlId::ColorEffect.spec();
        assert_eq!(colorfx.validate(13).unwrap(), 13);
        assert!(colorfx.validate(9).is_err());
        assert!(colorfx.validate(15).is_err());
        assert!(colorfx.validate(16).is_err());
        assert!(colorfx.validate(-1).is_err());

        let scene = ControlId::SceneMode.spec();
        assert!(scene.validate(4).is_err());
        assert!(scene.validate(5).is_err());
        assert_eq!(scene.validate(6).unwrap(), 6);
    }

    #[test]
    fn test_link_frequency_is_read_only() {
        assert!(ControlId::LinkFrequency.spec().validate(0).is_err());
    }

    #[test]
    fn test_white_balance_encoding() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        chip.poke(regs::AWB_CTRL, 0x3000);

        apply(&mut map, ControlId::WhiteBalance, WB_FLASH).unwrap();
        assert_eq!(chip.peek(regs::AWB_CTRL), 0x3000 | awb::FLASH | awb::AUTO);

        apply(&mut map, ControlId::WhiteBalance, 8).unwrap();
        assert_eq!(chip.peek(regs::AWB_CTRL), 0x3000 | awb::D75);
    }

    #[test]
    fn test_exposure_preserves_other_bits() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        chip.poke(regs::AE_CTRL, 0x0120);
        apply(&mut map, ControlId::Exposure, 0xc).unwrap();
        assert_eq!(chip.peek(regs::AE_CTRL), 0x012c);
    }

    #[test]
    fn test_menu_tables() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());

        apply(&mut map, ControlId::ColorEffect, 13).unwrap();
        assert_eq!(chip.peek(regs::SFX_MODE), sfx::SOLARIZE);

        apply(&mut map, ControlId::SceneMode, 13).unwrap();
        assert_eq!(chip.peek(regs::SCENE_CTRL), scene::DOCUMENT);

        apply(&mut map, ControlId::PowerLineFrequency, 1).unwrap();
        assert_eq!(chip.peek(regs::FLICK_CTRL), 0x3201);
    }

    #[test]
    fn test_apply_all_writes_defaults() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        Controls::default().apply_all(&mut map).unwrap();

        assert_eq!(chip.peek(regs::GAMMA), 0x1000);
        assert_eq!(chip.peek(regs::SATURATION), 0x1000);
        assert_eq!(chip.peek(regs::DZ_TGT_FCT), 0x100);
        assert_eq!(chip.peek(regs::FLICK_CTRL), flicker::AUTO);
        assert_eq!(chip.peek(regs::AE_CTRL) & 0xf, 0xc);
        assert_eq!(chip.peek(regs::AWB_CTRL) & 0xf, awb::AUTO);
    }

    #[test]
    fn test_apply_all_stops_at_first_failure() {
        let chip = SimChip::new();
        chip.fail_writes_at(regs::CONTRAST.offset());
        let mut map = Regmap::new(chip.bus());

        assert!(Controls::default().apply_all(&mut map).is_err());
        assert_eq!(chip.peek(regs::GAMMA), 0x1000);
        assert!(chip.writes_to(regs::BRIGHTNESS).is_empty());
    }

    #[test]
    fn test_link_frequency_readback() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        assert_eq!(read_link_frequency(&mut map).unwrap(), 0);

        chip.poke(regs::LINK_FREQ, 800);
        assert!(matches!(read_link_frequency(&mut map), Err(Error::Device(_))));
    }
}
