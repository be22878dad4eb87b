// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pad format negotiation.
//!
//! The ISP has two sink pads, one per sensor, and one source pad towards the
//! host. Sink formats are fixed by the sensor model. The source pad carries
//! the sensors' images side by side, so its width is counted in units of the
//! width factor (the number of sensors, or 1 for the test pattern generator).

use crate::{
    regs::out_fmt,
    sensor::SensorInfo,
    Error,
};
use std::fmt;

pub const MIN_WIDTH: u32 = 24;
pub const MIN_HEIGHT: u32 = 16;
pub const MAX_WIDTH: u32 = 4224;
pub const MAX_HEIGHT: u32 = 4092;

/// Media bus pixel code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MbusCode(pub u32);

impl MbusCode {
    /// No particular format, as produced by the internal pattern generator.
    pub const UNSPECIFIED: MbusCode = MbusCode(0);
    pub const UYVY8_1X16: MbusCode = MbusCode(0x200f);
    pub const UYYVYY8_0_5X24: MbusCode = MbusCode(0x2026);
    pub const SGRBG10_1X10: MbusCode = MbusCode(0x300a);
    pub const SGRBG12_1X12: MbusCode = MbusCode(0x3010);

    pub fn name(&self) -> Option<&'static str> {
        match *self {
            MbusCode::UYVY8_1X16 => Some("UYVY8_1X16"),
            MbusCode::UYYVYY8_0_5X24 => Some("UYYVYY8_0_5X24"),
            MbusCode::SGRBG10_1X10 => Some("SGRBG10_1X10"),
            MbusCode::SGRBG12_1X12 => Some("SGRBG12_1X12"),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<MbusCode> {
        [
            MbusCode::UYVY8_1X16,
            MbusCode::UYYVYY8_0_5X24,
            MbusCode::SGRBG10_1X10,
            MbusCode::SGRBG12_1X12,
        ]
        .into_iter()
        .find(|code| code.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl fmt::Debug for MbusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "MbusCode({})", name),
            None => write!(f, "MbusCode(0x{:04x})", self.0),
        }
    }
}

impl fmt::Display for MbusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Output format the ISP can produce, with its `PREVIEW_OUT_FMT` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub code: MbusCode,
    pub out_fmt: u32,
}

/// Source pad formats, preferred first.
pub const SOURCE_FORMATS: &[SourceFormat] = &[
    SourceFormat {
        code: MbusCode::UYVY8_1X16,
        out_fmt: out_fmt::FT_YUV_JFIF | out_fmt::FST_YUV_422,
    },
    SourceFormat {
        code: MbusCode::UYYVYY8_0_5X24,
        out_fmt: out_fmt::FT_YUV_JFIF | out_fmt::FST_YUV_420,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pad {
    Sink0,
    Sink1,
    Source,
}

impl Pad {
    pub fn is_sink(&self) -> bool {
        !matches!(self, Pad::Source)
    }
}

impl TryFrom<u32> for Pad {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Pad::Sink0),
            1 => Ok(Pad::Sink1),
            2 => Ok(Pad::Source),
            _ => Err(Error::InvalidArgument(format!("invalid pad {}", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadFormat {
    pub code: MbusCode,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for PadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.code, self.width, self.height)
    }
}

/// Inclusive frame size range reported for a pad and code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSizeRange {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTarget {
    NativeSize,
    CropBounds,
    CropDefault,
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

fn align_down(value: u32, align: u32) -> u32 {
    value - value % align
}

fn source_format(code: MbusCode) -> &'static SourceFormat {
    SOURCE_FORMATS
        .iter()
        .find(|f| f.code == code)
        .unwrap_or(&SOURCE_FORMATS[0])
}

/// Active pad formats of one ISP instance.
#[derive(Debug, Clone)]
pub struct Formats {
    sensor: &'static SensorInfo,
    width_factor: u32,
    source: PadFormat,
    source_info: &'static SourceFormat,
}

impl Formats {
    /// Default formats: sensor resolution on the sinks, the same images side
    /// by side in the preferred source format on the source.
    pub fn new(sensor: &'static SensorInfo, width_factor: u32) -> Self {
        let source_info = &SOURCE_FORMATS[0];
        Formats {
            sensor,
            width_factor,
            source: PadFormat {
                code: source_info.code,
                width: sensor.resolution.width * width_factor,
                height: sensor.resolution.height,
            },
            source_info,
        }
    }

    pub fn width_factor(&self) -> u32 {
        self.width_factor
    }

    fn sink(&self) -> PadFormat {
        PadFormat {
            code: self.sensor.format,
            width: self.sensor.resolution.width,
            height: self.sensor.resolution.height,
        }
    }

    pub fn get(&self, pad: Pad) -> PadFormat {
        match pad {
            Pad::Source => self.source,
            _ => self.sink(),
        }
    }

    /// `PREVIEW_OUT_FMT` value for the active source format.
    pub fn out_fmt(&self) -> u32 {
        self.source_info.out_fmt
    }

    /// Format that `set` would apply for `requested`, without applying it.
    pub fn try_format(&self, pad: Pad, requested: &PadFormat) -> PadFormat {
        if pad.is_sink() {
            return self.sink();
        }

        let factor = self.width_factor;
        PadFormat {
            code: source_format(requested.code).code,
            width: align_down(requested.width, 4 * factor).clamp(MIN_WIDTH * factor, MAX_WIDTH),
            height: align_down(requested.height, 2).clamp(MIN_HEIGHT, MAX_HEIGHT),
        }
    }

    /// Negotiate and apply a format. Sink pads are read-only and report their
    /// current format.
    pub fn set(&mut self, pad: Pad, requested: &PadFormat) -> PadFormat {
        let format = self.try_format(pad, requested);
        if pad == Pad::Source {
            self.source = format;
            self.source_info = source_format(format.code);
        }
        format
    }

    pub fn enum_mbus_code(&self, pad: Pad, index: usize) -> Result<MbusCode, Error> {
        if pad.is_sink() {
            if index != 0 {
                return Err(Error::InvalidArgument(format!("no sink code at index {}", index)));
            }
            return Ok(self.sensor.format);
        }

        SOURCE_FORMATS
            .get(index)
            .map(|f| f.code)
            .ok_or_else(|| Error::InvalidArgument(format!("no source code at index {}", index)))
    }

    /// Frame sizes for `code` on `pad`. Sinks report the sensor resolution,
    /// the source reports the scaler limits.
    pub fn enum_frame_size(
        &self,
        pad: Pad,
        index: usize,
        code: MbusCode,
    ) -> Result<FrameSizeRange, Error> {
        if index != 0 {
            return Err(Error::InvalidArgument(format!("no frame size at index {}", index)));
        }

        if pad.is_sink() {
            if code != self.sensor.format {
                return Err(Error::InvalidArgument(format!("sink does not support {}", code)));
            }
            let res = self.sensor.resolution;
            return Ok(FrameSizeRange {
                min_width: res.width,
                min_height: res.height,
                max_width: res.width,
                max_height: res.height,
            });
        }

        if !SOURCE_FORMATS.iter().any(|f| f.code == code) {
            return Err(Error::InvalidArgument(format!("source does not support {}", code)));
        }

        Ok(FrameSizeRange {
            min_width: MIN_WIDTH * self.width_factor,
            min_height: MIN_HEIGHT,
            max_width: MAX_WIDTH,
            max_height: MAX_HEIGHT,
        })
    }

    /// Every supported target covers the full combined sensor area.
    pub fn selection(&self, _target: SelectionTarget) -> Rect {
        Rect {
            left: 0,
            top: 0,
            width: self.sensor.resolution.width * self.width_factor,
            height: self.sensor.resolution.height,
        }
    }
}
