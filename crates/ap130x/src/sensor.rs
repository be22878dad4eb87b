// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor models the ISP firmware knows how to drive.

use crate::{format::MbusCode, Error};
use std::fmt;

/// Sensor power supply with the settle time required after enabling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supply {
    pub name: &'static str,
    pub post_delay_us: u32,
}

const fn supply(name: &'static str, post_delay_us: u32) -> Supply {
    Supply {
        name,
        post_delay_us,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Static description of a sensor model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorInfo {
    /// Board compatible string, empty for the internal test pattern generator.
    pub model: &'static str,
    /// Short name used in firmware file names and subdevice names.
    pub name: &'static str,
    /// Sensor address on the ISP's sub-bus.
    pub i2c_addr: u32,
    pub resolution: Resolution,
    pub format: MbusCode,
    /// Supplies in power-on order.
    pub supplies: &'static [Supply],
}

impl SensorInfo {
    pub fn is_tpg(&self) -> bool {
        self.model.is_empty()
    }
}

const AR0144_SUPPLIES: &[Supply] = &[supply("vaa", 100), supply("vddio", 100), supply("vdd", 0)];

const AR0330_SUPPLIES: &[Supply] = &[
    supply("vddpll", 0),
    supply("vaa", 0),
    supply("vdd", 0),
    supply("vddio", 0),
];

const AR1335_SUPPLIES: &[Supply] = &[supply("vaa", 0), supply("vddio", 0), supply("vdd", 0)];

/// Every supported sensor, test pattern generator last.
pub const SENSORS: &[SensorInfo] = &[
    SensorInfo {
        model: "onnn,ar0144",
        name: "ar0144",
        i2c_addr: 0x10,
        resolution: Resolution {
            width: 1280,
            height: 800,
        },
        format: MbusCode::SGRBG12_1X12,
        supplies: AR0144_SUPPLIES,
    },
    SensorInfo {
        model: "onnn,ar0330",
        name: "ar0330",
        i2c_addr: 0x10,
        resolution: Resolution {
            width: 2304,
            height: 1536,
        },
        format: MbusCode::SGRBG12_1X12,
        supplies: AR0330_SUPPLIES,
    },
    SensorInfo {
        model: "onnn,ar1335",
        name: "ar1335",
        i2c_addr: 0x36,
        resolution: Resolution {
            width: 4208,
            height: 3120,
        },
        format: MbusCode::SGRBG10_1X10,
        supplies: AR1335_SUPPLIES,
    },
    TPG,
];

/// Internal test pattern generator, used when no sensor model is configured.
pub const TPG: SensorInfo = SensorInfo {
    model: "",
    name: "tpg",
    i2c_addr: 0,
    resolution: Resolution {
        width: 1920,
        height: 1080,
    },
    format: MbusCode::UNSPECIFIED,
    supplies: &[],
};

/// Look up a sensor by board compatible string.
pub fn lookup(model: &str) -> Result<&'static SensorInfo, Error> {
    SENSORS
        .iter()
        .find(|info| !info.is_tpg() && info.model == model)
        .ok_or_else(|| Error::InvalidArgument(format!("unsupported sensor model '{}'", model)))
}
