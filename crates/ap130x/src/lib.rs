// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! AP130X Image Signal Processor Driver for Rust
//!
//! Driver core for the AP1302/AP130X family of image signal processors. The
//! ISP sits between one or two raw Bayer sensors and the host, exposing a
//! 16-bit register space over I2C. This crate turns that register space into
//! a streaming video source with runtime-tunable image-quality controls.
//!
//! The driver covers:
//!
//! - Paged 16/32-bit register access with a cached page-select register
//! - Sensor register access through the ISP's DMA bridge (the "SIPM" bus)
//! - Firmware download through a sliding register window with CRC checking
//! - Power sequencing of the ISP and its sensors, with rollback
//! - Pad format negotiation, image-quality controls and stall/unstall streaming
//! - Diagnostics: console dump, status decode and MIPI lane-state sampling
//!
//! # Quick Start
//!
//! ```no_run
//! use ap130x::device::{Ap130x, BoardConfig};
//! use ap130x::firmware::FirmwareDir;
//! use ap130x::sim::SimChip;
//!
//! let chip = SimChip::new();
//! let board = BoardConfig::new(Some("onnn,ar0144"), &[0, 1], 4);
//! let firmware = FirmwareDir::new("/lib/firmware");
//! let isp = Ap130x::attach(
//!     chip.bus(),
//!     chip.delay(),
//!     chip.platform(),
//!     &board,
//!     &firmware,
//! )?;
//! isp.set_stream(true)?;
//! # Ok::<(), ap130x::Error>(())
//! ```
//!
//! Real hardware is reached through [`i2c::I2cBus`], which adapts any
//! `embedded-hal` 1.0 I2C implementation to the [`bus::RegisterBus`] trait.

use std::{error, fmt, io};

/// Error type for AP130X driver operations
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied value is outside what the hardware or driver accepts
    InvalidArgument(String),

    /// The device did not reach the expected state in time
    Timeout(String),

    /// The device responded, but not the way a healthy AP130X does
    Device(String),

    /// A requested resource (firmware file, sensor model) does not exist
    NotFound(String),

    /// Firmware image is malformed
    Corrupt(String),

    /// Firmware CRC reported by the ISP differs from the image header
    CrcMismatch { expected: u32, actual: u32 },

    /// I/O error from the underlying transport
    Io(io::Error),
}

impl Error {
    /// Whether repeating the failed operation after a power cycle can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CrcMismatch { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Error::Device(msg) => write!(f, "Device error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Corrupt(msg) => write!(f, "Corrupt firmware: {}", msg),
            Error::CrcMismatch { expected, actual } => write!(
                f,
                "Firmware CRC mismatch: expected 0x{:04x}, device reported 0x{:04x}",
                expected, actual
            ),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The regs module describes the ISP register map and address encoding.
pub mod regs;

/// The bus module provides paged register access on top of a raw transport.
pub mod bus;

/// The i2c module adapts embedded-hal I2C buses to the register transport.
pub mod i2c;

/// The sipm module provides sensor register access through the DMA bridge.
pub mod sipm;

/// The sensor module describes the supported sensor models.
pub mod sensor;

/// The power module sequences GPIOs, clocks and regulators.
pub mod power;

/// The firmware module validates and downloads ISP firmware images.
pub mod firmware;

/// The format module negotiates pad formats.
pub mod format;

/// The controls module describes and encodes image-quality controls.
pub mod controls;

/// The diag module decodes ISP status and samples MIPI lane state.
pub mod diag;

/// The device module ties everything together into a driver instance.
pub mod device;

/// The sim module provides an in-memory AP130X model for host-side testing.
pub mod sim;
