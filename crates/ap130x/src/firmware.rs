// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! ISP firmware ("bootdata") handling.
//!
//! A firmware file is a 16-byte little-endian header followed by the bootdata
//! payload:
//!
//! | Offset | Field           | Meaning                                    |
//! |--------|-----------------|--------------------------------------------|
//! | 0      | `crc`           | CRC-16 the ISP computes over the payload   |
//! | 4      | `checksum`      | Vendor checksum, informational             |
//! | 8      | `pll_init_size` | Length of the PLL initialization segment   |
//! | 12     | `total_size`    | Length of the payload to download          |
//!
//! The payload is written through a 8 KiB window at register offset 0x8000.
//! The window wraps, so a segment crossing its end is split in two writes.

use crate::{
    bus::{RegisterBus, Regmap},
    regs,
    sensor::SensorInfo,
    Error,
};
use embedded_hal::delay::DelayNs;
use log::{debug, warn};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

pub const HEADER_SIZE: usize = 16;

/// Longest firmware file name accepted, exclusive.
pub const MAX_NAME_LEN: usize = 64;

const PLL_LOCK_DELAY_US: u32 = 1000;
const LOAD_SETTLE_MS: u32 = 40;

/// Progress of the firmware boot handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    Idle,
    PoweredOn,
    ChipDetected,
    PllLoading,
    ExtendedLoading,
    Verified,
    Failed,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::Idle => "idle",
            BootStage::PoweredOn => "powered-on",
            BootStage::ChipDetected => "chip-detected",
            BootStage::PllLoading => "pll-loading",
            BootStage::ExtendedLoading => "extended-loading",
            BootStage::Verified => "verified",
            BootStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareHeader {
    pub crc: u32,
    pub checksum: u32,
    pub pll_init_size: u32,
    pub total_size: u32,
}

impl FirmwareHeader {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "image is {} bytes, shorter than the {} byte header",
                data.len(),
                HEADER_SIZE
            )));
        }

        let field = |i: usize| {
            u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]])
        };

        Ok(FirmwareHeader {
            crc: field(0),
            checksum: field(4),
            pll_init_size: field(8),
            total_size: field(12),
        })
    }
}

/// Validated firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    header: FirmwareHeader,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Parse and validate an image: `pll_init_size <= total_size <= payload length`.
    pub fn parse(data: Vec<u8>) -> Result<Self, Error> {
        let header = FirmwareHeader::parse(&data)?;
        let available = data.len() - HEADER_SIZE;

        if header.pll_init_size > header.total_size {
            return Err(Error::Corrupt(format!(
                "PLL init size {} exceeds total size {}",
                header.pll_init_size, header.total_size
            )));
        }

        if header.total_size as usize > available {
            return Err(Error::Corrupt(format!(
                "total size {} exceeds the {} byte payload",
                header.total_size, available
            )));
        }

        if (header.total_size as usize) < available {
            warn!(
                "Firmware carries {} trailing bytes past its declared size",
                available - header.total_size as usize
            );
        }

        Ok(FirmwareImage { header, data })
    }

    pub fn header(&self) -> &FirmwareHeader {
        &self.header
    }

    /// Payload bytes to download.
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..HEADER_SIZE + self.header.total_size as usize]
    }

    pub fn pll_segment(&self) -> &[u8] {
        &self.payload()[..self.header.pll_init_size as usize]
    }

    pub fn main_segment(&self) -> &[u8] {
        &self.payload()[self.header.pll_init_size as usize..]
    }

    /// CRC the ISP is expected to report, as held in its 16-bit register.
    pub fn expected_crc(&self) -> u32 {
        self.header.crc & 0xffff
    }
}

/// Firmware file name for `sensor` with `num_sensors` sensors populated.
pub fn firmware_name(sensor: &SensorInfo, num_sensors: usize) -> Result<String, Error> {
    let suffix = match num_sensors {
        0 => "",
        1 => "_single",
        2 => "_dual",
        n => {
            return Err(Error::InvalidArgument(format!(
                "unsupported sensor count {}",
                n
            )))
        }
    };

    let name = format!("ap130x_{}{}_fw.bin", sensor.name, suffix);
    if name.len() >= MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "firmware name '{}' too long",
            name
        )));
    }
    Ok(name)
}

/// Where firmware images come from.
pub trait FirmwareSource {
    fn request(&self, name: &str) -> Result<Vec<u8>, Error>;
}

/// Firmware files in a directory, `/lib/firmware` style.
#[derive(Debug, Clone)]
pub struct FirmwareDir {
    root: PathBuf,
}

impl FirmwareDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        FirmwareDir {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl FirmwareSource for FirmwareDir {
    fn request(&self, name: &str) -> Result<Vec<u8>, Error> {
        let path = self.root.join(name);
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(format!("firmware {}", path.display())),
            _ => Error::Io(e),
        })
    }
}

/// Fetch and validate the firmware for `sensor`.
pub fn request_image(
    source: &dyn FirmwareSource,
    sensor: &SensorInfo,
    num_sensors: usize,
) -> Result<FirmwareImage, Error> {
    let name = firmware_name(sensor, num_sensors)?;
    debug!("Requesting firmware {}", name);
    FirmwareImage::parse(source.request(&name)?)
}

/// Write `data` through the firmware window starting at window position
/// `pos`, wrapping at the end of the window. Returns the new position.
///
/// `pos` must lie inside the window.
pub fn write_window<B: RegisterBus>(
    map: &mut Regmap<B>,
    mut data: &[u8],
    mut pos: usize,
) -> Result<usize, Error> {
    if pos >= regs::FW_WINDOW_SIZE {
        return Err(Error::InvalidArgument(format!(
            "firmware window position 0x{:x} out of range",
            pos
        )));
    }

    while !data.is_empty() {
        let len = data.len().min(regs::FW_WINDOW_SIZE - pos);
        map.raw_write(regs::FW_WINDOW_OFFSET + pos as u16, &data[..len])?;

        data = &data[len..];
        pos += len;
        if pos >= regs::FW_WINDOW_SIZE {
            pos = 0;
        }
    }
    Ok(pos)
}

/// Download `image` and verify the CRC the ISP computed.
///
/// `on_stage` is told when the download moves from the PLL segment to the
/// rest of the payload. A CRC mismatch is reported as a retryable error.
pub fn load<B: RegisterBus>(
    map: &mut Regmap<B>,
    delay: &mut impl DelayNs,
    image: &FirmwareImage,
    mut on_stage: impl FnMut(BootStage),
) -> Result<(), Error> {
    map.write(regs::SIP_CRC, 0xffff)?;

    on_stage(BootStage::PllLoading);
    let pos = write_window(map, image.pll_segment(), 0)?;

    map.write(regs::BOOTDATA_STAGE, regs::bootdata::PLL_DONE)?;
    delay.delay_us(PLL_LOCK_DELAY_US);

    on_stage(BootStage::ExtendedLoading);
    write_window(map, image.main_segment(), pos)?;
    delay.delay_ms(LOAD_SETTLE_MS);

    let crc = map.read(regs::SIP_CRC)?;
    if crc != image.expected_crc() {
        warn!(
            "CRC mismatch: expected 0x{:04x}, got 0x{:04x}",
            image.expected_crc(),
            crc
        );
        return Err(Error::CrcMismatch {
            expected: image.expected_crc(),
            actual: crc,
        });
    }

    map.write(regs::BOOTDATA_STAGE, regs::bootdata::COMPLETE)
}
