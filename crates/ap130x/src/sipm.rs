// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor register access through the ISP's DMA bridge.
//!
//! Sensors hang off the ISP's own I2C masters (SIPM ports) and are not
//! visible to the host. Their registers are reached by programming a one-shot
//! DMA copy between an ISP register and a sub-bus descriptor.
//!
//! Reads use `DMA_DST` as both destination and scratch: the sensor value lands
//! big-endian at its address, so an 8-bit value ends up in bits 31:24 and a
//! 16-bit value in bits 31:16. Writes use `DMA_SRC` the same way, but the
//! value is always placed in bits 31:16. The ISP fetches 8-bit values from
//! `DMA_SRC + 1`, which is why the write shift does not depend on the width.

use crate::{
    bus::{RegisterBus, Regmap},
    regs::{self, dma, Reg},
    Error,
};
use embedded_hal::delay::DelayNs;
use log::{error, trace};
use std::fmt;

/// Number of idle polls before a DMA transfer is declared stuck.
pub const DMA_POLL_ATTEMPTS: u32 = 50;

const DMA_POLL_INTERVAL_US: u32 = 1000;

fn check_width(reg: Reg) -> Result<u32, Error> {
    match reg.width() {
        w @ (1 | 2) => Ok(w),
        w => Err(Error::InvalidArgument(format!(
            "sensor register 0x{:04x} has unsupported width {}",
            reg.offset(),
            w
        ))),
    }
}

/// Sub-bus descriptor for `reg` on sensor `i2c_addr` behind `port`.
pub fn descriptor(port: u32, i2c_addr: u32, reg: Reg) -> u32 {
    let data16 = if reg.width() == 2 {
        dma::SIP_DATA_16_BIT
    } else {
        0
    };
    dma::sip_sipm(port)
        | data16
        | dma::SIP_ADDR_16_BIT
        | dma::sip_id(i2c_addr)
        | dma::sip_reg(u32::from(reg.offset()))
}

/// Wait for the DMA engine to report idle.
pub fn wait_idle<B: RegisterBus>(map: &mut Regmap<B>, delay: &mut impl DelayNs) -> Result<(), Error> {
    for _ in 0..DMA_POLL_ATTEMPTS {
        let ctrl = map.read(regs::DMA_CTRL)?;
        if ctrl & dma::MODE_MASK == dma::MODE_IDLE {
            return Ok(());
        }
        delay.delay_us(DMA_POLL_INTERVAL_US);
    }

    error!("DMA timeout");
    Err(Error::Timeout("DMA engine did not return to idle".into()))
}

/// Read an 8 or 16-bit sensor register.
pub fn sensor_read<B: RegisterBus>(
    map: &mut Regmap<B>,
    delay: &mut impl DelayNs,
    port: u32,
    i2c_addr: u32,
    reg: Reg,
) -> Result<u32, Error> {
    let width = check_width(reg)?;

    wait_idle(map, delay)?;

    map.chain()
        .write(regs::DMA_SIZE, width)
        .write(regs::DMA_SRC, descriptor(port, i2c_addr, reg))
        .write(regs::DMA_DST, u32::from(regs::DMA_DST.offset()))
        .write(
            regs::DMA_CTRL,
            dma::DST_REG | dma::SRC_SIP | dma::MODE_COPY,
        )
        .finish()?;

    wait_idle(map, delay)?;

    let value = map.read(regs::DMA_DST)? >> (32 - width * 8);
    trace!("sensor {}:0x{:04x} => 0x{:x}", port, reg.offset(), value);
    Ok(value)
}

/// Write an 8 or 16-bit sensor register.
pub fn sensor_write<B: RegisterBus>(
    map: &mut Regmap<B>,
    delay: &mut impl DelayNs,
    port: u32,
    i2c_addr: u32,
    reg: Reg,
    value: u32,
) -> Result<(), Error> {
    let width = check_width(reg)?;

    wait_idle(map, delay)?;

    trace!("sensor {}:0x{:04x} <= 0x{:x}", port, reg.offset(), value);
    map.chain()
        .write(regs::DMA_SIZE, width)
        .write(
            regs::DMA_SRC,
            ((value & 0xffff) << 16) | u32::from(regs::DMA_SRC.offset()),
        )
        .write(regs::DMA_DST, descriptor(port, i2c_addr, reg))
        .write(
            regs::DMA_CTRL,
            dma::DST_SIP | dma::SRC_REG | dma::MODE_COPY,
        )
        .finish()?;

    wait_idle(map, delay)
}

/// Sensor register selected through the debug probe.
///
/// Encoded as `I000 0SSS 0000 0000 RRRR RRRR RRRR RRRR`: `I` is the sensor
/// port, `S` the width in bytes (1 or 2) and `R` the register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipmAddress {
    pub port: u32,
    pub reg: Reg,
}

impl SipmAddress {
    const VALID_BITS: u32 = 0x8700_ffff;

    pub fn new(port: u32, width: u32, offset: u16) -> Result<Self, Error> {
        if port > 1 {
            return Err(Error::InvalidArgument(format!("invalid sensor port {}", port)));
        }
        Self::parse((port << 31) | (width << 24) | u32::from(offset))
    }

    pub fn parse(value: u32) -> Result<Self, Error> {
        if value & !Self::VALID_BITS != 0 {
            return Err(Error::InvalidArgument(format!(
                "debug address 0x{:08x} has reserved bits set",
                value
            )));
        }

        let width = (value >> 24) & 7;
        if !(1..=2).contains(&width) {
            return Err(Error::InvalidArgument(format!(
                "debug address 0x{:08x} has invalid width {}",
                value, width
            )));
        }

        Ok(SipmAddress {
            port: value >> 31,
            reg: Reg::from_raw((width << 24) | (value & 0xffff)),
        })
    }

    pub fn encode(&self) -> u32 {
        (self.port << 31) | (self.reg.width() << 24) | u32::from(self.reg.offset())
    }
}

impl fmt::Display for SipmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port {} reg 0x{:04x} ({}-bit)",
            self.port,
            self.reg.offset(),
            self.reg.width() * 8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;

    #[test]
    fn test_descriptor_layout() {
        let d = descriptor(1, 0x10, Reg::new16(0x3000));
        assert_eq!(d, (1 << 26) | (1 << 25) | (1 << 24) | (0x10 << 17) | 0x3000);
        let d = descriptor(0, 0x36, Reg::new8(0x0100));
        assert_eq!(d, (1 << 24) | (0x36 << 17) | 0x0100);
    }

    #[test]
    fn test_read_16bit_shifts_by_16() {
        let chip = SimChip::new();
        chip.set_sensor_reg(0, 0x3000, 0x0356);
        let mut map = Regmap::new(chip.bus());
        let value =
            sensor_read(&mut map, &mut chip.delay(), 0, 0x10, Reg::new16(0x3000)).unwrap();
        assert_eq!(value, 0x0356);
        assert_eq!(chip.writes_to(regs::DMA_DST), vec![0x60a4]);
        assert_eq!(chip.writes_to(regs::DMA_CTRL), vec![0x0032]);
    }

    #[test]
    fn test_read_8bit_shifts_by_24() {
        let chip = SimChip::new();
        chip.set_sensor_reg(1, 0x0100, 0x0001);
        let mut map = Regmap::new(chip.bus());
        let value = sensor_read(&mut map, &mut chip.delay(), 1, 0x36, Reg::new8(0x0100)).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_write_places_value_in_upper_half() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        sensor_write(
            &mut map,
            &mut chip.delay(),
            1,
            0x10,
            Reg::new16(0x301a),
            0x10dc,
        )
        .unwrap();
        assert_eq!(chip.writes_to(regs::DMA_SRC), vec![0x10dc_60a0]);
        assert_eq!(chip.writes_to(regs::DMA_CTRL), vec![0x0302]);
        assert_eq!(chip.sensor_reg(1, 0x301a), Some(0x10dc));
    }

    #[test]
    fn test_write_8bit_uses_same_shift() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        sensor_write(&mut map, &mut chip.delay(), 0, 0x10, Reg::new8(0x0103), 0x01).unwrap();
        assert_eq!(chip.writes_to(regs::DMA_SRC), vec![0x0001_60a0]);
        assert_eq!(chip.writes_to(regs::DMA_SIZE), vec![1]);
    }

    #[test]
    fn test_wide_register_rejected() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        let err = sensor_read(&mut map, &mut chip.delay(), 0, 0x10, Reg::new32(0x3000));
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert_eq!(chip.write_count(), 0);
    }

    #[test]
    fn test_stuck_dma_times_out() {
        let chip = SimChip::new();
        chip.set_dma_stuck(true);
        let mut map = Regmap::new(chip.bus());
        let mut delay = chip.delay();
        let result = sensor_read(&mut map, &mut delay, 0, 0x10, Reg::new16(0x3000));
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(chip.total_delay_us(), u64::from(DMA_POLL_ATTEMPTS) * 1000);
    }

    #[test]
    fn test_debug_address_parse() {
        let addr = SipmAddress::parse(0x8200_3000).unwrap();
        assert_eq!(addr.port, 1);
        assert_eq!(addr.reg.width(), 2);
        assert_eq!(addr.reg.offset(), 0x3000);
        assert_eq!(addr.encode(), 0x8200_3000);
        assert_eq!(addr.to_string(), "port 1 reg 0x3000 (16-bit)");
    }

    #[test]
    fn test_debug_address_rejects_bad_values() {
        assert!(SipmAddress::parse(0x4200_3000).is_err());
        assert!(SipmAddress::parse(0x0300_3000).is_err());
        assert!(SipmAddress::parse(0x0000_3000).is_err());
        assert!(SipmAddress::parse(0x0201_0000).is_err());
        assert!(SipmAddress::new(2, 1, 0).is_err());
        assert_eq!(SipmAddress::new(0, 1, 0x12).unwrap().encode(), 0x0100_0012);
    }
}
