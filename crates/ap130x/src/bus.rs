// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Paged register access.
//!
//! [`RegisterBus`] is the raw transport: big-endian reads and writes at a
//! 16-bit offset. [`Regmap`] sits on top of it and understands [`Reg`]
//! addresses, dispatching on width and selecting the advanced page when a
//! register lives outside the direct space. The last selected page is cached
//! so a burst of accesses to the same page costs one page-select write.

use crate::{
    regs::{self, Reg},
    Error,
};
use log::{error, trace};

/// Raw register transport, big-endian, 16-bit offsets.
///
/// Implementors provide block transfers. The sized accessors are derived from
/// them but may be overridden when the transport has a cheaper path.
pub trait RegisterBus {
    fn raw_read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error>;

    fn raw_write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error>;

    fn read16(&mut self, offset: u16) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.raw_read(offset, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write16(&mut self, offset: u16, value: u16) -> Result<(), Error> {
        self.raw_write(offset, &value.to_be_bytes())
    }

    fn read32(&mut self, offset: u16) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.raw_read(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn write32(&mut self, offset: u16, value: u32) -> Result<(), Error> {
        self.raw_write(offset, &value.to_be_bytes())
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    fn raw_read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error> {
        (**self).raw_read(offset, buf)
    }

    fn raw_write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error> {
        (**self).raw_write(offset, data)
    }

    fn read16(&mut self, offset: u16) -> Result<u16, Error> {
        (**self).read16(offset)
    }

    fn write16(&mut self, offset: u16, value: u16) -> Result<(), Error> {
        (**self).write16(offset, value)
    }

    fn read32(&mut self, offset: u16) -> Result<u32, Error> {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u16, value: u32) -> Result<(), Error> {
        (**self).write32(offset, value)
    }
}

/// Register map with a cached advanced-page selection.
pub struct Regmap<B> {
    bus: B,
    page: Option<u32>,
}

impl<B: RegisterBus> Regmap<B> {
    pub fn new(bus: B) -> Self {
        Regmap { bus, page: None }
    }

    /// Page currently believed to be selected, `None` when unknown.
    pub fn cached_page(&self) -> Option<u32> {
        self.page
    }

    /// Forget the selected page, forcing the next paged access to re-select.
    ///
    /// Required whenever the chip may have lost its register state.
    pub fn invalidate_page(&mut self) {
        self.page = None;
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    fn check_width(reg: Reg) -> Result<(), Error> {
        match reg.width() {
            2 | 4 => Ok(()),
            w => Err(Error::InvalidArgument(format!(
                "register {} has unsupported width {}",
                reg, w
            ))),
        }
    }

    fn select_page(&mut self, reg: Reg) -> Result<(), Error> {
        if !reg.is_paged() {
            return Ok(());
        }

        let page = reg.page();
        if self.page == Some(page) {
            return Ok(());
        }

        match self.bus.write32(regs::ADVANCED_BASE.offset(), page) {
            Ok(()) => {
                trace!("Selected advanced page 0x{:02x}", page >> 16);
                self.page = Some(page);
                Ok(())
            }
            Err(e) => {
                error!("Failed to select page for register {}: {}", reg, e);
                self.page = None;
                Err(e)
            }
        }
    }

    pub fn read(&mut self, reg: Reg) -> Result<u32, Error> {
        Self::check_width(reg)?;
        self.select_page(reg)?;

        let offset = reg.bus_offset();
        let result = if reg.width() == 2 {
            self.bus.read16(offset).map(u32::from)
        } else {
            self.bus.read32(offset)
        };

        result.map_err(|e| {
            error!("Register {} read failed: {}", reg, e);
            e
        })
    }

    pub fn write(&mut self, reg: Reg, value: u32) -> Result<(), Error> {
        Self::check_width(reg)?;
        self.select_page(reg)?;

        let offset = reg.bus_offset();
        let value = value & reg.value_mask();
        trace!("{} <= 0x{:x}", reg, value);
        let result = if reg.width() == 2 {
            self.bus.write16(offset, value as u16)
        } else {
            self.bus.write32(offset, value)
        };

        result.map_err(|e| {
            error!("Register {} write of 0x{:x} failed: {}", reg, value, e);
            e
        })
    }

    /// Read-modify-write of the bits selected by `mask`.
    pub fn update_bits(&mut self, reg: Reg, mask: u32, value: u32) -> Result<(), Error> {
        let current = self.read(reg)?;
        let updated = (current & !mask) | (value & mask);
        if updated == current {
            return Ok(());
        }
        self.write(reg, updated)
    }

    pub fn raw_read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error> {
        self.bus.raw_read(offset, buf).map_err(|e| {
            error!("Block read of {} bytes at 0x{:04x} failed: {}", buf.len(), offset, e);
            e
        })
    }

    pub fn raw_write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error> {
        self.bus.raw_write(offset, data).map_err(|e| {
            error!("Block write of {} bytes at 0x{:04x} failed: {}", data.len(), offset, e);
            e
        })
    }

    /// Start a sequence of writes that stops at the first failure.
    pub fn chain(&mut self) -> WriteChain<'_, B> {
        WriteChain {
            map: self,
            result: Ok(()),
        }
    }
}

/// Sequence of register writes where the first error wins.
///
/// ```no_run
/// # use ap130x::{bus::Regmap, regs, sim::SimChip};
/// # let chip = SimChip::new();
/// # let mut map = Regmap::new(chip.bus());
/// map.chain()
///     .write(regs::PREVIEW_WIDTH, 1280)
///     .write(regs::PREVIEW_HEIGHT, 800)
///     .finish()?;
/// # Ok::<(), ap130x::Error>(())
/// ```
pub struct WriteChain<'a, B> {
    map: &'a mut Regmap<B>,
    result: Result<(), Error>,
}

impl<B: RegisterBus> WriteChain<'_, B> {
    #[must_use]
    pub fn write(mut self, reg: Reg, value: u32) -> Self {
        if self.result.is_ok() {
            self.result = self.map.write(reg, value);
        }
        self
    }

    pub fn finish(self) -> Result<(), Error> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;

    #[test]
    fn test_direct_roundtrip() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        map.write(regs::PREVIEW_WIDTH, 0x1234).unwrap();
        assert_eq!(map.read(regs::PREVIEW_WIDTH).unwrap(), 0x1234);
        map.write(regs::DMA_SIZE, 0xdead_beef).unwrap();
        assert_eq!(map.read(regs::DMA_SIZE).unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_value_masked_to_width() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        map.write(regs::PREVIEW_WIDTH, 0xabcd_1234).unwrap();
        assert_eq!(map.read(regs::PREVIEW_WIDTH).unwrap(), 0x1234);
    }

    #[test]
    fn test_invalid_width_rejected() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        let reg = Reg::from_raw((3 << 24) | 0x2000);
        assert!(matches!(map.read(reg), Err(Error::InvalidArgument(_))));
        assert!(matches!(map.write(reg, 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            map.write(Reg::new8(0x2000), 1),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(chip.write_count(), 0);
    }

    #[test]
    fn test_page_cache() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        assert_eq!(map.cached_page(), None);

        map.write(regs::ADV_IRQ_SYS_INTE, 1).unwrap();
        map.read(regs::ADV_IRQ_SYS_INTE).unwrap();
        assert_eq!(chip.page_select_count(), 1);
        assert_eq!(map.cached_page(), Some(0x0023_0000));

        map.read(regs::ADV_CAPTURE_A_FV_CNT).unwrap();
        assert_eq!(chip.page_select_count(), 2);

        // Direct registers leave the page alone
        map.read(regs::CHIP_VERSION).unwrap();
        map.read(regs::ADV_CAPTURE_A_FV_CNT).unwrap();
        assert_eq!(chip.page_select_count(), 2);

        map.invalidate_page();
        map.read(regs::ADV_CAPTURE_A_FV_CNT).unwrap();
        assert_eq!(chip.page_select_count(), 3);
    }

    #[test]
    fn test_failed_page_select_invalidates_cache() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        map.read(regs::ADV_IRQ_SYS_INTE).unwrap();

        chip.fail_writes_at(regs::ADVANCED_BASE.offset());
        assert!(map.read(regs::ADV_CAPTURE_A_FV_CNT).is_err());
        assert_eq!(map.cached_page(), None);

        chip.clear_faults();
        map.read(regs::ADV_IRQ_SYS_INTE).unwrap();
        assert_eq!(map.cached_page(), Some(0x0023_0000));
    }

    #[test]
    fn test_chain_stops_at_first_error() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        chip.fail_writes_at(regs::PREVIEW_HEIGHT.offset());

        let result = map
            .chain()
            .write(regs::PREVIEW_WIDTH, 640)
            .write(regs::PREVIEW_HEIGHT, 480)
            .write(regs::PREVIEW_OUT_FMT, 0x50)
            .finish();

        assert!(result.is_err());
        assert_eq!(chip.peek16(regs::PREVIEW_WIDTH.offset()), 640);
        assert_eq!(chip.peek16(regs::PREVIEW_OUT_FMT.offset()), 0);
    }

    #[test]
    fn test_update_bits() {
        let chip = SimChip::new();
        let mut map = Regmap::new(chip.bus());
        map.write(regs::AE_CTRL, 0x0130).unwrap();
        map.update_bits(regs::AE_CTRL, regs::AE_CTRL_MODE_MASK, 0x0c)
            .unwrap();
        assert_eq!(map.read(regs::AE_CTRL).unwrap(), 0x013c);
    }
}
