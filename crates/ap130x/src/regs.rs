// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! AP130X register map.
//!
//! Every register is described by a [`Reg`], a tagged 32-bit value:
//!
//! | Bits  | Meaning                                             |
//! |-------|-----------------------------------------------------|
//! | 31:24 | Access width in bytes (2 or 4 for ISP registers)    |
//! | 23:16 | Page of the advanced register space (0 = direct)    |
//! | 15:0  | Register offset                                     |
//!
//! Paged registers are reached through a 4 KiB window at [`ADVANCED_WINDOW`]
//! after the page value has been written to [`ADVANCED_BASE`].

use std::fmt;

/// Tagged register address: width, page and offset in one value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u32);

const WIDTH_SHIFT: u32 = 24;
const PAGE_MASK: u32 = 0x00ff_0000;
const OFFSET_MASK: u32 = 0x0000_ffff;

impl Reg {
    /// 8-bit register. Only meaningful for sensor registers on the sub-bus.
    pub const fn new8(addr: u32) -> Reg {
        Reg((1 << WIDTH_SHIFT) | (addr & 0x00ff_ffff))
    }

    /// 16-bit register.
    pub const fn new16(addr: u32) -> Reg {
        Reg((2 << WIDTH_SHIFT) | (addr & 0x00ff_ffff))
    }

    /// 32-bit register.
    pub const fn new32(addr: u32) -> Reg {
        Reg((4 << WIDTH_SHIFT) | (addr & 0x00ff_ffff))
    }

    /// Wrap a raw encoded value without validation. Width is checked at access time.
    pub const fn from_raw(raw: u32) -> Reg {
        Reg(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Access width in bytes.
    pub const fn width(self) -> u32 {
        self.0 >> WIDTH_SHIFT
    }

    /// Page value as written to [`ADVANCED_BASE`] (already shifted into bits 23:16).
    pub const fn page(self) -> u32 {
        self.0 & PAGE_MASK
    }

    pub const fn offset(self) -> u16 {
        (self.0 & OFFSET_MASK) as u16
    }

    pub const fn is_paged(self) -> bool {
        self.page() != 0
    }

    /// Offset inside the 16-bit bus space once the page is selected.
    pub const fn bus_offset(self) -> u16 {
        if self.is_paged() {
            ADVANCED_WINDOW.wrapping_add(self.offset())
        } else {
            self.offset()
        }
    }

    /// Mask covering the value bits of this register's width.
    pub const fn value_mask(self) -> u32 {
        match self.width() {
            1 => 0xff,
            2 => 0xffff,
            _ => 0xffff_ffff,
        }
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reg({}B, 0x{:06x})", self.width(), self.0 & 0x00ff_ffff)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_paged() {
            write!(f, "0x{:02x}:{:04x}", self.page() >> 16, self.offset())
        } else {
            write!(f, "0x{:04x}", self.offset())
        }
    }
}

/// Start of the advanced register window in the 16-bit bus space.
pub const ADVANCED_WINDOW: u16 = 0xe000;

/// Size of the advanced register window.
pub const ADVANCED_WINDOW_SIZE: u16 = 0x1000;

/// Page select register for the advanced window.
pub const ADVANCED_BASE: Reg = Reg::new32(0xf038);

// Info
pub const CHIP_VERSION: Reg = Reg::new16(0x0000);
pub const FRAME_CNT: Reg = Reg::new16(0x0002);
pub const ERROR: Reg = Reg::new16(0x0006);
pub const ERR_FILE: Reg = Reg::new32(0x0008);
pub const ERR_LINE: Reg = Reg::new16(0x000c);
pub const SIPM_ERR_0: Reg = Reg::new16(0x0014);
pub const SIPM_ERR_1: Reg = Reg::new16(0x0016);
pub const CHIP_REV: Reg = Reg::new16(0x0050);
pub const LINK_FREQ: Reg = Reg::new16(0x0068);
pub const CON_BUF: u16 = 0x0a2c;
pub const CON_BUF_SIZE: usize = 512;

/// Value of [`CHIP_VERSION`] on every supported part.
pub const CHIP_ID: u32 = 0x0265;

// Control
pub const DZ_TGT_FCT: Reg = Reg::new16(0x1010);
pub const SFX_MODE: Reg = Reg::new16(0x1016);
pub const ATOMIC: Reg = Reg::new16(0x1184);
pub const PREVIEW_WIDTH: Reg = Reg::new16(0x2000);
pub const PREVIEW_HEIGHT: Reg = Reg::new16(0x2002);
pub const PREVIEW_OUT_FMT: Reg = Reg::new16(0x2012);
pub const PREVIEW_HINF_CTRL: Reg = Reg::new16(0x2030);

pub mod out_fmt {
    pub const FT_YUV_JFIF: u32 = 5 << 4;
    pub const FST_YUV_422: u32 = 0;
    pub const FST_YUV_420: u32 = 1;
}

pub mod hinf_ctrl {
    pub const SPOOF: u32 = 1 << 4;

    pub const fn mipi_lanes(n: u32) -> u32 {
        n
    }
}

// IQ
pub const AE_CTRL: Reg = Reg::new16(0x5002);
pub const AE_MANUAL_GAIN: Reg = Reg::new16(0x5006);
pub const AE_MET: Reg = Reg::new16(0x503e);
pub const AWB_CTRL: Reg = Reg::new16(0x5100);
pub const FLICK_CTRL: Reg = Reg::new16(0x5440);
pub const SCENE_CTRL: Reg = Reg::new16(0x5454);

pub const AE_CTRL_MODE_MASK: u32 = 0x0f;

pub mod awb {
    pub const MODE_MASK: u32 = 0x0f;
    pub const FLASH: u32 = 1 << 8;

    pub const OFF: u32 = 0;
    pub const HORIZON: u32 = 1;
    pub const A: u32 = 2;
    pub const CWF: u32 = 3;
    pub const D50: u32 = 4;
    pub const D65: u32 = 5;
    pub const D75: u32 = 6;
    pub const MANUAL: u32 = 7;
    pub const MEASURE: u32 = 8;
    pub const AUTO: u32 = 15;
}

pub mod flicker {
    pub const DISABLED: u32 = 0;
    pub const MANUAL: u32 = 1;
    pub const AUTO: u32 = 2;

    pub const fn freq(hz: u32) -> u32 {
        hz << 8
    }
}

pub mod scene {
    pub const NORMAL: u32 = 0;
    pub const PORTRAIT: u32 = 1;
    pub const LANDSCAPE: u32 = 2;
    pub const SPORT: u32 = 3;
    pub const CLOSE_UP: u32 = 4;
    pub const NIGHT: u32 = 5;
    pub const TWILIGHT: u32 = 6;
    pub const BACKLIGHT: u32 = 7;
    pub const HIGH_SENSITIVE: u32 = 8;
    pub const NIGHT_PORTRAIT: u32 = 9;
    pub const BEACH: u32 = 10;
    pub const DOCUMENT: u32 = 11;
    pub const PARTY: u32 = 12;
    pub const FIREWORKS: u32 = 13;
    pub const SUNSET: u32 = 14;
    pub const AUTO: u32 = 0xff;
}

pub mod sfx {
    pub const NORMAL: u32 = 0;
    pub const ALIEN: u32 = 1;
    pub const ANTIQUE: u32 = 2;
    pub const BW: u32 = 3;
    pub const EMBOSS: u32 = 4;
    pub const EMBOSS_COLORED: u32 = 5;
    pub const GRAYSCALE: u32 = 6;
    pub const NEGATIVE: u32 = 7;
    pub const BLUISH: u32 = 8;
    pub const GREENISH: u32 = 9;
    pub const REDISH: u32 = 10;
    pub const POSTERIZE1: u32 = 11;
    pub const POSTERIZE2: u32 = 12;
    pub const SEPIA1: u32 = 13;
    pub const SEPIA2: u32 = 14;
    pub const SKETCH: u32 = 15;
    pub const SOLARIZE: u32 = 16;
    pub const FOGGY: u32 = 17;
}

// System
pub const BOOTDATA_STAGE: Reg = Reg::new16(0x6002);
pub const SENSOR_SELECT: Reg = Reg::new16(0x600c);
pub const SYS_START: Reg = Reg::new16(0x601a);

/// Number of warning registers.
pub const WARNING_COUNT: usize = 4;

/// Warning register `n` (0..4).
pub const fn warning(n: u32) -> Reg {
    Reg::new16(0x6004 + n * 2)
}

pub mod bootdata {
    /// Written between the PLL segment and the rest of the image.
    pub const PLL_DONE: u32 = 0x0002;
    /// Written once the whole image has been transferred.
    pub const COMPLETE: u32 = 0xffff;
}

pub mod sys_start {
    pub const PLL_LOCK: u32 = 1 << 15;
    pub const LOAD_OTP: u32 = 1 << 12;
    pub const RESTART_ERROR: u32 = 1 << 11;
    pub const STALL_STATUS: u32 = 1 << 9;
    pub const STALL_EN: u32 = 1 << 8;
    pub const STALL_MODE_DISABLED: u32 = 1 << 6;
}

// DMA bridge
pub const DMA_SRC: Reg = Reg::new32(0x60a0);
pub const DMA_DST: Reg = Reg::new32(0x60a4);
pub const DMA_SIZE: Reg = Reg::new32(0x60a8);
pub const DMA_CTRL: Reg = Reg::new16(0x60ac);

pub mod dma {
    pub const DST_REG: u32 = 0 << 8;
    pub const DST_SIP: u32 = 3 << 8;
    pub const SRC_REG: u32 = 0 << 4;
    pub const SRC_SIP: u32 = 3 << 4;
    pub const MODE_MASK: u32 = 7;
    pub const MODE_IDLE: u32 = 0;
    pub const MODE_COPY: u32 = 2;

    /// Sub-bus descriptor fields.
    pub const fn sip_sipm(port: u32) -> u32 {
        port << 26
    }
    pub const SIP_DATA_16_BIT: u32 = 1 << 25;
    pub const SIP_ADDR_16_BIT: u32 = 1 << 24;
    pub const fn sip_id(addr: u32) -> u32 {
        addr << 17
    }
    pub const fn sip_reg(reg: u32) -> u32 {
        reg & 0xffff
    }
}

// Image
pub const BRIGHTNESS: Reg = Reg::new16(0x7000);
pub const CONTRAST: Reg = Reg::new16(0x7002);
pub const SATURATION: Reg = Reg::new16(0x7006);
pub const GAMMA: Reg = Reg::new16(0x700a);

// Firmware
pub const SIP_CRC: Reg = Reg::new16(0xf052);

/// Sliding window used for firmware download.
pub const FW_WINDOW_OFFSET: u16 = 0x8000;
pub const FW_WINDOW_SIZE: usize = 0x2000;

// Advanced registers
pub const ADV_IRQ_SYS_INTE: Reg = Reg::new32(0x0023_0000);

pub mod irq {
    pub const SIPM: u32 = 3 << 6;
    pub const SIPS_FIFO_WRITE: u32 = 1 << 3;
}

pub const ADV_CAPTURE_A_FV_CNT: Reg = Reg::new32(0x0049_0040);

/// MIPI receiver lane status for sensor port `port` and lane `lane`.
pub const fn adv_lane_stat(port: u32, lane: u32) -> Reg {
    Reg::new32(0x0042_0008 + port * 0x5_0000 + lane * 0x20)
}

pub mod lane {
    pub const ERR: u32 = 1 << 18;
    pub const ABORT: u32 = 1 << 17;

    pub const fn err_lp_val(v: u32) -> u32 {
        (v >> 30) & 3
    }
    pub const fn err_state(v: u32) -> u32 {
        (v >> 24) & 0xf
    }
    pub const fn lp_val(v: u32) -> u32 {
        (v >> 6) & 3
    }
    pub const fn state(v: u32) -> u32 {
        v & 0xf
    }
}
