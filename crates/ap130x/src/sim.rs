// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Simulated AP130X for host-side testing and bring-up rehearsal.
//!
//! [`SimChip`] is a register-level model of the ISP: a 64 KiB big-endian
//! register file, paged advanced registers behind the 0xe000 window, a DMA
//! bridge that copies to and from per-port sensor register files, and a CRC
//! accumulator fed by firmware window writes. It also hands out GPIO, clock,
//! regulator and delay implementations that record what the driver did, so
//! power sequencing can be checked event by event.
//!
//! The model follows the hardware closely enough that a full attach, stream
//! and diagnostics cycle runs unchanged against it. Faults can be injected
//! per register offset, per supply, on the clock, the DMA engine and the
//! firmware CRC.

use crate::{
    bus::RegisterBus,
    firmware::FirmwareSource,
    power::{Clock, Platform, Regulator, RegulatorProvider},
    regs::{self, Reg},
    Error,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, OutputPin},
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    convert::Infallible,
    io,
    sync::{Arc, Mutex, MutexGuard},
};

/// Chip revision reported by the simulated part.
pub const SIM_CHIP_REV: u16 = 0x1203;

/// Power and timing events recorded by the simulated platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Gpio { line: &'static str, active: bool },
    Clock(bool),
    Supply {
        consumer: String,
        name: String,
        enabled: bool,
    },
    Delay(u32),
}

/// One write transaction as seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Selected page when the write targeted the advanced window.
    pub page: Option<u32>,
    pub offset: u16,
    pub data: Vec<u8>,
}

impl WriteRecord {
    /// Big-endian value of the written bytes.
    pub fn value(&self) -> u32 {
        self.data
            .iter()
            .take(4)
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }
}

/// CRC-16/CCITT (polynomial 0x1021, MSB first) as computed by the ISP over
/// firmware window writes.
pub fn crc16(mut crc: u16, data: &[u8]) -> u16 {
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Build a firmware image whose header CRC matches what the simulated ISP
/// computes while the image is downloaded.
pub fn firmware_image(pll: &[u8], payload: &[u8]) -> Vec<u8> {
    let crc = crc16(crc16(0xffff, pll), payload);
    let checksum = pll
        .iter()
        .chain(payload)
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
    let total = pll.len() + payload.len();

    let mut image = Vec::with_capacity(16 + total);
    image.extend_from_slice(&u32::from(crc).to_le_bytes());
    image.extend_from_slice(&checksum.to_le_bytes());
    image.extend_from_slice(&(pll.len() as u32).to_le_bytes());
    image.extend_from_slice(&(total as u32).to_le_bytes());
    image.extend_from_slice(pll);
    image.extend_from_slice(payload);
    image
}

/// Deterministic firmware image with a `pll_len` byte PLL segment and
/// `total_len` bytes of payload in all.
pub fn synthetic_firmware(pll_len: usize, total_len: usize) -> Vec<u8> {
    let bytes: Vec<u8> = (0..total_len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect();
    let split = pll_len.min(total_len);
    firmware_image(&bytes[..split], &bytes[split..])
}

#[derive(Default)]
struct Faults {
    reads: HashSet<u16>,
    writes: HashSet<u16>,
    supplies: HashSet<(String, String)>,
    clock: bool,
    dma_stuck: bool,
    crc_failures: u32,
}

struct SimState {
    mem: Vec<u8>,
    pages: HashMap<u32, Vec<u8>>,
    in_reset: bool,
    sensors: HashMap<(u32, u32), u16>,
    lanes: HashMap<u32, VecDeque<Option<u32>>>,
    writes: Vec<WriteRecord>,
    window_writes: Vec<(u16, usize)>,
    firmware: Vec<u8>,
    corrupt_crc: bool,
    faults: Faults,
    events: Vec<Event>,
}

fn bus_error(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, msg.to_string()))
}

impl SimState {
    fn new() -> Self {
        let mut state = SimState {
            mem: vec![0; 0x1_0000],
            pages: HashMap::new(),
            in_reset: false,
            sensors: HashMap::new(),
            lanes: HashMap::new(),
            writes: Vec::new(),
            window_writes: Vec::new(),
            firmware: Vec::new(),
            corrupt_crc: false,
            faults: Faults::default(),
            events: Vec::new(),
        };
        state.power_on_defaults();
        state
    }

    fn power_on_defaults(&mut self) {
        self.mem.iter_mut().for_each(|b| *b = 0);
        self.pages.clear();
        self.firmware.clear();
        self.window_writes.clear();
        self.corrupt_crc = false;
        self.store(regs::CHIP_VERSION.offset(), &(regs::CHIP_ID as u16).to_be_bytes());
        self.store(regs::CHIP_REV.offset(), &SIM_CHIP_REV.to_be_bytes());
        // 445 MHz link, reported as MHz * 2
        self.store(regs::LINK_FREQ.offset(), &890u16.to_be_bytes());
    }

    fn load(&self, offset: u16, len: usize) -> Vec<u8> {
        let start = usize::from(offset);
        self.mem[start..start + len].to_vec()
    }

    fn store(&mut self, offset: u16, data: &[u8]) {
        let start = usize::from(offset);
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    fn load32(&self, offset: u16) -> u32 {
        let b = self.load(offset, 4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn current_page(&self) -> u32 {
        self.load32(regs::ADVANCED_BASE.offset())
    }

    fn in_window(offset: u16) -> bool {
        (regs::ADVANCED_WINDOW..regs::ADVANCED_WINDOW + regs::ADVANCED_WINDOW_SIZE).contains(&offset)
    }

    fn in_fw_window(offset: u16) -> bool {
        let start = usize::from(regs::FW_WINDOW_OFFSET);
        (start..start + regs::FW_WINDOW_SIZE).contains(&usize::from(offset))
    }

    fn page_mut(&mut self, page: u32) -> &mut Vec<u8> {
        self.pages
            .entry(page)
            .or_insert_with(|| vec![0; usize::from(regs::ADVANCED_WINDOW_SIZE)])
    }

    fn check_span(offset: u16, len: usize) -> Result<(), Error> {
        let end = usize::from(offset) + len;
        if Self::in_window(offset) && end > 0xf000 {
            return Err(bus_error("access crosses the advanced window"));
        }
        if Self::in_fw_window(offset)
            && end > usize::from(regs::FW_WINDOW_OFFSET) + regs::FW_WINDOW_SIZE
        {
            return Err(bus_error("access crosses the firmware window"));
        }
        if end > 0x1_0000 {
            return Err(bus_error("access beyond register space"));
        }
        Ok(())
    }

    fn read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error> {
        if self.in_reset {
            return Err(bus_error("device held in reset"));
        }
        if self.faults.reads.contains(&offset) {
            return Err(bus_error("injected read fault"));
        }
        Self::check_span(offset, buf.len())?;

        if Self::in_window(offset) {
            let page = self.current_page();
            let rel = usize::from(offset - regs::ADVANCED_WINDOW);
            if buf.len() == 4 {
                if let Some(queue) = self.lanes.get_mut(&(page | rel as u32)) {
                    match queue.pop_front() {
                        Some(Some(value)) => {
                            buf.copy_from_slice(&value.to_be_bytes());
                            return Ok(());
                        }
                        Some(None) => return Err(bus_error("injected lane read fault")),
                        None => {}
                    }
                }
            }
            let data = &self.page_mut(page)[rel..rel + buf.len()];
            buf.copy_from_slice(data);
            return Ok(());
        }

        buf.copy_from_slice(&self.load(offset, buf.len()));
        if offset == regs::SIP_CRC.offset() && buf.len() == 2 && self.corrupt_crc {
            buf[0] ^= 0x5a;
            buf[1] ^= 0xa5;
        }
        Ok(())
    }

    fn write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error> {
        if self.in_reset {
            return Err(bus_error("device held in reset"));
        }
        if self.faults.writes.contains(&offset) {
            return Err(bus_error("injected write fault"));
        }
        Self::check_span(offset, data.len())?;

        if Self::in_window(offset) {
            let page = self.current_page();
            self.writes.push(WriteRecord {
                page: Some(page),
                offset,
                data: data.to_vec(),
            });
            let rel = usize::from(offset - regs::ADVANCED_WINDOW);
            self.page_mut(page)[rel..rel + data.len()].copy_from_slice(data);
            return Ok(());
        }

        self.writes.push(WriteRecord {
            page: None,
            offset,
            data: data.to_vec(),
        });

        if Self::in_fw_window(offset) {
            self.window_writes.push((offset, data.len()));
            self.firmware.extend_from_slice(data);
            let crc = self.load(regs::SIP_CRC.offset(), 2);
            let crc = crc16(u16::from_be_bytes([crc[0], crc[1]]), data);
            self.store(regs::SIP_CRC.offset(), &crc.to_be_bytes());
            return Ok(());
        }

        self.store(offset, data);

        if offset == regs::SIP_CRC.offset() {
            self.firmware.clear();
            self.window_writes.clear();
            self.corrupt_crc = self.faults.crc_failures > 0;
            if self.corrupt_crc {
                self.faults.crc_failures -= 1;
            }
        } else if offset == regs::DMA_CTRL.offset() && data.len() == 2 {
            self.dma(u32::from(u16::from_be_bytes([data[0], data[1]])));
        }
        Ok(())
    }

    fn dma(&mut self, ctrl: u32) {
        if ctrl & regs::dma::MODE_MASK != regs::dma::MODE_COPY || self.faults.dma_stuck {
            return;
        }

        let size = self.load32(regs::DMA_SIZE.offset()) as usize;
        let src = self.load32(regs::DMA_SRC.offset());
        let dst = self.load32(regs::DMA_DST.offset());
        let size = size.clamp(1, 4);

        let bytes = if (ctrl >> 4) & 3 == 3 {
            let key = ((src >> 26) & 0xf, src & 0xffff);
            let value = self.sensors.get(&key).copied().unwrap_or(0);
            if size == 1 {
                vec![value as u8]
            } else {
                value.to_be_bytes().to_vec()
            }
        } else {
            self.load((src & 0xffff) as u16, size)
        };

        if (ctrl >> 8) & 3 == 3 {
            let key = ((dst >> 26) & 0xf, dst & 0xffff);
            let value = if bytes.len() == 1 {
                u16::from(bytes[0])
            } else {
                u16::from_be_bytes([bytes[0], bytes[1]])
            };
            self.sensors.insert(key, value);
        } else {
            self.store((dst & 0xffff) as u16, &bytes);
        }

        let idle = (ctrl & !regs::dma::MODE_MASK) as u16;
        self.store(regs::DMA_CTRL.offset(), &idle.to_be_bytes());
    }
}

/// Shared handle to a simulated AP130X.
#[derive(Clone)]
pub struct SimChip {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChip {
    /// A powered, out-of-reset chip with default register contents.
    pub fn new() -> Self {
        SimChip {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register transport connected to this chip.
    pub fn bus(&self) -> SimBus {
        SimBus { chip: self.clone() }
    }

    /// Delay that records requested waits instead of sleeping.
    pub fn delay(&self) -> SimDelay {
        SimDelay { chip: self.clone() }
    }

    /// Platform resources wired to this chip. The reset line holds the chip
    /// in reset while asserted and restores power-on register defaults when
    /// released.
    pub fn platform(&self) -> Platform {
        Platform {
            reset: Box::new(SimPin::new("reset", self.clone())),
            standby: Some(Box::new(SimPin::new("standby", self.clone()))),
            isp_en: Some(Box::new(SimPin::new("isp_en", self.clone()))),
            clock: Box::new(SimClock { chip: self.clone() }),
            regulators: Box::new(SimRegulators { chip: self.clone() }),
        }
    }

    fn set_reset(&self, active: bool) {
        let mut state = self.lock();
        if active {
            state.in_reset = true;
        } else if state.in_reset {
            state.in_reset = false;
            state.power_on_defaults();
        }
    }

    pub fn in_reset(&self) -> bool {
        self.lock().in_reset
    }

    fn record(&self, event: Event) {
        self.lock().events.push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Sum of every delay requested so far, in microseconds.
    pub fn total_delay_us(&self) -> u64 {
        self.lock()
            .events
            .iter()
            .map(|e| match e {
                Event::Delay(us) => u64::from(*us),
                _ => 0,
            })
            .sum()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Values written to `reg`, oldest first.
    pub fn writes_to(&self, reg: Reg) -> Vec<u32> {
        let offset = reg.bus_offset();
        let page = reg.is_paged().then(|| reg.page());
        self.lock()
            .writes
            .iter()
            .filter(|w| w.offset == offset && w.page == page)
            .map(WriteRecord::value)
            .collect()
    }

    /// Number of writes to the advanced page-select register.
    pub fn page_select_count(&self) -> usize {
        self.writes_to(regs::ADVANCED_BASE).len()
    }

    /// Offsets and lengths of the firmware window writes of the last download.
    pub fn window_writes(&self) -> Vec<(u16, usize)> {
        self.lock().window_writes.clone()
    }

    /// Bytes received through the firmware window during the last download.
    pub fn downloaded_firmware(&self) -> Vec<u8> {
        self.lock().firmware.clone()
    }

    /// Read a register directly, bypassing faults and logging.
    pub fn peek(&self, reg: Reg) -> u32 {
        let mut state = self.lock();
        let width = if reg.width() == 4 { 4 } else { 2 };
        let bytes = if reg.is_paged() {
            let rel = usize::from(reg.offset());
            state.page_mut(reg.page())[rel..rel + width].to_vec()
        } else {
            state.load(reg.offset(), width)
        };
        bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }

    pub fn peek16(&self, offset: u16) -> u16 {
        let b = self.lock().load(offset, 2);
        u16::from_be_bytes([b[0], b[1]])
    }

    /// Write a register directly, bypassing faults and logging.
    pub fn poke(&self, reg: Reg, value: u32) {
        let mut state = self.lock();
        let bytes = value.to_be_bytes();
        let data = if reg.width() == 4 { &bytes[..] } else { &bytes[2..] };
        if reg.is_paged() {
            let rel = usize::from(reg.offset());
            state.page_mut(reg.page())[rel..rel + data.len()].copy_from_slice(data);
        } else {
            state.store(reg.offset(), data);
        }
    }

    /// Place text in the firmware console buffer.
    pub fn set_console(&self, text: &str) {
        let mut state = self.lock();
        let mut buf = vec![0u8; regs::CON_BUF_SIZE];
        let len = text.len().min(regs::CON_BUF_SIZE - 1);
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        state.store(regs::CON_BUF, &buf);
    }

    pub fn set_sensor_reg(&self, port: u32, reg: u32, value: u16) {
        self.lock().sensors.insert((port, reg & 0xffff), value);
    }

    pub fn sensor_reg(&self, port: u32, reg: u32) -> Option<u16> {
        self.lock().sensors.get(&(port, reg & 0xffff)).copied()
    }

    /// Queue raw lane status values returned by successive reads of
    /// lane `lane` on sensor port `port`.
    pub fn push_lane_samples(&self, port: u32, lane: u32, samples: &[u32]) {
        let reg = regs::adv_lane_stat(port, lane);
        let key = reg.page() | u32::from(reg.offset());
        self.lock()
            .lanes
            .entry(key)
            .or_default()
            .extend(samples.iter().copied().map(Some));
    }

    /// Queue a failing read of lane `lane` on sensor port `port`.
    pub fn push_lane_read_error(&self, port: u32, lane: u32) {
        let reg = regs::adv_lane_stat(port, lane);
        let key = reg.page() | u32::from(reg.offset());
        self.lock().lanes.entry(key).or_default().push_back(None);
    }

    pub fn fail_reads_at(&self, offset: u16) {
        self.lock().faults.reads.insert(offset);
    }

    pub fn fail_writes_at(&self, offset: u16) {
        self.lock().faults.writes.insert(offset);
    }

    pub fn fail_supply(&self, consumer: &str, name: &str) {
        self.lock()
            .faults
            .supplies
            .insert((consumer.to_string(), name.to_string()));
    }

    pub fn fail_clock(&self, fail: bool) {
        self.lock().faults.clock = fail;
    }

    /// Leave the DMA engine busy after a copy is started.
    pub fn set_dma_stuck(&self, stuck: bool) {
        self.lock().faults.dma_stuck = stuck;
    }

    /// Report a wrong CRC for the next `count` firmware downloads.
    pub fn corrupt_next_crcs(&self, count: u32) {
        self.lock().faults.crc_failures = count;
    }

    /// Remove register, clock and DMA faults. Supply faults are kept.
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.reads.clear();
        state.faults.writes.clear();
        state.faults.clock = false;
        state.faults.dma_stuck = false;
        state.faults.crc_failures = 0;
    }
}

/// Register transport of a [`SimChip`].
pub struct SimBus {
    chip: SimChip,
}

impl RegisterBus for SimBus {
    fn raw_read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error> {
        self.chip.lock().read(offset, buf)
    }

    fn raw_write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error> {
        self.chip.lock().write(offset, data)
    }
}

/// Delay that records instead of sleeping.
pub struct SimDelay {
    chip: SimChip,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.chip
            .record(Event::Delay(ns / 1000 + u32::from(ns % 1000 != 0)));
    }

    fn delay_us(&mut self, us: u32) {
        self.chip.record(Event::Delay(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.chip.record(Event::Delay(ms.saturating_mul(1000)));
    }
}

/// GPIO output recording its logical level. The `reset` line also drives
/// the chip's reset state.
pub struct SimPin {
    line: &'static str,
    chip: SimChip,
}

impl SimPin {
    pub fn new(line: &'static str, chip: SimChip) -> Self {
        SimPin { line, chip }
    }

    fn set(&mut self, active: bool) {
        self.chip.record(Event::Gpio {
            line: self.line,
            active,
        });
        if self.line == "reset" {
            self.chip.set_reset(active);
        }
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

pub struct SimClock {
    chip: SimChip,
}

impl Clock for SimClock {
    fn enable(&mut self) -> Result<(), Error> {
        if self.chip.lock().faults.clock {
            return Err(Error::Device("clock enable failed".into()));
        }
        self.chip.record(Event::Clock(true));
        Ok(())
    }

    fn disable(&mut self) {
        self.chip.record(Event::Clock(false));
    }
}

pub struct SimRegulators {
    chip: SimChip,
}

impl RegulatorProvider for SimRegulators {
    fn get(&mut self, consumer: &str, supply: &str) -> Result<Box<dyn Regulator + Send>, Error> {
        Ok(Box::new(SimRegulator {
            consumer: consumer.to_string(),
            name: supply.to_string(),
            chip: self.chip.clone(),
        }))
    }
}

pub struct SimRegulator {
    consumer: String,
    name: String,
    chip: SimChip,
}

impl SimRegulator {
    fn event(&self, enabled: bool) -> Event {
        Event::Supply {
            consumer: self.consumer.clone(),
            name: self.name.clone(),
            enabled,
        }
    }
}

impl Regulator for SimRegulator {
    fn enable(&mut self) -> Result<(), Error> {
        let key = (self.consumer.clone(), self.name.clone());
        if self.chip.lock().faults.supplies.contains(&key) {
            return Err(Error::Device(format!(
                "failed to enable {} for {}",
                self.name, self.consumer
            )));
        }
        self.chip.record(self.event(true));
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Error> {
        self.chip.record(self.event(false));
        Ok(())
    }
}

/// In-memory firmware store.
#[derive(Debug, Default, Clone)]
pub struct SimFirmware {
    images: HashMap<String, Vec<u8>>,
}

impl SimFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, name: &str, image: Vec<u8>) -> Self {
        self.images.insert(name.to_string(), image);
        self
    }
}

impl FirmwareSource for SimFirmware {
    fn request(&self, name: &str) -> Result<Vec<u8>, Error> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("firmware {}", name)))
    }
}
