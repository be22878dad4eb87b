// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Driver instance.
//!
//! [`Ap130x::attach`] powers the ISP and its sensors, downloads the firmware
//! and leaves the chip stalled. The returned handle owns the register bus and
//! the power resources; dropping it powers everything down again.
//!
//! All mutable state lives behind one mutex, so a handle can be shared
//! between threads and every operation sees a consistent device.

use crate::{
    bus::{RegisterBus, Regmap},
    controls::{self, ControlId, Controls},
    diag::{self, LaneStateReport, StatusReport},
    firmware::{self, BootStage, FirmwareImage, FirmwareSource},
    format::{FrameSizeRange, Formats, MbusCode, Pad, PadFormat, Rect, SelectionTarget},
    power::{self, GpioLine, IspPower, Platform, SensorPower},
    regs::{self, hinf_ctrl, irq, sys_start, Reg},
    sensor::{self, SensorInfo},
    sipm::{self, SipmAddress},
    Error,
};
use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};
use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

/// Maximum number of sensors behind one ISP.
pub const MAX_SENSORS: usize = 2;

/// Firmware download attempts before attach gives up.
pub const MAX_LOAD_ATTEMPTS: u32 = 3;

const STALL_SETTLE_MS: u32 = 200;

/// Board description consumed at attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Sensor compatible string, `None` for the test pattern generator.
    pub model: Option<String>,
    /// Sensor port indices populated on the board.
    pub sensors: Vec<u32>,
    /// Number of MIPI CSI-2 data lanes towards the host.
    pub data_lanes: u32,
}

impl BoardConfig {
    pub fn new(model: Option<&str>, sensors: &[u32], data_lanes: u32) -> Self {
        BoardConfig {
            model: model.map(str::to_string),
            sensors: sensors.to_vec(),
            data_lanes,
        }
    }

    /// Test pattern generator board without sensors.
    pub fn tpg(data_lanes: u32) -> Self {
        Self::new(None, &[], data_lanes)
    }
}

/// Validated board: sensor model and populated ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub info: &'static SensorInfo,
    pub ports: Vec<u32>,
    pub data_lanes: u32,
}

impl Board {
    /// Number of sensor images placed side by side on the source pad.
    pub fn width_factor(&self) -> u32 {
        (self.ports.len() as u32).max(1)
    }
}

impl TryFrom<&BoardConfig> for Board {
    type Error = Error;

    fn try_from(config: &BoardConfig) -> Result<Self, Self::Error> {
        if !(1..=4).contains(&config.data_lanes) {
            return Err(Error::InvalidArgument(format!(
                "invalid number of data lanes {}",
                config.data_lanes
            )));
        }

        let Some(model) = config.model.as_deref() else {
            if !config.sensors.is_empty() {
                warn!("No sensor model, ignoring {} sensor entries", config.sensors.len());
            }
            debug!("No sensor model, using the test pattern generator");
            return Ok(Board {
                info: &sensor::TPG,
                ports: Vec::new(),
                data_lanes: config.data_lanes,
            });
        };

        let info = sensor::lookup(model)?;

        let mut ports = Vec::with_capacity(MAX_SENSORS);
        for &index in &config.sensors {
            if index as usize >= MAX_SENSORS {
                warn!("Skipping sensor with invalid index {}", index);
                continue;
            }
            if ports.contains(&index) {
                warn!("Skipping duplicate sensor {}", index);
                continue;
            }
            ports.push(index);
        }
        ports.sort_unstable();

        if ports.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "no valid sensor for model '{}'",
                model
            )));
        }

        Ok(Board {
            info,
            ports,
            data_lanes: config.data_lanes,
        })
    }
}

/// Chip revision as reported by `CHIP_REV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipRevision(pub u16);

impl ChipRevision {
    pub fn major(&self) -> u16 {
        (self.0 & 0xf000) >> 12
    }

    pub fn minor(&self) -> u16 {
        (self.0 & 0x0f00) >> 8
    }

    pub fn patch(&self) -> u16 {
        self.0 & 0x00ff
    }
}

impl fmt::Display for ChipRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// One sensor behind the ISP, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorView {
    pub index: u32,
    /// `"<sensor> <index>"`, e.g. `"ar0144 0"`.
    pub name: String,
    pub info: &'static SensorInfo,
}

impl SensorView {
    /// Sensors run at a fixed format chosen by the firmware.
    pub fn format(&self) -> PadFormat {
        PadFormat {
            code: self.info.format,
            width: self.info.resolution.width,
            height: self.info.resolution.height,
        }
    }

    pub fn enum_mbus_code(&self, index: usize) -> Result<MbusCode, Error> {
        if index != 0 {
            return Err(Error::InvalidArgument(format!("no code at index {}", index)));
        }
        Ok(self.info.format)
    }

    pub fn enum_frame_size(&self, index: usize, code: MbusCode) -> Result<FrameSizeRange, Error> {
        if index != 0 || code != self.info.format {
            return Err(Error::InvalidArgument(format!(
                "no frame size for {} at index {}",
                code, index
            )));
        }
        let res = self.info.resolution;
        Ok(FrameSizeRange {
            min_width: res.width,
            min_height: res.height,
            max_width: res.width,
            max_height: res.height,
        })
    }
}

struct Sensor {
    index: u32,
    power: SensorPower,
}

struct State<B, D> {
    map: Regmap<B>,
    delay: D,
    power: IspPower,
    sensors: [Option<Sensor>; MAX_SENSORS],
    formats: Formats,
    controls: Controls,
    streaming: bool,
    stage: BootStage,
    revision: Option<ChipRevision>,
    sipm_addr: Option<SipmAddress>,
    // Held active for the lifetime of the driver
    _isp_en: Option<Box<dyn GpioLine + Send>>,
}

impl<B: RegisterBus, D: DelayNs> State<B, D> {
    /// Claim the platform resources, fetch the firmware and boot the ISP.
    fn bring_up(
        bus: B,
        delay: D,
        platform: Platform,
        board: &Board,
        firmware: &dyn FirmwareSource,
    ) -> Result<Self, Error> {
        let Platform {
            reset,
            standby,
            clock,
            mut regulators,
            ..
        } = platform;

        let power = IspPower::new(reset, standby, clock, regulators.as_mut())?;

        let mut sensors: [Option<Sensor>; MAX_SENSORS] = [None, None];
        for &index in &board.ports {
            let label = format!("{} {}", board.info.name, index);
            let power = SensorPower::new(&label, board.info, regulators.as_mut())?;
            sensors[index as usize] = Some(Sensor { index, power });
        }

        let image = firmware::request_image(firmware, board.info, board.ports.len())?;
        info!(
            "Firmware for {} ({} bytes, PLL {} bytes)",
            board.info.name,
            image.header().total_size,
            image.header().pll_init_size
        );

        let mut state = State {
            map: Regmap::new(bus),
            delay,
            power,
            sensors,
            formats: Formats::new(board.info, board.width_factor()),
            controls: Controls::default(),
            streaming: false,
            stage: BootStage::Idle,
            revision: None,
            sipm_addr: None,
            _isp_en: None,
        };

        state.boot(&image)?;
        Ok(state)
    }

    fn set_stage(&mut self, stage: BootStage) {
        debug!("Boot stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn power_off_sensors(&mut self) {
        let sensors = self.sensors.iter_mut().flatten().map(|s| &mut s.power);
        power::sensors_power_off(sensors);
    }

    fn power_off_all(&mut self) {
        self.power.power_off(&mut self.delay);
        self.power_off_sensors();
    }

    fn detect_chip(&mut self) -> Result<ChipRevision, Error> {
        let version = self.map.read(regs::CHIP_VERSION)?;
        let revision = ChipRevision(self.map.read(regs::CHIP_REV)? as u16);

        if version != regs::CHIP_ID {
            error!(
                "Invalid chip version, expected 0x{:04x}, got 0x{:04x}",
                regs::CHIP_ID,
                version
            );
            return Err(Error::Device(format!(
                "unexpected chip version 0x{:04x}",
                version
            )));
        }

        info!("AP130X revision {} detected", revision);
        Ok(revision)
    }

    fn load_firmware(&mut self, image: &FirmwareImage) -> Result<(), Error> {
        let mut stages = Vec::with_capacity(2);
        let result = firmware::load(&mut self.map, &mut self.delay, image, |stage| {
            debug!("Firmware download: {}", stage);
            stages.push(stage);
        });
        if let Some(stage) = stages.last() {
            self.stage = *stage;
        }
        result
    }

    /// Power cycle, detect and download until the firmware CRC checks out.
    fn boot(&mut self, image: &FirmwareImage) -> Result<(), Error> {
        let sensors = self.sensors.iter_mut().flatten().map(|s| &mut s.power);
        if let Err(e) = power::sensors_power_on(sensors, &mut self.delay) {
            self.set_stage(BootStage::Failed);
            return Err(e);
        }

        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            if let Err(e) = self.power.power_on(&mut self.delay) {
                self.power_off_sensors();
                self.set_stage(BootStage::Failed);
                return Err(e);
            }
            // Register contents, including the page select, are gone
            self.map.invalidate_page();
            self.set_stage(BootStage::PoweredOn);

            let result = self.detect_chip().and_then(|revision| {
                self.revision = Some(revision);
                self.set_stage(BootStage::ChipDetected);
                self.load_firmware(image)
            });

            match result {
                Ok(()) => {
                    if let Err(e) = self.stall(true) {
                        self.power_off_all();
                        self.set_stage(BootStage::Failed);
                        return Err(e);
                    }
                    self.set_stage(BootStage::Verified);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Firmware load attempt {}/{} failed: {}",
                        attempt, MAX_LOAD_ATTEMPTS, e
                    );
                    self.power.power_off(&mut self.delay);
                }
                Err(e) => {
                    self.power_off_all();
                    self.set_stage(BootStage::Failed);
                    return Err(e);
                }
            }
        }

        error!("Firmware load retries exceeded, aborting");
        self.power_off_sensors();
        self.set_stage(BootStage::Failed);
        Err(Error::Timeout(format!(
            "firmware load failed {} times",
            MAX_LOAD_ATTEMPTS
        )))
    }

    fn stall(&mut self, stall: bool) -> Result<(), Error> {
        if stall {
            self.map
                .chain()
                .write(
                    regs::SYS_START,
                    sys_start::PLL_LOCK | sys_start::STALL_MODE_DISABLED,
                )
                .write(
                    regs::SYS_START,
                    sys_start::PLL_LOCK | sys_start::STALL_EN | sys_start::STALL_MODE_DISABLED,
                )
                .finish()?;
            self.delay.delay_ms(STALL_SETTLE_MS);
            self.map
                .write(regs::ADV_IRQ_SYS_INTE, irq::SIPM | irq::SIPS_FIFO_WRITE)
        } else {
            self.map.write(
                regs::SYS_START,
                sys_start::PLL_LOCK
                    | sys_start::STALL_STATUS
                    | sys_start::STALL_EN
                    | sys_start::STALL_MODE_DISABLED,
            )
        }
    }

    fn configure(&mut self, data_lanes: u32) -> Result<(), Error> {
        let source = self.formats.get(Pad::Source);
        self.map
            .chain()
            .write(
                regs::PREVIEW_HINF_CTRL,
                hinf_ctrl::SPOOF | hinf_ctrl::mipi_lanes(data_lanes),
            )
            .write(
                regs::PREVIEW_WIDTH,
                source.width / self.formats.width_factor(),
            )
            .write(regs::PREVIEW_HEIGHT, source.height)
            .write(regs::PREVIEW_OUT_FMT, self.formats.out_fmt())
            .finish()?;

        self.controls.apply_all(&mut self.map)
    }

    fn sensor_port(&self, port: u32) -> Result<(), Error> {
        match self.sensors.get(port as usize) {
            Some(Some(_)) => Ok(()),
            _ => Err(Error::InvalidArgument(format!("no sensor on port {}", port))),
        }
    }

    fn sensor_read(&mut self, i2c_addr: u32, port: u32, reg: Reg) -> Result<u32, Error> {
        self.sensor_port(port)?;
        sipm::sensor_read(&mut self.map, &mut self.delay, port, i2c_addr, reg)
    }

    fn sensor_write(
        &mut self,
        i2c_addr: u32,
        port: u32,
        reg: Reg,
        value: u32,
    ) -> Result<(), Error> {
        self.sensor_port(port)?;
        sipm::sensor_write(&mut self.map, &mut self.delay, port, i2c_addr, reg, value)
    }

    fn probe_addr(&self) -> Result<SipmAddress, Error> {
        self.sipm_addr
            .ok_or_else(|| Error::InvalidArgument("debug probe address not set".into()))
    }
}

/// AP130X driver instance.
pub struct Ap130x<B: RegisterBus, D: DelayNs> {
    board: Board,
    state: Mutex<State<B, D>>,
}

impl<B: RegisterBus, D: DelayNs> Ap130x<B, D> {
    /// Bring up the ISP described by `config`.
    ///
    /// Sensors are powered first, then the ISP is power cycled and the
    /// firmware downloaded up to [`MAX_LOAD_ATTEMPTS`] times until its CRC
    /// checks out. On success the chip is left stalled, ready to stream.
    pub fn attach(
        bus: B,
        delay: D,
        mut platform: Platform,
        config: &BoardConfig,
        firmware: &dyn FirmwareSource,
    ) -> Result<Self, Error> {
        let board = Board::try_from(config)?;

        let mut isp_en = platform.isp_en.take();
        if let Some(line) = isp_en.as_mut() {
            line.set_active(true)?;
        }

        match State::bring_up(bus, delay, platform, &board, firmware) {
            Ok(mut state) => {
                state._isp_en = isp_en;
                Ok(Ap130x {
                    board,
                    state: Mutex::new(state),
                })
            }
            Err(e) => {
                if let Some(line) = isp_en.as_mut() {
                    if let Err(err) = line.set_active(false) {
                        warn!("Failed to release isp_en: {}", err);
                    }
                }
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<B, D>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn sensor_info(&self) -> &'static SensorInfo {
        self.board.info
    }

    pub fn boot_stage(&self) -> BootStage {
        self.lock().stage
    }

    pub fn chip_revision(&self) -> Option<ChipRevision> {
        self.lock().revision
    }

    /// Sensors behind the ISP, in port order.
    pub fn sensors(&self) -> Vec<SensorView> {
        self.lock()
            .sensors
            .iter()
            .flatten()
            .map(|s| SensorView {
                index: s.index,
                name: s.power.label().to_string(),
                info: self.board.info,
            })
            .collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Start or stop streaming. Requesting the current state is a no-op.
    ///
    /// Starting programs the source format and every control value, then
    /// releases the stall. The streaming flag only changes on success.
    pub fn set_stream(&self, enable: bool) -> Result<(), Error> {
        let mut state = self.lock();
        if state.streaming == enable {
            return Ok(());
        }

        let result = if enable {
            state
                .configure(self.board.data_lanes)
                .and_then(|()| state.stall(false))
        } else {
            state.stall(true)
        };

        match result {
            Ok(()) => {
                state.streaming = enable;
                info!("Stream {}", if enable { "started" } else { "stopped" });
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to {} stream: {}",
                    if enable { "start" } else { "stop" },
                    e
                );
                Err(e)
            }
        }
    }

    pub fn format(&self, pad: Pad) -> PadFormat {
        self.lock().formats.get(pad)
    }

    /// Negotiate a format without applying it.
    pub fn try_format(&self, pad: Pad, requested: &PadFormat) -> PadFormat {
        self.lock().formats.try_format(pad, requested)
    }

    /// Negotiate and apply a format. A new source format takes effect at the
    /// next stream start.
    pub fn set_format(&self, pad: Pad, requested: &PadFormat) -> PadFormat {
        let format = self.lock().formats.set(pad, requested);
        debug!("{:?} format set to {}", pad, format);
        format
    }

    pub fn enum_mbus_code(&self, pad: Pad, index: usize) -> Result<MbusCode, Error> {
        self.lock().formats.enum_mbus_code(pad, index)
    }

    pub fn enum_frame_size(
        &self,
        pad: Pad,
        index: usize,
        code: MbusCode,
    ) -> Result<FrameSizeRange, Error> {
        self.lock().formats.enum_frame_size(pad, index, code)
    }

    pub fn selection(&self, pad: Pad, target: SelectionTarget) -> Result<Rect, Error> {
        if pad.is_sink() {
            return Err(Error::InvalidArgument(format!(
                "selection not supported on {:?}",
                pad
            )));
        }
        Ok(self.lock().formats.selection(target))
    }

    /// Current control value. The link frequency is read back from the chip.
    pub fn control(&self, id: ControlId) -> Result<i32, Error> {
        let mut state = self.lock();
        if id.spec().volatile {
            return controls::read_link_frequency(&mut state.map);
        }
        Ok(state.controls.get(id))
    }

    /// Set a control, returning the value actually stored.
    ///
    /// While streaming the value is written immediately and kept only if the
    /// write succeeds. While stopped it is applied at the next stream start.
    pub fn set_control(&self, id: ControlId, value: i32) -> Result<i32, Error> {
        let value = id.spec().validate(value)?;

        let mut state = self.lock();
        if state.streaming {
            controls::apply(&mut state.map, id, value)?;
        }
        state.controls.set(id, value);
        debug!("Control {} set to {}", id, value);
        Ok(value)
    }

    pub fn read_register(&self, reg: Reg) -> Result<u32, Error> {
        self.lock().map.read(reg)
    }

    pub fn write_register(&self, reg: Reg, value: u32) -> Result<(), Error> {
        self.lock().map.write(reg, value)
    }

    /// Read an 8 or 16-bit register of the sensor on `port`.
    pub fn sensor_read(&self, port: u32, reg: Reg) -> Result<u32, Error> {
        self.lock().sensor_read(self.board.info.i2c_addr, port, reg)
    }

    pub fn sensor_write(&self, port: u32, reg: Reg, value: u32) -> Result<(), Error> {
        self.lock().sensor_write(self.board.info.i2c_addr, port, reg, value)
    }

    /// Select the sensor register accessed through [`Self::sipm_data`].
    pub fn set_sipm_addr(&self, value: u32) -> Result<SipmAddress, Error> {
        let addr = SipmAddress::parse(value)?;
        self.lock().sipm_addr = Some(addr);
        debug!("Debug probe address set to {}", addr);
        Ok(addr)
    }

    pub fn sipm_addr(&self) -> Option<SipmAddress> {
        self.lock().sipm_addr
    }

    /// Read the sensor register selected with [`Self::set_sipm_addr`].
    ///
    /// The address is looked up under the same lock as the transfer.
    pub fn sipm_data(&self) -> Result<u32, Error> {
        let mut state = self.lock();
        let addr = state.probe_addr()?;
        state.sensor_read(self.board.info.i2c_addr, addr.port, addr.reg)
    }

    pub fn set_sipm_data(&self, value: u32) -> Result<(), Error> {
        let mut state = self.lock();
        let addr = state.probe_addr()?;
        state.sensor_write(self.board.info.i2c_addr, addr.port, addr.reg, value)
    }

    pub fn dump_console(&self) -> Result<Vec<String>, Error> {
        diag::dump_console(&mut self.lock().map)
    }

    /// Log console, errors, warnings, frame counters and the lane state of
    /// every sensor port.
    pub fn log_status(&self) -> Result<StatusReport, Error> {
        diag::log_status(&mut self.lock().map, &self.board.ports)
    }

    pub fn sample_lane_state(&self, port: u32) -> Result<LaneStateReport, Error> {
        let mut state = self.lock();
        state.sensor_port(port)?;
        Ok(diag::sample_lane_state(&mut state.map, port))
    }
}

impl<B: RegisterBus, D: DelayNs> Drop for Ap130x<B, D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        debug!("Detaching, powering down");
        state.power_off_all();
        state.set_stage(BootStage::Idle);
    }
}
