// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Simulated bring-up: attach the driver to the in-memory chip model, program
//! a source format and controls, stream and report the ISP status.

use crate::error::CliError;
use crate::utils::{install_signal_handler, parse_resolution, parse_u32, print_json};
use ap130x::controls::ControlId;
use ap130x::device::{Ap130x, Board, BoardConfig};
use ap130x::diag::{LaneStateReport, StatusReport};
use ap130x::firmware::{self, FirmwareDir, FirmwareSource};
use ap130x::format::{MbusCode, Pad, PadFormat};
use ap130x::sim::{self, SimBus, SimChip, SimDelay, SimFirmware};
use clap::Args as ClapArgs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

const SIM_PLL_SIZE: usize = 0x1000;
const SIM_FIRMWARE_SIZE: usize = 0x6000;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Sensor compatible string
    #[arg(short, long, default_value = "onnn,ar0144", conflicts_with = "tpg")]
    model: String,

    /// Populated sensor ports (comma separated)
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    sensors: Vec<u32>,

    /// Use the internal test pattern generator instead of sensors
    #[arg(long)]
    tpg: bool,

    /// Number of MIPI CSI-2 data lanes
    #[arg(long, default_value_t = 4)]
    lanes: u32,

    /// JSON board description (overrides --model, --sensors, --lanes, --tpg)
    #[arg(short, long)]
    board: Option<PathBuf>,

    /// Load firmware from this directory instead of a synthetic image
    #[arg(long)]
    firmware_dir: Option<PathBuf>,

    /// Number of firmware downloads to fail with a CRC mismatch
    #[arg(long, default_value_t = 0)]
    crc_failures: u32,

    /// Source pad media bus code
    #[arg(short, long, default_value = "UYVY8_1X16")]
    format: String,

    /// Source pad size (WxH), defaults to the sensor resolution
    #[arg(long)]
    size: Option<String>,

    /// Control to set before streaming, NAME=VALUE (repeatable)
    #[arg(short, long = "control")]
    controls: Vec<String>,

    /// Keep streaming and report status until Ctrl+C
    #[arg(long)]
    follow: bool,

    /// Status report interval in milliseconds (with --follow)
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,
}

/// Board description file, mirroring [`BoardConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoardFile {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    sensors: Vec<u32>,
    #[serde(default = "default_lanes")]
    data_lanes: u32,
}

fn default_lanes() -> u32 {
    4
}

impl From<BoardFile> for BoardConfig {
    fn from(file: BoardFile) -> Self {
        BoardConfig {
            model: file.model,
            sensors: file.sensors,
            data_lanes: file.data_lanes,
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    sensor: String,
    ports: Vec<u32>,
    data_lanes: u32,
    firmware: String,
    chip_revision: Option<String>,
    boot_stage: String,
    format: FormatInfo,
    controls: Vec<ControlInfo>,
    streaming: bool,
    status: StatusInfo,
    bus: BusInfo,
}

#[derive(Debug, Serialize)]
struct FormatInfo {
    code: String,
    width: u32,
    height: u32,
}

impl From<PadFormat> for FormatInfo {
    fn from(format: PadFormat) -> Self {
        FormatInfo {
            code: format.code.to_string(),
            width: format.width,
            height: format.height,
        }
    }
}

#[derive(Debug, Serialize)]
struct ControlInfo {
    name: String,
    value: i32,
}

#[derive(Debug, Serialize)]
struct StatusInfo {
    console: Vec<String>,
    error: u32,
    err_file: u32,
    err_line: u32,
    sipm_errors: [u32; 2],
    warnings: Vec<String>,
    frames: FrameInfo,
    lanes: Vec<LaneInfo>,
}

#[derive(Debug, Serialize)]
struct FrameInfo {
    icp: u32,
    hinf: u32,
    brac: u32,
}

#[derive(Debug, Serialize)]
struct LaneInfo {
    port: u32,
    samples: u32,
    lanes: Vec<String>,
}

impl From<&LaneStateReport> for LaneInfo {
    fn from(report: &LaneStateReport) -> Self {
        LaneInfo {
            port: report.port,
            samples: report.samples,
            lanes: report.lanes.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<StatusReport> for StatusInfo {
    fn from(report: StatusReport) -> Self {
        StatusInfo {
            warnings: report
                .warning_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            lanes: report.lanes.iter().map(LaneInfo::from).collect(),
            frames: FrameInfo {
                icp: report.frame_counters.icp,
                hinf: report.frame_counters.hinf,
                brac: report.frame_counters.brac,
            },
            console: report.console,
            error: report.error,
            err_file: report.err_file,
            err_line: report.err_line,
            sipm_errors: report.sipm_errors,
        }
    }
}

#[derive(Debug, Serialize)]
struct BusInfo {
    writes: usize,
    page_selects: usize,
    delay_us: u64,
}

impl BusInfo {
    fn collect(chip: &SimChip) -> Self {
        BusInfo {
            writes: chip.write_count(),
            page_selects: chip.page_select_count(),
            delay_us: chip.total_delay_us(),
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing simulate command: {:?}", args);

    let config = board_config(&args)?;
    let board = Board::try_from(&config)?;
    let firmware_name = firmware::firmware_name(board.info, board.ports.len())?;
    let controls = args
        .controls
        .iter()
        .map(|c| parse_control(c))
        .collect::<Result<Vec<_>, _>>()?;
    let requested = source_format(&args, &board)?;

    let source: Box<dyn FirmwareSource> = match &args.firmware_dir {
        Some(dir) => Box::new(FirmwareDir::new(dir)),
        None => Box::new(SimFirmware::new().with_image(
            &firmware_name,
            sim::synthetic_firmware(SIM_PLL_SIZE, SIM_FIRMWARE_SIZE),
        )),
    };

    let chip = SimChip::new();
    if args.crc_failures > 0 {
        log::info!("Injecting {} CRC failures", args.crc_failures);
        chip.corrupt_next_crcs(args.crc_failures);
    }

    let isp = Ap130x::attach(
        chip.bus(),
        chip.delay(),
        chip.platform(),
        &config,
        source.as_ref(),
    )?;

    let applied = isp.set_format(Pad::Source, &requested);
    if applied != requested {
        log::info!("Requested {} adjusted to {}", requested, applied);
    }

    for &(id, value) in &controls {
        isp.set_control(id, value)?;
    }

    isp.set_stream(true)?;

    let report = build_report(&isp, &chip, &firmware_name, &controls)?;
    emit(&report, json)?;

    if args.follow {
        let term = install_signal_handler()?;
        let interval = Duration::from_millis(args.interval.max(1));

        while !term.load(Ordering::Relaxed) {
            thread::sleep(interval);
            if term.load(Ordering::Relaxed) {
                break;
            }
            let report = build_report(&isp, &chip, &firmware_name, &controls)?;
            emit(&report, json)?;
        }
        log::info!("Received Ctrl+C, stopping stream");
    }

    isp.set_stream(false)?;
    Ok(())
}

fn board_config(args: &Args) -> Result<BoardConfig, CliError> {
    if let Some(path) = &args.board {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CliError::NotFound(path.display().to_string()),
            _ => CliError::General(format!("Failed to read {}: {}", path.display(), e)),
        })?;
        let file: BoardFile = serde_json::from_str(&text).map_err(|e| {
            CliError::InvalidArgs(format!("Invalid board file {}: {}", path.display(), e))
        })?;
        return Ok(file.into());
    }

    if args.tpg {
        return Ok(BoardConfig::tpg(args.lanes));
    }

    Ok(BoardConfig::new(Some(&args.model), &args.sensors, args.lanes))
}

fn source_format(args: &Args, board: &Board) -> Result<PadFormat, CliError> {
    let code = MbusCode::from_name(&args.format)
        .ok_or_else(|| CliError::InvalidArgs(format!("Unknown media bus code: {}", args.format)))?;

    let (width, height) = match &args.size {
        Some(size) => parse_resolution(size)?,
        None => (
            board.info.resolution.width * board.width_factor(),
            board.info.resolution.height,
        ),
    };

    Ok(PadFormat {
        code,
        width,
        height,
    })
}

/// Parse `NAME=VALUE`, where NAME is a control identifier such as `gamma` or
/// `white-balance`.
fn parse_control(s: &str) -> Result<(ControlId, i32), CliError> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| CliError::InvalidArgs(format!("Expected NAME=VALUE: {}", s)))?;

    let key = name.replace(['-', '_'], "");
    let id = ControlId::ALL
        .into_iter()
        .find(|id| format!("{:?}", id).eq_ignore_ascii_case(&key))
        .ok_or_else(|| CliError::InvalidArgs(format!("Unknown control: {}", name)))?;

    let value = match value.strip_prefix('-') {
        Some(magnitude) => i64::from(parse_u32(magnitude)?).checked_neg(),
        None => Some(i64::from(parse_u32(value)?)),
    }
    .and_then(|v| i32::try_from(v).ok())
    .ok_or_else(|| CliError::InvalidArgs(format!("Control value out of range: {}", value)))?;

    Ok((id, value))
}

fn build_report(
    isp: &Ap130x<SimBus, SimDelay>,
    chip: &SimChip,
    firmware_name: &str,
    controls: &[(ControlId, i32)],
) -> Result<SimulationReport, CliError> {
    let status = isp.log_status()?;
    let board = isp.board();

    let controls = controls
        .iter()
        .map(|&(id, _)| {
            isp.control(id).map(|value| ControlInfo {
                name: id.to_string(),
                value,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SimulationReport {
        sensor: board.info.name.to_string(),
        ports: board.ports.clone(),
        data_lanes: board.data_lanes,
        firmware: firmware_name.to_string(),
        chip_revision: isp.chip_revision().map(|rev| rev.to_string()),
        boot_stage: isp.boot_stage().to_string(),
        format: isp.format(Pad::Source).into(),
        controls,
        streaming: isp.is_streaming(),
        status: status.into(),
        bus: BusInfo::collect(chip),
    })
}

fn emit(report: &SimulationReport, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(report);
    }

    let ports: Vec<String> = report.ports.iter().map(ToString::to_string).collect();
    println!("AP130X Simulation");
    println!("=================");
    println!(
        "Board:    {} on port(s) [{}], {} lane(s)",
        report.sensor,
        ports.join(", "),
        report.data_lanes
    );
    println!("Firmware: {}", report.firmware);
    println!(
        "Chip:     rev {} ({})",
        report.chip_revision.as_deref().unwrap_or("unknown"),
        report.boot_stage
    );
    println!(
        "Format:   {} {}x{}",
        report.format.code, report.format.width, report.format.height
    );
    for control in &report.controls {
        println!("Control:  {} = {}", control.name, control.value);
    }
    println!(
        "Stream:   {}",
        if report.streaming { "running" } else { "stopped" }
    );
    println!(
        "Status:   error {} at 0x{:08x}:{}, frames icp {} hinf {} brac {}",
        report.status.error,
        report.status.err_file,
        report.status.err_line,
        report.status.frames.icp,
        report.status.frames.hinf,
        report.status.frames.brac
    );
    if !report.status.warnings.is_empty() {
        println!("Warnings: {}", report.status.warnings.join(", "));
    }
    for port in &report.status.lanes {
        println!("Port {} ({} samples):", port.port, port.samples);
        for lane in &port.lanes {
            println!("  {}", lane);
        }
    }
    println!(
        "Bus:      {} writes, {} page selects, {} us waited",
        report.bus.writes, report.bus.page_selects, report.bus.delay_us
    );
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control() {
        assert_eq!(
            parse_control("gamma=0x2000").unwrap(),
            (ControlId::Gamma, 0x2000)
        );
        assert_eq!(
            parse_control("white-balance=3").unwrap(),
            (ControlId::WhiteBalance, 3)
        );
        assert_eq!(
            parse_control("Power_Line_Frequency=1").unwrap(),
            (ControlId::PowerLineFrequency, 1)
        );
        assert_eq!(parse_control("zoom=-1").unwrap(), (ControlId::Zoom, -1));
    }

    #[test]
    fn test_parse_control_invalid() {
        assert!(parse_control("gamma").is_err());
        assert!(parse_control("sharpness=1").is_err());
        assert!(parse_control("gamma=high").is_err());
        assert!(parse_control("gamma=0xffffffff").is_err());
    }

    #[test]
    fn test_board_file() {
        let file: BoardFile =
            serde_json::from_str(r#"{"model": "onnn,ar0144", "sensors": [0, 1]}"#).unwrap();
        let config = BoardConfig::from(file);
        assert_eq!(config, BoardConfig::new(Some("onnn,ar0144"), &[0, 1], 4));

        let file: BoardFile = serde_json::from_str(r#"{"data_lanes": 2}"#).unwrap();
        assert_eq!(BoardConfig::from(file), BoardConfig::tpg(2));

        assert!(serde_json::from_str::<BoardFile>(r#"{"lanes": 2}"#).is_err());
    }

    #[test]
    fn test_default_source_format() {
        let config = BoardConfig::new(Some("onnn,ar0144"), &[0, 1], 4);
        let board = Board::try_from(&config).unwrap();
        let args = Args {
            model: "onnn,ar0144".into(),
            sensors: vec![0, 1],
            tpg: false,
            lanes: 4,
            board: None,
            firmware_dir: None,
            crc_failures: 0,
            format: "uyvy8_1x16".into(),
            size: None,
            controls: Vec::new(),
            follow: false,
            interval: 1000,
        };
        assert_eq!(
            source_format(&args, &board).unwrap(),
            PadFormat {
                code: MbusCode::UYVY8_1X16,
                width: 2560,
                height: 800,
            }
        );
    }
}
