// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Firmware console, status decode and MIPI lane-state sampling.
//!
//! Everything here is read-mostly and safe to run mid-stream. The only writes
//! are the lane error latch clears at the end of [`sample_lane_state`].

use crate::{
    bus::{RegisterBus, Regmap},
    regs::{self, lane},
    Error,
};
use log::{info, warn};
use std::fmt;

/// Firmware warning names, indexed by bit number across the warning words.
pub const WARNINGS: [Option<&str>; 43] = [
    Some("HINF_BANDWIDTH"),
    Some("FLICKER_DETECTION"),
    Some("FACED_NE"),
    Some("SMILED_NE"),
    Some("HINF_OVERRUN"),
    None,
    Some("FRAME_TOO_SMALL"),
    Some("MISSING_PHASES"),
    Some("SPOOF_UNDERRUN"),
    Some("JPEG_NOLAST"),
    Some("NO_IN_FREQ_SPEC"),
    Some("SINF0"),
    Some("SINF1"),
    Some("CAPTURE0"),
    Some("CAPTURE1"),
    Some("ISR_UNHANDLED"),
    Some("INTERLEAVE_SPOOF"),
    Some("INTERLEAVE_BUF"),
    Some("COORD_OUT_OF_RANGE"),
    Some("ICP_CLOCKING"),
    Some("SENSOR_CLOCKING"),
    Some("SENSOR_NO_IHDR"),
    Some("DIVIDE_BY_ZERO"),
    Some("INT0_UNDERRUN"),
    Some("INT1_UNDERRUN"),
    Some("SCRATCHPAD_TOO_BIG"),
    Some("OTP_RECORD_READ"),
    Some("NO_LSC_IN_OTP"),
    Some("GPIO_INT_LOST"),
    Some("NO_PDAF_DATA"),
    Some("FAR_PDAF_ACCESS_SKIP"),
    Some("PDAF_ERROR"),
    Some("ATM_TVI_BOUNDS"),
    Some("SIPM_0_RTY"),
    Some("SIPM_1_TRY"),
    Some("SIPM_0_NO_ACK"),
    Some("SIPM_1_NO_ACK"),
    Some("SMILE_DIS"),
    Some("DVS_DIS"),
    Some("TEST_DIS"),
    Some("SENSOR_LV2LV"),
    Some("SENSOR_FV2FV"),
    Some("FRAME_LOST"),
];

/// D-PHY lane state machine states, indexed by state code.
pub const LANE_STATES: [&str; 13] = [
    "stop_s",
    "hs_req_s",
    "lp_req_s",
    "hs_s",
    "lp_s",
    "esc_req_s",
    "turn_req_s",
    "esc_s",
    "esc_0",
    "esc_1",
    "turn_s",
    "turn_mark",
    "error_s",
];

/// Low-power line levels, indexed by the 2-bit LP value.
pub const LP_STATES: [&str; 4] = ["00", "10", "01", "11"];

pub const NUM_LANES: usize = 4;

/// Number of lane-state sampling iterations.
pub const LANE_SAMPLES: usize = 1000;

/// Read the firmware console buffer, one entry per line.
pub fn dump_console<B: RegisterBus>(map: &mut Regmap<B>) -> Result<Vec<String>, Error> {
    let mut buf = vec![0u8; regs::CON_BUF_SIZE];
    map.raw_read(regs::CON_BUF, &mut buf)?;

    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let lines: Vec<String> = String::from_utf8_lossy(&buf[..end])
        .split_terminator('\n')
        .map(str::to_string)
        .collect();

    for line in &lines {
        info!("console {}", line);
    }
    Ok(lines)
}

/// Names of the warnings set in `words`. Bits without a name are skipped.
pub fn decode_warnings(words: &[u32; regs::WARNING_COUNT]) -> Vec<&'static str> {
    WARNINGS
        .iter()
        .enumerate()
        .filter(|(i, _)| words[i / 16] & (1 << (i % 16)) != 0)
        .filter_map(|(_, name)| *name)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub icp: u32,
    pub hinf: u32,
    pub brac: u32,
}

/// Decoded ISP status registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub console: Vec<String>,
    pub error: u32,
    pub err_file: u32,
    pub err_line: u32,
    pub sipm_errors: [u32; 2],
    pub warnings: [u32; regs::WARNING_COUNT],
    pub frame_counters: FrameCounters,
    pub lanes: Vec<LaneStateReport>,
}

impl StatusReport {
    pub fn warning_names(&self) -> Vec<&'static str> {
        decode_warnings(&self.warnings)
    }
}

/// Read and log the console, error, warning and frame counter registers,
/// then sample the lane state of every port in `ports`.
pub fn log_status<B: RegisterBus>(
    map: &mut Regmap<B>,
    ports: &[u32],
) -> Result<StatusReport, Error> {
    let mut report = StatusReport {
        console: dump_console(map)?,
        error: map.read(regs::ERROR)?,
        err_file: map.read(regs::ERR_FILE)?,
        err_line: map.read(regs::ERR_LINE)?,
        ..Default::default()
    };
    info!(
        "ERROR: 0x{:04x} (file 0x{:08x}:{})",
        report.error, report.err_file, report.err_line
    );

    report.sipm_errors = [map.read(regs::SIPM_ERR_0)?, map.read(regs::SIPM_ERR_1)?];
    info!(
        "SIPM_ERR [0] 0x{:04x} [1] 0x{:04x}",
        report.sipm_errors[0], report.sipm_errors[1]
    );

    for (i, word) in report.warnings.iter_mut().enumerate() {
        *word = map.read(regs::warning(i as u32))?;
    }
    info!(
        "WARNING [0] 0x{:04x} [1] 0x{:04x} [2] 0x{:04x} [3] 0x{:04x}",
        report.warnings[0], report.warnings[1], report.warnings[2], report.warnings[3]
    );
    for name in report.warning_names() {
        info!("- WARN_{}", name);
    }

    let frame_cnt = map.read(regs::FRAME_CNT)?;
    let capture = map.read(regs::ADV_CAPTURE_A_FV_CNT)?;
    report.frame_counters = FrameCounters {
        icp: capture & 0xffff,
        hinf: frame_cnt >> 8,
        brac: frame_cnt & 0xff,
    };
    info!(
        "Frame counters: ICP {}, HINF {}, BRAC {}",
        report.frame_counters.icp, report.frame_counters.hinf, report.frame_counters.brac
    );

    report.lanes = ports
        .iter()
        .map(|port| sample_lane_state(map, *port))
        .collect();

    Ok(report)
}

/// Latched lane error, decoded from the last sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneError {
    pub error: bool,
    pub abort: bool,
    /// Lane state when the error latched, `"INVALID"` for unknown codes.
    pub state: &'static str,
    pub lp: &'static str,
}

impl fmt::Display for LaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ERR ({}{}) {} LP{}",
            if self.error { "E" } else { "" },
            if self.abort { "A" } else { "" },
            self.state,
            self.lp
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneReport {
    pub lane: u32,
    /// Raw status of the first valid sample.
    pub first: u32,
    /// Raw status of the last valid sample.
    pub last: u32,
    /// Number of samples seen in each state, indexed like [`LANE_STATES`].
    pub histogram: [u32; LANE_STATES.len()],
}

impl LaneReport {
    /// LP line level at the first sample.
    pub fn lp_state(&self) -> &'static str {
        LP_STATES[lane::lp_val(self.first) as usize]
    }

    pub fn error(&self) -> Option<LaneError> {
        let state = self.last;
        if state & (lane::ERR | lane::ABORT) == 0 {
            return None;
        }

        Some(LaneError {
            error: state & lane::ERR != 0,
            abort: state & lane::ABORT != 0,
            state: LANE_STATES
                .get(lane::err_state(state) as usize)
                .copied()
                .unwrap_or("INVALID"),
            lp: LP_STATES[lane::err_lp_val(state) as usize],
        })
    }

    /// Non-empty histogram buckets in state order.
    pub fn counts(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        LANE_STATES
            .iter()
            .zip(self.histogram.iter())
            .filter(|(_, count)| **count != 0)
            .map(|(name, count)| (*name, *count))
    }
}

impl fmt::Display for LaneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{} state: LP{}", self.lane, self.lp_state())?;
        if let Some(error) = self.error() {
            write!(f, " {}", error)?;
        }
        for (name, count) in self.counts() {
            write!(f, " {}:{}", name, count)?;
        }
        Ok(())
    }
}

/// Lane sampling result for one sensor port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneStateReport {
    pub port: u32,
    /// Number of iterations where every lane read back a valid state.
    pub samples: u32,
    /// Per-lane results, empty when no iteration produced a valid sample.
    pub lanes: Vec<LaneReport>,
}

fn read_lanes<B: RegisterBus>(map: &mut Regmap<B>, port: u32) -> Option<[u32; NUM_LANES]> {
    let mut values = [0u32; NUM_LANES];
    for (i, value) in values.iter_mut().enumerate() {
        let raw = map.read(regs::adv_lane_stat(port, i as u32)).ok()?;
        if lane::state(raw) as usize >= LANE_STATES.len() {
            return None;
        }
        *value = raw;
    }
    Some(values)
}

/// Sample the MIPI receiver state of the four lanes of `port`.
///
/// Iterations with a failed read or an unknown state code are dropped. The
/// error and abort latches are cleared on every lane afterwards.
pub fn sample_lane_state<B: RegisterBus>(map: &mut Regmap<B>, port: u32) -> LaneStateReport {
    let mut histogram = [[0u32; LANE_STATES.len()]; NUM_LANES];
    let mut first = [0u32; NUM_LANES];
    let mut last = [0u32; NUM_LANES];
    let mut samples = 0u32;

    for _ in 0..LANE_SAMPLES {
        let Some(values) = read_lanes(map, port) else {
            continue;
        };

        for (counts, value) in histogram.iter_mut().zip(values) {
            counts[lane::state(value) as usize] += 1;
        }
        if samples == 0 {
            first = values;
        }
        last = values;
        samples += 1;
    }

    let lanes: Vec<LaneReport> = if samples == 0 {
        Vec::new()
    } else {
        (0..NUM_LANES)
            .map(|i| LaneReport {
                lane: i as u32,
                first: first[i],
                last: last[i],
                histogram: histogram[i],
            })
            .collect()
    };

    for report in &lanes {
        info!("SINF{} {}", port, report);
    }

    for i in 0..NUM_LANES as u32 {
        if let Err(e) = map.write(regs::adv_lane_stat(port, i), lane::ERR | lane::ABORT) {
            warn!("Failed to clear SINF{} L{} error latch: {}", port, i, e);
        }
    }

    LaneStateReport {
        port,
        samples,
        lanes,
    }
}
