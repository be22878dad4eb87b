// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor descriptor table listing.

use crate::error::CliError;
use crate::utils::print_json;
use ap130x::sensor::{SensorInfo, SENSORS};
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Include the internal test pattern generator
    #[arg(long)]
    tpg: bool,
}

#[derive(Debug, Serialize)]
struct SensorEntry {
    model: String,
    name: String,
    i2c_addr: u32,
    width: u32,
    height: u32,
    format: String,
    supplies: Vec<SupplyEntry>,
}

#[derive(Debug, Serialize)]
struct SupplyEntry {
    name: String,
    post_delay_us: u32,
}

impl From<&SensorInfo> for SensorEntry {
    fn from(info: &SensorInfo) -> Self {
        SensorEntry {
            model: info.model.to_string(),
            name: info.name.to_string(),
            i2c_addr: info.i2c_addr,
            width: info.resolution.width,
            height: info.resolution.height,
            format: info.format.to_string(),
            supplies: info
                .supplies
                .iter()
                .map(|s| SupplyEntry {
                    name: s.name.to_string(),
                    post_delay_us: s.post_delay_us,
                })
                .collect(),
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing sensors command: {:?}", args);

    let entries: Vec<SensorEntry> = SENSORS
        .iter()
        .filter(|info| args.tpg || !info.is_tpg())
        .map(SensorEntry::from)
        .collect();

    if json {
        return print_json(&entries);
    }

    println!(
        "{:<14} {:<8} {:>5} {:>11}  {:<14} Supplies",
        "Model", "Name", "Addr", "Resolution", "Format"
    );
    for entry in &entries {
        let supplies: Vec<String> = entry
            .supplies
            .iter()
            .map(|s| match s.post_delay_us {
                0 => s.name.clone(),
                us => format!("{} (+{}us)", s.name, us),
            })
            .collect();
        println!(
            "{:<14} {:<8} {:>5} {:>11}  {:<14} {}",
            if entry.model.is_empty() {
                "-"
            } else {
                entry.model.as_str()
            },
            entry.name,
            format!("0x{:02x}", entry.i2c_addr),
            format!("{}x{}", entry.width, entry.height),
            entry.format,
            if supplies.is_empty() {
                "-".to_string()
            } else {
                supplies.join(", ")
            }
        );
    }

    Ok(())
}
