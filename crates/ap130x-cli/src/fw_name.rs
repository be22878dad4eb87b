// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::print_json;
use ap130x::{firmware, sensor};
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Sensor compatible string (omit for the test pattern generator)
    #[arg(short, long)]
    model: Option<String>,

    /// Number of populated sensors
    #[arg(short, long, default_value_t = 1)]
    sensors: usize,
}

#[derive(Debug, Serialize)]
struct FirmwareName {
    sensor: String,
    sensors: usize,
    name: String,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing fw-name command: {:?}", args);

    let (info, sensors) = match args.model.as_deref() {
        Some(model) => (sensor::lookup(model)?, args.sensors),
        None => (&sensor::TPG, 0),
    };

    let name = firmware::firmware_name(info, sensors)?;

    if json {
        print_json(&FirmwareName {
            sensor: info.name.to_string(),
            sensors,
            name,
        })
    } else {
        println!("{}", name);
        Ok(())
    }
}
