// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor debug-probe address codec.
//!
//! Addresses use the `I000 0SSS 0000 0000 RRRR RRRR RRRR RRRR` layout of the
//! driver's debug interface: port, register width in bytes, register offset.

use crate::error::CliError;
use crate::utils::{parse_u32, print_json};
use ap130x::sipm::SipmAddress;
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Encoded address to decode (decimal or 0x hex)
    #[arg(conflicts_with_all = ["port", "width", "reg"])]
    value: Option<String>,

    /// Sensor port to encode
    #[arg(short, long, default_value_t = 0)]
    port: u32,

    /// Register width in bytes (1 or 2)
    #[arg(short, long, default_value_t = 2)]
    width: u32,

    /// Register offset to encode (decimal or 0x hex)
    #[arg(short, long)]
    reg: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddressInfo {
    value: String,
    port: u32,
    width: u32,
    reg: String,
}

impl From<&SipmAddress> for AddressInfo {
    fn from(addr: &SipmAddress) -> Self {
        AddressInfo {
            value: format!("0x{:08x}", addr.encode()),
            port: addr.port,
            width: addr.reg.width(),
            reg: format!("0x{:04x}", addr.reg.offset()),
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing sipm-addr command: {:?}", args);

    let addr = match (&args.value, &args.reg) {
        (Some(value), _) => SipmAddress::parse(parse_u32(value)?)?,
        (None, Some(reg)) => {
            let offset = u16::try_from(parse_u32(reg)?).map_err(|_| {
                CliError::InvalidArgs(format!("Register offset out of range: {}", reg))
            })?;
            SipmAddress::new(args.port, args.width, offset)?
        }
        (None, None) => {
            return Err(CliError::InvalidArgs(
                "Either an address value or --reg is required".to_string(),
            ))
        }
    };

    if json {
        print_json(&AddressInfo::from(&addr))
    } else {
        println!("0x{:08x}: {}", addr.encode(), addr);
        Ok(())
    }
}
