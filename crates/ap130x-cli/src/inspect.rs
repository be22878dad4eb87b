// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Firmware image header inspection.

use crate::error::CliError;
use crate::utils::print_json;
use ap130x::firmware::{FirmwareImage, HEADER_SIZE};
use ap130x::sim::crc16;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Firmware image file
    file: PathBuf,

    /// Fail unless the payload CRC matches the header
    #[arg(long)]
    verify: bool,
}

#[derive(Debug, Serialize)]
struct ImageInfo {
    file: String,
    file_size: usize,
    crc: u32,
    computed_crc: u32,
    crc_ok: bool,
    checksum: u32,
    computed_checksum: u32,
    pll_init_size: u32,
    total_size: u32,
    trailing_bytes: usize,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing inspect command: {:?}", args);

    let data = fs::read(&args.file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CliError::NotFound(args.file.display().to_string()),
        _ => CliError::General(format!("Failed to read {}: {}", args.file.display(), e)),
    })?;
    let file_size = data.len();

    let image = FirmwareImage::parse(data)?;
    let header = *image.header();

    let computed_crc = u32::from(crc16(crc16(0xffff, image.pll_segment()), image.main_segment()));
    let computed_checksum = image
        .payload()
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));

    let info = ImageInfo {
        file: args.file.display().to_string(),
        file_size,
        crc: header.crc,
        computed_crc,
        crc_ok: computed_crc == image.expected_crc(),
        checksum: header.checksum,
        computed_checksum,
        pll_init_size: header.pll_init_size,
        total_size: header.total_size,
        trailing_bytes: file_size - HEADER_SIZE - header.total_size as usize,
    };

    if json {
        print_json(&info)?;
    } else {
        print_text_info(&info);
    }

    if args.verify && !info.crc_ok {
        return Err(CliError::CorruptFirmware(format!(
            "CRC mismatch: header 0x{:04x}, payload 0x{:04x}",
            image.expected_crc(),
            computed_crc
        )));
    }

    Ok(())
}

fn print_text_info(info: &ImageInfo) {
    println!("Firmware: {}", info.file);
    println!("  File size:     {} bytes", info.file_size);
    println!("  PLL init size: {} bytes", info.pll_init_size);
    println!("  Total size:    {} bytes", info.total_size);
    if info.trailing_bytes > 0 {
        println!("  Trailing:      {} bytes (ignored)", info.trailing_bytes);
    }
    println!(
        "  CRC:           0x{:04x} (payload 0x{:04x}) {}",
        info.crc,
        info.computed_crc,
        if info.crc_ok { "✓" } else { "✗" }
    );
    println!(
        "  Checksum:      0x{:08x} (payload 0x{:08x})",
        info.checksum, info.computed_checksum
    );
}
