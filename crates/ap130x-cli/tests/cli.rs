// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// AP130X CLI - Integration Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - Help text and command structure
//   - Sensor table, firmware naming and debug-probe address codec
//   - Firmware image inspection on generated images
//   - Invalid argument handling and exit codes
//
// Layer 2 (Simulated ISP - No hardware required):
//   - Bring-up, format negotiation and streaming on the chip simulator
//   - CRC failure injection and board description files
//
// RUN:
//   cargo test --test cli
//
// RUN AGAINST AN INSTALLED BINARY:
//   AP130X_BIN=/usr/bin/ap130x cargo test --test cli

use ap130x::sim::synthetic_firmware;
use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, fs, path::PathBuf};

/// Helper to create a Command for the ap130x binary
/// Uses AP130X_BIN environment variable if set, otherwise the cargo-built binary
fn ap130x_cmd() -> Command {
    if let Ok(bin_path) = env::var("AP130X_BIN") {
        Command::new(bin_path)
    } else {
        Command::cargo_bin("ap130x").unwrap()
    }
}

/// Get the test data directory (target/testdata/ap130x-cli)
/// Creates it if it doesn't exist
fn get_test_data_dir() -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target")
        .join("testdata")
        .join("ap130x-cli");

    fs::create_dir_all(&test_dir).expect("Failed to create test data directory");
    test_dir
}

fn write_test_file(name: &str, data: &[u8]) -> PathBuf {
    let path = get_test_data_dir().join(name);
    fs::write(&path, data).expect("Failed to write test file");
    path
}

fn stdout_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is not valid JSON")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

#[test]
fn test_cli_help() {
    ap130x_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("AP130X CLI"))
        .stdout(predicate::str::contains("sensors"))
        .stdout(predicate::str::contains("fw-name"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("sipm-addr"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn test_cli_version() {
    ap130x_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ap130x"));
}

#[test]
fn test_simulate_help() {
    ap130x_cmd()
        .args(["simulate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--crc-failures"))
        .stdout(predicate::str::contains("--board"))
        .stdout(predicate::str::contains("--follow"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_unknown_command() {
    ap130x_cmd()
        .arg("flash")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// =============================================================================
// Sensor Table and Firmware Naming
// =============================================================================

#[test]
fn test_sensors_text() {
    ap130x_cmd()
        .arg("sensors")
        .assert()
        .success()
        .stdout(predicate::str::contains("onnn,ar0144"))
        .stdout(predicate::str::contains("onnn,ar0330"))
        .stdout(predicate::str::contains("onnn,ar1335"))
        .stdout(predicate::str::contains("tpg").not());
}

#[test]
fn test_sensors_json() {
    let output = ap130x_cmd()
        .args(["sensors", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let sensors = stdout_json(&output.stdout);
    let sensors = sensors.as_array().unwrap();
    assert_eq!(sensors.len(), 3);
    assert_eq!(sensors[0]["name"], "ar0144");
    assert_eq!(sensors[0]["width"], 1280);
    assert_eq!(sensors[0]["height"], 800);
    assert_eq!(sensors[0]["supplies"][0]["name"], "vaa");
    assert_eq!(sensors[0]["supplies"][0]["post_delay_us"], 100);
    assert_eq!(sensors[2]["format"], "SGRBG10_1X10");

    let output = ap130x_cmd()
        .args(["sensors", "--tpg", "--json"])
        .output()
        .unwrap();
    let sensors = stdout_json(&output.stdout);
    assert_eq!(sensors.as_array().unwrap().len(), 4);
    assert_eq!(sensors[3]["name"], "tpg");
}

#[test]
fn test_fw_name() {
    ap130x_cmd()
        .args(["fw-name", "--model", "onnn,ar0144"])
        .assert()
        .success()
        .stdout("ap130x_ar0144_single_fw.bin\n");

    ap130x_cmd()
        .args(["fw-name", "--model", "onnn,ar1335", "--sensors", "2"])
        .assert()
        .success()
        .stdout("ap130x_ar1335_dual_fw.bin\n");

    ap130x_cmd()
        .arg("fw-name")
        .assert()
        .success()
        .stdout("ap130x_tpg_fw.bin\n");
}

#[test]
fn test_fw_name_json() {
    let output = ap130x_cmd()
        .args(["--json", "fw-name", "-m", "onnn,ar0330", "-s", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let name = stdout_json(&output.stdout);
    assert_eq!(name["sensor"], "ar0330");
    assert_eq!(name["sensors"], 2);
    assert_eq!(name["name"], "ap130x_ar0330_dual_fw.bin");
}

#[test]
fn test_fw_name_invalid() {
    ap130x_cmd()
        .args(["fw-name", "--model", "sony,imx219"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported sensor model"));

    ap130x_cmd()
        .args(["fw-name", "--model", "onnn,ar0144", "--sensors", "3"])
        .assert()
        .code(2);
}

// =============================================================================
// Debug Probe Addresses
// =============================================================================

#[test]
fn test_sipm_addr_decode() {
    let output = ap130x_cmd()
        .args(["sipm-addr", "0x82003010", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let addr = stdout_json(&output.stdout);
    assert_eq!(addr["value"], "0x82003010");
    assert_eq!(addr["port"], 1);
    assert_eq!(addr["width"], 2);
    assert_eq!(addr["reg"], "0x3010");
}

#[test]
fn test_sipm_addr_encode() {
    ap130x_cmd()
        .args(["sipm-addr", "--port", "1", "--reg", "0x3010"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("0x82003010:"))
        .stdout(predicate::str::contains("16-bit"));

    ap130x_cmd()
        .args(["sipm-addr", "--width", "1", "--reg", "0x0010"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("0x01000010:"));
}

#[test]
fn test_sipm_addr_invalid() {
    // Reserved bits
    ap130x_cmd()
        .args(["sipm-addr", "0x02013010"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("reserved bits"));

    // Width 4 is not a sensor register width
    ap130x_cmd()
        .args(["sipm-addr", "0x04003010"])
        .assert()
        .code(2);

    ap130x_cmd()
        .args(["sipm-addr", "--port", "2", "--reg", "0x3010"])
        .assert()
        .code(2);

    ap130x_cmd()
        .args(["sipm-addr", "--reg", "0x10000"])
        .assert()
        .code(2);

    ap130x_cmd().arg("sipm-addr").assert().code(2);
}

// =============================================================================
// Firmware Inspection
// =============================================================================

#[test]
fn test_inspect_valid_image() {
    let path = write_test_file("inspect_valid.bin", &synthetic_firmware(0x400, 0x2400));

    let output = ap130x_cmd()
        .args(["--json", "inspect", "--verify"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let info = stdout_json(&output.stdout);
    assert_eq!(info["pll_init_size"], 0x400);
    assert_eq!(info["total_size"], 0x2400);
    assert_eq!(info["file_size"], 16 + 0x2400);
    assert_eq!(info["trailing_bytes"], 0);
    assert_eq!(info["crc_ok"], true);
    assert_eq!(info["checksum"], info["computed_checksum"]);
}

#[test]
fn test_inspect_text_output() {
    let mut image = synthetic_firmware(0x100, 0x800);
    image.extend_from_slice(&[0xff; 8]);
    let path = write_test_file("inspect_trailing.bin", &image);

    ap130x_cmd()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("PLL init size: 256 bytes"))
        .stdout(predicate::str::contains("Total size:    2048 bytes"))
        .stdout(predicate::str::contains("8 bytes (ignored)"));
}

#[test]
fn test_inspect_crc_mismatch() {
    let mut image = synthetic_firmware(0x100, 0x800);
    image[16 + 0x200] ^= 0x5a;
    let path = write_test_file("inspect_crc.bin", &image);

    // Without --verify the mismatch is only reported
    let output = ap130x_cmd()
        .args(["inspect", "--json"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output.stdout)["crc_ok"], false);

    ap130x_cmd()
        .args(["inspect", "--verify"])
        .arg(&path)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("CRC mismatch"));
}

#[test]
fn test_inspect_corrupt_image() {
    let mut image = synthetic_firmware(0x100, 0x800);
    image.truncate(16 + 0x400);
    let path = write_test_file("inspect_truncated.bin", &image);

    ap130x_cmd()
        .arg("inspect")
        .arg(&path)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Corrupt firmware"));

    let path = write_test_file("inspect_short.bin", &[0u8; 10]);
    ap130x_cmd().arg("inspect").arg(&path).assert().code(4);
}

#[test]
fn test_inspect_missing_file() {
    ap130x_cmd()
        .args(["inspect", "/nonexistent/ap130x_fw.bin"])
        .assert()
        .code(3);
}

// =============================================================================
// Simulated Bring-up
// =============================================================================

#[test]
#[serial]
fn test_simulate_default_board() {
    ap130x_cmd()
        .arg("simulate")
        .assert()
        .success()
        .stdout(predicate::str::contains("ar0144"))
        .stdout(predicate::str::contains("ap130x_ar0144_single_fw.bin"))
        .stdout(predicate::str::contains("UYVY8_1X16 1280x800"))
        .stdout(predicate::str::contains("Stream:   running"));
}

#[test]
#[serial]
fn test_simulate_json_dual_sensor() {
    let output = ap130x_cmd()
        .args(["simulate", "--sensors", "0,1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output.stdout);
    assert_eq!(report["sensor"], "ar0144");
    assert_eq!(report["ports"], serde_json::json!([0, 1]));
    assert_eq!(report["firmware"], "ap130x_ar0144_dual_fw.bin");
    assert_eq!(report["boot_stage"], "verified");
    assert_eq!(report["streaming"], true);
    assert_eq!(report["format"]["width"], 2560);
    assert_eq!(report["format"]["height"], 800);
    assert_eq!(report["status"]["lanes"].as_array().unwrap().len(), 2);
}

#[test]
#[serial]
fn test_simulate_format_alignment() {
    let output = ap130x_cmd()
        .args(["simulate", "--sensors", "0,1", "--size", "99x99", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output.stdout);
    assert_eq!(report["format"]["width"], 96);
    assert_eq!(report["format"]["height"], 98);
}

#[test]
#[serial]
fn test_simulate_tpg() {
    let output = ap130x_cmd()
        .args(["simulate", "--tpg", "--lanes", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output.stdout);
    assert_eq!(report["sensor"], "tpg");
    assert_eq!(report["ports"], serde_json::json!([]));
    assert_eq!(report["data_lanes"], 2);
    assert_eq!(report["firmware"], "ap130x_tpg_fw.bin");
}

#[test]
#[serial]
fn test_simulate_controls() {
    let output = ap130x_cmd()
        .args([
            "simulate",
            "--control",
            "gamma=0x2000",
            "--control",
            "white-balance=3",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output.stdout);
    assert_eq!(report["controls"][0]["name"], "Gamma");
    assert_eq!(report["controls"][0]["value"], 0x2000);
    assert_eq!(report["controls"][1]["value"], 3);

    ap130x_cmd()
        .args(["simulate", "--control", "color-effect=15"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not supported"));

    ap130x_cmd()
        .args(["simulate", "--control", "link-frequency=0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("read-only"));

    ap130x_cmd()
        .args(["simulate", "--control", "sharpness=1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown control"));
}

#[test]
#[serial]
fn test_simulate_crc_recovery() {
    ap130x_cmd()
        .args(["simulate", "--crc-failures", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stream:   running"));
}

#[test]
#[serial]
fn test_simulate_crc_exhausted() {
    ap130x_cmd()
        .args(["simulate", "--crc-failures", "3"])
        .assert()
        .code(6);
}

#[test]
#[serial]
fn test_simulate_board_file() {
    let path = write_test_file(
        "board_dual.json",
        br#"{"model": "onnn,ar0330", "sensors": [1, 0], "data_lanes": 2}"#,
    );

    let output = ap130x_cmd()
        .args(["simulate", "--json", "--board"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output.stdout);
    assert_eq!(report["sensor"], "ar0330");
    assert_eq!(report["ports"], serde_json::json!([0, 1]));
    assert_eq!(report["data_lanes"], 2);

    let path = write_test_file("board_invalid.json", br#"{"model": "onnn,ar0144", "lanes": 2}"#);
    ap130x_cmd()
        .args(["simulate", "--board"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid board file"));
}

#[test]
#[serial]
fn test_simulate_invalid_board() {
    ap130x_cmd()
        .args(["simulate", "--sensors", "2,3"])
        .assert()
        .code(2);

    ap130x_cmd()
        .args(["simulate", "--lanes", "5"])
        .assert()
        .code(2);

    ap130x_cmd()
        .args(["simulate", "--format", "RGB888"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown media bus code"));
}

#[test]
#[serial]
fn test_simulate_missing_firmware() {
    let dir = get_test_data_dir().join("empty_firmware");
    fs::create_dir_all(&dir).unwrap();

    ap130x_cmd()
        .args(["simulate", "--firmware-dir"])
        .arg(&dir)
        .assert()
        .code(3);
}

#[test]
#[serial]
fn test_simulate_firmware_dir() {
    let dir = get_test_data_dir().join("firmware");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("ap130x_ar1335_single_fw.bin"),
        synthetic_firmware(0x800, 0x3000),
    )
    .unwrap();

    ap130x_cmd()
        .args(["simulate", "--model", "onnn,ar1335", "--firmware-dir"])
        .arg(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("ap130x_ar1335_single_fw.bin"));
}
