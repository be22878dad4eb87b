// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments or board description
    InvalidArgs(String),
    /// Firmware file or sensor model not found
    NotFound(String),
    /// Firmware image is malformed or failed verification
    CorruptFirmware(String),
    /// Device did not respond in time
    Timeout(String),
    /// General error from the AP130X library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CliError::CorruptFirmware(msg) => write!(f, "Corrupt firmware: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::General(_) => 1,
            CliError::InvalidArgs(_) => 2,
            CliError::NotFound(_) => 3,
            CliError::CorruptFirmware(_) => 4,
            CliError::Timeout(_) => 6,
        }
    }
}

/// Map ap130x::Error to CliError with appropriate exit codes
impl From<ap130x::Error> for CliError {
    fn from(err: ap130x::Error) -> Self {
        use ap130x::Error;

        match err {
            Error::InvalidArgument(msg) => CliError::InvalidArgs(msg),
            Error::NotFound(msg) => CliError::NotFound(msg),
            Error::Corrupt(msg) => CliError::CorruptFirmware(msg),
            err @ Error::CrcMismatch { .. } => CliError::CorruptFirmware(err.to_string()),
            Error::Timeout(msg) => CliError::Timeout(msg),
            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => CliError::NotFound(io_err.to_string()),
                std::io::ErrorKind::TimedOut => {
                    CliError::Timeout(format!("Operation timed out: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },
            Error::Device(msg) => CliError::General(format!("Device error: {}", msg)),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
