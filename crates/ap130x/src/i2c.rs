// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! I2C transport for the ISP register space.
//!
//! The AP130X uses 16-bit big-endian register offsets followed by big-endian
//! data. Reads are a single write-then-read transaction so the offset is not
//! lost to another master on the bus.

use crate::{bus::RegisterBus, Error};
use embedded_hal::i2c::{self, I2c, SevenBitAddress};
use std::io;

/// Default 7-bit address of the AP130X.
pub const DEFAULT_ADDRESS: SevenBitAddress = 0x3c;

/// Largest payload sent in one write transaction.
const MAX_WRITE_CHUNK: usize = 1024;

/// [`RegisterBus`] over any `embedded-hal` 1.0 I2C bus.
pub struct I2cBus<I2C> {
    i2c: I2C,
    address: SevenBitAddress,
    buf: Vec<u8>,
}

impl<I2C: I2c> I2cBus<I2C> {
    pub fn new(i2c: I2C, address: SevenBitAddress) -> Self {
        I2cBus {
            i2c,
            address,
            buf: Vec::with_capacity(MAX_WRITE_CHUNK + 2),
        }
    }

    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn bus_error(&self, offset: u16, err: I2C::Error) -> Error {
        let kind = match i2c::Error::kind(&err) {
            i2c::ErrorKind::NoAcknowledge(_) => io::ErrorKind::NotConnected,
            i2c::ErrorKind::ArbitrationLoss => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        Error::Io(io::Error::new(
            kind,
            format!(
                "i2c transfer to 0x{:02x} at 0x{:04x} failed: {:?}",
                self.address, offset, err
            ),
        ))
    }
}

impl<I2C: I2c> RegisterBus for I2cBus<I2C> {
    fn raw_read(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error> {
        self.i2c
            .write_read(self.address, &offset.to_be_bytes(), buf)
            .map_err(|e| self.bus_error(offset, e))
    }

    fn raw_write(&mut self, offset: u16, data: &[u8]) -> Result<(), Error> {
        let mut offset = offset;
        for chunk in data.chunks(MAX_WRITE_CHUNK) {
            self.buf.clear();
            self.buf.extend_from_slice(&offset.to_be_bytes());
            self.buf.extend_from_slice(chunk);

            if let Err(e) = self.i2c.write(self.address, &self.buf) {
                return Err(self.bus_error(offset, e));
            }
            offset = offset.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};

    #[derive(Debug)]
    struct Nack;

    impl i2c::Error for Nack {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        }
    }

    /// Bus that records write payloads and answers reads from a fixed buffer.
    #[derive(Default)]
    struct FakeI2c {
        writes: Vec<(u8, Vec<u8>)>,
        reply: Vec<u8>,
        nack: bool,
    }

    impl ErrorType for FakeI2c {
        type Error = Nack;
    }

    impl I2c for FakeI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.nack {
                return Err(Nack);
            }
            for op in operations {
                match op {
                    Operation::Write(data) => self.writes.push((address, data.to_vec())),
                    Operation::Read(buf) => {
                        let n = buf.len();
                        buf.copy_from_slice(&self.reply[..n]);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_write16_is_big_endian() {
        let mut bus = I2cBus::new(FakeI2c::default(), DEFAULT_ADDRESS);
        bus.write16(0x601a, 0x8140).unwrap();
        let fake = bus.release();
        assert_eq!(fake.writes, vec![(0x3c, vec![0x60, 0x1a, 0x81, 0x40])]);
    }

    #[test]
    fn test_read32_sends_offset_then_reads() {
        let fake = FakeI2c {
            reply: vec![0xde, 0xad, 0xbe, 0xef],
            ..Default::default()
        };
        let mut bus = I2cBus::new(fake, DEFAULT_ADDRESS);
        assert_eq!(bus.read32(0x60a4).unwrap(), 0xdead_beef);
        assert_eq!(bus.release().writes, vec![(0x3c, vec![0x60, 0xa4])]);
    }

    #[test]
    fn test_large_write_is_chunked() {
        let mut bus = I2cBus::new(FakeI2c::default(), DEFAULT_ADDRESS);
        let data = vec![0x55u8; MAX_WRITE_CHUNK + 10];
        bus.raw_write(0x8000, &data).unwrap();
        let writes = bus.release().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[0].1[..2], &[0x80, 0x00]);
        assert_eq!(writes[0].1.len(), MAX_WRITE_CHUNK + 2);
        assert_eq!(&writes[1].1[..2], &[0x84, 0x00]);
        assert_eq!(writes[1].1.len(), 12);
    }

    #[test]
    fn test_nack_maps_to_not_connected() {
        let fake = FakeI2c {
            nack: true,
            ..Default::default()
        };
        let mut bus = I2cBus::new(fake, DEFAULT_ADDRESS);
        match bus.read16(0x0000) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
