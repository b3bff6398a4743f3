//! CRC-8 for MCU replies (CRC-8/SMBUS: polynomial 0x07, init 0x00)

use crc::{Crc, CRC_8_SMBUS};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Checksum every byte of `data` except the last one, which is where the
/// result gets stored.
pub fn crc8(data: &[u8]) -> u8 {
    match data.split_last() {
        Some((_, payload)) => CRC8.checksum(payload),
        None => 0,
    }
}
