//! CRC-8 integrity check used by the signal-wire bus.
//!
//! Polynomial 0x31 in its bit-reflected form 0x8C, folded LSB-first. Every
//! device identity carries its checksum in the last byte, so a fold over the
//! whole record (payload plus checksum) comes out zero exactly when the
//! record is intact. The 9-byte sensor scratchpad uses the same rule.

/// Bit-reflected form of the bus polynomial 0x31.
const POLY_REFLECTED: u8 = 0x8C;

/// Fold one byte into a running CRC-8, least significant bit first.
#[must_use]
pub fn crc8_step(mut crc: u8, data: u8) -> u8 {
    for shift in 0..8 {
        crc = if (crc ^ (data >> shift)) & 0x01 != 0 {
            (crc >> 1) ^ POLY_REFLECTED
        } else {
            crc >> 1
        };
    }
    crc
}

/// Fold a full buffer, starting from zero.
#[must_use]
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &byte| crc8_step(crc, byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference record from the bus vendor's application note: payload
    // 02 1C B8 01 00 00 00 carries checksum A2.
    const REFERENCE_PAYLOAD: [u8; 7] = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00];

    #[test]
    fn reference_payload_checksum() {
        assert_eq!(crc8(&REFERENCE_PAYLOAD), 0xA2);
    }

    #[test]
    fn full_record_folds_to_zero() {
        let mut record = [0u8; 8];
        record[..7].copy_from_slice(&REFERENCE_PAYLOAD);
        record[7] = 0xA2;
        assert_eq!(crc8(&record), 0);
    }

    #[test]
    fn any_single_bit_flip_is_detected() {
        let mut record = [0u8; 8];
        record[..7].copy_from_slice(&REFERENCE_PAYLOAD);
        record[7] = 0xA2;

        for byte in 0..record.len() {
            for bit in 0..8 {
                let mut corrupted = record;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc8(&corrupted),
                    0,
                    "flip of byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn step_is_incremental() {
        let whole = crc8(&REFERENCE_PAYLOAD);
        let mut running = 0;
        for &byte in &REFERENCE_PAYLOAD {
            running = crc8_step(running, byte);
        }
        assert_eq!(running, whole);
    }

    #[test]
    fn empty_buffer_is_zero() {
        assert_eq!(crc8(&[]), 0);
    }
}
