use crc::{Crc, CRC_16_IBM_3740};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-CCITT (poly 0x1021, init 0xFFFF, no reflection).
pub fn crc_ccitt(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

pub fn xor8(data: &[u8], init: u8) -> u8 {
    data.iter().fold(init, |x, y| x ^ y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccitt_check_value() {
        assert_eq!(crc_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn xor_version_command() {
        assert_eq!(xor8(&[0x0F, 0x00, 0x00], 0x00), 0x0F);
        assert_eq!(xor8(&[], 0x5A), 0x5A);
        assert_eq!(xor8(&[0xFF, 0x0F], 0x00), 0xF0);
    }
}
