//! Integer decoding from raw device memory.
//!
//! All functions index the slice directly and panic if it is too short; callers
//! validate lengths against the frame layout first.

pub fn uint16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

pub fn uint16_be(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

pub fn uint24_be(data: &[u8]) -> u32 {
    u32::from_be_bytes([0, data[0], data[1], data[2]])
}

pub fn uint32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Each byte holds two decimal digits, most significant byte first.
pub fn bin2dec(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.wrapping_mul(100).wrapping_add(b as u32))
}
