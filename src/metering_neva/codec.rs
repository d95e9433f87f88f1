/* Even parity transcoding and the block check character used by the meter */

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;

/// Returns 1 if the byte has an odd number of set bits
pub fn parity_bit(byte: u8) -> u8 {
    let mut ch = byte;
    ch ^= ch >> 4;
    ch ^= ch >> 2;
    ch ^= ch >> 1;
    ch & 1
}

pub fn encode_byte(byte: u8) -> u8 {
    if parity_bit(byte) == 1 {
        return byte | 0x80;
    }
    byte
}

/// Sets the top bit where needed so every byte carries even parity
pub fn encode(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| encode_byte(*b)).collect()
}

/// Drops the parity bit of every received byte
pub fn decode(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b & 0x7f).collect()
}

/// XOR over everything between the first and the last byte of a block.
/// The first byte is SOH/STX, the last one the checksum slot itself.
pub fn checksum(block: &[u8]) -> u8 {
    if block.len() < 2 {
        return 0;
    }

    let crc = block[1..block.len() - 1]
        .iter()
        .fold(0u8, |acc, b| acc ^ b);
    crc & 0x7f
}

pub fn verify_checksum(block: &[u8]) -> bool {
    match block.last() {
        Some(last) if block.len() >= 2 => checksum(block) == *last,
        _ => false,
    }
}
