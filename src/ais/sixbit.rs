//! AIS 6-bit ASCII payload armoring. Payload characters come from two contiguous ASCII ranges:
//!
//! ```ascii
//! '0' (48) ..= 'W' (87)   -> 0 ..= 39
//! '`' (96) ..= 'w' (119)  -> 40 ..= 63
//! ```
//!
//! Bit strings are `Vec<bool>`, most significant bit of each 6-bit unit first.

use anyhow::bail;

pub const BITS_PER_CHAR: usize = 6;
pub const MAX_FILL_BITS: u8 = 5;

pub fn char_to_sixbit(ch: char) -> anyhow::Result<u8> {
    match ch as u32 {
        code @ 48..=87 => Ok((code - 48) as u8),
        code @ 96..=119 => Ok((code - 56) as u8),
        _ => bail!("character {:?} is not part of the AIS 6-bit alphabet", ch),
    }
}

pub fn sixbit_to_char(value: u8) -> anyhow::Result<char> {
    if value > 63 {
        bail!("6-bit value {} is out of range", value);
    }
    Ok(armor(value))
}

/// `value` must be below 64
fn armor(value: u8) -> char {
    if value < 40 {
        (value + 48) as char
    }
    else {
        (value + 56) as char
    }
}

/// Converts an armored payload to its bit string and strips `fill` trailing padding bits.
pub fn payload_to_bits(payload: &str, fill: u8) -> anyhow::Result<Vec<bool>> {
    let mut bits = Vec::with_capacity(payload.len() * BITS_PER_CHAR);
    for ch in payload.chars() {
        let value = char_to_sixbit(ch)?;
        for shift in (0..BITS_PER_CHAR).rev() {
            bits.push((value >> shift) & 1 == 1);
        }
    }

    if fill as usize > bits.len() {
        bail!("{} fill bits exceed the payload's {} bits", fill, bits.len());
    }
    bits.truncate(bits.len() - fill as usize);
    Ok(bits)
}

/// Appends zero bits up to the next multiple of 6 and returns the number of bits appended, i.e.
///  the `fill` value to transmit with the armored payload.
pub fn pad_to_char_boundary(bits: &mut Vec<bool>) -> u8 {
    let fill = (BITS_PER_CHAR - bits.len() % BITS_PER_CHAR) % BITS_PER_CHAR;
    bits.resize(bits.len() + fill, false);
    fill as u8
}

/// Armors a bit string. The caller must pad the bit string to a multiple of 6 first - anything
///  else is a bug on the caller's side, so this function panics rather than rounding.
pub fn bits_to_payload(bits: &[bool]) -> String {
    assert!(bits.len() % BITS_PER_CHAR == 0, "bit string length {} is not a multiple of {}", bits.len(), BITS_PER_CHAR);

    bits.chunks(BITS_PER_CHAR)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | bit as u8))
        .map(armor)
        .collect()
}
