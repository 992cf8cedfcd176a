//! Binary coded decimal helpers.
//!
//! Terminal phone numbers and report timestamps travel as packed BCD, two decimal digits per
//! byte. Decoding reads each byte as `high_nibble * 10 + low_nibble` and prints it as two digits.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

pub fn decode_bcd(bytes: &[u8]) -> String {
    let mut digits = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let value = (byte >> 4) as u16 * 10 + (byte & 0x0F) as u16;
        digits.push_str(&format!("{:02}", value));
    }
    digits
}

/// Encodes `digits` into exactly `width` bytes.
///
/// Shorter input is left padded with zeros, longer input keeps its trailing digits.
/// Non digit characters are encoded as zero.
pub fn encode_bcd(digits: &str, width: usize) -> Vec<u8> {
    let wanted = width * 2;
    let mut nibbles: Vec<u8> = digits
        .chars()
        .map(|c| c.to_digit(10).unwrap_or(0) as u8)
        .collect();
    if nibbles.len() > wanted {
        nibbles.drain(..nibbles.len() - wanted);
    }
    let mut padded = vec![0u8; wanted - nibbles.len()];
    padded.extend(nibbles);
    padded
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

/// `YYMMDDhhmmss` in GMT+8, the protocol's timestamp encoding. Years are offset from 2000.
pub fn decode_bcd_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() != 6 {
        return None;
    }
    let field = |i: usize| (bytes[i] >> 4) as u32 * 10 + (bytes[i] & 0x0F) as u32;
    NaiveDate::from_ymd_opt(2000 + field(0) as i32, field(1), field(2))?.and_hms_opt(
        field(3),
        field(4),
        field(5),
    )
}

pub fn encode_bcd_time(time: &NaiveDateTime) -> [u8; 6] {
    let pack = |v: u32| (((v / 10) as u8) << 4) | (v % 10) as u8;
    [
        pack((time.year() as u32) % 100),
        pack(time.month()),
        pack(time.day()),
        pack(time.hour()),
        pack(time.minute()),
        pack(time.second()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_number_packs_two_digits_per_byte() {
        let bytes = encode_bcd("628076842334", 6);
        assert_eq!(bytes, vec![0x62, 0x80, 0x76, 0x84, 0x23, 0x34]);
        assert_eq!(decode_bcd(&bytes), "628076842334");
    }

    #[test]
    fn test_short_phone_is_left_padded() {
        let bytes = encode_bcd("628076842334", 10);
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(decode_bcd(&bytes), "00000000628076842334");
    }

    #[test]
    fn test_time_round_trip() {
        let bytes = [0x24, 0x03, 0x15, 0x08, 0x30, 0x59];
        let time = decode_bcd_time(&bytes).unwrap();
        assert_eq!(time.to_string(), "2024-03-15 08:30:59");
        assert_eq!(encode_bcd_time(&time), bytes);
    }

    #[test]
    fn test_invalid_time_is_rejected() {
        assert!(decode_bcd_time(&[0x24, 0x13, 0x15, 0x08, 0x30, 0x59]).is_none());
        assert!(decode_bcd_time(&[0x24, 0x03]).is_none());
    }
}
