//! Station-family CRC-16.
//!
//! The checksum is not a textbook table-driven CRC: input is consumed as
//! big-endian 16-bit words, the first word seeds the register, an odd
//! trailing byte is padded with zero, and an extra zero word is clocked
//! through when the input length is even. Inputs shorter than two bytes
//! checksum to zero.

/// Generator polynomial.
pub const POLYNOMIAL: u16 = 0x8005;

/// Compute the checksum over `CMD LEN DATA`.
///
/// # Examples
///
/// ```
/// use punch_engine::protocol::crc16;
///
/// // "set master mode" as sent by every readout client
/// assert_eq!(crc16(&[0xF0, 0x01, 0x4D]), 0x6D0A);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    if data.len() < 2 {
        return 0;
    }

    let mut crc = u16::from_be_bytes([data[0], data[1]]);
    if data.len() == 2 {
        return crc;
    }

    let mut rest = &data[2..];
    let words = data.len() / 2;
    for remaining in (1..=words).rev() {
        let mut word = if remaining > 1 {
            let w = u16::from_be_bytes([rest[0], rest[1]]);
            rest = &rest[2..];
            w
        } else if data.len() % 2 == 1 {
            u16::from_be_bytes([rest[0], 0])
        } else {
            0
        };

        for _ in 0..16 {
            let carry = crc & 0x8000 != 0;
            crc <<= 1;
            if word & 0x8000 != 0 {
                crc |= 1;
            }
            if carry {
                crc ^= POLYNOMIAL;
            }
            word <<= 1;
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_inputs() {
        assert_eq!(crc16(&[]), 0);
        assert_eq!(crc16(&[0x42]), 0);
        assert_eq!(crc16(&[0xB1, 0x00]), 0xB100);
    }

    #[test]
    fn known_frames() {
        // 02 F0 01 4D 6D 0A 03
        assert_eq!(crc16(&[0xF0, 0x01, 0x4D]), 0x6D0A);
        // 02 EF 01 00 E2 09 03
        assert_eq!(crc16(&[0xEF, 0x01, 0x00]), 0xE209);
    }

    #[test]
    fn single_bit_flip_detected() {
        let data = [0xD3, 0x0D, 0x00, 0x1F, 0x00, 0x6D, 0xE9, 0x87, 0x01, 0x8C, 0xA0, 0x00];
        let base = crc16(&data);
        for i in 0..data.len() {
            let mut flipped = data;
            flipped[i] ^= 0x01;
            assert_ne!(crc16(&flipped), base, "flip at byte {i} not detected");
        }
    }
}
