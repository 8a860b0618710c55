//! Punch card number type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when building an invalid card number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid card number: {reason}")]
pub struct InvalidCardId {
    reason: &'static str,
}

/// Largest number a card can carry (24-bit station encoding).
const MAX_CARD_ID: u32 = 0x00FF_FFFF;

/// A card number as printed on the competitor's punch card.
///
/// Zero is reserved by the stations for "no card" and is rejected.
///
/// # Examples
///
/// ```
/// use punch_engine::domain::CardId;
///
/// let card = CardId::new(7203463).unwrap();
/// assert_eq!(card.get(), 7203463);
///
/// // SI5-era cards encode a series in the third byte
/// let old = CardId::from_wire([0x00, 0x03, 0x00, 0x2A]).unwrap();
/// assert_eq!(old.get(), 300042);
///
/// assert!(CardId::new(0).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CardId(u32);

impl CardId {
    /// Create a card number, rejecting zero and values over 24 bits.
    pub fn new(n: u32) -> Result<Self, InvalidCardId> {
        if n == 0 {
            return Err(InvalidCardId {
                reason: "card number cannot be zero",
            });
        }
        if n > MAX_CARD_ID {
            return Err(InvalidCardId {
                reason: "card number exceeds 24 bits",
            });
        }
        Ok(Self(n))
    }

    /// Decode the four card-number bytes `SI3 SI2 SI1 SI0` sent by a station.
    ///
    /// Cards from the SI5 generation store a series number (2..=4) in `SI2`
    /// and a 16-bit number below it; those print as `series * 100000 + n`.
    pub fn from_wire(bytes: [u8; 4]) -> Result<Self, InvalidCardId> {
        let [si3, si2, si1, si0] = bytes;
        let low = u32::from(u16::from_be_bytes([si1, si0]));
        if si3 == 0 && (2..=4).contains(&si2) {
            return Self::new(u32::from(si2) * 100_000 + low);
        }
        Self::new(u32::from_be_bytes([0, si2, si1, si0]))
    }

    /// Returns the card number.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for CardId {
    type Error = InvalidCardId;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<CardId> for u32 {
    fn from(card: CardId) -> u32 {
        card.0
    }
}

impl fmt::Debug for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardId({})", self.0)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_card() {
        assert!(CardId::new(1).is_ok());
        assert!(CardId::new(500001).is_ok());
        assert!(CardId::new(8_000_123).is_ok());
        assert!(CardId::new(MAX_CARD_ID).is_ok());
    }

    #[test]
    fn reject_zero_and_oversized() {
        assert!(CardId::new(0).is_err());
        assert!(CardId::new(MAX_CARD_ID + 1).is_err());
    }

    #[test]
    fn wire_series_numbers() {
        assert_eq!(CardId::from_wire([0, 2, 0xFF, 0xFF]).unwrap().get(), 265535);
        assert_eq!(CardId::from_wire([0, 4, 0, 1]).unwrap().get(), 400001);
    }

    #[test]
    fn wire_plain_numbers() {
        // Series 1 and modern cards are plain 24-bit numbers
        assert_eq!(CardId::from_wire([0, 1, 0, 1]).unwrap().get(), 65537);
        let card = CardId::from_wire([0x00, 0x6D, 0xE9, 0x87]).unwrap();
        assert_eq!(card.get(), 7203207);
    }

    #[test]
    fn wire_zero_rejected() {
        assert!(CardId::from_wire([0, 0, 0, 0]).is_err());
    }

    #[test]
    fn serde_roundtrip_and_validation() {
        let card: CardId = serde_json::from_str("7203463").unwrap();
        assert_eq!(card.get(), 7203463);
        assert_eq!(serde_json::to_string(&card).unwrap(), "7203463");
        assert!(serde_json::from_str::<CardId>("0").is_err());
    }
}
