use crate::ProtocolViolation;
use core::fmt;
use t2t_common::{SYMBOL_KEY_LEN, SYMBOL_TABLE_SIZE};

/// An 8-byte, space-padded symbol key as stored in the device CAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolKey([u8; SYMBOL_KEY_LEN]);

impl SymbolKey {
    /// Pads `name` with spaces or truncates it to exactly eight bytes.
    pub fn new(name: &str) -> Self {
        let mut key = [b' '; SYMBOL_KEY_LEN];
        for (dst, src) in key.iter_mut().zip(name.as_bytes()) {
            *dst = *src;
        }
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; SYMBOL_KEY_LEN] {
        &self.0
    }

    /// The key as `(SYMTAB_KEY_LO, SYMTAB_KEY_HI)` register values.
    ///
    /// Byte 0 of the key lands in bits 0..8 of the low word.
    pub fn words(&self) -> (u32, u32) {
        let k = self.0;
        (
            u32::from_le_bytes([k[0], k[1], k[2], k[3]]),
            u32::from_le_bytes([k[4], k[5], k[6], k[7]]),
        )
    }

    pub fn from_words(lo: u32, hi: u32) -> Self {
        let mut key = [0; SYMBOL_KEY_LEN];
        key[..4].copy_from_slice(&lo.to_le_bytes());
        key[4..].copy_from_slice(&hi.to_le_bytes());
        Self(key)
    }

    /// The symbol with trailing padding removed.
    pub fn trimmed(&self) -> String {
        String::from_utf8_lossy(&self.0).trim_end().to_string()
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trimmed())
    }
}

/// Checks that `index` addresses a symbol or reference-price table slot.
pub fn check_index(index: u16) -> Result<u16, ProtocolViolation> {
    if usize::from(index) < SYMBOL_TABLE_SIZE {
        Ok(index)
    } else {
        Err(ProtocolViolation::SymbolIndexOutOfRange { index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_symbol_is_space_padded() {
        let key = SymbolKey::new("AAPL");
        assert_eq!(key.as_bytes(), b"AAPL    ");
        assert_eq!(key.words(), (0x4C50_4141, 0x2020_2020));
        assert_eq!(key.to_string(), "AAPL");
    }

    #[test]
    fn long_symbol_is_truncated() {
        let key = SymbolKey::new("ABCDEFGHIJK");
        assert_eq!(key.as_bytes(), b"ABCDEFGH");
    }

    #[test]
    fn words_reassemble_key() {
        let key = SymbolKey::new("MSFT");
        let (lo, hi) = key.words();
        assert_eq!(SymbolKey::from_words(lo, hi), key);
    }

    #[test]
    fn index_bounds() {
        assert_eq!(check_index(1023), Ok(1023));
        assert_eq!(
            check_index(1024),
            Err(ProtocolViolation::SymbolIndexOutOfRange { index: 1024 })
        );
    }
}
