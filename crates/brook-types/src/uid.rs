//! Opaque user/entity identifiers.
//!
//! Internally every entity is keyed by a monotonic `i64`.  Externally the key
//! is never exposed: it is scrambled and base64url-encoded into an 11-character
//! opaque string.  The mapping is a bijection for all ids >= 1.  Decoding a
//! malformed string yields [`Uid::ZERO`], never an error; callers must check
//! for the zero sentinel before using a decoded value in a query.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Fixed scramble mask applied before encoding.  Purely obfuscation, not
/// security: the requirement is a stable bijection, not secrecy.
const SCRAMBLE: u64 = 0x5a4d_6b1e_c3f8_9027;

/// Numeric identifier of a user, message or file upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub i64);

impl Uid {
    /// The zero sentinel returned for malformed opaque strings.
    pub const ZERO: Uid = Uid(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Raw numeric key used for storage and joins.
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Encode into the externally visible opaque form.
    pub fn to_opaque(&self) -> String {
        let scrambled = (self.0 as u64) ^ SCRAMBLE;
        URL_SAFE_NO_PAD.encode(scrambled.to_be_bytes())
    }

    /// Decode an opaque string.  Returns [`Uid::ZERO`] if the input is not a
    /// valid encoding.
    pub fn from_opaque(s: &str) -> Uid {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(s) else {
            return Uid::ZERO;
        };
        let Ok(arr) = <[u8; 8]>::try_from(bytes.as_slice()) else {
            return Uid::ZERO;
        };
        Uid((u64::from_be_bytes(arr) ^ SCRAMBLE) as i64)
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_opaque())
    }
}

impl std::str::FromStr for Uid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Uid::from_opaque(s))
    }
}

impl From<i64> for Uid {
    fn from(n: i64) -> Self {
        Uid(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_round_trip() {
        for n in [1i64, 2, 42, 1 << 20, i64::MAX] {
            let uid = Uid(n);
            assert_eq!(Uid::from_opaque(&uid.to_opaque()), uid);
        }
    }

    #[test]
    fn malformed_decodes_to_zero() {
        assert_eq!(Uid::from_opaque("garbage!!"), Uid::ZERO);
        assert_eq!(Uid::from_opaque(""), Uid::ZERO);
        assert_eq!(Uid::from_opaque("toolongtobeavalidkeyencoding"), Uid::ZERO);
    }

    #[test]
    fn distinct_ids_distinct_encodings() {
        assert_ne!(Uid(1).to_opaque(), Uid(2).to_opaque());
    }
}
