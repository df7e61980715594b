//! Access-control permission modes.
//!
//! A mode is a small bitmask rendered as a string of permission letters
//! ("JRWPASDO") for storage.  A subscription carries a wanted and a given
//! mode; ownership is derived from their intersection.

use serde::{Deserialize, Serialize};

/// Permission bitmask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessMode(u8);

impl AccessMode {
    pub const NONE: AccessMode = AccessMode(0);
    /// Subscribe to the topic.
    pub const JOIN: AccessMode = AccessMode(1 << 0);
    /// Receive messages.
    pub const READ: AccessMode = AccessMode(1 << 1);
    /// Publish messages.
    pub const WRITE: AccessMode = AccessMode(1 << 2);
    /// Receive presence updates.
    pub const PRES: AccessMode = AccessMode(1 << 3);
    /// Approve requests to join.
    pub const APPROVE: AccessMode = AccessMode(1 << 4);
    /// Invite others.
    pub const SHARE: AccessMode = AccessMode(1 << 5);
    /// Hard-delete messages.
    pub const DELETE: AccessMode = AccessMode(1 << 6);
    /// Full control, topic ownership.
    pub const OWNER: AccessMode = AccessMode(1 << 7);

    const LETTERS: [(char, u8); 8] = [
        ('J', 1 << 0),
        ('R', 1 << 1),
        ('W', 1 << 2),
        ('P', 1 << 3),
        ('A', 1 << 4),
        ('S', 1 << 5),
        ('D', 1 << 6),
        ('O', 1 << 7),
    ];

    /// Parse a mode string.  Unknown letters are ignored; "N" and the empty
    /// string parse to [`AccessMode::NONE`].
    pub fn parse(s: &str) -> AccessMode {
        let mut bits = 0u8;
        for c in s.chars() {
            if let Some(&(_, bit)) = Self::LETTERS.iter().find(|(l, _)| *l == c) {
                bits |= bit;
            }
        }
        AccessMode(bits)
    }

    pub fn contains(&self, other: AccessMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Intersection of two modes; used to derive effective permissions from
    /// the wanted and given pair.
    pub fn intersect(&self, other: AccessMode) -> AccessMode {
        AccessMode(self.0 & other.0)
    }

    pub fn union(&self, other: AccessMode) -> AccessMode {
        AccessMode(self.0 | other.0)
    }

    pub fn is_owner(&self) -> bool {
        self.contains(AccessMode::OWNER)
    }

    pub fn can_read(&self) -> bool {
        self.contains(AccessMode::READ)
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return write!(f, "N");
        }
        for (letter, bit) in Self::LETTERS {
            if self.0 & bit != 0 {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AccessMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AccessMode::parse(s))
    }
}
