//! Topic name categories and peer-to-peer topic identity.
//!
//! A P2P topic has no stored identity of its own: its name is a deterministic,
//! order-independent composite of the two participants' identifiers, and the
//! counterpart is recovered from the name on demand.  Keeping the identity
//! derived avoids a cycle between topics and users in the ownership graph.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::uid::Uid;

/// Name prefix marking a peer-to-peer topic.
const P2P_PREFIX: &str = "p2p";

/// Category of a topic, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCat {
    /// The user's own "me" topic.
    Me,
    /// The discovery ("fnd") topic.
    Fnd,
    /// A two-party conversation.
    P2P,
    /// A group topic with an arbitrary name.
    Grp,
}

impl TopicCat {
    pub fn of(name: &str) -> TopicCat {
        match name {
            "me" => TopicCat::Me,
            "fnd" => TopicCat::Fnd,
            _ if name.starts_with(P2P_PREFIX) => TopicCat::P2P,
            _ => TopicCat::Grp,
        }
    }
}

/// Derive the name of the P2P topic between two users.  Order-independent:
/// `p2p_topic_name(a, b) == p2p_topic_name(b, a)`.
pub fn p2p_topic_name(a: Uid, b: Uid) -> String {
    let (lo, hi) = if a.raw() <= b.raw() { (a, b) } else { (b, a) };
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&lo.raw().to_be_bytes());
    bytes[8..].copy_from_slice(&hi.raw().to_be_bytes());
    format!("{}{}", P2P_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Extract both participants from a P2P topic name.  Returns `None` if the
/// name is not a well-formed P2P name or either participant is the zero uid.
pub fn parse_p2p_name(name: &str) -> Option<(Uid, Uid)> {
    let encoded = name.strip_prefix(P2P_PREFIX)?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let arr = <[u8; 16]>::try_from(bytes.as_slice()).ok()?;
    let a = Uid(i64::from_be_bytes(arr[..8].try_into().unwrap()));
    let b = Uid(i64::from_be_bytes(arr[8..].try_into().unwrap()));
    if a.is_zero() || b.is_zero() {
        return None;
    }
    Some((a, b))
}

impl Uid {
    /// Resolve "the other party" of a P2P topic relative to this user.
    /// Returns `None` if the name is malformed or this user is not a
    /// participant.
    pub fn p2p_peer(&self, name: &str) -> Option<Uid> {
        let (a, b) = parse_p2p_name(name)?;
        if a == *self {
            Some(b)
        } else if b == *self {
            Some(a)
        } else {
            None
        }
    }
}
