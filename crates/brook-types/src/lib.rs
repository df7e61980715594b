//! # brook-types
//!
//! Identifier and permission types shared between the brook storage layer and
//! the rest of the service.  This crate has no database dependency: it owns
//! the opaque-identifier codec, peer-to-peer topic identity, access-mode
//! parsing and the deletion-range normalization rules.

pub mod access;
pub mod ranges;
pub mod topic;
pub mod uid;

pub use access::AccessMode;
pub use ranges::DelRange;
pub use topic::{p2p_topic_name, parse_p2p_name, TopicCat};
pub use uid::Uid;
