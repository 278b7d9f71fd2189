//! Domain models for the organization directory.
//!
//! Organizations and units share [`node::NodeAttributes`]; the
//! [`node::DirectoryNode`] variant is what type-tagged lookups return.

pub mod member;
pub mod membership;
pub mod node;
pub mod organization;
pub mod slug;
pub mod tenant;
pub mod unit;
