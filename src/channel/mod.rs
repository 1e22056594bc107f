//! Channel URI parsing and canonical descriptors.

pub mod uri;

pub use uri::{ChannelDescriptor, ChannelUriError, Media};
