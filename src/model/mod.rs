//! Core data model types: addresses, the body-part tree, and parsed messages.

pub mod address;
pub mod body;
pub mod message;
