//! Hand-rolled wire protocol: frame codec plus field-tagged payloads.

pub mod codec;
pub mod messages;
pub mod wire;
