//! Built-in layers.
//!
//! Each layer owns the next inward [`Layer`](crate::Layer) and shares its call
//! signature. The [`PipelineBuilder`](crate::PipelineBuilder) wires them up in
//! declaration order.

mod base_url;
mod ensure;
mod pacing;
mod source_address;
mod user_agent;

pub use base_url::{BaseUrlLayer, is_absolute, join_url};
pub use ensure::{EnsureLayer, EnsurePolicy};
pub use pacing::{PacingLayer, PacingState};
pub use source_address::{AddressRotation, SourceAddressLayer, resolve_pool};
pub use user_agent::UserAgentLayer;
