//! Types shared across the whirl compiler crates: source identities, spans,
//! and the package identifier that crosses crate boundaries.

pub use common_types::PackageId;
pub use sources::{SourceId, Span};

mod common_types;
mod sources;
