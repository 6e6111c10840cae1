//! Fixed-point resolution of top-level definitions across packages: the
//! per-package assembler drives the initial pass and the definition queue,
//! and the resolver cycles every package's queue — with opaque prototypes
//! breaking type cycles — until no pass is productive.

pub use assembler::PackageAssembler;
pub use queue::{Definition, DefinitionQueue};
pub use resolver::Resolver;

mod assembler;
mod queue;
mod resolver;
