//! The symbol and compilation-unit model: symbols and their visibility,
//! packages and files with their tables, opaque prototypes for cyclic
//! resolution, and the HIR the front-end hands to the code generator.

pub use hir::{HirExpr, HirNode, HirRoot, HirStmt};
pub use package::{File, ImportRecord, Package, PendingImport, WildcardImport};
pub use symbol::{
    new_opaque_slot, DeclStatus, DefKind, OpaqueSlot, OpaqueSymbol, SharedOpaqueSlot, Symbol, UnknownSymbol,
};

mod hir;
mod package;
mod symbol;
