//! The whirl type model and the constraint-accumulating type solver.
//!
//! Data types are tagged sums over `Rc`-shared payloads; the two cyclic cases
//! (`Unknown`, `Opaque`) carry interior mutability so the solver and the
//! definition resolver can fill them in place without invalidating the
//! references handed out earlier.

pub use bindings::{Binding, BindingId, BindingRegistry};
pub use eqn::{PositionedType, TypeEquation, TypeExpression};
pub use solver::Solver;
pub use ty::{
    AlgebraicType, AlgebraicVariant, DataType, FuncArg, FuncType, InterfType, OpaqueType, Primitive, StructType,
    UnknownType, WildcardType,
};

mod bindings;
mod eqn;
mod solver;
mod ty;
