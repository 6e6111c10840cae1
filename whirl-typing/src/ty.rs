use std::{cell::RefCell, rc::Rc};

use whirl_utils::{PackageId, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Primitive {
    Unit,
    Bool,
    Str,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Primitive {
    pub fn is_integral(&self) -> bool {
        use Primitive::*;
        matches!(self, I8 | I16 | I32 | I64 | U8 | U16 | U32 | U64)
    }

    pub fn is_signed(&self) -> bool {
        use Primitive::*;
        matches!(self, I8 | I16 | I32 | I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral() || self.is_float()
    }

    fn width(&self) -> u8 {
        use Primitive::*;
        match self {
            Unit | Bool => 0,
            Str => 0,
            I8 | U8 => 8,
            I16 | U16 => 16,
            I32 | U32 | F32 => 32,
            I64 | U64 | F64 => 64,
        }
    }

    /// One-step lossless-or-widening coercion between primitives: integral
    /// widening within a signedness class, float widening, and integral to
    /// float.
    pub fn coerces_to(
        &self,
        dest: &Primitive,
    ) -> bool {
        if self == dest {
            return true;
        }
        if self.is_integral() && dest.is_integral() {
            return self.is_signed() == dest.is_signed() && self.width() < dest.width();
        }
        if self.is_integral() && dest.is_float() {
            return true;
        }
        if self.is_float() && dest.is_float() {
            return self.width() < dest.width();
        }
        false
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        use Primitive::*;
        let name = match self {
            Unit => "unit",
            Bool => "bool",
            Str => "string",
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            F32 => "f32",
            F64 => "f64",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct FuncArg {
    pub name:       Rc<str>,
    pub ty:         DataType,
    pub indefinite: bool,
}

#[derive(Debug, Clone)]
pub struct FuncType {
    pub args: Vec<FuncArg>,
    pub ret:  DataType,
}

#[derive(Debug)]
pub struct StructType {
    pub name:   Rc<str>,
    pub fields: Vec<(Rc<str>, DataType)>,
    pub packed: bool,
}

#[derive(Debug)]
pub struct AlgebraicType {
    pub name:     Rc<str>,
    pub variants: Vec<AlgebraicVariant>,
}

#[derive(Debug)]
pub struct AlgebraicVariant {
    pub name:   Rc<str>,
    pub fields: Vec<DataType>,
}

#[derive(Debug)]
pub struct InterfType {
    pub name:    Rc<str>,
    pub methods: Vec<(Rc<str>, Rc<FuncType>)>,
}

/// A generic parameter in the definition currently being walked.
#[derive(Debug)]
pub struct WildcardType {
    pub name: Rc<str>,
}

/// A solver-owned placeholder. Transitions monotonically from unevaluated to
/// evaluated; never back.
pub struct UnknownType {
    span:        Span,
    constraints: RefCell<Vec<DataType>>,
    chained:     RefCell<Vec<Rc<UnknownType>>>,
    eval:        RefCell<Option<DataType>>,
}

impl std::fmt::Debug for UnknownType {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match &*self.eval.borrow() {
            Some(ty) => write!(f, "Unknown(= {ty})"),
            None => write!(f, "Unknown({} constraints)", self.constraints.borrow().len()),
        }
    }
}

impl UnknownType {
    pub fn new(
        span: Span,
        constraints: Vec<DataType>,
    ) -> Rc<Self> {
        Rc::new(Self {
            span,
            constraints: RefCell::new(constraints),
            chained: RefCell::new(Vec::new()),
            eval: RefCell::new(None),
        })
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn is_evaluated(&self) -> bool {
        self.eval.borrow().is_some()
    }

    pub fn eval_type(&self) -> Option<DataType> {
        self.eval.borrow().clone()
    }

    pub fn constraints(&self) -> Vec<DataType> {
        self.constraints.borrow().clone()
    }

    pub fn add_constraint(
        &self,
        ty: DataType,
    ) {
        let mut constraints = self.constraints.borrow_mut();
        if !constraints.iter().any(|c| *c == ty) {
            constraints.push(ty);
        }
    }

    /// Retains only the constraints `keep` accepts; reports whether the set
    /// shrank (the productivity signal for `solve_all`).
    pub fn narrow(
        &self,
        keep: impl Fn(&DataType) -> bool,
    ) -> bool {
        let mut constraints = self.constraints.borrow_mut();
        let before = constraints.len();
        constraints.retain(|c| keep(c));
        constraints.len() < before
    }

    /// Whether a known type is admissible for this unknown: an empty
    /// constraint set admits anything, otherwise at least one constraint must
    /// accept the candidate.
    pub fn admits(
        &self,
        ty: &DataType,
        accepts: impl Fn(&DataType, &DataType) -> bool,
    ) -> bool {
        let constraints = self.constraints.borrow();
        constraints.is_empty() || constraints.iter().any(|c| accepts(c, ty))
    }

    /// Links two unevaluated unknowns so that evaluating either evaluates the
    /// other.
    pub fn chain(
        self: &Rc<Self>,
        other: &Rc<UnknownType>,
    ) {
        if Rc::ptr_eq(self, other) {
            return;
        }
        self.chained.borrow_mut().push(other.clone());
        other.chained.borrow_mut().push(self.clone());
    }

    /// Evaluates the unknown. The transition is monotone: re-evaluating with
    /// the same type is a no-op, re-evaluating with a different one is a bug
    /// in the caller.
    pub fn evaluate(
        self: &Rc<Self>,
        ty: DataType,
    ) {
        {
            let mut eval = self.eval.borrow_mut();
            if let Some(existing) = &*eval {
                debug_assert!(*existing == ty, "unknown type evaluated twice with different types");
                return;
            }
            *eval = Some(ty.clone());
        }
        for linked in self.chained.borrow().iter() {
            if !linked.is_evaluated() && linked.admits(&ty, |c, t| c == t) {
                linked.evaluate(ty.clone());
            }
        }
    }
}

/// The in-place-completed indirection behind an opaque prototype. References
/// taken while the body was still unset observe the completed type later.
pub struct OpaqueType {
    name: Rc<str>,
    body: RefCell<Option<DataType>>,
}

impl std::fmt::Debug for OpaqueType {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Opaque({})", self.name)
    }
}

impl OpaqueType {
    pub fn new(name: Rc<str>) -> Rc<Self> {
        Rc::new(Self {
            name,
            body: RefCell::new(None),
        })
    }

    pub fn name(&self) -> Rc<str> {
        self.name.clone()
    }

    pub fn body(&self) -> Option<DataType> {
        self.body.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.body.borrow().is_some()
    }

    /// Swaps the real definition into the prototype.
    pub fn complete(
        &self,
        ty: DataType,
    ) {
        *self.body.borrow_mut() = Some(ty);
    }
}

#[derive(Debug, Clone)]
pub enum DataType {
    Primitive(Primitive),
    /// A package bound in a file's local table by a symbol-less import.
    Package(PackageId),
    Func(Rc<FuncType>),
    Struct(Rc<StructType>),
    Tuple(Vec<DataType>),
    Algebraic(Rc<AlgebraicType>),
    Interf(Rc<InterfType>),
    Wildcard(Rc<WildcardType>),
    Ref(Box<DataType>),
    Unknown(Rc<UnknownType>),
    Opaque(Rc<OpaqueType>),
}

impl DataType {
    /// Unwraps evaluated unknowns so the caller sees through solver
    /// placeholders. Opaque indirections are kept: their identity is the
    /// point.
    pub fn resolved(&self) -> DataType {
        match self {
            DataType::Unknown(u) => match u.eval_type() {
                Some(ty) => ty.resolved(),
                None => self.clone(),
            },
            _ => self.clone(),
        }
    }

    pub fn as_unevaluated_unknown(&self) -> Option<Rc<UnknownType>> {
        match self {
            DataType::Unknown(u) if !u.is_evaluated() => Some(u.clone()),
            _ => None,
        }
    }

    /// Whether any part of this type is still a generic parameter.
    pub fn contains_wildcard(&self) -> bool {
        match self {
            DataType::Wildcard(_) => true,
            DataType::Ref(inner) => inner.contains_wildcard(),
            DataType::Tuple(tys) => tys.iter().any(DataType::contains_wildcard),
            DataType::Func(f) => f.args.iter().any(|a| a.ty.contains_wildcard()) || f.ret.contains_wildcard(),
            _ => false,
        }
    }

    /// Rewrites generic parameters according to a substitution.
    pub fn substitute(
        &self,
        subst: &[(Rc<WildcardType>, DataType)],
    ) -> DataType {
        match self {
            DataType::Wildcard(w) => subst
                .iter()
                .find(|(candidate, _)| Rc::ptr_eq(candidate, w))
                .map(|(_, ty)| ty.clone())
                .unwrap_or_else(|| self.clone()),
            DataType::Ref(inner) => DataType::Ref(Box::new(inner.substitute(subst))),
            DataType::Tuple(tys) => DataType::Tuple(tys.iter().map(|t| t.substitute(subst)).collect()),
            DataType::Func(f) => DataType::Func(Rc::new(FuncType {
                args: f
                    .args
                    .iter()
                    .map(|a| FuncArg {
                        name:       a.name.clone(),
                        ty:         a.ty.substitute(subst),
                        indefinite: a.indefinite,
                    })
                    .collect(),
                ret:  f.ret.substitute(subst),
            })),
            _ => self.clone(),
        }
    }
}

impl PartialEq for DataType {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        use DataType::*;
        match (&self.resolved(), &other.resolved()) {
            (Primitive(a), Primitive(b)) => a == b,
            (Package(a), Package(b)) => a == b,
            (Func(a), Func(b)) => {
                a.args.len() == b.args.len()
                    && a.args
                        .iter()
                        .zip(b.args.iter())
                        .all(|(x, y)| x.ty == y.ty && x.indefinite == y.indefinite)
                    && a.ret == b.ret
            },
            (Struct(a), Struct(b)) => Rc::ptr_eq(a, b),
            (Algebraic(a), Algebraic(b)) => Rc::ptr_eq(a, b),
            (Interf(a), Interf(b)) => Rc::ptr_eq(a, b),
            (Wildcard(a), Wildcard(b)) => Rc::ptr_eq(a, b),
            (Tuple(a), Tuple(b)) => a == b,
            (Ref(a), Ref(b)) => a == b,
            (Unknown(a), Unknown(b)) => Rc::ptr_eq(a, b),
            (Opaque(a), Opaque(b)) => Rc::ptr_eq(a, b),
            // an opaque prototype is its body once completed
            (Opaque(a), rhs) => a.body().is_some_and(|body| body == *rhs),
            (lhs, Opaque(b)) => b.body().is_some_and(|body| body == *lhs),
            _ => false,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::Package(_) => write!(f, "package"),
            DataType::Func(func) => {
                write!(f, "func(")?;
                for (ix, arg) in func.args.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg.ty)?;
                    if arg.indefinite {
                        write!(f, "...")?;
                    }
                }
                write!(f, ")({})", func.ret)
            },
            DataType::Struct(s) => write!(f, "{}", s.name),
            DataType::Tuple(tys) => {
                write!(f, "(")?;
                for (ix, ty) in tys.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                write!(f, ")")
            },
            DataType::Algebraic(a) => write!(f, "{}", a.name),
            DataType::Interf(i) => write!(f, "{}", i.name),
            DataType::Wildcard(w) => write!(f, "{}", w.name),
            DataType::Ref(inner) => write!(f, "&{inner}"),
            DataType::Unknown(u) => match u.eval_type() {
                Some(ty) => write!(f, "{ty}"),
                None => write!(f, "<unknown>"),
            },
            DataType::Opaque(o) => write!(f, "{}", o.name()),
        }
    }
}
