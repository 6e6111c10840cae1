use std::rc::Rc;

use whirl_utils::Span;

use crate::{DataType, FuncType, UnknownType, WildcardType};

/// A data type paired with the position it came from, so the solver can log
/// errors where the walker saw the expression.
#[derive(Debug, Clone)]
pub struct PositionedType {
    pub ty:   DataType,
    pub span: Span,
}

impl PositionedType {
    pub fn new(
        ty: DataType,
        span: Span,
    ) -> Self {
        Self { ty, span }
    }
}

/// A leaf whose result is already known; the short-circuit case. When a whole
/// statement deduces bottom-up without unknowns this is the only node the
/// solver ever materializes.
#[derive(Debug)]
pub struct SolvedExpr {
    pub result: DataType,
}

/// One argument position of an [`AppExpr`] or operand of an
/// [`OperatorExpr`]: the expression that produced it (if it was itself
/// structural) and, for applications, the declared parameter type it must
/// coerce into.
#[derive(Debug)]
pub struct AppChild {
    pub expr:     Option<Box<TypeExpression>>,
    pub provided: DataType,
    pub declared: Option<DataType>,
    pub span:     Span,
}

impl AppChild {
    pub fn is_settled(&self) -> bool {
        let provided_known = self.provided.resolved().as_unevaluated_unknown().is_none();
        provided_known && self.expr.as_ref().map_or(true, |e| e.is_settled())
    }
}

/// A function or method application whose result could not be deduced
/// upward: some argument is unknown or the return type mentions an unbound
/// generic parameter.
#[derive(Debug)]
pub struct AppExpr {
    pub func:    Rc<FuncType>,
    /// Generic-parameter bindings discovered so far.
    pub subst:   Vec<(Rc<WildcardType>, DataType)>,
    /// Unknown arguments whose evaluation will bind a generic parameter.
    pub pending: Vec<(Rc<UnknownType>, Rc<WildcardType>)>,
    pub args:    Vec<AppChild>,
    pub result:  Rc<UnknownType>,
    pub span:    Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Arithmetic,
    Comparison,
}

/// An operator application over at least one unknown operand.
#[derive(Debug)]
pub struct OperatorExpr {
    pub op:       Rc<str>,
    pub kind:     OperatorKind,
    pub operands: Vec<AppChild>,
    pub result:   Rc<UnknownType>,
    pub span:     Span,
}

/// A tree of structural typing operations with concrete types or unknowns at
/// the leaves. Every expression can be asked for its possibly-known result.
#[derive(Debug)]
pub enum TypeExpression {
    Solved(SolvedExpr),
    App(AppExpr),
    Operator(OperatorExpr),
}

impl TypeExpression {
    pub fn solved(result: DataType) -> Self {
        TypeExpression::Solved(SolvedExpr { result })
    }

    /// The result type if it is known at this point in solving.
    pub fn result(&self) -> Option<DataType> {
        match self {
            TypeExpression::Solved(s) => match s.result.as_unevaluated_unknown() {
                Some(_) => None,
                None => Some(s.result.resolved()),
            },
            TypeExpression::App(app) => app.result.eval_type(),
            TypeExpression::Operator(op) => op.result.eval_type(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            TypeExpression::Solved(_) => None,
            TypeExpression::App(app) => Some(app.span),
            TypeExpression::Operator(op) => Some(op.span),
        }
    }

    /// Whether no work remains anywhere in this expression: results and
    /// operands evaluated, no generic parameter left waiting on an unknown
    /// argument. Only settled expressions may collapse to [`SolvedExpr`].
    pub fn is_settled(&self) -> bool {
        match self {
            TypeExpression::Solved(_) => true,
            TypeExpression::App(app) => {
                app.result.is_evaluated() && app.pending.is_empty() && app.args.iter().all(AppChild::is_settled)
            },
            TypeExpression::Operator(op) => op.result.is_evaluated() && op.operands.iter().all(AppChild::is_settled),
        }
    }
}

/// Two type expressions the solver must reconcile, along with the unknowns
/// participating in them. Only materialized when at least one unknown exists
/// or a statement-level check is required.
#[derive(Debug, Default)]
pub struct TypeEquation {
    pub lhs:      Option<TypeExpression>,
    pub rhs:      Option<TypeExpression>,
    /// Structural nodes that ended up feeding neither side directly (sibling
    /// subexpressions); they still carry pending work.
    pub floating: Vec<TypeExpression>,
    pub unknowns: Vec<Rc<UnknownType>>,
}

impl TypeEquation {
    pub fn add_unknown(
        &mut self,
        unknown: Rc<UnknownType>,
    ) {
        if !self.unknowns.iter().any(|u| Rc::ptr_eq(u, &unknown)) {
            self.unknowns.push(unknown);
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.unknowns.iter().filter(|u| !u.is_evaluated()).count()
    }

    pub fn is_fully_evaluated(&self) -> bool {
        self.unresolved_count() == 0
    }

    /// A position to attribute equation-level errors to: the first unknown's
    /// origin, or the rhs expression.
    pub fn span(&self) -> Option<Span> {
        self.unknowns
            .first()
            .map(|u| u.span())
            .or_else(|| self.rhs.as_ref().and_then(TypeExpression::span))
    }
}
