use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use whirl_diagnostics::{Category, LogContext, SharedSink};
use whirl_utils::Span;

use crate::{
    eqn::{AppChild, AppExpr, OperatorExpr, OperatorKind, SolvedExpr},
    BindingRegistry, DataType, FuncType, InterfType, PositionedType, Primitive, TypeEquation, TypeExpression,
    UnknownType, WildcardType,
};

// The solver is a state machine reconciling upward type synthesis with
// downward expectation propagation. The walker describes each statement to it
// through the `deduce_*` calls; if everything deduces bottom-up the solver
// short-circuits to a solved leaf and no equation is materialized. Only when
// an unknown enters the picture does it build type expressions and equations,
// which it then simplifies on every new piece of information.

/// The per-file type solver. One is created for every walker.
pub struct Solver {
    context: LogContext,
    sink:    SharedSink,

    /// Equations that could not be solved when they were finished; they wait
    /// for the final sweep.
    unsolved: Vec<TypeEquation>,

    current_eqn:  Option<TypeEquation>,
    current_expr: Option<TypeExpression>,
    /// Structural nodes displaced from `current_expr` by a sibling
    /// subexpression; reclaimed when a parent node adopts them.
    floating:     Vec<TypeExpression>,

    local_bindings:  Rc<BindingRegistry>,
    global_bindings: Rc<BindingRegistry>,

    /// Unknowns already cited in a logged type error; every unknown is cited
    /// at most once.
    cited: RefCell<Vec<Rc<UnknownType>>>,
}

impl Solver {
    pub fn new(
        sink: SharedSink,
        context: LogContext,
        local_bindings: Rc<BindingRegistry>,
        global_bindings: Rc<BindingRegistry>,
    ) -> Self {
        Self {
            context,
            sink,
            unsolved: Vec::new(),
            current_eqn: None,
            current_expr: None,
            floating: Vec::new(),
            local_bindings,
            global_bindings,
            cited: RefCell::new(Vec::new()),
        }
    }

    fn log_type_error(
        &self,
        message: String,
        span: Span,
    ) {
        self.sink.log_error_in(&self.context, message, Category::Type, span);
    }

    /// Allocates a fresh unknown. Seeds a new current equation if none is in
    /// progress, otherwise joins the unknown to the one being built.
    pub fn create_unknown(
        &mut self,
        span: Span,
        constraints: Vec<DataType>,
    ) -> Rc<UnknownType> {
        let unknown = UnknownType::new(span, constraints);
        match &mut self.current_eqn {
            None => {
                let mut eqn = TypeEquation::default();
                eqn.add_unknown(unknown.clone());
                self.current_eqn = Some(eqn);
            },
            Some(eqn) => eqn.add_unknown(unknown.clone()),
        }
        unknown
    }

    /// Finalizes the expression under construction, collapsing it to a solved
    /// leaf when nothing inside it is left to do. `resultant` is used when no
    /// structural expression was built at all.
    pub fn finish_expr(
        &mut self,
        resultant: DataType,
    ) {
        let expr = match self.current_expr.take() {
            None => TypeExpression::solved(resultant),
            Some(expr) => match expr.result() {
                Some(result) if expr.is_settled() => TypeExpression::solved(result),
                _ => expr,
            },
        };
        self.push_expr(expr);
    }

    /// Moves a finished expression into the current equation: rhs slot first,
    /// lhs slot second.
    fn push_expr(
        &mut self,
        expr: TypeExpression,
    ) {
        // even without unknowns an equation is materialized here, so that a
        // statement-level check still happens
        let eqn = self.current_eqn.get_or_insert_with(TypeEquation::default);
        if eqn.rhs.is_none() {
            eqn.rhs = Some(expr);
        } else {
            eqn.lhs = Some(expr);
        }
        eqn.floating.extend(self.floating.drain(..));
    }

    /// Attempts to solve the current equation; parks it with the unsolved
    /// pool on failure.
    pub fn finish_eqn(&mut self) -> bool {
        let Some(mut eqn) = self.current_eqn.take() else {
            return true;
        };
        if self.solve(&mut eqn) {
            return true;
        }
        self.unsolved.push(eqn);
        false
    }

    /// Solves the current expression against a required expected type; the
    /// path for expression-position results such as returns and initializers.
    /// Used instead of [`Solver::finish_eqn`].
    pub fn solve_expr(
        &mut self,
        expected: DataType,
    ) -> bool {
        let Some(mut eqn) = self.current_eqn.take() else {
            return true;
        };
        eqn.lhs = Some(TypeExpression::solved(expected));
        if self.solve(&mut eqn) {
            return true;
        }
        self.unsolved.push(eqn);
        false
    }

    /// The final sweep: solve remaining equations to a fixed point, fewest
    /// unknowns first, defaulting constrained unknowns once nothing else is
    /// productive. Remaining failures become type errors.
    pub fn solve_all(&mut self) -> bool {
        tracing::trace!(parked = self.unsolved.len(), "final solve sweep");
        loop {
            if self.unsolved.is_empty() {
                return true;
            }
            self.unsolved.sort_by_key(TypeEquation::unresolved_count);
            let mut progress = false;
            let mut still = Vec::new();
            for mut eqn in std::mem::take(&mut self.unsolved) {
                let before = eqn.unresolved_count();
                if self.solve(&mut eqn) {
                    progress = true;
                    continue;
                }
                if eqn.unresolved_count() < before {
                    progress = true;
                }
                still.push(eqn);
            }
            self.unsolved = still;
            if progress {
                continue;
            }

            // nothing moved: default one constrained unknown (untyped
            // literals land on their first admissible constraint) and retry
            let mut defaulted = false;
            'eqns: for eqn in &self.unsolved {
                for unknown in &eqn.unknowns {
                    if unknown.is_evaluated() {
                        continue;
                    }
                    if let Some(first) = unknown.constraints().first() {
                        unknown.evaluate(first.clone());
                        defaulted = true;
                        break 'eqns;
                    }
                }
            }
            if !defaulted {
                break;
            }
        }

        self.log_unsolved();
        false
    }

    fn log_unsolved(&mut self) {
        for eqn in std::mem::take(&mut self.unsolved) {
            let span = eqn.span().unwrap_or_default();
            if eqn.is_fully_evaluated() {
                let want = eqn.lhs.as_ref().and_then(TypeExpression::result);
                let got = eqn.rhs.as_ref().and_then(TypeExpression::result);
                if let (Some(want), Some(got)) = (want, got) {
                    self.log_type_error(format!("Unable to unify types `{got}` and `{want}`"), span);
                }
                continue;
            }
            for unknown in &eqn.unknowns {
                if !unknown.is_evaluated() && !self.is_cited(unknown) {
                    self.cite(unknown);
                    self.log_type_error("Unable to deduce type".into(), unknown.span());
                }
            }
        }
    }

    fn is_cited(
        &self,
        unknown: &Rc<UnknownType>,
    ) -> bool {
        self.cited.borrow().iter().any(|c| Rc::ptr_eq(c, unknown))
    }

    fn cite(
        &self,
        unknown: &Rc<UnknownType>,
    ) {
        self.cited.borrow_mut().push(unknown.clone());
    }

    /// Whether any equations remain parked.
    pub fn has_unsolved(&self) -> bool {
        !self.unsolved.is_empty()
    }

    /// Drops all in-progress state. Called between definitions so that a
    /// walk abandoned halfway (a deferral) cannot leak its equations into
    /// the next definition.
    pub fn reset(&mut self) {
        self.current_eqn = None;
        self.current_expr = None;
        self.floating.clear();
        self.unsolved.clear();
    }

    // ------------------------------------------------------------------
    // solving

    fn solve(
        &self,
        eqn: &mut TypeEquation,
    ) -> bool {
        let expected = eqn.lhs.as_ref().and_then(TypeExpression::result);
        for expr in &mut eqn.floating {
            self.reduce(expr, None);
        }
        if let Some(rhs) = &mut eqn.rhs {
            self.reduce(rhs, expected.as_ref());
        }

        let got = eqn.rhs.as_ref().and_then(TypeExpression::result);
        let reconciled = match (&expected, &got) {
            (Some(want), Some(got)) => {
                if got == want || self.coerce_to(got, want) {
                    true
                } else {
                    let (attempted, succeeded) = self.coerce_unknowns(got, want);
                    attempted && succeeded
                }
            },
            (Some(_), None) => false,
            (None, _) => true,
        };

        reconciled && eqn.is_fully_evaluated()
    }

    /// Simplifies an expression with whatever is known now, optionally
    /// propagating an expected type downward.
    fn reduce(
        &self,
        expr: &mut TypeExpression,
        expected: Option<&DataType>,
    ) {
        match expr {
            TypeExpression::Solved(solved) => self.reduce_solved(solved, expected),
            TypeExpression::App(app) => self.reduce_app(app, expected),
            TypeExpression::Operator(op) => self.reduce_operator(op, expected),
        }
    }

    fn reduce_solved(
        &self,
        solved: &SolvedExpr,
        expected: Option<&DataType>,
    ) {
        if let (Some(unknown), Some(want)) = (solved.result.resolved().as_unevaluated_unknown(), expected) {
            let _ = self.coerce_unknowns(&DataType::Unknown(unknown), want);
        }
    }

    fn reduce_app(
        &self,
        app: &mut AppExpr,
        expected: Option<&DataType>,
    ) {
        // children first: push their (substituted) declared types down
        for child in &mut app.args {
            let declared = child
                .declared
                .as_ref()
                .map(|d| d.substitute(&app.subst))
                .filter(|d| !d.contains_wildcard());
            if let Some(expr) = &mut child.expr {
                self.reduce(expr, declared.as_ref());
            }
        }

        // arguments that evaluated since the last pass bind their generic
        // parameters
        let pending = std::mem::take(&mut app.pending);
        for (unknown, wildcard) in pending {
            match unknown.eval_type() {
                Some(ty) => {
                    let _ = self.bind_wildcard(&mut app.subst, &wildcard, &ty, unknown.span());
                },
                None => app.pending.push((unknown, wildcard)),
            }
        }

        if app.result.is_evaluated() {
            return;
        }

        let ret = app.func.ret.substitute(&app.subst);
        if !ret.contains_wildcard() {
            app.result.evaluate(ret.resolved());
            return;
        }

        // downward deduction: match the generic return shape against the
        // context's expectation, then let the new bindings resolve the
        // arguments that were waiting on them
        if let Some(want) = expected {
            if self.match_types(&app.func.ret, want, &mut app.subst) {
                for (unknown, wildcard) in &app.pending {
                    if unknown.is_evaluated() {
                        continue;
                    }
                    if let Some((_, bound)) = app.subst.iter().find(|(c, _)| Rc::ptr_eq(c, wildcard)) {
                        let _ = self.coerce_unknowns(&DataType::Unknown(unknown.clone()), &bound.clone());
                    }
                }
                let ret = app.func.ret.substitute(&app.subst);
                if !ret.contains_wildcard() {
                    app.result.evaluate(ret.resolved());
                }
            }
        }
    }

    fn reduce_operator(
        &self,
        op: &mut OperatorExpr,
        expected: Option<&DataType>,
    ) {
        for child in &mut op.operands {
            if let Some(expr) = &mut child.expr {
                self.reduce(expr, None);
            }
        }

        if op.kind == OperatorKind::Arithmetic && !op.result.is_evaluated() {
            if let Some(want) = expected {
                for child in &op.operands {
                    if child.provided.resolved().as_unevaluated_unknown().is_some() {
                        let _ = self.coerce_unknowns(&child.provided, want);
                    }
                }
            }
        }

        let known: Vec<DataType> = op
            .operands
            .iter()
            .map(|c| c.provided.resolved())
            .filter(|ty| ty.as_unevaluated_unknown().is_none())
            .collect();
        if known.len() != op.operands.len() {
            return;
        }

        match self.unify(&known) {
            Some(unified) if op.kind == OperatorKind::Comparison || is_numeric(&unified) => {
                let result = match op.kind {
                    OperatorKind::Arithmetic => unified,
                    OperatorKind::Comparison => DataType::Primitive(Primitive::Bool),
                };
                op.result.evaluate(result);
            },
            _ => {
                if !self.is_cited(&op.result) {
                    self.cite(&op.result);
                    let rendered: Vec<String> = known.iter().map(|t| format!("`{t}`")).collect();
                    self.log_type_error(
                        format!("Unable to apply `{}` to {}", op.op, rendered.join(" and ")),
                        op.span,
                    );
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // deductions

    /// Describes a function or method application. Arity and argument-name
    /// checking is the walker's job; this constrains argument types against
    /// parameter types and produces the application's result type — concrete
    /// when upward deduction suffices, otherwise a fresh unknown tied to the
    /// current equation.
    pub fn deduce_app(
        &mut self,
        func: &Rc<FuncType>,
        named: &BTreeMap<Rc<str>, PositionedType>,
        indef_args: &[PositionedType],
        span: Span,
    ) -> (DataType, bool) {
        let mut subst: Vec<(Rc<WildcardType>, DataType)> = Vec::new();
        let mut pending: Vec<(Rc<UnknownType>, Rc<WildcardType>)> = Vec::new();
        let mut children: Vec<(DataType, DataType, Span)> = Vec::new();
        let mut ok = true;

        for arg in &func.args {
            if arg.indefinite {
                for pt in indef_args {
                    ok &= self.constrain_arg(pt, &arg.ty, &mut subst, &mut pending, &mut children);
                }
            } else if let Some(pt) = named.get(&arg.name) {
                ok &= self.constrain_arg(pt, &arg.ty, &mut subst, &mut pending, &mut children);
            }
        }

        let ret = func.ret.substitute(&subst);
        let upward = pending.is_empty()
            && !ret.contains_wildcard()
            && children.iter().all(|(provided, _, _)| !self.has_child_expr(provided));
        if upward {
            return (ret.resolved(), ok);
        }

        let result = self.create_unknown(span, Vec::new());
        if !ret.contains_wildcard() {
            result.evaluate(ret.resolved());
        }

        let args = children
            .into_iter()
            .map(|(provided, declared, span)| AppChild {
                expr: self.take_child(&provided),
                provided,
                declared: Some(declared),
                span,
            })
            .collect();

        self.install_expr(TypeExpression::App(AppExpr {
            func: func.clone(),
            subst,
            pending,
            args,
            result: result.clone(),
            span,
        }));

        (DataType::Unknown(result), ok)
    }

    /// Describes a binary operator application: arithmetic operators unify
    /// their operands to a numeric type, comparisons unify their operands and
    /// produce `bool`.
    pub fn deduce_operator(
        &mut self,
        op: Rc<str>,
        lhs: PositionedType,
        rhs: PositionedType,
        span: Span,
    ) -> (DataType, bool) {
        let kind = match &*op {
            "==" | "!=" | "<" | ">" | "<=" | ">=" => OperatorKind::Comparison,
            _ => OperatorKind::Arithmetic,
        };

        let l = lhs.ty.resolved();
        let r = rhs.ty.resolved();
        let l_unknown = l.as_unevaluated_unknown();
        let r_unknown = r.as_unevaluated_unknown();

        if l_unknown.is_none() && r_unknown.is_none() {
            // upward deduction
            let Some(unified) = self.unify(&[l.clone(), r.clone()]) else {
                self.log_type_error(format!("Unable to apply `{op}` to `{l}` and `{r}`"), span);
                return (l, false);
            };
            if kind == OperatorKind::Arithmetic && !is_numeric(&unified) {
                self.log_type_error(format!("Unable to apply `{op}` to `{unified}`"), span);
                return (unified, false);
            }
            let result = match kind {
                OperatorKind::Arithmetic => unified,
                OperatorKind::Comparison => DataType::Primitive(Primitive::Bool),
            };
            return (result, true);
        }

        match (&l_unknown, &r_unknown) {
            (Some(a), Some(b)) => a.chain(b),
            (Some(_), None) => {
                let _ = self.coerce_unknowns(&l, &r);
            },
            (None, Some(_)) => {
                let _ = self.coerce_unknowns(&r, &l);
            },
            (None, None) => unreachable!("handled above"),
        }

        let result = self.create_unknown(span, Vec::new());
        if kind == OperatorKind::Comparison {
            result.evaluate(DataType::Primitive(Primitive::Bool));
        }

        let operands = [lhs, rhs]
            .into_iter()
            .map(|pt| AppChild {
                expr:     self.take_child(&pt.ty),
                provided: pt.ty,
                declared: None,
                span:     pt.span,
            })
            .collect();

        self.install_expr(TypeExpression::Operator(OperatorExpr {
            op,
            kind,
            operands,
            result: result.clone(),
            span,
        }));

        (DataType::Unknown(result), true)
    }

    fn constrain_arg(
        &mut self,
        pt: &PositionedType,
        declared: &DataType,
        subst: &mut Vec<(Rc<WildcardType>, DataType)>,
        pending: &mut Vec<(Rc<UnknownType>, Rc<WildcardType>)>,
        children: &mut Vec<(DataType, DataType, Span)>,
    ) -> bool {
        children.push((pt.ty.clone(), declared.clone(), pt.span));
        let provided = pt.ty.resolved();

        if let DataType::Wildcard(wildcard) = declared {
            return match provided.as_unevaluated_unknown() {
                Some(unknown) => {
                    pending.push((unknown, wildcard.clone()));
                    true
                },
                None => self.bind_wildcard(subst, wildcard, &provided, pt.span),
            };
        }
        if declared.contains_wildcard() {
            // a generic parameter nested in the argument type binds through
            // the structural matcher
            return match provided.as_unevaluated_unknown() {
                Some(_) => true,
                None => {
                    if self.match_types(declared, &provided, subst) {
                        true
                    } else {
                        self.log_type_error(format!("Unable to coerce `{provided}` to `{declared}`"), pt.span);
                        false
                    }
                },
            };
        }

        let (attempted, succeeded) = self.coerce_unknowns(&provided, declared);
        if attempted {
            if !succeeded {
                self.log_type_error(format!("Unable to coerce `{provided}` to `{declared}`"), pt.span);
            }
            return succeeded;
        }
        if provided == *declared || self.coerce_to(&provided, declared) {
            true
        } else {
            self.log_type_error(format!("Unable to coerce `{provided}` to `{declared}`"), pt.span);
            false
        }
    }

    fn bind_wildcard(
        &self,
        subst: &mut Vec<(Rc<WildcardType>, DataType)>,
        wildcard: &Rc<WildcardType>,
        ty: &DataType,
        span: Span,
    ) -> bool {
        if let Some((_, existing)) = subst.iter_mut().find(|(c, _)| Rc::ptr_eq(c, wildcard)) {
            match self.unify(&[existing.clone(), ty.clone()]) {
                Some(unified) => {
                    *existing = unified;
                    true
                },
                None => {
                    self.log_type_error(format!("Unable to unify types `{existing}` and `{ty}`"), span);
                    false
                },
            }
        } else {
            subst.push((wildcard.clone(), ty.clone()));
            true
        }
    }

    /// Matches a generic return shape against a concrete expectation,
    /// extending the substitution along the way.
    fn match_types(
        &self,
        pattern: &DataType,
        concrete: &DataType,
        subst: &mut Vec<(Rc<WildcardType>, DataType)>,
    ) -> bool {
        match pattern {
            DataType::Wildcard(wildcard) => {
                if let Some((_, bound)) = subst.iter().find(|(c, _)| Rc::ptr_eq(c, wildcard)) {
                    bound == concrete || self.coerce_to(concrete, bound) || self.coerce_to(bound, concrete)
                } else {
                    subst.push((wildcard.clone(), concrete.clone()));
                    true
                }
            },
            DataType::Ref(inner) => match concrete.resolved() {
                DataType::Ref(concrete_inner) => self.match_types(inner, &concrete_inner, subst),
                _ => false,
            },
            DataType::Tuple(parts) => match concrete.resolved() {
                DataType::Tuple(concrete_parts) if parts.len() == concrete_parts.len() => parts
                    .iter()
                    .zip(concrete_parts.iter())
                    .all(|(p, c)| self.match_types(p, c, subst)),
                _ => false,
            },
            _ => *pattern == *concrete,
        }
    }

    fn has_child_expr(
        &self,
        provided: &DataType,
    ) -> bool {
        let DataType::Unknown(unknown) = provided else {
            return false;
        };
        self.current_expr.as_ref().is_some_and(|e| expr_results_in(e, unknown))
            || self.floating.iter().any(|e| expr_results_in(e, unknown))
    }

    /// Adopts the structural node that produced `provided`, if there is one,
    /// from the current-expression slot or the floating pool.
    fn take_child(
        &mut self,
        provided: &DataType,
    ) -> Option<Box<TypeExpression>> {
        let DataType::Unknown(unknown) = provided else {
            return None;
        };
        if self.current_expr.as_ref().is_some_and(|e| expr_results_in(e, unknown)) {
            return self.current_expr.take().map(Box::new);
        }
        if let Some(ix) = self.floating.iter().position(|e| expr_results_in(e, unknown)) {
            return Some(Box::new(self.floating.remove(ix)));
        }
        None
    }

    fn install_expr(
        &mut self,
        expr: TypeExpression,
    ) {
        if let Some(prev) = self.current_expr.take() {
            self.floating.push(prev);
        }
        self.current_expr = Some(expr);
    }

    // ------------------------------------------------------------------
    // coercion and unification

    /// Whether a value of `src` may coerce into `dest`: equality, one-step
    /// primitive widening, explicit interface bindings, and one covariant
    /// step through references.
    pub fn coerce_to(
        &self,
        src: &DataType,
        dest: &DataType,
    ) -> bool {
        let src = peel_opaque(src.resolved());
        let dest = peel_opaque(dest.resolved());
        if src == dest {
            return true;
        }
        match (&src, &dest) {
            (DataType::Primitive(a), DataType::Primitive(b)) => a.coerces_to(b),
            (_, DataType::Interf(interf)) => self.implements(&src, interf),
            (DataType::Ref(a), DataType::Ref(b)) => self.coerce_to(a, b),
            _ => false,
        }
    }

    fn implements(
        &self,
        ty: &DataType,
        interf: &Rc<InterfType>,
    ) -> bool {
        self.local_bindings.implements(ty, interf) || self.global_bindings.implements(ty, interf)
    }

    /// Handles coercion when either side is an unevaluated unknown. Two
    /// unknowns are chained; an unknown against a known side evaluates if the
    /// known type is admissible under the unknown's constraints. Returns
    /// `(attempted, succeeded)`.
    pub fn coerce_unknowns(
        &self,
        src: &DataType,
        dest: &DataType,
    ) -> (bool, bool) {
        let src = src.resolved();
        let dest = dest.resolved();
        let src_unknown = src.as_unevaluated_unknown();
        let dest_unknown = dest.as_unevaluated_unknown();

        match (src_unknown, dest_unknown) {
            (Some(s), Some(d)) => {
                s.chain(&d);
                // chained unknowns can only land on a type both sides admit
                if !s.constraints().is_empty() && !d.constraints().is_empty() {
                    let of_d = d.constraints();
                    s.narrow(|c| of_d.iter().any(|other| self.constraint_accepts(other, c)));
                    let of_s = s.constraints();
                    d.narrow(|c| of_s.iter().any(|other| self.constraint_accepts(other, c)));
                }
                (true, true)
            },
            (Some(s), None) => {
                if s.admits(&dest, |c, t| self.constraint_accepts(c, t)) {
                    s.evaluate(dest);
                    (true, true)
                } else {
                    (true, false)
                }
            },
            (None, Some(d)) => {
                if d.admits(&src, |c, t| self.constraint_accepts(c, t)) {
                    d.evaluate(src);
                    (true, true)
                } else {
                    (true, false)
                }
            },
            (None, None) => (false, false),
        }
    }

    fn constraint_accepts(
        &self,
        constraint: &DataType,
        candidate: &DataType,
    ) -> bool {
        constraint == candidate || self.coerce_to(candidate, constraint) || self.coerce_to(constraint, candidate)
    }

    /// Produces a single common type from a list of types, or nothing.
    /// Pairwise: keep the running unifier if the next type coerces into it,
    /// adopt the next type if the unifier coerces the other way (coercion is
    /// one-step and lossless, so staging it is safe), and otherwise fall back
    /// to an interface both sides explicitly implement.
    pub fn unify(
        &self,
        types: &[DataType],
    ) -> Option<DataType> {
        let mut unified = types.first()?.resolved();
        for ty in &types[1..] {
            let ty = ty.resolved();
            if self.coerce_to(&ty, &unified) {
                continue;
            }
            if self.coerce_to(&unified, &ty) {
                unified = ty;
                continue;
            }
            unified = self.find_common_interface(&ty, &unified)?;
        }
        Some(unified)
    }

    /// An interface both types explicitly implement. Structural catch-alls
    /// never participate; only recorded bindings count.
    fn find_common_interface(
        &self,
        a: &DataType,
        b: &DataType,
    ) -> Option<DataType> {
        let mut of_a = self.local_bindings.interfaces_of(a);
        of_a.extend(self.global_bindings.interfaces_of(a));
        let mut of_b = self.local_bindings.interfaces_of(b);
        of_b.extend(self.global_bindings.interfaces_of(b));

        of_a.into_iter()
            .find(|ia| of_b.iter().any(|ib| Rc::ptr_eq(ia, ib)))
            .map(DataType::Interf)
    }
}

fn expr_results_in(
    expr: &TypeExpression,
    unknown: &Rc<UnknownType>,
) -> bool {
    match expr {
        TypeExpression::Solved(_) => false,
        TypeExpression::App(app) => Rc::ptr_eq(&app.result, unknown),
        TypeExpression::Operator(op) => Rc::ptr_eq(&op.result, unknown),
    }
}

fn is_numeric(ty: &DataType) -> bool {
    matches!(ty.resolved(), DataType::Primitive(p) if p.is_numeric())
}

fn peel_opaque(ty: DataType) -> DataType {
    match &ty {
        DataType::Opaque(opaque) => opaque.body().unwrap_or(ty),
        _ => ty,
    }
}

#[cfg(test)]
mod tests {
    use whirl_diagnostics::DiagnosticSink;

    use super::*;
    use crate::FuncArg;

    fn int() -> DataType {
        DataType::Primitive(Primitive::I64)
    }

    fn uint() -> DataType {
        DataType::Primitive(Primitive::U64)
    }

    fn f64_ty() -> DataType {
        DataType::Primitive(Primitive::F64)
    }

    fn solver() -> (Solver, SharedSink) {
        let sink = DiagnosticSink::new();
        let solver = Solver::new(sink.clone(), LogContext::default(), BindingRegistry::new(), BindingRegistry::new());
        (solver, sink)
    }

    fn literal(solver: &mut Solver) -> Rc<UnknownType> {
        solver.create_unknown(Span::default(), vec![int(), uint()])
    }

    #[test]
    fn concrete_expression_short_circuits() {
        let (mut solver, sink) = solver();
        solver.finish_expr(int());
        assert!(solver.solve_expr(int()));
        assert!(!solver.has_unsolved());
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn literal_takes_its_expected_type() {
        let (mut solver, sink) = solver();
        let lit = literal(&mut solver);
        solver.finish_expr(DataType::Unknown(lit.clone()));
        assert!(solver.solve_expr(f64_ty()));
        assert_eq!(lit.eval_type(), Some(f64_ty()));
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn incompatible_expectation_is_a_type_error() {
        let (mut solver, sink) = solver();
        let lit = literal(&mut solver);
        solver.finish_expr(DataType::Unknown(lit.clone()));
        assert!(!solver.solve_expr(DataType::Primitive(Primitive::Bool)));
        // the final sweep defaults the literal, discovers the sides cannot
        // unify, and reports exactly one error
        assert!(!solver.solve_all());
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].category, Category::Type);
    }

    #[test]
    fn unconstrained_statement_defaults_in_the_final_sweep() {
        let (mut solver, sink) = solver();
        let lit = literal(&mut solver);
        solver.finish_expr(DataType::Unknown(lit.clone()));
        assert!(!solver.finish_eqn());
        assert!(solver.solve_all());
        assert_eq!(lit.eval_type(), Some(int()));
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn application_deduces_upward_when_arguments_are_known() {
        let (mut solver, sink) = solver();
        let func = Rc::new(FuncType {
            args: vec![FuncArg {
                name:       "x".into(),
                ty:         int(),
                indefinite: false,
            }],
            ret:  f64_ty(),
        });
        let named = BTreeMap::from([("x".into(), PositionedType::new(int(), Span::default()))]);
        let (result, ok) = solver.deduce_app(&func, &named, &[], Span::default());
        assert!(ok);
        assert_eq!(result, f64_ty());
        // no unknowns, so no equation should remain after finishing
        solver.finish_expr(result);
        assert!(solver.solve_expr(f64_ty()));
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn generic_application_flows_downward_from_the_expectation() {
        let (mut solver, sink) = solver();
        let wildcard = Rc::new(WildcardType { name: "T".into() });
        let identity = Rc::new(FuncType {
            args: vec![FuncArg {
                name:       "value".into(),
                ty:         DataType::Wildcard(wildcard.clone()),
                indefinite: false,
            }],
            ret:  DataType::Wildcard(wildcard),
        });

        let arg = literal(&mut solver);
        let named = BTreeMap::from([("value".into(), PositionedType::new(DataType::Unknown(arg.clone()), Span::default()))]);
        let (result, ok) = solver.deduce_app(&identity, &named, &[], Span::default());
        assert!(ok);
        assert!(result.resolved().as_unevaluated_unknown().is_some());

        solver.finish_expr(result.clone());
        assert!(solver.solve_expr(int()));
        assert_eq!(arg.eval_type(), Some(int()));
        assert_eq!(result.resolved(), int());
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn argument_type_mismatch_is_reported_at_the_argument() {
        let (mut solver, sink) = solver();
        let func = Rc::new(FuncType {
            args: vec![FuncArg {
                name:       "flag".into(),
                ty:         DataType::Primitive(Primitive::Bool),
                indefinite: false,
            }],
            ret:  int(),
        });
        let named = BTreeMap::from([("flag".into(), PositionedType::new(int(), Span::default()))]);
        let (_, ok) = solver.deduce_app(&func, &named, &[], Span::default());
        assert!(!ok);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].category, Category::Type);
    }

    #[test]
    fn operators_unify_their_operands() {
        let (mut solver, sink) = solver();
        let (result, ok) =
            solver.deduce_operator("+".into(), PositionedType::new(int(), Span::default()), PositionedType::new(int(), Span::default()), Span::default());
        assert!(ok);
        assert_eq!(result, int());

        let (result, ok) = solver.deduce_operator(
            "==".into(),
            PositionedType::new(int(), Span::default()),
            PositionedType::new(int(), Span::default()),
            Span::default(),
        );
        assert!(ok);
        assert_eq!(result, DataType::Primitive(Primitive::Bool));
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn operator_over_literals_resolves_through_the_equation() {
        let (mut solver, sink) = solver();
        let lhs = literal(&mut solver);
        let rhs = literal(&mut solver);
        let (result, ok) = solver.deduce_operator(
            "+".into(),
            PositionedType::new(DataType::Unknown(lhs.clone()), Span::default()),
            PositionedType::new(DataType::Unknown(rhs.clone()), Span::default()),
            Span::default(),
        );
        assert!(ok);
        solver.finish_expr(result.clone());
        assert!(solver.solve_expr(f64_ty()));
        assert_eq!(lhs.eval_type(), Some(f64_ty()));
        assert_eq!(rhs.eval_type(), Some(f64_ty()));
        assert_eq!(result.resolved(), f64_ty());
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn unification_respects_coercion_direction() {
        let (solver, _) = solver();
        let unified = solver.unify(&[DataType::Primitive(Primitive::I32), int()]);
        assert_eq!(unified, Some(int()));
        let unified = solver.unify(&[int(), DataType::Primitive(Primitive::I32)]);
        assert_eq!(unified, Some(int()));
        assert_eq!(solver.unify(&[int(), DataType::Primitive(Primitive::Bool)]), None);
    }

    #[test]
    fn unification_uses_only_explicit_interface_bindings() {
        let (solver, _) = solver();
        let interf = Rc::new(InterfType {
            name:    "Showable".into(),
            methods: Vec::new(),
        });
        let boolean = DataType::Primitive(Primitive::Bool);

        // nothing recorded: no common interface exists
        assert_eq!(solver.unify(&[int(), boolean.clone()]), None);

        solver.global_bindings.add(int(), interf.clone());
        solver.global_bindings.add(boolean.clone(), interf.clone());
        let unified = solver.unify(&[int(), boolean]);
        assert_eq!(unified, Some(DataType::Interf(interf)));
    }

    #[test]
    fn unification_is_associative_up_to_coercion() {
        let (solver, _) = solver();
        let i32_ty = DataType::Primitive(Primitive::I32);
        let flat = solver.unify(&[i32_ty.clone(), int(), f64_ty()]);
        let staged = solver
            .unify(&[i32_ty, int()])
            .and_then(|first| solver.unify(&[first, f64_ty()]));
        assert_eq!(flat, staged);
        assert_eq!(flat, Some(f64_ty()));
    }

    #[test]
    fn coerce_unknowns_follows_the_attempted_succeeded_convention() {
        let (mut solver, _) = solver();
        // neither side unknown: not attempted
        assert_eq!(solver.coerce_unknowns(&int(), &f64_ty()), (false, false));

        // unknown against admissible known: attempted and succeeded
        let u = literal(&mut solver);
        assert_eq!(solver.coerce_unknowns(&DataType::Unknown(u.clone()), &int()), (true, true));
        assert_eq!(u.eval_type(), Some(int()));

        // unknown against inadmissible known: attempted and failed
        let v = solver.create_unknown(Span::default(), vec![DataType::Primitive(Primitive::Bool)]);
        assert_eq!(solver.coerce_unknowns(&DataType::Unknown(v.clone()), &int()), (true, false));
        assert!(!v.is_evaluated());

        // both unknown: chained
        let a = solver.create_unknown(Span::default(), Vec::new());
        let b = solver.create_unknown(Span::default(), Vec::new());
        assert_eq!(solver.coerce_unknowns(&DataType::Unknown(a.clone()), &DataType::Unknown(b.clone())), (true, true));
        a.evaluate(int());
        assert_eq!(b.eval_type(), Some(int()));
    }
}
