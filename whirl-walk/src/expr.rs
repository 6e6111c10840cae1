use std::{collections::BTreeMap, rc::Rc};

use whirl_ast::{AstBranch, AstLeaf, AstNode, BranchKind, LeafKind};
use whirl_common::{DeclStatus, DefKind, HirExpr, HirStmt, Symbol, UnknownSymbol};
use whirl_diagnostics::Category;
use whirl_typing::{DataType, PositionedType, Primitive};

use crate::Walker;

fn var_expr(
    leaf: &AstLeaf,
    ty: DataType,
) -> HirExpr {
    HirExpr::Var {
        name: leaf.value.clone(),
        ty,
        span: leaf.span,
    }
}

impl Walker {
    /// Walks an expression, delegating type synthesis to the solver: leaves
    /// yield concrete types (or constrained unknowns for untyped literals),
    /// composites are described through `deduce_*` calls.
    pub(crate) fn walk_expr(
        &mut self,
        node: &AstNode,
    ) -> Option<(HirExpr, DataType)> {
        match node {
            AstNode::Leaf(leaf) => self.walk_leaf_expr(leaf),
            AstNode::Branch(branch) => match branch.kind {
                BranchKind::AccessExpr => self.walk_access_expr(branch),
                BranchKind::AppExpr => self.walk_app_expr(branch),
                BranchKind::OperatorExpr => self.walk_operator_expr(branch),
                BranchKind::Block => self.walk_block(branch),
                _ => {
                    self.log_fatal_def_error(
                        format!("Expected an expression, found `{:?}`", branch.kind),
                        Category::Usage,
                        branch.span,
                    );
                    None
                },
            },
        }
    }

    fn walk_leaf_expr(
        &mut self,
        leaf: &AstLeaf,
    ) -> Option<(HirExpr, DataType)> {
        let ty = match leaf.kind {
            LeafKind::IntLit => {
                let constraints = self.int_literal_constraints();
                DataType::Unknown(self.solver.create_unknown(leaf.span, constraints))
            },
            LeafKind::StrLit => DataType::Primitive(Primitive::Str),
            LeafKind::BoolLit => DataType::Primitive(Primitive::Bool),
            LeafKind::Identifier => return self.walk_identifier_expr(leaf),
            _ => {
                self.log_fatal_def_error(
                    format!("Expected an expression, found `{:?}`", leaf.kind),
                    Category::Usage,
                    leaf.span,
                );
                return None;
            },
        };
        Some((
            HirExpr::Literal {
                value: leaf.value.clone(),
                ty:    ty.clone(),
                span:  leaf.span,
            },
            ty,
        ))
    }

    fn walk_identifier_expr(
        &mut self,
        leaf: &AstLeaf,
    ) -> Option<(HirExpr, DataType)> {
        for scope in self.scope_stack.iter().rev() {
            if let Some(symbol) = scope.get(&*leaf.value) {
                let ty = symbol.ty.clone();
                return Some((var_expr(leaf, ty.clone()), ty));
            }
        }
        // recursive reference to the definition being walked, whose symbol
        // has not landed yet
        if self.current_def_name.as_deref() == Some(&*leaf.value) {
            if let Some(ty) = self.current_def_type.clone() {
                return Some((var_expr(leaf, ty.clone()), ty));
            }
        }
        if let Some(symbol) = self.file_or_global_lookup(&leaf.value) {
            return self.value_symbol(symbol, leaf);
        }
        if self.resolving {
            let unknown = match self.src_file.pending_import(&leaf.value) {
                Some(pending) => UnknownSymbol::explicit(leaf.value.clone(), leaf.span, pending.package),
                None => UnknownSymbol::local(leaf.value.clone(), leaf.span),
            };
            self.unknowns.insert(leaf.value.clone(), unknown);
            return None;
        }
        self.log_undefined(&leaf.value, leaf.span);
        None
    }

    fn value_symbol(
        &mut self,
        symbol: Symbol,
        leaf: &AstLeaf,
    ) -> Option<(HirExpr, DataType)> {
        match symbol.def_kind {
            DefKind::ValueDef | DefKind::AlgebraicVariant => {
                if self.decl_status == DeclStatus::Exported && !symbol.visible_externally() {
                    self.log_fatal_def_error(
                        format!("Symbol `{}` must be exported to be used in an exported definition", symbol.name),
                        Category::Usage,
                        leaf.span,
                    );
                    return None;
                }
                let ty = symbol.ty.clone();
                Some((var_expr(leaf, ty.clone()), ty))
            },
            DefKind::TypeDef | DefKind::Package => {
                self.log_fatal_def_error(
                    format!("Symbol `{}` cannot be used as a value", symbol.name),
                    Category::Usage,
                    leaf.span,
                );
                None
            },
        }
    }

    fn walk_access_expr(
        &mut self,
        branch: &AstBranch,
    ) -> Option<(HirExpr, DataType)> {
        let root = branch.leaf_at(0);
        let accessed = branch.leaf_at(1);

        if self.decl_status == DeclStatus::Exported {
            self.log_fatal_def_error(
                "Unable to use implicitly imported symbol in exported definition".into(),
                Category::Usage,
                accessed.span,
            );
            return None;
        }
        let Some(pkg) = self.src_file.visible_package(&root.value) else {
            self.log_fatal_def_error(format!("Package `{}` is not defined", root.value), Category::Name, root.span);
            return None;
        };
        if let Some(symbol) = pkg.import_from_namespace(&accessed.value) {
            return self.value_symbol(symbol, accessed);
        }
        if self.resolving {
            self.unknowns.insert(
                accessed.value.clone(),
                UnknownSymbol::implicit(accessed.value.clone(), accessed.span, pkg),
            );
            return None;
        }
        self.log_not_visible_in_package(&accessed.value, &pkg.name(), accessed.span);
        None
    }

    fn walk_app_expr(
        &mut self,
        branch: &AstBranch,
    ) -> Option<(HirExpr, DataType)> {
        let callee_node = branch.content.first()?;
        let (callee_hir, callee_ty) = self.walk_expr(callee_node)?;
        let func = match callee_ty.resolved() {
            DataType::Func(func) => func,
            other => {
                self.log_fatal_def_error(format!("`{other}` is not callable"), Category::Usage, callee_node.span());
                return None;
            },
        };

        let positional: Vec<_> = func.args.iter().filter(|a| !a.indefinite).collect();
        let has_indefinite = func.args.iter().any(|a| a.indefinite);

        let mut named: BTreeMap<Rc<str>, PositionedType> = BTreeMap::new();
        let mut indef_args: Vec<PositionedType> = Vec::new();
        let mut arg_hirs = Vec::new();
        let mut next_positional = 0;

        for arg_node in &branch.content[1..] {
            let named_arg = arg_node.as_branch().filter(|b| b.kind == BranchKind::NamedArg);
            if let Some(named_arg) = named_arg {
                let arg_name = named_arg.leaf_at(0);
                let (hir, ty) = self.walk_expr(&named_arg.content[1])?;
                let pt = PositionedType::new(ty, hir.span());
                if !positional.iter().any(|a| a.name == arg_name.value) {
                    self.log_error(
                        format!("Function has no argument named `{}`", arg_name.value),
                        Category::Usage,
                        arg_name.span,
                    );
                } else if named.insert(arg_name.value.clone(), pt).is_some() {
                    self.log_error(format!("Multiple arguments named `{}`", arg_name.value), Category::Name, arg_name.span);
                }
                arg_hirs.push(hir);
            } else {
                let (hir, ty) = self.walk_expr(arg_node)?;
                let pt = PositionedType::new(ty, hir.span());
                while next_positional < positional.len() && named.contains_key(&positional[next_positional].name) {
                    next_positional += 1;
                }
                if next_positional < positional.len() {
                    named.insert(positional[next_positional].name.clone(), pt);
                    next_positional += 1;
                } else if has_indefinite {
                    indef_args.push(pt);
                }
                // extras without an indefinite argument fall into the count
                // check below
                arg_hirs.push(hir);
            }
        }

        let provided = branch.content.len() - 1;
        if named.len() < positional.len() || (!has_indefinite && provided > positional.len()) {
            self.log_error(
                format!("Function expects {} arguments but received {}", positional.len(), provided),
                Category::Usage,
                branch.span,
            );
        }

        let (ty, _ok) = self.solver.deduce_app(&func, &named, &indef_args, branch.span);
        Some((
            HirExpr::Call {
                callee: Box::new(callee_hir),
                args:   arg_hirs,
                ty:     ty.clone(),
                span:   branch.span,
            },
            ty,
        ))
    }

    fn walk_operator_expr(
        &mut self,
        branch: &AstBranch,
    ) -> Option<(HirExpr, DataType)> {
        let (lhs_hir, lhs_ty) = self.walk_expr(&branch.content[0])?;
        let op = branch.leaf_at(1);
        let (rhs_hir, rhs_ty) = self.walk_expr(&branch.content[2])?;

        let (ty, _ok) = self.solver.deduce_operator(
            op.value.clone(),
            PositionedType::new(lhs_ty, lhs_hir.span()),
            PositionedType::new(rhs_ty, rhs_hir.span()),
            branch.span,
        );
        Some((
            HirExpr::Oper {
                op:   op.value.clone(),
                lhs:  Box::new(lhs_hir),
                rhs:  Box::new(rhs_hir),
                ty:   ty.clone(),
                span: branch.span,
            },
            ty,
        ))
    }

    /// Walks a block: every statement finishes its own equation, and at the
    /// end of the block the solver gets a chance to reconcile whatever is
    /// left. The final non-statement expression is the block's value; its
    /// equation is left open for the enclosing context to close.
    fn walk_block(
        &mut self,
        branch: &AstBranch,
    ) -> Option<(HirExpr, DataType)> {
        self.with_scope(|w| {
            let mut stmts = Vec::new();
            let mut value: Option<(HirExpr, DataType)> = None;
            let last = branch.content.len().saturating_sub(1);

            for (ix, node) in branch.content.iter().enumerate() {
                let var_decl = node.as_branch().filter(|b| b.kind == BranchKind::VarDecl);
                if let Some(decl) = var_decl {
                    let name = decl.leaf_at(0);
                    let init_node = decl.content.last()?;
                    let (init_hir, init_ty) = w.walk_expr(init_node)?;
                    w.solver.finish_expr(init_ty.clone());
                    let var_ty = match decl.find_branch(BranchKind::TypeExt) {
                        Some(ext) => {
                            let declared = w.walk_type_ext(ext)?;
                            w.solver.solve_expr(declared.clone());
                            declared
                        },
                        None => {
                            w.solver.finish_eqn();
                            init_ty
                        },
                    };
                    w.declare_local(Symbol::new(
                        name.value.clone(),
                        var_ty.clone(),
                        DefKind::ValueDef,
                        DeclStatus::Internal,
                        name.span,
                    ));
                    stmts.push(HirStmt::VarDecl {
                        name: name.value.clone(),
                        ty:   var_ty,
                        init: init_hir,
                    });
                } else if ix == last {
                    value = Some(w.walk_expr(node)?);
                } else {
                    let (hir, ty) = w.walk_expr(node)?;
                    w.solver.finish_expr(ty);
                    w.solver.finish_eqn();
                    stmts.push(HirStmt::Expr(hir));
                }
            }

            let (value, ty) = match value {
                Some((hir, ty)) => (Some(Box::new(hir)), ty),
                None => (None, DataType::Primitive(Primitive::Unit)),
            };
            Some((
                HirExpr::Block {
                    stmts,
                    value,
                    ty: ty.clone(),
                    span: branch.span,
                },
                ty,
            ))
        })
    }
}
