use std::{collections::BTreeMap, rc::Rc};

use whirl_ast::{AstBranch, AstLeaf, AstNode, BranchKind};
use whirl_common::{DeclStatus, DefKind, HirNode, Symbol};
use whirl_diagnostics::Category;
use whirl_typing::{DataType, FuncArg, FuncType, InterfType, OpaqueType, WildcardType};
use whirl_utils::Span;

use crate::Walker;

/// The parsed-out front matter of a definition branch: leading annotations
/// are consumed into the walker, then the name, optional generic parameter
/// list, and whatever the definition kind puts after them.
struct DefHeader<'a> {
    name:     &'a AstLeaf,
    generics: Option<&'a AstBranch>,
    rest:     &'a [AstNode],
}

impl Walker {
    fn def_header<'a>(
        &mut self,
        branch: &'a AstBranch,
    ) -> Option<DefHeader<'a>> {
        let mut ix = 0;
        while let Some(annotation) = branch
            .content
            .get(ix)
            .and_then(AstNode::as_branch)
            .filter(|b| b.kind == BranchKind::Annotation)
        {
            let name = annotation.leaf_at(0).value.clone();
            let value = annotation.content.get(1).and_then(AstNode::as_leaf).map(|l| l.value.clone());
            self.annotations.insert(name, value);
            ix += 1;
        }

        let Some(name) = branch.content.get(ix).and_then(AstNode::as_leaf) else {
            self.log_fatal_def_error("Definition is missing a name".into(), Category::Name, branch.span);
            return None;
        };
        ix += 1;

        let generics = branch
            .content
            .get(ix)
            .and_then(AstNode::as_branch)
            .filter(|b| b.kind == BranchKind::IdentifierList);
        if generics.is_some() {
            ix += 1;
        }

        Some(DefHeader {
            name,
            generics,
            rest: &branch.content[ix..],
        })
    }

    fn install_generics(
        &mut self,
        list: &AstBranch,
        interf_head: bool,
    ) -> Option<()> {
        let mut seen: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        for leaf in list.leaves() {
            if seen.insert(leaf.value.clone(), leaf.span).is_some() {
                self.log_fatal_def_error(
                    format!("Multiple generic parameters named `{}`", leaf.value),
                    Category::Name,
                    leaf.span,
                );
                return None;
            }
            let wildcard = Rc::new(WildcardType { name: leaf.value.clone() });
            if interf_head {
                self.interf_generic_ctx.push(wildcard);
            } else {
                self.generic_ctx.push(wildcard);
            }
        }
        Some(())
    }

    /// The prototype this definition must complete — the one the resolver
    /// handed out for it, if any, so references bound earlier keep their
    /// identity — or a fresh one for local self references.
    fn take_prototype(
        &self,
        name: &Rc<str>,
    ) -> Rc<OpaqueType> {
        self.opaque_slot
            .prototype_for(name, self.src_package.id())
            .unwrap_or_else(|| OpaqueType::new(name.clone()))
    }

    pub(crate) fn walk_type_def(
        &mut self,
        branch: &AstBranch,
        redeclare: bool,
    ) -> Option<HirNode> {
        let header = self.def_header(branch)?;
        let name = header.name.value.clone();
        let name_span = header.name.span;
        self.current_def_name = Some(name.clone());
        if let Some(generics) = header.generics {
            self.install_generics(generics, false)?;
        }

        let Some(body) = header.rest.first().and_then(AstNode::as_branch) else {
            self.log_fatal_def_error(format!("Type `{name}` is missing a body"), Category::Usage, branch.span);
            return None;
        };

        let proto = self.take_prototype(&name);
        self.self_type = Some(DataType::Opaque(proto.clone()));
        self.self_type_requires_ref = true;

        let body_ty = self.walk_type_label(body)?;

        // the definition's identity IS its prototype: anything that bound
        // through the slot (or through a self reference) sees the body land
        // here
        proto.complete(body_ty.clone());
        let ty = DataType::Opaque(proto);

        let symbol = Symbol::new(name.clone(), ty.clone(), DefKind::TypeDef, self.decl_status, name_span);
        if !self.define(symbol, redeclare) {
            return None;
        }

        tracing::trace!(name = %name, recursive = self.self_type_used, "type definition complete");

        if let DataType::Algebraic(alg) = &body_ty {
            for variant in &alg.variants {
                let symbol = Symbol::new(
                    variant.name.clone(),
                    ty.clone(),
                    DefKind::AlgebraicVariant,
                    self.decl_status,
                    name_span,
                );
                if !self.define(symbol, redeclare) {
                    return None;
                }
            }
        }

        // the full definition is in; the prototype's slot lifetime ends here
        self.opaque_slot.finish(&name, self.src_package.id());

        Some(HirNode::TypeDef { name, ty })
    }

    pub(crate) fn walk_func_def(
        &mut self,
        branch: &AstBranch,
        redeclare: bool,
    ) -> Option<HirNode> {
        let header = self.def_header(branch)?;
        let name = header.name.value.clone();
        let name_span = header.name.span;
        self.current_def_name = Some(name.clone());
        if let Some(generics) = header.generics {
            self.install_generics(generics, false)?;
        }

        let mut rest = header.rest.iter();
        let args_decl = match rest.next().and_then(AstNode::as_branch) {
            Some(b) if b.kind == BranchKind::ArgsDecl => b,
            _ => {
                self.log_fatal_def_error(format!("Function `{name}` is missing its arguments"), Category::Usage, branch.span);
                return None;
            },
        };
        let Some(ret_label) = rest.next().and_then(AstNode::as_branch) else {
            self.log_fatal_def_error(format!("Function `{name}` is missing a return type"), Category::Usage, branch.span);
            return None;
        };
        let body_node = rest.next();

        let args = self.walk_args_decl(args_decl)?;
        let ret = self.walk_type_label(ret_label)?;
        let func = Rc::new(FuncType { args, ret });
        self.current_def_type = Some(DataType::Func(func.clone()));

        // declared before the body is walked so recursive and mutually
        // recursive calls resolve
        let symbol = Symbol::new(
            name.clone(),
            DataType::Func(func.clone()),
            DefKind::ValueDef,
            self.decl_status,
            name_span,
        );
        if !self.define(symbol, redeclare) {
            return None;
        }

        let body = match body_node {
            Some(node) => {
                let walked = self.with_scope(|w| {
                    for arg in &func.args {
                        w.declare_local(Symbol::new(
                            arg.name.clone(),
                            arg.ty.clone(),
                            DefKind::ValueDef,
                            DeclStatus::Internal,
                            name_span,
                        ));
                    }
                    w.walk_expr(node)
                });
                let (hir, ty) = walked?;
                self.solver.finish_expr(ty);
                self.solver.solve_expr(func.ret.clone());
                self.solver.solve_all();
                Some(hir)
            },
            None => None,
        };

        Some(HirNode::FuncDef { name, ty: func, body })
    }

    pub(crate) fn walk_interf_def(
        &mut self,
        branch: &AstBranch,
        redeclare: bool,
    ) -> Option<HirNode> {
        let header = self.def_header(branch)?;
        let name = header.name.value.clone();
        let name_span = header.name.span;
        self.current_def_name = Some(name.clone());
        // interface-head generics live in their own context so generic
        // methods don't conflate with them
        if let Some(generics) = header.generics {
            self.install_generics(generics, true)?;
        }

        let proto = self.take_prototype(&name);
        self.self_type = Some(DataType::Opaque(proto.clone()));
        self.self_type_requires_ref = false;

        let mut seen: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        let mut methods: Vec<(Rc<str>, Rc<FuncType>)> = Vec::new();
        let rest: Vec<&AstBranch> = header.rest.iter().filter_map(AstNode::as_branch).collect();
        for method in rest {
            if method.kind != BranchKind::FuncDef {
                self.log_fatal_def_error(
                    format!("Interface `{name}` may only contain method signatures"),
                    Category::Usage,
                    method.span,
                );
                return None;
            }
            let mh = self.def_header(method)?;
            let method_name = mh.name.value.clone();
            if seen.insert(method_name.clone(), mh.name.span).is_some() {
                self.log_fatal_def_error(format!("Multiple methods named `{method_name}`"), Category::Name, mh.name.span);
                return None;
            }
            if let Some(generics) = mh.generics {
                self.install_generics(generics, false)?;
            }
            let mut mrest = mh.rest.iter();
            let args_decl = match mrest.next().and_then(AstNode::as_branch) {
                Some(b) if b.kind == BranchKind::ArgsDecl => b,
                _ => {
                    self.log_fatal_def_error(format!("Method `{method_name}` is missing its arguments"), Category::Usage, method.span);
                    return None;
                },
            };
            let Some(ret_label) = mrest.next().and_then(AstNode::as_branch) else {
                self.log_fatal_def_error(format!("Method `{method_name}` is missing a return type"), Category::Usage, method.span);
                return None;
            };
            let args = self.walk_args_decl(args_decl)?;
            let ret = self.walk_type_label(ret_label)?;
            methods.push((method_name, Rc::new(FuncType { args, ret })));
            self.generic_ctx.clear();
        }

        // the head context folds into the regular one before this returns
        self.generic_ctx.append(&mut self.interf_generic_ctx);

        let interf = Rc::new(InterfType { name: name.clone(), methods });
        proto.complete(DataType::Interf(interf.clone()));
        let ty = DataType::Opaque(proto);

        let symbol = Symbol::new(name.clone(), ty, DefKind::TypeDef, self.decl_status, name_span);
        if !self.define(symbol, redeclare) {
            return None;
        }

        self.opaque_slot.finish(&name, self.src_package.id());

        Some(HirNode::InterfDef { name, ty: interf })
    }

    pub(crate) fn walk_bind_def(
        &mut self,
        branch: &AstBranch,
    ) -> Option<HirNode> {
        let interf_label = branch.branch_at(0);
        let target_label = branch.branch_at(1);
        let interf_ty = self.walk_type_label(interf_label)?;
        let target_ty = self.walk_type_label(target_label)?;

        let Some(interf) = interf_of(&interf_ty) else {
            self.log_fatal_def_error(format!("`{interf_ty}` is not an interface"), Category::Usage, interf_label.span);
            return None;
        };

        self.src_package.global_bindings.add(target_ty.clone(), interf.clone());
        Some(HirNode::Binding {
            interf,
            bound: target_ty,
        })
    }

    fn walk_args_decl(
        &mut self,
        branch: &AstBranch,
    ) -> Option<Vec<FuncArg>> {
        let mut seen: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        let mut args = Vec::new();
        for arg in branch.branches() {
            let name = arg.leaf_at(0);
            if seen.insert(name.value.clone(), name.span).is_some() {
                self.log_fatal_def_error(format!("Multiple arguments named `{}`", name.value), Category::Name, name.span);
                return None;
            }
            let ty = self.walk_type_label(arg.branch_at(1))?;
            let indefinite = arg.leaves().any(|l| l.kind == whirl_ast::LeafKind::Ellipsis);
            args.push(FuncArg {
                name: name.value.clone(),
                ty,
                indefinite,
            });
        }
        Some(args)
    }
}

/// The interface behind a type-position result, seeing through completed
/// prototypes.
pub(crate) fn interf_of(ty: &DataType) -> Option<Rc<InterfType>> {
    match ty.resolved() {
        DataType::Interf(interf) => Some(interf),
        DataType::Opaque(opaque) => opaque.body().as_ref().and_then(interf_of),
        _ => None,
    }
}
