use std::{collections::BTreeMap, rc::Rc};

use whirl_ast::{AstBranch, AstLeaf, BranchKind, LeafKind};
use whirl_common::{DeclStatus, DefKind, UnknownSymbol};
use whirl_diagnostics::Category;
use whirl_typing::{AlgebraicType, AlgebraicVariant, DataType, StructType};
use whirl_utils::Span;

use crate::Walker;

impl Walker {
    /// Walks a type label and extracts its data type. Returns `None` after
    /// recording an unknown (while resolving) or logging a fatal definition
    /// error.
    pub(crate) fn walk_type_label(
        &mut self,
        label: &AstBranch,
    ) -> Option<DataType> {
        match label.kind {
            BranchKind::NamedType => {
                if let Some(args) = label.find_branch(BranchKind::TypeList) {
                    // TODO: apply generic arguments once parametric type defs land
                    self.walk_type_list(args)?;
                }
                let mut idents = label.leaves().filter(|l| l.kind == LeafKind::Identifier);
                let Some(root) = idents.next() else {
                    self.log_fatal_def_error("Type label is missing a name".into(), Category::Usage, label.span);
                    return None;
                };
                let accessed = idents.next();
                self.walk_named_type_core(root, accessed)
            },
            BranchKind::TypeList => Some(DataType::Tuple(self.walk_type_list(label)?)),
            BranchKind::RefType => {
                self.ref_depth += 1;
                let inner = self.walk_type_label(label.branch_at(0));
                self.ref_depth -= 1;
                Some(DataType::Ref(Box::new(inner?)))
            },
            BranchKind::StructType => self.walk_struct_type(label),
            BranchKind::AlgType => self.walk_alg_type(label),
            _ => {
                self.log_fatal_def_error(
                    format!("Expected a type label, found `{:?}`", label.kind),
                    Category::Usage,
                    label.span,
                );
                None
            },
        }
    }

    /// Walks a `type_list` node, or any node composed of evenly spaced type
    /// labels.
    pub(crate) fn walk_type_list(
        &mut self,
        list: &AstBranch,
    ) -> Option<Vec<DataType>> {
        let mut types = Vec::with_capacity(list.len());
        for item in list.branches() {
            types.push(self.walk_type_label(item)?);
        }
        Some(types)
    }

    /// Walks a type extension (`: type` on a variable declaration) and
    /// returns the label.
    pub(crate) fn walk_type_ext(
        &mut self,
        ext: &AstBranch,
    ) -> Option<DataType> {
        self.walk_type_label(ext.branch_at(0))
    }

    /// Walks and accesses the named data type at the core of a `named_type`
    /// node. Generic parameters shadow everything; a name matching the
    /// definition being walked resolves to its prototype; otherwise the
    /// lookup chain runs, falling back to the shared opaque slot and then to
    /// an unknown while resolution is still active.
    pub(crate) fn walk_named_type_core(
        &mut self,
        root: &AstLeaf,
        accessed: Option<&AstLeaf>,
    ) -> Option<DataType> {
        if accessed.is_none() {
            if let Some(wildcard) = self.lookup_generic(&root.value) {
                return Some(DataType::Wildcard(wildcard));
            }
            if self.self_type.is_some() && self.current_def_name.as_deref() == Some(&*root.value) {
                if self.self_type_requires_ref && self.ref_depth == 0 {
                    self.log_fatal_def_error(
                        format!("Self-referential type `{}` must be behind a reference", root.value),
                        Category::Usage,
                        root.span,
                    );
                    return None;
                }
                self.self_type_used = true;
                return self.self_type.clone();
            }
        }

        let Some(accessed) = accessed else {
            if let Some(symbol) = self.lookup(&root.value) {
                if symbol.def_kind != DefKind::TypeDef {
                    self.log_fatal_def_error(format!("Symbol `{}` is not a type", symbol.name), Category::Usage, root.span);
                    return None;
                }
                if self.decl_status == DeclStatus::Exported && !symbol.visible_externally() {
                    self.log_fatal_def_error(
                        format!("Symbol `{}` must be exported to be used in an exported definition", symbol.name),
                        Category::Usage,
                        root.span,
                    );
                    return None;
                }
                return Some(symbol.ty);
            }
            if self.resolving {
                if let Some(ty) = self.opaque_slot_lookup(&root.value, None) {
                    return Some(ty);
                }
                if let Some(pending) = self.src_file.pending_import(&root.value) {
                    // the awaited definition may be the current candidate in
                    // its home package
                    if let Some(ty) = self.opaque_slot_lookup(&root.value, Some(pending.package.id())) {
                        return Some(ty);
                    }
                    // otherwise the miss is charged to the package the
                    // import named
                    self.unknowns.insert(
                        root.value.clone(),
                        UnknownSymbol::explicit(root.value.clone(), root.span, pending.package),
                    );
                    return None;
                }
                self.unknowns
                    .insert(root.value.clone(), UnknownSymbol::local(root.value.clone(), root.span));
                return None;
            }
            self.log_undefined(&root.value, root.span);
            return None;
        };

        // implicit imports cannot cross an export boundary
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
            if symbol.def_kind != DefKind::TypeDef {
                self.log_fatal_def_error(format!("Symbol `{}` is not a type", symbol.name), Category::Usage, accessed.span);
                return None;
            }
            return Some(symbol.ty);
        }
        if self.resolving {
            // opaque symbols may live in the other package while it resolves
            if let Some(ty) = self.opaque_slot_lookup(&accessed.value, Some(pkg.id())) {
                return Some(ty);
            }
            self.unknowns.insert(
                accessed.value.clone(),
                UnknownSymbol::implicit(accessed.value.clone(), accessed.span, pkg),
            );
            return None;
        }
        self.log_not_visible_in_package(&accessed.value, &pkg.name(), accessed.span);
        None
    }

    /// The current candidate's prototype type, if the slot holds `name` from
    /// the expected package (this package for plain references).
    fn opaque_slot_lookup(
        &self,
        name: &str,
        package: Option<whirl_utils::PackageId>,
    ) -> Option<DataType> {
        let expected = package.unwrap_or_else(|| self.src_package.id());
        self.opaque_slot.lookup_current(name, expected)
    }

    fn walk_struct_type(
        &mut self,
        label: &AstBranch,
    ) -> Option<DataType> {
        let name = self.current_def_name.clone().unwrap_or_else(|| Rc::from("struct"));
        let mut seen: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        let mut fields = Vec::new();
        for field in label.branches() {
            let field_name = field.leaf_at(0);
            if seen.insert(field_name.value.clone(), field_name.span).is_some() {
                self.log_fatal_def_error(
                    format!("Multiple fields named `{}`", field_name.value),
                    Category::Name,
                    field_name.span,
                );
                return None;
            }
            let field_ty = self.walk_type_label(field.branch_at(1))?;
            fields.push((field_name.value.clone(), field_ty));
        }
        Some(DataType::Struct(Rc::new(StructType {
            name,
            fields,
            packed: self.has_flag("packed"),
        })))
    }

    fn walk_alg_type(
        &mut self,
        label: &AstBranch,
    ) -> Option<DataType> {
        let name = self.current_def_name.clone().unwrap_or_else(|| Rc::from("algebraic"));
        let mut seen: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        let mut variants = Vec::new();
        for variant in label.branches() {
            let variant_name = variant.leaf_at(0);
            if seen.insert(variant_name.value.clone(), variant_name.span).is_some() {
                self.log_fatal_def_error(
                    format!("Multiple variants named `{}`", variant_name.value),
                    Category::Name,
                    variant_name.span,
                );
                return None;
            }
            let fields = match variant.find_branch(BranchKind::TypeList) {
                Some(list) => self.walk_type_list(list)?,
                None => Vec::new(),
            };
            variants.push(AlgebraicVariant {
                name: variant_name.value.clone(),
                fields,
            });
        }
        Some(DataType::Algebraic(Rc::new(AlgebraicType { name, variants })))
    }
}
