use std::{collections::BTreeMap, path::Path, rc::Rc};

use whirl_ast::AstBranch;
use whirl_common::{DeclStatus, File, Package, SharedOpaqueSlot, Symbol, UnknownSymbol};
use whirl_diagnostics::{Category, LogContext, SharedSink};
use whirl_typing::{DataType, Primitive, Solver, WildcardType};
use whirl_utils::Span;

/// What walking one top-level definition produced.
pub enum WalkDefOutcome {
    /// The definition is complete; its HIR node goes on the file root.
    Complete(whirl_common::HirNode),
    /// Forward references were hit; the definition re-enters the queue with
    /// the names it is waiting on.
    Deferred(BTreeMap<Rc<str>, UnknownSymbol>),
    /// A fatal definition error was logged; nothing is emitted or queued.
    Failed,
}

/// Walks the AST of one file, validating definitions and translating them
/// into HIR. Owns the file's type solver.
pub struct Walker {
    pub(crate) src_package: Rc<Package>,
    pub(crate) src_file:    Rc<File>,
    pub(crate) context:     LogContext,
    pub(crate) sink:        SharedSink,
    pub(crate) solver:      Solver,

    /// Declaration status of the definition being walked; `Internal` unless
    /// the assembler is inside an export block.
    pub(crate) decl_status: DeclStatus,

    /// Whether the package containing this file is still being resolved.
    pub(crate) resolving: bool,

    /// The shared single-slot prototype of whichever definition the resolver
    /// is currently re-walking.
    pub(crate) opaque_slot: SharedOpaqueSlot,

    /// Generic parameters of the surrounding definition or method.
    pub(crate) generic_ctx: Vec<Rc<WildcardType>>,
    /// Generic parameters of an interface head; kept apart from
    /// `generic_ctx` so generic methods and generic interfaces don't
    /// conflate.
    pub(crate) interf_generic_ctx: Vec<Rc<WildcardType>>,

    /// Annotations active on the current definition.
    pub(crate) annotations: BTreeMap<Rc<str>, Option<Rc<str>>>,

    /// The type currently being defined, for self references.
    pub(crate) self_type: Option<DataType>,
    /// Whether the current definition referenced its own type; marks the
    /// definition as recursive. Method bodies on concrete types are not part
    /// of the definition surface, so no unused-`self` diagnostic hangs off
    /// this flag.
    pub(crate) self_type_used: bool,
    /// Whether self references must sit behind a reference (value types).
    pub(crate) self_type_requires_ref: bool,
    /// Reference-type nesting depth while walking a type label.
    pub(crate) ref_depth: usize,

    pub(crate) current_def_name: Option<Rc<str>>,
    /// The under-construction type of the current definition, for recursive
    /// value references before the symbol lands in the global table.
    pub(crate) current_def_type: Option<DataType>,

    /// Local scopes of the function body being walked; popped contents are
    /// gone for good.
    pub(crate) scope_stack: Vec<BTreeMap<Rc<str>, Symbol>>,

    /// Unresolved names hit while walking the current definition.
    pub(crate) unknowns: BTreeMap<Rc<str>, UnknownSymbol>,
    pub(crate) fatal_def_error: bool,

    /// Cached `int`/`uint`, loaded from the global table once resolution
    /// ends; their widths depend on the target architecture.
    pub(crate) int_type:  Option<DataType>,
    pub(crate) uint_type: Option<DataType>,
}

impl Walker {
    pub fn new(
        pkg: Rc<Package>,
        file: Rc<File>,
        fpath: &Path,
        opaque_slot: SharedOpaqueSlot,
        sink: SharedSink,
    ) -> Self {
        let context = LogContext::new(pkg.id(), fpath);
        let solver = Solver::new(
            sink.clone(),
            context.clone(),
            file.local_bindings.clone(),
            pkg.global_bindings.clone(),
        );
        Self {
            src_package: pkg,
            src_file: file,
            context,
            sink,
            solver,
            decl_status: DeclStatus::Internal,
            // packages start out in resolution
            resolving: true,
            opaque_slot,
            generic_ctx: Vec::new(),
            interf_generic_ctx: Vec::new(),
            annotations: BTreeMap::new(),
            self_type: None,
            self_type_used: false,
            self_type_requires_ref: false,
            ref_depth: 0,
            current_def_name: None,
            current_def_type: None,
            scope_stack: Vec::new(),
            unknowns: BTreeMap::new(),
            fatal_def_error: false,
            int_type: None,
            uint_type: None,
        }
    }

    /// Tells the walker that resolution has finished. Only then are `int`
    /// and `uint` cached; if either is missing the whole compilation is
    /// beyond saving.
    pub fn resolution_done(&mut self) {
        self.resolving = false;
        if !self.sink.should_proceed() {
            return;
        }
        match self.file_or_global_lookup("int") {
            Some(symbol) => self.int_type = Some(symbol.ty),
            None => self.sink.log_fatal("Missing definition for `int`"),
        }
        match self.file_or_global_lookup("uint") {
            Some(symbol) => self.uint_type = Some(symbol.ty),
            None => self.sink.log_fatal("Missing definition for `uint`"),
        }
    }

    pub fn src_file(&self) -> &Rc<File> {
        &self.src_file
    }

    // ------------------------------------------------------------------
    // lookups

    /// Full lookup chain: local scopes, then the file's local table, then
    /// the package's global table.
    pub(crate) fn lookup(
        &self,
        name: &str,
    ) -> Option<Symbol> {
        for scope in self.scope_stack.iter().rev() {
            if let Some(symbol) = scope.get(name) {
                return Some(symbol.clone());
            }
        }
        self.file_or_global_lookup(name)
    }

    /// Lookup skipping local scopes: file table shadows the global table.
    pub(crate) fn file_or_global_lookup(
        &self,
        name: &str,
    ) -> Option<Symbol> {
        self.src_file
            .local_lookup(name)
            .or_else(|| self.src_package.global_lookup(name))
    }

    /// A generic parameter of the surrounding definition, if one is in
    /// scope under this name.
    pub(crate) fn lookup_generic(
        &self,
        name: &str,
    ) -> Option<Rc<WildcardType>> {
        self.generic_ctx
            .iter()
            .chain(self.interf_generic_ctx.iter())
            .find(|w| &*w.name == name)
            .cloned()
    }

    /// Declares a definition in the package's global table. `redeclare` is
    /// set when the resolver re-walks a queued definition whose symbol may
    /// already have landed on an earlier pass.
    pub(crate) fn define(
        &mut self,
        symbol: Symbol,
        redeclare: bool,
    ) -> bool {
        if redeclare {
            self.src_package.redefine_global(symbol);
            return true;
        }
        let span = symbol.span;
        let name = symbol.name.clone();
        if self.src_package.define_global(symbol).is_err() {
            self.log_fatal_def_error(format!("Symbol `{name}` defined multiple times"), Category::Name, span);
            return false;
        }
        true
    }

    pub(crate) fn declare_local(
        &mut self,
        symbol: Symbol,
    ) -> bool {
        let duplicate = self
            .scope_stack
            .last()
            .is_some_and(|scope| scope.contains_key(&symbol.name));
        if duplicate {
            self.log_error(format!("Multiple variables named `{}`", symbol.name), Category::Name, symbol.span);
            return false;
        }
        self.scope_stack
            .last_mut()
            .expect("local declarations only happen inside a scope")
            .insert(symbol.name.clone(), symbol);
        true
    }

    pub(crate) fn with_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        self.scope_stack.push(BTreeMap::new());
        let result = f(self);
        self.scope_stack.pop();
        result
    }

    // ------------------------------------------------------------------
    // annotations

    pub(crate) fn has_flag(
        &self,
        flag: &str,
    ) -> bool {
        self.annotations.contains_key(flag)
    }

    // ------------------------------------------------------------------
    // numeric literals

    /// The admissible types for an integer literal: the target-width `int`
    /// and `uint`, preferring the cached copies once resolution is over.
    pub(crate) fn int_literal_constraints(&self) -> Vec<DataType> {
        let int = self
            .int_type
            .clone()
            .or_else(|| self.file_or_global_lookup("int").map(|s| s.ty))
            .unwrap_or(DataType::Primitive(Primitive::I64));
        let uint = self
            .uint_type
            .clone()
            .or_else(|| self.file_or_global_lookup("uint").map(|s| s.ty))
            .unwrap_or(DataType::Primitive(Primitive::U64));
        vec![int, uint]
    }

    // ------------------------------------------------------------------
    // error logging

    pub(crate) fn log_error(
        &self,
        message: String,
        category: Category,
        span: Span,
    ) {
        self.sink.log_error_in(&self.context, message, category, span);
    }

    /// Logs an error that makes the current definition unusable.
    pub(crate) fn log_fatal_def_error(
        &mut self,
        message: String,
        category: Category,
        span: Span,
    ) {
        self.fatal_def_error = true;
        self.log_error(message, category, span);
    }

    pub fn log_undefined(
        &self,
        name: &str,
        span: Span,
    ) {
        self.log_error(format!("Undefined symbol: `{name}`"), Category::Name, span);
    }

    pub fn log_not_visible_in_package(
        &self,
        name: &str,
        pkg_name: &str,
        span: Span,
    ) {
        self.log_error(
            format!("Symbol `{name}` is not visible in package `{pkg_name}`"),
            Category::Import,
            span,
        );
    }

    // ------------------------------------------------------------------
    // definition walking entry point

    /// Walks one top-level definition. `status` is where the assembler found
    /// it (`Exported` inside export blocks); `redeclare` marks re-walks of
    /// queued definitions.
    pub fn walk_def(
        &mut self,
        branch: &AstBranch,
        status: DeclStatus,
        redeclare: bool,
    ) -> WalkDefOutcome {
        use whirl_ast::BranchKind::*;

        self.unknowns.clear();
        self.fatal_def_error = false;
        self.decl_status = status;
        self.solver.reset();
        self.annotations.clear();
        self.generic_ctx.clear();
        self.interf_generic_ctx.clear();
        self.self_type = None;
        self.self_type_used = false;
        self.self_type_requires_ref = false;

        tracing::trace!(kind = ?branch.kind, "walking definition");

        let node = match branch.kind {
            TypeDef => self.walk_type_def(branch, redeclare),
            FuncDef => self.walk_func_def(branch, redeclare),
            InterfDef => self.walk_interf_def(branch, redeclare),
            BindDef => self.walk_bind_def(branch),
            _ => {
                self.log_fatal_def_error(
                    format!("Unexpected `{:?}` at top level", branch.kind),
                    Category::Usage,
                    branch.span,
                );
                None
            },
        };

        self.current_def_name = None;
        self.current_def_type = None;
        self.self_type = None;

        match node {
            Some(node) => WalkDefOutcome::Complete(node),
            None if !self.fatal_def_error && !self.unknowns.is_empty() => {
                WalkDefOutcome::Deferred(std::mem::take(&mut self.unknowns))
            },
            None => WalkDefOutcome::Failed,
        }
    }
}
