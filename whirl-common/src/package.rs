use std::{
    cell::{Ref, RefCell},
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use whirl_ast::AstBranch;
use whirl_typing::BindingRegistry;
use whirl_utils::{PackageId, SourceId, Span};

use crate::{HirNode, HirRoot, Symbol};

/// An explicitly imported name that was not yet present in the exporting
/// package's global table. Kept per file so resolution can retry it each
/// pass, and so the final unresolved-import error can point at the import
/// statement.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub package:    Rc<Package>,
    pub span:       Span,
    pub reexported: bool,
}

/// A `...` import; swept again on every resolution pass so symbols exported
/// later during a cycle are still picked up.
#[derive(Debug, Clone)]
pub struct WildcardImport {
    pub package:    Rc<Package>,
    pub reexported: bool,
}

/// A source file, member of exactly one package. The AST is released after
/// the initial resolution pass; the HIR root accumulates in its place.
pub struct File {
    pub path:     PathBuf,
    pub source:   SourceId,
    /// Metadata tags honored for conditional compilation.
    pub metadata: BTreeMap<Rc<str>, Rc<str>>,

    ast:              RefCell<Option<AstBranch>>,
    local_table:      RefCell<BTreeMap<Rc<str>, Symbol>>,
    visible_packages: RefCell<BTreeMap<Rc<str>, Rc<Package>>>,
    pending_imports:  RefCell<BTreeMap<Rc<str>, PendingImport>>,
    wildcard_imports: RefCell<Vec<WildcardImport>>,
    root:             RefCell<HirRoot>,

    pub local_bindings: Rc<BindingRegistry>,
}

// cross-package tables make the graph cyclic, so Debug stays shallow
impl std::fmt::Debug for File {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "File({})", self.path.display())
    }
}

impl File {
    pub fn new(
        path: PathBuf,
        source: SourceId,
        ast: AstBranch,
        metadata: BTreeMap<Rc<str>, Rc<str>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            path,
            source,
            metadata,
            ast: RefCell::new(Some(ast)),
            local_table: RefCell::new(BTreeMap::new()),
            visible_packages: RefCell::new(BTreeMap::new()),
            pending_imports: RefCell::new(BTreeMap::new()),
            wildcard_imports: RefCell::new(Vec::new()),
            root: RefCell::new(HirRoot::default()),
            local_bindings: BindingRegistry::new(),
        })
    }

    /// Takes the AST for the initial pass; the slot stays empty afterwards.
    pub fn take_ast(&self) -> Option<AstBranch> {
        self.ast.borrow_mut().take()
    }

    pub fn ast(&self) -> Ref<'_, Option<AstBranch>> {
        self.ast.borrow()
    }

    pub fn ast_released(&self) -> bool {
        self.ast.borrow().is_none()
    }

    pub fn local_lookup(
        &self,
        name: &str,
    ) -> Option<Symbol> {
        self.local_table.borrow().get(name).cloned()
    }

    pub fn insert_local(
        &self,
        symbol: Symbol,
    ) {
        self.local_table.borrow_mut().insert(symbol.name.clone(), symbol);
    }

    pub fn visible_package(
        &self,
        name: &str,
    ) -> Option<Rc<Package>> {
        self.visible_packages.borrow().get(name).cloned()
    }

    pub fn bind_package(
        &self,
        name: Rc<str>,
        package: Rc<Package>,
    ) {
        self.visible_packages.borrow_mut().insert(name, package);
    }

    pub fn add_pending_import(
        &self,
        name: Rc<str>,
        pending: PendingImport,
    ) {
        self.pending_imports.borrow_mut().insert(name, pending);
    }

    pub fn pending_import(
        &self,
        name: &str,
    ) -> Option<PendingImport> {
        self.pending_imports.borrow().get(name).cloned()
    }

    pub fn pending_imports(&self) -> BTreeMap<Rc<str>, PendingImport> {
        self.pending_imports.borrow().clone()
    }

    pub fn remove_pending_import(
        &self,
        name: &str,
    ) -> Option<PendingImport> {
        self.pending_imports.borrow_mut().remove(name)
    }

    pub fn pending_import_count(&self) -> usize {
        self.pending_imports.borrow().len()
    }

    pub fn add_wildcard_import(
        &self,
        wildcard: WildcardImport,
    ) {
        self.wildcard_imports.borrow_mut().push(wildcard);
    }

    pub fn wildcard_imports(&self) -> Vec<WildcardImport> {
        self.wildcard_imports.borrow().clone()
    }

    pub fn add_node(
        &self,
        node: HirNode,
    ) {
        self.root.borrow_mut().nodes.push(node);
    }

    pub fn hir(&self) -> Ref<'_, HirRoot> {
        self.root.borrow()
    }
}

/// A record of everything the owning package imported from one other
/// package.
#[derive(Debug)]
pub struct ImportRecord {
    pub package:  Rc<Package>,
    pub imported: BTreeMap<Rc<str>, Symbol>,
}

/// An addressable compilation unit: a directory of source files sharing a
/// namespace, identified by the hash of its absolute path.
pub struct Package {
    id:       PackageId,
    name:     Rc<str>,
    root_dir: PathBuf,

    files:        RefCell<BTreeMap<PathBuf, Rc<File>>>,
    global_table: RefCell<BTreeMap<Rc<str>, Symbol>>,
    import_table: RefCell<BTreeMap<PackageId, ImportRecord>>,

    pub global_bindings: Rc<BindingRegistry>,
}

impl std::fmt::Debug for Package {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Package({} {})", self.name, self.id)
    }
}

impl Package {
    pub fn new(
        id: PackageId,
        name: Rc<str>,
        root_dir: PathBuf,
    ) -> Rc<Self> {
        Rc::new(Self {
            id,
            name,
            root_dir,
            files: RefCell::new(BTreeMap::new()),
            global_table: RefCell::new(BTreeMap::new()),
            import_table: RefCell::new(BTreeMap::new()),
            global_bindings: BindingRegistry::new(),
        })
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    pub fn name(&self) -> Rc<str> {
        self.name.clone()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn add_file(
        &self,
        file: Rc<File>,
    ) {
        self.files.borrow_mut().insert(file.path.clone(), file);
    }

    pub fn files(&self) -> Vec<Rc<File>> {
        self.files.borrow().values().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn global_lookup(
        &self,
        name: &str,
    ) -> Option<Symbol> {
        self.global_table.borrow().get(name).cloned()
    }

    /// Declares a symbol in the global table. Fails when the name is already
    /// taken; the caller logs the duplicate.
    pub fn define_global(
        &self,
        symbol: Symbol,
    ) -> Result<(), Symbol> {
        let mut table = self.global_table.borrow_mut();
        if let Some(existing) = table.get(&symbol.name) {
            return Err(existing.clone());
        }
        table.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Overwrites a global entry in place; used when a queued definition
    /// finally resolves with its completed type.
    pub fn redefine_global(
        &self,
        symbol: Symbol,
    ) {
        self.global_table.borrow_mut().insert(symbol.name.clone(), symbol);
    }

    pub fn globals(&self) -> Vec<Symbol> {
        self.global_table.borrow().values().cloned().collect()
    }

    /// Looks a name up the way another package sees this one: exported
    /// definitions, plus symbols this package re-exported via
    /// `export import`.
    pub fn import_from_namespace(
        &self,
        name: &str,
    ) -> Option<Symbol> {
        if let Some(symbol) = self
            .global_table
            .borrow()
            .get(name)
            .filter(|s| s.visible_externally())
        {
            return Some(symbol.clone());
        }
        self.import_table
            .borrow()
            .values()
            .filter_map(|record| record.imported.get(name))
            .find(|s| matches!(s.status, crate::DeclStatus::Remote { reexported: true }))
            .cloned()
    }

    /// Records an imported symbol under the import-table entry for the
    /// package it came from.
    pub fn record_import(
        &self,
        from: &Rc<Package>,
        symbol: Symbol,
    ) {
        let mut table = self.import_table.borrow_mut();
        let record = table.entry(from.id()).or_insert_with(|| ImportRecord {
            package:  from.clone(),
            imported: BTreeMap::new(),
        });
        record.imported.insert(symbol.name.clone(), symbol);
    }

    pub fn import_record_symbols(
        &self,
        from: PackageId,
    ) -> Vec<Symbol> {
        self.import_table
            .borrow()
            .get(&from)
            .map(|record| record.imported.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn imported_package_ids(&self) -> Vec<PackageId> {
        self.import_table.borrow().keys().copied().collect()
    }
}
