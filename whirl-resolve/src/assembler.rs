use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    rc::Rc,
};

use whirl_ast::{AstBranch, BranchKind, LeafKind};
use whirl_common::{DeclStatus, File, Package, SharedOpaqueSlot};
use whirl_diagnostics::SharedSink;
use whirl_utils::PackageId;
use whirl_walk::{WalkDefOutcome, Walker};

use crate::{Definition, DefinitionQueue};

/// Puts the definitions of one package together as the resolver directs:
/// owns the package's definition queue and the walker for each of its files.
pub struct PackageAssembler {
    pkg:     Rc<Package>,
    queue:   DefinitionQueue,
    walkers: BTreeMap<PathBuf, Walker>,
}

impl PackageAssembler {
    pub fn new(
        pkg: Rc<Package>,
        slot: SharedOpaqueSlot,
        sink: SharedSink,
    ) -> Self {
        let mut walkers = BTreeMap::new();
        for file in pkg.files() {
            let path = file.path.clone();
            walkers.insert(path.clone(), Walker::new(pkg.clone(), file, &path, slot.clone(), sink.clone()));
        }
        Self {
            pkg,
            queue: DefinitionQueue::default(),
            walkers,
        }
    }

    pub fn package(&self) -> &Rc<Package> {
        &self.pkg
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn total_unknowns(&self) -> usize {
        self.queue.total_unknowns()
    }

    pub fn pending_import_count(&self) -> usize {
        self.pkg.files().iter().map(|f| f.pending_import_count()).sum()
    }

    /// The initial resolution pass: every top-level construct of every file
    /// is walked once, export blocks contributing their contents as
    /// `Exported`. Afterwards each file's AST is released; its data now
    /// lives in the queue and the HIR.
    pub fn initial_pass(&mut self) {
        for file in self.pkg.files() {
            let Some(ast) = file.take_ast() else { continue };
            for item in ast.branches() {
                match item.kind {
                    // headers were consumed by the import manager
                    BranchKind::ImportStmt | BranchKind::ExportedImport => continue,
                    BranchKind::ExportBlock => self.initial_pass_over_block(&file, item.branch_at(0), DeclStatus::Exported),
                    BranchKind::TopLevel => self.initial_pass_over_block(&file, item, DeclStatus::Internal),
                    _ => {},
                }
            }
        }
    }

    fn initial_pass_over_block(
        &mut self,
        file: &Rc<File>,
        block: &AstBranch,
        status: DeclStatus,
    ) {
        for def in block.branches() {
            let def = Definition {
                branch: def.clone(),
                unknowns: BTreeMap::new(),
                file: file.clone(),
                status,
            };
            self.attempt(def, false);
        }
    }

    /// Walks one definition; completed nodes land on the file root, deferred
    /// ones re-enter the queue. Reports whether anything improved.
    fn attempt(
        &mut self,
        def: Definition,
        redeclare: bool,
    ) -> bool {
        let walker = self.walkers.get_mut(&def.file.path).expect("a walker exists for every file");
        let unknowns_before = def.unknowns.len();
        match walker.walk_def(&def.branch, def.status, redeclare) {
            WalkDefOutcome::Complete(node) => {
                def.file.add_node(node);
                true
            },
            WalkDefOutcome::Deferred(unknowns) => {
                // fewer unknowns than last time still counts as progress
                let progressed = redeclare && unknowns.len() < unknowns_before;
                self.queue.enqueue(Definition { unknowns, ..def });
                progressed
            },
            WalkDefOutcome::Failed => redeclare,
        }
    }

    /// Re-walks everything queued, once. The resolver calls this repeatedly
    /// while a prototype candidate sits in the shared slot.
    pub fn walk_queue_once(&mut self) -> bool {
        let mut progressed = false;
        for _ in 0..self.queue.len() {
            let Some(def) = self.queue.dequeue() else { break };
            progressed |= self.attempt(def, true);
        }
        progressed
    }

    /// The names of queued definitions that can take a turn as the opaque
    /// prototype candidate: type and interface definitions.
    pub fn type_candidates(&self) -> Vec<Rc<str>> {
        self.queue
            .iter()
            .filter(|def| matches!(def.branch.kind, BranchKind::TypeDef | BranchKind::InterfDef))
            .filter_map(|def| def_name(&def.branch))
            .collect()
    }

    /// Retries explicitly imported names that were missing from their source
    /// package, and re-sweeps wildcard imports for symbols exported since.
    pub fn retry_pending_imports(&mut self) -> bool {
        let mut progressed = false;
        for file in self.pkg.files() {
            for (name, pending) in file.pending_imports() {
                // a deferred import from the file's own package just needs
                // the definition to land in the global table
                if pending.package.id() == self.pkg.id() {
                    if self.pkg.global_lookup(&name).is_some() {
                        file.remove_pending_import(&name);
                        progressed = true;
                    }
                    continue;
                }
                if let Some(symbol) = pending.package.import_from_namespace(&name) {
                    let imported = symbol.import(pending.reexported);
                    file.insert_local(imported.clone());
                    self.pkg.record_import(&pending.package, imported);
                    file.remove_pending_import(&name);
                    progressed = true;
                }
            }
            for wildcard in file.wildcard_imports() {
                for symbol in wildcard.package.globals() {
                    if !symbol.visible_externally() || file.local_lookup(&symbol.name).is_some() {
                        continue;
                    }
                    let imported = symbol.import(wildcard.reexported);
                    file.insert_local(imported.clone());
                    self.pkg.record_import(&wildcard.package, imported);
                    progressed = true;
                }
            }
        }
        progressed
    }

    /// Resolution is over for this package: drains the queue and logs the
    /// appropriate error for every name that never arrived.
    pub fn log_unresolved(&mut self) {
        // errors for misimported symbols are logged once per (symbol, package)
        let mut explicit_logged: BTreeSet<(Rc<str>, PackageId)> = BTreeSet::new();

        while let Some(def) = self.queue.dequeue() {
            let walker = self.walkers.get(&def.file.path).expect("a walker exists for every file");
            for (name, unknown) in &def.unknowns {
                match &unknown.foreign_package {
                    // implicit imports name the symbol at every use site
                    Some(pkg) if unknown.implicit_import => {
                        walker.log_not_visible_in_package(name, &pkg.name(), unknown.span);
                    },
                    // explicit imports are reported once, at the import site
                    Some(pkg) => {
                        let key = (name.clone(), pkg.id());
                        if explicit_logged.contains(&key) {
                            continue;
                        }
                        let span = def.file.pending_import(name).map(|p| p.span).unwrap_or(unknown.span);
                        walker.log_not_visible_in_package(name, &pkg.name(), span);
                        explicit_logged.insert(key);
                    },
                    None => walker.log_undefined(name, unknown.span),
                }
            }
        }

        // explicit imports that never resolved are errors even when nothing
        // used them
        for file in self.pkg.files() {
            for (name, pending) in file.pending_imports() {
                let key = (name.clone(), pending.package.id());
                if explicit_logged.contains(&key) {
                    continue;
                }
                let walker = self.walkers.get(&file.path).expect("a walker exists for every file");
                walker.log_not_visible_in_package(&name, &pending.package.name(), pending.span);
                explicit_logged.insert(key);
            }
        }
    }

    /// Flips every walker out of resolution mode; they cache `int`/`uint`
    /// and report the structural fatal if either is missing.
    pub fn resolution_done(&mut self) {
        for walker in self.walkers.values_mut() {
            walker.resolution_done();
        }
    }
}

/// The defined name of a definition branch: its first direct identifier
/// leaf (annotation names sit nested one level down and don't interfere).
pub(crate) fn def_name(branch: &AstBranch) -> Option<Rc<str>> {
    branch
        .leaves()
        .find(|l| l.kind == LeafKind::Identifier)
        .map(|l| l.value.clone())
}
