use std::{collections::BTreeMap, rc::Rc};

use whirl_ast::{AstBranch, AstNode, BranchKind, LeafKind};
use whirl_common::{DeclStatus, DefKind, File, Package, PendingImport, Symbol, WildcardImport};
use whirl_diagnostics::{Category, LogContext};
use whirl_resolve::PackageAssembler;
use whirl_typing::DataType;
use whirl_utils::{PackageId, Span};

use crate::Compiler;

/// The sentinel name of the wildcard-import marker.
const WILDCARD: &str = "...";

impl Compiler {
    /// Imports the package at `pkgpath` (relative to the root directory):
    /// initializes it, resolves its import statements (recursively importing
    /// their targets), and runs its initial definition pass.
    ///
    /// Idempotent: a package already in the dependency graph is returned
    /// as-is, without re-parsing, re-walking, or re-logging — this is what
    /// breaks import cycles at the package level.
    pub fn import(
        &mut self,
        pkgpath: &str,
    ) -> Option<Rc<Package>> {
        let abspath = self.root_path.join(pkgpath);
        let id = PackageId::from_path_bytes(abspath.to_string_lossy().as_bytes());
        if let Some(pkg) = self.dep_graph.get(&id) {
            return Some(pkg.clone());
        }

        tracing::debug!(pkgpath, "importing package");

        // error attribution follows the package being imported; the guard
        // puts the previous context back on every exit path
        let sink = self.sink.clone();
        let _guard = sink.swap_context(LogContext {
            package: Some(id),
            file:    None,
        });
        let before = self.sink.error_count();

        let pkg = match self.init_package(&abspath) {
            Ok(pkg) => pkg,
            Err(err) => {
                self.sink.log_error(err.to_string(), Category::Name, Span::default());
                return None;
            },
        };

        // file-level errors were logged rather than returned; they still
        // gate everything downstream of loading
        if self.sink.error_count() != before || self.sink.fatal().is_some() {
            return None;
        }

        if !self.collect_imports(&pkg) {
            return None;
        }

        let mut assembler = PackageAssembler::new(pkg.clone(), self.slot.clone(), self.sink.clone());
        assembler.initial_pass();
        self.assemblers.push(assembler);

        Some(pkg)
    }

    /// Walks the header region of every file in the package, collecting its
    /// imports, declaring them, and adding their targets to the dependency
    /// graph. Returns false when any import statement failed fatally;
    /// not-yet-resolvable symbols are deferred, not failed.
    pub(crate) fn collect_imports(
        &mut self,
        pkg: &Rc<Package>,
    ) -> bool {
        let mut ok = true;
        let mut all_resolved = true;
        for file in pkg.files() {
            self.sink.set_current_file(&file.path);
            let ast = file.ast();
            let Some(ast) = ast.as_ref() else { continue };
            for node in ast.branches() {
                match node.kind {
                    BranchKind::ImportStmt => {
                        let (stmt_ok, resolved) = self.walk_import(pkg, &file, node, false);
                        ok &= stmt_ok;
                        all_resolved &= resolved;
                    },
                    BranchKind::ExportedImport => {
                        let (stmt_ok, resolved) = self.walk_import(pkg, &file, node.branch_at(0), true);
                        ok &= stmt_ok;
                        all_resolved &= resolved;
                    },
                    // headers must precede code
                    BranchKind::TopLevel | BranchKind::ExportBlock => break,
                    _ => {},
                }
            }
        }
        if !all_resolved {
            tracing::debug!(pkg = %pkg.name(), "some imports deferred to resolution");
        }
        ok
    }

    /// Walks one `import_stmt` node. The first flag reports whether the
    /// statement was free of fatal errors, the second whether every imported
    /// symbol resolved immediately.
    fn walk_import(
        &mut self,
        currpkg: &Rc<Package>,
        currfile: &Rc<File>,
        node: &AstBranch,
        reexported: bool,
    ) -> (bool, bool) {
        let mut symbol_names: BTreeMap<Rc<str>, Span> = BTreeMap::new();
        let mut pkgpath = String::new();
        let mut rename: Option<Rc<str>> = None;

        for item in &node.content {
            match item {
                AstNode::Branch(branch) if branch.kind == BranchKind::PackageName => {
                    let segments: Vec<&str> = branch
                        .leaves()
                        .filter(|l| l.kind == LeafKind::Identifier)
                        .map(|l| &*l.value)
                        .collect();
                    pkgpath = segments.join("/");
                },
                AstNode::Branch(branch) if branch.kind == BranchKind::IdentifierList => {
                    for leaf in branch.leaves() {
                        let name: Rc<str> = match leaf.kind {
                            LeafKind::Identifier => leaf.value.clone(),
                            LeafKind::Ellipsis => WILDCARD.into(),
                            _ => continue,
                        };
                        if symbol_names.insert(name, leaf.span).is_some() {
                            self.sink
                                .log_error("Unable to import a symbol multiple times", Category::Import, leaf.span);
                            return (false, false);
                        }
                    }
                },
                // the only bare identifier in an import statement is a rename
                AstNode::Leaf(leaf) if leaf.kind == LeafKind::Identifier => {
                    rename = Some(leaf.value.clone());
                },
                _ => {},
            }
        }

        let Some(target) = self.import(&pkgpath) else {
            return (false, false);
        };

        if symbol_names.is_empty() {
            // no symbol list: the package itself is bound in this file
            let name = rename.unwrap_or_else(|| {
                pkgpath.rsplit('/').next().unwrap_or(&pkgpath).into()
            });
            currfile.bind_package(name.clone(), target.clone());
            currfile.insert_local(Symbol::new(
                name,
                DataType::Package(target.id()),
                DefKind::Package,
                DeclStatus::Remote { reexported },
                node.span,
            ));
            return (true, true);
        }

        // a file importing from its own package sees the global table
        // directly; visibility does not apply
        let self_import = target.id() == currpkg.id();

        let mut all_resolved = true;
        for (name, span) in symbol_names {
            if &*name == WILDCARD {
                // everything currently visible, plus a marker so resolution
                // re-sweeps for late arrivals
                for symbol in target.globals() {
                    if !symbol.visible_externally() || currfile.local_lookup(&symbol.name).is_some() {
                        continue;
                    }
                    let imported = symbol.import(reexported);
                    currfile.insert_local(imported.clone());
                    currpkg.record_import(&target, imported);
                }
                currfile.add_wildcard_import(WildcardImport {
                    package: target.clone(),
                    reexported,
                });
                continue;
            }

            match target.global_lookup(&name) {
                Some(_) if self_import => {},
                Some(symbol) if symbol.visible_externally() => {
                    let imported = symbol.import(reexported);
                    currfile.insert_local(imported.clone());
                    currpkg.record_import(&target, imported);
                },
                Some(_) => {
                    self.sink
                        .log_error("Unable to import an internal symbol", Category::Import, span);
                    return (false, false);
                },
                None => {
                    // deferred: the target may still be mid-cycle, so the
                    // symbol gets another chance on every resolution pass
                    currfile.add_pending_import(
                        name,
                        PendingImport {
                            package: target.clone(),
                            span,
                            reexported,
                        },
                    );
                    all_resolved = false;
                },
            }
        }
        (true, all_resolved)
    }
}
