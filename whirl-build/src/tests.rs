use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use tempfile::TempDir;
use whirl_ast::{AstBranch, AstLeaf, AstNode, BranchKind, Frontend, FrontendError, LeafKind, ScannedSource};
use whirl_common::{DeclStatus, DefKind};
use whirl_diagnostics::Category;
use whirl_typing::DataType;
use whirl_utils::{PackageId, SourceId, Span};

use crate::{BuildConfig, BuildError, Compiler};

// ---------------------------------------------------------------------
// a canned frontend: the scanner and parser are external collaborators, so
// tests drive the compiler with prebuilt ASTs keyed by `package/file`

#[derive(Default)]
struct StubFrontend {
    asts:       BTreeMap<String, AstBranch>,
    tags:       BTreeMap<String, BTreeMap<Rc<str>, Rc<str>>>,
    scan_count: Rc<RefCell<usize>>,
}

impl StubFrontend {
    fn with(
        mut self,
        key: &str,
        ast: AstBranch,
    ) -> Self {
        self.asts.insert(key.into(), ast);
        self
    }

    fn with_tags(
        mut self,
        key: &str,
        pairs: &[(&str, &str)],
    ) -> Self {
        self.tags
            .insert(key.into(), pairs.iter().map(|(k, v)| (Rc::from(*k), Rc::from(*v))).collect());
        self
    }

    fn scan_counter(&self) -> Rc<RefCell<usize>> {
        self.scan_count.clone()
    }
}

fn file_key(path: &Path) -> String {
    let dir = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    format!("{dir}/{name}")
}

impl Frontend for StubFrontend {
    fn scan(
        &mut self,
        path: &Path,
        source: SourceId,
    ) -> Result<ScannedSource, FrontendError> {
        *self.scan_count.borrow_mut() += 1;
        let key = file_key(path);
        if !self.asts.contains_key(&key) {
            return Err(FrontendError::Scan {
                path:    path.to_path_buf(),
                message: "unknown source".into(),
            });
        }
        Ok(ScannedSource {
            path:   path.to_path_buf(),
            source,
            tags:   self.tags.get(&key).cloned().unwrap_or_default(),
        })
    }

    fn parse(
        &mut self,
        scanned: ScannedSource,
    ) -> Result<AstBranch, FrontendError> {
        Ok(self.asts[&file_key(&scanned.path)].clone())
    }
}

// ---------------------------------------------------------------------
// AST builders

fn ident(
    name: &str,
    offset: usize,
) -> AstNode {
    AstLeaf::new(LeafKind::Identifier, name, Span::anchored(SourceId::from(0), offset, name.len())).into()
}

fn branch(
    kind: BranchKind,
    content: Vec<AstNode>,
) -> AstBranch {
    AstBranch::new(kind, content)
}

fn named(name: &str) -> AstBranch {
    branch(BranchKind::NamedType, vec![ident(name, 0)])
}

fn named_access(
    pkg: &str,
    name: &str,
    pkg_offset: usize,
    name_offset: usize,
) -> AstBranch {
    branch(BranchKind::NamedType, vec![ident(pkg, pkg_offset), ident(name, name_offset)])
}

fn type_def(
    name: &str,
    body: AstBranch,
) -> AstBranch {
    branch(BranchKind::TypeDef, vec![ident(name, 0), body.into()])
}

fn linked_struct(next: &str) -> AstBranch {
    let field = branch(
        BranchKind::StructField,
        vec![ident("next", 0), branch(BranchKind::RefType, vec![named(next).into()]).into()],
    );
    branch(BranchKind::StructType, vec![field.into()])
}

fn import_stmt(
    path: &[&str],
    symbols: &[(&str, usize)],
) -> AstBranch {
    let pkg_name = branch(
        BranchKind::PackageName,
        path.iter().map(|segment| ident(segment, 0)).collect(),
    );
    let mut content = vec![pkg_name.into()];
    if !symbols.is_empty() {
        let list = branch(
            BranchKind::IdentifierList,
            symbols.iter().map(|(name, offset)| ident(name, *offset)).collect(),
        );
        content.push(list.into());
    }
    branch(BranchKind::ImportStmt, content)
}

fn exported_import(stmt: AstBranch) -> AstBranch {
    branch(BranchKind::ExportedImport, vec![stmt.into()])
}

fn top_level(defs: Vec<AstBranch>) -> AstBranch {
    branch(BranchKind::TopLevel, defs.into_iter().map(Into::into).collect())
}

fn export_block(defs: Vec<AstBranch>) -> AstBranch {
    branch(BranchKind::ExportBlock, vec![top_level(defs).into()])
}

fn file_of(content: Vec<AstBranch>) -> AstBranch {
    branch(BranchKind::File, content.into_iter().map(Into::into).collect())
}

// ---------------------------------------------------------------------
// workspace plumbing

fn touch(
    root: &Path,
    rel: &str,
) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "").unwrap();
}

fn compiler(
    root: &TempDir,
    frontend: StubFrontend,
) -> Compiler {
    Compiler::new(Box::new(frontend), root.path(), BuildConfig::default())
}

fn import_messages(compiler: &Compiler) -> Vec<(String, Category, usize)> {
    compiler
        .sink()
        .diagnostics()
        .into_iter()
        .map(|d| (d.message, d.category, d.span.offset()))
        .collect()
}

// ---------------------------------------------------------------------
// scenarios

#[test]
fn valid_simple_package() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "foo/a.wrl");
    touch(root.path(), "foo/b.wrl");

    let frontend = StubFrontend::default()
        .with("foo/a.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]))
        .with("foo/b.wrl", file_of(vec![import_stmt(&["foo"], &[("T", 7)]), top_level(vec![])]));

    let mut compiler = compiler(&root, frontend);
    let pkg = compiler.compile("foo").unwrap();

    assert!(compiler.sink().should_proceed(), "{:?}", compiler.sink().diagnostics());
    assert_eq!(compiler.package_count(), 1);
    assert_eq!(pkg.file_count(), 2);
    assert_eq!(&*pkg.name(), "foo");

    // the package id is the FNV-1a hash of the absolute directory path
    let abspath = root.path().join("foo");
    assert_eq!(pkg.id(), PackageId::from_path_bytes(abspath.to_string_lossy().as_bytes()));

    let symbol = pkg.global_lookup("T").unwrap();
    assert_eq!(symbol.def_kind, DefKind::TypeDef);

    let files = pkg.files();
    for file in &files {
        assert!(file.ast_released());
    }
    // a.wrl produced the HIR; b.wrl's same-package import resolved against
    // the global table directly
    assert_eq!(files[0].hir().nodes.len(), 1);
    assert!(files[1].local_lookup("T").is_none());
    assert_eq!(files[1].pending_import_count(), 0);
}

#[test]
fn invalid_package_name() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "1bad/a.wrl");

    let mut compiler = compiler(&root, StubFrontend::default());
    let err = compiler.compile("1bad").unwrap_err();

    assert!(matches!(err, BuildError::RootImportFailed { .. }));
    assert_eq!(compiler.package_count(), 0);
    let messages: Vec<_> = import_messages(&compiler).into_iter().map(|(m, _, _)| m).collect();
    assert_eq!(messages, vec!["Invalid package name: `1bad`".to_string()]);
}

#[test]
fn cyclic_type_defs_across_packages() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "a/a.wrl");
    touch(root.path(), "b/b.wrl");

    let frontend = StubFrontend::default()
        .with(
            "a/a.wrl",
            file_of(vec![
                import_stmt(&["b"], &[("B", 7)]),
                export_block(vec![type_def("A", linked_struct("B"))]),
            ]),
        )
        .with(
            "b/b.wrl",
            file_of(vec![
                import_stmt(&["a"], &[("A", 7)]),
                export_block(vec![type_def("B", linked_struct("A"))]),
            ]),
        );

    let mut compiler = compiler(&root, frontend);
    let pkg_a = compiler.compile("a").unwrap();
    assert!(compiler.sink().should_proceed(), "{:?}", compiler.sink().diagnostics());

    let pkg_b = compiler.package_by_name("b").unwrap();
    let a = pkg_a.global_lookup("A").unwrap();
    let b = pkg_b.global_lookup("B").unwrap();
    assert_eq!(a.status, DeclStatus::Exported);
    assert_eq!(b.status, DeclStatus::Exported);

    // both kept the identity of the prototypes installed during their walks
    let DataType::Opaque(a_proto) = &a.ty else {
        panic!("A should keep its prototype identity");
    };
    assert!(a_proto.is_complete());
    let DataType::Struct(a_body) = a_proto.body().unwrap() else {
        panic!("A should be a struct");
    };
    assert_eq!(a_body.fields[0].1, DataType::Ref(Box::new(b.ty.clone())));

    let DataType::Opaque(b_proto) = &b.ty else {
        panic!("B should keep its prototype identity");
    };
    let DataType::Struct(b_body) = b_proto.body().unwrap() else {
        panic!("B should be a struct");
    };
    assert_eq!(b_body.fields[0].1, DataType::Ref(Box::new(a.ty.clone())));
}

#[test]
fn unresolved_explicit_import_logs_once_at_the_import_site() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "x/x.wrl");
    touch(root.path(), "bar/bar.wrl");

    let frontend = StubFrontend::default()
        .with(
            "x/x.wrl",
            file_of(vec![
                import_stmt(&["bar"], &[("Missing", 17)]),
                // two definitions referencing the missing symbol; the error
                // still lands once, at the import statement
                top_level(vec![type_def("P", named("Missing")), type_def("Q", named("Missing"))]),
            ]),
        )
        .with("bar/bar.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]));

    let mut compiler = compiler(&root, frontend);
    compiler.compile("x").unwrap();

    let not_visible: Vec<_> = import_messages(&compiler)
        .into_iter()
        .filter(|(m, _, _)| m.contains("not visible"))
        .collect();
    assert_eq!(
        not_visible,
        vec![(
            "Symbol `Missing` is not visible in package `bar`".to_string(),
            Category::Import,
            17,
        )]
    );
}

#[test]
fn unresolved_implicit_import_logs_every_use() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "y/y.wrl");
    touch(root.path(), "bar/bar.wrl");

    let frontend = StubFrontend::default()
        .with(
            "y/y.wrl",
            file_of(vec![
                import_stmt(&["bar"], &[]),
                top_level(vec![
                    type_def("P", named_access("bar", "Missing", 30, 34)),
                    type_def("Q", named_access("bar", "Missing", 60, 64)),
                ]),
            ]),
        )
        .with("bar/bar.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]));

    let mut compiler = compiler(&root, frontend);
    compiler.compile("y").unwrap();

    let mut not_visible: Vec<_> = import_messages(&compiler)
        .into_iter()
        .filter(|(m, _, _)| m.contains("not visible"))
        .collect();
    not_visible.sort_by_key(|(_, _, offset)| *offset);
    assert_eq!(
        not_visible,
        vec![
            ("Symbol `Missing` is not visible in package `bar`".to_string(), Category::Import, 34),
            ("Symbol `Missing` is not visible in package `bar`".to_string(), Category::Import, 64),
        ]
    );
}

#[test]
fn duplicate_import_symbols_fail_the_statement() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "main/main.wrl");

    let frontend = StubFrontend::default().with(
        "main/main.wrl",
        file_of(vec![import_stmt(&["foo"], &[("X", 10), ("X", 13)]), top_level(vec![])]),
    );

    let mut compiler = compiler(&root, frontend);
    let err = compiler.compile("main").unwrap_err();
    assert!(matches!(err, BuildError::RootImportFailed { .. }));

    let duplicates: Vec<_> = import_messages(&compiler)
        .into_iter()
        .filter(|(m, _, _)| m == "Unable to import a symbol multiple times")
        .collect();
    assert_eq!(duplicates.len(), 1);

    // the statement failed, so no symbol of that name landed in the file
    let main = compiler.package_by_name("main").unwrap();
    assert!(main.files()[0].local_lookup("X").is_none());
}

#[test]
fn import_is_idempotent() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "foo/a.wrl");

    let frontend =
        StubFrontend::default().with("foo/a.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]));
    let scans = frontend.scan_counter();

    let mut compiler = compiler(&root, frontend);
    let first = compiler.import("foo").unwrap();
    let scans_after_first = *scans.borrow();
    let errors_after_first = compiler.sink().error_count();

    let second = compiler.import("foo").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    // no re-parse, no re-walk, no re-log
    assert_eq!(*scans.borrow(), scans_after_first);
    assert_eq!(compiler.sink().error_count(), errors_after_first);
    assert_eq!(compiler.package_count(), 1);
}

#[test]
fn reexported_symbols_are_importable_downstream() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "lib/lib.wrl");
    touch(root.path(), "app/app.wrl");
    touch(root.path(), "main/main.wrl");

    let frontend = StubFrontend::default()
        .with("lib/lib.wrl", file_of(vec![export_block(vec![type_def("T", named("int"))])]))
        .with(
            "app/app.wrl",
            file_of(vec![exported_import(import_stmt(&["lib"], &[("T", 12)])), top_level(vec![])]),
        )
        .with(
            "main/main.wrl",
            file_of(vec![
                import_stmt(&["app"], &[("T", 7)]),
                top_level(vec![type_def("U", named("T"))]),
            ]),
        );

    let mut compiler = compiler(&root, frontend);
    let main = compiler.compile("main").unwrap();
    assert!(compiler.sink().should_proceed(), "{:?}", compiler.sink().diagnostics());

    let lib = compiler.package_by_name("lib").unwrap();
    let u = main.global_lookup("U").unwrap();
    // U aliases the type that originated in lib, two packages away
    let DataType::Opaque(u_proto) = &u.ty else {
        panic!("type defs keep their prototype identity");
    };
    assert_eq!(u_proto.body().unwrap(), lib.global_lookup("T").unwrap().ty);

    // the re-exporting file holds the symbol as a re-exported remote
    let app = compiler.package_by_name("app").unwrap();
    let reexported = app.files()[0].local_lookup("T").unwrap();
    assert_eq!(reexported.status, DeclStatus::Remote { reexported: true });
}

#[test]
fn wildcard_import_brings_in_every_exported_symbol() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "lib/lib.wrl");
    touch(root.path(), "main/main.wrl");

    let frontend = StubFrontend::default()
        .with(
            "lib/lib.wrl",
            file_of(vec![export_block(vec![
                type_def("T", named("int")),
                type_def("U", named("bool")),
            ])]),
        )
        .with("main/main.wrl", {
            let wildcard = AstLeaf::new(LeafKind::Ellipsis, "...", Span::anchored(SourceId::from(0), 7, 3));
            let list = branch(BranchKind::IdentifierList, vec![wildcard.into()]);
            let pkg_name = branch(BranchKind::PackageName, vec![ident("lib", 0)]);
            let stmt = branch(BranchKind::ImportStmt, vec![pkg_name.into(), list.into()]);
            file_of(vec![stmt, top_level(vec![type_def("V", named("T"))])])
        });

    let mut compiler = compiler(&root, frontend);
    let main = compiler.compile("main").unwrap();
    assert!(compiler.sink().should_proceed(), "{:?}", compiler.sink().diagnostics());

    let file = &main.files()[0];
    assert_eq!(file.local_lookup("T").unwrap().status, DeclStatus::Remote { reexported: false });
    assert!(file.local_lookup("U").is_some());
    assert!(main.global_lookup("V").is_some());
}

#[test]
fn metadata_tags_exclude_files_from_the_build() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "foo/a.wrl");
    touch(root.path(), "foo/skip.wrl");

    let frontend = StubFrontend::default()
        .with("foo/a.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]))
        .with("foo/skip.wrl", file_of(vec![top_level(vec![type_def("Broken", named("Nowhere"))])]))
        .with_tags("foo/skip.wrl", &[("no_build", "")]);

    let mut compiler = compiler(&root, frontend);
    let pkg = compiler.compile("foo").unwrap();

    assert!(compiler.sink().should_proceed());
    assert_eq!(pkg.file_count(), 1);
    assert!(pkg.global_lookup("Broken").is_none());
}

#[test]
fn empty_package_directory_fails() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("empty")).unwrap();

    let mut compiler = compiler(&root, StubFrontend::default());
    let err = compiler.compile("empty").unwrap_err();
    assert!(matches!(err, BuildError::RootImportFailed { .. }));

    let messages: Vec<_> = import_messages(&compiler).into_iter().map(|(m, _, _)| m).collect();
    assert_eq!(
        messages,
        vec!["Unable to load package by name `empty` because it contains no source files".to_string()]
    );
}

#[test]
fn scan_failures_are_io_errors_not_package_errors() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "foo/a.wrl");
    touch(root.path(), "foo/broken.wrl");

    // only a.wrl is known to the frontend; broken.wrl fails to scan
    let frontend =
        StubFrontend::default().with("foo/a.wrl", file_of(vec![top_level(vec![type_def("T", named("int"))])]));

    let mut compiler = compiler(&root, frontend);
    // the scan failure is logged and gates the package
    assert!(compiler.import("foo").is_none());
    assert_eq!(compiler.sink().io_errors().len(), 1);
    assert!(compiler.sink().io_errors()[0].contains("broken.wrl"));
}

#[test]
fn freestanding_build_without_core_types_is_fatal() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "bare/a.wrl");

    // the package itself is fine: a self-referential struct needs no core
    // types at all
    let frontend =
        StubFrontend::default().with("bare/a.wrl", file_of(vec![top_level(vec![type_def("T", linked_struct("T"))])]));

    let config = BuildConfig {
        core_types: false,
        ..BuildConfig::default()
    };
    let mut compiler = Compiler::new(Box::new(frontend), root.path(), config);

    let err = compiler.compile("bare").unwrap_err();
    let BuildError::MissingPrimitive { message } = err else {
        panic!("expected the structural fatal, got {err:?}");
    };
    assert_eq!(message, "Missing definition for `int`");
    assert!(compiler.sink().fatal().is_some());
}

#[test]
fn freestanding_builds_supply_their_own_core_types() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "bare/a.wrl");

    let defs = top_level(vec![
        type_def("int", branch(BranchKind::StructType, vec![])),
        type_def("uint", branch(BranchKind::StructType, vec![])),
    ]);
    let frontend = StubFrontend::default().with("bare/a.wrl", file_of(vec![defs]));

    let config = BuildConfig {
        core_types: false,
        ..BuildConfig::default()
    };
    let mut compiler = Compiler::new(Box::new(frontend), root.path(), config);

    let pkg = compiler.compile("bare").unwrap();
    assert!(compiler.sink().should_proceed(), "{:?}", compiler.sink().diagnostics());
    assert!(pkg.global_lookup("int").is_some());
    assert!(pkg.global_lookup("bool").is_none());
}

#[test]
fn file_keys_disambiguate_across_packages() {
    let path: PathBuf = PathBuf::from("x");
    assert_eq!(file_key(&path.join("y.wrl")), "x/y.wrl");
}
