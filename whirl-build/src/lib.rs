//! The compilation front-end driver: discovers and parses every source file
//! of every transitively imported package, wires cross-package symbol
//! visibility (cycles included), and runs definition resolution. What comes
//! out is a dependency graph of packages with populated symbol tables and
//! per-file HIR — the handoff to the code generator.

use std::{collections::BTreeMap, path::PathBuf, rc::Rc};

use miette::Diagnostic;
use thiserror::Error;
use whirl_ast::Frontend;
use whirl_common::{new_opaque_slot, Package, SharedOpaqueSlot};
use whirl_diagnostics::{DiagnosticSink, SharedSink};
use whirl_resolve::{PackageAssembler, Resolver};
use whirl_typing::Primitive;
use whirl_utils::PackageId;

mod imports;
mod pkginit;
mod preprocess;
#[cfg(test)]
mod tests;

/// The width of the target's natural machine word; decides what `int` and
/// `uint` are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    Bits32,
    Bits64,
}

/// Target configuration for one compilation.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub word_width: WordWidth,
    /// Matched against `arch` metadata tags for conditional compilation.
    pub arch: Rc<str>,
    /// Matched against `os` metadata tags.
    pub os: Rc<str>,
    /// Whether the initializer declares the language core types (`int`,
    /// `uint`, and friends) in every package. Freestanding builds turn this
    /// off and must define them in source; a build that ends resolution
    /// without `int`/`uint` aborts.
    pub core_types: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            word_width: if cfg!(target_pointer_width = "32") {
                WordWidth::Bits32
            } else {
                WordWidth::Bits64
            },
            arch: std::env::consts::ARCH.into(),
            os: std::env::consts::OS.into(),
            core_types: true,
        }
    }
}

impl BuildConfig {
    pub(crate) fn int_primitive(&self) -> Primitive {
        match self.word_width {
            WordWidth::Bits32 => Primitive::I32,
            WordWidth::Bits64 => Primitive::I64,
        }
    }

    pub(crate) fn uint_primitive(&self) -> Primitive {
        match self.word_width {
            WordWidth::Bits32 => Primitive::U32,
            WordWidth::Bits64 => Primitive::U64,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("Invalid package name: `{name}`")]
    InvalidPackageName { name: String },
    #[error("Unable to load package by name `{name}` because it contains no source files")]
    NoSourceFiles { name: String },
    #[error("unable to import root package `{path}`")]
    RootImportFailed { path: String },
    /// The structural fatal: `int` or `uint` never materialized. The driver
    /// turns this into a process abort.
    #[error("{message}")]
    MissingPrimitive { message: String },
}

/// The front-end orchestrator: owns the dependency graph, the parser façade,
/// the diagnostic sink, and the shared opaque slot that resolution threads
/// through every walker.
pub struct Compiler {
    pub(crate) frontend: Box<dyn Frontend>,
    pub(crate) config:   BuildConfig,
    pub(crate) sink:     SharedSink,

    /// The root directory packages are imported relative to.
    pub(crate) root_path: PathBuf,

    pub(crate) dep_graph:   BTreeMap<PackageId, Rc<Package>>,
    pub(crate) assemblers:  Vec<PackageAssembler>,
    pub(crate) slot:        SharedOpaqueSlot,
    pub(crate) next_source: usize,
}

impl Compiler {
    pub fn new(
        frontend: Box<dyn Frontend>,
        root_path: impl Into<PathBuf>,
        config: BuildConfig,
    ) -> Self {
        Self {
            frontend,
            config,
            sink: DiagnosticSink::new(),
            root_path: root_path.into(),
            dep_graph: BTreeMap::new(),
            assemblers: Vec::new(),
            slot: new_opaque_slot(),
            next_source: 0,
        }
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn package(
        &self,
        id: PackageId,
    ) -> Option<Rc<Package>> {
        self.dep_graph.get(&id).cloned()
    }

    pub fn package_by_name(
        &self,
        name: &str,
    ) -> Option<Rc<Package>> {
        self.dep_graph.values().find(|p| &*p.name() == name).cloned()
    }

    pub fn package_count(&self) -> usize {
        self.dep_graph.len()
    }

    /// Runs the whole front-end for the package at `pkgpath` (relative to
    /// the root directory): transitive import loading, definition
    /// resolution, and finalization. Non-fatal errors accumulate in the
    /// sink; callers gate downstream phases on it.
    pub fn compile(
        &mut self,
        pkgpath: &str,
    ) -> Result<Rc<Package>, BuildError> {
        let Some(root) = self.import(pkgpath) else {
            return Err(BuildError::RootImportFailed { path: pkgpath.into() });
        };

        let mut resolver = Resolver::new(self.slot.clone());
        for assembler in self.assemblers.drain(..) {
            resolver.add_package(assembler);
        }
        resolver.resolve();

        if let Some(message) = self.sink.fatal() {
            return Err(BuildError::MissingPrimitive { message });
        }
        tracing::debug!(packages = self.dep_graph.len(), clean = self.sink.should_proceed(), "front-end finished");
        Ok(root)
    }
}
