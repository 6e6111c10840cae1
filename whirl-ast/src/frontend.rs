use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use thiserror::Error;
use whirl_utils::SourceId;

use crate::AstBranch;

/// A scanned source file: the token stream stays inside the frontend; the
/// core only sees the file's identity and its metadata tags.
///
/// Tags are `key[=value]` pairs (flag tags carry an empty value). The package
/// initializer evaluates them to decide whether the file is part of the
/// build.
#[derive(Debug, Clone)]
pub struct ScannedSource {
    pub path:   PathBuf,
    pub source: SourceId,
    pub tags:   BTreeMap<Rc<str>, Rc<str>>,
}

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("failed to scan `{path}`: {message}")]
    Scan { path: PathBuf, message: String },
    #[error("failed to parse `{path}`: {message}")]
    Parse { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The façade over the lexical scanner and the grammar-directed parser. Both
/// are external collaborators; the front-end only drives them per file.
pub trait Frontend {
    /// Lexes one source file and extracts its metadata tags.
    fn scan(
        &mut self,
        path: &Path,
        source: SourceId,
    ) -> Result<ScannedSource, FrontendError>;

    /// Parses a scanned file into its AST. The returned branch is always a
    /// [`BranchKind::File`](crate::BranchKind::File) node.
    fn parse(
        &mut self,
        scanned: ScannedSource,
    ) -> Result<AstBranch, FrontendError>;
}
