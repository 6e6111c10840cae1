use std::rc::Rc;

use whirl_utils::Span;

/// The closed set of branch shapes the front-end dispatches on.
///
/// The header subset (`ImportStmt` through `IdentifierList`) is what the
/// import manager reads; the rest is the definition and expression grammar
/// the walker translates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    File,
    TopLevel,
    ExportBlock,
    ImportStmt,
    ExportedImport,
    PackageName,
    IdentifierList,
    NamedType,
    TypeList,
    TypeExt,
    TypeDef,
    StructType,
    StructField,
    AlgType,
    AlgVariant,
    RefType,
    FuncDef,
    ArgsDecl,
    ArgDecl,
    InterfDef,
    BindDef,
    /// `#name` or `#name "value"` ahead of a definition.
    Annotation,
    Block,
    VarDecl,
    AppExpr,
    NamedArg,
    OperatorExpr,
    AccessExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Identifier,
    /// The wildcard-import marker; its value is the sentinel `"..."`, and a
    /// trailing ellipsis on an argument declaration marks it indefinite.
    Ellipsis,
    IntLit,
    StrLit,
    BoolLit,
    Operator,
}

#[derive(Debug, Clone)]
pub struct AstLeaf {
    pub kind:  LeafKind,
    pub value: Rc<str>,
    pub span:  Span,
}

impl AstLeaf {
    pub fn new(
        kind: LeafKind,
        value: impl Into<Rc<str>>,
        span: Span,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AstBranch {
    pub kind:    BranchKind,
    pub content: Vec<AstNode>,
    pub span:    Span,
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Branch(AstBranch),
    Leaf(AstLeaf),
}

impl AstNode {
    pub fn span(&self) -> Span {
        match self {
            AstNode::Branch(b) => b.span,
            AstNode::Leaf(l) => l.span,
        }
    }

    pub fn as_branch(&self) -> Option<&AstBranch> {
        match self {
            AstNode::Branch(b) => Some(b),
            AstNode::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&AstLeaf> {
        match self {
            AstNode::Leaf(l) => Some(l),
            AstNode::Branch(_) => None,
        }
    }
}

impl From<AstBranch> for AstNode {
    fn from(b: AstBranch) -> Self {
        AstNode::Branch(b)
    }
}

impl From<AstLeaf> for AstNode {
    fn from(l: AstLeaf) -> Self {
        AstNode::Leaf(l)
    }
}

impl AstBranch {
    /// Builds a branch whose span covers its children's spans.
    pub fn new(
        kind: BranchKind,
        content: Vec<AstNode>,
    ) -> Self {
        let span = content
            .iter()
            .map(AstNode::span)
            .reduce(|acc, s| if acc.source() == s.source() { acc.cover(s) } else { acc })
            .unwrap_or_default();
        Self { kind, content, span }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The child at `ix`, which the grammar guarantees is a branch.
    pub fn branch_at(
        &self,
        ix: usize,
    ) -> &AstBranch {
        self.content[ix].as_branch().expect("grammar guarantees a branch at this position")
    }

    /// The child at `ix`, which the grammar guarantees is a leaf.
    pub fn leaf_at(
        &self,
        ix: usize,
    ) -> &AstLeaf {
        self.content[ix].as_leaf().expect("grammar guarantees a leaf at this position")
    }

    pub fn branches(&self) -> impl Iterator<Item = &AstBranch> {
        self.content.iter().filter_map(AstNode::as_branch)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &AstLeaf> {
        self.content.iter().filter_map(AstNode::as_leaf)
    }

    /// The first child branch of the given kind, if any.
    pub fn find_branch(
        &self,
        kind: BranchKind,
    ) -> Option<&AstBranch> {
        self.branches().find(|b| b.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use whirl_utils::SourceId;

    use super::*;

    fn ident(
        name: &str,
        offset: usize,
    ) -> AstNode {
        AstLeaf::new(LeafKind::Identifier, name, Span::anchored(SourceId::from(0), offset, name.len())).into()
    }

    #[test]
    fn branch_span_covers_children() {
        let branch = AstBranch::new(BranchKind::IdentifierList, vec![ident("a", 0), ident("bc", 4)]);
        assert_eq!(branch.span.offset(), 0);
        assert_eq!(branch.span.len(), 6);
    }

    #[test]
    fn typed_accessors() {
        let inner = AstBranch::new(BranchKind::PackageName, vec![ident("foo", 7)]);
        let stmt = AstBranch::new(BranchKind::ImportStmt, vec![inner.into(), ident("bar", 11)]);
        assert_eq!(stmt.branch_at(0).kind, BranchKind::PackageName);
        assert_eq!(&*stmt.leaf_at(1).value, "bar");
        assert!(stmt.find_branch(BranchKind::IdentifierList).is_none());
    }
}
