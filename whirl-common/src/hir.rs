use std::rc::Rc;

use whirl_typing::{DataType, FuncType, InterfType};
use whirl_utils::Span;

/// The translated definitions of one file, in walk order. This is the
/// handoff point to the code generator.
#[derive(Debug, Default)]
pub struct HirRoot {
    pub nodes: Vec<HirNode>,
}

#[derive(Debug)]
pub enum HirNode {
    TypeDef {
        name: Rc<str>,
        ty:   DataType,
    },
    FuncDef {
        name: Rc<str>,
        ty:   Rc<FuncType>,
        body: Option<HirExpr>,
    },
    InterfDef {
        name: Rc<str>,
        ty:   Rc<InterfType>,
    },
    Binding {
        interf: Rc<InterfType>,
        bound:  DataType,
    },
}

impl HirNode {
    pub fn name(&self) -> Option<Rc<str>> {
        match self {
            HirNode::TypeDef { name, .. } => Some(name.clone()),
            HirNode::FuncDef { name, .. } => Some(name.clone()),
            HirNode::InterfDef { name, .. } => Some(name.clone()),
            HirNode::Binding { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum HirStmt {
    VarDecl { name: Rc<str>, ty: DataType, init: HirExpr },
    Expr(HirExpr),
}

/// A translated expression. Types may still be solver unknowns while
/// resolution runs; they are narrowed in place.
#[derive(Debug)]
pub enum HirExpr {
    Literal {
        value: Rc<str>,
        ty:    DataType,
        span:  Span,
    },
    Var {
        name: Rc<str>,
        ty:   DataType,
        span: Span,
    },
    Call {
        callee: Box<HirExpr>,
        args:   Vec<HirExpr>,
        ty:     DataType,
        span:   Span,
    },
    Oper {
        op:   Rc<str>,
        lhs:  Box<HirExpr>,
        rhs:  Box<HirExpr>,
        ty:   DataType,
        span: Span,
    },
    Block {
        stmts: Vec<HirStmt>,
        value: Option<Box<HirExpr>>,
        ty:    DataType,
        span:  Span,
    },
}

impl HirExpr {
    pub fn ty(&self) -> DataType {
        match self {
            HirExpr::Literal { ty, .. } => ty.clone(),
            HirExpr::Var { ty, .. } => ty.clone(),
            HirExpr::Call { ty, .. } => ty.clone(),
            HirExpr::Oper { ty, .. } => ty.clone(),
            HirExpr::Block { ty, .. } => ty.clone(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            HirExpr::Literal { span, .. } => *span,
            HirExpr::Var { span, .. } => *span,
            HirExpr::Call { span, .. } => *span,
            HirExpr::Oper { span, .. } => *span,
            HirExpr::Block { span, .. } => *span,
        }
    }
}
