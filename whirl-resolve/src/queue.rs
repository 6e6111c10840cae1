use std::{collections::BTreeMap, collections::VecDeque, rc::Rc};

use whirl_ast::AstBranch;
use whirl_common::{DeclStatus, File, UnknownSymbol};

/// One definition whose first walk hit forward references. It keeps its AST
/// branch alive after the file's tree is released, along with the names it
/// was last seen waiting on.
pub struct Definition {
    pub branch:   AstBranch,
    pub unknowns: BTreeMap<Rc<str>, UnknownSymbol>,
    pub file:     Rc<File>,
    pub status:   DeclStatus,
}

/// FIFO of unresolved definitions for one package.
#[derive(Default)]
pub struct DefinitionQueue {
    defs: VecDeque<Definition>,
}

impl DefinitionQueue {
    pub fn enqueue(
        &mut self,
        def: Definition,
    ) {
        self.defs.push_back(def);
    }

    pub fn dequeue(&mut self) -> Option<Definition> {
        self.defs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Total count of unresolved names across all queued definitions.
    pub fn total_unknowns(&self) -> usize {
        self.defs.iter().map(|d| d.unknowns.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.defs.iter()
    }
}
