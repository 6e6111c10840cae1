use std::{cell::RefCell, rc::Rc};

use crate::{DataType, InterfType};

/// Identifies one recorded binding within its registry, in declaration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BindingId(usize);

impl std::fmt::Display for BindingId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "binding{}", self.0)
    }
}

/// One explicit `implements` relation: `bound` is declared to satisfy
/// `interf`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub bound:  DataType,
    pub interf: Rc<InterfType>,
}

/// The set of explicit interface bindings visible from some scope. Each
/// package carries a global registry; each file a local one for bindings that
/// arrived through imports. Append-only: ids stay valid for the whole
/// compilation.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: RefCell<Vec<Binding>>,
}

impl BindingRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add(
        &self,
        bound: DataType,
        interf: Rc<InterfType>,
    ) -> BindingId {
        let mut bindings = self.bindings.borrow_mut();
        let id = BindingId(bindings.len());
        bindings.push(Binding { bound, interf });
        id
    }

    pub fn len(&self) -> usize {
        self.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.borrow().is_empty()
    }

    /// Whether `ty` explicitly binds to `interf`. Structural relations never
    /// count here; only recorded bindings do.
    pub fn implements(
        &self,
        ty: &DataType,
        interf: &Rc<InterfType>,
    ) -> bool {
        self.bindings
            .borrow()
            .iter()
            .any(|b| Rc::ptr_eq(&b.interf, interf) && b.bound == *ty)
    }

    /// Every interface `ty` explicitly binds to, in declaration order.
    pub fn interfaces_of(
        &self,
        ty: &DataType,
    ) -> Vec<Rc<InterfType>> {
        self.bindings
            .borrow()
            .iter()
            .filter(|b| b.bound == *ty)
            .map(|b| b.interf.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Primitive;

    fn showable() -> Rc<InterfType> {
        Rc::new(InterfType {
            name:    "Showable".into(),
            methods: Vec::new(),
        })
    }

    #[test]
    fn implements_only_recorded_bindings() {
        let registry = BindingRegistry::new();
        let interf = showable();
        let int = DataType::Primitive(Primitive::I64);
        let boolean = DataType::Primitive(Primitive::Bool);

        registry.add(int.clone(), interf.clone());

        assert!(registry.implements(&int, &interf));
        assert!(!registry.implements(&boolean, &interf));
        assert_eq!(registry.interfaces_of(&int).len(), 1);
        assert!(registry.interfaces_of(&boolean).is_empty());
    }

    #[test]
    fn ids_follow_declaration_order() {
        let registry = BindingRegistry::new();
        let interf = showable();
        let first = registry.add(DataType::Primitive(Primitive::I64), interf.clone());
        let second = registry.add(DataType::Primitive(Primitive::Bool), interf);
        assert!(first < second);
        assert_eq!(first.to_string(), "binding0");
        assert_eq!(registry.len(), 2);
    }
}
