use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use whirl_typing::{DataType, OpaqueType};
use whirl_utils::{PackageId, Span};

use crate::Package;

/// How a definition was declared, and therefore where it is visible from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclStatus {
    /// Declared in this package without `export`.
    Internal,
    /// Declared in this package inside an export block.
    Exported,
    /// Imported from another package. `reexported` carries the flag of the
    /// `export import` statement that brought it in.
    Remote { reexported: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    TypeDef,
    ValueDef,
    AlgebraicVariant,
    /// A package bound by name in a file's local table.
    Package,
}

/// A named definition in a package's global table, a file's local table, or a
/// local scope.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name:     Rc<str>,
    pub ty:       DataType,
    pub def_kind: DefKind,
    pub status:   DeclStatus,
    pub span:     Span,
}

impl Symbol {
    pub fn new(
        name: Rc<str>,
        ty: DataType,
        def_kind: DefKind,
        status: DeclStatus,
        span: Span,
    ) -> Self {
        Self {
            name,
            ty,
            def_kind,
            status,
            span,
        }
    }

    /// Whether the symbol can be seen from outside its declaring package.
    pub fn visible_externally(&self) -> bool {
        matches!(self.status, DeclStatus::Exported | DeclStatus::Remote { .. })
    }

    /// A fresh symbol for the importing file: always `Remote`, re-exported
    /// exactly when the import statement was.
    pub fn import(
        &self,
        reexported: bool,
    ) -> Symbol {
        Symbol {
            name:     self.name.clone(),
            ty:       self.ty.clone(),
            def_kind: self.def_kind,
            status:   DeclStatus::Remote { reexported },
            span:     self.span,
        }
    }
}

/// A forward reference recorded while resolution is still running.
#[derive(Debug, Clone)]
pub struct UnknownSymbol {
    pub name: Rc<str>,
    pub span: Span,
    /// Set iff the reference was expected to come from another package.
    pub foreign_package: Option<Rc<Package>>,
    /// True when the symbol was referenced as `pkg.name` rather than listed
    /// in an explicit import.
    pub implicit_import: bool,
}

impl UnknownSymbol {
    pub fn local(
        name: Rc<str>,
        span: Span,
    ) -> Self {
        Self {
            name,
            span,
            foreign_package: None,
            implicit_import: false,
        }
    }

    pub fn implicit(
        name: Rc<str>,
        span: Span,
        package: Rc<Package>,
    ) -> Self {
        Self {
            name,
            span,
            foreign_package: Some(package),
            implicit_import: true,
        }
    }

    pub fn explicit(
        name: Rc<str>,
        span: Span,
        package: Rc<Package>,
    ) -> Self {
        Self {
            name,
            span,
            foreign_package: Some(package),
            implicit_import: false,
        }
    }
}

/// The prototype of a type definition currently under resolution. Its
/// `proto` is an [`OpaqueType`] whose body is swapped in once the real
/// definition lands, so every reference taken through the prototype observes
/// the completed type.
#[derive(Debug, Clone)]
pub struct OpaqueSymbol {
    pub name:        Rc<str>,
    pub src_package: PackageId,
    pub proto:       Rc<OpaqueType>,
}

impl OpaqueSymbol {
    pub fn ty(&self) -> DataType {
        DataType::Opaque(self.proto.clone())
    }
}

/// The shared opaque-prototype slot threaded through every walker.
///
/// At most one definition is under resolution at a time: `current` holds its
/// prototype from install until the full definition swaps in, and only the
/// current candidate is visible to name lookups. Prototypes that were handed
/// out to references but whose definition has not completed yet are kept in
/// `outstanding`, so re-installing the same candidate later reuses the exact
/// object everyone already points at.
#[derive(Debug, Default)]
pub struct OpaqueSlot {
    current:     RefCell<Option<OpaqueSymbol>>,
    outstanding: RefCell<BTreeMap<(PackageId, Rc<str>), Rc<OpaqueType>>>,
}

pub type SharedOpaqueSlot = Rc<OpaqueSlot>;

pub fn new_opaque_slot() -> SharedOpaqueSlot {
    Rc::new(OpaqueSlot::default())
}

impl OpaqueSlot {
    /// Makes `name` from `src_package` the current resolution candidate,
    /// reusing its outstanding prototype if one was handed out before.
    pub fn install(
        &self,
        name: Rc<str>,
        src_package: PackageId,
    ) {
        let proto = self
            .outstanding
            .borrow_mut()
            .entry((src_package, name.clone()))
            .or_insert_with(|| OpaqueType::new(name.clone()))
            .clone();
        *self.current.borrow_mut() = Some(OpaqueSymbol {
            name,
            src_package,
            proto,
        });
    }

    /// Drops the current candidate without touching outstanding prototypes.
    pub fn clear(&self) {
        *self.current.borrow_mut() = None;
    }

    /// The current candidate's type, if it is `name` from `expected`. This is
    /// the only view name resolution gets.
    pub fn lookup_current(
        &self,
        name: &str,
        expected: PackageId,
    ) -> Option<DataType> {
        self.current
            .borrow()
            .as_ref()
            .filter(|os| os.src_package == expected && &*os.name == name)
            .map(OpaqueSymbol::ty)
    }

    /// The prototype a definition should complete: the current candidate's
    /// if it is this definition, else any outstanding one handed out for it
    /// earlier.
    pub fn prototype_for(
        &self,
        name: &Rc<str>,
        src_package: PackageId,
    ) -> Option<Rc<OpaqueType>> {
        if let Some(current) = self.current.borrow().as_ref() {
            if current.src_package == src_package && current.name == *name {
                return Some(current.proto.clone());
            }
        }
        self.outstanding.borrow().get(&(src_package, name.clone())).cloned()
    }

    /// The definition swapped in: its prototype's lifetime is over.
    pub fn finish(
        &self,
        name: &Rc<str>,
        src_package: PackageId,
    ) {
        self.outstanding.borrow_mut().remove(&(src_package, name.clone()));
        let matches = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|os| os.src_package == src_package && os.name == *name);
        if matches {
            self.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use whirl_typing::Primitive;

    use super::*;

    fn symbol(status: DeclStatus) -> Symbol {
        Symbol::new(
            "T".into(),
            DataType::Primitive(Primitive::I64),
            DefKind::TypeDef,
            status,
            Span::default(),
        )
    }

    #[test]
    fn external_visibility_follows_status() {
        assert!(!symbol(DeclStatus::Internal).visible_externally());
        assert!(symbol(DeclStatus::Exported).visible_externally());
        assert!(symbol(DeclStatus::Remote { reexported: false }).visible_externally());
    }

    #[test]
    fn opaque_slot_keeps_outstanding_prototypes() {
        let slot = new_opaque_slot();
        let pkg = PackageId::from(1);
        let name: Rc<str> = Rc::from("A");

        slot.install(name.clone(), pkg);
        let first = slot.prototype_for(&name, pkg).unwrap();
        assert!(slot.lookup_current("A", pkg).is_some());
        assert!(slot.lookup_current("A", PackageId::from(2)).is_none());

        // the candidate rotates away without completing; its prototype
        // survives for the next turn
        slot.clear();
        assert!(slot.lookup_current("A", pkg).is_none());
        slot.install(name.clone(), pkg);
        let second = slot.prototype_for(&name, pkg).unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        slot.finish(&name, pkg);
        assert!(slot.lookup_current("A", pkg).is_none());
        assert!(slot.prototype_for(&name, pkg).is_none());
    }

    #[test]
    fn importing_yields_a_remote_clone() {
        let exported = symbol(DeclStatus::Exported);
        let imported = exported.import(true);
        assert_eq!(imported.status, DeclStatus::Remote { reexported: true });
        assert_eq!(imported.name, exported.name);
        assert_eq!(imported.ty, exported.ty);

        let plain = exported.import(false);
        assert_eq!(plain.status, DeclStatus::Remote { reexported: false });
    }
}
