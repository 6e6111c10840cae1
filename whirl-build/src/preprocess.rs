use std::{collections::BTreeMap, rc::Rc};

use whirl_common::{DeclStatus, DefKind, Package, Symbol};
use whirl_typing::{DataType, Primitive};
use whirl_utils::Span;

use crate::BuildConfig;

/// Evaluates a file's metadata tags against the build target. A `no_build`
/// flag excludes the file outright; `arch`/`os` tags exclude it when their
/// value disagrees with the target.
pub(crate) fn should_compile(
    tags: &BTreeMap<Rc<str>, Rc<str>>,
    config: &BuildConfig,
) -> bool {
    if tags.contains_key("no_build") {
        return false;
    }
    if let Some(arch) = tags.get("arch") {
        if *arch != config.arch {
            return false;
        }
    }
    if let Some(os) = tags.get("os") {
        if *os != config.os {
            return false;
        }
    }
    true
}

/// Declares the language core types in a fresh package's global table. `int`
/// and `uint` take the target's word width; the walker re-reads them once
/// resolution ends.
pub(crate) fn seed_primitives(
    pkg: &Rc<Package>,
    config: &BuildConfig,
) {
    let primitives: &[(&str, Primitive)] = &[
        ("bool", Primitive::Bool),
        ("string", Primitive::Str),
        ("f32", Primitive::F32),
        ("f64", Primitive::F64),
        ("i8", Primitive::I8),
        ("i16", Primitive::I16),
        ("i32", Primitive::I32),
        ("i64", Primitive::I64),
        ("u8", Primitive::U8),
        ("u16", Primitive::U16),
        ("u32", Primitive::U32),
        ("u64", Primitive::U64),
        ("int", config.int_primitive()),
        ("uint", config.uint_primitive()),
    ];
    for (name, primitive) in primitives {
        let symbol = Symbol::new(
            Rc::from(*name),
            DataType::Primitive(*primitive),
            DefKind::TypeDef,
            DeclStatus::Exported,
            Span::default(),
        );
        // a user definition cannot collide here: the table is empty when a
        // package is initialized
        let _ = pkg.define_global(symbol);
    }
}
