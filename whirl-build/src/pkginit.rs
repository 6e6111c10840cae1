use std::{
    io,
    path::{Path, PathBuf},
    rc::Rc,
};

use whirl_ast::FrontendError;
use whirl_common::{File, Package};
use whirl_utils::{PackageId, SourceId};

use crate::{preprocess, BuildError, Compiler};

/// The file extension of a whirl source file.
pub const SRC_FILE_EXTENSION: &str = "wrl";

impl Compiler {
    /// Parses every source file directly inside `abspath` and creates a new
    /// package from them. Does not extract definitions; it only initializes
    /// the package from the directory's contents and name.
    ///
    /// File-level errors (I/O, scan, parse) are logged to the sink rather
    /// than returned; the function fails only for an invalid package name or
    /// a directory with no usable source files. On success the package is
    /// registered in the dependency graph under its id.
    pub(crate) fn init_package(
        &mut self,
        abspath: &Path,
    ) -> Result<Rc<Package>, BuildError> {
        let pkg_name = abspath.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !is_valid_pkg_name(pkg_name) {
            return Err(BuildError::InvalidPackageName { name: pkg_name.into() });
        }

        let id = PackageId::from_path_bytes(abspath.to_string_lossy().as_bytes());
        let pkg = Package::new(id, pkg_name.into(), abspath.to_path_buf());

        // source files live directly in the package directory; subdirectories
        // are separate packages
        let mut paths: Vec<PathBuf> = Vec::new();
        match std::fs::read_dir(abspath) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(entry) if entry.path().is_file() => paths.push(entry.path()),
                        Ok(_) => {},
                        Err(err) => self.sink.log_io_error(err),
                    }
                }
            },
            Err(err) => self.sink.log_io_error(err),
        }
        paths.sort();

        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some(SRC_FILE_EXTENSION) {
                continue;
            }
            self.sink.set_current_file(&path);

            let source = SourceId::from(self.next_source);
            self.next_source += 1;

            let scanned = match self.frontend.scan(&path, source) {
                Ok(scanned) => scanned,
                Err(err) => {
                    self.log_frontend_error(err);
                    continue;
                },
            };
            if !preprocess::should_compile(&scanned.tags, &self.config) {
                tracing::debug!(path = %path.display(), "file excluded by metadata tags");
                continue;
            }

            let tags = scanned.tags.clone();
            let ast = match self.frontend.parse(scanned) {
                Ok(ast) => ast,
                Err(err) => {
                    self.log_frontend_error(err);
                    continue;
                },
            };
            pkg.add_file(File::new(path, source, ast, tags));
        }

        if pkg.file_count() == 0 {
            return Err(BuildError::NoSourceFiles { name: pkg_name.into() });
        }

        // freestanding builds bring their own core type definitions
        if self.config.core_types {
            preprocess::seed_primitives(&pkg, &self.config);
        }
        self.dep_graph.insert(id, pkg.clone());
        tracing::debug!(name = pkg_name, id = %id, files = pkg.file_count(), "package initialized");
        Ok(pkg)
    }

    fn log_frontend_error(
        &self,
        err: FrontendError,
    ) {
        match err {
            FrontendError::Io(err) => self.sink.log_io_error(err),
            other => self.sink.log_io_error(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
        }
    }
}

/// Whether the package name would be a usable identifier: first byte a
/// letter or underscore, the rest letters, digits, or underscores.
pub(crate) fn is_valid_pkg_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != b'_' {
        return false;
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_name_validity() {
        assert!(is_valid_pkg_name("foo"));
        assert!(is_valid_pkg_name("_internal"));
        assert!(is_valid_pkg_name("pkg2"));
        assert!(!is_valid_pkg_name("1bad"));
        assert!(!is_valid_pkg_name("has-dash"));
        assert!(!is_valid_pkg_name(""));
        assert!(!is_valid_pkg_name("with space"));
    }
}
