// src/sema/import.rs
//
// Source file ingestion and package resolution. The file fetcher is
// external: sources are handed to the analyzer up front (or between queue
// drains) and `@import` resolves against that set. Each ingested file
// becomes a struct type with root-source backing; re-imports of the same
// absolute path return the same container.

use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::errors::{SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::ContainerDecl;
use crate::frontend::span::LineOffsets;
use crate::frontend::Span;
use crate::sema::analyzer::Analyzer;
use crate::sema::container::RootSource;
use crate::sema::scope::{ScopeId, ScopeKind};
use crate::sema::type_arena::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(pub u32);

impl PackageId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub root_dir: PathBuf,
    pub root_file: PathBuf,
    /// Packages visible to `@import("name")` from files of this package.
    pub deps: FxHashMap<String, PackageId>,
}

#[derive(Debug, Default)]
pub struct PackageTable {
    packages: Vec<Package>,
}

impl PackageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, package: Package) -> PackageId {
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(package);
        id
    }

    pub fn get(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0 as usize]
    }
}

/// A fetched-but-unanalyzed source file, parsed by the external frontend.
#[derive(Debug)]
pub struct PendingSource {
    pub source: String,
    pub ast: ContainerDecl,
}

/// Root containers by resolved absolute path; append-only.
#[derive(Debug, Default)]
pub struct ImportTable {
    roots: FxHashMap<PathBuf, TypeId>,
}

impl ImportTable {
    pub fn get(&self, path: &Path) -> Option<TypeId> {
        self.roots.get(path).copied()
    }

    pub fn insert(&mut self, path: PathBuf, root: TypeId) {
        self.roots.insert(path, root);
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Analyzer {
    /// Register a package rooted at `root_file`.
    pub fn add_package(&mut self, name: &str, root_file: PathBuf) -> PackageId {
        let root_dir = root_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.packages.push(Package {
            name: name.to_string(),
            root_dir,
            root_file,
            deps: FxHashMap::default(),
        })
    }

    pub fn add_package_dep(&mut self, package: PackageId, name: &str, dep: PackageId) {
        self.packages
            .get_mut(package)
            .deps
            .insert(name.to_string(), dep);
    }

    /// Hand the analyzer a parsed source file; `@import` finds it by path.
    pub fn provide_source(&mut self, path: PathBuf, source: String, ast: ContainerDecl) {
        self.pending_sources.insert(path, PendingSource { source, ast });
    }

    /// Ingest a package's root file.
    pub fn import_package_root(&mut self, package: PackageId) -> SemaResult<TypeId> {
        let root_file = self.packages.get(package).root_file.clone();
        self.import_file(package, root_file, Span::default(), None)
    }

    /// `@import(target)` from the file owning `scope`. A package-name hit
    /// resolves through the importer's package table; anything else is a
    /// path relative to the importing file, which must stay inside the
    /// package root.
    pub fn analyze_import(
        &mut self,
        scope: ScopeId,
        target: &str,
        span: Span,
    ) -> SemaResult<TypeId> {
        let importer_container = self.scopes.owner_container(scope);
        let importer_file = self.containers.get(importer_container).file.clone();
        let importer_pkg = self.package_of_file(&importer_file);

        if let Some(&dep) = self.packages.get(importer_pkg).deps.get(target) {
            return self.import_package_root(dep);
        }

        let importer_dir = importer_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let resolved = normalize_path(&importer_dir.join(target));
        let pkg_root = self.packages.get(importer_pkg).root_dir.clone();
        if !resolved.starts_with(&pkg_root) {
            self.add_error(
                &importer_file,
                span,
                SemanticError::ImportOutsidePkgPath {
                    path: resolved.display().to_string(),
                    span: span.into(),
                },
            );
            return Err(SemanticAnalyzeFail);
        }
        self.import_file(importer_pkg, resolved, span, Some(importer_file))
    }

    fn import_file(
        &mut self,
        package: PackageId,
        path: PathBuf,
        span: Span,
        importer_file: Option<PathBuf>,
    ) -> SemaResult<TypeId> {
        if let Some(existing) = self.imports.get(&path) {
            return Ok(existing);
        }
        let pending = match self.pending_sources.remove(&path) {
            Some(pending) => pending,
            None => {
                let site = importer_file.unwrap_or_else(|| path.clone());
                self.add_error(
                    &site,
                    span,
                    SemanticError::FileFetchFailed {
                        path: path.display().to_string(),
                        reason: "file not found".to_string(),
                        span: span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
        };
        self.create_root_container(package, path, pending)
    }

    /// Build the root struct for one source file: the namespace name is the
    /// package path plus the file's relative path with separators turned
    /// into dots.
    fn create_root_container(
        &mut self,
        package: PackageId,
        path: PathBuf,
        pending: PendingSource,
    ) -> SemaResult<TypeId> {
        let name = self.root_namespace_name(package, &path);
        let decl = pending.ast;

        // Allocate state by hand: a root has no parent scope.
        let container = self.containers.push(crate::sema::container::ContainerState {
            name: name.clone(),
            kind: decl.kind,
            layout: decl.layout,
            type_id: TypeId::placeholder(),
            span: decl.span,
            file: path.clone(),
            status: crate::sema::container::ResolveStatus::Unstarted,
            resolving_zero_bits: false,
            resolving_other: false,
            src_fields: decl.fields.clone(),
            fields: decl
                .fields
                .iter()
                .map(|f| crate::sema::container::FieldInfo {
                    name: Some(f.name),
                    span: f.span,
                    ..Default::default()
                })
                .collect(),
            fields_by_name: FxHashMap::default(),
            decls_scope: None,
            arg: decl.arg.clone(),
            zero_bits: None,
            requires_comptime: false,
            gen_fields: Vec::new(),
            union_tag_type: None,
            most_aligned_member: None,
            tag_first: false,
            gen_tag_index: None,
            gen_union_index: None,
            tag_int_type: None,
            explicit_tag_type: false,
            special: crate::sema::container::ContainerSpecial::None,
            root: Some(RootSource {
                package,
                path: path.clone(),
                line_offsets: LineOffsets::compute(&pending.source),
                source: pending.source,
            }),
        });
        let type_id = self.types.register_container(decl.kind, container, name);
        self.containers.get_mut(container).type_id = type_id;
        // Register before scanning so import cycles resolve to this root.
        self.imports.insert(path, type_id);

        let decls_scope = self.scopes.alloc(
            None,
            ScopeKind::Decls {
                container,
                decls: FxHashMap::default(),
                using: Vec::new(),
            },
        );
        self.containers.get_mut(container).decls_scope = Some(decls_scope);
        self.scan_container_decls(container, &decl.decls);
        self.index_container_fields(container)?;
        Ok(type_id)
    }

    fn root_namespace_name(&self, package: PackageId, path: &Path) -> String {
        let pkg = self.packages.get(package);
        let rel = path.strip_prefix(&pkg.root_dir).unwrap_or(path);
        let dotted: Vec<String> = rel
            .with_extension("")
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if pkg.name.is_empty() {
            dotted.join(".")
        } else {
            format!("{}.{}", pkg.name, dotted.join("."))
        }
    }

    fn package_of_file(&self, file: &Path) -> PackageId {
        if let Some(root_ty) = self.imports.get(file) {
            if let Some(container) = self.types.is_container(root_ty) {
                if let Some(root) = &self.containers.get(container).root {
                    return root.package;
                }
            }
        }
        // Files created outside any import (tests, synthesized containers)
        // belong to the first registered package.
        PackageId(0)
    }
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/b/./c/../d.ci")),
            PathBuf::from("/a/b/d.ci")
        );
        assert_eq!(
            normalize_path(Path::new("/a/../../b")),
            PathBuf::from("/b")
        );
    }
}
