// src/sema/scope.rs
//
// Scope chains, the top-level declaration table, and the export table.
// Scopes form a singly linked list through an arena; behavior is dispatched
// on the tag ("is a decls scope", "is an expr scope", "binds a variable")
// rather than through virtual calls.

use rustc_hash::FxHashMap;

use crate::errors::{SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{
    CompTimeDecl, Decl, ExprKind, FnDecl, NodeId, UsingNamespaceDecl, VarDecl,
};
use crate::frontend::intern::Symbol;
use crate::frontend::Span;
use crate::sema::analyzer::Analyzer;
use crate::sema::container::ContainerId;
use crate::sema::func::FnId;
use crate::sema::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TldId(u32);

impl TldId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub enum ScopeKind {
    /// A container namespace: file root or nested container.
    Decls {
        container: ContainerId,
        decls: FxHashMap<Symbol, TldId>,
        /// `usingnamespace` members, merged on demand.
        using: Vec<TldId>,
    },
    Block {
        node: NodeId,
    },
    FnDef {
        fn_id: FnId,
    },
    /// A comptime variable binding.
    VarDecl {
        name: Symbol,
        value: Value,
        span: Span,
    },
    Loop {
        node: NodeId,
    },
    Runtime {
        node: NodeId,
    },
    Defer {
        node: NodeId,
    },
    DeferExpr {
        node: NodeId,
    },
    CImport {
        node: NodeId,
    },
    Suspend {
        node: NodeId,
    },
    CompTime {
        node: NodeId,
    },
    TypeOf {
        node: NodeId,
    },
    /// An expression whose temporaries may need to survive a suspension.
    Expr {
        node: NodeId,
    },
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    /// Spill mark used by async frame analysis; meaningful on Expr scopes.
    pub need_spill: bool,
}

impl Scope {
    pub fn is_decls(&self) -> bool {
        matches!(self.kind, ScopeKind::Decls { .. })
    }

    pub fn is_expr(&self) -> bool {
        matches!(self.kind, ScopeKind::Expr { .. })
    }

    pub fn binds_variable(&self) -> bool {
        matches!(self.kind, ScopeKind::VarDecl { .. })
    }

    pub fn is_comptime(&self) -> bool {
        matches!(self.kind, ScopeKind::CompTime { .. })
    }
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            kind,
            need_spill: false,
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Nearest enclosing decls scope (every chain terminates at one).
    pub fn root_decls(&self, mut id: ScopeId) -> ScopeId {
        loop {
            if self.get(id).is_decls() {
                return id;
            }
            id = self.get(id).parent.expect("scope chain without decls root");
        }
    }

    /// The container owning the nearest decls scope.
    pub fn owner_container(&self, id: ScopeId) -> ContainerId {
        match &self.get(self.root_decls(id)).kind {
            ScopeKind::Decls { container, .. } => *container,
            _ => unreachable!(),
        }
    }

    /// Nearest enclosing function-definition scope, if any.
    pub fn enclosing_fn(&self, mut id: ScopeId) -> Option<FnId> {
        loop {
            match &self.get(id).kind {
                ScopeKind::FnDef { fn_id } => return Some(*fn_id),
                _ => id = self.get(id).parent?,
            }
        }
    }
}

/// Lifecycle of a top-level declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TldResolution {
    Unresolved,
    Resolving,
    Ok,
    /// Resolved to a lazy value; forcing may still run user code.
    OkLazy,
    Invalid,
}

#[derive(Debug)]
pub enum TldKind {
    Var(VarDecl),
    Fn { decl: FnDecl, fn_id: Option<FnId> },
    /// A `const Name = struct { ... }` whose initializer is a bare container;
    /// the container takes the declaration's name.
    Container {
        decl: VarDecl,
        container: Option<ContainerId>,
    },
    CompTime(CompTimeDecl),
    UsingNamespace(UsingNamespaceDecl),
}

#[derive(Debug)]
pub struct Tld {
    pub kind: TldKind,
    pub name: Option<Symbol>,
    pub is_pub: bool,
    pub span: Span,
    /// The decls scope this Tld was declared in.
    pub parent_scope: ScopeId,
    pub resolution: TldResolution,
    /// Resolved value (type, function reference, constant).
    pub value: Option<Value>,
}

#[derive(Debug, Default)]
pub struct TldTable {
    tlds: Vec<Tld>,
}

impl TldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tld: Tld) -> TldId {
        let id = TldId(self.tlds.len() as u32);
        self.tlds.push(tld);
        id
    }

    pub fn get(&self, id: TldId) -> &Tld {
        &self.tlds[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TldId) -> &mut Tld {
        &mut self.tlds[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.tlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tlds.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TldId> {
        (0..self.tlds.len() as u32).map(TldId)
    }
}

/// Result of a name lookup.
#[derive(Debug, Clone, Copy)]
pub enum NameRef {
    Tld(TldId),
    /// A comptime variable binding in the scope chain.
    ScopeVar(ScopeId),
}

impl Analyzer {
    /// Walk outward from `scope` looking for `name`.
    pub fn lookup_name(&self, scope: ScopeId, name: Symbol) -> Option<NameRef> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            match &self.scopes.get(id).kind {
                ScopeKind::VarDecl { name: bound, .. } if *bound == name => {
                    return Some(NameRef::ScopeVar(id));
                }
                ScopeKind::Decls { decls, using, .. } => {
                    if let Some(&tld) = decls.get(&name) {
                        return Some(NameRef::Tld(tld));
                    }
                    if let Some(found) = self.lookup_using(using, name) {
                        return Some(NameRef::Tld(found));
                    }
                }
                _ => {}
            }
            cursor = self.scopes.get(id).parent;
        }
        None
    }

    /// Search `usingnamespace` members for a public name. Only names
    /// declared in the target container's own source file are visible;
    /// re-imports from other files are never re-exported.
    fn lookup_using(&self, using: &[TldId], name: Symbol) -> Option<TldId> {
        for &using_tld in using {
            if !matches!(self.tlds.get(using_tld).kind, TldKind::UsingNamespace(_)) {
                continue;
            }
            // The target container is recorded in the Tld's value once the
            // using_namespace has been resolved; unresolved ones cannot
            // contribute names yet.
            let container_ty = match self.tlds.get(using_tld).value.as_ref() {
                Some(val) => match val.as_type() {
                    Some(ty) => ty,
                    None => continue,
                },
                None => continue,
            };
            let container = match self.types.is_container(container_ty) {
                Some(c) => c,
                None => continue,
            };
            let target_file = self.containers.get(container).file.clone();
            let decls_scope = match self.containers.get(container).decls_scope {
                Some(s) => s,
                None => continue,
            };
            if let ScopeKind::Decls { decls, .. } = &self.scopes.get(decls_scope).kind {
                if let Some(&tld) = decls.get(&name) {
                    let tld_ref = self.tlds.get(tld);
                    if !tld_ref.is_pub {
                        continue;
                    }
                    let tld_container = self.scopes.owner_container(tld_ref.parent_scope);
                    if self.containers.get(tld_container).file == target_file {
                        return Some(tld);
                    }
                }
            }
        }
        None
    }

    // ========================================================================
    // Declaration scanning
    // ========================================================================

    /// Populate a container's decls scope from its AST declarations,
    /// checking the shadowing rules. Every new Tld is pushed onto the
    /// resolution queue.
    pub fn scan_container_decls(&mut self, container: ContainerId, decls: &[Decl]) {
        let decls_scope = self
            .containers
            .get(container)
            .decls_scope
            .expect("container scope created before decl scan");
        for decl in decls {
            match decl {
                Decl::Var(var) => {
                    // `const Name = struct { ... }` binds the container
                    // directly so it carries the declared name.
                    let kind = match var.init.as_ref().map(|e| &e.kind) {
                        Some(ExprKind::ContainerDecl(_)) if var.is_const => TldKind::Container {
                            decl: var.clone(),
                            container: None,
                        },
                        _ => TldKind::Var(var.clone()),
                    };
                    self.add_tld(decls_scope, kind, Some(var.name), var.is_pub, var.span);
                }
                Decl::Fn(fn_decl) => {
                    let name = fn_decl.proto.name;
                    let span = fn_decl.proto.span;
                    let is_pub = fn_decl.proto.is_pub;
                    if name.is_none() {
                        self.add_error_in_scope(
                            decls_scope,
                            span,
                            SemanticError::MissingFnName { span: span.into() },
                        );
                        continue;
                    }
                    self.add_tld(
                        decls_scope,
                        TldKind::Fn {
                            decl: fn_decl.clone(),
                            fn_id: None,
                        },
                        name,
                        is_pub,
                        span,
                    );
                }
                Decl::CompTime(block) => {
                    let span = block.span;
                    self.add_tld(decls_scope, TldKind::CompTime(block.clone()), None, false, span);
                }
                Decl::UsingNamespace(using) => {
                    let span = using.span;
                    let is_pub = using.is_pub;
                    let id = self.add_tld(
                        decls_scope,
                        TldKind::UsingNamespace(using.clone()),
                        None,
                        is_pub,
                        span,
                    );
                    if let Some(id) = id {
                        if let ScopeKind::Decls { using, .. } =
                            &mut self.scopes.get_mut(decls_scope).kind
                        {
                            using.push(id);
                        }
                    }
                }
            }
        }
    }

    fn add_tld(
        &mut self,
        decls_scope: ScopeId,
        kind: TldKind,
        name: Option<Symbol>,
        is_pub: bool,
        span: Span,
    ) -> Option<TldId> {
        if let Some(name) = name {
            if let Err(err) = self.check_shadowing(decls_scope, name, span) {
                self.add_error_in_scope(decls_scope, span, err);
                return None;
            }
        }
        let id = self.tlds.push(Tld {
            kind,
            name,
            is_pub,
            span,
            parent_scope: decls_scope,
            resolution: TldResolution::Unresolved,
            value: None,
        });
        if let Some(name) = name {
            if let ScopeKind::Decls { decls, .. } = &mut self.scopes.get_mut(decls_scope).kind {
                decls.insert(name, id);
            }
        }
        self.enqueue_tld(id);
        Some(id)
    }

    /// The three shadowing rules: primitives, outer scopes, same scope.
    pub fn check_shadowing(
        &self,
        scope: ScopeId,
        name: Symbol,
        span: Span,
    ) -> Result<(), SemanticError> {
        let text = self.interner.resolve(name).to_string();
        if self.interner.is_reserved(name) || crate::sema::comptime::is_int_type_name(&text) {
            return Err(SemanticError::ShadowsPrimitive {
                name: text,
                span: span.into(),
            });
        }
        // Same scope first: a more specific diagnostic than outer shadowing.
        if let ScopeKind::Decls { decls, .. } = &self.scopes.get(scope).kind {
            if let Some(&existing) = decls.get(&name) {
                return Err(SemanticError::Redeclaration {
                    name: text,
                    span: span.into(),
                    previous: self.tlds.get(existing).span.into(),
                });
            }
        }
        if let Some(parent) = self.scopes.get(scope).parent {
            if let Some(found) = self.lookup_name(parent, name) {
                let previous = match found {
                    NameRef::Tld(tld) => self.tlds.get(tld).span,
                    NameRef::ScopeVar(var_scope) => match &self.scopes.get(var_scope).kind {
                        ScopeKind::VarDecl { span, .. } => *span,
                        _ => Span::default(),
                    },
                };
                return Err(SemanticError::ShadowsOuter {
                    name: text,
                    span: span.into(),
                    previous: previous.into(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Exports
    // ========================================================================

    /// Register an exported symbol, diagnosing collisions.
    pub fn add_export(&mut self, name: &str, scope: ScopeId, span: Span) -> SemaResult<()> {
        if let Some(&(_, previous)) = self.exports.get(name) {
            self.add_error_in_scope(
                scope,
                span,
                SemanticError::ExportCollision {
                    name: name.to_string(),
                    span: span.into(),
                    previous: previous.into(),
                },
            );
            return Err(SemanticAnalyzeFail);
        }
        let container = self.scopes.owner_container(scope);
        self.exports
            .insert(name.to_string(), (container, span));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::frontend::ast::{ContainerDecl, ContainerKind, ContainerLayout, NodeId};
    use crate::sema::import::PackageId;
    use crate::sema::target::Target;

    use super::*;

    fn analyzer_with_root() -> (Analyzer, ScopeId) {
        let mut az = Analyzer::new(Target::x86_64());
        az.add_package("main", PathBuf::from("/pkg/main.ci"));
        az.provide_source(
            PathBuf::from("/pkg/main.ci"),
            String::new(),
            ContainerDecl {
                id: NodeId(1),
                span: Span::default(),
                name: None,
                kind: ContainerKind::Struct,
                layout: ContainerLayout::Auto,
                arg: None,
                fields: Vec::new(),
                decls: Vec::new(),
            },
        );
        let root = az.import_package_root(PackageId(0)).unwrap();
        let container = az.types.is_container(root).unwrap();
        let scope = az.containers.get(container).decls_scope.unwrap();
        (az, scope)
    }

    #[test]
    fn shadowing_a_primitive_is_rejected() {
        let (mut az, scope) = analyzer_with_root();
        let sym = az.interner.intern("u32");
        let err = az.check_shadowing(scope, sym, Span::new(0, 3));
        assert!(matches!(err, Err(SemanticError::ShadowsPrimitive { .. })));
    }

    #[test]
    fn lookup_walks_variable_bindings_outward() {
        let (mut az, scope) = analyzer_with_root();
        let sym = az.interner.intern("limit");
        let inner = az.scopes.alloc(
            Some(scope),
            ScopeKind::VarDecl {
                name: sym,
                value: Value::runtime(az.types.primitives.u8),
                span: Span::new(4, 9),
            },
        );
        let block = az.scopes.alloc(Some(inner), ScopeKind::Block { node: NodeId(7) });
        assert!(matches!(
            az.lookup_name(block, sym),
            Some(NameRef::ScopeVar(found)) if found == inner
        ));
        let other = az.interner.intern("missing");
        assert!(az.lookup_name(block, other).is_none());
    }

    #[test]
    fn export_collision_names_both_sites() {
        let (mut az, scope) = analyzer_with_root();
        assert!(az.add_export("entry", scope, Span::new(0, 5)).is_ok());
        assert!(az.add_export("entry", scope, Span::new(10, 15)).is_err());
        assert!(az
            .errors
            .iter()
            .any(|e| matches!(e.error, SemanticError::ExportCollision { .. })));
    }
}
