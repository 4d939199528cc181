// src/sema/analyzer.rs
//
// The global analysis context: every registry (types, containers, functions,
// scopes, declarations, imports, exports, errors) plus the two FIFO work
// queues that drive whole-program resolution. Exactly one Analyzer exists
// per compilation; all registries are append-only and entries never change
// identity after insertion.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::errors::{ErrorMsg, ErrorNote, SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{ErrorSetField, ExprKind};
use crate::frontend::intern::{Interner, Symbol};
use crate::frontend::Span;
use crate::sema::comptime::DEFAULT_BRANCH_QUOTA;
use crate::sema::container::{ContainerId, ContainerTable, ResolveStatus};
use crate::sema::func::{FnId, FnTable};
use crate::sema::import::{ImportTable, PackageTable, PendingSource};
use crate::sema::scope::{ScopeArena, ScopeId, ScopeKind, TldId, TldKind, TldResolution, TldTable};
use crate::sema::target::Target;
use crate::sema::type_arena::{
    ErrorCode, ErrorSetInfo, ErrorSetMember, TypeArena, TypeId, TypeKind,
};
use crate::sema::value::{Value, ValueData};

/// Globally declared errors: one code per distinct error name.
#[derive(Debug, Default)]
pub struct GlobalErrorTable {
    by_name: FxHashMap<Symbol, ErrorCode>,
    decls: Vec<(Symbol, Span)>,
}

impl GlobalErrorTable {
    pub fn count(&self) -> u32 {
        self.decls.len() as u32
    }

    pub fn name_of(&self, code: ErrorCode) -> Option<Symbol> {
        self.decls.get(code.0 as usize - 1).map(|&(sym, _)| sym)
    }
}

/// The single analysis context. The design forbids two of these sharing
/// registries; everything threads through `&mut self`.
#[derive(Debug)]
pub struct Analyzer {
    pub target: Target,
    pub interner: Interner,
    pub types: TypeArena,
    pub containers: ContainerTable,
    pub fns: FnTable,
    pub scopes: ScopeArena,
    pub tlds: TldTable,
    pub packages: PackageTable,
    pub imports: ImportTable,
    pub pending_sources: FxHashMap<PathBuf, PendingSource>,
    pub global_errors: GlobalErrorTable,
    /// Exported symbols by export name.
    pub exports: FxHashMap<String, (ContainerId, Span)>,
    pub errors: Vec<ErrorMsg>,
    /// Notes accumulated during a resolution chain, attached to the next
    /// top-level diagnostic.
    trace_notes: Vec<ErrorNote>,
    resolve_queue: VecDeque<TldId>,
    fn_body_queue: VecDeque<FnId>,
    pub(crate) stack_trace_type_cache: Option<TypeId>,
}

impl Analyzer {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            interner: Interner::new(),
            types: TypeArena::new(target),
            containers: ContainerTable::new(),
            fns: FnTable::new(),
            scopes: ScopeArena::new(),
            tlds: TldTable::new(),
            packages: PackageTable::new(),
            imports: ImportTable::default(),
            pending_sources: FxHashMap::default(),
            global_errors: GlobalErrorTable::default(),
            exports: FxHashMap::default(),
            errors: Vec::new(),
            trace_notes: Vec::new(),
            resolve_queue: VecDeque::new(),
            fn_body_queue: VecDeque::new(),
            stack_trace_type_cache: None,
        }
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Drain both work queues (each may feed the other), then run async
    /// inference and frame synthesis. Analysis continues across failed
    /// declarations; the error count is only meaningful afterwards.
    pub fn perform_analysis(&mut self) {
        loop {
            if let Some(tld) = self.resolve_queue.pop_front() {
                let _ = self.resolve_tld(tld);
                continue;
            }
            if let Some(fn_id) = self.fn_body_queue.pop_front() {
                let _ = self.analyze_fn_body(fn_id);
                continue;
            }
            break;
        }
        self.run_async_inference();
        tracing::debug!(errors = self.errors.len(), "analysis complete");
    }

    pub(crate) fn enqueue_tld(&mut self, tld: TldId) {
        self.resolve_queue.push_back(tld);
    }

    pub(crate) fn enqueue_fn_body(&mut self, fn_id: FnId) {
        self.fn_body_queue.push_back(fn_id);
    }

    // ========================================================================
    // Top-level declaration resolution
    // ========================================================================

    /// Drive one declaration through Unresolved -> Resolving -> {Ok,
    /// Invalid}. Reentering a Resolving declaration is a dependency cycle.
    pub fn resolve_tld(&mut self, tld: TldId) -> SemaResult<()> {
        match self.tlds.get(tld).resolution {
            TldResolution::Ok | TldResolution::OkLazy => return Ok(()),
            TldResolution::Invalid => return Err(SemanticAnalyzeFail),
            TldResolution::Resolving => {
                let span = self.tlds.get(tld).span;
                let name = self
                    .tlds
                    .get(tld)
                    .name
                    .map(|sym| self.interner.resolve(sym).to_string())
                    .unwrap_or_else(|| "(declaration)".to_string());
                let scope = self.tlds.get(tld).parent_scope;
                self.add_error_in_scope(
                    scope,
                    span,
                    SemanticError::DependsOnItself {
                        kind: "declaration",
                        name,
                        span: span.into(),
                    },
                );
                self.tlds.get_mut(tld).resolution = TldResolution::Invalid;
                return Err(SemanticAnalyzeFail);
            }
            TldResolution::Unresolved => {}
        }
        self.tlds.get_mut(tld).resolution = TldResolution::Resolving;
        let result = self.resolve_tld_inner(tld);
        let entry = self.tlds.get_mut(tld);
        // A cycle may already have marked it Invalid.
        if entry.resolution == TldResolution::Resolving {
            entry.resolution = match result {
                Ok(()) => TldResolution::Ok,
                Err(_) => TldResolution::Invalid,
            };
        }
        result
    }

    fn resolve_tld_inner(&mut self, tld: TldId) -> SemaResult<()> {
        let parent_scope = self.tlds.get(tld).parent_scope;
        let metatype = self.types.primitives.metatype;
        match &self.tlds.get(tld).kind {
            TldKind::Container { decl, .. } => {
                let decl = decl.clone();
                let container_decl = match decl.init.as_ref().map(|e| &e.kind) {
                    Some(ExprKind::ContainerDecl(inner)) => (**inner).clone(),
                    _ => return Err(SemanticAnalyzeFail),
                };
                let name = self.interner.resolve(decl.name).to_string();
                let ty = self.add_container_from_decl(parent_scope, &container_decl, Some(name))?;
                let container_id = self.types.is_container(ty);
                let entry = self.tlds.get_mut(tld);
                entry.value = Some(Value::of_type(metatype, ty));
                if let TldKind::Container { container, .. } = &mut entry.kind {
                    *container = container_id;
                }
                Ok(())
            }
            TldKind::Var(decl) => {
                let decl = decl.clone();
                let expected = match &decl.type_expr {
                    Some(type_expr) => Some(self.eval_type_expr(parent_scope, type_expr)?),
                    None => None,
                };
                let value = match &decl.init {
                    Some(init) if decl.is_const || decl.is_comptime => {
                        let mut quota = DEFAULT_BRANCH_QUOTA;
                        self.eval_comptime_expr(parent_scope, init, expected, &mut quota)?
                    }
                    Some(init) => {
                        // Runtime globals still need a type.
                        let ty = match expected {
                            Some(ty) => ty,
                            None => {
                                let mut quota = DEFAULT_BRANCH_QUOTA;
                                self.eval_comptime_expr(parent_scope, init, None, &mut quota)?
                                    .ty
                            }
                        };
                        Value::runtime(ty)
                    }
                    None => {
                        let ty = match expected {
                            Some(ty) => ty,
                            None => {
                                self.add_error_in_scope(
                                    parent_scope,
                                    decl.span,
                                    SemanticError::UnableToInferVarType {
                                        span: decl.span.into(),
                                    },
                                );
                                return Err(SemanticAnalyzeFail);
                            }
                        };
                        Value::undef(ty)
                    }
                };
                if let Some(export_name) = decl.export_name.clone() {
                    let _ = self.add_export(&export_name, parent_scope, decl.span);
                }
                self.tlds.get_mut(tld).value = Some(value);
                Ok(())
            }
            TldKind::Fn { decl, .. } => {
                let decl = decl.clone();
                let fn_id = self.register_fn(parent_scope, &decl)?;
                let fn_type = self.fns.get(fn_id).fn_type.unwrap();
                let entry = self.tlds.get_mut(tld);
                entry.value = Some(Value::static_(fn_type, ValueData::FnRef(fn_id)));
                if let TldKind::Fn { fn_id: slot, .. } = &mut entry.kind {
                    *slot = Some(fn_id);
                }
                Ok(())
            }
            TldKind::CompTime(decl) => {
                let decl = decl.clone();
                let scope = self
                    .scopes
                    .alloc(Some(parent_scope), ScopeKind::CompTime { node: decl.id });
                let mut quota = DEFAULT_BRANCH_QUOTA;
                self.eval_comptime_block(scope, &decl.block, &mut quota)
            }
            TldKind::UsingNamespace(decl) => {
                let decl = decl.clone();
                let ty = self.eval_type_expr(parent_scope, &decl.target)?;
                if self.types.is_container(ty).is_none() {
                    let found = self.types.name(ty).to_string();
                    self.add_error_in_scope(
                        parent_scope,
                        decl.span,
                        SemanticError::ExpectedType {
                            found,
                            span: decl.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
                self.tlds.get_mut(tld).value = Some(Value::of_type(metatype, ty));
                Ok(())
            }
        }
    }

    // ========================================================================
    // Type-level layout queries
    // ========================================================================

    /// Fill in a type's layout header, resolving whatever it depends on.
    pub fn ensure_type_layout(&mut self, ty: TypeId) -> SemaResult<()> {
        if self.types.get(ty).abi_size.is_some() {
            return Ok(());
        }
        match self.types.get(ty).kind.clone() {
            TypeKind::Pointer(info) => {
                let child_has_bits = !self.type_is_zero_bits(info.child)?;
                let (size, bits, align) = if child_has_bits {
                    (
                        self.target.ptr_bytes,
                        self.target.ptr_bits(),
                        self.target.ptr_align(),
                    )
                } else {
                    (0, 0, 1)
                };
                let entry = self.types.get_mut(ty);
                entry.abi_size = Some(size);
                entry.size_in_bits = Some(bits);
                entry.abi_align = Some(align);
                Ok(())
            }
            TypeKind::Array { child, len } => {
                self.ensure_type_layout(child)?;
                let child_data = self.types.get(child);
                let (size, bits, align) = (
                    child_data.abi_size.unwrap(),
                    child_data.size_in_bits.unwrap(),
                    child_data.abi_align.unwrap(),
                );
                let entry = self.types.get_mut(ty);
                entry.abi_size = Some(size * len);
                entry.size_in_bits = Some(if len == 0 { 0 } else { size * 8 * (len - 1) + bits });
                entry.abi_align = Some(if size * len == 0 { 1 } else { align });
                Ok(())
            }
            TypeKind::Vector { elem, len } => {
                self.ensure_type_layout(elem)?;
                let elem_data = self.types.get(elem);
                let total = elem_data.abi_size.unwrap() * len as u64;
                let bits = elem_data.size_in_bits.unwrap() * len as u64;
                let entry = self.types.get_mut(ty);
                entry.abi_size = Some(total);
                entry.size_in_bits = Some(bits);
                entry.abi_align = Some(if total == 0 {
                    1
                } else {
                    crate::sema::layout::ceil_pow2_u32(total.min(16) as u32)
                });
                Ok(())
            }
            TypeKind::Optional { child } => {
                self.ensure_type_layout(child)?;
                let bool_layout = (1u64, 1u64, 1u32);
                let child_data = self.types.get(child);
                let (size, bits, align) = if self.types.optional_child_uses_null_slot(child) {
                    // Non-null pointers and error sets have a spare zero
                    // encoding; the optional is the child itself.
                    (
                        child_data.abi_size.unwrap(),
                        child_data.size_in_bits.unwrap(),
                        child_data.abi_align.unwrap(),
                    )
                } else if child_data.is_zero_bits() {
                    bool_layout
                } else {
                    let child_size = child_data.abi_size.unwrap();
                    let child_align = child_data.abi_align.unwrap();
                    // One tag byte plus padding up to the child alignment.
                    let size = child_size + child_align as u64;
                    (size, size * 8, child_align)
                };
                let entry = self.types.get_mut(ty);
                entry.abi_size = Some(size);
                entry.size_in_bits = Some(bits);
                entry.abi_align = Some(align);
                Ok(())
            }
            TypeKind::ErrorUnion {
                err_set, payload, ..
            } => {
                self.ensure_type_layout(err_set)?;
                self.ensure_type_layout(payload)?;
                let err_data = self.types.get(err_set);
                let (err_size, err_align) =
                    (err_data.abi_size.unwrap(), err_data.abi_align.unwrap());
                let payload_data = self.types.get(payload);
                let (size, bits, align, pad) = if payload_data.is_zero_bits() {
                    (err_size, err_size * 8, err_align, 0)
                } else {
                    let payload_size = payload_data.abi_size.unwrap();
                    let payload_align = payload_data.abi_align.unwrap();
                    let payload_offset =
                        crate::sema::layout::align_forward(err_size, payload_align as u64);
                    let align = err_align.max(payload_align);
                    let size = crate::sema::layout::align_forward(
                        payload_offset + payload_size,
                        align as u64,
                    );
                    (size, size * 8, align, payload_offset - err_size)
                };
                let entry = self.types.get_mut(ty);
                entry.abi_size = Some(size);
                entry.size_in_bits = Some(bits);
                entry.abi_align = Some(align);
                if let TypeKind::ErrorUnion { pad_bytes, .. } = &mut entry.kind {
                    *pad_bytes = pad;
                }
                Ok(())
            }
            TypeKind::Struct { container }
            | TypeKind::Union { container }
            | TypeKind::Enum { container } => {
                self.resolve_container(container, ResolveStatus::SizeKnown)
            }
            TypeKind::FnFrame { fn_id, .. } => {
                let mut chain = Vec::new();
                self.resolve_fn_frame(fn_id, &mut chain)?;
                Ok(())
            }
            TypeKind::Opaque { .. } => Err(SemanticAnalyzeFail),
            // Everything else had its header filled at construction.
            _ => {
                debug_assert!(
                    false,
                    "type '{}' constructed without a layout header",
                    self.types.name(ty)
                );
                Err(SemanticAnalyzeFail)
            }
        }
    }

    pub fn type_abi_size(&mut self, ty: TypeId) -> SemaResult<u64> {
        self.ensure_type_layout(ty)?;
        self.types.get(ty).abi_size.ok_or(SemanticAnalyzeFail)
    }

    pub fn type_abi_align(&mut self, ty: TypeId) -> SemaResult<u32> {
        self.ensure_type_layout(ty)?;
        self.types.get(ty).abi_align.ok_or(SemanticAnalyzeFail)
    }

    pub fn type_size_in_bits(&mut self, ty: TypeId) -> SemaResult<u64> {
        self.ensure_type_layout(ty)?;
        self.types.get(ty).size_in_bits.ok_or(SemanticAnalyzeFail)
    }

    /// Zero-bit query. For containers this needs only the zero-bits stage,
    /// never the full layout; `S { next: *S }` stays resolvable.
    pub fn type_is_zero_bits(&mut self, ty: TypeId) -> SemaResult<bool> {
        match self.types.get(ty).kind.clone() {
            TypeKind::Struct { container } | TypeKind::Union { container } => {
                self.resolve_container(container, ResolveStatus::ZeroBitsKnown)?;
                Ok(self.containers.get(container).zero_bits.unwrap_or(false))
            }
            TypeKind::Enum { container } => {
                self.resolve_container(container, ResolveStatus::ZeroBitsKnown)?;
                Ok(self.containers.get(container).zero_bits.unwrap_or(false))
            }
            TypeKind::Pointer(info) => self.type_is_zero_bits(info.child),
            TypeKind::Array { child, len } => {
                Ok(len == 0 || self.type_is_zero_bits(child)?)
            }
            TypeKind::Fn(info) => Ok(info.is_generic),
            TypeKind::FnFrame { .. } | TypeKind::AnyFrame { .. } => Ok(false),
            _ => {
                self.ensure_type_layout(ty)?;
                Ok(self.types.get(ty).is_zero_bits())
            }
        }
    }

    pub fn type_has_bits(&mut self, ty: TypeId) -> SemaResult<bool> {
        Ok(!self.type_is_zero_bits(ty)?)
    }

    /// Whether values of this type exist only at compile time.
    pub fn type_requires_comptime(&mut self, ty: TypeId) -> SemaResult<bool> {
        match self.types.get(ty).kind.clone() {
            TypeKind::MetaType
            | TypeKind::ComptimeInt
            | TypeKind::ComptimeFloat
            | TypeKind::EnumLiteral
            | TypeKind::Undefined
            | TypeKind::Null
            | TypeKind::BoundFn
            | TypeKind::ArgTuple => Ok(true),
            TypeKind::Fn(info) => Ok(info.is_generic),
            TypeKind::Pointer(info) => self.type_requires_comptime(info.child),
            TypeKind::Array { child, .. } | TypeKind::Vector { elem: child, .. } => {
                self.type_requires_comptime(child)
            }
            TypeKind::Optional { child } => self.type_requires_comptime(child),
            TypeKind::ErrorUnion { payload, .. } => self.type_requires_comptime(payload),
            TypeKind::Struct { container } | TypeKind::Union { container } => {
                self.resolve_container(container, ResolveStatus::ZeroBitsKnown)?;
                Ok(self.containers.get(container).requires_comptime)
            }
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Errors and notes
    // ========================================================================

    /// Emit a diagnostic, attaching any notes the current resolution chain
    /// accumulated.
    pub fn add_error(&mut self, file: &Path, span: Span, error: SemanticError) {
        let notes = std::mem::take(&mut self.trace_notes);
        tracing::debug!(%error, file = %file.display(), "diagnostic");
        self.errors
            .push(ErrorMsg::new(file.to_path_buf(), span, error).with_notes(notes));
    }

    pub fn add_error_with_notes(
        &mut self,
        file: &Path,
        span: Span,
        error: SemanticError,
        mut notes: Vec<ErrorNote>,
    ) {
        notes.extend(std::mem::take(&mut self.trace_notes));
        self.errors
            .push(ErrorMsg::new(file.to_path_buf(), span, error).with_notes(notes));
    }

    pub fn add_error_in_scope(&mut self, scope: ScopeId, span: Span, error: SemanticError) {
        let file = self.scope_file(scope);
        self.add_error(&file, span, error);
    }

    /// Queue a note for the next top-level diagnostic.
    pub fn add_trace_note(&mut self, file: PathBuf, span: Span, text: String) {
        self.trace_notes.push(ErrorNote { file, span, text });
    }

    /// The file owning a scope chain (via its root container).
    pub fn scope_file(&self, scope: ScopeId) -> PathBuf {
        let container = self.scopes.owner_container(scope);
        self.containers.get(container).file.clone()
    }

    // ========================================================================
    // Global error table
    // ========================================================================

    /// One code per distinct error name, process-wide. Codes start at 1;
    /// zero is the "no error" encoding.
    pub fn intern_error(&mut self, name: Symbol, span: Span) -> ErrorCode {
        if let Some(&code) = self.global_errors.by_name.get(&name) {
            return code;
        }
        self.global_errors.decls.push((name, span));
        let code = ErrorCode(self.global_errors.decls.len() as u32);
        self.global_errors.by_name.insert(name, code);
        code
    }

    /// `error{A, B}`: a fresh error-set type over global codes.
    pub fn declare_error_set(
        &mut self,
        scope: ScopeId,
        fields: &[ErrorSetField],
    ) -> SemaResult<TypeId> {
        let mut members = Vec::with_capacity(fields.len());
        let mut seen: FxHashMap<Symbol, Span> = FxHashMap::default();
        for field in fields {
            if let Some(&first) = seen.get(&field.name) {
                let name = self.interner.resolve(field.name).to_string();
                self.add_error_in_scope(
                    scope,
                    field.span,
                    SemanticError::DuplicateMember {
                        name,
                        span: field.span.into(),
                        previous: first.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            seen.insert(field.name, field.span);
            let code = self.intern_error(field.name, field.span);
            members.push(ErrorSetMember {
                name: field.name,
                code,
                decl_span: field.span,
            });
        }
        let names: Vec<&str> = fields
            .iter()
            .map(|f| self.interner.resolve(f.name))
            .collect();
        let name = format!("error{{{}}}", names.join(","));
        let err_count = members.len() as u32;
        Ok(self.types.make_error_set(
            name,
            ErrorSetInfo {
                err_count,
                errors: members,
                infer_fn: None,
                incomplete: false,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::frontend::ast::{
        ContainerDecl, ContainerKind, ContainerLayout, Decl, Expr, NodeId, VarDecl,
    };
    use crate::sema::import::PackageId;
    use crate::sema::scope::NameRef;

    use super::*;

    #[test]
    fn mutually_recursive_constants_report_self_dependency() {
        let mut az = Analyzer::new(Target::x86_64());
        let a = az.interner.intern("a");
        let b = az.interner.intern("b");
        let var = |id: u32, name, init_name| {
            Decl::Var(VarDecl {
                id: NodeId(id),
                span: Span::new(id * 8, id * 8 + 4),
                name,
                is_const: true,
                is_pub: false,
                is_comptime: false,
                export_name: None,
                type_expr: None,
                init: Some(Expr {
                    id: NodeId(id + 100),
                    span: Span::new(id * 8 + 2, id * 8 + 3),
                    kind: ExprKind::Ident(init_name),
                }),
            })
        };
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
                decls: vec![var(2, a, b), var(3, b, a)],
            },
        );
        az.import_package_root(PackageId(0)).unwrap();
        az.perform_analysis();
        assert!(az
            .errors
            .iter()
            .any(|e| matches!(e.error, SemanticError::DependsOnItself { .. })));
        // Both declarations end in a terminal state; nothing stays Resolving.
        for tld in az.tlds.ids() {
            assert_ne!(az.tlds.get(tld).resolution, TldResolution::Resolving);
        }
    }

    #[test]
    fn error_names_intern_to_stable_codes() {
        let mut az = Analyzer::new(Target::x86_64());
        let oom = az.interner.intern("OutOfMemory");
        let eof = az.interner.intern("EndOfStream");
        let a = az.intern_error(oom, Span::new(0, 1));
        let b = az.intern_error(eof, Span::new(2, 3));
        assert_ne!(a, b);
        assert_eq!(az.intern_error(oom, Span::new(4, 5)), a);
        assert_eq!(az.global_errors.count(), 2);
        assert_eq!(az.global_errors.name_of(a), Some(oom));
    }
}
