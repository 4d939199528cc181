// src/sema/container.rs
//
// Staged resolution of struct/union/enum containers:
//
//   Unstarted -> ZeroBitsKnown -> AlignmentKnown -> SizeKnown -> FwdDecl -> Full
//        \______________________ Invalid _______________________/
//
// Every transition is idempotent and guarded by a per-flag reentrancy check
// that reports self-dependency. Invalid is absorbing: once a container
// fails, later resolution attempts return the failure sentinel without
// re-emitting diagnostics.

use std::path::PathBuf;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashMap;

use crate::errors::{SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{
    ContainerArg, ContainerDecl, ContainerKind, ContainerLayout, FieldDecl,
};
use crate::frontend::intern::Symbol;
use crate::frontend::span::LineOffsets;
use crate::frontend::Span;
use crate::sema::analyzer::Analyzer;
use crate::sema::import::PackageId;
use crate::sema::layout::{
    align_forward, host_int_bytes_for_bits, next_field_offset, packed_group_is_closed,
    type_allowed_in_extern, type_has_bit_repr,
};
use crate::sema::scope::{ScopeId, ScopeKind};
use crate::sema::type_arena::{TypeId, TypeKind};
use crate::sema::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(u32);

impl ContainerId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Monotonic resolution ladder; Invalid is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Unstarted,
    ZeroBitsKnown,
    AlignmentKnown,
    SizeKnown,
    /// Backend handshake stages; no further layout work happens here.
    FwdDecl,
    Full,
    Invalid,
}

impl ResolveStatus {
    fn rank(self) -> u8 {
        match self {
            ResolveStatus::Unstarted => 0,
            ResolveStatus::ZeroBitsKnown => 1,
            ResolveStatus::AlignmentKnown => 2,
            ResolveStatus::SizeKnown => 3,
            ResolveStatus::FwdDecl => 4,
            ResolveStatus::Full => 5,
            ResolveStatus::Invalid => u8::MAX,
        }
    }
}

/// Distinguished container shapes the analyzer synthesizes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSpecial {
    None,
    /// A `{ptr, len}` slice struct.
    Slice,
    /// An async function frame.
    Frame(crate::sema::func::FnId),
}

/// Source backing of a file root container.
#[derive(Debug)]
pub struct RootSource {
    pub package: PackageId,
    pub path: PathBuf,
    pub source: String,
    pub line_offsets: LineOffsets,
}

/// Per-source-field analysis state.
#[derive(Debug, Default)]
pub struct FieldInfo {
    pub name: Option<Symbol>,
    pub span: Span,
    /// Possibly-lazy type value from the zero-bits pass.
    pub type_value: Option<Value>,
    /// Forced concrete type, from the alignment pass.
    pub type_id: Option<TypeId>,
    pub align: Option<u32>,
    pub contributes_bits: bool,
    pub offset: Option<u64>,
    /// Index in the generated field list; None for elided zero-bit fields.
    pub gen_index: Option<u32>,
    pub bit_offset_in_host: Option<u32>,
    pub enum_value: Option<BigInt>,
}

/// One field of the generated (codegen-facing) field list.
#[derive(Debug, Clone)]
pub struct GenField {
    pub ty: TypeId,
    pub offset: u64,
    /// Width of the packed host integer this gen field stands for.
    pub host_int_bytes: Option<u64>,
    /// Source field backing this gen field; None for synthesized hosts.
    pub src_index: Option<usize>,
}

#[derive(Debug)]
pub struct ContainerState {
    pub name: String,
    pub kind: ContainerKind,
    pub layout: ContainerLayout,
    pub type_id: TypeId,
    pub span: Span,
    pub file: PathBuf,
    pub status: ResolveStatus,
    pub resolving_zero_bits: bool,
    pub resolving_other: bool,
    pub src_fields: Vec<FieldDecl>,
    pub fields: Vec<FieldInfo>,
    pub fields_by_name: FxHashMap<Symbol, usize>,
    pub decls_scope: Option<ScopeId>,
    pub arg: Option<ContainerArg>,
    /// Known after the zero-bits pass.
    pub zero_bits: Option<bool>,
    pub requires_comptime: bool,
    pub gen_fields: Vec<GenField>,
    // Unions.
    pub union_tag_type: Option<TypeId>,
    pub most_aligned_member: Option<usize>,
    pub tag_first: bool,
    pub gen_tag_index: Option<u32>,
    pub gen_union_index: Option<u32>,
    // Enums.
    pub tag_int_type: Option<TypeId>,
    pub explicit_tag_type: bool,
    pub special: ContainerSpecial,
    pub root: Option<RootSource>,
}

impl ContainerState {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ContainerKind::Struct => "struct",
            ContainerKind::Union => "union",
            ContainerKind::Enum => "enum",
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.status == ResolveStatus::Invalid
    }
}

#[derive(Debug, Default)]
pub struct ContainerTable {
    containers: Vec<ContainerState>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ContainerState) -> ContainerId {
        let id = ContainerId(self.containers.len() as u32);
        self.containers.push(state);
        id
    }

    pub fn get(&self, id: ContainerId) -> &ContainerState {
        &self.containers[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ContainerId) -> &mut ContainerState {
        &mut self.containers[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl Analyzer {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a container (and its decls scope) from an AST declaration.
    pub fn add_container_from_decl(
        &mut self,
        parent_scope: ScopeId,
        decl: &ContainerDecl,
        name_override: Option<String>,
    ) -> SemaResult<TypeId> {
        let file = self.scope_file(parent_scope);
        let name = name_override
            .or_else(|| decl.name.map(|sym| self.interner.resolve(sym).to_string()))
            .unwrap_or_else(|| {
                format!(
                    "(anonymous {} at byte {})",
                    container_kind_name(decl.kind),
                    decl.span.start
                )
            });
        let container = self.containers.push(ContainerState {
            name: name.clone(),
            kind: decl.kind,
            layout: decl.layout,
            type_id: TypeId::placeholder(),
            span: decl.span,
            file,
            status: ResolveStatus::Unstarted,
            resolving_zero_bits: false,
            resolving_other: false,
            src_fields: decl.fields.clone(),
            fields: decl
                .fields
                .iter()
                .map(|f| FieldInfo {
                    name: Some(f.name),
                    span: f.span,
                    ..FieldInfo::default()
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
            special: ContainerSpecial::None,
            root: None,
        });
        let type_id = self.types.register_container(decl.kind, container, name);
        self.containers.get_mut(container).type_id = type_id;

        let decls_scope = self.scopes.alloc(
            Some(parent_scope),
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

    /// Build the by-name field index; duplicate field names are a shape
    /// error caught at creation.
    pub(crate) fn index_container_fields(&mut self, container: ContainerId) -> SemaResult<()> {
        let mut by_name = FxHashMap::default();
        let mut duplicate = None;
        for (i, field) in self.containers.get(container).src_fields.iter().enumerate() {
            if let Some(&first) = by_name.get(&field.name) {
                let first: usize = first;
                let first_span = self.containers.get(container).src_fields[first].span;
                duplicate = Some((field.name, field.span, first_span));
                break;
            }
            by_name.insert(field.name, i);
        }
        if let Some((name_sym, span, first_span)) = duplicate {
            let name = self.interner.resolve(name_sym).to_string();
            let file = self.containers.get(container).file.clone();
            self.add_error(
                &file,
                span,
                SemanticError::DuplicateMember {
                    name,
                    span: span.into(),
                    previous: first_span.into(),
                },
            );
            self.containers.get_mut(container).status = ResolveStatus::Invalid;
            return Err(SemanticAnalyzeFail);
        }
        self.containers.get_mut(container).fields_by_name = by_name;
        Ok(())
    }

    /// Slice struct `{ptr, len}` for an element-pointer type, memoized per
    /// pointer. Degrades to a lone `len` field when the pointer is zero-bit.
    pub fn get_slice_type(&mut self, elem_ptr: TypeId) -> SemaResult<TypeId> {
        if let Some(slice) = self.types.slice_cache_get(elem_ptr) {
            return Ok(slice);
        }
        let ptr_name = self.types.name(elem_ptr).to_string();
        debug_assert!(ptr_name.starts_with("[*]"));
        let name = format!("[]{}", ptr_name.trim_start_matches("[*]"));

        self.ensure_type_layout(elem_ptr)?;
        let usize_ty = self.types.primitives.usize;
        let ptr_has_bits = self.types.get(elem_ptr).has_bits();
        let (size, align) = {
            let usize_size = self.target.ptr_bytes;
            if ptr_has_bits {
                (2 * usize_size, self.target.ptr_align())
            } else {
                (usize_size, self.target.ptr_align())
            }
        };

        let container = self.containers.push(ContainerState {
            name: name.clone(),
            kind: ContainerKind::Struct,
            layout: ContainerLayout::Auto,
            type_id: TypeId::placeholder(),
            span: Span::default(),
            file: PathBuf::new(),
            status: ResolveStatus::SizeKnown,
            resolving_zero_bits: false,
            resolving_other: false,
            src_fields: Vec::new(),
            fields: Vec::new(),
            fields_by_name: FxHashMap::default(),
            decls_scope: None,
            arg: None,
            zero_bits: Some(false),
            requires_comptime: false,
            gen_fields: if ptr_has_bits {
                vec![
                    GenField {
                        ty: elem_ptr,
                        offset: 0,
                        host_int_bytes: None,
                        src_index: None,
                    },
                    GenField {
                        ty: usize_ty,
                        offset: self.target.ptr_bytes,
                        host_int_bytes: None,
                        src_index: None,
                    },
                ]
            } else {
                vec![GenField {
                    ty: usize_ty,
                    offset: 0,
                    host_int_bytes: None,
                    src_index: None,
                }]
            },
            union_tag_type: None,
            most_aligned_member: None,
            tag_first: false,
            gen_tag_index: None,
            gen_union_index: None,
            tag_int_type: None,
            explicit_tag_type: false,
            special: ContainerSpecial::Slice,
            root: None,
        });
        let type_id = self
            .types
            .register_container(ContainerKind::Struct, container, name);
        self.containers.get_mut(container).type_id = type_id;
        {
            let data = self.types.get_mut(type_id);
            data.abi_size = Some(size);
            data.size_in_bits = Some(size * 8);
            data.abi_align = Some(align);
        }
        self.types.slice_cache_put(elem_ptr, type_id);
        Ok(type_id)
    }

    // ========================================================================
    // Resolution driver
    // ========================================================================

    /// Drive a container to (at least) the requested status. Idempotent.
    pub fn resolve_container(
        &mut self,
        id: ContainerId,
        target: ResolveStatus,
    ) -> SemaResult<()> {
        if self.containers.get(id).is_invalid() {
            return Err(SemanticAnalyzeFail);
        }
        if self.containers.get(id).status.rank() >= target.rank() {
            return Ok(());
        }
        tracing::trace!(
            container = %self.containers.get(id).name,
            ?target,
            "resolve_container"
        );
        let result = match self.containers.get(id).kind {
            ContainerKind::Enum => self.resolve_enum(id),
            ContainerKind::Struct | ContainerKind::Union => {
                self.resolve_aggregate(id, target)
            }
        };
        if result.is_err() {
            self.containers.get_mut(id).status = ResolveStatus::Invalid;
            return result;
        }
        // The backend handshake stages carry no extra layout work.
        if target.rank() > ResolveStatus::SizeKnown.rank() {
            let state = self.containers.get_mut(id);
            if state.status.rank() < target.rank() {
                state.status = target;
            }
        }
        result
    }

    fn resolve_aggregate(&mut self, id: ContainerId, target: ResolveStatus) -> SemaResult<()> {
        self.resolve_zero_bits(id)?;
        if target.rank() <= ResolveStatus::ZeroBitsKnown.rank() {
            return Ok(());
        }
        self.resolve_alignment(id)?;
        if target.rank() <= ResolveStatus::AlignmentKnown.rank() {
            return Ok(());
        }
        self.resolve_size(id)
    }

    // ========================================================================
    // Zero-bits pass
    // ========================================================================

    fn resolve_zero_bits(&mut self, id: ContainerId) -> SemaResult<()> {
        if self.containers.get(id).status.rank() >= ResolveStatus::ZeroBitsKnown.rank() {
            return Ok(());
        }
        if self.containers.get(id).resolving_zero_bits {
            return self.report_self_dependency(id);
        }
        self.containers.get_mut(id).resolving_zero_bits = true;
        let result = self.zero_bits_pass(id);
        self.containers.get_mut(id).resolving_zero_bits = false;
        result
    }

    fn zero_bits_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let decls_scope = self.container_scope(id);
        let field_count = self.containers.get(id).src_fields.len();

        if self.containers.get(id).kind == ContainerKind::Union && field_count == 0 {
            let (file, span) = self.container_site(id);
            self.add_error(&file, span, SemanticError::EmptyUnion { span: span.into() });
            return Err(SemanticAnalyzeFail);
        }

        let mut any_bits = false;
        let mut requires_comptime = false;
        for i in 0..field_count {
            let field_decl = self.containers.get(id).src_fields[i].clone();
            let type_expr = match &field_decl.type_expr {
                Some(expr) => expr.clone(),
                None => {
                    let file = self.containers.get(id).file.clone();
                    self.add_error(
                        &file,
                        field_decl.span,
                        SemanticError::MissingFieldType {
                            span: field_decl.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            };
            // Lazy evaluation: `*Self` stays a producer and the queries
            // below never walk into the pointee.
            let type_value = self.eval_type_expr_lazy(decls_scope, &type_expr)?;
            if self.value_is_opaque_type(&type_value)? {
                let file = self.containers.get(id).file.clone();
                self.add_error(
                    &file,
                    field_decl.span,
                    SemanticError::OpaqueField {
                        span: field_decl.span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            let zero_bits = self.value_is_zero_bits(&type_value)?;
            requires_comptime |= self.value_requires_comptime(&type_value)?;
            any_bits |= !zero_bits;

            let field = &mut self.containers.get_mut(id).fields[i];
            field.type_value = Some(type_value);
            field.contributes_bits = !zero_bits;
        }

        let state = self.containers.get_mut(id);
        state.zero_bits = Some(!any_bits);
        state.requires_comptime = requires_comptime;
        state.status = ResolveStatus::ZeroBitsKnown;
        Ok(())
    }

    // ========================================================================
    // Alignment pass
    // ========================================================================

    fn resolve_alignment(&mut self, id: ContainerId) -> SemaResult<()> {
        if self.containers.get(id).status.rank() >= ResolveStatus::AlignmentKnown.rank() {
            return Ok(());
        }
        if self.containers.get(id).resolving_other {
            return self.report_self_dependency(id);
        }
        self.containers.get_mut(id).resolving_other = true;
        let result = self.alignment_pass(id);
        self.containers.get_mut(id).resolving_other = false;
        result
    }

    fn alignment_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let decls_scope = self.container_scope(id);
        let layout = self.containers.get(id).layout;
        let field_count = self.containers.get(id).src_fields.len();

        let mut max_align: u32 = 1;
        let mut most_aligned: Option<(usize, u32)> = None;
        for i in 0..field_count {
            if !self.containers.get(id).fields[i].contributes_bits {
                continue;
            }
            let type_value = self.containers.get(id).fields[i]
                .type_value
                .clone()
                .expect("zero-bits pass populated field types");
            let field_ty = self.force_type_value(type_value)?;
            self.check_field_layout_permissibility(id, i, field_ty)?;

            let align_expr = self.containers.get(id).src_fields[i].align_expr.clone();
            let align = match align_expr {
                Some(expr) => self.eval_align_expr(decls_scope, &expr)?,
                None => self.type_abi_align(field_ty)?,
            };
            {
                let field = &mut self.containers.get_mut(id).fields[i];
                field.type_id = Some(field_ty);
                field.align = Some(align);
            }
            max_align = max_align.max(align);
            if most_aligned.map(|(_, a)| align > a).unwrap_or(true) {
                most_aligned = Some((i, align));
            }
        }

        let abi_align = match layout {
            ContainerLayout::Packed => 1,
            ContainerLayout::Auto | ContainerLayout::Extern => max_align,
        };

        // Union tag handling: resolve the tag and pick the field order that
        // minimizes padding (tag first iff tag_align >= member_align).
        let mut final_align = abi_align;
        if self.containers.get(id).kind == ContainerKind::Union {
            self.containers.get_mut(id).most_aligned_member = most_aligned.map(|(i, _)| i);
            self.resolve_union_tag(id)?;
            if let Some(tag_ty) = self.containers.get(id).union_tag_type {
                let tag_align = self.type_abi_align(tag_ty)?;
                self.containers.get_mut(id).tag_first = tag_align >= max_align;
                final_align = final_align.max(tag_align);
            }
        }

        {
            let state = self.containers.get_mut(id);
            state.status = ResolveStatus::AlignmentKnown;
        }
        self.types.get_mut(self.containers.get(id).type_id).abi_align = Some(final_align);
        Ok(())
    }

    fn check_field_layout_permissibility(
        &mut self,
        id: ContainerId,
        field_index: usize,
        field_ty: TypeId,
    ) -> SemaResult<()> {
        let layout = self.containers.get(id).layout;
        if layout == ContainerLayout::Auto {
            return Ok(());
        }
        // The predicates read resolved headers; make sure the field type
        // has one before judging it.
        self.ensure_type_layout(field_ty)?;
        let ok = match layout {
            ContainerLayout::Packed => type_has_bit_repr(&self.types, &self.containers, field_ty),
            ContainerLayout::Extern => {
                type_allowed_in_extern(&self.types, &self.containers, field_ty)
            }
            ContainerLayout::Auto => true,
        };
        if ok {
            return Ok(());
        }
        let span = self.containers.get(id).fields[field_index].span;
        let file = self.containers.get(id).file.clone();
        let ty_name = self.types.name(field_ty).to_string();
        let kind_name = self.containers.get(id).kind_name();
        let err = match layout {
            ContainerLayout::Packed => SemanticError::NotAllowedInPacked {
                container_kind: kind_name,
                ty: ty_name,
                span: span.into(),
            },
            _ => SemanticError::NotAllowedInExtern {
                container_kind: kind_name,
                ty: ty_name,
                span: span.into(),
            },
        };
        self.add_error(&file, span, err);
        Err(SemanticAnalyzeFail)
    }

    // ========================================================================
    // Size pass
    // ========================================================================

    fn resolve_size(&mut self, id: ContainerId) -> SemaResult<()> {
        if self.containers.get(id).status.rank() >= ResolveStatus::SizeKnown.rank() {
            return Ok(());
        }
        if self.containers.get(id).resolving_other {
            return self.report_self_dependency(id);
        }
        self.containers.get_mut(id).resolving_other = true;
        let result = match self.containers.get(id).kind {
            ContainerKind::Struct => {
                if self.containers.get(id).layout == ContainerLayout::Packed {
                    self.packed_struct_size_pass(id)
                } else {
                    self.struct_size_pass(id)
                }
            }
            ContainerKind::Union => self.union_size_pass(id),
            ContainerKind::Enum => unreachable!("enums resolve in one pass"),
        };
        self.containers.get_mut(id).resolving_other = false;
        if result.is_ok() {
            self.containers.get_mut(id).status = ResolveStatus::SizeKnown;
        }
        result
    }

    fn struct_size_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let field_count = self.containers.get(id).src_fields.len();
        let abi_align = self.container_abi_align(id) as u64;

        let mut end: u64 = 0;
        let mut gen_fields = Vec::new();
        for i in 0..field_count {
            if !self.containers.get(id).fields[i].contributes_bits {
                continue;
            }
            let field_ty = self.containers.get(id).fields[i].type_id.unwrap();
            self.ensure_type_layout(field_ty)?;
            let size = self.type_abi_size(field_ty)?;
            let align = self.containers.get(id).fields[i].align.unwrap() as u64;

            let offset = align_forward(end, align);
            let gen_index = gen_fields.len() as u32;
            gen_fields.push(GenField {
                ty: field_ty,
                offset,
                host_int_bytes: None,
                src_index: Some(i),
            });
            {
                let field = &mut self.containers.get_mut(id).fields[i];
                field.offset = Some(offset);
                field.gen_index = Some(gen_index);
            }
            end = offset + size;
        }
        let size = align_forward(end, abi_align.max(1));

        let type_id = self.containers.get(id).type_id;
        self.containers.get_mut(id).gen_fields = gen_fields;
        let data = self.types.get_mut(type_id);
        data.abi_size = Some(size);
        data.size_in_bits = Some(size * 8);
        Ok(())
    }

    /// Packed layout: fields that exactly fill their storage stand alone;
    /// everything else accumulates into host integers that close whenever
    /// the running bit count lands on a whole byte-aligned ABI size.
    fn packed_struct_size_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let field_count = self.containers.get(id).src_fields.len();

        let mut offset: u64 = 0;
        let mut total_bits: u64 = 0;
        let mut gen_fields: Vec<GenField> = Vec::new();
        // Members of the currently open host-int group.
        let mut group: Vec<(usize, u64)> = Vec::new(); // (src index, bit size)
        let mut group_bits: u64 = 0;

        let close_group = |analyzer: &mut Analyzer,
                               group: &mut Vec<(usize, u64)>,
                               group_bits: &mut u64,
                               gen_fields: &mut Vec<GenField>,
                               offset: &mut u64| {
            if group.is_empty() {
                return;
            }
            let host_bytes = host_int_bytes_for_bits(*group_bits);
            let host_ty = analyzer.types.int_type(false, (host_bytes * 8) as u16);
            let gen_index = gen_fields.len() as u32;
            gen_fields.push(GenField {
                ty: host_ty,
                offset: *offset,
                host_int_bytes: Some(host_bytes),
                src_index: group.first().map(|&(i, _)| i),
            });
            let mut bit_cursor: u32 = 0;
            for &(src, bits) in group.iter() {
                let field = &mut analyzer.containers.get_mut(id).fields[src];
                field.offset = Some(*offset);
                field.gen_index = Some(gen_index);
                field.bit_offset_in_host = Some(bit_cursor);
                bit_cursor += bits as u32;
            }
            *offset += host_bytes;
            group.clear();
            *group_bits = 0;
        };

        for i in 0..field_count {
            if !self.containers.get(id).fields[i].contributes_bits {
                continue;
            }
            let field_ty = self.containers.get(id).fields[i].type_id.unwrap();
            self.ensure_type_layout(field_ty)?;
            let size = self.type_abi_size(field_ty)?;
            let bits = self
                .types
                .get(field_ty)
                .size_in_bits
                .expect("packed field resolved");
            total_bits += bits;

            let fills_storage = bits == size * 8;
            if fills_storage && group.is_empty() {
                let gen_index = gen_fields.len() as u32;
                gen_fields.push(GenField {
                    ty: field_ty,
                    offset,
                    host_int_bytes: None,
                    src_index: Some(i),
                });
                {
                    let field = &mut self.containers.get_mut(id).fields[i];
                    field.offset = Some(offset);
                    field.gen_index = Some(gen_index);
                    field.bit_offset_in_host = None;
                }
                offset += size;
                continue;
            }

            let field = &mut self.containers.get_mut(id).fields[i];
            field.bit_offset_in_host = Some(group_bits as u32);
            group.push((i, bits));
            group_bits += bits;
            if packed_group_is_closed(group_bits) {
                close_group(self, &mut group, &mut group_bits, &mut gen_fields, &mut offset);
            }
        }
        // An unterminated trailing group closes at whatever width covers it.
        close_group(self, &mut group, &mut group_bits, &mut gen_fields, &mut offset);

        let type_id = self.containers.get(id).type_id;
        self.containers.get_mut(id).gen_fields = gen_fields;
        let data = self.types.get_mut(type_id);
        data.abi_size = Some(offset);
        data.size_in_bits = Some(total_bits);
        Ok(())
    }

    fn union_size_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let field_count = self.containers.get(id).src_fields.len();
        let mut payload_size: u64 = 0;
        let mut payload_align: u64 = 1;
        for i in 0..field_count {
            if !self.containers.get(id).fields[i].contributes_bits {
                continue;
            }
            let field_ty = self.containers.get(id).fields[i].type_id.unwrap();
            self.ensure_type_layout(field_ty)?;
            let size = self.type_abi_size(field_ty)?;
            let align = self.containers.get(id).fields[i].align.unwrap() as u64;
            payload_size = payload_size.max(size);
            payload_align = payload_align.max(align);
            let field = &mut self.containers.get_mut(id).fields[i];
            field.offset = Some(0);
        }

        let tag_ty = self.containers.get(id).union_tag_type;
        let (size, bits) = match tag_ty {
            None => {
                let size = align_forward(payload_size, payload_align);
                (size, size * 8)
            }
            Some(tag_ty) => {
                let tag_size = self.type_abi_size(tag_ty)?;
                let tag_align = self.type_abi_align(tag_ty)? as u64;
                let tag_first = self.containers.get(id).tag_first;
                let (first_size, second_size, second_align) = if tag_first {
                    (tag_size, payload_size, payload_align)
                } else {
                    (payload_size, tag_size, tag_align)
                };
                let second_offset = next_field_offset(0, first_size, second_align.max(1));
                let total_align = tag_align.max(payload_align);
                let size = align_forward(second_offset + second_size, total_align);
                {
                    let state = self.containers.get_mut(id);
                    if tag_first {
                        state.gen_tag_index = Some(0);
                        state.gen_union_index = Some(1);
                    } else {
                        state.gen_union_index = Some(0);
                        state.gen_tag_index = Some(1);
                    }
                }
                (size, size * 8)
            }
        };

        let type_id = self.containers.get(id).type_id;
        let data = self.types.get_mut(type_id);
        data.abi_size = Some(size);
        data.size_in_bits = Some(bits);
        Ok(())
    }

    // ========================================================================
    // Union tags
    // ========================================================================

    /// Three modes: untagged, auto-synthesized (`union(enum)`), and explicit
    /// external enum (`union(E)`), which must cover every enum variant.
    fn resolve_union_tag(&mut self, id: ContainerId) -> SemaResult<()> {
        let arg = match self.containers.get(id).arg.clone() {
            None => return Ok(()),
            Some(arg) => arg,
        };
        let decls_scope = self.container_scope(id);
        match arg {
            ContainerArg::InferredEnum(tag_type_expr) => {
                let tag_ty = self.synthesize_union_tag_enum(id, tag_type_expr.as_deref())?;
                self.containers.get_mut(id).union_tag_type = Some(tag_ty);
                Ok(())
            }
            ContainerArg::Type(expr) => {
                let tag_ty = self.eval_type_expr(decls_scope, &expr)?;
                let enum_container = match self.types.get(tag_ty).kind {
                    TypeKind::Enum { container } => container,
                    _ => {
                        let found = self.types.name(tag_ty).to_string();
                        let file = self.containers.get(id).file.clone();
                        let span = expr.span;
                        self.add_error(
                            &file,
                            span,
                            SemanticError::TagTypeNotInteger {
                                found,
                                span: span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                };
                self.resolve_container(enum_container, ResolveStatus::SizeKnown)?;
                self.check_union_covers_enum(id, enum_container, tag_ty)?;
                self.containers.get_mut(id).union_tag_type = Some(tag_ty);
                Ok(())
            }
        }
    }

    fn check_union_covers_enum(
        &mut self,
        id: ContainerId,
        enum_container: ContainerId,
        enum_ty: TypeId,
    ) -> SemaResult<()> {
        let file = self.containers.get(id).file.clone();
        let union_span = self.containers.get(id).span;
        // Every union field must name an enum field.
        let union_fields: Vec<(Symbol, Span)> = self
            .containers
            .get(id)
            .src_fields
            .iter()
            .map(|f| (f.name, f.span))
            .collect();
        for (name, span) in &union_fields {
            if !self
                .containers
                .get(enum_container)
                .fields_by_name
                .contains_key(name)
            {
                let field_name = self.interner.resolve(*name).to_string();
                let enum_name = self.types.name(enum_ty).to_string();
                self.add_error(
                    &file,
                    *span,
                    SemanticError::UnionFieldNotInEnum {
                        name: field_name,
                        enum_ty: enum_name,
                        span: (*span).into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
        }
        // Every enum variant must be covered.
        let enum_fields: Vec<(Symbol, Span)> = self
            .containers
            .get(enum_container)
            .src_fields
            .iter()
            .map(|f| (f.name, f.span))
            .collect();
        for (name, enum_span) in enum_fields {
            if !self.containers.get(id).fields_by_name.contains_key(&name) {
                let field_name = self.interner.resolve(name).to_string();
                self.add_error(
                    &file,
                    union_span,
                    SemanticError::UnionMissingEnumField {
                        name: field_name,
                        span: union_span.into(),
                        enum_field: enum_span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
        }
        Ok(())
    }

    /// Build the implicit `union(enum)` tag from the union's own fields.
    fn synthesize_union_tag_enum(
        &mut self,
        id: ContainerId,
        tag_type_expr: Option<&crate::frontend::ast::Expr>,
    ) -> SemaResult<TypeId> {
        let union_state = self.containers.get(id);
        let name = format!("@TagType({})", union_state.name);
        let span = union_state.span;
        let file = union_state.file.clone();
        let fields: Vec<FieldDecl> = union_state
            .src_fields
            .iter()
            .map(|f| FieldDecl {
                id: f.id,
                span: f.span,
                name: f.name,
                type_expr: None,
                align_expr: None,
                value_expr: f.value_expr.clone(),
            })
            .collect();
        let fields_by_name = union_state.fields_by_name.clone();
        let decls_scope = self.container_scope(id);

        let enum_container = self.containers.push(ContainerState {
            name: name.clone(),
            kind: ContainerKind::Enum,
            layout: ContainerLayout::Auto,
            type_id: TypeId::placeholder(),
            span,
            file,
            status: ResolveStatus::Unstarted,
            resolving_zero_bits: false,
            resolving_other: false,
            fields: fields
                .iter()
                .map(|f| FieldInfo {
                    name: Some(f.name),
                    span: f.span,
                    ..FieldInfo::default()
                })
                .collect(),
            src_fields: fields,
            fields_by_name,
            decls_scope: Some(decls_scope),
            arg: tag_type_expr.map(|e| ContainerArg::Type(Box::new(e.clone()))),
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
            special: ContainerSpecial::None,
            root: None,
        });
        let type_id = self
            .types
            .register_container(ContainerKind::Enum, enum_container, name);
        self.containers.get_mut(enum_container).type_id = type_id;
        self.resolve_container(enum_container, ResolveStatus::SizeKnown)?;
        Ok(type_id)
    }

    // ========================================================================
    // Enums
    // ========================================================================

    /// Enums resolve in a single pass: tag type, explicit values, then the
    /// fill of unspecified values from the lowest unused non-negative
    /// integer.
    fn resolve_enum(&mut self, id: ContainerId) -> SemaResult<()> {
        if self.containers.get(id).resolving_zero_bits {
            return self.report_self_dependency(id);
        }
        self.containers.get_mut(id).resolving_zero_bits = true;
        let result = self.enum_pass(id);
        self.containers.get_mut(id).resolving_zero_bits = false;
        if result.is_ok() {
            self.containers.get_mut(id).status = ResolveStatus::SizeKnown;
        }
        result
    }

    fn enum_pass(&mut self, id: ContainerId) -> SemaResult<()> {
        let field_count = self.containers.get(id).src_fields.len();
        let (file, span) = self.container_site(id);
        if field_count == 0 {
            self.add_error(&file, span, SemanticError::EmptyEnum { span: span.into() });
            return Err(SemanticAnalyzeFail);
        }

        let decls_scope = self.container_scope(id);
        let layout = self.containers.get(id).layout;
        let arg = self.containers.get(id).arg.clone();
        let (tag_ty, explicit_tag) = match arg {
            Some(ContainerArg::Type(expr)) => {
                let ty = self.eval_type_expr(decls_scope, &expr)?;
                if !self.types.is_int(ty) {
                    let found = self.types.name(ty).to_string();
                    self.add_error(
                        &file,
                        expr.span,
                        SemanticError::TagTypeNotInteger {
                            found,
                            span: expr.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
                (ty, true)
            }
            Some(ContainerArg::InferredEnum(_)) => {
                // `enum(enum)` is not a thing; treated as shape-invalid.
                self.add_error(
                    &file,
                    span,
                    SemanticError::TagTypeNotInteger {
                        found: "enum".to_string(),
                        span: span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            None if layout == ContainerLayout::Extern => (self.types.primitives.c_int, false),
            None => {
                let bits = bits_needed_for_tag(field_count as u64 - 1);
                (self.types.int_type(false, bits), false)
            }
        };

        // First pass: explicit tag values, checked for fit and uniqueness.
        let mut taken: FxHashMap<BigInt, (usize, Span)> = FxHashMap::default();
        for i in 0..field_count {
            let value_expr = match self.containers.get(id).src_fields[i].value_expr.clone() {
                Some(expr) => expr,
                None => continue,
            };
            let field_span = self.containers.get(id).src_fields[i].span;
            let mut quota = crate::sema::comptime::DEFAULT_BRANCH_QUOTA;
            let value = self.eval_comptime_expr(decls_scope, &value_expr, Some(tag_ty), &mut quota)?;
            let tag = match value.as_bigint() {
                Some(v) => v.clone(),
                None => {
                    self.add_error(
                        &file,
                        value_expr.span,
                        SemanticError::ExpectedComptimeValue {
                            span: value_expr.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            };
            if !self.int_fits(tag_ty, &tag) {
                let tag_name = self.types.name(tag_ty).to_string();
                self.add_error(
                    &file,
                    value_expr.span,
                    SemanticError::EnumTagOutOfRange {
                        value: tag.to_string(),
                        tag_ty: tag_name,
                        span: value_expr.span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            if let Some(&(_, first_span)) = taken.get(&tag) {
                self.add_error(
                    &file,
                    value_expr.span,
                    SemanticError::EnumTagDuplicate {
                        value: tag.to_string(),
                        span: value_expr.span.into(),
                        previous: first_span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            taken.insert(tag.clone(), (i, field_span));
            self.containers.get_mut(id).fields[i].enum_value = Some(tag);
        }

        // Second pass: fill unspecified values from the lowest unused
        // non-negative integer, skipping values already claimed.
        let mut next = BigInt::zero();
        for i in 0..field_count {
            if self.containers.get(id).fields[i].enum_value.is_some() {
                continue;
            }
            while taken.contains_key(&next) {
                next += BigInt::one();
            }
            let field_span = self.containers.get(id).src_fields[i].span;
            if !self.int_fits(tag_ty, &next) {
                let tag_name = self.types.name(tag_ty).to_string();
                self.add_error(
                    &file,
                    field_span,
                    SemanticError::EnumTagOutOfRange {
                        value: next.to_string(),
                        tag_ty: tag_name,
                        span: field_span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            taken.insert(next.clone(), (i, field_span));
            self.containers.get_mut(id).fields[i].enum_value = Some(next.clone());
            next += BigInt::one();
        }

        let tag_data = self.types.get(tag_ty);
        let (size, bits, align) = (
            tag_data.abi_size.unwrap(),
            tag_data.size_in_bits.unwrap(),
            tag_data.abi_align.unwrap(),
        );
        {
            let state = self.containers.get_mut(id);
            state.tag_int_type = Some(tag_ty);
            state.explicit_tag_type = explicit_tag;
            state.zero_bits = Some(size == 0);
        }
        let type_id = self.containers.get(id).type_id;
        let data = self.types.get_mut(type_id);
        data.abi_size = Some(size);
        data.size_in_bits = Some(bits);
        data.abi_align = Some(align);
        Ok(())
    }

    /// Range check against an integer type's `(signed, bits)` domain.
    pub fn int_fits(&self, ty: TypeId, value: &BigInt) -> bool {
        let (signed, bits) = match self.types.get(ty).kind {
            TypeKind::Int { signed, bits } => (signed, bits as u32),
            _ => return false,
        };
        if bits == 0 {
            return value.is_zero();
        }
        if signed {
            let bound = BigInt::one() << (bits - 1);
            value >= &(-bound.clone()) && value < &bound
        } else {
            !value.is_negative() && value < &(BigInt::one() << bits)
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    fn report_self_dependency(&mut self, id: ContainerId) -> SemaResult<()> {
        let state = self.containers.get(id);
        let (kind, name, span, file) = (
            state.kind_name(),
            state.name.clone(),
            state.span,
            state.file.clone(),
        );
        self.add_error(
            &file,
            span,
            SemanticError::DependsOnItself {
                kind,
                name,
                span: span.into(),
            },
        );
        self.containers.get_mut(id).status = ResolveStatus::Invalid;
        Err(SemanticAnalyzeFail)
    }

    fn container_scope(&self, id: ContainerId) -> ScopeId {
        self.containers
            .get(id)
            .decls_scope
            .expect("container has a decls scope")
    }

    fn container_site(&self, id: ContainerId) -> (PathBuf, Span) {
        let state = self.containers.get(id);
        (state.file.clone(), state.span)
    }

    fn container_abi_align(&self, id: ContainerId) -> u32 {
        self.types
            .get(self.containers.get(id).type_id)
            .abi_align
            .unwrap_or(1)
    }
}

fn container_kind_name(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Struct => "struct",
        ContainerKind::Union => "union",
        ContainerKind::Enum => "enum",
    }
}

/// Smallest unsigned width whose range covers `max_tag`.
fn bits_needed_for_tag(max_tag: u64) -> u16 {
    (64 - max_tag.leading_zeros()) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_width_covers_field_count() {
        assert_eq!(bits_needed_for_tag(0), 0);
        assert_eq!(bits_needed_for_tag(1), 1);
        assert_eq!(bits_needed_for_tag(2), 2);
        assert_eq!(bits_needed_for_tag(3), 2);
        assert_eq!(bits_needed_for_tag(255), 8);
        assert_eq!(bits_needed_for_tag(256), 9);
    }
}
