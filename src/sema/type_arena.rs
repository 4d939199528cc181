// src/sema/type_arena.rs
//
// Interned type system using TypeId handles for O(1) equality and minimal
// allocations. Structural types (pointers, arrays, optionals, error unions,
// function types, vectors) are deduplicated through per-constructor intern
// tables; nominal types (containers, error sets, opaques, frames) get a
// fresh entry per declaration.

use hashbrown::HashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::frontend::ast::{CallConv, PtrLen};
use crate::frontend::intern::Symbol;
use crate::frontend::Span;
use crate::sema::container::ContainerId;
use crate::sema::func::FnId;
use crate::sema::layout::{ceil_pow2_u32, int_size_bytes};
use crate::sema::target::Target;

/// Handle to an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> u32 {
        self.0
    }

    /// Transient placeholder used while a container's state and type entry
    /// are being wired to each other; never escapes registration.
    pub fn placeholder() -> Self {
        TypeId(u32::MAX)
    }
}

/// Index of a declared error in the global error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

/// Full structural identity of a pointer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtrInfo {
    pub child: TypeId,
    pub is_const: bool,
    pub is_volatile: bool,
    pub ptr_len: PtrLen,
    /// 0 means "use the child's ABI alignment".
    pub alignment: u32,
    pub bit_offset_in_host: u32,
    /// 0 means "not a bit pointer".
    pub host_int_bytes: u64,
    pub allow_zero: bool,
}

impl PtrInfo {
    /// A plain `*T` / `*const T` with every knob at its default.
    pub fn single(child: TypeId, is_const: bool) -> Self {
        Self {
            child,
            is_const,
            is_volatile: false,
            ptr_len: PtrLen::Single,
            alignment: 0,
            bit_offset_in_host: 0,
            host_int_bytes: 0,
            allow_zero: false,
        }
    }

    /// True when the `{const, mut} x child` fast path applies.
    fn is_default_shape(&self) -> bool {
        self.ptr_len == PtrLen::Single
            && !self.is_volatile
            && !self.allow_zero
            && self.alignment == 0
            && self.host_int_bytes == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnParam {
    pub ty: TypeId,
    pub is_noalias: bool,
}

/// Structural identity of a function type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnTypeInfo {
    pub cc: CallConv,
    pub return_type: TypeId,
    pub param_types: SmallVec<[TypeId; 4]>,
    pub noalias_bits: u32,
    pub alignment: u32,
    pub is_var_args: bool,
    pub is_generic: bool,
    /// Set on method-bound function types; the receiver's container type.
    pub bound_fn_parent: Option<TypeId>,
}

impl FnTypeInfo {
    pub fn params(&self) -> impl Iterator<Item = FnParam> + '_ {
        self.param_types.iter().enumerate().map(|(i, &ty)| FnParam {
            ty,
            is_noalias: self.noalias_bits & (1 << i.min(31)) != 0,
        })
    }
}

/// One declared error inside an error set.
#[derive(Debug, Clone)]
pub struct ErrorSetMember {
    pub name: Symbol,
    pub code: ErrorCode,
    pub decl_span: Span,
}

/// `err_count == u32::MAX` marks the global error set.
pub const GLOBAL_ERROR_SET: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct ErrorSetInfo {
    pub err_count: u32,
    pub errors: Vec<ErrorSetMember>,
    /// Function whose body determines this (inferred) error set.
    pub infer_fn: Option<FnId>,
    /// Still waiting on the inferring function's body analysis.
    pub incomplete: bool,
}

impl ErrorSetInfo {
    pub fn is_global(&self) -> bool {
        self.err_count == GLOBAL_ERROR_SET
    }
}

/// Tagged variant over the type kinds the analyzer understands.
#[derive(Debug, Clone)]
pub enum TypeKind {
    MetaType,
    Void,
    Bool,
    Unreachable,
    ComptimeInt,
    ComptimeFloat,
    EnumLiteral,
    Undefined,
    Null,
    Opaque { decl_span: Span },
    BoundFn,
    ArgTuple,
    Int { signed: bool, bits: u16 },
    Float { bits: u16 },
    Pointer(PtrInfo),
    Array { child: TypeId, len: u64 },
    Vector { elem: TypeId, len: u32 },
    Optional { child: TypeId },
    ErrorUnion { err_set: TypeId, payload: TypeId, pad_bytes: u64 },
    ErrorSet(ErrorSetInfo),
    Struct { container: ContainerId },
    Union { container: ContainerId },
    Enum { container: ContainerId },
    Fn(FnTypeInfo),
    FnFrame { fn_id: FnId, locals: Option<ContainerId> },
    AnyFrame { result: Option<TypeId> },
}

/// Arena entry: the kind plus the resolution header and cached derivations.
#[derive(Debug, Clone)]
pub struct TypeData {
    pub kind: TypeKind,
    pub name: String,
    /// None until resolved.
    pub abi_size: Option<u64>,
    pub size_in_bits: Option<u64>,
    pub abi_align: Option<u32>,
    // Cached derived types, one per child.
    pub ptr_to_const: Option<TypeId>,
    pub ptr_to_mut: Option<TypeId>,
    pub optional_of: Option<TypeId>,
    pub slice_of_const: Option<TypeId>,
    pub slice_of_mut: Option<TypeId>,
    pub anyframe_of: Option<TypeId>,
}

impl TypeData {
    fn new(kind: TypeKind, name: String) -> Self {
        Self {
            kind,
            name,
            abi_size: None,
            size_in_bits: None,
            abi_align: None,
            ptr_to_const: None,
            ptr_to_mut: None,
            optional_of: None,
            slice_of_const: None,
            slice_of_mut: None,
            anyframe_of: None,
        }
    }

    fn with_layout(kind: TypeKind, name: String, size: u64, bits: u64, align: u32) -> Self {
        let mut data = Self::new(kind, name);
        data.abi_size = Some(size);
        data.size_in_bits = Some(bits);
        data.abi_align = Some(align);
        data
    }

    /// Resolved and zero-bit. Unresolved types answer `None` through the
    /// lazy layer instead of this accessor.
    pub fn is_zero_bits(&self) -> bool {
        self.abi_size == Some(0)
    }

    pub fn has_bits(&self) -> bool {
        matches!(self.abi_size, Some(n) if n > 0)
    }
}

/// Pre-interned scalar types for O(1) access.
#[derive(Debug, Clone, Copy)]
pub struct Primitives {
    pub metatype: TypeId,
    pub void: TypeId,
    pub bool_: TypeId,
    pub unreachable_: TypeId,
    pub comptime_int: TypeId,
    pub comptime_float: TypeId,
    pub enum_literal: TypeId,
    pub undefined: TypeId,
    pub null: TypeId,
    pub bound_fn: TypeId,
    pub arg_tuple: TypeId,
    pub anyerror: TypeId,
    pub anyframe_erased: TypeId,
    pub u8: TypeId,
    pub u16: TypeId,
    pub usize: TypeId,
    pub c_int: TypeId,
    pub f16: TypeId,
    pub f32: TypeId,
    pub f64: TypeId,
    pub f128: TypeId,
}

/// Per-compilation type arena with automatic interning of structural types.
#[derive(Debug)]
pub struct TypeArena {
    target: Target,
    types: Vec<TypeData>,
    pub primitives: Primitives,
    int_types: HashMap<(bool, u16), TypeId>,
    float_types: FxHashMap<u16, TypeId>,
    ptr_types: HashMap<PtrInfo, TypeId>,
    array_types: FxHashMap<(TypeId, u64), TypeId>,
    vector_types: FxHashMap<(TypeId, u32), TypeId>,
    error_union_types: FxHashMap<(TypeId, TypeId), TypeId>,
    fn_types: HashMap<FnTypeInfo, TypeId>,
    frame_types: FxHashMap<FnId, TypeId>,
    /// Slice memo, keyed by the element-pointer type. The slice struct
    /// itself is built by the analyzer (it owns the container table).
    slice_types: FxHashMap<TypeId, TypeId>,
}

impl TypeArena {
    pub fn new(target: Target) -> Self {
        let mut arena = Self {
            target,
            types: Vec::new(),
            primitives: Primitives {
                metatype: TypeId(0),
                void: TypeId(0),
                bool_: TypeId(0),
                unreachable_: TypeId(0),
                comptime_int: TypeId(0),
                comptime_float: TypeId(0),
                enum_literal: TypeId(0),
                undefined: TypeId(0),
                null: TypeId(0),
                bound_fn: TypeId(0),
                arg_tuple: TypeId(0),
                anyerror: TypeId(0),
                anyframe_erased: TypeId(0),
                u8: TypeId(0),
                u16: TypeId(0),
                usize: TypeId(0),
                c_int: TypeId(0),
                f16: TypeId(0),
                f32: TypeId(0),
                f64: TypeId(0),
                f128: TypeId(0),
            },
            int_types: HashMap::new(),
            float_types: FxHashMap::default(),
            ptr_types: HashMap::new(),
            array_types: FxHashMap::default(),
            vector_types: FxHashMap::default(),
            error_union_types: FxHashMap::default(),
            fn_types: HashMap::new(),
            frame_types: FxHashMap::default(),
            slice_types: FxHashMap::default(),
        };

        // Zero-bit scalars: resolved up front so layout queries never wait.
        arena.primitives.metatype = arena.scalar(TypeKind::MetaType, "type");
        arena.primitives.void = arena.scalar(TypeKind::Void, "void");
        arena.primitives.unreachable_ = arena.scalar(TypeKind::Unreachable, "noreturn");
        arena.primitives.comptime_int = arena.scalar(TypeKind::ComptimeInt, "comptime_int");
        arena.primitives.comptime_float = arena.scalar(TypeKind::ComptimeFloat, "comptime_float");
        arena.primitives.enum_literal = arena.scalar(TypeKind::EnumLiteral, "(enum literal)");
        arena.primitives.undefined = arena.scalar(TypeKind::Undefined, "(undefined)");
        arena.primitives.null = arena.scalar(TypeKind::Null, "(null)");
        arena.primitives.bound_fn = arena.scalar(TypeKind::BoundFn, "(bound fn)");
        arena.primitives.arg_tuple = arena.scalar(TypeKind::ArgTuple, "(args)");
        arena.primitives.bool_ =
            arena.push(TypeData::with_layout(TypeKind::Bool, "bool".into(), 1, 1, 1));
        arena.primitives.anyerror = arena.push(TypeData::with_layout(
            TypeKind::ErrorSet(ErrorSetInfo {
                err_count: GLOBAL_ERROR_SET,
                errors: Vec::new(),
                infer_fn: None,
                incomplete: false,
            }),
            "anyerror".into(),
            2,
            16,
            2,
        ));
        let ptr_bytes = arena.target.ptr_bytes;
        let ptr_align = arena.target.ptr_align();
        arena.primitives.anyframe_erased = arena.push(TypeData::with_layout(
            TypeKind::AnyFrame { result: None },
            "anyframe".into(),
            ptr_bytes,
            ptr_bytes * 8,
            ptr_align,
        ));
        arena.primitives.u8 = arena.int_type(false, 8);
        arena.primitives.u16 = arena.int_type(false, 16);
        arena.primitives.usize = arena.int_type(false, arena.target.ptr_bits() as u16);
        arena.primitives.c_int = arena.int_type(true, arena.target.c_int_bits as u16);
        arena.primitives.f16 = arena.float_type(16);
        arena.primitives.f32 = arena.float_type(32);
        arena.primitives.f64 = arena.float_type(64);
        arena.primitives.f128 = arena.float_type(128);

        arena
    }

    pub fn target(&self) -> Target {
        self.target
    }

    fn push(&mut self, data: TypeData) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(data);
        id
    }

    fn scalar(&mut self, kind: TypeKind, name: &str) -> TypeId {
        self.push(TypeData::with_layout(kind, name.to_string(), 0, 0, 1))
    }

    pub fn get(&self, id: TypeId) -> &TypeData {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeData {
        &mut self.types[id.0 as usize]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ========================================================================
    // Derived constructors - intern on construction
    // ========================================================================

    /// `iN` / `uN`. Layout is known immediately.
    pub fn int_type(&mut self, signed: bool, bits: u16) -> TypeId {
        if let Some(&id) = self.int_types.get(&(signed, bits)) {
            return id;
        }
        let name = format!("{}{}", if signed { "i" } else { "u" }, bits);
        let size = int_size_bytes(bits as u32);
        let align = if size == 0 {
            1
        } else {
            (size as u32).min(self.target.max_int_align())
        };
        let id = self.push(TypeData::with_layout(
            TypeKind::Int { signed, bits },
            name,
            size,
            bits as u64,
            align,
        ));
        self.int_types.insert((signed, bits), id);
        id
    }

    pub fn float_type(&mut self, bits: u16) -> TypeId {
        debug_assert!(matches!(bits, 16 | 32 | 64 | 128));
        if let Some(&id) = self.float_types.get(&bits) {
            return id;
        }
        let size = (bits / 8) as u64;
        let id = self.push(TypeData::with_layout(
            TypeKind::Float { bits },
            format!("f{bits}"),
            size,
            bits as u64,
            (size as u32).min(self.target.max_int_align()),
        ));
        self.float_types.insert(bits, id);
        id
    }

    /// Canonical pointer type for a descriptor. The default single-item
    /// shape is memoized on the child entry; everything else goes through
    /// the full-key table.
    pub fn get_pointer(&mut self, info: PtrInfo) -> TypeId {
        debug_assert!(
            info.ptr_len != PtrLen::C || info.allow_zero,
            "C pointers always allow zero"
        );
        if info.is_default_shape() {
            let cached = if info.is_const {
                self.get(info.child).ptr_to_const
            } else {
                self.get(info.child).ptr_to_mut
            };
            if let Some(id) = cached {
                return id;
            }
            let id = self.new_pointer(info);
            let child = self.get_mut(info.child);
            if info.is_const {
                child.ptr_to_const = Some(id);
            } else {
                child.ptr_to_mut = Some(id);
            }
            return id;
        }
        if let Some(&id) = self.ptr_types.get(&info) {
            return id;
        }
        let id = self.new_pointer(info);
        self.ptr_types.insert(info, id);
        id
    }

    fn new_pointer(&mut self, info: PtrInfo) -> TypeId {
        let name = self.pointer_name(&info);
        let mut data = TypeData::new(TypeKind::Pointer(info), name);
        // Pointer size depends only on whether the child has bits; when the
        // child's zero-bit status is already known the header is final.
        if let Some(child_size) = self.get(info.child).abi_size {
            self.apply_pointer_layout(&mut data, child_size > 0);
        }
        self.push(data)
    }

    pub(crate) fn apply_pointer_layout(&self, data: &mut TypeData, child_has_bits: bool) {
        if child_has_bits {
            data.abi_size = Some(self.target.ptr_bytes);
            data.size_in_bits = Some(self.target.ptr_bits());
            data.abi_align = Some(self.target.ptr_align());
        } else {
            data.abi_size = Some(0);
            data.size_in_bits = Some(0);
            data.abi_align = Some(1);
        }
    }

    pub fn get_array(&mut self, child: TypeId, len: u64) -> TypeId {
        if let Some(&id) = self.array_types.get(&(child, len)) {
            return id;
        }
        let name = format!("[{}]{}", len, self.name(child));
        let mut data = TypeData::new(TypeKind::Array { child, len }, name);
        let child_data = self.get(child);
        if let (Some(size), Some(bits), Some(align)) = (
            child_data.abi_size,
            child_data.size_in_bits,
            child_data.abi_align,
        ) {
            data.abi_size = Some(size * len);
            // Only the last element may omit its padding bits.
            data.size_in_bits = Some(if len == 0 {
                0
            } else {
                size * 8 * (len - 1) + bits
            });
            data.abi_align = Some(if size * len == 0 { 1 } else { align });
        }
        let id = self.push(data);
        self.array_types.insert((child, len), id);
        id
    }

    pub fn get_vector(&mut self, elem: TypeId, len: u32) -> TypeId {
        if let Some(&id) = self.vector_types.get(&(elem, len)) {
            return id;
        }
        let name = format!("@Vector({}, {})", len, self.name(elem));
        let mut data = TypeData::new(TypeKind::Vector { elem, len }, name);
        if let (Some(size), Some(bits)) = (self.get(elem).abi_size, self.get(elem).size_in_bits) {
            let total = size * len as u64;
            data.abi_size = Some(total);
            data.size_in_bits = Some(bits * len as u64);
            data.abi_align = Some(if total == 0 {
                1
            } else {
                ceil_pow2_u32(total.min(16) as u32)
            });
        }
        let id = self.push(data);
        self.vector_types.insert((elem, len), id);
        id
    }

    /// `?T`. One optional exists per child; layout fills in when the child
    /// is resolved (see `Analyzer::resolve_type_layout`).
    pub fn get_optional(&mut self, child: TypeId) -> TypeId {
        if let Some(id) = self.get(child).optional_of {
            return id;
        }
        let name = format!("?{}", self.name(child));
        let id = self.push(TypeData::new(TypeKind::Optional { child }, name));
        self.get_mut(child).optional_of = Some(id);
        id
    }

    /// `E!T`. Layout fills in when both sides are resolved.
    pub fn get_error_union(&mut self, err_set: TypeId, payload: TypeId) -> TypeId {
        debug_assert!(matches!(self.get(err_set).kind, TypeKind::ErrorSet(_)));
        if let Some(&id) = self.error_union_types.get(&(err_set, payload)) {
            return id;
        }
        let name = format!("{}!{}", self.name(err_set), self.name(payload));
        let id = self.push(TypeData::new(
            TypeKind::ErrorUnion {
                err_set,
                payload,
                pad_bytes: 0,
            },
            name,
        ));
        self.error_union_types.insert((err_set, payload), id);
        id
    }

    /// `anyframe->T`, or the erased `anyframe` when `result` is None.
    pub fn get_any_frame(&mut self, result: Option<TypeId>) -> TypeId {
        let child = match result {
            None => return self.primitives.anyframe_erased,
            Some(child) => child,
        };
        if let Some(id) = self.get(child).anyframe_of {
            return id;
        }
        let name = format!("anyframe->{}", self.name(child));
        let id = self.push(TypeData::with_layout(
            TypeKind::AnyFrame {
                result: Some(child),
            },
            name,
            self.target.ptr_bytes,
            self.target.ptr_bits(),
            self.target.ptr_align(),
        ));
        self.get_mut(child).anyframe_of = Some(id);
        id
    }

    /// Function types hash over `(cc, ret, var_args, align, params)`.
    pub fn get_fn_type(&mut self, info: FnTypeInfo) -> TypeId {
        if let Some(&id) = self.fn_types.get(&info) {
            return id;
        }
        let name = self.fn_type_name(&info);
        let mut data = TypeData::new(TypeKind::Fn(info.clone()), name);
        if info.is_generic {
            // Generic function types are compile-time only.
            data.abi_size = Some(0);
            data.size_in_bits = Some(0);
            data.abi_align = Some(1);
        } else {
            data.abi_size = Some(self.target.ptr_bytes);
            data.size_in_bits = Some(self.target.ptr_bits());
            data.abi_align = Some(if info.alignment != 0 {
                info.alignment
            } else {
                self.target.ptr_align()
            });
        }
        let id = self.push(data);
        self.fn_types.insert(info, id);
        id
    }

    /// `@Frame(f)`. Nominal per function; the locals container is attached
    /// once async inference has synthesized it.
    pub fn get_fn_frame(&mut self, fn_id: FnId, fn_name: &str) -> TypeId {
        if let Some(&id) = self.frame_types.get(&fn_id) {
            return id;
        }
        let name = format!("@Frame({fn_name})");
        let id = self.push(TypeData::new(
            TypeKind::FnFrame {
                fn_id,
                locals: None,
            },
            name,
        ));
        self.frame_types.insert(fn_id, id);
        id
    }

    /// A fresh (nominal) error set type.
    pub fn make_error_set(&mut self, name: String, info: ErrorSetInfo) -> TypeId {
        // Error sets share the global error numbering; their ABI is the
        // global error integer.
        self.push(TypeData::with_layout(
            TypeKind::ErrorSet(info),
            name,
            2,
            16,
            2,
        ))
    }

    /// A fresh opaque type. Size is never known.
    pub fn make_opaque(&mut self, name: String, decl_span: Span) -> TypeId {
        self.push(TypeData::new(TypeKind::Opaque { decl_span }, name))
    }

    /// Register the type entry for a newly declared container.
    pub fn register_container(
        &mut self,
        kind: crate::frontend::ast::ContainerKind,
        container: ContainerId,
        name: String,
    ) -> TypeId {
        use crate::frontend::ast::ContainerKind as K;
        let kind = match kind {
            K::Struct => TypeKind::Struct { container },
            K::Union => TypeKind::Union { container },
            K::Enum => TypeKind::Enum { container },
        };
        self.push(TypeData::new(kind, name))
    }

    // ========================================================================
    // Slice memo (construction lives on Analyzer)
    // ========================================================================

    pub fn slice_cache_get(&self, elem_ptr: TypeId) -> Option<TypeId> {
        self.slice_types.get(&elem_ptr).copied()
    }

    pub fn slice_cache_put(&mut self, elem_ptr: TypeId, slice: TypeId) {
        self.slice_types.insert(elem_ptr, slice);
        let ptr_info = match &self.get(elem_ptr).kind {
            TypeKind::Pointer(info) => *info,
            _ => return,
        };
        let child = self.get_mut(ptr_info.child);
        if ptr_info.is_const {
            child.slice_of_const = Some(slice);
        } else {
            child.slice_of_mut = Some(slice);
        }
    }

    // ========================================================================
    // Classification helpers
    // ========================================================================

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Int { .. })
    }

    pub fn is_container(&self, id: TypeId) -> Option<ContainerId> {
        match self.get(id).kind {
            TypeKind::Struct { container }
            | TypeKind::Union { container }
            | TypeKind::Enum { container } => Some(container),
            _ => None,
        }
    }

    /// Pointer types that can never be null: single/many pointers without
    /// `allow_zero`. C pointers and allow-zero pointers are excluded.
    pub fn is_non_null_ptr(&self, id: TypeId) -> bool {
        match &self.get(id).kind {
            TypeKind::Pointer(info) => !info.allow_zero && info.ptr_len != PtrLen::C,
            TypeKind::Fn(info) => !info.is_generic,
            _ => false,
        }
    }

    /// Whether `?T` is representable as `T` itself (null folded into the
    /// child's spare encoding).
    pub fn optional_child_uses_null_slot(&self, child: TypeId) -> bool {
        self.is_non_null_ptr(child) || matches!(self.get(child).kind, TypeKind::ErrorSet(_))
    }

    // ========================================================================
    // Name synthesis
    // ========================================================================

    fn pointer_name(&self, info: &PtrInfo) -> String {
        let mut out = String::new();
        match info.ptr_len {
            PtrLen::Single => out.push('*'),
            PtrLen::Unknown => out.push_str("[*]"),
            PtrLen::C => out.push_str("[*c]"),
        }
        if info.allow_zero && info.ptr_len != PtrLen::C {
            out.push_str("allowzero ");
        }
        if info.host_int_bytes != 0 {
            out.push_str(&format!(
                "align(@{}:{}:{}) ",
                if info.alignment == 0 { 1 } else { info.alignment },
                info.bit_offset_in_host,
                info.host_int_bytes
            ));
        } else if info.alignment != 0 {
            out.push_str(&format!("align({}) ", info.alignment));
        }
        if info.is_const {
            out.push_str("const ");
        }
        if info.is_volatile {
            out.push_str("volatile ");
        }
        out.push_str(self.name(info.child));
        out
    }

    fn fn_type_name(&self, info: &FnTypeInfo) -> String {
        let mut out = String::from("fn(");
        for (i, &p) in info.param_types.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            // Generic placeholders print as `var`.
            if info.is_generic && p == self.primitives.undefined {
                out.push_str("var");
            } else {
                out.push_str(self.name(p));
            }
        }
        if info.is_var_args {
            if !info.param_types.is_empty() {
                out.push_str(", ");
            }
            out.push_str("...");
        }
        out.push(')');
        match info.cc {
            CallConv::Unspecified => {}
            CallConv::C => out.push_str(" callconv(.C)"),
            CallConv::Cold => out.push_str(" callconv(.Cold)"),
            CallConv::Naked => out.push_str(" callconv(.Naked)"),
            CallConv::Stdcall => out.push_str(" callconv(.Stdcall)"),
            CallConv::Async => out.push_str(" callconv(.Async)"),
        }
        out.push(' ');
        out.push_str(self.name(info.return_type));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> TypeArena {
        TypeArena::new(Target::x86_64())
    }

    #[test]
    fn pointer_interning_is_stable() {
        let mut arena = arena();
        let u32_ty = arena.int_type(false, 32);
        let a = arena.get_pointer(PtrInfo::single(u32_ty, true));
        let b = arena.get_pointer(PtrInfo::single(u32_ty, true));
        assert_eq!(a, b);
        let c = arena.get_pointer(PtrInfo::single(u32_ty, false));
        assert_ne!(a, c);
    }

    #[test]
    fn nondefault_pointer_goes_through_full_table() {
        let mut arena = arena();
        let u8_ty = arena.primitives.u8;
        let mut info = PtrInfo::single(u8_ty, false);
        info.alignment = 16;
        let a = arena.get_pointer(info);
        let b = arena.get_pointer(info);
        assert_eq!(a, b);
        assert_ne!(a, arena.get_pointer(PtrInfo::single(u8_ty, false)));
        assert_eq!(arena.name(a), "*align(16) u8");
    }

    #[test]
    fn array_and_error_union_interning() {
        let mut arena = arena();
        let u8_ty = arena.primitives.u8;
        assert_eq!(arena.get_array(u8_ty, 4), arena.get_array(u8_ty, 4));
        assert_ne!(arena.get_array(u8_ty, 4), arena.get_array(u8_ty, 5));

        let err = arena.primitives.anyerror;
        assert_eq!(
            arena.get_error_union(err, u8_ty),
            arena.get_error_union(err, u8_ty)
        );
    }

    #[test]
    fn optional_is_memoized_per_child() {
        let mut arena = arena();
        let u64_ty = arena.int_type(false, 64);
        let a = arena.get_optional(u64_ty);
        let b = arena.get_optional(u64_ty);
        assert_eq!(a, b);
        assert_eq!(arena.name(a), "?u64");
    }

    #[test]
    fn int_layout_rounds_to_power_of_two() {
        let mut arena = arena();
        let u3 = arena.int_type(false, 3);
        assert_eq!(arena.get(u3).abi_size, Some(1));
        assert_eq!(arena.get(u3).size_in_bits, Some(3));
        let u24 = arena.int_type(false, 24);
        assert_eq!(arena.get(u24).abi_size, Some(4));
        let u0 = arena.int_type(false, 0);
        assert!(arena.get(u0).is_zero_bits());
    }

    #[test]
    fn pointer_layout_follows_child_bits() {
        let mut arena = arena();
        let u32_ty = arena.int_type(false, 32);
        let p = arena.get_pointer(PtrInfo::single(u32_ty, false));
        assert_eq!(arena.get(p).abi_size, Some(8));
        assert_eq!(arena.get(p).abi_align, Some(8));

        let void = arena.primitives.void;
        let pv = arena.get_pointer(PtrInfo::single(void, false));
        assert!(arena.get(pv).is_zero_bits());
    }

    #[test]
    fn fn_type_name_includes_cc() {
        let mut arena = arena();
        let void = arena.primitives.void;
        let u32_ty = arena.int_type(false, 32);
        let info = FnTypeInfo {
            cc: CallConv::C,
            return_type: void,
            param_types: smallvec::smallvec![u32_ty],
            noalias_bits: 0,
            alignment: 0,
            is_var_args: true,
            is_generic: false,
            bound_fn_parent: None,
        };
        let id = arena.get_fn_type(info.clone());
        assert_eq!(arena.name(id), "fn(u32, ...) callconv(.C) void");
        assert_eq!(arena.get_fn_type(info), id);
    }

    #[test]
    fn anyframe_memoization() {
        let mut arena = arena();
        assert_eq!(arena.get_any_frame(None), arena.get_any_frame(None));
        let u8_ty = arena.primitives.u8;
        let a = arena.get_any_frame(Some(u8_ty));
        assert_eq!(a, arena.get_any_frame(Some(u8_ty)));
        assert_eq!(arena.name(a), "anyframe->u8");
    }
}
