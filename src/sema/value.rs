// src/sema/value.rs
//
// Compile-time values. A Value pairs a type with a payload; Runtime and
// Undef values carry no payload, Lazy values carry an unevaluated producer
// (see lazy.rs). Equality and hashing are structural; the `is_cstr` flag on
// array-base pointers affects rendering only.

use std::hash::{Hash, Hasher};

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::frontend::intern::{Interner, Symbol};
use crate::sema::func::FnId;
use crate::sema::lazy::LazyValue;
use crate::sema::type_arena::{ErrorCode, TypeArena, TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSpecial {
    /// Fully evaluated.
    Static,
    /// Only known at runtime; the payload is empty.
    Runtime,
    /// An unevaluated producer; see `LazyValue`.
    Lazy,
    /// `undefined` of the given type.
    Undef,
}

/// Mutability of the memory a comptime pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrMut {
    RuntimeVar,
    ComptimeConst,
    ComptimeVar,
    Infer,
}

/// What a comptime pointer points at.
#[derive(Debug, Clone)]
pub enum PtrValSpecial {
    /// Direct reference to another comptime value.
    Ref(Box<Value>),
    /// Element pointer into a comptime array.
    BaseArray {
        array: Box<Value>,
        elem_index: u64,
        /// Rendering hint for C string literals; no semantic weight.
        is_cstr: bool,
    },
    /// Field pointer into a comptime struct.
    BaseStruct { agg: Box<Value>, field_index: u32 },
    BaseErrorUnionCode(Box<Value>),
    BaseErrorUnionPayload(Box<Value>),
    BaseOptionalPayload(Box<Value>),
    HardCodedAddr(u64),
    Function(FnId),
    Null,
    Discard,
}

#[derive(Debug, Clone)]
pub struct PtrValue {
    pub special: PtrValSpecial,
    pub mutability: PtrMut,
}

#[derive(Debug, Clone)]
pub enum ArrayValue {
    /// Every element undefined; elided storage.
    Undef,
    /// Byte-buffer optimization for u8 arrays and string literals.
    Buf(Vec<u8>),
    Elems(Vec<Value>),
}

#[derive(Debug, Clone)]
pub enum ErrorUnionValue {
    Code(ErrorCode),
    Payload(Box<Value>),
}

/// Exact float payloads per bit width. f128 is approximated by f64 storage;
/// layout never depends on the mantissa.
#[derive(Debug, Clone, Copy)]
pub enum FloatVal {
    Big(f64),
    F16(f32),
    F32(f32),
    F64(f64),
    F128(f64),
}

impl FloatVal {
    pub fn as_f64(self) -> f64 {
        match self {
            FloatVal::Big(v) | FloatVal::F64(v) | FloatVal::F128(v) => v,
            FloatVal::F16(v) | FloatVal::F32(v) => v as f64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ValueData {
    /// Runtime / Undef values carry no payload.
    #[default]
    None,
    BigInt(BigInt),
    Float(FloatVal),
    Bool(bool),
    Type(TypeId),
    EnumTag(BigInt),
    FnRef(FnId),
    ErrCode(ErrorCode),
    Array(ArrayValue),
    Struct(Vec<Value>),
    Union { tag: BigInt, payload: Box<Value> },
    ErrorUnion(ErrorUnionValue),
    Optional(Option<Box<Value>>),
    Ptr(PtrValue),
    EnumLiteral(Symbol),
    ArgTuple { start: u32, end: u32 },
    Lazy(Box<LazyValue>),
}

#[derive(Debug, Clone)]
pub struct Value {
    pub ty: TypeId,
    pub special: ValueSpecial,
    pub data: ValueData,
}

impl Value {
    pub fn static_(ty: TypeId, data: ValueData) -> Self {
        Self {
            ty,
            special: ValueSpecial::Static,
            data,
        }
    }

    pub fn runtime(ty: TypeId) -> Self {
        Self {
            ty,
            special: ValueSpecial::Runtime,
            data: ValueData::None,
        }
    }

    pub fn undef(ty: TypeId) -> Self {
        Self {
            ty,
            special: ValueSpecial::Undef,
            data: ValueData::None,
        }
    }

    pub fn lazy(ty: TypeId, producer: LazyValue) -> Self {
        Self {
            ty,
            special: ValueSpecial::Lazy,
            data: ValueData::Lazy(Box::new(producer)),
        }
    }

    pub fn of_type(metatype: TypeId, ty: TypeId) -> Self {
        Self::static_(metatype, ValueData::Type(ty))
    }

    pub fn bool_(bool_ty: TypeId, v: bool) -> Self {
        Self::static_(bool_ty, ValueData::Bool(v))
    }

    pub fn int(ty: TypeId, v: impl Into<BigInt>) -> Self {
        Self::static_(ty, ValueData::BigInt(v.into()))
    }

    pub fn as_type(&self) -> Option<TypeId> {
        match &self.data {
            ValueData::Type(ty) => Some(*ty),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        match &self.data {
            ValueData::BigInt(v) | ValueData::EnumTag(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_bigint().and_then(|v| v.to_u64())
    }

    pub fn is_comptime_known(&self) -> bool {
        matches!(
            self.special,
            ValueSpecial::Static | ValueSpecial::Lazy | ValueSpecial::Undef
        )
    }

    pub fn as_lazy(&self) -> Option<&LazyValue> {
        match &self.data {
            ValueData::Lazy(producer) => Some(producer),
            _ => None,
        }
    }

    /// Expand a top-level `undefined` of an aggregate type into a
    /// per-member undef aggregate, so field/element pointers have storage
    /// to refer into.
    pub fn expand_undef(&mut self, arena: &TypeArena, field_types: &[TypeId]) {
        if self.special != ValueSpecial::Undef {
            return;
        }
        match &arena.get(self.ty).kind {
            TypeKind::Array { child, len } => {
                let elems = (0..*len).map(|_| Value::undef(*child)).collect();
                self.special = ValueSpecial::Static;
                self.data = ValueData::Array(ArrayValue::Elems(elems));
            }
            TypeKind::Struct { .. } => {
                let fields = field_types.iter().map(|&ty| Value::undef(ty)).collect();
                self.special = ValueSpecial::Static;
                self.data = ValueData::Struct(fields);
            }
            _ => {}
        }
    }

    /// Human rendering for diagnostics.
    pub fn render(&self, arena: &TypeArena, interner: &Interner) -> String {
        match self.special {
            ValueSpecial::Runtime => format!("(runtime {})", arena.name(self.ty)),
            ValueSpecial::Undef => "undefined".to_string(),
            ValueSpecial::Lazy => format!("(lazy {})", arena.name(self.ty)),
            ValueSpecial::Static => self.render_static(arena, interner),
        }
    }

    fn render_static(&self, arena: &TypeArena, interner: &Interner) -> String {
        match &self.data {
            ValueData::None => "(void)".to_string(),
            ValueData::BigInt(v) | ValueData::EnumTag(v) => v.to_string(),
            ValueData::Float(v) => format!("{}", v.as_f64()),
            ValueData::Bool(v) => v.to_string(),
            ValueData::Type(ty) => arena.name(*ty).to_string(),
            ValueData::FnRef(_) => "(function)".to_string(),
            ValueData::ErrCode(code) => format!("error #{}", code.0),
            ValueData::EnumLiteral(sym) => format!(".{}", interner.resolve(*sym)),
            ValueData::ArgTuple { start, end } => format!("(args {start}..{end})"),
            ValueData::Optional(None) => "null".to_string(),
            ValueData::Optional(Some(inner)) => inner.render(arena, interner),
            ValueData::ErrorUnion(ErrorUnionValue::Code(code)) => format!("error #{}", code.0),
            ValueData::ErrorUnion(ErrorUnionValue::Payload(v)) => v.render(arena, interner),
            ValueData::Union { tag, payload } => {
                format!("(tag {}) {}", tag, payload.render(arena, interner))
            }
            ValueData::Struct(fields) => {
                let inner: Vec<String> =
                    fields.iter().map(|f| f.render(arena, interner)).collect();
                format!("{}{{{}}}", arena.name(self.ty), inner.join(", "))
            }
            ValueData::Array(ArrayValue::Undef) => "undefined".to_string(),
            ValueData::Array(ArrayValue::Buf(buf)) => {
                format!("\"{}\"", String::from_utf8_lossy(buf))
            }
            ValueData::Array(ArrayValue::Elems(elems)) => {
                let inner: Vec<String> =
                    elems.iter().map(|e| e.render(arena, interner)).collect();
                format!("[{}]", inner.join(", "))
            }
            ValueData::Ptr(ptr) => ptr.render(arena, interner),
            ValueData::Lazy(_) => "(lazy)".to_string(),
        }
    }
}

impl PtrValue {
    fn render(&self, arena: &TypeArena, interner: &Interner) -> String {
        match &self.special {
            PtrValSpecial::Ref(v) => format!("&{}", v.render(arena, interner)),
            PtrValSpecial::BaseArray {
                array,
                elem_index,
                is_cstr,
            } => {
                // C string pointers render as the literal itself.
                if *is_cstr {
                    if let ValueData::Array(ArrayValue::Buf(buf)) = &array.data {
                        return format!("\"{}\"", String::from_utf8_lossy(buf));
                    }
                }
                format!("&{}[{}]", array.render(arena, interner), elem_index)
            }
            PtrValSpecial::BaseStruct { agg, field_index } => {
                format!("&{}.[{}]", agg.render(arena, interner), field_index)
            }
            PtrValSpecial::BaseErrorUnionCode(v) | PtrValSpecial::BaseErrorUnionPayload(v) => {
                format!("&({})", v.render(arena, interner))
            }
            PtrValSpecial::BaseOptionalPayload(v) => format!("&({})", v.render(arena, interner)),
            PtrValSpecial::HardCodedAddr(addr) => format!("@intToPtr(0x{addr:x})"),
            PtrValSpecial::Function(_) => "(function)".to_string(),
            PtrValSpecial::Null => "null".to_string(),
            PtrValSpecial::Discard => "_".to_string(),
        }
    }
}

// Structural equality. Lazy and Runtime values never compare equal to
// anything (they have no stable payload); is_cstr is ignored.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.ty != other.ty || self.special != other.special {
            return false;
        }
        if self.special != ValueSpecial::Static {
            return self.special == ValueSpecial::Undef && other.special == ValueSpecial::Undef;
        }
        self.data == other.data
    }
}

impl Eq for Value {}

impl PartialEq for ValueData {
    fn eq(&self, other: &Self) -> bool {
        use ValueData::*;
        match (self, other) {
            (None, None) => true,
            (BigInt(a), BigInt(b)) => a == b,
            (EnumTag(a), EnumTag(b)) => a == b,
            (Float(a), Float(b)) => a.as_f64().to_bits() == b.as_f64().to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Type(a), Type(b)) => a == b,
            (FnRef(a), FnRef(b)) => a == b,
            (ErrCode(a), ErrCode(b)) => a == b,
            (EnumLiteral(a), EnumLiteral(b)) => a == b,
            (ArgTuple { start: a, end: b }, ArgTuple { start: c, end: d }) => a == c && b == d,
            (Struct(a), Struct(b)) => a == b,
            (Optional(a), Optional(b)) => a == b,
            (
                Union { tag: a, payload: p },
                Union { tag: b, payload: q },
            ) => a == b && p == q,
            (ErrorUnion(a), ErrorUnion(b)) => match (a, b) {
                (ErrorUnionValue::Code(x), ErrorUnionValue::Code(y)) => x == y,
                (ErrorUnionValue::Payload(x), ErrorUnionValue::Payload(y)) => x == y,
                _ => false,
            },
            (Array(a), Array(b)) => array_values_eq(a, b),
            (Ptr(a), Ptr(b)) => ptr_values_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ValueData {}

/// Buf and Elems forms of the same bytes compare equal.
fn array_values_eq(a: &ArrayValue, b: &ArrayValue) -> bool {
    match (a, b) {
        (ArrayValue::Undef, ArrayValue::Undef) => true,
        (ArrayValue::Buf(x), ArrayValue::Buf(y)) => x == y,
        (ArrayValue::Elems(x), ArrayValue::Elems(y)) => x == y,
        (ArrayValue::Buf(bytes), ArrayValue::Elems(elems))
        | (ArrayValue::Elems(elems), ArrayValue::Buf(bytes)) => {
            bytes.len() == elems.len()
                && elems.iter().zip(bytes).all(|(e, &b)| {
                    matches!(&e.data, ValueData::BigInt(v) if v.to_u8() == Some(b))
                })
        }
        _ => false,
    }
}

fn ptr_values_eq(a: &PtrValue, b: &PtrValue) -> bool {
    if a.mutability != b.mutability {
        return false;
    }
    use PtrValSpecial::*;
    match (&a.special, &b.special) {
        (Ref(x), Ref(y)) => x == y,
        (
            BaseArray {
                array: x,
                elem_index: i,
                ..
            },
            BaseArray {
                array: y,
                elem_index: j,
                ..
            },
        ) => i == j && x == y,
        (
            BaseStruct {
                agg: x,
                field_index: i,
            },
            BaseStruct {
                agg: y,
                field_index: j,
            },
        ) => i == j && x == y,
        (BaseErrorUnionCode(x), BaseErrorUnionCode(y)) => x == y,
        (BaseErrorUnionPayload(x), BaseErrorUnionPayload(y)) => x == y,
        (BaseOptionalPayload(x), BaseOptionalPayload(y)) => x == y,
        (HardCodedAddr(x), HardCodedAddr(y)) => x == y,
        (Function(x), Function(y)) => x == y,
        (Null, Null) | (Discard, Discard) => true,
        _ => false,
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.special.hash(state);
        if self.special != ValueSpecial::Static {
            return;
        }
        match &self.data {
            ValueData::None => {}
            ValueData::BigInt(v) | ValueData::EnumTag(v) => v.hash(state),
            ValueData::Float(v) => v.as_f64().to_bits().hash(state),
            ValueData::Bool(v) => v.hash(state),
            ValueData::Type(ty) => ty.hash(state),
            ValueData::FnRef(f) => f.hash(state),
            ValueData::ErrCode(code) => code.hash(state),
            ValueData::EnumLiteral(sym) => sym.hash(state),
            ValueData::ArgTuple { start, end } => {
                start.hash(state);
                end.hash(state);
            }
            ValueData::Struct(fields) => fields.hash(state),
            ValueData::Optional(inner) => inner.hash(state),
            ValueData::Union { tag, payload } => {
                tag.hash(state);
                payload.hash(state);
            }
            ValueData::ErrorUnion(ErrorUnionValue::Code(code)) => code.hash(state),
            ValueData::ErrorUnion(ErrorUnionValue::Payload(v)) => v.hash(state),
            ValueData::Array(ArrayValue::Undef) => {}
            ValueData::Array(ArrayValue::Buf(buf)) => buf.hash(state),
            ValueData::Array(ArrayValue::Elems(elems)) => elems.hash(state),
            ValueData::Ptr(ptr) => hash_ptr(ptr, state),
            ValueData::Lazy(_) => {}
        }
    }
}

fn hash_ptr<H: Hasher>(ptr: &PtrValue, state: &mut H) {
    ptr.mutability.hash(state);
    match &ptr.special {
        PtrValSpecial::Ref(v) => v.hash(state),
        PtrValSpecial::BaseArray {
            array, elem_index, ..
        } => {
            array.hash(state);
            elem_index.hash(state);
        }
        PtrValSpecial::BaseStruct { agg, field_index } => {
            agg.hash(state);
            field_index.hash(state);
        }
        PtrValSpecial::BaseErrorUnionCode(v)
        | PtrValSpecial::BaseErrorUnionPayload(v)
        | PtrValSpecial::BaseOptionalPayload(v) => v.hash(state),
        PtrValSpecial::HardCodedAddr(addr) => addr.hash(state),
        PtrValSpecial::Function(f) => f.hash(state),
        PtrValSpecial::Null => 0u8.hash(state),
        PtrValSpecial::Discard => 1u8.hash(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::target::Target;

    fn arena() -> TypeArena {
        TypeArena::new(Target::x86_64())
    }

    #[test]
    fn is_cstr_does_not_affect_equality() {
        let arena = arena();
        let u8_ty = arena.primitives.u8;
        let array = Value::static_(u8_ty, ValueData::Array(ArrayValue::Buf(b"hi".to_vec())));
        let make = |is_cstr| {
            Value::static_(
                u8_ty,
                ValueData::Ptr(PtrValue {
                    special: PtrValSpecial::BaseArray {
                        array: Box::new(array.clone()),
                        elem_index: 0,
                        is_cstr,
                    },
                    mutability: PtrMut::ComptimeConst,
                }),
            )
        };
        assert_eq!(make(true), make(false));
    }

    #[test]
    fn buf_and_elems_arrays_compare_equal() {
        let arena = arena();
        let u8_ty = arena.primitives.u8;
        let buf = ValueData::Array(ArrayValue::Buf(vec![1, 2]));
        let elems = ValueData::Array(ArrayValue::Elems(vec![
            Value::int(u8_ty, 1),
            Value::int(u8_ty, 2),
        ]));
        assert_eq!(
            Value::static_(u8_ty, buf),
            Value::static_(u8_ty, elems)
        );
    }

    #[test]
    fn undef_expands_to_per_element_undef() {
        let mut arena = arena();
        let u8_ty = arena.primitives.u8;
        let arr_ty = arena.get_array(u8_ty, 3);
        let mut v = Value::undef(arr_ty);
        v.expand_undef(&arena, &[]);
        match &v.data {
            ValueData::Array(ArrayValue::Elems(elems)) => {
                assert_eq!(elems.len(), 3);
                assert!(elems.iter().all(|e| e.special == ValueSpecial::Undef));
            }
            other => panic!("expected expanded array, got {other:?}"),
        }
    }

    #[test]
    fn runtime_values_never_compare_equal() {
        let arena = arena();
        let u8_ty = arena.primitives.u8;
        assert_ne!(Value::runtime(u8_ty), Value::runtime(u8_ty));
    }
}
