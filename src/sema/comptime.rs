// src/sema/comptime.rs
//
// The compile-time expression interpreter. Evaluation receives a scope, a
// node, an optional expected type, and a backward-branch quota; it either
// returns a value or emits a diagnostic and fails. Only the expression
// forms that can influence types and layouts are interpreted here; full
// function-body evaluation belongs to the IR layer.

use num_traits::{Signed, ToPrimitive, Zero};

use crate::errors::{SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{
    BinaryOp, Block, Expr, ExprKind, PtrLen, StmtKind, UnaryOp,
};
use crate::sema::analyzer::Analyzer;
use crate::sema::layout::vector_elem_allowed;
use crate::sema::lazy::LazyValue;
use crate::sema::scope::{NameRef, ScopeId, ScopeKind};
use crate::sema::type_arena::{PtrInfo, TypeId, TypeKind};
use crate::sema::value::{Value, ValueData};

/// Backward branches allowed per evaluation before giving up.
pub const DEFAULT_BRANCH_QUOTA: u32 = 1000;

/// Whether a name follows the open-ended integer type pattern. The fixed
/// primitive names are reserved symbols in the interner instead; see
/// `frontend::intern::RESERVED_TYPE_NAMES`.
pub fn is_int_type_name(name: &str) -> bool {
    parse_int_type_name(name).is_some()
}

/// `u32` -> (false, 32); `i7` -> (true, 7).
fn parse_int_type_name(name: &str) -> Option<(bool, u16)> {
    let (signed, digits) = match name.as_bytes() {
        [b'u', rest @ ..] if !rest.is_empty() => (false, rest),
        [b'i', rest @ ..] if !rest.is_empty() => (true, rest),
        _ => return None,
    };
    if digits.iter().any(|b| !b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(digits)
        .ok()?
        .parse::<u16>()
        .ok()
        .map(|bits| (signed, bits))
}

impl Analyzer {
    pub fn primitive_type(&mut self, name: &str) -> Option<TypeId> {
        let p = self.types.primitives;
        Some(match name {
            "void" => p.void,
            "bool" => p.bool_,
            "noreturn" => p.unreachable_,
            "type" => p.metatype,
            "anyerror" => p.anyerror,
            "anyframe" => p.anyframe_erased,
            "comptime_int" => p.comptime_int,
            "comptime_float" => p.comptime_float,
            "usize" => p.usize,
            "isize" => {
                let bits = self.target.ptr_bits() as u16;
                self.types.int_type(true, bits)
            }
            "c_int" => p.c_int,
            "f16" => p.f16,
            "f32" => p.f32,
            "f64" => p.f64,
            "f128" => p.f128,
            _ => {
                let (signed, bits) = parse_int_type_name(name)?;
                self.types.int_type(signed, bits)
            }
        })
    }

    // ========================================================================
    // Type expressions
    // ========================================================================

    /// Evaluate a type expression to a concrete type.
    pub fn eval_type_expr(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<TypeId> {
        let mut quota = DEFAULT_BRANCH_QUOTA;
        let metatype = self.types.primitives.metatype;
        let val = self.eval_comptime_expr(scope, expr, Some(metatype), &mut quota)?;
        self.value_to_type(scope, expr, val)
    }

    /// Evaluate a type expression, deferring the pointer-shaped forms so the
    /// pointee is never touched. The result is a metatype-typed value that
    /// may be lazy.
    pub fn eval_type_expr_lazy(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<Value> {
        let metatype = self.types.primitives.metatype;
        let producer = match &expr.kind {
            ExprKind::PtrType { .. } => LazyValue::PtrType {
                scope,
                node: expr.clone(),
            },
            ExprKind::SliceType { .. } => LazyValue::SliceType {
                scope,
                node: expr.clone(),
            },
            ExprKind::OptionalType(_) => LazyValue::OptType {
                scope,
                node: expr.clone(),
            },
            ExprKind::ErrorUnionType { .. } => LazyValue::ErrUnionType {
                scope,
                node: expr.clone(),
            },
            ExprKind::FnProto(proto) => LazyValue::FnType {
                scope,
                proto: (**proto).clone(),
            },
            _ => {
                let mut quota = DEFAULT_BRANCH_QUOTA;
                return self.eval_comptime_expr(scope, expr, Some(metatype), &mut quota);
            }
        };
        Ok(Value::lazy(metatype, producer))
    }

    /// Force a value into a type, diagnosing non-types.
    pub fn value_to_type(&mut self, scope: ScopeId, expr: &Expr, val: Value) -> SemaResult<TypeId> {
        match &val.data {
            ValueData::Type(ty) => Ok(*ty),
            ValueData::Lazy(_) => self.force_type_value(val),
            _ => {
                let rendered = val.render(&self.types, &self.interner);
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::ExpectedType {
                        found: rendered,
                        span: expr.span.into(),
                    },
                );
                Err(SemanticAnalyzeFail)
            }
        }
    }

    // ========================================================================
    // Expression evaluation
    // ========================================================================

    pub fn eval_comptime_expr(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        expected: Option<TypeId>,
        quota: &mut u32,
    ) -> SemaResult<Value> {
        let p = self.types.primitives;
        let val = match &expr.kind {
            ExprKind::IntLit(v) => {
                let ty = expected
                    .filter(|&t| self.types.is_int(t))
                    .unwrap_or(p.comptime_int);
                Value::int(ty, v.clone())
            }
            ExprKind::FloatLit(v) => Value::static_(
                p.comptime_float,
                ValueData::Float(crate::sema::value::FloatVal::Big(*v)),
            ),
            ExprKind::BoolLit(v) => Value::bool_(p.bool_, *v),
            ExprKind::StrLit(s) => {
                let u8_ty = p.u8;
                let arr = self.types.get_array(u8_ty, s.len() as u64);
                Value::static_(
                    arr,
                    ValueData::Array(crate::sema::value::ArrayValue::Buf(s.clone().into_bytes())),
                )
            }
            ExprKind::NullLit => Value::static_(p.null, ValueData::None),
            ExprKind::UndefLit => Value::undef(expected.unwrap_or(p.undefined)),
            ExprKind::EnumLit(sym) => Value::static_(p.enum_literal, ValueData::EnumLiteral(*sym)),
            ExprKind::ErrorLit(sym) => {
                let code = self.intern_error(*sym, expr.span);
                Value::static_(p.anyerror, ValueData::ErrCode(code))
            }
            ExprKind::Ident(sym) => self.eval_ident(scope, expr, *sym)?,
            ExprKind::FieldAccess { base, field } => {
                self.eval_field_access(scope, expr, base, *field, quota)?
            }
            ExprKind::Unary { op, operand } => {
                let inner = self.eval_comptime_expr(scope, operand, expected, quota)?;
                self.eval_unary(scope, expr, *op, inner)?
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.eval_binary(scope, expr, *op, lhs, rhs, expected, quota)?
            }
            ExprKind::If { cond, then, els } => {
                let cond_val = self.eval_comptime_expr(scope, cond, Some(p.bool_), quota)?;
                match cond_val.data {
                    ValueData::Bool(true) => self.eval_comptime_expr(scope, then, expected, quota)?,
                    ValueData::Bool(false) => match els {
                        Some(els) => self.eval_comptime_expr(scope, els, expected, quota)?,
                        None => Value::static_(p.void, ValueData::None),
                    },
                    _ => {
                        self.add_error_in_scope(
                            scope,
                            cond.span,
                            SemanticError::ExpectedComptimeValue {
                                span: cond.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                }
            }

            ExprKind::PtrType { .. } => {
                let ty = self.eval_ptr_type(scope, expr)?;
                Value::of_type(p.metatype, ty)
            }
            ExprKind::SliceType { .. } => {
                let ty = self.eval_slice_type(scope, expr)?;
                Value::of_type(p.metatype, ty)
            }
            ExprKind::ArrayType { len, child } => {
                let len_val =
                    self.eval_comptime_expr(scope, len, Some(p.usize), quota)?;
                let len_int = match len_val.as_bigint() {
                    Some(v) if !v.is_negative() => v.to_u64(),
                    _ => None,
                };
                let len_int = match len_int {
                    Some(v) => v,
                    None => {
                        let found = len_val.render(&self.types, &self.interner);
                        self.add_error_in_scope(
                            scope,
                            len.span,
                            SemanticError::InvalidArrayLength {
                                found,
                                span: len.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                };
                let child_ty = self.eval_type_expr(scope, child)?;
                self.ensure_type_layout(child_ty)?;
                Value::of_type(p.metatype, self.types.get_array(child_ty, len_int))
            }
            ExprKind::VectorType { len, elem } => {
                let len_val = self.eval_comptime_expr(scope, len, Some(p.usize), quota)?;
                let len_int = len_val.as_u64().unwrap_or(0) as u32;
                let elem_ty = self.eval_type_expr(scope, elem)?;
                if !vector_elem_allowed(&self.types, elem_ty) {
                    let found = self.types.name(elem_ty).to_string();
                    self.add_error_in_scope(
                        scope,
                        elem.span,
                        SemanticError::InvalidVectorElem {
                            found,
                            span: elem.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
                Value::of_type(p.metatype, self.types.get_vector(elem_ty, len_int))
            }
            ExprKind::OptionalType(child) => {
                let child_ty = self.eval_type_expr(scope, child)?;
                Value::of_type(p.metatype, self.types.get_optional(child_ty))
            }
            ExprKind::ErrorUnionType { err_set, payload } => {
                let err_ty = match err_set {
                    Some(err_expr) => {
                        let ty = self.eval_type_expr(scope, err_expr)?;
                        if !matches!(self.types.get(ty).kind, TypeKind::ErrorSet(_)) {
                            let found = self.types.name(ty).to_string();
                            self.add_error_in_scope(
                                scope,
                                err_expr.span,
                                SemanticError::ExpectedType {
                                    found,
                                    span: err_expr.span.into(),
                                },
                            );
                            return Err(SemanticAnalyzeFail);
                        }
                        ty
                    }
                    // Bare `!T` only means something as a function return
                    // type; elsewhere it has no error set to refer to.
                    None => {
                        self.add_error_in_scope(
                            scope,
                            expr.span,
                            SemanticError::ExpectedType {
                                found: "!T outside function return".to_string(),
                                span: expr.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                };
                let payload_ty = self.eval_type_expr(scope, payload)?;
                Value::of_type(p.metatype, self.types.get_error_union(err_ty, payload_ty))
            }
            ExprKind::ErrorSetDecl(fields) => {
                let ty = self.declare_error_set(scope, fields)?;
                Value::of_type(p.metatype, ty)
            }
            ExprKind::AnyFrameType { result } => {
                let result_ty = match result {
                    Some(expr) => Some(self.eval_type_expr(scope, expr)?),
                    None => None,
                };
                Value::of_type(p.metatype, self.types.get_any_frame(result_ty))
            }
            ExprKind::FrameType { fn_ref } => {
                let fn_val = self.eval_comptime_expr(scope, fn_ref, None, quota)?;
                let fn_id = match fn_val.data {
                    ValueData::FnRef(id) => id,
                    _ => {
                        self.add_error_in_scope(
                            scope,
                            fn_ref.span,
                            SemanticError::ExpectedComptimeValue {
                                span: fn_ref.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                };
                let name = self.fns.get(fn_id).name.clone();
                Value::of_type(p.metatype, self.types.get_fn_frame(fn_id, &name))
            }
            ExprKind::ContainerDecl(decl) => {
                let ty = self.add_container_from_decl(scope, decl, None)?;
                Value::of_type(p.metatype, ty)
            }
            ExprKind::FnProto(proto) => {
                let ty = self.fn_proto_to_type(scope, proto)?;
                Value::of_type(p.metatype, ty)
            }

            ExprKind::SizeOf(operand) => {
                let ty = self.eval_type_expr(scope, operand)?;
                let size = self.type_abi_size(ty)?;
                Value::int(p.usize, size)
            }
            ExprKind::AlignOf(operand) => {
                let ty = self.eval_type_expr(scope, operand)?;
                let align = self.type_abi_align(ty)?;
                Value::int(p.usize, align)
            }
            ExprKind::Import(target) => {
                let path = match &target.kind {
                    ExprKind::StrLit(s) => s.clone(),
                    _ => {
                        self.add_error_in_scope(
                            scope,
                            target.span,
                            SemanticError::ExpectedComptimeValue {
                                span: target.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                };
                let container_ty = self.analyze_import(scope, &path, expr.span)?;
                Value::of_type(p.metatype, container_ty)
            }

            ExprKind::Call { .. } | ExprKind::Await(_) | ExprKind::FrameAddr => {
                // Runtime-only constructs; body analysis handles them.
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::ExpectedComptimeValue {
                        span: expr.span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
        };
        Ok(self.coerce(val, expected))
    }

    /// Minimal implicit coercion: retype comptime ints/floats to the
    /// expected numeric type. Fit checks happen at the use site, which has
    /// the context for a good diagnostic.
    fn coerce(&mut self, mut val: Value, expected: Option<TypeId>) -> Value {
        let expected = match expected {
            Some(t) => t,
            None => return val,
        };
        let p = self.types.primitives;
        if val.ty == p.comptime_int && self.types.is_int(expected) {
            val.ty = expected;
        } else if val.ty == p.comptime_float
            && matches!(self.types.get(expected).kind, TypeKind::Float { .. })
        {
            val.ty = expected;
        }
        val
    }

    fn eval_ident(&mut self, scope: ScopeId, expr: &Expr, sym: crate::frontend::intern::Symbol) -> SemaResult<Value> {
        match self.lookup_name(scope, sym) {
            Some(NameRef::ScopeVar(var_scope)) => {
                match &self.scopes.get(var_scope).kind {
                    ScopeKind::VarDecl { value, .. } => Ok(value.clone()),
                    _ => unreachable!(),
                }
            }
            Some(NameRef::Tld(tld)) => {
                self.resolve_tld(tld)?;
                match self.tlds.get(tld).value.clone() {
                    Some(value) => Ok(value),
                    None => Err(SemanticAnalyzeFail),
                }
            }
            None => {
                let text = self.interner.resolve(sym).to_string();
                if let Some(ty) = self.primitive_type(&text) {
                    let metatype = self.types.primitives.metatype;
                    return Ok(Value::of_type(metatype, ty));
                }
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::UndeclaredIdentifier {
                        name: text,
                        span: expr.span.into(),
                    },
                );
                Err(SemanticAnalyzeFail)
            }
        }
    }

    fn eval_field_access(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        base: &Expr,
        field: crate::frontend::intern::Symbol,
        quota: &mut u32,
    ) -> SemaResult<Value> {
        let base_val = self.eval_comptime_expr(scope, base, None, quota)?;
        let base_ty = match base_val.as_type() {
            Some(ty) => ty,
            None => {
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::ExpectedComptimeValue {
                        span: expr.span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
        };
        // Namespace access into a container.
        if let Some(container) = self.types.is_container(base_ty) {
            let decls_scope = self.containers.get(container).decls_scope;
            if let Some(decls_scope) = decls_scope {
                if let Some(NameRef::Tld(tld)) = self.lookup_name(decls_scope, field) {
                    self.resolve_tld(tld)?;
                    if let Some(value) = self.tlds.get(tld).value.clone() {
                        return Ok(value);
                    }
                    return Err(SemanticAnalyzeFail);
                }
            }
        }
        // `ErrSet.Name` yields the error code.
        if let TypeKind::ErrorSet(info) = &self.types.get(base_ty).kind {
            if let Some(member) = info.errors.iter().find(|m| m.name == field) {
                let code = member.code;
                return Ok(Value::static_(base_ty, ValueData::ErrCode(code)));
            }
        }
        let text = self.interner.resolve(field).to_string();
        self.add_error_in_scope(
            scope,
            expr.span,
            SemanticError::UndeclaredIdentifier {
                name: text,
                span: expr.span.into(),
            },
        );
        Err(SemanticAnalyzeFail)
    }

    fn eval_unary(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        op: UnaryOp,
        inner: Value,
    ) -> SemaResult<Value> {
        let p = self.types.primitives;
        match (op, &inner.data) {
            (UnaryOp::Neg, ValueData::BigInt(v)) => Ok(Value::int(inner.ty, -v.clone())),
            (UnaryOp::BitNot, ValueData::BigInt(v)) => Ok(Value::int(inner.ty, !v.clone())),
            (UnaryOp::BoolNot, ValueData::Bool(v)) => Ok(Value::bool_(p.bool_, !v)),
            _ => {
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::ExpectedComptimeValue {
                        span: expr.span.into(),
                    },
                );
                Err(SemanticAnalyzeFail)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_binary(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        expected: Option<TypeId>,
        quota: &mut u32,
    ) -> SemaResult<Value> {
        let p = self.types.primitives;
        // Short-circuiting boolean operators first.
        if matches!(op, BinaryOp::BoolAnd | BinaryOp::BoolOr) {
            let l = self.eval_comptime_expr(scope, lhs, Some(p.bool_), quota)?;
            let l_bool = match l.data {
                ValueData::Bool(b) => b,
                _ => return self.non_comptime(scope, expr),
            };
            if (op == BinaryOp::BoolAnd && !l_bool) || (op == BinaryOp::BoolOr && l_bool) {
                return Ok(Value::bool_(p.bool_, l_bool));
            }
            let r = self.eval_comptime_expr(scope, rhs, Some(p.bool_), quota)?;
            return match r.data {
                ValueData::Bool(b) => Ok(Value::bool_(p.bool_, b)),
                _ => self.non_comptime(scope, expr),
            };
        }

        let l = self.eval_comptime_expr(scope, lhs, expected, quota)?;
        let r = self.eval_comptime_expr(scope, rhs, expected, quota)?;
        let (a, b) = match (l.as_bigint(), r.as_bigint()) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => return self.non_comptime(scope, expr),
        };
        let ty = if l.ty != p.comptime_int { l.ty } else { r.ty };
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div | BinaryOp::Rem => {
                if b.is_zero() {
                    self.add_error_in_scope(
                        scope,
                        rhs.span,
                        SemanticError::DivisionByZero {
                            span: rhs.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
                if op == BinaryOp::Div {
                    a / b
                } else {
                    a % b
                }
            }
            BinaryOp::Shl => {
                let shift = b.to_u64().unwrap_or(0);
                a << shift
            }
            BinaryOp::Shr => {
                let shift = b.to_u64().unwrap_or(0);
                a >> shift
            }
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Eq => return Ok(Value::bool_(p.bool_, a == b)),
            BinaryOp::Neq => return Ok(Value::bool_(p.bool_, a != b)),
            BinaryOp::Lt => return Ok(Value::bool_(p.bool_, a < b)),
            BinaryOp::Gt => return Ok(Value::bool_(p.bool_, a > b)),
            BinaryOp::Lte => return Ok(Value::bool_(p.bool_, a <= b)),
            BinaryOp::Gte => return Ok(Value::bool_(p.bool_, a >= b)),
            BinaryOp::BoolAnd | BinaryOp::BoolOr => unreachable!(),
        };
        Ok(Value::int(ty, result))
    }

    fn non_comptime(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<Value> {
        self.add_error_in_scope(
            scope,
            expr.span,
            SemanticError::ExpectedComptimeValue {
                span: expr.span.into(),
            },
        );
        Err(SemanticAnalyzeFail)
    }

    // ========================================================================
    // Pointer-shaped type expressions (the eager path)
    // ========================================================================

    pub(crate) fn eval_ptr_type(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<TypeId> {
        let (child, ptr_len, is_const, is_volatile, allow_zero, align, host) = match &expr.kind {
            ExprKind::PtrType {
                child,
                ptr_len,
                is_const,
                is_volatile,
                allow_zero,
                align,
                host,
            } => (child, *ptr_len, *is_const, *is_volatile, *allow_zero, align, *host),
            _ => unreachable!("eval_ptr_type on non-pointer expr"),
        };
        let child_ty = self.eval_type_expr(scope, child)?;
        let alignment = match align {
            Some(align_expr) => self.eval_align_expr(scope, align_expr)?,
            None => 0,
        };
        let (bit_offset_in_host, host_int_bytes) = host.unwrap_or((0, 0));
        Ok(self.types.get_pointer(PtrInfo {
            child: child_ty,
            is_const,
            is_volatile,
            ptr_len,
            alignment,
            bit_offset_in_host,
            host_int_bytes,
            allow_zero: allow_zero || ptr_len == PtrLen::C,
        }))
    }

    pub(crate) fn eval_slice_type(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<TypeId> {
        let (child, is_const, allow_zero, align) = match &expr.kind {
            ExprKind::SliceType {
                child,
                is_const,
                allow_zero,
                align,
            } => (child, *is_const, *allow_zero, align),
            _ => unreachable!("eval_slice_type on non-slice expr"),
        };
        let child_ty = self.eval_type_expr(scope, child)?;
        let alignment = match align {
            Some(align_expr) => self.eval_align_expr(scope, align_expr)?,
            None => 0,
        };
        let elem_ptr = self.types.get_pointer(PtrInfo {
            child: child_ty,
            is_const,
            is_volatile: false,
            ptr_len: PtrLen::Unknown,
            alignment,
            bit_offset_in_host: 0,
            host_int_bytes: 0,
            allow_zero,
        });
        self.get_slice_type(elem_ptr)
    }

    /// `align(N)`: N must be a positive power of two.
    pub(crate) fn eval_align_expr(&mut self, scope: ScopeId, expr: &Expr) -> SemaResult<u32> {
        let mut quota = DEFAULT_BRANCH_QUOTA;
        let u29 = self.types.int_type(false, 29);
        let val = self.eval_comptime_expr(scope, expr, Some(u29), &mut quota)?;
        let raw = val.as_u64();
        match raw {
            Some(v) if v > 0 && v.is_power_of_two() => Ok(v as u32),
            _ => {
                let rendered = val.render(&self.types, &self.interner);
                self.add_error_in_scope(
                    scope,
                    expr.span,
                    SemanticError::AlignNotPowerOfTwo {
                        value: rendered,
                        span: expr.span.into(),
                    },
                );
                Err(SemanticAnalyzeFail)
            }
        }
    }

    // ========================================================================
    // Comptime blocks
    // ========================================================================

    /// Execute a comptime block for effect. Local bindings extend the scope
    /// chain; `while` consumes the backward-branch quota.
    pub fn eval_comptime_block(
        &mut self,
        scope: ScopeId,
        block: &Block,
        quota: &mut u32,
    ) -> SemaResult<()> {
        let mut current = self
            .scopes
            .alloc(Some(scope), ScopeKind::Block { node: block.id });
        for stmt in &block.stmts {
            match &stmt.kind {
                StmtKind::Local(local) => {
                    let expected = match &local.type_expr {
                        Some(ty_expr) => Some(self.eval_type_expr(current, ty_expr)?),
                        None => None,
                    };
                    let init = match &local.init {
                        Some(init) => self.eval_comptime_expr(current, init, expected, quota)?,
                        None => {
                            self.add_error_in_scope(
                                current,
                                local.span,
                                SemanticError::UnableToInferVarType {
                                    span: local.span.into(),
                                },
                            );
                            return Err(SemanticAnalyzeFail);
                        }
                    };
                    current = self.scopes.alloc(
                        Some(current),
                        ScopeKind::VarDecl {
                            name: local.name,
                            value: init,
                            span: local.span,
                        },
                    );
                }
                StmtKind::Expr(expr) => {
                    self.eval_comptime_expr(current, expr, None, quota)?;
                }
                StmtKind::While { cond, body } => loop {
                    let cond_val =
                        self.eval_comptime_expr(current, cond, None, quota)?;
                    match cond_val.data {
                        ValueData::Bool(true) => {}
                        ValueData::Bool(false) => break,
                        _ => return Err(SemanticAnalyzeFail),
                    }
                    self.eval_comptime_block(current, body, quota)?;
                    if *quota == 0 {
                        self.add_error_in_scope(
                            current,
                            cond.span,
                            SemanticError::QuotaExceeded {
                                quota: DEFAULT_BRANCH_QUOTA,
                                span: cond.span.into(),
                            },
                        );
                        return Err(SemanticAnalyzeFail);
                    }
                    *quota -= 1;
                },
                StmtKind::Block(inner) => {
                    self.eval_comptime_block(current, inner, quota)?;
                }
                StmtKind::Return(_) | StmtKind::Suspend(_) | StmtKind::Defer(_) => {
                    // Runtime control flow has no meaning in a comptime
                    // block at the top level.
                    self.add_error_in_scope(
                        current,
                        stmt.span,
                        SemanticError::ExpectedComptimeValue {
                            span: stmt.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::intern::RESERVED_TYPE_NAMES;
    use crate::sema::target::Target;

    use super::*;

    #[test]
    fn reserved_names_all_resolve_to_primitives() {
        let mut az = Analyzer::new(Target::x86_64());
        for name in RESERVED_TYPE_NAMES {
            assert!(az.primitive_type(name).is_some(), "{name} must resolve");
        }
    }

    #[test]
    fn int_type_names_parse() {
        assert!(is_int_type_name("u8"));
        assert!(is_int_type_name("i7"));
        assert!(is_int_type_name("u65535"));
        assert!(!is_int_type_name("u"));
        assert!(!is_int_type_name("u8x"));
        assert!(!is_int_type_name("x32"));
        assert!(!is_int_type_name("usize"));
    }
}
