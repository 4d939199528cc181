// src/sema/lazy.rs
//
// Deferred type-producing expressions. A lazy value holds the AST fragment
// and the scope to evaluate it in; the queries below answer what resolution
// needs to know without forcing, so that a container's zero-bits pass never
// walks into a pointer's pointee.

use crate::errors::{SemaResult, SemanticAnalyzeFail};
use crate::frontend::ast::{Expr, ExprKind, FnProto};
use crate::sema::analyzer::Analyzer;
use crate::sema::scope::ScopeId;
use crate::sema::type_arena::{TypeId, TypeKind};
use crate::sema::value::{Value, ValueData, ValueSpecial};

/// An unevaluated producer of a type (or of a size/alignment integer).
#[derive(Debug, Clone)]
pub enum LazyValue {
    PtrType { scope: ScopeId, node: Expr },
    SliceType { scope: ScopeId, node: Expr },
    OptType { scope: ScopeId, node: Expr },
    ErrUnionType { scope: ScopeId, node: Expr },
    FnType { scope: ScopeId, proto: FnProto },
    AlignOf { scope: ScopeId, node: Expr },
    SizeOf { scope: ScopeId, node: Expr },
}

impl LazyValue {
    /// The child type expression a pointer-ish producer would dereference,
    /// if the producer has one.
    fn child_expr(&self) -> Option<(&ScopeId, &Expr)> {
        match self {
            LazyValue::PtrType { scope, node } => match &node.kind {
                ExprKind::PtrType { child, .. } => Some((scope, child)),
                _ => None,
            },
            LazyValue::SliceType { scope, node } => match &node.kind {
                ExprKind::SliceType { child, .. } => Some((scope, child)),
                _ => None,
            },
            LazyValue::OptType { scope, node } => match &node.kind {
                ExprKind::OptionalType(child) => Some((scope, child)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Analyzer {
    // ========================================================================
    // Non-forcing queries over type values
    // ========================================================================

    /// Whether the type a value names occupies zero bits. Lazy pointers
    /// answer false without touching the pointee.
    pub fn value_is_zero_bits(&mut self, val: &Value) -> SemaResult<bool> {
        match val.as_lazy() {
            Some(LazyValue::PtrType { .. })
            | Some(LazyValue::SliceType { .. })
            | Some(LazyValue::FnType { .. }) => Ok(false),
            Some(_) => {
                let ty = self.force_type_value(val.clone())?;
                self.type_is_zero_bits(ty)
            }
            None => {
                let ty = self.expect_type_payload(val)?;
                self.type_is_zero_bits(ty)
            }
        }
    }

    /// True only for a fully resolved opaque type; a lazy producer never is.
    pub fn value_is_opaque_type(&mut self, val: &Value) -> SemaResult<bool> {
        match val.as_lazy() {
            Some(_) => Ok(false),
            None => {
                let ty = self.expect_type_payload(val)?;
                Ok(matches!(self.types.get(ty).kind, TypeKind::Opaque { .. }))
            }
        }
    }

    /// Whether values of the named type exist only at compile time.
    /// Recurses through lazy producers without building the type.
    pub fn value_requires_comptime(&mut self, val: &Value) -> SemaResult<bool> {
        match val.as_lazy().cloned() {
            Some(producer @ (LazyValue::PtrType { .. }
            | LazyValue::SliceType { .. }
            | LazyValue::OptType { .. })) => {
                let (scope, child) = match producer.child_expr() {
                    Some((s, c)) => (*s, c.clone()),
                    None => return Ok(false),
                };
                let child_val = self.eval_type_expr_lazy(scope, &child)?;
                self.value_requires_comptime(&child_val)
            }
            Some(LazyValue::FnType { scope, proto }) => {
                let ret = self.eval_type_expr_lazy(scope, &proto.return_type)?;
                if self.value_requires_comptime(&ret)? {
                    return Ok(true);
                }
                for param in &proto.params {
                    if param.is_comptime {
                        return Ok(true);
                    }
                    let ty_expr = match &param.type_expr {
                        Some(expr) => expr,
                        None => return Ok(true),
                    };
                    let param_val = self.eval_type_expr_lazy(scope, ty_expr)?;
                    if self.value_requires_comptime(&param_val)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Some(LazyValue::ErrUnionType { scope, node }) => match node.kind.clone() {
                ExprKind::ErrorUnionType { payload, .. } => {
                    let payload_val = self.eval_type_expr_lazy(scope, &payload)?;
                    self.value_requires_comptime(&payload_val)
                }
                _ => Ok(false),
            },
            Some(_) => Ok(false),
            None => {
                let ty = self.expect_type_payload(val)?;
                self.type_requires_comptime(ty)
            }
        }
    }

    /// ABI size of the named type. Pointer-shaped producers answer in
    /// pointer units without forcing; optionals and error unions force.
    pub fn value_abi_size(&mut self, val: &Value) -> SemaResult<u64> {
        let ptr_bytes = self.target.ptr_bytes;
        match val.as_lazy() {
            Some(LazyValue::PtrType { .. }) | Some(LazyValue::FnType { .. }) => Ok(ptr_bytes),
            // A lazy slice never degrades: the element pointer is itself
            // lazy, and a lazy pointer is never zero-bit.
            Some(LazyValue::SliceType { .. }) => Ok(2 * ptr_bytes),
            Some(_) => {
                let ty = self.force_type_value(val.clone())?;
                self.type_abi_size(ty)
            }
            None => {
                let ty = self.expect_type_payload(val)?;
                self.type_abi_size(ty)
            }
        }
    }

    /// ABI alignment of the named type. Optionals delegate to the payload;
    /// error unions take the max of payload and error-code alignment.
    pub fn value_abi_align(&mut self, val: &Value) -> SemaResult<u32> {
        let ptr_align = self.target.ptr_align();
        match val.as_lazy().cloned() {
            Some(LazyValue::PtrType { .. })
            | Some(LazyValue::SliceType { .. })
            | Some(LazyValue::FnType { .. }) => Ok(ptr_align),
            Some(producer @ LazyValue::OptType { .. }) => {
                let (scope, child) = match producer.child_expr() {
                    Some((s, c)) => (*s, c.clone()),
                    None => return Ok(1),
                };
                let child_val = self.eval_type_expr_lazy(scope, &child)?;
                self.value_abi_align(&child_val)
            }
            Some(LazyValue::ErrUnionType { scope, node }) => match node.kind.clone() {
                ExprKind::ErrorUnionType { payload, .. } => {
                    let payload_val = self.eval_type_expr_lazy(scope, &payload)?;
                    let payload_align = self.value_abi_align(&payload_val)?;
                    let err_align = self
                        .types
                        .get(self.types.primitives.anyerror)
                        .abi_align
                        .unwrap_or(2);
                    Ok(payload_align.max(err_align))
                }
                _ => Err(SemanticAnalyzeFail),
            },
            Some(_) => {
                let ty = self.force_type_value(val.clone())?;
                self.type_abi_align(ty)
            }
            None => {
                let ty = self.expect_type_payload(val)?;
                self.type_abi_align(ty)
            }
        }
    }

    // ========================================================================
    // Forcing
    // ========================================================================

    /// Run a lazy producer to completion, yielding the concrete type.
    /// Static type values pass through.
    pub fn force_type_value(&mut self, val: Value) -> SemaResult<TypeId> {
        let producer = match val.as_lazy() {
            None => return self.expect_type_payload(&val),
            Some(producer) => producer.clone(),
        };
        match producer {
            LazyValue::PtrType { scope, node }
            | LazyValue::SliceType { scope, node }
            | LazyValue::OptType { scope, node }
            | LazyValue::ErrUnionType { scope, node } => self.eval_type_expr(scope, &node),
            LazyValue::FnType { scope, proto } => self.fn_proto_to_type(scope, &proto),
            LazyValue::AlignOf { .. } | LazyValue::SizeOf { .. } => {
                // Not a type producer; forcing yields an integer.
                debug_assert!(false, "force_type_value on an integer producer");
                Err(SemanticAnalyzeFail)
            }
        }
    }

    /// Force any lazy value to its static form.
    pub fn force_value(&mut self, val: Value) -> SemaResult<Value> {
        if val.special != ValueSpecial::Lazy {
            return Ok(val);
        }
        let metatype = self.types.primitives.metatype;
        let usize_ty = self.types.primitives.usize;
        match val.as_lazy().cloned() {
            Some(LazyValue::SizeOf { scope, node }) => {
                let ty = self.eval_type_expr(scope, &node)?;
                let size = self.type_abi_size(ty)?;
                Ok(Value::int(usize_ty, size))
            }
            Some(LazyValue::AlignOf { scope, node }) => {
                let ty = self.eval_type_expr(scope, &node)?;
                let align = self.type_abi_align(ty)?;
                Ok(Value::int(usize_ty, align))
            }
            Some(_) => {
                let ty = self.force_type_value(val)?;
                Ok(Value::of_type(metatype, ty))
            }
            None => Ok(val),
        }
    }

    fn expect_type_payload(&mut self, val: &Value) -> SemaResult<TypeId> {
        match &val.data {
            ValueData::Type(ty) => Ok(*ty),
            _ => Err(SemanticAnalyzeFail),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::frontend::ast::{ContainerDecl, ContainerKind, ContainerLayout, PtrLen};
    use crate::frontend::Span;
    use crate::sema::analyzer::Analyzer;
    use crate::sema::import::PackageId;
    use crate::sema::target::Target;
    use crate::sema::value::ValueSpecial;

    use super::*;
    use crate::frontend::ast::NodeId;

    fn analyzer_with_scope() -> (Analyzer, crate::sema::scope::ScopeId) {
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

    fn ptr_type_expr(az: &mut Analyzer) -> Expr {
        let sym = az.interner.intern("u32");
        let child = Expr {
            id: NodeId(10),
            span: Span::new(0, 3),
            kind: ExprKind::Ident(sym),
        };
        Expr {
            id: NodeId(11),
            span: Span::new(0, 4),
            kind: ExprKind::PtrType {
                child: Box::new(child),
                ptr_len: PtrLen::Single,
                is_const: false,
                is_volatile: false,
                allow_zero: false,
                align: None,
                host: None,
            },
        }
    }

    #[test]
    fn lazy_pointer_answers_queries_without_forcing() {
        let (mut az, scope) = analyzer_with_scope();
        let expr = ptr_type_expr(&mut az);
        let val = az.eval_type_expr_lazy(scope, &expr).unwrap();
        assert_eq!(val.special, ValueSpecial::Lazy);

        assert_eq!(az.value_is_zero_bits(&val), Ok(false));
        assert_eq!(az.value_is_opaque_type(&val), Ok(false));
        assert_eq!(az.value_abi_size(&val), Ok(8));
        assert_eq!(az.value_abi_align(&val), Ok(8));
        assert_eq!(az.value_requires_comptime(&val), Ok(false));
    }

    #[test]
    fn forcing_a_lazy_pointer_yields_the_concrete_type() {
        let (mut az, scope) = analyzer_with_scope();
        let expr = ptr_type_expr(&mut az);
        let val = az.eval_type_expr_lazy(scope, &expr).unwrap();
        let ty = az.force_type_value(val).unwrap();
        assert_eq!(az.types.name(ty), "*u32");
        // Forcing again through the eager path lands on the same entry.
        assert_eq!(az.eval_type_expr(scope, &expr), Ok(ty));
    }

    #[test]
    fn force_value_resolves_size_of_producers() {
        let (mut az, scope) = analyzer_with_scope();
        let sym = az.interner.intern("u32");
        let operand = Expr {
            id: NodeId(20),
            span: Span::new(0, 3),
            kind: ExprKind::Ident(sym),
        };
        let metatype = az.types.primitives.metatype;
        let lazy = Value::lazy(
            metatype,
            LazyValue::SizeOf {
                scope,
                node: operand,
            },
        );
        let forced = az.force_value(lazy).unwrap();
        assert_eq!(forced.as_u64(), Some(4));
    }
}
