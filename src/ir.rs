// src/ir.rs
//
// The IR-layer boundary. Full instruction selection lives in a sibling
// crate; semantic analysis consumes only the records below: stack slot
// requests, calls, awaits, suspension points, and the temporaries that may
// need to be spilled into an async frame. `build_body_ir` is the thin walk
// that lowers a function body into these records while building the scope
// tree body analysis and spill analysis share.

use crate::errors::{SemaResult, SemanticError};
use crate::frontend::ast::{
    Block, CallModifier, Expr, ExprKind, NodeId, Stmt, StmtKind,
};
use crate::frontend::Span;
use crate::sema::analyzer::Analyzer;
use crate::sema::func::FnId;
use crate::sema::scope::{NameRef, ScopeId, ScopeKind, TldKind};
use crate::sema::type_arena::{TypeId, TypeKind};

/// A call target: either a compile-time-known function or a runtime pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalleeRef {
    Fn(FnId),
    Ptr,
}

impl CalleeRef {
    pub fn as_fn(self) -> Option<FnId> {
        match self {
            CalleeRef::Fn(id) => Some(id),
            CalleeRef::Ptr => None,
        }
    }
}

/// A stack slot request (`AllocaGen` at the IR layer).
#[derive(Debug, Clone)]
pub struct IrAlloca {
    pub name_hint: String,
    pub ty: TypeId,
    pub align: u32,
    pub ref_count: u32,
    pub node: NodeId,
    pub span: Span,
    pub scope: ScopeId,
}

/// A call site (`CallGen`).
#[derive(Debug, Clone)]
pub struct IrCall {
    pub callee: CalleeRef,
    pub modifier: CallModifier,
    /// `@asyncCall` with an explicit stack; exempt from the shared frame
    /// slot.
    pub new_stack: bool,
    pub node: NodeId,
    pub span: Span,
    pub scope: ScopeId,
}

/// An await site (`AwaitGen`).
#[derive(Debug, Clone)]
pub struct IrAwait {
    pub target_fn: Option<FnId>,
    pub node: NodeId,
    pub span: Span,
    pub scope: ScopeId,
}

/// A `suspend` statement.
#[derive(Debug, Clone)]
pub struct IrSuspend {
    pub node: NodeId,
    pub span: Span,
    pub scope: ScopeId,
}

/// An intermediate value that may have to survive a suspension. Records
/// whose instruction already provides storage (alloca, var pointer, decl
/// ref, await result) are excluded from spill synthesis.
#[derive(Debug, Clone)]
pub struct IrTemp {
    pub ty: TypeId,
    pub node: NodeId,
    pub span: Span,
    pub scope: ScopeId,
    pub has_own_storage: bool,
}

impl Analyzer {
    /// Lower a function body into IR boundary records, building the scope
    /// tree as we go. Populates the function's call/await/suspend/alloca/
    /// temp lists.
    pub fn build_body_ir(&mut self, fn_id: FnId) -> SemaResult<()> {
        let body = match self.fns.get(fn_id).body.clone() {
            Some(body) => body,
            None => return Ok(()),
        };
        let decl_scope = self.fns.get(fn_id).decl_scope;
        let fn_scope = self.scopes.alloc(Some(decl_scope), ScopeKind::FnDef { fn_id });
        self.walk_block(fn_id, fn_scope, &body)
    }

    fn walk_block(&mut self, fn_id: FnId, parent: ScopeId, block: &Block) -> SemaResult<()> {
        let mut scope = self
            .scopes
            .alloc(Some(parent), ScopeKind::Block { node: block.id });
        for stmt in &block.stmts {
            scope = self.walk_stmt(fn_id, scope, stmt)?;
        }
        Ok(())
    }

    /// Returns the scope subsequent statements live in (local declarations
    /// extend the chain).
    fn walk_stmt(&mut self, fn_id: FnId, scope: ScopeId, stmt: &Stmt) -> SemaResult<ScopeId> {
        match &stmt.kind {
            StmtKind::Local(local) => {
                if let Err(err) = self.check_shadowing(scope, local.name, local.span) {
                    self.add_error_in_scope(scope, local.span, err);
                    return Ok(scope);
                }
                // The slot type comes from the annotation, or from a
                // comptime-known initializer shape.
                let ty = match &local.type_expr {
                    Some(type_expr) => Some(self.eval_type_expr(scope, type_expr)?),
                    None => match &local.init {
                        Some(init) => self.shallow_expr_type(scope, init)?,
                        None => None,
                    },
                };
                let ty = match ty {
                    Some(ty) => ty,
                    None => {
                        self.add_error_in_scope(
                            scope,
                            local.span,
                            SemanticError::UnableToInferVarType {
                                span: local.span.into(),
                            },
                        );
                        return Ok(scope);
                    }
                };
                if matches!(self.types.get(ty).kind, TypeKind::Unreachable) {
                    self.add_error_in_scope(
                        scope,
                        local.span,
                        SemanticError::UnreachableInit {
                            span: local.span.into(),
                        },
                    );
                    return Ok(scope);
                }
                if let Some(init) = &local.init {
                    self.walk_expr(fn_id, scope, init)?;
                }
                let align = match &local.align_expr {
                    Some(expr) => self.eval_align_expr(scope, expr)?,
                    None => {
                        self.ensure_type_layout(ty)?;
                        self.types.get(ty).abi_align.unwrap_or(1)
                    }
                };
                let name_hint = self.interner.resolve(local.name).to_string();
                let alloca = IrAlloca {
                    name_hint,
                    ty,
                    align,
                    ref_count: 1,
                    node: local.id,
                    span: local.span,
                    scope,
                };
                self.fns.get_mut(fn_id).allocas.push(alloca);
                // Extend the chain so later statements see the binding for
                // shadowing checks.
                Ok(self.scopes.alloc(
                    Some(scope),
                    ScopeKind::VarDecl {
                        name: local.name,
                        value: crate::sema::value::Value::runtime(ty),
                        span: local.span,
                    },
                ))
            }
            StmtKind::Expr(expr) => {
                let expr_scope = self
                    .scopes
                    .alloc(Some(scope), ScopeKind::Expr { node: expr.id });
                self.walk_expr(fn_id, expr_scope, expr)?;
                Ok(scope)
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    let expr_scope = self
                        .scopes
                        .alloc(Some(scope), ScopeKind::Expr { node: value.id });
                    self.walk_expr(fn_id, expr_scope, value)?;
                }
                Ok(scope)
            }
            StmtKind::Suspend(suspend_block) => {
                let suspend_scope = self
                    .scopes
                    .alloc(Some(scope), ScopeKind::Suspend { node: stmt.id });
                let record = IrSuspend {
                    node: stmt.id,
                    span: stmt.span,
                    scope: suspend_scope,
                };
                self.fns.get_mut(fn_id).suspends.push(record);
                self.note_suspend_cause(fn_id, stmt.id, stmt.span);
                if let Some(inner) = suspend_block {
                    self.walk_block(fn_id, suspend_scope, inner)?;
                }
                Ok(scope)
            }
            StmtKind::Defer(inner) => {
                let defer_scope = self
                    .scopes
                    .alloc(Some(scope), ScopeKind::Defer { node: stmt.id });
                self.walk_block(fn_id, defer_scope, inner)?;
                Ok(scope)
            }
            StmtKind::Block(inner) => {
                self.walk_block(fn_id, scope, inner)?;
                Ok(scope)
            }
            StmtKind::While { cond, body } => {
                let loop_scope = self
                    .scopes
                    .alloc(Some(scope), ScopeKind::Loop { node: stmt.id });
                let cond_scope = self
                    .scopes
                    .alloc(Some(loop_scope), ScopeKind::Expr { node: cond.id });
                self.walk_expr(fn_id, cond_scope, cond)?;
                self.walk_block(fn_id, loop_scope, body)?;
                Ok(scope)
            }
        }
    }

    fn walk_expr(&mut self, fn_id: FnId, scope: ScopeId, expr: &Expr) -> SemaResult<()> {
        match &expr.kind {
            ExprKind::Call {
                callee,
                args,
                modifier,
                new_stack,
            } => {
                for arg in args {
                    self.walk_expr(fn_id, scope, arg)?;
                }
                if let Some(stack) = new_stack {
                    self.walk_expr(fn_id, scope, stack)?;
                }
                let resolved = self.resolve_callee(scope, callee);
                let record = IrCall {
                    callee: resolved,
                    modifier: *modifier,
                    new_stack: new_stack.is_some(),
                    node: expr.id,
                    span: expr.span,
                    scope,
                };
                self.fns.get_mut(fn_id).calls.push(record);
                // The call result is a temp without storage of its own.
                if let CalleeRef::Fn(callee_fn) = resolved {
                    if let Some(ret) = self.fn_return_type(callee_fn) {
                        let temp = IrTemp {
                            ty: ret,
                            node: expr.id,
                            span: expr.span,
                            scope,
                            has_own_storage: false,
                        };
                        self.fns.get_mut(fn_id).temps.push(temp);
                    }
                }
                Ok(())
            }
            ExprKind::Await(operand) => {
                self.walk_expr(fn_id, scope, operand)?;
                let target_fn = match &operand.kind {
                    ExprKind::Call { callee, .. } | ExprKind::FieldAccess { base: callee, .. } => {
                        self.resolve_callee(scope, callee).as_fn()
                    }
                    ExprKind::Ident(_) => self.resolve_callee(scope, operand).as_fn(),
                    _ => None,
                };
                let record = IrAwait {
                    target_fn,
                    node: expr.id,
                    span: expr.span,
                    scope,
                };
                self.fns.get_mut(fn_id).awaits.push(record);
                if let Some(target) = target_fn {
                    if let Some(ret) = self.fn_return_type(target) {
                        // AwaitGen provides its own result storage.
                        let temp = IrTemp {
                            ty: ret,
                            node: expr.id,
                            span: expr.span,
                            scope,
                            has_own_storage: true,
                        };
                        self.fns.get_mut(fn_id).temps.push(temp);
                    }
                }
                Ok(())
            }
            ExprKind::FrameAddr => {
                // `@frame()` makes the function async and counts as a
                // suspension-relevant site for spill analysis.
                self.note_suspend_cause(fn_id, expr.id, expr.span);
                let record = IrSuspend {
                    node: expr.id,
                    span: expr.span,
                    scope,
                };
                self.fns.get_mut(fn_id).suspends.push(record);
                Ok(())
            }
            ExprKind::ErrorLit(sym) => {
                let code = self.intern_error(*sym, expr.span);
                let member = crate::sema::type_arena::ErrorSetMember {
                    name: *sym,
                    code,
                    decl_span: expr.span,
                };
                self.fns.get_mut(fn_id).error_codes.push(member);
                Ok(())
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(fn_id, scope, operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.walk_expr(fn_id, scope, lhs)?;
                self.walk_expr(fn_id, scope, rhs)
            }
            ExprKind::If { cond, then, els } => {
                self.walk_expr(fn_id, scope, cond)?;
                self.walk_expr(fn_id, scope, then)?;
                if let Some(els) = els {
                    self.walk_expr(fn_id, scope, els)?;
                }
                Ok(())
            }
            ExprKind::FieldAccess { base, .. } => self.walk_expr(fn_id, scope, base),
            // Everything else is either a literal or a type expression with
            // no runtime control flow to record.
            _ => Ok(()),
        }
    }

    /// Resolve a callee expression to a compile-time-known function if the
    /// scope chain can name one; anything else is a runtime pointer.
    fn resolve_callee(&mut self, scope: ScopeId, callee: &Expr) -> CalleeRef {
        let sym = match &callee.kind {
            ExprKind::Ident(sym) => *sym,
            _ => return CalleeRef::Ptr,
        };
        match self.lookup_name(scope, sym) {
            Some(NameRef::Tld(tld)) => {
                if self.resolve_tld(tld).is_err() {
                    return CalleeRef::Ptr;
                }
                match &self.tlds.get(tld).kind {
                    TldKind::Fn { fn_id: Some(id), .. } => CalleeRef::Fn(*id),
                    _ => CalleeRef::Ptr,
                }
            }
            _ => CalleeRef::Ptr,
        }
    }

    fn fn_return_type(&self, fn_id: FnId) -> Option<TypeId> {
        let fn_type = self.fns.get(fn_id).fn_type?;
        match &self.types.get(fn_type).kind {
            TypeKind::Fn(info) => Some(info.return_type),
            _ => None,
        }
    }

    /// A shallow type for an unannotated local: enough for the alloca.
    fn shallow_expr_type(&mut self, scope: ScopeId, init: &Expr) -> SemaResult<Option<TypeId>> {
        match &init.kind {
            ExprKind::Call {
                callee, modifier, ..
            } => {
                let callee_fn = match self.resolve_callee(scope, callee) {
                    CalleeRef::Fn(id) => id,
                    CalleeRef::Ptr => return Ok(None),
                };
                let ret = self.fn_return_type(callee_fn);
                if *modifier == CallModifier::Async {
                    // `async f()` yields the frame, not the return value.
                    let name = self.fns.get(callee_fn).name.clone();
                    return Ok(Some(self.types.get_fn_frame(callee_fn, &name)));
                }
                Ok(ret)
            }
            ExprKind::IntLit(_) => Ok(Some(self.types.primitives.comptime_int)),
            ExprKind::BoolLit(_) => Ok(Some(self.types.primitives.bool_)),
            ExprKind::FloatLit(_) => Ok(Some(self.types.primitives.comptime_float)),
            _ => {
                // Fall back to comptime evaluation; local bindings resolve
                // to runtime values whose type is still known.
                let mut quota = crate::sema::comptime::DEFAULT_BRANCH_QUOTA;
                let value = self.eval_comptime_expr(scope, init, None, &mut quota)?;
                Ok(Some(value.ty))
            }
        }
    }

    /// Record the first direct suspension cause on the function.
    fn note_suspend_cause(&mut self, fn_id: FnId, node: NodeId, span: Span) {
        use crate::sema::func::InferredAsync;
        let info = self.fns.get_mut(fn_id);
        if matches!(
            info.inferred_async,
            InferredAsync::Unanalyzed | InferredAsync::Checking
        ) {
            info.inferred_async = InferredAsync::Async {
                cause_node: node,
                cause_span: span,
                cause_fn: None,
            };
        }
    }
}
