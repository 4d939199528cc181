// src/sema/func.rs
//
// Function registration and function-type construction: parameter legality,
// generic promotion, calling-convention ABI checks, the sret predicate, and
// inferred error sets. Body analysis itself is driven by the work queue and
// delegates the walk to ir.rs.

use std::path::PathBuf;

use smallvec::SmallVec;

use crate::errors::{SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{Block, CallConv, FnDecl, FnProto, NodeId};
use crate::frontend::intern::Symbol;
use crate::frontend::Span;
use crate::ir::{IrAlloca, IrAwait, IrCall, IrSuspend, IrTemp};
use crate::sema::analyzer::Analyzer;
use crate::sema::layout::{is_c_abi_int, type_allowed_in_extern};
use crate::sema::scope::ScopeId;
use crate::sema::type_arena::{ErrorSetInfo, FnTypeInfo, TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub u32);

impl FnId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Tri-state async determination, with the cause recorded once known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferredAsync {
    Unanalyzed,
    /// Inference in progress; reaching this again means a call cycle.
    Checking,
    NonAsync,
    Async {
        /// The suspension-causing node (suspend, await, async call, or the
        /// prototype for `callconv(.Async)`).
        cause_node: NodeId,
        cause_span: Span,
        /// Callee that made this function async, when the cause is a call.
        cause_fn: Option<FnId>,
    },
}

#[derive(Debug)]
pub struct FnInfo {
    pub name: String,
    pub name_sym: Option<Symbol>,
    pub proto: FnProto,
    pub body: Option<Block>,
    /// The decls scope the function was declared in.
    pub decl_scope: ScopeId,
    pub file: PathBuf,
    pub span: Span,
    pub fn_type: Option<TypeId>,
    pub is_generic: bool,
    pub is_extern: bool,
    /// Inferred error set for `!T` returns, completed after body analysis.
    pub inferred_error_set: Option<TypeId>,
    pub body_analyzed: bool,
    pub inferred_async: InferredAsync,
    /// Set when a call site had to assume non-async before this function's
    /// analysis completed; checked again on the second pass.
    pub assumed_non_async: bool,
    // Body records consumed by async inference.
    pub calls: Vec<IrCall>,
    pub awaits: Vec<IrAwait>,
    pub suspends: Vec<IrSuspend>,
    pub allocas: Vec<IrAlloca>,
    pub temps: Vec<IrTemp>,
    /// Error literals the body can return, for inferred-error-set completion.
    pub error_codes: Vec<crate::sema::type_arena::ErrorSetMember>,
    pub frame_type: Option<TypeId>,
    pub resolving_frame: bool,
    /// The cannot-be-async diagnostic was already emitted for this fn.
    pub async_cc_error: bool,
}

#[derive(Debug, Default)]
pub struct FnTable {
    fns: Vec<FnInfo>,
}

impl FnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, info: FnInfo) -> FnId {
        let id = FnId(self.fns.len() as u32);
        self.fns.push(info);
        id
    }

    pub fn get(&self, id: FnId) -> &FnInfo {
        &self.fns[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: FnId) -> &mut FnInfo {
        &mut self.fns[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FnId> {
        (0..self.fns.len() as u32).map(FnId)
    }
}

pub fn cc_name(cc: CallConv) -> &'static str {
    match cc {
        CallConv::Unspecified => "Unspecified",
        CallConv::C => "C",
        CallConv::Cold => "Cold",
        CallConv::Naked => "Naked",
        CallConv::Stdcall => "Stdcall",
        CallConv::Async => "Async",
    }
}

impl Analyzer {
    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a function declaration: build its type, create the table
    /// entry, and queue body analysis when there is a body to analyze.
    pub fn register_fn(&mut self, decl_scope: ScopeId, decl: &FnDecl) -> SemaResult<FnId> {
        let proto = &decl.proto;
        let file = self.scope_file(decl_scope);
        let name = proto
            .name
            .map(|sym| self.interner.resolve(sym).to_string())
            .unwrap_or_else(|| "(anonymous fn)".to_string());

        if decl.body.is_none() && !proto.is_extern {
            self.add_error(
                &file,
                proto.span,
                SemanticError::FnWithoutBody {
                    span: proto.span.into(),
                },
            );
            return Err(SemanticAnalyzeFail);
        }

        let fn_id = self.fns.push(FnInfo {
            name,
            name_sym: proto.name,
            proto: proto.clone(),
            body: decl.body.clone(),
            decl_scope,
            file,
            span: proto.span,
            fn_type: None,
            is_generic: false,
            is_extern: proto.is_extern,
            inferred_error_set: None,
            body_analyzed: false,
            inferred_async: InferredAsync::Unanalyzed,
            assumed_non_async: false,
            calls: Vec::new(),
            awaits: Vec::new(),
            suspends: Vec::new(),
            allocas: Vec::new(),
            temps: Vec::new(),
            error_codes: Vec::new(),
            frame_type: None,
            resolving_frame: false,
            async_cc_error: false,
        });

        let fn_type = self.build_fn_type(decl_scope, proto, Some(fn_id))?;
        let is_generic = match &self.types.get(fn_type).kind {
            TypeKind::Fn(info) => info.is_generic,
            _ => false,
        };
        {
            let info = self.fns.get_mut(fn_id);
            info.fn_type = Some(fn_type);
            info.is_generic = is_generic;
        }

        if let Some(export_name) = proto.export_name.clone() {
            let _ = self.add_export(&export_name, decl_scope, proto.span);
        }

        // Non-generic, non-extern functions get their bodies analyzed.
        if !is_generic && !proto.is_extern && decl.body.is_some() {
            self.enqueue_fn_body(fn_id);
        }
        Ok(fn_id)
    }

    /// A function type expression: a proto with no declaration attached.
    pub fn fn_proto_to_type(&mut self, scope: ScopeId, proto: &FnProto) -> SemaResult<TypeId> {
        self.build_fn_type(scope, proto, None)
    }

    // ========================================================================
    // Type construction
    // ========================================================================

    fn build_fn_type(
        &mut self,
        scope: ScopeId,
        proto: &FnProto,
        fn_id: Option<FnId>,
    ) -> SemaResult<TypeId> {
        let file = self.scope_file(scope);
        let mut is_generic = false;
        let mut param_types: SmallVec<[TypeId; 4]> = SmallVec::new();
        let mut noalias_bits: u32 = 0;

        for (i, param) in proto.params.iter().enumerate() {
            if param.is_noalias && i < 32 {
                noalias_bits |= 1 << i;
            }
            // `comptime` and `var`-typed parameters make the function
            // generic; the type slot becomes a placeholder.
            if param.is_comptime || param.type_expr.is_none() {
                is_generic = true;
                param_types.push(self.types.primitives.undefined);
                continue;
            }
            let type_expr = param.type_expr.as_ref().unwrap();
            let param_ty = self.eval_type_expr(scope, type_expr)?;
            match self.types.get(param_ty).kind {
                TypeKind::Opaque { .. }
                | TypeKind::Undefined
                | TypeKind::Null
                | TypeKind::ArgTuple
                | TypeKind::Unreachable => {
                    let ty_name = self.types.name(param_ty).to_string();
                    self.add_error(
                        &file,
                        param.span,
                        SemanticError::ParamTypeNotAllowed {
                            ty: ty_name,
                            span: param.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
                _ => {}
            }
            if self.type_requires_comptime(param_ty)? {
                let ty_name = self.types.name(param_ty).to_string();
                self.add_error(
                    &file,
                    param.span,
                    SemanticError::ParamRequiresComptime {
                        ty: ty_name,
                        span: param.span.into(),
                    },
                );
                return Err(SemanticAnalyzeFail);
            }
            // Foreign calling conventions can only pass types C knows.
            if !matches!(proto.cc, CallConv::Unspecified | CallConv::Async) {
                self.ensure_type_layout(param_ty)?;
                let allowed = type_allowed_in_extern(&self.types, &self.containers, param_ty)
                    && self.types.get(param_ty).has_bits();
                if !allowed {
                    let ty_name = self.types.name(param_ty).to_string();
                    self.add_error(
                        &file,
                        param.span,
                        SemanticError::ParamNotExternCompatible {
                            ty: ty_name,
                            cc: cc_name(proto.cc),
                            span: param.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            }
            param_types.push(param_ty);
        }

        if proto.is_var_args && proto.cc != CallConv::C && !is_generic {
            self.add_error(
                &file,
                proto.span,
                SemanticError::VarArgsNotAllowed {
                    span: proto.span.into(),
                },
            );
            return Err(SemanticAnalyzeFail);
        }

        let return_type = self.analyze_return_type(scope, proto, fn_id, &file)?;
        if self.type_requires_comptime(return_type)? {
            is_generic = true;
        }

        let alignment = match &proto.align_expr {
            Some(expr) => self.eval_align_expr(scope, expr)?,
            None => 0,
        };

        Ok(self.types.get_fn_type(FnTypeInfo {
            cc: proto.cc,
            return_type,
            param_types,
            noalias_bits,
            alignment,
            is_var_args: proto.is_var_args,
            is_generic,
            bound_fn_parent: None,
        }))
    }

    fn analyze_return_type(
        &mut self,
        scope: ScopeId,
        proto: &FnProto,
        fn_id: Option<FnId>,
        file: &std::path::Path,
    ) -> SemaResult<TypeId> {
        use crate::frontend::ast::ExprKind;
        // `!T`: synthesize an inferred error set bound to this function.
        if let ExprKind::ErrorUnionType {
            err_set: None,
            payload,
        } = &proto.return_type.kind
        {
            let fn_id = match fn_id {
                Some(id) => id,
                None => {
                    self.add_error(
                        file,
                        proto.return_type.span,
                        SemanticError::ExpectedType {
                            found: "inferred error set outside function declaration".to_string(),
                            span: proto.return_type.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            };
            let payload_ty = self.eval_type_expr(scope, payload)?;
            let set_name = format!("@typeInfo(@TypeOf({})).ErrorSet", self.fns.get(fn_id).name);
            let err_set = self.types.make_error_set(
                set_name,
                ErrorSetInfo {
                    err_count: 0,
                    errors: Vec::new(),
                    infer_fn: Some(fn_id),
                    incomplete: true,
                },
            );
            self.fns.get_mut(fn_id).inferred_error_set = Some(err_set);
            return Ok(self.types.get_error_union(err_set, payload_ty));
        }

        let ret = self.eval_type_expr(scope, &proto.return_type)?;
        if let TypeKind::Opaque { decl_span } = self.types.get(ret).kind {
            self.add_error(
                file,
                proto.return_type.span,
                SemanticError::OpaqueReturnType {
                    span: proto.return_type.span.into(),
                    declared: decl_span.into(),
                },
            );
            return Err(SemanticAnalyzeFail);
        }
        Ok(ret)
    }

    /// Whether calls return through an out-parameter pointer.
    pub fn fn_returns_via_pointer(&mut self, fn_type: TypeId) -> SemaResult<bool> {
        let (cc, ret) = match &self.types.get(fn_type).kind {
            TypeKind::Fn(info) => (info.cc, info.return_type),
            _ => return Ok(false),
        };
        match cc {
            CallConv::Unspecified => {
                // By-value aggregates come back through memory.
                self.ensure_type_layout(ret)?;
                let aggregate = matches!(
                    self.types.get(ret).kind,
                    TypeKind::Struct { .. }
                        | TypeKind::Union { .. }
                        | TypeKind::Array { .. }
                        | TypeKind::ErrorUnion { .. }
                        | TypeKind::Optional { .. }
                );
                Ok(aggregate && self.types.get(ret).has_bits())
            }
            CallConv::C => {
                if is_c_abi_int(&self.types, ret) {
                    return Ok(false);
                }
                // x86-64 SysV memory class: aggregates beyond two eightbytes.
                self.ensure_type_layout(ret)?;
                Ok(self.type_abi_size(ret)? > 16)
            }
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Body analysis
    // ========================================================================

    /// Run the body walk for one function: scope construction, IR records,
    /// then completion of the inferred error set.
    pub fn analyze_fn_body(&mut self, fn_id: FnId) -> SemaResult<()> {
        if self.fns.get(fn_id).body_analyzed {
            return Ok(());
        }
        tracing::debug!(name = %self.fns.get(fn_id).name, "analyze_fn_body");
        self.build_body_ir(fn_id)?;
        self.fns.get_mut(fn_id).body_analyzed = true;
        self.complete_inferred_error_set(fn_id)?;
        Ok(())
    }

    /// An inferred error set is completed from the union of errors the body
    /// can produce: error literals plus the error sets of direct callees.
    fn complete_inferred_error_set(&mut self, fn_id: FnId) -> SemaResult<()> {
        let err_set_ty = match self.fns.get(fn_id).inferred_error_set {
            Some(ty) => ty,
            None => return Ok(()),
        };
        let mut members = self.fns.get(fn_id).error_codes.clone();
        let callees: Vec<FnId> = self
            .fns
            .get(fn_id)
            .calls
            .iter()
            .filter_map(|call| call.callee.as_fn())
            .collect();
        for callee in callees {
            let callee_set = match self.fns.get(callee).inferred_error_set {
                Some(set) if set != err_set_ty => set,
                _ => continue,
            };
            if let TypeKind::ErrorSet(info) = &self.types.get(callee_set).kind {
                members.extend(info.errors.iter().cloned());
            }
        }
        members.sort_by_key(|m| m.code.0);
        members.dedup_by_key(|m| m.code.0);

        if let TypeKind::ErrorSet(info) = &mut self.types.get_mut(err_set_ty).kind {
            info.err_count = members.len() as u32;
            info.errors = members;
            info.incomplete = false;
        }
        Ok(())
    }
}
