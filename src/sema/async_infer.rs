// src/sema/async_infer.rs
//
// Whole-program async inference. After both work queues drain, every
// analyzed function is classified as async or not by a fixpoint over the
// call graph; contradictions with earlier "assumed non-async" answers are
// caught by a second pass; finally each async function gets a frame struct
// capturing everything that must survive a suspension.

use rustc_hash::FxHashSet;

use crate::errors::{ErrorNote, SemaResult, SemanticAnalyzeFail, SemanticError};
use crate::frontend::ast::{CallConv, CallModifier, ContainerKind, ContainerLayout};
use crate::frontend::Span;
use crate::ir::{CalleeRef, IrTemp};
use crate::sema::analyzer::Analyzer;
use crate::sema::container::{
    ContainerSpecial, ContainerState, FieldInfo, GenField, ResolveStatus,
};
use crate::sema::func::{cc_name, FnId, InferredAsync};
use crate::sema::layout::align_forward;
use crate::sema::scope::ScopeId;
use crate::sema::type_arena::{PtrInfo, TypeId, TypeKind};

impl Analyzer {
    /// The whole-program pass: classify every function, re-check earlier
    /// non-async assumptions, then synthesize frames for the async ones.
    pub fn run_async_inference(&mut self) {
        let ids: Vec<FnId> = self.fns.ids().collect();
        for &fn_id in &ids {
            if let Ok(true) = self.determine_fn_async(fn_id) {
                let _ = self.check_async_cc(fn_id);
            }
        }
        // Second drain: a function assumed non-async at some call site that
        // turned out async cannot be fixed up retroactively.
        for &fn_id in &ids {
            let info = self.fns.get(fn_id);
            if info.assumed_non_async
                && matches!(info.inferred_async, InferredAsync::Async { .. })
            {
                let name = info.name.clone();
                let file = info.file.clone();
                let span = info.span;
                let notes = self.async_cause_notes(fn_id);
                self.add_error_with_notes(
                    &file,
                    span,
                    SemanticError::UnableToInferAsync {
                        name,
                        span: span.into(),
                    },
                    notes,
                );
            }
        }
        for &fn_id in &ids {
            let info = self.fns.get(fn_id);
            if info.is_generic || info.is_extern || info.async_cc_error {
                continue;
            }
            if matches!(info.inferred_async, InferredAsync::Async { .. }) {
                let mut chain = Vec::new();
                let _ = self.resolve_fn_frame(fn_id, &mut chain);
            }
        }
    }

    // ========================================================================
    // Fixpoint
    // ========================================================================

    /// Classify one function. Reaching a function already being checked
    /// means a call cycle; the callee is assumed non-async and flagged for
    /// the second pass.
    pub fn determine_fn_async(&mut self, fn_id: FnId) -> SemaResult<bool> {
        match self.fns.get(fn_id).inferred_async {
            InferredAsync::Async { .. } => return Ok(true),
            InferredAsync::NonAsync => return Ok(false),
            InferredAsync::Checking => {
                self.fns.get_mut(fn_id).assumed_non_async = true;
                return Ok(false);
            }
            InferredAsync::Unanalyzed => {}
        }
        self.fns.get_mut(fn_id).inferred_async = InferredAsync::Checking;

        let proto_span = self.fns.get(fn_id).span;
        let proto_node = self.fns.get(fn_id).proto.id;
        let cc = self.fns.get(fn_id).proto.cc;

        // An explicit async calling convention decides immediately; the
        // prototype is the cause.
        if cc == CallConv::Async {
            self.fns.get_mut(fn_id).inferred_async = InferredAsync::Async {
                cause_node: proto_node,
                cause_span: proto_span,
                cause_fn: None,
            };
            return Ok(true);
        }

        // Body analysis records direct suspends, which set the cause on the
        // function as they are seen.
        if !self.fns.get(fn_id).body_analyzed
            && self.fns.get(fn_id).body.is_some()
            && !self.fns.get(fn_id).is_generic
        {
            self.analyze_fn_body(fn_id)?;
        }
        if matches!(
            self.fns.get(fn_id).inferred_async,
            InferredAsync::Async { .. }
        ) {
            return Ok(true);
        }

        // Propagate through the call list: the first async callee makes the
        // caller async.
        let calls = self.fns.get(fn_id).calls.clone();
        for call in &calls {
            // `noasync` never suspends; `async f()` starts the callee
            // without suspending the caller.
            if matches!(call.modifier, CallModifier::NoAsync | CallModifier::Async) {
                continue;
            }
            let callee = match call.callee.as_fn() {
                Some(callee) => callee,
                None => continue,
            };
            if self.determine_fn_async(callee)? {
                self.fns.get_mut(fn_id).inferred_async = InferredAsync::Async {
                    cause_node: call.node,
                    cause_span: call.span,
                    cause_fn: Some(callee),
                };
                return Ok(true);
            }
        }

        // And through the await list: awaiting an async function suspends.
        let awaits = self.fns.get(fn_id).awaits.clone();
        for await_site in &awaits {
            let target = match await_site.target_fn {
                Some(target) => target,
                None => continue,
            };
            if self.determine_fn_async(target)? {
                self.fns.get_mut(fn_id).inferred_async = InferredAsync::Async {
                    cause_node: await_site.node,
                    cause_span: await_site.span,
                    cause_fn: Some(target),
                };
                return Ok(true);
            }
        }

        self.fns.get_mut(fn_id).inferred_async = InferredAsync::NonAsync;
        Ok(false)
    }

    /// A function that turned out async under a calling convention that
    /// cannot suspend is an error; emitted once per function.
    fn check_async_cc(&mut self, fn_id: FnId) -> SemaResult<()> {
        let info = self.fns.get(fn_id);
        let cc = info.proto.cc;
        if matches!(cc, CallConv::Unspecified | CallConv::Async) || info.async_cc_error {
            return if self.fns.get(fn_id).async_cc_error {
                Err(SemanticAnalyzeFail)
            } else {
                Ok(())
            };
        }
        let file = info.file.clone();
        let span = info.span;
        let notes = self.async_cause_notes(fn_id);
        self.add_error_with_notes(
            &file,
            span,
            SemanticError::CannotBeAsync {
                cc: cc_name(cc),
                span: span.into(),
            },
            notes,
        );
        self.fns.get_mut(fn_id).async_cc_error = true;
        Err(SemanticAnalyzeFail)
    }

    /// Trace the suspension path for diagnostics: each step names the site
    /// that made a function async, following callees until the original
    /// suspend.
    pub fn async_cause_notes(&self, fn_id: FnId) -> Vec<ErrorNote> {
        let mut notes = Vec::new();
        let mut visited = FxHashSet::default();
        let mut cursor = Some(fn_id);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                break;
            }
            let info = self.fns.get(current);
            let (cause_span, cause_fn) = match &info.inferred_async {
                InferredAsync::Async {
                    cause_span,
                    cause_fn,
                    ..
                } => (*cause_span, *cause_fn),
                _ => break,
            };
            let text = match cause_fn {
                Some(callee) => format!(
                    "'{}' becomes async at this call to '{}'",
                    info.name,
                    self.fns.get(callee).name
                ),
                None => format!("'{}' suspends here", info.name),
            };
            notes.push(ErrorNote {
                file: info.file.clone(),
                span: cause_span,
                text,
            });
            cursor = cause_fn;
        }
        notes
    }

    // ========================================================================
    // Frame synthesis
    // ========================================================================

    /// Build (or return) the frame layout of an async function. `chain`
    /// tracks the call path for recursion diagnostics.
    pub fn resolve_fn_frame(
        &mut self,
        fn_id: FnId,
        chain: &mut Vec<(FnId, Span)>,
    ) -> SemaResult<TypeId> {
        if let Some(frame_ty) = self.fns.get(fn_id).frame_type {
            return Ok(frame_ty);
        }
        if !self.determine_fn_async(fn_id)? {
            let file = self.fns.get(fn_id).file.clone();
            let span = self.fns.get(fn_id).span;
            self.add_error(
                &file,
                span,
                SemanticError::FrameOfNonAsyncFn { span: span.into() },
            );
            return Err(SemanticAnalyzeFail);
        }
        if self.fns.get(fn_id).resolving_frame {
            // The frame would have to contain itself: async recursion.
            let file = self.fns.get(fn_id).file.clone();
            let span = self.fns.get(fn_id).span;
            let mut notes: Vec<ErrorNote> = chain
                .iter()
                .map(|&(caller, call_span)| ErrorNote {
                    file: self.fns.get(caller).file.clone(),
                    span: call_span,
                    text: format!(
                        "'{}' calls '{}' here",
                        self.fns.get(caller).name,
                        self.fns.get(fn_id).name
                    ),
                })
                .collect();
            notes.extend(self.async_cause_notes(fn_id));
            self.add_error_with_notes(
                &file,
                span,
                SemanticError::RecursiveAsync { span: span.into() },
                notes,
            );
            return Err(SemanticAnalyzeFail);
        }
        self.fns.get_mut(fn_id).resolving_frame = true;
        let result = self.build_frame(fn_id, chain);
        self.fns.get_mut(fn_id).resolving_frame = false;
        result
    }

    fn build_frame(&mut self, fn_id: FnId, chain: &mut Vec<(FnId, Span)>) -> SemaResult<TypeId> {
        let spills = self.spill_analysis(fn_id);

        let fn_type = self
            .fns
            .get(fn_id)
            .fn_type
            .expect("async function has a resolved type");
        let (return_type, param_types) = match &self.types.get(fn_type).kind {
            TypeKind::Fn(info) => (info.return_type, info.param_types.clone()),
            _ => return Err(SemanticAnalyzeFail),
        };
        let usize_ty = self.types.primitives.usize;
        let result_ptr = self
            .types
            .get_pointer(PtrInfo::single(return_type, false));

        // Frame layout, in source order.
        let mut fields: Vec<(String, TypeId, Option<u32>)> = vec![
            ("@fn_ptr".to_string(), fn_type, None),
            ("@resume_index".to_string(), usize_ty, None),
            ("@awaiter".to_string(), usize_ty, None),
            ("@result_ptr_callee".to_string(), result_ptr, None),
            ("@result_ptr_awaiter".to_string(), result_ptr, None),
            ("@result".to_string(), return_type, None),
        ];
        if self.target.err_ret_tracing && self.fn_can_return_error(fn_id) {
            let trace_ty = self.stack_trace_type()?;
            let trace_ptr = self.types.get_pointer(PtrInfo::single(trace_ty, false));
            fields.push(("@ptr_stack_trace".to_string(), trace_ptr, None));
            // The trace storage lives in one frame per chain; inner frames
            // only point at the trace their awaiter passes down.
            if self.frame_owns_error_trace(fn_id) {
                let addrs = self.types.get_array(usize_ty, 32);
                fields.push(("@stack_trace".to_string(), trace_ty, None));
                fields.push(("@instruction_addrs".to_string(), addrs, None));
            }
        }
        // Parameters in declaration order.
        let proto_params = self.fns.get(fn_id).proto.params.clone();
        for (param, &ty) in proto_params.iter().zip(param_types.iter()) {
            let name = param
                .name
                .map(|sym| self.interner.resolve(sym).to_string())
                .unwrap_or_else(|| "@arg".to_string());
            fields.push((name, ty, None));
        }
        // Local allocations, tagged by the IR with unique names.
        let allocas = self.fns.get(fn_id).allocas.clone();
        for alloca in &allocas {
            fields.push((alloca.name_hint.clone(), alloca.ty, Some(alloca.align)));
        }
        // Spilled temporaries.
        for (i, spill) in spills.iter().enumerate() {
            fields.push((format!("@spill_{i}"), spill.ty, None));
        }

        // One shared slot sized to the largest child-call frame. Calls with
        // an explicit new stack are exempt; sibling calls share the slot.
        let mut max_child_frame: u64 = 0;
        let mut max_child_align: u32 = self.target.ptr_align();
        let calls = self.fns.get(fn_id).calls.clone();
        for call in &calls {
            if call.new_stack || call.modifier == CallModifier::NoAsync {
                continue;
            }
            match call.callee {
                CalleeRef::Fn(callee) => {
                    if !self.determine_fn_async(callee)? {
                        continue;
                    }
                    chain.push((fn_id, call.span));
                    let child_frame = self.resolve_fn_frame(callee, chain)?;
                    chain.pop();
                    let size = self.type_abi_size(child_frame)?;
                    let align = self.type_abi_align(child_frame)?;
                    max_child_frame = max_child_frame.max(size);
                    max_child_align = max_child_align.max(align);
                }
                CalleeRef::Ptr => {
                    // Inside an async function every callee must be known at
                    // compile time, or the frame cannot be sized.
                    let file = self.fns.get(fn_id).file.clone();
                    self.add_error(
                        &file,
                        call.span,
                        SemanticError::CalleeNotComptimeKnown {
                            span: call.span.into(),
                        },
                    );
                    return Err(SemanticAnalyzeFail);
                }
            }
        }
        if max_child_frame > 0 {
            let u8_ty = self.types.primitives.u8;
            let buf = self.types.get_array(u8_ty, max_child_frame);
            fields.push(("@async_call_frame".to_string(), buf, Some(max_child_align)));
        }

        let frame_ty = self.materialize_frame_struct(fn_id, fields)?;
        self.fns.get_mut(fn_id).frame_type = Some(frame_ty);
        Ok(frame_ty)
    }

    /// Lay the frame fields out as an auto struct and register it as the
    /// locals container of the function's `@Frame` type.
    fn materialize_frame_struct(
        &mut self,
        fn_id: FnId,
        fields: Vec<(String, TypeId, Option<u32>)>,
    ) -> SemaResult<TypeId> {
        let fn_name = self.fns.get(fn_id).name.clone();
        let file = self.fns.get(fn_id).file.clone();
        let span = self.fns.get(fn_id).span;

        let mut offset: u64 = 0;
        let mut abi_align: u32 = 1;
        let mut gen_fields = Vec::new();
        let mut field_infos = Vec::new();
        for (name, ty, explicit_align) in &fields {
            self.ensure_type_layout(*ty)?;
            let size = self.type_abi_size(*ty)?;
            let mut info = FieldInfo {
                name: Some(self.interner.intern(name)),
                span,
                type_id: Some(*ty),
                contributes_bits: size > 0,
                ..FieldInfo::default()
            };
            if size > 0 {
                let align = explicit_align.unwrap_or(self.type_abi_align(*ty)?);
                offset = align_forward(offset, align as u64);
                info.align = Some(align);
                info.offset = Some(offset);
                info.gen_index = Some(gen_fields.len() as u32);
                gen_fields.push(GenField {
                    ty: *ty,
                    offset,
                    host_int_bytes: None,
                    src_index: Some(field_infos.len()),
                });
                abi_align = abi_align.max(align);
                offset += size;
            }
            field_infos.push(info);
        }
        let size = align_forward(offset, abi_align as u64);

        let container = self.containers.push(ContainerState {
            name: format!("@Frame({fn_name})"),
            kind: ContainerKind::Struct,
            layout: ContainerLayout::Auto,
            type_id: TypeId::placeholder(),
            span,
            file,
            status: ResolveStatus::SizeKnown,
            resolving_zero_bits: false,
            resolving_other: false,
            src_fields: Vec::new(),
            fields: field_infos,
            fields_by_name: Default::default(),
            decls_scope: None,
            arg: None,
            zero_bits: Some(size == 0),
            requires_comptime: false,
            gen_fields,
            union_tag_type: None,
            most_aligned_member: None,
            tag_first: false,
            gen_tag_index: None,
            gen_union_index: None,
            tag_int_type: None,
            explicit_tag_type: false,
            special: ContainerSpecial::Frame(fn_id),
            root: None,
        });

        let frame_ty = self.types.get_fn_frame(fn_id, &fn_name);
        self.containers.get_mut(container).type_id = frame_ty;
        if let TypeKind::FnFrame { locals, .. } = &mut self.types.get_mut(frame_ty).kind {
            *locals = Some(container);
        }
        let data = self.types.get_mut(frame_ty);
        data.abi_size = Some(size);
        data.size_in_bits = Some(size * 8);
        data.abi_align = Some(abi_align);
        Ok(frame_ty)
    }

    // ========================================================================
    // Spill analysis
    // ========================================================================

    /// Mark every Expr scope on the path from a suspension point to the
    /// function root, then pick out the temporaries living in marked scopes
    /// that have no storage of their own.
    fn spill_analysis(&mut self, fn_id: FnId) -> Vec<IrTemp> {
        let mut suspension_scopes: Vec<ScopeId> = Vec::new();
        for suspend in &self.fns.get(fn_id).suspends {
            suspension_scopes.push(suspend.scope);
        }
        for await_site in &self.fns.get(fn_id).awaits {
            let is_suspend_point = await_site
                .target_fn
                .map(|target| {
                    matches!(
                        self.fns.get(target).inferred_async,
                        InferredAsync::Async { .. }
                    )
                })
                .unwrap_or(true);
            if is_suspend_point {
                suspension_scopes.push(await_site.scope);
            }
        }
        for scope in suspension_scopes {
            let mut cursor = Some(scope);
            while let Some(id) = cursor {
                if self.scopes.get(id).is_expr() {
                    self.scopes.get_mut(id).need_spill = true;
                }
                cursor = self.scopes.get(id).parent;
            }
        }

        let temps = self.fns.get(fn_id).temps.clone();
        temps
            .into_iter()
            .filter(|temp| {
                if temp.has_own_storage {
                    return false;
                }
                // The temp spills iff its nearest enclosing Expr scope was
                // marked by a suspension point.
                let mut cursor = Some(temp.scope);
                while let Some(id) = cursor {
                    if self.scopes.get(id).is_expr() {
                        return self.scopes.get(id).need_spill;
                    }
                    cursor = self.scopes.get(id).parent;
                }
                false
            })
            .collect()
    }

    /// A frame owns its error-return trace when it is the outermost frame
    /// of its chain: no error-returning async caller exists to hand a trace
    /// down through `@ptr_stack_trace`.
    fn frame_owns_error_trace(&self, fn_id: FnId) -> bool {
        for caller in self.fns.ids() {
            if caller == fn_id {
                continue;
            }
            let info = self.fns.get(caller);
            if !matches!(info.inferred_async, InferredAsync::Async { .. })
                || !self.fn_can_return_error(caller)
            {
                continue;
            }
            let calls_me = info.calls.iter().any(|call| {
                call.callee.as_fn() == Some(fn_id) && call.modifier != CallModifier::NoAsync
            });
            if calls_me {
                return false;
            }
        }
        true
    }

    fn fn_can_return_error(&self, fn_id: FnId) -> bool {
        let fn_type = match self.fns.get(fn_id).fn_type {
            Some(ty) => ty,
            None => return false,
        };
        match &self.types.get(fn_type).kind {
            TypeKind::Fn(info) => matches!(
                self.types.get(info.return_type).kind,
                TypeKind::ErrorUnion { .. } | TypeKind::ErrorSet(_)
            ),
            _ => false,
        }
    }

    /// The error-return trace record: an index plus a slice of return
    /// addresses. Built once per compilation.
    fn stack_trace_type(&mut self) -> SemaResult<TypeId> {
        if let Some(ty) = self.stack_trace_type_cache {
            return Ok(ty);
        }
        let usize_ty = self.types.primitives.usize;
        let usize_many = self.types.get_pointer(PtrInfo {
            child: usize_ty,
            is_const: false,
            is_volatile: false,
            ptr_len: crate::frontend::ast::PtrLen::Unknown,
            alignment: 0,
            bit_offset_in_host: 0,
            host_int_bytes: 0,
            allow_zero: false,
        });
        let addr_slice = self.get_slice_type(usize_many)?;
        let fields = vec![
            ("index".to_string(), usize_ty, None::<()>),
            ("instruction_addresses".to_string(), addr_slice, None),
        ];
        // Reuse the frame materializer shape by hand: a plain auto struct.
        let mut offset: u64 = 0;
        let mut abi_align: u32 = 1;
        let mut gen_fields = Vec::new();
        let mut field_infos = Vec::new();
        for (name, ty, _) in &fields {
            let size = self.type_abi_size(*ty)?;
            let align = self.type_abi_align(*ty)?;
            offset = align_forward(offset, align as u64);
            field_infos.push(FieldInfo {
                name: Some(self.interner.intern(name)),
                type_id: Some(*ty),
                align: Some(align),
                contributes_bits: true,
                offset: Some(offset),
                gen_index: Some(gen_fields.len() as u32),
                ..FieldInfo::default()
            });
            gen_fields.push(GenField {
                ty: *ty,
                offset,
                host_int_bytes: None,
                src_index: Some(field_infos.len() - 1),
            });
            abi_align = abi_align.max(align);
            offset += size;
        }
        let size = align_forward(offset, abi_align as u64);
        let container = self.containers.push(ContainerState {
            name: "StackTrace".to_string(),
            kind: ContainerKind::Struct,
            layout: ContainerLayout::Auto,
            type_id: TypeId::placeholder(),
            span: Span::default(),
            file: Default::default(),
            status: ResolveStatus::SizeKnown,
            resolving_zero_bits: false,
            resolving_other: false,
            src_fields: Vec::new(),
            fields: field_infos,
            fields_by_name: Default::default(),
            decls_scope: None,
            arg: None,
            zero_bits: Some(false),
            requires_comptime: false,
            gen_fields,
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
        let ty = self
            .types
            .register_container(ContainerKind::Struct, container, "StackTrace".to_string());
        self.containers.get_mut(container).type_id = ty;
        let data = self.types.get_mut(ty);
        data.abi_size = Some(size);
        data.size_in_bits = Some(size * 8);
        data.abi_align = Some(abi_align);
        self.stack_trace_type_cache = Some(ty);
        Ok(ty)
    }
}
