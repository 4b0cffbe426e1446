//! The call handler.
//!
//! Resolves callees, fetches or lazily computes their contracts, checks
//! every argument against the parameter's sink flags, routes preserved
//! argument taint into the call's result, writes by-reference effects back
//! into argument l-values in argument order, and extends links so taint can
//! reach callers of callers.

use crate::visitor::Eval;
use crate::Analyzer;
use ir::{Arg, Callee, Meta, ValueHint};
use taint::{FuncId, MethodLinks, TaintFlags, Taintedness};

impl Analyzer {
    pub(crate) fn handle_call(&mut self, callee: &Callee, args: &[Arg], meta: &Meta) -> Eval {
        let mut receiver = None;
        let targets = self.resolve_callee(callee, &mut receiver);

        // Arguments evaluate left to right; by-reference effects below apply
        // in the same order.
        let evals: Vec<Eval> = args.iter().map(|arg| self.visit(&arg.value)).collect();

        if targets.is_empty() {
            let mut out = Eval::unknown();
            for eval in &evals {
                out.trail.merge_with(&eval.trail);
            }
            if let Some(receiver) = receiver {
                out.trail.merge_with(&receiver.trail);
            }
            return out;
        }

        for &func in &targets {
            self.ensure_analyzed(func);
        }

        let mut result = Eval::safe();
        for &func in &targets {
            self.apply_contract(func, args, &evals, &mut result, meta);
        }
        if targets.len() == 1 {
            let func = targets[0];
            if let Some(def) = &self.registry.func(func).def {
                if let Some(hint) = &def.return_hint {
                    result.hint = ValueHint::from_type_hint(hint);
                }
            }
        }
        if !result.taint.is_safe() {
            Self::note_line(&mut result, meta);
        }
        result
    }

    fn resolve_callee(&mut self, callee: &Callee, receiver: &mut Option<Eval>) -> Vec<FuncId> {
        match callee {
            Callee::Function(name) => self
                .registry
                .lookup(&name.to_ascii_lowercase())
                .into_iter()
                .collect(),
            Callee::Method { object, name } => {
                let obj = self.visit(object);
                let mut targets = Vec::new();
                if let Some(name) = name {
                    if let Some(class) = &obj.obj_class {
                        if let Some(func) = self.registry.resolve_method(class, name) {
                            targets.push(func);
                        }
                    }
                    if targets.is_empty() {
                        // Receiver class unknown: every method of this name
                        // is a candidate.
                        targets = self.registry.methods_named(name);
                    }
                }
                *receiver = Some(obj);
                targets
            }
            Callee::StaticMethod { class, name } => self
                .registry
                .resolve_method(class, name)
                .into_iter()
                .collect(),
            Callee::Dynamic(expr) => {
                self.visit(expr);
                Vec::new()
            }
        }
    }

    fn apply_contract(
        &mut self,
        func: FuncId,
        args: &[Arg],
        evals: &[Eval],
        result: &mut Eval,
        meta: &Meta,
    ) {
        let Some(contract) = self.contracts.get(func) else {
            return;
        };
        let contract = contract.clone();
        let def = self.registry.func(func).def.clone();
        let label = self.registry.func(func).name.clone();

        for (index, (arg, eval)) in args.iter().zip(evals).enumerate() {
            // Sink behaviour at this position.
            if let Some(sink) = contract.taint.param_sink(index) {
                let flags = sink.flags;
                if !flags.intersects(TaintFlags::RAW_PARAM) {
                    let mut sink = sink.clone();
                    if flags.intersects(TaintFlags::ARRAY_OK) && eval.hint == ValueHint::Arr {
                        sink.flags = sink.flags.subtract(TaintFlags::SQL_NUMKEY_EXEC);
                    }
                    self.check_sink_shaped(
                        eval,
                        &sink,
                        &arg.value.meta,
                        contract.trail.param(index),
                        &label,
                    );
                }
            }
            // Value flow into the return.
            if let Some(preserved) = contract.taint.preserved_for(index) {
                if !preserved.is_empty() {
                    let contribution = preserved.apply_to(&eval.taint);
                    if !contribution.is_safe() {
                        result.taint.merge_with(&contribution);
                        result.trail.merge_with(&eval.trail);
                    }
                    // Callers of callers: the result stays linked to every
                    // parameter the argument was derived from.
                    result.links.links.merge_with(&eval.links.collapse_to_set());
                }
            }
            // By-reference write-back, in argument order.
            let declared_ref = def
                .as_ref()
                .and_then(|d| d.params.get(index))
                .map(|p| p.by_ref)
                .unwrap_or(false);
            if declared_ref || arg.by_ref {
                if let Some(Some(post)) = contract.taint.ref_params.get(index) {
                    let mut write = Eval {
                        taint: post.clone(),
                        trail: contract
                            .trail
                            .param(index)
                            .cloned()
                            .unwrap_or_default(),
                        links: MethodLinks::empty(),
                        hint: ValueHint::Unknown,
                        obj_class: None,
                    };
                    Self::note_line(&mut write, meta);
                    self.write_lvalue(&arg.value, write, true, meta);
                }
            }
        }
        result.taint.merge_with(&contract.taint.overall);
        if !contract.taint.overall.is_safe() {
            result.trail.merge_with(&contract.trail.generic);
        }
    }

    /// `new C(...)`: run the constructor through the call protocol; the
    /// expression's string-sink taint is whatever `__toString` returns.
    pub(crate) fn handle_new(
        &mut self,
        class: Option<&str>,
        args: &[Arg],
        meta: &Meta,
    ) -> Eval {
        let Some(class) = class else {
            for arg in args {
                self.visit(&arg.value);
            }
            return Eval::unknown();
        };
        let mut result = Eval::safe_hinted(ValueHint::Obj);
        result.obj_class = Some(class.to_string());

        if let Some(ctor) = self.registry.resolve_method(class, "__construct") {
            self.ensure_analyzed(ctor);
            let evals: Vec<Eval> = args.iter().map(|arg| self.visit(&arg.value)).collect();
            let mut ctor_result = Eval::safe();
            self.apply_contract(ctor, args, &evals, &mut ctor_result, meta);
        } else {
            for arg in args {
                self.visit(&arg.value);
            }
        }
        if let Some(to_string) = self.registry.resolve_method(class, "__tostring") {
            self.ensure_analyzed(to_string);
            if let Some(contract) = self.contracts.get(to_string) {
                result.taint.merge_with(&contract.taint.overall);
                result.trail.merge_with(&contract.trail.generic);
            }
        }
        result
    }
}
