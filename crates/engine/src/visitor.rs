//! The propagation visitor.
//!
//! Post-order evaluation of every AST node into an [`Eval`] triple:
//! taintedness, cause trail and method-parameter links, plus a coarse value
//! hint. Statements evaluate to an inapplicable sentinel; expressions follow
//! the per-construct rules. Sink checks and contract refinement happen as
//! side effects while walking.

use crate::annotations::{superglobal_taint, Scope, VarAnnotations};
use crate::{Analyzer, Finding, TrailPoint};
use ir::{BinOp, CastKind, FunctionDef, Meta, Node, NodeKind, UnaryOp, ValueHint};
use taint::{
    CausedByLines, FuncId, FunctionTaintedness, LinksSet, MethodLinks, OffsetKey,
    PreservedTaintedness, TaintFlags, Taintedness,
};
use tracing::debug;

/// The `(taintedness, cause-trail, links)` triple computed per node.
#[derive(Debug, Clone, Default)]
pub struct Eval {
    pub taint: Taintedness,
    pub trail: CausedByLines,
    pub links: MethodLinks,
    pub hint: ValueHint,
    /// Class of the value when it is an object of statically known class.
    pub obj_class: Option<String>,
}

impl Eval {
    pub fn safe() -> Self {
        Self::default()
    }

    pub fn safe_hinted(hint: ValueHint) -> Self {
        Self {
            hint,
            ..Self::default()
        }
    }

    pub fn unknown() -> Self {
        Self {
            taint: Taintedness::unknown_value(),
            ..Self::default()
        }
    }

    /// Sentinel for non-value positions.
    pub fn inapplicable() -> Self {
        Self {
            taint: Taintedness::of(TaintFlags::INAPPLICABLE),
            ..Self::default()
        }
    }

    pub fn merge_with(&mut self, other: &Eval) {
        self.taint.merge_with(&other.taint);
        self.trail.merge_with(&other.trail);
        self.links.merge_with(&other.links);
        if self.hint != other.hint {
            self.hint = ValueHint::Unknown;
        }
        if self.obj_class != other.obj_class {
            self.obj_class = None;
        }
    }
}

/// Resolve a literal index expression to a scalar key.
pub(crate) fn scalar_key(node: &Node) -> Option<OffsetKey> {
    match &node.kind {
        NodeKind::IntLit(i) => Some(OffsetKey::Int(*i)),
        NodeKind::StringLit(s) => Some(OffsetKey::Str(s.clone())),
        NodeKind::BoolLit(b) => Some(OffsetKey::Int(i64::from(*b))),
        NodeKind::Interp(parts) => match parts.as_slice() {
            [part] => match &part.kind {
                NodeKind::StringLit(s) => Some(OffsetKey::Str(s.clone())),
                _ => None,
            },
            _ => None,
        },
        NodeKind::Unary {
            op: UnaryOp::Sign,
            operand,
        } => match &operand.kind {
            NodeKind::IntLit(i) => Some(OffsetKey::Int(-*i)),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn prop_key(class: &str, name: &str) -> String {
    format!("{}::${}", class.to_ascii_lowercase(), name)
}

impl Analyzer {
    pub(crate) fn cur_scope(&self) -> &Scope {
        self.locals.last().unwrap_or(&self.global)
    }

    pub(crate) fn cur_scope_mut(&mut self) -> &mut Scope {
        self.locals.last_mut().unwrap_or(&mut self.global)
    }

    /// Append the current line to a trail when the value is interesting.
    pub(crate) fn note_line(eval: &mut Eval, meta: &Meta) {
        let flags = eval.taint.collapse();
        let links = eval.links.collapse_to_set();
        eval.trail.add(&meta.file, meta.line, flags, &links);
    }

    pub(crate) fn visit(&mut self, node: &Node) -> Eval {
        let meta = &node.meta;
        match &node.kind {
            // ---- safe leaves ----
            NodeKind::IntLit(_) => Eval::safe_hinted(ValueHint::Int),
            NodeKind::FloatLit(_) => Eval::safe_hinted(ValueHint::Float),
            NodeKind::BoolLit(_) => Eval::safe_hinted(ValueHint::Bool),
            NodeKind::NullLit => Eval::safe_hinted(ValueHint::Null),
            NodeKind::StringLit(_) => Eval::safe_hinted(ValueHint::Str),
            NodeKind::ConstFetch(_) | NodeKind::ClassConst { .. } => Eval::safe(),

            // ---- reads ----
            NodeKind::Var(name) => self.read_var(name, meta),
            NodeKind::Subscript { base, index } => {
                let base_eval = self.visit(base);
                let key = index.as_deref().and_then(scalar_key);
                let index_eval = match index {
                    Some(index) if key.is_none() => Some(self.visit(index)),
                    _ => None,
                };
                let mut out = Eval {
                    taint: base_eval.taint.project(key.as_ref()),
                    links: base_eval.links.project(key.as_ref()),
                    trail: base_eval.trail,
                    hint: ValueHint::Unknown,
                    obj_class: None,
                };
                if let Some(index_eval) = index_eval {
                    out.trail.merge_with(&index_eval.trail);
                }
                out
            }
            NodeKind::Prop { object, name } => {
                let obj = self.visit(object);
                match (obj.obj_class.clone(), name) {
                    (Some(class), Some(name)) => match self.props.get(&prop_key(&class, name)) {
                        Some(ann) => Eval {
                            taint: ann.taint.clone(),
                            trail: ann.trail.clone(),
                            links: ann.links.clone(),
                            hint: ValueHint::Unknown,
                            obj_class: ann.obj_class.clone(),
                        },
                        None => Eval::safe(),
                    },
                    // Dynamic object: its own taint shows through the read.
                    _ => Eval {
                        taint: obj.taint.project(None),
                        links: obj.links.project(None),
                        trail: obj.trail,
                        hint: ValueHint::Unknown,
                        obj_class: None,
                    },
                }
            }
            NodeKind::StaticProp { class, name } => {
                match self.props.get(&prop_key(class, name)) {
                    Some(ann) => Eval {
                        taint: ann.taint.clone(),
                        trail: ann.trail.clone(),
                        links: ann.links.clone(),
                        hint: ValueHint::Unknown,
                        obj_class: ann.obj_class.clone(),
                    },
                    None => Eval::safe(),
                }
            }

            // ---- operators ----
            NodeKind::Binary { op, left, right } => {
                let left = self.visit(left);
                let right = self.visit(right);
                self.combine_binary(*op, left, &right)
            }
            NodeKind::Unary { op, operand } => {
                let operand = self.visit(operand);
                match op {
                    UnaryOp::Not => Eval::safe_hinted(ValueHint::Bool),
                    UnaryOp::Sign => Eval::safe_hinted(ValueHint::Int),
                    UnaryOp::BitNot => Eval {
                        taint: Taintedness::of(operand.taint.collapse()),
                        trail: operand.trail,
                        links: flatten_links(&operand.links),
                        hint: ValueHint::Unknown,
                        obj_class: None,
                    },
                    UnaryOp::Silence => operand,
                }
            }
            NodeKind::Cast { to, expr } => {
                let value = self.visit(expr);
                match to {
                    CastKind::String => Eval {
                        taint: Taintedness::of(
                            value.taint.collapse().subtract(TaintFlags::SQL_NUMKEY),
                        ),
                        trail: value.trail,
                        links: flatten_links(&value.links),
                        hint: ValueHint::Str,
                        obj_class: None,
                    },
                    CastKind::Array | CastKind::Object => Eval {
                        taint: Taintedness::of(value.taint.collapse()),
                        trail: value.trail,
                        links: flatten_links(&value.links),
                        hint: if matches!(to, CastKind::Array) {
                            ValueHint::Arr
                        } else {
                            ValueHint::Obj
                        },
                        obj_class: None,
                    },
                    CastKind::Int | CastKind::Float | CastKind::Bool | CastKind::Unset => {
                        Eval::safe_hinted(match to {
                            CastKind::Int => ValueHint::Int,
                            CastKind::Float => ValueHint::Float,
                            CastKind::Bool => ValueHint::Bool,
                            _ => ValueHint::Null,
                        })
                    }
                }
            }
            NodeKind::IncDec(target) => self.visit(target),
            NodeKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond_eval = self.visit(cond);
                let mut out = match then {
                    Some(then) => self.visit(then),
                    // Elvis: the condition itself is the value.
                    None => cond_eval,
                };
                let otherwise = self.visit(otherwise);
                out.merge_with(&otherwise);
                out
            }
            NodeKind::Match { subject, arms } => {
                self.visit(subject);
                let mut out = Eval::safe();
                for arm in arms {
                    if let Some(conditions) = &arm.conditions {
                        for condition in conditions {
                            self.visit(condition);
                        }
                    }
                    let value = self.visit(&arm.body);
                    // Arms that unconditionally diverge contribute no value.
                    if matches!(arm.body.kind, NodeKind::Throw(_) | NodeKind::Exit(_)) {
                        continue;
                    }
                    out.merge_with(&value);
                }
                out
            }

            // ---- arrays and strings ----
            NodeKind::ArrayLit(entries) => {
                let mut taint = Taintedness::safe();
                let mut links = MethodLinks::empty();
                let mut trail = CausedByLines::new();
                let mut next_index: i64 = 0;
                for entry in entries {
                    let value = self.visit(&entry.value);
                    trail.merge_with(&value.trail);
                    if entry.spread {
                        taint.merge_with(&value.taint);
                        links.merge_with(&value.links);
                        continue;
                    }
                    let key = match &entry.key {
                        Some(key_node) => {
                            let resolved = scalar_key(key_node);
                            match &resolved {
                                Some(OffsetKey::Int(i)) => next_index = next_index.max(i + 1),
                                Some(_) => {}
                                None => {
                                    let key_eval = self.visit(key_node);
                                    taint.key_flags |= key_eval.taint.collapse().only_yes();
                                    trail.merge_with(&key_eval.trail);
                                }
                            }
                            resolved
                        }
                        None => {
                            let key = OffsetKey::Int(next_index);
                            next_index += 1;
                            Some(key)
                        }
                    };
                    // SQL fragments hidden in integer-keyed string values.
                    let int_key =
                        entry.key.is_none() || matches!(key, Some(OffsetKey::Int(_)));
                    if int_key
                        && value.taint.collapse().contains(TaintFlags::SQL)
                        && value.hint.maybe_string()
                    {
                        taint.add_flags(TaintFlags::SQL_NUMKEY);
                    }
                    links.set_at_path(std::slice::from_ref(&key), value.links.clone(), true);
                    taint.set_at(key, value.taint.clone(), true);
                }
                Eval {
                    taint,
                    trail,
                    links,
                    hint: ValueHint::Arr,
                    obj_class: None,
                }
            }
            NodeKind::Interp(parts) => {
                let evals: Vec<Eval> = parts.iter().map(|p| self.visit(p)).collect();
                self.string_combine(&evals)
            }
            NodeKind::ShellExec(parts) => {
                let evals: Vec<Eval> = parts.iter().map(|p| self.visit(p)).collect();
                let combined = self.string_combine(&evals);
                self.check_sink(&combined, TaintFlags::SHELL_EXEC, meta, "backtick");
                Eval::unknown()
            }

            // ---- call-like constructs ----
            NodeKind::Call { callee, args } => self.handle_call(callee, args, meta),
            NodeKind::New { class, args } => self.handle_new(class.as_deref(), args, meta),
            NodeKind::Eval(expr) => {
                let value = self.visit(expr);
                self.check_sink(&value, TaintFlags::MISC_EXEC, meta, "eval");
                Eval::unknown()
            }
            NodeKind::Include { expr, .. } => {
                let value = self.visit(expr);
                self.check_sink(&value, TaintFlags::MISC_EXEC, meta, "include");
                Eval::unknown()
            }
            NodeKind::Exit(expr) => {
                if let Some(expr) = expr {
                    let value = self.visit(expr);
                    if !value.hint.is_scalar_numeric() {
                        self.check_sink(&value, TaintFlags::HTML_EXEC, meta, "exit");
                    }
                }
                Eval::inapplicable()
            }
            NodeKind::Isset(args) => {
                for arg in args {
                    self.visit(arg);
                }
                Eval::safe_hinted(ValueHint::Bool)
            }
            NodeKind::Empty(arg) => {
                self.visit(arg);
                Eval::safe_hinted(ValueHint::Bool)
            }
            NodeKind::Clone(expr) => self.visit(expr),
            NodeKind::Closure { def, uses } => {
                let func = self.register_closure(def, meta);
                let captures: Vec<(String, VarAnnotations)> = uses
                    .iter()
                    .filter_map(|(name, _)| {
                        self.cur_scope()
                            .get(name)
                            .map(|ann| (name.clone(), ann.clone()))
                    })
                    .collect();
                self.analyze_function_body(func, def, &captures);
                Eval::safe_hinted(ValueHint::Obj)
            }

            // ---- assignment ----
            NodeKind::Assign {
                target,
                value,
                op,
                by_ref,
            } => self.handle_assign(target, value, *op, *by_ref, meta),

            // ---- sink statements ----
            NodeKind::Echo(args) => {
                for arg in args {
                    let value = self.visit(arg);
                    self.check_sink(&value, TaintFlags::HTML_EXEC, &arg.meta, "echo");
                }
                Eval::inapplicable()
            }
            NodeKind::Print(arg) => {
                let value = self.visit(arg);
                self.check_sink(&value, TaintFlags::HTML_EXEC, meta, "print");
                Eval::safe_hinted(ValueHint::Int)
            }

            // ---- control flow ----
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    self.visit(stmt);
                }
                Eval::inapplicable()
            }
            NodeKind::ExprStmt(expr) => {
                self.visit(expr);
                Eval::inapplicable()
            }
            NodeKind::If {
                cond,
                then,
                elseifs,
                otherwise,
            } => {
                self.visit(cond);
                let before = self.cur_scope().clone();
                let mut states: Vec<Scope> = Vec::new();

                self.visit(then);
                states.push(std::mem::replace(self.cur_scope_mut(), before.clone()));
                for (elseif_cond, elseif_body) in elseifs {
                    self.visit(elseif_cond);
                    self.visit(elseif_body);
                    states.push(std::mem::replace(self.cur_scope_mut(), before.clone()));
                }
                if let Some(otherwise) = otherwise {
                    self.visit(otherwise);
                    states.push(std::mem::replace(self.cur_scope_mut(), before.clone()));
                } else {
                    states.push(before);
                }
                self.merge_branch_states(states);
                Eval::inapplicable()
            }
            NodeKind::While { cond, body } => {
                self.visit(cond);
                self.visit_loop_body(body, None);
                Eval::inapplicable()
            }
            NodeKind::DoWhile { body, cond } => {
                self.visit_loop_body(body, None);
                self.visit(cond);
                Eval::inapplicable()
            }
            NodeKind::For { header, body } => {
                for expr in header {
                    self.visit(expr);
                }
                self.visit_loop_body(body, None);
                Eval::inapplicable()
            }
            NodeKind::Foreach {
                subject,
                key_var,
                value_var,
                by_ref: _,
                body,
            } => {
                let subject_eval = self.visit(subject);
                let bind = ForeachBinding {
                    key_var: key_var.as_deref(),
                    value_var,
                    key_taint: Taintedness::of(subject_eval.taint.key_flags),
                    value: Eval {
                        taint: subject_eval.taint.project(None),
                        links: subject_eval.links.project(None),
                        trail: subject_eval.trail.clone(),
                        hint: ValueHint::Unknown,
                        obj_class: None,
                    },
                };
                self.visit_loop_body(body, Some(&bind));
                Eval::inapplicable()
            }
            NodeKind::Switch { subject, cases } => {
                self.visit(subject);
                let before = self.cur_scope().clone();
                let mut states: Vec<Scope> = Vec::new();
                for case in cases {
                    if let Some(test) = &case.test {
                        self.visit(test);
                    }
                    for stmt in &case.body {
                        self.visit(stmt);
                    }
                    states.push(std::mem::replace(self.cur_scope_mut(), before.clone()));
                }
                states.push(before);
                self.merge_branch_states(states);
                Eval::inapplicable()
            }
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                let before = self.cur_scope().clone();
                self.visit(body);
                let after_body = self.cur_scope().clone();
                let mut states = vec![after_body.clone()];
                for catch in catches {
                    // The catch sees any prefix of the body's effects.
                    let mut catch_scope = after_body.clone();
                    catch_scope.join_with(&before);
                    *self.cur_scope_mut() = catch_scope;
                    if let Some(var) = &catch.var {
                        let entry = self.cur_scope_mut().entry(var);
                        entry.taint = Taintedness::unknown_value();
                    }
                    self.visit(&catch.body);
                    states.push(self.cur_scope().clone());
                }
                self.merge_branch_states(states);
                if let Some(finally) = finally {
                    self.visit(finally);
                }
                Eval::inapplicable()
            }
            NodeKind::Return(expr) => self.handle_return(expr.as_deref(), meta),
            NodeKind::Break | NodeKind::Continue => Eval::inapplicable(),
            NodeKind::Global(names) => {
                if !self.locals.is_empty() {
                    for name in names {
                        let ann = self.global.entry(name).clone();
                        self.cur_scope_mut().vars.insert(name.clone(), ann);
                    }
                }
                Eval::inapplicable()
            }
            NodeKind::StaticVar(decls) => {
                for (name, default) in decls {
                    if let Some(default) = default {
                        self.visit(default);
                    }
                    self.cur_scope_mut()
                        .vars
                        .insert(name.clone(), VarAnnotations::default());
                }
                Eval::inapplicable()
            }
            NodeKind::Throw(expr) => {
                self.visit(expr);
                Eval::inapplicable()
            }
            NodeKind::Unset(args) => {
                for arg in args {
                    match &arg.kind {
                        NodeKind::Var(name) => self.cur_scope_mut().remove(name),
                        NodeKind::Subscript { .. } => {
                            self.write_lvalue(arg, Eval::safe(), true, &arg.meta);
                        }
                        _ => {}
                    }
                }
                Eval::inapplicable()
            }

            // ---- declarations ----
            NodeKind::FunctionDecl(def) => {
                if let Some(func) = self.registry.lookup(&def.name.to_ascii_lowercase()) {
                    self.ensure_analyzed(func);
                }
                Eval::inapplicable()
            }
            NodeKind::ClassDecl(class) => {
                let class_key = class.name.to_ascii_lowercase();
                for prop in &class.props {
                    let eval = match &prop.default {
                        Some(default) => self.visit(default),
                        None => Eval::safe(),
                    };
                    let entry = self.props.entry(&prop_key(&class_key, &prop.name));
                    entry.taint = eval.taint;
                    entry.trail = eval.trail;
                    entry.links = eval.links;
                }
                for method in &class.methods {
                    if let Some(func) = self
                        .registry
                        .resolve_method(&class_key, &method.name)
                    {
                        self.ensure_analyzed(func);
                    }
                }
                Eval::inapplicable()
            }

            // ---- catch-all ----
            NodeKind::Other(children) => {
                let mut out = Eval::safe();
                for child in children {
                    let value = self.visit(child);
                    out.merge_with(&value);
                }
                out.taint.flags = out.taint.flags.subtract(TaintFlags::INAPPLICABLE);
                out
            }
        }
    }

    fn read_var(&mut self, name: &str, meta: &Meta) -> Eval {
        if name == "this" {
            return Eval {
                obj_class: self.class_stack.last().cloned(),
                hint: ValueHint::Obj,
                ..Eval::safe()
            };
        }
        if let Some(taint) = superglobal_taint(name) {
            let mut eval = Eval {
                taint,
                hint: ValueHint::Arr,
                ..Eval::default()
            };
            Self::note_line(&mut eval, meta);
            return eval;
        }
        match self.cur_scope().get(name) {
            Some(ann) => Eval {
                taint: ann.taint.clone(),
                trail: ann.trail.clone(),
                links: ann.links.clone(),
                hint: ValueHint::Unknown,
                obj_class: ann.obj_class.clone(),
            },
            None => Eval::unknown(),
        }
    }

    pub(crate) fn combine_binary(&mut self, op: BinOp, left: Eval, right: &Eval) -> Eval {
        match op {
            BinOp::Concat => {
                let parts = [left, right.clone()];
                self.string_combine(&parts)
            }
            BinOp::Plus => {
                if left.hint == ValueHint::Arr || right.hint == ValueHint::Arr {
                    let mut out = left;
                    out.taint.array_plus(&right.taint);
                    out.links.merge_with(&right.links);
                    out.trail.merge_with(&right.trail);
                    out.hint = ValueHint::Arr;
                    out.obj_class = None;
                    out
                } else {
                    Eval::safe_hinted(ValueHint::Int)
                }
            }
            BinOp::Arith => Eval::safe_hinted(ValueHint::Int),
            BinOp::Compare | BinOp::Logic => Eval::safe_hinted(ValueHint::Bool),
            BinOp::Coalesce => {
                let mut out = left;
                out.merge_with(right);
                out
            }
        }
    }

    /// Concatenation-style combination: flags of every part OR'd together,
    /// shape erased, links flattened. Strings cannot carry the numkey bit.
    pub(crate) fn string_combine(&mut self, parts: &[Eval]) -> Eval {
        let mut flags = TaintFlags::SAFE;
        let mut out = Eval::safe_hinted(ValueHint::Str);
        for part in parts {
            flags |= part.taint.collapse().subtract(TaintFlags::SQL_NUMKEY);
            out.trail.merge_with(&part.trail);
            out.links.links.merge_with(&part.links.collapse_to_set());
        }
        out.taint = Taintedness::of(flags);
        out
    }

    fn merge_branch_states(&mut self, mut states: Vec<Scope>) {
        let Some(mut merged) = states.pop() else {
            return;
        };
        for state in &states {
            merged.join_with(state);
        }
        *self.cur_scope_mut() = merged;
    }

    /// Loop prelude: one-shot widening. The body runs once against a scratch
    /// state to discover loop-carried taint, the discovered state is joined
    /// into the pre-state, then the body runs for real.
    fn visit_loop_body(&mut self, body: &Node, bind: Option<&ForeachBinding<'_>>) {
        let before = self.cur_scope().clone();
        self.apply_foreach_binding(bind);
        self.visit(body);
        let mut widened = self.cur_scope().clone();
        widened.join_with(&before);
        *self.cur_scope_mut() = widened;

        self.apply_foreach_binding(bind);
        self.visit(body);
        let mut after = self.cur_scope().clone();
        after.join_with(&before);
        *self.cur_scope_mut() = after;
    }

    fn apply_foreach_binding(&mut self, bind: Option<&ForeachBinding<'_>>) {
        let Some(bind) = bind else { return };
        if let Some(key_var) = bind.key_var {
            let key_eval = Eval {
                taint: bind.key_taint.clone(),
                trail: bind.value.trail.clone(),
                ..Eval::default()
            };
            self.write_lvalue(key_var, key_eval, true, &key_var.meta);
        }
        self.write_lvalue(
            bind.value_var,
            bind.value.clone(),
            true,
            &bind.value_var.meta,
        );
    }

    // ---- sink protocol ----

    pub(crate) fn check_sink(
        &mut self,
        value: &Eval,
        sink_flags: TaintFlags,
        meta: &Meta,
        label: &str,
    ) {
        let sink = Taintedness::of(sink_flags);
        self.check_sink_shaped(value, &sink, meta, None, label);
    }

    /// The sink protocol: flag a violation, or teach the contracts of every
    /// linked parameter that this position sinks.
    pub(crate) fn check_sink_shaped(
        &mut self,
        value: &Eval,
        sink: &Taintedness,
        meta: &Meta,
        callee_trail: Option<&CausedByLines>,
        label: &str,
    ) {
        let exec_flags = sink.collapse().only_exec();
        if exec_flags.is_empty() {
            return;
        }
        let dangerous = Taintedness::intersect_for_sink(sink, &value.taint).collapse();
        if !dangerous.is_empty() {
            let mut trail = value.trail.clone();
            if let Some(callee_trail) = callee_trail {
                trail.merge_with(callee_trail);
            }
            self.emit_finding(dangerous, meta, &trail, label);
            return;
        }
        // Not dangerous here, but derived from parameters: back-propagate the
        // sink into those functions' contracts.
        let links = value.links.collapse_to_set();
        for (func, param, filter) in links.iter() {
            let learned = exec_flags.intersect(filter.yes_to_exec());
            if learned.is_empty() {
                continue;
            }
            let mut lines = value.trail.filtered_for(func, param);
            lines.add(
                &meta.file,
                meta.line,
                learned.exec_to_yes(),
                &LinksSet::default(),
            );
            self.contracts.add_param_sink(func, param, learned, &lines);
        }
    }

    pub(crate) fn emit_finding(
        &mut self,
        dangerous: TaintFlags,
        meta: &Meta,
        trail: &CausedByLines,
        label: &str,
    ) {
        let key = (meta.file.clone(), meta.line, dangerous.bits());
        if !self.seen_findings.insert(key) {
            return;
        }
        let finding = Finding {
            category: self.category_slug(dangerous),
            file: meta.file.clone(),
            line: meta.line,
            message: self.finding_message(dangerous, label),
            caused_by: trail
                .iter()
                .map(|line| TrailPoint {
                    file: line.file.clone(),
                    line: line.line,
                })
                .collect(),
        };
        if let Some(hook) = &self.config.false_positive_hook {
            if hook(&finding) {
                debug!("finding suppressed by hook at {}:{}", meta.file, meta.line);
                return;
            }
        }
        self.findings.push(finding);
    }

    fn category_slug(&self, dangerous: TaintFlags) -> String {
        if dangerous.intersects(TaintFlags::ESCAPED) {
            return "double-escape".into();
        }
        for (name, flag) in [
            ("html", TaintFlags::HTML),
            ("sql", TaintFlags::SQL),
            ("shell", TaintFlags::SHELL),
            ("serialize", TaintFlags::SERIALIZE),
            ("sql_numkey", TaintFlags::SQL_NUMKEY),
            ("misc", TaintFlags::MISC),
        ] {
            if dangerous.intersects(flag) {
                return name.into();
            }
        }
        if dangerous.intersects(TaintFlags::CUSTOM1) {
            return self.config.custom1_name.clone();
        }
        if dangerous.intersects(TaintFlags::CUSTOM2) {
            return self.config.custom2_name.clone();
        }
        "misc".into()
    }

    fn finding_message(&self, dangerous: TaintFlags, label: &str) -> String {
        let what = if dangerous.intersects(TaintFlags::ESCAPED) {
            "an already-escaped value is escaped again"
        } else if dangerous.intersects(TaintFlags::HTML) {
            "user-controlled data reaches HTML output"
        } else if dangerous.intersects(TaintFlags::SQL) {
            "user-controlled data reaches an SQL query"
        } else if dangerous.intersects(TaintFlags::SHELL) {
            "user-controlled data reaches shell execution"
        } else if dangerous.intersects(TaintFlags::SERIALIZE) {
            "user-controlled data reaches deserialization"
        } else {
            "user-controlled data reaches a sensitive sink"
        };
        format!("{what} via {label}")
    }

    // ---- return handling ----

    fn handle_return(&mut self, expr: Option<&Node>, meta: &Meta) -> Eval {
        let eval = match expr {
            Some(expr) => self.visit(expr),
            None => Eval::safe(),
        };
        let Some(&func) = self.func_stack.last() else {
            // Top-level return: the value goes to the including file.
            return Eval::inapplicable();
        };
        // Returns carry value taint, not sink taint. A numerically-typed
        // return cannot carry string-borne taint at all, own or preserved.
        let numeric_return = self
            .return_hints
            .last()
            .copied()
            .unwrap_or(ValueHint::Unknown)
            .is_scalar_numeric();
        let mut ret = if numeric_return {
            Taintedness::safe()
        } else {
            eval.taint.without_exec()
        };
        ret.flags = ret.flags.subtract(TaintFlags::INAPPLICABLE);

        let arity = self
            .registry
            .func(func)
            .def
            .as_ref()
            .map(|def| def.params.len())
            .unwrap_or(0);
        let mut taint = FunctionTaintedness::safe_with_arity(arity);
        taint.overall = ret.clone();
        if !numeric_return {
            for index in 0..arity {
                let mask = eval.links.preserved_for_param(func, index);
                if !mask.is_safe() {
                    taint.preserved[index] = PreservedTaintedness::from_mask(mask);
                }
            }
        }
        self.contracts.merge_taint(func, &taint);

        let mut generic = eval.trail.clone();
        generic.add(&meta.file, meta.line, ret.collapse(), &LinksSet::default());
        self.contracts.merge_generic_trail(func, &generic);
        for index in 0..arity {
            let filtered = eval.trail.filtered_for(func, index);
            if !filtered.is_empty() {
                self.contracts
                    .add_param_sink(func, index, TaintFlags::SAFE, &filtered);
            }
        }
        Eval::inapplicable()
    }

    // ---- function-body analysis ----

    /// Analyze a function's body once per pass, installing a safe contract
    /// first so recursive references terminate.
    pub(crate) fn ensure_analyzed(&mut self, func: FuncId) {
        if self.analyzing.contains(&func) || self.analyzed_this_pass.contains(&func) {
            return;
        }
        let Some(def) = self.registry.func(func).def.clone() else {
            self.ensure_contract(func);
            return;
        };
        self.analyzed_this_pass.insert(func);
        self.analyze_function_body(func, &def, &[]);
    }

    pub(crate) fn analyze_function_body(
        &mut self,
        func: FuncId,
        def: &FunctionDef,
        captures: &[(String, VarAnnotations)],
    ) {
        if self.analyzing.contains(&func) {
            return;
        }
        self.analyzing.insert(func);
        self.ensure_contract(func);

        let mut scope = Scope::default();
        for (index, param) in def.params.iter().enumerate() {
            let mut ann = VarAnnotations {
                links: MethodLinks::single(func, index),
                ..VarAnnotations::default()
            };
            if let Some(hint) = &param.type_hint {
                if ValueHint::from_type_hint(hint) == ValueHint::Obj {
                    ann.obj_class = Some(hint.trim_start_matches('?').to_string());
                }
            }
            scope.vars.insert(param.name.clone(), ann);
        }
        for (name, ann) in captures {
            scope.vars.insert(name.clone(), ann.clone());
        }

        let class = self.registry.func(func).name.clone();
        let pushed_class = match class.split_once("::") {
            Some((class, _)) => {
                self.class_stack.push(class.to_string());
                true
            }
            None => false,
        };
        self.locals.push(scope);
        self.func_stack.push(func);
        self.return_hints.push(
            def.return_hint
                .as_deref()
                .map(ValueHint::from_type_hint)
                .unwrap_or(ValueHint::Unknown),
        );

        for stmt in &def.body {
            self.visit(stmt);
        }

        self.return_hints.pop();
        self.func_stack.pop();
        let scope = self.locals.pop().unwrap_or_default();
        if pushed_class {
            self.class_stack.pop();
        }

        // By-reference parameters: remember what the callee left behind so
        // call sites can write it back in argument order.
        for (index, param) in def.params.iter().enumerate() {
            if param.by_ref {
                let (taint, trail) = scope
                    .get(&param.name)
                    .map(|ann| (ann.taint.clone(), ann.trail.clone()))
                    .unwrap_or_default();
                self.contracts.record_ref_param(func, index, taint, &trail);
            }
        }
        self.analyzing.remove(&func);
    }

    /// Create the contract for a callable if absent: builtin table entries
    /// are installed at startup, docblock annotations win over inference,
    /// everything else starts safe.
    pub(crate) fn ensure_contract(&mut self, func: FuncId) {
        if self.contracts.contains(func) {
            return;
        }
        let info = self.registry.func(func);
        let Some(def) = &info.def else {
            self.contracts.ensure(func, 0);
            return;
        };
        if let Some(contract) = crate::docblock::contract_from_doc(def) {
            self.contracts.install(func, contract);
            return;
        }
        let arity = def.params.len();
        let mut taint = FunctionTaintedness::safe_with_arity(arity);
        if def.params.last().is_some_and(|p| p.variadic) {
            taint.variadic = Some((arity - 1, Taintedness::safe()));
        }
        self.contracts.install(
            func,
            crate::contracts::FunctionContract {
                taint,
                trail: taint::FunctionCausedByLines::with_arity(arity),
                locked: false,
            },
        );
    }

    pub(crate) fn register_closure(&mut self, def: &FunctionDef, meta: &Meta) -> FuncId {
        let key = format!("{{closure@{}:{}}}", meta.file, meta.line);
        self.registry.register_function(&key, def.clone())
    }
}

struct ForeachBinding<'n> {
    key_var: Option<&'n Node>,
    value_var: &'n Node,
    key_taint: Taintedness,
    value: Eval,
}

pub(crate) fn flatten_links(links: &MethodLinks) -> MethodLinks {
    MethodLinks {
        links: links.collapse_to_set(),
        ..MethodLinks::default()
    }
}
