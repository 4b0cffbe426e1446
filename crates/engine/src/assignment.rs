//! The assignment visitor.
//!
//! Walks complex left-hand sides (nested subscripts, property writes,
//! destructuring, reference binding) and writes the computed triple into the
//! symbol annotations with shape-aware merge or override.
//!
//! Reference binding is copy-at-bind: `$a = &$b` copies `$b`'s annotations
//! into `$a` once; later writes to either side do not propagate to the
//! other. Known limitation, kept deliberately.

use crate::visitor::{flatten_links, prop_key, scalar_key, Eval};
use crate::Analyzer;
use ir::{BinOp, Meta, Node, NodeKind, ValueHint};
use taint::{OffsetKey, TaintFlags};

/// Where a write path bottoms out.
enum LvalueRoot {
    Var(String),
    Prop(String),
    None,
}

impl Analyzer {
    pub(crate) fn handle_assign(
        &mut self,
        target: &Node,
        value: &Node,
        op: Option<BinOp>,
        by_ref: bool,
        meta: &Meta,
    ) -> Eval {
        let mut rhs = self.visit(value);
        if let Some(op) = op {
            // Augmented op: the existing value participates per operator
            // rules, then the combined result overrides.
            let current = self.visit(target);
            rhs = self.combine_binary(op, current, &rhs);
        }
        Self::note_line(&mut rhs, meta);
        // Reference binding shares nothing after the copy; the write itself
        // is an override either way.
        let _ = by_ref;
        self.write_lvalue(target, rhs.clone(), op.is_none(), meta);
        rhs
    }

    /// Shape-aware write of `eval` into the l-value `target`.
    pub(crate) fn write_lvalue(
        &mut self,
        target: &Node,
        eval: Eval,
        override_: bool,
        meta: &Meta,
    ) {
        match &target.kind {
            NodeKind::Var(name) => {
                let entry = self.cur_scope_mut().entry(name);
                if override_ {
                    entry.taint = eval.taint;
                    entry.trail = eval.trail;
                    entry.links = eval.links;
                    entry.obj_class = eval.obj_class;
                } else {
                    entry.taint.merge_with(&eval.taint);
                    entry.trail.merge_with(&eval.trail);
                    entry.links.merge_with(&eval.links);
                }
            }
            NodeKind::Subscript { .. } => {
                self.write_subscript_path(target, eval, override_, meta);
            }
            NodeKind::Prop { object, name } => {
                let obj = self.visit(object);
                let (Some(class), Some(name)) = (obj.obj_class, name) else {
                    return;
                };
                let entry = self.props.entry(&prop_key(&class, name));
                if override_ {
                    entry.taint = eval.taint;
                    entry.trail = eval.trail;
                    entry.links = eval.links;
                } else {
                    entry.taint.merge_with(&eval.taint);
                    entry.trail.merge_with(&eval.trail);
                    entry.links.merge_with(&eval.links);
                }
            }
            NodeKind::StaticProp { class, name } => {
                let entry = self.props.entry(&prop_key(class, name));
                if override_ {
                    entry.taint = eval.taint;
                    entry.trail = eval.trail;
                    entry.links = eval.links;
                } else {
                    entry.taint.merge_with(&eval.taint);
                    entry.trail.merge_with(&eval.trail);
                    entry.links.merge_with(&eval.links);
                }
            }
            // Destructuring: each slot receives the projection at its key.
            NodeKind::ArrayLit(entries) => {
                let mut next_index: i64 = 0;
                for entry in entries {
                    let key = match &entry.key {
                        Some(key_node) => scalar_key(key_node),
                        None => {
                            let key = OffsetKey::Int(next_index);
                            next_index += 1;
                            Some(key)
                        }
                    };
                    let slot = Eval {
                        taint: eval.taint.project(key.as_ref()),
                        links: eval.links.project(key.as_ref()),
                        trail: eval.trail.clone(),
                        hint: ValueHint::Unknown,
                        obj_class: None,
                    };
                    self.write_lvalue(&entry.value, slot, override_, meta);
                }
            }
            // Not an assignable shape; nothing to record.
            _ => {}
        }
    }

    /// Collect the key path of a nested subscript write and apply it to the
    /// root symbol's annotations.
    fn write_subscript_path(&mut self, target: &Node, eval: Eval, override_: bool, meta: &Meta) {
        let mut keys: Vec<Option<OffsetKey>> = Vec::new();
        let mut key_taints: Vec<TaintFlags> = Vec::new();
        let mut node = target;
        let root = loop {
            match &node.kind {
                NodeKind::Subscript { base, index } => {
                    let key = index.as_deref().and_then(scalar_key);
                    let key_taint = match index {
                        Some(index) if key.is_none() => {
                            self.visit(index).taint.collapse().only_yes()
                        }
                        _ => TaintFlags::SAFE,
                    };
                    keys.push(key);
                    key_taints.push(key_taint);
                    node = base;
                }
                NodeKind::Var(name) => break LvalueRoot::Var(name.clone()),
                NodeKind::Prop { object, name } => {
                    let obj = self.visit(object);
                    match (obj.obj_class, name) {
                        (Some(class), Some(name)) => {
                            break LvalueRoot::Prop(prop_key(&class, name))
                        }
                        _ => break LvalueRoot::None,
                    }
                }
                NodeKind::StaticProp { class, name } => {
                    break LvalueRoot::Prop(prop_key(class, name))
                }
                _ => break LvalueRoot::None,
            }
        };
        // Collected innermost-last; the write descends outermost-first.
        keys.reverse();
        key_taints.reverse();

        let value_hint = eval.hint;
        let value_collapsed = eval.taint.collapse();
        let entry = match &root {
            LvalueRoot::Var(name) => self.cur_scope_mut().entry(name),
            LvalueRoot::Prop(key) => self.props.entry(key),
            LvalueRoot::None => return,
        };
        entry
            .taint
            .set_at_path(&keys, &key_taints, eval.taint, override_);
        entry
            .links
            .set_at_path(&keys, flatten_links(&eval.links), override_);
        entry.trail.merge_with(&eval.trail);
        entry.trail.add(
            &meta.file,
            meta.line,
            value_collapsed,
            &eval.links.collapse_to_set(),
        );

        // Writing a tainted string at an integer key makes the base array an
        // SQL-fragment carrier; recompute the numkey bit on the root.
        if keys.len() == 1 {
            let int_key = matches!(keys[0], Some(OffsetKey::Int(_)) | None);
            if int_key
                && value_collapsed.contains(TaintFlags::SQL)
                && value_hint.maybe_string()
            {
                entry.taint.add_flags(TaintFlags::SQL_NUMKEY);
            }
        }
    }
}
