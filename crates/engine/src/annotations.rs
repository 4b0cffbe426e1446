//! Symbol annotations and scopes.
//!
//! The analyzer never attaches state to AST nodes; every variable, parameter
//! and property gets an [`VarAnnotations`] record in a side table keyed by
//! symbol name. Scopes are plain maps: one global scope, one per function
//! body being analyzed, plus a process-wide property table keyed
//! `Class::$prop`.

use std::collections::HashMap;
use taint::{CausedByLines, MethodLinks, TaintFlags, Taintedness};

/// The `(taintedness, cause-trail, links)` triple stored per symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarAnnotations {
    pub taint: Taintedness,
    pub trail: CausedByLines,
    pub links: MethodLinks,
    /// Class of the object held by this symbol, when statically evident.
    pub obj_class: Option<String>,
}

impl VarAnnotations {
    pub fn join_with(&mut self, other: &VarAnnotations) {
        self.taint.merge_with(&other.taint);
        self.trail.merge_with(&other.trail);
        self.links.merge_with(&other.links);
        if self.obj_class != other.obj_class {
            self.obj_class = None;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub vars: HashMap<String, VarAnnotations>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&VarAnnotations> {
        self.vars.get(name)
    }

    pub fn entry(&mut self, name: &str) -> &mut VarAnnotations {
        self.vars.entry(name.to_string()).or_default()
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    /// Branch-merge hook: OR taint, union links and trails per variable.
    /// A variable missing on one side keeps the other side's annotations;
    /// the join of "unset" and a value is the value.
    pub fn join_with(&mut self, other: &Scope) {
        for (name, ann) in &other.vars {
            match self.vars.get_mut(name) {
                Some(existing) => existing.join_with(ann),
                None => {
                    self.vars.insert(name.clone(), ann.clone());
                }
            }
        }
    }
}

/// Flags user input carries: every category except the two bookkeeping ones
/// (numkey is array-structural, escaped is an escaper's certificate).
pub fn input_taint() -> TaintFlags {
    TaintFlags::ALL_YES
        .subtract(TaintFlags::SQL_NUMKEY)
        .subtract(TaintFlags::ESCAPED)
}

/// Taint of the well-known input superglobals, or `None` for ordinary names.
///
/// The file-upload superglobal is shaped: client-controlled sub-keys are
/// tainted, the server-assigned ones are not.
pub fn superglobal_taint(name: &str) -> Option<Taintedness> {
    match name {
        "_GET" | "_POST" | "_REQUEST" | "_COOKIE" | "_SERVER" | "_SESSION" | "_ENV" | "argv"
        | "argc" | "GLOBALS" | "http_response_header" => {
            let input = input_taint();
            let mut taint = Taintedness::of(input);
            taint.key_flags = input;
            taint.unknown = Some(Box::new(Taintedness::of(input)));
            Some(taint)
        }
        "_FILES" => {
            let input = input_taint();
            let mut entry = Taintedness::safe();
            for key in ["name", "type"] {
                entry.set_at(
                    Some(taint::OffsetKey::Str(key.into())),
                    Taintedness::of(input),
                    true,
                );
            }
            for key in ["tmp_name", "error", "size"] {
                entry.set_at(Some(taint::OffsetKey::Str(key.into())), Taintedness::safe(), true);
            }
            entry.key_flags = input;
            let mut taint = Taintedness::safe();
            taint.key_flags = input;
            taint.unknown = Some(Box::new(entry));
            Some(taint)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taint::OffsetKey;

    #[test]
    fn superglobals_are_fully_tainted() {
        let get = superglobal_taint("_GET").expect("_GET");
        assert!(get
            .project(Some(&OffsetKey::Str("q".into())))
            .collapse()
            .contains(TaintFlags::HTML | TaintFlags::SQL));
        assert!(superglobal_taint("not_a_superglobal").is_none());
    }

    #[test]
    fn upload_superglobal_is_shaped() {
        let files = superglobal_taint("_FILES").expect("_FILES");
        let entry = files.project(None);
        assert!(entry
            .project(Some(&OffsetKey::Str("name".into())))
            .collapse()
            .contains(TaintFlags::HTML));
        assert!(entry
            .project(Some(&OffsetKey::Str("tmp_name".into())))
            .collapse()
            .is_empty());
    }

    #[test]
    fn scope_join_keeps_single_sided_vars() {
        let mut a = Scope::default();
        a.entry("x").taint = Taintedness::of(TaintFlags::HTML);
        let mut b = Scope::default();
        b.entry("y").taint = Taintedness::of(TaintFlags::SQL);
        a.join_with(&b);
        assert!(a.get("x").unwrap().taint.collapse().contains(TaintFlags::HTML));
        assert!(a.get("y").unwrap().taint.collapse().contains(TaintFlags::SQL));
    }
}
