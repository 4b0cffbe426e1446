//! Per-function taint contracts.
//!
//! A contract records everything a call site needs to know about a callee:
//! the taint of its return value, the sink behaviour of each positional
//! parameter, which categories of each argument survive into the return
//! value, and the taint left behind in by-reference parameters. Contracts
//! are monotone: re-analysis may add bits, never remove them, so the
//! fixpoint driver terminates.

use crate::flags::TaintFlags;
use crate::taintedness::Taintedness;
use crate::trail::CausedByLines;
use serde::{Deserialize, Serialize};

/// Which categories of a parameter's taint appear in the return value.
///
/// Stored as a taintedness-shaped mask: flags at each position name the
/// argument categories that flow into that position of the return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservedTaintedness {
    pub mask: Taintedness,
}

impl PreservedTaintedness {
    pub fn none() -> Self {
        Self::default()
    }

    /// The whole argument passes through unchanged.
    pub fn whole() -> Self {
        Self {
            mask: Taintedness::of(TaintFlags::ALL_YES),
        }
    }

    /// Pass through everything except the given categories.
    pub fn except(categories: TaintFlags) -> Self {
        Self {
            mask: Taintedness::of(TaintFlags::ALL_YES.subtract(categories.only_yes())),
        }
    }

    pub fn from_mask(mask: Taintedness) -> Self {
        Self { mask }
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_safe()
    }

    pub fn merge_with(&mut self, other: &PreservedTaintedness) {
        self.mask.merge_with(&other.mask);
    }

    /// The contribution of an argument with taint `value` to the return
    /// value of the callee.
    pub fn apply_to(&self, value: &Taintedness) -> Taintedness {
        let collapsed = value.collapse().only_yes();
        self.apply_collapsed(collapsed)
    }

    fn apply_collapsed(&self, collapsed: TaintFlags) -> Taintedness {
        let mut out = Taintedness::of(self.mask.flags.intersect(collapsed));
        for (key, child) in &self.mask.known {
            let contribution = PreservedTaintedness { mask: child.clone() }.apply_collapsed(collapsed);
            if !contribution.is_safe() {
                out.known.insert(key.clone(), contribution);
            }
        }
        if let Some(unknown) = &self.mask.unknown {
            let contribution =
                PreservedTaintedness { mask: (**unknown).clone() }.apply_collapsed(collapsed);
            if !contribution.is_safe() {
                out.unknown = Some(Box::new(contribution));
            }
        }
        out
    }
}

/// Taint summary of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTaintedness {
    /// Taint of the return value independent of any argument.
    pub overall: Taintedness,
    /// Sink behaviour of each positional parameter (EXEC bits live here).
    pub params: Vec<Taintedness>,
    /// Sink behaviour of the variadic tail, with its starting index.
    pub variadic: Option<(usize, Taintedness)>,
    /// Per-parameter flow into the return value.
    pub preserved: Vec<PreservedTaintedness>,
    /// Taint left in by-reference parameters when the callee returns.
    pub ref_params: Vec<Option<Taintedness>>,
}

impl FunctionTaintedness {
    pub fn safe_with_arity(arity: usize) -> Self {
        Self {
            overall: Taintedness::safe(),
            params: vec![Taintedness::safe(); arity],
            variadic: None,
            preserved: vec![PreservedTaintedness::none(); arity],
            ref_params: vec![None; arity],
        }
    }

    fn grow_to(&mut self, arity: usize) {
        if self.params.len() < arity {
            self.params.resize_with(arity, Taintedness::safe);
            self.preserved
                .resize_with(arity, PreservedTaintedness::none);
            self.ref_params.resize_with(arity, || None);
        }
    }

    /// Sink flags applying at argument position `index`, falling back to the
    /// variadic tail.
    pub fn param_sink(&self, index: usize) -> Option<&Taintedness> {
        if let Some(param) = self.params.get(index) {
            return Some(param);
        }
        match &self.variadic {
            Some((start, taint)) if index >= *start => Some(taint),
            _ => None,
        }
    }

    pub fn preserved_for(&self, index: usize) -> Option<&PreservedTaintedness> {
        self.preserved.get(index)
    }

    pub fn add_param_sink(&mut self, index: usize, flags: TaintFlags) {
        self.grow_to(index + 1);
        self.params[index].add_flags(flags);
    }

    pub fn set_preserved(&mut self, index: usize, preserved: PreservedTaintedness) {
        self.grow_to(index + 1);
        self.preserved[index].merge_with(&preserved);
    }

    pub fn record_ref_param(&mut self, index: usize, taint: Taintedness) {
        self.grow_to(index + 1);
        match &mut self.ref_params[index] {
            Some(existing) => existing.merge_with(&taint),
            slot => *slot = Some(taint),
        }
    }

    /// Monotone join; reports whether any bit was added.
    pub fn merge_with(&mut self, other: &FunctionTaintedness) -> bool {
        let before = self.clone();
        self.grow_to(other.params.len());
        self.overall.merge_with(&other.overall);
        for (index, param) in other.params.iter().enumerate() {
            self.params[index].merge_with(param);
        }
        match (&mut self.variadic, &other.variadic) {
            (Some((start, taint)), Some((other_start, other_taint))) => {
                *start = (*start).min(*other_start);
                taint.merge_with(other_taint);
            }
            (slot @ None, Some(variadic)) => *slot = Some(variadic.clone()),
            _ => {}
        }
        for (index, preserved) in other.preserved.iter().enumerate() {
            self.preserved[index].merge_with(preserved);
        }
        for (index, ref_taint) in other.ref_params.iter().enumerate() {
            if let Some(taint) = ref_taint {
                match &mut self.ref_params[index] {
                    Some(existing) => existing.merge_with(taint),
                    slot => *slot = Some(taint.clone()),
                }
            }
        }
        *self != before
    }
}

/// Cause trails stored alongside a function contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCausedByLines {
    /// Lines explaining the overall return taint.
    pub generic: CausedByLines,
    /// Lines explaining each parameter's sink flags.
    pub params: Vec<CausedByLines>,
}

impl FunctionCausedByLines {
    pub fn with_arity(arity: usize) -> Self {
        Self {
            generic: CausedByLines::new(),
            params: vec![CausedByLines::new(); arity],
        }
    }

    pub fn param_mut(&mut self, index: usize) -> &mut CausedByLines {
        if self.params.len() <= index {
            self.params.resize_with(index + 1, CausedByLines::new);
        }
        &mut self.params[index]
    }

    pub fn param(&self, index: usize) -> Option<&CausedByLines> {
        self.params.get(index)
    }

    pub fn merge_with(&mut self, other: &FunctionCausedByLines) {
        self.generic.merge_with(&other.generic);
        for (index, lines) in other.params.iter().enumerate() {
            self.param_mut(index).merge_with(lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taintedness::OffsetKey;

    #[test]
    fn contracts_merge_monotonically() {
        let mut contract = FunctionTaintedness::safe_with_arity(2);
        let mut refinement = FunctionTaintedness::safe_with_arity(2);
        refinement.add_param_sink(0, TaintFlags::HTML_EXEC);

        assert!(contract.merge_with(&refinement));
        assert!(contract.params[0].flags.contains(TaintFlags::HTML_EXEC));
        // Re-merging the same refinement changes nothing.
        assert!(!contract.merge_with(&refinement));
    }

    #[test]
    fn merge_never_drops_bits() {
        let mut contract = FunctionTaintedness::safe_with_arity(1);
        contract.add_param_sink(0, TaintFlags::SQL_EXEC);
        let empty = FunctionTaintedness::safe_with_arity(1);
        contract.merge_with(&empty);
        assert!(contract.params[0].flags.contains(TaintFlags::SQL_EXEC));
    }

    #[test]
    fn variadic_position_catches_trailing_args() {
        let mut contract = FunctionTaintedness::safe_with_arity(1);
        contract.variadic = Some((1, Taintedness::of(TaintFlags::SHELL_EXEC)));
        assert!(contract.param_sink(0).is_some());
        assert!(contract
            .param_sink(5)
            .is_some_and(|t| t.flags.contains(TaintFlags::SHELL_EXEC)));
    }

    #[test]
    fn preserved_masks_argument_categories() {
        let preserved = PreservedTaintedness::except(TaintFlags::HTML);
        let arg = Taintedness::of(TaintFlags::HTML | TaintFlags::SQL);
        let out = preserved.apply_to(&arg);
        assert!(out.collapse().contains(TaintFlags::SQL));
        assert!(!out.collapse().contains(TaintFlags::HTML));
    }

    #[test]
    fn preserved_shape_places_contributions() {
        let mut mask = Taintedness::safe();
        mask.set_at(
            Some(OffsetKey::Str("wrapped".into())),
            Taintedness::of(TaintFlags::ALL_YES),
            true,
        );
        let preserved = PreservedTaintedness::from_mask(mask);
        let arg = Taintedness::of(TaintFlags::HTML);
        let out = preserved.apply_to(&arg);
        assert!(out.flags.is_empty());
        assert!(out
            .project(Some(&OffsetKey::Str("wrapped".into())))
            .collapse()
            .contains(TaintFlags::HTML));
    }
}
