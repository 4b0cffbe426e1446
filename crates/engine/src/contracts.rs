//! The contract store.
//!
//! One [`FunctionContract`] per interned callable. Refinements go through
//! this store so monotonicity and the `NO_OVERRIDE` lock are enforced in one
//! place, and so the fixpoint driver can ask "did anything change this
//! pass?".

use std::collections::HashMap;
use taint::{
    CausedByLines, FuncId, FunctionCausedByLines, FunctionTaintedness, TaintFlags, Taintedness,
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct FunctionContract {
    pub taint: FunctionTaintedness,
    pub trail: FunctionCausedByLines,
    /// Locked contracts (builtins, docblock annotations without
    /// `allow_override`) are never refined by inference.
    pub locked: bool,
}

#[derive(Debug, Default)]
pub struct ContractStore {
    map: HashMap<FuncId, FunctionContract>,
    changed: bool,
}

impl ContractStore {
    pub fn get(&self, func: FuncId) -> Option<&FunctionContract> {
        self.map.get(&func)
    }

    pub fn contains(&self, func: FuncId) -> bool {
        self.map.contains_key(&func)
    }

    /// Install a safe contract if none exists. Recursive references resolve
    /// against this default and refine it later.
    pub fn ensure(&mut self, func: FuncId, arity: usize) -> &mut FunctionContract {
        self.map.entry(func).or_insert_with(|| FunctionContract {
            taint: FunctionTaintedness::safe_with_arity(arity),
            trail: FunctionCausedByLines::with_arity(arity),
            locked: false,
        })
    }

    /// Install a pre-built contract (builtin table, docblock annotation),
    /// replacing any inferred one.
    pub fn install(&mut self, func: FuncId, contract: FunctionContract) {
        self.map.insert(func, contract);
    }

    /// Monotone refinement of a function's taint; no-op on locked contracts.
    pub fn merge_taint(&mut self, func: FuncId, taint: &FunctionTaintedness) {
        self.ensure(func, taint.params.len());
        let contract = self.map.get_mut(&func).expect("just ensured");
        if contract.locked {
            return;
        }
        if contract.taint.merge_with(taint) {
            debug!("contract refined for func #{}", func.0);
            self.changed = true;
        }
    }

    /// Teach a parameter that it flows into a sink of `flags`.
    pub fn add_param_sink(
        &mut self,
        func: FuncId,
        index: usize,
        flags: TaintFlags,
        lines: &CausedByLines,
    ) {
        self.ensure(func, index + 1);
        let contract = self.map.get_mut(&func).expect("just ensured");
        if contract.locked {
            return;
        }
        let before = contract.taint.param_sink(index).cloned();
        contract.taint.add_param_sink(index, flags);
        let changed = before.as_ref() != contract.taint.param_sink(index);
        contract.trail.param_mut(index).merge_with(lines);
        if changed {
            self.changed = true;
        }
    }

    /// Record the taint a callee leaves in a by-reference parameter.
    pub fn record_ref_param(
        &mut self,
        func: FuncId,
        index: usize,
        taint: Taintedness,
        lines: &CausedByLines,
    ) {
        self.ensure(func, index + 1);
        let contract = self.map.get_mut(&func).expect("just ensured");
        if contract.locked {
            return;
        }
        let before = contract.taint.ref_params.get(index).cloned().flatten();
        contract.taint.record_ref_param(index, taint);
        let changed = before.as_ref() != contract.taint.ref_params[index].as_ref();
        contract.trail.param_mut(index).merge_with(lines);
        if changed {
            self.changed = true;
        }
    }

    pub fn merge_generic_trail(&mut self, func: FuncId, lines: &CausedByLines) {
        let contract = self.ensure(func, 0);
        contract.trail.generic.merge_with(lines);
    }

    /// True when any contract gained bits since the last reset.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FuncId, &FunctionContract)> {
        self.map.iter().map(|(&func, contract)| (func, contract))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_tracking_resets() {
        let mut store = ContractStore::default();
        let func = FuncId(0);
        store.add_param_sink(func, 0, TaintFlags::HTML_EXEC, &CausedByLines::new());
        assert!(store.take_changed());
        assert!(!store.take_changed());
        // Same bits again: no change.
        store.add_param_sink(func, 0, TaintFlags::HTML_EXEC, &CausedByLines::new());
        assert!(!store.take_changed());
    }

    #[test]
    fn locked_contracts_resist_refinement() {
        let mut store = ContractStore::default();
        let func = FuncId(1);
        store.install(
            func,
            FunctionContract {
                taint: FunctionTaintedness::safe_with_arity(1),
                trail: FunctionCausedByLines::with_arity(1),
                locked: true,
            },
        );
        store.add_param_sink(func, 0, TaintFlags::SQL_EXEC, &CausedByLines::new());
        assert!(!store.take_changed());
        assert!(store
            .get(func)
            .unwrap()
            .taint
            .param_sink(0)
            .unwrap()
            .flags
            .is_empty());
    }
}
