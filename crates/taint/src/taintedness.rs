//! Shape-preserving taintedness values.
//!
//! A [`Taintedness`] records the taint of a value at its own depth plus the
//! taint of every reachable sub-offset: literal keys it knows about, a
//! catch-all for offsets that could not be resolved, and the taint carried
//! by the keys themselves. All propagation arithmetic lives here; the
//! visitor only ever combines these values.
//!
//! Values follow value semantics: they are cloned whenever stored into a
//! symbol and treated as immutable once published. Sharing mutable children
//! between two symbols is a bug.

use crate::flags::TaintFlags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Structural recursion limit. Writes past this depth collapse into the
/// unknown-offset child so pathological nesting cannot run away.
pub const MAX_SHAPE_DEPTH: usize = 20;

/// A literal array key the analysis could resolve.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OffsetKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetKey::Int(i) => write!(f, "{i}"),
            OffsetKey::Str(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Taintedness {
    /// Taint attributed to this value at its current depth.
    pub flags: TaintFlags,
    /// Taint carried by the keys at this level.
    pub key_flags: TaintFlags,
    /// Taint of elements at literal keys.
    pub known: BTreeMap<OffsetKey, Taintedness>,
    /// Taint of any element whose key could not be resolved.
    pub unknown: Option<Box<Taintedness>>,
}

impl Taintedness {
    pub fn safe() -> Self {
        Self::default()
    }

    pub fn of(flags: TaintFlags) -> Self {
        Self {
            flags: flags.normalized(),
            ..Self::default()
        }
    }

    pub fn unknown_value() -> Self {
        Self::of(TaintFlags::UNKNOWN)
    }

    pub fn add_flags(&mut self, flags: TaintFlags) {
        self.flags |= flags.normalized();
    }

    /// True when no taint is recorded at any depth.
    pub fn is_safe(&self) -> bool {
        self.collapse().is_empty()
    }

    /// Flatten every depth into a single flag set.
    pub fn collapse(&self) -> TaintFlags {
        let mut out = self.flags | self.key_flags;
        for child in self.known.values() {
            out |= child.collapse();
        }
        if let Some(unknown) = &self.unknown {
            out |= unknown.collapse();
        }
        out
    }

    /// Pointwise join. Commutative, associative, idempotent; merging with a
    /// safe value is the identity.
    pub fn merge_with(&mut self, other: &Taintedness) {
        self.flags |= other.flags;
        self.key_flags |= other.key_flags;
        for (key, child) in &other.known {
            self.known
                .entry(key.clone())
                .or_default()
                .merge_with(child);
        }
        if let Some(other_unknown) = &other.unknown {
            self.unknown
                .get_or_insert_with(Default::default)
                .merge_with(other_unknown);
        }
    }

    pub fn merged(mut self, other: &Taintedness) -> Self {
        self.merge_with(other);
        self
    }

    /// The taint observable when reading this value at `key`. `None` stands
    /// for a key that could not be resolved to a scalar.
    pub fn project(&self, key: Option<&OffsetKey>) -> Taintedness {
        match key {
            None => {
                let mut out = Taintedness::of(self.flags);
                if let Some(unknown) = &self.unknown {
                    out.merge_with(unknown);
                }
                for child in self.known.values() {
                    out.merge_with(child);
                }
                out
            }
            Some(key) => {
                let mut out = Taintedness::of(self.flags);
                if let Some(unknown) = &self.unknown {
                    out.merge_with(unknown);
                }
                if let Some(child) = self.known.get(key) {
                    out.merge_with(child);
                }
                out
            }
        }
    }

    /// Write `child` at `key`, replacing (override) or joining. Siblings are
    /// never touched.
    pub fn set_at(&mut self, key: Option<OffsetKey>, child: Taintedness, override_: bool) {
        match key {
            Some(key) => {
                if override_ {
                    self.known.insert(key, child);
                } else {
                    self.known.entry(key).or_default().merge_with(&child);
                }
            }
            None => {
                // Cannot override: the write may have landed on any offset.
                self.unknown
                    .get_or_insert_with(Default::default)
                    .merge_with(&child);
            }
        }
    }

    /// Write `child` at the end of a key path, autovivifying safe
    /// intermediates. `key_taints` carries the taint of each key expression
    /// and is folded into `key_flags` level by level.
    pub fn set_at_path(
        &mut self,
        keys: &[Option<OffsetKey>],
        key_taints: &[TaintFlags],
        child: Taintedness,
        override_: bool,
    ) {
        self.set_at_path_depth(keys, key_taints, child, override_, 0);
    }

    fn set_at_path_depth(
        &mut self,
        keys: &[Option<OffsetKey>],
        key_taints: &[TaintFlags],
        child: Taintedness,
        override_: bool,
        depth: usize,
    ) {
        let Some((key, rest)) = keys.split_first() else {
            if override_ {
                *self = child;
            } else {
                self.merge_with(&child);
            }
            return;
        };
        if let Some(taint) = key_taints.first() {
            self.key_flags |= taint.only_yes();
        }
        if depth >= MAX_SHAPE_DEPTH {
            let flat = Taintedness::of(child.collapse());
            self.unknown
                .get_or_insert_with(Default::default)
                .merge_with(&flat);
            return;
        }
        let rest_taints = key_taints.get(1..).unwrap_or(&[]);
        if rest.is_empty() {
            self.set_at(key.clone(), child, override_);
        } else {
            match key {
                Some(key) => self
                    .known
                    .entry(key.clone())
                    .or_default()
                    .set_at_path_depth(rest, rest_taints, child, override_, depth + 1),
                None => self
                    .unknown
                    .get_or_insert_with(Default::default)
                    .set_at_path_depth(rest, rest_taints, child, false, depth + 1),
            }
        }
    }

    /// Array union where the left operand wins: known keys already present
    /// keep their child untouched, everything else is copied over.
    pub fn array_plus(&mut self, other: &Taintedness) {
        self.flags |= other.flags;
        self.key_flags |= other.key_flags;
        for (key, child) in &other.known {
            self.known.entry(key.clone()).or_insert_with(|| child.clone());
        }
        if let Some(other_unknown) = &other.unknown {
            self.unknown
                .get_or_insert_with(Default::default)
                .merge_with(other_unknown);
        }
    }

    /// The part of `value` that violates `sink`. The result has the sink's
    /// shape: a sink category at a given level catches that category
    /// occurring anywhere in the corresponding part of the value.
    pub fn intersect_for_sink(sink: &Taintedness, value: &Taintedness) -> Taintedness {
        let mut out = Taintedness {
            flags: sink.flags.exec_to_yes().intersect(value.collapse()),
            key_flags: sink.key_flags.exec_to_yes().intersect(value.key_flags),
            ..Taintedness::default()
        };
        for (key, sink_child) in &sink.known {
            let hit = Self::intersect_for_sink(sink_child, &value.project(Some(key)));
            if !hit.is_safe() {
                out.known.insert(key.clone(), hit);
            }
        }
        if let Some(sink_unknown) = &sink.unknown {
            let hit = Self::intersect_for_sink(sink_unknown, &value.project(None));
            if !hit.is_safe() {
                out.unknown = Some(Box::new(hit));
            }
        }
        out
    }

    /// Remove `other`'s flags wherever both sides have structure. The
    /// unknown-offset child is left alone: escaping cannot be proven to have
    /// reached offsets we never resolved.
    pub fn shape_subtract(&mut self, other: &Taintedness) {
        self.flags = self.flags.subtract(other.flags);
        self.key_flags = self.key_flags.subtract(other.key_flags);
        for (key, other_child) in &other.known {
            if let Some(child) = self.known.get_mut(key) {
                child.shape_subtract(other_child);
            }
        }
    }

    /// Map every flag set through [`TaintFlags::exec_to_yes`].
    pub fn exec_to_yes(&self) -> Taintedness {
        self.map_flags(&TaintFlags::exec_to_yes)
    }

    /// Map every flag set through [`TaintFlags::yes_to_exec`].
    pub fn yes_to_exec(&self) -> Taintedness {
        self.map_flags(&TaintFlags::yes_to_exec)
    }

    /// Drop the sink halves everywhere; returns carry value taint only.
    pub fn without_exec(&self) -> Taintedness {
        self.map_flags(&|f: TaintFlags| f.subtract(TaintFlags::ALL_EXEC))
    }

    /// Intersect every flag set with `mask`, keeping the shape.
    pub fn with_flags_masked(&self, mask: TaintFlags) -> Taintedness {
        self.map_flags(&|f: TaintFlags| f.intersect(mask))
    }

    fn map_flags(&self, f: &impl Fn(TaintFlags) -> TaintFlags) -> Taintedness {
        Taintedness {
            flags: f(self.flags),
            key_flags: f(self.key_flags),
            known: self
                .known
                .iter()
                .map(|(k, v)| (k.clone(), v.map_flags(f)))
                .collect(),
            unknown: self.unknown.as_ref().map(|u| Box::new(u.map_flags(f))),
        }
    }
}

impl fmt::Display for Taintedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collapse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaped() -> Taintedness {
        let mut t = Taintedness::safe();
        t.set_at(
            Some(OffsetKey::Str("danger".into())),
            Taintedness::of(TaintFlags::HTML),
            true,
        );
        t.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::SQL), true);
        t
    }

    #[test]
    fn merge_is_commutative_associative_idempotent() {
        let a = shaped();
        let b = Taintedness::of(TaintFlags::SHELL);
        let c = Taintedness::of(TaintFlags::ESCAPED);

        let ab = a.clone().merged(&b);
        let ba = b.clone().merged(&a);
        assert_eq!(ab, ba);

        let ab_c = ab.clone().merged(&c);
        let a_bc = a.clone().merged(&b.clone().merged(&c));
        assert_eq!(ab_c, a_bc);

        assert_eq!(a.clone().merged(&a), a);
        assert_eq!(a.clone().merged(&Taintedness::safe()), a);
    }

    #[test]
    fn collapse_distributes_over_merge() {
        let a = shaped();
        let b = Taintedness::of(TaintFlags::SHELL);
        assert_eq!(
            a.clone().merged(&b).collapse(),
            a.collapse() | b.collapse()
        );
    }

    #[test]
    fn project_reads_only_the_requested_key() {
        let t = shaped();
        let safe_key = t.project(Some(&OffsetKey::Str("absent".into())));
        assert!(safe_key.is_safe());
        let danger = t.project(Some(&OffsetKey::Str("danger".into())));
        assert!(danger.collapse().contains(TaintFlags::HTML));
        assert!(!danger.collapse().contains(TaintFlags::SQL));
    }

    #[test]
    fn project_absent_key_includes_unknown() {
        let mut t = shaped();
        t.set_at(None, Taintedness::of(TaintFlags::SHELL), false);
        let absent = t.project(Some(&OffsetKey::Str("absent".into())));
        assert!(absent.collapse().contains(TaintFlags::SHELL));
    }

    #[test]
    fn set_then_project_round_trips() {
        let mut t = Taintedness::safe();
        let child = Taintedness::of(TaintFlags::HTML | TaintFlags::SQL);
        t.set_at(Some(OffsetKey::Int(3)), child.clone(), true);
        assert_eq!(t.project(Some(&OffsetKey::Int(3))), child);
    }

    #[test]
    fn set_at_path_autovivifies_and_records_key_taint() {
        let mut t = Taintedness::safe();
        t.set_at_path(
            &[Some(OffsetKey::Str("a".into())), Some(OffsetKey::Str("b".into()))],
            &[TaintFlags::HTML, TaintFlags::SAFE],
            Taintedness::of(TaintFlags::SQL),
            true,
        );
        assert!(t.key_flags.contains(TaintFlags::HTML));
        let inner = t
            .project(Some(&OffsetKey::Str("a".into())))
            .project(Some(&OffsetKey::Str("b".into())));
        assert!(inner.collapse().contains(TaintFlags::SQL));
    }

    #[test]
    fn deep_writes_collapse_into_unknown() {
        let mut t = Taintedness::safe();
        let keys: Vec<_> = (0..40).map(|i| Some(OffsetKey::Int(i))).collect();
        let taints = vec![TaintFlags::SAFE; keys.len()];
        t.set_at_path(&keys, &taints, Taintedness::of(TaintFlags::HTML), true);
        assert!(t.collapse().contains(TaintFlags::HTML));
    }

    #[test]
    fn array_plus_left_wins_on_known_keys() {
        let mut a = Taintedness::safe();
        a.set_at(Some(OffsetKey::Int(0)), Taintedness::safe(), true);
        let mut b = Taintedness::safe();
        b.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::HTML), true);
        b.set_at(Some(OffsetKey::Int(1)), Taintedness::of(TaintFlags::SQL), true);
        a.array_plus(&b);
        assert!(a.project(Some(&OffsetKey::Int(0))).is_safe());
        assert!(a
            .project(Some(&OffsetKey::Int(1)))
            .collapse()
            .contains(TaintFlags::SQL));
    }

    #[test]
    fn array_plus_is_associative() {
        let mut a = Taintedness::safe();
        a.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::HTML), true);
        let mut b = Taintedness::safe();
        b.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::SQL), true);
        b.set_at(Some(OffsetKey::Int(1)), Taintedness::of(TaintFlags::SHELL), true);
        let mut c = Taintedness::safe();
        c.set_at(Some(OffsetKey::Int(1)), Taintedness::of(TaintFlags::MISC), true);
        c.set_at(Some(OffsetKey::Int(2)), Taintedness::of(TaintFlags::ESCAPED), true);

        let mut left = a.clone();
        left.array_plus(&b);
        left.array_plus(&c);

        let mut bc = b.clone();
        bc.array_plus(&c);
        let mut right = a.clone();
        right.array_plus(&bc);

        assert_eq!(left, right);
    }

    #[test]
    fn array_plus_on_disjoint_keys_equals_merge() {
        let mut a = Taintedness::safe();
        a.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::HTML), true);
        let mut b = Taintedness::safe();
        b.set_at(Some(OffsetKey::Int(1)), Taintedness::of(TaintFlags::SQL), true);
        let mut plus = a.clone();
        plus.array_plus(&b);
        assert_eq!(plus, a.merged(&b));
    }

    #[test]
    fn intersect_for_sink_with_safe_sides() {
        let sink = Taintedness::of(TaintFlags::HTML_EXEC);
        let value = shaped();
        assert!(Taintedness::intersect_for_sink(&sink, &Taintedness::safe()).is_safe());
        assert!(Taintedness::intersect_for_sink(&Taintedness::safe(), &value).is_safe());
    }

    #[test]
    fn intersect_for_sink_catches_nested_taint() {
        let sink = Taintedness::of(TaintFlags::HTML_EXEC);
        let value = shaped();
        let hit = Taintedness::intersect_for_sink(&sink, &value);
        assert!(hit.collapse().contains(TaintFlags::HTML));
        assert!(!hit.collapse().contains(TaintFlags::SQL));
    }

    #[test]
    fn intersect_for_sink_result_is_bounded_by_sink() {
        let sink = Taintedness::of(TaintFlags::HTML_EXEC | TaintFlags::SQL_EXEC);
        let value = Taintedness::of(TaintFlags::HTML | TaintFlags::SHELL);
        let hit = Taintedness::intersect_for_sink(&sink, &value);
        assert!(sink
            .collapse()
            .exec_to_yes()
            .contains(hit.collapse()));
    }

    #[test]
    fn shape_subtract_leaves_unknown_alone() {
        let mut value = Taintedness::of(TaintFlags::HTML);
        value.set_at(None, Taintedness::of(TaintFlags::HTML), false);
        let escaper = Taintedness::of(TaintFlags::HTML);
        value.shape_subtract(&escaper);
        assert!(!value.flags.contains(TaintFlags::HTML));
        assert!(value.collapse().contains(TaintFlags::HTML));
    }

    #[test]
    fn structural_conversions_are_nilpotent() {
        let mut t = Taintedness::of(TaintFlags::HTML_EXEC);
        t.set_at(Some(OffsetKey::Int(0)), Taintedness::of(TaintFlags::SQL_EXEC), true);
        assert!(t.exec_to_yes().exec_to_yes().is_safe());
        assert!(t.yes_to_exec().yes_to_exec().is_safe());
    }
}
