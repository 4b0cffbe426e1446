//! Method-parameter link graph.
//!
//! [`MethodLinks`] mirrors the shape of a taintedness value but its leaves
//! record *where a value came from*: which formal parameters of which
//! functions it (or one of its sub-offsets) is derived from. The call
//! handler consumes these records to refine function contracts after the
//! fact: when a value built from parameter `i` of `f` reaches a sink, `f`'s
//! contract learns that parameter `i` sinks that category.

use crate::flags::TaintFlags;
use crate::taintedness::{OffsetKey, Taintedness, MAX_SHAPE_DEPTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interned identity of a function or method.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FuncId(pub usize);

/// Parameters of one function a value is derived from. Each index carries a
/// category filter: only those categories survive the trip through the
/// parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMethodLinks {
    pub params: BTreeMap<usize, TaintFlags>,
}

impl SingleMethodLinks {
    pub fn for_param(index: usize) -> Self {
        let mut params = BTreeMap::new();
        params.insert(index, TaintFlags::ALL_YES);
        Self { params }
    }

    pub fn merge_with(&mut self, other: &Self) {
        for (&index, &filter) in &other.params {
            *self.params.entry(index).or_insert(TaintFlags::SAFE) |= filter;
        }
    }
}

/// Flat set of links: function identity to parameter records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinksSet {
    pub funcs: BTreeMap<FuncId, SingleMethodLinks>,
}

impl LinksSet {
    pub fn single(func: FuncId, param: usize) -> Self {
        let mut funcs = BTreeMap::new();
        funcs.insert(func, SingleMethodLinks::for_param(param));
        Self { funcs }
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn merge_with(&mut self, other: &Self) {
        for (func, links) in &other.funcs {
            self.funcs.entry(*func).or_default().merge_with(links);
        }
    }

    pub fn mentions(&self, func: FuncId, param: usize) -> bool {
        self.funcs
            .get(&func)
            .is_some_and(|l| l.params.contains_key(&param))
    }

    /// Iterate every `(function, parameter, filter)` record.
    pub fn iter(&self) -> impl Iterator<Item = (FuncId, usize, TaintFlags)> + '_ {
        self.funcs.iter().flat_map(|(&func, links)| {
            links
                .params
                .iter()
                .map(move |(&index, &filter)| (func, index, filter))
        })
    }
}

/// Shape-aware link container; the structural twin of a taintedness value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodLinks {
    pub links: LinksSet,
    pub known: BTreeMap<OffsetKey, MethodLinks>,
    pub unknown: Option<Box<MethodLinks>>,
}

impl MethodLinks {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(func: FuncId, param: usize) -> Self {
        Self {
            links: LinksSet::single(func, param),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
            && self.known.values().all(MethodLinks::is_empty)
            && self.unknown.as_ref().is_none_or(|u| u.is_empty())
    }

    pub fn merge_with(&mut self, other: &MethodLinks) {
        self.links.merge_with(&other.links);
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

    pub fn merged(mut self, other: &MethodLinks) -> Self {
        self.merge_with(other);
        self
    }

    /// Union of the link records at every depth.
    pub fn collapse_to_set(&self) -> LinksSet {
        let mut out = self.links.clone();
        for child in self.known.values() {
            out.merge_with(&child.collapse_to_set());
        }
        if let Some(unknown) = &self.unknown {
            out.merge_with(&unknown.collapse_to_set());
        }
        out
    }

    /// Links observable when reading at `key`; mirrors taintedness
    /// projection.
    pub fn project(&self, key: Option<&OffsetKey>) -> MethodLinks {
        let mut out = MethodLinks {
            links: self.links.clone(),
            ..MethodLinks::default()
        };
        if let Some(unknown) = &self.unknown {
            out.merge_with(unknown);
        }
        match key {
            None => {
                for child in self.known.values() {
                    out.merge_with(child);
                }
            }
            Some(key) => {
                if let Some(child) = self.known.get(key) {
                    out.merge_with(child);
                }
            }
        }
        out
    }

    /// Write `child` at the end of a key path; mirrors
    /// [`Taintedness::set_at_path`].
    pub fn set_at_path(&mut self, keys: &[Option<OffsetKey>], child: MethodLinks, override_: bool) {
        self.set_at_path_depth(keys, child, override_, 0)
    }

    fn set_at_path_depth(
        &mut self,
        keys: &[Option<OffsetKey>],
        child: MethodLinks,
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
        if depth >= MAX_SHAPE_DEPTH {
            let flat = MethodLinks {
                links: child.collapse_to_set(),
                ..MethodLinks::default()
            };
            self.unknown
                .get_or_insert_with(Default::default)
                .merge_with(&flat);
            return;
        }
        if rest.is_empty() {
            match key {
                Some(key) => {
                    if override_ {
                        self.known.insert(key.clone(), child);
                    } else {
                        self.known.entry(key.clone()).or_default().merge_with(&child);
                    }
                }
                None => self
                    .unknown
                    .get_or_insert_with(Default::default)
                    .merge_with(&child),
            }
        } else {
            match key {
                Some(key) => self
                    .known
                    .entry(key.clone())
                    .or_default()
                    .set_at_path_depth(rest, child, override_, depth + 1),
                None => self
                    .unknown
                    .get_or_insert_with(Default::default)
                    .set_at_path_depth(rest, child, false, depth + 1),
            }
        }
    }

    pub fn mentions(&self, func: FuncId, param: usize) -> bool {
        self.links.mentions(func, param)
            || self.known.values().any(|c| c.mentions(func, param))
            || self
                .unknown
                .as_ref()
                .is_some_and(|u| u.mentions(func, param))
    }

    /// The taintedness-shaped mask describing which categories would
    /// preserve from parameter `param` of `func` into each position of a
    /// value carrying these links.
    pub fn preserved_for_param(&self, func: FuncId, param: usize) -> Taintedness {
        let mut out = Taintedness::default();
        if let Some(filter) = self
            .links
            .funcs
            .get(&func)
            .and_then(|l| l.params.get(&param))
        {
            out.flags = *filter;
        }
        for (key, child) in &self.known {
            let mask = child.preserved_for_param(func, param);
            if !mask.is_safe() {
                out.known.insert(key.clone(), mask);
            }
        }
        if let Some(unknown) = &self.unknown {
            let mask = unknown.preserved_for_param(func, param);
            if !mask.is_safe() {
                out.unknown = Some(Box::new(mask));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_param_sets() {
        let mut a = LinksSet::single(FuncId(1), 0);
        a.merge_with(&LinksSet::single(FuncId(1), 2));
        a.merge_with(&LinksSet::single(FuncId(7), 1));
        assert!(a.mentions(FuncId(1), 0));
        assert!(a.mentions(FuncId(1), 2));
        assert!(a.mentions(FuncId(7), 1));
        assert!(!a.mentions(FuncId(7), 0));
    }

    #[test]
    fn shape_projection_mirrors_taintedness() {
        let mut links = MethodLinks::empty();
        links.set_at_path(
            &[Some(OffsetKey::Str("k".into()))],
            MethodLinks::single(FuncId(3), 0),
            true,
        );
        assert!(links
            .project(Some(&OffsetKey::Str("k".into())))
            .mentions(FuncId(3), 0));
        assert!(!links
            .project(Some(&OffsetKey::Str("other".into())))
            .mentions(FuncId(3), 0));
        // The whole-value view sees every child.
        assert!(links.project(None).mentions(FuncId(3), 0));
    }

    #[test]
    fn preserved_mask_tracks_link_positions() {
        let mut links = MethodLinks::single(FuncId(2), 1);
        links.set_at_path(
            &[Some(OffsetKey::Int(0))],
            MethodLinks::single(FuncId(2), 0),
            true,
        );
        let mask = links.preserved_for_param(FuncId(2), 0);
        assert!(mask.flags.is_empty());
        assert_eq!(
            mask.project(Some(&OffsetKey::Int(0))).flags,
            TaintFlags::ALL_YES
        );
        let mask_other = links.preserved_for_param(FuncId(2), 1);
        assert_eq!(mask_other.flags, TaintFlags::ALL_YES);
    }

    #[test]
    fn collapse_gathers_all_depths() {
        let mut links = MethodLinks::single(FuncId(1), 0);
        links.set_at_path(
            &[None, Some(OffsetKey::Int(2))],
            MethodLinks::single(FuncId(9), 3),
            false,
        );
        let set = links.collapse_to_set();
        assert!(set.mentions(FuncId(1), 0));
        assert!(set.mentions(FuncId(9), 3));
    }
}
