//! Packed taint category flags.
//!
//! Every security category `X` owns a pair of adjacent bits: `X` (the value
//! may be X-dangerous) and `X_EXEC` at `X << 1` (this position sinks
//! X-dangerous values). Meta flags live above the category pairs and modify
//! semantics rather than naming a category.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TaintFlags(u32);

impl TaintFlags {
    pub const SAFE: Self = Self(0);

    pub const HTML: Self = Self(1 << 0);
    pub const HTML_EXEC: Self = Self(1 << 1);
    pub const SQL: Self = Self(1 << 2);
    pub const SQL_EXEC: Self = Self(1 << 3);
    pub const SHELL: Self = Self(1 << 4);
    pub const SHELL_EXEC: Self = Self(1 << 5);
    pub const SERIALIZE: Self = Self(1 << 6);
    pub const SERIALIZE_EXEC: Self = Self(1 << 7);
    pub const CUSTOM1: Self = Self(1 << 8);
    pub const CUSTOM1_EXEC: Self = Self(1 << 9);
    pub const CUSTOM2: Self = Self(1 << 10);
    pub const CUSTOM2_EXEC: Self = Self(1 << 11);
    pub const MISC: Self = Self(1 << 12);
    pub const MISC_EXEC: Self = Self(1 << 13);
    pub const SQL_NUMKEY: Self = Self(1 << 14);
    pub const SQL_NUMKEY_EXEC: Self = Self(1 << 15);
    pub const ESCAPED: Self = Self(1 << 16);
    pub const ESCAPED_EXEC: Self = Self(1 << 17);

    pub const ALL_YES: Self = Self(
        Self::HTML.0
            | Self::SQL.0
            | Self::SHELL.0
            | Self::SERIALIZE.0
            | Self::CUSTOM1.0
            | Self::CUSTOM2.0
            | Self::MISC.0
            | Self::SQL_NUMKEY.0
            | Self::ESCAPED.0,
    );
    pub const ALL_EXEC: Self = Self(Self::ALL_YES.0 << 1);
    pub const ALL: Self = Self(Self::ALL_YES.0 | Self::ALL_EXEC.0);

    /// Join-top: nothing is known about this value.
    pub const UNKNOWN: Self = Self(1 << 20);
    /// Not a value position (statements, declarations).
    pub const INAPPLICABLE: Self = Self(1 << 21);
    /// The position passes its input through unchanged.
    pub const PRESERVE: Self = Self(1 << 22);
    /// User annotation is locked and must not be refined by inference.
    pub const NO_OVERRIDE: Self = Self(1 << 23);
    /// Parameter receives raw, unescaped data on purpose.
    pub const RAW_PARAM: Self = Self(1 << 24);
    /// Passing a (shaped) array into this position is acceptable.
    pub const ARRAY_OK: Self = Self(1 << 25);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn subtract(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// All of `other`'s bits are present.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one of `other`'s bits is present.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Keep only the value-taint halves of the category pairs.
    pub const fn only_yes(self) -> Self {
        Self(self.0 & Self::ALL_YES.0)
    }

    /// Keep only the sink halves of the category pairs.
    pub const fn only_exec(self) -> Self {
        Self(self.0 & Self::ALL_EXEC.0)
    }

    /// Convert a sink mask into the value taint it catches. Nilpotent:
    /// `f(f(x))` is always empty.
    pub const fn exec_to_yes(self) -> Self {
        Self((self.0 & Self::ALL_EXEC.0) >> 1)
    }

    /// Convert value taint into the sink mask that catches it. Nilpotent.
    pub const fn yes_to_exec(self) -> Self {
        Self((self.0 & Self::ALL_YES.0) << 1)
    }

    /// Re-establish the category invariant: numkey value taint implies the
    /// plain SQL bit on the same node. Sink masks are left alone so a
    /// numkey-only sink does not start catching plain SQL.
    pub const fn normalized(self) -> Self {
        let mut bits = self.0;
        if bits & Self::SQL_NUMKEY.0 != 0 {
            bits |= Self::SQL.0;
        }
        Self(bits)
    }

    /// Yes-bit for a docblock category token, if it names one.
    pub fn from_category_name(name: &str) -> Option<Self> {
        CATEGORY_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, f)| f)
    }
}

/// Category names as they appear in docblock annotations. `htmlnoent`
/// shares the HTML bit: the distinction only matters for which escape
/// bookkeeping an escaper installs.
pub const CATEGORY_NAMES: &[(&str, TaintFlags)] = &[
    ("html", TaintFlags::HTML),
    ("htmlnoent", TaintFlags::HTML),
    ("sql", TaintFlags::SQL),
    ("shell", TaintFlags::SHELL),
    ("serialize", TaintFlags::SERIALIZE),
    ("custom1", TaintFlags::CUSTOM1),
    ("custom2", TaintFlags::CUSTOM2),
    ("misc", TaintFlags::MISC),
    ("sql_numkey", TaintFlags::SQL_NUMKEY),
    ("escaped", TaintFlags::ESCAPED),
];

impl BitOr for TaintFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for TaintFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for TaintFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl fmt::Display for TaintFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("safe");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(name)
        };
        for &(name, flag) in CATEGORY_NAMES {
            // `htmlnoent` aliases `html`; print each bit once.
            if name == "htmlnoent" {
                continue;
            }
            if self.intersects(flag) {
                put(f, name)?;
            }
            if self.intersects(flag.yes_to_exec()) {
                put(f, &format!("exec_{name}"))?;
            }
        }
        for (flag, name) in [
            (Self::UNKNOWN, "unknown"),
            (Self::INAPPLICABLE, "inapplicable"),
            (Self::PRESERVE, "preserve"),
            (Self::NO_OVERRIDE, "no_override"),
            (Self::RAW_PARAM, "raw_param"),
            (Self::ARRAY_OK, "array_ok"),
        ] {
            if self.intersects(flag) {
                put(f, name)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TaintFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaintFlags({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_pairs_are_shifted_yes_bits() {
        assert_eq!(TaintFlags::HTML.yes_to_exec(), TaintFlags::HTML_EXEC);
        assert_eq!(TaintFlags::SQL_EXEC.exec_to_yes(), TaintFlags::SQL);
        assert_eq!(TaintFlags::ALL_YES.yes_to_exec(), TaintFlags::ALL_EXEC);
    }

    #[test]
    fn conversions_are_nilpotent() {
        let t = TaintFlags::HTML | TaintFlags::SQL_EXEC | TaintFlags::UNKNOWN;
        assert!(t.exec_to_yes().exec_to_yes().is_empty());
        assert!(t.yes_to_exec().yes_to_exec().is_empty());
    }

    #[test]
    fn numkey_implies_sql_for_values_only() {
        let t = TaintFlags::SQL_NUMKEY.normalized();
        assert!(t.contains(TaintFlags::SQL));
        let e = TaintFlags::SQL_NUMKEY_EXEC.normalized();
        assert!(!e.contains(TaintFlags::SQL_EXEC));
    }

    #[test]
    fn meta_bits_survive_neither_conversion() {
        let t = TaintFlags::NO_OVERRIDE | TaintFlags::PRESERVE;
        assert!(t.exec_to_yes().is_empty());
        assert!(t.yes_to_exec().is_empty());
    }

    #[test]
    fn display_names_categories() {
        let t = TaintFlags::HTML | TaintFlags::SQL_EXEC;
        assert_eq!(t.to_string(), "html|exec_sql");
        assert_eq!(TaintFlags::SAFE.to_string(), "safe");
    }
}
