//! Built-in function taint table.
//!
//! Static knowledge about the standard library: escapers remove a category
//! (and install double-escape detection where applicable), sinks flag
//! parameter positions, passthroughs preserve their arguments. Every entry
//! is installed locked; docblocks cannot override the standard library.

use crate::contracts::FunctionContract;
use taint::{
    FunctionCausedByLines, FunctionTaintedness, PreservedTaintedness, TaintFlags, Taintedness,
};

/// Escaper: removes `category` from its string argument.
fn escaper(category: TaintFlags, detect_double_escape: bool) -> FunctionTaintedness {
    let mut taint = FunctionTaintedness::safe_with_arity(1);
    taint.preserved[0] = PreservedTaintedness::except(category);
    if detect_double_escape {
        taint.params[0].add_flags(TaintFlags::ESCAPED_EXEC);
        taint.overall.add_flags(TaintFlags::ESCAPED);
    }
    taint
}

/// Escaper whose interesting argument is not the first.
fn escaper_at(index: usize, category: TaintFlags) -> FunctionTaintedness {
    let mut taint = FunctionTaintedness::safe_with_arity(index + 1);
    taint.preserved[index] = PreservedTaintedness::except(category);
    taint
}

/// Sink at one parameter position.
fn sink_at(index: usize, flags: TaintFlags) -> FunctionTaintedness {
    let mut taint = FunctionTaintedness::safe_with_arity(index + 1);
    taint.params[index].add_flags(flags);
    taint
}

/// Sink at the first position plus every variadic argument after it.
fn variadic_sink(flags: TaintFlags) -> FunctionTaintedness {
    let mut taint = sink_at(0, flags);
    taint.variadic = Some((1, Taintedness::of(flags)));
    taint
}

/// All arguments pass through to the return value.
fn passthrough(arity: usize) -> FunctionTaintedness {
    let mut taint = FunctionTaintedness::safe_with_arity(arity);
    for preserved in &mut taint.preserved {
        *preserved = PreservedTaintedness::whole();
    }
    taint.variadic = Some((arity, Taintedness::safe()));
    taint
}

/// Return value is never attacker-controlled, arguments are not sinks.
fn neutral(arity: usize) -> FunctionTaintedness {
    FunctionTaintedness::safe_with_arity(arity)
}

/// The table, keyed by lowercase function name.
pub fn builtin_taints() -> Vec<(&'static str, FunctionTaintedness)> {
    use TaintFlags as F;
    vec![
        // Escapers.
        ("htmlspecialchars", escaper(F::HTML, true)),
        ("htmlentities", escaper(F::HTML, true)),
        ("strip_tags", escaper(F::HTML, false)),
        ("addslashes", escaper(F::SQL, false)),
        ("mysql_real_escape_string", escaper(F::SQL, false)),
        ("mysqli_real_escape_string", escaper_at(1, F::SQL)),
        ("escapeshellarg", escaper(F::SHELL, false)),
        ("escapeshellcmd", escaper(F::SHELL, false)),
        ("rawurlencode", escaper(F::HTML, false)),
        ("urlencode", escaper(F::HTML, false)),
        // Sinks.
        ("mysql_query", sink_at(0, F::SQL_EXEC | F::SQL_NUMKEY_EXEC)),
        ("mysqli_query", sink_at(1, F::SQL_EXEC | F::SQL_NUMKEY_EXEC)),
        ("pg_query", sink_at(1, F::SQL_EXEC | F::SQL_NUMKEY_EXEC)),
        ("shell_exec", sink_at(0, F::SHELL_EXEC)),
        ("exec", sink_at(0, F::SHELL_EXEC)),
        ("system", sink_at(0, F::SHELL_EXEC)),
        ("passthru", sink_at(0, F::SHELL_EXEC)),
        ("popen", sink_at(0, F::SHELL_EXEC)),
        ("proc_open", sink_at(0, F::SHELL_EXEC)),
        ("pcntl_exec", sink_at(0, F::SHELL_EXEC)),
        ("unserialize", sink_at(0, F::SERIALIZE_EXEC)),
        ("printf", variadic_sink(F::HTML_EXEC)),
        ("vprintf", variadic_sink(F::HTML_EXEC)),
        ("file_put_contents", sink_at(0, F::MISC_EXEC)),
        ("file_get_contents", sink_at(0, F::MISC_EXEC)),
        ("fopen", sink_at(0, F::MISC_EXEC)),
        ("readfile", sink_at(0, F::MISC_EXEC)),
        ("unlink", sink_at(0, F::MISC_EXEC)),
        ("header", sink_at(0, F::MISC_EXEC)),
        // Passthroughs.
        ("serialize", passthrough(1)),
        ("base64_encode", passthrough(1)),
        ("base64_decode", passthrough(1)),
        ("json_encode", passthrough(1)),
        ("json_decode", passthrough(1)),
        ("sprintf", passthrough(1)),
        ("vsprintf", passthrough(2)),
        ("implode", passthrough(2)),
        ("join", passthrough(2)),
        ("trim", passthrough(1)),
        ("ltrim", passthrough(1)),
        ("rtrim", passthrough(1)),
        ("strval", passthrough(1)),
        ("strtolower", passthrough(1)),
        ("strtoupper", passthrough(1)),
        ("substr", passthrough(1)),
        ("str_repeat", passthrough(1)),
        ("str_replace", passthrough(3)),
        ("nl2br", passthrough(1)),
        // Known-safe returns.
        ("intval", neutral(1)),
        ("floatval", neutral(1)),
        ("boolval", neutral(1)),
        ("count", neutral(1)),
        ("strlen", neutral(1)),
        ("time", neutral(0)),
        ("rand", neutral(2)),
        ("mt_rand", neutral(2)),
    ]
}

pub fn contract_for(taint: FunctionTaintedness) -> FunctionContract {
    let arity = taint.params.len();
    FunctionContract {
        taint,
        trail: FunctionCausedByLines::with_arity(arity),
        locked: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaper_clears_its_category_only() {
        let table = builtin_taints();
        let (_, hs) = table
            .iter()
            .find(|(name, _)| *name == "htmlspecialchars")
            .unwrap();
        let arg = Taintedness::of(TaintFlags::HTML | TaintFlags::SQL);
        let out = hs.preserved[0].apply_to(&arg);
        assert!(!out.collapse().contains(TaintFlags::HTML));
        assert!(out.collapse().contains(TaintFlags::SQL));
        // Escaping an already-escaped value is flagged.
        assert!(hs.params[0].flags.contains(TaintFlags::ESCAPED_EXEC));
        assert!(hs.overall.collapse().contains(TaintFlags::ESCAPED));
    }

    #[test]
    fn printf_sinks_every_argument() {
        let table = builtin_taints();
        let (_, printf) = table.iter().find(|(name, _)| *name == "printf").unwrap();
        assert!(printf
            .param_sink(0)
            .is_some_and(|t| t.flags.contains(TaintFlags::HTML_EXEC)));
        assert!(printf
            .param_sink(4)
            .is_some_and(|t| t.flags.contains(TaintFlags::HTML_EXEC)));
    }
}
