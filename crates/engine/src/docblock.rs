//! Docblock taint annotations.
//!
//! `@param-taint $name token[, token]*` and `@return-taint token[, token]*`.
//! Pure string-to-flags parsing; application to a contract happens when the
//! function's contract is first created. Annotations lock the contract
//! against inference unless `allow_override` is present.

use crate::contracts::FunctionContract;
use ir::FunctionDef;
use taint::{
    FunctionCausedByLines, FunctionTaintedness, PreservedTaintedness, TaintFlags, Taintedness,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAnnotation {
    /// Sink flags applied to the parameter position.
    pub sink: TaintFlags,
    /// Categories of the argument flowing into the return value.
    pub preserved: TaintFlags,
    /// Taint added to the return value by this annotation (`escapes_html`
    /// marks the output as already escaped).
    pub adds_to_return: TaintFlags,
    pub allow_override: bool,
}

/// Parse the token list of one `@param-taint` / `@return-taint` line.
fn parse_tokens(tokens: &str) -> ParamAnnotation {
    let mut out = ParamAnnotation::default();
    for token in tokens
        .split([',', ' ', '\t'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        match token {
            "none" => {}
            "tainted" => out.preserved |= TaintFlags::ALL_YES,
            "array_ok" => out.sink |= TaintFlags::ARRAY_OK,
            "raw_param" => out.sink |= TaintFlags::RAW_PARAM,
            "allow_override" => out.allow_override = true,
            _ => {
                if let Some(cat) = token.strip_prefix("exec_") {
                    if let Some(flags) = TaintFlags::from_category_name(cat) {
                        out.sink |= flags.yes_to_exec();
                    }
                } else if let Some(cat) = token.strip_prefix("escapes_") {
                    if let Some(flags) = TaintFlags::from_category_name(cat) {
                        out.preserved |= TaintFlags::ALL_YES.subtract(flags);
                        if cat == "html" {
                            out.sink |= TaintFlags::ESCAPED_EXEC;
                            out.adds_to_return |= TaintFlags::ESCAPED;
                        }
                    }
                } else if let Some(cat) = token.strip_prefix("onlysafefor_") {
                    if let Some(flags) = TaintFlags::from_category_name(cat) {
                        out.preserved |= TaintFlags::ALL_YES.subtract(flags);
                        out.adds_to_return |= TaintFlags::ESCAPED;
                    }
                } else if let Some(flags) = TaintFlags::from_category_name(token) {
                    out.preserved |= flags;
                }
            }
        }
    }
    out
}

/// Build a contract from a function's docblock, if it carries taint
/// annotations.
pub fn contract_from_doc(def: &FunctionDef) -> Option<FunctionContract> {
    let doc = def.doc.as_deref()?;
    let mut taint = FunctionTaintedness::safe_with_arity(def.params.len());
    let mut any = false;
    let mut allow_override = false;

    for line in doc.lines() {
        let line = line.trim_start_matches([' ', '\t', '*']);
        if let Some(rest) = line.strip_prefix("@param-taint ") {
            let rest = rest.trim();
            let Some((name, tokens)) = rest.split_once(char::is_whitespace) else {
                continue;
            };
            let name = name.trim_start_matches('$');
            let Some(index) = def.params.iter().position(|p| p.name == name) else {
                continue;
            };
            let annotation = parse_tokens(tokens);
            taint.params[index].add_flags(annotation.sink);
            if !annotation.preserved.is_empty() {
                taint.preserved[index] = PreservedTaintedness::from_mask(Taintedness::of(
                    annotation.preserved.only_yes(),
                ));
            }
            taint.overall.add_flags(annotation.adds_to_return);
            allow_override |= annotation.allow_override;
            any = true;
        } else if let Some(tokens) = line.strip_prefix("@return-taint ") {
            let annotation = parse_tokens(tokens);
            taint
                .overall
                .add_flags(annotation.preserved | annotation.adds_to_return);
            allow_override |= annotation.allow_override;
            any = true;
        }
    }

    if !any {
        return None;
    }
    // Variadic last parameter: its annotation covers the tail.
    if let Some(last) = def.params.last() {
        if last.variadic {
            let index = def.params.len() - 1;
            taint.variadic = Some((index, taint.params[index].clone()));
        }
    }
    Some(FunctionContract {
        trail: FunctionCausedByLines::with_arity(taint.params.len()),
        taint,
        locked: !allow_override,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Meta, Param};

    fn def_with_doc(doc: &str, params: &[&str]) -> FunctionDef {
        FunctionDef {
            name: "f".into(),
            params: params
                .iter()
                .map(|name| Param {
                    name: (*name).into(),
                    by_ref: false,
                    variadic: false,
                    type_hint: None,
                    default: None,
                })
                .collect(),
            body: Vec::new(),
            doc: Some(doc.into()),
            return_hint: None,
            meta: Meta::new("<mem>", 1, 1),
        }
    }

    #[test]
    fn exec_token_marks_a_sink_parameter() {
        let def = def_with_doc("/** @param-taint $q exec_sql */", &["q"]);
        let contract = contract_from_doc(&def).expect("contract");
        assert!(contract.taint.params[0].flags.contains(TaintFlags::SQL_EXEC));
        assert!(contract.locked);
    }

    // A numkey-only sink must not catch plain SQL taint.
    #[test]
    fn exec_numkey_does_not_imply_exec_sql() {
        let def = def_with_doc("/** @param-taint $q exec_sql_numkey */", &["q"]);
        let contract = contract_from_doc(&def).expect("contract");
        let flags = contract.taint.params[0].flags;
        assert!(flags.contains(TaintFlags::SQL_NUMKEY_EXEC));
        assert!(!flags.contains(TaintFlags::SQL_EXEC));
    }

    #[test]
    fn escapes_html_installs_double_escape_detection() {
        let def = def_with_doc(
            "/**\n * @param-taint $s escapes_html\n * @return-taint escaped\n */",
            &["s"],
        );
        let contract = contract_from_doc(&def).expect("contract");
        assert!(contract.taint.params[0]
            .flags
            .contains(TaintFlags::ESCAPED_EXEC));
        assert!(contract.taint.overall.collapse().contains(TaintFlags::ESCAPED));
        let arg = Taintedness::of(TaintFlags::HTML | TaintFlags::SQL);
        let preserved = contract.taint.preserved[0].apply_to(&arg);
        assert!(!preserved.collapse().contains(TaintFlags::HTML));
        assert!(preserved.collapse().contains(TaintFlags::SQL));
    }

    #[test]
    fn allow_override_unlocks() {
        let def = def_with_doc("/** @param-taint $q exec_shell, allow_override */", &["q"]);
        let contract = contract_from_doc(&def).expect("contract");
        assert!(!contract.locked);
    }

    #[test]
    fn undocumented_functions_have_no_annotation_contract() {
        let mut def = def_with_doc("/** just a summary */", &["q"]);
        assert!(contract_from_doc(&def).is_none());
        def.doc = None;
        assert!(contract_from_doc(&def).is_none());
    }
}
