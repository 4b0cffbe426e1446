//! End-to-end analysis scenarios: source in, findings out.

use engine::{analyze_source, Analyzer, AnalyzerConfig, Finding};

fn findings_for(code: &str) -> Vec<Finding> {
    analyze_source(code, &AnalyzerConfig::default()).expect("analyze")
}

// Direct echo of untrusted input flags the echo line and points the trail at
// the superglobal read.
#[test]
fn direct_echo_of_untrusted_input() {
    let code = "<?php\n$x = $_GET['q'];\necho $x;\n";
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    let finding = &findings[0];
    assert_eq!(finding.category, "html");
    assert_eq!(finding.line, 3);
    assert!(
        finding.caused_by.iter().any(|p| p.line == 2),
        "trail should include the assignment: {:?}",
        finding.caused_by
    );
}

// Escaper laundering: one round of htmlspecialchars is clean.
#[test]
fn escaper_removes_html_taint() {
    let code = "<?php echo htmlspecialchars($_GET['q']);\n";
    assert!(findings_for(code).is_empty());
}

// Escaping twice is itself a bug.
#[test]
fn double_escape_is_flagged() {
    let code = "<?php echo htmlspecialchars(htmlspecialchars($_GET['q']));\n";
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "double-escape");
}

// Ordering of by-reference writes: the later call wins.
#[test]
fn by_ref_write_order_unsafe_last() {
    let code = r#"<?php
function safe(&$x) { $x = 'Foo'; }
function unsafe(&$x) { $x = $_GET['x']; }
$v = '';
safe(&$v);
unsafe(&$v);
echo $v;
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
    assert_eq!(findings[0].line, 7);
}

#[test]
fn by_ref_write_order_safe_last() {
    let code = r#"<?php
function safe(&$x) { $x = 'Foo'; }
function unsafe(&$x) { $x = $_GET['x']; }
$v = '';
unsafe(&$v);
safe(&$v);
echo $v;
"#;
    assert!(findings_for(code).is_empty());
}

// Same pair inside a function scope.
#[test]
fn by_ref_write_order_in_function_scope() {
    let tainted = r#"<?php
function safe(&$x) { $x = 'Foo'; }
function unsafe(&$x) { $x = $_GET['x']; }
function driver() {
    $v = '';
    safe(&$v);
    unsafe(&$v);
    echo $v;
}
driver();
"#;
    let findings = findings_for(tainted);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].line, 8);

    let clean = r#"<?php
function safe(&$x) { $x = 'Foo'; }
function unsafe(&$x) { $x = $_GET['x']; }
function driver() {
    $v = '';
    unsafe(&$v);
    safe(&$v);
    echo $v;
}
driver();
"#;
    assert!(findings_for(clean).is_empty());
}

// Shape-preserving assignment: sibling keys stay independent.
#[test]
fn shape_preserving_assignment_safe_key() {
    let code = r#"<?php
$a = ['safe' => 'x'];
$a['danger'] = $_GET['q'];
echo $a['safe'];
"#;
    assert!(findings_for(code).is_empty());
}

#[test]
fn shape_preserving_assignment_tainted_key() {
    let code = r#"<?php
$a = ['safe' => 'x'];
$a['danger'] = $_GET['q'];
echo $a['danger'];
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
    assert_eq!(findings[0].line, 4);
}

// SQL numkey rule: tainted strings at integer keys mark the array.
#[test]
fn sql_numkey_flows_to_annotated_sink() {
    let code = r#"<?php
/**
 * @param-taint $q exec_sql, exec_sql_numkey
 */
function db_query($q) {}
$arr = [$_GET['q']];
db_query("SELECT * WHERE x IN (" . $arr[0] . ")");
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "sql");
}

#[test]
fn string_keyed_array_has_no_numkey() {
    let code = r#"<?php
/**
 * @param-taint $q exec_sql_numkey
 */
function db_query($q) {}
$arr = ['k' => $_GET['q']];
db_query($arr);
"#;
    // Only the numkey category is a sink here; a string-keyed array does not
    // carry it, so passing the whole array stays quiet...
    assert!(findings_for(code).is_empty());

    let numkey = r#"<?php
/**
 * @param-taint $q exec_sql_numkey
 */
function db_query($q) {}
$arr = [$_GET['q']];
db_query($arr);
"#;
    // ...while the implicit-integer-key form is flagged.
    let findings = findings_for(numkey);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "sql_numkey");
}

// Cross-function propagation through a wrapping function.
#[test]
fn cross_function_propagation() {
    let code = r#"<?php
function wrap($s) { return "<b>$s</b>"; }
echo wrap($_GET['q']);
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
    assert_eq!(findings[0].line, 3);
}

// Conditionals merge both branches; safe-in-one-branch is not safe.
#[test]
fn branch_join_keeps_taint() {
    let code = r#"<?php
$x = 'safe';
if ($cond) {
    $x = $_GET['q'];
}
echo $x;
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
}

// Loop-carried taint is seen even when the write follows the sink in the
// body.
#[test]
fn loop_carried_taint_is_widened() {
    let code = r#"<?php
$x = 'safe';
while ($cond) {
    echo $x;
    $x = $_GET['q'];
}
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
}

// Globals alias into function scope through the declaration.
#[test]
fn global_declaration_imports_taint() {
    let code = r#"<?php
$g = $_GET['q'];
function show() {
    global $g;
    echo $g;
}
show();
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
}

// Sinks from the builtin table.
#[test]
fn shell_exec_builtin_is_a_sink() {
    let code = "<?php shell_exec('ls ' . $_GET['d']);\n";
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "shell");
}

#[test]
fn escapeshellarg_launders_shell_taint() {
    let code = "<?php shell_exec('ls ' . escapeshellarg($_GET['d']));\n";
    assert!(findings_for(code).is_empty());
}

#[test]
fn backtick_operator_is_a_shell_sink() {
    let code = "<?php $out = `ls {$_GET['d']}`;\n";
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "shell");
}

#[test]
fn eval_of_user_input_is_flagged() {
    let code = "<?php eval($_GET['code']);\n";
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "misc");
}

// The upload superglobal is shaped: server-assigned keys are safe.
#[test]
fn upload_tmp_name_is_safe_but_name_is_not() {
    let safe = "<?php echo $_FILES['f']['tmp_name'];\n";
    assert!(findings_for(safe).is_empty());

    let tainted = "<?php echo $_FILES['f']['name'];\n";
    let findings = findings_for(tainted);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
}

// Storing into a symbol and reading it back reproduces the triple.
#[test]
fn symbol_store_round_trips() {
    let code = r#"<?php
$a = $_GET['q'];
$b = $a;
echo $b;
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert!(findings[0].caused_by.iter().any(|p| p.line == 2));
}

// Docblock sink annotations on a parameter.
#[test]
fn docblock_sink_annotation_checks_callers() {
    let code = r#"<?php
/**
 * @param-taint $sql exec_sql
 */
function query($sql) {}
query("DELETE FROM t WHERE k = '" . $_GET['k'] . "'");
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "sql");
}

// Numeric-typed results cannot carry string taint.
#[test]
fn integer_return_hint_clears_taint() {
    let code = r#"<?php
function f($x): int { return $x; }
echo f($_GET['q']);
"#;
    assert!(findings_for(code).is_empty());
}

// Contracts accumulate across the fixpoint: a sink discovered late still
// flags an early call.
#[test]
fn call_before_declaration_is_resolved() {
    let code = r#"<?php
show($_GET['q']);
function show($x) { echo $x; }
"#;
    let findings = findings_for(code);
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].category, "html");
}

#[test]
fn contract_dump_names_functions() {
    let code = r#"<?php
function wrap($s) { return "<b>$s</b>"; }
echo wrap($_GET['q']);
"#;
    let ast = parsers::parse_php(code, "<mem>").expect("parse");
    let mut analyzer = Analyzer::new(AnalyzerConfig::default());
    analyzer.analyze(std::slice::from_ref(&ast));
    let dump = analyzer.contract_dump();
    assert!(dump.iter().any(|c| c.function == "wrap"));
}

// The false-positive hook suppresses findings.
#[test]
fn false_positive_hook_filters() {
    let code = "<?php echo $_GET['q'];\n";
    let mut config = AnalyzerConfig::default();
    config.false_positive_hook = Some(std::sync::Arc::new(|_: &Finding| true));
    let findings = analyze_source(code, &config).expect("analyze");
    assert!(findings.is_empty());
}
