//! PHP parsing front-end.
//!
//! Wraps tree-sitter-php behind a small pool (tree-sitter parsers are not
//! Sync) and lowers parse trees into the closed AST from the `ir` crate.
//! Whole-project parsing keeps a blake3-keyed cache so unchanged files skip
//! the lowering on re-scan.

use anyhow::{anyhow, Context, Result};
use ir::FileAst;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

mod lower;

/// Counters surfaced after a scan.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ParserMetrics {
    pub files_parsed: usize,
    pub parse_errors: usize,
    pub cache_hits: usize,
}

// Parser pool to avoid re-creating tree-sitter parsers per file.
static PARSER_POOL: Mutex<Vec<tree_sitter::Parser>> = Mutex::new(Vec::new());

fn get_parser() -> tree_sitter::Parser {
    let mut pool = PARSER_POOL.lock().expect("parser pool lock poisoned");
    if let Some(mut parser) = pool.pop() {
        parser.reset();
        parser
    } else {
        tree_sitter::Parser::new()
    }
}

fn return_parser(mut parser: tree_sitter::Parser) {
    let mut pool = PARSER_POOL.lock().expect("parser pool lock poisoned");
    if pool.len() < 10 {
        parser.reset();
        pool.push(parser);
    }
}

/// Parse one PHP source string into the closed AST.
pub fn parse_php(content: &str, file_path: &str) -> Result<FileAst> {
    debug!("parsing {file_path}");
    let mut parser = get_parser();
    parser
        .set_language(tree_sitter_php::language())
        .context("load php grammar")?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("failed to parse php source"))?;
    return_parser(parser);

    let mut ast = FileAst::new(file_path.to_string());
    let lowerer = lower::Lower::new(content, file_path);
    ast.nodes = lowerer.lower_sequence(tree.root_node());
    Ok(ast)
}

#[derive(Serialize, Deserialize)]
struct CachedFile {
    hash: String,
    ast: FileAst,
}

#[derive(Default, Serialize, Deserialize)]
struct CacheData {
    files: HashMap<String, CachedFile>,
}

/// Parse every `.php` file under `root` (a file or directory).
///
/// When `cache_path` is given, lowered ASTs are reused for files whose
/// blake3 hash is unchanged.
pub fn parse_php_project(
    root: &Path,
    cache_path: Option<&Path>,
    mut metrics: Option<&mut ParserMetrics>,
) -> Result<Vec<FileAst>> {
    let mut cache: CacheData = cache_path
        .and_then(|p| fs::read_to_string(p).ok())
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    let mut seen = std::collections::HashSet::new();
    while let Some(path) = stack.pop() {
        if path.is_dir() {
            for entry in fs::read_dir(&path)
                .with_context(|| format!("failed to read {}", path.display()))?
            {
                stack.push(entry?.path());
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("php") {
            continue;
        }
        let canonical = fs::canonicalize(&path).unwrap_or(path.clone());
        let canonical_str = canonical.to_string_lossy().into_owned();
        if !seen.insert(canonical_str.clone()) {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        if let Some(cached) = cache.files.get(&canonical_str) {
            if cached.hash == hash {
                if let Some(m) = metrics.as_deref_mut() {
                    m.cache_hits += 1;
                }
                files.push(cached.ast.clone());
                continue;
            }
        }
        match parse_php(&content, &canonical_str) {
            Ok(ast) => {
                if let Some(m) = metrics.as_deref_mut() {
                    m.files_parsed += 1;
                }
                cache.files.insert(
                    canonical_str,
                    CachedFile {
                        hash,
                        ast: ast.clone(),
                    },
                );
                files.push(ast);
            }
            Err(e) => {
                if let Some(m) = metrics.as_deref_mut() {
                    m.parse_errors += 1;
                }
                tracing::warn!("{e}");
            }
        }
    }
    cache.files.retain(|k, _| seen.contains(k));
    if let Some(cache_path) = cache_path {
        if let Ok(data) = serde_json::to_string(&cache) {
            let _ = fs::write(cache_path, data);
        }
    }
    // Deterministic analysis order regardless of directory iteration.
    files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BinOp, Callee, NodeKind};

    fn parse_snippet(code: &str) -> FileAst {
        parse_php(code, "<mem>").expect("parse php snippet")
    }

    fn first_stmt(ast: &FileAst) -> &NodeKind {
        &ast.nodes.first().expect("at least one statement").kind
    }

    #[test]
    fn lowers_echo_of_superglobal_subscript() {
        let ast = parse_snippet("<?php echo $_GET['q'];\n");
        let NodeKind::Echo(args) = first_stmt(&ast) else {
            panic!("expected echo, got {:?}", first_stmt(&ast));
        };
        let NodeKind::Subscript { base, index } = &args[0].kind else {
            panic!("expected subscript, got {:?}", args[0].kind);
        };
        assert!(matches!(&base.kind, NodeKind::Var(name) if name == "_GET"));
        let index = index.as_ref().expect("index");
        assert!(matches!(&index.kind, NodeKind::StringLit(s) if s == "q"));
    }

    #[test]
    fn lowers_assignment_and_concat() {
        let ast = parse_snippet("<?php $x = 'a' . $_GET['q'];\n");
        let NodeKind::ExprStmt(expr) = first_stmt(&ast) else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { target, value, op, by_ref } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(&target.kind, NodeKind::Var(name) if name == "x"));
        assert!(op.is_none());
        assert!(!by_ref);
        assert!(
            matches!(&value.kind, NodeKind::Binary { op: BinOp::Concat, .. }),
            "expected concat, got {:?}",
            value.kind
        );
    }

    #[test]
    fn lowers_function_definition_with_params() {
        let ast = parse_snippet("<?php function f(&$a, string $b = 'x', ...$rest) {}\n");
        let NodeKind::FunctionDecl(def) = first_stmt(&ast) else {
            panic!("expected function declaration");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 3);
        assert!(def.params[0].by_ref);
        assert_eq!(def.params[1].name, "b");
        assert_eq!(def.params[1].type_hint.as_deref(), Some("string"));
        assert!(def.params[2].variadic);
    }

    #[test]
    fn captures_doc_comment() {
        let code = "<?php\n/**\n * @param-taint $q exec_sql\n */\nfunction q($q) {}\n";
        let ast = parse_snippet(code);
        let NodeKind::FunctionDecl(def) = first_stmt(&ast) else {
            panic!("expected function declaration");
        };
        assert!(def.doc.as_deref().is_some_and(|d| d.contains("exec_sql")));
    }

    #[test]
    fn lowers_interpolated_string() {
        let ast = parse_snippet("<?php $greeting = \"hello $name\";\n");
        let NodeKind::ExprStmt(expr) = first_stmt(&ast) else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        let NodeKind::Interp(parts) = &value.kind else {
            panic!("expected interpolation, got {:?}", value.kind);
        };
        assert!(parts
            .iter()
            .any(|p| matches!(&p.kind, NodeKind::Var(name) if name == "name")));
    }

    #[test]
    fn lowers_array_literal_keys() {
        let ast = parse_snippet("<?php $a = ['k' => 1, 2];\n");
        let NodeKind::ExprStmt(expr) = first_stmt(&ast) else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        let NodeKind::ArrayLit(entries) = &value.kind else {
            panic!("expected array literal, got {:?}", value.kind);
        };
        assert_eq!(entries.len(), 2);
        assert!(entries[0].key.is_some());
        assert!(entries[1].key.is_none());
    }

    #[test]
    fn lowers_calls_and_reference_args() {
        let ast = parse_snippet("<?php safe(&$v);\n");
        let NodeKind::ExprStmt(expr) = first_stmt(&ast) else {
            panic!("expected expression statement");
        };
        let NodeKind::Call { callee, args } = &expr.kind else {
            panic!("expected call, got {:?}", expr.kind);
        };
        assert!(matches!(callee, Callee::Function(name) if name == "safe"));
        assert_eq!(args.len(), 1);
        assert!(args[0].by_ref);
    }

    #[test]
    fn unknown_constructs_keep_children() {
        let ast = parse_snippet("<?php yield $x;\n");
        // Whatever the shape, parsing must not fail and must keep nodes.
        assert!(!ast.nodes.is_empty());
    }

    #[test]
    fn project_walk_parses_and_caches() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.php"), "<?php echo $_GET['x'];\n").unwrap();
        fs::write(dir.path().join("skip.txt"), "not php").unwrap();
        let cache = dir.path().join("cache.json");

        let mut metrics = ParserMetrics::default();
        let files =
            parse_php_project(dir.path(), Some(&cache), Some(&mut metrics)).expect("parse");
        assert_eq!(files.len(), 1);
        assert_eq!(metrics.files_parsed, 1);

        let mut metrics = ParserMetrics::default();
        let files =
            parse_php_project(dir.path(), Some(&cache), Some(&mut metrics)).expect("reparse");
        assert_eq!(files.len(), 1);
        assert_eq!(metrics.cache_hits, 1);
    }
}
