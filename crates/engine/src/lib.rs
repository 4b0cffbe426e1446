//! Taint propagation engine.
//!
//! Walks the closed AST produced by `parsers`, tracking for every expression
//! a `(taintedness, cause-trail, links)` triple, writing shape-aware
//! annotations into per-scope symbol tables, refining per-function contracts
//! monotonically, and emitting findings where taint meets a sink.
//!
//! The driver re-runs whole-program passes until the contract store reports
//! no change; monotone contracts make that loop terminate.

use ir::FileAst;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use taint::{FuncId, FunctionTaintedness};
use tracing::debug;

mod annotations;
mod assignment;
mod builtins;
mod calls;
mod config;
mod contracts;
mod docblock;
mod registry;
mod visitor;

pub use annotations::{input_taint, superglobal_taint, Scope, VarAnnotations};
pub use builtins::builtin_taints;
pub use config::{AnalyzerConfig, FalsePositiveHook};
pub use contracts::{ContractStore, FunctionContract};
pub use registry::Registry;
pub use visitor::Eval;

/// One source location on a cause trail, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub file: String,
    pub line: usize,
}

/// A security finding: tainted data reached a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Category slug of the violated sink (`html`, `sql`, `double-escape` …).
    pub category: String,
    pub file: String,
    pub line: usize,
    pub message: String,
    /// The source-to-sink chain, oldest entry first.
    pub caused_by: Vec<TrailPoint>,
}

/// Inferred contract of one function, for `--dump-contracts`.
#[derive(Debug, Clone, Serialize)]
pub struct ContractDump {
    pub function: String,
    pub taint: FunctionTaintedness,
}

pub struct Analyzer {
    pub(crate) config: AnalyzerConfig,
    pub(crate) registry: Registry,
    pub(crate) contracts: ContractStore,
    pub(crate) global: Scope,
    /// Property annotations keyed `Class::$prop`.
    pub(crate) props: Scope,
    pub(crate) locals: Vec<Scope>,
    pub(crate) func_stack: Vec<FuncId>,
    pub(crate) class_stack: Vec<String>,
    pub(crate) return_hints: Vec<ir::ValueHint>,
    pub(crate) analyzing: HashSet<FuncId>,
    pub(crate) analyzed_this_pass: HashSet<FuncId>,
    pub(crate) findings: Vec<Finding>,
    pub(crate) seen_findings: HashSet<(String, usize, u32)>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            registry: Registry::default(),
            contracts: ContractStore::default(),
            global: Scope::default(),
            props: Scope::default(),
            locals: Vec::new(),
            func_stack: Vec::new(),
            class_stack: Vec::new(),
            return_hints: Vec::new(),
            analyzing: HashSet::new(),
            analyzed_this_pass: HashSet::new(),
            findings: Vec::new(),
            seen_findings: HashSet::new(),
        }
    }

    /// Analyze the whole program to a contract fixpoint and return the
    /// findings of the final pass.
    pub fn analyze(&mut self, files: &[FileAst]) -> Vec<Finding> {
        self.registry = Registry::build(files);
        for (name, taint) in builtins::builtin_taints() {
            let func = self.registry.mark_builtin(name);
            self.contracts.install(func, builtins::contract_for(taint));
        }

        for pass in 1..=self.config.max_passes.max(1) {
            debug!("analysis pass {pass}");
            self.findings.clear();
            self.seen_findings.clear();
            self.global = Scope::default();
            self.props = Scope::default();
            self.analyzed_this_pass.clear();

            for file in files {
                for node in &file.nodes {
                    self.visit(node);
                }
            }
            // Functions nothing calls still get analyzed for their own sinks.
            let defined: Vec<FuncId> = self
                .registry
                .all()
                .filter(|(_, info)| info.def.is_some())
                .map(|(func, _)| func)
                .collect();
            for func in defined {
                self.ensure_analyzed(func);
            }

            if !self.contracts.take_changed() {
                debug!("contracts stable after pass {pass}");
                break;
            }
        }
        self.findings.clone()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Contract of a function by source name (`f` or `Cls::m`), lowercased.
    pub fn contract_of(&self, name: &str) -> Option<&FunctionContract> {
        let func = self.registry.lookup(&name.to_ascii_lowercase())?;
        self.contracts.get(func)
    }

    /// Every non-builtin contract, for diagnostics dumps.
    pub fn contract_dump(&self) -> Vec<ContractDump> {
        let mut out: Vec<ContractDump> = self
            .contracts
            .iter()
            .filter(|(func, _)| !self.registry.func(*func).builtin)
            .map(|(func, contract)| ContractDump {
                function: self.registry.func(func).name.clone(),
                taint: contract.taint.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.function.cmp(&b.function));
        out
    }
}

/// Parse and analyze in one step; convenience for tests and the CLI.
pub fn analyze_source(code: &str, config: &AnalyzerConfig) -> anyhow::Result<Vec<Finding>> {
    let ast = parsers::parse_php(code, "<mem>")?;
    let mut analyzer = Analyzer::new(config.clone());
    Ok(analyzer.analyze(std::slice::from_ref(&ast)))
}
