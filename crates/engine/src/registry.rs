//! Function and class registry.
//!
//! Interns every callable the program defines (plus every builtin the
//! analysis knows about) to a dense [`FuncId`], and keeps the cloned
//! definitions so call sites can trigger lazy analysis of callees that
//! appear later in the program.

use ir::{ClassDef, FileAst, FunctionDef, Node, NodeKind, PropDef};
use std::collections::HashMap;
use taint::FuncId;

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Display name (`f` or `Cls::m`).
    pub name: String,
    pub def: Option<FunctionDef>,
    pub builtin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    pub parent: Option<String>,
    pub props: Vec<PropDef>,
    /// Lowercased method names.
    pub methods: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    ids: HashMap<String, FuncId>,
    funcs: Vec<FunctionInfo>,
    classes: HashMap<String, ClassInfo>,
}

impl Registry {
    /// Collect every function, method and class from the parsed files.
    pub fn build(files: &[FileAst]) -> Self {
        let mut registry = Registry::default();
        for file in files {
            for node in &file.nodes {
                registry.collect(node);
            }
        }
        registry
    }

    fn collect(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::FunctionDecl(def) => {
                self.register_function(&def.name.to_ascii_lowercase(), (**def).clone());
                for stmt in &def.body {
                    self.collect(stmt);
                }
            }
            NodeKind::ClassDecl(class) => self.register_class(class),
            NodeKind::Block(stmts) | NodeKind::Other(stmts) => {
                for stmt in stmts {
                    self.collect(stmt);
                }
            }
            NodeKind::If {
                then,
                elseifs,
                otherwise,
                ..
            } => {
                self.collect(then);
                for (_, body) in elseifs {
                    self.collect(body);
                }
                if let Some(body) = otherwise {
                    self.collect(body);
                }
            }
            NodeKind::While { body, .. }
            | NodeKind::DoWhile { body, .. }
            | NodeKind::For { body, .. }
            | NodeKind::Foreach { body, .. } => self.collect(body),
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                self.collect(body);
                for catch in catches {
                    self.collect(&catch.body);
                }
                if let Some(finally) = finally {
                    self.collect(finally);
                }
            }
            NodeKind::Switch { cases, .. } => {
                for case in cases {
                    for stmt in &case.body {
                        self.collect(stmt);
                    }
                }
            }
            _ => {}
        }
    }

    fn register_class(&mut self, class: &ClassDef) {
        let class_key = class.name.to_ascii_lowercase();
        let mut info = ClassInfo {
            parent: class.parent.clone(),
            props: class.props.clone(),
            methods: Vec::new(),
        };
        for method in &class.methods {
            let method_key = method.name.to_ascii_lowercase();
            info.methods.push(method_key.clone());
            self.register_function(&format!("{class_key}::{method_key}"), method.clone());
        }
        self.classes.insert(class_key, info);
    }

    /// Intern `key`, attaching `def` if the slot has none yet.
    pub fn register_function(&mut self, key: &str, def: FunctionDef) -> FuncId {
        let id = self.intern(key);
        let info = &mut self.funcs[id.0];
        if info.def.is_none() {
            info.name = display_name(key, &def);
            info.def = Some(def);
        }
        id
    }

    /// Intern a name without a definition (builtins, unresolved callees).
    pub fn intern(&mut self, key: &str) -> FuncId {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = FuncId(self.funcs.len());
        self.funcs.push(FunctionInfo {
            name: key.to_string(),
            def: None,
            builtin: false,
        });
        self.ids.insert(key.to_string(), id);
        id
    }

    pub fn mark_builtin(&mut self, key: &str) -> FuncId {
        let id = self.intern(key);
        self.funcs[id.0].builtin = true;
        id
    }

    pub fn lookup(&self, key: &str) -> Option<FuncId> {
        self.ids.get(key).copied()
    }

    pub fn func(&self, id: FuncId) -> &FunctionInfo {
        &self.funcs[id.0]
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&name.to_ascii_lowercase())
    }

    /// Resolve `class::method`, walking the parent chain.
    pub fn resolve_method(&self, class: &str, method: &str) -> Option<FuncId> {
        let method = method.to_ascii_lowercase();
        let mut current = Some(class.to_ascii_lowercase());
        let mut hops = 0;
        while let Some(class_key) = current {
            if let Some(id) = self.ids.get(&format!("{class_key}::{method}")) {
                return Some(*id);
            }
            current = self
                .classes
                .get(&class_key)
                .and_then(|c| c.parent.as_ref())
                .map(|p| p.to_ascii_lowercase());
            hops += 1;
            if hops > 32 {
                break;
            }
        }
        None
    }

    /// Every class defining a method of this name; used when the receiver
    /// class is not statically evident.
    pub fn methods_named(&self, method: &str) -> Vec<FuncId> {
        let method = method.to_ascii_lowercase();
        let mut out = Vec::new();
        for (class_key, info) in &self.classes {
            if info.methods.iter().any(|m| *m == method) {
                if let Some(&id) = self.ids.get(&format!("{class_key}::{method}")) {
                    out.push(id);
                }
            }
        }
        out.sort();
        out
    }

    pub fn all(&self) -> impl Iterator<Item = (FuncId, &FunctionInfo)> {
        self.funcs
            .iter()
            .enumerate()
            .map(|(index, info)| (FuncId(index), info))
    }
}

fn display_name(key: &str, def: &FunctionDef) -> String {
    if key.contains("::") || def.name.is_empty() {
        key.to_string()
    } else {
        def.name.clone()
    }
}
