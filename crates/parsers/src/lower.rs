//! Lowering from the tree-sitter CST into the closed AST.
//!
//! Field lookups fall back to positional children because grammar versions
//! disagree on field names. Kinds the lowering does not recognise become
//! [`NodeKind::Other`] containers so the engine still visits their children.

use ir::{
    Arg, ArrayEntry, BinOp, Callee, CastKind, CatchClause, ClassDef, FunctionDef, MatchArm, Meta,
    Node, NodeKind, Param, PropDef, SwitchCase, UnaryOp,
};
use tree_sitter::Node as TsNode;

pub(crate) struct Lower<'a> {
    src: &'a str,
    file: &'a str,
}

impl<'a> Lower<'a> {
    pub(crate) fn new(src: &'a str, file: &'a str) -> Self {
        Self { src, file }
    }

    fn meta(&self, node: TsNode) -> Meta {
        let pos = node.start_position();
        Meta::new(self.file, pos.row + 1, pos.column + 1)
    }

    fn text(&self, node: TsNode) -> &'a str {
        node.utf8_text(self.src.as_bytes()).unwrap_or("")
    }

    fn named_children<'t>(&self, node: TsNode<'t>) -> Vec<TsNode<'t>> {
        let mut cursor = node.walk();
        node.named_children(&mut cursor).collect()
    }

    fn field<'t>(&self, node: TsNode<'t>, name: &str) -> Option<TsNode<'t>> {
        node.child_by_field_name(name)
    }

    /// Lower a statement sequence, attaching `/** … */` comments to the
    /// declaration that follows them.
    pub(crate) fn lower_sequence(&self, parent: TsNode) -> Vec<Node> {
        let mut out = Vec::new();
        let mut doc: Option<String> = None;
        let mut cursor = parent.walk();
        for child in parent.children(&mut cursor) {
            match child.kind() {
                "comment" => {
                    let text = self.text(child);
                    if text.starts_with("/**") {
                        doc = Some(text.to_string());
                    }
                }
                "php_tag" | "text" | "text_interpolation" => {}
                _ if !child.is_named() => {}
                _ => {
                    if let Some(node) = self.lower_any(child, doc.take()) {
                        out.push(node);
                    }
                }
            }
        }
        out
    }

    fn lower_expr(&self, node: TsNode) -> Node {
        self.lower_any(node, None)
            .unwrap_or_else(|| Node::new(NodeKind::Other(Vec::new()), self.meta(node)))
    }

    fn lower_opt(&self, node: Option<TsNode>) -> Option<Box<Node>> {
        node.map(|n| Box::new(self.lower_expr(n)))
    }

    fn lower_children_as_other(&self, node: TsNode) -> NodeKind {
        NodeKind::Other(
            self.named_children(node)
                .into_iter()
                .filter(|c| c.kind() != "comment")
                .map(|c| self.lower_expr(c))
                .collect(),
        )
    }

    fn lower_any(&self, node: TsNode, doc: Option<String>) -> Option<Node> {
        let meta = self.meta(node);
        let kind = match node.kind() {
            // ---- statements ----
            "expression_statement" => {
                let inner = self.named_children(node).into_iter().next()?;
                NodeKind::ExprStmt(Box::new(self.lower_expr(inner)))
            }
            "compound_statement" => NodeKind::Block(self.lower_sequence(node)),
            "echo_statement" => NodeKind::Echo(self.lower_flattened_exprs(node)),
            "print_intrinsic" => {
                let arg = self.named_children(node).into_iter().next()?;
                NodeKind::Print(Box::new(self.lower_expr(arg)))
            }
            "exit_statement" => NodeKind::Exit(
                self.named_children(node)
                    .into_iter()
                    .next()
                    .map(|n| Box::new(self.lower_expr(n))),
            ),
            "unset_statement" => NodeKind::Unset(
                self.named_children(node)
                    .into_iter()
                    .map(|n| self.lower_expr(n))
                    .collect(),
            ),
            "if_statement" => self.lower_if(node)?,
            "while_statement" => NodeKind::While {
                cond: Box::new(self.lower_condition(node)?),
                body: Box::new(self.lower_body(node)?),
            },
            "do_statement" => NodeKind::DoWhile {
                body: Box::new(self.lower_body(node)?),
                cond: Box::new(self.lower_condition(node)?),
            },
            "for_statement" => self.lower_for(node)?,
            "foreach_statement" => self.lower_foreach(node)?,
            "switch_statement" => self.lower_switch(node)?,
            "return_statement" => NodeKind::Return(
                self.named_children(node)
                    .into_iter()
                    .next()
                    .map(|n| Box::new(self.lower_expr(n))),
            ),
            "break_statement" => NodeKind::Break,
            "continue_statement" => NodeKind::Continue,
            "global_declaration" => NodeKind::Global(
                self.named_children(node)
                    .into_iter()
                    .map(|n| self.text(n).trim_start_matches('$').to_string())
                    .collect(),
            ),
            "function_static_declaration" => NodeKind::StaticVar(
                self.named_children(node)
                    .into_iter()
                    .filter(|n| n.kind() == "static_variable_declaration")
                    .map(|decl| {
                        let name = self
                            .field(decl, "name")
                            .map(|n| self.text(n).trim_start_matches('$').to_string())
                            .unwrap_or_default();
                        let value = self.field(decl, "value").map(|v| self.lower_expr(v));
                        (name, value)
                    })
                    .collect(),
            ),
            "try_statement" => self.lower_try(node)?,
            "throw_statement" | "throw_expression" => {
                let inner = self.named_children(node).into_iter().next()?;
                NodeKind::Throw(Box::new(self.lower_expr(inner)))
            }
            "function_definition" => {
                NodeKind::FunctionDecl(Box::new(self.lower_function(node, doc)?))
            }
            "class_declaration" => NodeKind::ClassDecl(Box::new(self.lower_class(node)?)),
            // Namespaces are transparent to the analysis; keep visiting.
            "namespace_definition" | "namespace_use_declaration" | "declare_statement" => {
                self.lower_children_as_other(node)
            }

            // ---- literals ----
            "integer" => NodeKind::IntLit(parse_php_int(self.text(node))),
            "float" => NodeKind::FloatLit(self.text(node).replace('_', "").parse().unwrap_or(0.0)),
            "string" => NodeKind::StringLit(strip_quotes(self.text(node))),
            "encapsed_string" | "heredoc" => NodeKind::Interp(self.lower_string_parts(node)),
            "shell_command_expression" => NodeKind::ShellExec(self.lower_string_parts(node)),
            "boolean" => NodeKind::BoolLit(self.text(node).eq_ignore_ascii_case("true")),
            "null" => NodeKind::NullLit,
            "name" | "qualified_name" => NodeKind::ConstFetch(self.text(node).to_string()),

            // ---- variables and access paths ----
            "variable_name" => NodeKind::Var(self.text(node).trim_start_matches('$').to_string()),
            "subscript_expression" => {
                let children = self.named_children(node);
                let base = self
                    .field(node, "value")
                    .or_else(|| children.first().copied())?;
                let index = self
                    .field(node, "index")
                    .or_else(|| children.get(1).copied());
                NodeKind::Subscript {
                    base: Box::new(self.lower_expr(base)),
                    index: self.lower_opt(index),
                }
            }
            "member_access_expression" | "nullsafe_member_access_expression" => {
                let object = self
                    .field(node, "object")
                    .or_else(|| self.named_children(node).into_iter().next())?;
                let name = self.field(node, "name");
                NodeKind::Prop {
                    object: Box::new(self.lower_expr(object)),
                    name: name.and_then(|n| match n.kind() {
                        "name" => Some(self.text(n).to_string()),
                        _ => None,
                    }),
                }
            }
            "scoped_property_access_expression" => {
                let class = self
                    .field(node, "scope")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default();
                let name = self
                    .field(node, "name")
                    .map(|n| self.text(n).trim_start_matches('$').to_string())
                    .unwrap_or_default();
                NodeKind::StaticProp { class, name }
            }
            "class_constant_access_expression" => {
                let children = self.named_children(node);
                NodeKind::ClassConst {
                    class: children
                        .first()
                        .map(|n| self.text(*n).to_string())
                        .unwrap_or_default(),
                    name: children
                        .get(1)
                        .map(|n| self.text(*n).to_string())
                        .unwrap_or_default(),
                }
            }

            // ---- operators ----
            "binary_expression" => self.lower_binary(node)?,
            "unary_op_expression" => {
                let operand = self.named_children(node).into_iter().last()?;
                let op = match node.child(0).map(|c| self.text(c)) {
                    Some("~") => UnaryOp::BitNot,
                    Some("!") => UnaryOp::Not,
                    _ => UnaryOp::Sign,
                };
                NodeKind::Unary {
                    op,
                    operand: Box::new(self.lower_expr(operand)),
                }
            }
            "error_suppression_expression" => {
                let operand = self.named_children(node).into_iter().next()?;
                NodeKind::Unary {
                    op: UnaryOp::Silence,
                    operand: Box::new(self.lower_expr(operand)),
                }
            }
            "cast_expression" => {
                let children = self.named_children(node);
                let ty = self
                    .field(node, "type")
                    .or_else(|| children.first().copied())
                    .map(|n| self.text(n).to_ascii_lowercase())
                    .unwrap_or_default();
                let expr = self
                    .field(node, "value")
                    .or_else(|| children.last().copied())?;
                NodeKind::Cast {
                    to: cast_kind(&ty),
                    expr: Box::new(self.lower_expr(expr)),
                }
            }
            "update_expression" => {
                let target = self
                    .field(node, "argument")
                    .or_else(|| self.named_children(node).into_iter().next())?;
                NodeKind::IncDec(Box::new(self.lower_expr(target)))
            }
            "conditional_expression" => NodeKind::Ternary {
                cond: Box::new(self.lower_expr(self.field(node, "condition").or_else(|| {
                    self.named_children(node).into_iter().next()
                })?)),
                then: self.lower_opt(self.field(node, "body")),
                otherwise: Box::new(self.lower_expr(
                    self.field(node, "alternative")
                        .or_else(|| self.named_children(node).into_iter().last())?,
                )),
            },
            "match_expression" => self.lower_match(node)?,
            "augmented_assignment_expression" => {
                let left = self
                    .field(node, "left")
                    .or_else(|| self.named_children(node).into_iter().next())?;
                let right = self
                    .field(node, "right")
                    .or_else(|| self.named_children(node).into_iter().last())?;
                let op_text = self
                    .field(node, "operator")
                    .map(|n| self.text(n))
                    .unwrap_or("");
                NodeKind::Assign {
                    target: Box::new(self.lower_expr(left)),
                    value: Box::new(self.lower_expr(right)),
                    op: Some(augmented_op(op_text)),
                    by_ref: false,
                }
            }
            "assignment_expression"
            | "reference_assignment_expression"
            | "by_ref_assignment_expression" => {
                let left = self
                    .field(node, "left")
                    .or_else(|| self.named_children(node).into_iter().next())?;
                let right = self
                    .field(node, "right")
                    .or_else(|| self.named_children(node).into_iter().last())?;
                let by_ref =
                    node.kind() != "assignment_expression" || node_text_has_ref(self, node);
                NodeKind::Assign {
                    target: Box::new(self.lower_expr(left)),
                    value: Box::new(self.lower_expr(right)),
                    op: None,
                    by_ref,
                }
            }
            "parenthesized_expression" => {
                let inner = self.named_children(node).into_iter().next()?;
                return self.lower_any(inner, None);
            }
            "sequence_expression" => self.lower_children_as_other(node),
            "clone_expression" => {
                let inner = self.named_children(node).into_iter().next()?;
                NodeKind::Clone(Box::new(self.lower_expr(inner)))
            }

            // ---- arrays ----
            "array_creation_expression" | "list_literal" => {
                NodeKind::ArrayLit(self.lower_array_entries(node))
            }

            // ---- calls ----
            "function_call_expression" => self.lower_function_call(node)?,
            "member_call_expression" | "nullsafe_member_call_expression" => {
                let object = self
                    .field(node, "object")
                    .or_else(|| self.named_children(node).into_iter().next())?;
                let name = self.field(node, "name").and_then(|n| match n.kind() {
                    "name" => Some(self.text(n).to_string()),
                    _ => None,
                });
                NodeKind::Call {
                    callee: Callee::Method {
                        object: Box::new(self.lower_expr(object)),
                        name,
                    },
                    args: self.lower_args(self.field(node, "arguments")),
                }
            }
            "scoped_call_expression" => NodeKind::Call {
                callee: Callee::StaticMethod {
                    class: self
                        .field(node, "scope")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    name: self
                        .field(node, "name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                },
                args: self.lower_args(self.field(node, "arguments")),
            },
            "object_creation_expression" => {
                let class = self
                    .named_children(node)
                    .into_iter()
                    .find(|n| matches!(n.kind(), "name" | "qualified_name"))
                    .map(|n| self.text(n).trim_start_matches('\\').to_string());
                NodeKind::New {
                    class,
                    args: self.lower_args(
                        self.field(node, "arguments").or_else(|| {
                            self.named_children(node)
                                .into_iter()
                                .find(|n| n.kind() == "arguments")
                        }),
                    ),
                }
            }
            "include_expression" | "include_once_expression" | "require_expression"
            | "require_once_expression" => {
                let inner = self.named_children(node).into_iter().next()?;
                NodeKind::Include {
                    require: node.kind().starts_with("require"),
                    once: node.kind().contains("once"),
                    expr: Box::new(self.lower_expr(inner)),
                }
            }
            "anonymous_function_creation_expression" => self.lower_closure(node)?,
            "arrow_function" => self.lower_arrow(node)?,

            // Unparsed or unmodelled: keep the children reachable.
            _ => self.lower_children_as_other(node),
        };
        Some(Node::new(kind, meta))
    }

    /// `echo a, b` style lists: flatten sequence expressions.
    fn lower_flattened_exprs(&self, node: TsNode) -> Vec<Node> {
        let mut out = Vec::new();
        for child in self.named_children(node) {
            if child.kind() == "sequence_expression" {
                for part in self.named_children(child) {
                    out.push(self.lower_expr(part));
                }
            } else {
                out.push(self.lower_expr(child));
            }
        }
        out
    }

    fn lower_condition(&self, node: TsNode) -> Option<Node> {
        let cond = self
            .field(node, "condition")
            .or_else(|| self.named_children(node).into_iter().next())?;
        Some(self.lower_expr(cond))
    }

    fn lower_body(&self, node: TsNode) -> Option<Node> {
        let body = self
            .field(node, "body")
            .or_else(|| self.named_children(node).into_iter().last())?;
        self.lower_any(body, None)
    }

    fn lower_if(&self, node: TsNode) -> Option<NodeKind> {
        let cond_node = self
            .field(node, "condition")
            .or_else(|| self.named_children(node).into_iter().next())?;
        let cond = self.lower_expr(cond_node);
        let cond_id = cond_node.id();
        let then = self
            .field(node, "body")
            .or_else(|| {
                self.named_children(node).into_iter().find(|c| {
                    c.id() != cond_id && !matches!(c.kind(), "else_if_clause" | "else_clause")
                })
            })
            .and_then(|b| self.lower_any(b, None))?;
        let mut elseifs = Vec::new();
        let mut otherwise = None;
        for child in self.named_children(node) {
            match child.kind() {
                "else_if_clause" => {
                    let c = self.lower_condition(child)?;
                    let b = self.lower_body(child)?;
                    elseifs.push((c, b));
                }
                "else_clause" => {
                    otherwise = self.lower_body(child).map(Box::new);
                }
                _ => {}
            }
        }
        Some(NodeKind::If {
            cond: Box::new(cond),
            then: Box::new(then),
            elseifs,
            otherwise,
        })
    }

    fn lower_for(&self, node: TsNode) -> Option<NodeKind> {
        let children = self.named_children(node);
        let body = self
            .field(node, "body")
            .or_else(|| children.last().copied())?;
        let body_id = body.id();
        let header = children
            .into_iter()
            .filter(|c| c.id() != body_id)
            .flat_map(|c| {
                if c.kind() == "sequence_expression" {
                    self.named_children(c)
                        .into_iter()
                        .map(|p| self.lower_expr(p))
                        .collect()
                } else {
                    vec![self.lower_expr(c)]
                }
            })
            .collect();
        Some(NodeKind::For {
            header,
            body: Box::new(self.lower_any(body, None)?),
        })
    }

    fn lower_foreach(&self, node: TsNode) -> Option<NodeKind> {
        let children = self.named_children(node);
        let subject = children.first().copied()?;
        let body = self
            .field(node, "body")
            .or_else(|| children.last().copied())?;
        let body_id = body.id();
        let subject_id = subject.id();
        let mut key_var = None;
        let mut value_var = None;
        for child in children {
            if child.id() == body_id || child.id() == subject_id {
                continue;
            }
            match child.kind() {
                "pair" | "foreach_pair" => {
                    let parts = self.named_children(child);
                    key_var = parts.first().map(|k| Box::new(self.lower_expr(*k)));
                    value_var = parts.get(1).map(|v| Box::new(self.lower_expr(*v)));
                }
                "by_ref" => {
                    let inner = self.named_children(child).into_iter().next()?;
                    value_var = Some(Box::new(self.lower_expr(inner)));
                }
                _ if value_var.is_none() => {
                    value_var = Some(Box::new(self.lower_expr(child)));
                }
                _ => {}
            }
        }
        let by_ref = self.text(node).contains("as &") || self.text(node).contains("=> &");
        Some(NodeKind::Foreach {
            subject: Box::new(self.lower_expr(subject)),
            key_var,
            value_var: value_var?,
            by_ref,
            body: Box::new(self.lower_any(body, None)?),
        })
    }

    fn lower_switch(&self, node: TsNode) -> Option<NodeKind> {
        let subject = self.lower_condition(node)?;
        let mut cases = Vec::new();
        if let Some(block) = self
            .field(node, "body")
            .or_else(|| self.named_children(node).into_iter().last())
        {
            for case in self.named_children(block) {
                match case.kind() {
                    "case_statement" => {
                        let test = self.field(case, "value").map(|v| self.lower_expr(v));
                        let body = self
                            .named_children(case)
                            .into_iter()
                            .skip(if test.is_some() { 1 } else { 0 })
                            .filter_map(|s| self.lower_any(s, None))
                            .collect();
                        cases.push(SwitchCase { test, body });
                    }
                    "default_statement" => {
                        let body = self
                            .named_children(case)
                            .into_iter()
                            .filter_map(|s| self.lower_any(s, None))
                            .collect();
                        cases.push(SwitchCase { test: None, body });
                    }
                    _ => {}
                }
            }
        }
        Some(NodeKind::Switch {
            subject: Box::new(subject),
            cases,
        })
    }

    fn lower_try(&self, node: TsNode) -> Option<NodeKind> {
        let body = self
            .field(node, "body")
            .and_then(|b| self.lower_any(b, None))?;
        let mut catches = Vec::new();
        let mut finally = None;
        for child in self.named_children(node) {
            match child.kind() {
                "catch_clause" => {
                    let var = self
                        .named_children(child)
                        .into_iter()
                        .find(|n| n.kind() == "variable_name")
                        .map(|n| self.text(n).trim_start_matches('$').to_string());
                    let Some(catch_body) = self.lower_body(child) else {
                        continue;
                    };
                    catches.push(CatchClause {
                        var,
                        body: catch_body,
                    });
                }
                "finally_clause" => {
                    finally = self.lower_body(child).map(Box::new);
                }
                _ => {}
            }
        }
        Some(NodeKind::Try {
            body: Box::new(body),
            catches,
            finally,
        })
    }

    fn lower_binary(&self, node: TsNode) -> Option<NodeKind> {
        let children = self.named_children(node);
        let left = self
            .field(node, "left")
            .or_else(|| children.first().copied())?;
        let right = self
            .field(node, "right")
            .or_else(|| children.last().copied())?;
        let op_text = self
            .field(node, "operator")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| {
                // The operator sits between the operands as an anonymous token.
                let mut cursor = node.walk();
                let found = node
                    .children(&mut cursor)
                    .find(|c| !c.is_named())
                    .map(|c| self.text(c).to_string())
                    .unwrap_or_default();
                found
            });
        Some(NodeKind::Binary {
            op: binary_op(&op_text),
            left: Box::new(self.lower_expr(left)),
            right: Box::new(self.lower_expr(right)),
        })
    }

    fn lower_match(&self, node: TsNode) -> Option<NodeKind> {
        let subject = self.lower_condition(node)?;
        let mut arms = Vec::new();
        if let Some(block) = self
            .field(node, "body")
            .or_else(|| self.named_children(node).into_iter().last())
        {
            for arm in self.named_children(block) {
                match arm.kind() {
                    "match_conditional_expression" => {
                        let conditions = self
                            .field(arm, "conditional_expressions")
                            .map(|list| {
                                self.named_children(list)
                                    .into_iter()
                                    .map(|c| self.lower_expr(c))
                                    .collect()
                            })
                            .unwrap_or_default();
                        let body = self
                            .field(arm, "return_expression")
                            .or_else(|| self.named_children(arm).into_iter().last())?;
                        arms.push(MatchArm {
                            conditions: Some(conditions),
                            body: self.lower_expr(body),
                        });
                    }
                    "match_default_expression" => {
                        let body = self
                            .field(arm, "return_expression")
                            .or_else(|| self.named_children(arm).into_iter().last())?;
                        arms.push(MatchArm {
                            conditions: None,
                            body: self.lower_expr(body),
                        });
                    }
                    _ => {}
                }
            }
        }
        Some(NodeKind::Match {
            subject: Box::new(subject),
            arms,
        })
    }

    fn lower_string_parts(&self, node: TsNode) -> Vec<Node> {
        let mut parts = Vec::new();
        for child in self.named_children(node) {
            let meta = self.meta(child);
            match child.kind() {
                // Heredoc bodies nest their own interpolations.
                "heredoc_body" => parts.extend(self.lower_string_parts(child)),
                "string_value" | "string" | "string_content" => {
                    parts.push(Node::new(
                        NodeKind::StringLit(self.text(child).to_string()),
                        meta,
                    ));
                }
                "escape_sequence" => {
                    parts.push(Node::new(
                        NodeKind::StringLit(self.text(child).to_string()),
                        meta,
                    ));
                }
                _ => parts.push(self.lower_expr(child)),
            }
        }
        parts
    }

    fn lower_array_entries(&self, node: TsNode) -> Vec<ArrayEntry> {
        let mut entries = Vec::new();
        for child in self.named_children(node) {
            match child.kind() {
                "array_element_initializer" => {
                    let text = self.text(child);
                    let spread = text.trim_start().starts_with("...");
                    let by_ref = text.trim_start().starts_with('&');
                    let parts = self.named_children(child);
                    match parts.len() {
                        0 => {}
                        1 => entries.push(ArrayEntry {
                            key: None,
                            value: self.lower_expr(parts[0]),
                            by_ref,
                            spread,
                        }),
                        _ => entries.push(ArrayEntry {
                            key: Some(self.lower_expr(parts[0])),
                            value: self.lower_expr(parts[parts.len() - 1]),
                            by_ref,
                            spread,
                        }),
                    }
                }
                // `list($a, $b)` elements appear directly.
                _ => entries.push(ArrayEntry {
                    key: None,
                    value: self.lower_expr(child),
                    by_ref: false,
                    spread: false,
                }),
            }
        }
        entries
    }

    fn lower_args(&self, arguments: Option<TsNode>) -> Vec<Arg> {
        let Some(arguments) = arguments else {
            return Vec::new();
        };
        let mut args = Vec::new();
        for child in self.named_children(arguments) {
            match child.kind() {
                "argument" => {
                    let text = self.text(child);
                    let by_ref = text.trim_start().starts_with('&');
                    let spread = text.trim_start().starts_with("...")
                        || self
                            .named_children(child)
                            .iter()
                            .any(|n| n.kind() == "variadic_unpacking");
                    let Some(value) = self.named_children(child).into_iter().last() else {
                        continue;
                    };
                    let value = if value.kind() == "variadic_unpacking" {
                        self.named_children(value).into_iter().next().unwrap_or(value)
                    } else {
                        value
                    };
                    args.push(Arg {
                        value: self.lower_expr(value),
                        by_ref,
                        spread,
                    });
                }
                "variadic_unpacking" => {
                    let Some(inner) = self.named_children(child).into_iter().next() else {
                        continue;
                    };
                    args.push(Arg {
                        value: self.lower_expr(inner),
                        by_ref: false,
                        spread: true,
                    });
                }
                _ => {
                    let text = self.text(child);
                    args.push(Arg {
                        value: self.lower_expr(child),
                        by_ref: text.trim_start().starts_with('&'),
                        spread: false,
                    });
                }
            }
        }
        args
    }

    fn lower_function_call(&self, node: TsNode) -> Option<NodeKind> {
        let callee = self
            .field(node, "function")
            .or_else(|| self.field(node, "name"))
            .or_else(|| self.named_children(node).into_iter().next())?;
        let args = self.lower_args(self.field(node, "arguments").or_else(|| {
            self.named_children(node)
                .into_iter()
                .find(|n| n.kind() == "arguments")
        }));
        if matches!(callee.kind(), "name" | "qualified_name") {
            let name = self.text(callee).trim_start_matches('\\').to_string();
            // Language constructs parsed as calls.
            return Some(match name.to_ascii_lowercase().as_str() {
                "eval" => match args.into_iter().next() {
                    Some(arg) => NodeKind::Eval(Box::new(arg.value)),
                    None => NodeKind::Other(Vec::new()),
                },
                "isset" => NodeKind::Isset(args.into_iter().map(|a| a.value).collect()),
                "empty" => match args.into_iter().next() {
                    Some(arg) => NodeKind::Empty(Box::new(arg.value)),
                    None => NodeKind::Other(Vec::new()),
                },
                "exit" | "die" => {
                    NodeKind::Exit(args.into_iter().next().map(|a| Box::new(a.value)))
                }
                _ => NodeKind::Call {
                    callee: Callee::Function(name),
                    args,
                },
            });
        }
        Some(NodeKind::Call {
            callee: Callee::Dynamic(Box::new(self.lower_expr(callee))),
            args,
        })
    }

    fn lower_params(&self, parameters: Option<TsNode>) -> Vec<Param> {
        let Some(parameters) = parameters else {
            return Vec::new();
        };
        let mut params = Vec::new();
        for child in self.named_children(parameters) {
            match child.kind() {
                "simple_parameter" | "variadic_parameter" | "property_promotion_parameter" => {
                    let name = self
                        .field(child, "name")
                        .or_else(|| {
                            self.named_children(child)
                                .into_iter()
                                .find(|n| n.kind() == "variable_name")
                        })
                        .map(|n| self.text(n).trim_start_matches('$').to_string())
                        .unwrap_or_default();
                    let type_hint = self
                        .field(child, "type")
                        .map(|n| self.text(n).to_string());
                    let default = self
                        .field(child, "default_value")
                        .map(|n| self.lower_expr(n));
                    let by_ref = {
                        let mut cursor = child.walk();
                        let result = child.children(&mut cursor).any(|c| {
                            c.kind() == "reference_modifier" || (!c.is_named() && self.text(c) == "&")
                        });
                        result
                    };
                    params.push(Param {
                        name,
                        by_ref,
                        variadic: child.kind() == "variadic_parameter"
                            || self.text(child).contains("..."),
                        type_hint,
                        default,
                    });
                }
                _ => {}
            }
        }
        params
    }

    fn lower_function(&self, node: TsNode, doc: Option<String>) -> Option<FunctionDef> {
        let name = self
            .field(node, "name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let params = self.lower_params(self.field(node, "parameters"));
        let return_hint = self
            .field(node, "return_type")
            .map(|n| self.text(n).trim_start_matches(':').trim().to_string());
        let body = self
            .field(node, "body")
            .map(|b| self.lower_sequence(b))
            .unwrap_or_default();
        Some(FunctionDef {
            name,
            params,
            body,
            doc,
            return_hint,
            meta: self.meta(node),
        })
    }

    fn lower_closure(&self, node: TsNode) -> Option<NodeKind> {
        let def = self.lower_function(node, None)?;
        let mut uses = Vec::new();
        for child in self.named_children(node) {
            if child.kind() == "anonymous_function_use_clause" {
                let mut cursor = child.walk();
                let mut pending_ref = false;
                for var in child.children(&mut cursor) {
                    if var.kind() == "reference_modifier" || (!var.is_named() && self.text(var) == "&")
                    {
                        pending_ref = true;
                    } else if var.kind() == "variable_name" {
                        uses.push((
                            self.text(var).trim_start_matches('$').to_string(),
                            pending_ref,
                        ));
                        pending_ref = false;
                    }
                }
            }
        }
        Some(NodeKind::Closure {
            def: Box::new(def),
            uses,
        })
    }

    fn lower_arrow(&self, node: TsNode) -> Option<NodeKind> {
        let params = self.lower_params(self.field(node, "parameters"));
        let body_expr = self
            .field(node, "body")
            .or_else(|| self.named_children(node).into_iter().last())?;
        let meta = self.meta(node);
        let def = FunctionDef {
            name: String::new(),
            params,
            body: vec![Node::new(
                NodeKind::Return(Some(Box::new(self.lower_expr(body_expr)))),
                self.meta(body_expr),
            )],
            doc: None,
            return_hint: self
                .field(node, "return_type")
                .map(|n| self.text(n).trim_start_matches(':').trim().to_string()),
            meta,
        };
        // Arrow functions capture implicitly; the engine treats missing
        // captures as unknown reads.
        Some(NodeKind::Closure {
            def: Box::new(def),
            uses: Vec::new(),
        })
    }

    fn lower_class(&self, node: TsNode) -> Option<ClassDef> {
        let name = self
            .field(node, "name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let parent = self
            .named_children(node)
            .into_iter()
            .find(|n| n.kind() == "base_clause")
            .and_then(|b| self.named_children(b).into_iter().next())
            .map(|n| self.text(n).to_string());
        let mut props = Vec::new();
        let mut methods = Vec::new();
        if let Some(body) = self
            .field(node, "body")
            .or_else(|| {
                self.named_children(node)
                    .into_iter()
                    .find(|n| n.kind() == "declaration_list")
            })
        {
            let mut doc: Option<String> = None;
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                match member.kind() {
                    "comment" => {
                        let text = self.text(member);
                        if text.starts_with("/**") {
                            doc = Some(text.to_string());
                        }
                    }
                    "property_declaration" => {
                        let is_static = self.text(member).contains("static");
                        for element in self.named_children(member) {
                            if element.kind() == "property_element" {
                                let pname = self
                                    .named_children(element)
                                    .into_iter()
                                    .find(|n| n.kind() == "variable_name")
                                    .map(|n| self.text(n).trim_start_matches('$').to_string());
                                if let Some(pname) = pname {
                                    let default = self
                                        .named_children(element)
                                        .into_iter()
                                        .find(|n| n.kind() != "variable_name")
                                        .map(|n| self.lower_expr(n));
                                    props.push(PropDef {
                                        name: pname,
                                        is_static,
                                        default,
                                    });
                                }
                            }
                        }
                        doc = None;
                    }
                    "method_declaration" => {
                        if let Some(def) = self.lower_function(member, doc.take()) {
                            methods.push(def);
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(ClassDef {
            name,
            parent,
            props,
            methods,
            meta: self.meta(node),
        })
    }
}

fn node_text_has_ref(lower: &Lower<'_>, node: TsNode) -> bool {
    // `$a = &$b` may parse as a plain assignment whose right side is
    // preceded by an `&` token.
    let node_text = lower.text(node);
    node_text
        .find('=')
        .map(|eq| node_text[eq + 1..].trim_start().starts_with('&'))
        .unwrap_or(false)
}

fn parse_php_int(text: &str) -> i64 {
    let text = text.replace('_', "");
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8)
    } else {
        text.parse()
    };
    parsed.unwrap_or(0)
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'').to_string()
}

fn cast_kind(ty: &str) -> CastKind {
    match ty {
        "string" | "binary" => CastKind::String,
        "array" => CastKind::Array,
        "object" => CastKind::Object,
        "int" | "integer" => CastKind::Int,
        "float" | "double" | "real" => CastKind::Float,
        "bool" | "boolean" => CastKind::Bool,
        _ => CastKind::Unset,
    }
}

fn binary_op(op: &str) -> BinOp {
    match op {
        "." => BinOp::Concat,
        "+" => BinOp::Plus,
        "??" => BinOp::Coalesce,
        "&&" | "||" | "and" | "or" | "xor" => BinOp::Logic,
        "==" | "!=" | "===" | "!==" | "<" | ">" | "<=" | ">=" | "<=>" | "<>" | "instanceof" => {
            BinOp::Compare
        }
        _ => BinOp::Arith,
    }
}

fn augmented_op(op: &str) -> BinOp {
    match op {
        ".=" => BinOp::Concat,
        "+=" => BinOp::Plus,
        "??=" => BinOp::Coalesce,
        _ => BinOp::Arith,
    }
}
