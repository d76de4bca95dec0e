//! Parse-tree construction and evaluation for conditional expressions.
//!
//! Nodes live in an arena and link to each other by index, so neither
//! the build nor the evaluation recurses: the build percolates a cursor
//! upward per inserted token, and evaluation is an explicit post-order
//! walk driven by per-node `done` flags.

use crate::token::{Token, Tokenizer};
use ssiflow_core::env::{interpolate, Environment};
use ssiflow_core::MAX_STRING_LEN;
use thiserror::Error;

/// Expression evaluation error. All variants leave the conditional
/// state of the caller untouched.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("Invalid expression \"{0}\"")]
    Invalid(String),

    #[error("Unmatched '(' in \"{0}\"")]
    UnmatchedOpen(String),

    #[error("Unmatched ')' in \"{0}\"")]
    UnmatchedClose(String),

    #[error("Invalid rexp \"{0}\"")]
    BadRegex(String),
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprResult {
    pub value: bool,
    /// An unterminated `'` was seen while tokenizing.
    pub unmatched_quote: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Str(String),
    And,
    Or,
    Not,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    LBrace,
    /// A parenthesised group; `LBrace` is retyped on the matching `)`.
    Group,
}

impl NodeKind {
    fn from_token(tok: Token) -> Self {
        match tok {
            Token::Str(s) => NodeKind::Str(s),
            Token::And => NodeKind::And,
            Token::Or => NodeKind::Or,
            Token::Not => NodeKind::Not,
            Token::Eq => NodeKind::Eq,
            Token::Ne => NodeKind::Ne,
            Token::Ge => NodeKind::Ge,
            Token::Gt => NodeKind::Gt,
            Token::Le => NodeKind::Le,
            Token::Lt => NodeKind::Lt,
            Token::LBrace => NodeKind::LBrace,
            Token::RBrace => unreachable!("RBrace is never stored"),
        }
    }

    fn is_operator(&self) -> bool {
        !matches!(self, NodeKind::Str(_) | NodeKind::Group)
    }

    fn is_comparison(&self) -> bool {
        matches!(
            self,
            NodeKind::Eq | NodeKind::Ne | NodeKind::Ge | NodeKind::Gt | NodeKind::Le | NodeKind::Lt
        )
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    value: bool,
    done: bool,
}

#[derive(Default)]
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn alloc(&mut self, kind: NodeKind) -> usize {
        self.nodes.push(Node {
            kind,
            parent: None,
            left: None,
            right: None,
            value: false,
            done: false,
        });
        self.nodes.len() - 1
    }

    fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Make `new` the right child of `at`, adopting `at`'s previous
    /// right subtree as `new`'s left child.
    fn splice_right(&mut self, at: usize, new: usize) {
        let adopted = self.nodes[at].right;
        self.nodes[new].left = adopted;
        if let Some(child) = adopted {
            self.nodes[child].parent = Some(new);
        }
        self.nodes[at].right = Some(new);
        self.nodes[new].parent = Some(at);
    }
}

fn invalid(expr: &str) -> ExprError {
    tracing::error!("Invalid expression \"{}\"", expr);
    ExprError::Invalid(expr.to_string())
}

fn cap_string(s: &mut String) {
    if s.len() > MAX_STRING_LEN - 1 {
        let mut cut = MAX_STRING_LEN - 1;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
}

/// Build the parse tree. Returns the arena, the root, and whether the
/// tokenizer saw an unterminated quote.
fn build_tree(expr: &str) -> Result<(Arena, Option<usize>, bool), ExprError> {
    let mut arena = Arena::default();
    let mut root: Option<usize> = None;
    let mut current: Option<usize> = None;
    let mut tokens = Tokenizer::new(expr);

    while let Some(tok) = tokens.next_token() {
        if tok == Token::RBrace {
            // pop up to the matching LBrace and retype it to Group
            let mut cur = current;
            while let Some(idx) = cur {
                if arena.node(idx).kind == NodeKind::LBrace {
                    break;
                }
                cur = arena.node(idx).parent;
            }
            let Some(open) = cur else {
                tracing::error!("Unmatched ')' in \"{}\"", expr);
                return Err(ExprError::UnmatchedClose(expr.to_string()));
            };
            arena.node_mut(open).kind = NodeKind::Group;
            current = Some(open);
            continue;
        }

        let kind = NodeKind::from_token(tok);
        match kind {
            NodeKind::Str(_) => {
                let Some(cur) = current else {
                    root = Some(arena.alloc(kind));
                    current = root;
                    continue;
                };
                if matches!(arena.node(cur).kind, NodeKind::Str(_)) {
                    // adjacent literals merge, space separated
                    let NodeKind::Str(text) = kind else { unreachable!() };
                    let NodeKind::Str(existing) = &mut arena.node_mut(cur).kind else {
                        unreachable!()
                    };
                    if !existing.is_empty() {
                        existing.push(' ');
                    }
                    existing.push_str(&text);
                    cap_string(existing);
                } else if arena.node(cur).kind.is_operator() {
                    let idx = arena.alloc(kind);
                    arena.node_mut(idx).parent = Some(cur);
                    arena.node_mut(cur).right = Some(idx);
                    current = Some(idx);
                } else {
                    return Err(invalid(expr));
                }
            }

            NodeKind::And
            | NodeKind::Or
            | NodeKind::Eq
            | NodeKind::Ne
            | NodeKind::Ge
            | NodeKind::Gt
            | NodeKind::Le
            | NodeKind::Lt => {
                let comparison = kind.is_comparison();
                let Some(mut cur) = current else {
                    return Err(invalid(expr));
                };
                // percolate upward: everything that binds tighter gets
                // subsumed; an open paren always stops the walk, and a
                // connective stops an incoming comparison
                let stop = loop {
                    let node = arena.node(cur);
                    if node.kind == NodeKind::LBrace {
                        break Some(cur);
                    }
                    if comparison {
                        if matches!(node.kind, NodeKind::And | NodeKind::Or) {
                            break Some(cur);
                        }
                        if node.kind == NodeKind::Not || node.kind.is_comparison() {
                            // comparisons do not chain
                            return Err(invalid(expr));
                        }
                    }
                    match node.parent {
                        Some(p) => cur = p,
                        None => break None,
                    }
                };
                let idx = arena.alloc(kind);
                match stop {
                    Some(at) => arena.splice_right(at, idx),
                    None => {
                        let old_root = root.expect("non-empty tree");
                        arena.node_mut(idx).left = Some(old_root);
                        arena.node_mut(old_root).parent = Some(idx);
                        root = Some(idx);
                    }
                }
                current = Some(idx);
            }

            NodeKind::Not | NodeKind::LBrace => {
                let Some(cur) = current else {
                    root = Some(arena.alloc(kind));
                    current = root;
                    continue;
                };
                if !arena.node(cur).kind.is_operator() {
                    return Err(invalid(expr));
                }
                let idx = arena.alloc(kind);
                arena.splice_right(cur, idx);
                current = Some(idx);
            }

            NodeKind::Group => unreachable!("Group only appears by retyping"),
        }
    }

    Ok((arena, root, tokens.unmatched()))
}

/// Interpolate a string operand; its boolean value is "non-empty".
fn eval_string(env: &Environment, raw: &str) -> (String, bool) {
    let text = interpolate(env, raw, MAX_STRING_LEN - 1, false);
    let truth = !text.is_empty();
    (text, truth)
}

/// Equality test after interpolation. A right operand of the form
/// `/pattern/` is an extended regular expression matched against the
/// left side; anything else compares byte-wise.
fn compare_equal(env: &Environment, left: &str, right: &str) -> Result<bool, ExprError> {
    let (l, _) = eval_string(env, left);
    let (r, _) = eval_string(env, right);
    if let Some(rest) = r.strip_prefix('/') {
        let Some(pattern) = rest.strip_suffix('/') else {
            tracing::error!("Invalid rexp \"{}\"", r);
            return Err(ExprError::BadRegex(r));
        };
        let re = regex::Regex::new(pattern).map_err(|_| {
            tracing::error!("unable to compile pattern \"{}\"", pattern);
            ExprError::BadRegex(pattern.to_string())
        })?;
        return Ok(re.is_match(&l));
    }
    Ok(l == r)
}

/// Lexicographic (byte-wise) ordering after interpolation; the
/// relational operators never treat their operand as a pattern.
fn compare_order(env: &Environment, left: &str, right: &str) -> std::cmp::Ordering {
    let (l, _) = eval_string(env, left);
    let (r, _) = eval_string(env, right);
    l.as_bytes().cmp(r.as_bytes())
}

/// Evaluate a conditional expression against the environment.
pub fn eval_expr(expr: &str, env: &Environment) -> Result<ExprResult, ExprError> {
    let (mut arena, root, unmatched_quote) = build_tree(expr)?;
    let Some(root) = root else {
        return Ok(ExprResult {
            value: false,
            unmatched_quote,
        });
    };

    // post-order evaluation with an explicit cursor
    let mut current = Some(root);
    while let Some(idx) = current {
        let (left, right) = (arena.node(idx).left, arena.node(idx).right);

        let value = match &arena.node(idx).kind {
            NodeKind::Str(raw) => eval_string(env, raw).1,

            NodeKind::And | NodeKind::Or => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Err(invalid(expr));
                };
                if !arena.node(l).done {
                    current = Some(l);
                    continue;
                }
                if !arena.node(r).done {
                    current = Some(r);
                    continue;
                }
                // both sides always evaluated; no short-circuit
                let (lv, rv) = (arena.node(l).value, arena.node(r).value);
                if arena.node(idx).kind == NodeKind::And {
                    lv && rv
                } else {
                    lv || rv
                }
            }

            NodeKind::Eq | NodeKind::Ne => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Err(invalid(expr));
                };
                let (NodeKind::Str(ls), NodeKind::Str(rs)) =
                    (&arena.node(l).kind, &arena.node(r).kind)
                else {
                    return Err(invalid(expr));
                };
                let matched = compare_equal(env, ls, rs)?;
                if arena.node(idx).kind == NodeKind::Eq {
                    matched
                } else {
                    !matched
                }
            }

            kind @ (NodeKind::Ge | NodeKind::Gt | NodeKind::Le | NodeKind::Lt) => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Err(invalid(expr));
                };
                let (NodeKind::Str(ls), NodeKind::Str(rs)) =
                    (&arena.node(l).kind, &arena.node(r).kind)
                else {
                    return Err(invalid(expr));
                };
                let ord = compare_order(env, ls, rs);
                match kind {
                    NodeKind::Ge => ord.is_ge(),
                    NodeKind::Gt => ord.is_gt(),
                    NodeKind::Le => ord.is_le(),
                    NodeKind::Lt => ord.is_lt(),
                    _ => unreachable!(),
                }
            }

            NodeKind::Not => match right {
                Some(r) => {
                    if !arena.node(r).done {
                        current = Some(r);
                        continue;
                    }
                    !arena.node(r).value
                }
                // a bare `!` with nothing to negate
                None => false,
            },

            NodeKind::Group => match right {
                Some(r) => {
                    if !arena.node(r).done {
                        current = Some(r);
                        continue;
                    }
                    arena.node(r).value
                }
                // an empty group is true
                None => true,
            },

            NodeKind::LBrace => {
                tracing::error!("Unmatched '(' in \"{}\"", expr);
                return Err(ExprError::UnmatchedOpen(expr.to_string()));
            }
        };

        let node = arena.node_mut(idx);
        node.value = value;
        node.done = true;
        current = node.parent;
    }

    Ok(ExprResult {
        value: arena.node(root).value,
        unmatched_quote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let mut e = Environment::new();
        for (k, v) in pairs {
            e.set(*k, *v);
        }
        e
    }

    fn eval(expr: &str, e: &Environment) -> bool {
        eval_expr(expr, e).unwrap().value
    }

    #[test]
    fn bare_string_truthiness() {
        let e = env(&[("SET", "x"), ("EMPTY", "")]);
        assert!(eval("hello", &e));
        assert!(eval("$SET", &e));
        assert!(!eval("$EMPTY", &e));
        assert!(!eval("$UNSET", &e));
        assert!(!eval("''", &e));
    }

    #[test]
    fn equality_and_inequality() {
        let e = env(&[("A", "x")]);
        assert!(eval("$A = x", &e));
        assert!(eval("$A = 'x'", &e));
        assert!(!eval("$A = y", &e));
        assert!(eval("$A != y", &e));
        assert!(!eval("$A != x", &e));
    }

    #[test]
    fn lexicographic_ordering() {
        let e = env(&[]);
        assert!(eval("abc < abd", &e));
        assert!(eval("abd > abc", &e));
        assert!(eval("abc <= abc", &e));
        assert!(eval("abc >= abc", &e));
        assert!(!eval("abc > abd", &e));
        // byte-wise, not numeric
        assert!(eval("10 < 9", &e));
    }

    #[test]
    fn regex_matching() {
        let e = env(&[("U", "/docs/index.html")]);
        assert!(eval("'ab' = /^a/", &e));
        assert!(!eval("'ab' = /^b/", &e));
        assert!(eval("$U = /^\\/docs\\//", &e));
        assert!(eval("'ab' != /^b/", &e));
    }

    #[test]
    fn relational_operators_never_match_patterns() {
        let e = env(&[]);
        // compares against the literal bytes "/a/"
        assert!(eval("'ab' > '/a/'", &e));
    }

    #[test]
    fn regex_missing_trailing_slash_is_error() {
        let e = env(&[]);
        assert!(matches!(
            eval_expr("x = /oops", &e),
            Err(ExprError::BadRegex(_))
        ));
    }

    #[test]
    fn connectives_do_not_short_circuit_values() {
        let e = env(&[("T", "1")]);
        assert!(eval("$T && $T", &e));
        assert!(!eval("$T && $U", &e));
        assert!(eval("$T || $U", &e));
        assert!(!eval("$U || $U", &e));
    }

    #[test]
    fn flat_connective_precedence() {
        let e = env(&[]);
        // && and || share a precedence level and associate by
        // insertion order: a || b && c parses as (a || b) && c
        assert!(!eval("x || x && ''", &e));
    }

    #[test]
    fn comparisons_bind_tighter_than_connectives() {
        let e = env(&[("A", "x"), ("B", "y")]);
        assert!(eval("$A = x && $B = y", &e));
        assert!(!eval("$A = x && $B = z", &e));
        assert!(eval("$A = z || $B = y", &e));
    }

    #[test]
    fn parentheses_override() {
        let e = env(&[]);
        assert!(eval("x || (x && '')", &e));
        assert!(eval("(x)", &e));
        assert!(!eval("('')", &e));
    }

    #[test]
    fn negation() {
        let e = env(&[("A", "x")]);
        assert!(!eval("!$A", &e));
        assert!(eval("!$UNSET", &e));
        assert!(eval("!($A = y)", &e));
        // a bare ! negates nothing and is false
        assert!(!eval("!", &e));
    }

    #[test]
    fn adjacent_literals_merge_with_spaces() {
        let e = env(&[("AB", "a b")]);
        assert!(eval("$AB = a b", &e));
    }

    #[test]
    fn empty_expression_is_false() {
        let e = env(&[]);
        let r = eval_expr("", &e).unwrap();
        assert!(!r.value);
        assert!(!r.unmatched_quote);
    }

    #[test]
    fn unmatched_quote_is_surfaced() {
        let e = env(&[]);
        let r = eval_expr("'abc", &e).unwrap();
        assert!(r.unmatched_quote);
    }

    #[test]
    fn malformed_expressions_error() {
        let e = env(&[]);
        assert!(eval_expr("&& x", &e).is_err());
        assert!(eval_expr("= x", &e).is_err());
        assert!(eval_expr("a = b = c", &e).is_err());
        assert!(eval_expr("(a", &e).is_err());
        assert!(eval_expr("a)", &e).is_err());
        assert!(eval_expr("a (b)", &e).is_err());
    }

    #[test]
    fn chained_connectives() {
        let e = env(&[("A", "1"), ("B", "1"), ("C", "")]);
        assert!(!eval("$A && $B && $C", &e));
        assert!(eval("$A && $B && !$C", &e));
        assert!(eval("$C || $B || $C", &e));
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let e = env(&[]);
        let depth = 4096;
        let expr = format!("{}x{}", "(".repeat(depth), ")".repeat(depth));
        assert!(eval(&expr, &e));
        let negs = format!("{}x", "!".repeat(depth));
        assert!(eval(&negs, &e));
    }
}
