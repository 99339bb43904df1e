//! IR optimization passes.
//!
//! Two passes, repeated for a configurable number of rounds (or until
//! nothing changes):
//!
//! - **prune**: fold branches with constant guards, drop nodes whose bodies
//!   became empty, drop effect-free expression statements and dead code after
//!   `return`/`throw`/`break`, and collapse `if (c) X else if (!c) Y`.
//! - **propagate**: drop unused effect-free declarations and inline constants
//!   (literal-valued `const`s read exactly once).
//!
//! Neither pass touches an expression unless it is pure, so error pushes,
//! counter updates and calls survive whatever order the passes run in.

use std::collections::HashMap;

use crate::ir::{Expr, Loop, Name, Stmt, count_names, not};

pub fn optimize(body: &mut Vec<Stmt>, rounds: u32) {
    for _ in 0..rounds {
        let mut changed = prune(body);
        changed |= propagate(body);
        if !changed {
            break;
        }
    }
}

// ------------------------------- prune ------------------------------------ //

pub fn prune(body: &mut Vec<Stmt>) -> bool {
    let mut changed = false;
    let total = body.len();
    let mut seen = 0;
    let mut out: Vec<Stmt> = Vec::with_capacity(total);

    for mut stmt in std::mem::take(body) {
        seen += 1;
        for inner in stmt.bodies_mut() {
            changed |= prune(inner);
        }
        match stmt {
            Stmt::If { cond, then, otherwise } => match cond.as_bool_lit() {
                Some(true) => {
                    changed = true;
                    out.extend(then);
                }
                Some(false) => {
                    changed = true;
                    out.extend(otherwise);
                }
                None if then.is_empty() && otherwise.is_empty() => {
                    changed = true;
                    if !cond.is_pure() {
                        out.push(Stmt::Expr(cond));
                    }
                }
                None if then.is_empty() => {
                    changed = true;
                    out.push(Stmt::If { cond: not(cond), then: otherwise, otherwise: Vec::new() });
                }
                None => {
                    let (otherwise, collapsed) = collapse_negated_else(&cond, otherwise);
                    changed |= collapsed;
                    out.push(Stmt::If { cond, then, otherwise });
                }
            },
            Stmt::Block(inner) if inner.is_empty() => changed = true,
            Stmt::For { kind, body } if body.is_empty() && loop_is_pure(&kind) => changed = true,
            Stmt::Try { body, finally, .. } if body.is_empty() => {
                changed = true;
                out.extend(finally);
            }
            Stmt::Expr(e) if e.is_pure() => changed = true,
            other => {
                let terminal = matches!(other, Stmt::Return(_) | Stmt::Throw(_) | Stmt::Break);
                out.push(other);
                if terminal {
                    // the rest of this body is unreachable
                    changed |= seen < total;
                    break;
                }
            }
        }
    }
    *body = out;
    changed
}

fn loop_is_pure(kind: &Loop) -> bool {
    match kind {
        Loop::Range { from, to, .. } => from.is_pure() && to.is_pure(),
        Loop::Keys { object, .. } => object.is_pure(),
        Loop::Values { array, .. } => array.is_pure(),
    }
}

/// `if (c) X else if (!c) Y` → `if (c) X else Y`
fn collapse_negated_else(cond: &Expr, otherwise: Vec<Stmt>) -> (Vec<Stmt>, bool) {
    if !cond.is_pure() {
        return (otherwise, false);
    }
    match <[Stmt; 1]>::try_from(otherwise) {
        Ok([Stmt::If { cond: inner, then, otherwise: rest }]) if rest.is_empty() && inner == not(cond.clone()) => {
            (then, true)
        }
        Ok([single]) => (vec![single], false),
        Err(many) => (many, false),
    }
}

// ------------------------------ propagate --------------------------------- //

pub fn propagate(body: &mut Vec<Stmt>) -> bool {
    let counts = count_names(body);
    let mut inline: HashMap<Name, Expr> = HashMap::new();
    let changed = drop_declarations(body, &counts, &mut inline);
    if !inline.is_empty() {
        substitute(body, &inline);
    }
    changed
}

fn drop_declarations(body: &mut Vec<Stmt>, counts: &HashMap<Name, usize>, inline: &mut HashMap<Name, Expr>) -> bool {
    let mut changed = false;
    let mut out = Vec::with_capacity(body.len());
    for mut stmt in body.drain(..) {
        for inner in stmt.bodies_mut() {
            changed |= drop_declarations(inner, counts, inline);
        }
        match stmt {
            Stmt::Let { name, value, mutable } => {
                let uses = counts.get(&name).copied().unwrap_or(0);
                match value {
                    None if uses == 0 => changed = true,
                    Some(v) if uses == 0 => {
                        changed = true;
                        if !v.is_pure() {
                            out.push(Stmt::Expr(v));
                        }
                    }
                    Some(v @ Expr::Lit(_)) if uses == 1 && !mutable => {
                        changed = true;
                        inline.insert(name, v);
                    }
                    value => out.push(Stmt::Let { name, value, mutable }),
                }
            }
            other => out.push(other),
        }
    }
    *body = out;
    changed
}

fn substitute(body: &mut [Stmt], inline: &HashMap<Name, Expr>) {
    for stmt in body {
        for e in stmt.exprs_mut() {
            e.visit_names_mut(&mut |node| {
                if let Expr::Name(n) = node {
                    if let Some(v) = inline.get(n) {
                        *node = v.clone();
                    }
                }
            });
        }
        for inner in stmt.bodies_mut() {
            substitute(inner, inline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builtin, eq};

    fn n(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    fn push_error() -> Stmt {
        Stmt::Expr(Expr::call(Builtin::PushError, vec![Expr::NULL]))
    }

    #[test]
    fn constant_guards_are_folded() {
        let mut body = vec![
            Stmt::If { cond: Expr::TRUE, then: vec![push_error()], otherwise: vec![Stmt::Return(Expr::FALSE)] },
            Stmt::If { cond: Expr::FALSE, then: vec![push_error()], otherwise: vec![] },
        ];
        optimize(&mut body, 1);
        assert_eq!(body, vec![push_error()]);
    }

    #[test]
    fn empty_then_branch_negates_guard() {
        let c = eq(n("errors"), Expr::num(0));
        let mut body = vec![Stmt::If { cond: c.clone(), then: vec![], otherwise: vec![push_error()] }];
        prune(&mut body);
        assert_eq!(body, vec![Stmt::If { cond: not(c), then: vec![push_error()], otherwise: vec![] }]);
    }

    #[test]
    fn negated_else_if_collapses() {
        let c = Expr::Name(n("valid0"));
        let mut body = vec![Stmt::If {
            cond: c.clone(),
            then: vec![Stmt::Return(Expr::TRUE)],
            otherwise: vec![Stmt::If { cond: not(c.clone()), then: vec![push_error()], otherwise: vec![] }],
        }];
        prune(&mut body);
        assert_eq!(
            body,
            vec![Stmt::If { cond: c, then: vec![Stmt::Return(Expr::TRUE)], otherwise: vec![push_error()] }]
        );
    }

    #[test]
    fn side_effects_survive_pruning() {
        let call = Expr::Invoke(n("validate0"), vec![]);
        let mut body = vec![
            Stmt::If { cond: call.clone(), then: vec![], otherwise: vec![] },
            Stmt::Let { name: n("res0"), value: Some(call.clone()), mutable: false },
        ];
        optimize(&mut body, 2);
        assert_eq!(body, vec![Stmt::Expr(call.clone()), Stmt::Expr(call)]);
    }

    #[test]
    fn single_use_constants_are_inlined() {
        let mut body = vec![
            Stmt::Let { name: n("len0"), value: Some(Expr::num(3)), mutable: false },
            Stmt::If {
                cond: eq(n("len0"), n("count0")),
                then: vec![Stmt::Return(Expr::TRUE)],
                otherwise: vec![],
            },
        ];
        propagate(&mut body);
        assert_eq!(
            body,
            vec![Stmt::If { cond: eq(Expr::num(3), n("count0")), then: vec![Stmt::Return(Expr::TRUE)], otherwise: vec![] }]
        );
    }

    #[test]
    fn unused_pure_declarations_are_removed_but_mutated_ones_stay() {
        let mut body = vec![
            Stmt::Let { name: n("errs0"), value: Some(Expr::call(Builtin::ErrorCount, vec![])), mutable: false },
            Stmt::Let { name: n("valid0"), value: Some(Expr::TRUE), mutable: true },
            Stmt::Assign(n("valid0"), Expr::FALSE),
            Stmt::Return(Expr::Name(n("valid0"))),
        ];
        optimize(&mut body, 1);
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[0], Stmt::Let { name, .. } if name.as_str() == "valid0"));
    }

    #[test]
    fn code_after_return_is_dropped() {
        let mut body = vec![Stmt::Return(Expr::TRUE), push_error()];
        prune(&mut body);
        assert_eq!(body, vec![Stmt::Return(Expr::TRUE)]);
    }
}
