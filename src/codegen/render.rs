//! Render IR as JavaScript-shaped source.
//!
//! The text is the serialized form of a compiled validator: stable for a given
//! schema and options, readable in `json-schemac source`, never executed.
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::codegen::ValueScope;
use crate::ir::{BinOp, Expr, Lit, Loop, Name, Stmt, count_names};

/// Render `body` and report which captured values it closes over.
pub fn render(body: &[Stmt], values: &ValueScope) -> (String, Vec<Name>) {
    let used: BTreeSet<Name> = count_names(body).into_keys().collect();
    let captured: Vec<Name> = values.capture(used.iter()).into_keys().collect();

    let mut out = String::new();
    for name in &captured {
        if let Some(value) = values.get(name) {
            let _ = writeln!(out, "const {name} = {};", value.describe());
        }
    }
    if !captured.is_empty() {
        out.push('\n');
    }
    for stmt in body {
        stmt_into(&mut out, stmt, 0);
    }
    (out, captured)
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn block_into(out: &mut String, body: &[Stmt], depth: usize) {
    out.push_str("{\n");
    for stmt in body {
        stmt_into(out, stmt, depth + 1);
    }
    indent(out, depth);
    out.push('}');
}

fn stmt_into(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::Let { name, value, mutable } => {
            let kw = if *mutable { "let" } else { "const" };
            match value {
                Some(v) => {
                    let _ = writeln!(out, "{kw} {name} = {};", expr(v));
                }
                None => {
                    let _ = writeln!(out, "{kw} {name};");
                }
            }
        }
        Stmt::Assign(name, v) => {
            let _ = writeln!(out, "{name} = {};", expr(v));
        }
        Stmt::If { .. } => {
            if_into(out, stmt, depth);
            out.push('\n');
        }
        Stmt::For { kind, body } => {
            match kind {
                Loop::Range { var, from, to } => {
                    let _ = write!(out, "for (let {var} = {}; {var} < {}; {var}++) ", expr(from), expr(to));
                }
                Loop::Keys { var, object } => {
                    let _ = write!(out, "for (const {var} in {}) ", expr(object));
                }
                Loop::Values { var, array } => {
                    let _ = write!(out, "for (const {var} of {}) ", expr(array));
                }
            }
            block_into(out, body, depth);
            out.push('\n');
        }
        Stmt::Func(func) => {
            let params: Vec<&str> = func.params.iter().map(Name::as_str).collect();
            let kw = if func.is_async { "async function" } else { "function" };
            let _ = write!(out, "{kw} {}({}) ", func.name, params.join(", "));
            block_into(out, &func.body, depth);
            out.push('\n');
        }
        Stmt::Return(v) => {
            let _ = writeln!(out, "return {};", expr(v));
        }
        Stmt::Throw(v) => {
            let _ = writeln!(out, "throw {};", expr(v));
        }
        Stmt::Try { body, catch, finally } => {
            out.push_str("try ");
            block_into(out, body, depth);
            if let Some((name, handler)) = catch {
                let _ = write!(out, " catch ({name}) ");
                block_into(out, handler, depth);
            }
            if !finally.is_empty() {
                out.push_str(" finally ");
                block_into(out, finally, depth);
            }
            out.push('\n');
        }
        Stmt::Expr(v) => {
            let _ = writeln!(out, "{};", expr(v));
        }
        Stmt::Block(body) => {
            block_into(out, body, depth);
            out.push('\n');
        }
        Stmt::Break => out.push_str("break;\n"),
    }
}

fn if_into(out: &mut String, stmt: &Stmt, depth: usize) {
    let Stmt::If { cond, then, otherwise } = stmt else { return };
    let _ = write!(out, "if ({}) ", expr(cond));
    block_into(out, then, depth);
    match &otherwise[..] {
        [] => {}
        [chained @ Stmt::If { .. }] => {
            out.push_str(" else ");
            if_into(out, chained, depth);
        }
        rest => {
            out.push_str(" else ");
            block_into(out, rest, depth);
        }
    }
}

pub fn expr(e: &Expr) -> String {
    match e {
        Expr::Lit(lit) => match lit {
            Lit::Undef => "undefined".into(),
            Lit::Null => "null".into(),
            Lit::Bool(b) => b.to_string(),
            Lit::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Lit::Num(n) => n.to_string(),
            Lit::Str(s) => serde_json::Value::from(&**s).to_string(),
            Lit::Json(v) => v.to_string(),
        },
        Expr::Name(n) => n.to_string(),
        Expr::Prop(obj, key) => match &**key {
            Expr::Lit(Lit::Str(s)) if is_plain_identifier(s) => format!("{}.{s}", expr(obj)),
            _ => format!("{}[{}]", expr(obj), expr(key)),
        },
        Expr::Not(inner) => match &**inner {
            Expr::Name(_) | Expr::Call(..) | Expr::Invoke(..) | Expr::Lit(_) => format!("!{}", expr(inner)),
            _ => format!("!({})", expr(inner)),
        },
        Expr::Bin(op, a, b) => {
            let side = |x: &Expr| match x {
                Expr::Bin(inner, ..) if *inner != *op || !matches!(op, BinOp::And | BinOp::Or) => {
                    format!("({})", expr(x))
                }
                _ => expr(x),
            };
            format!("{} {} {}", side(a), op.symbol(), side(b))
        }
        Expr::Call(builtin, args) => format!("{}({})", builtin.js_name(), list(args)),
        Expr::Invoke(callee, args) => format!("{callee}({})", list(args)),
        Expr::Await(inner) => format!("await {}", expr(inner)),
        Expr::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| {
                    let key = if is_plain_identifier(k) { k.to_string() } else { serde_json::Value::from(&**k).to_string() };
                    format!("{key}: {}", expr(v))
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expr::Array(items) => format!("[{}]", list(items)),
        Expr::Concat(items) => {
            let parts: Vec<String> = items.iter().map(expr).collect();
            format!("({})", parts.join(" + "))
        }
    }
}

fn list(items: &[Expr]) -> String {
    items.iter().map(expr).collect::<Vec<_>>().join(", ")
}

fn is_plain_identifier(s: &str) -> bool {
    Name::new(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CodeGen, Scope, LOCAL_PREFIXES};
    use crate::ir::{Builtin, eq, not};
    use crate::types::TypeSet;

    #[test]
    fn renders_guards_and_else_if_chains() {
        let mut g = CodeGen::new(Scope::with_prefixes(None, LOCAL_PREFIXES));
        let data = g.fresh("data").unwrap();
        g.if_(not(Expr::call(Builtin::TypeIs(TypeSet::STRING), vec![Expr::from(&data)])));
        g.return_(Expr::FALSE);
        g.else_if(eq(Expr::call(Builtin::Len, vec![Expr::from(&data)]), Expr::num(0))).unwrap();
        g.return_(Expr::FALSE);
        g.end_if().unwrap();
        g.return_(Expr::TRUE);
        let body = g.finish().unwrap();
        let (src, captured) = render(&body, &ValueScope::new());
        assert!(captured.is_empty());
        assert!(src.contains("if (!isType<string>(data0)) {"), "{src}");
        assert!(src.contains("} else if (len(data0) === 0) {"), "{src}");
        assert!(src.ends_with("return true;\n"), "{src}");
    }

    #[test]
    fn property_access_uses_dot_for_identifiers() {
        let data = Name::new("data").unwrap();
        assert_eq!(expr(&Expr::from(&data).prop(Expr::str("id"))), "data.id");
        assert_eq!(expr(&Expr::from(&data).prop(Expr::str("a b"))), "data[\"a b\"]");
    }
}
