// Code-generation IR. A small imperative tree the keyword emitters build,
// the optimizer rewrites, the renderer prints and the interpreter executes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::CodegenError;
use crate::types::{JsonType, TypeSet};

// ————————————————————————————————————————————————————————————————————————————
// NAMES
// ————————————————————————————————————————————————————————————————————————————

/// An identifier in generated code. Unique within the scope chain that
/// allocated it; cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    /// Validate `s` as an identifier: `[A-Za-z_$][A-Za-z0-9_$]*`.
    pub fn new(s: &str) -> Result<Name, CodegenError> {
        let mut chars = s.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(CodegenError::InvalidIdentifier(s.to_string()));
        }
        Ok(Name(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// EXPRESSIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Undef,
    Null,
    Bool(bool),
    Num(f64),
    Str(Arc<str>),
    /// Structured constant (static evaluated-property sets, error params).
    Json(Arc<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "===",
            BinOp::Ne => "!==",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
        }
    }
}

/// Runtime helpers the generated code calls. Everything that touches the
/// per-call error list or evaluated-state side channel lives here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    /// `[x]`: does `x` have one of the types.
    TypeIs(TypeSet),
    /// `[x]`: characters of a string, items of an array, keys of an object.
    Len,
    /// `[a, b]`: JSON equality (`1 == 1.0`).
    Equal,
    /// `[obj, key]`
    HasProp,
    /// `[x, divisor]`
    MultipleOf,
    /// `[arr]`: `[i, j]` (`i < j`) of a duplicate pair, or `null`.
    Duplicates,
    /// `[key]`: one JSON Pointer segment, `~` and `/` escaped.
    PointerSegment,
    /// `[key]`: one JS property accessor (`.a`, `[0]`, `["a b"]`).
    JsProperty,
    /// `[x]`: `x` coerced to the type, or undefined.
    Coerce { to: JsonType, array: bool },
    /// `[record]`
    PushError,
    ErrorCount,
    /// `[n]`: drop errors past `n`.
    TruncateErrors,
    /// Append the errors the last unit call left behind.
    AppendCalleeErrors,
    /// `[props, items]`: publish what this unit evaluated.
    SetEvaluated,
    CalleeProps,
    CalleeItems,
    /// `[a, b]`
    MergeProps,
    /// `[a, b]`
    MergeItems,
    /// `[props, key]`
    IsEvaluated,
    /// `[e]`
    IsValidationError,
    /// `[e]`
    AppendThrownErrors,
    /// A `ValidationError` carrying the frame's errors, for `throw`.
    NewValidationError,
}

impl Builtin {
    pub fn is_pure(self) -> bool {
        !matches!(
            self,
            Builtin::PushError
                | Builtin::TruncateErrors
                | Builtin::AppendCalleeErrors
                | Builtin::SetEvaluated
                | Builtin::AppendThrownErrors
        )
    }

    pub fn js_name(self) -> String {
        match self {
            Builtin::TypeIs(set) => format!("isType<{set}>"),
            Builtin::Len => "len".into(),
            Builtin::Equal => "equal".into(),
            Builtin::HasProp => "hasOwn".into(),
            Builtin::MultipleOf => "isMultipleOf".into(),
            Builtin::Duplicates => "duplicates".into(),
            Builtin::PointerSegment => "escapePointer".into(),
            Builtin::JsProperty => "getProperty".into(),
            Builtin::Coerce { to, array } => {
                if array { format!("coerceArray<{to}>") } else { format!("coerce<{to}>") }
            }
            Builtin::PushError => "pushError".into(),
            Builtin::ErrorCount => "errorCount".into(),
            Builtin::TruncateErrors => "truncateErrors".into(),
            Builtin::AppendCalleeErrors => "appendCalleeErrors".into(),
            Builtin::SetEvaluated => "setEvaluated".into(),
            Builtin::CalleeProps => "calleeProps".into(),
            Builtin::CalleeItems => "calleeItems".into(),
            Builtin::MergeProps => "mergeProps".into(),
            Builtin::MergeItems => "mergeItems".into(),
            Builtin::IsEvaluated => "isEvaluated".into(),
            Builtin::IsValidationError => "isValidationError".into(),
            Builtin::AppendThrownErrors => "appendThrownErrors".into(),
            Builtin::NewValidationError => "new ValidationError".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Lit),
    Name(Name),
    /// `object[key]`, undefined when absent.
    Prop(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
    /// Call a captured runtime value (pattern, format, keyword function, unit).
    Invoke(Name, Vec<Expr>),
    Await(Box<Expr>),
    Object(Vec<(Arc<str>, Expr)>),
    Array(Vec<Expr>),
    /// String concatenation.
    Concat(Vec<Expr>),
}

impl Expr {
    pub const UNDEF: Expr = Expr::Lit(Lit::Undef);
    pub const NULL: Expr = Expr::Lit(Lit::Null);
    pub const TRUE: Expr = Expr::Lit(Lit::Bool(true));
    pub const FALSE: Expr = Expr::Lit(Lit::Bool(false));

    pub fn str(s: impl Into<Arc<str>>) -> Expr {
        Expr::Lit(Lit::Str(s.into()))
    }

    pub fn num(n: impl Into<f64>) -> Expr {
        Expr::Lit(Lit::Num(n.into()))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Lit(Lit::Bool(b))
    }

    /// Embed a JSON value, using scalar literals where possible.
    pub fn json(v: &Value) -> Expr {
        match v {
            Value::Null => Expr::NULL,
            Value::Bool(b) => Expr::bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() || f.abs() < 9_007_199_254_740_992.0 => Expr::num(f),
                _ => Expr::Lit(Lit::Json(Arc::new(v.clone()))),
            },
            Value::String(s) => Expr::str(s.as_str()),
            _ => Expr::Lit(Lit::Json(Arc::new(v.clone()))),
        }
    }

    pub fn prop(self, key: Expr) -> Expr {
        Expr::Prop(Box::new(self), Box::new(key))
    }

    pub fn call(builtin: Builtin, args: Vec<Expr>) -> Expr {
        Expr::Call(builtin, args)
    }

    pub fn as_bool_lit(&self) -> Option<bool> {
        match self {
            Expr::Lit(Lit::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// No observable effects: safe to drop, duplicate or reorder.
    pub fn is_pure(&self) -> bool {
        match self {
            Expr::Lit(_) | Expr::Name(_) => true,
            Expr::Prop(a, b) | Expr::Bin(_, a, b) => a.is_pure() && b.is_pure(),
            Expr::Not(a) => a.is_pure(),
            Expr::Call(b, args) => b.is_pure() && args.iter().all(Expr::is_pure),
            Expr::Invoke(..) | Expr::Await(_) => false,
            Expr::Object(fields) => fields.iter().all(|(_, e)| e.is_pure()),
            Expr::Array(items) | Expr::Concat(items) => items.iter().all(Expr::is_pure),
        }
    }

    pub fn visit_names(&self, f: &mut dyn FnMut(&Name)) {
        match self {
            Expr::Lit(_) => {}
            Expr::Name(n) => f(n),
            Expr::Prop(a, b) | Expr::Bin(_, a, b) => {
                a.visit_names(f);
                b.visit_names(f);
            }
            Expr::Not(a) | Expr::Await(a) => a.visit_names(f),
            Expr::Invoke(callee, args) => {
                f(callee);
                args.iter().for_each(|a| a.visit_names(f));
            }
            Expr::Call(_, args) | Expr::Array(args) | Expr::Concat(args) => {
                args.iter().for_each(|a| a.visit_names(f))
            }
            Expr::Object(fields) => fields.iter().for_each(|(_, e)| e.visit_names(f)),
        }
    }

    pub fn visit_names_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Expr::Name(_) => f(self),
            Expr::Lit(_) => {}
            Expr::Prop(a, b) | Expr::Bin(_, a, b) => {
                a.visit_names_mut(f);
                b.visit_names_mut(f);
            }
            Expr::Not(a) | Expr::Await(a) => a.visit_names_mut(f),
            Expr::Invoke(_, args) | Expr::Call(_, args) | Expr::Array(args) | Expr::Concat(args) => {
                args.iter_mut().for_each(|a| a.visit_names_mut(f))
            }
            Expr::Object(fields) => fields.iter_mut().for_each(|(_, e)| e.visit_names_mut(f)),
        }
    }
}

impl From<&Name> for Expr {
    fn from(n: &Name) -> Expr {
        Expr::Name(n.clone())
    }
}

impl From<Name> for Expr {
    fn from(n: Name) -> Expr {
        Expr::Name(n)
    }
}

// ---- builders ---- //

pub fn not(e: Expr) -> Expr {
    match e {
        Expr::Lit(Lit::Bool(b)) => Expr::bool(!b),
        Expr::Not(inner) => *inner,
        Expr::Bin(BinOp::Eq, a, b) => Expr::Bin(BinOp::Ne, a, b),
        Expr::Bin(BinOp::Ne, a, b) => Expr::Bin(BinOp::Eq, a, b),
        other => Expr::Not(Box::new(other)),
    }
}

pub fn and(a: Expr, b: Expr) -> Expr {
    match (a.as_bool_lit(), b.as_bool_lit()) {
        (Some(true), _) => b,
        (_, Some(true)) => a,
        (Some(false), _) => Expr::FALSE,
        _ => Expr::Bin(BinOp::And, Box::new(a), Box::new(b)),
    }
}

pub fn or(a: Expr, b: Expr) -> Expr {
    match (a.as_bool_lit(), b.as_bool_lit()) {
        (Some(false), _) => b,
        (_, Some(false)) => a,
        (Some(true), _) => Expr::TRUE,
        _ => Expr::Bin(BinOp::Or, Box::new(a), Box::new(b)),
    }
}

pub fn and_all(items: impl IntoIterator<Item = Expr>) -> Expr {
    items.into_iter().fold(Expr::TRUE, and)
}

pub fn or_all(items: impl IntoIterator<Item = Expr>) -> Expr {
    items.into_iter().fold(Expr::FALSE, or)
}

pub fn bin(op: BinOp, a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Bin(op, Box::new(a.into()), Box::new(b.into()))
}

pub fn eq(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    bin(BinOp::Eq, a, b)
}

pub fn ne(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    bin(BinOp::Ne, a, b)
}

pub fn is_undef(e: impl Into<Expr>) -> Expr {
    eq(e, Expr::UNDEF)
}

// ————————————————————————————————————————————————————————————————————————————
// STATEMENTS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Loop {
    /// `for (var = from; var < to; var++)`
    Range { var: Name, from: Expr, to: Expr },
    /// `for (var in object)`
    Keys { var: Name, object: Expr },
    /// `for (var of array)`
    Values { var: Name, array: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: Name,
    pub params: Vec<Name>,
    pub is_async: bool,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let`/`const` declaration.
    Let { name: Name, value: Option<Expr>, mutable: bool },
    Assign(Name, Expr),
    /// An `else if` is an else-branch holding exactly one `If`.
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    For { kind: Loop, body: Vec<Stmt> },
    Func(Func),
    Return(Expr),
    Throw(Expr),
    Try { body: Vec<Stmt>, catch: Option<(Name, Vec<Stmt>)>, finally: Vec<Stmt> },
    Expr(Expr),
    Block(Vec<Stmt>),
    Break,
}

impl Stmt {
    /// Visit every expression directly held by this node (not nested bodies).
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Let { value, .. } => value.iter().collect(),
            Stmt::Assign(_, e) | Stmt::Return(e) | Stmt::Throw(e) | Stmt::Expr(e) => vec![e],
            Stmt::If { cond, .. } => vec![cond],
            Stmt::For { kind, .. } => match kind {
                Loop::Range { from, to, .. } => vec![from, to],
                Loop::Keys { object, .. } => vec![object],
                Loop::Values { array, .. } => vec![array],
            },
            Stmt::Func(_) | Stmt::Try { .. } | Stmt::Block(_) | Stmt::Break => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Stmt::Let { value, .. } => value.iter_mut().collect(),
            Stmt::Assign(_, e) | Stmt::Return(e) | Stmt::Throw(e) | Stmt::Expr(e) => vec![e],
            Stmt::If { cond, .. } => vec![cond],
            Stmt::For { kind, .. } => match kind {
                Loop::Range { from, to, .. } => vec![from, to],
                Loop::Keys { object, .. } => vec![object],
                Loop::Values { array, .. } => vec![array],
            },
            Stmt::Func(_) | Stmt::Try { .. } | Stmt::Block(_) | Stmt::Break => Vec::new(),
        }
    }

    pub fn bodies(&self) -> Vec<&Vec<Stmt>> {
        match self {
            Stmt::If { then, otherwise, .. } => vec![then, otherwise],
            Stmt::For { body, .. } | Stmt::Block(body) => vec![body],
            Stmt::Func(func) => vec![&func.body],
            Stmt::Try { body, catch, finally } => {
                let mut out = vec![body];
                if let Some((_, handler)) = catch {
                    out.push(handler);
                }
                out.push(finally);
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn bodies_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match self {
            Stmt::If { then, otherwise, .. } => vec![then, otherwise],
            Stmt::For { body, .. } | Stmt::Block(body) => vec![body],
            Stmt::Func(func) => vec![&mut func.body],
            Stmt::Try { body, catch, finally } => {
                let mut out = vec![body];
                if let Some((_, handler)) = catch {
                    out.push(handler);
                }
                out.push(finally);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Free identifier names this node references (reads and assignment
    /// targets), with use counts, including nested bodies.
    pub fn names(&self) -> HashMap<Name, usize> {
        let mut counts = HashMap::new();
        self.count_names(&mut counts);
        counts
    }

    pub fn count_names(&self, counts: &mut HashMap<Name, usize>) {
        if let Stmt::Assign(target, _) = self {
            *counts.entry(target.clone()).or_default() += 1;
        }
        for e in self.exprs() {
            e.visit_names(&mut |n| *counts.entry(n.clone()).or_default() += 1);
        }
        for body in self.bodies() {
            for s in body {
                s.count_names(counts);
            }
        }
    }
}

pub fn count_names(body: &[Stmt]) -> HashMap<Name, usize> {
    let mut counts = HashMap::new();
    for s in body {
        s.count_names(&mut counts);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(Name::new("data0").is_ok());
        assert!(Name::new("$valid").is_ok());
        assert_eq!(
            Name::new("0data"),
            Err(CodegenError::InvalidIdentifier("0data".into()))
        );
        assert!(Name::new("a-b").is_err());
        assert!(Name::new("").is_err());
    }

    #[test]
    fn boolean_builders_fold_constants() {
        let x = Expr::Name(n("x"));
        assert_eq!(and(Expr::TRUE, x.clone()), x);
        assert_eq!(or(Expr::TRUE, x.clone()), Expr::TRUE);
        assert_eq!(not(not(x.clone())), x);
        assert_eq!(not(eq(n("a"), Expr::num(1))), ne(n("a"), Expr::num(1)));
    }

    #[test]
    fn free_names_cover_nested_bodies() {
        let body = Stmt::If {
            cond: eq(n("errors"), Expr::num(0)),
            then: vec![Stmt::Assign(n("valid"), Expr::Name(n("tmp")))],
            otherwise: vec![Stmt::Expr(Expr::Invoke(n("pattern0"), vec![Expr::Name(n("data"))]))],
        };
        let names = body.names();
        assert_eq!(names[&n("errors")], 1);
        assert_eq!(names[&n("valid")], 1);
        assert_eq!(names[&n("tmp")], 1);
        assert_eq!(names[&n("pattern0")], 1);
        assert_eq!(names[&n("data")], 1);
    }

    #[test]
    fn effects_are_impure() {
        let push = Expr::call(Builtin::PushError, vec![Expr::NULL]);
        assert!(!push.is_pure());
        assert!(Expr::call(Builtin::Len, vec![Expr::Name(n("d"))]).is_pure());
        assert!(!Expr::Invoke(n("f"), vec![]).is_pure());
    }
}
