//! Builder for IR bodies.
//!
//! Keyword emitters open and close blocks the way they would write source:
//! `if_` / `else_` / `end_if`, `for_*` / `end_for`, and so on. The builder keeps
//! an explicit stack of open nodes and refuses mismatched closes.
pub mod render;
pub mod scope;

use crate::error::CodegenError;
use crate::ir::{Expr, Func, Loop, Name, Stmt};

pub use render::render;
pub use scope::{Captured, Scope, UnitSlot, ValueScope};

/// Prefixes the per-unit code may allocate locals from.
pub const LOCAL_PREFIXES: &[&str] = &[
    "data", "valid", "errs", "props", "items", "i", "j", "key", "item", "len", "coerced", "vSchema",
    "res", "e", "count", "passing", "dup", "instancePath", "parentData", "parentDataProperty",
    "rootData", "evaluated", "ifClause", "applied", "matched",
];

#[derive(Debug)]
enum Open {
    Root(Vec<Stmt>),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For { kind: Loop, body: Vec<Stmt> },
    Func { name: Name, params: Vec<Name>, is_async: bool, body: Vec<Stmt> },
    Try {
        body: Vec<Stmt>,
        catch: Option<(Name, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
}

impl Open {
    fn kind(&self) -> &'static str {
        match self {
            Open::Root(_) => "root",
            Open::If { .. } => "if",
            Open::For { .. } => "for",
            Open::Func { .. } => "function",
            Open::Try { .. } => "try",
            Open::Block(_) => "block",
        }
    }

    fn body(&mut self) -> &mut Vec<Stmt> {
        match self {
            Open::Root(body) | Open::For { body, .. } | Open::Func { body, .. } | Open::Block(body) => body,
            Open::If { branches, otherwise } => match otherwise {
                Some(body) => body,
                None => match branches.last_mut() {
                    Some((_, body)) => body,
                    None => unreachable!("if node always has a first branch"),
                },
            },
            Open::Try { body, catch, finally } => match (finally, catch) {
                (Some(f), _) => f,
                (None, Some((_, handler))) => handler,
                (None, None) => body,
            },
        }
    }
}

#[derive(Debug)]
pub struct CodeGen {
    scope: Scope,
    stack: Vec<Open>,
}

impl CodeGen {
    pub fn new(scope: Scope) -> Self {
        Self { scope, stack: vec![Open::Root(Vec::new())] }
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn fresh(&mut self, prefix: &str) -> Result<Name, CodegenError> {
        self.scope.fresh_name(prefix)
    }

    fn top(&mut self) -> &mut Open {
        // The root node is never popped.
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    pub fn stmt(&mut self, stmt: Stmt) {
        self.top().body().push(stmt);
    }

    /// Raw expression statement.
    pub fn expr(&mut self, expr: Expr) {
        self.stmt(Stmt::Expr(expr));
    }

    pub fn let_(&mut self, prefix: &str, value: Option<Expr>) -> Result<Name, CodegenError> {
        let name = self.fresh(prefix)?;
        self.stmt(Stmt::Let { name: name.clone(), value, mutable: true });
        Ok(name)
    }

    pub fn const_(&mut self, prefix: &str, value: Expr) -> Result<Name, CodegenError> {
        let name = self.fresh(prefix)?;
        self.stmt(Stmt::Let { name: name.clone(), value: Some(value), mutable: false });
        Ok(name)
    }

    pub fn assign(&mut self, name: &Name, value: Expr) {
        self.stmt(Stmt::Assign(name.clone(), value));
    }

    pub fn return_(&mut self, value: Expr) {
        self.stmt(Stmt::Return(value));
    }

    pub fn throw_(&mut self, value: Expr) {
        self.stmt(Stmt::Throw(value));
    }

    pub fn break_(&mut self) {
        self.stmt(Stmt::Break);
    }

    // ---- conditionals ---- //

    pub fn if_(&mut self, cond: Expr) {
        self.stack.push(Open::If { branches: vec![(cond, Vec::new())], otherwise: None });
    }

    pub fn else_if(&mut self, cond: Expr) -> Result<(), CodegenError> {
        match self.top() {
            Open::If { branches, otherwise: None } => {
                branches.push((cond, Vec::new()));
                Ok(())
            }
            other => Err(CodegenError::UnbalancedBlock { expected: "if", found: other.kind() }),
        }
    }

    pub fn else_(&mut self) -> Result<(), CodegenError> {
        match self.top() {
            Open::If { otherwise: otherwise @ None, .. } => {
                *otherwise = Some(Vec::new());
                Ok(())
            }
            Open::If { .. } => Err(CodegenError::UnbalancedBlock { expected: "if", found: "else" }),
            other => Err(CodegenError::UnbalancedBlock { expected: "if", found: other.kind() }),
        }
    }

    pub fn end_if(&mut self) -> Result<(), CodegenError> {
        match self.pop("if")? {
            Open::If { branches, otherwise } => {
                let mut tail = otherwise.unwrap_or_default();
                for (cond, then) in branches.into_iter().rev() {
                    tail = vec![Stmt::If { cond, then, otherwise: tail }];
                }
                self.top().body().extend(tail);
                Ok(())
            }
            _ => unreachable!("pop checked the kind"),
        }
    }

    // ---- loops ---- //

    pub fn for_range(&mut self, prefix: &str, from: Expr, to: Expr) -> Result<Name, CodegenError> {
        let var = self.fresh(prefix)?;
        self.stack.push(Open::For { kind: Loop::Range { var: var.clone(), from, to }, body: Vec::new() });
        Ok(var)
    }

    pub fn for_keys(&mut self, prefix: &str, object: Expr) -> Result<Name, CodegenError> {
        let var = self.fresh(prefix)?;
        self.stack.push(Open::For { kind: Loop::Keys { var: var.clone(), object }, body: Vec::new() });
        Ok(var)
    }

    pub fn for_values(&mut self, prefix: &str, array: Expr) -> Result<Name, CodegenError> {
        let var = self.fresh(prefix)?;
        self.stack.push(Open::For { kind: Loop::Values { var: var.clone(), array }, body: Vec::new() });
        Ok(var)
    }

    pub fn end_for(&mut self) -> Result<(), CodegenError> {
        match self.pop("for")? {
            Open::For { kind, body } => {
                self.stmt(Stmt::For { kind, body });
                Ok(())
            }
            _ => unreachable!("pop checked the kind"),
        }
    }

    // ---- functions ---- //

    pub fn func(&mut self, name: Name, params: Vec<Name>, is_async: bool) {
        self.stack.push(Open::Func { name, params, is_async, body: Vec::new() });
    }

    pub fn end_func(&mut self) -> Result<(), CodegenError> {
        match self.pop("function")? {
            Open::Func { name, params, is_async, body } => {
                self.stmt(Stmt::Func(Func { name, params, is_async, body }));
                Ok(())
            }
            _ => unreachable!("pop checked the kind"),
        }
    }

    // ---- try / catch / finally ---- //

    pub fn try_(&mut self) {
        self.stack.push(Open::Try { body: Vec::new(), catch: None, finally: None });
    }

    pub fn catch_(&mut self, prefix: &str) -> Result<Name, CodegenError> {
        let name = self.fresh(prefix)?;
        match self.top() {
            Open::Try { catch: catch @ None, finally: None, .. } => {
                *catch = Some((name.clone(), Vec::new()));
                Ok(name)
            }
            other => Err(CodegenError::UnbalancedBlock { expected: "try", found: other.kind() }),
        }
    }

    pub fn finally_(&mut self) -> Result<(), CodegenError> {
        match self.top() {
            Open::Try { finally: finally @ None, .. } => {
                *finally = Some(Vec::new());
                Ok(())
            }
            other => Err(CodegenError::UnbalancedBlock { expected: "try", found: other.kind() }),
        }
    }

    pub fn end_try(&mut self) -> Result<(), CodegenError> {
        match self.pop("try")? {
            Open::Try { body, catch, finally } => {
                self.stmt(Stmt::Try { body, catch, finally: finally.unwrap_or_default() });
                Ok(())
            }
            _ => unreachable!("pop checked the kind"),
        }
    }

    // ---- blocks ---- //

    pub fn block(&mut self) {
        self.stack.push(Open::Block(Vec::new()));
    }

    pub fn end_block(&mut self) -> Result<(), CodegenError> {
        match self.pop("block")? {
            Open::Block(body) => {
                self.stmt(Stmt::Block(body));
                Ok(())
            }
            _ => unreachable!("pop checked the kind"),
        }
    }

    /// Number of currently open nodes (root included).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Close every `if` opened above `depth`. Anything else open in between
    /// is a mismatch.
    pub fn close_ifs_to(&mut self, depth: usize) -> Result<(), CodegenError> {
        while self.stack.len() > depth {
            self.end_if()?;
        }
        Ok(())
    }

    fn pop(&mut self, expected: &'static str) -> Result<Open, CodegenError> {
        let found = self.top().kind();
        if found != expected {
            return Err(CodegenError::UnbalancedBlock { expected, found });
        }
        self.stack.pop().ok_or(CodegenError::UnbalancedBlock { expected, found: "nothing" })
    }

    /// Finish building. Every opened node must have been closed.
    pub fn finish(mut self) -> Result<Vec<Stmt>, CodegenError> {
        if self.stack.len() != 1 {
            let found = self.top().kind();
            return Err(CodegenError::UnbalancedBlock { expected: "root", found });
        }
        match self.stack.pop() {
            Some(Open::Root(body)) => Ok(body),
            _ => Err(CodegenError::UnbalancedBlock { expected: "root", found: "nothing" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Lit, eq};

    fn new_codegen() -> CodeGen {
        CodeGen::new(Scope::with_prefixes(None, LOCAL_PREFIXES))
    }

    #[test]
    fn else_if_chains_nest_in_the_else_branch() {
        let mut g = new_codegen();
        let v = g.let_("valid", Some(Expr::TRUE)).unwrap();
        g.if_(eq(&v, Expr::num(1)));
        g.assign(&v, Expr::num(1));
        g.else_if(eq(&v, Expr::num(2))).unwrap();
        g.assign(&v, Expr::num(2));
        g.else_().unwrap();
        g.assign(&v, Expr::num(3));
        g.end_if().unwrap();
        let body = g.finish().unwrap();
        assert_eq!(body.len(), 2);
        let Stmt::If { otherwise, .. } = &body[1] else { panic!("expected if") };
        assert!(matches!(&otherwise[..], [Stmt::If { otherwise: inner, .. }]
            if inner == &vec![Stmt::Assign(v.clone(), Expr::Lit(Lit::Num(3.0)))]));
    }

    #[test]
    fn mismatched_close_is_rejected() {
        let mut g = new_codegen();
        g.if_(Expr::TRUE);
        assert_eq!(
            g.end_for(),
            Err(CodegenError::UnbalancedBlock { expected: "for", found: "if" })
        );
        g.end_if().unwrap();
        g.block();
        assert!(matches!(g.finish(), Err(CodegenError::UnbalancedBlock { expected: "root", found: "block" })));
    }

    #[test]
    fn second_else_is_rejected() {
        let mut g = new_codegen();
        g.if_(Expr::TRUE);
        g.else_().unwrap();
        assert!(g.else_().is_err());
    }

    #[test]
    fn close_ifs_unwinds_guard_chains() {
        let mut g = new_codegen();
        let depth = g.depth();
        g.if_(Expr::TRUE);
        g.if_(Expr::FALSE);
        g.close_ifs_to(depth).unwrap();
        assert_eq!(g.finish().unwrap().len(), 1);
    }
}
