//! Materialized validators.
//!
//! A [`Program`] is one compiled unit: its optimized function, the captured
//! values it closes over and its rendered source. Programs run on a
//! tree-walking interpreter over borrowed instance data.
//!
//! The interpreter is written once, as async code. Async programs are awaited
//! by the caller; sync programs never suspend, so [`run_sync`] polls them a
//! single time with a no-op waker.
//!
//! Each call gets its own frame and error list, so one program can run on
//! many threads at once.
pub mod builtins;
pub mod value;

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::codegen::Captured;
use crate::codegen::scope::VALUE_PREFIXES;
use crate::error::{ErrorRecord, RuntimeError, ValidateError, ValidationError};
use crate::ir::{BinOp, Builtin, Expr, Func, Lit, Loop, Name, Stmt};
use crate::vocab::DataCx;

pub use value::Val;
use value::{View, strict_eq};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Guard against schemas that recurse without consuming data (`{"$ref": "#"}`).
const MAX_CALL_DEPTH: usize = 4096;
/// Native stack a unit call needs before it switches to a fresh segment.
const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

// ————————————————————————————————————————————————————————————————————————————
// PROGRAM
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug)]
pub struct Program {
    pub label: Arc<str>,
    pub func: Func,
    pub captured: IndexMap<Name, Captured>,
    pub is_async: bool,
    pub source: String,
}

impl Program {
    /// Units this program calls, in capture order.
    pub fn callees(&self) -> impl Iterator<Item = Arc<Program>> + '_ {
        self.captured.values().filter_map(|c| match c {
            Captured::Unit(slot) => slot.get().cloned(),
            _ => None,
        })
    }
}

/// Result of one synchronous validation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub valid: bool,
    pub errors: Vec<ErrorRecord>,
}

/// Run a sync program to completion on the calling thread.
pub fn run_sync(program: &Arc<Program>, data: &Value) -> Result<Outcome, RuntimeError> {
    if program.is_async {
        return Err(RuntimeError::AsyncInSyncContext);
    }
    let mut machine = Machine::default();
    let mut fut = call_unit(&mut machine, program.clone(), root_args(data));
    let polled = fut.as_mut().poll(&mut Context::from_waker(Waker::noop()));
    drop(fut);
    match polled {
        Poll::Ready(Ok(valid)) => Ok(Outcome { valid: valid.truthy(), errors: machine.callee_errors }),
        Poll::Ready(Err(Thrown::Invalid(errors))) => Ok(Outcome { valid: false, errors: errors.to_vec() }),
        Poll::Ready(Err(Thrown::Fatal(e))) => Err(e),
        Poll::Pending => Err(RuntimeError::AsyncInSyncContext),
    }
}

/// Run any program, suspending at async keyword boundaries.
pub async fn run_async(program: Arc<Program>, data: &Value) -> Result<(), ValidateError> {
    let mut machine = Machine::default();
    let is_async = program.is_async;
    let result = call_unit(&mut machine, program, root_args(data)).await;
    match result {
        Ok(valid) if is_async || valid.truthy() => Ok(()),
        Ok(_) => Err(ValidationError { errors: machine.callee_errors }.into()),
        Err(Thrown::Invalid(errors)) => Err(ValidationError { errors: errors.to_vec() }.into()),
        Err(Thrown::Fatal(e)) => Err(e.into()),
    }
}

/// `data, instancePath, parentData, parentDataProperty, rootData`
fn root_args(data: &Value) -> Vec<Val<'_>> {
    vec![Val::Data(data), Val::str(""), Val::Undef, Val::Undef, Val::Data(data)]
}

// ————————————————————————————————————————————————————————————————————————————
// MACHINE
// ————————————————————————————————————————————————————————————————————————————

enum Flow<'d> {
    Normal,
    Break,
    Return(Val<'d>),
}

enum Thrown {
    /// A `ValidationError`; catchable.
    Invalid(Arc<Vec<ErrorRecord>>),
    /// Never caught by generated code.
    Fatal(RuntimeError),
}

impl From<RuntimeError> for Thrown {
    fn from(e: RuntimeError) -> Self {
        Thrown::Fatal(e)
    }
}

type Exec<T> = Result<T, Thrown>;

/// State that outlives a single call: what the last returning unit left behind.
struct Machine<'d> {
    callee_errors: Vec<ErrorRecord>,
    callee_props: Val<'d>,
    callee_items: Val<'d>,
    depth: usize,
}

impl Default for Machine<'_> {
    fn default() -> Self {
        Self { callee_errors: Vec::new(), callee_props: Val::Undef, callee_items: Val::Undef, depth: 0 }
    }
}

struct Frame<'p, 'd> {
    captured: &'p IndexMap<Name, Captured>,
    vars: HashMap<Name, Val<'d>>,
    errors: Vec<ErrorRecord>,
    props: Val<'d>,
    items: Val<'d>,
}

impl<'p, 'd> Frame<'p, 'd> {
    fn lookup(&self, name: &Name) -> Exec<Val<'d>> {
        if let Some(v) = self.vars.get(name) {
            return Ok(v.clone());
        }
        match self.captured.get(name) {
            Some(Captured::Json(v)) => Ok(Val::Owned(v.clone())),
            Some(other) => Err(internal(format!("{name} ({other:?}) is not a value"))),
            // locals are function-scoped: read before their declaration runs, they are undefined
            None if !is_captured_name(name) => Ok(Val::Undef),
            None => Err(internal(format!("unbound name {name}"))),
        }
    }
}

fn is_captured_name(name: &Name) -> bool {
    let prefix = name.as_str().trim_end_matches(|c: char| c.is_ascii_digit());
    VALUE_PREFIXES.contains(&prefix)
}

fn internal(msg: impl Into<String>) -> Thrown {
    Thrown::Fatal(RuntimeError::Internal(msg.into()))
}

/// Polls the inner future on a fresh stack segment when the current one runs
/// low. Unit calls nest one poll per call, so recursion depth follows the
/// instance rather than the thread's stack size.
struct GrowStack<F>(F);

impl<F: Future + Unpin> Future for GrowStack<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let inner = &mut self.0;
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || Pin::new(inner).poll(cx))
    }
}

fn call_unit<'a, 'd: 'a>(
    m: &'a mut Machine<'d>,
    program: Arc<Program>,
    args: Vec<Val<'d>>,
) -> BoxFuture<'a, Exec<Val<'d>>> {
    Box::pin(GrowStack(call_unit_body(m, program, args)))
}

fn call_unit_body<'a, 'd: 'a>(
    m: &'a mut Machine<'d>,
    program: Arc<Program>,
    args: Vec<Val<'d>>,
) -> BoxFuture<'a, Exec<Val<'d>>> {
    Box::pin(async move {
        if m.depth >= MAX_CALL_DEPTH {
            return Err(internal(format!("call depth exceeded in {}", program.label)));
        }
        let mut frame = Frame {
            captured: &program.captured,
            vars: HashMap::new(),
            errors: Vec::new(),
            props: Val::Undef,
            items: Val::Undef,
        };
        for (param, arg) in program.func.params.iter().zip(args) {
            frame.vars.insert(param.clone(), arg);
        }
        m.depth += 1;
        let flow = exec_block(m, &mut frame, &program.func.body).await;
        m.depth -= 1;
        m.callee_errors = frame.errors;
        m.callee_props = frame.props;
        m.callee_items = frame.items;
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal | Flow::Break => Ok(Val::Undef),
        }
    })
}

fn exec_block<'a, 'p: 'a, 'd: 'a>(
    m: &'a mut Machine<'d>,
    frame: &'a mut Frame<'p, 'd>,
    body: &'p [Stmt],
) -> BoxFuture<'a, Exec<Flow<'d>>> {
    Box::pin(async move {
        for stmt in body {
            match exec_stmt(m, frame, stmt).await? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    })
}

async fn exec_stmt<'p, 'd>(m: &mut Machine<'d>, frame: &mut Frame<'p, 'd>, stmt: &'p Stmt) -> Exec<Flow<'d>> {
    match stmt {
        Stmt::Let { name, value, .. } => {
            let v = match value {
                Some(e) => eval_rhs(m, frame, e).await?,
                None => Val::Undef,
            };
            frame.vars.insert(name.clone(), v);
        }
        Stmt::Assign(name, e) => {
            let v = eval_rhs(m, frame, e).await?;
            frame.vars.insert(name.clone(), v);
        }
        Stmt::If { cond, then, otherwise } => {
            let branch = if eval(m, frame, cond)?.truthy() { then } else { otherwise };
            return exec_block(m, frame, branch).await;
        }
        Stmt::For { kind, body } => return exec_loop(m, frame, kind, body).await,
        Stmt::Func(func) => return Err(internal(format!("nested function {} is not supported", func.name))),
        Stmt::Return(e) => return Ok(Flow::Return(eval_rhs(m, frame, e).await?)),
        Stmt::Throw(e) => {
            return match eval(m, frame, e)? {
                Val::Errors(errors) => Err(Thrown::Invalid(errors)),
                other => Err(internal(format!("thrown value is not a ValidationError: {}", other.display()))),
            };
        }
        Stmt::Try { body, catch, finally } => {
            let mut result = exec_block(m, frame, body).await;
            if let (Err(Thrown::Invalid(errors)), Some((name, handler))) = (&result, catch) {
                frame.vars.insert(name.clone(), Val::Errors(errors.clone()));
                result = exec_block(m, frame, handler).await;
            }
            if !finally.is_empty() {
                match exec_block(m, frame, finally).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            return result;
        }
        Stmt::Expr(e) => {
            eval_rhs(m, frame, e).await?;
        }
        Stmt::Block(body) => return exec_block(m, frame, body).await,
        Stmt::Break => return Ok(Flow::Break),
    }
    Ok(Flow::Normal)
}

async fn exec_loop<'p, 'd>(
    m: &mut Machine<'d>,
    frame: &mut Frame<'p, 'd>,
    kind: &'p Loop,
    body: &'p [Stmt],
) -> Exec<Flow<'d>> {
    let (var, values): (&Name, Vec<Val<'d>>) = match kind {
        Loop::Range { var, from, to } => {
            let from = eval(m, frame, from)?.as_f64().unwrap_or(0.0).max(0.0) as usize;
            let to = eval(m, frame, to)?.as_f64().unwrap_or(0.0).max(0.0) as usize;
            (var, (from..to).map(|i| Val::Num(i as f64)).collect())
        }
        Loop::Keys { var, object } => {
            let keys: Vec<Val<'d>> = match eval(m, frame, object)? {
                Val::Data(Value::Object(map)) => map.keys().map(|k| Val::Str(Cow::Borrowed(k.as_str()))).collect(),
                Val::Owned(v) => match &*v {
                    Value::Object(map) => map.keys().map(|k| Val::str(k.as_str())).collect(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            (var, keys)
        }
        Loop::Values { var, array } => {
            let items: Vec<Val<'d>> = match eval(m, frame, array)? {
                Val::Data(Value::Array(items)) => items.iter().map(Val::Data).collect(),
                Val::Owned(v) => match &*v {
                    Value::Array(items) => items.iter().cloned().map(Val::from_json).collect(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            (var, items)
        }
    };
    for v in values {
        frame.vars.insert(var.clone(), v);
        match exec_block(m, frame, body).await? {
            Flow::Normal => {}
            Flow::Break => break,
            ret @ Flow::Return(_) => return Ok(ret),
        }
    }
    Ok(Flow::Normal)
}

// ---- calls ---- //

/// Right-hand sides may call units and await async keywords; nested
/// expressions may not.
async fn eval_rhs<'p, 'd>(m: &mut Machine<'d>, frame: &mut Frame<'p, 'd>, e: &'p Expr) -> Exec<Val<'d>> {
    let (callee, args) = match e {
        Expr::Invoke(callee, args) => (callee, args),
        Expr::Await(inner) => match &**inner {
            Expr::Invoke(callee, args) => (callee, args),
            other => return eval(m, frame, other),
        },
        other => return eval(m, frame, other),
    };
    match frame.captured.get(callee) {
        Some(Captured::Unit(slot)) => {
            let program = slot.get().cloned().ok_or_else(|| RuntimeError::Unmaterialized(slot.label.to_string()))?;
            let args = args.iter().map(|a| eval(m, frame, a)).collect::<Exec<Vec<_>>>()?;
            call_unit(m, program, args).await
        }
        Some(Captured::AsyncKeyword { keyword, func }) => {
            let (func, keyword) = (func.clone(), keyword.clone());
            let [schema, data] = eval_args::<2>(m, frame, args)?;
            match func(schema.to_json(), data.to_json()).await {
                Ok(valid) => Ok(Val::Bool(valid)),
                Err(err) => Err(RuntimeError::Keyword { keyword: keyword.to_string(), message: format!("{err:#}") }.into()),
            }
        }
        _ => eval(m, frame, e),
    }
}

fn eval_args<'p, 'd, const N: usize>(
    m: &mut Machine<'d>,
    frame: &mut Frame<'p, 'd>,
    args: &'p [Expr],
) -> Exec<[Val<'d>; N]> {
    let vals = args.iter().map(|a| eval(m, frame, a)).collect::<Exec<Vec<_>>>()?;
    let got = vals.len();
    <[Val<'d>; N]>::try_from(vals).map_err(|_| internal(format!("expected {N} arguments, got {got}")))
}

fn invoke<'p, 'd>(m: &mut Machine<'d>, frame: &mut Frame<'p, 'd>, callee: &Name, args: &'p [Expr]) -> Exec<Val<'d>> {
    let Some(captured) = frame.captured.get(callee) else {
        return Err(internal(format!("unbound function {callee}")));
    };
    match captured {
        Captured::Pattern(re) => {
            let re = re.clone();
            let [s] = eval_args::<1>(m, frame, args)?;
            Ok(Val::Bool(s.as_str().is_some_and(|s| re.is_match(s))))
        }
        Captured::Format(def) => {
            let def = def.clone();
            let [data] = eval_args::<1>(m, frame, args)?;
            def.test(&data)
                .map(Val::Bool)
                .map_err(|err| RuntimeError::Format { format: def.name.clone(), message: format!("{err:#}") }.into())
        }
        Captured::FormatCompare(def) => {
            let def = def.clone();
            let [a, b] = eval_args::<2>(m, frame, args)?;
            Ok(match def.compare(&a, &b) {
                Some(ord) => Val::Num(ord as i8 as f64),
                None => Val::Undef,
            })
        }
        Captured::Keyword { keyword, func } => {
            let (keyword, func) = (keyword.clone(), func.clone());
            let [schema, data, instance_path, root] = eval_args::<4>(m, frame, args)?;
            let data = data.as_json().map(Cow::Borrowed).unwrap_or_else(|| Cow::Owned(data.to_json()));
            let root = root.as_json().map(Cow::Borrowed).unwrap_or_else(|| Cow::Owned(root.to_json()));
            let cx = DataCx { instance_path: instance_path.as_str().unwrap_or_default(), root_data: &root };
            func(&schema.to_json(), &data, &cx)
                .map(Val::Bool)
                .map_err(|err| RuntimeError::Keyword { keyword: keyword.to_string(), message: format!("{err:#}") }.into())
        }
        Captured::AsyncKeyword { keyword, .. } => {
            Err(internal(format!("async keyword \"{keyword}\" called outside an await")))
        }
        Captured::Unit(slot) => Err(internal(format!("unit {} called in expression position", slot.label))),
        Captured::Json(_) => Err(internal(format!("{callee} is not callable"))),
    }
}

// ---- expressions ---- //

fn eval<'p, 'd>(m: &mut Machine<'d>, frame: &mut Frame<'p, 'd>, e: &'p Expr) -> Exec<Val<'d>> {
    Ok(match e {
        Expr::Lit(lit) => match lit {
            Lit::Undef => Val::Undef,
            Lit::Null => Val::Null,
            Lit::Bool(b) => Val::Bool(*b),
            Lit::Num(n) => Val::Num(*n),
            Lit::Str(s) => Val::Text(s.clone()),
            Lit::Json(v) => Val::Owned(v.clone()),
        },
        Expr::Name(n) => frame.lookup(n)?,
        Expr::Prop(obj, key) => {
            let obj = eval(m, frame, obj)?;
            let key = eval(m, frame, key)?;
            obj.prop(&key)
        }
        Expr::Not(inner) => Val::Bool(!eval(m, frame, inner)?.truthy()),
        Expr::Bin(op, a, b) => {
            let a = eval(m, frame, a)?;
            match op {
                BinOp::And if !a.truthy() => a,
                BinOp::Or if a.truthy() => a,
                BinOp::And | BinOp::Or => eval(m, frame, b)?,
                _ => binary(*op, &a, &eval(m, frame, b)?),
            }
        }
        Expr::Call(builtin, args) => call_builtin(m, frame, *builtin, args)?,
        Expr::Invoke(callee, args) => invoke(m, frame, callee, args)?,
        Expr::Await(_) => return Err(internal("await outside a statement")),
        Expr::Object(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.to_string(), eval(m, frame, v)?.to_json());
            }
            Val::Owned(Arc::new(Value::Object(map)))
        }
        Expr::Array(items) => {
            let items = items.iter().map(|i| Ok(eval(m, frame, i)?.to_json())).collect::<Exec<Vec<_>>>()?;
            Val::Owned(Arc::new(Value::Array(items)))
        }
        Expr::Concat(items) => {
            let mut out = String::new();
            for item in items {
                out.push_str(&eval(m, frame, item)?.display());
            }
            Val::str(out)
        }
    })
}

fn binary<'d>(op: BinOp, a: &Val<'d>, b: &Val<'d>) -> Val<'d> {
    let nums = a.as_f64().zip(b.as_f64());
    match op {
        BinOp::Eq => Val::Bool(strict_eq(a, b)),
        BinOp::Ne => Val::Bool(!strict_eq(a, b)),
        BinOp::Lt => Val::Bool(nums.is_some_and(|(x, y)| x < y)),
        BinOp::Le => Val::Bool(nums.is_some_and(|(x, y)| x <= y)),
        BinOp::Gt => Val::Bool(nums.is_some_and(|(x, y)| x > y)),
        BinOp::Ge => Val::Bool(nums.is_some_and(|(x, y)| x >= y)),
        BinOp::Add => match (nums, a.view(), b.view()) {
            (Some((x, y)), ..) => Val::Num(x + y),
            (None, View::Str(_), _) | (None, _, View::Str(_)) => Val::str(a.display() + &b.display()),
            _ => Val::Num(f64::NAN),
        },
        BinOp::Sub => nums.map(|(x, y)| Val::Num(x - y)).unwrap_or(Val::Num(f64::NAN)),
        BinOp::And | BinOp::Or => Val::Undef,
    }
}

fn call_builtin<'p, 'd>(m: &mut Machine<'d>, frame: &mut Frame<'p, 'd>, builtin: Builtin, args: &'p [Expr]) -> Exec<Val<'d>> {
    use builtins as b;
    Ok(match builtin {
        Builtin::TypeIs(set) => {
            let [x] = eval_args::<1>(m, frame, args)?;
            Val::Bool(x.json_type().is_some_and(|t| set.admits(t)))
        }
        Builtin::Len => b::len(&eval_args::<1>(m, frame, args)?[0]),
        Builtin::Equal => {
            let [x, y] = eval_args::<2>(m, frame, args)?;
            Val::Bool(b::equal(&x, &y))
        }
        Builtin::HasProp => {
            let [obj, key] = eval_args::<2>(m, frame, args)?;
            Val::Bool(b::has_prop(&obj, &key))
        }
        Builtin::MultipleOf => {
            let [x, d] = eval_args::<2>(m, frame, args)?;
            Val::Bool(b::multiple_of(&x, &d))
        }
        Builtin::Duplicates => b::find_duplicates(&eval_args::<1>(m, frame, args)?[0]),
        Builtin::PointerSegment => Val::str(b::pointer_segment(&eval_args::<1>(m, frame, args)?[0])),
        Builtin::JsProperty => Val::str(b::js_property(&eval_args::<1>(m, frame, args)?[0])),
        Builtin::Coerce { to, array } => {
            let [x] = eval_args::<1>(m, frame, args)?;
            b::coerce(&x, to, array)
        }
        Builtin::PushError => {
            let [rec] = eval_args::<1>(m, frame, args)?;
            frame.errors.push(b::record(&rec)?);
            Val::Undef
        }
        Builtin::ErrorCount => Val::Num(frame.errors.len() as f64),
        Builtin::TruncateErrors => {
            let [n] = eval_args::<1>(m, frame, args)?;
            frame.errors.truncate(n.as_f64().unwrap_or(0.0) as usize);
            Val::Undef
        }
        Builtin::AppendCalleeErrors => {
            frame.errors.append(&mut m.callee_errors);
            Val::Undef
        }
        Builtin::SetEvaluated => {
            let [props, items] = eval_args::<2>(m, frame, args)?;
            frame.props = props;
            frame.items = items;
            Val::Undef
        }
        Builtin::CalleeProps => m.callee_props.clone(),
        Builtin::CalleeItems => m.callee_items.clone(),
        Builtin::MergeProps => {
            let [x, y] = eval_args::<2>(m, frame, args)?;
            b::merge_props(&x, &y)
        }
        Builtin::MergeItems => {
            let [x, y] = eval_args::<2>(m, frame, args)?;
            b::merge_items(&x, &y)
        }
        Builtin::IsEvaluated => {
            let [props, key] = eval_args::<2>(m, frame, args)?;
            Val::Bool(b::is_evaluated(&props, &key))
        }
        Builtin::IsValidationError => {
            let [e] = eval_args::<1>(m, frame, args)?;
            Val::Bool(matches!(e, Val::Errors(_)))
        }
        Builtin::AppendThrownErrors => {
            if let [Val::Errors(errors)] = eval_args::<1>(m, frame, args)? {
                frame.errors.extend(errors.iter().cloned());
            }
            Val::Undef
        }
        Builtin::NewValidationError => Val::Errors(Arc::new(frame.errors.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CodeGen, LOCAL_PREFIXES, Scope};
    use crate::ir::{eq, not};
    use crate::types::TypeSet;
    use serde_json::json;

    /// `function validate0(data0) { if (!isType<string>(data0)) { pushError(..); return false } return errorCount() === 0 }`
    fn string_program() -> Arc<Program> {
        let mut g = CodeGen::new(Scope::with_prefixes(None, LOCAL_PREFIXES));
        let data = g.fresh("data").unwrap();
        let name = Name::new("validate0").unwrap();
        g.func(name, vec![data.clone()], false);
        g.if_(not(Expr::call(Builtin::TypeIs(TypeSet::STRING), vec![Expr::from(&data)])));
        let record = Expr::Object(vec![
            ("instancePath".into(), Expr::str("")),
            ("schemaPath".into(), Expr::str("#/type")),
            ("keyword".into(), Expr::str("type")),
            ("params".into(), Expr::Object(vec![("type".into(), Expr::str("string"))])),
            ("message".into(), Expr::Concat(vec![Expr::str("must be "), Expr::str("string")])),
        ]);
        g.expr(Expr::call(Builtin::PushError, vec![record]));
        g.return_(Expr::FALSE);
        g.end_if().unwrap();
        g.return_(eq(Expr::call(Builtin::ErrorCount, vec![]), Expr::num(0)));
        g.end_func().unwrap();
        let Some(Stmt::Func(func)) = g.finish().unwrap().pop() else { panic!("expected a function") };
        Arc::new(Program {
            label: "test".into(),
            func,
            captured: IndexMap::new(),
            is_async: false,
            source: String::new(),
        })
    }

    #[test]
    fn sync_programs_complete_in_one_poll() {
        let program = string_program();
        let ok = run_sync(&program, &json!("a")).unwrap();
        assert!(ok.valid && ok.errors.is_empty());

        let bad = run_sync(&program, &json!(5)).unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.errors.len(), 1);
        assert_eq!(bad.errors[0].keyword, "type");
        assert_eq!(bad.errors[0].message, "must be string");
    }

    #[test]
    fn async_driver_wraps_errors() {
        let program = string_program();
        let fut = run_async(program, &json!(null));
        let mut fut = std::pin::pin!(fut);
        let mut cx = Context::from_waker(Waker::noop());
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Err(ValidateError::Invalid(e))) => assert_eq!(e.errors[0].keyword, "type"),
            other => panic!("unexpected {:?}", other.map(|r| r.is_ok())),
        }
    }

    fn linked_list(depth: usize, leaf: Value) -> Value {
        let mut value = json!({"value": leaf});
        for _ in 0..depth {
            value = json!({"next": value});
        }
        value
    }

    #[test]
    fn deep_recursion_follows_the_instance() {
        let mut reg = crate::SchemaRegistry::with_options(crate::Options {
            inline_refs: crate::InlineRefs::Never,
            ..crate::Options::default()
        });
        let v = reg
            .compile(json!({
                "type": "object",
                "properties": {"next": {"$ref": "#"}, "value": {"type": "integer"}}
            }))
            .unwrap();
        let deep = linked_list(1500, json!(1));
        let out = v.validate(&deep).unwrap();
        assert!(out.valid, "{:?}", out.errors);

        let bad = linked_list(1200, json!("x"));
        let out = v.validate(&bad).unwrap();
        assert!(!out.valid);
        assert_eq!(out.errors[0].instance_path, format!("{}/value", "/next".repeat(1200)));
    }

    #[test]
    fn recursion_without_data_is_fatal() {
        let mut reg = crate::SchemaRegistry::with_options(crate::Options {
            inline_refs: crate::InlineRefs::Never,
            ..crate::Options::default()
        });
        let v = reg.compile(json!({"$defs": {"a": {"$ref": "#"}}, "$ref": "#/$defs/a"})).unwrap();
        assert!(matches!(v.validate(&json!(1)), Err(RuntimeError::Internal(_))));
    }

    #[test]
    fn loops_break_and_bind_borrowed_keys() {
        let mut g = CodeGen::new(Scope::with_prefixes(None, LOCAL_PREFIXES));
        let data = g.fresh("data").unwrap();
        g.func(Name::new("validate0").unwrap(), vec![data.clone()], false);
        let count = g.let_("count", Some(Expr::num(0))).unwrap();
        let key = g.for_keys("key", Expr::from(&data)).unwrap();
        g.assign(&count, crate::ir::bin(BinOp::Add, &count, Expr::num(1)));
        g.if_(eq(&key, Expr::str("stop")));
        g.break_();
        g.end_if().unwrap();
        g.end_for().unwrap();
        g.return_(Expr::from(&count));
        g.end_func().unwrap();
        let Some(Stmt::Func(func)) = g.finish().unwrap().pop() else { panic!("expected a function") };
        let program = Arc::new(Program { label: "t".into(), func, captured: IndexMap::new(), is_async: false, source: String::new() });

        let mut machine = Machine::default();
        let data = json!({"a": 1, "stop": 2, "b": 3});
        let mut fut = call_unit(&mut machine, program, vec![Val::Data(&data)]);
        match fut.as_mut().poll(&mut Context::from_waker(Waker::noop())) {
            Poll::Ready(Ok(Val::Num(n))) => assert_eq!(n, 2.0),
            _ => panic!("loop did not finish"),
        }
    }
}
