//! Emission contexts.
//!
//! [`SchemaCx`] is where a (sub)schema is being emitted: which data variable
//! holds the instance, the paths to it, and the error mode in force.
//! [`CxState`] is what emission learns along the way. [`KeywordCx`] is the
//! handle a keyword implementation gets.
use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::codegen::{Captured, CodeGen};
use crate::compile::evaluated::{Evaluated, Items, Props};
use crate::compile::{Compiler, UnitInfo, emit};
use crate::error::CompileError;
use crate::exec::builtins::js_property;
use crate::exec::Val;
use crate::ir::{Builtin, Expr, Lit, Name, eq, not};
use crate::options::Draft;
use crate::resolve::escape_pointer;
use crate::types::TypeSet;
use crate::vocab::KeywordDefinition;

// ————————————————————————————————————————————————————————————————————————————
// PATHS
// ————————————————————————————————————————————————————————————————————————————

/// One step from a data value to its child.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
    /// Property name held in a variable.
    DynKey(Name),
    /// Array index held in a variable.
    DynIndex(Name),
}

impl PathSeg {
    /// The property key as a runtime value.
    pub fn key_expr(&self) -> Expr {
        match self {
            PathSeg::Key(k) => Expr::str(k.as_str()),
            PathSeg::Index(i) => Expr::num(*i as f64),
            PathSeg::DynKey(n) | PathSeg::DynIndex(n) => Expr::from(n),
        }
    }

    fn render(&self, js: bool) -> Vec<Expr> {
        match (self, js) {
            (PathSeg::Key(k), false) => vec![Expr::str(format!("/{}", escape_pointer(k)))],
            (PathSeg::Key(k), true) => vec![Expr::str(js_property(&Val::str(k.as_str())))],
            (PathSeg::Index(i), false) => vec![Expr::str(format!("/{i}"))],
            (PathSeg::Index(i), true) => vec![Expr::str(format!("[{i}]"))],
            (PathSeg::DynKey(n) | PathSeg::DynIndex(n), false) => {
                vec![Expr::str("/"), Expr::call(Builtin::PointerSegment, vec![Expr::from(n)])]
            }
            (PathSeg::DynKey(n) | PathSeg::DynIndex(n), true) => {
                vec![Expr::call(Builtin::JsProperty, vec![Expr::from(n)])]
            }
        }
    }
}

/// Concatenation with adjacent string literals merged.
pub(crate) fn concat(parts: Vec<Expr>) -> Expr {
    let mut out: Vec<Expr> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Expr::Concat(inner) => out.extend(inner),
            Expr::Lit(Lit::Str(next)) => match out.last_mut() {
                Some(Expr::Lit(Lit::Str(prev))) => *prev = Arc::from(format!("{prev}{next}")),
                _ => out.push(Expr::Lit(Lit::Str(next))),
            },
            part => out.push(part),
        }
    }
    match out.len() {
        0 => Expr::str(""),
        1 => out.pop().unwrap_or_else(|| Expr::str("")),
        _ => Expr::Concat(out),
    }
}

pub(crate) fn error_count() -> Expr {
    Expr::call(Builtin::ErrorCount, Vec::new())
}

// ————————————————————————————————————————————————————————————————————————————
// SCHEMA CONTEXT
// ————————————————————————————————————————————————————————————————————————————

/// A unit function's parameters.
#[derive(Debug, Clone)]
pub struct UnitParams {
    pub data: Name,
    pub instance_path: Name,
    pub parent_data: Name,
    pub parent_data_property: Name,
    pub root_data: Name,
}

impl UnitParams {
    pub fn declare(g: &mut CodeGen) -> Result<Self, CompileError> {
        Ok(Self {
            data: g.fresh("data")?,
            instance_path: g.fresh("instancePath")?,
            parent_data: g.fresh("parentData")?,
            parent_data_property: g.fresh("parentDataProperty")?,
            root_data: g.fresh("rootData")?,
        })
    }

    pub fn to_vec(&self) -> Vec<Name> {
        vec![
            self.data.clone(),
            self.instance_path.clone(),
            self.parent_data.clone(),
            self.parent_data_property.clone(),
            self.root_data.clone(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SchemaCx<'s> {
    pub(crate) schema: &'s Value,
    /// `#`-prefixed pointer used for error `schemaPath`s.
    pub(crate) schema_path: String,
    pub(crate) base: Url,
    pub(crate) draft: Draft,
    pub(crate) data: Name,
    pub(crate) data_level: usize,
    /// Data variable at each level, root first.
    pub(crate) data_names: Vec<Name>,
    /// Step into each level below the root.
    pub(crate) data_path: Vec<PathSeg>,
    /// Steps appended to the unit's `instancePath`.
    pub(crate) error_path: Vec<PathSeg>,
    pub(crate) parent_data: Expr,
    pub(crate) parent_data_property: Expr,
    pub(crate) instance_path: Name,
    pub(crate) root_data: Name,
    /// Error count this schema started at.
    pub(crate) errs: Expr,
    /// Errors here may be discarded by an enclosing keyword; never exit early.
    pub(crate) composite: bool,
    pub(crate) all_errors: bool,
    pub(crate) track: bool,
    pub(crate) js_paths: bool,
    pub(crate) messages: bool,
}

impl<'s> SchemaCx<'s> {
    pub(crate) fn unit_root(
        schema: &'s Value,
        unit: &UnitInfo,
        params: &UnitParams,
        c: &Compiler,
    ) -> Self {
        Self {
            schema,
            schema_path: unit.schema_path.clone(),
            base: unit.base.clone(),
            draft: unit.draft,
            data: params.data.clone(),
            data_level: 0,
            data_names: vec![params.data.clone()],
            data_path: Vec::new(),
            error_path: Vec::new(),
            parent_data: Expr::from(&params.parent_data),
            parent_data_property: Expr::from(&params.parent_data_property),
            instance_path: params.instance_path.clone(),
            root_data: params.root_data.clone(),
            errs: Expr::num(0),
            composite: false,
            all_errors: c.opts.all_errors,
            track: c.opts.unevaluated,
            js_paths: c.opts.js_property_syntax,
            messages: c.opts.messages,
        }
    }

    /// The instance location of the current data, as a runtime string.
    pub fn instance_path_expr(&self) -> Expr {
        let mut parts = vec![Expr::from(&self.instance_path)];
        for seg in &self.error_path {
            parts.extend(seg.render(self.js_paths));
        }
        concat(parts)
    }

    /// `instancePath` to pass a unit called on the current data.
    pub fn call_args(&self) -> Vec<Expr> {
        vec![
            Expr::from(&self.data),
            self.instance_path_expr(),
            self.parent_data.clone(),
            self.parent_data_property.clone(),
            Expr::from(&self.root_data),
        ]
    }

    pub fn error_record(
        &self,
        keyword: &str,
        schema_path: &str,
        params: Vec<(Arc<str>, Expr)>,
        message: Expr,
    ) -> Expr {
        let mut fields = vec![
            (Arc::from("instancePath"), self.instance_path_expr()),
            (Arc::from("schemaPath"), Expr::str(schema_path)),
            (Arc::from("keyword"), Expr::str(keyword)),
            (Arc::from("params"), Expr::Object(params)),
        ];
        if self.messages {
            fields.push((Arc::from("message"), message));
        }
        Expr::Object(fields)
    }
}

/// What emission of one schema has learned.
#[derive(Debug, Clone)]
pub struct CxState {
    /// Types the data is known to have here; empty when unknown.
    pub(crate) data_types: TypeSet,
    pub(crate) props: Props,
    pub(crate) items: Items,
}

impl CxState {
    pub fn new(data_types: TypeSet) -> Self {
        let Evaluated { props, items } = Evaluated::default();
        Self { data_types, props, items }
    }

    pub fn evaluated(&self) -> Evaluated {
        Evaluated { props: self.props.clone(), items: self.items.clone() }
    }
}

/// Push a record, then leave the unit if nothing else can run.
pub(crate) fn report(g: &mut CodeGen, it: &SchemaCx<'_>, unit: &UnitInfo, record: Expr) {
    g.expr(Expr::call(Builtin::PushError, vec![record]));
    fail_exit(g, it, unit);
}

pub(crate) fn fail_exit(g: &mut CodeGen, it: &SchemaCx<'_>, unit: &UnitInfo) {
    if it.composite || it.all_errors {
        return;
    }
    if unit.is_async {
        g.throw_(Expr::call(Builtin::NewValidationError, Vec::new()));
    } else {
        g.return_(Expr::FALSE);
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SUBSCHEMAS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub enum SubData {
    Same,
    /// A property or item of the current data.
    Prop(PathSeg),
    /// A computed value, such as a property name. `seg` is how it is reached
    /// for relative `$data` pointers; it does not extend `instancePath`.
    Value { value: Expr, seg: PathSeg },
}

/// A subschema to emit in place.
#[derive(Debug, Clone)]
pub struct Sub<'v> {
    pub schema: &'v Value,
    /// Pointer below the keyword, `""` for the keyword's own value.
    pub path: String,
    pub keyword: Option<String>,
    /// Full `schemaPath` override.
    pub schema_path: Option<String>,
    pub data: SubData,
    pub data_types: TypeSet,
    pub composite: bool,
    pub all_errors: Option<bool>,
    pub base: Option<(Url, Draft)>,
}

impl<'v> Sub<'v> {
    pub fn at(schema: &'v Value, path: impl Into<String>) -> Self {
        Self {
            schema,
            path: path.into(),
            keyword: None,
            schema_path: None,
            data: SubData::Same,
            data_types: TypeSet::empty(),
            composite: false,
            all_errors: None,
            base: None,
        }
    }

    /// Sibling keyword's value (`then`, `else`).
    pub fn keyword(mut self, keyword: &str) -> Self {
        self.keyword = Some(keyword.to_string());
        self
    }

    pub fn prop(mut self, seg: PathSeg) -> Self {
        self.data = SubData::Prop(seg);
        self
    }

    pub fn value(mut self, value: Expr, seg: PathSeg, data_types: TypeSet) -> Self {
        self.data = SubData::Value { value, seg };
        self.data_types = data_types;
        self
    }

    pub fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.all_errors = Some(false);
        self
    }

    pub fn located(mut self, schema_path: String, base: Url, draft: Draft) -> Self {
        self.schema_path = Some(schema_path);
        self.base = Some((base, draft));
        self
    }
}

// ————————————————————————————————————————————————————————————————————————————
// KEYWORD CONTEXT
// ————————————————————————————————————————————————————————————————————————————

/// One error a keyword reports. Keyword and schema path default to the
/// keyword being emitted.
#[derive(Debug, Clone)]
pub struct KwError {
    pub message: Expr,
    pub params: Vec<(Arc<str>, Expr)>,
    pub keyword: Option<String>,
    pub schema_path: Option<String>,
}

impl KwError {
    pub fn new(message: impl Into<KwMessage>) -> Self {
        Self { message: message.into().0, params: Vec::new(), keyword: None, schema_path: None }
    }

    pub fn param(mut self, key: &str, value: Expr) -> Self {
        self.params.push((Arc::from(key), value));
        self
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        self.keyword = Some(keyword.to_string());
        self
    }

    pub fn schema_path(mut self, path: String) -> Self {
        self.schema_path = Some(path);
        self
    }
}

/// A message, static or built at runtime.
pub struct KwMessage(Expr);

impl From<&str> for KwMessage {
    fn from(s: &str) -> Self {
        KwMessage(Expr::str(s))
    }
}

impl From<String> for KwMessage {
    fn from(s: String) -> Self {
        KwMessage(Expr::str(s))
    }
}

impl From<Vec<Expr>> for KwMessage {
    fn from(parts: Vec<Expr>) -> Self {
        KwMessage(concat(parts))
    }
}

impl From<Expr> for KwMessage {
    fn from(e: Expr) -> Self {
        KwMessage(e)
    }
}

/// The handle keyword implementations emit through.
pub struct KeywordCx<'a, 's> {
    pub(crate) c: &'a mut Compiler,
    pub(crate) g: &'a mut CodeGen,
    pub(crate) unit: &'a UnitInfo,
    pub(crate) it: &'a SchemaCx<'s>,
    pub(crate) st: &'a mut CxState,
    pub(crate) keyword: &'a str,
    pub(crate) def: &'a KeywordDefinition,
    pub(crate) schema: &'s Value,
    pub(crate) schema_code: Expr,
    pub(crate) is_data: bool,
    pub(crate) parent: &'s Map<String, Value>,
}

impl<'a, 's> KeywordCx<'a, 's> {
    pub fn keyword(&self) -> &str {
        self.keyword
    }

    pub fn definition(&self) -> &KeywordDefinition {
        self.def
    }

    /// The keyword's value in the schema (the `{"$data": ..}` object when
    /// [`is_data`](Self::is_data)).
    pub fn schema(&self) -> &'s Value {
        self.schema
    }

    /// The keyword's value as a runtime expression.
    pub fn schema_code(&self) -> Expr {
        self.schema_code.clone()
    }

    pub fn is_data(&self) -> bool {
        self.is_data
    }

    pub fn parent_schema(&self) -> &'s Map<String, Value> {
        self.parent
    }

    /// A sibling keyword's value.
    pub fn sibling(&self, keyword: &str) -> Option<&'s Value> {
        self.parent.get(keyword)
    }

    pub fn data(&self) -> Expr {
        Expr::from(&self.it.data)
    }

    pub fn data_name(&self) -> &Name {
        &self.it.data
    }

    pub fn data_types(&self) -> TypeSet {
        self.st.data_types
    }

    pub fn draft(&self) -> Draft {
        self.it.draft
    }

    pub fn all_errors(&self) -> bool {
        self.it.all_errors
    }

    pub fn tracks_evaluated(&self) -> bool {
        self.it.track
    }

    pub fn codegen(&mut self) -> &mut CodeGen {
        self.g
    }

    /// `schemaPath` of this keyword.
    pub fn schema_path(&self) -> String {
        format!("{}/{}", self.it.schema_path, escape_pointer(self.keyword))
    }

    pub fn instance_path(&self) -> Expr {
        self.it.instance_path_expr()
    }

    pub fn root_data(&self) -> Expr {
        Expr::from(&self.it.root_data)
    }

    /// Register a runtime value the generated code closes over.
    pub fn capture(&mut self, prefix: &str, value: Captured, key: Option<&str>) -> Result<Name, CompileError> {
        Ok(self.c.values.register_value(prefix, value, key)?)
    }

    /// A compiled regular expression, shared by source text.
    pub fn pattern(&mut self, source: &str) -> Result<Name, CompileError> {
        self.c.pattern(source)
    }

    /// Whether `schema` accepts everything: `true`, `{}`, or annotations only.
    pub fn always_valid(&self, schema: &Value) -> bool {
        crate::vocab::always_valid(&self.c.vocab, schema)
    }

    pub fn invalid_value(&self, expected: &str) -> CompileError {
        CompileError::invalid_value(self.keyword, &self.it.schema_path, expected)
    }

    // ---- errors ---- //

    fn record(&self, err: KwError) -> Expr {
        let keyword = err.keyword.as_deref().unwrap_or(self.keyword);
        let schema_path = err.schema_path.clone().unwrap_or_else(|| self.schema_path());
        self.it.error_record(keyword, &schema_path, err.params, err.message)
    }

    /// Report unconditionally.
    pub fn error(&mut self, err: KwError) -> Result<(), CompileError> {
        let record = self.record(err);
        report(self.g, self.it, self.unit, record);
        Ok(())
    }

    /// Report when `cond` holds. Outside collect-all mode the remaining code
    /// of this keyword runs in the `else` branch.
    pub fn fail(&mut self, cond: Expr, err: KwError) -> Result<(), CompileError> {
        match cond.as_bool_lit() {
            Some(false) => return Ok(()),
            Some(true) => return self.error(err),
            None => {}
        }
        self.g.if_(cond);
        self.error(err)?;
        if self.it.all_errors { self.g.end_if()? } else { self.g.else_()? }
        Ok(())
    }

    /// Report unless `cond` holds.
    pub fn pass(&mut self, cond: Expr, err: KwError) -> Result<(), CompileError> {
        self.fail(not(cond), err)
    }

    /// Continue this keyword only when `valid`, outside collect-all mode.
    pub fn ok(&mut self, valid: Expr) {
        if !self.it.all_errors {
            self.g.if_(valid);
        }
    }

    /// Report if `valid` is false; on success drop errors past `reset`.
    pub fn result(&mut self, valid: Expr, err: KwError, reset: Option<&Name>) -> Result<(), CompileError> {
        self.g.if_(not(valid));
        self.error(err)?;
        match reset {
            Some(errs) => {
                self.g.else_()?;
                self.reset(errs);
                if self.it.all_errors {
                    self.g.end_if()?;
                }
            }
            None if self.it.all_errors => self.g.end_if()?,
            None => self.g.else_()?,
        }
        Ok(())
    }

    /// `const errsN = errorCount()`
    pub fn errors_mark(&mut self) -> Result<Name, CompileError> {
        Ok(self.g.const_("errs", error_count())?)
    }

    /// Drop errors recorded after `errs`.
    pub fn reset(&mut self, errs: &Name) {
        self.g.expr(Expr::call(Builtin::TruncateErrors, vec![Expr::from(errs)]));
    }

    // ---- subschemas ---- //

    /// Emit `sub` in place and set `valid` to whether it added no errors.
    /// Returns what it evaluated of the current data.
    pub fn subschema(&mut self, sub: Sub<'_>, valid: &Name) -> Result<Evaluated, CompileError> {
        let errs = self.g.const_("errs", error_count())?;
        let it = self.it;
        let schema_path = match &sub.schema_path {
            Some(path) => path.clone(),
            None => {
                let keyword = sub.keyword.as_deref().unwrap_or(self.keyword);
                format!("{}/{}{}", it.schema_path, escape_pointer(keyword), sub.path)
            }
        };
        let (base, draft) = sub.base.clone().unwrap_or_else(|| (it.base.clone(), it.draft));
        let mut child = SchemaCx {
            schema: sub.schema,
            schema_path,
            base,
            draft,
            data: it.data.clone(),
            data_level: it.data_level,
            data_names: it.data_names.clone(),
            data_path: it.data_path.clone(),
            error_path: it.error_path.clone(),
            parent_data: it.parent_data.clone(),
            parent_data_property: it.parent_data_property.clone(),
            instance_path: it.instance_path.clone(),
            root_data: it.root_data.clone(),
            errs: Expr::from(&errs),
            composite: it.composite || sub.composite,
            all_errors: sub.all_errors.unwrap_or(it.all_errors),
            track: it.track,
            js_paths: it.js_paths,
            messages: it.messages,
        };
        let same_data = matches!(sub.data, SubData::Same);
        match sub.data {
            SubData::Same => {}
            SubData::Prop(seg) => {
                let value = Expr::from(&it.data).prop(seg.key_expr());
                let data = self.g.let_("data", Some(value))?;
                child.parent_data = Expr::from(&it.data);
                child.parent_data_property = seg.key_expr();
                child.data_level += 1;
                child.data_names.push(data.clone());
                child.data_path.push(seg.clone());
                child.error_path.push(seg);
                child.data = data;
            }
            SubData::Value { value, seg } => {
                let data = self.g.let_("data", Some(value))?;
                child.parent_data = Expr::from(&it.data);
                child.parent_data_property = seg.key_expr();
                child.data_level += 1;
                child.data_names.push(data.clone());
                child.data_path.push(seg);
                child.data = data;
            }
        }
        let data_types = if same_data { sub.data_types | self.st.data_types } else { sub.data_types };
        let mut st = CxState::new(data_types);
        emit::schema(self.c, self.g, self.unit, &child, &mut st)?;
        self.g.assign(valid, eq(error_count(), &errs));
        Ok(if same_data { st.evaluated() } else { Evaluated::default() })
    }

    // ---- evaluated properties and items ---- //

    pub fn props(&self) -> &Props {
        &self.st.props
    }

    pub fn items(&self) -> &Items {
        &self.st.items
    }

    pub fn set_props(&mut self, props: Props) {
        self.st.props = props;
    }

    pub fn set_items(&mut self, items: Items) {
        self.st.items = items;
    }

    /// Mark `key` (a runtime property name) evaluated.
    pub fn mark_prop(&mut self, key: Expr) -> Result<(), CompileError> {
        if !self.it.track || self.st.props == Props::All {
            return Ok(());
        }
        let var = self.dynamic_props()?;
        self.g.assign(&var, Expr::call(Builtin::MergeProps, vec![Expr::from(&var), key]));
        Ok(())
    }

    /// The runtime variable holding evaluated props, created here from the
    /// static set on first use. Create it before entering a loop or branch
    /// that marks props.
    pub(crate) fn dynamic_props(&mut self) -> Result<Name, CompileError> {
        if let Props::Dynamic(var) = &self.st.props {
            return Ok(var.clone());
        }
        let var = self.g.let_("props", Some(self.st.props.expr()))?;
        self.st.props = Props::Dynamic(var.clone());
        Ok(var)
    }

    pub(crate) fn dynamic_items(&mut self) -> Result<Name, CompileError> {
        if let Items::Dynamic(var) = &self.st.items {
            return Ok(var.clone());
        }
        let var = self.g.let_("items", Some(self.st.items.expr()))?;
        self.st.items = Items::Dynamic(var.clone());
        Ok(var)
    }

    /// Merge what a subschema evaluated, unconditionally.
    pub fn merge_evaluated(&mut self, ev: Evaluated) -> Result<(), CompileError> {
        if !self.it.track {
            return Ok(());
        }
        match self.st.props.union_static(&ev.props) {
            Some(props) => self.st.props = props,
            None => {
                let var = self.dynamic_props()?;
                self.g.assign(&var, Expr::call(Builtin::MergeProps, vec![Expr::from(&var), ev.props.expr()]));
            }
        }
        match self.st.items.union_static(&ev.items) {
            Some(items) => self.st.items = items,
            None => {
                let var = self.dynamic_items()?;
                self.g.assign(&var, Expr::call(Builtin::MergeItems, vec![Expr::from(&var), ev.items.expr()]));
            }
        }
        Ok(())
    }

    /// Merge what a subschema evaluated when `valid` holds at runtime.
    /// Returns whether tracking needed the merge.
    pub fn merge_valid_evaluated(&mut self, ev: Evaluated, valid: &Name) -> Result<bool, CompileError> {
        if !self.it.track || (self.st.props == Props::All && self.st.items == Items::All) {
            return Ok(false);
        }
        let props = !ev.props.is_empty() && self.st.props != Props::All;
        let items = !ev.items.is_empty() && self.st.items != Items::All;
        if props || items {
            let props_var = if props { Some(self.dynamic_props()?) } else { None };
            let items_var = if items { Some(self.dynamic_items()?) } else { None };
            self.g.if_(Expr::from(valid));
            if let Some(var) = props_var {
                self.g.assign(&var, Expr::call(Builtin::MergeProps, vec![Expr::from(&var), ev.props.expr()]));
            }
            if let Some(var) = items_var {
                self.g.assign(&var, Expr::call(Builtin::MergeItems, vec![Expr::from(&var), ev.items.expr()]));
            }
            self.g.end_if()?;
        }
        Ok(true)
    }
}
