//! Schema → program compilation.
//!
//! Every schema location that is compiled on its own (a document root, a
//! `$ref` target that is not inlined) is a *unit*. A unit is `Compiling` from
//! the moment its name is reserved until its body is finished, then
//! `Compiled`. Units reached while compiling one top-level request form a
//! session; if anything in the session fails, every unit it created is
//! evicted again so no half-built program is ever reachable.
pub mod context;
pub mod data;
pub(crate) mod emit;
pub mod evaluated;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::codegen::{Captured, CodeGen, LOCAL_PREFIXES, Scope, UnitSlot, ValueScope, render};
use crate::error::{CodegenError, CompileError};
use crate::exec::Program;
use crate::format::{FormatDef, builtin_formats};
use crate::ir::{Builtin, Expr, Name, Stmt, eq, ne};
use crate::optimize::optimize;
use crate::options::{Draft, Options, StrictMode};
use crate::resolve::{Resolver, Target};
use crate::types::TypeSet;
use crate::vocab::Vocabulary;

pub use context::{CxState, KeywordCx, KwError, KwMessage, PathSeg, SchemaCx, Sub, SubData, UnitParams};
pub use evaluated::{Evaluated, Items, Props};

use context::error_count;

// ————————————————————————————————————————————————————————————————————————————
// UNITS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct UnitKey {
    doc: Url,
    pointer: String,
}

impl From<&Target> for UnitKey {
    fn from(t: &Target) -> Self {
        UnitKey { doc: t.doc.clone(), pointer: t.pointer.clone() }
    }
}

/// What callers need to know about a unit, compiled or not.
#[derive(Debug, Clone)]
pub(crate) struct UnitInfo {
    pub(crate) key: UnitKey,
    pub(crate) label: Arc<str>,
    /// Name callers invoke it by.
    pub(crate) name: Name,
    pub(crate) slot: UnitSlot,
    pub(crate) is_async: bool,
    pub(crate) base: Url,
    pub(crate) draft: Draft,
    /// `#` plus the pointer to the unit's schema in its document.
    pub(crate) schema_path: String,
}

enum Unit {
    Compiling(UnitInfo),
    Compiled { info: UnitInfo, evaluated: Option<Evaluated> },
}

impl Unit {
    fn info(&self) -> &UnitInfo {
        match self {
            Unit::Compiling(info) | Unit::Compiled { info, .. } => info,
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// COMPILER
// ————————————————————————————————————————————————————————————————————————————

pub(crate) struct Compiler {
    pub(crate) opts: Options,
    pub(crate) resolver: Resolver,
    pub(crate) vocab: Arc<Vocabulary>,
    pub(crate) formats: IndexMap<String, Arc<FormatDef>>,
    pub(crate) values: ValueScope,
    units: HashMap<UnitKey, Unit>,
    /// Units created by the request in progress, in creation order.
    session: Vec<UnitKey>,
    patterns: HashMap<String, Arc<Regex>>,
}

impl Compiler {
    pub(crate) fn new(opts: Options) -> Self {
        let mut resolver = Resolver::new();
        resolver.force_draft(opts.draft);
        Self {
            opts,
            resolver,
            vocab: Arc::new(Vocabulary::builtin()),
            formats: builtin_formats(),
            values: ValueScope::new(),
            units: HashMap::new(),
            session: Vec::new(),
            patterns: HashMap::new(),
        }
    }

    /// Compile the unit at `target` and everything it calls.
    pub(crate) fn compile(&mut self, target: &Target) -> Result<Arc<Program>, CompileError> {
        self.session.clear();
        let result = self.unit(target).and_then(|info| {
            info.slot.get().cloned().ok_or_else(|| CompileError::MissingSchema(info.label.to_string()))
        });
        if let Err(err) = &result {
            tracing::debug!(error = %err, units = self.session.len(), "compilation failed, evicting session");
            self.rollback();
        }
        self.session.clear();
        result
    }

    /// The unit at `target`, compiled on first use. A unit that is still
    /// compiling (a recursive reference) is returned as is; its slot is
    /// filled before anything can run.
    pub(crate) fn unit(&mut self, target: &Target) -> Result<UnitInfo, CompileError> {
        let key = UnitKey::from(target);
        if let Some(unit) = self.units.get(&key) {
            return Ok(unit.info().clone());
        }
        let label: Arc<str> = format!("{}#{}", target.doc, target.pointer).into();
        let (doc, draft) = self.resolver.schema_at(target).ok_or_else(|| CompileError::MissingSchema(label.to_string()))?;
        let schema = doc.pointer(&target.pointer).ok_or_else(|| CompileError::MissingSchema(label.to_string()))?;
        let is_async = schema.get("$async").and_then(Value::as_bool).unwrap_or(false);

        let slot = UnitSlot::new(label.clone(), is_async);
        let name = self.values.register_value("validate", Captured::Unit(slot.clone()), Some(&label))?;
        let info = UnitInfo {
            key: key.clone(),
            label,
            name,
            slot,
            is_async,
            base: target.base.clone(),
            draft,
            schema_path: format!("#{}", target.pointer),
        };
        self.units.insert(key.clone(), Unit::Compiling(info.clone()));
        self.session.push(key.clone());
        tracing::debug!(unit = %info.label, is_async, "compiling unit");

        let (program, evaluated) = self.build(&info, schema)?;
        info.slot.fill(program.clone());
        tracing::debug!(unit = %info.label, captured = program.captured.len(), "compiled unit");
        self.units.insert(key, Unit::Compiled { info: info.clone(), evaluated });
        Ok(info)
    }

    /// Props and items a compiled unit evaluates whatever the data, if known
    /// without running it.
    pub(crate) fn static_evaluated(&self, unit: &UnitInfo) -> Option<Evaluated> {
        match self.units.get(&unit.key)? {
            Unit::Compiled { evaluated, .. } => evaluated.clone(),
            Unit::Compiling(_) => None,
        }
    }

    fn build(&mut self, unit: &UnitInfo, schema: &Value) -> Result<(Arc<Program>, Option<Evaluated>), CompileError> {
        let mut g = CodeGen::new(Scope::with_prefixes(Some(self.values.scope()), LOCAL_PREFIXES));
        let params = UnitParams::declare(&mut g)?;
        g.func(unit.name.clone(), params.to_vec(), unit.is_async);

        let it = SchemaCx::unit_root(schema, unit, &params, self);
        let mut st = CxState::new(TypeSet::empty());
        emit::schema(self, &mut g, unit, &it, &mut st)?;

        if it.track {
            g.expr(Expr::call(Builtin::SetEvaluated, vec![st.props.expr(), st.items.expr()]));
        }
        if unit.is_async {
            g.if_(ne(error_count(), Expr::num(0)));
            g.throw_(Expr::call(Builtin::NewValidationError, Vec::new()));
            g.end_if()?;
            g.return_(Expr::TRUE);
        } else {
            g.return_(eq(error_count(), Expr::num(0)));
        }
        g.end_func()?;

        let mut body = g.finish()?;
        optimize(&mut body, self.opts.optimize);
        let (source, names) = render(&body, &self.values);
        let captured = self.values.capture(&names);
        let func = match body.pop() {
            Some(Stmt::Func(func)) => func,
            _ => return Err(CodegenError::UnbalancedBlock { expected: "function", found: "root" }.into()),
        };
        let evaluated = st.evaluated();
        let program = Program { label: unit.label.clone(), func, captured, is_async: unit.is_async, source };
        Ok((Arc::new(program), evaluated.is_static().then_some(evaluated)))
    }

    /// Evict every unit the failed session created.
    fn rollback(&mut self) {
        for key in self.session.drain(..) {
            if let Some(unit) = self.units.remove(&key) {
                let info = unit.info();
                tracing::trace!(unit = %info.label, "evicted");
                self.values.forget_keyed("validate", &info.label);
            }
        }
    }

    /// Drop compiled units of a removed document.
    pub(crate) fn forget_document(&mut self, doc: &Url) {
        let doomed: Vec<UnitKey> = self.units.keys().filter(|k| &k.doc == doc).cloned().collect();
        for key in doomed {
            if let Some(unit) = self.units.remove(&key) {
                self.values.forget_keyed("validate", &unit.info().label);
            }
        }
    }

    /// Drop every document and unit. Programs already handed out keep working.
    pub(crate) fn clear(&mut self) {
        self.resolver.clear();
        self.units.clear();
        self.values = ValueScope::new();
        self.patterns.clear();
    }

    /// Drop cached units; needed after the vocabulary or formats change.
    pub(crate) fn invalidate(&mut self) {
        let labels: Vec<Arc<str>> = self.units.values().map(|u| u.info().label.clone()).collect();
        for label in labels {
            self.values.forget_keyed("validate", &label);
        }
        self.units.clear();
    }

    /// A compiled regular expression, shared by source text.
    pub(crate) fn pattern(&mut self, source: &str) -> Result<Name, CompileError> {
        let re = match self.patterns.get(source) {
            Some(re) => re.clone(),
            None => {
                let re = Regex::new(source)
                    .map_err(|e| CompileError::Regex { pattern: source.to_string(), reason: e.to_string() })?;
                let re = Arc::new(re);
                self.patterns.insert(source.to_string(), re.clone());
                re
            }
        };
        Ok(self.values.register_value("pattern", Captured::Pattern(re), Some(source))?)
    }

    /// Apply the strictness setting to a schema problem that is not an
    /// error in lax mode.
    pub(crate) fn strict(&self, err: CompileError) -> Result<(), CompileError> {
        match self.opts.strict {
            StrictMode::Off => Ok(()),
            StrictMode::Log => {
                tracing::warn!("{err}");
                Ok(())
            }
            StrictMode::Error => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiler_with(schema: Value) -> (Compiler, Target) {
        let mut c = Compiler::new(Options::default());
        let url = c.resolver.add_document(schema, None, Draft::Draft7).unwrap();
        let target = c.resolver.resolve(&url, "#").unwrap();
        (c, target)
    }

    #[test]
    fn units_are_cached_by_location() {
        let (mut c, target) = compiler_with(json!({"type": "string"}));
        let a = c.compile(&target).unwrap();
        let b = c.compile(&target).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.source.contains("function validate"), "{}", a.source);
    }

    #[test]
    fn recursive_units_call_themselves() {
        let (mut c, target) = compiler_with(json!({
            "properties": {"next": {"$ref": "#"}},
            "type": "object"
        }));
        let program = c.compile(&target).unwrap();
        assert!(program.callees().any(|p| Arc::ptr_eq(&p, &program)));
    }

    #[test]
    fn failed_sessions_leave_nothing_behind() {
        let (mut c, target) = compiler_with(json!({
            "definitions": {"ok": {"type": "string"}, "bad": {"pattern": "("}},
            "properties": {"a": {"$ref": "#/definitions/ok"}, "b": {"$ref": "#/definitions/bad"}}
        }));
        c.opts.inline_refs = crate::options::InlineRefs::Never;
        assert!(matches!(c.compile(&target), Err(CompileError::Regex { .. })));
        assert!(c.units.is_empty());
        assert!(c.session.is_empty());
    }

    #[test]
    fn patterns_are_shared_by_source() {
        let mut c = Compiler::new(Options::default());
        let a = c.pattern("^a+$").unwrap();
        let b = c.pattern("^a+$").unwrap();
        assert_eq!(a, b);
        assert!(c.pattern("[").is_err());
    }
}
