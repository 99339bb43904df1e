//! Identifier allocation and captured runtime values.
//!
//! A [`Scope`] hands out names `prefix0`, `prefix1`, ... from an allow-list of
//! prefixes. Child scopes may not allocate from prefixes their parent chain
//! owns, which keeps every name unique across the chain.
//!
//! The [`ValueScope`] is the process-wide table of values generated code
//! closes over (compiled patterns, format checkers, keyword functions,
//! other units). It lives on the registry and is shared by every unit.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::error::CodegenError;
use crate::exec::Program;
use crate::format::FormatDef;
use crate::ir::Name;
use crate::vocab::{AsyncValidateFn, ValidateFn};

// ————————————————————————————————————————————————————————————————————————————
// SCOPE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// `None` admits any prefix not reserved by the parent chain.
    prefixes: Option<BTreeSet<String>>,
    reserved: BTreeSet<String>,
    counters: HashMap<String, usize>,
}

impl Scope {
    pub fn new(parent: Option<&Scope>) -> Scope {
        let mut scope = Scope::default();
        if let Some(parent) = parent {
            scope.inherit(parent);
        }
        scope
    }

    pub fn with_prefixes(parent: Option<&Scope>, prefixes: &[&str]) -> Scope {
        let mut scope = Scope::new(parent);
        scope.prefixes = Some(prefixes.iter().map(|p| p.to_string()).collect());
        scope
    }

    fn inherit(&mut self, parent: &Scope) {
        self.reserved.extend(parent.reserved.iter().cloned());
        match &parent.prefixes {
            Some(owned) => self.reserved.extend(owned.iter().cloned()),
            // an open parent can't reserve ahead of time; continue its counters instead
            None => self.counters = parent.counters.clone(),
        }
    }

    pub fn fresh_name(&mut self, prefix: &str) -> Result<Name, CodegenError> {
        if prefix.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(CodegenError::InvalidIdentifier(prefix.to_string()));
        }
        let allowed = self.prefixes.as_ref().is_none_or(|p| p.contains(prefix));
        if !allowed || self.reserved.contains(prefix) {
            return Err(CodegenError::RestrictedPrefix { prefix: prefix.to_string() });
        }
        let counter = self.counters.entry(prefix.to_string()).or_default();
        let name = Name::new(&format!("{prefix}{counter}"))?;
        *counter += 1;
        Ok(name)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CAPTURED VALUES
// ————————————————————————————————————————————————————————————————————————————

/// Late-bound handle to a unit's materialized program. Filled once the unit
/// finishes compiling, so recursive references can be emitted before that.
#[derive(Clone)]
pub struct UnitSlot {
    pub label: Arc<str>,
    pub is_async: bool,
    cell: Arc<OnceLock<Arc<Program>>>,
}

impl UnitSlot {
    pub fn new(label: impl Into<Arc<str>>, is_async: bool) -> Self {
        Self { label: label.into(), is_async, cell: Arc::new(OnceLock::new()) }
    }

    pub fn get(&self) -> Option<&Arc<Program>> {
        self.cell.get()
    }

    pub fn fill(&self, program: Arc<Program>) {
        // a unit is materialized at most once per slot
        let _ = self.cell.set(program);
    }

    pub fn same(&self, other: &UnitSlot) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for UnitSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitSlot({}, filled: {})", self.label, self.cell.get().is_some())
    }
}

#[derive(Clone)]
pub enum Captured {
    Pattern(Arc<Regex>),
    Format(Arc<FormatDef>),
    FormatCompare(Arc<FormatDef>),
    Keyword { keyword: Arc<str>, func: ValidateFn },
    AsyncKeyword { keyword: Arc<str>, func: AsyncValidateFn },
    Json(Arc<Value>),
    Unit(UnitSlot),
}

impl Captured {
    fn identity(&self) -> usize {
        match self {
            Captured::Pattern(p) => Arc::as_ptr(p) as *const () as usize,
            Captured::Format(f) | Captured::FormatCompare(f) => Arc::as_ptr(f) as *const () as usize,
            Captured::Keyword { func, .. } => Arc::as_ptr(func) as *const () as usize,
            Captured::AsyncKeyword { func, .. } => Arc::as_ptr(func) as *const () as usize,
            Captured::Json(v) => Arc::as_ptr(v) as *const () as usize,
            Captured::Unit(slot) => Arc::as_ptr(&slot.cell) as *const () as usize,
        }
    }

    /// Source-ish rendering for the serialized validator.
    pub fn describe(&self) -> String {
        match self {
            Captured::Pattern(p) => format!("new RegExp({:?}, \"u\")", p.as_str()),
            Captured::Format(f) => format!("formats[{:?}]", f.name),
            Captured::FormatCompare(f) => format!("formats[{:?}].compare", f.name),
            Captured::Keyword { keyword, .. } => format!("keywords[{keyword:?}].validate"),
            Captured::AsyncKeyword { keyword, .. } => format!("keywords[{keyword:?}].validate /* async */"),
            Captured::Json(v) => v.to_string(),
            Captured::Unit(slot) => format!("refs[{:?}]", slot.label),
        }
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// VALUE SCOPE
// ————————————————————————————————————————————————————————————————————————————

pub const VALUE_PREFIXES: &[&str] = &["pattern", "formats", "compare", "keyword", "schema", "validate"];

#[derive(Debug)]
pub struct ValueScope {
    scope: Scope,
    values: IndexMap<Name, Captured>,
    by_key: HashMap<(String, String), Name>,
    by_identity: HashMap<(String, usize), Name>,
}

impl Default for ValueScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueScope {
    pub fn new() -> Self {
        Self {
            scope: Scope::with_prefixes(None, VALUE_PREFIXES),
            values: IndexMap::new(),
            by_key: HashMap::new(),
            by_identity: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Register `value` under a fresh `prefix` name, or return the name it
    /// already has. With a `key` the key decides sameness, otherwise the
    /// value's identity does.
    pub fn register_value(
        &mut self,
        prefix: &str,
        value: Captured,
        key: Option<&str>,
    ) -> Result<Name, CodegenError> {
        if let Some(key) = key {
            if let Some(name) = self.by_key.get(&(prefix.to_string(), key.to_string())) {
                return Ok(name.clone());
            }
        } else if let Some(name) = self.by_identity.get(&(prefix.to_string(), value.identity())) {
            return Ok(name.clone());
        }
        let name = self.scope.fresh_name(prefix)?;
        match key {
            Some(key) => self.by_key.insert((prefix.to_string(), key.to_string()), name.clone()),
            None => self.by_identity.insert((prefix.to_string(), value.identity()), name.clone()),
        };
        self.values.insert(name.clone(), value);
        Ok(name)
    }

    pub fn get(&self, name: &Name) -> Option<&Captured> {
        self.values.get(name)
    }

    /// The subset of registered values among `names`, in registration order.
    pub fn capture<'a>(&self, names: impl IntoIterator<Item = &'a Name>) -> IndexMap<Name, Captured> {
        let wanted: BTreeSet<&Name> = names.into_iter().collect();
        self.values
            .iter()
            .filter(|(name, _)| wanted.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Forget every value whose key starts with `key_prefix` under `prefix`.
    pub fn forget_keyed(&mut self, prefix: &str, key_prefix: &str) {
        let doomed: Vec<(String, String)> = self
            .by_key
            .keys()
            .filter(|(p, k)| p == prefix && k.starts_with(key_prefix))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(name) = self.by_key.remove(&key) {
                self.values.shift_remove(&name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
