//! Keyword vocabulary.
//!
//! Every keyword the compiler understands is a [`KeywordDefinition`]. The
//! [`Vocabulary`] files definitions into ordered rule groups: one group of
//! type-independent keywords, one per instance type, and a final group of
//! applicators that run after everything else. Within a group, rules run in
//! registration order unless a definition asks to go `before` another.
pub mod applicator;
pub mod array;
pub mod format;
pub mod general;
pub mod number;
pub mod object;
pub mod string;
pub mod unevaluated;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::compile::KeywordCx;
use crate::error::CompileError;
use crate::exec::BoxFuture;
use crate::types::TypeSet;

// ————————————————————————————————————————————————————————————————————————————
// DEFINITIONS
// ————————————————————————————————————————————————————————————————————————————

/// Where in the instance a validate-kind keyword runs.
pub struct DataCx<'a> {
    pub instance_path: &'a str,
    pub root_data: &'a Value,
}

/// Emits IR through the keyword context.
pub type CodeFn = Arc<dyn Fn(&mut KeywordCx<'_, '_>) -> Result<(), CompileError> + Send + Sync>;
/// Expands the keyword value (and its parent schema) into a schema.
pub type MacroFn = Arc<dyn Fn(&Value, &Map<String, Value>) -> Result<Value, CompileError> + Send + Sync>;
/// `(schema value, data, location) -> valid`
pub type ValidateFn = Arc<dyn Fn(&Value, &Value, &DataCx<'_>) -> anyhow::Result<bool> + Send + Sync>;
/// `(schema value, data) -> valid`, resolved later.
pub type AsyncValidateFn = Arc<dyn Fn(Value, Value) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

#[derive(Clone)]
pub enum KeywordKind {
    Code(CodeFn),
    Macro(MacroFn),
    Validate(ValidateFn),
    AsyncValidate(AsyncValidateFn),
    /// Recognized, never checked.
    Annotation,
}

impl fmt::Debug for KeywordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeywordKind::Code(_) => "Code",
            KeywordKind::Macro(_) => "Macro",
            KeywordKind::Validate(_) => "Validate",
            KeywordKind::AsyncValidate(_) => "AsyncValidate",
            KeywordKind::Annotation => "Annotation",
        })
    }
}

type MessageFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
type ParamsFn = Arc<dyn Fn(&Value) -> IndexMap<String, Value> + Send + Sync>;

/// Message and params of a custom keyword's error, computed from the
/// keyword's schema value.
#[derive(Clone)]
pub struct ErrorTemplate {
    message: MessageFn,
    params: Option<ParamsFn>,
}

impl ErrorTemplate {
    pub fn new(message: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        Self { message: Arc::new(message), params: None }
    }

    pub fn with_params(mut self, params: impl Fn(&Value) -> IndexMap<String, Value> + Send + Sync + 'static) -> Self {
        self.params = Some(Arc::new(params));
        self
    }

    pub fn message(&self, schema: &Value) -> String {
        (self.message)(schema)
    }

    pub fn params(&self, schema: &Value) -> IndexMap<String, Value> {
        self.params.as_ref().map(|p| p(schema)).unwrap_or_default()
    }
}

impl fmt::Debug for ErrorTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTemplate").field("params", &self.params.is_some()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeywordDefinition {
    pub keywords: Vec<String>,
    /// Instance types the keyword applies to; `None` for all.
    pub types: Option<TypeSet>,
    /// Types the keyword's own value must have.
    pub schema_type: Option<TypeSet>,
    /// Sibling keywords that must be present.
    pub depends_on: Vec<String>,
    /// Run before this keyword, within the same rule group.
    pub before: Option<String>,
    /// Run with the applicators, after type-specific groups.
    pub post: bool,
    /// Accepts `{"$data": pointer}` values.
    pub data: bool,
    pub error: Option<ErrorTemplate>,
    pub kind: KeywordKind,
}

impl KeywordDefinition {
    fn with_kind(keywords: &[&str], kind: KeywordKind) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            types: None,
            schema_type: None,
            depends_on: Vec::new(),
            before: None,
            post: false,
            data: false,
            error: None,
            kind,
        }
    }

    pub fn code(
        keywords: &[&str],
        f: impl Fn(&mut KeywordCx<'_, '_>) -> Result<(), CompileError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(keywords, KeywordKind::Code(Arc::new(f)))
    }

    pub fn expand(
        keyword: &str,
        f: impl Fn(&Value, &Map<String, Value>) -> Result<Value, CompileError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(&[keyword], KeywordKind::Macro(Arc::new(f)))
    }

    pub fn validate(
        keyword: &str,
        f: impl Fn(&Value, &Value, &DataCx<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(&[keyword], KeywordKind::Validate(Arc::new(f)))
    }

    pub fn validate_async(
        keyword: &str,
        f: impl Fn(Value, Value) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(&[keyword], KeywordKind::AsyncValidate(Arc::new(f)))
    }

    pub fn annotation(keywords: &[&str]) -> Self {
        Self::with_kind(keywords, KeywordKind::Annotation)
    }

    pub fn types(mut self, types: TypeSet) -> Self {
        self.types = Some(types);
        self
    }

    pub fn schema_type(mut self, types: TypeSet) -> Self {
        self.schema_type = Some(types);
        self
    }

    pub fn depends_on(mut self, keyword: &str) -> Self {
        self.depends_on.push(keyword.to_string());
        self
    }

    pub fn before(mut self, keyword: &str) -> Self {
        self.before = Some(keyword.to_string());
        self
    }

    pub fn post(mut self) -> Self {
        self.post = true;
        self
    }

    pub fn data(mut self) -> Self {
        self.data = true;
        self
    }

    pub fn error(mut self, template: ErrorTemplate) -> Self {
        self.error = Some(template);
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, KeywordKind::AsyncValidate(_))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RULE GROUPS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub struct Rule {
    pub keyword: String,
    pub def: Arc<KeywordDefinition>,
}

#[derive(Debug, Clone)]
pub struct RuleGroup {
    /// `None` for the type-independent and post groups.
    pub types: Option<TypeSet>,
    pub post: bool,
    pub rules: Vec<Rule>,
}

impl RuleGroup {
    fn new(types: Option<TypeSet>, post: bool) -> Self {
        Self { types, post, rules: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    groups: Vec<RuleGroup>,
    keywords: IndexMap<String, Arc<KeywordDefinition>>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Vocabulary {
    /// Groups only, no keywords.
    pub fn empty() -> Self {
        Self {
            groups: vec![
                RuleGroup::new(None, false),
                RuleGroup::new(Some(TypeSet::NUMBER | TypeSet::INTEGER), false),
                RuleGroup::new(Some(TypeSet::STRING), false),
                RuleGroup::new(Some(TypeSet::ARRAY), false),
                RuleGroup::new(Some(TypeSet::OBJECT), false),
                RuleGroup::new(None, true),
            ],
            keywords: IndexMap::new(),
        }
    }

    /// Both drafts' keywords, annotations included.
    pub fn builtin() -> Self {
        let mut vocab = Self::empty();
        let defs = general::definitions()
            .into_iter()
            .chain(format::definitions())
            .chain(number::definitions())
            .chain(string::definitions())
            .chain(object::definitions())
            .chain(array::definitions())
            .chain(applicator::definitions())
            .chain(unevaluated::definitions())
            .chain(annotations());
        for def in defs {
            vocab.insert(Arc::new(def));
        }
        vocab
    }

    pub fn get(&self, keyword: &str) -> Option<&Arc<KeywordDefinition>> {
        self.keywords.get(keyword)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.contains_key(keyword)
    }

    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.keys().map(String::as_str)
    }

    /// Register a user definition. Keywords must be new; `before` must name a
    /// keyword in every group the definition lands in.
    pub fn add(&mut self, def: KeywordDefinition) -> Result<(), CompileError> {
        for keyword in &def.keywords {
            if self.keywords.contains_key(keyword) {
                return Err(CompileError::KeywordExists(keyword.clone()));
            }
        }
        let def = Arc::new(def);
        let mut positions = Vec::new();
        if !matches!(def.kind, KeywordKind::Annotation) {
            self.ensure_type_groups(def.types);
            for g in self.target_groups(&def) {
                let at = match &def.before {
                    None => None,
                    Some(before) => {
                        let rules = &self.groups[g].rules;
                        let found = rules.iter().position(|r| &r.keyword == before).ok_or_else(|| {
                            CompileError::RuleGroupInsertion {
                                keyword: def.keywords.join(","),
                                before: before.clone(),
                                reason: if self.keywords.contains_key(before) {
                                    "keywords are in different rule groups".into()
                                } else {
                                    "keyword is not defined".into()
                                },
                            }
                        })?;
                        Some(found)
                    }
                };
                positions.push((g, at));
            }
        }
        for keyword in &def.keywords {
            self.keywords.insert(keyword.clone(), def.clone());
        }
        for (g, at) in positions {
            let rules = &mut self.groups[g].rules;
            let mut at = at;
            for keyword in &def.keywords {
                let rule = Rule { keyword: keyword.clone(), def: def.clone() };
                match at.as_mut() {
                    Some(i) => {
                        rules.insert(*i, rule);
                        *i += 1;
                    }
                    None => rules.push(rule),
                }
            }
        }
        tracing::debug!(keywords = ?def.keywords, kind = ?def.kind, "added keyword");
        Ok(())
    }

    /// Drop a keyword from the table and every group.
    pub fn remove(&mut self, keyword: &str) -> bool {
        let removed = self.keywords.shift_remove(keyword).is_some();
        for group in &mut self.groups {
            group.rules.retain(|r| r.keyword != keyword);
        }
        removed
    }

    fn insert(&mut self, def: Arc<KeywordDefinition>) {
        if !matches!(def.kind, KeywordKind::Annotation) {
            self.ensure_type_groups(def.types);
            for g in self.target_groups(&def) {
                for keyword in &def.keywords {
                    self.groups[g].rules.push(Rule { keyword: keyword.clone(), def: def.clone() });
                }
            }
        }
        for keyword in &def.keywords {
            self.keywords.insert(keyword.clone(), def.clone());
        }
    }

    /// Groups a definition's rules go to.
    fn target_groups(&self, def: &KeywordDefinition) -> Vec<usize> {
        let post = self.groups.len() - 1;
        if def.post {
            return vec![post];
        }
        match def.types {
            None => vec![0],
            Some(types) => self
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.types.is_some_and(|t| t.overlaps(types)))
                .map(|(i, _)| i)
                .collect(),
        }
    }

    /// Types no existing group covers (boolean, null) get a group of their
    /// own, ahead of the post group.
    fn ensure_type_groups(&mut self, types: Option<TypeSet>) {
        let Some(types) = types else { return };
        for ty in types.types() {
            let covered = self.groups.iter().any(|g| g.types.is_some_and(|t| t.admits(ty)));
            if !covered {
                let post = self.groups.len() - 1;
                self.groups.insert(post, RuleGroup::new(Some(ty.flag()), false));
            }
        }
    }
}

/// `true`, `{}`, or a schema of annotations only.
pub(crate) fn always_valid(vocab: &Vocabulary, schema: &Value) -> bool {
    match schema {
        Value::Bool(b) => *b,
        Value::Object(map) => map
            .keys()
            .all(|k| k != "type" && vocab.get(k).is_some_and(|d| matches!(d.kind, KeywordKind::Annotation))),
        _ => false,
    }
}

/// Keywords that are known but validate nothing by themselves. `type` is
/// checked ahead of the groups; `then`, `else`, `minContains` and
/// `maxContains` are read by their owners.
fn annotations() -> Vec<KeywordDefinition> {
    vec![KeywordDefinition::annotation(&[
        "type",
        "$schema",
        "$id",
        "$anchor",
        "$defs",
        "definitions",
        "$comment",
        "$async",
        "title",
        "description",
        "default",
        "examples",
        "deprecated",
        "readOnly",
        "writeOnly",
        "contentMediaType",
        "contentEncoding",
        "contentSchema",
        "then",
        "else",
        "minContains",
        "maxContains",
    ])]
}
