//! The public entry point: a registry of schema documents, keywords and
//! formats, and the validators compiled from them.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::compile::Compiler;
use crate::error::{CompileError, ResolveError, RuntimeError, ValidateError};
use crate::exec::{Outcome, Program, run_async, run_sync};
use crate::format::FormatDef;
use crate::options::{Draft, Options};
use crate::resolve::{Resolver, Target};
use crate::vocab::KeywordDefinition;

// ————————————————————————————————————————————————————————————————————————————
// VALIDATOR
// ————————————————————————————————————————————————————————————————————————————

/// A compiled schema. Cheap to clone and safe to share across threads: each
/// call owns its error list.
#[derive(Debug, Clone)]
pub struct Validator {
    program: Arc<Program>,
    schema: Arc<Value>,
}

impl Validator {
    /// Validate synchronously. Validation failures are part of the
    /// [`Outcome`]; only fatal runtime failures are errors.
    pub fn validate(&self, data: &Value) -> Result<Outcome, RuntimeError> {
        run_sync(&self.program, data)
    }

    /// Validate a schema that may suspend on async keywords. Sync schemas
    /// work here too.
    pub async fn validate_async(&self, data: &Value) -> Result<(), ValidateError> {
        run_async(self.program.clone(), data).await
    }

    pub fn is_valid(&self, data: &Value) -> Result<bool, RuntimeError> {
        Ok(self.validate(data)?.valid)
    }

    /// Rendered source of this unit and every unit it reaches, root first.
    pub fn source(&self) -> String {
        let mut seen: Vec<Arc<Program>> = Vec::new();
        let mut queue = vec![self.program.clone()];
        while let Some(program) = queue.pop() {
            if seen.iter().any(|p| Arc::ptr_eq(p, &program)) {
                continue;
            }
            queue.extend(program.callees());
            seen.push(program);
        }
        seen.iter().map(|p| p.source.as_str()).collect::<Vec<_>>().join("\n\n")
    }

    pub fn is_async(&self) -> bool {
        self.program.is_async
    }

    /// The schema this validator was compiled from.
    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

// ————————————————————————————————————————————————————————————————————————————
// REGISTRY
// ————————————————————————————————————————————————————————————————————————————

/// Owns every document, compiled unit, keyword and format. Starts empty
/// apart from the built-in vocabulary and formats; [`clear`](Self::clear)
/// returns it there.
pub struct SchemaRegistry {
    compiler: Compiler,
    /// Documents added by [`compile`](Self::compile), by serialized schema.
    compiled: HashMap<String, Url>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(opts: Options) -> Self {
        tracing::debug!(?opts, "schema registry created");
        Self { compiler: Compiler::new(opts), compiled: HashMap::new() }
    }

    pub fn options(&self) -> &Options {
        &self.compiler.opts
    }

    fn default_draft(&self) -> Draft {
        self.compiler.opts.draft.unwrap_or(Draft::Draft7)
    }

    // ---- documents ---- //

    /// Register a document for later reference, under its `$id` and, if
    /// given, `key`. Nothing is compiled yet.
    pub fn add_schema(&mut self, schema: Value, key: Option<&str>) -> Result<Url, CompileError> {
        let draft = self.default_draft();
        Ok(self.compiler.resolver.add_document(schema, key, draft)?)
    }

    /// Compile and return the schema registered under `key_or_ref`: a key
    /// given to [`add_schema`](Self::add_schema), an `$id`, or either with a
    /// fragment. `None` if nothing is registered there.
    pub fn get_schema(&mut self, key_or_ref: &str) -> Result<Option<Validator>, CompileError> {
        let Some(target) = self.lookup(key_or_ref)? else { return Ok(None) };
        self.validator(&target).map(Some)
    }

    /// Drop a document and its compiled units. Validators already handed
    /// out keep working.
    pub fn remove_schema(&mut self, key_or_id: &str) -> bool {
        let url = match self.compiler.resolver.by_key(key_or_id) {
            Some(url) => url.clone(),
            None => match Resolver::absolute(key_or_id) {
                Ok(url) => url,
                Err(_) => return false,
            },
        };
        if self.compiler.resolver.remove_document(&url).is_none() {
            return false;
        }
        self.compiler.forget_document(&url);
        self.compiled.retain(|_, u| u != &url);
        tracing::debug!(document = %url, "schema document removed");
        true
    }

    /// Drop every document and compiled unit. Keywords and formats stay.
    pub fn clear(&mut self) {
        self.compiler.clear();
        self.compiled.clear();
    }

    // ---- extension ---- //

    pub fn add_keyword(&mut self, def: KeywordDefinition) -> Result<(), CompileError> {
        Arc::make_mut(&mut self.compiler.vocab).add(def)?;
        self.compiler.invalidate();
        Ok(())
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let removed = Arc::make_mut(&mut self.compiler.vocab).remove(keyword);
        if removed {
            self.compiler.invalidate();
        }
        removed
    }

    /// Add or replace a format.
    pub fn add_format(&mut self, def: FormatDef) {
        let name = def.name.clone();
        self.compiler.values.forget_keyed("formats", &name);
        self.compiler.values.forget_keyed("compare", &name);
        self.compiler.formats.insert(name, Arc::new(def));
        self.compiler.invalidate();
    }

    // ---- compilation ---- //

    /// Compile a schema document. Compiling an identical document again
    /// returns the cached validator.
    pub fn compile(&mut self, schema: Value) -> Result<Validator, CompileError> {
        let serialized = schema.to_string();
        let (url, added) = match self.compiled.get(&serialized) {
            Some(url) if self.compiler.resolver.document(url).is_some() => (url.clone(), false),
            _ => {
                let draft = self.default_draft();
                (self.compiler.resolver.add_document(schema, None, draft)?, true)
            }
        };
        let target = Target { doc: url.clone(), pointer: String::new(), base: url.clone() };
        match self.validator(&target) {
            Ok(validator) => {
                if added {
                    self.compiled.insert(serialized, url);
                }
                Ok(validator)
            }
            Err(err) => {
                if added {
                    self.compiler.resolver.remove_document(&url);
                }
                Err(err)
            }
        }
    }

    /// Validate against a registered schema, compiling it on first use.
    pub fn validate(&mut self, key_or_ref: &str, data: &Value) -> Result<Outcome, ValidateError> {
        let validator = self
            .get_schema(key_or_ref)?
            .ok_or_else(|| CompileError::MissingSchema(key_or_ref.to_string()))?;
        Ok(validator.validate(data)?)
    }

    fn lookup(&self, key_or_ref: &str) -> Result<Option<Target>, CompileError> {
        let resolver = &self.compiler.resolver;
        let (resource, fragment) = key_or_ref.split_once('#').unwrap_or((key_or_ref, ""));
        let base = match resolver.by_key(resource) {
            Some(url) => url.clone(),
            None => Resolver::absolute(resource)?,
        };
        match resolver.resolve(&base, &format!("#{fragment}")) {
            Ok(target) => Ok(Some(target)),
            Err(ResolveError::Unresolved { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn validator(&mut self, target: &Target) -> Result<Validator, CompileError> {
        let program = self.compiler.compile(target)?;
        let missing = || CompileError::MissingSchema(format!("{}#{}", target.doc, target.pointer));
        let (doc, _) = self.compiler.resolver.schema_at(target).ok_or_else(missing)?;
        let schema = if target.pointer.is_empty() {
            doc
        } else {
            Arc::new(doc.pointer(&target.pointer).cloned().ok_or_else(missing)?)
        };
        Ok(Validator { program, schema })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errors_text;
    use crate::options::StrictMode;
    use crate::vocab::{DataCx, ErrorTemplate};
    use crate::types::TypeSet;
    use proptest::prelude::*;
    use serde_json::json;

    fn person() -> Value {
        json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}})
    }

    #[test]
    fn required_and_typed_properties() {
        let mut reg = SchemaRegistry::new();
        let v = reg.compile(person()).unwrap();
        let ok = v.validate(&json!({"id": "a"})).unwrap();
        assert!(ok.valid);
        assert!(ok.errors.is_empty());

        let missing = v.validate(&json!({})).unwrap();
        assert!(!missing.valid);
        assert_eq!(missing.errors.len(), 1);
        assert_eq!(missing.errors[0].keyword, "required");
        assert_eq!(missing.errors[0].params["missingProperty"], json!("id"));
        assert_eq!(missing.errors[0].instance_path, "");

        let wrong = v.validate(&json!({"id": 5})).unwrap();
        assert_eq!(wrong.errors.len(), 1);
        assert_eq!(wrong.errors[0].keyword, "type");
        assert_eq!(wrong.errors[0].instance_path, "/id");
        assert_eq!(errors_text(&wrong.errors), "/id must be string");
    }

    #[test]
    fn data_references_resolve_against_the_instance() {
        let mut reg = SchemaRegistry::with_options(Options { data: true, ..Options::default() });
        let v = reg
            .compile(json!({
                "properties": {
                    "limit": {"type": "integer"},
                    "value": {"maxLength": {"$data": "1/limit"}}
                }
            }))
            .unwrap();
        let out = v.validate(&json!({"limit": 3, "value": "abcd"})).unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].keyword, "maxLength");
        assert_eq!(out.errors[0].params["limit"], json!(3));
        assert!(v.is_valid(&json!({"limit": 4, "value": "abcd"})).unwrap());
        assert!(v.is_valid(&json!({"value": "abcd"})).unwrap());
    }

    #[test]
    fn recursive_schemas_terminate() {
        let mut reg = SchemaRegistry::new();
        let v = reg
            .compile(json!({
                "$id": "https://example.com/node.json",
                "type": "object",
                "properties": {
                    "value": {"type": "number"},
                    "children": {"type": "array", "items": {"$ref": "#"}}
                }
            }))
            .unwrap();
        assert!(v.is_valid(&json!({})).unwrap());
        assert!(v.is_valid(&json!({"children": [{"value": 1, "children": [{"children": []}]}]})).unwrap());
        let out = v.validate(&json!({"children": [{"children": [{"value": "x"}]}]})).unwrap();
        assert_eq!(out.errors[0].instance_path, "/children/0/children/0/value");
    }

    #[test]
    fn recompiling_the_same_document_is_cached() {
        let mut reg = SchemaRegistry::new();
        let a = reg.compile(person()).unwrap();
        let b = reg.compile(person()).unwrap();
        assert!(Arc::ptr_eq(&a.program, &b.program));
    }

    #[test]
    fn failed_compilations_leave_no_document() {
        let mut reg = SchemaRegistry::new();
        let bad = json!({"$id": "https://example.com/bad.json", "pattern": "("});
        assert!(reg.compile(bad.clone()).is_err());
        assert!(matches!(reg.compile(bad), Err(CompileError::Regex { .. })));
    }

    #[test]
    fn documents_by_key_and_id() {
        let mut reg = SchemaRegistry::new();
        reg.add_schema(json!({"$id": "https://example.com/defs.json", "$defs": {"pos": {"minimum": 0}}}), None)
            .unwrap();
        reg.add_schema(json!({"$ref": "https://example.com/defs.json#/$defs/pos"}), Some("positive"))
            .unwrap();
        assert!(reg.validate("positive", &json!(1)).unwrap().valid);
        assert!(!reg.validate("positive", &json!(-1)).unwrap().valid);
        let pos = reg.get_schema("https://example.com/defs.json#/$defs/pos").unwrap().unwrap();
        assert_eq!(pos.schema(), &json!({"minimum": 0}));
        assert!(reg.get_schema("nothing").unwrap().is_none());
        assert!(matches!(reg.validate("nothing", &json!(1)), Err(ValidateError::Compile(_))));

        assert!(reg.remove_schema("positive"));
        assert!(reg.get_schema("positive").unwrap().is_none());
        assert!(!reg.remove_schema("positive"));
        reg.clear();
        assert!(reg.get_schema("https://example.com/defs.json").unwrap().is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut reg = SchemaRegistry::new();
        reg.add_schema(json!({"$id": "https://example.com/a.json"}), None).unwrap();
        let err = reg.add_schema(json!({"$id": "https://example.com/a.json", "type": "string"}), None).unwrap_err();
        assert!(matches!(err, CompileError::Resolve(ResolveError::DuplicateId(_))));
    }

    #[test]
    fn custom_keywords_and_formats() {
        let mut reg = SchemaRegistry::new();
        let even = KeywordDefinition::validate("even", |schema, data, _: &DataCx<'_>| {
            Ok(schema != &Value::Bool(true) || data.as_f64().is_some_and(|n| n % 2.0 == 0.0))
        })
        .types(TypeSet::NUMBER)
        .error(ErrorTemplate::new(|_| "must be even".to_string()));
        reg.add_keyword(even).unwrap();
        let v = reg.compile(json!({"even": true})).unwrap();
        assert!(v.is_valid(&json!(4)).unwrap());
        assert_eq!(v.validate(&json!(3)).unwrap().errors[0].message, "must be even");
        assert!(reg.remove_keyword("even"));

        reg.add_format(FormatDef::regex("sku", "^[A-Z]{3}-\\d+$").unwrap());
        let v = reg.compile(json!({"format": "sku"})).unwrap();
        assert!(v.is_valid(&json!("ABC-12")).unwrap());
        assert!(!v.is_valid(&json!("abc")).unwrap());
    }

    #[test]
    fn failing_callbacks_are_fatal() {
        let mut reg = SchemaRegistry::new();
        reg.add_keyword(KeywordDefinition::validate("explode", |_, _, _| anyhow::bail!("boom"))).unwrap();
        let v = reg.compile(json!({"explode": true})).unwrap();
        assert!(matches!(v.validate(&json!(1)), Err(RuntimeError::Keyword { .. })));
    }

    #[test]
    fn strict_mode_rejects_unknown_keywords() {
        let mut reg = SchemaRegistry::with_options(Options { strict: StrictMode::Error, ..Options::default() });
        assert!(matches!(reg.compile(json!({"foo": 1})), Err(CompileError::UnknownKeyword { .. })));
    }

    #[test]
    fn forced_draft_overrides_detection() {
        let schema = json!({"$schema": "http://json-schema.org/draft-07/schema#", "prefixItems": [{"type": "string"}], "items": {"type": "number"}});
        let mut reg = SchemaRegistry::with_options(Options { draft: Some(Draft::Draft2020), ..Options::default() });
        let v = reg.compile(schema).unwrap();
        assert!(v.is_valid(&json!(["a", 1])).unwrap());
    }

    #[test]
    fn source_lists_every_unit() {
        let mut reg = SchemaRegistry::with_options(Options {
            inline_refs: crate::options::InlineRefs::Never,
            ..Options::default()
        });
        let v = reg.compile(json!({"definitions": {"s": {"type": "string"}}, "items": {"$ref": "#/definitions/s"}})).unwrap();
        assert_eq!(v.source().matches("function validate").count(), 2, "{}", v.source());
    }

    fn arb_instance() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-20i64..20).prop_map(Value::from),
            "[a-c]{0,4}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-c]", inner, 0..3)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn sample_schema() -> Value {
        json!({
            "$defs": {"small": {"type": "integer", "maximum": 5}},
            "type": ["object", "array", "integer"],
            "properties": {"a": {"$ref": "#/$defs/small"}, "b": {"type": "string", "minLength": 2}},
            "required": ["a"],
            "items": {"anyOf": [{"type": "integer"}, {"type": "string"}]},
            "maxItems": 3,
            "minimum": 0
        })
    }

    fn arb_object() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![Just(Value::Null), (-3i64..3).prop_map(Value::from), "[a-c]{0,2}".prop_map(Value::from)];
        prop::collection::btree_map("[a-c]", leaf, 0..4).prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    /// Applicators that always pass and evaluate something.
    fn passing_applicators() -> Vec<(&'static str, Value)> {
        vec![
            ("allOf", json!([{"properties": {"b": true}}])),
            ("anyOf", json!([{"properties": {"b": true}}, {"required": ["zzz"]}])),
            ("oneOf", json!([{"properties": {"c": true}}, {"required": ["zzz"]}])),
            ("dependentSchemas", json!({"a": {"properties": {"c": true}}})),
            ("patternProperties", json!({"^b": true})),
        ]
    }

    proptest! {
        #[test]
        fn passing_applicators_only_widen_unevaluated(data in arb_object(), pick in 0usize..5) {
            let base = json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "properties": {"a": {"type": "integer"}},
                "unevaluatedProperties": false
            });
            let (keyword, value) = passing_applicators().swap_remove(pick);
            let mut extended = base.clone();
            extended[keyword] = value;
            let mut reg = SchemaRegistry::new();
            let narrow = reg.compile(base).unwrap().is_valid(&data).unwrap();
            let wide = reg.compile(extended).unwrap().is_valid(&data).unwrap();
            prop_assert!(!narrow || wide, "{data}");
        }

        #[test]
        fn fail_fast_and_collect_all_agree(data in arb_instance()) {
            let mut fast = SchemaRegistry::with_options(Options { allow_union_types: true, ..Options::default() });
            let mut all = SchemaRegistry::with_options(Options { all_errors: true, allow_union_types: true, ..Options::default() });
            let a = fast.compile(sample_schema()).unwrap().validate(&data).unwrap();
            let b = all.compile(sample_schema()).unwrap().validate(&data).unwrap();
            prop_assert_eq!(a.valid, b.valid);
            prop_assert!(a.errors.len() <= b.errors.len());
            if let Some(first) = a.errors.first() {
                prop_assert_eq!(first, &b.errors[0]);
            }
        }

        #[test]
        fn compiling_twice_agrees(data in arb_instance()) {
            let mut one = SchemaRegistry::new();
            let mut two = SchemaRegistry::new();
            let a = one.compile(sample_schema()).unwrap();
            let b = two.compile(sample_schema()).unwrap();
            prop_assert_eq!(a.validate(&data).unwrap(), b.validate(&data).unwrap());
        }

        #[test]
        fn refs_validate_like_their_targets(data in arb_instance()) {
            let mut reg = SchemaRegistry::with_options(Options {
                inline_refs: crate::options::InlineRefs::Never,
                ..Options::default()
            });
            let target = json!({"type": "object", "properties": {"x": {"type": "integer"}}, "required": ["x"]});
            let by_ref = reg.compile(json!({"$defs": {"x": target.clone()}, "$ref": "#/$defs/x"})).unwrap();
            let inline = reg.compile(target).unwrap();
            prop_assert_eq!(by_ref.is_valid(&data).unwrap(), inline.is_valid(&data).unwrap());
        }
    }
}
