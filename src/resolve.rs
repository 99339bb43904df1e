//! Schema documents and reference resolution.
//!
//! Every added document is indexed once: its root and every embedded `$id`
//! become absolute URIs, every `$anchor` (and draft-07 `"$id": "#name"`) a
//! URI with a plain-name fragment. A reference is joined onto the base URI in
//! effect where it appears, then looked up in those tables; JSON Pointer
//! fragments are walked from the identified schema.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::error::ResolveError;
use crate::options::{Draft, InlineRefs};

/// Base for documents that don't carry an absolute `$id`.
pub const SYNTHETIC_BASE: &str = "json-schema:///";

// ————————————————————————————————————————————————————————————————————————————
// SUBSCHEMA LOCATIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// The value is a schema.
    Schema,
    /// An array of schemas.
    Array,
    /// A map of schemas; non-schema values (dependency arrays) are skipped.
    Map,
    /// `items`: a schema, or an array of them.
    SchemaOrArray,
}

pub(crate) const SUBSCHEMA_KEYWORDS: &[(&str, Shape)] = &[
    ("$defs", Shape::Map),
    ("definitions", Shape::Map),
    ("properties", Shape::Map),
    ("patternProperties", Shape::Map),
    ("dependentSchemas", Shape::Map),
    ("dependencies", Shape::Map),
    ("additionalProperties", Shape::Schema),
    ("propertyNames", Shape::Schema),
    ("unevaluatedProperties", Shape::Schema),
    ("items", Shape::SchemaOrArray),
    ("prefixItems", Shape::Array),
    ("additionalItems", Shape::Schema),
    ("contains", Shape::Schema),
    ("unevaluatedItems", Shape::Schema),
    ("allOf", Shape::Array),
    ("anyOf", Shape::Array),
    ("oneOf", Shape::Array),
    ("not", Shape::Schema),
    ("if", Shape::Schema),
    ("then", Shape::Schema),
    ("else", Shape::Schema),
];

/// Keys under which an embedded `$id` does not change the base URI while
/// walking a pointer: they hold sibling maps, not schema locations.
const PREVENT_SCOPE_CHANGE: &[&str] = &[
    "properties",
    "patternProperties",
    "enum",
    "dependencies",
    "definitions",
    "$defs",
    "dependentSchemas",
    "const",
];

const REF_KEYWORDS: &[&str] = &["$ref", "$dynamicRef", "$recursiveRef"];

/// Keywords whose values never contain schemas; they count once when
/// estimating inline cost.
const SIMPLE_INLINED: &[&str] = &[
    "type",
    "format",
    "pattern",
    "maxLength",
    "minLength",
    "maxProperties",
    "minProperties",
    "maxItems",
    "minItems",
    "maximum",
    "minimum",
    "uniqueItems",
    "multipleOf",
    "required",
    "enum",
    "const",
];

/// Whether a `$ref` target may be emitted in place of a call.
pub fn inlineable(schema: &Value, policy: InlineRefs) -> bool {
    if schema.is_boolean() {
        return true;
    }
    match policy {
        InlineRefs::Never => false,
        InlineRefs::Flat => !has_ref(schema),
        InlineRefs::Limit(limit) => count_keys(schema).is_some_and(|n| n <= limit as usize),
    }
}

fn has_ref(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => map.iter().any(|(k, v)| REF_KEYWORDS.contains(&k.as_str()) || has_ref(v)),
        Value::Array(items) => items.iter().any(has_ref),
        _ => false,
    }
}

/// Keyword count, `None` when a reference makes the cost unbounded.
fn count_keys(schema: &Value) -> Option<usize> {
    let Value::Object(map) = schema else { return Some(0) };
    let mut count = 0usize;
    for (key, value) in map {
        if key == "$ref" {
            return None;
        }
        count += 1;
        if SIMPLE_INLINED.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Object(_) => count += count_keys(value)?,
            Value::Array(items) => {
                for item in items {
                    count += count_keys(item)?;
                }
            }
            _ => {}
        }
    }
    Some(count)
}

// ————————————————————————————————————————————————————————————————————————————
// DOCUMENTS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub struct Document {
    pub url: Url,
    pub schema: Arc<Value>,
    pub draft: Draft,
}

/// A resolved schema location: the document it lives in, the JSON Pointer to
/// it and the base URI in effect there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub doc: Url,
    pub pointer: String,
    pub base: Url,
}

#[derive(Debug, Default)]
pub struct Resolver {
    docs: IndexMap<Url, Document>,
    ids: HashMap<Url, Target>,
    anchors: HashMap<Url, Target>,
    keys: HashMap<String, Url>,
    anonymous: usize,
    /// Overrides `$schema` detection.
    forced_draft: Option<Draft>,
}

#[derive(Default)]
struct Index {
    ids: Vec<(Url, Target)>,
    anchors: Vec<(Url, Target)>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_draft(&mut self, draft: Option<Draft>) {
        self.forced_draft = draft;
    }

    fn synthetic() -> Result<Url, ResolveError> {
        Url::parse(SYNTHETIC_BASE).map_err(|e| ResolveError::InvalidUri { uri: SYNTHETIC_BASE.into(), reason: e.to_string() })
    }

    /// Resolve `uri` against the synthetic base, dropping an empty fragment.
    pub fn absolute(uri: &str) -> Result<Url, ResolveError> {
        let mut url = Self::synthetic()?
            .join(uri)
            .map_err(|e| ResolveError::InvalidUri { uri: uri.to_string(), reason: e.to_string() })?;
        if url.fragment() == Some("") {
            url.set_fragment(None);
        }
        Ok(url)
    }

    /// Index `schema` as a new document. Its base URI is its `$id`, else
    /// `key`, else a fresh synthetic name.
    pub fn add_document(&mut self, schema: Value, key: Option<&str>, default_draft: Draft) -> Result<Url, ResolveError> {
        let id = schema.get("$id").and_then(Value::as_str).filter(|id| !id.starts_with('#'));
        let url = match (id, key) {
            (Some(id), _) => Self::absolute(id)?,
            (None, Some(key)) => Self::absolute(key)?,
            (None, None) => {
                self.anonymous += 1;
                Self::absolute(&format!("schema{}.json", self.anonymous))?
            }
        };
        let mut url = url;
        url.set_fragment(None);
        if self.docs.contains_key(&url) || self.ids.contains_key(&url) {
            return Err(ResolveError::DuplicateId(url.to_string()));
        }
        if let Some(key) = key {
            if self.keys.contains_key(key) {
                return Err(ResolveError::DuplicateId(key.to_string()));
            }
        }

        let detected = schema.get("$schema").and_then(Value::as_str).and_then(Draft::from_meta_schema);
        let draft = self.forced_draft.or(detected).unwrap_or(default_draft);
        let schema = Arc::new(schema);

        let mut index = Index::default();
        index.ids.push((url.clone(), Target { doc: url.clone(), pointer: String::new(), base: url.clone() }));
        walk_ids(&url, &schema, String::new(), url.clone(), draft, true, &mut index)?;
        self.commit(&url, &schema, index)?;

        tracing::debug!(document = %url, ?draft, "schema document added");
        if let Some(key) = key {
            self.keys.insert(key.to_string(), url.clone());
        }
        self.docs.insert(url.clone(), Document { url: url.clone(), schema, draft });
        Ok(url)
    }

    /// Check every id and anchor against the tables, then insert them all.
    fn commit(&mut self, doc: &Url, schema: &Value, index: Index) -> Result<(), ResolveError> {
        let mut ids: HashMap<Url, Target> = HashMap::new();
        for (url, target) in index.ids {
            if self.ids.contains_key(&url) {
                return Err(ResolveError::DuplicateId(url.to_string()));
            }
            if let Some(prev) = ids.get(&url) {
                if !same_schema(schema, &prev.pointer, &target.pointer) {
                    return Err(ResolveError::AmbiguousReference { reference: url.to_string() });
                }
                continue;
            }
            ids.insert(url, target);
        }
        let mut anchors: HashMap<Url, Target> = HashMap::new();
        for (url, target) in index.anchors {
            if let Some(prev) = self.anchors.get(&url) {
                if &prev.doc != doc {
                    return Err(ResolveError::DuplicateId(url.to_string()));
                }
            }
            if let Some(prev) = anchors.get(&url) {
                if !same_schema(schema, &prev.pointer, &target.pointer) {
                    return Err(ResolveError::AmbiguousReference { reference: url.to_string() });
                }
                continue;
            }
            anchors.insert(url, target);
        }
        self.ids.extend(ids);
        self.anchors.extend(anchors);
        Ok(())
    }

    pub fn remove_document(&mut self, url: &Url) -> Option<Document> {
        let doc = self.docs.shift_remove(url)?;
        self.ids.retain(|_, t| &t.doc != url);
        self.anchors.retain(|_, t| &t.doc != url);
        self.keys.retain(|_, u| u != url);
        Some(doc)
    }

    pub fn clear(&mut self) {
        self.docs.clear();
        self.ids.clear();
        self.anchors.clear();
        self.keys.clear();
    }

    pub fn document(&self, url: &Url) -> Option<&Document> {
        self.docs.get(url)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// The document registered under a user key.
    pub fn by_key(&self, key: &str) -> Option<&Url> {
        self.keys.get(key)
    }

    /// The schema value at a target, with the document it belongs to.
    pub fn schema_at(&self, target: &Target) -> Option<(Arc<Value>, Draft)> {
        let doc = self.docs.get(&target.doc)?;
        doc.schema.pointer(&target.pointer)?;
        Some((doc.schema.clone(), doc.draft))
    }

    /// Resolve `reference` as it appears under `base`.
    pub fn resolve(&self, base: &Url, reference: &str) -> Result<Target, ResolveError> {
        let full = base
            .join(reference)
            .map_err(|e| ResolveError::InvalidUri { uri: reference.to_string(), reason: e.to_string() })?;
        let unresolved = || ResolveError::Unresolved { reference: reference.to_string(), base: base.to_string() };
        let fragment = full.fragment().map(percent_decode);
        let mut resource = full.clone();
        resource.set_fragment(None);

        let root = self.ids.get(&resource).cloned().ok_or_else(unresolved)?;
        match fragment.as_deref() {
            None | Some("") => Ok(root),
            Some(pointer) if pointer.starts_with('/') => self.walk(root, pointer).ok_or_else(unresolved),
            Some(anchor) => {
                let mut key = resource;
                key.set_fragment(Some(anchor));
                self.anchors.get(&key).cloned().ok_or_else(unresolved)
            }
        }
    }

    /// Follow a JSON Pointer from `from`, re-basing on embedded `$id`s.
    fn walk(&self, from: Target, pointer: &str) -> Option<Target> {
        let doc = self.docs.get(&from.doc)?;
        let mut node = doc.schema.pointer(&from.pointer)?;
        let mut base = from.base;
        let mut path = from.pointer;
        for raw in pointer[1..].split('/') {
            let segment = raw.replace("~1", "/").replace("~0", "~");
            node = match node {
                Value::Object(map) => map.get(&segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
            path.push('/');
            path.push_str(&escape_pointer(&segment));
            if !PREVENT_SCOPE_CHANGE.contains(&segment.as_str()) {
                if let Some(id) = node.get("$id").and_then(Value::as_str) {
                    base = base.join(id).ok()?;
                    base.set_fragment(None);
                }
            }
        }
        Some(Target { doc: from.doc, pointer: path, base })
    }
}

fn same_schema(doc: &Value, a: &str, b: &str) -> bool {
    doc.pointer(a) == doc.pointer(b)
}

fn walk_ids(
    doc: &Url,
    schema: &Value,
    pointer: String,
    base: Url,
    draft: Draft,
    is_root: bool,
    out: &mut Index,
) -> Result<(), ResolveError> {
    let Value::Object(map) = schema else { return Ok(()) };
    let mut base = base;
    if let Some(id) = map.get("$id").and_then(Value::as_str) {
        if let Some(anchor) = id.strip_prefix('#').filter(|_| draft == Draft::Draft7) {
            let mut key = base.clone();
            key.set_fragment(Some(anchor));
            out.anchors.push((key, Target { doc: doc.clone(), pointer: pointer.clone(), base: base.clone() }));
        } else if !is_root {
            let mut url =
                base.join(id).map_err(|e| ResolveError::InvalidUri { uri: id.to_string(), reason: e.to_string() })?;
            url.set_fragment(None);
            out.ids.push((url.clone(), Target { doc: doc.clone(), pointer: pointer.clone(), base: url.clone() }));
            base = url;
        }
    }
    if let Some(anchor) = map.get("$anchor").and_then(Value::as_str) {
        let mut key = base.clone();
        key.set_fragment(Some(anchor));
        out.anchors.push((key, Target { doc: doc.clone(), pointer: pointer.clone(), base: base.clone() }));
    }
    for (keyword, shape) in SUBSCHEMA_KEYWORDS {
        let Some(value) = map.get(*keyword) else { continue };
        let here = format!("{pointer}/{}", escape_pointer(keyword));
        match (shape, value) {
            (Shape::Schema, _) | (Shape::SchemaOrArray, Value::Object(_)) => {
                walk_ids(doc, value, here, base.clone(), draft, false, out)?
            }
            (Shape::Array | Shape::SchemaOrArray, Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    walk_ids(doc, item, format!("{here}/{i}"), base.clone(), draft, false, out)?;
                }
            }
            (Shape::Map, Value::Object(entries)) => {
                for (key, item) in entries {
                    walk_ids(doc, item, format!("{here}/{}", escape_pointer(key)), base.clone(), draft, false, out)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Undo the percent-encoding URL parsing applies to fragments.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = |b: u8| (b as char).to_digit(16);
        match (bytes[i], bytes.get(i + 1).copied().and_then(hex), bytes.get(i + 2).copied().and_then(hex)) {
            (b'%', Some(hi), Some(lo)) => {
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            (b, ..) => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
