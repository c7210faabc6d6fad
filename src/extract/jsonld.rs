//! JSON-LD metadata extractor (schema.org and DCAT vocabularies).
//!
//! Keys are expanded against the active `@context` (string contexts, term
//! definitions, prefixes, `@vocab`, scoped contexts on nested objects) and
//! rewritten to canonical `prefix:term` names such as `schema:name` or
//! `dct:title`. Terms that expand into an unknown vocabulary, or not at all,
//! are dropped. The rewritten tree then goes through the same table-driven
//! mapping as plain JSON.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::json::{map_value, parse_json, FieldPaths, CORNER_KEYS};
use super::{MetadataDraft, MetadataExtractor};
use crate::error::{ExtractError, ParseError};
use crate::models::DocumentFormat;
use crate::validation::ValidationMode;

/// Canonical prefix for each vocabulary namespace we map from.
const VOCABULARIES: [(&str, &str); 11] = [
    ("schema", "http://schema.org/"),
    ("schema", "https://schema.org/"),
    ("dct", "http://purl.org/dc/terms/"),
    ("dct", "http://purl.org/dc/elements/1.1/"),
    ("dcat", "http://www.w3.org/ns/dcat#"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("vcard", "http://www.w3.org/2006/vcard/ns#"),
    ("locn", "http://www.w3.org/ns/locn#"),
    ("gsp", "http://www.opengis.net/ont/geosparql#"),
    ("geo", "http://www.w3.org/2003/01/geo/wgs84_pos#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
];

/// Prefixes understood even when the document does not declare them.
const WELL_KNOWN_PREFIXES: [(&str, &str); 12] = [
    ("schema", "http://schema.org/"),
    ("sdo", "https://schema.org/"),
    ("dct", "http://purl.org/dc/terms/"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("dcat", "http://www.w3.org/ns/dcat#"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("vcard", "http://www.w3.org/2006/vcard/ns#"),
    ("locn", "http://www.w3.org/ns/locn#"),
    ("geosparql", "http://www.opengis.net/ont/geosparql#"),
    ("geo", "http://www.w3.org/2003/01/geo/wgs84_pos#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
];

const SCHEMA_ORG: &str = "http://schema.org/";

const JSONLD_FIELDS: FieldPaths = FieldPaths {
    title: &[&["schema:name"], &["dct:title"], &["schema:headline"]],
    abstract_text: &[
        &["schema:description"],
        &["dct:description"],
        &["schema:abstract"],
        &["dct:abstract"],
    ],
    keywords: &[&["schema:keywords"], &["dcat:keyword"], &["dct:subject"]],
    split_keyword_strings: true,
    bounding_box: &[
        &["schema:spatialCoverage"],
        &["dct:spatial"],
        &["schema:geo"],
        &["dcat:bbox"],
    ],
    temporal_start: &[
        &["schema:temporalCoverage", "schema:startDate"],
        &["dct:temporal", "dcat:startDate"],
        &["dct:temporal", "schema:startDate"],
        &["schema:startDate"],
    ],
    temporal_end: &[
        &["schema:temporalCoverage", "schema:endDate"],
        &["dct:temporal", "dcat:endDate"],
        &["dct:temporal", "schema:endDate"],
        &["schema:endDate"],
    ],
    temporal_interval: &[&["schema:temporalCoverage"], &["dct:temporal"]],
    contact_organization: &[
        &["schema:creator", "schema:name"],
        &["schema:publisher", "schema:name"],
        &["schema:author", "schema:name"],
        &["schema:provider", "schema:name"],
        &["dct:publisher", "foaf:name"],
        &["dct:creator", "foaf:name"],
        &["dcat:contactPoint", "vcard:fn"],
        &["schema:creator"],
        &["schema:publisher"],
        &["dct:publisher"],
        &["dct:creator"],
    ],
    contact_email: &[
        &["schema:creator", "schema:email"],
        &["schema:publisher", "schema:email"],
        &["schema:contactPoint", "schema:email"],
        &["dcat:contactPoint", "vcard:hasEmail"],
        &["schema:email"],
    ],
    metadata_date: &[
        &["schema:dateModified"],
        &["dct:modified"],
        &["schema:datePublished"],
        &["dct:issued"],
        &["schema:dateCreated"],
    ],
    dataset_language: &[&["schema:inLanguage"], &["dct:language"]],
    topic_category: &[&["schema:about"], &["dcat:theme"], &["schema:genre"]],
    download_url: &[
        &["schema:distribution", "schema:contentUrl"],
        &["dcat:distribution", "dcat:downloadURL"],
        &["dcat:distribution", "dcat:accessURL"],
    ],
    landing_page_url: &[&["schema:url"], &["dcat:landingPage"], &["foaf:homepage"]],
    access_type: &[],
    online_resources: &[],
    corners: CORNER_KEYS,
};

pub struct JsonLdExtractor {
    mode: ValidationMode,
}

impl JsonLdExtractor {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }
}

/// Well-formedness check used by the fetcher: a node object or a list of them.
pub fn check_syntax(bytes: &[u8]) -> Result<(), ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseError::new(DocumentFormat::JsonLd, "document is not valid UTF-8"))?;
    match parse_json(text, DocumentFormat::JsonLd)? {
        Value::Object(_) | Value::Array(_) => Ok(()),
        _ => Err(ParseError::new(
            DocumentFormat::JsonLd,
            "expected a JSON-LD object or array at the top level",
        )),
    }
}

impl MetadataExtractor for JsonLdExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::JsonLd
    }

    fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn describe(&self) -> &'static str {
        "JSON-LD (schema.org / DCAT)"
    }

    fn map_document(&self, raw: &str) -> Result<MetadataDraft, ExtractError> {
        let root = parse_json(raw, DocumentFormat::JsonLd)?;
        let has_context = root.get("@context").is_some();
        if self.mode.is_strict() && !has_context {
            return Err(ParseError::new(DocumentFormat::JsonLd, "document has no @context").into());
        }

        let mut context = Context::default();
        if !has_context {
            context.vocab = Some(SCHEMA_ORG.to_string());
        }
        let canonical = rewrite(&root, &context);
        let node = select_dataset(&canonical).ok_or_else(|| {
            ParseError::new(DocumentFormat::JsonLd, "document contains no JSON-LD node")
        })?;
        Ok(map_value(&node, &JSONLD_FIELDS))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Context resolution
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
struct Context {
    vocab: Option<String>,
    /// Term or prefix → IRI, compact IRI or keyword.
    terms: HashMap<String, String>,
}

impl Context {
    fn merge(&mut self, definition: &Value) {
        match definition {
            Value::Null => *self = Context::default(),
            Value::String(iri) => {
                if iri.contains("schema.org") {
                    self.vocab = Some(SCHEMA_ORG.to_string());
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.merge(item);
                }
            }
            Value::Object(map) => {
                for (key, value) in map {
                    if key == "@vocab" {
                        if let Some(v) = value.as_str() {
                            self.vocab = Some(v.to_string());
                        }
                        continue;
                    }
                    if key.starts_with('@') {
                        continue;
                    }
                    let target = match value {
                        Value::String(s) => Some(s.as_str()),
                        Value::Object(def) => def.get("@id").and_then(Value::as_str),
                        _ => None,
                    };
                    match target {
                        Some(t) => {
                            self.terms.insert(key.clone(), t.to_string());
                        }
                        None => {
                            self.terms.remove(key);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Expand a key to an absolute IRI, or a keyword when a term aliases one.
    fn expand(&self, key: &str) -> Option<String> {
        self.expand_depth(key, 0)
    }

    fn expand_depth(&self, key: &str, depth: u8) -> Option<String> {
        if depth > 4 {
            return None;
        }
        if key.starts_with('@') {
            return Some(key.to_string());
        }
        if let Some(mapped) = self.terms.get(key) {
            if mapped != key {
                return self.expand_depth(mapped, depth + 1);
            }
        }
        if key.starts_with("http://") || key.starts_with("https://") {
            return Some(key.to_string());
        }
        if let Some((prefix, local)) = key.split_once(':') {
            if let Some(ns) = self.terms.get(prefix) {
                return self
                    .expand_depth(ns, depth + 1)
                    .map(|ns| format!("{}{}", ns, local));
            }
            return WELL_KNOWN_PREFIXES
                .iter()
                .find(|(p, _)| *p == prefix)
                .map(|(_, ns)| format!("{}{}", ns, local));
        }
        self.vocab.as_ref().map(|v| format!("{}{}", v, key))
    }
}

/// `http://schema.org/name` → `schema:name`; unknown vocabularies → `None`.
fn canonicalize(iri: &str) -> Option<String> {
    VOCABULARIES.iter().find_map(|(prefix, ns)| {
        iri.strip_prefix(ns)
            .filter(|local| !local.is_empty())
            .map(|local| format!("{}:{}", prefix, local))
    })
}

fn canonical_type(value: &Value, ctx: &Context) -> Value {
    match value {
        Value::String(t) => Value::String(
            ctx.expand(t)
                .and_then(|iri| canonicalize(&iri))
                .unwrap_or_else(|| t.clone()),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| canonical_type(v, ctx)).collect()),
        other => other.clone(),
    }
}

/// Rewrite every key in the tree to its canonical name under `ctx`.
fn rewrite(value: &Value, ctx: &Context) -> Value {
    match value {
        Value::Object(map) => {
            let scoped;
            let ctx = match map.get("@context") {
                Some(local) => {
                    let mut merged = ctx.clone();
                    merged.merge(local);
                    scoped = merged;
                    &scoped
                }
                None => ctx,
            };

            if let Some(list) = map.get("@list").or_else(|| map.get("@set")) {
                return rewrite(list, ctx);
            }

            let mut out = Map::new();
            for (key, v) in map {
                if key == "@context" {
                    continue;
                }
                let Some(expanded) = ctx.expand(key) else {
                    continue;
                };
                let (name, rewritten) = match expanded.as_str() {
                    "@type" => ("@type".to_string(), canonical_type(v, ctx)),
                    "@value" | "@id" | "@language" => (expanded.clone(), v.clone()),
                    "@graph" => ("@graph".to_string(), rewrite(v, ctx)),
                    k if k.starts_with('@') => continue,
                    iri => match canonicalize(iri) {
                        Some(name) => (name, rewrite(v, ctx)),
                        None => continue,
                    },
                };
                out.entry(name).or_insert(rewritten);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| rewrite(v, ctx)).collect()),
        other => other.clone(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Node selection
// ═══════════════════════════════════════════════════════════════════════

fn is_dataset(node: &Value) -> bool {
    let matches = |t: &Value| t.as_str().is_some_and(|s| s.ends_with("Dataset"));
    match node.get("@type") {
        Some(Value::Array(types)) => types.iter().any(matches),
        Some(t) => matches(t),
        None => false,
    }
}

/// The dataset node of a document: the root object, or the first
/// `Dataset`-typed member of a `@graph` (or top-level array), with
/// `{"@id": ...}` references to sibling nodes inlined.
fn select_dataset(root: &Value) -> Option<Value> {
    let nodes: Vec<&Value> = match root {
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => vec![root],
        },
        Value::Array(items) => items.iter().collect(),
        _ => return None,
    };
    let nodes: Vec<&Value> = nodes.into_iter().filter(|n| n.is_object()).collect();

    let index: HashMap<&str, &Value> = nodes
        .iter()
        .filter_map(|n| Some((n.get("@id")?.as_str()?, *n)))
        .collect();

    let chosen = nodes
        .iter()
        .find(|n| is_dataset(n))
        .or_else(|| nodes.first())?;
    Some(inline_references(chosen, &index, 3))
}

fn inline_references(value: &Value, index: &HashMap<&str, &Value>, depth: u8) -> Value {
    match value {
        Value::Object(map) => {
            if depth > 0 && map.len() == 1 {
                if let Some(target) = map
                    .get("@id")
                    .and_then(Value::as_str)
                    .and_then(|id| index.get(id))
                {
                    return inline_references(target, index, depth - 1);
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), inline_references(v, index, depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| inline_references(v, index, depth))
                .collect(),
        ),
        other => other.clone(),
    }
}
