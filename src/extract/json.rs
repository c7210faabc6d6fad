//! JSON metadata extractor.
//!
//! Field lookup is table-driven: each field has an ordered list of key paths
//! and the first path that yields a usable value wins (keywords collect from
//! every path). A path step applied to an array fans out over its elements,
//! so `["boundingBoxes", "westBoundLongitude"]` reaches into a list of boxes.
//!
//! The same tables and interpreters back the JSON-LD extractor, which first
//! rewrites `@context`-qualified keys to canonical `prefix:term` names.

use serde_json::Value;

use super::geometry::parse_geometry;
use super::{
    apply_online_resources, strip_bom, Corners, MetadataDraft, MetadataExtractor,
    OnlineResource,
};
use crate::error::{ExtractError, ParseError, SourceLocation};
use crate::models::{AccessType, DocumentFormat};
use crate::validation::ValidationMode;

pub(crate) type KeyPath = &'static [&'static str];

/// Ordered key paths for every mapped field.
pub(crate) struct FieldPaths {
    pub title: &'static [KeyPath],
    pub abstract_text: &'static [KeyPath],
    pub keywords: &'static [KeyPath],
    /// Treat a single keyword string as a comma-separated list.
    pub split_keyword_strings: bool,
    pub bounding_box: &'static [KeyPath],
    pub temporal_start: &'static [KeyPath],
    pub temporal_end: &'static [KeyPath],
    /// Values holding `start/end` intervals.
    pub temporal_interval: &'static [KeyPath],
    pub contact_organization: &'static [KeyPath],
    pub contact_email: &'static [KeyPath],
    pub metadata_date: &'static [KeyPath],
    pub dataset_language: &'static [KeyPath],
    pub topic_category: &'static [KeyPath],
    pub download_url: &'static [KeyPath],
    pub landing_page_url: &'static [KeyPath],
    pub access_type: &'static [KeyPath],
    pub online_resources: &'static [KeyPath],
    pub corners: CornerKeys,
}

/// Keys that hold the parts of a bounding box inside one object.
pub(crate) struct CornerKeys {
    pub west: &'static [&'static str],
    pub east: &'static [&'static str],
    pub south: &'static [&'static str],
    pub north: &'static [&'static str],
    pub latitude: &'static [&'static str],
    pub longitude: &'static [&'static str],
    /// Keys whose value is a box string or WKT geometry.
    pub shape: &'static [&'static str],
}

pub(crate) const CORNER_KEYS: CornerKeys = CornerKeys {
    west: &["west", "west_longitude", "westBoundLongitude", "westLongitude"],
    east: &["east", "east_longitude", "eastBoundLongitude", "eastLongitude"],
    south: &["south", "south_latitude", "southBoundLatitude", "southLatitude"],
    north: &["north", "north_latitude", "northBoundLatitude", "northLatitude"],
    latitude: &["latitude", "lat", "schema:latitude", "geo:lat"],
    longitude: &["longitude", "lon", "lng", "schema:longitude", "geo:long"],
    shape: &[
        "box",
        "wkt",
        "schema:box",
        "schema:polygon",
        "schema:geo",
        "dcat:bbox",
        "locn:geometry",
        "gsp:asWKT",
        "gsp:hasGeometry",
    ],
};

/// Keys consulted when a text field holds an object instead of a string.
const TEXT_KEYS: [&str; 9] = [
    "@value",
    "value",
    "name",
    "schema:name",
    "foaf:name",
    "vcard:fn",
    "label",
    "title",
    "@id",
];

const JSON_FIELDS: FieldPaths = FieldPaths {
    title: &[&["title"], &["citation", "title"]],
    abstract_text: &[&["abstract"], &["description"]],
    keywords: &[
        &["keywords"],
        &["keywordsTheme"],
        &["keywordsPlace"],
        &["keywordsOther"],
        &["keywordsInstrument"],
        &["keywordsProject"],
        &["descriptiveKeywords", "keywords"],
    ],
    split_keyword_strings: true,
    bounding_box: &[&["bounding_box"], &["boundingBox"], &["boundingBoxes"]],
    temporal_start: &[
        &["temporal_extent", "start"],
        &["temporal_extent", "begin"],
        &["temporalExtent", "begin"],
        &["temporalExtents", "begin"],
    ],
    temporal_end: &[
        &["temporal_extent", "end"],
        &["temporalExtent", "end"],
        &["temporalExtents", "end"],
    ],
    temporal_interval: &[&["temporal_extent"], &["temporal_coverage"]],
    contact_organization: &[
        &["contact", "organization"],
        &["contact", "organisation"],
        &["contact", "organisationName"],
        &["contact_organization"],
        &["responsibleParties", "organisationName"],
        &["pointsOfContact", "organisationName"],
    ],
    contact_email: &[
        &["contact", "email"],
        &["contact_email"],
        &["responsibleParties", "email"],
        &["pointsOfContact", "email"],
    ],
    metadata_date: &[&["metadata_date"], &["metadataDate"], &["date_stamp"]],
    dataset_language: &[&["dataset_language"], &["language"]],
    topic_category: &[&["topic_category"], &["topicCategories"], &["topicCategory"]],
    download_url: &[&["download_url"], &["distribution", "download_url"]],
    landing_page_url: &[&["landing_page_url"], &["distribution", "landing_page_url"]],
    access_type: &[&["access_type"], &["distribution", "access_type"]],
    online_resources: &[&["onlineResources"], &["distribution", "online_resources"]],
    corners: CORNER_KEYS,
};

pub struct JsonExtractor {
    mode: ValidationMode,
}

impl JsonExtractor {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }
}

impl MetadataExtractor for JsonExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Json
    }

    fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn describe(&self) -> &'static str {
        "JSON"
    }

    fn map_document(&self, raw: &str) -> Result<MetadataDraft, ExtractError> {
        let root = parse_object(raw)?;
        Ok(map_value(&root, &JSON_FIELDS))
    }
}

/// Parse JSON text, reporting syntax errors with their position.
pub(crate) fn parse_json(raw: &str, format: DocumentFormat) -> Result<Value, ParseError> {
    serde_json::from_str(strip_bom(raw)).map_err(|err| {
        ParseError::new(format, err.to_string()).at(SourceLocation {
            line: err.line() as u64,
            column: err.column() as u64,
        })
    })
}

/// A plain metadata record is always a single object.
fn parse_object(raw: &str) -> Result<Value, ParseError> {
    let root = parse_json(raw, DocumentFormat::Json)?;
    if !root.is_object() {
        return Err(ParseError::new(
            DocumentFormat::Json,
            "expected a JSON object at the top level",
        ));
    }
    Ok(root)
}

/// Well-formedness check used by the fetcher. Applies the same top-level
/// rule as extraction.
pub fn check_syntax(bytes: &[u8]) -> Result<(), ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseError::new(DocumentFormat::Json, "document is not valid UTF-8"))?;
    parse_object(text).map(|_| ())
}

// ═══════════════════════════════════════════════════════════════════════
// Table-driven mapping
// ═══════════════════════════════════════════════════════════════════════

/// Map a JSON object graph onto a draft using `table`.
pub(crate) fn map_value(root: &Value, table: &FieldPaths) -> MetadataDraft {
    let mut draft = MetadataDraft::default();

    draft.set_title(first_text(root, table.title));
    draft.set_abstract(first_text(root, table.abstract_text));

    for path in table.keywords {
        for value in resolve(root, path) {
            push_keywords(&mut draft, value, table.split_keyword_strings);
        }
    }

    'boxes: for path in table.bounding_box {
        for value in resolve(root, path) {
            if let Some(corners) = corners_of(value, &table.corners) {
                draft.set_corners(Some(corners));
                break 'boxes;
            }
        }
    }

    draft.set_temporal_start(first_text(root, table.temporal_start).as_deref());
    draft.set_temporal_end(first_text(root, table.temporal_end).as_deref());
    draft.set_temporal_interval(first_text(root, table.temporal_interval).as_deref());

    draft.set_contact_organization(first_text(root, table.contact_organization));
    draft.set_contact_email(first_text(root, table.contact_email));
    draft.set_metadata_date(first_text(root, table.metadata_date).as_deref());
    draft.set_language(first_text(root, table.dataset_language));
    draft.set_topic_category(first_text(root, table.topic_category));

    draft.set_download_url(first_text(root, table.download_url));
    draft.set_landing_page_url(first_text(root, table.landing_page_url));
    draft.access_type = first_text(root, table.access_type).and_then(|t| access_type(&t));

    let resources: Vec<OnlineResource> = table
        .online_resources
        .iter()
        .flat_map(|path| resolve(root, path))
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .filter_map(|v| {
            Some(OnlineResource {
                url: text_of(v.get("url")?)?,
                function: v.get("function").and_then(text_of),
            })
        })
        .collect();
    apply_online_resources(&mut draft, &resources);

    draft
}

/// All values reached by `path`. Arrays met along the way fan out.
pub(crate) fn resolve<'v>(root: &'v Value, path: &[&str]) -> Vec<&'v Value> {
    let mut current = vec![root];
    for key in path {
        let mut next = Vec::new();
        for value in current {
            collect_key(value, key, &mut next);
        }
        current = next;
    }
    current
}

fn collect_key<'v>(value: &'v Value, key: &str, out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(key) {
                out.push(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_key(item, key, out);
            }
        }
        _ => {}
    }
}

/// Text content of a value: strings, numbers, text-bearing objects, or the
/// first usable array element.
pub(crate) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(text_of)),
        Value::Array(items) => items.iter().find_map(text_of),
        _ => None,
    }
}

fn first_text(root: &Value, paths: &[KeyPath]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| resolve(root, path).into_iter().find_map(text_of))
}

fn push_keywords(draft: &mut MetadataDraft, value: &Value, split: bool) {
    match value {
        Value::Array(items) => {
            for item in items {
                push_keywords(draft, item, split);
            }
        }
        Value::String(s) if split => {
            for part in s.split(',') {
                draft.add_keyword(part);
            }
        }
        other => {
            if let Some(text) = text_of(other) {
                draft.add_keyword(&text);
            }
        }
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(_) | Value::Array(_) => text_of(value)?.parse().ok(),
        _ => None,
    }
}

fn lookup_number(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(number_of))
}

/// Interpret a value as a bounding box: an object with four corner keys, a
/// lat/long point, a nested box/WKT string, or the string itself.
pub(crate) fn corners_of(value: &Value, keys: &CornerKeys) -> Option<Corners> {
    match value {
        Value::Object(map) => {
            let corners = (
                lookup_number(map, keys.west),
                lookup_number(map, keys.east),
                lookup_number(map, keys.south),
                lookup_number(map, keys.north),
            );
            if let (Some(west), Some(east), Some(south), Some(north)) = corners {
                return Some(Corners {
                    west,
                    east,
                    south,
                    north,
                });
            }
            if let (Some(lat), Some(lon)) = (
                lookup_number(map, keys.latitude),
                lookup_number(map, keys.longitude),
            ) {
                return Some(Corners::point(lon, lat));
            }
            keys.shape
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(|v| corners_of(v, keys))
        }
        Value::String(s) => parse_geometry(s),
        Value::Array(items) => items.iter().find_map(|v| corners_of(v, keys)),
        _ => None,
    }
}

fn access_type(text: &str) -> Option<AccessType> {
    match text.trim().to_ascii_lowercase().as_str() {
        "fileaccess" | "file_access" => Some(AccessType::FileAccess),
        "download" => Some(AccessType::Download),
        _ => None,
    }
}
