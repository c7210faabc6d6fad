//! ISO 19139 / ISO 19115-3 XML metadata extractor.
//!
//! The document is parsed once with a namespace-resolving reader into a small
//! element tree. Fields are then looked up through ordered lists of element
//! paths written with conventional prefixes (`gmd:`, `gco:`, `gml:` ...).
//! A prefix in a path stands for a *family* of namespace URIs, so documents
//! that bind `gml` to GML 3.2 or to plain GML, or that use other prefixes
//! entirely, match the same path. `*:` matches any namespace.
//!
//! Path syntax: `//` descends to any depth, `/` is a direct child, and a final
//! `@name` step selects an attribute value.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::{
    apply_online_resources, strip_bom, Corners, MetadataDraft, MetadataExtractor,
    OnlineResource,
};
use crate::error::{ExtractError, ParseError, SourceLocation};
use crate::models::DocumentFormat;
use crate::validation::ValidationMode;

/// Deepest element nesting accepted. ISO 19139 records stay well under 64.
pub const MAX_DEPTH: usize = 512;

/// Namespace URIs each path prefix stands for.
const NAMESPACE_FAMILIES: [(&str, &[&str]); 11] = [
    (
        "gmd",
        &[
            "http://www.isotc211.org/2005/gmd",
            "http://www.isotc211.org/2005/gmi",
        ],
    ),
    (
        "gco",
        &[
            "http://www.isotc211.org/2005/gco",
            "http://standards.iso.org/iso/19115/-3/gco/1.0",
        ],
    ),
    (
        "gmx",
        &[
            "http://www.isotc211.org/2005/gmx",
            "http://standards.iso.org/iso/19115/-3/gcx/1.0",
        ],
    ),
    (
        "gml",
        &[
            "http://www.opengis.net/gml/3.2",
            "http://www.opengis.net/gml",
        ],
    ),
    ("gex", &["http://standards.iso.org/iso/19115/-3/gex/1.0"]),
    (
        "mdb",
        &[
            "http://standards.iso.org/iso/19115/-3/mdb/2.0",
            "http://standards.iso.org/iso/19115/-3/mdb/1.0",
        ],
    ),
    ("mri", &["http://standards.iso.org/iso/19115/-3/mri/1.0"]),
    (
        "cit",
        &[
            "http://standards.iso.org/iso/19115/-3/cit/2.0",
            "http://standards.iso.org/iso/19115/-3/cit/1.0",
        ],
    ),
    ("lan", &["http://standards.iso.org/iso/19115/-3/lan/1.0"]),
    ("mrd", &["http://standards.iso.org/iso/19115/-3/mrd/1.0"]),
    ("srv", &["http://www.isotc211.org/2005/srv"]),
];

const TITLE: &[&str] = &[
    "//gmd:identificationInfo//gmd:citation//gmd:title/gco:CharacterString",
    "//gmd:identificationInfo//gmd:citation//gmd:title/gmx:Anchor",
    "//mri:MD_DataIdentification/mri:citation//cit:title/gco:CharacterString",
    "//*:citation//*:title/*:CharacterString",
];

const ABSTRACT: &[&str] = &[
    "//gmd:identificationInfo//gmd:abstract/gco:CharacterString",
    "//gmd:identificationInfo//gmd:abstract/gmx:Anchor",
    "//mri:MD_DataIdentification/mri:abstract/gco:CharacterString",
    "//*:abstract/*:CharacterString",
];

const KEYWORDS: &[&str] = &[
    "//gmd:descriptiveKeywords//gmd:keyword/gco:CharacterString",
    "//gmd:descriptiveKeywords//gmd:keyword/gmx:Anchor",
    "//mri:descriptiveKeywords//mri:keyword/gco:CharacterString",
    "//mri:descriptiveKeywords//mri:keyword/gmx:Anchor",
];

const BOUNDING_BOX: &[&str] = &[
    "//gmd:extent//gmd:EX_GeographicBoundingBox",
    "//gex:EX_GeographicBoundingBox",
    "//*:EX_GeographicBoundingBox",
];

const WEST: &[&str] = &["//*:westBoundLongitude/gco:Decimal", "//*:westBoundLongitude/*:Decimal"];
const EAST: &[&str] = &["//*:eastBoundLongitude/gco:Decimal", "//*:eastBoundLongitude/*:Decimal"];
const SOUTH: &[&str] = &["//*:southBoundLatitude/gco:Decimal", "//*:southBoundLatitude/*:Decimal"];
const NORTH: &[&str] = &["//*:northBoundLatitude/gco:Decimal", "//*:northBoundLatitude/*:Decimal"];

const TEMPORAL_BEGIN: &[&str] = &[
    "//gmd:extent//gml:TimePeriod/gml:beginPosition",
    "//gex:EX_TemporalExtent//gml:TimePeriod/gml:beginPosition",
    "//gml:TimePeriod/gml:begin/gml:TimeInstant/gml:timePosition",
    "//*:TimePeriod/*:beginPosition",
];

const TEMPORAL_END: &[&str] = &[
    "//gmd:extent//gml:TimePeriod/gml:endPosition",
    "//gex:EX_TemporalExtent//gml:TimePeriod/gml:endPosition",
    "//gml:TimePeriod/gml:end/gml:TimeInstant/gml:timePosition",
    "//*:TimePeriod/*:endPosition",
];

const CONTACT_ORGANIZATION: &[&str] = &[
    "//gmd:contact//gmd:organisationName/gco:CharacterString",
    "//gmd:contact//gmd:organisationName/gmx:Anchor",
    "//gmd:identificationInfo//gmd:pointOfContact//gmd:organisationName/gco:CharacterString",
    "//mdb:contact//cit:CI_Organisation/cit:name/gco:CharacterString",
    "//*:organisationName/*:CharacterString",
];

const CONTACT_EMAIL: &[&str] = &[
    "//gmd:contact//gmd:electronicMailAddress/gco:CharacterString",
    "//gmd:identificationInfo//gmd:pointOfContact//gmd:electronicMailAddress/gco:CharacterString",
    "//mdb:contact//cit:electronicMailAddress/gco:CharacterString",
    "//*:electronicMailAddress/*:CharacterString",
];

const METADATA_DATE: &[&str] = &[
    "//gmd:dateStamp/gco:DateTime",
    "//gmd:dateStamp/gco:Date",
    "//mdb:dateInfo//cit:date/gco:DateTime",
    "//mdb:dateInfo//cit:date/gco:Date",
];

const LANGUAGE: &[&str] = &[
    "//gmd:identificationInfo//gmd:language/gmd:LanguageCode/@codeListValue",
    "//gmd:identificationInfo//gmd:language/gco:CharacterString",
    "//gmd:identificationInfo//gmd:language/gmd:LanguageCode",
    "//gmd:language/gmd:LanguageCode/@codeListValue",
    "//gmd:language/gco:CharacterString",
    "//mri:defaultLocale//lan:LanguageCode/@codeListValue",
];

const TOPIC_CATEGORY: &[&str] = &[
    "//gmd:topicCategory/gmd:MD_TopicCategoryCode",
    "//mri:topicCategory/mri:MD_TopicCategoryCode",
];

const ONLINE_RESOURCES: &[&str] = &[
    "//gmd:distributionInfo//gmd:onLine/gmd:CI_OnlineResource",
    "//mdb:distributionInfo//cit:CI_OnlineResource",
];

const RESOURCE_URL: &[&str] = &["/gmd:linkage/gmd:URL", "/cit:linkage/gco:CharacterString"];

const RESOURCE_FUNCTION: &[&str] = &[
    "/gmd:function/gmd:CI_OnLineFunctionCode/@codeListValue",
    "/gmd:function/gmd:CI_OnLineFunctionCode",
    "/cit:function/cit:CI_OnLineFunctionCode/@codeListValue",
];

pub struct XmlExtractor {
    mode: ValidationMode,
}

impl XmlExtractor {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }
}

impl MetadataExtractor for XmlExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Xml
    }

    fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn describe(&self) -> &'static str {
        "XML (ISO 19139)"
    }

    fn map_document(&self, raw: &str) -> Result<MetadataDraft, ExtractError> {
        let doc = XmlDocument::parse(raw)?;
        Ok(map_document(&doc))
    }
}

/// Well-formedness check used by the fetcher.
pub fn check_syntax(bytes: &[u8]) -> Result<(), ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseError::new(DocumentFormat::Xml, "document is not valid UTF-8"))?;
    XmlDocument::parse(text).map(|_| ())
}

fn map_document(doc: &XmlDocument) -> MetadataDraft {
    let mut draft = MetadataDraft::default();

    draft.set_title(doc.first_text(XmlDocument::ROOT, TITLE));
    draft.set_abstract(doc.first_text(XmlDocument::ROOT, ABSTRACT));

    for path in KEYWORDS {
        for keyword in doc.select(XmlDocument::ROOT, path) {
            draft.add_keyword(&keyword);
        }
    }

    let bbox_node = BOUNDING_BOX
        .iter()
        .find_map(|path| doc.select_nodes(XmlDocument::ROOT, path).into_iter().next());
    if let Some(node) = bbox_node {
        let coord = |paths: &[&str]| -> Option<f64> { doc.first_text(node, paths)?.parse().ok() };
        if let (Some(west), Some(east), Some(south), Some(north)) =
            (coord(WEST), coord(EAST), coord(SOUTH), coord(NORTH))
        {
            draft.set_corners(Some(Corners {
                west,
                east,
                south,
                north,
            }));
        }
    }

    draft.set_temporal_start(doc.first_text(XmlDocument::ROOT, TEMPORAL_BEGIN).as_deref());
    draft.set_temporal_end(doc.first_text(XmlDocument::ROOT, TEMPORAL_END).as_deref());

    draft.set_contact_organization(doc.first_text(XmlDocument::ROOT, CONTACT_ORGANIZATION));
    draft.set_contact_email(doc.first_text(XmlDocument::ROOT, CONTACT_EMAIL));
    draft.set_metadata_date(doc.first_text(XmlDocument::ROOT, METADATA_DATE).as_deref());
    draft.set_language(doc.first_text(XmlDocument::ROOT, LANGUAGE));
    draft.set_topic_category(doc.first_text(XmlDocument::ROOT, TOPIC_CATEGORY));

    let resources: Vec<OnlineResource> = ONLINE_RESOURCES
        .iter()
        .flat_map(|path| doc.select_nodes(XmlDocument::ROOT, path))
        .filter_map(|node| {
            Some(OnlineResource {
                url: doc.first_text(node, RESOURCE_URL)?,
                function: doc.first_text(node, RESOURCE_FUNCTION),
            })
        })
        .collect();
    apply_online_resources(&mut draft, &resources);

    draft
}

// ═══════════════════════════════════════════════════════════════════════
// Element tree
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Element {
    namespace: Option<String>,
    local: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<usize>,
}

/// Arena of elements in document order. Index 0 is a synthetic document node
/// whose only child is the root element.
#[derive(Debug)]
struct XmlDocument {
    nodes: Vec<Element>,
}

impl XmlDocument {
    const ROOT: usize = 0;

    fn parse(raw: &str) -> Result<Self, ParseError> {
        let text = strip_bom(raw);
        let mut reader = NsReader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut doc = XmlDocument {
            nodes: vec![Element::default()],
        };
        let mut stack: Vec<usize> = vec![Self::ROOT];
        let syntax = |message: String, offset: u64| {
            ParseError::new(DocumentFormat::Xml, message)
                .at(SourceLocation::from_offset(text, offset as usize))
        };

        loop {
            match reader.read_resolved_event() {
                Ok((ns, Event::Start(e))) => {
                    if stack.len() > MAX_DEPTH {
                        return Err(syntax(
                            format!("elements nested deeper than {} levels", MAX_DEPTH),
                            reader.buffer_position() as u64,
                        ));
                    }
                    let parent = stack.last().copied().unwrap_or(Self::ROOT);
                    let idx = doc
                        .open(parent, ns, &e)
                        .map_err(|m| syntax(m, reader.buffer_position() as u64))?;
                    stack.push(idx);
                }
                Ok((ns, Event::Empty(e))) => {
                    let parent = stack.last().copied().unwrap_or(Self::ROOT);
                    doc.open(parent, ns, &e)
                        .map_err(|m| syntax(m, reader.buffer_position() as u64))?;
                }
                Ok((_, Event::End(_))) => {
                    stack.pop();
                }
                Ok((_, Event::Text(t))) => {
                    let value = t
                        .unescape()
                        .map_err(|err| syntax(err.to_string(), reader.buffer_position() as u64))?;
                    if let Some(&top) = stack.last() {
                        doc.nodes[top].text.push_str(&value);
                    }
                }
                Ok((_, Event::CData(c))) => {
                    if let Some(&top) = stack.last() {
                        doc.nodes[top]
                            .text
                            .push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok((_, Event::Eof)) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(syntax(err.to_string(), reader.error_position() as u64));
                }
            }
        }

        if stack.len() > 1 {
            let open = &doc.nodes[stack[stack.len() - 1]].local;
            return Err(syntax(
                format!("unexpected end of document: <{}> is not closed", open),
                text.len() as u64,
            ));
        }
        if doc.nodes.len() == 1 {
            return Err(ParseError::new(DocumentFormat::Xml, "document has no root element"));
        }
        Ok(doc)
    }

    fn open(&mut self, parent: usize, ns: ResolveResult, e: &BytesStart) -> Result<usize, String> {
        let namespace = match ns {
            ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
            _ => None,
        };
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| err.to_string())?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|err| err.to_string())?;
            attributes.push((key, value.into_owned()));
        }
        let idx = self.nodes.len();
        self.nodes.push(Element {
            namespace,
            local: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(idx);
        Ok(idx)
    }

    /// Element indices matched by `path`, relative to `context`, in document order.
    fn select_nodes(&self, context: usize, path: &str) -> Vec<usize> {
        let (steps, _) = compile(path);
        let mut current = vec![context];
        for step in &steps {
            let mut next = Vec::new();
            for &node in &current {
                match step.axis {
                    Axis::Child => next.extend(
                        self.nodes[node]
                            .children
                            .iter()
                            .copied()
                            .filter(|&c| self.matches(c, step)),
                    ),
                    Axis::Descendant => self.collect_descendants(node, step, &mut next),
                }
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }
        current
    }

    /// Text (or attribute) values matched by `path`; empty values are skipped.
    fn select(&self, context: usize, path: &str) -> Vec<String> {
        let (_, attribute) = compile(path);
        self.select_nodes(context, path)
            .into_iter()
            .filter_map(|idx| {
                let node = &self.nodes[idx];
                let value = match attribute {
                    Some(name) => node
                        .attributes
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.as_str())?,
                    None => node.text.as_str(),
                };
                Some(value.trim().to_string()).filter(|v| !v.is_empty())
            })
            .collect()
    }

    /// First non-empty value over an ordered list of equivalent paths.
    fn first_text(&self, context: usize, paths: &[&str]) -> Option<String> {
        paths
            .iter()
            .find_map(|path| self.select(context, path).into_iter().next())
    }

    /// Pre-order walk below `node` with an explicit work stack.
    fn collect_descendants(&self, node: usize, step: &Step, out: &mut Vec<usize>) {
        let mut pending: Vec<usize> = self.nodes[node].children.iter().rev().copied().collect();
        while let Some(idx) = pending.pop() {
            if self.matches(idx, step) {
                out.push(idx);
            }
            pending.extend(self.nodes[idx].children.iter().rev().copied());
        }
    }

    fn matches(&self, idx: usize, step: &Step) -> bool {
        let node = &self.nodes[idx];
        if node.local != step.local {
            return false;
        }
        if step.prefix == "*" {
            return true;
        }
        let Some(ns) = node.namespace.as_deref() else {
            return false;
        };
        NAMESPACE_FAMILIES
            .iter()
            .find(|(prefix, _)| *prefix == step.prefix)
            .is_some_and(|(_, uris)| uris.contains(&ns))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug)]
struct Step<'p> {
    axis: Axis,
    prefix: &'p str,
    local: &'p str,
}

/// Split a path into element steps and an optional trailing attribute name.
fn compile(path: &str) -> (Vec<Step<'_>>, Option<&str>) {
    let mut steps = Vec::new();
    let mut attribute = None;
    let mut rest = path;
    while !rest.is_empty() {
        let axis = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            Axis::Descendant
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            Axis::Child
        } else {
            Axis::Child
        };
        let end = rest.find('/').unwrap_or(rest.len());
        let token = &rest[..end];
        rest = &rest[end..];
        if let Some(name) = token.strip_prefix('@') {
            attribute = Some(name);
            break;
        }
        let (prefix, local) = token.split_once(':').unwrap_or(("*", token));
        steps.push(Step {
            axis,
            prefix,
            local,
        });
    }
    (steps, attribute)
}
