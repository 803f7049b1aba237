//! Result shapes and the typed replies they deserialize into.

use brainmap_core::Relation;
use brainmap_llm::ResultShape;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Stored when the model returns no usable glyph, so the node stops
/// qualifying for DESCRIBE.
pub const PLACEHOLDER_EMOJI: &str = "◾";
pub const MAX_EMOJI: usize = 3;
pub const MAX_NAME_CHARS: usize = 60;

pub fn describe_shape(aspects: &[String]) -> ResultShape {
    let scores: serde_json::Map<String, Value> = aspects
        .iter()
        .map(|a| (a.clone(), json!({ "type": "number", "minimum": 0.0, "maximum": 1.0 })))
        .collect();
    let mut required = vec!["description", "emoji"];
    if !aspects.is_empty() {
        required.push("aspects");
    }
    ResultShape::new(
        "describe_concept",
        "Record a short description, emoji and aspect relevance for a concept",
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "emoji": { "type": "string", "description": "1-3 emoji" },
                "aspects": {
                    "type": "object",
                    "properties": scores,
                    "required": aspects,
                },
            },
            "required": required,
        }),
    )
}

/// `{connections: [{target, relation}]}`. The relation property is left out
/// when no relations are allowed.
pub fn connections_shape(relations: &[Relation]) -> ResultShape {
    let mut item = json!({
        "type": "object",
        "properties": {
            "target": { "type": "string" },
        },
        "required": ["target"],
    });
    if !relations.is_empty() {
        let names: Vec<&str> = relations.iter().map(|r| r.as_str()).collect();
        item["properties"]["relation"] = json!({ "type": "string", "enum": names });
        item["required"] = json!(["target", "relation"]);
    }
    ResultShape::new(
        "record_connections",
        "Record related concepts and how they relate to the target",
        json!({
            "type": "object",
            "properties": {
                "connections": { "type": "array", "items": item, "maxItems": 5 },
            },
            "required": ["connections"],
        }),
    )
}

pub fn name_shape() -> ResultShape {
    ResultShape::new(
        "name_graph",
        "Record a short title for the graph",
        json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"],
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct DescribeReply {
    pub description: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub aspects: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Connection {
    pub target: String,
    #[serde(default)]
    pub relation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionsReply {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
pub struct NameReply {
    pub name: String,
}

fn pictographic() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\p{Extended_Pictographic}").ok())
        .as_ref()
}

/// Up to three pictographic glyphs from `raw`, or the placeholder.
pub fn extract_emoji(raw: &str) -> String {
    let glyphs: String = match pictographic() {
        Some(re) => re.find_iter(raw).take(MAX_EMOJI).map(|m| m.as_str()).collect(),
        None => String::new(),
    };
    if glyphs.is_empty() {
        PLACEHOLDER_EMOJI.to_string()
    } else {
        glyphs
    }
}

/// Lenient relation lookup: "Part of", "part-of" and "PART_OF" all match.
pub fn parse_relation(raw: &str) -> Option<Relation> {
    let key = raw
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    serde_json::from_value(Value::String(key)).ok()
}

/// Trimmed, unquoted, capped. `None` if nothing is left.
pub fn clean_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim();
    let capped: String = name.chars().take(MAX_NAME_CHARS).collect();
    let capped = capped.trim_end().to_string();
    (!capped.is_empty()).then_some(capped)
}
