//! Normalisation of provider replies into [`AnalysisResult`].
//!
//! Providers differ in how faithfully they follow the requested format:
//! some honour a strict schema, others wrap JSON in Markdown fences or
//! surround it with prose, and prices arrive as numbers or strings such as
//! `"450 kr"`. Everything is funnelled through [`parse_reply`], which only
//! insists on `description` and `price`.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Markers a model uses for "I could not tell".
const UNKNOWN_MARKERS: &[&str] = &["ukendt", "unknown"];

/// Normalised structured analysis of an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub description: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_new: Option<f64>,
    #[serde(default)]
    pub brand: String,
    #[serde(default, rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub similar_links: Vec<String>,
}

/// The optional descriptive fields of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Brand,
    Type,
    Color,
    Size,
    Material,
    Condition,
    Style,
}

impl ItemField {
    pub const ALL: [ItemField; 7] = [
        ItemField::Brand,
        ItemField::Type,
        ItemField::Color,
        ItemField::Size,
        ItemField::Material,
        ItemField::Condition,
        ItemField::Style,
    ];

    /// JSON key, also accepted as the user-facing name.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Type => "type",
            Self::Color => "color",
            Self::Size => "size",
            Self::Material => "material",
            Self::Condition => "condition",
            Self::Style => "style",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL.into_iter().find(|f| f.key().eq_ignore_ascii_case(key))
    }
}

impl AnalysisResult {
    pub fn field(&self, field: ItemField) -> &str {
        match field {
            ItemField::Brand => &self.brand,
            ItemField::Type => &self.item_type,
            ItemField::Color => &self.color,
            ItemField::Size => &self.size,
            ItemField::Material => &self.material,
            ItemField::Condition => &self.condition,
            ItemField::Style => &self.style,
        }
    }

    /// Fields the user should complete by hand.
    pub fn missing_fields(&self) -> Vec<ItemField> {
        ItemField::ALL
            .into_iter()
            .filter(|f| is_missing_value(self.field(*f)))
            .collect()
    }
}

/// Whether a detail value is absent: empty, or an "unknown" marker.
pub fn is_missing_value(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || UNKNOWN_MARKERS.iter().any(|m| value.eq_ignore_ascii_case(m))
}

/// Whether free text such as a description contains an unknown marker.
pub(crate) fn mentions_unknown(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNKNOWN_MARKERS.iter().any(|m| lower.contains(m))
}

/// JSON Schema requested from providers that support strict output.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "description": { "type": "string" },
            "price": { "type": "number" },
            "priceNew": { "type": "number" },
            "brand": { "type": "string" },
            "type": { "type": "string" },
            "color": { "type": "string" },
            "size": { "type": "string" },
            "material": { "type": "string" },
            "condition": { "type": "string" },
            "style": { "type": "string" },
            "similarLinks": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["description", "price"]
    })
}

/// [`response_schema`] in the form strict structured-output modes demand:
/// every property required, optional ones nullable, no extra properties.
pub fn strict_response_schema() -> Value {
    let mut schema = response_schema();
    let mandatory = ["description", "price"];
    let mut required = Vec::new();
    if let Some(properties) = schema["properties"].as_object_mut() {
        for (key, property) in properties.iter_mut() {
            required.push(Value::String(key.clone()));
            if mandatory.contains(&key.as_str()) {
                continue;
            }
            if let Some(kind) = property["type"].as_str().map(str::to_string) {
                property["type"] = json!([kind, "null"]);
            }
        }
    }
    schema["required"] = Value::Array(required);
    schema["additionalProperties"] = Value::Bool(false);
    schema
}

/// Classifies a raw provider answer and parses it.
///
/// A safety indicator always wins, so an empty reply that was blocked is a
/// `safety` failure rather than a `parse` failure.
pub(crate) fn interpret_reply(provider: &str, text: &str, safety_block: Option<&str>) -> Result<AnalysisResult> {
    if let Some(reason) = safety_block {
        return Err(AppError::safety(format!(
            "The request was stopped by {}'s safety filters ({})",
            provider, reason
        )));
    }
    if text.trim().is_empty() {
        return Err(AppError::parse(format!("Empty response from {}", provider)));
    }
    parse_reply(text)
}

/// Parses reply text (fenced, unfenced, or embedded in prose) into a result.
pub fn parse_reply(text: &str) -> Result<AnalysisResult> {
    let cleaned = strip_json_fences(text);
    let candidate = extract_object(&cleaned).unwrap_or(&cleaned);
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| AppError::parse(format!("Response is not valid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::parse("Response JSON is not an object"))?;
    from_object(obj)
}

pub(crate) fn strip_json_fences(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = find_ignore_case(&out, "```json") {
        out.replace_range(start..start + "```json".len(), "");
    }
    out.replace("```", "").trim().to_string()
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

/// Outermost `{ ... }` span, if any.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn from_object(obj: &Map<String, Value>) -> Result<AnalysisResult> {
    let description = text_field(obj, "description");
    if description.is_empty() {
        return Err(AppError::parse("Response is missing 'description'"));
    }

    let price = number_field(obj, "price").ok_or_else(|| AppError::parse("Response is missing a numeric 'price'"))?;
    if price < 0.0 {
        return Err(AppError::parse("Response 'price' is negative"));
    }

    let mut similar_links = links_field(obj, "similarLinks");
    for link in links_field(obj, "similarLink") {
        if !similar_links.contains(&link) {
            similar_links.push(link);
        }
    }

    Ok(AnalysisResult {
        description,
        price,
        price_new: number_field(obj, "priceNew").filter(|p| *p >= 0.0),
        brand: text_field(obj, "brand"),
        item_type: text_field(obj, "type"),
        color: text_field(obj, "color"),
        size: text_field(obj, "size"),
        material: text_field(obj, "material"),
        condition: text_field(obj, "condition"),
        style: text_field(obj, "style"),
        similar_links,
    })
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn links_field(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    let raw: Vec<&str> = match obj.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };
    let mut links: Vec<String> = Vec::new();
    for link in raw.into_iter().map(str::trim).filter(|l| !l.is_empty()) {
        if !links.iter().any(|l| l == link) {
            links.push(link.to_string());
        }
    }
    links
}

/// Reads the first number in a free-form price such as `"1.299,50 kr"`.
pub(crate) fn parse_price(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let run: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == ' ')
        .filter(|c| *c != ' ')
        .collect();
    let run = run.trim_end_matches(['.', ',']);

    let normalized = match (run.rfind('.'), run.rfind(',')) {
        // the later separator is the decimal point
        (Some(dot), Some(comma)) if comma > dot => run.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => run.replace(',', ""),
        (None, Some(_)) => run.replace(',', "."),
        // "1.299" and "12.500.000" group thousands
        (Some(_), None) if run.split('.').skip(1).all(|group| group.len() == 3) => run.replace('.', ""),
        _ => run.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisErrorKind;

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"description\":\"Nike Air Max 90 Sort Str. 42\",\"price\":450,\"brand\":\"Nike\"}\n```";
        let result = parse_reply(text).unwrap();
        assert_eq!(result.description, "Nike Air Max 90 Sort Str. 42");
        assert_eq!(result.price, 450.0);
        assert_eq!(result.brand, "Nike");
        assert_eq!(result.price_new, None);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = "Here is the analysis: {\"description\":\"Lamp\",\"price\":\"120 kr\",\"priceNew\":\"1.299,50\"} Hope it helps.";
        let result = parse_reply(text).unwrap();
        assert_eq!(result.price, 120.0);
        assert_eq!(result.price_new, Some(1299.5));
    }

    #[test]
    fn accepts_legacy_single_link() {
        let text = r#"{"description":"Jacket","price":300,"similarLink":"https://dba.dk/a","similarLinks":["https://trendsales.dk/b","https://dba.dk/a"]}"#;
        let result = parse_reply(text).unwrap();
        assert_eq!(result.similar_links, vec!["https://trendsales.dk/b", "https://dba.dk/a"]);
    }

    #[test]
    fn missing_required_fields_are_parse_errors() {
        let no_price = parse_reply(r#"{"description":"Chair"}"#).unwrap_err();
        assert_eq!(no_price.analysis_kind(), Some(AnalysisErrorKind::Parse));

        let no_description = parse_reply(r#"{"price":10}"#).unwrap_err();
        assert_eq!(no_description.analysis_kind(), Some(AnalysisErrorKind::Parse));

        let not_json = parse_reply("I cannot help with that.").unwrap_err();
        assert_eq!(not_json.analysis_kind(), Some(AnalysisErrorKind::Parse));
    }

    #[test]
    fn empty_blocked_reply_is_safety_not_parse() {
        let err = interpret_reply("Gemini", "", Some("SAFETY")).unwrap_err();
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Safety));

        let empty = interpret_reply("Gemini", "  ", None).unwrap_err();
        assert_eq!(empty.analysis_kind(), Some(AnalysisErrorKind::Parse));
    }

    #[test]
    fn unknown_markers_count_as_missing() {
        let result = parse_reply(r#"{"description":"Vase","price":50,"brand":"Ukendt","color":"Blå","size":null}"#).unwrap();
        let missing = result.missing_fields();
        assert!(missing.contains(&ItemField::Brand));
        assert!(missing.contains(&ItemField::Size));
        assert!(!missing.contains(&ItemField::Color));
    }

    #[test]
    fn price_parsing_handles_separators() {
        assert_eq!(parse_price("DKK 1,299.00"), Some(1299.0));
        assert_eq!(parse_price("ca. 75,5 kr."), Some(75.5));
        assert_eq!(parse_price("2 500"), Some(2500.0));
        assert_eq!(parse_price("gratis"), None);
    }

    #[test]
    fn strict_schema_requires_every_property() {
        let schema = strict_response_schema();
        assert_eq!(schema["additionalProperties"], json!(false));
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), schema["properties"].as_object().unwrap().len());
        assert_eq!(schema["properties"]["price"]["type"], json!("number"));
        assert_eq!(schema["properties"]["priceNew"]["type"], json!(["number", "null"]));
        assert_eq!(schema["properties"]["similarLinks"]["type"], json!(["array", "null"]));
    }

    #[test]
    fn strict_nulls_parse_as_missing() {
        let text = r#"{"description":"Lamp","price":120,"priceNew":null,"brand":null,"similarLinks":null}"#;
        let result = parse_reply(text).unwrap();
        assert_eq!(result.price_new, None);
        assert!(result.brand.is_empty());
        assert!(result.similar_links.is_empty());
    }

    #[test]
    fn dotted_thousands_without_decimals() {
        assert_eq!(parse_price("1.299 kr"), Some(1299.0));
        assert_eq!(parse_price("12.500"), Some(12500.0));
        assert_eq!(parse_price("1.250.000"), Some(1250000.0));
        assert_eq!(parse_price("12.5"), Some(12.5));
        assert_eq!(parse_price("99.95 EUR"), Some(99.95));
    }

    #[test]
    fn serializes_with_original_keys() {
        let result = AnalysisResult {
            description: "Bag".into(),
            price: 100.0,
            item_type: "Taske".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "Taske");
        assert!(value.get("similarLinks").is_some());
        assert!(value.get("priceNew").is_none());
    }
}
