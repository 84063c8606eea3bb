//! XML metadata documents converted to JSON.
//!
//! Elements become objects keyed by child name, attributes are stored as `@name`,
//! text content as `#text` (or as a plain string for text-only elements), and
//! repeated siblings collapse into an array.

use std::fmt::Display;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::AppError;

const MAX_DEPTH: usize = 64;

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

fn invalid(err: impl Display) -> AppError {
    AppError::Validation(format!("Invalid XML metadata: {}", err))
}

fn open(start: &BytesStart<'_>) -> Result<Frame, AppError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(invalid)?
        .to_string();
    let mut fields = Map::new();
    for attr in start.attributes() {
        let attr = attr.map_err(invalid)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(invalid)?;
        let value = attr.unescape_value().map_err(invalid)?;
        fields.insert(format!("@{}", key), Value::String(value.into_owned()));
    }
    Ok(Frame {
        name,
        fields,
        text: String::new(),
    })
}

fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

fn close(
    frame: Frame,
    stack: &mut [Frame],
    root: &mut Option<(String, Value)>,
) -> Result<(), AppError> {
    let Frame {
        name,
        mut fields,
        text,
    } = frame;
    let text = text.trim().to_string();
    let value = if fields.is_empty() {
        if text.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        }
    } else {
        if !text.is_empty() {
            fields.insert("#text".to_string(), Value::String(text));
        }
        Value::Object(fields)
    };

    match stack.last_mut() {
        Some(parent) => insert_child(&mut parent.fields, name, value),
        None => {
            if root.is_some() {
                return Err(invalid("document has more than one root element"));
            }
            *root = Some((name, value));
        }
    }
    Ok(())
}

/// Parse an XML document into a JSON object with the root element as its only key.
pub fn parse_to_json(raw: &str) -> Result<Value, AppError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(invalid("document has more than one root element"));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(invalid("document nesting is too deep"));
                }
                stack.push(open(&start)?);
            }
            Event::Empty(start) => {
                let frame = open(&start)?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| invalid("unexpected closing tag"))?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(invalid)?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(invalid("text outside of the root element")),
                }
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data).map_err(invalid)?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(invalid(format!("element <{}> is not closed", open.name)));
    }

    let (name, value) = root.ok_or_else(|| invalid("document is empty"))?;
    let mut object = Map::new();
    object.insert(name, value);
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_elements_and_attributes() {
        let xml = r#"<?xml version="1.0"?>
            <document id="42" lang="en">
                <title>Q1 Report</title>
                <author>Alice</author>
                <author>Bob</author>
                <empty/>
            </document>"#;
        let value = parse_to_json(xml).unwrap();
        assert_eq!(
            value,
            json!({
                "document": {
                    "@id": "42",
                    "@lang": "en",
                    "title": "Q1 Report",
                    "author": ["Alice", "Bob"],
                    "empty": null
                }
            })
        );
    }

    #[test]
    fn test_text_with_attributes() {
        let value = parse_to_json(r#"<amount currency="EUR">12.50</amount>"#).unwrap();
        assert_eq!(
            value,
            json!({"amount": {"@currency": "EUR", "#text": "12.50"}})
        );
    }

    #[test]
    fn test_entities_are_unescaped() {
        let value = parse_to_json("<note>a &amp; b</note>").unwrap();
        assert_eq!(value, json!({"note": "a & b"}));
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(parse_to_json("").is_err());
        assert!(parse_to_json("<a><b></a>").is_err());
        assert!(parse_to_json("<a>").is_err());
        assert!(parse_to_json("<a/><b/>").is_err());
        assert!(parse_to_json("plain text").is_err());
    }
}
