//! CSW response parsing.
//!
//! Responses are read into a namespace-agnostic element tree, then mapped to a
//! [`ProtocolResult`] according to the root element. Element bodies are
//! converted to JSON with these conventions:
//!
//! - element names lose their namespace prefix;
//! - attributes become `@name` keys (namespace declarations are dropped);
//! - an element with text and nothing else becomes a string;
//! - text next to attributes or children is kept under `#text`;
//! - repeated child elements become arrays, in document order.

use csw_core::{AppError, ProtocolException, ProtocolResult, RawRecord, SearchResults};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Turns a response body into one protocol result.
pub trait ProtocolParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<ProtocolResult, AppError>;
}

/// [`ProtocolParser`] for CSW 2.0.2 XML documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlProtocolParser;

impl ProtocolParser for XmlProtocolParser {
    fn parse(&self, body: &[u8]) -> Result<ProtocolResult, AppError> {
        let root = read_tree(body)?;
        interpret(root)
    }
}

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn to_value(&self) -> Value {
        if self.attributes.is_empty() && self.children.is_empty() {
            return Value::String(self.text.clone());
        }

        let mut map = Map::new();
        for (key, value) in &self.attributes {
            map.insert(format!("@{}", key), Value::String(value.clone()));
        }
        for child in &self.children {
            let value = child.to_value();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text.clone()));
        }
        Value::Object(map)
    }

    fn to_raw_record(&self) -> RawRecord {
        RawRecord::new(self.name.clone(), self.to_value())
    }
}

fn parse_error(error: impl std::fmt::Display) -> AppError {
    AppError::ParseError(error.to_string())
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, AppError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(parse_error)?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(parse_error)?.into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

/// Reads the document element and its whole subtree.
fn read_tree(body: &[u8]) -> Result<Element, AppError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            parse_error(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| parse_error("unexpected closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(parse_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => {
                return Err(parse_error(if stack.is_empty() {
                    "empty document"
                } else {
                    "unexpected end of document"
                }));
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_count(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}

fn interpret(root: Element) -> Result<ProtocolResult, AppError> {
    match root.name.as_str() {
        "Capabilities" => Ok(ProtocolResult::Capabilities(root.to_value())),
        "GetRecordsResponse" => {
            let search = root
                .child("SearchResults")
                .ok_or_else(|| parse_error("GetRecordsResponse without SearchResults"))?;
            Ok(ProtocolResult::GetRecordsResponse(SearchResults {
                records: search.children.iter().map(Element::to_raw_record).collect(),
                matched: parse_count(search.attribute("numberOfRecordsMatched")),
                returned: parse_count(search.attribute("numberOfRecordsReturned")),
            }))
        }
        "GetRecordByIdResponse" => Ok(ProtocolResult::GetRecordByIdResponse(
            root.children.iter().map(Element::to_raw_record).collect(),
        )),
        "ExceptionReport" => {
            let exception = root
                .child("Exception")
                .ok_or_else(|| parse_error("ExceptionReport without Exception"))?;
            let message = exception
                .children
                .iter()
                .filter(|child| child.name == "ExceptionText")
                .map(|child| child.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ProtocolResult::ExceptionReport(ProtocolException {
                exception_code: exception
                    .attribute("exceptionCode")
                    .unwrap_or("NoApplicableCode")
                    .to_string(),
                locator: exception.attribute("locator").map(str::to_string),
                message,
            }))
        }
        other => Err(parse_error(format!("unsupported document element: {}", other))),
    }
}
