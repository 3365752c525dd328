//! XML wire format
//!
//! XML has no list syntax, so a parse without a schema can only guess: repeated
//! sibling tags collapse into a sequence under their tag name, and a lone
//! occurrence stays a single value until [`Format::reconcile`] applies the
//! function's schema. Attributes other than `type` become entries of the
//! element's mapping. Outbound serialisation adds `type` hints so that its own
//! output parses back exactly.

use std::collections::HashSet;
use std::sync::LazyLock;

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use regex::Regex;
use serde_json::{map::Entry, Number, Value};
use tracing::debug;

use super::{reconcile::reconcile_parameters, Format, ParameterMapping};
use crate::errors::{ErrorEnvelope, GatewayError};
use crate::schema::{ParamType, Schema};

pub const MALFORMED_XML_MESSAGE: &str =
    "mangled and hideous though it was, request body could not be parsed as valid xml";

const REQUEST_ROOT: &str = "request";
const RESPONSE_ROOT: &str = "response";
const LIST_ITEM: &str = "item";
const TYPE_ATTRIBUTE: &str = "type";
/// Key holding the text of an element that also carries attributes.
const TEXT_KEY: &str = "value";

const FALLBACK_ERROR: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><response><success>false</success><exception class=\"InternalError\" code=\"internal_error\"><message>internal server error</message></exception></response>";

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?[0-9]+$").expect("integer pattern"));
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+\.[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$").expect("decimal pattern")
});
static ELEMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]*$").expect("element name pattern")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct XmlFormat;

impl XmlFormat {
    pub fn new() -> Self {
        Self
    }
}

impl Format for XmlFormat {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn content_type(&self) -> &'static str {
        "application/xml; charset=utf-8"
    }

    fn serialise(&self, params: &ParameterMapping) -> Result<Vec<u8>, GatewayError> {
        let mut writer = document()?;
        emit(&mut writer, Event::Start(BytesStart::new(REQUEST_ROOT)))?;
        for (name, value) in params {
            write_hinted(&mut writer, name, value)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(REQUEST_ROOT)))?;
        Ok(writer.into_inner())
    }

    fn deserialise(&self, body: &[u8]) -> Result<ParameterMapping, GatewayError> {
        match parse_document(body) {
            Ok(None) => Ok(ParameterMapping::new()),
            Ok(Some(root)) => Ok(collapse(root.children)),
            Err(detail) => {
                debug!(detail = %detail, "rejecting malformed xml body");
                Err(GatewayError::malformed_body(self.name(), MALFORMED_XML_MESSAGE))
            }
        }
    }

    fn reconcile(&self, params: ParameterMapping, schema: &Schema) -> ParameterMapping {
        reconcile_parameters(params, schema)
    }

    fn render_response(
        &self,
        value: Option<&Value>,
        schema: Option<&Schema>,
    ) -> Result<Vec<u8>, GatewayError> {
        let mut writer = document()?;
        emit(&mut writer, Event::Start(BytesStart::new(RESPONSE_ROOT)))?;
        write_text(&mut writer, "success", None, "true")?;
        if let (Some(value), Some(schema)) = (value, schema) {
            write_returned(&mut writer, "value", value, schema)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(RESPONSE_ROOT)))?;
        Ok(writer.into_inner())
    }

    fn render_error(&self, error: &ErrorEnvelope) -> Result<Vec<u8>, GatewayError> {
        let mut writer = document()?;
        emit(&mut writer, Event::Start(BytesStart::new(RESPONSE_ROOT)))?;
        write_text(&mut writer, "success", None, "false")?;

        let mut exception = BytesStart::new("exception");
        exception.push_attribute(("class", error.class.as_str()));
        exception.push_attribute(("code", error.code.as_str()));
        emit(&mut writer, Event::Start(exception))?;
        write_text(&mut writer, "message", None, &error.message)?;
        emit(&mut writer, Event::End(BytesEnd::new("exception")))?;

        emit(&mut writer, Event::End(BytesEnd::new(RESPONSE_ROOT)))?;
        Ok(writer.into_inner())
    }

    fn fallback_error(&self) -> &'static [u8] {
        FALLBACK_ERROR
    }
}

#[derive(Debug)]
struct Element {
    name: String,
    type_hint: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let name = std::str::from_utf8(start.local_name().as_ref())
            .map_err(|err| format!("element name is not utf-8: {err}"))?
            .to_string();

        let mut type_hint = None;
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| format!("bad attribute on <{name}>: {err}"))?;
            let value = attribute
                .unescape_value()
                .map_err(|err| format!("bad attribute value on <{name}>: {err}"))?
                .into_owned();
            if attribute.key.as_ref() == TYPE_ATTRIBUTE.as_bytes() {
                type_hint = Some(value);
            } else {
                let key = std::str::from_utf8(attribute.key.local_name().as_ref())
                    .map_err(|err| format!("attribute name on <{name}> is not utf-8: {err}"))?
                    .to_string();
                attributes.push((key, value));
            }
        }

        Ok(Self {
            name,
            type_hint,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }
}

/// Parses `body` into its root element. Blank bodies have no root.
fn parse_document(body: &[u8]) -> Result<Option<Element>, String> {
    let source = std::str::from_utf8(body).map_err(|err| format!("body is not utf-8: {err}"))?;
    if source.trim().is_empty() {
        return Ok(None);
    }

    let mut reader = Reader::from_str(source);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| format!("at byte {}: {err}", reader.buffer_position()))?;

        match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err("multiple root elements".to_string());
                }
                stack.push(Element::open(&start)?);
            }
            Event::Empty(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err("multiple root elements".to_string());
                }
                let element = Element::open(&start)?;
                attach(element, &mut stack, &mut root);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or("unexpected closing tag")?;
                attach(element, &mut stack, &mut root);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|err| format!("bad text at byte {}: {err}", reader.buffer_position()))?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err("text outside the root element".to_string()),
                }
            }
            Event::CData(data) => {
                let current = stack.last_mut().ok_or("cdata outside the root element")?;
                let data = data.into_inner();
                let text = std::str::from_utf8(&data)
                    .map_err(|err| format!("cdata is not utf-8: {err}"))?;
                current.text.push_str(text);
            }
            Event::Eof => break,
            // declarations, comments, processing instructions
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unclosed element <{}>", open.name));
    }

    let root = root.ok_or("no root element")?;
    if root.children.is_empty() && !root.text.trim().is_empty() {
        return Err(format!("root <{}> carries text instead of parameters", root.name));
    }

    Ok(Some(root))
}

fn attach(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// Leaf text is kept verbatim; whitespace between child elements is layout.
fn element_value(element: Element) -> Value {
    match element.type_hint.as_deref() {
        Some("list") => Value::Array(element.children.into_iter().map(element_value).collect()),
        Some("null") => Value::Null,
        Some("bool") => Value::Bool(matches!(element.text.trim(), "true" | "1")),
        Some("string") => Value::String(element.text),
        Some("struct") => Value::Object(element_mapping(element)),
        _ if element.attributes.is_empty() && element.children.is_empty() => {
            coerce_scalar(element.text)
        }
        _ => Value::Object(element_mapping(element)),
    }
}

fn element_mapping(element: Element) -> ParameterMapping {
    let mut entries: Vec<(String, Value)> = element
        .attributes
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    if element.children.is_empty() && !element.text.trim().is_empty() {
        entries.push((TEXT_KEY.to_string(), coerce_scalar(element.text)));
    }
    entries.extend(
        element
            .children
            .into_iter()
            .map(|child| (child.name.clone(), element_value(child))),
    );

    collapse_entries(entries)
}

/// Maps child elements by tag name; repeated tags become an ordered sequence.
fn collapse(children: Vec<Element>) -> ParameterMapping {
    collapse_entries(
        children
            .into_iter()
            .map(|child| (child.name.clone(), element_value(child))),
    )
}

fn collapse_entries(entries: impl IntoIterator<Item = (String, Value)>) -> ParameterMapping {
    let mut map = ParameterMapping::new();
    let mut repeated: HashSet<String> = HashSet::new();

    for (name, value) in entries {
        match map.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => {
                if repeated.contains(slot.key()) {
                    if let Value::Array(items) = slot.get_mut() {
                        items.push(value);
                    }
                } else {
                    let first = slot.get_mut().take();
                    *slot.get_mut() = Value::Array(vec![first, value]);
                    repeated.insert(slot.key().clone());
                }
            }
        }
    }

    map
}

/// Digit-only text becomes an integer, plain decimals become floats.
fn coerce_scalar(text: String) -> Value {
    if INTEGER.is_match(&text) {
        if let Ok(number) = text.parse::<i64>() {
            return Value::from(number);
        }
        if let Ok(number) = text.parse::<u64>() {
            return Value::from(number);
        }
    } else if DECIMAL.is_match(&text) {
        if let Some(number) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    Value::String(text)
}

/// Strings that would parse back as something else need a `string` hint.
fn needs_string_hint(text: &str) -> bool {
    INTEGER.is_match(text) || DECIMAL.is_match(text) || text.trim() != text
}

fn float_text(value: f64) -> String {
    let text = value.to_string();
    if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

fn number_text(number: &Number) -> String {
    match number.as_f64() {
        Some(value) if number.is_f64() => float_text(value),
        _ => number.to_string(),
    }
}

fn document() -> Result<Writer<Vec<u8>>, GatewayError> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    Ok(writer)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), GatewayError> {
    writer
        .write_event(event)
        .map_err(|err| GatewayError::internal(format!("failed to write xml: {err}")))
}

fn check_name(name: &str) -> Result<(), GatewayError> {
    if ELEMENT_NAME.is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::invalid_parameter(
            "invalid_element_name",
            format!("'{name}' cannot be used as an xml element name"),
        ))
    }
}

fn write_text(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    type_hint: Option<&str>,
    text: &str,
) -> Result<(), GatewayError> {
    check_name(name)?;
    let mut start = BytesStart::new(name);
    if let Some(hint) = type_hint {
        start.push_attribute((TYPE_ATTRIBUTE, hint));
    }

    if text.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn write_container<F>(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    type_hint: Option<&str>,
    body: F,
) -> Result<(), GatewayError>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<(), GatewayError>,
{
    check_name(name)?;
    let mut start = BytesStart::new(name);
    if let Some(hint) = type_hint {
        start.push_attribute((TYPE_ATTRIBUTE, hint));
    }

    emit(writer, Event::Start(start))?;
    body(writer)?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Outbound encoding: every position that would parse ambiguously carries a hint.
fn write_hinted(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<(), GatewayError> {
    match value {
        Value::Null => write_text(writer, name, Some("null"), ""),
        Value::Bool(flag) => write_text(writer, name, Some("bool"), if *flag { "true" } else { "false" }),
        Value::Number(number) => write_text(writer, name, None, &number_text(number)),
        Value::String(text) => {
            let hint = needs_string_hint(text).then_some("string");
            write_text(writer, name, hint, text)
        }
        Value::Array(items) => write_container(writer, name, Some("list"), |writer| {
            items
                .iter()
                .try_for_each(|item| write_hinted(writer, LIST_ITEM, item))
        }),
        Value::Object(map) => {
            let hint = map.is_empty().then_some("struct");
            write_container(writer, name, hint, |writer| {
                map.iter()
                    .try_for_each(|(key, item)| write_hinted(writer, key, item))
            })
        }
    }
}

/// Response encoding: the declared schema picks field order and scalar rendering.
fn write_returned(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &Value,
    schema: &Schema,
) -> Result<(), GatewayError> {
    match (schema, value) {
        (Schema::List(element), Value::Array(items)) => {
            write_container(writer, name, Some("list"), |writer| {
                items
                    .iter()
                    .try_for_each(|item| write_returned(writer, LIST_ITEM, item, element))
            })
        }
        (Schema::Struct(fields), Value::Object(map)) => write_container(writer, name, None, |writer| {
            fields.iter().try_for_each(|field| match map.get(&field.name) {
                Some(item) => write_returned(writer, &field.name, item, &field.schema),
                None => Ok(()),
            })
        }),
        (Schema::Scalar(_), Value::Null) => write_text(writer, name, None, ""),
        (Schema::Scalar(ParamType::Float), Value::Number(number)) => {
            let text = number.as_f64().map(float_text).unwrap_or_else(|| number.to_string());
            write_text(writer, name, None, &text)
        }
        (Schema::Scalar(_), Value::Number(number)) => write_text(writer, name, None, &number.to_string()),
        (Schema::Scalar(_), Value::Bool(flag)) => {
            write_text(writer, name, None, if *flag { "true" } else { "false" })
        }
        (Schema::Scalar(_), Value::String(text)) => write_text(writer, name, None, text),
        _ => Err(GatewayError::invalid_response(format!(
            "value for <{name}> does not match the declared return structure"
        ))),
    }
}
