//! SOAP envelope rendering and reply parsing for the XML-based gateways.

use crate::errors::{GatewayError, GatewayResult};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// How the operation element is namespaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespacing {
    /// `<p:op xmlns:p="…"><p:field>` with the prefix on every element
    Prefixed(&'static str),
    /// `<op xmlns="…"><field>` using a default namespace
    Default,
}

/// A single SOAP call body.
///
/// # Examples
///
/// ```
/// use shaparak_rs::soap::{Namespacing, SoapRequest};
///
/// let xml = SoapRequest::new("ConfirmPayment", "https://pec.example/Confirm", Namespacing::Default)
///     .wrapped_in("requestData")
///     .field("LoginAccount", "abc")
///     .field("Token", 42)
///     .render();
/// assert!(xml.contains("<requestData><LoginAccount>abc</LoginAccount><Token>42</Token></requestData>"));
/// ```
#[derive(Debug, Clone)]
pub struct SoapRequest {
    operation: &'static str,
    namespace: &'static str,
    namespacing: Namespacing,
    wrapper: Option<&'static str>,
    fields: Vec<(&'static str, String)>,
}

impl SoapRequest {
    /// Starts a call to `operation` in `namespace`.
    pub fn new(operation: &'static str, namespace: &'static str, namespacing: Namespacing) -> Self {
        Self {
            operation,
            namespace,
            namespacing,
            wrapper: None,
            fields: Vec::new(),
        }
    }

    /// Nests the fields inside an extra element (e.g. `requestData`).
    pub fn wrapped_in(mut self, wrapper: &'static str) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    /// Appends a field. Values are XML-escaped on render.
    pub fn field(mut self, name: &'static str, value: impl ToString) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    fn qualified(&self, name: &str) -> String {
        match self.namespacing {
            Namespacing::Prefixed(prefix) => format!("{}:{}", prefix, name),
            Namespacing::Default => name.to_string(),
        }
    }

    /// Renders the full envelope.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(256 + self.fields.len() * 48);
        out.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);

        match self.namespacing {
            Namespacing::Prefixed(prefix) => out.push_str(&format!(
                r#"<soapenv:Envelope xmlns:soapenv="{}" xmlns:{}="{}"><soapenv:Body>"#,
                SOAP_ENV_NS, prefix, self.namespace
            )),
            Namespacing::Default => out.push_str(&format!(
                r#"<soapenv:Envelope xmlns:soapenv="{}"><soapenv:Body>"#,
                SOAP_ENV_NS
            )),
        }

        let operation = self.qualified(self.operation);
        match self.namespacing {
            Namespacing::Default => {
                out.push_str(&format!(r#"<{} xmlns="{}">"#, operation, self.namespace))
            }
            Namespacing::Prefixed(_) => out.push_str(&format!("<{}>", operation)),
        }

        if let Some(wrapper) = self.wrapper {
            out.push_str(&format!("<{}>", self.qualified(wrapper)));
        }
        for (name, value) in &self.fields {
            let tag = self.qualified(name);
            out.push_str(&format!("<{}>{}</{}>", tag, escape(value.as_str()), tag));
        }
        if let Some(wrapper) = self.wrapper {
            out.push_str(&format!("</{}>", self.qualified(wrapper)));
        }

        out.push_str(&format!("</{}>", operation));
        out.push_str("</soapenv:Body></soapenv:Envelope>");
        out
    }
}

/// Collects the text of every leaf element in a SOAP reply, keyed by local
/// name (namespace prefixes stripped). The first occurrence of a name wins.
///
/// A `Fault` in the body is reported as a protocol error with the fault
/// string, and malformed XML as a protocol error carrying the raw body.
pub fn parse_reply(xml: &str) -> GatewayResult<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                fields.entry(name).or_insert_with(String::new);
                current = None;
            }
            Ok(Event::Text(t)) => {
                if let Some(name) = current.take() {
                    let text = t.unescape().map_err(|e| {
                        GatewayError::protocol(format!("invalid xml text in <{}>: {}", name, e), xml)
                            .with_cause(e)
                    })?;
                    fields.entry(name).or_insert_with(|| text.into_owned());
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(GatewayError::protocol(
                    format!("malformed soap response at {}: {}", reader.buffer_position(), e),
                    xml,
                )
                .with_cause(e))
            }
        }
    }

    if let Some(fault) = fields.get("faultstring") {
        return Err(GatewayError::protocol(format!("soap fault: {}", fault), xml));
    }
    if fields.is_empty() {
        return Err(GatewayError::protocol("empty soap response", xml));
    }
    Ok(fields)
}

/// Returns a required field from a parsed reply.
pub fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &str,
    raw: &str,
) -> GatewayResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| GatewayError::protocol(format!("soap response is missing <{}>", name), raw))
}

/// Parses a required numeric field from a parsed reply.
pub fn required_number<T>(
    fields: &HashMap<String, String>,
    name: &str,
    raw: &str,
) -> GatewayResult<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = required(fields, name, raw)?;
    value.trim().parse().map_err(|e| {
        GatewayError::protocol(format!("<{}> is not a number: '{}'", name, value), raw)
            .with_cause(e)
    })
}
