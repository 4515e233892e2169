//! Response structures for the Salus endpoints.
//!
//! The mobile application API answers in XML, the web portal in JSON. This
//! module decodes both into plain Rust values, the mapping to [`crate::state::State`]
//! lives in the clients.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use quick_xml::{events::Event, name::LocalName, reader::Reader};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use crate::client::ClientError;

/// Body of the mobile application login request.
#[derive(Serialize, Debug)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    /// MD5 hex digest of the account password
    pub password: &'a str,
}

/// Reply of the mobile application login endpoint.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Session token, absent when the credentials are rejected
    pub security_token: Option<String>,
}

/// Leaf element found in an XML document.
#[derive(Debug, PartialEq)]
struct TextElement {
    /// Local name and document position of the enclosing element
    parent: Option<(usize, String)>,
    /// Local name of the element
    name: String,
    /// Unescaped text content, empty for `<a/>` and `<a></a>`
    text: String,
}

/// Element opened but not yet closed while walking the document.
struct OpenElement {
    position: usize,
    name: String,
    text: String,
    has_children: bool,
}

fn xml_error(error: impl fmt::Display) -> ClientError {
    ClientError::Parse(format!("invalid XML: {}", error))
}

fn local_name(name: LocalName<'_>) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

/// Collects every element without child elements, in document order.
///
/// Namespace prefixes are dropped, only local names are kept.
fn text_elements(content: &str) -> Result<Vec<TextElement>, ClientError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut elements = Vec::new();
    let mut position = 0;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(OpenElement {
                    position,
                    name: local_name(e.local_name()),
                    text: String::new(),
                    has_children: false,
                });
                position += 1;
            }
            Event::Text(t) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&t.unescape().map_err(xml_error)?);
                }
            }
            Event::End(_) => {
                let Some(open) = stack.pop() else {
                    continue;
                };
                if !open.has_children {
                    elements.push(TextElement {
                        parent: stack.last().map(|p| (p.position, p.name.clone())),
                        name: open.name,
                        text: open.text,
                    });
                }
            }
            Event::Empty(e) => {
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                elements.push(TextElement {
                    parent: stack.last().map(|p| (p.position, p.name.clone())),
                    name: local_name(e.local_name()),
                    text: String::new(),
                });
                position += 1;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if elements.is_empty() && !content.trim_start().starts_with('<') {
        return Err(ClientError::Parse("response is not an XML document".to_string()));
    }

    Ok(elements)
}

/// Reply of `getDeviceAttributesWithValues`.
///
/// The document repeats one entry per attribute:
/// ```xml
/// <attrList>
///   <name>A84</name>
///   <value>2150</value>
/// </attrList>
/// ```
#[derive(Debug)]
pub struct DeviceAttributes {
    attributes: HashMap<String, String>,
}

impl DeviceAttributes {
    pub fn parse(content: &str) -> Result<Self, ClientError> {
        // name and value of each attrList, keyed by its position
        let mut entries: BTreeMap<usize, (Option<String>, Option<String>)> = BTreeMap::new();

        for element in text_elements(content)? {
            let Some((position, parent)) = element.parent else {
                continue;
            };
            if parent != "attrList" {
                continue;
            }
            let entry = entries.entry(position).or_default();
            match element.name.as_str() {
                "name" => entry.0 = Some(element.text),
                "value" => entry.1 = Some(element.text),
                _ => {}
            }
        }

        let attributes = entries
            .into_values()
            .filter_map(|entry| match entry {
                (Some(name), Some(value)) => Some((name, value)),
                _ => None,
            })
            .collect();

        Ok(DeviceAttributes { attributes })
    }

    /// Raw value of an attribute.
    pub fn get_value(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    /// Raw value of an attribute that must be present.
    pub fn require(&self, attribute: &str) -> Result<&str, ClientError> {
        self.get_value(attribute)
            .ok_or_else(|| ClientError::Parse(format!("missing attribute {}", attribute)))
    }
}

/// Reply of `setMultiDeviceAttributes2`.
#[derive(Debug, PartialEq)]
pub struct ActionResponse {
    /// Error reported by the server
    pub error_message: Option<String>,
    /// Return code, `0` on success
    pub return_code: Option<String>,
}

impl ActionResponse {
    pub fn parse(content: &str) -> Result<Self, ClientError> {
        let mut response = ActionResponse {
            error_message: None,
            return_code: None,
        };

        for element in text_elements(content)? {
            match element.name.as_str() {
                "errorMsg" if response.error_message.is_none() => {
                    response.error_message = Some(element.text)
                }
                "retCode" if response.return_code.is_none() => {
                    response.return_code = Some(element.text)
                }
                _ => {}
            }
        }

        Ok(response)
    }
}

/// Accepts a JSON string or number and returns its text.
fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    scalar_text(&value)
        .ok_or_else(|| de::Error::custom(format!("expected a string or a number, got {}", value)))
}

/// Text of a JSON string or number, `None` for any other value.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reply of the web portal `ajax_device_values.php`.
///
/// Only the fields of the first heating channel are kept. The portal sends
/// numbers as strings, both forms are accepted.
#[derive(Deserialize, Debug)]
pub struct DeviceValues {
    #[serde(rename = "CH1currentSetPoint", deserialize_with = "scalar")]
    pub current_set_point: String,
    #[serde(rename = "CH1currentRoomTemp", deserialize_with = "scalar")]
    pub current_room_temp: String,
    #[serde(deserialize_with = "scalar")]
    pub frost: String,
    #[serde(rename = "CH1heatOnOffStatus", deserialize_with = "scalar")]
    pub heat_on_off_status: String,
    #[serde(rename = "CH1heatOnOff", deserialize_with = "scalar")]
    pub heat_on_off: String,
    #[serde(rename = "HWonOffStatus", deserialize_with = "scalar")]
    pub hot_water_on_off_status: String,
}

impl fmt::Display for DeviceValues {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "set_point={}, room_temp={}, frost={}, heat_status={}, heat_off={}, hot_water={}",
            self.current_set_point,
            self.current_room_temp,
            self.frost,
            self.heat_on_off_status,
            self.heat_on_off,
            self.hot_water_on_off_status
        )
    }
}
