// Data shapes exchanged with the Canary API: the deployment tiers, the
// PEO (Patient Engagement Opportunity) submitted for selection, and the
// selection and version records handed back to callers.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

/// Canary deployment tier the client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Ci,
    Qa,
    Uat,
    Ppe,
    Stg,
    #[default]
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 8] = [
        Environment::Dev,
        Environment::Test,
        Environment::Ci,
        Environment::Qa,
        Environment::Uat,
        Environment::Ppe,
        Environment::Stg,
        Environment::Prod,
    ];

    /// Parse a tier name, failing with a configuration error for anything
    /// outside the known set.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::Configuration(format!("invalid/unknown environment: {name:?}")))
    }

    /// Unversioned API root for this tier. The negotiated protocol path is
    /// appended by the client after the version handshake.
    pub fn base_url(self) -> String {
        match self {
            Environment::Prod => "https://api.canary.md/api".to_string(),
            Environment::Dev => "http://api-dev.canary.md:8899/api".to_string(),
            other => format!("https://api-{other}.canary.md/api"),
        }
    }
}

/// How a PEO is delivered to its recipient.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    Site,
    Email,
    Paper,
    Sms,
    Voice,
}

impl Transport {
    pub const ALL: [Transport; 5] = [
        Transport::Site,
        Transport::Email,
        Transport::Paper,
        Transport::Sms,
        Transport::Voice,
    ];

    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::Configuration(format!("invalid/unknown transport: {name:?}")))
    }
}

/// Intent of a PEO relative to the patient's circumstance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Purpose {
    Discover,
    Prepare,
    Augment,
    Extend,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [
        Purpose::Discover,
        Purpose::Prepare,
        Purpose::Augment,
        Purpose::Extend,
    ];

    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::Configuration(format!("invalid/unknown purpose: {name:?}")))
    }
}

/// Patient Engagement Opportunity: the communication to be rendered.
///
/// Only `transport` and `purpose` are checked locally. `recipient` and
/// `appointment` (attribute maps or HL7-serialized strings) and the
/// `width`/`height` pixel hints are sent exactly as given, explicit nulls
/// included. Any other attribute is kept in `extra` and sent alongside the
/// named fields; `extra` must not repeat the named keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Peo {
    pub transport: Transport,
    pub purpose: Purpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<Value>,
    /// Pixel hint; documented as required for paper, validated server-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Peo {
    pub fn new(transport: Transport, purpose: Purpose) -> Self {
        Self {
            transport,
            purpose,
            recipient: None,
            appointment: None,
            width: None,
            height: None,
            extra: Map::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<Value>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_appointment(mut self, appointment: impl Into<Value>) -> Self {
        self.appointment = Some(appointment.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width.into());
        self.height = Some(height.into());
        self
    }

    /// Set any attribute by its wire name. Named attributes land in their
    /// field, so `transport` and `purpose` are validated here.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "transport" => self.transport = Transport::parse(&value_name(value))?,
            "purpose" => self.purpose = Purpose::parse(&value_name(value))?,
            "recipient" => self.recipient = Some(value),
            "appointment" => self.appointment = Some(value),
            "width" => self.width = Some(value),
            "height" => self.height = Some(value),
            _ => {
                self.extra.insert(key, value);
            }
        }
        Ok(self)
    }
}

impl TryFrom<Value> for Peo {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(Error::Configuration("PEO must be a JSON object".into()));
        };

        let transport = map.remove("transport").unwrap_or_default();
        let transport = Transport::parse(&value_name(transport))?;
        let purpose = map.remove("purpose").unwrap_or_default();
        let purpose = Purpose::parse(&value_name(purpose))?;
        let recipient = map.remove("recipient");
        let appointment = map.remove("appointment");
        let width = map.remove("width");
        let height = map.remove("height");

        Ok(Self {
            transport,
            purpose,
            recipient,
            appointment,
            width,
            height,
            extra: map,
        })
    }
}

// Non-string values are rendered as JSON so the error names what was sent.
fn value_name(value: Value) -> String {
    match value {
        Value::String(name) => name,
        other => other.to_string(),
    }
}

/// Ids are opaque: servers may send them as strings or numbers.
fn opaque_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or numeric id, found {other}"
        ))),
    }
}

/// One message contained in a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionItem {
    #[serde(deserialize_with = "opaque_id")]
    pub channel_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The result of a message selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Unique identifier for this selection.
    pub id: String,
    /// Transport-specific rendering: HTML for site and email, plain text
    /// for sms.
    pub content: String,
    /// Itemized messages contained in `content`.
    pub items: Vec<SelectionItem>,
}

#[derive(Deserialize)]
struct SelectionEnvelope {
    selection: SelectionHeader,
    content: String,
    selectionitems: Vec<SelectionItem>,
}

#[derive(Deserialize)]
struct SelectionHeader {
    #[serde(deserialize_with = "opaque_id")]
    id: String,
}

impl Selection {
    /// Build from a full selection response body whose `selection` is
    /// known to be non-null.
    pub(crate) fn from_response(body: Value) -> Result<Self> {
        let envelope: SelectionEnvelope = serde_json::from_value(body)
            .map_err(|e| Error::Protocol(format!("malformed selection response: {e}")))?;
        Ok(Self {
            id: envelope.selection.id,
            content: envelope.content,
            items: envelope.selectionitems,
        })
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.channel_id.as_str()).collect()
    }
}

/// Protocol versions agreed during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Negotiated API tag, `v1` or `v2`.
    pub api: String,
    /// Version the server reported, if any.
    pub server: Option<String>,
    /// This client's own version.
    pub client: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_environment_resolves_a_base_url() {
        for env in Environment::ALL {
            let url = env.base_url();
            assert!(url.ends_with("/api"), "{env}: {url}");
            assert_eq!(Environment::parse(env.as_ref()).unwrap(), env);
        }
        assert_eq!(Environment::Prod.base_url(), "https://api.canary.md/api");
        assert_eq!(Environment::Dev.base_url(), "http://api-dev.canary.md:8899/api");
        assert_eq!(Environment::Stg.base_url(), "https://api-stg.canary.md/api");
    }

    #[test]
    fn unknown_environment_is_configuration_error() {
        let err = Environment::parse("production").unwrap_err();
        assert!(err.is_configuration());
        assert!(Environment::parse("PROD").is_err());
    }

    #[test]
    fn peo_from_json_keeps_extra_attributes() {
        let peo = Peo::try_from(json!({
            "transport": "paper",
            "purpose": "prepare",
            "recipient": "PID|1||123",
            "width": 600,
            "height": 800,
            "locale": "en-US",
        }))
        .unwrap();

        assert_eq!(peo.transport, Transport::Paper);
        assert_eq!(peo.purpose, Purpose::Prepare);
        assert_eq!(peo.recipient, Some(json!("PID|1||123")));
        assert_eq!(peo.width, Some(json!(600)));
        assert_eq!(peo.height, Some(json!(800)));
        assert_eq!(peo.extra.get("locale"), Some(&json!("en-US")));
    }

    #[test]
    fn peo_rejects_unknown_transport_and_purpose() {
        let err = Peo::try_from(json!({"transport": "fax", "purpose": "discover"})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: invalid/unknown transport: \"fax\""
        );

        let err = Peo::try_from(json!({"transport": "sms"})).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("purpose"));
    }

    #[test]
    fn peo_forwards_dimensions_and_nulls_verbatim() {
        let raw = json!({
            "transport": "paper",
            "purpose": "discover",
            "recipient": null,
            "width": 612.0,
            "height": "792",
        });
        let peo = Peo::try_from(raw.clone()).unwrap();

        assert_eq!(peo.width, Some(json!(612.0)));
        assert_eq!(peo.height, Some(json!("792")));
        assert_eq!(peo.recipient, Some(Value::Null));
        assert_eq!(serde_json::to_value(&peo).unwrap(), raw);
    }

    #[test]
    fn with_attribute_routes_named_keys() {
        let peo = Peo::new(Transport::Site, Purpose::Discover)
            .with_attribute("transport", "sms")
            .unwrap()
            .with_attribute("recipient", "PID|1||123")
            .unwrap()
            .with_attribute("width", 8.5)
            .unwrap();

        assert_eq!(peo.transport, Transport::Sms);
        assert!(peo.extra.is_empty());
        assert_eq!(
            serde_json::to_value(&peo).unwrap(),
            json!({
                "transport": "sms",
                "purpose": "discover",
                "recipient": "PID|1||123",
                "width": 8.5,
            })
        );

        let err = Peo::new(Transport::Site, Purpose::Discover)
            .with_attribute("purpose", "remind")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn peo_serializes_wire_names() {
        let peo = Peo::new(Transport::Sms, Purpose::Augment)
            .with_recipient(json!({"phone": "555-0100"}))
            .with_attribute("locale", "en-US")
            .unwrap();

        assert_eq!(
            serde_json::to_value(&peo).unwrap(),
            json!({
                "transport": "sms",
                "purpose": "augment",
                "recipient": {"phone": "555-0100"},
                "locale": "en-US",
            })
        );
    }

    #[test]
    fn selection_requires_expected_keys() {
        let selection = Selection::from_response(json!({
            "selection": {"id": "3f1c"},
            "content": "<p>hi</p>",
            "selectionitems": [{"channel_id": "c1", "weight": 2}, {"channel_id": "c2"}],
        }))
        .unwrap();
        assert_eq!(selection.id, "3f1c");
        assert_eq!(selection.channel_ids(), vec!["c1", "c2"]);

        let numeric = Selection::from_response(json!({
            "selection": {"id": 9021},
            "content": "reminder",
            "selectionitems": [{"channel_id": 17}],
        }))
        .unwrap();
        assert_eq!(numeric.id, "9021");
        assert_eq!(numeric.channel_ids(), vec!["17"]);

        let err = Selection::from_response(json!({"selection": {"id": "3f1c"}})).unwrap_err();
        assert!(err.is_protocol());
    }
}
