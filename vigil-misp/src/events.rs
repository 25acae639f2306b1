//! Wire types for MISP responses
//!
//! MISP is loose about scalar types: ids arrive as strings on most versions
//! and as numbers on some, and optional text fields may be `null`.

use serde::{Deserialize, Deserializer};

/// One event as returned by `/events/restSearch`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    /// Creator organisation
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub orgc_id: Option<String>,
    #[serde(rename = "Attribute", default)]
    pub attributes: Vec<RawAttribute>,
    #[serde(rename = "Tag", default)]
    pub tags: Vec<RawTag>,
}

impl RawEvent {
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttribute {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub attr_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub event_id: Option<String>,
}

impl RawAttribute {
    /// Owning event id, falling back to the enclosing event's id
    pub fn event_id_or<'a>(&'a self, event: &'a RawEvent) -> Option<&'a str> {
        self.event_id.as_deref().or(event.id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub name: String,
}

/// Body of a `/events/restSearch` response
#[derive(Debug, Default, Deserialize)]
pub struct RestSearchResponse {
    #[serde(default)]
    pub response: Vec<EventEnvelope>,
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "Event")]
    pub event: RawEvent,
}

/// One entry of `/organisations/index/scope:all`
#[derive(Debug, Deserialize)]
pub struct OrganisationEnvelope {
    #[serde(rename = "Organisation")]
    pub organisation: RawOrganisation,
}

#[derive(Debug, Deserialize)]
pub struct RawOrganisation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(i64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Num(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}
