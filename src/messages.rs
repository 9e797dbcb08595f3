use serde::de::{self, Deserializer};
use serde_derive::Deserialize;

/// A bus message exactly as it arrived, before any interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A button press as published by the device bridge.
///
/// Absent fields and JSON `null` both read as the zero value, so only
/// syntactically broken or wrongly typed payloads fail to decode.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    #[serde(rename = "Action", alias = "action", default, deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(rename = "Battery", alias = "battery", default, deserialize_with = "null_as_default")]
    pub battery: u16,
    #[serde(
        rename = "Lastseen",
        alias = "lastseen",
        alias = "last_seen",
        default,
        deserialize_with = "null_as_default"
    )]
    pub last_seen: u64,
    #[serde(
        rename = "Linkquality",
        alias = "linkquality",
        default,
        deserialize_with = "null_as_default"
    )]
    pub link_quality: u16,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: de::Deserialize<'de> + Default,
{
    Ok(<Option<T> as de::Deserialize>::deserialize(deserializer)?.unwrap_or_default())
}

impl DeviceEvent {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// The action this event asks for, if it is one we act on.
    pub fn button_action(&self) -> Option<ButtonAction> {
        ButtonAction::parse(&self.action)
    }

    pub fn notification_text(&self) -> String {
        format!(
            "ding dong! (link quality {}; battery {})",
            self.link_quality, self.battery
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Single,
    Double,
}

impl ButtonAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "single" => Some(ButtonAction::Single),
            "double" => Some(ButtonAction::Double),
            _ => None,
        }
    }
}

impl std::fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ButtonAction::Single => write!(f, "single"),
            ButtonAction::Double => write!(f, "double"),
        }
    }
}
