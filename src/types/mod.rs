use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event type emitted when a variable evaluates to a served value.
pub const AGG_VARIABLE_EVALUATED: &str = "aggVariableEvaluated";

/// Event type emitted when a variable falls back to its default.
pub const AGG_VARIABLE_DEFAULTED: &str = "aggVariableDefaulted";

/// The subject an event is recorded against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "user_id")]
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub custom_data: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub private_custom_data: HashMap<String, serde_json::Value>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn custom_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }

    pub fn private_custom_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.private_custom_data.insert(key.into(), value.into());
        self
    }
}

/// A usage or evaluation event.
///
/// Events are immutable once handed to the engine; the builder methods
/// consume and return the event so one can be assembled inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event kind (e.g. "purchase", "aggVariableEvaluated").
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub meta_data: HashMap<String, serde_json::Value>,

    pub date: DateTime<Utc>,

    /// Actor the event belongs to when it differs from the tracking call's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
}

impl Event {
    /// Create a custom event of the given kind, stamped with the current time.
    pub fn custom(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            value: None,
            meta_data: HashMap::new(),
            date: Utc::now(),
            actor: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn meta_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta_data.insert(key.into(), value.into());
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// Feature and variation a variable was served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariation {
    #[serde(rename = "_feature")]
    pub feature: String,

    #[serde(rename = "_variation")]
    pub variation: String,
}

/// A previously computed evaluation result that aggregate events are
/// counted against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default)]
    pub variable_variation_map: HashMap<String, FeatureVariation>,
}

impl BucketedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(
        mut self,
        variable_key: impl Into<String>,
        feature: impl Into<String>,
        variation: impl Into<String>,
    ) -> Self {
        self.variable_variation_map.insert(
            variable_key.into(),
            FeatureVariation {
                feature: feature.into(),
                variation: variation.into(),
            },
        );
        self
    }
}

/// A batch of serialized events drained from an engine.
///
/// Only engines construct payloads; the queue just moves them to the
/// dispatcher and reports the outcome under `payload_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushPayload {
    pub payload_id: String,
    pub records: Vec<serde_json::Value>,
    #[serde(default)]
    pub event_count: usize,
}

/// Request body for `POST /v1/events/batch`.
#[derive(Debug, Serialize)]
pub struct BatchEventsBody<'a> {
    pub batch: &'a [serde_json::Value],
}

/// Request body for the unbatched `POST /v1/track` call.
#[derive(Debug, Serialize)]
pub struct UserDataAndEventsBody<'a> {
    pub user: &'a Actor,
    pub events: Vec<&'a Event>,
}

/// Error body returned by the remote API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_type_and_skips_empty_fields() {
        let event = Event::custom("purchase").target("checkout").value(9.5);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], json!("purchase"));
        assert_eq!(value["target"], json!("checkout"));
        assert_eq!(value["value"], json!(9.5));
        assert!(value.get("metaData").is_none());
        assert!(value.get("actor").is_none());
        assert!(value.get("date").is_some());
    }

    #[test]
    fn test_actor_serialization() {
        let actor = Actor::new("user-1")
            .email("a@example.com")
            .custom_data("plan", "pro");
        let value = serde_json::to_value(&actor).unwrap();

        assert_eq!(value["user_id"], json!("user-1"));
        assert_eq!(value["email"], json!("a@example.com"));
        assert_eq!(value["customData"]["plan"], json!("pro"));
        assert!(value.get("privateCustomData").is_none());
    }

    #[test]
    fn test_batch_body_shape() {
        let records = vec![json!({"user": {"user_id": "u"}, "events": []})];
        let body = BatchEventsBody { batch: &records };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["batch"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_bucketed_config_variable_map() {
        let config = BucketedConfig::new().with_variable("show-banner", "feat-1", "var-a");
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value["variableVariationMap"]["show-banner"],
            json!({"_feature": "feat-1", "_variation": "var-a"})
        );
    }
}
