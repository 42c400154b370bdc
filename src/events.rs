use std::collections::HashMap;

use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayV2httpRequest};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Every event shape the function can be invoked with.
#[derive(Debug)]
pub enum Combined {
    Http(HttpRequest),
    Bus(BusMessage),
}

/// HTTP events, by API Gateway payload format.
#[derive(Debug)]
pub enum HttpRequest {
    /// REST API proxy integration (payload format 1.0).
    V1(ApiGatewayProxyRequest),
    /// HTTP API payload format 2.0, also used by function URLs.
    V2(ApiGatewayV2httpRequest),
}

/// A Pub/Sub message as delivered to the function.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    /// Base64 encoded JSON text.
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
}

/// Wrapper used by Pub/Sub push subscriptions.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: BusMessage,
    pub subscription: Option<String>,
}

impl<'de> Deserialize<'de> for Combined {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;
        debug!("raw_value: {:?}", raw_value);

        let Some(object) = raw_value.as_object() else {
            return Err(de::Error::custom(format!(
                "unsupported event type: {raw_value}"
            )));
        };

        if object.contains_key("httpMethod") {
            let event = ApiGatewayProxyRequest::deserialize(&raw_value).map_err(de::Error::custom)?;
            tracing::info!("http event detected");
            return Ok(Combined::Http(HttpRequest::V1(event)));
        }

        if raw_value.pointer("/requestContext/http/method").is_some() {
            let event = ApiGatewayV2httpRequest::deserialize(&raw_value).map_err(de::Error::custom)?;
            tracing::info!("http v2 event detected");
            return Ok(Combined::Http(HttpRequest::V2(event)));
        }

        if object.get("message").is_some_and(Value::is_object) {
            let envelope = PushEnvelope::deserialize(&raw_value).map_err(de::Error::custom)?;
            tracing::info!(
                "pubsub push event detected for subscription {:?}",
                envelope.subscription
            );
            return Ok(Combined::Bus(envelope.message));
        }

        // only shapes that carry a pubsub message field count as bus events
        if ["data", "attributes", "messageId"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            let message = BusMessage::deserialize(&raw_value).map_err(de::Error::custom)?;
            tracing::info!("pubsub event detected");
            return Ok(Combined::Bus(message));
        }

        Err(de::Error::custom(format!(
            "unsupported event type: {raw_value}"
        )))
    }
}
