//! Wire envelopes for requests and replies.
//!
//! Every request and reply is a flat JSON object with a `correlationId`
//! field next to the payload's own fields. Replies may carry a non-null
//! `errorMessage` instead of a payload.

use common::CorrelationId;
use serde::{Deserialize, Serialize};

/// A request as published on a request topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope<T> {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub body: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(correlation_id: CorrelationId, body: T) -> Self {
        Self {
            correlation_id,
            body,
        }
    }
}

/// A reply as published on a response topic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope<T> {
    pub correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub body: Option<T>,
}

impl<T> ReplyEnvelope<T> {
    /// A successful reply.
    pub fn ok(correlation_id: CorrelationId, body: T) -> Self {
        Self {
            correlation_id,
            error_message: None,
            body: Some(body),
        }
    }

    /// A rejection carrying an error message.
    pub fn error(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            error_message: Some(message.into()),
            body: None,
        }
    }
}

/// Routing header extracted from an inbound reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReplyHeader {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PriceRequest {
        product_ids: Vec<String>,
    }

    #[test]
    fn request_fields_are_flattened_next_to_correlation_id() {
        let id = CorrelationId::new();
        let env = RequestEnvelope::new(
            id,
            PriceRequest {
                product_ids: vec!["A".into()],
            },
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({ "correlationId": id.to_string(), "productIds": ["A"] })
        );

        let back: RequestEnvelope<PriceRequest> = serde_json::from_value(value).unwrap();
        assert_eq!(back.correlation_id, id);
        assert_eq!(back.body.product_ids, vec!["A".to_string()]);
    }

    #[test]
    fn error_reply_omits_body() {
        let id = CorrelationId::new();
        let env: ReplyEnvelope<PriceRequest> = ReplyEnvelope::error(id, "nope");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({ "correlationId": id.to_string(), "errorMessage": "nope" })
        );
    }

    #[test]
    fn header_ignores_body_fields() {
        let id = CorrelationId::new();
        let raw = json!({ "correlationId": id.to_string(), "totalPrice": 2000 });
        let header: ReplyHeader = serde_json::from_value(raw).unwrap();
        assert_eq!(header.correlation_id, id);
        assert!(header.error_message.is_none());
    }
}
