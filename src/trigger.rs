//! Adapters turning each trigger kind into one bulk lookup invocation and
//! its outcome back into what the invoking framework expects.

use std::marker::PhantomData;

use aws_lambda_events::apigw::{
    ApiGatewayProxyRequest, ApiGatewayProxyResponse, ApiGatewayV2httpRequest,
    ApiGatewayV2httpResponse,
};
use aws_lambda_events::encodings::Body;
use base64::prelude::*;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use lambda_runtime::Error;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LookupError;
use crate::events::BusMessage;

/// Normalizes a trigger into an invocation and reports its outcome.
pub trait TriggerAdapter {
    type Input;
    type Output;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Validates the trigger and returns its decoded content. The content is
    /// only logged, it never narrows the lookup.
    fn decode(&self, input: Self::Input) -> Result<Value, LookupError>;

    /// Converts the invocation outcome into the framework's response.
    /// Returning `Err` signals a failed invocation to the framework.
    fn report(&self, outcome: Result<String, LookupError>) -> Result<Self::Output, Error>;
}

/// The parts of an API Gateway event the HTTP trigger needs, and how to
/// answer it.
pub trait HttpEvent {
    type Response;

    fn method(&self) -> &Method;
    fn body(&self) -> Option<&str>;
    fn is_base64_encoded(&self) -> bool;
    fn response(status: StatusCode, headers: HeaderMap, body: String) -> Self::Response;
}

impl HttpEvent for ApiGatewayProxyRequest {
    type Response = ApiGatewayProxyResponse;

    fn method(&self) -> &Method {
        &self.http_method
    }

    fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    fn is_base64_encoded(&self) -> bool {
        self.is_base64_encoded
    }

    fn response(status: StatusCode, headers: HeaderMap, body: String) -> ApiGatewayProxyResponse {
        ApiGatewayProxyResponse {
            status_code: i64::from(status.as_u16()),
            headers,
            body: Some(Body::Text(body)),
            ..Default::default()
        }
    }
}

impl HttpEvent for ApiGatewayV2httpRequest {
    type Response = ApiGatewayV2httpResponse;

    fn method(&self) -> &Method {
        &self.request_context.http.method
    }

    fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    fn is_base64_encoded(&self) -> bool {
        self.is_base64_encoded
    }

    fn response(status: StatusCode, headers: HeaderMap, body: String) -> ApiGatewayV2httpResponse {
        ApiGatewayV2httpResponse {
            status_code: i64::from(status.as_u16()),
            headers,
            body: Some(Body::Text(body)),
            ..Default::default()
        }
    }
}

/// API Gateway trigger. Failures become HTTP responses since the caller has
/// no redelivery of its own.
pub struct HttpTrigger<R> {
    event: PhantomData<fn() -> R>,
}

impl<R> HttpTrigger<R> {
    pub fn new() -> Self {
        HttpTrigger { event: PhantomData }
    }
}

impl<R> Default for HttpTrigger<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    message: &'a str,
}

impl<R: HttpEvent> HttpTrigger<R> {
    fn response(status: StatusCode, content_type: &'static str, body: String) -> R::Response {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        R::response(status, headers, body)
    }

    fn json_response(status: StatusCode, body: StatusBody) -> Result<R::Response, Error> {
        Ok(Self::response(
            status,
            "application/json",
            serde_json::to_string(&body)?,
        ))
    }
}

/// Absent, undecodable or non-JSON bodies are all an empty mapping.
fn decode_http_body(body: Option<&str>, is_base64_encoded: bool) -> Value {
    let empty = || Value::Object(Map::new());
    let Some(body) = body else {
        return empty();
    };

    let parsed = if is_base64_encoded {
        BASE64_STANDARD
            .decode(body.trim())
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
    } else {
        serde_json::from_str::<Value>(body).ok()
    };

    match parsed {
        Some(Value::Null) | None => empty(),
        Some(value) => value,
    }
}

impl<R: HttpEvent> TriggerAdapter for HttpTrigger<R> {
    type Input = R;
    type Output = R::Response;

    const NAME: &'static str = "http";

    fn decode(&self, request: R) -> Result<Value, LookupError> {
        if *request.method() != Method::POST {
            return Err(LookupError::InvalidMethod(request.method().clone()));
        }
        Ok(decode_http_body(request.body(), request.is_base64_encoded()))
    }

    fn report(&self, outcome: Result<String, LookupError>) -> Result<R::Response, Error> {
        match outcome {
            Ok(message) => Self::json_response(
                StatusCode::OK,
                StatusBody {
                    status: "success",
                    message: &message,
                },
            ),
            Err(LookupError::InvalidMethod(_)) => Ok(Self::response(
                StatusCode::METHOD_NOT_ALLOWED,
                "text/plain",
                "Method Not Allowed".to_string(),
            )),
            Err(err) => Self::json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusBody {
                    status: "error",
                    message: &err.to_string(),
                },
            ),
        }
    }
}

/// Pub/Sub message trigger. Failures are returned to the platform so the
/// message gets redelivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusTrigger;

impl TriggerAdapter for BusTrigger {
    type Input = BusMessage;
    type Output = ();

    const NAME: &'static str = "pubsub";

    fn decode(&self, message: BusMessage) -> Result<Value, LookupError> {
        debug!(
            "Message id {:?} published at {:?} with attributes {:?}",
            message.message_id, message.publish_time, message.attributes
        );
        let data = message.data.ok_or(LookupError::MissingPayload)?;

        let bytes = BASE64_STANDARD
            .decode(data.trim())
            .map_err(|e| LookupError::InvalidPayload(format!("invalid base64 - {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| LookupError::InvalidPayload(format!("invalid utf-8 - {}", e)))?;
        serde_json::from_str(&text)
            .map_err(|e| LookupError::InvalidPayload(format!("invalid json - {}", e)))
    }

    fn report(&self, outcome: Result<String, LookupError>) -> Result<(), Error> {
        match outcome {
            Ok(_) => Ok(()),
            // nothing to act on, redelivering would not change that
            Err(LookupError::MissingPayload) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
