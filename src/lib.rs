use aws_lambda_events::apigw::{
    ApiGatewayProxyRequest, ApiGatewayProxyResponse, ApiGatewayV2httpRequest,
    ApiGatewayV2httpResponse,
};
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::clients::Clients;
use crate::process::BulkLookupPublisher;
use crate::pubsub::TopicName;
use crate::trigger::{BusTrigger, HttpTrigger};

pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod payload;
pub mod process;
pub mod pubsub;
pub mod storage;
pub mod trigger;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

/// What the function hands back to the runtime: an HTTP response for HTTP
/// triggers, nothing for bus triggers.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Http(ApiGatewayProxyResponse),
    HttpV2(ApiGatewayV2httpResponse),
    Ack,
}

// lambda handler
pub async fn handler(
    clients: &Clients,
    topic: &TopicName,
    evt: LambdaEvent<events::Combined>,
) -> Result<Response, Error> {
    info!("Handling lambda invocation");
    debug!("Request id: {}", evt.context.request_id);

    let publisher = BulkLookupPublisher::new(clients, topic);
    match evt.payload {
        events::Combined::Http(events::HttpRequest::V1(request)) => {
            let trigger = HttpTrigger::<ApiGatewayProxyRequest>::new();
            let response = publisher.invoke(&trigger, request).await?;
            Ok(Response::Http(response))
        }
        events::Combined::Http(events::HttpRequest::V2(request)) => {
            let trigger = HttpTrigger::<ApiGatewayV2httpRequest>::new();
            let response = publisher.invoke(&trigger, request).await?;
            Ok(Response::HttpV2(response))
        }
        events::Combined::Bus(message) => {
            publisher.invoke(&BusTrigger, message).await?;
            Ok(Response::Ack)
        }
    }
}
