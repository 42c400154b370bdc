use std::fmt;

use lambda_runtime::Error;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::clients::Clients;
use crate::error::LookupError;
use crate::payload::{bulk_lookup_payload, PtoLookup};
use crate::pubsub::TopicName;
use crate::trigger::TriggerAdapter;

/// Progress of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Queried,
    Built,
    Published,
    Acknowledged,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Queried => "queried",
            Stage::Built => "built",
            Stage::Published => "published",
            Stage::Acknowledged => "acknowledged",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage tracking for the current invocation, mirrored onto its span.
struct Progress {
    stage: Stage,
}

impl Progress {
    fn start() -> Self {
        let mut progress = Progress {
            stage: Stage::Received,
        };
        progress.advance(Stage::Received);
        progress
    }

    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        Span::current().record("stage", stage.as_str());
        debug!("stage {}", stage);
    }
}

/// Loads every PTO record and publishes the bulk lookup event to the
/// dashboard topic. Shared by every trigger kind.
pub struct BulkLookupPublisher<'a> {
    clients: &'a Clients,
    topic: &'a TopicName,
}

impl<'a> BulkLookupPublisher<'a> {
    pub fn new(clients: &'a Clients, topic: &'a TopicName) -> Self {
        BulkLookupPublisher { clients, topic }
    }

    /// Runs one invocation for `input` and reports the outcome through
    /// `trigger`.
    pub async fn invoke<T: TriggerAdapter>(&self, trigger: &T, input: T::Input) -> Result<T::Output, Error> {
        let span = info_span!("bulk_pto_lookup", trigger = T::NAME, stage = field::Empty);
        async move {
            let mut progress = Progress::start();
            let outcome = match trigger.decode(input) {
                Ok(content) => {
                    progress.advance(Stage::Validated);
                    info!("Received bulk PTO lookup request.");
                    info!("Payload: {}", content);
                    self.lookup_and_publish(&mut progress).await
                }
                Err(err) => {
                    warn!("Trigger rejected: {}", err);
                    Err(err)
                }
            };

            match &outcome {
                Ok(_) => progress.advance(Stage::Acknowledged),
                Err(LookupError::InvalidMethod(_)) | Err(LookupError::MissingPayload) => {}
                Err(err) => {
                    let failed_at = progress.stage;
                    progress.advance(Stage::Failed);
                    error!(error = ?err, stage = %failed_at, "Error during bulk PTO lookup: {}", err);
                }
            }

            trigger.report(outcome)
        }
        .instrument(span)
        .await
    }

    /// Query, build, publish and wait for the acknowledgment. Returns the
    /// summary message.
    async fn lookup_and_publish(&self, progress: &mut Progress) -> Result<String, LookupError> {
        let records = self.clients.repository.fetch_all().await?;
        progress.advance(Stage::Queried);

        let payload = bulk_lookup_payload(PtoLookup::from_records(records));
        info!("{}", payload.message);
        let data = serde_json::to_vec(&payload)?;
        progress.advance(Stage::Built);

        let message_id = self.clients.publisher.publish(self.topic, data).await?;
        progress.advance(Stage::Published);
        info!("Published dashboard update {} to {}.", message_id, self.topic);

        Ok(payload.message)
    }
}
