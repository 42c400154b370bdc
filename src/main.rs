use std::sync::Arc;

use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use pto_bulk_lookup::clients::Clients;
use pto_bulk_lookup::config;
use pto_bulk_lookup::events::Combined;
use pto_bulk_lookup::pubsub::PubSubPublisher;
use pto_bulk_lookup::storage::PgPtoRepository;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    pto_bulk_lookup::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut config = config::Config::load_from_env()?;

    // credentials given as Secrets Manager ARNs are resolved once per cold start
    if config.has_secret_references() {
        let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
        config.resolve_secrets(&aws_config).await?;
    }
    info!("Loaded configuration: {:?}", config);

    let repository = PgPtoRepository::connect_lazy(
        &config.database_url,
        config.database_max_connections,
        &config.pto_table,
    )?;
    let publisher = PubSubPublisher::new(
        &config.pubsub_endpoint,
        config.pubsub_credentials().await?,
        config.publish_timeout,
    )?;
    let clients = Clients::new(Arc::new(repository), Arc::new(publisher));
    let topic = config.topic();

    run(service_fn(|request: LambdaEvent<Combined>| {
        pto_bulk_lookup::handler(&clients, &topic, request)
    }))
    .await
}
