use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;

use crate::pubsub::{
    GoogleTokenSource, PublishError, StaticToken, TokenSource, TopicName, DEFAULT_ENDPOINT,
};
use crate::storage::is_valid_table_name;

const SECRET_ARN_PREFIX: &str = "arn:aws:secretsmanager:";

pub struct Config {
    pub project_id: String,
    pub dashboard_topic: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub pto_table: String,
    pub pubsub_endpoint: String,
    pub pubsub_emulator: bool,
    /// Overrides the Google credentials found in the environment.
    pub pubsub_access_token: Option<String>,
    pub publish_timeout: Option<Duration>,
}

// keeps the credentials out of the logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("project_id", &self.project_id)
            .field("dashboard_topic", &self.dashboard_topic)
            .field("database_max_connections", &self.database_max_connections)
            .field("pto_table", &self.pto_table)
            .field("pubsub_endpoint", &self.pubsub_endpoint)
            .field("pubsub_emulator", &self.pubsub_emulator)
            .field("pubsub_access_token", &self.pubsub_access_token.as_ref().map(|_| "***"))
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load_from_env() -> Result<Config, String> {
        let pto_table = env::var("PTO_TABLE").unwrap_or("pto".to_string());
        if !is_valid_table_name(&pto_table) {
            return Err(format!("PTO_TABLE is not a valid table name - {}", pto_table));
        }

        // the emulator takes precedence and never wants credentials
        let (pubsub_endpoint, pubsub_emulator, pubsub_access_token) =
            match env::var("PUBSUB_EMULATOR_HOST") {
                Ok(host) if !host.trim().is_empty() => {
                    (format!("http://{}", host.trim()), true, None)
                }
                _ => (
                    env::var("PUBSUB_ENDPOINT").unwrap_or(DEFAULT_ENDPOINT.to_string()),
                    false,
                    env::var("PUBSUB_ACCESS_TOKEN")
                        .ok()
                        .filter(|s| !s.trim().is_empty()),
                ),
            };

        let conf = Config {
            project_id: env::var("PROJECT_ID").unwrap_or("hopkinstimesheetproj".to_string()),
            dashboard_topic: env::var("DASHBOARD_TOPIC").unwrap_or("dashboard-queue".to_string()),
            database_url: env::var("DATABASE_URL")
                .map_err(|e| format!("DATABASE_URL not set - {}", e))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or("5".to_string())
                .parse::<u32>()
                .map_err(|e| format!("Error parsing DATABASE_MAX_CONNECTIONS to u32 - {}", e))?,
            pto_table,
            pubsub_endpoint,
            pubsub_emulator,
            pubsub_access_token,
            publish_timeout: env::var("PUBLISH_TIMEOUT_SECS")
                .ok()
                .map(|s| s.parse::<u64>())
                .transpose()
                .map_err(|e| format!("Error parsing PUBLISH_TIMEOUT_SECS to u64 - {}", e))?
                .map(Duration::from_secs),
        };

        Ok(conf)
    }

    pub fn topic(&self) -> TopicName {
        TopicName::new(&self.project_id, &self.dashboard_topic)
    }

    /// Credentials for publishing: none against the emulator, the configured
    /// token when there is one, otherwise Google application default
    /// credentials.
    pub async fn pubsub_credentials(&self) -> Result<Option<Arc<dyn TokenSource>>, PublishError> {
        if self.pubsub_emulator {
            return Ok(None);
        }
        let credentials: Arc<dyn TokenSource> = match &self.pubsub_access_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(GoogleTokenSource::from_environment().await?),
        };
        Ok(Some(credentials))
    }

    /// Whether any credential is a Secrets Manager reference that has to be
    /// resolved before use.
    pub fn has_secret_references(&self) -> bool {
        is_secret_arn(&self.database_url)
            || self.pubsub_access_token.as_deref().is_some_and(is_secret_arn)
    }

    /// Replaces credentials given as Secrets Manager ARNs with the secret
    /// values.
    pub async fn resolve_secrets(&mut self, aws_config: &SdkConfig) -> Result<(), KeySourceError> {
        if is_secret_arn(&self.database_url) {
            self.database_url = get_secret(aws_config, self.database_url.clone()).await?;
        }
        if let Some(token) = self.pubsub_access_token.clone().filter(|t| is_secret_arn(t)) {
            self.pubsub_access_token = Some(get_secret(aws_config, token).await?);
        }
        Ok(())
    }
}

fn is_secret_arn(value: &str) -> bool {
    value.starts_with(SECRET_ARN_PREFIX)
}

#[derive(thiserror::Error, Debug)]
pub enum KeySourceError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
}

pub async fn get_secret(aws_config: &SdkConfig, secret_id: String) -> Result<String, KeySourceError> {
    let secretsmanager = aws_sdk_secretsmanager::Client::new(aws_config);
    let response = secretsmanager
        .get_secret_value()
        .set_secret_id(Some(secret_id.clone()))
        .send()
        .await
        .map_err(|error| KeySourceError::FailedToAccessSecretsManager {
            secret_id: secret_id.clone(),
            error: error.into_service_error(),
        })?;
    response
        .secret_string
        .ok_or(KeySourceError::MissingSecret { secret_id })
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL_VARS: [&str; 9] = [
        "PROJECT_ID",
        "DASHBOARD_TOPIC",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "PTO_TABLE",
        "PUBSUB_ENDPOINT",
        "PUBSUB_EMULATOR_HOST",
        "PUBSUB_ACCESS_TOKEN",
        "PUBLISH_TIMEOUT_SECS",
    ];

    // every variable unset except the ones given
    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let kvs: Vec<(&str, Option<&str>)> = ALL_VARS
            .iter()
            .map(|key| {
                let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(kvs, f)
    }

    #[test]
    fn test_defaults() {
        let config = with_env(&[("DATABASE_URL", "postgres://localhost/pto")], Config::load_from_env)
            .unwrap();
        assert_eq!(
            config.topic().as_str(),
            "projects/hopkinstimesheetproj/topics/dashboard-queue"
        );
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.pto_table, "pto");
        assert_eq!(config.pubsub_endpoint, DEFAULT_ENDPOINT);
        assert!(!config.pubsub_emulator);
        assert!(config.pubsub_access_token.is_none());
        assert!(config.publish_timeout.is_none());
        assert!(!config.has_secret_references());
    }

    #[test]
    fn test_overrides() {
        let config = with_env(
            &[
                ("PROJECT_ID", "acme"),
                ("DASHBOARD_TOPIC", "hr-dashboard"),
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("DATABASE_MAX_CONNECTIONS", "2"),
                ("PTO_TABLE", "hr.pto"),
                ("PUBSUB_ENDPOINT", "https://pubsub.internal"),
                ("PUBSUB_ACCESS_TOKEN", "token"),
                ("PUBLISH_TIMEOUT_SECS", "15"),
            ],
            Config::load_from_env,
        )
        .unwrap();
        assert_eq!(config.topic().as_str(), "projects/acme/topics/hr-dashboard");
        assert_eq!(config.database_max_connections, 2);
        assert_eq!(config.pto_table, "hr.pto");
        assert_eq!(config.pubsub_endpoint, "https://pubsub.internal");
        assert_eq!(config.pubsub_access_token.as_deref(), Some("token"));
        assert_eq!(config.publish_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_emulator_host_wins() {
        let config = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("PUBSUB_ENDPOINT", "https://pubsub.internal"),
                ("PUBSUB_ACCESS_TOKEN", "token"),
                ("PUBSUB_EMULATOR_HOST", "localhost:8085"),
            ],
            Config::load_from_env,
        )
        .unwrap();
        assert_eq!(config.pubsub_endpoint, "http://localhost:8085");
        assert!(config.pubsub_emulator);
        assert!(config.pubsub_access_token.is_none());
    }

    #[tokio::test]
    async fn test_pubsub_credentials() {
        let emulator = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("PUBSUB_EMULATOR_HOST", "localhost:8085"),
            ],
            Config::load_from_env,
        )
        .unwrap();
        assert!(emulator.pubsub_credentials().await.unwrap().is_none());

        let fixed = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("PUBSUB_ACCESS_TOKEN", "token"),
            ],
            Config::load_from_env,
        )
        .unwrap();
        let credentials = fixed.pubsub_credentials().await.unwrap().unwrap();
        assert_eq!(credentials.token().await.unwrap(), "token");
        assert_eq!(credentials.token().await.unwrap(), "token");
    }

    #[test]
    fn test_invalid_values() {
        let err = with_env(&[], Config::load_from_env).unwrap_err();
        assert!(err.contains("DATABASE_URL"), "{err}");

        let err = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("DATABASE_MAX_CONNECTIONS", "many"),
            ],
            Config::load_from_env,
        )
        .unwrap_err();
        assert!(err.contains("DATABASE_MAX_CONNECTIONS"), "{err}");

        let err = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("PUBLISH_TIMEOUT_SECS", "-1"),
            ],
            Config::load_from_env,
        )
        .unwrap_err();
        assert!(err.contains("PUBLISH_TIMEOUT_SECS"), "{err}");

        let err = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                ("PTO_TABLE", "pto; DROP TABLE pto"),
            ],
            Config::load_from_env,
        )
        .unwrap_err();
        assert!(err.contains("PTO_TABLE"), "{err}");
    }

    #[test]
    fn test_secret_references() {
        let config = with_env(
            &[
                (
                    "DATABASE_URL",
                    "arn:aws:secretsmanager:eu-west-1:123456789012:secret:pto-db",
                ),
            ],
            Config::load_from_env,
        )
        .unwrap();
        assert!(config.has_secret_references());

        let config = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/pto"),
                (
                    "PUBSUB_ACCESS_TOKEN",
                    "arn:aws:secretsmanager:eu-west-1:123456789012:secret:pubsub",
                ),
            ],
            Config::load_from_env,
        )
        .unwrap();
        assert!(config.has_secret_references());
        assert!(!format!("{config:?}").contains("secretsmanager"));
    }
}
