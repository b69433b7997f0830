//! Resolves the cluster default CNI from the CNI agent ConfigMap.
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};

use crate::{
    client::ClusterClient,
    cni::CniKind,
    constants::{CNI_CONFIG_MAP_KEY, CNI_CONFIG_MAP_NAME, CNI_CONFIG_MAP_NAMESPACE},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "key {key:?} of ConfigMap {namespace}/{name} does not contain valid multus JSON"
    ))]
    MalformedConfig {
        source: serde_json::Error,
        namespace: String,
        name: String,
        key: String,
    },

    #[snafu(display("ConfigMap {namespace}/{name} does not exist"))]
    ConfigMapMissing { namespace: String, name: String },

    #[snafu(display(
        "failed to resolve the default CNI after {attempts} attempts, last problem: {last_problem}"
    ))]
    RetryBudgetExhausted { attempts: u32, last_problem: String },
}

/// What to do when the CNI ConfigMap does not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OnConfigMapMissing {
    /// Assume the cluster uses the route ENI CNI.
    #[default]
    TreatAsRouteEni,
    /// Keep polling like for any other transient problem.
    Retry,
    /// Fail immediately.
    Fail,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    pub namespace: String,
    pub name: String,
    pub key: String,

    /// Delay between polls while the ConfigMap or its key is missing, and the
    /// initial delay after a failed read.
    pub poll_interval: Duration,

    /// Upper bound for the delay after consecutive failed reads.
    pub max_backoff: Duration,

    /// Number of reads before giving up. `None` polls forever.
    pub max_attempts: Option<u32>,

    pub on_config_map_missing: OnConfigMapMissing,

    /// Returned instead of an error once `max_attempts` is exhausted.
    pub fallback: Option<CniKind>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            namespace: CNI_CONFIG_MAP_NAMESPACE.to_owned(),
            name: CNI_CONFIG_MAP_NAME.to_owned(),
            key: CNI_CONFIG_MAP_KEY.to_owned(),
            poll_interval: Duration::from_secs(3),
            max_backoff: Duration::from_secs(60),
            max_attempts: None,
            on_config_map_missing: OnConfigMapMissing::default(),
            fallback: None,
        }
    }
}

/// The relevant part of the multus configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultusConfig {
    #[serde(default)]
    default_delegates: String,
}

/// Outcome of a single read that did not produce a [`CniKind`].
enum Retry {
    /// The ConfigMap or key is not there (yet).
    Poll(String),
    /// The read itself failed.
    Backoff(String),
}

pub struct ClusterConfigReader<'a, C> {
    client: &'a C,
    options: ReaderOptions,
}

impl<'a, C: ClusterClient> ClusterConfigReader<'a, C> {
    pub fn new(client: &'a C, options: ReaderOptions) -> Self {
        Self { client, options }
    }

    /// Polls the ConfigMap until the default CNI can be classified.
    ///
    /// Malformed JSON fails immediately. Failed reads are retried with an
    /// exponential backoff starting at the poll interval. Once the attempt
    /// budget is used up the configured fallback is returned, or an error if
    /// there is none.
    #[instrument(
        skip(self),
        fields(
            k8s.configmap.namespace = %self.options.namespace,
            k8s.configmap.name = %self.options.name,
        )
    )]
    pub async fn resolve_default_cni(&self) -> Result<CniKind, Error> {
        let mut attempts = 0u32;
        let mut backoff = self.options.poll_interval;

        loop {
            attempts += 1;
            let (delay, problem) = match self.read_once().await? {
                Ok(cni) => {
                    info!(cni.default = %cni, attempts, "resolved default CNI");
                    return Ok(cni);
                }
                Err(Retry::Poll(problem)) => {
                    backoff = self.options.poll_interval;
                    (self.options.poll_interval, problem)
                }
                Err(Retry::Backoff(problem)) => {
                    let delay = backoff;
                    backoff = backoff.saturating_mul(2).min(self.options.max_backoff);
                    (delay, problem)
                }
            };

            if self
                .options
                .max_attempts
                .is_some_and(|max_attempts| attempts >= max_attempts)
            {
                return match self.options.fallback {
                    Some(fallback) => {
                        warn!(
                            cni.fallback = %fallback,
                            attempts,
                            last_problem = %problem,
                            "retry budget exhausted, using fallback CNI"
                        );
                        Ok(fallback)
                    }
                    None => RetryBudgetExhaustedSnafu {
                        attempts,
                        last_problem: problem,
                    }
                    .fail(),
                };
            }

            debug!(attempts, retry_in = ?delay, %problem, "default CNI not resolved yet");
            tokio::time::sleep(delay).await;
        }
    }

    /// Reads the ConfigMap once. The outer error is fatal, the inner one asks
    /// for another attempt.
    async fn read_once(&self) -> Result<Result<CniKind, Retry>, Error> {
        let ReaderOptions {
            namespace,
            name,
            key,
            ..
        } = &self.options;

        let config_map = match self
            .client
            .get::<ConfigMap>(Some(namespace), name)
            .await
        {
            Ok(Some(config_map)) => config_map,
            Ok(None) => {
                return match self.options.on_config_map_missing {
                    OnConfigMapMissing::TreatAsRouteEni => {
                        info!("CNI ConfigMap does not exist, treating route ENI as default");
                        Ok(Ok(CniKind::RouteEni))
                    }
                    OnConfigMapMissing::Fail => ConfigMapMissingSnafu { namespace, name }.fail(),
                    OnConfigMapMissing::Retry => Ok(Err(Retry::Poll(format!(
                        "ConfigMap {namespace}/{name} does not exist"
                    )))),
                };
            }
            Err(error) => {
                warn!(%error, "failed to read CNI ConfigMap");
                return Ok(Err(Retry::Backoff(error.to_string())));
            }
        };

        let Some(raw) = config_map.data.as_ref().and_then(|data| data.get(key)) else {
            return Ok(Err(Retry::Poll(format!(
                "no {key:?} key found in ConfigMap {namespace}/{name}"
            ))));
        };

        let multus: MultusConfig =
            serde_json::from_str(raw).context(MalformedConfigSnafu { namespace, name, key })?;
        let cni = CniKind::from_default_delegates(&multus.default_delegates);
        if cni == CniKind::Other {
            warn!(
                default_delegates = %multus.default_delegates,
                "no known CNI in defaultDelegates"
            );
        }

        Ok(Ok(cni))
    }
}
