//! In-memory [`ClusterClient`] used by unit tests.
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::client::{ClusterClient, ClusterObject};

#[derive(Debug, Snafu)]
pub enum FakeError {
    #[snafu(display("{kind} {name:?} already exists"))]
    AlreadyExists { kind: String, name: String },

    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: String, name: String },

    #[snafu(display(
        "conflict on {kind} {name:?}: stored resourceVersion {stored:?}, sent {sent:?}"
    ))]
    Conflict {
        kind: String,
        name: String,
        stored: Option<String>,
        sent: Option<String>,
    },

    #[snafu(display("injected failure for {kind} {name:?}"))]
    Injected { kind: String, name: String },

    #[snafu(display("object has no name"))]
    MissingName,

    #[snafu(display("failed to (de)serialize object"))]
    Serde { source: serde_json::Error },
}

type ObjectKey = (String, Option<String>, String);

/// Stores objects as JSON and assigns increasing resource versions, the way
/// the API server does for optimistic concurrency.
#[derive(Default)]
pub struct FakeClusterClient {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    calls: Mutex<Vec<String>>,
    failing_gets: AtomicU32,
    version: Info,
}

impl FakeClusterClient {
    pub fn with_server_version(major: &str, minor: &str) -> Self {
        Self {
            version: Info {
                major: major.to_owned(),
                minor: minor.to_owned(),
                git_version: format!("v{major}.{minor}.0"),
                platform: "linux/amd64".to_owned(),
                ..Info::default()
            },
            ..Self::default()
        }
    }

    /// Stores `object` as if it had been created earlier.
    pub fn insert<K: ClusterObject>(&self, object: &K) {
        let mut object = object.clone();
        object
            .meta_mut()
            .resource_version
            .get_or_insert_with(|| "1".to_owned());
        let key = key_of(&object).expect("object must have a name");
        let value = serde_json::to_value(&object).expect("object must serialize");
        self.objects.lock().unwrap().insert(key, value);
    }

    pub fn object<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = (K::kind(&()).into_owned(), namespace.map(str::to_owned), name.to_owned());
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).expect("stored object must parse"))
    }

    pub fn remove<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) {
        let key = (K::kind(&()).into_owned(), namespace.map(str::to_owned), name.to_owned());
        self.objects.lock().unwrap().remove(&key);
    }

    /// Makes the next `count` calls to `get` fail.
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Returns the calls made so far, e.g. `create Secret`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, verb: &str, kind: &str) {
        self.calls.lock().unwrap().push(format!("{verb} {kind}"));
    }
}

fn key_of<K: ClusterObject>(object: &K) -> Result<ObjectKey, FakeError> {
    Ok((
        K::kind(&()).into_owned(),
        object.namespace(),
        object.meta().name.clone().context(MissingNameSnafu)?,
    ))
}

fn bump(resource_version: Option<&str>) -> String {
    let current = resource_version
        .and_then(|version| version.parse::<u64>().ok())
        .unwrap_or_default();
    (current + 1).to_string()
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    type Error = FakeError;

    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, FakeError> {
        let kind = K::kind(&()).into_owned();
        self.record("get", &kind);

        let failing = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return InjectedSnafu { kind, name }.fail();
        }

        let key = (kind, namespace.map(str::to_owned), name.to_owned());
        let value = self.objects.lock().unwrap().get(&key).cloned();
        value
            .map(|value| serde_json::from_value(value).context(SerdeSnafu))
            .transpose()
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, FakeError> {
        let key = key_of(object)?;
        self.record("create", &key.0);

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return AlreadyExistsSnafu {
                kind: key.0,
                name: key.2,
            }
            .fail();
        }

        let mut created = object.clone();
        created.meta_mut().resource_version = Some(bump(None));
        objects.insert(key, serde_json::to_value(&created).context(SerdeSnafu)?);
        Ok(created)
    }

    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, FakeError> {
        let key = key_of(object)?;
        self.record("replace", &key.0);

        let mut objects = self.objects.lock().unwrap();
        let stored = objects.get(&key).context(NotFoundSnafu {
            kind: &key.0,
            name: &key.2,
        })?;
        let stored_version = stored["metadata"]["resourceVersion"]
            .as_str()
            .map(str::to_owned);
        let sent_version = object.resource_version();
        if stored_version != sent_version {
            return ConflictSnafu {
                kind: key.0,
                name: key.2,
                stored: stored_version,
                sent: sent_version,
            }
            .fail();
        }

        let mut replaced = object.clone();
        replaced.meta_mut().resource_version = Some(bump(stored_version.as_deref()));
        objects.insert(key, serde_json::to_value(&replaced).context(SerdeSnafu)?);
        Ok(replaced)
    }

    async fn server_version(&self) -> Result<Info, FakeError> {
        self.record("version", "ServerVersion");
        Ok(self.version.clone())
    }
}
