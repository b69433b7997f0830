//! The cluster access the webhook needs: read, create and replace a handful
//! of object kinds and query the API server version.
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        admissionregistration::v1::MutatingWebhookConfiguration,
        core::v1::{ConfigMap, Secret},
    },
    apimachinery::pkg::version::Info,
};
use kube::{Api, Resource, ResourceExt, api::PostParams};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};

/// Object kinds a [`ClusterClient`] can handle.
pub trait ClusterObject:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
    /// Returns an [`Api`] scoped to `namespace`. Cluster scoped kinds ignore
    /// the namespace.
    fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self>;
}

impl ClusterObject for ConfigMap {
    fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }
}

impl ClusterObject for Secret {
    fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }
}

impl ClusterObject for MutatingWebhookConfiguration {
    fn api(client: kube::Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

fn namespaced_api<K>(client: kube::Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::default_namespaced(client),
    }
}

/// Cluster access consumed by the CNI reader and the identity reconciler.
///
/// A missing object is `Ok(None)` from [`ClusterClient::get`], never an
/// error. Replacing an object whose `resourceVersion` is stale must fail with
/// a conflict instead of overwriting.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, Self::Error>;

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, Self::Error>;

    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, Self::Error>;

    async fn server_version(&self) -> Result<Info, Self::Error>;
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {kind} {name:?}"))]
    GetObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to replace {kind} {name:?}"))]
    ReplaceObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("{kind} object has no name"))]
    MissingObjectName { kind: String },

    #[snafu(display("failed to query the API server version"))]
    GetServerVersion { source: kube::Error },
}

/// [`ClusterClient`] backed by a [`kube::Client`]. Writes are attributed to
/// the given field manager.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
    post_params: PostParams,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.into()),
                ..PostParams::default()
            },
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> kube::Client {
        self.client.clone()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    type Error = Error;

    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, Error> {
        K::api(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetObjectSnafu {
                kind: K::kind(&()),
                name,
            })
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, Error> {
        let name = object_name(object)?;
        K::api(self.client.clone(), object.namespace().as_deref())
            .create(&self.post_params, object)
            .await
            .context(CreateObjectSnafu {
                kind: K::kind(&()),
                name,
            })
    }

    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, Error> {
        let name = object_name(object)?;
        K::api(self.client.clone(), object.namespace().as_deref())
            .replace(&name, &self.post_params, object)
            .await
            .with_context(|_| ReplaceObjectSnafu {
                kind: K::kind(&()),
                name: &name,
            })
    }

    async fn server_version(&self) -> Result<Info, Error> {
        self.client
            .apiserver_version()
            .await
            .context(GetServerVersionSnafu)
    }
}

fn object_name<K: ClusterObject>(object: &K) -> Result<String, Error> {
    object.meta().name.clone().context(MissingObjectNameSnafu {
        kind: K::kind(&()),
    })
}
