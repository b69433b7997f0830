//! A mutating admission webhook adding the ENI IP extended resource to Pods
//! whose network is served by an ENI based CNI.
//!
//! At startup the cluster default CNI is read from the CNI agent ConfigMap,
//! a self-signed certificate is issued and the Secret and
//! MutatingWebhookConfiguration pointing the API server at the webhook are
//! reconciled. Afterwards every admission request is answered by the
//! [`policy::AdmissionPolicy`] without further cluster access.
pub mod cli;
pub mod client;
pub mod cni;
pub mod config_reader;
pub mod constants;
pub mod http;
pub mod identity;
pub mod policy;

#[cfg(test)]
mod fake_client;
