//! Classification of CNI delegate names.
use crate::constants::{TKE_BRIDGE, TKE_DIRECT_ENI, TKE_ROUTE_ENI};

/// The CNI plugin serving a Pod's primary network.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
)]
pub enum CniKind {
    #[strum(serialize = "tke-route-eni")]
    #[value(name = "tke-route-eni")]
    RouteEni,
    #[strum(serialize = "tke-direct-eni")]
    #[value(name = "tke-direct-eni")]
    DirectEni,
    #[strum(serialize = "tke-bridge")]
    #[value(name = "tke-bridge")]
    Bridge,
    #[strum(serialize = "other")]
    #[value(name = "other")]
    Other,
    #[strum(serialize = "unknown")]
    #[value(name = "unknown")]
    Unknown,
}

impl CniKind {
    /// Classifies the `defaultDelegates` value of the multus configuration.
    ///
    /// Precedence is `RouteEni > DirectEni > Bridge`, anything else is
    /// [`CniKind::Other`].
    pub fn from_default_delegates(default_delegates: &str) -> Self {
        if default_delegates.contains(TKE_ROUTE_ENI) {
            Self::RouteEni
        } else if default_delegates.contains(TKE_DIRECT_ENI) {
            Self::DirectEni
        } else if default_delegates.contains(TKE_BRIDGE) {
            Self::Bridge
        } else {
            Self::Other
        }
    }

    /// Classifies a Pod `networks` annotation.
    ///
    /// Direct ENI wins over route ENI when both are named. An annotation
    /// naming neither is [`CniKind::Other`].
    pub fn from_networks_annotation(networks: &str) -> Self {
        if networks.contains(TKE_DIRECT_ENI) {
            Self::DirectEni
        } else if networks.contains(TKE_ROUTE_ENI) {
            Self::RouteEni
        } else {
            Self::Other
        }
    }
}
