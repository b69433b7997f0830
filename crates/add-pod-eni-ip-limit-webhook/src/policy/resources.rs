use std::collections::BTreeMap;

use crate::{
    cni::CniKind,
    constants::{DIRECT_ENI_RESOURCE, ENI_IP_RESOURCE},
};

/// Maps the effective CNI of a Pod to the extended resource it consumes.
///
/// CNIs without an entry leave the Pod untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceMapping(BTreeMap<CniKind, String>);

impl ResourceMapping {
    pub fn new(entries: impl IntoIterator<Item = (CniKind, String)>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn resource_for(&self, cni: CniKind) -> Option<&str> {
        self.0.get(&cni).map(String::as_str)
    }
}

impl Default for ResourceMapping {
    fn default() -> Self {
        Self::new([
            (CniKind::RouteEni, ENI_IP_RESOURCE.to_owned()),
            (CniKind::DirectEni, DIRECT_ENI_RESOURCE.to_owned()),
        ])
    }
}
