//! Capability catalog: which extension kinds the cluster serves, and under which resource.
//!
//! `discover` builds a fresh binding map and swaps it in atomically, so `lookup` never
//! blocks and never sees a half-built map.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::kube::{ClusterApi, Gvk, Gvr, KubeError};

/// API groups served by aggregated (non-CRD) API servers that tools depend on.
pub const AGGREGATED_GROUPS: &[&str] = &[
    "metrics.k8s.io",
    "subresources.kubevirt.io",
    "snapshot.storage.k8s.io",
];

pub type Bindings = HashMap<Gvk, Gvr>;

pub struct CapabilityCatalog {
    api: Arc<dyn ClusterApi>,
    bindings: ArcSwap<Bindings>,
    refresh: tokio::sync::Mutex<()>,
}

impl CapabilityCatalog {
    /// An empty catalog; every lookup misses until [`discover`](Self::discover) succeeds.
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            bindings: ArcSwap::from_pointee(Bindings::new()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Query the extension index and replace the binding map. Absent extensions are not
    /// errors; only a failure to list definitions is.
    pub async fn discover(&self) -> Result<(), KubeError> {
        let mut bindings = Bindings::new();

        for crd in self.api.list_crds().await? {
            for version in &crd.served_versions {
                bindings.insert(
                    Gvk::new(&crd.group, version, &crd.kind),
                    Gvr::new(&crd.group, version, &crd.plural, crd.namespaced),
                );
            }
        }

        match self.api.server_groups().await {
            Ok(groups) => {
                for group in groups
                    .iter()
                    .filter(|g| AGGREGATED_GROUPS.contains(&g.name.as_str()))
                {
                    let group_version = format!("{}/{}", group.name, group.preferred_version);
                    match self.api.group_resources(&group_version).await {
                        Ok(resources) => {
                            for resource in resources {
                                bindings
                                    .entry(Gvk::new(
                                        &group.name,
                                        &group.preferred_version,
                                        &resource.kind,
                                    ))
                                    .or_insert_with(|| {
                                        Gvr::new(
                                            &group.name,
                                            &group.preferred_version,
                                            &resource.name,
                                            resource.namespaced,
                                        )
                                    });
                            }
                        }
                        Err(e) => {
                            tracing::warn!(group = %group_version, error = %e, "skipping API group discovery");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "aggregated API discovery failed"),
        }

        tracing::debug!(bindings = bindings.len(), "capability discovery complete");
        self.bindings.store(Arc::new(bindings));
        Ok(())
    }

    /// Re-run discovery. Concurrent callers share one upstream pass.
    pub async fn refresh(&self) -> Result<(), KubeError> {
        let before = self.bindings.load_full();
        let _guard = self.refresh.lock().await;
        if !Arc::ptr_eq(&before, &self.bindings.load_full()) {
            return Ok(());
        }
        self.discover().await
    }

    pub fn lookup(&self, gvk: &Gvk) -> Option<Gvr> {
        self.bindings.load().get(gvk).cloned()
    }

    pub fn contains(&self, gvk: &Gvk) -> bool {
        self.bindings.load().contains_key(gvk)
    }

    /// The current binding map.
    pub fn snapshot(&self) -> Arc<Bindings> {
        self.bindings.load_full()
    }
}
