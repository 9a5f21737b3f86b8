//! Cluster API access for VirtualMachineInstances
//!
//! The provisioning flow only ever needs three calls: create, list by label and
//! watch by label. They sit behind [`InstanceApi`] so the flow can be driven by
//! a mock in tests and by kube-rs in production.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::VirtualMachineInstance;
use crate::Error;

/// Live change-event subscription for instances
///
/// One logical subscription: server-side watch expiries are resumed from the
/// last seen resource version without ending the stream. Dropping the stream
/// ends the server-side watch session.
pub type InstanceEvents =
    BoxStream<'static, Result<watcher::Event<VirtualMachineInstance>, watcher::Error>>;

/// Trait abstracting the cluster calls made for a job's instance
///
/// Errors are returned as raw kube-rs errors; callers attach job context.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Create an instance, returning it as stored by the server
    async fn create(
        &self,
        namespace: &str,
        instance: &VirtualMachineInstance,
    ) -> Result<VirtualMachineInstance, kube::Error>;

    /// List instances matching a label selector
    async fn list(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<VirtualMachineInstance>, kube::Error>;

    /// Subscribe to instances matching a label selector
    ///
    /// Nothing is sent to the server until the stream is first polled; a
    /// failure to start surfaces as the first item.
    fn watch(&self, namespace: &str, selector: &str) -> InstanceEvents;
}

/// [`InstanceApi`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeInstanceApi {
    client: Client,
}

impl KubeInstanceApi {
    /// Wrap an authenticated client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachineInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl InstanceApi for KubeInstanceApi {
    async fn create(
        &self,
        namespace: &str,
        instance: &VirtualMachineInstance,
    ) -> Result<VirtualMachineInstance, kube::Error> {
        self.api(namespace)
            .create(&PostParams::default(), instance)
            .await
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<VirtualMachineInstance>, kube::Error> {
        let list = self
            .api(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    fn watch(&self, namespace: &str, selector: &str) -> InstanceEvents {
        debug!(namespace, selector, "opening instance watch");
        watcher(self.api(namespace), watch_config(selector))
            .default_backoff()
            .boxed()
    }
}

/// Watcher settings for a label-scoped instance subscription
///
/// The initial list replays current state (any resource version), so an
/// instance that became ready before the watch started is still seen.
fn watch_config(selector: &str) -> watcher::Config {
    watcher::Config::default().labels(selector).any_semantic()
}

/// Default connection timeout for the cluster client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout for the cluster client
///
/// Unset so the watch can stay open for the whole wait.
pub const DEFAULT_READ_TIMEOUT: Option<Duration> = None;

/// Create a client from an explicit kubeconfig, or discover one
///
/// Discovery tries the in-cluster service account first, then `$KUBECONFIG`
/// and `~/.kube/config`.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => {
            discover_config(Config::incluster, || async {
                Config::from_kubeconfig(&KubeConfigOptions::default()).await
            })
            .await?
        }
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = DEFAULT_READ_TIMEOUT;

    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}

/// Prefer the in-cluster config; fall back to the kubeconfig only without one
async fn discover_config<E1, E2, F, Fut>(
    in_cluster: impl FnOnce() -> Result<Config, E1>,
    kubeconfig: F,
) -> Result<Config, Error>
where
    E1: fmt::Display,
    E2: fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Config, E2>>,
{
    match in_cluster() {
        Ok(config) => {
            debug!("using in-cluster service account");
            Ok(config)
        }
        Err(in_cluster_err) => {
            debug!(error = %in_cluster_err, "not running in-cluster, loading kubeconfig");
            kubeconfig().await.map_err(|e| {
                Error::config(format!(
                    "no in-cluster config ({}) and no usable kubeconfig ({})",
                    in_cluster_err, e
                ))
            })
        }
    }
}
