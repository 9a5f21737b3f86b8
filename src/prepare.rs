//! Preparing a job's execution environment
//!
//! Merges the job with the configured defaults, creates its instance, confirms
//! the instance can be found by its identity label and waits for it to become
//! ready. One create and one watch per call; nothing is retried.

use std::time::Duration;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::client::InstanceApi;
use crate::job::{JobContext, JobDefaults};
use crate::readiness::{wait_for_ready, ReadyInstance};
use crate::resources::build_resources;
use crate::vm::{create_job_vm, find_job_vm};
use crate::Error;

/// Default upper bound on the wait for readiness
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Cluster-wide settings for preparing jobs
#[derive(Clone, Debug)]
pub struct PrepareConfig {
    /// Values for job fields the job leaves unset
    pub defaults: JobDefaults,
    /// How long to wait for the instance to become ready
    pub timeout: Duration,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            defaults: JobDefaults::default(),
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Provision the job's instance and block until it is reachable
///
/// Must be called at most once per job ID: a second call creates a second
/// instance, after which lookups by ID fail as ambiguous.
#[instrument(skip_all, fields(job_id = %job.id))]
pub async fn prepare<A: InstanceApi + ?Sized>(
    api: &A,
    job: JobContext,
    config: &PrepareConfig,
    cancel: &CancellationToken,
) -> Result<ReadyInstance, Error> {
    let job = job.with_defaults(&config.defaults);
    let resources = build_resources(&job)?;

    let created = create_job_vm(api, &job, resources).await?;
    let located = find_job_vm(api, &job).await?;
    let name = located.name_any();
    info!(
        created = %created.name_any(),
        instance = %name,
        "Waiting for virtual machine instance to be ready"
    );

    wait_for_ready(api, &job, &name, config.timeout, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use futures::stream::{self, StreamExt};
    use kube::runtime::watcher::{self, Event};

    use crate::client::MockInstanceApi;
    use crate::crd::{
        VirtualMachineInstance, VirtualMachineInstanceCondition,
        VirtualMachineInstanceNetworkInterface, VirtualMachineInstanceStatus, CONDITION_READY,
        STATUS_TRUE,
    };
    use crate::vm::selector;
    use crate::ID_LABEL;

    fn ready(mut vmi: VirtualMachineInstance, ip: &str) -> VirtualMachineInstance {
        vmi.status = Some(VirtualMachineInstanceStatus {
            phase: Some("Running".to_string()),
            interfaces: vec![VirtualMachineInstanceNetworkInterface {
                ip_address: Some(ip.to_string()),
                ..Default::default()
            }],
            conditions: vec![VirtualMachineInstanceCondition {
                type_: CONDITION_READY.to_string(),
                status: STATUS_TRUE.to_string(),
                reason: None,
                message: None,
            }],
            ..Default::default()
        });
        vmi
    }

    /// Mock cluster that stores what was created and then reports it ready
    fn healthy_cluster() -> (MockInstanceApi, Arc<Mutex<Option<VirtualMachineInstance>>>) {
        let stored: Arc<Mutex<Option<VirtualMachineInstance>>> = Arc::new(Mutex::new(None));
        let mut api = MockInstanceApi::new();

        let on_create = stored.clone();
        api.expect_create().times(1).returning(move |_, vmi| {
            let mut created = vmi.clone();
            created.metadata.name = Some("runner-x7k2p".to_string());
            *on_create.lock().unwrap() = Some(created.clone());
            Ok(created)
        });

        let on_list = stored.clone();
        api.expect_list()
            .withf(|_, sel| sel == selector("abc"))
            .times(1)
            .returning(move |_, _| Ok(on_list.lock().unwrap().iter().cloned().collect()));

        let on_watch = stored.clone();
        api.expect_watch().times(1).returning(move |_, _| {
            let created = on_watch.lock().unwrap().clone().unwrap();
            let events: Vec<Result<Event<VirtualMachineInstance>, watcher::Error>> = vec![
                Ok(Event::Init),
                Ok(Event::InitApply(created.clone())),
                Ok(Event::InitDone),
                Ok(Event::Apply(ready(created, "10.244.3.8"))),
            ];
            stream::iter(events).chain(stream::pending()).boxed()
        });

        (api, stored)
    }

    /// Story: a job that only declares memory gets the cluster's CPU default,
    /// keeps its own memory request and is labelled with its ID
    #[tokio::test(start_paused = true)]
    async fn story_end_to_end_job_with_defaults() {
        let (api, stored) = healthy_cluster();
        let job = JobContext {
            image: Some("disk:v1".to_string()),
            cpu_request: Some(String::new()),
            memory_request: Some("2Gi".to_string()),
            namespace: "ci".to_string(),
            base_name: "runner-".to_string(),
            ..JobContext::new("abc")
        };
        let config = PrepareConfig {
            defaults: JobDefaults {
                cpu_request: Some("1".to_string()),
                ..JobDefaults::empty()
            },
            ..Default::default()
        };

        let outcome = prepare(&api, job, &config, &CancellationToken::new())
            .await
            .expect("prepare should succeed");

        assert_eq!(outcome.ip, "10.244.3.8");
        assert_eq!(outcome.instance.name_any(), "runner-x7k2p");

        let created = stored.lock().unwrap().clone().unwrap();
        let requests = &created.spec.domain.resources.requests;
        assert_eq!(requests.get("cpu").map(|q| q.0.as_str()), Some("1"));
        assert_eq!(requests.get("memory").map(|q| q.0.as_str()), Some("2Gi"));
        assert!(created.spec.domain.resources.limits.is_empty());
        assert_eq!(
            created
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(ID_LABEL))
                .map(String::as_str),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn default_image_is_used_when_job_has_none() {
        let (api, stored) = healthy_cluster();
        let config = PrepareConfig {
            defaults: JobDefaults {
                image: Some("registry.example.com/ci/base:1".to_string()),
                ..JobDefaults::default()
            },
            ..Default::default()
        };

        prepare(&api, JobContext::new("abc"), &config, &CancellationToken::new())
            .await
            .unwrap();

        let created = stored.lock().unwrap().clone().unwrap();
        let disk = created.spec.volumes[0].container_disk.as_ref().unwrap();
        assert_eq!(disk.image, "registry.example.com/ci/base:1");
        let limits = &created.spec.domain.resources.limits;
        assert_eq!(limits.get("memory").map(|q| q.0.as_str()), Some("1Gi"));
    }

    /// Story: invalid job input fails before anything touches the cluster
    #[tokio::test]
    async fn story_invalid_input_creates_nothing() {
        let mut api = MockInstanceApi::new();
        api.expect_create().times(0);
        api.expect_list().times(0);
        api.expect_watch().times(0);

        let no_image = prepare(
            &api,
            JobContext::new("abc"),
            &PrepareConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(no_image, Err(Error::MissingImage { .. })));

        let bad_quantity = prepare(
            &api,
            JobContext {
                image: Some("disk:v1".to_string()),
                memory_limit: Some("lots".to_string()),
                ..JobContext::new("abc")
            },
            &PrepareConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(bad_quantity, Err(Error::QuantityParse { .. })));
    }

    #[tokio::test]
    async fn vanished_instance_stops_before_watching() {
        let mut api = MockInstanceApi::new();
        api.expect_create()
            .times(1)
            .returning(|_, vmi| Ok(vmi.clone()));
        api.expect_list().times(1).returning(|_, _| Ok(vec![]));
        api.expect_watch().times(0);

        let job = JobContext {
            image: Some("disk:v1".to_string()),
            ..JobContext::new("abc")
        };
        let result = prepare(&api, job, &PrepareConfig::default(), &CancellationToken::new()).await;

        match result {
            Err(e @ Error::InstanceVanished { .. }) => assert!(e.is_identity_violation()),
            other => panic!("expected InstanceVanished, got {:?}", other),
        }
    }

    #[test]
    fn default_timeout_is_one_hour() {
        assert_eq!(PrepareConfig::default().timeout, Duration::from_secs(3600));
    }
}
