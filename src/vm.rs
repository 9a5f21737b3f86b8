//! Creating and finding a job's VirtualMachineInstance
//!
//! Every instance carries a single identity label, `{LABEL_PREFIX}/id=<job id>`.
//! Creation uses `generateName`, so the label is the only stable way to find
//! the instance again.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::client::InstanceApi;
use crate::crd::{
    ContainerDiskSource, Devices, Disk, DomainSpec, Machine, ResourceRequirements,
    VirtualMachineInstance, VirtualMachineInstanceSpec, Volume,
};
use crate::job::JobContext;
use crate::Error;
use crate::ID_LABEL;

/// Name shared by the root disk and its backing volume
const ROOT_DISK: &str = "root";

/// Label selector matching exactly the instance of the given job
pub fn selector(job_id: &str) -> String {
    format!("{}={}", ID_LABEL, job_id)
}

/// Assemble the instance definition for a job
///
/// The image is the only mandatory field; everything else may be absent.
pub fn build_instance(
    job: &JobContext,
    resources: ResourceRequirements,
) -> Result<VirtualMachineInstance, Error> {
    let image = job
        .image
        .as_deref()
        .filter(|image| !image.is_empty())
        .ok_or_else(|| Error::MissingImage {
            job_id: job.id.clone(),
        })?;

    let metadata = ObjectMeta {
        generate_name: Some(job.base_name.clone()).filter(|n| !n.is_empty()),
        namespace: Some(job.namespace.clone()).filter(|n| !n.is_empty()),
        labels: Some(BTreeMap::from([(ID_LABEL.to_string(), job.id.clone())])),
        ..Default::default()
    };

    let spec = VirtualMachineInstanceSpec {
        domain: DomainSpec {
            resources,
            machine: Some(Machine {
                type_: job.machine_type.clone(),
            })
            .filter(|m| !m.type_.is_empty()),
            devices: Devices {
                disks: vec![Disk {
                    name: ROOT_DISK.to_string(),
                }],
            },
        },
        volumes: vec![Volume {
            name: ROOT_DISK.to_string(),
            container_disk: Some(ContainerDiskSource {
                image: image.to_string(),
                image_pull_policy: non_empty(&job.image_pull_policy),
                image_pull_secret: non_empty(&job.image_pull_secret),
            }),
        }],
    };

    Ok(VirtualMachineInstance {
        metadata,
        spec,
        status: None,
    })
}

/// Create the job's instance
///
/// Not idempotent: every call creates a new instance, so callers must invoke
/// this at most once per job ID.
#[instrument(skip_all, fields(job_id = %job.id, namespace = %job.namespace))]
pub async fn create_job_vm<A: InstanceApi + ?Sized>(
    api: &A,
    job: &JobContext,
    resources: ResourceRequirements,
) -> Result<VirtualMachineInstance, Error> {
    let instance = build_instance(job, resources)?;

    info!("Creating virtual machine instance");
    let created = api
        .create(&job.namespace, &instance)
        .await
        .map_err(|source| Error::Submission {
            job_id: job.id.clone(),
            source,
        })?;

    info!(instance = %created.name_any(), "Virtual machine instance created");
    Ok(created)
}

/// Find the instance created for a job
///
/// Only called after a successful create, so zero matches means the instance
/// was deleted behind our back, and several matches means job IDs are not
/// unique. Both are fatal.
#[instrument(skip_all, fields(job_id = %job.id, namespace = %job.namespace))]
pub async fn find_job_vm<A: InstanceApi + ?Sized>(
    api: &A,
    job: &JobContext,
) -> Result<VirtualMachineInstance, Error> {
    let mut items = api
        .list(&job.namespace, &selector(&job.id))
        .await
        .map_err(|source| Error::Lookup {
            job_id: job.id.clone(),
            source,
        })?;

    match items.len() {
        0 => Err(Error::InstanceVanished {
            job_id: job.id.clone(),
        }),
        1 => Ok(items.remove(0)),
        count => Err(Error::AmbiguousIdentity {
            job_id: job.id.clone(),
            count,
        }),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}
