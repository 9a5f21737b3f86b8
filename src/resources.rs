//! Resource requirements for the job's virtual machine
//!
//! Turns the job's raw quantity strings into the requests/limits maps of a
//! VirtualMachineInstance. Unset strings produce no entry at all, so "nothing
//! declared" stays distinguishable from "declared as zero".

use std::fmt;

use crate::crd::ResourceRequirements;
use crate::job::JobContext;
use crate::quantity::parse_quantity;
use crate::Error;

/// Resource names the runner knows how to request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// CPU cores (`cpu`)
    Cpu,
    /// Memory (`memory`)
    Memory,
    /// Node-local scratch space (`ephemeral-storage`)
    EphemeralStorage,
}

impl ResourceKind {
    /// Kubernetes resource name used as the map key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::EphemeralStorage => "ephemeral-storage",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the requirements a quantity belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceList {
    /// Guaranteed amount
    Requests,
    /// Upper bound
    Limits,
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requests => f.write_str("requests"),
            Self::Limits => f.write_str("limits"),
        }
    }
}

/// Build resource requirements from the job's quantity strings
///
/// Fails on the first malformed quantity; no partially filled requirements are
/// ever returned.
pub fn build_resources(job: &JobContext) -> Result<ResourceRequirements, Error> {
    let slots = [
        (ResourceList::Requests, ResourceKind::Cpu, &job.cpu_request),
        (ResourceList::Limits, ResourceKind::Cpu, &job.cpu_limit),
        (ResourceList::Requests, ResourceKind::Memory, &job.memory_request),
        (ResourceList::Limits, ResourceKind::Memory, &job.memory_limit),
        (
            ResourceList::Requests,
            ResourceKind::EphemeralStorage,
            &job.ephemeral_storage_request,
        ),
        (
            ResourceList::Limits,
            ResourceKind::EphemeralStorage,
            &job.ephemeral_storage_limit,
        ),
    ];

    let mut resources = ResourceRequirements::default();
    for (list, kind, value) in slots {
        let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        let quantity = parse_quantity(value).map_err(|reason| Error::QuantityParse {
            list,
            kind,
            value: value.to_string(),
            reason,
        })?;
        let target = match list {
            ResourceList::Requests => &mut resources.requests,
            ResourceList::Limits => &mut resources.limits,
        };
        target.insert(kind.as_str().to_string(), quantity);
    }

    Ok(resources)
}
