//! VirtualMachineInstance resource (`kubevirt.io/v1`)
//!
//! The CRD itself is owned by KubeVirt, so no schema is generated here.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Condition type reported once the guest is up and its agent is connected
pub const CONDITION_READY: &str = "Ready";

/// Condition status value meaning the condition holds
pub const STATUS_TRUE: &str = "True";

/// Specification for a VirtualMachineInstance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    status = "VirtualMachineInstanceStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Virtual hardware of the guest
    pub domain: DomainSpec,

    /// Volumes referenced by the domain's disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// Virtual hardware description
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// Compute resources for the virt-launcher pod
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Emulated machine type (e.g. `q35`); cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<Machine>,

    /// Attached devices
    #[serde(default)]
    pub devices: Devices,
}

/// Resource requests and limits keyed by resource name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Guaranteed amounts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    /// Upper bounds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
}

/// Emulated machine selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Machine type
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,
}

/// Guest devices
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    /// Disks, each backed by the volume of the same name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,
}

/// A disk attached to the guest
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Name of the backing volume
    pub name: String,
}

/// A volume made available to the guest
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name, referenced by a disk
    pub name: String,

    /// Container image holding the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,
}

/// Disk image shipped as a container image
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    /// Image reference
    pub image: String,

    /// Pull policy (`Always`, `IfNotPresent`, `Never`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Name of a docker-registry secret in the instance's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
}

/// Observed state, written by the KubeVirt control plane
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Lifecycle phase (`Pending`, `Scheduling`, `Running`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Node the instance runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Guest network interfaces, in domain order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VirtualMachineInstanceNetworkInterface>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VirtualMachineInstanceCondition>,
}

/// A guest network interface as reported by KubeVirt
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceNetworkInterface {
    /// Interface name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Primary IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// All IP addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,

    /// MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// A status condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceCondition {
    /// Condition type (e.g. `Ready`)
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VirtualMachineInstanceStatus {
    /// IP address of the first interface, if one has been assigned
    pub fn primary_ip(&self) -> Option<&str> {
        self.interfaces
            .first()
            .and_then(|iface| iface.ip_address.as_deref())
            .filter(|ip| !ip.is_empty())
    }

    /// Returns true if a condition of the given type has status `True`
    pub fn has_condition(&self, condition_type: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == condition_type && c.status == STATUS_TRUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_deserializes_from_kubevirt_json() {
        let json = serde_json::json!({
            "phase": "Running",
            "nodeName": "worker-1",
            "interfaces": [
                {"name": "default", "ipAddress": "10.244.1.17", "ipAddresses": ["10.244.1.17"], "mac": "52:54:00:aa:bb:cc"}
            ],
            "conditions": [
                {"type": "Ready", "status": "True", "lastTransitionTime": null},
                {"type": "LiveMigratable", "status": "False", "reason": "DisksNotLiveMigratable"}
            ],
            "guestOSInfo": {}
        });

        let status: VirtualMachineInstanceStatus = serde_json::from_value(json).unwrap();

        assert_eq!(status.phase.as_deref(), Some("Running"));
        assert_eq!(status.primary_ip(), Some("10.244.1.17"));
        assert!(status.has_condition(CONDITION_READY));
        assert!(!status.has_condition("LiveMigratable"));
    }

    #[test]
    fn primary_ip_ignores_empty_address() {
        let status = VirtualMachineInstanceStatus {
            interfaces: vec![VirtualMachineInstanceNetworkInterface {
                ip_address: Some(String::new()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(status.primary_ip(), None);
    }

    #[test]
    fn spec_serializes_with_kubevirt_field_names() {
        let spec = VirtualMachineInstanceSpec {
            domain: DomainSpec {
                machine: Some(Machine {
                    type_: "q35".to_string(),
                }),
                ..Default::default()
            },
            volumes: vec![Volume {
                name: "root".to_string(),
                container_disk: Some(ContainerDiskSource {
                    image: "quay.io/ci/fedora:40".to_string(),
                    image_pull_policy: Some("IfNotPresent".to_string()),
                    image_pull_secret: None,
                }),
            }],
        };

        let json = serde_json::to_value(&spec).unwrap();

        assert_eq!(json["domain"]["machine"]["type"], "q35");
        assert_eq!(
            json["volumes"][0]["containerDisk"]["imagePullPolicy"],
            "IfNotPresent"
        );
        assert!(json["volumes"][0]["containerDisk"]
            .get("imagePullSecret")
            .is_none());
    }
}
