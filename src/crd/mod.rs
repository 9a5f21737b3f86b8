//! KubeVirt resource definitions
//!
//! Only the subset of the `kubevirt.io/v1` API the runner reads or writes is
//! modelled; unknown fields in server responses are ignored.

mod vmi;

pub use vmi::{
    ContainerDiskSource, Devices, Disk, DomainSpec, Machine, ResourceRequirements,
    VirtualMachineInstance, VirtualMachineInstanceCondition, VirtualMachineInstanceNetworkInterface,
    VirtualMachineInstanceSpec, VirtualMachineInstanceStatus, Volume, CONDITION_READY,
    STATUS_TRUE,
};
