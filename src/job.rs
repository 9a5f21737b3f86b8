//! Job description and cluster-wide defaults
//!
//! A [`JobContext`] is what the CI system tells us about one job. Every
//! optional field may be filled from [`JobDefaults`]; values supplied by the job
//! always win. `None` and the empty string both mean "unset", because CI
//! variables that are declared but empty arrive as `""`.

/// Description of one CI job's execution environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobContext {
    /// Job ID; unique among running jobs and the sole key used to find the VM again
    pub id: String,
    /// Prefix for the server-generated instance name
    pub base_name: String,
    /// Namespace the instance is created in
    pub namespace: String,
    /// Emulated machine type; cluster default when empty
    pub machine_type: String,
    /// Containerdisk image reference
    pub image: Option<String>,
    /// Image pull policy
    pub image_pull_policy: Option<String>,
    /// Image pull secret name
    pub image_pull_secret: Option<String>,
    /// CPU request
    pub cpu_request: Option<String>,
    /// CPU limit
    pub cpu_limit: Option<String>,
    /// Memory request
    pub memory_request: Option<String>,
    /// Memory limit
    pub memory_limit: Option<String>,
    /// Ephemeral storage request
    pub ephemeral_storage_request: Option<String>,
    /// Ephemeral storage limit
    pub ephemeral_storage_limit: Option<String>,
}

impl JobContext {
    /// Create a job description with only the ID set
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Fill every unset optional field from `defaults`
    ///
    /// Purely a field-by-field coalesce; nothing is validated here.
    pub fn with_defaults(self, defaults: &JobDefaults) -> Self {
        Self {
            image: coalesce(self.image, &defaults.image),
            image_pull_policy: coalesce(self.image_pull_policy, &defaults.image_pull_policy),
            image_pull_secret: coalesce(self.image_pull_secret, &defaults.image_pull_secret),
            cpu_request: coalesce(self.cpu_request, &defaults.cpu_request),
            cpu_limit: coalesce(self.cpu_limit, &defaults.cpu_limit),
            memory_request: coalesce(self.memory_request, &defaults.memory_request),
            memory_limit: coalesce(self.memory_limit, &defaults.memory_limit),
            ephemeral_storage_request: coalesce(
                self.ephemeral_storage_request,
                &defaults.ephemeral_storage_request,
            ),
            ephemeral_storage_limit: coalesce(
                self.ephemeral_storage_limit,
                &defaults.ephemeral_storage_limit,
            ),
            ..self
        }
    }
}

/// Values used for job fields the job leaves unset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDefaults {
    /// Default containerdisk image
    pub image: Option<String>,
    /// Default image pull policy
    pub image_pull_policy: Option<String>,
    /// Default image pull secret
    pub image_pull_secret: Option<String>,
    /// Default CPU request
    pub cpu_request: Option<String>,
    /// Default CPU limit
    pub cpu_limit: Option<String>,
    /// Default memory request
    pub memory_request: Option<String>,
    /// Default memory limit
    pub memory_limit: Option<String>,
    /// Default ephemeral storage request
    pub ephemeral_storage_request: Option<String>,
    /// Default ephemeral storage limit
    pub ephemeral_storage_limit: Option<String>,
}

impl JobDefaults {
    /// Defaults with nothing set
    pub fn empty() -> Self {
        Self {
            image: None,
            image_pull_policy: None,
            image_pull_secret: None,
            cpu_request: None,
            cpu_limit: None,
            memory_request: None,
            memory_limit: None,
            ephemeral_storage_request: None,
            ephemeral_storage_limit: None,
        }
    }
}

/// One CPU and one GiB of memory, requested and limited; no image
impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            cpu_request: Some("1".to_string()),
            cpu_limit: Some("1".to_string()),
            memory_request: Some("1Gi".to_string()),
            memory_limit: Some("1Gi".to_string()),
            ..Self::empty()
        }
    }
}

fn coalesce(value: Option<String>, default: &Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).or_else(|| default.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_defaults() -> JobDefaults {
        JobDefaults {
            image: Some("registry.example.com/ci/ubuntu:24.04".to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            image_pull_secret: Some("registry-creds".to_string()),
            cpu_request: Some("2".to_string()),
            cpu_limit: Some("4".to_string()),
            memory_request: Some("4Gi".to_string()),
            memory_limit: Some("8Gi".to_string()),
            ephemeral_storage_request: Some("10Gi".to_string()),
            ephemeral_storage_limit: Some("20Gi".to_string()),
        }
    }

    /// Story: a job that declares nothing inherits every default
    #[test]
    fn story_unset_job_inherits_all_defaults() {
        let defaults = full_defaults();
        let job = JobContext::new("1001").with_defaults(&defaults);

        assert_eq!(job.image, defaults.image);
        assert_eq!(job.image_pull_policy, defaults.image_pull_policy);
        assert_eq!(job.image_pull_secret, defaults.image_pull_secret);
        assert_eq!(job.cpu_request, defaults.cpu_request);
        assert_eq!(job.cpu_limit, defaults.cpu_limit);
        assert_eq!(job.memory_request, defaults.memory_request);
        assert_eq!(job.memory_limit, defaults.memory_limit);
        assert_eq!(
            job.ephemeral_storage_request,
            defaults.ephemeral_storage_request
        );
        assert_eq!(job.ephemeral_storage_limit, defaults.ephemeral_storage_limit);
        assert_eq!(job.id, "1001");
    }

    /// Story: anything the job declares beats the cluster default
    #[test]
    fn story_job_values_override_defaults() {
        let job = JobContext {
            image: Some("disk:v2".to_string()),
            memory_limit: Some("16Gi".to_string()),
            ..JobContext::new("1002")
        }
        .with_defaults(&full_defaults());

        assert_eq!(job.image.as_deref(), Some("disk:v2"));
        assert_eq!(job.memory_limit.as_deref(), Some("16Gi"));
        assert_eq!(job.memory_request.as_deref(), Some("4Gi"));
    }

    #[test]
    fn empty_string_counts_as_unset() {
        let job = JobContext {
            cpu_request: Some(String::new()),
            ..JobContext::new("1003")
        }
        .with_defaults(&full_defaults());

        assert_eq!(job.cpu_request.as_deref(), Some("2"));
    }

    #[test]
    fn identity_fields_pass_through_untouched() {
        let job = JobContext {
            base_name: "runner-".to_string(),
            namespace: "ci".to_string(),
            machine_type: "q35".to_string(),
            ..JobContext::new("1004")
        };

        let merged = job.clone().with_defaults(&full_defaults());

        assert_eq!(merged.base_name, job.base_name);
        assert_eq!(merged.namespace, job.namespace);
        assert_eq!(merged.machine_type, job.machine_type);
    }

    #[test]
    fn builtin_defaults_request_one_cpu_and_one_gib() {
        let defaults = JobDefaults::default();
        assert_eq!(defaults.cpu_request.as_deref(), Some("1"));
        assert_eq!(defaults.cpu_limit.as_deref(), Some("1"));
        assert_eq!(defaults.memory_request.as_deref(), Some("1Gi"));
        assert_eq!(defaults.memory_limit.as_deref(), Some("1Gi"));
        assert_eq!(defaults.image, None);
        assert_eq!(defaults.ephemeral_storage_limit, None);
    }
}
