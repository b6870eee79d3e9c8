//! Scheduling options for activities, child workflows and continue-as-new

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options for scheduling an activity
///
/// `None` fields are left out of the decision, deferring to the defaults
/// registered with the activity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Task list to schedule on
    pub task_list: Option<String>,

    /// Priority (higher values are dispatched first)
    pub priority: Option<i32>,

    /// Maximum time to wait for a worker to pick the task up
    #[serde(with = "option_duration_serde")]
    pub schedule_to_start_timeout: Option<Duration>,

    /// Maximum time from scheduling to completion
    #[serde(with = "option_duration_serde")]
    pub schedule_to_close_timeout: Option<Duration>,

    /// Maximum time for a single execution
    #[serde(with = "option_duration_serde")]
    pub start_to_close_timeout: Option<Duration>,

    /// Heartbeat interval for long-running activities
    #[serde(with = "option_duration_serde")]
    pub heartbeat_timeout: Option<Duration>,
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task list
    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the schedule-to-start timeout
    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = Some(timeout);
        self
    }

    /// Set the schedule-to-close timeout
    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    /// Set the start-to-close timeout
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = Some(timeout);
        self
    }

    /// Enable heartbeating with the specified timeout
    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

/// Options for starting a child workflow or continuing as new
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOptions {
    pub task_list: Option<String>,
    pub priority: Option<i32>,

    #[serde(with = "option_duration_serde")]
    pub execution_start_to_close_timeout: Option<Duration>,

    #[serde(with = "option_duration_serde")]
    pub task_start_to_close_timeout: Option<Duration>,

    /// What happens to children when the parent closes (`TERMINATE`, `ABANDON`, ...)
    pub child_policy: Option<String>,

    pub tag_list: Vec<String>,

    /// Continue-as-new only: run the new execution under another type version
    pub workflow_type_version: Option<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_start_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_start_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_child_policy(mut self, policy: impl Into<String>) -> Self {
        self.child_policy = Some(policy.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_list.push(tag.into());
        self
    }

    pub fn with_workflow_type_version(mut self, version: impl Into<String>) -> Self {
        self.workflow_type_version = Some(version.into());
        self
    }
}

/// Serde support for Option<Duration> (as milliseconds)
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
