use serde::{Deserialize, Serialize};

pub const RUN_PROCESS_QUEUE: &str = "run-process";
pub const RUN_GENERATE_NAME_QUEUE: &str = "run-generate-name";

/// Asks a worker to drive a run forward from its persisted history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProcessMessage {
    pub run_id: String,
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_attempts: Option<u32>,
}

impl RunProcessMessage {
    pub fn new(cluster_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cluster_id: cluster_id.into(),
            lock_attempts: None,
        }
    }

    pub fn lock_key(&self) -> String {
        format!("run-process-{}", self.run_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateNameMessage {
    pub run_id: String,
    pub cluster_id: String,
    pub content: String,
}

impl GenerateNameMessage {
    pub fn lock_key(&self) -> String {
        format!("run-generate-name-{}", self.run_id)
    }
}
