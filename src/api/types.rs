use serde::{Deserialize, Serialize};

/// Polling hints attached to a connection-info response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polling {
    /// The run has ended and will never become sandboxable again.
    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub sandboxable: bool,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub private_user_key: String,

    #[serde(default)]
    pub public_host_key: String,

    #[serde(default)]
    pub polling: Polling,
}

impl ConnectionInfo {
    pub fn starting(backoff_ms: Option<u64>) -> Self {
        Self {
            polling: Polling {
                completed: false,
                backoff_ms,
            },
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            polling: Polling {
                completed: true,
                backoff_ms: None,
            },
            ..Default::default()
        }
    }

    pub fn ready(address: &str, private_user_key: &str, public_host_key: &str) -> Self {
        Self {
            sandboxable: true,
            address: address.to_string(),
            private_user_key: private_user_key.to_string(),
            public_host_key: public_host_key.to_string(),
            polling: Polling::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartRunRequest {
    pub config_file: String,
    pub config_contents: String,
    pub branch: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStarted {
    pub run_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_url: Option<String>,
}
