//! Layer configuration
//!
//! Capacities and limits are fixed when the layer is built. They can be
//! loaded from JSON; any field left out keeps its default.

use crate::select::FdSet;
use logger::LogLevel;
use resources::ResourceTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Malformed configuration: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Limits for one layer instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsalConfig {
    pub max_tasks: usize,
    pub max_queues: usize,
    pub max_count_sems: usize,
    pub max_bin_sems: usize,
    pub max_mutexes: usize,
    /// Files and sockets share this table
    pub max_open_files: usize,
    pub max_timebases: usize,
    pub max_timers: usize,
    /// Object names must be strictly shorter than this
    pub max_api_name: usize,
    /// Longest name the host accepts for its own objects
    pub host_name_len: usize,
    pub queue_max_depth: usize,
    /// Number of distinct host priorities
    pub max_priorities: u16,
    pub timebase_task_stack_size: usize,
    /// Priority of timebase helper tasks (0 is most urgent)
    pub timebase_task_priority: u8,
    /// Backlog used when a bound stream socket starts listening
    pub socket_listen_backlog: usize,
    pub include_network: bool,
    pub log_level: LogLevel,
}

impl Default for OsalConfig {
    fn default() -> Self {
        Self {
            max_tasks: 64,
            max_queues: 64,
            max_count_sems: 20,
            max_bin_sems: 20,
            max_mutexes: 20,
            max_open_files: 50,
            max_timebases: 5,
            max_timers: 5,
            max_api_name: 20,
            host_name_len: 16,
            queue_max_depth: 50,
            max_priorities: 32,
            timebase_task_stack_size: 4096,
            timebase_task_priority: 0,
            socket_listen_backlog: 10,
            include_network: true,
            log_level: LogLevel::Warn,
        }
    }
}

impl OsalConfig {
    /// Parses and validates a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_tasks", self.max_tasks),
            ("max_queues", self.max_queues),
            ("max_count_sems", self.max_count_sems),
            ("max_bin_sems", self.max_bin_sems),
            ("max_mutexes", self.max_mutexes),
            ("max_open_files", self.max_open_files),
            ("max_timebases", self.max_timebases),
            ("max_timers", self.max_timers),
        ];
        for (field, value) in capacities {
            if value == 0 || value > ResourceTable::<()>::MAX_CAPACITY {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!(
                        "{} is outside 1..={}",
                        value,
                        ResourceTable::<()>::MAX_CAPACITY
                    ),
                });
            }
        }
        if self.max_open_files > FdSet::CAPACITY {
            return Err(ConfigError::Invalid {
                field: "max_open_files",
                reason: format!("select sets hold at most {} streams", FdSet::CAPACITY),
            });
        }
        if self.max_api_name < 2 {
            return Err(ConfigError::Invalid {
                field: "max_api_name",
                reason: "must leave room for at least one character".to_string(),
            });
        }
        if self.host_name_len < 4 {
            return Err(ConfigError::Invalid {
                field: "host_name_len",
                reason: "must be at least 4".to_string(),
            });
        }
        if self.max_priorities == 0 || self.max_priorities > 256 {
            return Err(ConfigError::Invalid {
                field: "max_priorities",
                reason: format!("{} is outside 1..=256", self.max_priorities),
            });
        }
        if self.queue_max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_max_depth",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.socket_listen_backlog == 0 {
            return Err(ConfigError::Invalid {
                field: "socket_listen_backlog",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Maps a layer priority (0 most urgent) onto the host's range
    ///
    /// The host treats larger numbers as more urgent.
    pub fn host_priority(&self, priority: u8) -> u8 {
        let step = (256 / u32::from(self.max_priorities.max(1))).max(1);
        let host = (255 - u32::from(priority)) / step;
        host.min(u32::from(u8::MAX)) as u8
    }
}
