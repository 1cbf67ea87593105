//! Kernel configuration
//!
//! Limits for the kernel tables and the IPC engine. Built from defaults and
//! optionally overridden by `key=value` tokens on the boot command line,
//! e.g. `log=debug ipc.max_msg=1024 ipc.queue=4`.

use log::LevelFilter;

use crate::types::Priority;

// ============================================================================
// Defaults
// ============================================================================

/// Default maximum number of live processes
pub const DEFAULT_MAX_PROCESSES: usize = 64;
/// Default maximum number of threads (live and stopped-but-unreaped)
pub const DEFAULT_MAX_THREADS: usize = 256;
/// Default per-process channel table size
pub const DEFAULT_MAX_CHANNELS: usize = 32;
/// Default per-process connection table size
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
/// Default largest user payload a channel may accept
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;
/// Default depth of a channel's asynchronous mailbox
pub const DEFAULT_ASYNC_QUEUE_DEPTH: usize = 8;
/// Default longest public pathname
pub const DEFAULT_MAX_PATHNAME: usize = 64;
/// Default number of priority levels
pub const DEFAULT_PRIORITY_LEVELS: usize = 32;
/// Default thread priority
pub const DEFAULT_PRIORITY: Priority = 16;

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("limit `{0}` must be non-zero")]
    ZeroLimit(&'static str),
    #[error("priority levels must be between 1 and 256")]
    BadPriorityLevels,
    #[error("default priority is outside the priority range")]
    BadDefaultPriority,
    #[error("unknown boot option")]
    UnknownOption,
    #[error("malformed value for boot option")]
    BadValue,
}

/// Kernel-wide limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_processes: usize,
    pub max_threads: usize,
    pub max_channels_per_process: usize,
    pub max_connections_per_process: usize,
    pub max_message_size: usize,
    pub async_queue_depth: usize,
    pub max_pathname_len: usize,
    pub priority_levels: usize,
    pub default_priority: Priority,
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_threads: DEFAULT_MAX_THREADS,
            max_channels_per_process: DEFAULT_MAX_CHANNELS,
            max_connections_per_process: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            async_queue_depth: DEFAULT_ASYNC_QUEUE_DEPTH,
            max_pathname_len: DEFAULT_MAX_PATHNAME,
            priority_levels: DEFAULT_PRIORITY_LEVELS,
            default_priority: DEFAULT_PRIORITY,
            log_level: LevelFilter::Info,
        }
    }
}

impl KernelConfig {
    /// Check the limits are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_processes", self.max_processes),
            ("max_threads", self.max_threads),
            ("max_channels_per_process", self.max_channels_per_process),
            ("max_connections_per_process", self.max_connections_per_process),
            ("max_message_size", self.max_message_size),
            ("async_queue_depth", self.async_queue_depth),
            ("max_pathname_len", self.max_pathname_len),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        if self.priority_levels == 0 || self.priority_levels > 256 {
            return Err(ConfigError::BadPriorityLevels);
        }
        if self.default_priority as usize >= self.priority_levels {
            return Err(ConfigError::BadDefaultPriority);
        }
        Ok(())
    }

    /// Highest valid priority
    pub fn max_priority(&self) -> Priority {
        (self.priority_levels - 1) as Priority
    }

    /// Build a configuration from a boot command line
    ///
    /// Tokens without `=` and tokens outside the `log`/`ipc.`/`kern.`
    /// namespaces belong to other subsystems and are skipped.
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "log" => self.log_level = parse_level(value)?,
            "kern.procs" => self.max_processes = parse_usize(value)?,
            "kern.threads" => self.max_threads = parse_usize(value)?,
            "kern.prio_levels" => self.priority_levels = parse_usize(value)?,
            "kern.prio" => {
                self.default_priority = value.parse().map_err(|_| ConfigError::BadValue)?
            }
            "ipc.channels" => self.max_channels_per_process = parse_usize(value)?,
            "ipc.connections" => self.max_connections_per_process = parse_usize(value)?,
            "ipc.max_msg" => self.max_message_size = parse_usize(value)?,
            "ipc.queue" => self.async_queue_depth = parse_usize(value)?,
            "ipc.path_len" => self.max_pathname_len = parse_usize(value)?,
            k if k.starts_with("ipc.") || k.starts_with("kern.") => {
                return Err(ConfigError::UnknownOption)
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_usize(value: &str) -> Result<usize, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue)
}

fn parse_level(value: &str) -> Result<LevelFilter, ConfigError> {
    match value {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(ConfigError::BadValue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = KernelConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_priority(), 31);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config = KernelConfig {
            async_queue_depth: 0,
            ..KernelConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit("async_queue_depth"))
        );
    }

    #[test]
    fn test_default_priority_range() {
        let config = KernelConfig {
            priority_levels: 8,
            default_priority: 8,
            ..KernelConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::BadDefaultPriority));
    }

    #[test]
    fn test_cmdline_overrides() {
        let config =
            KernelConfig::from_cmdline("console=ttyAMA0 log=debug ipc.max_msg=1024 ipc.queue=2 quiet")
                .unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.async_queue_depth, 2);
        assert_eq!(config.max_threads, DEFAULT_MAX_THREADS);
    }

    #[test]
    fn test_cmdline_errors() {
        assert_eq!(
            KernelConfig::from_cmdline("ipc.bogus=1"),
            Err(ConfigError::UnknownOption)
        );
        assert_eq!(
            KernelConfig::from_cmdline("ipc.max_msg=lots"),
            Err(ConfigError::BadValue)
        );
        assert_eq!(
            KernelConfig::from_cmdline("ipc.queue=0"),
            Err(ConfigError::ZeroLimit("async_queue_depth"))
        );
    }
}
