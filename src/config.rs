use std::time::Duration;

/// Configuration for an [`EventLoopGroup`](crate::EventLoopGroup) and the
/// loops it creates.
#[derive(Clone)]
pub struct Config {
    /// Number of event loops. 0 = number of CPUs.
    pub loops: usize,
    /// Capacity of each loop's bounded task queue. Submissions beyond this
    /// fail with `Error::QueueFull` rather than blocking the caller.
    pub task_queue_capacity: usize,
    /// Worker/thread configuration.
    pub worker: WorkerConfig,
    /// Default quiet period for `shutdown_gracefully()`: the loop keeps
    /// running until this much time passes with no task executed.
    pub shutdown_quiet_period: Duration,
    /// Default hard deadline for `shutdown_gracefully()`: the loop stops
    /// draining after this much time even if tasks keep arriving.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loops: 0,
            task_queue_capacity: 65536,
            worker: WorkerConfig::default(),
            shutdown_quiet_period: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.task_queue_capacity == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "task_queue_capacity must be > 0".into(),
            ));
        }
        if self.loops >= (1 << 16) {
            return Err(crate::error::Error::InvalidConfig(
                "loops must be < 65536".into(),
            ));
        }
        if self.shutdown_timeout < self.shutdown_quiet_period {
            return Err(crate::error::Error::InvalidConfig(
                "shutdown_timeout must be >= shutdown_quiet_period".into(),
            ));
        }
        if self.worker.name_prefix.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "worker.name_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the loop threads.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Prefix for loop thread names; threads are named `{prefix}-{index}`.
    pub name_prefix: String,
    /// Whether to pin each loop thread to a CPU core.
    pub pin_to_core: bool,
    /// Starting CPU core index for pinning.
    pub core_offset: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "eventline-loop".to_string(),
            pin_to_core: false,
            core_offset: 0,
        }
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use eventline::ConfigBuilder;
/// use std::time::Duration;
///
/// let config = ConfigBuilder::new()
///     .loops(4)
///     .task_queue_capacity(4096)
///     .shutdown_quiet_period(Duration::from_millis(100))
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Loop settings ────────────────────────────────────────────────

    /// Set the number of event loops. 0 = number of CPUs.
    pub fn loops(mut self, n: usize) -> Self {
        self.config.loops = n;
        self
    }

    /// Set the capacity of each loop's bounded task queue.
    pub fn task_queue_capacity(mut self, n: usize) -> Self {
        self.config.task_queue_capacity = n;
        self
    }

    // ── Worker settings ──────────────────────────────────────────────

    /// Set the loop thread name prefix.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.worker.name_prefix = prefix.into();
        self
    }

    /// Enable or disable CPU core pinning.
    pub fn pin_to_core(mut self, enable: bool) -> Self {
        self.config.worker.pin_to_core = enable;
        self
    }

    /// Set the starting CPU core index for pinning.
    pub fn core_offset(mut self, offset: usize) -> Self {
        self.config.worker.core_offset = offset;
        self
    }

    // ── Shutdown settings ────────────────────────────────────────────

    /// Set the default graceful-shutdown quiet period.
    pub fn shutdown_quiet_period(mut self, d: Duration) -> Self {
        self.config.shutdown_quiet_period = d;
        self
    }

    /// Set the default graceful-shutdown hard deadline.
    pub fn shutdown_timeout(mut self, d: Duration) -> Self {
        self.config.shutdown_timeout = d;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Get mutable access to the underlying config for fields not covered
    /// by builder methods.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
