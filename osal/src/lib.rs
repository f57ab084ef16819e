//! # OSAL
//!
//! This crate is the operating-system abstraction layer: a portable
//! task, IPC, timer and networking API bound to whatever [`HostKernel`]
//! it is built over.
//!
//! ## Philosophy
//!
//! - **Handles, not pointers**: every object is an [`ObjectId`] into a
//!   per-kind [`ResourceTable`]; stale handles are rejected, never reused
//! - **Explicit callers**: creators are named through a [`CallerContext`]
//! - **Numbers for the outside**: every failure has a stable
//!   [`OsalError::code`]
//! - **Timeouts are normal**: they are returned, not logged
//!
//! ## Example
//!
//! ```ignore
//! use osal::{CallerContext, Osal};
//! use sim_kernel::SimulatedKernel;
//! use std::sync::Arc;
//!
//! let osal = Osal::new(Arc::new(SimulatedKernel::new()))?;
//! let sem = osal.bin_sem_create(CallerContext::ROOT, "Lock", 0)?;
//! osal.bin_sem_give(sem)?;
//! osal.bin_sem_take(sem)?;
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod mutex;
pub mod platform;
pub mod queue;
pub mod select;
pub mod semaphore;
pub mod stream;
pub mod task;
pub mod timebase;
pub mod timer;

pub use clock::OsTime;
pub use config::{ConfigError, OsalConfig};
pub use context::{CallerContext, TaskContext};
pub use core_types::{ObjectId, ObjectKind, StreamState, Timeout};
pub use error::{OsalError, OsalResult};
pub use mutex::MutexInfo;
pub use platform::HeapInfo;
pub use queue::QueueInfo;
pub use select::FdSet;
pub use semaphore::{SemInfo, MAX_SEM_VALUE};
pub use stream::{FileAccess, FileFlags, StreamInfo};
pub use task::TaskInfo;
pub use timebase::{ExternalSync, TimebaseInfo};
pub use timer::{TimerCallbackFn, TimerInfo};

use kernel_api::{HostKernel, HostNetStack, HostSemaphore, TickClock};
use logger::{LogSink, Logger, StderrSink};
use resources::{Record, ResourceTable};
use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::{Arc, Mutex, MutexGuard};

/// Teardown passes made by [`Osal::delete_all_objects`]
const DELETE_ALL_PASSES: usize = 5;

/// The abstraction layer
///
/// Built once over a host kernel and shared behind an [`Arc`]; every
/// method takes `&self` and is safe to call from any task.
pub struct Osal {
    kernel: Arc<dyn HostKernel>,
    config: OsalConfig,
    clock: TickClock,
    logger: Logger,
    network: Option<Arc<dyn HostNetStack>>,
    local_offset_us: AtomicI64,
    /// Wakes [`Osal::idle_loop`]; built on first use
    shutdown_gate: Mutex<Option<Arc<dyn HostSemaphore>>>,
    shutdown_requested: AtomicBool,
    tasks: ResourceTable<task::TaskRecord>,
    queues: ResourceTable<queue::QueueRecord>,
    bin_sems: ResourceTable<semaphore::SemRecord>,
    count_sems: ResourceTable<semaphore::SemRecord>,
    mutexes: ResourceTable<mutex::MutexRecord>,
    streams: ResourceTable<stream::StreamRecord>,
    timebases: ResourceTable<timebase::TimebaseRecord>,
    timers: ResourceTable<timer::TimerRecord>,
}

/// Builder for [`Osal`]
pub struct OsalBuilder {
    kernel: Arc<dyn HostKernel>,
    config: OsalConfig,
    sink: Option<Arc<dyn LogSink>>,
}

impl OsalBuilder {
    pub fn with_config(mut self, config: OsalConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes log output somewhere other than standard error
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> OsalResult<Arc<Osal>> {
        let config = self.config;
        config.validate()?;
        let clock = TickClock::new(self.kernel.tick_rate_hz())
            .ok_or_else(|| OsalError::InvalidArgument("host tick rate is zero".to_string()))?;
        let network = if config.include_network {
            self.kernel.network()
        } else {
            None
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(StderrSink));
        let logger = Logger::new(config.log_level, sink);

        let osal = Osal {
            tasks: new_table(ObjectKind::Task, config.max_tasks, &config),
            queues: new_table(ObjectKind::Queue, config.max_queues, &config),
            bin_sems: new_table(ObjectKind::BinSem, config.max_bin_sems, &config),
            count_sems: new_table(ObjectKind::CountSem, config.max_count_sems, &config),
            mutexes: new_table(ObjectKind::Mutex, config.max_mutexes, &config),
            streams: new_table(ObjectKind::Stream, config.max_open_files, &config),
            timebases: new_table(ObjectKind::TimeBase, config.max_timebases, &config),
            timers: new_table(ObjectKind::Timer, config.max_timers, &config),
            kernel: self.kernel,
            clock,
            logger,
            network,
            local_offset_us: AtomicI64::new(0),
            shutdown_gate: Mutex::new(None),
            shutdown_requested: AtomicBool::new(false),
            config,
        };
        osal.logger.info(
            |e| {
                e.with_field("tick_rate_hz", clock.ticks_per_second())
                    .with_field("network", osal.network.is_some())
            },
            "abstraction layer initialized",
        );
        Ok(Arc::new(osal))
    }
}

fn new_table<T>(kind: ObjectKind, capacity: usize, config: &OsalConfig) -> ResourceTable<T> {
    ResourceTable::new(kind, capacity, config.max_api_name, config.host_name_len)
}

impl Osal {
    pub fn builder(kernel: Arc<dyn HostKernel>) -> OsalBuilder {
        OsalBuilder {
            kernel,
            config: OsalConfig::default(),
            sink: None,
        }
    }

    /// Builds a layer with the default configuration
    pub fn new(kernel: Arc<dyn HostKernel>) -> OsalResult<Arc<Self>> {
        Self::builder(kernel).build()
    }

    pub fn config(&self) -> &OsalConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn kernel(&self) -> &Arc<dyn HostKernel> {
        &self.kernel
    }

    /// True when socket calls are backed by a host stack
    pub fn network_available(&self) -> bool {
        self.network.is_some()
    }

    /// Free slots left for `kind`
    pub fn free_slots(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Task => self.tasks.free_count(),
            ObjectKind::Queue => self.queues.free_count(),
            ObjectKind::CountSem => self.count_sems.free_count(),
            ObjectKind::BinSem => self.bin_sems.free_count(),
            ObjectKind::Mutex => self.mutexes.free_count(),
            ObjectKind::Stream => self.streams.free_count(),
            ObjectKind::TimeBase => self.timebases.free_count(),
            ObjectKind::Timer => self.timers.free_count(),
        }
    }

    /// Live objects of `kind`
    pub fn object_count(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Task => self.tasks.active_count(),
            ObjectKind::Queue => self.queues.active_count(),
            ObjectKind::CountSem => self.count_sems.active_count(),
            ObjectKind::BinSem => self.bin_sems.active_count(),
            ObjectKind::Mutex => self.mutexes.active_count(),
            ObjectKind::Stream => self.streams.active_count(),
            ObjectKind::TimeBase => self.timebases.active_count(),
            ObjectKind::Timer => self.timers.active_count(),
        }
    }

    /// Name an object of any kind was created with
    ///
    /// Anonymous objects (streams) yield `None`.
    pub fn object_name(&self, id: ObjectId) -> OsalResult<Option<String>> {
        fn name_of<T>(table: &ResourceTable<T>, id: ObjectId) -> OsalResult<Option<String>> {
            Ok(table.lookup(id)?.name().map(str::to_string))
        }
        match id.kind().ok_or(OsalError::InvalidId)? {
            ObjectKind::Task => name_of(&self.tasks, id),
            ObjectKind::Queue => name_of(&self.queues, id),
            ObjectKind::CountSem => name_of(&self.count_sems, id),
            ObjectKind::BinSem => name_of(&self.bin_sems, id),
            ObjectKind::Mutex => name_of(&self.mutexes, id),
            ObjectKind::Stream => name_of(&self.streams, id),
            ObjectKind::TimeBase => name_of(&self.timebases, id),
            ObjectKind::Timer => name_of(&self.timers, id),
        }
    }

    /// Deletes every object the layer owns
    ///
    /// Timers go before timebases so no timebase is left in use; tasks
    /// follow so nothing is blocked on the primitives deleted after them.
    /// Objects that refuse to go are retried on the next pass.
    pub fn delete_all_objects(&self) {
        for _ in 0..DELETE_ALL_PASSES {
            for id in self.timers.ids() {
                let _ = self.timer_delete(id);
            }
            for id in self.timebases.ids() {
                let _ = self.timebase_delete(id);
            }
            for id in self.tasks.ids() {
                let _ = self.task_delete(id);
            }
            for id in self.queues.ids() {
                let _ = self.queue_delete(id);
            }
            for id in self.bin_sems.ids() {
                let _ = self.bin_sem_delete(id);
            }
            for id in self.count_sems.ids() {
                let _ = self.count_sem_delete(id);
            }
            for id in self.mutexes.ids() {
                let _ = self.mut_sem_delete(id);
            }
            for id in self.streams.ids() {
                let _ = self.stream_close(id);
            }
            if ObjectKind::ALL.iter().all(|kind| self.object_count(*kind) == 0) {
                return;
            }
        }
        self.logger
            .warn(|e| e, "objects remain after delete_all_objects");
    }

    /// Reserves a slot, runs `ctor` and publishes the result
    pub(crate) fn create_object<T, F>(
        &self,
        table: &ResourceTable<T>,
        caller: CallerContext,
        name: Option<&str>,
        ctor: F,
    ) -> OsalResult<ObjectId>
    where
        F: FnOnce(ObjectId, &str) -> OsalResult<T>,
    {
        match table.create(name, caller.task(), ctor) {
            Ok(id) => {
                self.logger.debug(
                    |e| {
                        e.with_source(id)
                            .with_field("name", name.unwrap_or("-"))
                            .with_field("creator", caller.task())
                    },
                    "object created",
                );
                Ok(id)
            }
            Err(resources::CreateError::Constructor(err)) => {
                self.logger.error(
                    |e| {
                        e.with_field("kind", table.kind())
                            .with_field("name", name.unwrap_or("-"))
                            .with_field("error", &err)
                    },
                    "object construction failed, slot released",
                );
                Err(err)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Tears down an object and frees its slot
    pub(crate) fn delete_object<T, F>(
        &self,
        table: &ResourceTable<T>,
        id: ObjectId,
        dtor: F,
    ) -> OsalResult<Arc<Record<T>>>
    where
        F: FnOnce(&Record<T>) -> OsalResult<()>,
    {
        let record = table.delete(id, dtor)?;
        self.logger.debug(
            |e| e.with_source(id).with_field("name", record.name().unwrap_or("-")),
            "object deleted",
        );
        Ok(record)
    }
}

/// Locks a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for Osal {
    fn drop(&mut self) {
        self.delete_all_objects();
        if let Some(gate) = lock(&self.shutdown_gate).take() {
            gate.destroy();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use logger::{LogLevel, MemorySink};
    use sim_kernel::SimulatedKernel;

    /// Layer over a fresh simulated kernel, logging into memory
    pub fn osal_with_sink() -> (Arc<Osal>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = OsalConfig {
            log_level: LogLevel::Debug,
            ..OsalConfig::default()
        };
        let osal = Osal::builder(Arc::new(SimulatedKernel::new()))
            .with_config(config)
            .with_log_sink(sink.clone())
            .build()
            .unwrap();
        (osal, sink)
    }

    pub fn osal() -> Arc<Osal> {
        osal_with_sink().0
    }
}
