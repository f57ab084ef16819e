//! Shared setup for the scenario tests

#![allow(dead_code)]

use logger::{LogLevel, MemorySink};
use osal::{Osal, OsalConfig};
use sim_kernel::SimulatedKernel;
use std::net::SocketAddr;
use std::sync::Arc;

pub fn osal_on(kernel: Arc<SimulatedKernel>) -> (Arc<Osal>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let config = OsalConfig {
        log_level: LogLevel::Debug,
        ..OsalConfig::default()
    };
    let osal = Osal::builder(kernel)
        .with_config(config)
        .with_log_sink(sink.clone())
        .build()
        .expect("layer should initialize over the simulated kernel");
    (osal, sink)
}

pub fn osal() -> Arc<Osal> {
    osal_on(Arc::new(SimulatedKernel::new())).0
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
