//! A tiny HTTP ingestion endpoint.
//!
//! Every POST body is appended to a log file as `"<body> <ip>:<port>"`. Posting `STOP`
//! shuts the service down, and so does a timer that fires a fixed delay after start.

#[macro_use] extern crate log;

pub mod config;
mod connection;
pub mod error;
pub mod handler;
pub mod log_file;
pub mod request;
pub mod response;
pub mod server;
pub mod shutdown;
pub mod status;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::server::{Handler, Server};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A started service: the server is accepting and the shutdown timer is armed.
pub struct Service {
    server: Server,
    log: Arc<log_file::LogFile>,
    trigger: shutdown::Trigger,
    listener: shutdown::Listener,
    grace_period: Duration,
    force_period: Duration,
}

impl Service {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn log(&self) -> &log_file::LogFile {
        &self.log
    }

    /// Another handle on the signal the STOP payload and the timer raise.
    pub fn trigger(&self) -> shutdown::Trigger {
        self.trigger.clone()
    }

    /// Parks until shutdown is signalled, then drains the server and waits for it to exit.
    pub fn wait(self) -> Result<shutdown::Reason> {
        let Service { server, listener, grace_period, force_period, .. } = self;

        let reason = listener.wait();
        info!("shutting down; reason={:?}", reason);
        server.stop(grace_period, force_period);
        server.await_termination()?;

        Ok(reason)
    }
}

/// Recreates the log file, starts the server and arms the shutdown timer.
pub fn launch(config: Config) -> Result<Service> {
    let log = log_file::LogFile::create(&config.log_path)
        .map_err(|source| Error::LogFile { path: config.log_path.clone(), source })?;
    let log = Arc::new(log);

    let (trigger, listener) = shutdown::channel();
    let handler = handler::IngestHandler::new(log.clone(), trigger.clone());
    let server = Server::start(config.address(), Arc::new(handler))?;
    trigger.schedule(config.shutdown_delay)?;

    Ok(Service {
        server,
        log,
        trigger,
        listener,
        grace_period: config.grace_period,
        force_period: config.force_period,
    })
}

/// Runs the service until it is told to stop or its timer runs out.
pub fn run(config: Config) -> Result<()> {
    let reason = launch(config)?.wait()?;
    info!("service stopped; reason={:?}", reason);
    Ok(())
}
