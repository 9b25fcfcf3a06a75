//! Frame ingestion loop
//!
//! The multiplexer owns the bus endpoints, the interface index cache and the
//! dispatcher. It blocks in a single `poll(2)` across all endpoint
//! descriptors plus the shutdown wake descriptor, and for every readable
//! endpoint (in configuration order) it:
//!
//! 1. reads exactly one frame
//! 2. fetches the socket receive timestamp
//! 3. resolves the source interface through the cache
//! 4. renders the line and dispatches it to every channel
//!
//! Any I/O failure ends the loop; nothing is retried.

use crate::bus::BusEndpoint;
use crate::dispatch::{Channel, Dispatcher};
use crate::formatter;
use crate::lifecycle::ShutdownSignal;
use crate::resolver::IndexCache;
use crate::types::{FrameKind, RelayError, Result, Timestamp};
use std::io;

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Frames read and rendered
    pub frames: u64,
    /// Individual channel dispatches
    pub dispatches: u64,
    /// Frames relayed with the fallback (epoch) timestamp
    pub degraded_timestamps: u64,
}

/// Readiness-based frame ingestion loop
pub struct Multiplexer<E, D>
where
    E: BusEndpoint,
    D: Dispatcher,
{
    endpoints: Vec<E>,
    cache: IndexCache,
    dispatcher: D,
    shutdown: ShutdownSignal,
    stats: RunStats,
}

impl<E, D> Multiplexer<E, D>
where
    E: BusEndpoint,
    D: Dispatcher,
{
    /// Create a multiplexer over `endpoints`
    ///
    /// The endpoint order is the scan order within one readiness event.
    pub fn new(endpoints: Vec<E>, cache: IndexCache, dispatcher: D, shutdown: ShutdownSignal) -> Self {
        Self {
            endpoints,
            cache,
            dispatcher,
            shutdown,
            stats: RunStats::default(),
        }
    }

    /// Interface index cache (read-only)
    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Counters so far
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Run until shutdown is requested or an error occurs
    ///
    /// # Returns
    /// * `Ok(RunStats)` - Shutdown was requested
    /// * `Err(..)` - Readiness failure, short read, receive failure, cache
    ///   exhaustion or a closed transport
    pub fn run(&mut self) -> Result<RunStats> {
        if self.endpoints.is_empty() {
            return Err(RelayError::Config("no bus endpoints to poll".to_string()));
        }

        let mut pollfds: Vec<libc::pollfd> = self
            .endpoints
            .iter()
            .map(|e| e.as_raw_fd())
            .chain(std::iter::once(self.shutdown.wake_fd()))
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        log::info!("Relaying frames from {} endpoint(s)", self.endpoints.len());

        while !self.shutdown.is_triggered() {
            for pfd in pollfds.iter_mut() {
                pfd.revents = 0;
            }

            let ready = unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1)
            };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RelayError::Readiness(err));
            }

            if self.shutdown.is_triggered() {
                break;
            }

            for idx in 0..self.endpoints.len() {
                if pollfds[idx].revents != 0 {
                    self.relay_one(idx)?;
                }
            }
        }

        log::info!(
            "Shutdown requested after {} frame(s), {} dispatch(es)",
            self.stats.frames,
            self.stats.dispatches
        );
        Ok(self.stats)
    }

    /// Read, resolve, render and dispatch one frame from endpoint `idx`
    fn relay_one(&mut self, idx: usize) -> Result<()> {
        let endpoint = &mut self.endpoints[idx];
        let reception = endpoint.receive()?;

        let timestamp = match endpoint.receive_timestamp() {
            Ok(ts) => ts,
            Err(e) => {
                log::warn!("SIOCGSTAMP failed on '{}': {}", endpoint.label(), e);
                self.stats.degraded_timestamps += 1;
                Timestamp::default()
            }
        };

        let slot = self.cache.resolve(reception.ifindex, &*endpoint)?;
        let line = formatter::render(
            &timestamp,
            self.cache.name(slot),
            self.cache.name_width(),
            &reception.frame,
        );
        self.stats.frames += 1;

        log::trace!(
            "{} frame via '{}': {}",
            FrameKind::from(&reception.frame),
            endpoint.label(),
            line
        );

        for channel in Channel::ALL {
            self.dispatcher.dispatch(channel, &line)?;
            self.stats.dispatches += 1;
        }
        Ok(())
    }

    /// Close every endpoint
    ///
    /// Must be called on every exit path, including after `run` failed.
    pub fn close(self) -> RunStats {
        for endpoint in &self.endpoints {
            log::debug!("Closing endpoint '{}'", endpoint.label());
        }
        let stats = self.stats;
        drop(self.endpoints);
        stats
    }
}
