//! Polling Scheduler: keeps a phase-locked cadence so that successive polls
//! fall on integral multiples of the configured interval, independent of
//! per-cycle duration and transient failures.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::driver::ProtocolDriver;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::transport::{self, Transport};

pub struct SchedulerConfig {
    pub endpoint: String,
    pub interval: u32,
    pub close_between_cycles: bool,
    pub log_dir: Option<std::path::PathBuf>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    driver: ProtocolDriver,
    next_poll: u32,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, now: u32) -> Scheduler {
        let next_poll = smallest_multiple_at_or_after(config.interval, now);
        Scheduler { config, driver: ProtocolDriver::new(), next_poll }
    }

    /// Runs forever, advancing `next_poll` and invoking one cycle per
    /// iteration. `should_stop` is polled between iterations so a caller can
    /// wire up signal-driven shutdown without in-band cancellation.
    pub fn run(&mut self, persistence: &mut dyn Persistence, mut should_stop: impl FnMut() -> bool) -> Result<()> {
        let mut transport = self.open_transport_with_retry(persistence);

        loop {
            if should_stop() {
                info!("shutdown requested, exiting scheduler loop");
                transport.close().ok();
                return Ok(());
            }

            if self.driver.devices.is_empty() || !self.any_device_enumerated() {
                if let Err(e) = self.discover_and_enumerate(&mut *transport, persistence) {
                    warn!(error = %e, "discovery/enumeration failed, retrying after interval");
                    sleep_until(now_secs() + self.config.interval);
                    continue;
                }
            }

            let now = now_secs();
            self.advance_to_not_before(now);
            sleep_until(self.next_poll);

            if self.config.close_between_cycles {
                transport = self.open_transport_with_retry(persistence);
            }

            match self.driver.poll_cycle(&mut *transport, persistence, self.next_poll) {
                Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "poll cycle failed, skipping");
                    if let Err(e) = persistence.append_comment(None, &format!("cycle failed: {}", e)) {
                        error!(error = %e, "failed to persist comment for failed cycle");
                    }
                }
            }

            if self.config.close_between_cycles {
                transport.close().ok();
            }

            self.next_poll += self.config.interval;
        }
    }

    fn any_device_enumerated(&self) -> bool {
        self.driver.devices.values().any(|d| d.catalogue.is_some())
    }

    fn discover_and_enumerate(&mut self, transport: &mut dyn Transport, persistence: &mut dyn Persistence) -> Result<()> {
        self.driver.discover(transport, persistence)?;
        self.driver.enumerate(transport, persistence)?;
        Ok(())
    }

    fn open_transport_with_retry(&self, persistence: &mut dyn Persistence) -> Box<dyn Transport> {
        loop {
            match transport::open(&self.config.endpoint) {
                Ok(t) => {
                    return match &self.config.log_dir {
                        Some(dir) => Box::new(transport::LoggingTransport::new(t, dir.clone())),
                        None => t,
                    };
                }
                Err(e) => {
                    error!(error = %e, "failed to open transport, retrying after interval");
                    persistence.append_comment(None, &format!("transport open failed: {}", e)).ok();
                    sleep_until(now_secs() + self.config.interval);
                }
            }
        }
    }

    /// Advances `next_poll` by `interval` repeatedly while it is in the
    /// past, catching up after a slow cycle without drift.
    fn advance_to_not_before(&mut self, now: u32) {
        while self.next_poll < now {
            self.next_poll += self.config.interval;
        }
    }
}

fn smallest_multiple_at_or_after(interval: u32, now: u32) -> u32 {
    if interval == 0 {
        return now;
    }
    let remainder = now % interval;
    if remainder == 0 {
        now
    } else {
        now + (interval - remainder)
    }
}

fn now_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32
}

fn sleep_until(target: u32) {
    let now = now_secs();
    if target > now {
        thread::sleep(Duration::from_secs((target - now) as u64));
    }
}
