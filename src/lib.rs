/*!
Polls SMA Sunnyboy photovoltaic inverters over the SWR-NET serial protocol
and persists periodic measurement samples.

The core of this crate is the inverter protocol engine: framing, checksum
and multi-fragment reassembly ([`frame`], [`reassembler`]), typed channel
and sample decoding ([`channel`], [`sample`]), the discovery/enumeration/
polling state machine ([`driver`]), and the phase-locked cadence that drives
it ([`scheduler`]). [`transport`] and [`persistence`] are the two external
collaborators: a byte stream to the inverter bus, and an append-only store
for `stats`/`comments` rows.
*/

pub mod bytes_cursor;
pub mod channel;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod frame;
pub mod persistence;
pub mod reassembler;
pub mod sample;
pub mod scheduler;
pub mod transport;

pub use device::Device;
pub use driver::ProtocolDriver;
pub use error::{Error, Result};
pub use persistence::{MemoryPersistence, Persistence, PostgresPersistence, StatsRow};
pub use scheduler::{Scheduler, SchedulerConfig};
