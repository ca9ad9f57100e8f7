//! Persistence Adapter: translates the protocol driver's output into
//! `stats` rows and `comment` events. The driver is written against the
//! `Persistence` trait; `PostgresPersistence` is the one concrete backend
//! this crate ships, `MemoryPersistence` backs tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::error::{Error, Result};

pub const MONITORED_CHANNELS: [&str; 8] =
    ["Pac", "Ipv", "Vpv", "E-Total", "h-Total", "Temperature", "Vac", "Fac"];

/// One row destined for the `stats` table: `stamp` (local time), the
/// device's bus address, and the scaled value of each monitored channel
/// that was present in the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    pub stamp: DateTime<Local>,
    pub addr: u16,
    pub values: BTreeMap<&'static str, f64>,
}

impl StatsRow {
    pub fn stamp_string(&self) -> String {
        self.stamp.format("%m/%d/%Y %H:%M:%S").to_string()
    }
}

pub trait Persistence {
    fn append_stats(&mut self, row: StatsRow) -> Result<()>;
    fn append_comment(&mut self, addr: Option<u16>, text: &str) -> Result<()>;
}

/// In-memory test double; used by driver/scheduler unit tests that don't
/// want a database.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    pub stats: Vec<StatsRow>,
    pub comments: Vec<(Option<u16>, String)>,
}

impl MemoryPersistence {
    pub fn new() -> MemoryPersistence {
        MemoryPersistence::default()
    }
}

impl Persistence for MemoryPersistence {
    fn append_stats(&mut self, row: StatsRow) -> Result<()> {
        info!(addr = row.addr, stamp = %row.stamp_string(), "append_stats");
        self.stats.push(row);
        Ok(())
    }

    fn append_comment(&mut self, addr: Option<u16>, text: &str) -> Result<()> {
        match addr {
            Some(a) => warn!(addr = a, "{}", text),
            None => warn!("{}", text),
        }
        self.comments.push((addr, text.to_string()));
        Ok(())
    }
}

/// Postgres-backed implementation of the `stats`/`comments` DDL from the
/// database contract. A single blocking connection, matching the crate's
/// single-threaded execution model.
pub struct PostgresPersistence {
    client: postgres::Client,
}

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS stats (
        stamp timestamp,
        addr int,
        \"E-Total\" double precision,
        \"h-Total\" double precision,
        \"Pac\" double precision,
        \"Vac\" double precision,
        \"Fac\" double precision,
        \"Ipv\" double precision,
        \"Vpv\" double precision,
        \"Temperature\" double precision
    );
    CREATE TABLE IF NOT EXISTS comments (
        stamp timestamp,
        addr int,
        comment text
    );
";

impl PostgresPersistence {
    pub fn connect(database_url: &str) -> Result<PostgresPersistence> {
        let mut client = postgres::Client::connect(database_url, postgres::NoTls)?;
        client.batch_execute(CREATE_TABLES)?;
        Ok(PostgresPersistence { client })
    }
}

impl Persistence for PostgresPersistence {
    fn append_stats(&mut self, row: StatsRow) -> Result<()> {
        let mut columns = vec!["stamp".to_string(), "addr".to_string()];
        let mut placeholders = vec!["$1".to_string(), "$2".to_string()];
        let mut values: Vec<Box<dyn postgres::types::ToSql + Sync>> =
            vec![Box::new(row.stamp.naive_local()), Box::new(row.addr as i32)];

        for channel in MONITORED_CHANNELS.iter() {
            if let Some(v) = row.values.get(channel) {
                columns.push(format!("\"{}\"", channel));
                placeholders.push(format!("${}", values.len() + 1));
                values.push(Box::new(*v));
            }
        }

        let query = format!(
            "INSERT INTO stats ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
            values.iter().map(|b| b.as_ref()).collect();

        self.client
            .execute(query.as_str(), &params)
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        Ok(())
    }

    fn append_comment(&mut self, addr: Option<u16>, text: &str) -> Result<()> {
        let result = self.client.execute(
            "INSERT INTO comments (stamp, addr, comment) VALUES (now(), $1, $2)",
            &[&addr.map(|a| a as i32), &text],
        );
        if let Err(e) = &result {
            error!(error = %e, "failed to persist comment");
        }
        result.map(|_| ()).map_err(|e| Error::PersistenceError(e.to_string()))
    }
}
