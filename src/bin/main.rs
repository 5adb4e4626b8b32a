// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use trip_ledger::{
    DriverId, Engine, EngineConfig, EntryType, NewTariff, NewTrip, TripError, TripId, TripType,
};

/// Trip Ledger - Replay trip events against a tariff table
///
/// Reads tariffs and an event log, drives every trip through its lifecycle,
/// and writes the resulting driver wallets (or trips) as CSV to stdout.
#[derive(Parser, Debug)]
#[command(name = "trip-ledger")]
#[command(about = "Replays trip lifecycle events and settles driver commissions", long_about = None)]
struct Args {
    /// Path to CSV file with trip events
    ///
    /// Expected format: op,trip,driver,vehicle,trip_type,value
    /// Example: cargo run -- --tariffs tariffs.csv events.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Path to CSV file with tariff rows
    #[arg(long, value_name = "FILE")]
    tariffs: PathBuf,

    /// What to write to stdout
    #[arg(long, value_enum, default_value_t = Report::Wallets)]
    report: Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Wallets,
    Trips,
    Ledger,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };
    let engine = Engine::with_config(config);

    let tariffs = open(&args.tariffs);
    if let Err(e) = load_tariffs(&engine, BufReader::new(tariffs)) {
        tracing::error!(error = %e, path = %args.tariffs.display(), "error loading tariffs");
        process::exit(1);
    }

    let events = open(&args.input);
    if let Err(e) = replay_events(&engine, BufReader::new(events)) {
        tracing::error!(error = %e, path = %args.input.display(), "error replaying events");
        process::exit(1);
    }

    let stdout = std::io::stdout();
    let written = match args.report {
        Report::Wallets => write_wallets(&engine, stdout),
        Report::Trips => write_trips(&engine, stdout),
        Report::Ledger => write_ledger(&engine, stdout),
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "error writing output");
        process::exit(1);
    }
}

fn open(path: &Path) -> File {
    match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "error opening file");
            process::exit(1);
        }
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Loads tariff rows into the engine's catalog.
///
/// Columns: `vehicle_type, one_way_per_km, one_way_min_km, round_trip_per_km,
/// round_trip_min_km, driver_allowance, commission_percent, is_active`.
/// An empty `commission_percent` falls back to the configured default.
///
/// # Errors
///
/// Unlike events, a malformed tariff row aborts the load.
pub fn load_tariffs<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = csv_reader(reader);
    let mut loaded = 0;
    for result in rdr.deserialize::<NewTariff>() {
        engine.tariffs().insert(result?);
        loaded += 1;
    }
    Ok(loaded)
}

/// Raw CSV record of the event log.
///
/// Fields: `op, trip, driver, vehicle, trip_type, value`
#[derive(Debug, Deserialize)]
struct EventRecord {
    op: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    trip: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    driver: Option<u32>,
    #[serde(default)]
    vehicle: Option<String>,
    #[serde(default)]
    trip_type: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Error, Debug)]
enum ReplayError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {value:?}")]
    Invalid { field: &'static str, value: String },

    #[error("unknown trip key {0}")]
    UnknownTrip(u64),

    #[error("unknown op {0:?}")]
    UnknownOp(String),

    #[error(transparent)]
    Trip(#[from] TripError),
}

/// Replay state: maps the event log's trip keys to engine trip IDs.
struct Replay<'a> {
    engine: &'a Engine,
    trips: HashMap<u64, TripId>,
}

impl<'a> Replay<'a> {
    fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            trips: HashMap::new(),
        }
    }

    fn trip(&self, record: &EventRecord) -> Result<TripId, ReplayError> {
        let key = record.trip.ok_or(ReplayError::Missing("trip"))?;
        self.trips
            .get(&key)
            .copied()
            .ok_or(ReplayError::UnknownTrip(key))
    }

    fn apply(&mut self, record: EventRecord) -> Result<(), ReplayError> {
        let engine = self.engine;
        let driver = record.driver.map(DriverId);
        let need_driver = || driver.ok_or(ReplayError::Missing("driver"));

        match record.op.to_lowercase().as_str() {
            "register_driver" => {
                let approved = match record.value.as_deref() {
                    None => true,
                    Some(raw) => parse(raw, "value")?,
                };
                engine.register_driver(need_driver()?, approved)?;
            }
            "create_trip" => {
                let key = record.trip.ok_or(ReplayError::Missing("trip"))?;
                let vehicle = record.vehicle.ok_or(ReplayError::Missing("vehicle"))?;
                let trip_type = match record.trip_type.as_deref() {
                    None => TripType::OneWay,
                    Some(raw) => parse_trip_type(raw)?,
                };
                let trip = engine.create_trip(NewTrip::new(trip_type, vehicle));
                self.trips.insert(key, trip.id);
            }
            "assign" => {
                engine.assign(self.trip(&record)?, need_driver()?)?;
            }
            "assign_override" => {
                engine.assign_override(self.trip(&record)?, need_driver()?)?;
            }
            "unassign" => {
                engine.unassign(self.trip(&record)?)?;
            }
            "request" => {
                engine.create_request(self.trip(&record)?, need_driver()?)?;
            }
            "approve" | "cancel_request" => {
                let trip = self.trip(&record)?;
                let request = engine
                    .requests()
                    .find(trip, need_driver()?)
                    .ok_or(TripError::RequestNotFound)?;
                if record.op.eq_ignore_ascii_case("approve") {
                    engine.approve_request(request.id)?;
                } else {
                    engine.cancel_request(request.id)?;
                }
            }
            "start" => {
                let reading = record
                    .value
                    .as_deref()
                    .map(|raw| parse::<u64>(raw, "value"))
                    .transpose()?;
                engine.start(self.trip(&record)?, reading)?;
            }
            "odo_start" => {
                let reading = parse(required(&record.value)?, "value")?;
                engine.record_odometer_start(self.trip(&record)?, reading)?;
            }
            "odo_end" => {
                let reading = parse(required(&record.value)?, "value")?;
                engine.record_odometer_end(self.trip(&record)?, reading)?;
            }
            "cancel" => {
                let reason = record.value.as_deref().unwrap_or("cancelled");
                engine.cancel(self.trip(&record)?, reason)?;
            }
            "recalc" => {
                engine.recalculate_fare(self.trip(&record)?)?;
            }
            "delete" => {
                let trip = self.trip(&record)?;
                engine.delete_trip(trip)?;
                self.trips.retain(|_, id| *id != trip);
            }
            op @ ("credit" | "debit" | "refund") => {
                let entry_type = match op {
                    "credit" => EntryType::Credit,
                    "debit" => EntryType::Debit,
                    _ => EntryType::Refund,
                };
                let amount: Decimal = parse(required(&record.value)?, "value")?;
                let trip = match record.trip {
                    Some(_) => Some(self.trip(&record)?),
                    None => None,
                };
                engine.post_wallet_entry(need_driver()?, trip, amount, entry_type)?;
            }
            _ => return Err(ReplayError::UnknownOp(record.op)),
        }
        Ok(())
    }
}

fn required(value: &Option<String>) -> Result<&str, ReplayError> {
    value.as_deref().ok_or(ReplayError::Missing("value"))
}

fn parse<T: FromStr>(raw: &str, field: &'static str) -> Result<T, ReplayError> {
    raw.parse().map_err(|_| ReplayError::Invalid {
        field,
        value: raw.to_string(),
    })
}

fn parse_trip_type(raw: &str) -> Result<TripType, ReplayError> {
    match raw.to_lowercase().replace([' ', '-'], "_").as_str() {
        "one_way" => Ok(TripType::OneWay),
        "round_trip" => Ok(TripType::RoundTrip),
        _ => Err(ReplayError::Invalid {
            field: "trip_type",
            value: raw.to_string(),
        }),
    }
}

/// Replays trip events from a CSV reader.
///
/// Events are applied in file order. Rejected events (bad transitions,
/// unknown trips, malformed rows) are logged and skipped; they never stop
/// the replay.
///
/// # CSV Format
///
/// ```csv
/// op,trip,driver,vehicle,trip_type,value
/// register_driver,,1,,,true
/// create_trip,1,,sedan,one_way,
/// assign,1,1,,,
/// odo_start,1,,,,10000
/// odo_end,1,,,,10250
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn replay_events<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = csv_reader(reader);
    let mut replay = Replay::new(engine);
    let mut applied = 0;

    for (row, result) in rdr.deserialize::<EventRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                tracing::warn!(row = row + 1, error = %e, "skipping malformed row");
                continue;
            }
        };
        let op = record.op.clone();
        match replay.apply(record) {
            Ok(()) => applied += 1,
            Err(e) => tracing::warn!(row = row + 1, op = %op, error = %e, "skipping event"),
        }
    }

    Ok(applied)
}

/// Writes driver wallets as CSV.
///
/// Columns: `driver, approved, available, active_trips, wallet_balance`
pub fn write_wallets<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for driver in engine.drivers() {
        wtr.serialize(&*driver)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct TripRow {
    trip: TripId,
    status: trip_ledger::TripStatus,
    vehicle_type: String,
    driver: Option<DriverId>,
    odometer_start: Option<u64>,
    odometer_end: Option<u64>,
    fare: Option<Decimal>,
    commission: Option<Decimal>,
}

/// Writes one summary row per trip.
pub fn write_trips<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for trip in engine.trips() {
        wtr.serialize(TripRow {
            trip: trip.id,
            status: trip.status,
            vehicle_type: trip.vehicle_type,
            driver: trip.assigned_driver,
            odometer_start: trip.odometer_start,
            odometer_end: trip.odometer_end,
            fare: trip.fare,
            commission: trip.commission,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the full ledger journal in posting order.
pub fn write_ledger<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for entry in engine.ledger().entries(0, usize::MAX) {
        wtr.serialize(&entry)?;
    }
    wtr.flush()?;
    Ok(())
}
