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

//! Engine configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_COMMISSION_PERCENT_ENV: &str = "TRIP_LEDGER_DEFAULT_COMMISSION_PERCENT";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not a decimal: {value:?}")]
    InvalidDecimal { key: String, value: String },

    #[error("{key} must be between 0 and 100, got {value}")]
    OutOfRange { key: String, value: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Commission charged when a tariff does not set its own percent.
    pub default_commission_percent: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_commission_percent: dec!(10),
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads overrides through `lookup`; unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(DEFAULT_COMMISSION_PERCENT_ENV) {
            let raw = raw.trim();
            if !raw.is_empty() {
                let value = Decimal::from_str(raw).map_err(|_| ConfigError::InvalidDecimal {
                    key: DEFAULT_COMMISSION_PERCENT_ENV.to_string(),
                    value: raw.to_string(),
                })?;
                if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                    return Err(ConfigError::OutOfRange {
                        key: DEFAULT_COMMISSION_PERCENT_ENV.to_string(),
                        value,
                    });
                }
                cfg.default_commission_percent = value;
            }
        }

        Ok(cfg)
    }
}
