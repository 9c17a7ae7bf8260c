use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::services::booking::QuantityBooking;
use crate::services::pricing::PriceTable;
use crate::utils::money::Currency;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means bookings are kept in memory only.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: IpAddr,
    pub port: u16,
    pub is_production: bool,
    pub cors_allowed_origins: Vec<String>,
    pub currency: Currency,
    pub prices: PriceTable,
    /// Ticket type whose stock backs quantity-only bookings. Unset turns that
    /// entry point off.
    pub quantity_ticket_type_id: Option<Uuid>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 5)?,
            host: parse_or(&var, "HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(&var, "PORT", 3001)?,
            is_production: var("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
            cors_allowed_origins,
            currency: parse_or(&var, "CURRENCY", Currency::Eur)?,
            prices: PriceTable {
                standard_unit_price: price_or(&var, "STANDARD_UNIT_PRICE_CENTS", 2000)?,
                ems_unit_price: price_or(&var, "EMS_UNIT_PRICE_CENTS", 1500)?,
            },
            quantity_ticket_type_id: parse_optional(&var, "QUANTITY_TICKET_TYPE_ID")?,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn quantity_booking(&self) -> QuantityBooking {
        QuantityBooking {
            prices: self.prices,
            ticket_type_id: self.quantity_ticket_type_id,
        }
    }
}

fn parse_or<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_optional<T, V>(var: &V, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn price_or<V>(var: &V, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let value = parse_or(var, name, default)?;
    if value < 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must not be negative".to_string(),
        });
    }
    Ok(value)
}
