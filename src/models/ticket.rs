use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_in_cents: i64,
    /// Base price for EMS clients; falls back to `price_in_cents` when unset.
    pub ems_price_in_cents: Option<i64>,
    pub available_stock: i32,
    pub min_per_order: i32,
    pub max_per_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketType {
    pub fn unit_price(&self, is_ems_client: bool) -> i64 {
        match (is_ems_client, self.ems_price_in_cents) {
            (true, Some(ems_price)) => ems_price,
            _ => self.price_in_cents,
        }
    }

    pub fn check_invariants(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Ticket type name is required".to_string(),
            ));
        }
        if self.price_in_cents < 0 || self.ems_price_in_cents.is_some_and(|p| p < 0) {
            return Err(AppError::ValidationError(
                "Prices cannot be negative".to_string(),
            ));
        }
        if self.available_stock < 0 {
            return Err(AppError::ValidationError(
                "Available stock cannot be negative".to_string(),
            ));
        }
        if self.min_per_order < 0 || self.max_per_order < self.min_per_order {
            return Err(AppError::ValidationError(format!(
                "Per-order limits must satisfy 0 <= min <= max, got min {} and max {}",
                self.min_per_order, self.max_per_order
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketTypePayload {
    pub name: String,
    pub description: Option<String>,
    pub price_in_cents: i64,
    pub ems_price_in_cents: Option<i64>,
    pub available_stock: i32,
    #[serde(default = "default_min_per_order")]
    pub min_per_order: i32,
    #[serde(default = "default_max_per_order")]
    pub max_per_order: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl CreateTicketTypePayload {
    pub fn into_ticket_type(self, now: DateTime<Utc>) -> Result<TicketType, AppError> {
        let ticket_type = TicketType {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            price_in_cents: self.price_in_cents,
            ems_price_in_cents: self.ems_price_in_cents,
            available_stock: self.available_stock,
            min_per_order: self.min_per_order,
            max_per_order: self.max_per_order,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        };
        ticket_type.check_invariants()?;
        Ok(ticket_type)
    }
}

fn default_min_per_order() -> i32 {
    1
}

fn default_max_per_order() -> i32 {
    10
}

fn default_active() -> bool {
    true
}

/// Partial update; absent fields keep their stored value. The nullable
/// columns distinguish absent (`None`) from an explicit `null` (`Some(None)`),
/// which clears them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketTypePayload {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub price_in_cents: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub ems_price_in_cents: Option<Option<i64>>,
    pub available_stock: Option<i32>,
    pub min_per_order: Option<i32>,
    pub max_per_order: Option<i32>,
    pub is_active: Option<bool>,
}

impl UpdateTicketTypePayload {
    pub fn apply_to(&self, ticket_type: &mut TicketType) {
        if let Some(name) = &self.name {
            ticket_type.name = name.clone();
        }
        if let Some(description) = &self.description {
            ticket_type.description = description.clone();
        }
        if let Some(price) = self.price_in_cents {
            ticket_type.price_in_cents = price;
        }
        if let Some(ems_price) = self.ems_price_in_cents {
            ticket_type.ems_price_in_cents = ems_price;
        }
        if let Some(stock) = self.available_stock {
            ticket_type.available_stock = stock;
        }
        if let Some(min) = self.min_per_order {
            ticket_type.min_per_order = min;
        }
        if let Some(max) = self.max_per_order {
            ticket_type.max_per_order = max;
        }
        if let Some(active) = self.is_active {
            ticket_type.is_active = active;
        }
    }
}

/// Present-but-null becomes `Some(None)`; `#[serde(default)]` covers absent.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub ticket_type_id: Uuid,
    pub sequence_number: i32,
    pub ticket_code: String,
    pub created_at: DateTime<Utc>,
}

/// A ticket row that has been planned but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub sequence_number: i32,
    pub ticket_code: String,
}

impl NewTicket {
    pub fn into_ticket(self, registration_id: Uuid, created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: self.id,
            registration_id,
            ticket_type_id: self.ticket_type_id,
            sequence_number: self.sequence_number,
            ticket_code: self.ticket_code,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> CreateTicketTypePayload {
        CreateTicketTypePayload {
            name: "Free roam 45 min".to_string(),
            description: None,
            price_in_cents: 3500,
            ems_price_in_cents: Some(3000),
            available_stock: 40,
            min_per_order: 1,
            max_per_order: 6,
            is_active: true,
        }
    }

    #[test]
    fn test_valid_payload_builds_ticket_type() {
        let ticket_type = payload().into_ticket_type(Utc::now()).unwrap();
        assert_eq!(ticket_type.unit_price(true), 3000);
        assert_eq!(ticket_type.unit_price(false), 3500);
    }

    #[test]
    fn test_limits_must_be_ordered() {
        let mut p = payload();
        p.min_per_order = 5;
        p.max_per_order = 2;
        assert!(matches!(
            p.into_ticket_type(Utc::now()),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_patch_cannot_break_invariants() {
        let mut ticket_type = payload().into_ticket_type(Utc::now()).unwrap();
        let patch = UpdateTicketTypePayload {
            available_stock: Some(-1),
            ..Default::default()
        };
        patch.apply_to(&mut ticket_type);
        assert!(ticket_type.check_invariants().is_err());
    }

    #[test]
    fn test_patch_null_clears_and_absent_keeps() {
        let mut ticket_type = payload().into_ticket_type(Utc::now()).unwrap();
        ticket_type.description = Some("Headsets included".to_string());

        let keep: UpdateTicketTypePayload =
            serde_json::from_str(r#"{"priceInCents": 4000}"#).unwrap();
        keep.apply_to(&mut ticket_type);
        assert_eq!(ticket_type.price_in_cents, 4000);
        assert_eq!(ticket_type.ems_price_in_cents, Some(3000));
        assert_eq!(ticket_type.description.as_deref(), Some("Headsets included"));

        let clear: UpdateTicketTypePayload =
            serde_json::from_str(r#"{"description": null, "emsPriceInCents": null}"#).unwrap();
        clear.apply_to(&mut ticket_type);
        assert_eq!(ticket_type.description, None);
        assert_eq!(ticket_type.ems_price_in_cents, None);
        assert_eq!(ticket_type.unit_price(true), 4000);

        let set: UpdateTicketTypePayload =
            serde_json::from_str(r#"{"emsPriceInCents": 2500}"#).unwrap();
        set.apply_to(&mut ticket_type);
        assert_eq!(ticket_type.ems_price_in_cents, Some(2500));
    }
}
