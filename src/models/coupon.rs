use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "discount_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` is a whole percentage (0..=100).
    Percentage,
    /// `discount_value` is an amount in cents.
    FixedAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_order_amount: Option<i64>,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub max_uses_per_user: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_uses, Some(max) if self.current_uses >= max)
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        let started = self.valid_from.map_or(true, |from| now >= from);
        let not_ended = self.valid_until.map_or(true, |until| now <= until);
        started && not_ended
    }
}

/// Coupon codes are stored and compared upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponPayload {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_order_amount: Option<i64>,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl CreateCouponPayload {
    pub fn into_coupon(self, now: DateTime<Utc>) -> Result<Coupon, AppError> {
        let code = normalize_code(&self.code);
        if code.is_empty() {
            return Err(AppError::ValidationError("Coupon code is required".to_string()));
        }
        if self.discount_value < 0 {
            return Err(AppError::ValidationError(
                "Discount value cannot be negative".to_string(),
            ));
        }
        if self.discount_type == DiscountType::Percentage && self.discount_value > 100 {
            return Err(AppError::ValidationError(
                "Percentage discounts cannot exceed 100".to_string(),
            ));
        }
        if self.max_uses.is_some_and(|m| m < 0) || self.max_uses_per_user.is_some_and(|m| m < 0)
        {
            return Err(AppError::ValidationError(
                "Usage limits cannot be negative".to_string(),
            ));
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until < from {
                return Err(AppError::ValidationError(
                    "Coupon validity ends before it starts".to_string(),
                ));
            }
        }

        Ok(Coupon {
            id: Uuid::new_v4(),
            code,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            min_order_amount: self.min_order_amount,
            max_uses: self.max_uses,
            current_uses: 0,
            max_uses_per_user: self.max_uses_per_user,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            is_active: true,
            created_at: now,
        })
    }
}
