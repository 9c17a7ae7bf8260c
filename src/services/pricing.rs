//! Pricing and discount calculation.
//!
//! Everything in here is a pure function of its arguments. Callers load
//! ticket types and coupons from the store and pass plain values in, so the
//! same inputs always produce the same amounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::{CartLine, Coupon, DiscountType, RegistrationLine, TicketType};
use crate::utils::error::AppError;
use crate::utils::money::{format_amount, Currency};

/// Bounds for the quantity-only booking path.
pub const MIN_QUANTITY: i32 = 1;
pub const MAX_QUANTITY: i32 = 10;

/// Flat per-unit prices used by the quantity-only booking path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTable {
    pub standard_unit_price: i64,
    pub ems_unit_price: i64,
}

impl PriceTable {
    pub fn unit_price(&self, is_ems_client: bool) -> i64 {
        if is_ems_client {
            self.ems_unit_price
        } else {
            self.standard_unit_price
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub applied_coupon_code: Option<String>,
}

/// A coupon code as entered by the customer, together with what the store
/// found for it.
#[derive(Debug, Clone, Copy)]
pub struct CouponContext<'a> {
    pub code: &'a str,
    pub coupon: Option<&'a Coupon>,
    /// Redemptions already recorded for this customer's email.
    pub uses_by_customer: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<RegistrationLine>,
    pub pricing: PricingResult,
}

pub fn calculate_quantity_pricing(
    quantity: i32,
    is_ems_client: bool,
    prices: &PriceTable,
    coupon: Option<CouponContext<'_>>,
    now: DateTime<Utc>,
) -> Result<PricingResult, AppError> {
    if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&quantity) {
        return Err(AppError::ValidationError(format!(
            "Quantity must be between {MIN_QUANTITY} and {MAX_QUANTITY}, got {quantity}"
        )));
    }

    let original_amount = line_total(prices.unit_price(is_ems_client), quantity)?;
    price_with_coupon(original_amount, coupon, now)
}

pub fn calculate_cart_pricing(
    lines: &[CartLine],
    ticket_types: &[TicketType],
    is_ems_client: bool,
    coupon: Option<CouponContext<'_>>,
    now: DateTime<Utc>,
) -> Result<PricedCart, AppError> {
    if lines.is_empty() {
        return Err(AppError::ValidationError(
            "Select at least one ticket".to_string(),
        ));
    }

    let catalog: HashMap<Uuid, &TicketType> = ticket_types.iter().map(|t| (t.id, t)).collect();
    let mut seen = HashSet::with_capacity(lines.len());
    let mut priced_lines = Vec::with_capacity(lines.len());
    let mut original_amount: i64 = 0;

    for line in lines {
        if !seen.insert(line.ticket_type_id) {
            return Err(AppError::ValidationError(format!(
                "Ticket type {} appears more than once",
                line.ticket_type_id
            )));
        }

        let ticket_type = catalog
            .get(&line.ticket_type_id)
            .filter(|t| t.is_active)
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "Ticket type {} is not available",
                    line.ticket_type_id
                ))
            })?;

        validate_line_quantity(line, ticket_type)?;

        let unit_price = ticket_type.unit_price(is_ems_client);
        original_amount = original_amount
            .checked_add(line_total(unit_price, line.quantity)?)
            .ok_or_else(amount_overflow)?;

        priced_lines.push(RegistrationLine {
            ticket_type_id: line.ticket_type_id,
            quantity: line.quantity,
            unit_price_in_cents: unit_price,
        });
    }

    Ok(PricedCart {
        lines: priced_lines,
        pricing: price_with_coupon(original_amount, coupon, now)?,
    })
}

fn validate_line_quantity(line: &CartLine, ticket_type: &TicketType) -> Result<(), AppError> {
    if line.quantity <= 0 {
        return Err(AppError::ValidationError(format!(
            "Quantity for '{}' must be positive",
            ticket_type.name
        )));
    }
    if line.quantity < ticket_type.min_per_order || line.quantity > ticket_type.max_per_order {
        return Err(AppError::ValidationError(format!(
            "Quantity for '{}' must be between {} and {}, got {}",
            ticket_type.name, ticket_type.min_per_order, ticket_type.max_per_order, line.quantity
        )));
    }
    Ok(())
}

fn line_total(unit_price: i64, quantity: i32) -> Result<i64, AppError> {
    if unit_price < 0 {
        return Err(AppError::ValidationError(
            "Unit price cannot be negative".to_string(),
        ));
    }
    unit_price
        .checked_mul(i64::from(quantity))
        .ok_or_else(amount_overflow)
}

fn amount_overflow() -> AppError {
    AppError::ValidationError("Order total is out of range".to_string())
}

fn price_with_coupon(
    original_amount: i64,
    coupon: Option<CouponContext<'_>>,
    now: DateTime<Utc>,
) -> Result<PricingResult, AppError> {
    let (discount_amount, applied_coupon_code) = match coupon {
        Some(ctx) => {
            let discount = apply_coupon(original_amount, ctx, now)?;
            (discount, ctx.coupon.map(|c| c.code.clone()))
        }
        None => (0, None),
    };

    Ok(PricingResult {
        original_amount,
        discount_amount,
        final_amount: (original_amount - discount_amount).max(0),
        applied_coupon_code,
    })
}

/// Validates the coupon against the order and returns the discount in cents.
pub fn apply_coupon(
    original_amount: i64,
    ctx: CouponContext<'_>,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let code = ctx.code.trim();
    let coupon = ctx
        .coupon
        .filter(|c| c.is_active && c.code.eq_ignore_ascii_case(code))
        .ok_or_else(|| AppError::CouponNotFound {
            code: code.to_string(),
        })?;

    if !coupon.is_within_window(now) {
        return Err(AppError::CouponExpired {
            code: coupon.code.clone(),
        });
    }

    if coupon.is_exhausted() {
        return Err(AppError::CouponExhausted {
            code: coupon.code.clone(),
            per_user: false,
        });
    }

    if let Some(per_user) = coupon.max_uses_per_user {
        if ctx.uses_by_customer >= i64::from(per_user) {
            return Err(AppError::CouponExhausted {
                code: coupon.code.clone(),
                per_user: true,
            });
        }
    }

    if let Some(min_order_amount) = coupon.min_order_amount {
        if original_amount < min_order_amount {
            return Err(AppError::CouponMinOrder {
                code: coupon.code.clone(),
                min_order_amount,
                order_amount: original_amount,
            });
        }
    }

    let discount = match coupon.discount_type {
        DiscountType::FixedAmount => coupon.discount_value.max(0),
        DiscountType::Percentage => percentage_of(original_amount, coupon.discount_value),
    };

    Ok(discount.min(original_amount))
}

/// `round_half_up(amount * percent / 100)` in exact integer arithmetic.
fn percentage_of(amount: i64, percent: i64) -> i64 {
    let percent = i128::from(percent.clamp(0, 100));
    let scaled = (i128::from(amount.max(0)) * percent + 50) / 100;
    // percent <= 100 keeps the result <= amount
    i64::try_from(scaled).unwrap_or(amount)
}

/// Pricing as returned over HTTP: raw integer amounts plus display strings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingQuote {
    #[serde(flatten)]
    pub pricing: PricingResult,
    pub currency: Currency,
    pub formatted: FormattedAmounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedAmounts {
    pub original_amount: String,
    pub discount_amount: String,
    pub final_amount: String,
}

impl PricingQuote {
    pub fn new(pricing: PricingResult, currency: Currency) -> Self {
        let formatted = FormattedAmounts {
            original_amount: format_amount(pricing.original_amount, currency),
            discount_amount: format_amount(pricing.discount_amount, currency),
            final_amount: format_amount(pricing.final_amount, currency),
        };
        Self {
            pricing,
            currency,
            formatted,
        }
    }
}
