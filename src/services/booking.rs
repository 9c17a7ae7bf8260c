//! Booking workflow: quote, submit, pay, approve, cancel.
//!
//! Each function reads what it needs from the store, hands plain values to
//! the pricing and issuance engines, and writes results back.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::client::normalize_email;
use crate::models::{
    CartLine, ClientDetails, Coupon, CreateRegistrationPayload, NewRegistration, Registration,
    RegistrationDetails, RegistrationLine, RegistrationStatus,
};
use crate::services::issuance::{self, IssuanceOutcome};
use crate::services::payment::PaymentGateway;
use crate::services::pricing::{
    calculate_cart_pricing, calculate_quantity_pricing, CouponContext, PriceTable, PricedCart,
    PricingResult,
};
use crate::store::BookingStore;
use crate::utils::error::AppError;
use crate::utils::money::Currency;

/// Flat-price booking by quantity.
///
/// Units are priced from the [`PriceTable`] and drawn from the stock of one
/// designated ticket type. Quotes and registrations both go through
/// [`price_order`], so the quoted amount is the amount charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityBooking {
    pub prices: PriceTable,
    /// Unset disables the quantity entry point.
    pub ticket_type_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// Quantity-only booking at the flat venue price.
    pub quantity: Option<i32>,
    /// Per-ticket-type selection.
    pub lines: Option<Vec<CartLine>>,
    #[serde(default)]
    pub is_ems_client: bool,
    pub coupon_code: Option<String>,
    /// Needed to honour per-customer coupon limits.
    pub email: Option<String>,
}

/// A coupon code together with what the store knows about it.
struct LoadedCoupon {
    code: String,
    coupon: Option<Coupon>,
    uses_by_customer: i64,
}

impl LoadedCoupon {
    fn context(&self) -> CouponContext<'_> {
        CouponContext {
            code: &self.code,
            coupon: self.coupon.as_ref(),
            uses_by_customer: self.uses_by_customer,
        }
    }
}

async fn load_coupon(
    store: &dyn BookingStore,
    code: Option<&str>,
    email: Option<&str>,
) -> Result<Option<LoadedCoupon>, AppError> {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };

    let coupon = store.find_coupon_by_code(code).await?;
    let uses_by_customer = match (&coupon, email) {
        (Some(c), Some(email)) if c.max_uses_per_user.is_some() => {
            store.count_coupon_redemptions(c.id, email).await?
        }
        _ => 0,
    };

    Ok(Some(LoadedCoupon {
        code: code.to_string(),
        coupon,
        uses_by_customer,
    }))
}

/// What the customer asked for: a bare quantity or explicit ticket lines.
#[derive(Debug, Clone, Copy)]
enum Order<'a> {
    Quantity(i32),
    Lines(&'a [CartLine]),
}

impl<'a> Order<'a> {
    fn from_parts(
        quantity: Option<i32>,
        lines: Option<&'a [CartLine]>,
    ) -> Result<Self, AppError> {
        match (quantity, lines) {
            (Some(quantity), None) => Ok(Order::Quantity(quantity)),
            (None, Some(lines)) => Ok(Order::Lines(lines)),
            _ => Err(AppError::ValidationError(
                "Provide either a quantity or ticket lines".to_string(),
            )),
        }
    }
}

async fn price_order(
    store: &dyn BookingStore,
    booking: &QuantityBooking,
    order: Order<'_>,
    is_ems_client: bool,
    coupon: Option<CouponContext<'_>>,
    now: DateTime<Utc>,
) -> Result<PricedCart, AppError> {
    match order {
        Order::Quantity(quantity) => {
            let unavailable = || {
                AppError::ValidationError(
                    "Booking by quantity is not available, select ticket types instead"
                        .to_string(),
                )
            };
            let ticket_type_id = booking.ticket_type_id.ok_or_else(unavailable)?;
            let active = store
                .find_ticket_types(&[ticket_type_id])
                .await?
                .iter()
                .any(|t| t.id == ticket_type_id && t.is_active);
            if !active {
                return Err(unavailable());
            }

            let pricing =
                calculate_quantity_pricing(quantity, is_ems_client, &booking.prices, coupon, now)?;
            Ok(PricedCart {
                lines: vec![RegistrationLine {
                    ticket_type_id,
                    quantity,
                    unit_price_in_cents: booking.prices.unit_price(is_ems_client),
                }],
                pricing,
            })
        }
        Order::Lines(lines) => {
            let ids: Vec<Uuid> = lines.iter().map(|l| l.ticket_type_id).collect();
            let ticket_types = store.find_ticket_types(&ids).await?;
            calculate_cart_pricing(lines, &ticket_types, is_ems_client, coupon, now)
        }
    }
}

pub async fn quote(
    store: &dyn BookingStore,
    booking: &QuantityBooking,
    request: &QuoteRequest,
    now: DateTime<Utc>,
) -> Result<PricingResult, AppError> {
    let order = Order::from_parts(request.quantity, request.lines.as_deref())?;
    let coupon = load_coupon(
        store,
        request.coupon_code.as_deref(),
        request.email.as_deref(),
    )
    .await?;

    let priced = price_order(
        store,
        booking,
        order,
        request.is_ems_client,
        coupon.as_ref().map(LoadedCoupon::context),
        now,
    )
    .await?;
    Ok(priced.pricing)
}

fn validate_contact(payload: &CreateRegistrationPayload) -> Result<String, AppError> {
    let email = normalize_email(&payload.email);
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(AppError::ValidationError(format!(
            "'{}' is not a valid email address",
            payload.email
        )));
    }
    if payload.first_name.trim().is_empty() || payload.last_name.trim().is_empty() {
        return Err(AppError::ValidationError(
            "First and last name are required".to_string(),
        ));
    }
    Ok(email)
}

/// Prices the order and stores a PENDING registration with the amounts
/// frozen.
pub async fn submit_registration(
    store: &dyn BookingStore,
    booking: &QuantityBooking,
    payload: CreateRegistrationPayload,
    now: DateTime<Utc>,
) -> Result<RegistrationDetails, AppError> {
    let email = validate_contact(&payload)?;
    let lines = (!payload.lines.is_empty()).then_some(payload.lines.as_slice());
    let order = Order::from_parts(payload.quantity, lines)?;

    let coupon = load_coupon(store, payload.coupon_code.as_deref(), Some(&email)).await?;
    let priced = price_order(
        store,
        booking,
        order,
        payload.is_ems_client,
        coupon.as_ref().map(LoadedCoupon::context),
        now,
    )
    .await?;

    let client = store
        .upsert_client(&ClientDetails {
            email: email.clone(),
            first_name: payload.first_name.trim().to_string(),
            last_name: payload.last_name.trim().to_string(),
            phone: payload.phone.clone(),
            is_ems_client: payload.is_ems_client,
        })
        .await?;

    let new = NewRegistration {
        id: Uuid::new_v4(),
        email,
        is_ems_client: payload.is_ems_client,
        lines: priced.lines,
        applied_coupon_code: priced.pricing.applied_coupon_code.clone(),
        coupon_id: coupon.and_then(|c| c.coupon).map(|c| c.id),
        original_amount: priced.pricing.original_amount,
        discount_amount: priced.pricing.discount_amount,
        final_amount: priced.pricing.final_amount,
    };

    let details = store.create_registration(client.id, &new).await?;
    info!(
        registration_id = %details.registration.id,
        final_amount = details.registration.final_amount,
        coupon = ?details.registration.applied_coupon_code,
        "Registration submitted"
    );
    Ok(details)
}

/// Charges the frozen amount, marks the registration PAID and issues its
/// tickets.
///
/// The registration is claimed in the store before the gateway is called, so
/// concurrent attempts get a `Conflict` instead of a second charge. A declined
/// charge releases the claim. Once the charge has gone through, any later
/// failure is reported as `PaymentCapturedIssuanceFailed` with the payment
/// reference so an operator can reconcile it. Nothing is refunded
/// automatically.
pub async fn pay_registration(
    store: &dyn BookingStore,
    gateway: &dyn PaymentGateway,
    currency: Currency,
    registration_id: Uuid,
) -> Result<IssuanceOutcome, AppError> {
    let details = store.claim_payment(registration_id).await?;
    let final_amount = details.registration.final_amount;

    let payment_reference = if final_amount == 0 {
        format!("free-{registration_id}")
    } else {
        match gateway
            .charge(final_amount, currency, &registration_id.to_string())
            .await
        {
            Ok(confirmation) => confirmation.reference,
            Err(e) => {
                if let Err(release) = store.release_payment_claim(registration_id).await {
                    error!(%registration_id, error = %release, "Could not release payment claim");
                }
                return Err(AppError::PaymentFailed(e.to_string()));
            }
        }
    };

    let captured = |reason: String| AppError::PaymentCapturedIssuanceFailed {
        registration_id,
        payment_reference: payment_reference.clone(),
        reason,
    };

    if let Err(e) = store
        .transition_registration(
            registration_id,
            RegistrationStatus::Paid,
            Some(&payment_reference),
        )
        .await
    {
        error!(%registration_id, error = %e, "Could not record captured payment");
        return Err(captured(e.to_string()));
    }

    issuance::issue_tickets(store, registration_id)
        .await
        .map_err(|e| captured(e.to_string()))
}

pub async fn approve_registration(
    store: &dyn BookingStore,
    registration_id: Uuid,
) -> Result<Registration, AppError> {
    let registration = store
        .transition_registration(registration_id, RegistrationStatus::Approved, None)
        .await?;
    info!(%registration_id, "Registration approved");
    Ok(registration)
}

pub async fn cancel_registration(
    store: &dyn BookingStore,
    registration_id: Uuid,
) -> Result<Registration, AppError> {
    let registration = store
        .transition_registration(registration_id, RegistrationStatus::Cancelled, None)
        .await?;
    info!(%registration_id, "Registration cancelled");
    Ok(registration)
}
