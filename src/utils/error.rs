use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::RegistrationStatus;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Coupon '{code}' does not exist")]
    CouponNotFound { code: String },

    #[error("Coupon '{code}' is not valid at this time")]
    CouponExpired { code: String },

    #[error("Coupon '{code}' has no remaining uses")]
    CouponExhausted { code: String, per_user: bool },

    #[error("Coupon '{code}' requires a minimum order of {min_order_amount} cents")]
    CouponMinOrder {
        code: String,
        min_order_amount: i64,
        order_amount: i64,
    },

    #[error("Registration {registration_id} is {status}; tickets cannot be issued")]
    NotApproved {
        registration_id: Uuid,
        status: RegistrationStatus,
    },

    #[error("Not enough tickets left for ticket type {ticket_type_id}")]
    InsufficientStock {
        ticket_type_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Payment {payment_reference} was captured but ticket issuance failed")]
    PaymentCapturedIssuanceFailed {
        registration_id: Uuid,
        payment_reference: String,
        reason: String,
    },

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::CouponNotFound { .. } | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CouponExpired { .. }
            | AppError::CouponExhausted { .. }
            | AppError::CouponMinOrder { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotApproved { .. }
            | AppError::InsufficientStock { .. }
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::PaymentCapturedIssuanceFailed { .. }
            | AppError::DatabaseError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::CouponNotFound { .. } => "COUPON_NOT_FOUND",
            AppError::CouponExpired { .. } => "COUPON_EXPIRED",
            AppError::CouponExhausted { .. } => "COUPON_EXHAUSTED",
            AppError::CouponMinOrder { .. } => "COUPON_MIN_ORDER",
            AppError::NotApproved { .. } => "NOT_APPROVED",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PaymentFailed(_) => "PAYMENT_FAILED",
            AppError::PaymentCapturedIssuanceFailed { .. } => "ISSUANCE_FAILED_AFTER_PAYMENT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Structured context safe to hand back to the caller.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::CouponExhausted { per_user, .. } => Some(json!({ "perUser": per_user })),
            AppError::CouponMinOrder {
                min_order_amount,
                order_amount,
                ..
            } => Some(json!({
                "minOrderAmount": min_order_amount,
                "orderAmount": order_amount,
            })),
            AppError::NotApproved { status, .. } => Some(json!({ "status": status })),
            AppError::InsufficientStock {
                ticket_type_id,
                requested,
                available,
            } => Some(json!({
                "ticketTypeId": ticket_type_id,
                "requested": requested,
                "available": available,
            })),
            AppError::PaymentCapturedIssuanceFailed {
                registration_id,
                payment_reference,
                ..
            } => Some(json!({
                "registrationId": registration_id,
                "paymentReference": payment_reference,
            })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal server error");
            }
            AppError::PaymentCapturedIssuanceFailed {
                registration_id,
                payment_reference,
                reason,
            } => {
                error!(
                    %registration_id,
                    %payment_reference,
                    %reason,
                    "Ticket issuance failed after payment capture, needs reconciliation"
                );
            }
            other => {
                warn!(code = other.code(), message = %other, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::PaymentFailed(msg) => msg.clone(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}
