use std::sync::Arc;

use crate::services::booking::QuantityBooking;
use crate::services::payment::PaymentGateway;
use crate::store::BookingStore;
use crate::utils::money::Currency;

/// Collaborators shared by every handler. Built once in `main` (or in a
/// test) and handed to the router.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub quantity_booking: QuantityBooking,
    pub currency: Currency,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        quantity_booking: QuantityBooking,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            gateway,
            quantity_booking,
            currency,
        }
    }
}
