pub mod booking;
pub mod issuance;
pub mod payment;
pub mod pricing;
