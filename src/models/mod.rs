pub mod client;
pub mod coupon;
pub mod pagination;
pub mod registration;
pub mod ticket;

pub use client::{Client, ClientDetails};
pub use coupon::{Coupon, CreateCouponPayload, DiscountType};
pub use pagination::{PageParams, Paginated};
pub use registration::{
    CartLine, CreateRegistrationPayload, NewRegistration, Registration, RegistrationDetails,
    RegistrationLine, RegistrationStatus,
};
pub use ticket::{
    CreateTicketTypePayload, NewTicket, Ticket, TicketType, UpdateTicketTypePayload,
};
