//! In-memory [`BookingStore`] for tests and database-less runs.
//!
//! A single mutex guards all state, so every write is serialized.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    not_payable, payment_in_progress, transition_conflict, BookingStore, ClientFilter,
    RegistrationFilter, TicketFilter, TicketTypeFilter,
};
use crate::models::client::normalize_email;
use crate::models::coupon::normalize_code;
use crate::models::{
    Client, ClientDetails, Coupon, NewRegistration, PageParams, Paginated, Registration,
    RegistrationDetails, RegistrationLine, RegistrationStatus, Ticket, TicketType,
    UpdateTicketTypePayload,
};
use crate::services::issuance::{IssuanceOutcome, IssuancePlan};
use crate::utils::error::AppError;

struct StoredRegistration {
    registration: Registration,
    lines: Vec<RegistrationLine>,
    coupon_id: Option<Uuid>,
}

impl StoredRegistration {
    fn details(&self) -> RegistrationDetails {
        RegistrationDetails {
            registration: self.registration.clone(),
            lines: self.lines.clone(),
        }
    }
}

struct Redemption {
    coupon_id: Uuid,
    registration_id: Uuid,
    email: String,
}

#[derive(Default)]
struct State {
    ticket_types: HashMap<Uuid, TicketType>,
    coupons: HashMap<Uuid, Coupon>,
    redemptions: Vec<Redemption>,
    clients: HashMap<Uuid, Client>,
    registrations: HashMap<Uuid, StoredRegistration>,
    tickets: Vec<Ticket>,
}

impl State {
    fn redemptions_for(&self, coupon_id: Uuid, email: &str) -> i64 {
        self.redemptions
            .iter()
            .filter(|r| r.coupon_id == coupon_id && r.email == email)
            .count() as i64
    }

    fn tickets_for(&self, registration_id: Uuid) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|t| t.registration_id == registration_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.sequence_number);
        tickets
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|e| AppError::InternalServerError(format!("store lock poisoned: {e}")))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T: Clone>(items: Vec<T>, page: &PageParams) -> Paginated<T> {
    let total = items.len() as u64;
    Paginated::new(page.slice(&items), page, total)
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn list_ticket_types(
        &self,
        filter: &TicketTypeFilter,
        page: &PageParams,
    ) -> Result<Paginated<TicketType>, AppError> {
        let state = self.lock()?;
        let mut items: Vec<TicketType> = state
            .ticket_types
            .values()
            .filter(|t| filter.active.map_or(true, |active| t.is_active == active))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn find_ticket_types(&self, ids: &[Uuid]) -> Result<Vec<TicketType>, AppError> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.ticket_types.get(id).cloned())
            .collect())
    }

    async fn create_ticket_type(&self, ticket_type: &TicketType) -> Result<TicketType, AppError> {
        ticket_type.check_invariants()?;
        let mut state = self.lock()?;
        state
            .ticket_types
            .insert(ticket_type.id, ticket_type.clone());
        Ok(ticket_type.clone())
    }

    async fn update_ticket_type(
        &self,
        id: Uuid,
        patch: &UpdateTicketTypePayload,
    ) -> Result<TicketType, AppError> {
        let mut state = self.lock()?;
        let stored = state
            .ticket_types
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Ticket type {id}")))?;

        let mut updated = stored.clone();
        patch.apply_to(&mut updated);
        updated.check_invariants()?;
        updated.updated_at = Utc::now();

        *stored = updated.clone();
        Ok(updated)
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, AppError> {
        let code = normalize_code(code);
        let state = self.lock()?;
        Ok(state.coupons.values().find(|c| c.code == code).cloned())
    }

    async fn count_coupon_redemptions(
        &self,
        coupon_id: Uuid,
        email: &str,
    ) -> Result<i64, AppError> {
        let state = self.lock()?;
        Ok(state.redemptions_for(coupon_id, &normalize_email(email)))
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<Coupon, AppError> {
        let mut state = self.lock()?;
        if state.coupons.values().any(|c| c.code == coupon.code) {
            return Err(AppError::Conflict(format!(
                "Coupon code '{}' already exists",
                coupon.code
            )));
        }
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(coupon.clone())
    }

    async fn list_coupons(&self, page: &PageParams) -> Result<Paginated<Coupon>, AppError> {
        let state = self.lock()?;
        let mut items: Vec<Coupon> = state.coupons.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.code.cmp(&b.code)));
        Ok(paginate(items, page))
    }

    async fn upsert_client(&self, details: &ClientDetails) -> Result<Client, AppError> {
        let email = normalize_email(&details.email);
        let now = Utc::now();
        let mut state = self.lock()?;

        if let Some(client) = state.clients.values_mut().find(|c| c.email == email) {
            client.first_name = details.first_name.clone();
            client.last_name = details.last_name.clone();
            client.phone = details.phone.clone();
            client.is_ems_client = details.is_ems_client;
            client.updated_at = now;
            return Ok(client.clone());
        }

        let client = Client {
            id: Uuid::new_v4(),
            email,
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            phone: details.phone.clone(),
            is_ems_client: details.is_ems_client,
            created_at: now,
            updated_at: now,
        };
        state.clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: &PageParams,
    ) -> Result<Paginated<Client>, AppError> {
        let state = self.lock()?;
        let mut items: Vec<Client> = state
            .clients
            .values()
            .filter(|c| match filter.search.as_deref() {
                Some(term) => {
                    contains_ignore_case(&c.email, term)
                        || contains_ignore_case(&c.first_name, term)
                        || contains_ignore_case(&c.last_name, term)
                }
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn create_registration(
        &self,
        client_id: Uuid,
        new: &NewRegistration,
    ) -> Result<RegistrationDetails, AppError> {
        let email = normalize_email(&new.email);
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if let Some(coupon_id) = new.coupon_id {
            let code = new.applied_coupon_code.clone().unwrap_or_default();
            let used_by_customer = state.redemptions_for(coupon_id, &email);
            let coupon = state
                .coupons
                .get_mut(&coupon_id)
                .ok_or_else(|| AppError::CouponNotFound { code: code.clone() })?;

            if coupon.is_exhausted() {
                return Err(AppError::CouponExhausted {
                    code,
                    per_user: false,
                });
            }
            if coupon
                .max_uses_per_user
                .is_some_and(|cap| used_by_customer >= i64::from(cap))
            {
                return Err(AppError::CouponExhausted {
                    code,
                    per_user: true,
                });
            }

            coupon.current_uses += 1;
            state.redemptions.push(Redemption {
                coupon_id,
                registration_id: new.id,
                email: email.clone(),
            });
        }

        let now = Utc::now();
        let stored = StoredRegistration {
            registration: Registration {
                id: new.id,
                client_id,
                email,
                status: RegistrationStatus::Pending,
                is_ems_client: new.is_ems_client,
                applied_coupon_code: new.applied_coupon_code.clone(),
                original_amount: new.original_amount,
                discount_amount: new.discount_amount,
                final_amount: new.final_amount,
                payment_reference: None,
                payment_started_at: None,
                tickets_issued_at: None,
                created_at: now,
                updated_at: now,
            },
            lines: new.lines.clone(),
            coupon_id: new.coupon_id,
        };
        let details = stored.details();
        state.registrations.insert(new.id, stored);
        Ok(details)
    }

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationDetails>, AppError> {
        let state = self.lock()?;
        Ok(state.registrations.get(&id).map(StoredRegistration::details))
    }

    async fn list_registrations(
        &self,
        filter: &RegistrationFilter,
        page: &PageParams,
    ) -> Result<Paginated<Registration>, AppError> {
        let state = self.lock()?;
        let mut items: Vec<Registration> = state
            .registrations
            .values()
            .map(|s| &s.registration)
            .filter(|r| filter.status.map_or(true, |status| r.status == status))
            .filter(|r| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |term| contains_ignore_case(&r.email, term))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn claim_payment(&self, id: Uuid) -> Result<RegistrationDetails, AppError> {
        let mut state = self.lock()?;
        let stored = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Registration {id}")))?;

        let registration = &mut stored.registration;
        if registration.status != RegistrationStatus::Pending {
            return Err(not_payable(registration.status));
        }
        if registration.payment_started_at.is_some() {
            return Err(payment_in_progress());
        }

        let now = Utc::now();
        registration.payment_started_at = Some(now);
        registration.updated_at = now;
        Ok(stored.details())
    }

    async fn release_payment_claim(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock()?;
        if let Some(stored) = state.registrations.get_mut(&id) {
            if stored.registration.status == RegistrationStatus::Pending {
                stored.registration.payment_started_at = None;
                stored.registration.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn transition_registration(
        &self,
        id: Uuid,
        next: RegistrationStatus,
        payment_reference: Option<&str>,
    ) -> Result<Registration, AppError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let stored = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Registration {id}")))?;
        let current = stored.registration.status;

        if !current.can_transition_to(next) {
            return Err(transition_conflict(current, next));
        }
        if next == RegistrationStatus::Cancelled && stored.registration.tickets_issued_at.is_some()
        {
            return Err(AppError::Conflict(
                "Tickets were already issued for this registration".to_string(),
            ));
        }
        if next == RegistrationStatus::Approved && stored.registration.payment_started_at.is_some()
        {
            return Err(payment_in_progress());
        }

        stored.registration.status = next;
        if let Some(reference) = payment_reference {
            stored.registration.payment_reference = Some(reference.to_string());
        }
        stored.registration.updated_at = Utc::now();
        let updated = stored.registration.clone();
        let coupon_id = stored.coupon_id;

        if next == RegistrationStatus::Cancelled {
            if let Some(coupon_id) = coupon_id {
                let before = state.redemptions.len();
                state.redemptions.retain(|r| r.registration_id != id);
                if state.redemptions.len() < before {
                    if let Some(coupon) = state.coupons.get_mut(&coupon_id) {
                        coupon.current_uses = (coupon.current_uses - 1).max(0);
                    }
                }
            }
        }

        Ok(updated)
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: &PageParams,
    ) -> Result<Paginated<Ticket>, AppError> {
        let state = self.lock()?;
        let mut items: Vec<Ticket> = state
            .tickets
            .iter()
            .filter(|t| {
                filter
                    .registration_id
                    .map_or(true, |id| t.registration_id == id)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(a.registration_id.cmp(&b.registration_id))
                .then(a.sequence_number.cmp(&b.sequence_number))
        });
        Ok(paginate(items, page))
    }

    async fn list_tickets_for_registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Vec<Ticket>, AppError> {
        let state = self.lock()?;
        Ok(state.tickets_for(registration_id))
    }

    async fn commit_issuance(&self, plan: &IssuancePlan) -> Result<IssuanceOutcome, AppError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let registration_id = plan.registration_id;

        let stored = state
            .registrations
            .get_mut(&registration_id)
            .ok_or_else(|| AppError::NotFound(format!("Registration {registration_id}")))?;

        if stored.registration.tickets_issued_at.is_some() {
            return Ok(IssuanceOutcome {
                tickets: state.tickets_for(registration_id),
                newly_issued: false,
            });
        }
        if !stored.registration.status.is_issuable() {
            return Err(AppError::NotApproved {
                registration_id,
                status: stored.registration.status,
            });
        }

        // Check everything before touching anything.
        for decrement in &plan.decrements {
            let available = state
                .ticket_types
                .get(&decrement.ticket_type_id)
                .map_or(0, |t| t.available_stock);
            if available < decrement.quantity {
                return Err(AppError::InsufficientStock {
                    ticket_type_id: decrement.ticket_type_id,
                    requested: i64::from(decrement.quantity),
                    available: i64::from(available),
                });
            }
        }

        let now = Utc::now();
        for decrement in &plan.decrements {
            if let Some(ticket_type) = state.ticket_types.get_mut(&decrement.ticket_type_id) {
                ticket_type.available_stock -= decrement.quantity;
                ticket_type.updated_at = now;
            }
        }

        stored.registration.tickets_issued_at = Some(now);
        stored.registration.updated_at = now;

        let tickets: Vec<Ticket> = plan
            .tickets
            .iter()
            .cloned()
            .map(|t| t.into_ticket(registration_id, now))
            .collect();
        state.tickets.extend(tickets.iter().cloned());

        Ok(IssuanceOutcome {
            tickets,
            newly_issued: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::coupon::DiscountType;
    use crate::services::issuance::issue_tickets;

    async fn seed_ticket_type(store: &InMemoryBookingStore, stock: i32) -> TicketType {
        let now = Utc::now();
        let ticket_type = TicketType {
            id: Uuid::new_v4(),
            name: "Arena 30 min".to_string(),
            description: None,
            price_in_cents: 2000,
            ems_price_in_cents: None,
            available_stock: stock,
            min_per_order: 1,
            max_per_order: 10,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.create_ticket_type(&ticket_type).await.unwrap()
    }

    async fn seed_coupon(store: &InMemoryBookingStore, max_uses: Option<i32>) -> Coupon {
        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: "VR10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            min_order_amount: None,
            max_uses,
            current_uses: 0,
            max_uses_per_user: None,
            valid_from: None,
            valid_until: None,
            is_active: true,
            created_at: Utc::now(),
        };
        store.create_coupon(&coupon).await.unwrap()
    }

    async fn registration(
        store: &InMemoryBookingStore,
        email: &str,
        ticket_type_id: Uuid,
        quantity: i32,
        coupon: Option<&Coupon>,
    ) -> Result<RegistrationDetails, AppError> {
        let client = store
            .upsert_client(&ClientDetails {
                email: email.to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                phone: None,
                is_ems_client: false,
            })
            .await?;
        let original = 2000 * i64::from(quantity);
        store
            .create_registration(
                client.id,
                &NewRegistration {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    is_ems_client: false,
                    lines: vec![RegistrationLine {
                        ticket_type_id,
                        quantity,
                        unit_price_in_cents: 2000,
                    }],
                    applied_coupon_code: coupon.map(|c| c.code.clone()),
                    coupon_id: coupon.map(|c| c.id),
                    original_amount: original,
                    discount_amount: 0,
                    final_amount: original,
                },
            )
            .await
    }

    async fn paid_registration(
        store: &InMemoryBookingStore,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Uuid {
        let details = registration(store, "guest@example.com", ticket_type_id, quantity, None)
            .await
            .unwrap();
        let id = details.registration.id;
        store
            .transition_registration(id, RegistrationStatus::Paid, Some("ref"))
            .await
            .unwrap();
        id
    }

    async fn stock_of(store: &InMemoryBookingStore, id: Uuid) -> i32 {
        store.find_ticket_types(&[id]).await.unwrap()[0].available_stock
    }

    #[tokio::test]
    async fn test_issuance_decrements_stock_and_numbers_tickets() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 5).await;
        let id = paid_registration(&store, arena.id, 3).await;

        let outcome = issue_tickets(&store, id).await.unwrap();

        assert!(outcome.newly_issued);
        assert_eq!(
            outcome
                .tickets
                .iter()
                .map(|t| t.sequence_number)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(stock_of(&store, arena.id).await, 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_mutates_nothing() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let escape = seed_ticket_type(&store, 1).await;

        let client = store
            .upsert_client(&ClientDetails {
                email: "group@example.com".to_string(),
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                phone: None,
                is_ems_client: false,
            })
            .await
            .unwrap();
        let details = store
            .create_registration(
                client.id,
                &NewRegistration {
                    id: Uuid::new_v4(),
                    email: client.email.clone(),
                    is_ems_client: false,
                    lines: vec![
                        RegistrationLine {
                            ticket_type_id: arena.id,
                            quantity: 4,
                            unit_price_in_cents: 2000,
                        },
                        RegistrationLine {
                            ticket_type_id: escape.id,
                            quantity: 2,
                            unit_price_in_cents: 2000,
                        },
                    ],
                    applied_coupon_code: None,
                    coupon_id: None,
                    original_amount: 12_000,
                    discount_amount: 0,
                    final_amount: 12_000,
                },
            )
            .await
            .unwrap();
        let id = details.registration.id;
        store
            .transition_registration(id, RegistrationStatus::Approved, None)
            .await
            .unwrap();

        let err = issue_tickets(&store, id).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientStock { .. }));
        assert_eq!(stock_of(&store, arena.id).await, 10);
        assert_eq!(stock_of(&store, escape.id).await, 1);
        assert!(store
            .list_tickets_for_registration(id)
            .await
            .unwrap()
            .is_empty());
        let reloaded = store.get_registration(id).await.unwrap().unwrap();
        assert!(reloaded.registration.tickets_issued_at.is_none());
    }

    #[tokio::test]
    async fn test_reissue_creates_no_duplicates() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 5).await;
        let id = paid_registration(&store, arena.id, 2).await;

        let first = issue_tickets(&store, id).await.unwrap();
        let second = issue_tickets(&store, id).await.unwrap();

        assert!(first.newly_issued);
        assert!(!second.newly_issued);
        assert_eq!(first.tickets, second.tickets);
        assert_eq!(store.list_tickets_for_registration(id).await.unwrap().len(), 2);
        assert_eq!(stock_of(&store, arena.id).await, 3);
    }

    #[tokio::test]
    async fn test_pending_registration_is_not_issued() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 5).await;
        let details = registration(&store, "guest@example.com", arena.id, 1, None)
            .await
            .unwrap();

        let err = issue_tickets(&store, details.registration.id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotApproved { .. }));
        assert_eq!(stock_of(&store, arena.id).await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issuance_never_oversells() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 3).await;

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(paid_registration(&store, arena.id, 3).await);
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move { issue_tickets(&store, id).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    assert_eq!(outcome.tickets.len(), 3);
                    succeeded += 1;
                }
                Err(err) => assert!(matches!(err, AppError::InsufficientStock { .. })),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(stock_of(&store, arena.id).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issuance_of_one_registration_is_single() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let id = paid_registration(&store, arena.id, 2).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { issue_tickets(&store, id).await })
            })
            .collect();

        let mut newly_issued = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().newly_issued {
                newly_issued += 1;
            }
        }

        assert_eq!(newly_issued, 1);
        assert_eq!(store.list_tickets_for_registration(id).await.unwrap().len(), 2);
        assert_eq!(stock_of(&store, arena.id).await, 8);
    }

    #[tokio::test]
    async fn test_coupon_cap_enforced_at_submission() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let coupon = seed_coupon(&store, Some(1)).await;

        registration(&store, "first@example.com", arena.id, 1, Some(&coupon))
            .await
            .unwrap();
        let err = registration(&store, "second@example.com", arena.id, 1, Some(&coupon))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::CouponExhausted {
                per_user: false,
                ..
            }
        ));
        let stored = store.find_coupon_by_code("vr10").await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_coupon_use() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let coupon = seed_coupon(&store, Some(5)).await;

        let details = registration(&store, "guest@example.com", arena.id, 1, Some(&coupon))
            .await
            .unwrap();
        assert_eq!(
            store
                .count_coupon_redemptions(coupon.id, "GUEST@example.com")
                .await
                .unwrap(),
            1
        );

        store
            .transition_registration(details.registration.id, RegistrationStatus::Cancelled, None)
            .await
            .unwrap();

        let stored = store.find_coupon_by_code("VR10").await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 0);
        assert_eq!(
            store
                .count_coupon_redemptions(coupon.id, "guest@example.com")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_conflict() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let id = paid_registration(&store, arena.id, 1).await;

        let err = store
            .transition_registration(id, RegistrationStatus::Paid, Some("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = store
            .transition_registration(id, RegistrationStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_payment_claim_is_exclusive_until_released() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;
        let id = registration(&store, "claim@example.com", arena.id, 1, None)
            .await
            .unwrap()
            .registration
            .id;

        let claimed = store.claim_payment(id).await.unwrap();
        assert!(claimed.registration.payment_started_at.is_some());

        let err = store.claim_payment(id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = store
            .transition_registration(id, RegistrationStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        store.release_payment_claim(id).await.unwrap();
        let approved = store
            .transition_registration(id, RegistrationStatus::Approved, None)
            .await
            .unwrap();
        assert_eq!(approved.status, RegistrationStatus::Approved);
        assert!(approved.payment_started_at.is_none());

        let err = store.claim_payment(id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_ticket_type_keeps_invariants() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 10).await;

        let err = store
            .update_ticket_type(
                arena.id,
                &UpdateTicketTypePayload {
                    min_per_order: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let updated = store
            .update_ticket_type(
                arena.id,
                &UpdateTicketTypePayload {
                    available_stock: Some(25),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.available_stock, 25);
        assert_eq!(updated.min_per_order, 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = InMemoryBookingStore::new();
        let arena = seed_ticket_type(&store, 100).await;
        for i in 0..5 {
            registration(&store, &format!("guest{i}@example.com"), arena.id, 1, None)
                .await
                .unwrap();
        }
        let paid = paid_registration(&store, arena.id, 1).await;

        let page = store
            .list_registrations(
                &RegistrationFilter::default(),
                &PageParams {
                    page: Some(2),
                    limit: Some(4),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination.total, 6);
        assert_eq!(page.pagination.total_pages, 2);

        let only_paid = store
            .list_registrations(
                &RegistrationFilter {
                    status: Some(RegistrationStatus::Paid),
                    search: None,
                },
                &PageParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(only_paid.items.len(), 1);
        assert_eq!(only_paid.items[0].id, paid);

        let clients = store
            .list_clients(
                &ClientFilter {
                    search: Some("GUEST3".to_string()),
                },
                &PageParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(clients.items.len(), 1);
    }
}
