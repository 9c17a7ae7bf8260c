//! Postgres-backed [`BookingStore`].
//!
//! Each mutation runs in one transaction. Stock and coupon counters are only
//! ever changed through conditional `UPDATE`s, so concurrent requests cannot
//! push them past their bounds.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
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

const TICKET_TYPE_COLUMNS: &str = "id, name, description, price_in_cents, ems_price_in_cents, \
     available_stock, min_per_order, max_per_order, is_active, created_at, updated_at";

const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, min_order_amount, \
     max_uses, current_uses, max_uses_per_user, valid_from, valid_until, is_active, created_at";

const CLIENT_COLUMNS: &str =
    "id, email, first_name, last_name, phone, is_ems_client, created_at, updated_at";

const REGISTRATION_COLUMNS: &str = "id, client_id, email, status, is_ems_client, \
     applied_coupon_code, original_amount, discount_amount, final_amount, payment_reference, \
     payment_started_at, tickets_issued_at, created_at, updated_at";

const TICKET_COLUMNS: &str =
    "id, registration_id, ticket_type_id, sequence_number, ticket_code, created_at";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lines_for(&self, registration_id: Uuid) -> Result<Vec<RegistrationLine>, AppError> {
        let lines = sqlx::query_as::<_, RegistrationLine>(
            "SELECT ticket_type_id, quantity, unit_price_in_cents FROM registration_lines \
             WHERE registration_id = $1 ORDER BY position",
        )
        .bind(registration_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }
}

async fn lock_registration(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Registration, AppError> {
    let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, Registration>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Registration {id}")))
}

async fn tickets_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    registration_id: Uuid,
) -> Result<Vec<Ticket>, AppError> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE registration_id = $1 ORDER BY sequence_number"
    );
    let tickets = sqlx::query_as::<_, Ticket>(&sql)
        .bind(registration_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(tickets)
}

fn like_pattern(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("%{}%", t.replace('%', "\\%").replace('_', "\\_")))
}

fn limit_offset(page: &PageParams) -> (i64, i64) {
    (
        i64::from(page.limit()),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn list_ticket_types(
        &self,
        filter: &TicketTypeFilter,
        page: &PageParams,
    ) -> Result<Paginated<TicketType>, AppError> {
        let (limit, offset) = limit_offset(page);
        let sql = format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types \
             WHERE ($1::boolean IS NULL OR is_active = $1) \
             ORDER BY name, id LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, TicketType>(&sql)
            .bind(filter.active)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ticket_types WHERE ($1::boolean IS NULL OR is_active = $1)",
        )
        .bind(filter.active)
        .fetch_one(&self.pool)
        .await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn find_ticket_types(&self, ids: &[Uuid]) -> Result<Vec<TicketType>, AppError> {
        let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ANY($1)");
        let items = sqlx::query_as::<_, TicketType>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn create_ticket_type(&self, ticket_type: &TicketType) -> Result<TicketType, AppError> {
        ticket_type.check_invariants()?;
        let sql = format!(
            "INSERT INTO ticket_types ({TICKET_TYPE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {TICKET_TYPE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, TicketType>(&sql)
            .bind(ticket_type.id)
            .bind(&ticket_type.name)
            .bind(&ticket_type.description)
            .bind(ticket_type.price_in_cents)
            .bind(ticket_type.ems_price_in_cents)
            .bind(ticket_type.available_stock)
            .bind(ticket_type.min_per_order)
            .bind(ticket_type.max_per_order)
            .bind(ticket_type.is_active)
            .bind(ticket_type.created_at)
            .bind(ticket_type.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn update_ticket_type(
        &self,
        id: Uuid,
        patch: &UpdateTicketTypePayload,
    ) -> Result<TicketType, AppError> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1 FOR UPDATE");
        let mut ticket_type = sqlx::query_as::<_, TicketType>(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket type {id}")))?;

        patch.apply_to(&mut ticket_type);
        ticket_type.check_invariants()?;

        let update = format!(
            "UPDATE ticket_types SET name = $2, description = $3, price_in_cents = $4, \
             ems_price_in_cents = $5, available_stock = $6, min_per_order = $7, \
             max_per_order = $8, is_active = $9, updated_at = $10 \
             WHERE id = $1 RETURNING {TICKET_TYPE_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, TicketType>(&update)
            .bind(id)
            .bind(&ticket_type.name)
            .bind(&ticket_type.description)
            .bind(ticket_type.price_in_cents)
            .bind(ticket_type.ems_price_in_cents)
            .bind(ticket_type.available_stock)
            .bind(ticket_type.min_per_order)
            .bind(ticket_type.max_per_order)
            .bind(ticket_type.is_active)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, AppError> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(normalize_code(code))
            .fetch_optional(&self.pool)
            .await?;
        Ok(coupon)
    }

    async fn count_coupon_redemptions(
        &self,
        coupon_id: Uuid,
        email: &str,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_id = $1 AND email = $2",
        )
        .bind(coupon_id)
        .bind(normalize_email(email))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<Coupon, AppError> {
        let sql = format!(
            "INSERT INTO coupons ({COUPON_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COUPON_COLUMNS}"
        );
        let result = sqlx::query_as::<_, Coupon>(&sql)
            .bind(coupon.id)
            .bind(&coupon.code)
            .bind(coupon.discount_type)
            .bind(coupon.discount_value)
            .bind(coupon.min_order_amount)
            .bind(coupon.max_uses)
            .bind(coupon.current_uses)
            .bind(coupon.max_uses_per_user)
            .bind(coupon.valid_from)
            .bind(coupon.valid_until)
            .bind(coupon.is_active)
            .bind(coupon.created_at)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(created) => Ok(created),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
                "Coupon code '{}' already exists",
                coupon.code
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_coupons(&self, page: &PageParams) -> Result<Paginated<Coupon>, AppError> {
        let (limit, offset) = limit_offset(page);
        let sql = format!(
            "SELECT {COUPON_COLUMNS} FROM coupons ORDER BY created_at DESC, code LIMIT $1 OFFSET $2"
        );
        let items = sqlx::query_as::<_, Coupon>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
            .fetch_one(&self.pool)
            .await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn upsert_client(&self, details: &ClientDetails) -> Result<Client, AppError> {
        let sql = format!(
            "INSERT INTO clients ({CLIENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             ON CONFLICT (email) DO UPDATE SET first_name = EXCLUDED.first_name, \
             last_name = EXCLUDED.last_name, phone = EXCLUDED.phone, \
             is_ems_client = EXCLUDED.is_ems_client, updated_at = EXCLUDED.updated_at \
             RETURNING {CLIENT_COLUMNS}"
        );
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(Uuid::new_v4())
            .bind(normalize_email(&details.email))
            .bind(&details.first_name)
            .bind(&details.last_name)
            .bind(&details.phone)
            .bind(details.is_ems_client)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;
        Ok(client)
    }

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: &PageParams,
    ) -> Result<Paginated<Client>, AppError> {
        let (limit, offset) = limit_offset(page);
        let pattern = like_pattern(filter.search.as_deref());
        let condition = "($1::text IS NULL OR email ILIKE $1 OR first_name ILIKE $1 \
                         OR last_name ILIKE $1)";

        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE {condition} \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, Client>(&sql)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM clients WHERE {condition}"
        ))
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn create_registration(
        &self,
        client_id: Uuid,
        new: &NewRegistration,
    ) -> Result<RegistrationDetails, AppError> {
        let email = normalize_email(&new.email);
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO registrations (id, client_id, email, status, is_ems_client, \
             applied_coupon_code, coupon_id, original_amount, discount_amount, final_amount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {REGISTRATION_COLUMNS}"
        );
        let registration = sqlx::query_as::<_, Registration>(&insert)
            .bind(new.id)
            .bind(client_id)
            .bind(&email)
            .bind(RegistrationStatus::Pending)
            .bind(new.is_ems_client)
            .bind(&new.applied_coupon_code)
            .bind(new.coupon_id)
            .bind(new.original_amount)
            .bind(new.discount_amount)
            .bind(new.final_amount)
            .fetch_one(&mut *tx)
            .await?;

        for (position, line) in new.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO registration_lines \
                 (registration_id, ticket_type_id, quantity, unit_price_in_cents, position) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(new.id)
            .bind(line.ticket_type_id)
            .bind(line.quantity)
            .bind(line.unit_price_in_cents)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(coupon_id) = new.coupon_id {
            let code = new.applied_coupon_code.clone().unwrap_or_default();

            // Row lock on the coupon also serializes the per-customer check below.
            let per_user_cap: Option<Option<i32>> = sqlx::query_scalar(
                "UPDATE coupons SET current_uses = current_uses + 1 \
                 WHERE id = $1 AND is_active AND (max_uses IS NULL OR current_uses < max_uses) \
                 RETURNING max_uses_per_user",
            )
            .bind(coupon_id)
            .fetch_optional(&mut *tx)
            .await?;

            let per_user_cap = per_user_cap.ok_or_else(|| AppError::CouponExhausted {
                code: code.clone(),
                per_user: false,
            })?;

            if let Some(cap) = per_user_cap {
                let used: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_id = $1 AND email = $2",
                )
                .bind(coupon_id)
                .bind(&email)
                .fetch_one(&mut *tx)
                .await?;
                if used >= i64::from(cap) {
                    return Err(AppError::CouponExhausted {
                        code,
                        per_user: true,
                    });
                }
            }

            sqlx::query(
                "INSERT INTO coupon_redemptions (coupon_id, registration_id, email) \
                 VALUES ($1, $2, $3)",
            )
            .bind(coupon_id)
            .bind(new.id)
            .bind(&email)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(RegistrationDetails {
            registration,
            lines: new.lines.clone(),
        })
    }

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationDetails>, AppError> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1");
        let registration = sqlx::query_as::<_, Registration>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match registration {
            Some(registration) => Ok(Some(RegistrationDetails {
                lines: self.lines_for(id).await?,
                registration,
            })),
            None => Ok(None),
        }
    }

    async fn list_registrations(
        &self,
        filter: &RegistrationFilter,
        page: &PageParams,
    ) -> Result<Paginated<Registration>, AppError> {
        let (limit, offset) = limit_offset(page);
        let pattern = like_pattern(filter.search.as_deref());
        let condition = "($1::registration_status IS NULL OR status = $1) \
                         AND ($2::text IS NULL OR email ILIKE $2)";

        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE {condition} \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        );
        let items = sqlx::query_as::<_, Registration>(&sql)
            .bind(filter.status)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM registrations WHERE {condition}"
        ))
        .bind(filter.status)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn claim_payment(&self, id: Uuid) -> Result<RegistrationDetails, AppError> {
        let sql = format!(
            "UPDATE registrations SET payment_started_at = $3, updated_at = $3 \
             WHERE id = $1 AND status = $2 AND payment_started_at IS NULL \
             RETURNING {REGISTRATION_COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, Registration>(&sql)
            .bind(id)
            .bind(RegistrationStatus::Pending)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        match claimed {
            Some(registration) => Ok(RegistrationDetails {
                lines: self.lines_for(id).await?,
                registration,
            }),
            None => {
                let current = self
                    .get_registration(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Registration {id}")))?;
                if current.registration.status != RegistrationStatus::Pending {
                    Err(not_payable(current.registration.status))
                } else {
                    Err(payment_in_progress())
                }
            }
        }
    }

    async fn release_payment_claim(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE registrations SET payment_started_at = NULL, updated_at = now() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(RegistrationStatus::Pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_registration(
        &self,
        id: Uuid,
        next: RegistrationStatus,
        payment_reference: Option<&str>,
    ) -> Result<Registration, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_registration(&mut tx, id).await?;

        if !current.status.can_transition_to(next) {
            return Err(transition_conflict(current.status, next));
        }
        if next == RegistrationStatus::Cancelled && current.tickets_issued_at.is_some() {
            return Err(AppError::Conflict(
                "Tickets were already issued for this registration".to_string(),
            ));
        }
        if next == RegistrationStatus::Approved && current.payment_started_at.is_some() {
            return Err(payment_in_progress());
        }

        let sql = format!(
            "UPDATE registrations SET status = $2, \
             payment_reference = COALESCE($3, payment_reference), updated_at = $4 \
             WHERE id = $1 RETURNING {REGISTRATION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Registration>(&sql)
            .bind(id)
            .bind(next)
            .bind(payment_reference)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

        if next == RegistrationStatus::Cancelled {
            let released: Option<Uuid> = sqlx::query_scalar(
                "DELETE FROM coupon_redemptions WHERE registration_id = $1 RETURNING coupon_id",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(coupon_id) = released {
                sqlx::query(
                    "UPDATE coupons SET current_uses = current_uses - 1 \
                     WHERE id = $1 AND current_uses > 0",
                )
                .bind(coupon_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: &PageParams,
    ) -> Result<Paginated<Ticket>, AppError> {
        let (limit, offset) = limit_offset(page);
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ($1::uuid IS NULL OR registration_id = $1) \
             ORDER BY created_at DESC, registration_id, sequence_number LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, Ticket>(&sql)
            .bind(filter.registration_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets WHERE ($1::uuid IS NULL OR registration_id = $1)",
        )
        .bind(filter.registration_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn list_tickets_for_registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Vec<Ticket>, AppError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE registration_id = $1 ORDER BY sequence_number"
        );
        let tickets = sqlx::query_as::<_, Ticket>(&sql)
            .bind(registration_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tickets)
    }

    async fn commit_issuance(&self, plan: &IssuancePlan) -> Result<IssuanceOutcome, AppError> {
        let registration_id = plan.registration_id;
        let mut tx = self.pool.begin().await?;
        let registration = lock_registration(&mut tx, registration_id).await?;

        if registration.tickets_issued_at.is_some() {
            let tickets = tickets_in_tx(&mut tx, registration_id).await?;
            tx.commit().await?;
            return Ok(IssuanceOutcome {
                tickets,
                newly_issued: false,
            });
        }
        if !registration.status.is_issuable() {
            return Err(AppError::NotApproved {
                registration_id,
                status: registration.status,
            });
        }

        // Returning early drops `tx`, which rolls back every decrement so far.
        for decrement in &plan.decrements {
            let updated = sqlx::query(
                "UPDATE ticket_types SET available_stock = available_stock - $1, updated_at = now() \
                 WHERE id = $2 AND available_stock >= $1",
            )
            .bind(decrement.quantity)
            .bind(decrement.ticket_type_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                let available: Option<i32> =
                    sqlx::query_scalar("SELECT available_stock FROM ticket_types WHERE id = $1")
                        .bind(decrement.ticket_type_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(AppError::InsufficientStock {
                    ticket_type_id: decrement.ticket_type_id,
                    requested: i64::from(decrement.quantity),
                    available: i64::from(available.unwrap_or(0)),
                });
            }
        }

        let now = Utc::now();
        let mut tickets = Vec::with_capacity(plan.tickets.len());
        for new_ticket in &plan.tickets {
            let ticket = new_ticket.clone().into_ticket(registration_id, now);
            sqlx::query(
                "INSERT INTO tickets \
                 (id, registration_id, ticket_type_id, sequence_number, ticket_code, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(ticket.id)
            .bind(ticket.registration_id)
            .bind(ticket.ticket_type_id)
            .bind(ticket.sequence_number)
            .bind(&ticket.ticket_code)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await?;
            tickets.push(ticket);
        }

        sqlx::query(
            "UPDATE registrations SET tickets_issued_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(registration_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

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
    use sqlx::postgres::PgPoolOptions;

    /// Runs against `DATABASE_URL` with migrations applied. Data is keyed by
    /// fresh ids, so a shared database can be reused between runs.
    async fn store() -> Option<PgBookingStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        Some(PgBookingStore::new(pool))
    }

    async fn seed_ticket_type(store: &PgBookingStore, stock: i32) -> TicketType {
        let now = Utc::now();
        store
            .create_ticket_type(&TicketType {
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
            })
            .await
            .unwrap()
    }

    async fn register(
        store: &PgBookingStore,
        lines: Vec<RegistrationLine>,
        coupon: Option<&Coupon>,
    ) -> Result<RegistrationDetails, AppError> {
        let email = format!("{}@example.com", Uuid::new_v4().simple());
        let client = store
            .upsert_client(&ClientDetails {
                email: email.clone(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                phone: None,
                is_ems_client: false,
            })
            .await?;
        let total: i64 = lines
            .iter()
            .map(|l| l.unit_price_in_cents * i64::from(l.quantity))
            .sum();
        store
            .create_registration(
                client.id,
                &NewRegistration {
                    id: Uuid::new_v4(),
                    email,
                    is_ems_client: false,
                    lines,
                    applied_coupon_code: coupon.map(|c| c.code.clone()),
                    coupon_id: coupon.map(|c| c.id),
                    original_amount: total,
                    discount_amount: 0,
                    final_amount: total,
                },
            )
            .await
    }

    fn line(ticket_type_id: Uuid, quantity: i32) -> RegistrationLine {
        RegistrationLine {
            ticket_type_id,
            quantity,
            unit_price_in_cents: 2000,
        }
    }

    async fn stock_of(store: &PgBookingStore, id: Uuid) -> i32 {
        store.find_ticket_types(&[id]).await.unwrap()[0].available_stock
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_pg_coupon_cap_enforced_at_submission() {
        let Some(store) = store().await else { return };
        let arena = seed_ticket_type(&store, 10).await;
        let coupon = store
            .create_coupon(&Coupon {
                id: Uuid::new_v4(),
                code: format!("PG{}", Uuid::new_v4().simple()).to_uppercase(),
                discount_type: DiscountType::FixedAmount,
                discount_value: 500,
                min_order_amount: None,
                max_uses: Some(1),
                current_uses: 0,
                max_uses_per_user: None,
                valid_from: None,
                valid_until: None,
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        register(&store, vec![line(arena.id, 1)], Some(&coupon))
            .await
            .unwrap();
        let err = register(&store, vec![line(arena.id, 1)], Some(&coupon))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::CouponExhausted {
                per_user: false,
                ..
            }
        ));
        let stored = store.find_coupon_by_code(&coupon.code).await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 1);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_pg_issuance_commits_once() {
        let Some(store) = store().await else { return };
        let arena = seed_ticket_type(&store, 5).await;
        let id = register(&store, vec![line(arena.id, 3)], None)
            .await
            .unwrap()
            .registration
            .id;
        store
            .transition_registration(id, RegistrationStatus::Paid, Some("pg-ref"))
            .await
            .unwrap();

        let first = issue_tickets(&store, id).await.unwrap();
        let second = issue_tickets(&store, id).await.unwrap();

        assert!(first.newly_issued);
        assert!(!second.newly_issued);
        assert_eq!(first.tickets, second.tickets);
        assert_eq!(
            first
                .tickets
                .iter()
                .map(|t| t.sequence_number)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(stock_of(&store, arena.id).await, 2);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_pg_insufficient_stock_rolls_back() {
        let Some(store) = store().await else { return };
        let arena = seed_ticket_type(&store, 10).await;
        let escape = seed_ticket_type(&store, 1).await;
        let id = register(&store, vec![line(arena.id, 4), line(escape.id, 2)], None)
            .await
            .unwrap()
            .registration
            .id;
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
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_pg_payment_claim_is_exclusive() {
        let Some(store) = store().await else { return };
        let arena = seed_ticket_type(&store, 5).await;
        let id = register(&store, vec![line(arena.id, 1)], None)
            .await
            .unwrap()
            .registration
            .id;

        let (first, second) = tokio::join!(store.claim_payment(id), store.claim_payment(id));
        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );

        store.release_payment_claim(id).await.unwrap();
        store.claim_payment(id).await.unwrap();
        let err = store
            .transition_registration(id, RegistrationStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(Some(" ada ")).as_deref(), Some("%ada%"));
        assert_eq!(like_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
        assert_eq!(like_pattern(Some("   ")), None);
        assert_eq!(like_pattern(None), None);
    }

    #[test]
    fn test_limit_offset() {
        let page = PageParams {
            page: Some(3),
            limit: Some(25),
        };
        assert_eq!(limit_offset(&page), (25, 50));
    }
}
