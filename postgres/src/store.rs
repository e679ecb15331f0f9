//! [`RentalStore`] and [`UnitOfWork`] over a `PgPool`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rental_core::availability::ReservationSlot;
use rental_core::booking::Booking;
use rental_core::equipment::Equipment;
use rental_core::group::{GroupBooking, GroupState, Participant};
use rental_core::payment::{Payment, PaymentSubject};
use rental_core::types::{BookingId, EquipmentId, GatewayReference, GroupBookingId, ParticipantId};
use rental_runtime::store::{BookingQuery, BookingScope, Page, RentalStore, StoreError, UnitOfWork};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, PgExecutor, Postgres, Row, Transaction};

use crate::rows;

macro_rules! booking_columns {
    () => {
        "id, equipment_id, renter_id, start_date, end_date, total_price, currency, status, \
         payment_reference, payment_deadline, cancellation, refund_required, created_at, updated_at"
    };
}

macro_rules! group_columns {
    () => {
        "id, equipment_id, organizer_id, start_date, end_date, total_price, currency, total_slots, \
         status, collection_deadline, cancellation, created_at, updated_at"
    };
}

macro_rules! participant_columns {
    () => {
        "id, group_id, user_id, share, payment_reference, payment_status, refund_required, joined_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, reference, subject_kind, booking_id, group_id, participant_id, amount, currency, \
         authorization_url, status, channel, paid_at, verified_at, failure, expires_at, created_at"
    };
}

/// Ranges that still hold an equipment item
const HOLDINGS_SQL: &str = "SELECT 'booking' AS kind, id, start_date, end_date FROM bookings \
     WHERE equipment_id = $1 AND status IN ('pending', 'awaiting_payment', 'confirmed') \
     UNION ALL \
     SELECT 'group' AS kind, id, start_date, end_date FROM group_bookings \
     WHERE equipment_id = $1 AND status IN ('collecting', 'ready', 'confirmed')";

fn database(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Map a failed insert, turning unique violations into [`StoreError::Duplicate`]
fn insert_error(entity: &'static str, key: impl FnOnce() -> String) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate { entity, key: key() },
        _ => database(err),
    }
}

fn expect_one_row(entity: &'static str, id: impl std::fmt::Display, affected: u64) -> Result<(), StoreError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(StoreError::Database(format!("{entity} {id} not found for update")))
    }
}

fn limit_param(limit: u32) -> i64 {
    i64::from(limit)
}

// ============================================================================
// Shared reads
// ============================================================================

async fn find_equipment<'e>(exec: impl PgExecutor<'e>, id: EquipmentId) -> Result<Option<Equipment>, StoreError> {
    sqlx::query("SELECT id, owner_id, price_per_day, currency, available FROM equipment WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(exec)
        .await
        .map_err(database)?
        .as_ref()
        .map(rows::equipment)
        .transpose()
}

async fn find_booking<'e>(exec: impl PgExecutor<'e>, id: BookingId) -> Result<Option<Booking>, StoreError> {
    sqlx::query(concat!("SELECT ", booking_columns!(), " FROM bookings WHERE id = $1"))
        .bind(id.as_uuid())
        .fetch_optional(exec)
        .await
        .map_err(database)?
        .as_ref()
        .map(rows::booking)
        .transpose()
}

async fn find_payment<'e>(
    exec: impl PgExecutor<'e>,
    reference: &GatewayReference,
) -> Result<Option<Payment>, StoreError> {
    sqlx::query(concat!("SELECT ", payment_columns!(), " FROM payments WHERE reference = $1"))
        .bind(reference.as_str())
        .fetch_optional(exec)
        .await
        .map_err(database)?
        .as_ref()
        .map(rows::payment)
        .transpose()
}

async fn find_group(conn: &mut PgConnection, id: GroupBookingId) -> Result<Option<GroupState>, StoreError> {
    let Some(row) = sqlx::query(concat!("SELECT ", group_columns!(), " FROM group_bookings WHERE id = $1"))
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(database)?
    else {
        return Ok(None);
    };
    let group = rows::group(&row)?;

    let participants = sqlx::query(concat!(
        "SELECT ",
        participant_columns!(),
        " FROM group_participants WHERE group_id = $1 ORDER BY joined_at, id"
    ))
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(database)?
    .iter()
    .map(rows::participant)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(GroupState { group, participants }))
}

// ============================================================================
// Store
// ============================================================================

/// Pool-backed rental store
#[derive(Clone, Debug)]
pub struct PgRentalStore {
    pool: PgPool,
}

impl PgRentalStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection can be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(database)?;
        Ok(Self::from_pool(pool))
    }

    /// Apply the embedded migrations
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("rental schema migrations applied");
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or refresh a catalog row. The catalog service owns equipment;
    /// this keeps the local copy in sync.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    pub async fn upsert_equipment(&self, equipment: &Equipment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO equipment (id, owner_id, price_per_day, currency, available) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET owner_id = EXCLUDED.owner_id, \
             price_per_day = EXCLUDED.price_per_day, currency = EXCLUDED.currency, \
             available = EXCLUDED.available",
        )
        .bind(equipment.id.as_uuid())
        .bind(equipment.owner_id.as_uuid())
        .bind(rows::minor(equipment.price_per_day)?)
        .bind(equipment.currency.as_str())
        .bind(equipment.available)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }
}

#[async_trait]
impl RentalStore for PgRentalStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await.map_err(database)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(database)?;
        Ok(())
    }

    async fn equipment(&self, id: EquipmentId) -> Result<Option<Equipment>, StoreError> {
        find_equipment(&self.pool, id).await
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        find_booking(&self.pool, id).await
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError> {
        let (filter, user_id) = match query.scope {
            BookingScope::Renter(user_id) => ("renter_id = $1", user_id),
            BookingScope::Owner(user_id) => (
                "equipment_id IN (SELECT id FROM equipment WHERE owner_id = $1)",
                user_id,
            ),
        };

        let count_sql = format!("SELECT COUNT(*) AS total FROM bookings WHERE {filter}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(database)?
            .try_get("total")
            .map_err(database)?;

        let page_sql = format!(
            concat!(
                "SELECT ",
                booking_columns!(),
                " FROM bookings WHERE {} ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
            ),
            filter
        );
        let items = sqlx::query(&page_sql)
            .bind(user_id.as_uuid())
            .bind(i64::from(query.per_page))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(database)?
            .iter()
            .map(rows::booking)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: query.page,
            per_page: query.per_page,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn group(&self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(database)?;
        find_group(&mut conn, id).await
    }

    async fn payment_by_reference(&self, reference: &GatewayReference) -> Result<Option<Payment>, StoreError> {
        find_payment(&self.pool, reference).await
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Booking>, StoreError> {
        sqlx::query(concat!(
            "SELECT ",
            booking_columns!(),
            " FROM bookings WHERE status IN ('pending', 'awaiting_payment') AND payment_deadline < $1 \
             ORDER BY payment_deadline LIMIT $2"
        ))
        .bind(now)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?
        .iter()
        .map(rows::booking)
        .collect()
    }

    async fn overdue_groups(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<GroupBooking>, StoreError> {
        sqlx::query(concat!(
            "SELECT ",
            group_columns!(),
            " FROM group_bookings WHERE status = 'collecting' AND collection_deadline < $1 \
             ORDER BY collection_deadline LIMIT $2"
        ))
        .bind(now)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?
        .iter()
        .map(rows::group)
        .collect()
    }

    async fn lapsed_payments(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>, StoreError> {
        sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE status = 'initiated' AND expires_at < $1 ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?
        .iter()
        .map(rows::payment)
        .collect()
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// One database transaction. Dropping it rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_equipment(&mut self, id: EquipmentId) -> Result<Option<Equipment>, StoreError> {
        let started = Instant::now();
        let row = sqlx::query(
            "SELECT id, owner_id, price_per_day, currency, available FROM equipment WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;
        metrics::histogram!("rental_equipment_lock_wait_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::trace!(equipment_id = %id, "equipment row locked");
        row.as_ref().map(rows::equipment).transpose()
    }

    async fn holdings(&mut self, equipment_id: EquipmentId) -> Result<Vec<ReservationSlot>, StoreError> {
        sqlx::query(HOLDINGS_SQL)
        .bind(equipment_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?
        .iter()
        .map(rows::slot)
        .collect()
    }

    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        find_booking(&mut *self.tx, id).await
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO bookings (",
            booking_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(booking.id.as_uuid())
        .bind(booking.equipment_id.as_uuid())
        .bind(booking.renter_id.as_uuid())
        .bind(booking.range.start())
        .bind(booking.range.end())
        .bind(rows::minor(booking.total_price)?)
        .bind(booking.currency.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_reference.as_ref().map(GatewayReference::as_str))
        .bind(booking.payment_deadline)
        .bind(booking.cancellation.map(|reason| reason.as_str()))
        .bind(booking.refund_required)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(insert_error("booking", || booking.id.to_string()))?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $2, payment_reference = $3, payment_deadline = $4, \
             cancellation = $5, refund_required = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.status.as_str())
        .bind(booking.payment_reference.as_ref().map(GatewayReference::as_str))
        .bind(booking.payment_deadline)
        .bind(booking.cancellation.map(|reason| reason.as_str()))
        .bind(booking.refund_required)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        expect_one_row("booking", booking.id, result.rows_affected())
    }

    async fn payment_by_reference(&mut self, reference: &GatewayReference) -> Result<Option<Payment>, StoreError> {
        find_payment(&mut *self.tx, reference).await
    }

    async fn open_payment(&mut self, subject: &PaymentSubject) -> Result<Option<Payment>, StoreError> {
        let (kind, booking_id, _, participant_id) = rows::subject_columns(subject);
        sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE status = 'initiated' AND subject_kind = $1 \
             AND booking_id IS NOT DISTINCT FROM $2 AND participant_id IS NOT DISTINCT FROM $3 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(kind)
        .bind(booking_id)
        .bind(participant_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?
        .as_ref()
        .map(rows::payment)
        .transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let (kind, booking_id, group_id, participant_id) = rows::subject_columns(&payment.subject);
        sqlx::query(concat!(
            "INSERT INTO payments (",
            payment_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.reference.as_str())
        .bind(kind)
        .bind(booking_id)
        .bind(group_id)
        .bind(participant_id)
        .bind(rows::minor(payment.amount)?)
        .bind(payment.currency.as_str())
        .bind(&payment.authorization_url)
        .bind(payment.status.as_str())
        .bind(payment.channel.as_ref().map(|channel| channel.as_label().to_string()))
        .bind(payment.paid_at)
        .bind(payment.verified_at)
        .bind(rows::failure_json(payment.failure.as_ref()))
        .bind(payment.expires_at)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(insert_error("payment", || payment.reference.to_string()))?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE payments SET status = $2, channel = $3, paid_at = $4, verified_at = $5, failure = $6 \
             WHERE reference = $1",
        )
        .bind(payment.reference.as_str())
        .bind(payment.status.as_str())
        .bind(payment.channel.as_ref().map(|channel| channel.as_label().to_string()))
        .bind(payment.paid_at)
        .bind(payment.verified_at)
        .bind(rows::failure_json(payment.failure.as_ref()))
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        expect_one_row("payment", &payment.reference, result.rows_affected())
    }

    async fn group(&mut self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError> {
        find_group(&mut *self.tx, id).await
    }

    async fn insert_group(&mut self, group: &GroupBooking) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO group_bookings (",
            group_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(group.id.as_uuid())
        .bind(group.equipment_id.as_uuid())
        .bind(group.organizer_id.as_uuid())
        .bind(group.range.start())
        .bind(group.range.end())
        .bind(rows::minor(group.total_price)?)
        .bind(group.currency.as_str())
        .bind(i32::try_from(group.total_slots).map_err(|_| StoreError::Database("total_slots exceeds INTEGER".into()))?)
        .bind(group.status.as_str())
        .bind(group.collection_deadline)
        .bind(group.cancellation.map(|reason| reason.as_str()))
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(insert_error("group_booking", || group.id.to_string()))?;
        Ok(())
    }

    async fn update_group(&mut self, group: &GroupBooking) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE group_bookings SET status = $2, cancellation = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(group.id.as_uuid())
        .bind(group.status.as_str())
        .bind(group.cancellation.map(|reason| reason.as_str()))
        .bind(group.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        expect_one_row("group_booking", group.id, result.rows_affected())
    }

    async fn insert_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO group_participants (",
            participant_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(participant.id.as_uuid())
        .bind(participant.group_id.as_uuid())
        .bind(participant.user_id.as_uuid())
        .bind(rows::minor(participant.share)?)
        .bind(participant.payment_reference.as_ref().map(GatewayReference::as_str))
        .bind(participant.payment_status.map(|status| status.as_str()))
        .bind(participant.refund_required)
        .bind(participant.joined_at)
        .execute(&mut *self.tx)
        .await
        .map_err(insert_error("participant", || {
            format!("{}/{}", participant.group_id, participant.user_id)
        }))?;
        Ok(())
    }

    async fn update_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE group_participants SET payment_reference = $2, payment_status = $3, refund_required = $4 \
             WHERE id = $1",
        )
        .bind(participant.id.as_uuid())
        .bind(participant.payment_reference.as_ref().map(GatewayReference::as_str))
        .bind(participant.payment_status.map(|status| status.as_str()))
        .bind(participant.refund_required)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        expect_one_row("participant", participant.id, result.rows_affected())
    }

    async fn delete_participant(&mut self, id: ParticipantId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM group_participants WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(database)
    }
}
