//! Row mapping between the relational schema and domain types.

use chrono::NaiveDate;
use rental_core::availability::{ReservationKey, ReservationSlot};
use rental_core::booking::{Booking, BookingStatus, CancellationReason};
use rental_core::equipment::Equipment;
use rental_core::group::{GroupBooking, GroupStatus, Participant};
use rental_core::payment::{FailureReason, Payment, PaymentStatus, PaymentSubject};
use rental_core::types::{
    BookingId, Currency, DateRange, EquipmentId, GatewayReference, GroupBookingId, Money,
    ParticipantId, PaymentChannel, PaymentId, UserId,
};
use rental_runtime::store::StoreError;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use uuid::Uuid;

fn corrupt(entity: &'static str, message: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        entity,
        message: message.to_string(),
    }
}

fn get<'r, T>(row: &'r PgRow, entity: &'static str, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| corrupt(entity, format!("{column}: {e}")))
}

fn money(row: &PgRow, entity: &'static str, column: &str) -> Result<Money, StoreError> {
    let raw: i64 = get(row, entity, column)?;
    u64::try_from(raw)
        .map(Money::from_minor)
        .map_err(|_| corrupt(entity, format!("{column} is negative: {raw}")))
}

fn currency(row: &PgRow, entity: &'static str) -> Result<Currency, StoreError> {
    let code: String = get(row, entity, "currency")?;
    Currency::parse(&code).map_err(|e| corrupt(entity, e))
}

fn range(row: &PgRow, entity: &'static str) -> Result<DateRange, StoreError> {
    let start: NaiveDate = get(row, entity, "start_date")?;
    let end: NaiveDate = get(row, entity, "end_date")?;
    DateRange::new(start, end).map_err(|e| corrupt(entity, e))
}

fn reference(row: &PgRow, entity: &'static str, column: &str) -> Result<Option<GatewayReference>, StoreError> {
    get::<Option<String>>(row, entity, column)?
        .map(GatewayReference::parse)
        .transpose()
        .map_err(|e| corrupt(entity, e))
}

fn cancellation(row: &PgRow, entity: &'static str) -> Result<Option<CancellationReason>, StoreError> {
    get::<Option<String>>(row, entity, "cancellation")?
        .map(|label| CancellationReason::parse(&label))
        .transpose()
        .map_err(|e| corrupt(entity, e))
}

/// Money as a `BIGINT` parameter
pub(crate) fn minor(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.minor())
        .map_err(|_| StoreError::Database(format!("amount {amount} does not fit in BIGINT")))
}

/// `(subject_kind, booking_id, group_id, participant_id)` columns
pub(crate) fn subject_columns(subject: &PaymentSubject) -> (&'static str, Option<Uuid>, Option<Uuid>, Option<Uuid>) {
    match subject {
        PaymentSubject::Booking { booking_id } => ("booking", Some(*booking_id.as_uuid()), None, None),
        PaymentSubject::Participant {
            group_id,
            participant_id,
        } => (
            "participant",
            None,
            Some(*group_id.as_uuid()),
            Some(*participant_id.as_uuid()),
        ),
    }
}

/// Failure reason as a `JSONB` parameter
pub(crate) fn failure_json(failure: Option<&FailureReason>) -> Option<Json<&FailureReason>> {
    failure.map(Json)
}

pub(crate) fn equipment(row: &PgRow) -> Result<Equipment, StoreError> {
    const E: &str = "equipment";
    Ok(Equipment {
        id: EquipmentId::from_uuid(get(row, E, "id")?),
        owner_id: UserId::from_uuid(get(row, E, "owner_id")?),
        price_per_day: money(row, E, "price_per_day")?,
        currency: currency(row, E)?,
        available: get(row, E, "available")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking, StoreError> {
    const E: &str = "booking";
    let status: String = get(row, E, "status")?;
    Ok(Booking {
        id: BookingId::from_uuid(get(row, E, "id")?),
        equipment_id: EquipmentId::from_uuid(get(row, E, "equipment_id")?),
        renter_id: UserId::from_uuid(get(row, E, "renter_id")?),
        range: range(row, E)?,
        total_price: money(row, E, "total_price")?,
        currency: currency(row, E)?,
        status: BookingStatus::parse(&status).map_err(|e| corrupt(E, e))?,
        payment_reference: reference(row, E, "payment_reference")?,
        payment_deadline: get(row, E, "payment_deadline")?,
        cancellation: cancellation(row, E)?,
        refund_required: get(row, E, "refund_required")?,
        created_at: get(row, E, "created_at")?,
        updated_at: get(row, E, "updated_at")?,
    })
}

pub(crate) fn group(row: &PgRow) -> Result<GroupBooking, StoreError> {
    const E: &str = "group_booking";
    let status: String = get(row, E, "status")?;
    let slots: i32 = get(row, E, "total_slots")?;
    Ok(GroupBooking {
        id: GroupBookingId::from_uuid(get(row, E, "id")?),
        equipment_id: EquipmentId::from_uuid(get(row, E, "equipment_id")?),
        organizer_id: UserId::from_uuid(get(row, E, "organizer_id")?),
        range: range(row, E)?,
        total_price: money(row, E, "total_price")?,
        currency: currency(row, E)?,
        total_slots: u32::try_from(slots).map_err(|_| corrupt(E, format!("total_slots is negative: {slots}")))?,
        status: GroupStatus::parse(&status).map_err(|e| corrupt(E, e))?,
        collection_deadline: get(row, E, "collection_deadline")?,
        cancellation: cancellation(row, E)?,
        created_at: get(row, E, "created_at")?,
        updated_at: get(row, E, "updated_at")?,
    })
}

pub(crate) fn participant(row: &PgRow) -> Result<Participant, StoreError> {
    const E: &str = "participant";
    let payment_status = get::<Option<String>>(row, E, "payment_status")?
        .map(|label| PaymentStatus::parse(&label))
        .transpose()
        .map_err(|e| corrupt(E, e))?;
    Ok(Participant {
        id: ParticipantId::from_uuid(get(row, E, "id")?),
        group_id: GroupBookingId::from_uuid(get(row, E, "group_id")?),
        user_id: UserId::from_uuid(get(row, E, "user_id")?),
        share: money(row, E, "share")?,
        payment_reference: reference(row, E, "payment_reference")?,
        payment_status,
        refund_required: get(row, E, "refund_required")?,
        joined_at: get(row, E, "joined_at")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<Payment, StoreError> {
    const E: &str = "payment";
    let kind: String = get(row, E, "subject_kind")?;
    let subject = match kind.as_str() {
        "booking" => PaymentSubject::Booking {
            booking_id: BookingId::from_uuid(get(row, E, "booking_id")?),
        },
        "participant" => PaymentSubject::Participant {
            group_id: GroupBookingId::from_uuid(get(row, E, "group_id")?),
            participant_id: ParticipantId::from_uuid(get(row, E, "participant_id")?),
        },
        other => return Err(corrupt(E, format!("unknown subject kind {other:?}"))),
    };
    let status: String = get(row, E, "status")?;
    let reference = reference(row, E, "reference")?.ok_or_else(|| corrupt(E, "reference is null"))?;
    let failure: Option<Json<FailureReason>> = get(row, E, "failure")?;

    Ok(Payment {
        id: PaymentId::from_uuid(get(row, E, "id")?),
        subject,
        reference,
        amount: money(row, E, "amount")?,
        currency: currency(row, E)?,
        authorization_url: get(row, E, "authorization_url")?,
        status: PaymentStatus::parse(&status).map_err(|e| corrupt(E, e))?,
        channel: get::<Option<String>>(row, E, "channel")?.map(|label| PaymentChannel::from_gateway(&label)),
        paid_at: get(row, E, "paid_at")?,
        verified_at: get(row, E, "verified_at")?,
        failure: failure.map(|json| json.0),
        expires_at: get(row, E, "expires_at")?,
        created_at: get(row, E, "created_at")?,
    })
}

pub(crate) fn slot(row: &PgRow) -> Result<ReservationSlot, StoreError> {
    const E: &str = "holding";
    let kind: String = get(row, E, "kind")?;
    let id: Uuid = get(row, E, "id")?;
    let key = match kind.as_str() {
        "booking" => ReservationKey::Booking(BookingId::from_uuid(id)),
        "group" => ReservationKey::Group(GroupBookingId::from_uuid(id)),
        other => return Err(corrupt(E, format!("unknown holding kind {other:?}"))),
    };
    Ok(ReservationSlot {
        key,
        range: range(row, E)?,
    })
}
