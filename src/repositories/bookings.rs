use crate::models::bookings::{
    Booking, BookingQuery, BookingRow, BookingScope, BookingStatus, DateRange, NewBookingDetails,
    StatusCounts, StatusFilter,
};
use crate::models::ledger::{LedgerEntry, NewLedgerEntry, NewPlatformEarning, PlatformEarning};
use crate::models::like_pattern;
use crate::services::settlement::{
    Ledger, SettlementOutcome, SettlementPlan, SettlementRecord, StatusChange, StatusOutcome,
};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const APPROVED_OVERLAP: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM bookings
        WHERE post_id = $1 AND id <> $2 AND status = 'approved'
        AND start_date <= $4 AND end_date >= $3
    )
"#;

pub enum CreateOutcome {
    Created(Booking),
    Overlap,
}

#[derive(Clone)]
pub struct BookingRepository {
    conn: PgPool,
}

impl BookingRepository {
    pub fn new(conn: PgPool) -> Self {
        BookingRepository { conn }
    }

    /// Inserts a pending booking. With `reject_overlap` the post row is
    /// locked first so a concurrent approval cannot slip in between the check
    /// and the insert.
    pub async fn insert_booking(
        &self,
        rented_by: &str,
        details: &NewBookingDetails,
        reject_overlap: bool,
    ) -> Result<CreateOutcome, anyhow::Error> {
        let booking_id = Uuid::new_v4().hyphenated().to_string();
        let mut tx = self.conn.begin().await?;

        if reject_overlap {
            lock_post(&mut tx, &details.post_id).await?;
            let overlap: bool = sqlx::query_scalar(APPROVED_OVERLAP)
                .bind(&details.post_id)
                .bind(&booking_id)
                .bind(details.start_date)
                .bind(details.end_date)
                .fetch_one(&mut *tx)
                .await?;
            if overlap {
                return Ok(CreateOutcome::Overlap);
            }
        }

        let row = sqlx::query_as::<_, BookingRow>(
            r#"
                INSERT INTO bookings
                (id, post_id, owner_id, rented_by, start_date, end_date, status,
                 rental_amount, deposit_amount, product_name, booking_code, extra)
                VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, $11)
                RETURNING *
            "#,
        )
        .bind(&booking_id)
        .bind(&details.post_id)
        .bind(&details.owner_id)
        .bind(rented_by)
        .bind(details.start_date)
        .bind(details.end_date)
        .bind(details.rental_amount)
        .bind(details.deposit_amount)
        .bind(&details.product_name)
        .bind(&details.booking_code)
        .bind(Json(details.sanitized_extra()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CreateOutcome::Created(row.into()))
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>, anyhow::Error> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(row.map(Booking::from))
    }

    /// Bookings of any status on `post_id` whose range touches
    /// `[check_in, check_out]`.
    pub async fn get_overlapping(
        &self,
        post_id: &str,
        check_in: DateTime<Utc>,
        check_out: DateTime<Utc>,
    ) -> Result<Vec<Booking>, anyhow::Error> {
        let rows = sqlx::query_as::<_, BookingRow>(
            r#"SELECT * FROM bookings
            WHERE post_id = $1 AND start_date <= $3 AND end_date >= $2
            ORDER BY start_date ASC"#,
        )
        .bind(post_id)
        .bind(check_in)
        .bind(check_out)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows.into_iter().map(Booking::from).collect())
    }

    pub async fn get_bookings_for_party(&self, user_id: &str) -> Result<Vec<Booking>, anyhow::Error> {
        let rows = sqlx::query_as::<_, BookingRow>(
            "SELECT * FROM bookings WHERE owner_id = $1 OR rented_by = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows.into_iter().map(Booking::from).collect())
    }

    pub async fn get_approved_ranges(&self, post_id: &str) -> Result<Vec<DateRange>, anyhow::Error> {
        let ranges = sqlx::query_as::<_, DateRange>(
            r#"SELECT start_date AS start, end_date AS "end" FROM bookings
            WHERE post_id = $1 AND status = 'approved'
            ORDER BY start_date ASC"#,
        )
        .bind(post_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(ranges)
    }

    /// Most recent booking of `post_id` by `renter` that still holds a claim.
    pub async fn get_active_booking(
        &self,
        renter: &str,
        post_id: &str,
    ) -> Result<Option<Booking>, anyhow::Error> {
        let row = sqlx::query_as::<_, BookingRow>(
            r#"SELECT * FROM bookings
            WHERE rented_by = $1 AND post_id = $2 AND status NOT IN ('rejected', 'returned')
            ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(renter)
        .bind(post_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(row.map(Booking::from))
    }

    pub async fn list_bookings(
        &self,
        scope: &BookingScope,
        filter: &BookingQuery,
    ) -> Result<(Vec<Booking>, i64, StatusCounts), anyhow::Error> {
        let page = filter.page();

        let mut rows_query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM bookings");
        push_scope(&mut rows_query, scope);
        push_listing_filter(&mut rows_query, filter);
        rows_query.push(" ORDER BY created_at DESC LIMIT ");
        rows_query.push_bind(page.limit);
        rows_query.push(" OFFSET ");
        rows_query.push_bind(page.offset());
        let rows = rows_query
            .build_query_as::<BookingRow>()
            .fetch_all(&self.conn)
            .await?;

        let mut total_query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(1) FROM bookings");
        push_scope(&mut total_query, scope);
        push_listing_filter(&mut total_query, filter);
        let total = total_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.conn)
            .await?;

        let mut counts_query: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"SELECT
                COUNT(1) AS "all",
                COUNT(1) FILTER (WHERE status = 'pending') AS pending,
                COUNT(1) FILTER (WHERE status = 'approved') AS approved,
                COUNT(1) FILTER (WHERE status NOT IN ('pending', 'approved')) AS completed
            FROM bookings"#,
        );
        push_scope(&mut counts_query, scope);
        let (all, pending, approved, completed) = counts_query
            .build_query_as::<(i64, i64, i64, i64)>()
            .fetch_one(&self.conn)
            .await?;

        let counts = StatusCounts {
            all,
            pending,
            approved,
            completed,
        };

        Ok((rows.into_iter().map(Booking::from).collect(), total, counts))
    }
}

fn push_scope(query: &mut QueryBuilder<'_, Postgres>, scope: &BookingScope) {
    match scope {
        BookingScope::Owner(owner) => {
            query.push(" WHERE owner_id = ");
            query.push_bind(owner.clone());
        }
        BookingScope::Renter(renter) => {
            query.push(" WHERE rented_by = ");
            query.push_bind(renter.clone());
        }
    }
}

fn push_listing_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &BookingQuery) {
    match filter.status {
        StatusFilter::All => {}
        StatusFilter::Completed => {
            query.push(" AND status NOT IN ('pending', 'approved')");
        }
        StatusFilter::Pending => {
            query.push(" AND status = 'pending'");
        }
        StatusFilter::Approved => {
            query.push(" AND status = 'approved'");
        }
        StatusFilter::Rejected => {
            query.push(" AND status = 'rejected'");
        }
        StatusFilter::Returned => {
            query.push(" AND status = 'returned'");
        }
    }

    let search = filter.search.trim();
    if !search.is_empty() {
        let pattern = like_pattern(search);
        query.push(" AND (product_name ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR booking_code ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR id ILIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
}

async fn lock_post(conn: &mut PgConnection, post_id: &str) -> Result<(), anyhow::Error> {
    sqlx::query("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
        .bind(post_id)
        .fetch_optional(conn)
        .await?;

    Ok(())
}

async fn lock_booking(conn: &mut PgConnection, booking_id: &str) -> Result<Option<Booking>, anyhow::Error> {
    let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
        .bind(booking_id)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(Booking::from))
}

async fn insert_entry(conn: &mut PgConnection, entry: &NewLedgerEntry) -> Result<LedgerEntry, anyhow::Error> {
    let entry_id = Uuid::new_v4().hyphenated().to_string();

    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
            INSERT INTO transaction_history
            (id, user_id, source_user_id, booking_id, type, method, amount, deposit_amount,
             platform_fee, actual_rental_amount, note, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
        "#,
    )
    .bind(entry_id)
    .bind(&entry.user_id)
    .bind(&entry.source_user_id)
    .bind(&entry.booking_id)
    .bind(entry.kind)
    .bind(&entry.method)
    .bind(entry.amount)
    .bind(entry.deposit_amount)
    .bind(entry.platform_fee)
    .bind(entry.actual_rental_amount)
    .bind(&entry.note)
    .bind(entry.status)
    .fetch_one(conn)
    .await?;

    Ok(entry)
}

async fn insert_earning(conn: &mut PgConnection, earning: &NewPlatformEarning) -> Result<(), anyhow::Error> {
    let earning_id = Uuid::new_v4().hyphenated().to_string();

    sqlx::query(
        r#"
            INSERT INTO platform_earnings
            (id, booking_id, owner_id, customer_id, rental_amount, deposit_amount, platform_fee, method, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(earning_id)
    .bind(&earning.booking_id)
    .bind(&earning.owner_id)
    .bind(&earning.customer_id)
    .bind(earning.rental_amount)
    .bind(earning.deposit_amount)
    .bind(earning.platform_fee)
    .bind(&earning.method)
    .bind(earning.status)
    .execute(conn)
    .await?;

    Ok(())
}

async fn credit_wallet(conn: &mut PgConnection, user_id: &str, amount: i64) -> Result<(), anyhow::Error> {
    let result = sqlx::query(
        "UPDATE users SET wallet_balance = wallet_balance + $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
    )
    .bind(user_id)
    .bind(amount)
    .execute(conn)
    .await?;

    if result.rows_affected() != 1 {
        bail!("Wallet owner {} not found", user_id)
    }

    Ok(())
}

async fn load_record(conn: &mut PgConnection, booking: &Booking) -> Result<SettlementRecord, anyhow::Error> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM transaction_history WHERE booking_id = $1 ORDER BY created_at ASC",
    )
    .bind(&booking.id)
    .fetch_all(&mut *conn)
    .await?;

    let earning = sqlx::query_as::<_, PlatformEarning>(
        "SELECT * FROM platform_earnings WHERE booking_id = $1",
    )
    .bind(&booking.id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(SettlementRecord::recover(booking, &entries, earning.as_ref()))
}

#[async_trait]
impl Ledger for BookingRepository {
    async fn load_booking(&self, booking_id: &str) -> Result<Option<Booking>, anyhow::Error> {
        self.get_booking(booking_id).await
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<StatusOutcome, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let Some(current) = lock_booking(&mut tx, &change.booking_id).await? else {
            return Ok(StatusOutcome::Missing);
        };
        if current.status() != change.from {
            return Ok(StatusOutcome::Stale(current));
        }

        if change.reject_overlap {
            let details = current.details();
            lock_post(&mut tx, &details.post_id).await?;
            let overlap: bool = sqlx::query_scalar(APPROVED_OVERLAP)
                .bind(&details.post_id)
                .bind(&current.id)
                .bind(details.start_date)
                .bind(details.end_date)
                .fetch_one(&mut *tx)
                .await?;
            if overlap {
                return Ok(StatusOutcome::Overlap);
            }
        }

        let row = sqlx::query_as::<_, BookingRow>(
            "UPDATE bookings SET status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *",
        )
        .bind(&change.booking_id)
        .bind(change.to)
        .fetch_one(&mut *tx)
        .await?;

        let entry = match &change.entry {
            Some(entry) => Some(insert_entry(&mut tx, entry).await?),
            None => None,
        };
        if let Some(credit) = &change.wallet_credit {
            credit_wallet(&mut tx, &credit.user_id, credit.amount).await?;
        }

        tx.commit().await?;

        Ok(StatusOutcome::Applied {
            booking: row.into(),
            entry,
        })
    }

    async fn apply_settlement(&self, plan: &SettlementPlan) -> Result<SettlementOutcome, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let Some(current) = lock_booking(&mut tx, &plan.booking_id).await? else {
            return Ok(SettlementOutcome::Missing);
        };
        if current.details().payment_completed {
            let record = load_record(&mut tx, &current).await?;
            return Ok(SettlementOutcome::AlreadySettled {
                booking: current,
                record,
            });
        }
        if current.status() == BookingStatus::Rejected {
            return Ok(SettlementOutcome::Rejected);
        }

        let row = sqlx::query_as::<_, BookingRow>(
            r#"
                UPDATE bookings SET
                    payment_status = 'completed',
                    payment_method = $2,
                    payment_completed = TRUE,
                    razorpay_details = COALESCE($3, razorpay_details),
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND payment_completed = FALSE
                RETURNING *
            "#,
        )
        .bind(&plan.booking_id)
        .bind(plan.method)
        .bind(plan.gateway.clone().map(Json))
        .fetch_one(&mut *tx)
        .await?;

        insert_entry(&mut tx, &plan.owner_credit).await?;
        insert_entry(&mut tx, &plan.renter_debit).await?;
        insert_earning(&mut tx, &plan.earning).await?;
        credit_wallet(&mut tx, &plan.owner_credit.user_id, plan.owner_share).await?;

        tx.commit().await?;

        Ok(SettlementOutcome::Settled(row.into()))
    }

    async fn settlement_record(&self, booking: &Booking) -> Result<SettlementRecord, anyhow::Error> {
        let mut conn = self.conn.acquire().await?;
        load_record(&mut conn, booking).await
    }
}
