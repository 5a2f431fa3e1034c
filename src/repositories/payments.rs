use crate::models::like_pattern;
use crate::models::ledger::{HistoryPage, HistoryQuery, LedgerEntry, TypeCounts};

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

pub mod razorpay;

#[derive(Clone)]
pub struct PaymentRepository {
    razorpay: razorpay::RazorpayApi,
    conn: PgPool,
}

impl PaymentRepository {
    pub fn new(razorpay: razorpay::RazorpayApi, conn: PgPool) -> Self {
        PaymentRepository { razorpay, conn }
    }

    pub async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let receipt = Uuid::new_v4().simple().to_string();
        self.razorpay.create_order(amount_minor, currency, &receipt).await
    }

    pub async fn get_history(
        &self,
        user_id: &str,
        filter: &HistoryQuery,
    ) -> Result<HistoryPage, anyhow::Error> {
        let page = filter.page();

        let mut rows_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM transaction_history WHERE user_id = ");
        rows_query.push_bind(user_id.to_string());
        push_history_filter(&mut rows_query, filter);
        rows_query.push(" ORDER BY created_at DESC LIMIT ");
        rows_query.push_bind(page.limit);
        rows_query.push(" OFFSET ");
        rows_query.push_bind(page.offset());
        let data = rows_query
            .build_query_as::<LedgerEntry>()
            .fetch_all(&self.conn)
            .await?;

        let mut total_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(1) FROM transaction_history WHERE user_id = ");
        total_query.push_bind(user_id.to_string());
        push_history_filter(&mut total_query, filter);
        let total = total_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.conn)
            .await?;

        let (all, credit, debit, total_amount) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"SELECT
                COUNT(1),
                COUNT(1) FILTER (WHERE type = 'credit'),
                COUNT(1) FILTER (WHERE type = 'debit'),
                COALESCE(SUM(amount), 0)::BIGINT
            FROM transaction_history WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(HistoryPage {
            total,
            page: page.page,
            limit: page.limit,
            total_amount,
            data,
            type_counts: TypeCounts { all, credit, debit },
        })
    }
}

fn push_history_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &HistoryQuery) {
    if let Some(kind) = filter.kind.kind() {
        query.push(" AND type = ");
        query.push_bind(kind);
    }

    let search = filter.search.trim();
    if !search.is_empty() {
        let pattern = like_pattern(search);
        query.push(" AND (method ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR booking_id ILIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
}
