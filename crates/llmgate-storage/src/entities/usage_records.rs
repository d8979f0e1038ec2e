use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One proxied call. Append-only: the Proxy Engine creates rows, it
/// never updates or deletes them.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub api_key_id: i64,
    pub upstream_account_id: Option<i64>,
    #[sea_orm(unique_key = "usage_request_id")]
    pub request_id: String,
    pub method: String,
    pub endpoint: String,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub tokens_used: i64,
    pub cost: f64,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
