use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// An upstream provider credential. `credentials` holds the AES-GCM
/// envelope produced by `llmgate_crypto::encrypt`, base64-encoded, never
/// plaintext.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub provider: String,
    pub auth_method: String,
    pub credentials: String,
    pub state: String,
    pub priority: i16,
    pub weight: i32,
    pub proxy_binding: Option<String>,
    pub request_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub last_health_check: Option<OffsetDateTime>,
    pub health_status: Option<Json>,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "owner_id", to = "id", on_delete = "Cascade")]
    pub owner: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
