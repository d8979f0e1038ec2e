use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A caller-facing API key. `key_hash` is the one-way hash of the secret
/// the caller presents as a bearer token; the plaintext secret is never
/// stored.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    #[sea_orm(unique_key = "api_key_hash")]
    pub key_hash: String,
    pub permissions: Json,
    pub is_active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub request_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "owner_id", to = "id", on_delete = "Cascade")]
    pub owner: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
