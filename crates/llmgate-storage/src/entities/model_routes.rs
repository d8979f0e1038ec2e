use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A routing rule. `api_key_id = NULL` means the rule is global; otherwise
/// it is scoped to that key and checked before any global rule.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_routes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub api_key_id: Option<i64>,
    pub source_model: String,
    pub target_model: String,
    pub target_provider: String,
    pub priority: i32,
    pub enabled: bool,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
