pub mod api_keys;
pub mod model_routes;
pub mod upstream_accounts;
pub mod usage_records;
pub mod users;

pub use api_keys::Entity as ApiKeys;
pub use model_routes::Entity as ModelRoutes;
pub use upstream_accounts::Entity as UpstreamAccounts;
pub use usage_records::Entity as UsageRecords;
pub use users::Entity as Users;
