use clap::Parser;

/// Process-wide configuration: bind address, admin shared secret,
/// encryption/signing material and the default load-balance strategy.
/// Every flag also reads from an environment variable so a container
/// deployment needs no argv at all.
#[derive(Parser, Debug)]
#[command(name = "llmgate", version, about = "Health-scored LLM API gateway")]
pub struct Cli {
    /// Bind host.
    #[arg(long, env = "LLMGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "LLMGATE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared secret required on every management API request
    /// (`x-admin-key` header or `Authorization: Bearer`).
    #[arg(long, env = "LLMGATE_ADMIN_KEY")]
    pub admin_key: String,

    /// Hex or base64 AES-256 key (>=32 bytes) used to encrypt credentials
    /// at rest. Generated ephemerally at startup if omitted -- fine for
    /// local testing, but every restart without a fixed key orphans
    /// previously stored credentials.
    #[arg(long, env = "LLMGATE_MASTER_KEY")]
    pub master_key: Option<String>,

    /// JWT signing secret for admin auth (>=32 bytes). Only the length is
    /// validated today; nothing in this gateway issues JWTs yet.
    #[arg(long, env = "LLMGATE_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Default load-balance strategy: priority-first, least-connections,
    /// weighted-round-robin or adaptive.
    #[arg(long, env = "LLMGATE_STRATEGY", default_value = "adaptive")]
    pub strategy: String,

    /// Minimum health score below which an account is dropped from
    /// selection unless it is the only candidate left.
    #[arg(long, env = "LLMGATE_MIN_HEALTH_SCORE", default_value_t = 0.5)]
    pub min_health_score: f64,

    /// Comma-separated list of outbound proxy URLs accounts can bind to.
    #[arg(long, env = "LLMGATE_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,
}

pub fn parse_strategy(value: &str) -> llmgate_common::BalanceStrategy {
    use llmgate_common::BalanceStrategy;
    match value.trim().to_ascii_lowercase().as_str() {
        "priority-first" | "priority_first" => BalanceStrategy::PriorityFirst,
        "least-connections" | "least_connections" => BalanceStrategy::LeastConnections,
        "weighted-round-robin" | "weighted_round_robin" => BalanceStrategy::WeightedRoundRobin,
        _ => BalanceStrategy::Adaptive,
    }
}
