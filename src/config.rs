use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// PostgreSQL connection URL for order persistence
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub swap: SwapConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwapConfig {
    /// Swap contract address on the external ledger
    pub contract_address: String,
    /// Contract entrypoint for swap submission
    pub swap_entrypoint: String,
    /// Protocol fee in basis points
    pub fee_bps: u32,
    /// Bound on ledger submission calls (milliseconds)
    pub ledger_timeout_ms: u64,
    /// Bound on fiat payout calls (milliseconds)
    pub payout_timeout_ms: u64,
    /// TTL for the cached exchange-rate snapshot (milliseconds)
    pub rate_ttl_ms: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            swap_entrypoint: "execute_swap".to_string(),
            fee_bps: 50,
            ledger_timeout_ms: 30_000,
            payout_timeout_ms: 15_000,
            rate_ttl_ms: 5_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
