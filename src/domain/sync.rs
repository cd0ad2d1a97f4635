//! Sync-related domain models and configuration.
//!
//! Contains the vocabulary shared by the queue, the cache and the sync
//! coordinator: entity slots, connectivity, queued mutations, and the sync
//! state machine.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::AppError;
use super::models::{CreditScore, Farm, Loan, MarketPrice, User, Weather};

/// One durable slot per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Farms,
    Loans,
    Weather,
    MarketPrices,
    CreditScore,
    PendingOperations,
}

impl EntityKind {
    /// Kinds mirrored by the cache and refreshed from the server.
    pub const CACHED: [Self; 6] = [
        Self::User,
        Self::Farms,
        Self::Loans,
        Self::Weather,
        Self::MarketPrices,
        Self::CreditScore,
    ];

    /// Stable key used in storage and in remote URLs.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Farms => "farms",
            Self::Loans => "loans",
            Self::Weather => "weather",
            Self::MarketPrices => "market_prices",
            Self::CreditScore => "credit_score",
            Self::PendingOperations => "pending_operations",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "user" | "profile" => Ok(Self::User),
            "farms" | "farm" => Ok(Self::Farms),
            "loans" | "loan" => Ok(Self::Loans),
            "weather" => Ok(Self::Weather),
            "market_prices" | "prices" | "market" => Ok(Self::MarketPrices),
            "credit_score" | "credit" => Ok(Self::CreditScore),
            "pending_operations" | "pending" => Ok(Self::PendingOperations),
            _ => Err(format!(
                "Unknown entity: {s}. Use: user, farms, loans, weather, prices, credit"
            )),
        }
    }
}

/// Full replacement value for one cached entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    User(Option<User>),
    Farms(Vec<Farm>),
    Loans(Vec<Loan>),
    Weather(Option<Weather>),
    MarketPrices(Vec<MarketPrice>),
    CreditScore(Option<CreditScore>),
}

impl EntitySnapshot {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Farms(_) => EntityKind::Farms,
            Self::Loans(_) => EntityKind::Loans,
            Self::Weather(_) => EntityKind::Weather,
            Self::MarketPrices(_) => EntityKind::MarketPrices,
            Self::CreditScore(_) => EntityKind::CreditScore,
        }
    }

    /// Decode a snapshot of `kind` from its JSON form (`null` means absent).
    ///
    /// # Errors
    /// Returns an error if the JSON does not match the entity's shape.
    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> super::Result<Self> {
        let snapshot = match kind {
            EntityKind::User => Self::User(serde_json::from_value(value).map_err(AppError::json_parse)?),
            EntityKind::Farms => {
                Self::Farms(from_nullable_list(value).map_err(AppError::json_parse)?)
            }
            EntityKind::Loans => {
                Self::Loans(from_nullable_list(value).map_err(AppError::json_parse)?)
            }
            EntityKind::Weather => {
                Self::Weather(serde_json::from_value(value).map_err(AppError::json_parse)?)
            }
            EntityKind::MarketPrices => {
                Self::MarketPrices(from_nullable_list(value).map_err(AppError::json_parse)?)
            }
            EntityKind::CreditScore => {
                Self::CreditScore(serde_json::from_value(value).map_err(AppError::json_parse)?)
            }
            EntityKind::PendingOperations => {
                return Err(AppError::Config {
                    message: "the pending operation queue is never pulled from the server".into(),
                })
            }
        };
        Ok(snapshot)
    }
}

fn from_nullable_list<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<Vec<T>, serde_json::Error> {
    if value.is_null() {
        Ok(Vec::new())
    } else {
        serde_json::from_value(value)
    }
}

/// Reachability of the backend as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A user-initiated change that needs server confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    UpdateProfile { user: User },
    SaveFarm { farm: Farm },
    RemoveFarm { farm_id: String },
    ApplyForLoan { loan: Loan },
    RepayLoan { loan_id: String, amount: f64 },
}

impl Mutation {
    /// Short label for logs and listings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UpdateProfile { .. } => "update_profile",
            Self::SaveFarm { .. } => "save_farm",
            Self::RemoveFarm { .. } => "remove_farm",
            Self::ApplyForLoan { .. } => "apply_for_loan",
            Self::RepayLoan { .. } => "repay_loan",
        }
    }

    /// The entity kind this change touches.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::UpdateProfile { .. } => EntityKind::User,
            Self::SaveFarm { .. } | Self::RemoveFarm { .. } => EntityKind::Farms,
            Self::ApplyForLoan { .. } | Self::RepayLoan { .. } => EntityKind::Loans,
        }
    }

    /// Check the payload on its own, without looking at cached state.
    ///
    /// Everything that passes survives a JSON round-trip through the queue.
    ///
    /// # Errors
    /// Returns a validation error naming the offending field.
    pub fn validate(&self) -> super::Result<()> {
        match self {
            Self::UpdateProfile { user } => user.validate(),
            Self::SaveFarm { farm } => farm.validate(),
            Self::RemoveFarm { farm_id } if farm_id.trim().is_empty() => {
                Err(AppError::validation("farm", "id must not be empty"))
            }
            Self::RemoveFarm { .. } => Ok(()),
            Self::ApplyForLoan { loan } => {
                if loan.amount.is_finite() && loan.amount > 0.0 && loan.interest_rate.is_finite() {
                    Ok(())
                } else {
                    Err(AppError::validation(
                        "loan",
                        format!(
                            "amount {} and rate {} must be finite",
                            loan.amount, loan.interest_rate
                        ),
                    ))
                }
            }
            Self::RepayLoan { amount, .. } => {
                if amount.is_finite() && *amount > 0.0 {
                    Ok(())
                } else {
                    Err(AppError::validation(
                        "loan",
                        format!("repayment must be positive, got {amount}"),
                    ))
                }
            }
        }
    }
}

/// A queued mutation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Idempotency key sent with every submit attempt.
    pub id: Uuid,
    /// Position in the queue; strictly increasing in enqueue order.
    pub seq: u64,
    /// Device-side creation time, independent of the server clock.
    pub created_at: DateTime<Utc>,
    pub mutation: Mutation,
}

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What started a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity went from offline to online.
    Reconnect,
    /// Explicit request from the user.
    Manual,
}

/// Why a sync request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySyncing,
    Offline,
    NothingPending,
    BackingOff { retry_after: DateTime<Utc> },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadySyncing => write!(f, "a sync is already in progress"),
            Self::Offline => write!(f, "offline"),
            Self::NothingPending => write!(f, "nothing to sync"),
            Self::BackingOff { retry_after } => {
                write!(f, "backing off until {}", retry_after.format("%H:%M:%S UTC"))
            }
        }
    }
}

/// Result of a sync request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { submitted: usize, refreshed: usize },
    Skipped(SkipReason),
}

/// Current state of synchronization, as shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub connectivity: Option<Connectivity>,
    pub pending_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// Persisted part of the sync state, restored across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMeta {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncMeta {
    /// Record a successful cycle.
    #[must_use]
    pub fn with_sync_time(mut self) -> Self {
        self.last_sync = Some(Utc::now());
        self.last_error = None;
        self
    }

    /// Record a failed cycle.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Configuration for the sync coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the sync backend.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Upper bound for each remote call in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// First backoff delay after a failed cycle, in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Ceiling for the backoff delay, in seconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Whether reconnecting triggers a sync automatically.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            auto_sync: default_auto_sync(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before automatic retries after `failures` consecutive failed cycles.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(16);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs);
        Duration::from_secs(secs)
    }
}

fn default_server_url() -> String {
    "http://localhost:5000/api".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_backoff_base() -> u64 {
    2
}

const fn default_backoff_max() -> u64 {
    300 // 5 minutes
}

const fn default_auto_sync() -> bool {
    true
}

/// Configuration for the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file name inside the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
        }
    }
}

fn default_database_file() -> String {
    "agrisync.db".to_string()
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agrisync")
    }

    /// Get the durable store path.
    #[must_use]
    pub fn storage_db_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.database_file)
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert!(config.sync.auto_sync);
        assert!(config.storage_db_path().ends_with("agrisync.db"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SyncConfig {
            backoff_base_secs: 2,
            backoff_max_secs: 60,
            ..SyncConfig::default()
        };
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(16));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("prices".parse::<EntityKind>(), Ok(EntityKind::MarketPrices));
        assert_eq!("Credit-Score".parse::<EntityKind>(), Ok(EntityKind::CreditScore));
        assert!("tractors".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_mutation_tagged_json() {
        let mutation = Mutation::RepayLoan {
            loan_id: "l1".into(),
            amount: 250.0,
        };
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["type"], "repay_loan");
        assert_eq!(json["loan_id"], "l1");
        assert_eq!(mutation.kind(), EntityKind::Loans);
    }

    #[test]
    fn test_snapshot_from_null() {
        let farms = EntitySnapshot::from_json(EntityKind::Farms, serde_json::Value::Null).unwrap();
        assert_eq!(farms, EntitySnapshot::Farms(Vec::new()));

        let user = EntitySnapshot::from_json(EntityKind::User, serde_json::Value::Null).unwrap();
        assert_eq!(user, EntitySnapshot::User(None));

        assert!(
            EntitySnapshot::from_json(EntityKind::PendingOperations, serde_json::Value::Null)
                .is_err()
        );
    }

    #[test]
    fn test_sync_meta_transitions() {
        let meta = SyncMeta::default().with_error("timeout");
        assert_eq!(meta.last_error.as_deref(), Some("timeout"));

        let meta = meta.with_sync_time();
        assert!(meta.last_sync.is_some());
        assert!(meta.last_error.is_none());
    }

    #[test]
    fn test_mutation_rejects_values_json_cannot_hold() {
        let user = User {
            id: "u1".into(),
            name: "Amina".into(),
            email: String::new(),
            phone: String::new(),
            farmer_type: crate::domain::FarmerType::Smallholder,
            location: crate::domain::Location {
                latitude: f64::NAN,
                longitude: 36.8,
                address: String::new(),
            },
            profile_complete: false,
        };
        assert!(Mutation::UpdateProfile { user }.validate().is_err());

        let repay = |amount| Mutation::RepayLoan {
            loan_id: "l1".into(),
            amount,
        };
        assert!(repay(f64::INFINITY).validate().is_err());
        assert!(repay(-5.0).validate().is_err());
        assert!(repay(120.0).validate().is_ok());

        assert!(Mutation::RemoveFarm {
            farm_id: " ".into()
        }
        .validate()
        .is_err());
    }
}
