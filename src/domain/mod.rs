//! Domain layer - core types and error taxonomy.
//!
//! This layer contains pure domain models and derivations
//! without any I/O (database, network, filesystem).

pub mod error;
pub mod models;
pub mod sync;

pub use error::{AppError, Result};
pub use models::{
    CreditCategory, CreditScore, CurrentConditions, Farm, FarmerType, ForecastDay, Loan,
    LoanStatus, Location, MarketPrice, NextPayment, PricePoint, PriceTrend, ScoreRecord, User,
    Weather,
};
pub use sync::{
    AppConfig, Connectivity, EntityKind, EntitySnapshot, Mutation, PathConfig, PendingOperation,
    SkipReason, StorageConfig, SyncConfig, SyncMeta, SyncOutcome, SyncPhase, SyncStatus,
    SyncTrigger,
};
