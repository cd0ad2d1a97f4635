//! In-memory mirror of the durable store.
//!
//! Reads never suspend. Writes land in memory first and are then written
//! through to the store; a failed write is reported but the in-memory value
//! stays authoritative until the next successful persist.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{
    AppError, CreditCategory, CreditScore, EntityKind, EntitySnapshot, Farm, Loan, LoanStatus,
    MarketPrice, Mutation, PendingOperation, Result, User, Weather,
};
use crate::infrastructure::{load_entity, save_entity, CachedEntity, DurableStore};

use super::connectivity::ConnectivityMonitor;
use super::pending_queue::PendingQueue;

#[derive(Debug, Clone, Default)]
struct CacheState {
    user: Option<User>,
    farms: Vec<Farm>,
    loans: Vec<Loan>,
    weather: Option<Weather>,
    market_prices: Vec<MarketPrice>,
    credit_score: Option<CreditScore>,
}

/// Result of applying a user-initiated change.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The queued operation, when the change was made offline.
    pub operation: Option<PendingOperation>,
    /// False when the write-through failed. The change still holds in
    /// memory and is persisted by the next successful write of its kind.
    pub persisted: bool,
}

impl MutationOutcome {
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.operation.is_some()
    }
}

/// Figures for the dashboard/status screen.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub user_name: Option<String>,
    pub profile_complete: bool,
    pub farm_count: usize,
    pub average_crop_health: Option<f64>,
    pub active_loans: usize,
    pub outstanding_principal: f64,
    pub credit_score: Option<u16>,
    pub credit_category: Option<CreditCategory>,
    pub weather_updated: Option<DateTime<Utc>>,
    pub tracked_crops: usize,
}

/// Single source of truth for cached records.
pub struct DomainCache {
    state: RwLock<CacheState>,
    store: Arc<dyn DurableStore>,
    queue: Arc<PendingQueue>,
    monitor: Arc<ConnectivityMonitor>,
    // Serializes write-through so the store ends on the latest in-memory value.
    persist_lock: Mutex<()>,
}

impl DomainCache {
    /// Load every cached slot from `store`. Corrupt slots are logged and treated as absent.
    ///
    /// # Errors
    /// Returns a storage error if the store cannot be read.
    pub async fn load(
        store: Arc<dyn DurableStore>,
        queue: Arc<PendingQueue>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let state = CacheState {
            user: load_slot(store.as_ref()).await?,
            farms: load_slot(store.as_ref()).await?.unwrap_or_default(),
            loans: load_slot(store.as_ref()).await?.unwrap_or_default(),
            weather: load_slot(store.as_ref()).await?,
            market_prices: load_slot(store.as_ref()).await?.unwrap_or_default(),
            credit_score: load_slot(store.as_ref()).await?,
        };

        tracing::debug!(
            farms = state.farms.len(),
            loans = state.loans.len(),
            has_user = state.user.is_some(),
            "Cache loaded"
        );

        Ok(Self {
            state: RwLock::new(state),
            store,
            queue,
            monitor,
            persist_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `f` to the in-memory state; on error nothing is changed.
    fn write<T>(&self, f: impl FnOnce(&mut CacheState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let value = f(&mut next)?;
        *guard = next;
        Ok(value)
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.read(|s| s.user.clone())
    }

    #[must_use]
    pub fn farms(&self) -> Vec<Farm> {
        self.read(|s| s.farms.clone())
    }

    #[must_use]
    pub fn loans(&self) -> Vec<Loan> {
        self.read(|s| s.loans.clone())
    }

    #[must_use]
    pub fn loan(&self, id: &str) -> Option<Loan> {
        self.read(|s| s.loans.iter().find(|l| l.id == id).cloned())
    }

    #[must_use]
    pub fn weather(&self) -> Option<Weather> {
        self.read(|s| s.weather.clone())
    }

    #[must_use]
    pub fn market_prices(&self) -> Vec<MarketPrice> {
        self.read(|s| s.market_prices.clone())
    }

    #[must_use]
    pub fn market_price(&self, crop_type: &str) -> Option<MarketPrice> {
        self.read(|s| {
            s.market_prices
                .iter()
                .find(|p| p.crop_type().eq_ignore_ascii_case(crop_type))
                .cloned()
        })
    }

    #[must_use]
    pub fn credit_score(&self) -> Option<CreditScore> {
        self.read(|s| s.credit_score.clone())
    }

    /// Set or clear the signed-in user. `None` removes the slot (logout).
    ///
    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn set_user(&self, user: Option<User>) -> Result<()> {
        self.write(|s| {
            s.user = user;
            Ok(())
        })?;
        self.persist(EntityKind::User).await
    }

    /// # Errors
    /// Returns a validation error for an invalid farm (nothing changes), or a
    /// storage error if the write-through fails.
    pub async fn set_farms(&self, farms: Vec<Farm>) -> Result<()> {
        self.write(|s| {
            farms.iter().try_for_each(Farm::validate)?;
            s.farms = farms;
            Ok(())
        })?;
        self.persist(EntityKind::Farms).await
    }

    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn set_loans(&self, loans: Vec<Loan>) -> Result<()> {
        self.write(|s| {
            s.loans = loans;
            Ok(())
        })?;
        self.persist(EntityKind::Loans).await
    }

    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn set_weather(&self, weather: Option<Weather>) -> Result<()> {
        self.write(|s| {
            s.weather = weather;
            Ok(())
        })?;
        self.persist(EntityKind::Weather).await
    }

    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn set_market_prices(&self, prices: Vec<MarketPrice>) -> Result<()> {
        self.write(|s| {
            s.market_prices = prices;
            Ok(())
        })?;
        self.persist(EntityKind::MarketPrices).await
    }

    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn set_credit_score(&self, credit: Option<CreditScore>) -> Result<()> {
        self.write(|s| {
            s.credit_score = credit;
            Ok(())
        })?;
        self.persist(EntityKind::CreditScore).await
    }

    /// Update the score in place, keeping category and history consistent.
    ///
    /// # Errors
    /// Returns a validation error for scores above 1000 (nothing changes), or a
    /// storage error if the write-through fails.
    pub async fn update_credit_score(&self, score: u16) -> Result<CreditScore> {
        let updated = self.write(|s| {
            let credit = match s.credit_score.take() {
                Some(mut credit) => {
                    credit.set_score(score)?;
                    credit
                }
                None => CreditScore::new(score, Vec::new())?,
            };
            s.credit_score = Some(credit.clone());
            Ok(credit)
        })?;
        self.persist(EntityKind::CreditScore).await?;
        Ok(updated)
    }

    /// Replace one entity kind wholesale with a server snapshot.
    ///
    /// # Errors
    /// Returns a storage error if the write-through fails.
    pub async fn apply_snapshot(&self, snapshot: EntitySnapshot) -> Result<()> {
        match snapshot {
            EntitySnapshot::User(user) => self.set_user(user).await,
            EntitySnapshot::Farms(farms) => self.set_farms(farms).await,
            EntitySnapshot::Loans(loans) => self.set_loans(loans).await,
            EntitySnapshot::Weather(weather) => self.set_weather(weather).await,
            EntitySnapshot::MarketPrices(prices) => self.set_market_prices(prices).await,
            EntitySnapshot::CreditScore(credit) => self.set_credit_score(credit).await,
        }
    }

    /// Apply a user-initiated change locally and, while offline, queue it for
    /// the server.
    ///
    /// The change is visible to readers before this returns. A failed
    /// write-through is logged and reported through
    /// [`MutationOutcome::persisted`]; it does not stop the change from
    /// being queued.
    ///
    /// # Errors
    /// Returns a validation or not-found error if the change is rejected
    /// (nothing changes, nothing is queued), or a storage error if queueing
    /// fails.
    pub async fn apply(&self, mutation: Mutation) -> Result<MutationOutcome> {
        let touched = self.write(|s| apply_locally(s, &mutation))?;

        let persisted = match touched {
            Some(kind) => self.persist(kind).await.is_ok(),
            None => true,
        };

        let operation = if self.monitor.current_status().is_online() {
            None
        } else {
            Some(self.queue.enqueue(mutation).await?)
        };

        Ok(MutationOutcome {
            operation,
            persisted,
        })
    }

    /// Dashboard figures derived from the current state.
    #[must_use]
    pub fn summary(&self) -> CacheSummary {
        self.read(|s| {
            let active: Vec<&Loan> = s
                .loans
                .iter()
                .filter(|l| l.status() == LoanStatus::Active)
                .collect();

            #[allow(clippy::cast_precision_loss)]
            let average_crop_health = (!s.farms.is_empty()).then(|| {
                s.farms.iter().map(|f| f64::from(f.crop_health)).sum::<f64>()
                    / s.farms.len() as f64
            });

            CacheSummary {
                user_name: s.user.as_ref().map(|u| u.name.clone()),
                profile_complete: s.user.as_ref().is_some_and(|u| u.profile_complete),
                farm_count: s.farms.len(),
                average_crop_health,
                active_loans: active.len(),
                outstanding_principal: active.iter().map(|l| l.amount).sum(),
                credit_score: s.credit_score.as_ref().map(CreditScore::score),
                credit_category: s.credit_score.as_ref().map(CreditScore::category),
                weather_updated: s.weather.as_ref().map(|w| w.last_updated),
                tracked_crops: s.market_prices.len(),
            }
        })
    }

    /// Write the current in-memory value of `kind` to the store.
    async fn persist(&self, kind: EntityKind) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let state = self.read(CacheState::clone);

        let result = match kind {
            EntityKind::User => self.persist_optional(state.user).await,
            EntityKind::Farms => save_entity(self.store.as_ref(), &state.farms).await,
            EntityKind::Loans => save_entity(self.store.as_ref(), &state.loans).await,
            EntityKind::Weather => self.persist_optional(state.weather).await,
            EntityKind::MarketPrices => {
                save_entity(self.store.as_ref(), &state.market_prices).await
            }
            EntityKind::CreditScore => self.persist_optional(state.credit_score).await,
            EntityKind::PendingOperations => Ok(()),
        };

        if let Err(e) = &result {
            tracing::warn!(kind = %kind, error = %e, "Write-through failed, keeping in-memory value");
        }
        result
    }

    async fn persist_optional<T: CachedEntity>(&self, value: Option<T>) -> Result<()> {
        match value {
            Some(value) => save_entity(self.store.as_ref(), &value).await,
            None => self.store.remove(T::KIND).await,
        }
    }
}

async fn load_slot<T: CachedEntity>(store: &dyn DurableStore) -> Result<Option<T>> {
    match load_entity::<T>(store).await {
        Ok(value) => Ok(value),
        Err(AppError::JsonParse { message, .. }) => {
            tracing::warn!(kind = %T::KIND, error = %message, "Corrupt cache slot ignored");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Validate and apply a mutation to `state`. Returns the kind that needs persisting.
fn apply_locally(state: &mut CacheState, mutation: &Mutation) -> Result<Option<EntityKind>> {
    mutation.validate()?;
    match mutation {
        Mutation::UpdateProfile { user } => {
            state.user = Some(user.clone().refresh_completeness());
        }
        Mutation::SaveFarm { farm } => {
            match state.farms.iter_mut().find(|f| f.id == farm.id) {
                Some(existing) => *existing = farm.clone(),
                None => state.farms.push(farm.clone()),
            }
        }
        Mutation::RemoveFarm { farm_id } => {
            let before = state.farms.len();
            state.farms.retain(|f| &f.id != farm_id);
            if state.farms.len() == before {
                return Err(AppError::NotFound {
                    entity: "farm",
                    id: farm_id.clone(),
                });
            }
        }
        Mutation::ApplyForLoan { loan } => {
            if loan.status() != LoanStatus::Pending {
                return Err(AppError::validation(
                    "loan",
                    format!("new applications must be PENDING, got {}", loan.status()),
                ));
            }
            if state.loans.iter().any(|l| l.id == loan.id) {
                return Err(AppError::validation(
                    "loan",
                    format!("loan {} already exists", loan.id),
                ));
            }
            state.loans.push(loan.clone());
        }
        Mutation::RepayLoan { loan_id, amount } => {
            let loan = state
                .loans
                .iter()
                .find(|l| &l.id == loan_id)
                .ok_or_else(|| AppError::NotFound {
                    entity: "loan",
                    id: loan_id.clone(),
                })?;
            if loan.status() != LoanStatus::Active {
                return Err(AppError::validation(
                    "loan",
                    format!("loan {loan_id} is {}, only ACTIVE loans take repayments", loan.status()),
                ));
            }
            if !(amount.is_finite() && *amount > 0.0) {
                return Err(AppError::validation(
                    "loan",
                    format!("repayment must be positive, got {amount}"),
                ));
            }
            // Balances are settled server-side.
            return Ok(None);
        }
    }
    Ok(Some(mutation.kind()))
}
