//! Domain models for the farmer client's cached records.
//!
//! Derived values (market trend, credit category) are computed from their
//! source data on read and recomputed on deserialization, so a stored or
//! received value can never be stale.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AppError, Result};

/// Upper bound of the credit score scale.
pub const MAX_CREDIT_SCORE: u16 = 1000;

/// Upper bound of the crop health percentage.
pub const MAX_CROP_HEALTH: u8 = 100;

/// JSON has no NaN or infinity; such values would not survive a reload.
fn ensure_finite(entity: &'static str, field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AppError::validation(
            entity,
            format!("{field} must be a finite number, got {value}"),
        ))
    }
}

/// Geographic position with a human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: String,
}

impl Location {
    /// Check that the coordinates are real positions on the globe.
    ///
    /// # Errors
    /// Returns a validation error for non-finite or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        ensure_finite("location", "latitude", self.latitude)?;
        ensure_finite("location", "longitude", self.longitude)?;
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(AppError::validation(
                "location",
                format!(
                    "coordinates out of range: {}, {}",
                    self.latitude, self.longitude
                ),
            ));
        }
        Ok(())
    }
}

/// Scale of the farming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FarmerType {
    #[default]
    Smallholder,
    Medium,
    Large,
    Cooperative,
}

impl std::fmt::Display for FarmerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Smallholder => write!(f, "SMALLHOLDER"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Large => write!(f, "LARGE"),
            Self::Cooperative => write!(f, "COOPERATIVE"),
        }
    }
}

impl std::str::FromStr for FarmerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SMALLHOLDER" => Ok(Self::Smallholder),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            "COOPERATIVE" => Ok(Self::Cooperative),
            _ => Err(format!(
                "Unknown farmer type: {s}. Use: smallholder, medium, large, cooperative"
            )),
        }
    }
}

/// The signed-in farmer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub farmer_type: FarmerType,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub profile_complete: bool,
}

impl User {
    /// Names of the profile fields that are still empty.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.email.trim().is_empty() && self.phone.trim().is_empty() {
            missing.push("contact");
        }
        if self.location.address.trim().is_empty() {
            missing.push("address");
        }
        missing
    }

    /// # Errors
    /// Returns a validation error if the id is empty or the location is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::validation("user", "id must not be empty"));
        }
        self.location.validate()
    }

    /// Recompute the completeness flag from the profile fields.
    #[must_use]
    pub fn refresh_completeness(mut self) -> Self {
        self.profile_complete = self.missing_fields().is_empty();
        self
    }
}

/// A farm owned by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Size in hectares.
    pub size: f64,
    #[serde(default)]
    pub crop_types: Vec<String>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub soil_type: String,
    #[serde(default)]
    pub last_harvest: Option<NaiveDate>,
    /// Crop health percentage, 0-100 inclusive.
    pub crop_health: u8,
}

impl Farm {
    /// Check the farm's invariants.
    ///
    /// # Errors
    /// Returns a validation error if size is not positive or crop health exceeds 100.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::validation("farm", "id must not be empty"));
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(AppError::validation(
                "farm",
                format!("size must be positive, got {}", self.size),
            ));
        }
        if self.crop_health > MAX_CROP_HEALTH {
            return Err(AppError::validation(
                "farm",
                format!("crop health must be 0-100, got {}", self.crop_health),
            ));
        }
        self.location.validate()
    }
}

/// Lifecycle of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    Approved,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Approved, Self::Active)
                | (Self::Active, Self::Completed | Self::Defaulted)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Defaulted)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Defaulted => write!(f, "DEFAULTED"),
        }
    }
}

/// Next scheduled repayment of an active loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPayment {
    pub date: NaiveDate,
    pub amount: f64,
}

/// A loan taken by the user.
///
/// Dates and status are private so the lifecycle invariants hold: the term
/// ends after it starts, and a next payment exists only while `ACTIVE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LoanRecord", into = "LoanRecord")]
pub struct Loan {
    pub id: String,
    pub amount: f64,
    pub interest_rate: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: LoanStatus,
    next_payment: Option<NextPayment>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoanRecord {
    id: String,
    amount: f64,
    interest_rate: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: LoanStatus,
    #[serde(default)]
    next_payment_date: Option<NaiveDate>,
    #[serde(default)]
    next_payment_amount: Option<f64>,
}

impl TryFrom<LoanRecord> for Loan {
    type Error = AppError;

    fn try_from(record: LoanRecord) -> Result<Self> {
        let mut loan = Self::new(
            record.id,
            record.amount,
            record.interest_rate,
            record.start_date,
            record.end_date,
        )?;
        loan.status = record.status;
        if let (Some(date), Some(amount)) = (record.next_payment_date, record.next_payment_amount) {
            loan.schedule_payment(NextPayment { date, amount })?;
        }
        Ok(loan)
    }
}

impl From<Loan> for LoanRecord {
    fn from(loan: Loan) -> Self {
        let (next_payment_date, next_payment_amount) = loan
            .next_payment
            .map_or((None, None), |p| (Some(p.date), Some(p.amount)));
        Self {
            id: loan.id,
            amount: loan.amount,
            interest_rate: loan.interest_rate,
            start_date: loan.start_date,
            end_date: loan.end_date,
            status: loan.status,
            next_payment_date,
            next_payment_amount,
        }
    }
}

impl Loan {
    /// Create a new loan application in `PENDING` status.
    ///
    /// # Errors
    /// Returns a validation error if the term is empty or the amounts are invalid.
    pub fn new(
        id: impl Into<String>,
        amount: f64,
        interest_rate: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self> {
        if end_date <= start_date {
            return Err(AppError::validation(
                "loan",
                format!("end date {end_date} must be after start date {start_date}"),
            ));
        }
        if !(amount.is_finite() && amount > 0.0) {
            return Err(AppError::validation(
                "loan",
                format!("amount must be positive, got {amount}"),
            ));
        }
        if !(interest_rate.is_finite() && interest_rate >= 0.0) {
            return Err(AppError::validation(
                "loan",
                format!("interest rate must not be negative, got {interest_rate}"),
            ));
        }
        Ok(Self {
            id: id.into(),
            amount,
            interest_rate,
            start_date,
            end_date,
            status: LoanStatus::Pending,
            next_payment: None,
        })
    }

    #[must_use]
    pub const fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    #[must_use]
    pub const fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    #[must_use]
    pub const fn status(&self) -> LoanStatus {
        self.status
    }

    #[must_use]
    pub const fn next_payment(&self) -> Option<&NextPayment> {
        self.next_payment.as_ref()
    }

    /// Move the loan to `next`, dropping the payment schedule when leaving `ACTIVE`.
    ///
    /// # Errors
    /// Returns a validation error for transitions outside the lifecycle.
    pub fn transition(&mut self, next: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::validation(
                "loan",
                format!("cannot move loan {} from {} to {next}", self.id, self.status),
            ));
        }
        self.status = next;
        if next != LoanStatus::Active {
            self.next_payment = None;
        }
        Ok(())
    }

    /// Set the next repayment. Only an active loan has one.
    ///
    /// # Errors
    /// Returns a validation error if the loan is not `ACTIVE` or the amount
    /// is not a positive number.
    pub fn schedule_payment(&mut self, payment: NextPayment) -> Result<()> {
        ensure_finite("loan", "next payment amount", payment.amount)?;
        if payment.amount <= 0.0 {
            return Err(AppError::validation(
                "loan",
                format!("next payment must be positive, got {}", payment.amount),
            ));
        }
        if self.status != LoanStatus::Active {
            return Err(AppError::validation(
                "loan",
                format!(
                    "loan {} is {}; only ACTIVE loans have a next payment",
                    self.id, self.status
                ),
            ));
        }
        self.next_payment = Some(payment);
        Ok(())
    }
}

/// Conditions right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub condition: String,
    #[serde(default)]
    pub icon: String,
}

/// One day of the forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub max_temp: f64,
    pub min_temp: f64,
    pub condition: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub precipitation: f64,
}

/// Weather snapshot. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WeatherRecord")]
pub struct Weather {
    pub current: CurrentConditions,
    /// One entry per future day, oldest first.
    pub forecast: Vec<ForecastDay>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeatherRecord {
    current: CurrentConditions,
    #[serde(default)]
    forecast: Vec<ForecastDay>,
    last_updated: DateTime<Utc>,
}

impl From<WeatherRecord> for Weather {
    fn from(record: WeatherRecord) -> Self {
        Self::new(record.current, record.forecast, record.last_updated)
    }
}

impl Weather {
    /// Build a snapshot, ordering the forecast chronologically.
    #[must_use]
    pub fn new(
        current: CurrentConditions,
        mut forecast: Vec<ForecastDay>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        forecast.sort_by_key(|day| day.date);
        forecast.dedup_by_key(|day| day.date);
        Self {
            current,
            forecast,
            last_updated,
        }
    }
}

/// Direction of the latest price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceTrend {
    Up,
    Down,
    Stable,
}

impl PriceTrend {
    /// Derive the trend by comparing the latest two points of a chronological history.
    #[must_use]
    pub fn from_history(history: &[PricePoint]) -> Self {
        match history {
            [.., previous, latest] if latest.price > previous.price => Self::Up,
            [.., previous, latest] if latest.price < previous.price => Self::Down,
            _ => Self::Stable,
        }
    }
}

impl std::fmt::Display for PriceTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Stable => write!(f, "STABLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Market price of one crop. The trend is always derived from the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MarketPriceRecord", into = "MarketPriceRecord")]
pub struct MarketPrice {
    crop_type: String,
    unit: String,
    current_price: f64,
    history: Vec<PricePoint>,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketPriceRecord {
    crop_type: String,
    #[serde(default)]
    unit: String,
    current_price: f64,
    // Ignored on input; always recomputed.
    #[serde(default, skip_deserializing)]
    trend: Option<PriceTrend>,
    #[serde(default)]
    price_history: Vec<PricePoint>,
    last_updated: DateTime<Utc>,
}

impl From<MarketPriceRecord> for MarketPrice {
    fn from(record: MarketPriceRecord) -> Self {
        let mut price = Self {
            crop_type: record.crop_type,
            unit: record.unit,
            current_price: record.current_price,
            history: record.price_history,
            last_updated: record.last_updated,
        };
        price.history.sort_by_key(|p| p.date);
        if let Some(latest) = price.history.last() {
            price.current_price = latest.price;
        }
        price
    }
}

impl From<MarketPrice> for MarketPriceRecord {
    fn from(price: MarketPrice) -> Self {
        Self {
            trend: Some(price.trend()),
            crop_type: price.crop_type,
            unit: price.unit,
            current_price: price.current_price,
            price_history: price.history,
            last_updated: price.last_updated,
        }
    }
}

impl MarketPrice {
    /// Create a price with no history yet.
    ///
    /// # Errors
    /// Returns a validation error if the price is not a finite number.
    pub fn new(
        crop_type: impl Into<String>,
        unit: impl Into<String>,
        current_price: f64,
    ) -> Result<Self> {
        ensure_finite("market price", "price", current_price)?;
        Ok(Self {
            crop_type: crop_type.into(),
            unit: unit.into(),
            current_price,
            history: Vec::new(),
            last_updated: Utc::now(),
        })
    }

    /// Append an observation, keeping history chronological.
    ///
    /// # Errors
    /// Returns a validation error if `date` precedes the latest recorded point
    /// or the price is not a finite number.
    pub fn record_price(&mut self, date: NaiveDate, price: f64) -> Result<()> {
        ensure_finite("market price", "price", price)?;
        if let Some(latest) = self.history.last() {
            if date < latest.date {
                return Err(AppError::validation(
                    "market price",
                    format!(
                        "{} observation {date} is older than latest {}",
                        self.crop_type, latest.date
                    ),
                ));
            }
        }
        self.history.push(PricePoint { date, price });
        self.current_price = price;
        self.last_updated = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn crop_type(&self) -> &str {
        &self.crop_type
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub const fn current_price(&self) -> f64 {
        self.current_price
    }

    #[must_use]
    pub fn history(&self) -> &[PricePoint] {
        &self.history
    }

    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    #[must_use]
    pub fn trend(&self) -> PriceTrend {
        PriceTrend::from_history(&self.history)
    }
}

/// Credit band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditCategory {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl CreditCategory {
    /// Band a score on the 0-1000 scale in fifths.
    #[must_use]
    pub const fn from_score(score: u16) -> Self {
        match score {
            0..=199 => Self::VeryPoor,
            200..=399 => Self::Poor,
            400..=599 => Self::Fair,
            600..=799 => Self::Good,
            _ => Self::Excellent,
        }
    }
}

impl std::fmt::Display for CreditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryPoor => write!(f, "VERY_POOR"),
            Self::Poor => write!(f, "POOR"),
            Self::Fair => write!(f, "FAIR"),
            Self::Good => write!(f, "GOOD"),
            Self::Excellent => write!(f, "EXCELLENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub recorded_at: DateTime<Utc>,
    pub score: u16,
}

/// The user's credit score. The category is computed from the score, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CreditScoreRecord", into = "CreditScoreRecord")]
pub struct CreditScore {
    score: u16,
    factors: BTreeSet<String>,
    history: Vec<ScoreRecord>,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditScoreRecord {
    score: u16,
    #[serde(default, skip_deserializing)]
    category: Option<CreditCategory>,
    #[serde(default)]
    factors: BTreeSet<String>,
    #[serde(default)]
    history: Vec<ScoreRecord>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<CreditScoreRecord> for CreditScore {
    type Error = AppError;

    fn try_from(record: CreditScoreRecord) -> Result<Self> {
        let mut credit = Self::new(record.score, record.factors)?;
        credit.history = record.history;
        credit.history.sort_by_key(|r| r.recorded_at);
        credit.last_updated = record.last_updated;
        Ok(credit)
    }
}

impl From<CreditScore> for CreditScoreRecord {
    fn from(credit: CreditScore) -> Self {
        Self {
            category: Some(credit.category()),
            score: credit.score,
            factors: credit.factors,
            history: credit.history,
            last_updated: credit.last_updated,
        }
    }
}

fn check_score(score: u16) -> Result<()> {
    if score > MAX_CREDIT_SCORE {
        return Err(AppError::validation(
            "credit score",
            format!("score must be 0-{MAX_CREDIT_SCORE}, got {score}"),
        ));
    }
    Ok(())
}

impl CreditScore {
    /// Create a score with an empty history.
    ///
    /// # Errors
    /// Returns a validation error if `score` is above 1000.
    pub fn new(score: u16, factors: impl IntoIterator<Item = String>) -> Result<Self> {
        check_score(score)?;
        Ok(Self {
            score,
            factors: factors.into_iter().collect(),
            history: Vec::new(),
            last_updated: Utc::now(),
        })
    }

    /// Replace the score, recording the new value in the history.
    ///
    /// # Errors
    /// Returns a validation error if `score` is above 1000; nothing changes then.
    pub fn set_score(&mut self, score: u16) -> Result<()> {
        check_score(score)?;
        let now = Utc::now();
        self.score = score;
        self.history.push(ScoreRecord {
            recorded_at: now,
            score,
        });
        self.last_updated = now;
        Ok(())
    }

    #[must_use]
    pub const fn score(&self) -> u16 {
        self.score
    }

    #[must_use]
    pub const fn category(&self) -> CreditCategory {
        CreditCategory::from_score(self.score)
    }

    #[must_use]
    pub const fn factors(&self) -> &BTreeSet<String> {
        &self.factors
    }

    #[must_use]
    pub fn history(&self) -> &[ScoreRecord] {
        &self.history
    }

    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_credit_category_bands() {
        assert_eq!(CreditCategory::from_score(0), CreditCategory::VeryPoor);
        assert_eq!(CreditCategory::from_score(199), CreditCategory::VeryPoor);
        assert_eq!(CreditCategory::from_score(200), CreditCategory::Poor);
        assert_eq!(CreditCategory::from_score(450), CreditCategory::Fair);
        assert_eq!(CreditCategory::from_score(750), CreditCategory::Good);
        assert_eq!(CreditCategory::from_score(950), CreditCategory::Excellent);
        assert_eq!(CreditCategory::from_score(1000), CreditCategory::Excellent);
    }

    #[test]
    fn test_credit_score_updates_category_with_score() {
        let mut credit = CreditScore::new(750, vec!["repayment history".to_string()]).unwrap();
        assert_eq!(credit.category(), CreditCategory::Good);

        credit.set_score(950).unwrap();
        assert_eq!(credit.score(), 950);
        assert_eq!(credit.category(), CreditCategory::Excellent);
        assert_eq!(credit.history().len(), 1);

        assert!(credit.set_score(1001).is_err());
        assert_eq!(credit.score(), 950);
    }

    #[test]
    fn test_credit_score_ignores_stale_category() {
        let json = r#"{"score": 950, "category": "POOR", "factors": ["yield"], "history": [], "lastUpdated": "2024-05-01T00:00:00Z"}"#;
        let credit: CreditScore = serde_json::from_str(json).unwrap();
        assert_eq!(credit.category(), CreditCategory::Excellent);

        let out = serde_json::to_value(&credit).unwrap();
        assert_eq!(out["category"], "EXCELLENT");

        let too_high = r#"{"score": 1200, "lastUpdated": "2024-05-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<CreditScore>(too_high).is_err());
    }

    #[test]
    fn test_market_trend_from_history() {
        let mut maize = MarketPrice::new("maize", "kg", 10.0).unwrap();
        assert_eq!(maize.trend(), PriceTrend::Stable);

        maize.record_price(date(2024, 1, 1), 10.0).unwrap();
        assert_eq!(maize.trend(), PriceTrend::Stable);

        maize.record_price(date(2024, 1, 2), 12.0).unwrap();
        assert_eq!(maize.trend(), PriceTrend::Up);
        assert!((maize.current_price() - 12.0).abs() < f64::EPSILON);

        maize.record_price(date(2024, 1, 3), 11.5).unwrap();
        assert_eq!(maize.trend(), PriceTrend::Down);

        assert!(maize.record_price(date(2024, 1, 4), f64::NAN).is_err());
        assert!(MarketPrice::new("beans", "kg", f64::INFINITY).is_err());
        assert_eq!(maize.history().len(), 3);

        maize.record_price(date(2024, 1, 4), 11.5).unwrap();
        assert_eq!(maize.trend(), PriceTrend::Stable);

        assert!(maize.record_price(date(2023, 12, 31), 9.0).is_err());
    }

    #[test]
    fn test_market_price_recomputes_trend_on_load() {
        let json = r#"{
            "cropType": "beans",
            "unit": "kg",
            "currentPrice": 1.0,
            "trend": "UP",
            "priceHistory": [
                {"date": "2024-02-02", "price": 80.0},
                {"date": "2024-02-01", "price": 95.0}
            ],
            "lastUpdated": "2024-02-02T08:00:00Z"
        }"#;
        let beans: MarketPrice = serde_json::from_str(json).unwrap();
        assert_eq!(beans.trend(), PriceTrend::Down);
        assert_eq!(beans.history()[0].date, date(2024, 2, 1));
        assert!((beans.current_price() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_loan_requires_end_after_start() {
        assert!(Loan::new("l1", 5000.0, 0.12, date(2024, 3, 1), date(2024, 3, 1)).is_err());
        assert!(Loan::new("l1", 5000.0, 0.12, date(2024, 3, 1), date(2024, 2, 1)).is_err());
        assert!(Loan::new("l1", 5000.0, 0.12, date(2024, 3, 1), date(2025, 3, 1)).is_ok());
    }

    #[test]
    fn test_loan_lifecycle() {
        let mut loan = Loan::new("l1", 5000.0, 0.12, date(2024, 3, 1), date(2025, 3, 1)).unwrap();
        assert_eq!(loan.status(), LoanStatus::Pending);

        let payment = NextPayment {
            date: date(2024, 4, 1),
            amount: 450.0,
        };
        assert!(loan.schedule_payment(payment.clone()).is_err());

        assert!(loan.transition(LoanStatus::Active).is_err());
        loan.transition(LoanStatus::Approved).unwrap();
        loan.transition(LoanStatus::Active).unwrap();
        assert!(loan
            .schedule_payment(NextPayment {
                date: date(2024, 4, 1),
                amount: f64::NAN,
            })
            .is_err());
        loan.schedule_payment(payment).unwrap();
        assert!(loan.next_payment().is_some());

        loan.transition(LoanStatus::Completed).unwrap();
        assert!(loan.next_payment().is_none());
        assert!(loan.status().is_terminal());
        assert!(loan.transition(LoanStatus::Active).is_err());
    }

    #[test]
    fn test_loan_defaulted_branch() {
        assert!(LoanStatus::Active.can_transition_to(LoanStatus::Defaulted));
        assert!(!LoanStatus::Approved.can_transition_to(LoanStatus::Defaulted));
        assert!(!LoanStatus::Defaulted.can_transition_to(LoanStatus::Active));
    }

    #[test]
    fn test_loan_json_rejects_payment_on_pending() {
        let json = r#"{
            "id": "l9", "amount": 100.0, "interestRate": 0.1,
            "startDate": "2024-01-01", "endDate": "2024-06-01",
            "status": "PENDING",
            "nextPaymentDate": "2024-02-01", "nextPaymentAmount": 20.0
        }"#;
        assert!(serde_json::from_str::<Loan>(json).is_err());
    }

    #[test]
    fn test_farm_validation() {
        let mut farm = Farm {
            id: "f1".into(),
            name: "North plot".into(),
            size: 2.5,
            crop_types: vec!["maize".into()],
            location: Location::default(),
            soil_type: "loam".into(),
            last_harvest: None,
            crop_health: 100,
        };
        assert!(farm.validate().is_ok());

        farm.crop_health = 101;
        assert!(farm.validate().is_err());
    }

    #[test]
    fn test_weather_forecast_sorted() {
        let day = |d: u32| ForecastDay {
            date: date(2024, 6, d),
            max_temp: 28.0,
            min_temp: 17.0,
            condition: "sunny".into(),
            icon: String::new(),
            precipitation: 0.0,
        };
        let current = CurrentConditions {
            temperature: 24.0,
            humidity: 60.0,
            wind_speed: 3.0,
            condition: "sunny".into(),
            icon: String::new(),
        };
        let weather = Weather::new(current, vec![day(3), day(1), day(2)], Utc::now());
        let dates: Vec<_> = weather.forecast.iter().map(|d| d.date.day0()).collect();
        assert_eq!(dates, vec![0, 1, 2]);
    }

    #[test]
    fn test_user_completeness() {
        let user = User {
            id: "u1".into(),
            name: "Amina".into(),
            email: String::new(),
            phone: "+254700000000".into(),
            farmer_type: FarmerType::Smallholder,
            location: Location {
                latitude: -1.29,
                longitude: 36.82,
                address: "Nakuru".into(),
            },
            profile_complete: false,
        };
        assert!(user.clone().refresh_completeness().profile_complete);

        let incomplete = User {
            name: String::new(),
            ..user
        };
        assert_eq!(incomplete.missing_fields(), vec!["name"]);
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let mut user = User {
            id: "u1".into(),
            name: "Amina".into(),
            email: String::new(),
            phone: String::new(),
            farmer_type: FarmerType::Smallholder,
            location: Location::default(),
            profile_complete: false,
        };
        assert!(user.validate().is_ok());

        user.location.latitude = f64::NAN;
        assert!(user.validate().is_err());

        user.location.latitude = 91.0;
        assert!(user.validate().is_err());

        let farm = Farm {
            id: "f1".into(),
            name: "North".into(),
            size: 1.0,
            crop_types: Vec::new(),
            location: Location {
                latitude: 0.0,
                longitude: f64::NEG_INFINITY,
                address: String::new(),
            },
            soil_type: String::new(),
            last_harvest: None,
            crop_health: 50,
        };
        assert!(farm.validate().is_err());
    }
}
