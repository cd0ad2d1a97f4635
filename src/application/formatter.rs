//! Output formatting for the command-line front end.
//!
//! Supports two output formats: table view and JSON.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::domain::{
    Connectivity, CreditScore, Farm, Loan, MarketPrice, Mutation, PendingOperation, PriceTrend,
    SyncOutcome, SyncPhase, SyncStatus, User, Weather,
};

use super::domain_cache::CacheSummary;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables.
    #[default]
    Table,
    /// JSON format for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: table, json")),
        }
    }
}

/// Serializes any value as pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Formats sync status and dashboard figures for display.
pub fn format_status(status: &SyncStatus, summary: &CacheSummary) -> String {
    let connectivity = match status.connectivity {
        Some(Connectivity::Online) => "online".green(),
        Some(Connectivity::Offline) => "offline".yellow(),
        None => "unknown".dimmed(),
    };
    let phase = match status.phase {
        SyncPhase::Idle => "idle".green(),
        SyncPhase::Syncing => "syncing".cyan(),
        SyncPhase::Failed => "failed".red(),
    };
    let last_sync = status.last_sync.map_or_else(
        || "never".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    let mut out = format!(
        "{}\n  Connectivity: {connectivity}\n  Sync: {phase}\n  Pending operations: {}\n  Last sync: {last_sync}",
        "🔄 Sync".bold(),
        status.pending_count.to_string().cyan(),
    );
    if let Some(err) = &status.last_error {
        out.push_str(&format!("\n  Last error: {}", err.red()));
    }
    if status.consecutive_failures > 0 {
        out.push_str(&format!(
            "\n  Consecutive failures: {}",
            status.consecutive_failures.to_string().yellow()
        ));
    }

    let credit = match (summary.credit_score, summary.credit_category) {
        (Some(score), Some(category)) => format!("{score} ({category})"),
        _ => "-".to_string(),
    };
    let health = summary
        .average_crop_health
        .map_or_else(|| "-".to_string(), |h| format!("{h:.0}%"));

    out.push_str(&format!(
        "\n\n{}\n  Farmer: {}{}\n  Farms: {} (avg crop health {health})\n  Active loans: {} ({:.2} outstanding)\n  Credit score: {credit}\n  Tracked crops: {}",
        "🌾 Farm data".bold(),
        summary.user_name.as_deref().unwrap_or("-"),
        if summary.profile_complete {
            String::new()
        } else {
            " (profile incomplete)".yellow().to_string()
        },
        summary.farm_count.to_string().cyan(),
        summary.active_loans.to_string().cyan(),
        summary.outstanding_principal,
        summary.tracked_crops,
    ));

    out
}

/// Formats the result of a sync or refresh request.
pub fn format_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Completed {
            submitted,
            refreshed,
        } => format!(
            "{} Synced: {} operation(s) submitted, {} entities refreshed",
            "✓".green(),
            submitted.to_string().cyan(),
            refreshed.to_string().cyan()
        ),
        SyncOutcome::Skipped(reason) => format!("{} Sync skipped: {reason}", "•".yellow()),
    }
}

pub fn format_user(user: &User) -> String {
    let mut out = format!(
        "{}\n  ID: {}\n  Name: {}\n  Email: {}\n  Phone: {}\n  Type: {}\n  Address: {}",
        "👤 Profile".bold(),
        user.id,
        or_dash(&user.name),
        or_dash(&user.email),
        or_dash(&user.phone),
        user.farmer_type,
        or_dash(&user.location.address),
    );
    let missing = user.missing_fields();
    if !missing.is_empty() {
        out.push_str(&format!(
            "\n  {} {}",
            "Missing:".yellow(),
            missing.join(", ")
        ));
    }
    out
}

pub fn format_farms_table(farms: &[Farm]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Size (ha)", "Crops", "Soil", "Health", "Last harvest"]);

    for farm in farms {
        let harvest = farm
            .last_harvest
            .map_or_else(|| "-".to_string(), |d| d.to_string());
        table.add_row(vec![
            truncate(&farm.id, 12),
            truncate(&farm.name, 24),
            format!("{:.1}", farm.size),
            truncate(&farm.crop_types.join(", "), 24),
            or_dash(&farm.soil_type).to_string(),
            format!("{}%", farm.crop_health),
            harvest,
        ]);
    }

    table.to_string()
}

pub fn format_loans_table(loans: &[Loan]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Amount", "Rate", "Start", "End", "Status", "Next payment"]);

    for loan in loans {
        let next = loan.next_payment().map_or_else(
            || "-".to_string(),
            |p| format!("{:.2} on {}", p.amount, p.date),
        );
        table.add_row(vec![
            truncate(&loan.id, 12),
            format!("{:.2}", loan.amount),
            format!("{:.1}%", loan.interest_rate),
            loan.start_date().to_string(),
            loan.end_date().to_string(),
            loan.status().to_string(),
            next,
        ]);
    }

    table.to_string()
}

pub fn format_weather(weather: &Weather) -> String {
    let now = &weather.current;
    let mut out = format!(
        "{}\n  {} {:.1}°C, humidity {:.0}%, wind {:.1} km/h\n  Updated: {}",
        "🌦 Weather".bold(),
        now.condition,
        now.temperature,
        now.humidity,
        now.wind_speed,
        weather.last_updated.format("%Y-%m-%d %H:%M UTC"),
    );

    if !weather.forecast.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Date", "Condition", "Min", "Max", "Rain (mm)"]);
        for day in &weather.forecast {
            table.add_row(vec![
                day.date.to_string(),
                day.condition.clone(),
                format!("{:.1}", day.min_temp),
                format!("{:.1}", day.max_temp),
                format!("{:.1}", day.precipitation),
            ]);
        }
        out.push('\n');
        out.push_str(&table.to_string());
    }

    out
}

pub fn format_market_table(prices: &[MarketPrice]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Crop", "Price", "Unit", "Trend", "Updated"]);

    for price in prices {
        let trend = match price.trend() {
            PriceTrend::Up => "▲ up".green(),
            PriceTrend::Down => "▼ down".red(),
            PriceTrend::Stable => "= stable".normal(),
        };
        table.add_row(vec![
            price.crop_type().to_string(),
            format!("{:.2}", price.current_price()),
            price.unit().to_string(),
            trend.to_string(),
            price.last_updated().format("%Y-%m-%d").to_string(),
        ]);
    }

    table.to_string()
}

pub fn format_credit(credit: &CreditScore) -> String {
    let mut out = format!(
        "{}\n  Score: {} / 1000 ({})\n  Updated: {}",
        "💳 Credit score".bold(),
        credit.score().to_string().cyan(),
        credit.category(),
        credit.last_updated().format("%Y-%m-%d %H:%M UTC"),
    );
    if !credit.factors().is_empty() {
        out.push_str("\n  Factors:");
        for factor in credit.factors() {
            out.push_str(&format!("\n    - {factor}"));
        }
    }
    out
}

pub fn format_pending_table(ops: &[PendingOperation]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Queued", "Operation", "Target", "Key"]);

    for op in ops {
        let id = op.id.to_string();
        table.add_row(vec![
            op.seq.to_string(),
            op.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            op.mutation.label().to_string(),
            mutation_target(&op.mutation),
            id[..8].to_string(),
        ]);
    }

    table.to_string()
}

fn mutation_target(mutation: &Mutation) -> String {
    match mutation {
        Mutation::UpdateProfile { user } => user.id.clone(),
        Mutation::SaveFarm { farm } => farm.id.clone(),
        Mutation::RemoveFarm { farm_id } => farm_id.clone(),
        Mutation::ApplyForLoan { loan } => loan.id.clone(),
        Mutation::RepayLoan { loan_id, amount } => format!("{loan_id} ({amount:.2})"),
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

/// Truncates a string to max characters with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
