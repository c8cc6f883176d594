use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::ledger::TokenLedger;
use crate::plan::Plan;

const MONTHS_PT_BR: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpgradeOffer {
    NextTier { plan: Plan, tokens: u64 },
    Renew { plan: Plan },
}

/// Read-only view of a ledger for the profile screen.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsageSummary {
    pub plan: Plan,
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub remaining_tokens: u64,
    /// Capped at 100 even when usage overflowed the allotment.
    pub percentage: f64,
    pub renews_at_ms: u64,
    /// e.g. `16 de outubro`.
    pub renewal_label: Option<String>,
    /// e.g. `16/10/2026`.
    pub renewal_date: Option<String>,
    pub offer: UpgradeOffer,
}

impl UsageSummary {
    /// `user_plan` is the plan attribute of the user document; unknown or
    /// missing names fall back to the ledger's plan, then to Padawan.
    pub fn new(ledger: &TokenLedger, user_plan: Option<&str>) -> Self {
        let plan = user_plan
            .and_then(Plan::from_name)
            .or_else(|| Plan::from_name(&ledger.plan))
            .unwrap_or(Plan::Padawan);
        let renews_at_ms = ledger.renewal_deadline_ms();
        let renews_at = datetime_from_millis(renews_at_ms);
        let offer = match plan.next_tier() {
            Some(next) => UpgradeOffer::NextTier {
                plan: next,
                tokens: next.tokens(),
            },
            None => UpgradeOffer::Renew { plan },
        };

        Self {
            plan,
            total_tokens: ledger.total_tokens,
            used_tokens: ledger.used_tokens,
            remaining_tokens: ledger.remaining(),
            percentage: ledger.usage_percent().min(100.0),
            renews_at_ms,
            renewal_label: renews_at.map(day_month_label),
            renewal_date: renews_at.and_then(|at| {
                at.format(format_description!("[day]/[month]/[year]")).ok()
            }),
            offer,
        }
    }
}

fn datetime_from_millis(ms: u64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

fn day_month_label(at: OffsetDateTime) -> String {
    let month = MONTHS_PT_BR[usize::from(u8::from(at.month())) - 1];
    format!("{:02} de {month}", at.day())
}
