//! Subscription tiers and the opaque checkout tokens that map back to them.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Plan {
    Padawan,
    Jedi,
    MestreJedi,
    MestreYoda,
}

/// Success-callback tokens handed to the payment checkout. The checkout
/// redirects back to `/success/<token>`.
const CHECKOUT_TOKENS: &[(&str, Plan)] = &[
    ("w2x6y9z4a7b1c5d8e3f2g4h", Plan::MestreYoda),
    ("j8k2m9n4p5q7r3s6t1v8w2x", Plan::Jedi),
    ("h5g9f3d7c1b4n8m2k6l9p4q", Plan::MestreJedi),
];

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Padawan, Plan::Jedi, Plan::MestreJedi, Plan::MestreYoda];

    pub fn id(self) -> &'static str {
        match self {
            Plan::Padawan => "padawan",
            Plan::Jedi => "jedi",
            Plan::MestreJedi => "mestre-jedi",
            Plan::MestreYoda => "mestre-yoda",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Plan::Padawan => "Padawan",
            Plan::Jedi => "Jedi",
            Plan::MestreJedi => "Mestre Jedi",
            Plan::MestreYoda => "Mestre Yoda",
        }
    }

    pub fn tokens(self) -> u64 {
        match self {
            Plan::Padawan => 100,
            Plan::Jedi => 1_000,
            Plan::MestreJedi => 3_000,
            Plan::MestreYoda => 11_000,
        }
    }

    /// Price in whole BRL.
    pub fn price_brl(self) -> u32 {
        match self {
            Plan::Padawan => 0,
            Plan::Jedi => 600,
            Plan::MestreJedi => 1_800,
            Plan::MestreYoda => 6_000,
        }
    }

    /// The entry tier is granted on sign-up and cannot be bought.
    pub fn is_purchasable(self) -> bool {
        self != Plan::Padawan
    }

    pub fn next_tier(self) -> Option<Plan> {
        match self {
            Plan::Padawan => Some(Plan::Jedi),
            Plan::Jedi => Some(Plan::MestreJedi),
            Plan::MestreJedi => Some(Plan::MestreYoda),
            Plan::MestreYoda => None,
        }
    }

    pub fn from_id(id: &str) -> Option<Plan> {
        Plan::ALL.into_iter().find(|plan| plan.id() == id)
    }

    /// Accepts both display names and ids, ignoring case and `-`/space.
    pub fn from_name(name: &str) -> Option<Plan> {
        let wanted = normalize_name(name);
        Plan::ALL
            .into_iter()
            .find(|plan| normalize_name(plan.display_name()) == wanted)
    }

    pub fn from_checkout_token(token: &str) -> Option<Plan> {
        CHECKOUT_TOKENS
            .iter()
            .find(|(candidate, _)| *candidate == token)
            .map(|(_, plan)| *plan)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == '-' { ' ' } else { c.to_ascii_lowercase() })
        .collect()
}
