//! Tier policy resolution.
//!
//! Maps a subscription tier to the limits that shape an interview. The
//! table is configuration; resolution is a pure lookup that runs on every
//! turn so tier changes apply to the next turn without touching sessions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// Tier
// ============================================================================

/// Subscription tier of a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Free tier (default).
    #[default]
    Free,
    /// Paid tier.
    Pro,
    /// Top tier, unlimited questions.
    Premium,
}

impl Tier {
    /// Parses a tier name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid tier '{s}': expected one of 'free', 'pro', 'premium'"
            ))
        })
    }
}

impl Serialize for Tier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Allowance
// ============================================================================

/// Either every value or an explicit set. Values are compared lowercase.
///
/// Serialized as the string `"all"` or as an array of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allowance {
    /// Every value is allowed.
    All,
    /// Only the listed values are allowed.
    Only(BTreeSet<String>),
}

impl Allowance {
    /// Builds an explicit allowance from a list of values.
    #[must_use]
    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Only(values.into_iter().map(|v| normalize(v.as_ref())).collect())
    }

    /// An allowance that permits nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    /// Returns `true` if `value` is allowed.
    #[must_use]
    pub fn allows(&self, value: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&normalize(value)),
        }
    }

    /// Returns the first value in `values` that is not allowed.
    #[must_use]
    pub fn first_disallowed<'a>(&self, values: &'a [String]) -> Option<&'a str> {
        values
            .iter()
            .map(String::as_str)
            .find(|v| !self.allows(v))
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl Serialize for Allowance {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Only(set) => set.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Allowance {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            List(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(Self::All),
            Repr::Keyword(k) => Err(serde::de::Error::custom(format!(
                "invalid allowance '{k}': expected \"all\" or a list of values"
            ))),
            Repr::List(values) => Ok(Self::only(values)),
        }
    }
}

// ============================================================================
// TierPolicy
// ============================================================================

/// Limits applied to one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicy {
    /// Main questions per session; `None` means unlimited.
    pub question_limit: Option<u32>,

    /// Follow-ups allowed after each main question.
    pub max_follow_ups: u32,

    /// Topics the tier may interview on.
    pub allowed_topics: Allowance,

    /// Whether cross-topic synthesis material may be used.
    pub cross_tech_allowed: bool,

    /// Company interview styles the tier may select.
    pub allowed_company_styles: Allowance,

    /// Sessions per calendar month; `None` means unlimited.
    #[serde(default)]
    pub monthly_session_limit: Option<u32>,
}

impl TierPolicy {
    fn free() -> Self {
        Self {
            question_limit: Some(5),
            max_follow_ups: 1,
            allowed_topics: Allowance::only(["javascript", "python", "react", "sql"]),
            cross_tech_allowed: false,
            allowed_company_styles: Allowance::none(),
            monthly_session_limit: Some(3),
        }
    }

    fn pro() -> Self {
        Self {
            question_limit: Some(15),
            max_follow_ups: 2,
            allowed_topics: Allowance::All,
            cross_tech_allowed: true,
            allowed_company_styles: Allowance::only(["amazon", "google", "meta", "microsoft"]),
            monthly_session_limit: Some(30),
        }
    }

    fn premium() -> Self {
        Self {
            question_limit: None,
            max_follow_ups: 3,
            allowed_topics: Allowance::All,
            cross_tech_allowed: true,
            allowed_company_styles: Allowance::All,
            monthly_session_limit: None,
        }
    }

    fn validate(&self, tier: Tier) -> Result<()> {
        if self.question_limit == Some(0) {
            return Err(EngineError::config_validation(
                format!("tiers.{tier}.questionLimit must be greater than 0"),
                "Use null for unlimited questions",
            ));
        }
        if self.monthly_session_limit == Some(0) {
            return Err(EngineError::config_validation(
                format!("tiers.{tier}.monthlySessionLimit must be greater than 0"),
                "Use null for unlimited sessions",
            ));
        }
        Ok(())
    }

    /// Builds the follow-up context for `follow_ups_since_main` follow-ups.
    #[must_use]
    pub const fn follow_up_context(&self, follow_ups_since_main: u32) -> FollowUpContext {
        FollowUpContext {
            follow_ups_since_main,
            max_follow_ups: self.max_follow_ups,
            can_ask_follow_up: follow_ups_since_main < self.max_follow_ups,
        }
    }
}

/// The policy table for every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTable {
    /// Free tier policy.
    #[serde(default = "TierPolicy::free")]
    pub free: TierPolicy,
    /// Pro tier policy.
    #[serde(default = "TierPolicy::pro")]
    pub pro: TierPolicy,
    /// Premium tier policy.
    #[serde(default = "TierPolicy::premium")]
    pub premium: TierPolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            free: TierPolicy::free(),
            pro: TierPolicy::pro(),
            premium: TierPolicy::premium(),
        }
    }
}

impl PolicyTable {
    /// Resolves the policy for `tier`.
    #[must_use]
    pub fn resolve(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::Free => self.free.clone(),
            Tier::Pro => self.pro.clone(),
            Tier::Premium => self.premium.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.free.validate(Tier::Free)?;
        self.pro.validate(Tier::Pro)?;
        self.premium.validate(Tier::Premium)
    }
}

/// Follow-up budget state for the current main question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpContext {
    /// Follow-ups asked since the most recent main question.
    pub follow_ups_since_main: u32,
    /// The tier's budget.
    pub max_follow_ups: u32,
    /// Whether another follow-up may be asked.
    pub can_ask_follow_up: bool,
}
