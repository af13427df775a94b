use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Plan tiers in priority order. The derived `Ord` is the tier priority used to
/// pick one subscription when a customer holds several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
    UltraPro,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan tier: {0}")]
pub struct UnknownPlanTier(pub String);

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::UltraPro => "ultra_pro",
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            PlanTier::Free => 0,
            PlanTier::Pro => 1,
            PlanTier::UltraPro => 2,
        }
    }

    pub fn is_paid(self) -> bool {
        !matches!(self, PlanTier::Free)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PlanTier::Free => "Free",
            PlanTier::Pro => "Pro",
            PlanTier::UltraPro => "Ultra Pro",
        }
    }

    /// Lenient parse for labels coming from Stripe product metadata, where
    /// people type things like "Ultra-Pro" or "ultra pro".
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "free" => Some(PlanTier::Free),
            "pro" => Some(PlanTier::Pro),
            "ultrapro" | "ultra" => Some(PlanTier::UltraPro),
            _ => None,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "ultra_pro" => Ok(PlanTier::UltraPro),
            other => Err(UnknownPlanTier(other.to_string())),
        }
    }
}
