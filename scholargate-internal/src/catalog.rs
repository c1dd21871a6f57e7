//! Feature catalog: the single source of truth for gated capabilities and
//! their tier-dependent quotas.
//!
//! Policies are fixed at startup. Per-feature overrides from the config file
//! are validated when the catalog is built; a malformed policy is a
//! configuration error surfaced at startup, never a per-request failure.

use std::collections::HashMap;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Error, ErrorDetails};
use crate::subscription::Tier;
use crate::window::ResetPeriod;

/// Gated capabilities of the platform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    AiRecommendations,
    SavedScholarships,
    EssayAssistance,
    DeadlineReminders,
    ProfileInsights,
}

/// A quota ceiling: a finite count or unlimited.
///
/// Serializes as a non-negative integer or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Finite(u32),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Whether a counter at `count` may be incremented under this ceiling.
    pub fn permits(&self, count: u32) -> bool {
        match self {
            Limit::Finite(limit) => count < *limit,
            Limit::Unlimited => true,
        }
    }

    /// Uses left after `count` consumptions (saturating at zero).
    pub fn remaining_after(&self, count: u32) -> Limit {
        match self {
            Limit::Finite(limit) => Limit::Finite(limit.saturating_sub(count)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }

    /// The finite ceiling, or `None` for unlimited.
    pub fn as_ceiling(&self) -> Option<u32> {
        match self {
            Limit::Finite(limit) => Some(*limit),
            Limit::Unlimited => None,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Finite(limit) => write!(f, "{limit}"),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(limit) => serializer.serialize_u32(*limit),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LimitVisitor;

        impl Visitor<'_> for LimitVisitor {
            type Value = Limit;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a non-negative integer or the string \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Limit, E> {
                u32::try_from(value)
                    .map(Limit::Finite)
                    .map_err(|_| E::custom(format!("limit {value} out of range")))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Limit, E> {
                u32::try_from(value)
                    .map(Limit::Finite)
                    .map_err(|_| E::custom(format!("limit {value} out of range")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Limit, E> {
                if value == "unlimited" {
                    Ok(Limit::Unlimited)
                } else {
                    Err(E::custom(format!(
                        "expected \"unlimited\", got \"{value}\""
                    )))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

/// Quota policy for one gated feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturePolicy {
    /// Uses per window on the free tier. `0` makes the feature paid-only.
    pub free_limit: u32,
    /// Uses per window on the paid tier; finite values must be >= `free_limit`.
    pub paid_limit: Limit,
    pub reset_period: ResetPeriod,
    /// Whether `evaluate` may fail open when the store is down and no cached
    /// usage exists. Only sensible for low-risk, non-monetary features.
    pub fail_open: bool,
}

impl FeaturePolicy {
    pub fn limit_for(&self, tier: Tier) -> Limit {
        match tier {
            Tier::Free => Limit::Finite(self.free_limit),
            Tier::Paid => self.paid_limit,
        }
    }

    fn validate(&self, feature: Feature) -> Result<(), Error> {
        if let Limit::Finite(paid) = self.paid_limit {
            if paid < self.free_limit {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!(
                        "Invalid policy for feature `{feature}`: paid_limit ({paid}) is below free_limit ({})",
                        self.free_limit
                    ),
                }));
            }
        }
        Ok(())
    }
}

/// Per-feature policy overrides from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturePolicyConfig {
    pub free_limit: Option<u32>,
    pub paid_limit: Option<Limit>,
    pub reset_period: Option<ResetPeriod>,
    pub fail_open: Option<bool>,
}

/// Static table of policies, one per feature.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    ai_recommendations: FeaturePolicy,
    saved_scholarships: FeaturePolicy,
    essay_assistance: FeaturePolicy,
    deadline_reminders: FeaturePolicy,
    profile_insights: FeaturePolicy,
}

fn default_policy(feature: Feature) -> FeaturePolicy {
    match feature {
        Feature::AiRecommendations => FeaturePolicy {
            free_limit: 5,
            paid_limit: Limit::Unlimited,
            reset_period: ResetPeriod::Monthly,
            fail_open: false,
        },
        Feature::SavedScholarships => FeaturePolicy {
            free_limit: 10,
            paid_limit: Limit::Finite(200),
            reset_period: ResetPeriod::Never,
            fail_open: false,
        },
        Feature::EssayAssistance => FeaturePolicy {
            free_limit: 2,
            paid_limit: Limit::Unlimited,
            reset_period: ResetPeriod::Monthly,
            fail_open: false,
        },
        Feature::DeadlineReminders => FeaturePolicy {
            free_limit: 3,
            paid_limit: Limit::Finite(50),
            reset_period: ResetPeriod::Weekly,
            fail_open: true,
        },
        Feature::ProfileInsights => FeaturePolicy {
            free_limit: 1,
            paid_limit: Limit::Finite(30),
            reset_period: ResetPeriod::Daily,
            fail_open: false,
        },
    }
}

impl FeatureCatalog {
    /// Build the catalog from the defaults plus config-file overrides,
    /// validating every policy.
    pub fn new(overrides: &HashMap<Feature, FeaturePolicyConfig>) -> Result<Self, Error> {
        let mut resolved = HashMap::new();
        for feature in Feature::iter() {
            let mut policy = default_policy(feature);
            if let Some(over) = overrides.get(&feature) {
                if let Some(free_limit) = over.free_limit {
                    policy.free_limit = free_limit;
                }
                if let Some(paid_limit) = over.paid_limit {
                    policy.paid_limit = paid_limit;
                }
                if let Some(reset_period) = over.reset_period {
                    policy.reset_period = reset_period;
                }
                if let Some(fail_open) = over.fail_open {
                    policy.fail_open = fail_open;
                }
            }
            policy.validate(feature)?;
            resolved.insert(feature, policy);
        }

        let mut take = |feature: Feature| -> Result<FeaturePolicy, Error> {
            resolved.remove(&feature).ok_or_else(|| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("Feature `{feature}` missing from resolved catalog"),
                })
            })
        };

        Ok(Self {
            ai_recommendations: take(Feature::AiRecommendations)?,
            saved_scholarships: take(Feature::SavedScholarships)?,
            essay_assistance: take(Feature::EssayAssistance)?,
            deadline_reminders: take(Feature::DeadlineReminders)?,
            profile_insights: take(Feature::ProfileInsights)?,
        })
    }

    /// Look up the policy for a feature. Total over the closed feature set.
    pub fn policy_for(&self, feature: Feature) -> &FeaturePolicy {
        match feature {
            Feature::AiRecommendations => &self.ai_recommendations,
            Feature::SavedScholarships => &self.saved_scholarships,
            Feature::EssayAssistance => &self.essay_assistance,
            Feature::DeadlineReminders => &self.deadline_reminders,
            Feature::ProfileInsights => &self.profile_insights,
        }
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self {
            ai_recommendations: default_policy(Feature::AiRecommendations),
            saved_scholarships: default_policy(Feature::SavedScholarships),
            essay_assistance: default_policy(Feature::EssayAssistance),
            deadline_reminders: default_policy(Feature::DeadlineReminders),
            profile_insights: default_policy(Feature::ProfileInsights),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = FeatureCatalog::new(&HashMap::new()).unwrap();
        for feature in Feature::iter() {
            let policy = catalog.policy_for(feature);
            if let Limit::Finite(paid) = policy.paid_limit {
                assert!(paid >= policy.free_limit, "invalid default for {feature}");
            }
        }
    }

    #[test]
    fn test_override_applies() {
        let mut overrides = HashMap::new();
        overrides.insert(
            Feature::ProfileInsights,
            FeaturePolicyConfig {
                free_limit: Some(4),
                paid_limit: Some(Limit::Unlimited),
                reset_period: Some(ResetPeriod::Weekly),
                fail_open: None,
            },
        );
        let catalog = FeatureCatalog::new(&overrides).unwrap();
        let policy = catalog.policy_for(Feature::ProfileInsights);
        assert_eq!(policy.free_limit, 4);
        assert_eq!(policy.paid_limit, Limit::Unlimited);
        assert_eq!(policy.reset_period, ResetPeriod::Weekly);
        assert!(!policy.fail_open);
        // Other features keep their defaults
        assert_eq!(
            catalog.policy_for(Feature::AiRecommendations).free_limit,
            5
        );
    }

    #[test]
    fn test_paid_below_free_is_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert(
            Feature::SavedScholarships,
            FeaturePolicyConfig {
                free_limit: Some(50),
                paid_limit: Some(Limit::Finite(10)),
                ..Default::default()
            },
        );
        assert!(FeatureCatalog::new(&overrides).is_err());
    }

    #[test]
    fn test_limit_for_tier() {
        let policy = FeaturePolicy {
            free_limit: 5,
            paid_limit: Limit::Unlimited,
            reset_period: ResetPeriod::Monthly,
            fail_open: false,
        };
        assert_eq!(policy.limit_for(Tier::Free), Limit::Finite(5));
        assert_eq!(policy.limit_for(Tier::Paid), Limit::Unlimited);
    }

    #[test]
    fn test_limit_permits_and_remaining() {
        let limit = Limit::Finite(3);
        assert!(limit.permits(0));
        assert!(limit.permits(2));
        assert!(!limit.permits(3));
        assert_eq!(limit.remaining_after(2), Limit::Finite(1));
        assert_eq!(limit.remaining_after(7), Limit::Finite(0));
        assert!(Limit::Unlimited.permits(u32::MAX));
        assert_eq!(Limit::Unlimited.remaining_after(10), Limit::Unlimited);
    }

    #[test]
    fn test_limit_serde() {
        assert_eq!(serde_json::to_string(&Limit::Finite(25)).unwrap(), "25");
        assert_eq!(
            serde_json::to_string(&Limit::Unlimited).unwrap(),
            "\"unlimited\""
        );
        assert_eq!(
            serde_json::from_str::<Limit>("25").unwrap(),
            Limit::Finite(25)
        );
        assert_eq!(
            serde_json::from_str::<Limit>("\"unlimited\"").unwrap(),
            Limit::Unlimited
        );
        assert!(serde_json::from_str::<Limit>("\"infinite\"").is_err());
        assert!(serde_json::from_str::<Limit>("-3").is_err());
    }

    #[test]
    fn test_feature_string_forms() {
        assert_eq!(Feature::AiRecommendations.to_string(), "ai_recommendations");
        assert_eq!(
            "essay_assistance".parse::<Feature>().unwrap(),
            Feature::EssayAssistance
        );
        assert!("dark_mode".parse::<Feature>().is_err());
    }
}
