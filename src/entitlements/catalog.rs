use super::models::{Plan, PlanTier};

pub const PREMIUM_AMOUNT: i64 = 199;
pub const BASIC_AMOUNT: i64 = 99;

const PREMIUM: Plan = Plan {
    tier: PlanTier::Premium,
    daily_chat_limit: 5,
    monthly_generation_limit: 5,
};

const BASIC: Plan = Plan {
    tier: PlanTier::Basic,
    daily_chat_limit: 3,
    monthly_generation_limit: 3,
};

/// key: plan-catalog -> paid amount to tier and limits
///
/// Creation and reconciliation both go through here so they measure against
/// the same ground truth. Unknown amounts fall back to basic.
pub fn plan_from_amount(amount: i64) -> Plan {
    match amount {
        PREMIUM_AMOUNT => PREMIUM,
        _ => BASIC,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanCatalogEntry {
    pub amount: i64,
    pub plan: Plan,
}

pub fn plan_catalog() -> Vec<PlanCatalogEntry> {
    [BASIC_AMOUNT, PREMIUM_AMOUNT]
        .into_iter()
        .map(|amount| PlanCatalogEntry {
            amount,
            plan: plan_from_amount(amount),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_amount_maps_to_premium_limits() {
        let plan = plan_from_amount(199);
        assert_eq!(plan.tier, PlanTier::Premium);
        assert_eq!(plan.daily_chat_limit, 5);
        assert_eq!(plan.monthly_generation_limit, 5);
    }

    #[test]
    fn basic_and_unknown_amounts_share_basic_plan() {
        assert_eq!(plan_from_amount(99), BASIC);
        assert_eq!(plan_from_amount(0), BASIC);
        assert_eq!(plan_from_amount(200), BASIC);
        assert_eq!(plan_from_amount(-5), BASIC);
    }

    #[test]
    fn catalog_lists_both_tiers() {
        let tiers: Vec<_> = plan_catalog().into_iter().map(|e| e.plan.tier).collect();
        assert_eq!(tiers, vec![PlanTier::Basic, PlanTier::Premium]);
    }
}
