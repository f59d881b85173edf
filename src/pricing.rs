// 💰 Financing Plans - one pricing table for every screen
// Offers shown on the financing step and totals on the review step both call plan_price()

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// PLAN IDENTIFIERS
// ============================================================================

/// The seven financing variants a parent can choose from.
///
/// Serialized as the kebab-case id used on the wire and in storage
/// (`"pay-monthly"`, `"sibling-benefit"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanId {
    PayMonthly,
    PayTerm,
    PayOnce,
    BuyNowPayLater,
    ForwardFunding,
    SiblingBenefit,
    PayViaEft,
}

impl PlanId {
    /// All plans in display order
    pub const ALL: [PlanId; 7] = [
        PlanId::PayMonthly,
        PlanId::PayTerm,
        PlanId::PayOnce,
        PlanId::BuyNowPayLater,
        PlanId::ForwardFunding,
        PlanId::SiblingBenefit,
        PlanId::PayViaEft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::PayMonthly => "pay-monthly",
            PlanId::PayTerm => "pay-term",
            PlanId::PayOnce => "pay-once",
            PlanId::BuyNowPayLater => "buy-now-pay-later",
            PlanId::ForwardFunding => "forward-funding",
            PlanId::SiblingBenefit => "sibling-benefit",
            PlanId::PayViaEft => "pay-via-eft",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PlanId::PayMonthly => "Monthly Debit Order",
            PlanId::PayTerm => "Pay Per Term",
            PlanId::PayOnce => "Pay Once Per Year",
            PlanId::BuyNowPayLater => "Buy Now, Pay Later",
            PlanId::ForwardFunding => "Forward Funding",
            PlanId::SiblingBenefit => "Sibling Benefit",
            PlanId::PayViaEft => "Pay via EFT",
        }
    }

    pub fn period(&self) -> Period {
        match self {
            PlanId::PayMonthly | PlanId::BuyNowPayLater | PlanId::ForwardFunding => {
                Period::PerMonth
            }
            PlanId::PayTerm => Period::PerTerm,
            PlanId::PayOnce | PlanId::PayViaEft => Period::PerYear,
            PlanId::SiblingBenefit => Period::PerChildPerMonth,
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PlanId::ALL
            .iter()
            .copied()
            .find(|plan| plan.as_str() == wanted)
            .ok_or_else(|| PricingError::UnknownPlan(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    PerMonth,
    PerTerm,
    PerYear,
    PerChildPerMonth,
}

impl Period {
    pub fn label(&self) -> &'static str {
        match self {
            Period::PerMonth => "per month",
            Period::PerTerm => "per term",
            Period::PerYear => "per year",
            Period::PerChildPerMonth => "per child/month",
        }
    }

    /// How many times the period price is paid in one academic year
    pub fn installments_per_year(&self) -> u32 {
        match self {
            Period::PerMonth | Period::PerChildPerMonth => 12,
            Period::PerTerm => 3,
            Period::PerYear => 1,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("unknown financing plan: {0}")]
    UnknownPlan(String),

    #[error("annual fee must be a positive amount, got {0}")]
    InvalidAnnualFee(f64),
}

// ============================================================================
// PRICING
// ============================================================================

/// Price of one period of `plan` for a learner with `annual_fee`.
///
/// `student_count` only matters for the sibling benefit; zero is treated as one.
/// Non-finite or negative fees price at zero.
pub fn plan_price(plan: PlanId, annual_fee: f64, student_count: u32) -> f64 {
    let fee = if annual_fee.is_finite() && annual_fee > 0.0 {
        annual_fee
    } else {
        0.0
    };
    let children = f64::from(student_count.max(1));

    match plan {
        PlanId::PayMonthly => (fee / 12.0).round(),
        PlanId::PayTerm => (fee * 0.97 / 3.0).round(),
        PlanId::PayOnce => (fee * 0.95).round(),
        PlanId::BuyNowPayLater => (fee * 1.12 / 12.0).round(),
        PlanId::ForwardFunding => (fee * 1.15 / 12.0).round(),
        PlanId::SiblingBenefit => (fee * 0.9 / 12.0 / children).round(),
        PlanId::PayViaEft => fee,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeKind {
    Save,
    Cost,
    Best,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub kind: BadgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureIcon {
    Check,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeature {
    pub text: String,
    pub icon: FeatureIcon,
}

/// A priced plan as presented on the financing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOffer {
    pub id: PlanId,
    pub title: String,
    pub subtitle: String,
    pub price: f64,
    pub period: String,
    pub installments_per_year: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<Badge>,
    pub features: Vec<PlanFeature>,
    pub recommended: bool,
}

fn check(text: impl Into<String>) -> PlanFeature {
    PlanFeature {
        text: text.into(),
        icon: FeatureIcon::Check,
    }
}

fn info(text: impl Into<String>) -> PlanFeature {
    PlanFeature {
        text: text.into(),
        icon: FeatureIcon::Info,
    }
}

fn badge(text: &str, kind: BadgeKind) -> Option<Badge> {
    Some(Badge {
        text: text.to_string(),
        kind,
    })
}

/// Build the offer card for one plan
pub fn plan_offer(plan: PlanId, annual_fee: f64, student_count: u32) -> PlanOffer {
    let price = plan_price(plan, annual_fee, student_count);
    let children = student_count.max(1);

    let (subtitle, badge, features) = match plan {
        PlanId::PayMonthly => (
            "Zero discount",
            None,
            vec![
                check("Standard debit order"),
                check("No upfront payment required"),
                check("Predictable monthly budget"),
            ],
        ),
        PlanId::PayTerm => (
            "Save 3%",
            badge("Save 3%", BadgeKind::Save),
            vec![
                check("Pay 3 times per year"),
                check("3% discount on total fees"),
                check("Aligned with school terms"),
            ],
        ),
        PlanId::PayOnce => {
            let saving = (annual_fee.max(0.0) - price).max(0.0);
            (
                "Save 5%",
                badge("Save 5%", BadgeKind::Save),
                vec![
                    check("Maximum discount available"),
                    check("One payment, no worries"),
                    check(format!("Save R {} annually", format_rand(saving))),
                ],
            )
        }
        PlanId::BuyNowPayLater => (
            "Flexible option",
            badge("12% Cost", BadgeKind::Cost),
            vec![
                check("Pay school fees immediately"),
                check("Flexible repayment terms"),
                info("12% cost of credit applies"),
            ],
        ),
        PlanId::ForwardFunding => (
            "6-12 months",
            badge("15% Cost", BadgeKind::Cost),
            vec![
                check("Cover funding gap"),
                check("Quick approval process"),
                info("15% cost of credit applies"),
            ],
        ),
        PlanId::SiblingBenefit => (
            "Multiple children",
            badge("Save 10%", BadgeKind::Save),
            vec![
                check("10% discount per additional child"),
                check("Combined family billing"),
                info(format!("{} children selected", children)),
            ],
        ),
        PlanId::PayViaEft => (
            "Direct transfer",
            badge("No fees", BadgeKind::Best),
            vec![
                check("Pay directly from your bank"),
                check("Use your student number as reference"),
                info("Full annual fee, no discount"),
            ],
        ),
    };

    PlanOffer {
        id: plan,
        title: plan.title().to_string(),
        subtitle: subtitle.to_string(),
        price,
        period: plan.period().label().to_string(),
        installments_per_year: plan.period().installments_per_year(),
        badge,
        features,
        recommended: plan == PlanId::PayOnce,
    }
}

/// All seven offers, in display order
pub fn financing_plans(annual_fee: f64, student_count: u32) -> Vec<PlanOffer> {
    PlanId::ALL
        .iter()
        .map(|plan| plan_offer(*plan, annual_fee, student_count))
        .collect()
}

/// Same as [`financing_plans`] but rejects fees that are not positive
pub fn checked_financing_plans(
    annual_fee: f64,
    student_count: u32,
) -> Result<Vec<PlanOffer>, PricingError> {
    if !annual_fee.is_finite() || annual_fee <= 0.0 {
        return Err(PricingError::InvalidAnnualFee(annual_fee));
    }
    Ok(financing_plans(annual_fee, student_count))
}

/// Rand amount with thousands separators, no decimals ("96,000")
pub fn format_rand(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    if rounded < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prices_for_two_children() {
        let fee = 96000.0;
        assert_eq!(plan_price(PlanId::PayMonthly, fee, 2), 8000.0);
        assert_eq!(plan_price(PlanId::PayTerm, fee, 2), 31040.0);
        assert_eq!(plan_price(PlanId::PayOnce, fee, 2), 91200.0);
        assert_eq!(plan_price(PlanId::BuyNowPayLater, fee, 2), 8960.0);
        assert_eq!(plan_price(PlanId::ForwardFunding, fee, 2), 9200.0);
        assert_eq!(plan_price(PlanId::SiblingBenefit, fee, 2), 3600.0);
        assert_eq!(plan_price(PlanId::PayViaEft, fee, 2), 96000.0);
    }

    #[test]
    fn test_offers_follow_display_order() {
        let offers = financing_plans(96000.0, 2);
        let ids: Vec<PlanId> = offers.iter().map(|o| o.id).collect();
        assert_eq!(ids, PlanId::ALL.to_vec());
        assert!(offers.iter().filter(|o| o.recommended).count() == 1);
        assert_eq!(offers[2].id, PlanId::PayOnce);
        assert!(offers[2].recommended);
    }

    #[test]
    fn test_offer_prices_match_plan_price() {
        for fee in [14400.0, 20400.0, 26400.0, 30000.0, 32400.0, 85000.0] {
            for count in 1..=4 {
                for offer in financing_plans(fee, count) {
                    assert_eq!(offer.price, plan_price(offer.id, fee, count));
                    assert!(offer.price >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_rounding_is_half_up() {
        // 18 / 12 = 1.5 -> 2
        assert_eq!(plan_price(PlanId::PayMonthly, 18.0, 1), 2.0);
        // 85000 / 12 = 7083.33 -> 7083
        assert_eq!(plan_price(PlanId::PayMonthly, 85000.0, 1), 7083.0);
    }

    #[test]
    fn test_eft_is_not_rounded() {
        assert_eq!(plan_price(PlanId::PayViaEft, 12345.67, 1), 12345.67);
    }

    #[test]
    fn test_zero_children_treated_as_one() {
        assert_eq!(
            plan_price(PlanId::SiblingBenefit, 96000.0, 0),
            plan_price(PlanId::SiblingBenefit, 96000.0, 1)
        );
    }

    #[test]
    fn test_bad_fees_never_go_negative() {
        for plan in PlanId::ALL {
            assert_eq!(plan_price(plan, -500.0, 1), 0.0);
            assert_eq!(plan_price(plan, f64::NAN, 1), 0.0);
        }
        assert_eq!(
            checked_financing_plans(0.0, 1),
            Err(PricingError::InvalidAnnualFee(0.0))
        );
        assert!(checked_financing_plans(1000.0, 1).is_ok());
    }

    #[test]
    fn test_plan_id_parse_and_serde() {
        assert_eq!("pay-once".parse::<PlanId>().unwrap(), PlanId::PayOnce);
        assert_eq!(" Sibling-Benefit ".parse::<PlanId>().unwrap(), PlanId::SiblingBenefit);
        assert!("pay-twice".parse::<PlanId>().is_err());

        let json = serde_json::to_string(&PlanId::BuyNowPayLater).unwrap();
        assert_eq!(json, "\"buy-now-pay-later\"");
        let back: PlanId = serde_json::from_str("\"pay-via-eft\"").unwrap();
        assert_eq!(back, PlanId::PayViaEft);
    }

    #[test]
    fn test_pay_once_saving_text() {
        let offer = plan_offer(PlanId::PayOnce, 85000.0, 1);
        assert_eq!(offer.price, 80750.0);
        assert!(offer
            .features
            .iter()
            .any(|f| f.text == "Save R 4,250 annually"));
    }

    #[test]
    fn test_format_rand() {
        assert_eq!(format_rand(0.0), "0");
        assert_eq!(format_rand(999.0), "999");
        assert_eq!(format_rand(4250.0), "4,250");
        assert_eq!(format_rand(1234567.4), "1,234,567");
        assert_eq!(format_rand(-96000.0), "-96,000");
    }
}
