use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductPricing {
    pub product_id: String,
    pub base_price: Decimal,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    pub cost: Decimal,
    #[serde(default)]
    pub min_price: Option<Decimal>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
    /// Markup over cost that must survive every adjustment, as a fraction (default 0.15).
    #[serde(default)]
    pub min_margin: Option<Decimal>,
    #[serde(default)]
    pub days_to_expiry: Option<u32>,
    #[serde(default)]
    pub inventory_turnover: Option<f64>,
    #[serde(default)]
    pub elasticity: Option<f64>,
    #[serde(default)]
    pub sales_volume: Option<u32>,
    #[serde(default)]
    pub is_promotional: bool,
}

impl ProductPricing {
    pub fn new(product_id: impl Into<String>, base_price: Decimal, cost: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            base_price,
            current_price: None,
            cost,
            min_price: None,
            max_price: None,
            min_margin: None,
            days_to_expiry: None,
            inventory_turnover: None,
            elasticity: None,
            sales_volume: None,
            is_promotional: false,
        }
    }

    pub fn reference_price(&self) -> Decimal {
        self.current_price.unwrap_or(self.base_price)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketLevel {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingContext {
    pub demand_level: MarketLevel,
    pub stock_level: MarketLevel,
    pub season: Option<Season>,
    /// Percent per period; clamped into a +-15% multiplier.
    pub trend_velocity: f64,
    pub competitor_average: Option<Decimal>,
    pub competitor_data_quality: f64,
    pub brand_strength: f64,
    pub differentiation: f64,
    pub value_multiplier: f64,
    pub frequency_multiplier: f64,
    pub price_sensitivity: f64,
    pub customer_segment: Option<String>,
    pub promotional_period: bool,
    pub promotional_discount: Option<Decimal>,
}

impl Default for PricingContext {
    fn default() -> Self {
        Self {
            demand_level: MarketLevel::Normal,
            stock_level: MarketLevel::Normal,
            season: None,
            trend_velocity: 0.0,
            competitor_average: None,
            competitor_data_quality: 0.8,
            brand_strength: 1.0,
            differentiation: 1.0,
            value_multiplier: 1.0,
            frequency_multiplier: 1.0,
            price_sensitivity: 0.3,
            customer_segment: None,
            promotional_period: false,
            promotional_discount: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceModel {
    DemandBased,
    CompetitionBased,
    ValueBased,
}

impl PriceModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DemandBased => "demand_based",
            Self::CompetitionBased => "competition_based",
            Self::ValueBased => "value_based",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePriority {
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PricingRule {
    MinimumMargin,
    PriceBounds,
    InventoryClearance,
    Promotional,
    PeakDemand,
}

impl PricingRule {
    /// Evaluation order: critical rules first, declaration order within a priority.
    pub const CHAIN: [PricingRule; 5] = [
        Self::MinimumMargin,
        Self::PriceBounds,
        Self::InventoryClearance,
        Self::Promotional,
        Self::PeakDemand,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::MinimumMargin => "minimum-margin",
            Self::PriceBounds => "price-bounds",
            Self::InventoryClearance => "inventory-clearance",
            Self::Promotional => "promotional-pricing",
            Self::PeakDemand => "peak-demand",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MinimumMargin => "Minimum Margin Protection",
            Self::PriceBounds => "Price Boundary Enforcement",
            Self::InventoryClearance => "Inventory Clearance Optimization",
            Self::Promotional => "Smart Promotional Pricing",
            Self::PeakDemand => "Peak Demand Premium",
        }
    }

    pub fn priority(self) -> RulePriority {
        match self {
            Self::MinimumMargin | Self::PriceBounds => RulePriority::Critical,
            Self::InventoryClearance => RulePriority::High,
            Self::Promotional | Self::PeakDemand => RulePriority::Medium,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceEstimate {
    pub model: PriceModel,
    pub price: Decimal,
    pub confidence: f64,
    pub weight: f64,
    pub factors: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub rule_id: String,
    pub rule_name: String,
    pub priority: RulePriority,
    pub original_price: Decimal,
    pub adjusted_price: Decimal,
    pub impact: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpectedImpact {
    pub price_change: Decimal,
    pub expected_demand_change: f64,
    pub revenue_change: Decimal,
    pub margin_impact: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingOptimization {
    pub product_id: String,
    pub original_price: Decimal,
    pub optimized_price: Decimal,
    pub price_change: Decimal,
    pub percentage_change: f64,
    pub confidence: f64,
    pub model_breakdown: Vec<PriceEstimate>,
    pub applied_rules: Vec<AppliedRule>,
    pub expected_impact: ExpectedImpact,
    pub urgency: Urgency,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_products: usize,
    pub average_percentage_change: f64,
    pub expected_revenue_impact: Decimal,
    pub products_increased: usize,
    pub products_decreased: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchOptimization {
    pub optimizations: Vec<PricingOptimization>,
    pub summary: BatchSummary,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingStatistics {
    pub total_optimizations: u64,
    pub revenue_impact: Decimal,
    pub last_optimized: Option<DateTime<Utc>>,
    pub tracked_products: usize,
    pub pricing_rules: usize,
    pub optimization_models: usize,
}
