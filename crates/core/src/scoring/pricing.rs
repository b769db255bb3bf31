//! Dynamic pricing: three candidate-price models blended by weight, then a fixed rule chain
//! that protects margin and bounds and applies clearance, promotion and peak adjustments.
//!
//! Money stays in `Decimal` end to end; model multipliers are converted once at the edge.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{json, Map};

use crate::domain::pricing::{
    AppliedRule, BatchOptimization, BatchSummary, ExpectedImpact, MarketLevel, PriceEstimate,
    PriceModel, PricingContext, PricingOptimization, PricingRule, PricingStatistics,
    ProductPricing, Season, Urgency,
};
use crate::domain::score::EnsembleKind;
use crate::errors::ComputationError;
use crate::scoring::{validate_weights, SubModel};

pub const DEFAULT_ELASTICITY: f64 = -1.2;
pub const DEFAULT_SALES_VOLUME: u32 = 100;
/// Price observations kept per product for elasticity estimates.
const OBSERVATION_CAP: usize = 10;

fn default_min_margin() -> Decimal {
    Decimal::new(15, 2)
}

fn default_promotional_discount() -> Decimal {
    Decimal::new(90, 2)
}

impl SubModel for PriceModel {
    const ENSEMBLE: EnsembleKind = EnsembleKind::Pricing;
    const ALL: &'static [Self] = &[Self::DemandBased, Self::CompetitionBased, Self::ValueBased];

    fn id(self) -> &'static str {
        self.as_str()
    }

    fn weight(self) -> f64 {
        match self {
            Self::DemandBased => 0.4,
            Self::CompetitionBased => 0.3,
            Self::ValueBased => 0.3,
        }
    }
}

fn to_decimal(model: &'static str, value: f64) -> Result<Decimal, ComputationError> {
    if !value.is_finite() {
        return Err(ComputationError::NonFinite { model });
    }
    Decimal::from_f64(value).ok_or(ComputationError::NonFinite { model })
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// `Decimal` multiplication that reports overflow instead of panicking.
fn mul(model: &'static str, lhs: Decimal, rhs: Decimal) -> Result<Decimal, ComputationError> {
    lhs.checked_mul(rhs).ok_or(ComputationError::NonFinite { model })
}

fn demand_multiplier(level: MarketLevel) -> f64 {
    match level {
        MarketLevel::VeryHigh => 1.25,
        MarketLevel::High => 1.15,
        MarketLevel::Normal => 1.0,
        MarketLevel::Low => 0.9,
        MarketLevel::VeryLow => 0.8,
    }
}

fn season_multiplier(season: Option<Season>) -> f64 {
    match season {
        Some(Season::Spring) | None => 1.0,
        Some(Season::Summer) => 1.05,
        Some(Season::Fall) => 0.98,
        Some(Season::Winter) => 1.02,
    }
}

/// One model's candidate price.
pub fn estimate(
    model: PriceModel,
    product: &ProductPricing,
    context: &PricingContext,
) -> Result<PriceEstimate, ComputationError> {
    let id = model.id();
    let base = product.base_price;
    let mut factors = Map::new();

    let (price, confidence) = match model {
        PriceModel::DemandBased => {
            let demand = demand_multiplier(context.demand_level);
            let season = season_multiplier(context.season);
            let trend = (1.0 + context.trend_velocity / 100.0).clamp(0.85, 1.15);
            let elasticity = product.elasticity.unwrap_or(DEFAULT_ELASTICITY);
            factors.insert("demand_multiplier".into(), json!(demand));
            factors.insert("seasonal_multiplier".into(), json!(season));
            factors.insert("trend_multiplier".into(), json!(trend));
            factors.insert("elasticity".into(), json!(elasticity));
            let confidence = if elasticity.abs() > 0.5 { 0.85 } else { 0.65 };
            (mul(id, base, to_decimal(id, demand * season * trend)?)?, confidence)
        }
        PriceModel::CompetitionBased => {
            let average = context.competitor_average.filter(|avg| *avg > Decimal::ZERO);
            let average = average.unwrap_or(base);
            let ratio = to_f64(product.reference_price()) / to_f64(average).max(f64::EPSILON);
            let (position, markup) = if ratio > 1.1 {
                ("premium", 1.15)
            } else if ratio < 0.9 {
                ("value", 0.95)
            } else {
                ("competitive", 1.02)
            };
            let adjustment = markup * context.brand_strength * context.differentiation;
            factors.insert("market_position".into(), json!(position));
            factors.insert("competitor_average".into(), json!(average));
            factors.insert("brand_strength".into(), json!(context.brand_strength));
            let confidence = if context.competitor_data_quality > 0.7 { 0.8 } else { 0.6 };
            (mul(id, average, to_decimal(id, adjustment)?)?, confidence)
        }
        PriceModel::ValueBased => {
            let sensitivity = 1.0 - context.price_sensitivity * 0.3;
            let multiplier = context.value_multiplier * context.frequency_multiplier * sensitivity;
            factors.insert("value_multiplier".into(), json!(context.value_multiplier));
            factors.insert("frequency_multiplier".into(), json!(context.frequency_multiplier));
            factors.insert("price_sensitivity".into(), json!(context.price_sensitivity));
            (mul(id, base, to_decimal(id, multiplier)?)?, 0.75)
        }
    };

    Ok(PriceEstimate {
        model,
        price: price.round_dp(2),
        confidence,
        weight: model.weight(),
        factors,
    })
}

fn floor_price(product: &ProductPricing) -> Result<Decimal, ComputationError> {
    let margin = product.min_margin.unwrap_or_else(default_min_margin);
    let markup = Decimal::ONE
        .checked_add(margin)
        .ok_or(ComputationError::NonFinite { model: "minimum-margin" })?;
    mul("minimum-margin", product.cost, markup)
}

/// The adjusted price when `rule`'s acceptance check fails, `None` when the price passes.
fn check(
    rule: PricingRule,
    price: Decimal,
    product: &ProductPricing,
    context: &PricingContext,
) -> Result<Option<Decimal>, ComputationError> {
    let adjusted = match rule {
        PricingRule::MinimumMargin => {
            let floor = floor_price(product)?;
            (price < floor).then_some(floor)
        }
        PricingRule::PriceBounds => {
            let mut bounded = price;
            if let Some(min) = product.min_price {
                bounded = bounded.max(min);
            }
            if let Some(max) = product.max_price {
                bounded = bounded.min(max);
            }
            (bounded != price).then_some(bounded)
        }
        PricingRule::InventoryClearance => {
            let expiring = product.days_to_expiry.is_some_and(|days| days <= 7);
            let slow = product.inventory_turnover.is_some_and(|turnover| turnover < 0.2);
            if !(expiring || slow) {
                return Ok(None);
            }
            let urgent = product.days_to_expiry.is_some_and(|days| days <= 3);
            let multiplier = if urgent { Decimal::new(70, 2) } else { Decimal::new(85, 2) };
            Some(mul(rule.id(), price, multiplier)?.round_dp(2))
        }
        PricingRule::Promotional => {
            if !(product.is_promotional || context.promotional_period) {
                return Ok(None);
            }
            let discount =
                context.promotional_discount.unwrap_or_else(default_promotional_discount);
            Some(mul(rule.id(), price, discount)?.round_dp(2))
        }
        PricingRule::PeakDemand => {
            let peak = matches!(context.demand_level, MarketLevel::High | MarketLevel::VeryHigh)
                && matches!(context.stock_level, MarketLevel::Low | MarketLevel::VeryLow);
            if !peak {
                return Ok(None);
            }
            Some(mul(rule.id(), price, Decimal::new(115, 2))?.round_dp(2))
        }
    };
    Ok(adjusted)
}

fn run_rule(
    rule: PricingRule,
    price: &mut Decimal,
    applied: &mut Vec<AppliedRule>,
    product: &ProductPricing,
    context: &PricingContext,
) -> Result<(), ComputationError> {
    if let Some(adjusted) = check(rule, *price, product, context)? {
        if adjusted != *price {
            let impact = adjusted
                .checked_sub(*price)
                .ok_or(ComputationError::NonFinite { model: rule.id() })?;
            applied.push(AppliedRule {
                rule_id: rule.id().to_string(),
                rule_name: rule.name().to_string(),
                priority: rule.priority(),
                original_price: *price,
                adjusted_price: adjusted,
                impact,
            });
            *price = adjusted;
        }
    }
    Ok(())
}

/// Runs the chain in priority order. Critical rules are checked once more at the end so a
/// later discount can never leave the price under the margin floor or outside its bounds.
pub fn apply_rules(
    price: Decimal,
    product: &ProductPricing,
    context: &PricingContext,
) -> Result<(Decimal, Vec<AppliedRule>), ComputationError> {
    let mut chain = PricingRule::CHAIN.to_vec();
    chain.sort_by(|a, b| b.priority().cmp(&a.priority()));

    let mut price = price;
    let mut applied = Vec::new();
    for rule in &chain {
        run_rule(*rule, &mut price, &mut applied, product, context)?;
    }
    for rule in [PricingRule::MinimumMargin, PricingRule::PriceBounds] {
        run_rule(rule, &mut price, &mut applied, product, context)?;
    }
    Ok((price, applied))
}

pub fn expected_impact(
    product: &ProductPricing,
    optimized: Decimal,
) -> Result<ExpectedImpact, ComputationError> {
    const MODEL: &str = "expected-impact";
    let overflow = || ComputationError::NonFinite { model: MODEL };

    let original = product.reference_price();
    let change = optimized.checked_sub(original).ok_or_else(overflow)?;
    let elasticity = product.elasticity.unwrap_or(DEFAULT_ELASTICITY);
    let volume = Decimal::from(product.sales_volume.unwrap_or(DEFAULT_SALES_VOLUME));
    let demand_change =
        change.checked_div(original).map_or(0.0, |ratio| elasticity * to_f64(ratio));
    let demand_shift = Decimal::from_f64(demand_change).unwrap_or(Decimal::ZERO);
    let revenue_change =
        change.checked_add(mul(MODEL, original, demand_shift)?).ok_or_else(overflow)?;

    Ok(ExpectedImpact {
        price_change: change,
        expected_demand_change: demand_change,
        revenue_change: mul(MODEL, revenue_change, volume)?.round_dp(2),
        margin_impact: mul(MODEL, change, volume)?.round_dp(2),
    })
}

pub fn urgency(percentage_change: f64) -> Urgency {
    let magnitude = percentage_change.abs();
    if magnitude > 10.0 {
        Urgency::High
    } else if magnitude > 5.0 {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

#[derive(Clone, Debug)]
pub struct PricingEngine {
    _private: (),
}

impl PricingEngine {
    pub fn new() -> Result<Self, ComputationError> {
        validate_weights::<PriceModel>()?;
        Ok(Self { _private: () })
    }

    pub fn optimize(
        &self,
        product: &ProductPricing,
        context: &PricingContext,
        at: DateTime<Utc>,
    ) -> Result<PricingOptimization, ComputationError> {
        if product.base_price <= Decimal::ZERO || product.reference_price() <= Decimal::ZERO {
            return Err(ComputationError::SubModel {
                model: "pricing",
                reason: format!("product `{}` has a non-positive price", product.product_id),
            });
        }
        if product.cost < Decimal::ZERO {
            return Err(ComputationError::SubModel {
                model: "pricing",
                reason: format!("product `{}` has a negative cost", product.product_id),
            });
        }

        let estimates = PriceModel::ALL
            .iter()
            .map(|model| estimate(*model, product, context))
            .collect::<Result<Vec<_>, _>>()?;

        let mut blended = Decimal::ZERO;
        for estimate in &estimates {
            let model = estimate.model.id();
            let share = mul(model, estimate.price, to_decimal(model, estimate.weight)?)?;
            blended = blended.checked_add(share).ok_or(ComputationError::NonFinite { model })?;
        }
        let blended = blended.round_dp(2);
        let confidence =
            estimates.iter().map(|e| e.confidence).sum::<f64>() / estimates.len().max(1) as f64;

        let (optimized, applied_rules) = apply_rules(blended, product, context)?;
        let original = product.reference_price();
        let price_change = optimized
            .checked_sub(original)
            .ok_or(ComputationError::NonFinite { model: "pricing" })?;
        let percentage_change =
            price_change.checked_div(original).map_or(0.0, |ratio| to_f64(ratio) * 100.0);

        Ok(PricingOptimization {
            product_id: product.product_id.clone(),
            original_price: original,
            optimized_price: optimized,
            price_change,
            percentage_change,
            confidence,
            model_breakdown: estimates,
            applied_rules,
            expected_impact: expected_impact(product, optimized)?,
            urgency: urgency(percentage_change),
            timestamp: at,
        })
    }

    /// Optimizes every product; the first invalid product aborts the batch.
    pub fn optimize_batch(
        &self,
        products: &[ProductPricing],
        context: &PricingContext,
        at: DateTime<Utc>,
    ) -> Result<BatchOptimization, ComputationError> {
        let optimizations = products
            .iter()
            .map(|product| self.optimize(product, context, at))
            .collect::<Result<Vec<_>, _>>()?;
        let summary = summarize(&optimizations);
        Ok(BatchOptimization { optimizations, summary })
    }
}

pub fn summarize(optimizations: &[PricingOptimization]) -> BatchSummary {
    let total = optimizations.len();
    let average = if total == 0 {
        0.0
    } else {
        optimizations.iter().map(|o| o.percentage_change).sum::<f64>() / total as f64
    };
    let moved = |direction: std::cmp::Ordering| {
        optimizations.iter().filter(|o| o.price_change.cmp(&Decimal::ZERO) == direction).count()
    };
    BatchSummary {
        total_products: total,
        average_percentage_change: average,
        expected_revenue_impact: optimizations
            .iter()
            .map(|o| o.expected_impact.revenue_change)
            .sum(),
        products_increased: moved(std::cmp::Ordering::Greater),
        products_decreased: moved(std::cmp::Ordering::Less),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Observation {
    price: Decimal,
    demand: f64,
}

/// Latest decision per product, running totals, and observed price/demand pairs.
#[derive(Debug, Default)]
pub struct PricingBook {
    decisions: HashMap<String, PricingOptimization>,
    observations: HashMap<String, VecDeque<Observation>>,
    total_optimizations: u64,
    revenue_impact: Decimal,
    last_optimized: Option<DateTime<Utc>>,
}

impl PricingBook {
    pub fn record(&mut self, optimization: &PricingOptimization) {
        self.total_optimizations += 1;
        self.revenue_impact += optimization.expected_impact.revenue_change;
        self.last_optimized = Some(optimization.timestamp);
        self.decisions.insert(optimization.product_id.clone(), optimization.clone());
    }

    pub fn decision(&self, product_id: &str) -> Option<&PricingOptimization> {
        self.decisions.get(product_id)
    }

    pub fn observe(&mut self, product_id: &str, price: Decimal, demand: f64) {
        let history = self.observations.entry(product_id.to_string()).or_default();
        history.push_back(Observation { price, demand });
        while history.len() > OBSERVATION_CAP {
            history.pop_front();
        }
    }

    /// Mean arc elasticity over consecutive observations, or `None` without a usable pair.
    pub fn elasticity(&self, product_id: &str) -> Option<f64> {
        let history = self.observations.get(product_id)?;
        if history.len() < 2 {
            return None;
        }
        let mut total = 0.0;
        let mut pairs = 0_u32;
        for (previous, current) in history.iter().zip(history.iter().skip(1)) {
            let Some(price_change) = current
                .price
                .checked_sub(previous.price)
                .and_then(|change| change.checked_div(previous.price))
                .map(to_f64)
            else {
                continue;
            };
            if price_change != 0.0 && previous.demand != 0.0 {
                total += ((current.demand - previous.demand) / previous.demand) / price_change;
                pairs += 1;
            }
        }
        if pairs == 0 {
            return None;
        }
        let estimate = total / f64::from(pairs);
        estimate.is_finite().then_some(estimate)
    }

    pub fn statistics(&self) -> PricingStatistics {
        PricingStatistics {
            total_optimizations: self.total_optimizations,
            revenue_impact: self.revenue_impact,
            last_optimized: self.last_optimized,
            tracked_products: self.observations.len().max(self.decisions.len()),
            pricing_rules: PricingRule::CHAIN.len(),
            optimization_models: PriceModel::ALL.len(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{apply_rules, urgency, PricingBook, PricingEngine};
    use crate::domain::pricing::{
        MarketLevel, PriceModel, PricingContext, PricingRule, ProductPricing, Urgency,
    };
    use crate::errors::ComputationError;
    use crate::scoring::{validate_weights, SubModel};

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn dec(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    #[test]
    fn weights_sum_to_one() {
        assert!(validate_weights::<PriceModel>().is_ok());
        let total: f64 = PriceModel::ALL.iter().map(|m| m.weight()).sum();
        assert!((total - 1.0).abs() <= 1e-9);
    }

    #[test]
    fn blended_price_below_margin_floor_is_raised_to_it() {
        let engine = PricingEngine::new().expect("valid weights");
        let product = ProductPricing::new("sku-1", dec(100, 0), dec(100, 0));
        let context = PricingContext {
            demand_level: MarketLevel::VeryLow,
            competitor_average: Some(dec(80, 0)),
            ..PricingContext::default()
        };

        let optimization = engine.optimize(&product, &context, at()).expect("optimizes");

        assert_eq!(optimization.optimized_price, product.cost * (Decimal::ONE + dec(15, 2)));
        assert_eq!(optimization.optimized_price, dec(11500, 2));
        assert_eq!(optimization.applied_rules[0].rule_id, PricingRule::MinimumMargin.id());
        assert!(optimization.applied_rules[0].original_price < optimization.optimized_price);
    }

    #[test]
    fn clearance_and_promotion_stack_in_priority_order() {
        let mut product = ProductPricing::new("sku-2", dec(20, 0), dec(5, 0));
        product.days_to_expiry = Some(2);
        product.is_promotional = true;
        let (price, applied) =
            apply_rules(dec(20, 0), &product, &PricingContext::default()).expect("rules apply");

        let ids: Vec<_> = applied.iter().map(|rule| rule.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["inventory-clearance", "promotional-pricing"]);
        assert_eq!(price, dec(1260, 2));
    }

    #[test]
    fn discounts_never_break_the_margin_floor() {
        let mut product = ProductPricing::new("sku-3", dec(12, 0), dec(10, 0));
        product.days_to_expiry = Some(1);
        let (price, applied) =
            apply_rules(dec(12, 0), &product, &PricingContext::default()).expect("rules apply");
        assert_eq!(price, dec(1150, 2));
        assert_eq!(applied.last().map(|r| r.rule_id.as_str()), Some("minimum-margin"));
    }

    #[test]
    fn peak_demand_with_low_stock_adds_premium() {
        let product = ProductPricing::new("sku-4", dec(10, 0), dec(1, 0));
        let context = PricingContext {
            demand_level: MarketLevel::VeryHigh,
            stock_level: MarketLevel::Low,
            ..PricingContext::default()
        };
        let (price, applied) = apply_rules(dec(10, 0), &product, &context).expect("rules apply");
        assert_eq!(price, dec(1150, 2));
        assert_eq!(applied[0].rule_id, "peak-demand");
    }

    #[test]
    fn batch_summary_counts_direction_of_change() {
        let engine = PricingEngine::new().expect("valid weights");
        let cheap = ProductPricing::new("cheap", dec(10, 0), dec(9, 0));
        let mut pricey = ProductPricing::new("pricey", dec(10, 0), dec(1, 0));
        pricey.current_price = Some(dec(30, 0));
        let context = PricingContext::default();

        let batch = engine.optimize_batch(&[cheap, pricey], &context, at()).expect("batch");

        assert_eq!(batch.summary.total_products, 2);
        assert_eq!(batch.summary.products_increased, 1);
        assert_eq!(batch.summary.products_decreased, 1);
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let engine = PricingEngine::new().expect("valid weights");
        let product = ProductPricing::new("free", Decimal::ZERO, Decimal::ZERO);
        assert!(engine.optimize(&product, &PricingContext::default(), at()).is_err());
    }

    #[test]
    fn urgency_thresholds() {
        assert_eq!(urgency(-12.0), Urgency::High);
        assert_eq!(urgency(6.0), Urgency::Medium);
        assert_eq!(urgency(5.0), Urgency::Low);
    }

    #[test]
    fn book_tracks_decisions_and_elasticity() {
        let engine = PricingEngine::new().expect("valid weights");
        let mut book = PricingBook::default();
        let product = ProductPricing::new("sku-5", dec(50, 0), dec(20, 0));
        let optimization = engine.optimize(&product, &PricingContext::default(), at()).expect("ok");
        book.record(&optimization);

        book.observe("sku-5", dec(50, 0), 100.0);
        book.observe("sku-5", dec(55, 0), 90.0);

        assert_eq!(book.decision("sku-5"), Some(&optimization));
        assert!((book.elasticity("sku-5").unwrap_or_default() - (-1.0)).abs() < 1e-9);
        let stats = book.statistics();
        assert_eq!(stats.total_optimizations, 1);
        assert_eq!(stats.pricing_rules, 5);
        assert_eq!(stats.optimization_models, 3);
    }

    #[test]
    fn zero_price_observations_are_skipped_in_elasticity() {
        let mut book = PricingBook::default();
        book.observe("sku-6", Decimal::ZERO, 100.0);
        book.observe("sku-6", dec(10, 0), 80.0);
        assert_eq!(book.elasticity("sku-6"), None);

        book.observe("sku-6", dec(11, 0), 72.0);
        assert!((book.elasticity("sku-6").unwrap_or_default() - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn overflowing_prices_are_reported_not_panicked() {
        let engine = PricingEngine::new().expect("valid weights");
        let product = ProductPricing::new("sku-7", Decimal::MAX, Decimal::ZERO);

        let result = engine.optimize(&product, &PricingContext::default(), at());

        assert!(matches!(result, Err(ComputationError::NonFinite { .. })));
    }
}
