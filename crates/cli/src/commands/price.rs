use std::fs;
use std::path::PathBuf;

use pulse_core::config::AppConfig;
use pulse_core::domain::pricing::{BatchOptimization, PricingRule};
use pulse_core::{AnalyticsEngine, PricingContext, ProductPricing};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::commands::{load_options, CommandResult};

#[derive(Debug, Deserialize)]
struct PriceObservation {
    product_id: String,
    price: Decimal,
    demand: f64,
}

#[derive(Debug, Deserialize)]
struct PriceRequest {
    products: Vec<ProductPricing>,
    #[serde(default)]
    context: PricingContext,
    #[serde(default)]
    observations: Vec<PriceObservation>,
}

#[derive(Debug, Serialize)]
struct PriceReport {
    batch: BatchOptimization,
    rules_in_order: Vec<&'static str>,
}

pub fn run(input: PathBuf, config_path: Option<PathBuf>) -> CommandResult {
    let config = match AppConfig::load(load_options(config_path)) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "price",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let request = match fs::read_to_string(&input)
        .map_err(|error| format!("could not read `{}`: {error}", input.display()))
        .and_then(|raw| {
            serde_json::from_str::<PriceRequest>(&raw)
                .map_err(|error| format!("invalid pricing request: {error}"))
        }) {
        Ok(request) => request,
        Err(message) => return CommandResult::failure("price", "input_read", message, 4),
    };
    if request.products.is_empty() {
        return CommandResult::failure("price", "input_read", "no products to optimize", 4);
    }

    let engine = match AnalyticsEngine::builder().config(config).synchronous().build() {
        Ok(engine) => engine,
        Err(error) => return CommandResult::failure("price", "engine_init", error.to_string(), 3),
    };
    for observation in &request.observations {
        engine.record_price_observation(
            &observation.product_id,
            observation.price,
            observation.demand,
        );
    }

    match engine.optimize_batch(&request.products, &request.context) {
        Ok(batch) => {
            let rules_in_order = PricingRule::CHAIN.iter().map(|rule| rule.id()).collect();
            CommandResult::report("price", &PriceReport { batch, rules_in_order })
        }
        Err(error) => CommandResult::failure("price", error.code(), error.to_string(), 5),
    }
}
