use chrono::{DateTime, Datelike, Duration, Utc};

use crate::domain::pattern::{
    InsightPriority, Pattern, PatternData, PatternInsight, PatternKind, Predictions,
};

const REMINDER_LEAD_DAYS: i64 = 2;
const IMMINENT_PURCHASE_DAYS: i64 = 3;

/// Forward-looking estimates for the customer. `now` is the analysis reference time (the
/// triggering event's timestamp), not the wall clock.
pub fn predict(patterns: &[Pattern], now: DateTime<Utc>) -> Predictions {
    let mut predictions = Predictions::default();
    let mut best_frequency = f64::MIN;

    for pattern in patterns {
        match (&pattern.data, pattern.kind) {
            (PatternData::Frequency { next_predicted_purchase, .. }, _) => {
                if pattern.confidence > best_frequency {
                    best_frequency = pattern.confidence;
                    predictions.next_purchase_date = Some(*next_predicted_purchase);
                    predictions.confidence = pattern.confidence;
                }
            }
            (PatternData::Volume { average_quantity, .. }, PatternKind::VolumeBulk) => {
                predictions.next_purchase_quantity = Some(*average_quantity);
                predictions.monthly_consumption = Some(average_quantity / 4.0);
            }
            (PatternData::Volume { average_quantity, .. }, _) => {
                predictions.next_purchase_quantity = Some(*average_quantity);
                predictions.monthly_consumption = Some(average_quantity * 8.0);
            }
            (PatternData::Seasonal { peak_months, seasonal_increase_pct, .. }, _) => {
                if peak_months.contains(&now.month()) {
                    predictions.seasonal_adjustment_pct = Some(*seasonal_increase_pct);
                }
            }
            (PatternData::Temporal { .. }, _) => {}
        }
    }

    if let Some(next) = predictions.next_purchase_date {
        let reminder = next - Duration::days(REMINDER_LEAD_DAYS);
        if reminder > now {
            predictions.replenishment_reminder = Some(reminder);
        }
    }

    predictions
}

pub fn insights(
    patterns: &[Pattern],
    predictions: &Predictions,
    now: DateTime<Utc>,
) -> Vec<PatternInsight> {
    let mut insights: Vec<_> = patterns.iter().map(pattern_insight).collect();

    if let Some(next) = predictions.next_purchase_date {
        let seconds = (next - now).num_seconds();
        let days_until = (seconds as f64 / 86_400.0).ceil() as i64;
        if days_until <= IMMINENT_PURCHASE_DAYS {
            insights.push(PatternInsight {
                family: None,
                message: format!("Customer likely to purchase in {days_until} days"),
                action: "Send personalized product reminder".to_string(),
                priority: InsightPriority::High,
            });
        }
    }

    insights
}

fn pattern_insight(pattern: &Pattern) -> PatternInsight {
    let (message, action, priority) = match (&pattern.data, pattern.kind) {
        (PatternData::Frequency { .. }, kind) => (
            format!("Customer has a consistent {} purchase pattern", cadence(kind)),
            "Set up automatic reorder reminder",
            InsightPriority::Medium,
        ),
        (PatternData::Volume { average_quantity, .. }, PatternKind::VolumeBulk) => (
            format!("Customer prefers bulk purchases - average {average_quantity:.1} items"),
            "Offer bulk discounts or family-size products",
            InsightPriority::High,
        ),
        (PatternData::Volume { average_quantity, .. }, _) => (
            format!("Customer buys small quantities often - average {average_quantity:.1} items"),
            "Suggest a subscription or multipack",
            InsightPriority::Medium,
        ),
        (PatternData::Seasonal { seasonal_increase_pct, .. }, kind) => {
            let season = if kind == PatternKind::SeasonalWinter { "winter" } else { "summer" };
            (
                format!("{seasonal_increase_pct:.1}% increase in {season} consumption"),
                if season == "winter" {
                    "Increase inventory and marketing for winter months"
                } else {
                    "Increase inventory and marketing for summer months"
                },
                InsightPriority::High,
            )
        }
        (PatternData::Temporal { share_pct }, PatternKind::TemporalWeekend) => (
            format!("Customer primarily shops on weekends ({share_pct:.1}%)"),
            "Send promotions and reminders on Friday/Saturday",
            InsightPriority::Medium,
        ),
        (PatternData::Temporal { share_pct }, _) => (
            format!("Customer mostly buys in the evening ({share_pct:.1}%)"),
            "Schedule promotions between 17:00 and 21:00",
            InsightPriority::Medium,
        ),
    };

    PatternInsight {
        family: Some(pattern.kind.family()),
        message,
        action: action.to_string(),
        priority,
    }
}

fn cadence(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::FrequencyWeekly => "weekly",
        PatternKind::FrequencyBiweekly => "biweekly",
        PatternKind::FrequencyMonthly => "monthly",
        PatternKind::FrequencyQuarterly => "quarterly",
        _ => "recurring",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{insights, predict};
    use crate::domain::pattern::{InsightPriority, PatternFamily};
    use crate::patterns::fixtures::{base, spaced};
    use crate::patterns::{detect, PurchaseHistory};

    #[test]
    fn monthly_pattern_predicts_next_purchase_and_reminder() {
        let history = PurchaseHistory::for_product(&spaced("coffee", 4, 30, 1), "coffee");
        let patterns = detect(&history);
        let now = base() + Duration::days(90);

        let predictions = predict(&patterns, now);

        assert_eq!(predictions.next_purchase_date, Some(base() + Duration::days(120)));
        assert_eq!(predictions.replenishment_reminder, Some(base() + Duration::days(118)));
        assert!((predictions.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn bulk_pattern_predicts_quantity_and_monthly_consumption() {
        let history = PurchaseHistory::for_product(&spaced("rice", 3, 45, 20), "rice");
        let predictions = predict(&detect(&history), base());
        assert_eq!(predictions.next_purchase_quantity, Some(20.0));
        assert_eq!(predictions.monthly_consumption, Some(5.0));
        assert_eq!(predictions.next_purchase_date, None);
    }

    #[test]
    fn imminent_purchase_adds_high_priority_insight() {
        let history = PurchaseHistory::for_product(&spaced("coffee", 4, 30, 1), "coffee");
        let patterns = detect(&history);
        let now = base() + Duration::days(118);
        let predictions = predict(&patterns, now);

        let insights = insights(&patterns, &predictions, now);

        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].priority, InsightPriority::Medium);
        assert!(insights[0].message.contains("monthly"));
        assert_eq!(insights[1].message, "Customer likely to purchase in 2 days");
        assert_eq!(insights[0].family, Some(PatternFamily::Frequency));
        assert_eq!(insights[1].family, None);
    }

    #[test]
    fn reminder_is_omitted_once_past() {
        let history = PurchaseHistory::for_product(&spaced("coffee", 4, 30, 1), "coffee");
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let predictions = predict(&detect(&history), now);
        assert!(predictions.next_purchase_date.is_some());
        assert_eq!(predictions.replenishment_reminder, None);
    }
}
