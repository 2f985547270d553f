//! Synthetic column values for every table.
//!
//! Marker and foreign key columns are set by the generator, the factories fill the rest.

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::types::{Field, Value};

const TIERS: &[&str] = &["BRONZE", "SILVER", "GOLD", "PLATINUM"];
const CATEGORIES: &[&str] = &[
    "Electronics",
    "Clothing",
    "Home",
    "Sports",
    "Books",
    "Toys",
    "Food",
];
const ORDER_STATUSES: &[&str] = &["PENDING", "PROCESSING", "SHIPPED", "DELIVERED"];
const MOVEMENT_TYPES: &[&str] = &["IN", "OUT", "ADJUSTMENT", "RETURN"];

pub(crate) fn customer(marker: &str, rng: &mut StdRng) -> Vec<Field> {
    vec![
        Field::new("first_name", format!("Bench_{}", word(rng, 4))),
        Field::new("last_name", format!("User_{}", tail(marker))),
        Field::new("phone", format!("555-{}", rng.random_range(1000..=9999))),
        Field::new("registration_date", Utc::now().date_naive()),
        Field::new("customer_tier", pick(rng, TIERS)),
        Field::new("total_orders", rng.random_range(0..=50_i64)),
        Field::new("total_spent", money(rng, 5000.0)),
    ]
}

pub(crate) fn product(_marker: &str, rng: &mut StdRng) -> Vec<Field> {
    vec![
        Field::new("product_name", format!("Benchmark Product {}", word(rng, 6))),
        Field::new("category", pick(rng, CATEGORIES)),
        Field::new("price", money(rng, 500.0)),
        Field::new("stock_quantity", rng.random_range(1..=1000_i64)),
        Field::new("is_active", true),
    ]
}

pub(crate) fn order(_marker: &str, rng: &mut StdRng) -> Vec<Field> {
    vec![
        Field::new("order_status", pick(rng, ORDER_STATUSES)),
        Field::new("total_amount", money(rng, 1000.0)),
    ]
}

pub(crate) fn order_item(_marker: &str, rng: &mut StdRng) -> Vec<Field> {
    let quantity = rng.random_range(1..=10_i64);
    let unit_price = cents(rng, 100.0);

    vec![
        Field::new("quantity", quantity),
        Field::new("unit_price", Value::Decimal(unit_price)),
        Field::new(
            "total_price",
            Value::Decimal(round_cents(quantity as f64 * unit_price)),
        ),
    ]
}

pub(crate) fn inventory_movement(_marker: &str, rng: &mut StdRng) -> Vec<Field> {
    vec![
        Field::new("movement_type", pick(rng, MOVEMENT_TYPES)),
        Field::new("quantity", rng.random_range(1..=100_i64)),
        Field::new("reference_id", Value::Null),
    ]
}

fn money(rng: &mut StdRng, max: f64) -> Value {
    Value::Decimal(cents(rng, max))
}

fn cents(rng: &mut StdRng, max: f64) -> f64 {
    round_cents(rng.random_range(1.0..max))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn pick(rng: &mut StdRng, choices: &[&'static str]) -> Value {
    Value::from(choices.choose(rng).copied().unwrap_or_default())
}

fn word(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
        .collect()
}

/// Returns the run-unique part of a marker, short enough for name columns.
fn tail(marker: &str) -> &str {
    let start = marker.len().saturating_sub(24);
    marker.get(start..).unwrap_or(marker)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn order_item_total_is_quantity_times_price() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let fields = order_item("m", &mut rng);
            let quantity = fields[0].value.as_int().unwrap() as f64;
            let (Value::Decimal(unit), Value::Decimal(total)) = (&fields[1].value, &fields[2].value)
            else {
                panic!("prices must be decimals");
            };
            assert!((1.0..=10.0).contains(&quantity));
            assert!((total - round_cents(quantity * unit)).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn categorical_columns_use_known_values() {
        let mut rng = StdRng::seed_from_u64(1);
        let fields = customer("cdcb_x_cu_1", &mut rng);
        let tier = fields
            .iter()
            .find(|field| field.column == "customer_tier")
            .and_then(|field| field.value.as_text())
            .unwrap();
        assert!(TIERS.contains(&tier));
    }
}
