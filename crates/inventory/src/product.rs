use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ProductId, ValueObject};

/// Unit price: non-negative, fixed-point, two decimal places.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub const SCALE: u32 = 2;

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation(format!(
                "price cannot be negative (got {value})"
            )));
        }
        Ok(Self(value.round_dp(Self::SCALE)))
    }

    /// Parse a textual price such as `"19.99"`.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        let value = Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|_| DomainError::validation(format!("invalid price: {raw:?}")))?;
        Self::new(value)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

impl ValueObject for Price {}

impl TryFrom<Decimal> for Price {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(value: Price) -> Self {
        value.0
    }
}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// On-hand quantity. Never negative.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn new(value: i64) -> DomainResult<Self> {
        if value < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        Ok(Self(value))
    }

    /// Parse textual input.
    ///
    /// Accepts plain integers and decimals with no fractional part (`"10"`,
    /// `"10.0"`), which is how spreadsheet exports commonly render counts.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            return Self::new(v);
        }
        let value = Decimal::from_str(raw)
            .map_err(|_| DomainError::validation(format!("invalid quantity: {raw:?}")))?;
        if !value.fract().is_zero() {
            return Err(DomainError::validation(format!(
                "quantity must be a whole number (got {raw})"
            )));
        }
        let whole = i64::try_from(value.trunc())
            .map_err(|_| DomainError::validation(format!("quantity out of range: {raw}")))?;
        Self::new(whole)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl ValueObject for Quantity {}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The descriptive fields a batch import refreshes on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub price: Price,
    pub description: String,
}

/// Input for creating a product that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub details: ProductDetails,
    pub quantity: Quantity,
    pub external_id: Option<String>,
}

/// A stored product.
///
/// `quantity` is only ever changed through [`Product::apply_quantity`], which
/// keeps `last_inventory_change_at` honest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Price,
    pub quantity: Quantity,
    pub description: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_inventory_change_at: DateTime<Utc>,
}

impl Product {
    /// Build a product from creation input.
    pub fn create(id: ProductId, input: NewProduct, at: DateTime<Utc>) -> DomainResult<Self> {
        let sku = input.sku.trim().to_string();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if input.details.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku,
            name: input.details.name,
            price: input.details.price,
            quantity: input.quantity,
            description: input.details.description,
            external_id: input.external_id,
            created_at: at,
            updated_at: at,
            last_inventory_change_at: at,
        })
    }

    /// Set the stored quantity.
    ///
    /// Returns whether the value changed. `last_inventory_change_at` moves only
    /// when it did; `updated_at` moves on every write.
    pub fn apply_quantity(&mut self, quantity: Quantity, at: DateTime<Utc>) -> bool {
        let changed = self.quantity != quantity;
        if changed {
            self.quantity = quantity;
            self.last_inventory_change_at = at;
        }
        self.updated_at = at;
        changed
    }

    /// Overwrite name, price and description. Never touches the quantity.
    pub fn overwrite_details(&mut self, details: ProductDetails, at: DateTime<Utc>) {
        self.name = details.name;
        self.price = details.price;
        self.description = details.description;
        self.updated_at = at;
    }

    pub fn details(&self) -> ProductDetails {
        ProductDetails {
            name: self.name.clone(),
            price: self.price,
            description: self.description.clone(),
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl core::fmt::Display for Product {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.name, self.sku)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn widget(at: DateTime<Utc>) -> Product {
        Product::create(
            ProductId::new(),
            NewProduct {
                sku: "A1".to_string(),
                details: ProductDetails {
                    name: "Widget".to_string(),
                    price: Price::parse("9.99").unwrap(),
                    description: String::new(),
                },
                quantity: Quantity::new(10).unwrap(),
                external_id: None,
            },
            at,
        )
        .unwrap()
    }

    #[test]
    fn price_rejects_negative_values() {
        assert!(Price::parse("-0.01").is_err());
        assert!(Price::parse("abc").is_err());
        assert_eq!(Price::parse(" 19.99 ").unwrap().to_string(), "19.99");
    }

    #[test]
    fn price_rounds_to_two_places() {
        assert_eq!(Price::parse("1.005").unwrap().to_string(), "1.00");
        assert_eq!(Price::parse("7").unwrap().to_string(), "7.00");
    }

    #[test]
    fn quantity_accepts_whole_decimals_only() {
        assert_eq!(Quantity::parse("10").unwrap().value(), 10);
        assert_eq!(Quantity::parse("10.0").unwrap().value(), 10);
        assert!(Quantity::parse("10.5").is_err());
        assert!(Quantity::parse("-1").is_err());
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("ten").is_err());
    }

    #[test]
    fn quantity_deserialization_enforces_non_negative() {
        assert!(serde_json::from_str::<Quantity>("-3").is_err());
        assert_eq!(serde_json::from_str::<Quantity>("3").unwrap().value(), 3);
    }

    #[test]
    fn detail_overwrite_leaves_inventory_timestamp_alone() {
        let t0 = Utc::now();
        let mut p = widget(t0);
        let t1 = t0 + Duration::seconds(5);

        p.overwrite_details(
            ProductDetails {
                name: "Widget v2".to_string(),
                price: Price::parse("12.50").unwrap(),
                description: "new".to_string(),
            },
            t1,
        );

        assert_eq!(p.last_inventory_change_at, t0);
        assert_eq!(p.updated_at, t1);
        assert_eq!(p.name, "Widget v2");
    }

    #[test]
    fn unchanged_quantity_does_not_move_inventory_timestamp() {
        let t0 = Utc::now();
        let mut p = widget(t0);
        let t1 = t0 + Duration::seconds(5);

        assert!(!p.apply_quantity(Quantity::new(10).unwrap(), t1));
        assert_eq!(p.last_inventory_change_at, t0);

        assert!(p.apply_quantity(Quantity::new(4).unwrap(), t1));
        assert_eq!(p.last_inventory_change_at, t1);
        assert_eq!(p.quantity.value(), 4);
    }

    #[test]
    fn identity_survives_quantity_changes() {
        let t0 = Utc::now();
        let original = widget(t0);
        let mut moved = original.clone();
        moved.apply_quantity(Quantity::new(1).unwrap(), t0);

        assert!(moved.same_identity_as(&original));
        assert!(!widget(t0).same_identity_as(&original));
    }

    #[test]
    fn create_rejects_blank_sku() {
        let err = Product::create(
            ProductId::new(),
            NewProduct {
                sku: "  ".to_string(),
                details: ProductDetails {
                    name: "x".to_string(),
                    price: Price::parse("1").unwrap(),
                    description: String::new(),
                },
                quantity: Quantity::ZERO,
                external_id: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn non_negative_integers_always_parse(n in 0i64..1_000_000_000) {
                prop_assert_eq!(Quantity::parse(&n.to_string()).unwrap().value(), n);
            }

            #[test]
            fn negative_integers_never_parse(n in i64::MIN..0) {
                prop_assert!(Quantity::parse(&n.to_string()).is_err());
            }

            #[test]
            fn timestamp_moves_iff_quantity_changes(start in 0i64..500, next in 0i64..500) {
                let t0 = Utc::now();
                let mut p = widget(t0);
                p.apply_quantity(Quantity::new(start).unwrap(), t0);
                let before = p.last_inventory_change_at;
                let t1 = t0 + Duration::seconds(1);
                let changed = p.apply_quantity(Quantity::new(next).unwrap(), t1);
                prop_assert_eq!(changed, start != next);
                if changed {
                    prop_assert_eq!(p.last_inventory_change_at, t1);
                } else {
                    prop_assert_eq!(p.last_inventory_change_at, before);
                }
            }
        }
    }
}
