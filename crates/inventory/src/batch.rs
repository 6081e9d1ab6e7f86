//! Normalized import rows.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

use crate::product::{NewProduct, Price, ProductDetails, Quantity};

/// One row of an import batch, after type coercion.
///
/// Fields the reconciler requires are optional here so that a batch handed
/// to reconciliation directly (not via ingest) can still carry incomplete
/// rows; they are rejected per record instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchRecord {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default, rename = "inventory_quantity")]
    pub quantity: Quantity,
    #[serde(default)]
    pub description: String,
}

/// A batch record whose required fields are all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRecord {
    pub sku: String,
    pub quantity: Quantity,
    pub details: ProductDetails,
}

impl BatchRecord {
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Price,
        quantity: Quantity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            sku: Some(sku.into()),
            name: Some(name.into()),
            price: Some(price),
            quantity,
            description: description.into(),
        }
    }

    /// Label used in error messages (the SKU, or a placeholder).
    pub fn label(&self) -> &str {
        match self.sku.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => "<missing sku>",
        }
    }

    /// Check required fields. Blank strings count as missing.
    pub fn validate(&self) -> DomainResult<ValidRecord> {
        let sku = non_blank(self.sku.as_deref());
        let name = non_blank(self.name.as_deref());

        let mut missing = Vec::new();
        if sku.is_none() {
            missing.push("sku");
        }
        if name.is_none() {
            missing.push("name");
        }
        if self.price.is_none() {
            missing.push("price");
        }

        match (sku, name, self.price) {
            (Some(sku), Some(name), Some(price)) => Ok(ValidRecord {
                sku: sku.to_string(),
                quantity: self.quantity,
                details: ProductDetails {
                    name: name.to_string(),
                    price,
                    description: self.description.clone(),
                },
            }),
            _ => Err(DomainError::validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            ))),
        }
    }
}

impl ValidRecord {
    pub fn into_new_product(self) -> NewProduct {
        NewProduct {
            sku: self.sku,
            details: self.details,
            quantity: self.quantity,
            external_id: None,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_record_validates() {
        let r = BatchRecord::new(
            " A1 ",
            "Widget",
            Price::parse("9.99").unwrap(),
            Quantity::new(10).unwrap(),
            "",
        );
        let v = r.validate().unwrap();
        assert_eq!(v.sku, "A1");
        assert_eq!(v.details.name, "Widget");
        assert_eq!(v.quantity.value(), 10);
    }

    #[test]
    fn missing_fields_are_listed() {
        let r = BatchRecord {
            sku: Some("".to_string()),
            name: None,
            price: Some(Price::parse("1").unwrap()),
            ..Default::default()
        };
        let err = r.validate().unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("missing required field(s): sku, name")
        );
        assert_eq!(r.label(), "<missing sku>");
    }

    #[test]
    fn deserializes_from_import_shape() {
        let r: BatchRecord = serde_json::from_str(
            r#"{"sku":"A1","name":"Widget","price":"9.99","inventory_quantity":10}"#,
        )
        .unwrap();
        assert_eq!(r.quantity.value(), 10);
        assert_eq!(r.price.unwrap().to_string(), "9.99");
        assert!(r.description.is_empty());
    }
}
