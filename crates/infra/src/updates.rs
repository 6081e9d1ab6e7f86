//! Single-record update entry points: operator edits and external callbacks.
//!
//! Both validate their input before any lookup or write, then delegate to
//! [`InventoryMutator`].

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

use stockledger_core::ProductId;
use stockledger_inventory::ChangeType;

use crate::mutator::{InventoryMutator, Mutation, MutationError};
use crate::store::InventoryStore;

/// Update entry point error, mapped onto HTTP-like status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("product not found")]
    NotFound,

    #[error("internal error: {0}")]
    Persistence(String),
}

impl UpdateError {
    pub fn status_code(&self) -> u16 {
        match self {
            UpdateError::InvalidInput(_) => 400,
            UpdateError::NotFound => 404,
            UpdateError::Persistence(_) => 500,
        }
    }
}

impl From<MutationError> for UpdateError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::InvalidQuantity(_) => {
                UpdateError::InvalidInput("quantity cannot be negative".to_string())
            }
            MutationError::UnknownProduct(_) => UpdateError::NotFound,
            MutationError::Persistence(e) => UpdateError::Persistence(e.to_string()),
        }
    }
}

/// Operator edit request body.
///
/// `quantity` is kept as raw JSON so that missing, malformed and negative
/// values produce distinct errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualUpdate {
    #[serde(default)]
    pub quantity: Option<JsonValue>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Stock-level callback pushed by the external storefront.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalCallback {
    /// The storefront's identifier for the product.
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub inventory_quantity: Option<JsonValue>,
}

/// Acknowledgement returned on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAck {
    pub status: &'static str,
    pub product_id: ProductId,
    pub sku: String,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub change: i64,
}

impl From<Mutation> for UpdateAck {
    fn from(m: Mutation) -> Self {
        Self {
            status: "success",
            product_id: m.product.id,
            sku: m.product.sku.clone(),
            previous_quantity: m.entry.previous_quantity().value(),
            new_quantity: m.entry.new_quantity().value(),
            change: m.entry.delta(),
        }
    }
}

#[derive(Debug)]
pub struct InventoryUpdates<S: ?Sized> {
    store: Arc<S>,
    mutator: InventoryMutator<S>,
}

impl<S> InventoryUpdates<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            mutator: InventoryMutator::new(Arc::clone(&store)),
            store,
        }
    }

    /// Operator edit of one product's quantity.
    #[instrument(skip(self, body), err)]
    pub async fn manual(&self, product_id: &str, body: ManualUpdate) -> Result<UpdateAck, UpdateError> {
        let quantity = parse_quantity(body.quantity.as_ref())?;

        let Ok(id) = product_id.parse::<ProductId>() else {
            return Err(UpdateError::NotFound);
        };
        let note = body.notes.unwrap_or_default();
        let mutation = self
            .mutator
            .set_quantity(id, quantity, ChangeType::Manual, &note)
            .await?;
        Ok(mutation.into())
    }

    /// External stock callback. Resolves the product by external id first,
    /// then by SKU.
    #[instrument(skip(self, payload), err)]
    pub async fn external_callback(
        &self,
        payload: ExternalCallback,
    ) -> Result<UpdateAck, UpdateError> {
        let external_id = payload.id.as_ref().and_then(external_id_text);
        let sku = payload
            .sku
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if external_id.is_none() && sku.is_none() {
            return Err(UpdateError::InvalidInput(
                "either id or sku is required".to_string(),
            ));
        }
        let quantity = parse_quantity(payload.inventory_quantity.as_ref())?;

        let mut product = None;
        if let Some(ext) = external_id.as_deref() {
            product = self
                .store
                .find_by_external_id(ext)
                .await
                .map_err(|e| UpdateError::Persistence(e.to_string()))?;
        }
        if product.is_none() {
            if let Some(sku) = sku {
                product = self
                    .store
                    .find_by_sku(sku)
                    .await
                    .map_err(|e| UpdateError::Persistence(e.to_string()))?;
            }
        }
        let product = product.ok_or(UpdateError::NotFound)?;

        let note = format!(
            "External callback update - {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let mutation = self
            .mutator
            .set_quantity(product.id, quantity, ChangeType::ExternalCallback, &note)
            .await?;
        Ok(mutation.into())
    }
}

/// Storefront ids arrive as numbers or strings.
fn external_id_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_quantity(raw: Option<&JsonValue>) -> Result<i64, UpdateError> {
    let invalid = || UpdateError::InvalidInput("invalid quantity".to_string());
    let value = match raw {
        None | Some(JsonValue::Null) => {
            return Err(UpdateError::InvalidInput("quantity is required".to_string()));
        }
        Some(JsonValue::Number(n)) => n.as_i64().or_else(|| whole(n.as_f64()?)).ok_or_else(invalid)?,
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };
    if value < 0 {
        return Err(UpdateError::InvalidInput(
            "quantity cannot be negative".to_string(),
        ));
    }
    Ok(value)
}

/// `12.0` is a whole quantity; `2.5` is not.
fn whole(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantity_parsing_distinguishes_failures() {
        assert_eq!(
            parse_quantity(None),
            Err(UpdateError::InvalidInput("quantity is required".to_string()))
        );
        assert_eq!(
            parse_quantity(Some(&json!("abc"))),
            Err(UpdateError::InvalidInput("invalid quantity".to_string()))
        );
        assert_eq!(
            parse_quantity(Some(&json!(-5))),
            Err(UpdateError::InvalidInput(
                "quantity cannot be negative".to_string()
            ))
        );
        assert_eq!(parse_quantity(Some(&json!(" 12 "))), Ok(12));
        assert_eq!(parse_quantity(Some(&json!(7))), Ok(7));
        assert!(parse_quantity(Some(&json!(2.5))).is_err());
    }

    #[test]
    fn whole_floats_are_accepted() {
        assert_eq!(parse_quantity(Some(&json!(12.0))), Ok(12));
        assert_eq!(parse_quantity(Some(&json!(0.0))), Ok(0));
        assert_eq!(
            parse_quantity(Some(&json!(-3.0))),
            Err(UpdateError::InvalidInput(
                "quantity cannot be negative".to_string()
            ))
        );
        assert_eq!(
            parse_quantity(Some(&json!(1e300))),
            Err(UpdateError::InvalidInput("invalid quantity".to_string()))
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(UpdateError::InvalidInput(String::new()).status_code(), 400);
        assert_eq!(UpdateError::NotFound.status_code(), 404);
        assert_eq!(UpdateError::Persistence(String::new()).status_code(), 500);
    }

    #[test]
    fn numeric_external_ids_are_stringified() {
        assert_eq!(external_id_text(&json!(123456)), Some("123456".to_string()));
        assert_eq!(external_id_text(&json!("  ")), None);
    }
}
