use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ValidationError;

// ============================================================================
// Request Validation
// ============================================================================
//
// Inbound bodies and parameters are checked before any handler runs; a
// failure here is a client error and never produces an event.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    DebitCard,
    CreditCard,
    Pix,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub email: String,
    pub product_ids: Vec<String>,
    pub payment: PaymentMethod,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    pub product_name: String,
    pub code: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
}

/// Identifies an order for deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub email: String,
    pub order_id: String,
}

impl OrderKey {
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let email = params.get("email").ok_or(ValidationError::MissingParameter("email"))?;
        let order_id = params
            .get("orderId")
            .ok_or(ValidationError::MissingParameter("orderId"))?;

        Ok(Self {
            email: email.clone(),
            order_id: order_id.clone(),
        })
    }
}

pub fn validate_order_body(body: &str) -> Result<OrderRequest, ValidationError> {
    let request: OrderRequest = serde_json::from_str(body)?;
    if request.product_ids.is_empty() {
        return Err(ValidationError::EmptyProductIds);
    }
    Ok(request)
}

pub fn validate_product_body(body: &str) -> Result<ProductRequest, ValidationError> {
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_order_body() {
        let order = validate_order_body(r#"{"email":"a@b.com","productIds":["p1","p2"],"payment":"PIX"}"#).unwrap();
        assert_eq!(order.product_ids, vec!["p1", "p2"]);
        assert_eq!(order.payment, PaymentMethod::Pix);
    }

    #[test]
    fn test_invalid_order_bodies() {
        assert!(matches!(
            validate_order_body(r#"{"email":"a@b.com","productIds":[],"payment":"CASH"}"#),
            Err(ValidationError::EmptyProductIds)
        ));
        assert!(matches!(
            validate_order_body(r#"{"email":"a@b.com","productIds":["p1"],"payment":"BITCOIN"}"#),
            Err(ValidationError::Malformed(_))
        ));
        assert!(matches!(
            validate_order_body(r#"{"productIds":["p1"],"payment":"CASH"}"#),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_product_body_requires_name_and_code() {
        let product = validate_product_body(r#"{"productName":"Mouse","code":"M1","price":10.5}"#).unwrap();
        assert_eq!(product.price, Some(10.5));
        assert!(validate_product_body(r#"{"productName":"Mouse"}"#).is_err());
    }

    #[test]
    fn test_order_key_requires_both_parameters() {
        let mut params = HashMap::new();
        params.insert("email".to_string(), "a@b.com".to_string());
        assert!(matches!(
            OrderKey::from_query(&params),
            Err(ValidationError::MissingParameter("orderId"))
        ));

        params.insert("orderId".to_string(), "o-1".to_string());
        assert_eq!(OrderKey::from_query(&params).unwrap().order_id, "o-1");
    }
}
