use super::{require_amount, require_non_empty};
use crate::framework::{MutationPolicy, Resource, ValidationError};
use crate::store::object_id::hex_string;
use crate::store::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an order.
///
/// Orders are always created `Pending`. They leave that state either through a client
/// replacement or through the nightly batch run of the
/// [`BatchStatusScheduler`](crate::scheduler::BatchStatusScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase of one product by one user.
///
/// `user_id` and `product_id` are plain references; nothing checks that they resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(with = "hex_string")]
    pub id: ObjectId,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub total: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating an order.
///
/// A `status` sent by the client is accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderCreate {
    #[serde(alias = "userRef")]
    pub user_id: String,
    #[serde(alias = "productRef")]
    pub product_id: String,
    pub quantity: u32,
    pub total: f64,
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

/// Payload for replacing an order. Carries every mutable field, including `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReplace {
    #[serde(alias = "userRef")]
    pub user_id: String,
    #[serde(alias = "productRef")]
    pub product_id: String,
    pub quantity: u32,
    pub total: f64,
    pub status: OrderStatus,
}

fn validate_line(user_id: &str, product_id: &str, quantity: u32, total: f64) -> Result<(), ValidationError> {
    require_non_empty("user_id", user_id)?;
    require_non_empty("product_id", product_id)?;
    if quantity == 0 {
        return Err(ValidationError::new("quantity must be a positive integer"));
    }
    require_amount("total", total)
}

impl Resource for Order {
    const KIND: &'static str = "Order";
    const COLLECTION: &'static str = "orders";
    const POLICY: MutationPolicy = MutationPolicy::Transactional;

    type Create = OrderCreate;
    type Replace = OrderReplace;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn from_create(
        id: ObjectId,
        created_at: DateTime<Utc>,
        params: OrderCreate,
    ) -> Result<Self, ValidationError> {
        validate_line(&params.user_id, &params.product_id, params.quantity, params.total)?;
        Ok(Self {
            id,
            user_id: params.user_id,
            product_id: params.product_id,
            quantity: params.quantity,
            total: params.total,
            status: OrderStatus::Pending,
            created_at,
        })
    }

    fn validate_replace(replace: &OrderReplace) -> Result<(), ValidationError> {
        validate_line(&replace.user_id, &replace.product_id, replace.quantity, replace.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_payload_accepts_ref_aliases() {
        let params: OrderCreate = serde_json::from_value(json!({
            "userRef": "u1",
            "productRef": "p1",
            "quantity": 1,
            "total": 5.0
        }))
        .unwrap();
        assert_eq!(params.user_id, "u1");
        assert_eq!(params.product_id, "p1");
        assert_eq!(params.status, None);
    }

    #[test]
    fn test_creation_ignores_client_status() {
        let params = OrderCreate {
            user_id: "u1".into(),
            product_id: "p1".into(),
            quantity: 1,
            total: 5.0,
            status: Some(OrderStatus::Completed),
        };
        let order = Order::from_create(ObjectId::new(), Utc::now(), params).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_zero_quantity_is_invalid() {
        let replace = OrderReplace {
            user_id: "u1".into(),
            product_id: "p1".into(),
            quantity: 0,
            total: 0.0,
            status: OrderStatus::Pending,
        };
        let err = Order::validate_replace(&replace).unwrap_err();
        assert!(err.0.contains("quantity"));
    }

    #[test]
    fn test_negative_quantity_fails_to_parse() {
        let parsed = serde_json::from_value::<OrderCreate>(json!({
            "user_id": "u1", "product_id": "p1", "quantity": -1, "total": 1.0
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_unknown_status_fails_to_parse() {
        let parsed = serde_json::from_value::<OrderReplace>(json!({
            "user_id": "u1", "product_id": "p1", "quantity": 1, "total": 1.0, "status": "Shipped"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_wire_shape() {
        let order = Order {
            id: ObjectId::new(),
            user_id: "u1".into(),
            product_id: "p1".into(),
            quantity: 2,
            total: 3.5,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["status"], "Pending");
        assert_eq!(value["id"], json!(order.id.to_hex()));
        assert!(value.get("created_at").is_some());
    }
}
