use super::{require_amount, require_non_empty};
use crate::framework::{MutationPolicy, Resource, ValidationError};
use crate::store::object_id::hex_string;
use crate::store::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalogue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(with = "hex_string")]
    pub id: ObjectId,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductCreate {
    pub name: String,
    pub price: f64,
    pub stock: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductReplace {
    pub name: String,
    pub price: f64,
    pub stock: u32,
}

fn validate_fields(name: &str, price: f64) -> Result<(), ValidationError> {
    require_non_empty("name", name)?;
    require_amount("price", price)
}

impl Resource for Product {
    const KIND: &'static str = "Product";
    const COLLECTION: &'static str = "products";
    const POLICY: MutationPolicy = MutationPolicy::Transactional;

    type Create = ProductCreate;
    type Replace = ProductReplace;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn from_create(
        id: ObjectId,
        created_at: DateTime<Utc>,
        params: ProductCreate,
    ) -> Result<Self, ValidationError> {
        validate_fields(&params.name, params.price)?;
        Ok(Self {
            id,
            name: params.name,
            price: params.price,
            stock: params.stock,
            created_at,
        })
    }

    fn validate_replace(replace: &ProductReplace) -> Result<(), ValidationError> {
        validate_fields(&replace.name, replace.price)
    }
}
