//! Reference data: users, issuing organizations, clients and products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subject::UserId;

/// Product category whose products come with a training session.
pub const TRAINING_CATEGORY: &str = "FOR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:  UserId,
  pub username: String,
}

/// An issuing organization (tenant). Its `code` prefixes every reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
  pub organization_id: i64,
  pub code:            String,
  pub name:            String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
  pub client_id:     i64,
  pub name:          String,
  /// Assigned once at creation, see [`crate::reference::client_number`].
  pub client_number: String,
  pub created_at:    DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
  pub product_id:    i64,
  pub code:          String,
  pub name:          String,
  pub category_code: String,
}

impl Product {
  pub fn is_training(&self) -> bool { self.category_code == TRAINING_CATEGORY }
}

/// Input to [`crate::store::TrackingStore::add_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
  pub code:          String,
  pub name:          String,
  pub category_code: String,
}

impl NewProduct {
  pub fn new(
    code: impl Into<String>,
    name: impl Into<String>,
    category_code: impl Into<String>,
  ) -> Self {
    Self {
      code:          code.into(),
      name:          name.into(),
      category_code: category_code.into(),
    }
  }
}
