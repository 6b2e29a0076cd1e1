//! Data models for Strata.
//!
//! This module contains the row-level domain types shared by every layer:
//! - `Value` / `Feature` - typed column values and whole rows
//! - `PrimaryKey` - the key a feature is addressed by within a dataset
//! - `Schema` / `Column` - the column layout recorded in a dataset's meta

pub mod schema;
pub mod value;

pub use schema::{Column, Schema};
pub use value::{Feature, PrimaryKey, Value, feature_pk};
