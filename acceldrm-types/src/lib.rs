//! Core type definitions for acceldrm.
//!
//! This crate holds the types every other crate agrees on:
//! - The error taxonomy and its numeric codes
//! - Session identifiers
//! - Product identities and derived-product narrowing

mod error;
mod ids;
mod product;

pub use error::{parse_error_code, DrmError, DrmResult, ErrorCode};
pub use ids::{SessionId, SESSION_ID_LEN};
pub use product::{ProductId, ProductInfo};
