//! Database models, one module per table.

pub mod booking;
pub mod common;
pub mod review;
pub mod tour;
pub mod user;

pub use booking::*;
pub use common::*;
pub use review::*;
pub use tour::*;
pub use user::*;
