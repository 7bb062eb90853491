pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod notify;
pub mod orchestration;
pub mod rail;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    CommissionEntry, CommissionKind, CommissionStatus, Decimal, Member, MemberId, PaymentEvent,
    PaymentKind, Period, Slot, TimeMs,
};
pub use error::AppError;
