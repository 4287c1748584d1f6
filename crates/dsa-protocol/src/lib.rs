//! DSA Protocol - Core types shared by the stock analysis dashboard
//!
//! Describes the contract between the dashboard and the analysis backend:
//! providers, tasks, reports, history pages and the task lifecycle events
//! pushed over the server-sent event stream.

pub mod constants;
pub mod display;
pub mod error;
pub mod messages;
pub mod types;
pub mod validation;

pub use constants::*;
pub use display::{
    badge_label, badge_slot, format_change_pct, format_timestamp, DisplayNames, PriceDirection,
    SentimentBand,
};
pub use error::*;
pub use messages::*;
pub use types::*;
pub use validation::validate_stock_code;
