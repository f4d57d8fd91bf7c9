/// Alert evaluation, threshold rules and the bounded alert feed
pub mod alert_feed;
pub mod evaluator;
pub mod rules;
pub mod suppressor;

pub use alert_feed::{AlertFeed, AlertOrder};
pub use evaluator::{Alert, AlertEvaluator, AlertRule};
pub use rules::{aqi_category, AqiCategory, Condition, Thresholds};
pub use suppressor::RepeatSuppressor;
