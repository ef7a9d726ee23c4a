pub mod db;
pub mod migrations;
pub mod models;

pub use db::Database;
pub use models::{
    content_source, Classification, CognitiveProfile, Decision, FlowBreaker, FlowWindow,
    HourQuality, InterventionEvent, Session, SessionPerformance, SessionStatus, UserProfile,
    XpBreakdown,
};
