pub mod alert;
pub mod event;
pub mod feedback;
pub mod journey;
pub mod pattern;
pub mod pricing;
pub mod score;
pub mod state;
