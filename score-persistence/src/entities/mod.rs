pub mod prelude;

pub mod monthly_points;
pub mod score_events;
pub mod users;
