pub use super::monthly_points::Entity as MonthlyPoints;
pub use super::score_events::Entity as ScoreEvents;
pub use super::users::Entity as Users;
