/// Plans and subscriptions
pub mod plans;
pub mod subscriptions;

pub use plans::{Plan, PlanInput, PlanManager, PlanUpdate};
pub use subscriptions::{ActivePlan, Subscription, SubscriptionManager, SubscriptionWithPlan};
