pub mod dashboard;
pub mod history;
pub mod household;
pub mod maintenance;
pub mod notifications;
pub mod rules;
pub mod servers;
pub mod violations;
