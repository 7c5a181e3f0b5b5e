pub mod chains;
pub mod health;
pub mod notifiers;
