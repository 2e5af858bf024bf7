pub mod organization;
pub mod task;
pub mod token;
pub mod user;
