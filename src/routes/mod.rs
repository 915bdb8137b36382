pub mod customers;
pub mod health;
pub mod notifications;
pub mod responses;
pub mod wards;
