pub mod stripe;
pub mod webhook_redelivery;
