pub mod epoch;
pub mod jwt;
