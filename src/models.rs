pub mod audit;
pub mod auth;
pub mod boleto;
pub mod confirmation;
