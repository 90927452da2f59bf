pub mod audit_service;
pub mod auth;
pub mod boleto_decoder;
pub mod boleto_service;
pub mod confirmation_service;
pub mod pix_service;
pub mod providers;
pub mod settlement;
