pub mod auth;
pub mod boletos;
pub mod pix;
