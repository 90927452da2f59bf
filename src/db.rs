pub mod scoped;
pub use scoped::{ScopedSession, ScopedTransaction};
pub mod user_repo;
pub use user_repo::UserRepository;
pub mod boleto_repo;
pub use boleto_repo::BoletoRepository;
pub mod confirmation_repo;
pub use confirmation_repo::ConfirmationRepository;
pub mod audit_repo;
pub use audit_repo::AuditRepository;
