pub mod domain_repo;
pub mod lock_repo;
pub mod summary_repo;

pub use domain_repo::{DomainRepository, OwnershipTransaction};
pub use lock_repo::LockRepository;
pub use summary_repo::SummaryRepository;
