//! Repository layer: one unit struct per table.

pub mod order_repo;
pub mod polling_repo;
pub mod provider_repo;
pub mod task_repo;
pub mod template_repo;
pub mod transition_repo;
pub mod uploaded_ref_repo;

pub use order_repo::OrderRepo;
pub use polling_repo::PollingRepo;
pub use provider_repo::ProviderRepo;
pub use task_repo::TaskRepo;
pub use template_repo::TemplateRepo;
pub use transition_repo::TransitionRepo;
pub use uploaded_ref_repo::UploadedRefRepo;
