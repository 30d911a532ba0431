//! Concrete adapters, one per `api_kind`.

pub mod gemini;
pub mod meitu;
pub mod nano_banana;
pub mod simple;
pub mod standard;

pub use gemini::GeminiAdapter;
pub use meitu::MeituAdapter;
pub use nano_banana::NanoBananaAdapter;
pub use simple::SimpleAdapter;
pub use standard::StandardAdapter;
