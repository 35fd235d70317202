pub mod factory;
pub mod fallback;
pub mod openai;
pub mod retry;

pub use factory::create_provider;
pub use openai::OpenAIProvider;
pub use retry::RetryProvider;
