pub mod http;
pub mod memory;
pub mod provider;

pub use http::{HttpShippingProvider, ProviderConfig, DEFAULT_BASE_URL};
pub use memory::{CallCounts, InMemoryShippingProvider};
pub use provider::{ProviderError, ShippingProvider};
