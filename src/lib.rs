pub mod service_islands;

pub use service_islands::layer1_infrastructure::app_config::GatewayConfig;
pub use service_islands::layer5_business_logic::shared::error::{GatewayError, GatewayResult};
pub use service_islands::ServiceIslands;
