//! Provider adapter registry
//!
//! This module provides:
//! - Central registration of all supported POI providers
//! - A factory function to resolve adapters by name
//!
//! All provider-specific request shapes and response tables live in
//! dedicated adapter modules. The pipeline interacts exclusively
//! through the `ProviderAdapter` trait.

pub mod adapter;
pub mod amap;
pub mod baidu;
pub mod tianditu;

use std::sync::Arc;

use adapter::ProviderAdapter;

/// Names accepted by [`get_adapter`], in registry order.
pub const PROVIDERS: &[&str] = &["tianditu", "amap", "baidu"];

/// Returns a provider adapter instance by name.
///
/// CONTRACT:
/// - `name` MUST match the `providers[].name` field in config.json
/// - Adapter names are lowercase and stable; they appear in stored
///   records (`platform`), credential rows and checkpoint keys
///
/// THREADING:
/// - Adapters are stateless and wrapped in `Arc`
/// - The same adapter instance may be shared across tasks
pub fn get_adapter(name: &str) -> Option<Arc<dyn ProviderAdapter>> {
    match name {
        "tianditu" => Some(Arc::new(tianditu::TiandituAdapter)),
        "amap" => Some(Arc::new(amap::AmapAdapter)),
        "baidu" => Some(Arc::new(baidu::BaiduAdapter)),
        _ => None,
    }
}
