/// Collector module
///
/// This module groups all logic responsible for:
/// - Enumerating the work units of a collection
/// - Executing provider requests (throttling, retries, credentials)
/// - Driving one collection per provider with durable checkpoints
/// - Supervising the per-provider tasks
///
/// The collector layer is the orchestration layer between:
/// - Provider adapters (Tianditu, Amap, Baidu)
/// - The POI store and the checkpoint store
///
/// Design notes:
/// - Provider-specific logic MUST NOT live here
/// - All request shapes and response tables belong to adapters
pub mod enumerator;
pub mod executor;
pub mod runner;
pub mod supervisor;
