// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      Configuration structs loaded from JSON
// - schema:      POI record, work units, drop reasons
// - util:        Shared helpers (JSON access, time, log formatting)
// - coords:      WGS84 / GCJ02 / BD09 conversion
// - limiter:     Token-bucket admission control
// - region:      Active collection area and presets
// - store:       SQLite persistence (POIs, credential table)
// - credentials: Credential pool with quota rotation
// - checkpoint:  Durable collection cursors (file / Redis)
// - providers:   Provider adapters and adapter registry
// - collector:   Enumeration, request execution, orchestration
// - metrics:     Global runtime counters
//
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod coords;
pub mod credentials;
pub mod limiter;
pub mod metrics;
pub mod providers;
pub mod region;
pub mod schema;
pub mod store;
pub mod util;
