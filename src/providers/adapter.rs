use log::debug;
use serde_json::Value;

use crate::coords::Projection;
use crate::region::{Bounds, Region};
use crate::schema::{DropReason, ParsedPage, Poi, WorkUnit};
use crate::util::{json_f64, json_text};

/// Search term used by spatial queries when none is configured.
pub const DEFAULT_GRID_KEYWORD: &str = "所有";

// ------------------------------------------------------------
// Provider tables
// ------------------------------------------------------------
//
// Everything that differs between providers but is *data* lives in
// a `ProviderProfile`: status codes, pagination signal, projection,
// credential parameter name. The generic parse/classify logic below
// reads these tables; no provider identity is ever matched on.
//

/// One accepted value of a status field.
///
/// Providers disagree on whether codes are numbers or strings, so
/// both forms are compared leniently.
#[derive(Debug, Clone, Copy)]
pub enum Code {
    Int(i64),
    Str(&'static str),
}

impl Code {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Code::Int(n), Value::Number(v)) => v.as_i64() == Some(*n),
            (Code::Int(n), Value::String(s)) => s.trim().parse::<i64>().ok() == Some(*n),
            (Code::Str(s), Value::String(v)) => v == s,
            (Code::Str(s), Value::Number(v)) => v.to_string() == *s,
            _ => false,
        }
    }
}

/// `payload[pointer]` is one of `codes`.
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    pub pointer: &'static str,
    pub codes: &'static [Code],
}

impl StatusRule {
    pub fn matches(&self, payload: &Value) -> bool {
        payload
            .pointer(self.pointer)
            .is_some_and(|v| self.codes.iter().any(|c| c.matches(v)))
    }
}

/// All rules hold. An empty rule set never matches.
fn all_match(rules: &[StatusRule], payload: &Value) -> bool {
    !rules.is_empty() && rules.iter().all(|r| r.matches(payload))
}

/// How a provider signals that another page exists.
#[derive(Debug, Clone, Copy)]
pub enum PageSignal {
    /// A full page means there may be more
    ShortPage,

    /// A total count field compared against `page * page_size`
    /// (a short page also ends the sweep)
    Total { pointer: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct PageRule {
    pub page_size: u32,
    pub signal: PageSignal,
}

impl PageRule {
    /// `page` is 1-based; `returned` is the raw candidate count.
    pub fn has_more(&self, payload: &Value, page: u32, returned: usize) -> bool {
        let full_page = returned >= self.page_size as usize;
        match self.signal {
            PageSignal::ShortPage => full_page,
            PageSignal::Total { pointer } => {
                let total = json_f64(payload, pointer).unwrap_or(0.0);
                full_page && f64::from(page) * f64::from(self.page_size) < total
            }
        }
    }

    /// Zero-based record offset of a 1-based page.
    pub fn offset(&self, page: u32) -> u32 {
        page.saturating_sub(1) * self.page_size
    }
}

#[derive(Debug)]
pub struct ProviderProfile {
    /// Canonical provider name, matches `providers[].name` in config
    pub name: &'static str,

    /// Projection of coordinates in payloads
    pub projection: Projection,

    /// Query parameter carrying the credential
    pub credential_param: &'static str,

    /// JSON pointer of the result array
    pub results_pointer: &'static str,

    /// JSON pointer of the phone field inside a result
    pub phone_pointer: &'static str,

    /// Conditions for a successful response
    pub success: &'static [StatusRule],

    /// Conditions for a quota-exhausted response
    pub quota: &'static [StatusRule],

    pub paging: PageRule,
}

// ------------------------------------------------------------
// Request description
// ------------------------------------------------------------

/// A logical GET request, without credential.
///
/// The executor injects the credential under `credential_param`, so
/// the same spec can be re-issued after a credential rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub credential_param: &'static str,
}

impl RequestSpec {
    pub fn new(url: &str, credential_param: &'static str) -> Self {
        Self {
            url: url.to_string(),
            params: Vec::new(),
            credential_param,
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    /// Query parameters with the credential appended.
    pub fn params_with_credential(&self, secret: &str) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(k, _)| k != self.credential_param)
            .cloned()
            .collect();
        params.push((self.credential_param.to_string(), secret.to_string()));
        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Per-page parse inputs.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub unit: &'a WorkUnit,
    pub page: u32,
    pub bounds: &'a Bounds,
}

/// ProviderAdapter is the abstraction layer between:
/// - The generic collection pipeline
/// - Provider-specific search APIs
///
/// Each provider implementation must:
/// - Describe itself with a static `ProviderProfile`
/// - Translate a work unit + page into a request
/// - Locate coordinates inside one raw result
///
/// Everything else (success check, quota classification, bounds
/// filtering, projection, pagination) is provided here and driven by
/// the profile tables.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across tasks
///
pub trait ProviderAdapter: Send + Sync {
    fn profile(&self) -> &'static ProviderProfile;

    /// Canonical provider name.
    fn name(&self) -> &'static str {
        self.profile().name
    }

    /// Builds the request for `page` (1-based) of `unit`.
    ///
    /// MUST NOT:
    /// - Perform network I/O
    /// - Include the credential
    fn build_request(&self, unit: &WorkUnit, page: u32, region: &Region) -> RequestSpec;

    /// Extracts provider-native (lon, lat) from one raw result.
    fn locate(&self, raw: &Value) -> Result<(f64, f64), DropReason>;

    /// Default type codes for the type sweep, as (code, label).
    fn default_type_codes(&self) -> &'static [(&'static str, &'static str)];

    /// Category (label, id) recorded for one raw result.
    fn categorize(&self, _raw: &Value, unit: &WorkUnit) -> (String, String) {
        let (label, id) = unit.category();
        (label.to_string(), id.to_string())
    }

    fn is_success(&self, payload: &Value) -> bool {
        all_match(self.profile().success, payload)
    }

    /// True when the payload reports an exhausted credential.
    fn is_quota_error(&self, payload: &Value) -> bool {
        all_match(self.profile().quota, payload)
    }

    /// Turns one raw result into a normalized POI, or a drop reason.
    ///
    /// Checks run in this order: coordinates, bounds, name.
    fn normalize(&self, raw: &Value, ctx: &ParseContext<'_>) -> Result<Poi, DropReason> {
        let profile = self.profile();
        let (original_lon, original_lat) = self.locate(raw)?;
        let (lon, lat) = profile.projection.to_wgs84(original_lon, original_lat);

        if !ctx.bounds.contains(lon, lat) {
            return Err(DropReason::OutOfBounds);
        }

        let name = json_text(raw, "/name").ok_or(DropReason::EmptyName)?;
        let (category, category_id) = self.categorize(raw, ctx.unit);

        Ok(Poi {
            name,
            lon,
            lat,
            original_lon,
            original_lat,
            category,
            category_id,
            address: json_text(raw, "/address"),
            phone: json_text(raw, profile.phone_pointer),
            platform: profile.name.to_string(),
            raw_payload: raw.to_string(),
        })
    }

    /// Parses one response page.
    ///
    /// A payload that is neither successful nor a quota error yields an
    /// empty page with `has_more = false`.
    fn parse(&self, payload: &Value, ctx: &ParseContext<'_>) -> ParsedPage {
        let profile = self.profile();
        if !self.is_success(payload) {
            debug!("[{}] unsuccessful payload for {}: {}", profile.name, ctx.unit, payload);
            return ParsedPage::default();
        }

        let items: &[Value] = payload
            .pointer(profile.results_pointer)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut page = ParsedPage {
            raw_count: items.len(),
            ..Default::default()
        };

        for raw in items {
            match self.normalize(raw, ctx) {
                Ok(poi) => page.pois.push(poi),
                Err(reason) => {
                    debug!(
                        "[{}] dropped candidate ({}): {}",
                        profile.name,
                        reason.code(),
                        json_text(raw, "/name").unwrap_or_default()
                    );
                    page.dropped.push(reason);
                }
            }
        }

        page.has_more = ctx.unit.is_paged() && profile.paging.has_more(payload, ctx.page, items.len());
        page
    }
}
