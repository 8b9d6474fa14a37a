use serde_json::{Value, json};

use crate::coords::Projection;
use crate::region::Region;
use crate::schema::{DropReason, WorkUnit};
use crate::util::{json_str, json_text, parse_lon_lat};

use super::adapter::{
    Code, DEFAULT_GRID_KEYWORD, PageRule, PageSignal, ProviderAdapter, ProviderProfile,
    RequestSpec, StatusRule,
};

const SEARCH_URL: &str = "http://api.tianditu.gov.cn/v2/search";
const PAGE_SIZE: u32 = 100;

static PROFILE: ProviderProfile = ProviderProfile {
    name: "tianditu",
    projection: Projection::Wgs84,
    credential_param: "tk",
    results_pointer: "/pois",
    phone_pointer: "/phone",
    success: &[StatusRule {
        pointer: "/status/infocode",
        codes: &[Code::Int(1000)],
    }],
    quota: &[StatusRule {
        pointer: "/status/infocode",
        codes: &[Code::Int(10001), Code::Int(10002), Code::Int(10003)],
    }],
    paging: PageRule {
        page_size: PAGE_SIZE,
        signal: PageSignal::ShortPage,
    },
};

/// Tianditu national platform categories.
static TYPE_CODES: &[(&str, &str)] = &[
    ("010", "餐饮"),
    ("020", "宾馆"),
    ("030", "购物"),
    ("040", "生活服务"),
    ("050", "风景名胜"),
    ("060", "休闲娱乐"),
    ("070", "体育健身"),
    ("080", "文化传媒"),
    ("090", "教育科研"),
    ("100", "医疗卫生"),
    ("110", "交通运输"),
    ("120", "金融保险"),
    ("130", "商业公司"),
    ("140", "政府机关"),
    ("150", "社区服务"),
    ("160", "邮政通信"),
    ("170", "住宅区"),
];

/// Tianditu v2 search adapter
///
/// http://lbs.tianditu.gov.cn/server/search2.html
///
/// DESIGN:
/// - The whole query travels as a JSON document in `postStr`
/// - Coordinates are already WGS84
/// - Paging is offset based (`start`), a short page ends the unit
pub struct TiandituAdapter;

impl TiandituAdapter {
    fn post_str(&self, unit: &WorkUnit, page: u32, region: &Region) -> Value {
        let map_bound = region.bounds.to_lon_lat_string();
        let start = PROFILE.paging.offset(page);

        match unit {
            // region name in front of the keyword sharpens the match
            WorkUnit::Keyword { keyword, .. } => json!({
                "keyWord": format!("{} {}", region.name, keyword),
                "level": 12,
                "mapBound": map_bound,
                "queryType": 1,
                "start": start,
                "count": PAGE_SIZE,
            }),

            WorkUnit::TypeCode { label, .. } => json!({
                "keyWord": label,
                "level": 12,
                "mapBound": map_bound,
                "queryType": 1,
                "start": start,
                "count": PAGE_SIZE,
                "specify": region.admin_code,
            }),

            WorkUnit::GridCell {
                lon,
                lat,
                radius_m,
                keyword,
                ..
            } => json!({
                "keyWord": keyword.as_deref().unwrap_or(DEFAULT_GRID_KEYWORD),
                "level": 12,
                "queryType": 3,
                "pointLonlat": format!("{},{}", lon, lat),
                "queryRadius": radius_m,
                "start": 0,
                "count": PAGE_SIZE,
            }),
        }
    }
}

impl ProviderAdapter for TiandituAdapter {
    fn profile(&self) -> &'static ProviderProfile {
        &PROFILE
    }

    fn build_request(&self, unit: &WorkUnit, page: u32, region: &Region) -> RequestSpec {
        RequestSpec::new(SEARCH_URL, PROFILE.credential_param)
            .param("postStr", self.post_str(unit, page, region))
            .param("type", "query")
    }

    fn locate(&self, raw: &Value) -> Result<(f64, f64), DropReason> {
        let lonlat = json_str(raw, "/lonlat")
            .filter(|s| !s.trim().is_empty())
            .ok_or(DropReason::MissingCoordinates)?;
        parse_lon_lat(lonlat).ok_or(DropReason::MalformedCoordinates)
    }

    fn default_type_codes(&self) -> &'static [(&'static str, &'static str)] {
        TYPE_CODES
    }

    /// Type sweeps keep Tianditu's own `poiType` label when present.
    fn categorize(&self, raw: &Value, unit: &WorkUnit) -> (String, String) {
        let (label, id) = unit.category();
        let label = match unit {
            WorkUnit::TypeCode { .. } => json_text(raw, "/poiType").unwrap_or_else(|| label.to_string()),
            _ => label.to_string(),
        };
        (label, id.to_string())
    }
}
