use serde_json::Value;

use crate::coords::Projection;
use crate::region::Region;
use crate::schema::{DropReason, WorkUnit};
use crate::util::{json_f64, json_str};

use super::adapter::{
    Code, DEFAULT_GRID_KEYWORD, PageRule, PageSignal, ProviderAdapter, ProviderProfile,
    RequestSpec, StatusRule,
};

const SEARCH_URL: &str = "https://api.map.baidu.com/place/v2/search";
const PAGE_SIZE: u32 = 20;

static PROFILE: ProviderProfile = ProviderProfile {
    name: "baidu",
    projection: Projection::Bd09,
    credential_param: "ak",
    results_pointer: "/results",
    phone_pointer: "/telephone",
    success: &[StatusRule {
        pointer: "/status",
        codes: &[Code::Int(0)],
    }],
    quota: &[StatusRule {
        pointer: "/status",
        codes: &[Code::Int(302), Code::Int(401), Code::Int(402), Code::Int(4)],
    }],
    paging: PageRule {
        page_size: PAGE_SIZE,
        signal: PageSignal::Total { pointer: "/total" },
    },
};

/// Baidu industry categories; the query term doubles as the code.
static TYPE_CODES: &[(&str, &str)] = &[
    ("美食", "美食"),
    ("酒店", "酒店"),
    ("购物", "购物"),
    ("生活服务", "生活服务"),
    ("丽人", "丽人"),
    ("旅游景点", "旅游景点"),
    ("休闲娱乐", "休闲娱乐"),
    ("运动健身", "运动健身"),
    ("教育培训", "教育培训"),
    ("文化传媒", "文化传媒"),
    ("医疗", "医疗"),
    ("汽车服务", "汽车服务"),
    ("交通设施", "交通设施"),
    ("金融", "金融"),
    ("房地产", "房地产"),
    ("公司企业", "公司企业"),
    ("政府机构", "政府机构"),
];

/// Baidu Place API v2 adapter
///
/// https://lbsyun.baidu.com/faq/api?title=webapi/guide/webservice-placeapi
///
/// DESIGN:
/// - Region search by administrative name for keyword and type sweeps
/// - Rectangle search (BD09 `bounds`) for grid cells
/// - `page_num` is zero based on the wire
pub struct BaiduAdapter;

impl ProviderAdapter for BaiduAdapter {
    fn profile(&self) -> &'static ProviderProfile {
        &PROFILE
    }

    fn build_request(&self, unit: &WorkUnit, page: u32, region: &Region) -> RequestSpec {
        let base = RequestSpec::new(SEARCH_URL, PROFILE.credential_param);

        let spec = match unit {
            WorkUnit::Keyword { keyword, .. } => base
                .param("query", keyword)
                .param("region", &region.name)
                .param("city_limit", "true"),

            WorkUnit::TypeCode { code, .. } => base
                .param("query", code)
                .param("region", &region.name)
                .param("city_limit", "true"),

            WorkUnit::GridCell {
                lon,
                lat,
                half_step,
                keyword,
                ..
            } => {
                let (min_lon, min_lat) = PROFILE.projection.from_wgs84(lon - half_step, lat - half_step);
                let (max_lon, max_lat) = PROFILE.projection.from_wgs84(lon + half_step, lat + half_step);
                base.param("query", keyword.as_deref().unwrap_or(DEFAULT_GRID_KEYWORD))
                    // lat,lng order on the wire
                    .param(
                        "bounds",
                        format!("{:.6},{:.6},{:.6},{:.6}", min_lat, min_lon, max_lat, max_lon),
                    )
            }
        };

        spec.param("output", "json")
            .param("page_size", PAGE_SIZE)
            .param("page_num", page.saturating_sub(1))
            .param("scope", 2)
    }

    fn locate(&self, raw: &Value) -> Result<(f64, f64), DropReason> {
        if !raw.get("location").is_some_and(Value::is_object) {
            return Err(DropReason::MissingCoordinates);
        }
        let lon = json_f64(raw, "/location/lng").filter(|v| v.is_finite() && *v != 0.0);
        let lat = json_f64(raw, "/location/lat").filter(|v| v.is_finite() && *v != 0.0);
        lon.zip(lat).ok_or(DropReason::MalformedCoordinates)
    }

    fn default_type_codes(&self) -> &'static [(&'static str, &'static str)] {
        TYPE_CODES
    }

    /// Grid hits use the first segment of `detail_info.tag` (scope=2).
    fn categorize(&self, raw: &Value, unit: &WorkUnit) -> (String, String) {
        let (label, id) = unit.category();
        let label = match unit {
            WorkUnit::GridCell { .. } => json_str(raw, "/detail_info/tag")
                .and_then(|t| t.split(';').map(str::trim).find(|s| !s.is_empty()))
                .unwrap_or(label)
                .to_string(),
            _ => label.to_string(),
        };
        (label, id.to_string())
    }
}
