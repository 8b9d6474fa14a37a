use serde_json::Value;

use crate::coords::Projection;
use crate::region::Region;
use crate::schema::{DropReason, WorkUnit};
use crate::util::{json_str, json_text, parse_lon_lat};

use super::adapter::{
    Code, PageRule, PageSignal, ProviderAdapter, ProviderProfile, RequestSpec, StatusRule,
};

const TEXT_URL: &str = "https://restapi.amap.com/v3/place/text";
const AROUND_URL: &str = "https://restapi.amap.com/v3/place/around";
const PAGE_SIZE: u32 = 25;

static PROFILE: ProviderProfile = ProviderProfile {
    name: "amap",
    projection: Projection::Gcj02,
    credential_param: "key",
    results_pointer: "/pois",
    phone_pointer: "/tel",
    success: &[StatusRule {
        pointer: "/status",
        codes: &[Code::Str("1")],
    }],
    quota: &[
        StatusRule {
            pointer: "/status",
            codes: &[Code::Str("0")],
        },
        StatusRule {
            pointer: "/infocode",
            codes: &[
                Code::Str("10003"),
                Code::Str("10004"),
                Code::Str("10005"),
                Code::Str("10009"),
                Code::Str("10044"),
            ],
        },
    ],
    paging: PageRule {
        page_size: PAGE_SIZE,
        signal: PageSignal::Total { pointer: "/count" },
    },
};

/// Amap POI classification (top level plus the most useful subtypes).
static TYPE_CODES: &[(&str, &str)] = &[
    ("010000", "汽车服务"),
    ("010100", "加油站"),
    ("010400", "停车场"),
    ("050000", "餐饮服务"),
    ("060000", "购物服务"),
    ("060100", "商场"),
    ("060400", "超市"),
    ("070000", "生活服务"),
    ("070200", "邮局"),
    ("070700", "银行"),
    ("080000", "体育休闲服务"),
    ("090000", "医疗保健服务"),
    ("090100", "综合医院"),
    ("090200", "专科医院"),
    ("090300", "诊所"),
    ("090400", "药店"),
    ("100000", "住宿服务"),
    ("100100", "宾馆酒店"),
    ("110000", "风景名胜"),
    ("120000", "商务住宅"),
    ("120200", "住宅区"),
    ("120300", "楼宇"),
    ("130000", "政府机构及社会团体"),
    ("140000", "科教文化服务"),
    ("141200", "学校"),
    ("150000", "交通设施服务"),
    ("150200", "火车站"),
    ("150300", "长途汽车站"),
    ("150500", "公交车站"),
    ("160000", "金融保险服务"),
    ("170000", "公司企业"),
    ("190000", "地名地址信息"),
    ("190100", "村庄"),
    ("190200", "乡镇"),
];

/// Amap Web Service v3 place search adapter
///
/// https://lbs.amap.com/api/webservice/guide/api/search
///
/// DESIGN:
/// - Keyword and type sweeps use text search limited to the region city
/// - Grid cells use around search at the cell center
/// - Coordinates are GCJ02 in both directions
pub struct AmapAdapter;

impl ProviderAdapter for AmapAdapter {
    fn profile(&self) -> &'static ProviderProfile {
        &PROFILE
    }

    fn build_request(&self, unit: &WorkUnit, page: u32, region: &Region) -> RequestSpec {
        let text = || {
            RequestSpec::new(TEXT_URL, PROFILE.credential_param)
                .param("city", &region.city_code)
                .param("citylimit", "true")
        };

        let spec = match unit {
            WorkUnit::Keyword { keyword, .. } => text().param("keywords", keyword),
            WorkUnit::TypeCode { code, .. } => text().param("types", code),
            WorkUnit::GridCell {
                lon,
                lat,
                radius_m,
                keyword,
                ..
            } => {
                let (gcj_lon, gcj_lat) = PROFILE.projection.from_wgs84(*lon, *lat);
                let around = RequestSpec::new(AROUND_URL, PROFILE.credential_param)
                    .param("location", format!("{:.6},{:.6}", gcj_lon, gcj_lat))
                    .param("radius", radius_m);
                match keyword {
                    Some(k) => around.param("keywords", k),
                    None => around,
                }
            }
        };

        spec.param("offset", PAGE_SIZE)
            .param("page", page)
            .param("extensions", "all")
    }

    fn locate(&self, raw: &Value) -> Result<(f64, f64), DropReason> {
        // empty locations come back as "" or []
        let location = json_str(raw, "/location")
            .filter(|s| !s.trim().is_empty())
            .ok_or(DropReason::MissingCoordinates)?;
        parse_lon_lat(location).ok_or(DropReason::MalformedCoordinates)
    }

    fn default_type_codes(&self) -> &'static [(&'static str, &'static str)] {
        TYPE_CODES
    }

    /// Grid hits carry no category of their own, so Amap's
    /// `type` ("大类;中类;小类") and `typecode` are used instead.
    fn categorize(&self, raw: &Value, unit: &WorkUnit) -> (String, String) {
        let (label, id) = unit.category();
        if !matches!(unit, WorkUnit::GridCell { .. }) {
            return (label.to_string(), id.to_string());
        }

        let label = json_str(raw, "/type")
            .and_then(|t| t.split(';').map(str::trim).filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .unwrap_or_else(|| label.to_string());
        let id = json_text(raw, "/typecode").unwrap_or_else(|| id.to_string());
        (label, id)
    }
}
