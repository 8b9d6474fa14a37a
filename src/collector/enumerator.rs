use anyhow::{Result, bail};

use crate::checkpoint::Checkpoint;
use crate::config::StrategyConfig;
use crate::providers::adapter::ProviderAdapter;
use crate::region::Region;
use crate::schema::WorkUnit;

/// Keyword category: (id, label, keywords).
pub type Category = (&'static str, &'static str, &'static [&'static str]);

/// Default category sweep.
pub static CATEGORIES: &[Category] = &[
    ("residential", "住宅小区", &["小区", "花园", "家园", "公寓", "名苑", "雅苑", "新村", "嘉园", "华府", "名邸", "御府", "馨园"]),
    ("commercial", "商业楼盘", &["广场", "中心", "大厦", "商厦", "写字楼", "商城", "购物中心", "步行街"]),
    ("school", "学校", &["学校", "小学", "中学", "高中", "大学", "学院", "幼儿园", "实验学校", "培训学校", "职业学校"]),
    ("hospital", "医疗", &["医院", "诊所", "卫生院", "社区卫生", "药店", "卫生室", "门诊", "急救中心"]),
    ("government", "政府", &["政府", "派出所", "公安局", "法院", "检察院", "街道办", "村委会", "居委会", "行政服务"]),
    ("transport", "交通", &["汽车站", "火车站", "公交站", "停车场", "加油站", "高速出口", "收费站", "服务区", "码头"]),
    ("business", "商业服务", &["超市", "商场", "市场", "银行", "酒店", "宾馆", "餐厅", "饭店", "便利店"]),
    ("entertainment", "休闲娱乐", &["电影院", "KTV", "游乐场", "健身房", "网吧", "咖啡厅", "酒吧", "茶馆", "棋牌室"]),
    ("nature", "自然地貌", &["湖", "河", "公园", "景区", "森林", "湿地", "水库", "风景区", "自然保护区"]),
    ("admin", "行政区划", &["镇", "乡", "村", "社区", "街道", "开发区", "高新区"]),
    ("landmark", "地标建筑", &["塔", "桥", "广场", "纪念碑", "体育馆", "图书馆", "文化馆", "博物馆", "展览馆", "剧院"]),
    ("industrial", "工业园区", &["工业园", "产业园", "开发区", "厂区", "仓库", "物流园", "科技园", "创业园", "工厂"]),
    ("agriculture", "农业设施", &["农场", "果园", "大棚", "养殖场", "农业基地", "合作社", "农庄", "采摘园"]),
    ("municipal", "市政设施", &["变电站", "水厂", "污水处理", "垃圾站", "消防站", "供电所", "自来水", "燃气站"]),
    ("public_service", "公共服务", &["社区服务中心", "便民中心", "邮局", "快递站", "电信", "移动营业厅", "联通"]),
    ("religious", "宗教场所", &["寺庙", "教堂", "道观", "祠堂", "庵", "佛寺", "清真寺"]),
];

/// The ordered list of work units of one collection.
///
/// DESIGN:
/// - Fully materialized up front (a few hundred units at most)
/// - Order depends only on configuration, provider defaults and
///   region bounds, so a checkpoint taken by one process can be
///   resumed by another
#[derive(Debug, Clone)]
pub struct WorkEnumerator {
    units: Vec<WorkUnit>,
}

impl WorkEnumerator {
    pub fn new(strategy: &StrategyConfig, adapter: &dyn ProviderAdapter, region: &Region) -> Result<Self> {
        let units = match strategy {
            StrategyConfig::Keywords { categories } => keyword_units(categories)?,
            StrategyConfig::Types { codes } => type_units(codes, adapter.default_type_codes()),
            StrategyConfig::Grid {
                step_deg,
                radius_m,
                keyword,
            } => grid_units(region, *step_deg, *radius_m, keyword.as_deref())?,
        };

        if units.is_empty() {
            bail!("[{}] {} strategy yields no work units", adapter.name(), strategy.name());
        }
        Ok(Self { units })
    }

    /// Fingerprint of everything unit ids depend on besides their own
    /// text: the region box and the sweep parameters. Two collections
    /// with the same scope enumerate the same units under the same ids.
    pub fn scope(strategy: &StrategyConfig, region: &Region) -> String {
        let b = &region.bounds;
        let base = format!(
            "{}@{}[{},{},{},{}]",
            strategy.name(),
            region.name,
            b.min_lon,
            b.min_lat,
            b.max_lon,
            b.max_lat
        );
        match strategy {
            StrategyConfig::Grid {
                step_deg,
                radius_m,
                keyword,
            } => format!(
                "{} step={} radius={} keyword={}",
                base,
                step_deg,
                radius_m,
                keyword.as_deref().unwrap_or("")
            ),
            _ => base,
        }
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn position(&self, unit_id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id() == unit_id)
    }

    /// The unit following `after`, or the first unit when `after` is
    /// `None`. An unknown id yields `None`.
    pub fn next_unit(&self, after: Option<&str>) -> Option<&WorkUnit> {
        match after {
            None => self.units.first(),
            Some(id) => self.position(id).and_then(|i| self.units.get(i + 1)),
        }
    }

    /// Where a collection continues: (unit index, 1-based page).
    ///
    /// The checkpoint's in-progress unit wins if it is still part of the
    /// enumeration and not finished; otherwise the first unit not yet
    /// completed starts at page 1. `None` means nothing is left.
    pub fn resume_point(&self, checkpoint: &Checkpoint) -> Option<(usize, u32)> {
        if let Some(current) = checkpoint.current_unit.as_deref() {
            if !checkpoint.is_completed(current) {
                if let Some(index) = self.position(current) {
                    return Some((index, checkpoint.current_page.max(1)));
                }
            }
        }

        self.units
            .iter()
            .position(|u| !checkpoint.is_completed(&u.id()))
            .map(|index| (index, 1))
    }
}

fn keyword_units(selected: &[String]) -> Result<Vec<WorkUnit>> {
    for id in selected {
        if !CATEGORIES.iter().any(|(cid, ..)| cid == id) {
            bail!("unknown keyword category '{}'", id);
        }
    }

    let units = CATEGORIES
        .iter()
        .filter(|(id, ..)| selected.is_empty() || selected.iter().any(|s| s == id))
        .flat_map(|(id, label, keywords)| {
            keywords.iter().map(move |kw| WorkUnit::Keyword {
                category_id: id.to_string(),
                category: label.to_string(),
                keyword: kw.to_string(),
            })
        })
        .collect();
    Ok(units)
}

/// Configured codes keep their provider label when one is known.
fn type_units(codes: &[String], defaults: &[(&str, &str)]) -> Vec<WorkUnit> {
    if codes.is_empty() {
        return defaults
            .iter()
            .map(|(code, label)| WorkUnit::TypeCode {
                code: code.to_string(),
                label: label.to_string(),
            })
            .collect();
    }

    codes
        .iter()
        .map(|code| {
            let label = defaults
                .iter()
                .find(|(c, _)| c == code)
                .map_or(code.as_str(), |(_, l)| *l);
            WorkUnit::TypeCode {
                code: code.clone(),
                label: label.to_string(),
            }
        })
        .collect()
}

// ------------------------------------------------------------
// Grid
// ------------------------------------------------------------
//
// Cells start at the region's south-west corner and are emitted
// longitude-major: for each column, every row south to north.
// A cell is emitted while its lower edge is inside the bounds, so
// the last column/row may overhang the region.
//
fn grid_units(region: &Region, step: f64, radius_m: u32, keyword: Option<&str>) -> Result<Vec<WorkUnit>> {
    if !(step > 0.0) || !step.is_finite() {
        bail!("grid step must be a positive number of degrees");
    }

    let b = &region.bounds;
    let columns = steps_below(b.min_lon, b.max_lon, step);
    let rows = steps_below(b.min_lat, b.max_lat, step);
    let half = step / 2.0;

    let mut units = Vec::with_capacity(columns * rows);
    for i in 0..columns {
        for j in 0..rows {
            units.push(WorkUnit::GridCell {
                index: units.len(),
                lon: b.min_lon + i as f64 * step + half,
                lat: b.min_lat + j as f64 * step + half,
                half_step: half,
                radius_m,
                keyword: keyword.map(str::to_string),
            });
        }
    }
    Ok(units)
}

/// Number of `k ≥ 0` with `min + k·step < max`, ignoring float noise
/// at the upper edge.
fn steps_below(min: f64, max: f64, step: f64) -> usize {
    const EPS: f64 = 1e-9;
    let mut n = 0usize;
    while min + n as f64 * step < max - EPS {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointKey;
    use crate::providers::get_adapter;
    use crate::region;

    fn enumerator(strategy: StrategyConfig, provider: &str) -> WorkEnumerator {
        let region = region::preset("funing").unwrap();
        WorkEnumerator::new(&strategy, get_adapter(provider).unwrap().as_ref(), &region).unwrap()
    }

    #[test]
    fn keyword_sweep_is_category_major() {
        let all = enumerator(StrategyConfig::default(), "amap");
        let expected: usize = CATEGORIES.iter().map(|(_, _, k)| k.len()).sum();
        assert_eq!(all.len(), expected);
        assert_eq!(all.units()[0].id(), "kw:residential:小区");
        assert_eq!(all.next_unit(Some("kw:residential:馨园")).unwrap().id(), "kw:commercial:广场");

        let narrowed = enumerator(
            StrategyConfig::Keywords {
                categories: vec!["school".into(), "hospital".into()],
            },
            "amap",
        );
        assert_eq!(narrowed.len(), 18);
        assert_eq!(narrowed.next_unit(None).unwrap().id(), "kw:school:学校");
    }

    #[test]
    fn unknown_category_is_rejected() {
        let region = region::preset("funing").unwrap();
        let strategy = StrategyConfig::Keywords {
            categories: vec!["casino".into()],
        };
        assert!(WorkEnumerator::new(&strategy, get_adapter("baidu").unwrap().as_ref(), &region).is_err());
    }

    #[test]
    fn type_sweep_uses_provider_defaults() {
        let types = enumerator(StrategyConfig::Types { codes: vec![] }, "tianditu");
        assert_eq!(types.len(), 17);
        assert_eq!(types.units()[0].id(), "type:010");

        let picked = enumerator(
            StrategyConfig::Types {
                codes: vec!["141200".into(), "999999".into()],
            },
            "amap",
        );
        assert_eq!(
            picked.units()[0],
            WorkUnit::TypeCode { code: "141200".into(), label: "学校".into() }
        );
        assert_eq!(
            picked.units()[1],
            WorkUnit::TypeCode { code: "999999".into(), label: "999999".into() }
        );
    }

    #[test]
    fn grid_is_longitude_major_and_covers_bounds() {
        let grid = enumerator(
            StrategyConfig::Grid { step_deg: 0.1, radius_m: 1500, keyword: None },
            "baidu",
        );
        // funing spans 0.5° × 0.5°
        assert_eq!(grid.len(), 25);

        let WorkUnit::GridCell { index, lon, lat, half_step, .. } = &grid.units()[1] else {
            panic!("expected a grid cell");
        };
        assert_eq!(*index, 1);
        assert!((lon - 119.50).abs() < 1e-9);
        assert!((lat - 33.70).abs() < 1e-9);
        assert!((half_step - 0.05).abs() < 1e-12);

        let ids: Vec<String> = grid.units().iter().map(WorkUnit::id).collect();
        assert_eq!(ids.last().unwrap(), "grid:24");
        assert!(grid.units().iter().all(|u| !u.is_paged()));
    }

    #[test]
    fn scope_changes_with_region_and_grid_step() {
        let funing = region::preset("funing").unwrap();
        let sheyang = region::preset("sheyang").unwrap();
        let keywords = StrategyConfig::default();
        let grid = |step_deg| StrategyConfig::Grid { step_deg, radius_m: 1500, keyword: None };

        assert_eq!(
            WorkEnumerator::scope(&keywords, &funing),
            WorkEnumerator::scope(&keywords, &funing.clone())
        );
        assert_ne!(
            WorkEnumerator::scope(&keywords, &funing),
            WorkEnumerator::scope(&keywords, &sheyang)
        );
        assert_ne!(
            WorkEnumerator::scope(&grid(0.02), &funing),
            WorkEnumerator::scope(&grid(0.05), &funing)
        );

        let mut moved = funing.clone();
        moved.bounds.max_lat += 0.1;
        assert_ne!(
            WorkEnumerator::scope(&keywords, &funing),
            WorkEnumerator::scope(&keywords, &moved)
        );
    }

    #[test]
    fn resume_point_prefers_cursor_then_first_open_unit() {
        let e = enumerator(StrategyConfig::Types { codes: vec![] }, "baidu");
        let mut cp = Checkpoint::new(&CheckpointKey::new("baidu", "types"));
        assert_eq!(e.resume_point(&cp), Some((0, 1)));

        cp.current_unit = Some("type:酒店".into());
        cp.current_page = 3;
        cp.completed_units = vec!["type:美食".into()];
        assert_eq!(e.resume_point(&cp), Some((1, 3)));

        // cursor points at a unit that is gone from the enumeration
        cp.current_unit = Some("type:不存在".into());
        assert_eq!(e.resume_point(&cp), Some((1, 1)));

        cp.completed_units = e.units().iter().map(WorkUnit::id).collect();
        assert_eq!(e.resume_point(&cp), None);
    }
}
