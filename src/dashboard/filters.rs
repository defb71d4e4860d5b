use std::collections::BTreeSet;

use crate::dataset::AdRecord;

pub const SAFETY_BADGES: &[&str] = &[
    "Service",
    "Medlem",
    "Bruktbilgaranti",
    "Bytterett",
    "Programbil",
    "Garanti",
    "Tilstand",
];

const FALLBACK_YEAR_MIN: i64 = 2015;
const FALLBACK_KM: Bounds = Bounds { min: 0, max: 300_000 };
const FALLBACK_PRICE: Bounds = Bounds { min: 0, max: 1_000_000 };
const MAX_DEGREE: usize = 5;

/// Inclusive numeric range behind a slider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

impl Bounds {
    /// Min/max of `values`, or `fallback` when there are none.
    pub fn of(values: impl Iterator<Item = i64>, fallback: Bounds) -> Bounds {
        values
            .fold(None, |acc: Option<Bounds>, v| {
                Some(match acc {
                    None => Bounds { min: v, max: v },
                    Some(b) => Bounds {
                        min: b.min.min(v),
                        max: b.max.max(v),
                    },
                })
            })
            .unwrap_or(fallback)
    }

    /// A single-value range; the widget is shown disabled.
    pub fn is_degenerate(&self) -> bool {
        self.min >= self.max
    }

    pub fn contains(&self, v: i64) -> bool {
        self.min <= v && v <= self.max
    }

    /// Clamp a user selection into these bounds; an inverted pair is swapped.
    pub fn select(&self, lo: Option<i64>, hi: Option<i64>) -> Bounds {
        let lo = lo.unwrap_or(self.min).clamp(self.min, self.max);
        let hi = hi.unwrap_or(self.max).clamp(self.min, self.max);
        Bounds {
            min: lo.min(hi),
            max: lo.max(hi),
        }
    }
}

/// Widget bounds and choices, computed once from the full dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Widgets {
    pub year: Bounds,
    pub km: Bounds,
    pub price: Bounds,
    pub brands: Vec<String>,
    pub drivetrains: Vec<String>,
}

impl Widgets {
    pub fn from_records(records: &[AdRecord], current_year: i32) -> Self {
        let year_fallback = Bounds {
            min: FALLBACK_YEAR_MIN,
            max: i64::from(current_year).max(FALLBACK_YEAR_MIN),
        };
        Self {
            year: Bounds::of(records.iter().filter_map(|r| r.model_year.map(i64::from)), year_fallback),
            km: Bounds::of(records.iter().map(|r| r.mileage), FALLBACK_KM),
            price: Bounds::of(records.iter().map(|r| r.price), FALLBACK_PRICE),
            brands: distinct(records.iter().filter_map(|r| r.brand.as_deref())),
            drivetrains: distinct(records.iter().filter_map(|r| r.drivetrain.as_deref())),
        }
    }
}

/// Models on offer, narrowed to the selected brands.
pub fn models_for(records: &[AdRecord], brands: &[String]) -> Vec<String> {
    distinct(
        records
            .iter()
            .filter(|r| brands.is_empty() || r.brand.as_ref().is_some_and(|b| brands.contains(b)))
            .filter_map(|r| r.model.as_deref()),
    )
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Leasing {
    #[default]
    Any,
    Only,
    Exclude,
}

impl Leasing {
    pub const ALL: [Leasing; 3] = [Leasing::Any, Leasing::Only, Leasing::Exclude];

    pub fn key(&self) -> &'static str {
        match self {
            Leasing::Any => "any",
            Leasing::Only => "only",
            Leasing::Exclude => "exclude",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Leasing::Any => "All ads",
            Leasing::Only => "Leasing only",
            Leasing::Exclude => "No leasing",
        }
    }

    fn parse(s: &str) -> Self {
        Self::ALL.into_iter().find(|l| l.key() == s).unwrap_or_default()
    }

    fn accepts(&self, is_leasing: bool) -> bool {
        match self {
            Leasing::Any => true,
            Leasing::Only => is_leasing,
            Leasing::Exclude => !is_leasing,
        }
    }
}

/// Numeric columns that can go on a chart axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Mileage,
    Price,
    ModelYear,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Mileage, Axis::Price, Axis::ModelYear];

    pub fn key(&self) -> &'static str {
        match self {
            Axis::Mileage => "mileage",
            Axis::Price => "price",
            Axis::ModelYear => "model_year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Axis::Mileage => "Kilometer",
            Axis::Price => "Price (NOK)",
            Axis::ModelYear => "Model year",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.key() == s)
    }

    pub fn value(&self, r: &AdRecord) -> Option<f64> {
        match self {
            Axis::Mileage => Some(r.mileage as f64),
            Axis::Price => Some(r.price as f64),
            Axis::ModelYear => r.model_year.map(f64::from),
        }
    }
}

/// Column that splits the chart into coloured groups, each with its own trend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ColorBy {
    None,
    #[default]
    Brand,
    Model,
    ModelYear,
    Drivetrain,
    Leasing,
}

impl ColorBy {
    pub const ALL: [ColorBy; 6] = [
        ColorBy::None,
        ColorBy::Brand,
        ColorBy::Model,
        ColorBy::ModelYear,
        ColorBy::Drivetrain,
        ColorBy::Leasing,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ColorBy::None => "none",
            ColorBy::Brand => "brand",
            ColorBy::Model => "model",
            ColorBy::ModelYear => "model_year",
            ColorBy::Drivetrain => "drivetrain",
            ColorBy::Leasing => "is_leasing",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ColorBy::None => "Nothing",
            ColorBy::Brand => "Brand",
            ColorBy::Model => "Model",
            ColorBy::ModelYear => "Model year",
            ColorBy::Drivetrain => "Drivetrain",
            ColorBy::Leasing => "Leasing",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == s)
    }

    /// Group label of a row; `None` when colouring is off. Missing values form
    /// their own "Unknown" group.
    pub fn category(&self, r: &AdRecord) -> Option<String> {
        let value = match self {
            ColorBy::None => return None,
            ColorBy::Brand => r.brand.clone(),
            ColorBy::Model => r.model.clone(),
            ColorBy::ModelYear => r.model_year.map(|y| y.to_string()),
            ColorBy::Drivetrain => r.drivetrain.clone(),
            ColorBy::Leasing => Some(if r.is_leasing { "Leasing" } else { "Sale" }.to_string()),
        };
        Some(value.unwrap_or_else(|| "Unknown".to_string()))
    }
}

/// Everything the sidebar form can submit.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub km_min: Option<i64>,
    pub km_max: Option<i64>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub drivetrains: Vec<String>,
    pub safety: Vec<String>,
    pub leasing: Leasing,
    pub x: Axis,
    pub y: Axis,
    pub color: ColorBy,
    pub scatter: bool,
    pub degree: usize,
    pub trend: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            year_min: None,
            year_max: None,
            km_min: None,
            km_max: None,
            price_min: None,
            price_max: None,
            brands: Vec::new(),
            models: Vec::new(),
            drivetrains: Vec::new(),
            safety: Vec::new(),
            leasing: Leasing::Any,
            x: Axis::Mileage,
            y: Axis::Price,
            color: ColorBy::Brand,
            scatter: true,
            degree: 1,
            trend: true,
        }
    }
}

impl FilterParams {
    /// Build from a raw query string. Unknown keys and unparseable numbers are
    /// ignored. `apply` marks a submitted form, where an absent `trend` or
    /// `scatter` checkbox means off.
    pub fn from_query(query: &str) -> Self {
        let mut p = FilterParams::default();
        let mut submitted = false;
        let mut trend = false;
        let mut scatter = false;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            let num = || value.parse::<i64>().ok();
            match key.as_ref() {
                "year_min" => p.year_min = num(),
                "year_max" => p.year_max = num(),
                "km_min" => p.km_min = num(),
                "km_max" => p.km_max = num(),
                "price_min" => p.price_min = num(),
                "price_max" => p.price_max = num(),
                "brand" if !value.is_empty() => p.brands.push(value.to_string()),
                "model" if !value.is_empty() => p.models.push(value.to_string()),
                "drivetrain" if !value.is_empty() => p.drivetrains.push(value.to_string()),
                "safety" if !value.is_empty() => p.safety.push(value.to_string()),
                "leasing" => p.leasing = Leasing::parse(value),
                "x" => p.x = Axis::parse(value).unwrap_or(p.x),
                "y" => p.y = Axis::parse(value).unwrap_or(p.y),
                "color" => p.color = ColorBy::parse(value).unwrap_or(p.color),
                "degree" => {
                    p.degree = value.parse::<usize>().unwrap_or(1).clamp(1, MAX_DEGREE)
                }
                "trend" => trend = true,
                "scatter" => scatter = true,
                "apply" => submitted = true,
                _ => {}
            }
        }

        if submitted {
            p.trend = trend;
            p.scatter = scatter;
        }
        p
    }
}

/// Keep the rows matching every active filter.
pub fn apply<'a>(records: &'a [AdRecord], p: &FilterParams, w: &Widgets) -> Vec<&'a AdRecord> {
    let year = w.year.select(p.year_min, p.year_max);
    let km = w.km.select(p.km_min, p.km_max);
    let price = w.price.select(p.price_min, p.price_max);
    // Ads without a model year are only hidden once the year range is narrowed.
    let full_years = year == w.year;

    records
        .iter()
        .filter(|r| match r.model_year {
            Some(y) => year.contains(i64::from(y)),
            None => full_years,
        })
        .filter(|r| km.contains(r.mileage) && price.contains(r.price))
        .filter(|r| matches_any(&p.brands, r.brand.as_deref()))
        .filter(|r| matches_any(&p.models, r.model.as_deref()))
        .filter(|r| matches_any(&p.drivetrains, r.drivetrain.as_deref()))
        .filter(|r| p.leasing.accepts(r.is_leasing))
        .filter(|r| {
            p.safety.is_empty()
                || r.safety_elements
                    .as_ref()
                    .is_some_and(|have| p.safety.iter().all(|s| have.contains(s)))
        })
        .collect()
}

/// An empty selection lets everything through.
fn matches_any(selected: &[String], value: Option<&str>) -> bool {
    selected.is_empty() || value.is_some_and(|v| selected.iter().any(|s| s == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::sample;

    fn records() -> Vec<AdRecord> {
        let mut a = sample(1, "Tesla", "Model 3", Some(2021), 40_000, 320_000);
        a.safety_elements = Some(vec!["Service".into(), "Garanti".into()]);
        a.drivetrain = Some("Firehjulsdrift".into());
        let mut b = sample(2, "Hyundai", "IONIQ 5", Some(2023), 10_000, 480_000);
        b.is_leasing = true;
        b.safety_elements = Some(vec!["Service".into()]);
        let c = sample(3, "Tesla", "Model Y", None, 90_000, 250_000);
        vec![a, b, c]
    }

    #[test]
    fn bounds_fall_back_when_empty() {
        let w = Widgets::from_records(&[], 2026);
        assert_eq!(w.year, Bounds { min: 2015, max: 2026 });
        assert_eq!(w.km, Bounds { min: 0, max: 300_000 });
        assert_eq!(w.price, Bounds { min: 0, max: 1_000_000 });
        assert!(w.brands.is_empty());
    }

    #[test]
    fn single_row_gives_degenerate_bounds() {
        let w = Widgets::from_records(&records()[..1], 2026);
        assert!(w.km.is_degenerate());
        assert!(w.price.is_degenerate());
        assert_eq!(w.year, Bounds { min: 2021, max: 2021 });
    }

    #[test]
    fn select_clamps_and_swaps() {
        let b = Bounds { min: 0, max: 100 };
        assert_eq!(b.select(None, None), b);
        assert_eq!(b.select(Some(-5), Some(500)), b);
        assert_eq!(b.select(Some(80), Some(20)), Bounds { min: 20, max: 80 });
    }

    #[test]
    fn parse_query() {
        let p = FilterParams::from_query(
            "km_min=1000&km_max=abc&brand=Tesla&brand=Hyundai&model=&leasing=only&x=model_year&degree=9&apply=1",
        );
        assert_eq!(p.km_min, Some(1000));
        assert_eq!(p.km_max, None);
        assert_eq!(p.brands, vec!["Tesla", "Hyundai"]);
        assert!(p.models.is_empty());
        assert_eq!(p.leasing, Leasing::Only);
        assert_eq!(p.x, Axis::ModelYear);
        assert_eq!(p.y, Axis::Price);
        assert_eq!(p.degree, 5);
        assert!(!p.trend);
        assert!(!p.scatter);
        assert_eq!(p.color, ColorBy::Brand);

        let p = FilterParams::from_query("");
        assert!(p.trend && p.scatter);
        let p = FilterParams::from_query("color=drivetrain&scatter=on&apply=1");
        assert_eq!(p.color, ColorBy::Drivetrain);
        assert!(p.scatter);
        assert_eq!(FilterParams::from_query("color=price").color, ColorBy::Brand);
    }

    #[test]
    fn default_params_keep_everything() {
        let rs = records();
        let w = Widgets::from_records(&rs, 2026);
        assert_eq!(apply(&rs, &FilterParams::default(), &w).len(), 3);
    }

    #[test]
    fn narrowed_year_hides_unknown_years() {
        let rs = records();
        let w = Widgets::from_records(&rs, 2026);
        let p = FilterParams::from_query("year_min=2022");
        let ids: Vec<u64> = apply(&rs, &p, &w).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn categorical_filters() {
        let rs = records();
        let w = Widgets::from_records(&rs, 2026);

        let ids = |q: &str| -> Vec<u64> {
            apply(&rs, &FilterParams::from_query(q), &w).iter().map(|r| r.id).collect()
        };
        assert_eq!(ids("brand=Tesla"), vec![1, 3]);
        assert_eq!(ids("brand=Tesla&model=Model+Y"), vec![3]);
        assert_eq!(ids("drivetrain=Firehjulsdrift"), vec![1]);
        assert_eq!(ids("leasing=exclude"), vec![1, 3]);
        assert_eq!(ids("safety=Service"), vec![1, 2]);
        assert_eq!(ids("safety=Service&safety=Garanti"), vec![1]);
        assert_eq!(ids("price_max=300000"), vec![3]);
        assert!(ids("brand=Polestar").is_empty());
    }

    #[test]
    fn models_follow_brand_selection() {
        let rs = records();
        assert_eq!(models_for(&rs, &["Tesla".to_string()]), vec!["Model 3", "Model Y"]);
        assert_eq!(models_for(&rs, &[]).len(), 3);
    }

    #[test]
    fn colour_categories() {
        let rs = records();
        assert_eq!(ColorBy::None.category(&rs[0]), None);
        assert_eq!(ColorBy::Brand.category(&rs[1]).as_deref(), Some("Hyundai"));
        assert_eq!(ColorBy::ModelYear.category(&rs[2]).as_deref(), Some("Unknown"));
        assert_eq!(ColorBy::Drivetrain.category(&rs[0]).as_deref(), Some("Firehjulsdrift"));
        assert_eq!(ColorBy::Leasing.category(&rs[1]).as_deref(), Some("Leasing"));
    }
}
