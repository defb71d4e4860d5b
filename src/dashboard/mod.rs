//! Read-only web dashboard over the extracted dataset.
//!
//! | Method | Path      | Description                                  |
//! |--------|-----------|----------------------------------------------|
//! | `GET`  | `/`       | Filters, summary statistics, chart and table |
//! | `GET`  | `/health` | `{"status":"ok","rows":N}`                   |

pub mod chart;
pub mod filters;
pub mod stats;

use std::net::SocketAddr;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Datelike;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::AdRecord;
use chart::ChartSpec;
use filters::{Axis, Bounds, ColorBy, FilterParams, Leasing, Widgets, SAFETY_BADGES};
use stats::Spread;

#[derive(Clone)]
struct AppState {
    records: Arc<Vec<AdRecord>>,
    widgets: Arc<Widgets>,
}

pub fn router(records: Vec<AdRecord>, current_year: i32) -> Router {
    let widgets = Widgets::from_records(&records, current_year);
    let state = AppState {
        records: Arc::new(records),
        widgets: Arc::new(widgets),
    };
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the dashboard on localhost until the process is stopped.
pub async fn serve(records: Vec<AdRecord>, port: u16) -> anyhow::Result<()> {
    let rows = records.len();
    let app = router(records, chrono::Local::now().year());
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard loaded {} ads", rows);
    println!("Dashboard listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ──

async fn index(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let params = FilterParams::from_query(query.as_deref().unwrap_or(""));
    match render_page(&state.records, &state.widgets, &params) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Failed to render dashboard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render dashboard").into_response()
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rows: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rows: state.records.len(),
    })
}

// ── Page ──

struct RangeView {
    label: &'static str,
    key: &'static str,
    min: i64,
    max: i64,
    lo: i64,
    hi: i64,
    disabled: bool,
}

impl RangeView {
    /// With no data the fallback bounds are shown but the inputs are disabled.
    fn new(label: &'static str, key: &'static str, full: Bounds, chosen: Bounds, empty: bool) -> Self {
        Self {
            label,
            key,
            min: full.min,
            max: full.max,
            lo: chosen.min,
            hi: chosen.max,
            disabled: empty || full.is_degenerate(),
        }
    }
}

struct OptionView {
    value: String,
    label: String,
    selected: bool,
}

struct ChoiceView {
    label: &'static str,
    key: &'static str,
    options: Vec<OptionView>,
}

impl ChoiceView {
    fn new(label: &'static str, key: &'static str, values: &[String], selected: &[String]) -> Self {
        Self {
            label,
            key,
            options: values
                .iter()
                .map(|v| OptionView {
                    value: v.clone(),
                    label: v.clone(),
                    selected: selected.contains(v),
                })
                .collect(),
        }
    }
}

struct StatRow {
    label: &'static str,
    min: String,
    mean: String,
    median: String,
    max: String,
}

impl StatRow {
    fn new(label: &'static str, spread: Option<Spread>, grouped: bool) -> Self {
        let cell = |pick: fn(&Spread) -> f64| match spread {
            Some(s) if grouped => group_digits(pick(&s).round() as i64),
            Some(s) => format!("{:.0}", pick(&s)),
            None => "-".to_string(),
        };
        Self {
            label,
            min: cell(|s| s.min),
            mean: cell(|s| s.mean),
            median: cell(|s| s.median),
            max: cell(|s| s.max),
        }
    }
}

struct BrandCount {
    brand: String,
    ads: usize,
}

struct RowView {
    brand: String,
    model: String,
    year: String,
    mileage: String,
    price: String,
    title: String,
    drivetrain: String,
    badges: String,
    link: String,
}

impl RowView {
    fn new(r: &AdRecord) -> Self {
        Self {
            brand: r.brand.clone().unwrap_or_default(),
            model: r.model.clone().unwrap_or_default(),
            year: r.model_year.map(|y| y.to_string()).unwrap_or_default(),
            mileage: group_digits(r.mileage),
            price: group_digits(r.price),
            title: r.title.clone(),
            drivetrain: r.drivetrain.clone().unwrap_or_default(),
            badges: r.safety_elements.as_deref().map(|b| b.join(", ")).unwrap_or_default(),
            link: r.link.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    total: usize,
    count: usize,
    ranges: Vec<RangeView>,
    choices: Vec<ChoiceView>,
    leasing: Vec<OptionView>,
    x_axes: Vec<OptionView>,
    y_axes: Vec<OptionView>,
    colors: Vec<OptionView>,
    scatter: bool,
    degree: usize,
    trend: bool,
    stat_rows: Vec<StatRow>,
    brand_counts: Vec<BrandCount>,
    chart_svg: String,
    rows: Vec<RowView>,
}

fn axis_options(chosen: Axis) -> Vec<OptionView> {
    Axis::ALL
        .iter()
        .map(|a| OptionView {
            value: a.key().to_string(),
            label: a.label().to_string(),
            selected: *a == chosen,
        })
        .collect()
}

fn color_options(chosen: ColorBy) -> Vec<OptionView> {
    ColorBy::ALL
        .iter()
        .map(|c| OptionView {
            value: c.key().to_string(),
            label: c.label().to_string(),
            selected: *c == chosen,
        })
        .collect()
}

fn render_page(records: &[AdRecord], widgets: &Widgets, params: &FilterParams) -> askama::Result<String> {
    let rows = filters::apply(records, params, widgets);
    let summary = stats::summarize(&rows);
    let safety: Vec<String> = SAFETY_BADGES.iter().map(|s| s.to_string()).collect();
    let no_data = records.is_empty();

    let page = DashboardTemplate {
        total: records.len(),
        count: summary.count,
        ranges: vec![
            RangeView::new(
                "Model year",
                "year",
                widgets.year,
                widgets.year.select(params.year_min, params.year_max),
                no_data,
            ),
            RangeView::new(
                "Kilometer",
                "km",
                widgets.km,
                widgets.km.select(params.km_min, params.km_max),
                no_data,
            ),
            RangeView::new(
                "Price (NOK)",
                "price",
                widgets.price,
                widgets.price.select(params.price_min, params.price_max),
                no_data,
            ),
        ],
        choices: vec![
            ChoiceView::new("Brand", "brand", &widgets.brands, &params.brands),
            ChoiceView::new("Model", "model", &filters::models_for(records, &params.brands), &params.models),
            ChoiceView::new("Drivetrain", "drivetrain", &widgets.drivetrains, &params.drivetrains),
            ChoiceView::new("Safety badges", "safety", &safety, &params.safety),
        ],
        leasing: Leasing::ALL
            .iter()
            .map(|l| OptionView {
                value: l.key().to_string(),
                label: l.label().to_string(),
                selected: *l == params.leasing,
            })
            .collect(),
        x_axes: axis_options(params.x),
        y_axes: axis_options(params.y),
        colors: color_options(params.color),
        scatter: params.scatter,
        degree: params.degree,
        trend: params.trend,
        stat_rows: vec![
            StatRow::new("Price (NOK)", summary.price, true),
            StatRow::new("Kilometer", summary.mileage, true),
            StatRow::new("Model year", summary.model_year, false),
        ],
        brand_counts: summary
            .brands
            .into_iter()
            .map(|(brand, ads)| BrandCount { brand, ads })
            .collect(),
        chart_svg: chart::scatter_svg(
            &rows,
            &ChartSpec {
                x: params.x,
                y: params.y,
                color: params.color,
                scatter: params.scatter,
                degree: params.degree,
                trend: params.trend,
            },
        ),
        rows: rows.iter().map(|r| RowView::new(r)).collect(),
    };
    page.render()
}

/// 459900 -> "459 900"
fn group_digits(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
