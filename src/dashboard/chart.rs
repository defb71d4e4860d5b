use std::collections::BTreeMap;

use super::filters::{Axis, ColorBy};
use super::stats::Trend;
use crate::dataset::AdRecord;

const WIDTH: f64 = 860.0;
const HEIGHT: f64 = 440.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 20.0;
const MARGIN_BOTTOM: f64 = 50.0;
const TICKS: usize = 5;
const TREND_STEPS: usize = 80;
/// Above this many groups colouring is dropped and one overall trend is drawn.
const MAX_GROUPS: usize = 12;

const PALETTE: &[&str] = &[
    "#636efa", "#ef553b", "#00cc96", "#ab63fa", "#ffa15a", "#19d3f3", "#ff6692", "#b6e880",
    "#ff97ff", "#fecb52",
];
const SINGLE_COLOUR: &str = "#636efa";
const TREND_COLOUR: &str = "#1f2937";

pub struct ChartSpec {
    pub x: Axis,
    pub y: Axis,
    pub color: ColorBy,
    pub scatter: bool,
    pub degree: usize,
    pub trend: bool,
}

struct Point<'a> {
    x: f64,
    y: f64,
    ad: &'a AdRecord,
    group: Option<String>,
}

/// Pixel mapping for the plot area.
struct Frame {
    x_lo: f64,
    x_hi: f64,
    y_lo: f64,
    y_hi: f64,
}

impl Frame {
    fn plot_w() -> f64 {
        WIDTH - MARGIN_LEFT - MARGIN_RIGHT
    }

    fn plot_h() -> f64 {
        HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
    }

    fn px(&self, x: f64) -> f64 {
        MARGIN_LEFT + (x - self.x_lo) / (self.x_hi - self.x_lo) * Self::plot_w()
    }

    fn py(&self, y: f64) -> f64 {
        MARGIN_TOP + Self::plot_h() - (y - self.y_lo) / (self.y_hi - self.y_lo) * Self::plot_h()
    }
}

/// Render the filtered rows as an inline SVG scatter, with trend lines per
/// colour group (or one overall line when there are too many groups).
pub fn scatter_svg(rows: &[&AdRecord], spec: &ChartSpec) -> String {
    let mut points: Vec<Point> = rows
        .iter()
        .filter_map(|r| {
            Some(Point {
                x: spec.x.value(r)?,
                y: spec.y.value(r)?,
                ad: *r,
                group: spec.color.category(r),
            })
        })
        .collect();

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="100%" role="img">"#,
        WIDTH, HEIGHT
    );

    if points.is_empty() {
        svg.push_str(&format!(
            r##"<text x="{}" y="{}" text-anchor="middle" fill="#6b7280">No ads match the current filters</text></svg>"##,
            WIDTH / 2.0,
            HEIGHT / 2.0
        ));
        return svg;
    }

    let colours = group_colours(&points);
    if colours.is_empty() {
        for p in &mut points {
            p.group = None;
        }
    }

    let (x_lo, x_hi) = padded_range(points.iter().map(|p| p.x));
    let (y_lo, y_hi) = padded_range(points.iter().map(|p| p.y));
    let frame = Frame { x_lo, x_hi, y_lo, y_hi };

    svg.push_str(&axes(&frame, spec));

    if spec.scatter {
        for p in &points {
            let colour = p
                .group
                .as_ref()
                .and_then(|g| colours.get(g))
                .copied()
                .unwrap_or(SINGLE_COLOUR);
            svg.push_str(&format!(
                r#"<circle cx="{:.1}" cy="{:.1}" r="4" fill="{}" fill-opacity="0.75"><title>{}</title></circle>"#,
                frame.px(p.x),
                frame.py(p.y),
                colour,
                escape(&tooltip(p.ad))
            ));
        }
    }

    if spec.trend {
        let mut fitted_degree = None;
        if colours.is_empty() {
            let all: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
            if let Some(line) = trend_line(&frame, &all, spec.degree, TREND_COLOUR) {
                fitted_degree = Some(line.1);
                svg.push_str(&line.0);
            }
        } else {
            for (group, colour) in &colours {
                let pts: Vec<(f64, f64)> = points
                    .iter()
                    .filter(|p| p.group.as_ref() == Some(group))
                    .map(|p| (p.x, p.y))
                    .collect();
                if let Some(line) = trend_line(&frame, &pts, spec.degree, colour) {
                    fitted_degree = fitted_degree.max(Some(line.1));
                    svg.push_str(&line.0);
                }
            }
        }
        if let Some(degree) = fitted_degree {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-size="11" text-anchor="end" fill="{}">trend, degree {}</text>"#,
                WIDTH - MARGIN_RIGHT - 4.0,
                MARGIN_TOP + 12.0,
                TREND_COLOUR,
                degree
            ));
        }
    }

    svg.push_str(&legend(&colours));
    svg.push_str("</svg>");
    svg
}

fn axes(frame: &Frame, spec: &ChartSpec) -> String {
    let bottom = MARGIN_TOP + Frame::plot_h();
    let mut out = format!(
        r##"<g stroke="#9ca3af"><line x1="{l}" y1="{b}" x2="{r}" y2="{b}"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}"/></g>"##,
        l = MARGIN_LEFT,
        r = WIDTH - MARGIN_RIGHT,
        t = MARGIN_TOP,
        b = bottom
    );
    for i in 0..=TICKS {
        let f = i as f64 / TICKS as f64;
        let xv = frame.x_lo + f * (frame.x_hi - frame.x_lo);
        let yv = frame.y_lo + f * (frame.y_hi - frame.y_lo);
        out.push_str(&format!(
            r##"<text x="{}" y="{}" font-size="11" text-anchor="middle" fill="#374151">{}</text>"##,
            frame.px(xv),
            bottom + 16.0,
            tick_label(xv)
        ));
        out.push_str(&format!(
            r##"<text x="{}" y="{}" font-size="11" text-anchor="end" fill="#374151">{}</text>"##,
            MARGIN_LEFT - 6.0,
            frame.py(yv) + 4.0,
            tick_label(yv)
        ));
    }
    let mid_y = MARGIN_TOP + Frame::plot_h() / 2.0;
    out.push_str(&format!(
        r##"<text x="{}" y="{}" font-size="12" text-anchor="middle" fill="#111827">{}</text>"##,
        MARGIN_LEFT + Frame::plot_w() / 2.0,
        HEIGHT - 10.0,
        spec.x.label()
    ));
    out.push_str(&format!(
        r##"<text x="14" y="{y}" font-size="12" text-anchor="middle" fill="#111827" transform="rotate(-90 14 {y})">{}</text>"##,
        spec.y.label(),
        y = mid_y
    ));
    out
}

/// Polyline for the least-squares fit of `pts`, and the degree actually used.
fn trend_line(frame: &Frame, pts: &[(f64, f64)], degree: usize, colour: &str) -> Option<(String, usize)> {
    let trend = Trend::fit(pts, degree)?;
    let (lo, hi) = min_max(pts.iter().map(|p| p.0));
    let path: Vec<String> = (0..=TREND_STEPS)
        .map(|i| {
            let x = lo + (hi - lo) * i as f64 / TREND_STEPS as f64;
            let y = trend.eval(x).clamp(frame.y_lo, frame.y_hi);
            format!("{:.1},{:.1}", frame.px(x), frame.py(y))
        })
        .collect();
    let svg = format!(
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
        path.join(" "),
        colour
    );
    Some((svg, trend.degree()))
}

/// Palette colour per group, or empty when colouring is off or there are more
/// than `MAX_GROUPS` groups. The palette repeats past its length.
fn group_colours(points: &[Point]) -> BTreeMap<String, &'static str> {
    let mut groups: Vec<&String> = points.iter().filter_map(|p| p.group.as_ref()).collect();
    groups.sort();
    groups.dedup();
    if groups.len() > MAX_GROUPS {
        return BTreeMap::new();
    }
    groups
        .into_iter()
        .enumerate()
        .map(|(i, g)| (g.clone(), PALETTE[i % PALETTE.len()]))
        .collect()
}

fn legend(colours: &BTreeMap<String, &'static str>) -> String {
    colours
        .iter()
        .enumerate()
        .map(|(i, (group, colour))| {
            format!(
                r#"<text x="{}" y="{}" font-size="11" fill="{}">&#9632; {}</text>"#,
                MARGIN_LEFT + 8.0,
                MARGIN_TOP + 12.0 + 14.0 * i as f64,
                colour,
                escape(group)
            )
        })
        .collect()
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Data range with a little padding; a zero-width range is widened.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = min_max(values);
    if hi - lo < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.04;
    let floor = if lo >= 0.0 { (lo - pad).max(0.0) } else { lo - pad };
    (floor, hi + pad)
}

fn tick_label(v: f64) -> String {
    let a = v.abs();
    if a >= 1_000_000.0 {
        format!("{:.1}M", v / 1_000_000.0)
    } else if a >= 10_000.0 {
        format!("{:.0}k", v / 1_000.0)
    } else {
        format!("{:.0}", v)
    }
}

fn tooltip(r: &AdRecord) -> String {
    format!(
        "{} {} ({}) | {} km | {} kr | {}",
        r.brand.as_deref().unwrap_or("?"),
        r.model.as_deref().unwrap_or("?"),
        r.model_year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
        r.mileage,
        r.price,
        r.title
    )
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
