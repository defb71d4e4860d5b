pub mod markup;
pub mod payload;

use indicatif::{ProgressBar, ProgressStyle};
use scraper::Html;
use serde_json::Value;
use tracing::debug;

use crate::dataset::{AdRecord, Source};
use crate::store::RawAd;

pub type Strategy = fn(u64, &Html) -> Option<AdRecord>;

/// Tried in order; the first strategy that yields a record wins.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("payload", payload::extract as Strategy),
    ("markup", markup::extract as Strategy),
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractStats {
    pub read: usize,
    pub payload: usize,
    pub markup: usize,
    pub dropped: usize,
}

impl ExtractStats {
    pub fn print(&self) {
        println!(
            "Extracted {} of {} ads ({} payload, {} markup, {} dropped).",
            self.payload + self.markup,
            self.read,
            self.payload,
            self.markup,
            self.dropped,
        );
    }
}

/// Turn one raw page into a record, or `None` when no strategy can read it.
/// Optional fields the payload leaves out are taken from the markup.
pub fn extract_ad(raw: &RawAd) -> Option<AdRecord> {
    let doc = Html::parse_document(&raw.body);
    let mut record = STRATEGIES.iter().find_map(|(name, strategy)| {
        let record = strategy(raw.code, &doc);
        if record.is_none() {
            debug!("{}: {} strategy found nothing", raw.code, name);
        }
        record
    })?;
    if record.source == Source::Payload {
        markup::fill_gaps(&mut record, &doc);
    }
    Some(record)
}

/// Extract every raw page, keeping input order. Unreadable pages are dropped.
pub fn extract_all(raws: &[RawAd]) -> Result<(Vec<AdRecord>, ExtractStats), indicatif::style::TemplateError> {
    let pb = ProgressBar::new(raws.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut stats = ExtractStats {
        read: raws.len(),
        ..ExtractStats::default()
    };
    let mut records = Vec::with_capacity(raws.len());

    for raw in raws {
        match extract_ad(raw) {
            Some(record) => {
                match record.source {
                    Source::Payload => stats.payload += 1,
                    Source::Markup => stats.markup += 1,
                }
                records.push(record);
            }
            None => {
                debug!("{}: dropped, no strategy could parse it", raw.code);
                stats.dropped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok((records, stats))
}

/// "23 500 km", "459 900 kr", "99 000,-" -> integer.
pub fn parse_number(text: &str) -> Option<i64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .trim_end_matches(",-")
        .trim_end_matches("km")
        .trim_end_matches("kr")
        .parse()
        .ok()
}

/// JSON numbers, or strings holding a formatted number.
pub(crate) fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

// ── Tests ──
