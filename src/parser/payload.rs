use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::as_int;
use crate::dataset::{AdRecord, Source};

const MOBILITY_LINK: &str = "https://www.finn.no/mobility/item/";

static PROPS_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[data-props]").unwrap());

/// Safety badge keys used by the payload, mapped to the labels shown on the page.
const SAFETY_LABELS: &[(&str, &str)] = &[
    ("serviceTab", "Service"),
    ("membershipTab", "Medlem"),
    ("usedCarWarrantyTab", "Bruktbilgaranti"),
    ("exchangeRightTab", "Bytterett"),
    ("programCarTab", "Programbil"),
    ("warrantyTab", "Garanti"),
    ("conditionReportTab", "Tilstand"),
];

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no element with a data-props attribute")]
    Missing,
    #[error("data-props is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded data-props is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("percent-decoded data-props is not utf-8: {0}")]
    PercentUtf8(#[from] std::str::Utf8Error),
    #[error("data-props is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no adData.ad object")]
    NoAd,
    #[error("payload is missing {0}")]
    MissingField(&'static str),
}

/// Primary strategy: read the ad from the embedded `data-props` payload.
pub fn extract(code: u64, doc: &Html) -> Option<AdRecord> {
    match decode_props(doc).and_then(|payload| parse(code, &payload)) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!("{}: payload unusable: {}", code, e);
            None
        }
    }
}

/// Locate the first `data-props` attribute and decode it into JSON.
pub fn decode_props(doc: &Html) -> Result<Value, PayloadError> {
    let raw = doc
        .select(&PROPS_SEL)
        .find_map(|el| el.value().attr("data-props"))
        .filter(|v| !v.trim().is_empty())
        .ok_or(PayloadError::Missing)?;
    decode_props_value(raw)
}

/// base64 → utf-8 → percent-decode → json
pub fn decode_props_value(raw: &str) -> Result<Value, PayloadError> {
    let bytes = STANDARD.decode(raw.trim())?;
    let text = String::from_utf8(bytes)?;
    let unquoted = percent_decode_str(&text).decode_utf8()?;
    Ok(serde_json::from_str(&unquoted)?)
}

pub fn parse(code: u64, payload: &Value) -> Result<AdRecord, PayloadError> {
    let ad = &payload["adData"]["ad"];
    if !ad.is_object() {
        return Err(PayloadError::NoAd);
    }

    let title = non_empty(&ad["title"]).ok_or(PayloadError::MissingField("title"))?;
    let mileage = as_int(&ad["mileage"]).ok_or(PayloadError::MissingField("mileage"))?;
    let price = parse_price(ad).ok_or(PayloadError::MissingField("price"))?;

    let model_make = &ad["model_and_make"];
    let link = non_empty(&payload["canonicalUrl"])
        .or_else(|| non_empty(&ad["canonical_url"]))
        .unwrap_or_else(|| format!("{}{}", MOBILITY_LINK, code));

    Ok(AdRecord {
        id: code,
        title,
        brand: non_empty(&model_make["parent"]["value"]),
        model: non_empty(&model_make["value"]),
        model_year: as_int(&ad["year"]).and_then(|y| i32::try_from(y).ok()),
        mileage,
        price,
        drivetrain: value_or_str(&ad["wheel_drive"]),
        is_leasing: is_leasing(ad),
        safety_elements: normalize_safety_elements(&payload["safetyElements"]),
        link,
        source: Source::Payload,
    })
}

fn parse_price(ad: &Value) -> Option<i64> {
    let price = &ad["price"];
    as_int(&price["total"]).or_else(|| as_int(&price["main"]))
}

fn is_leasing(ad: &Value) -> bool {
    let sales_form = value_or_str(&ad["sales_form"]).unwrap_or_default();
    if sales_form.to_lowercase().contains("leasing") {
        return true;
    }
    ad["price_specification"]
        .as_array()
        .is_some_and(|items| items.iter().any(|i| i["type"] == "MONTHLY_PAYMENT"))
}

pub fn normalize_safety_elements(raw: &Value) -> Option<Vec<String>> {
    let items = raw.as_array().filter(|a| !a.is_empty())?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|key| {
                SAFETY_LABELS
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, label)| label.to_string())
                    .unwrap_or_else(|| key.to_string())
            })
            .collect(),
    )
}

fn non_empty(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fields like `wheel_drive` show up either as a bare string or as `{"value": ..}`.
fn value_or_str(v: &Value) -> Option<String> {
    non_empty(v).or_else(|| non_empty(&v["value"]))
}
