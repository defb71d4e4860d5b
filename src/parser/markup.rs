use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::{as_int, parse_number};
use crate::dataset::{AdRecord, Source};

const LEGACY_LINK: &str = "https://www.finn.no/car/used/ad.html?finnkode=";

static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static DIV_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());
static SPAN_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static HORSESHOE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#horseshoe-config").unwrap());
static CAR_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a#carSearchLink").unwrap());
static SAFETY_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"ul[aria-label="Trygghetselementer"] li p.u-strong"#).unwrap()
});

/// Fallback strategy: pattern-match the rendered markup.
///
/// Title, price and mileage are required; without all three the page is
/// dropped rather than producing a half-filled row.
pub fn extract(code: u64, doc: &Html) -> Option<AdRecord> {
    let title = title(doc)?;
    let price = price(doc)?;
    let mileage = labelled_value(doc, "Kilometer").and_then(|t| parse_number(&t))?;

    let (brand, model) = brand_model(doc);
    let safety = safety_elements(doc);

    Some(AdRecord {
        id: code,
        title,
        brand,
        model,
        model_year: model_year(doc),
        mileage,
        price,
        drivetrain: labelled_value(doc, "Hjuldrift"),
        is_leasing: doc.root_element().text().any(|t| t.contains("Månedspris")),
        safety_elements: (!safety.is_empty()).then_some(safety),
        link: format!("{}{}", LEGACY_LINK, code),
        source: Source::Markup,
    })
}

/// Fill the optional fields another strategy left empty from the markup.
/// Fields that are already set are never overwritten.
pub fn fill_gaps(record: &mut AdRecord, doc: &Html) {
    if record.brand.is_none() || record.model.is_none() {
        let (brand, model) = brand_model(doc);
        record.brand = record.brand.take().or(brand);
        record.model = record.model.take().or(model);
    }
    if record.model_year.is_none() {
        record.model_year = model_year(doc);
    }
    if record.drivetrain.is_none() {
        record.drivetrain = labelled_value(doc, "Hjuldrift");
    }
    if record.safety_elements.is_none() {
        let safety = safety_elements(doc);
        record.safety_elements = (!safety.is_empty()).then_some(safety);
    }
}

fn text_of(el: ElementRef) -> String {
    el.text().map(str::trim).collect::<String>()
}

/// First following sibling element with the given tag (and class, if any).
fn next_sibling<'a>(el: ElementRef<'a>, tag: &str, class: Option<&str>) -> Option<ElementRef<'a>> {
    el.next_siblings().filter_map(ElementRef::wrap).find(|sib| {
        sib.value().name() == tag
            && class.map_or(true, |c| sib.value().classes().any(|have| have == c))
    })
}

/// The sub-heading paragraph after the first `<h1>`, else the heading itself.
fn title(doc: &Html) -> Option<String> {
    let h1 = doc.select(&H1_SEL).next()?;
    next_sibling(h1, "p", None)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .or_else(|| Some(text_of(h1)).filter(|t| !t.is_empty()))
}

/// Key-info grid: `<div>Label</div><div class="u-strong">value</div>`.
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    let label_div = doc.select(&DIV_SEL).find(|d| text_of(*d) == label)?;
    next_sibling(label_div, "div", Some("u-strong"))
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn model_year(doc: &Html) -> Option<i32> {
    labelled_value(doc, "Modellår")
        .and_then(|t| parse_number(&t))
        .and_then(|y| i32::try_from(y).ok())
}

fn price(doc: &Html) -> Option<i64> {
    total_price(doc).or_else(|| horseshoe_price(doc))
}

fn total_price(doc: &Html) -> Option<i64> {
    let label = doc.select(&SPAN_SEL).find(|s| text_of(*s) == "Totalpris")?;
    next_sibling(label, "span", Some("u-t3")).and_then(|v| parse_number(&text_of(v)))
}

/// Ad-targeting config script that carries the price as `xandr.feed.pris`.
fn horseshoe_price(doc: &Html) -> Option<i64> {
    let script = doc.select(&HORSESHOE_SEL).next()?;
    let json: Value = serde_json::from_str(&script.text().collect::<String>()).ok()?;
    as_int(&json["xandr"]["feed"]["pris"])
}

/// Breadcrumb anchors: make, then "<make> <model…>".
fn brand_model(doc: &Html) -> (Option<String>, Option<String>) {
    let anchors: Vec<ElementRef> = doc.select(&CAR_LINK_SEL).collect();
    let brand = anchors.first().map(|a| text_of(*a)).filter(|t| !t.is_empty());
    let model = anchors
        .get(1)
        .map(|a| a.text().collect::<String>())
        .map(|t| t.split_whitespace().skip(1).collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());
    (brand, model)
}

fn safety_elements(doc: &Html) -> Vec<String> {
    doc.select(&SAFETY_SEL)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"<html><body>
        <a id="carSearchLink" href="/car/used/search.html?make=1.8078">Hyundai</a>
        <a id="carSearchLink" href="/car/used/search.html?model=1.8078.2000555">Hyundai IONIQ 5</a>
        <h1>Hyundai IONIQ 5</h1>
        <p>77 kWh Premium AWD, varmepumpe</p>
        <section>
          <div><div>Modellår</div><div class="u-strong">2022</div></div>
          <div><div>Kilometer</div><div class="u-strong">23&nbsp;500 km</div></div>
          <div><div>Hjuldrift</div><div class="u-strong">Firehjulsdrift</div></div>
        </section>
        <div><span>Totalpris</span><span class="u-t3">459&nbsp;900 kr</span></div>
        <ul aria-label="Trygghetselementer" class="tabs__control u-position-relative" role="tablist">
          <li><p class="u-strong">Service</p></li>
          <li><p class="u-strong">Garanti</p></li>
        </ul>
    </body></html>"#;

    #[test]
    fn legacy_page() {
        let doc = Html::parse_document(LEGACY);
        let r = extract(555, &doc).unwrap();
        assert_eq!(r.title, "77 kWh Premium AWD, varmepumpe");
        assert_eq!(r.brand.as_deref(), Some("Hyundai"));
        assert_eq!(r.model.as_deref(), Some("IONIQ 5"));
        assert_eq!(r.model_year, Some(2022));
        assert_eq!(r.mileage, 23500);
        assert_eq!(r.price, 459900);
        assert_eq!(r.drivetrain.as_deref(), Some("Firehjulsdrift"));
        assert!(!r.is_leasing);
        assert_eq!(r.safety_elements, Some(vec!["Service".to_string(), "Garanti".to_string()]));
        assert_eq!(r.link, "https://www.finn.no/car/used/ad.html?finnkode=555");
        assert_eq!(r.source, Source::Markup);
    }

    #[test]
    fn price_from_horseshoe_config() {
        let html = r#"<html><body>
            <h1>Kia EV6</h1>
            <div><div>Kilometer</div><div class="u-strong">10 000 km</div></div>
            <div><span>Månedspris 5 990 kr</span></div>
            <script id="horseshoe-config" type="application/json">{"xandr":{"feed":{"pris":"389000"}}}</script>
        </body></html>"#;
        let r = extract(9, &Html::parse_document(html)).unwrap();
        assert_eq!(r.title, "Kia EV6");
        assert_eq!(r.price, 389000);
        assert_eq!(r.mileage, 10000);
        assert!(r.is_leasing);
        assert_eq!(r.model_year, None);
        assert_eq!(r.safety_elements, None);
    }

    #[test]
    fn gaps_filled_without_overwriting() {
        let doc = Html::parse_document(LEGACY);
        let mut r = crate::dataset::sample(7, "Tesla", "Model 3", None, 1, 2);
        r.brand = None;
        r.drivetrain = Some("Bakhjulsdrift".into());
        r.safety_elements = None;
        fill_gaps(&mut r, &doc);
        assert_eq!(r.brand.as_deref(), Some("Hyundai"));
        assert_eq!(r.model.as_deref(), Some("Model 3"));
        assert_eq!(r.model_year, Some(2022));
        assert_eq!(r.drivetrain.as_deref(), Some("Bakhjulsdrift"));
        assert_eq!(r.safety_elements, Some(vec!["Service".to_string(), "Garanti".to_string()]));
        assert_eq!(r.mileage, 1);
    }

    #[test]
    fn missing_mileage_drops_page() {
        let html = r#"<html><body><h1>Nissan Leaf</h1>
            <div><span>Totalpris</span><span class="u-t3">99 000 kr</span></div></body></html>"#;
        assert!(extract(1, &Html::parse_document(html)).is_none());
    }

    #[test]
    fn missing_price_drops_page() {
        let html = r#"<html><body><h1>Nissan Leaf</h1>
            <div><div>Kilometer</div><div class="u-strong">80 000 km</div></div></body></html>"#;
        assert!(extract(1, &Html::parse_document(html)).is_none());
    }
}
