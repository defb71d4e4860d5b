use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Int32Array, Int64Array, ListArray, RecordBatch, StringArray,
    UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

/// Which extraction strategy produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Payload,
    Markup,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Payload => "payload",
            Source::Markup => "markup",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "payload" => Some(Source::Payload),
            "markup" => Some(Source::Markup),
            _ => None,
        }
    }
}

/// One advertisement, derived from exactly one raw page.
#[derive(Debug, Clone, PartialEq)]
pub struct AdRecord {
    pub id: u64,
    pub title: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub model_year: Option<i32>,
    pub mileage: i64,
    pub price: i64,
    pub drivetrain: Option<String>,
    pub is_leasing: bool,
    pub safety_elements: Option<Vec<String>>,
    pub link: String,
    pub source: Source,
}

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("brand", DataType::Utf8, true),
        Field::new("model", DataType::Utf8, true),
        Field::new("model_year", DataType::Int32, true),
        Field::new("mileage", DataType::Int64, false),
        Field::new("price", DataType::Int64, false),
        Field::new("drivetrain", DataType::Utf8, true),
        Field::new("is_leasing", DataType::Boolean, false),
        Field::new(
            "safety_elements",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        ),
        Field::new("link", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
    ])
}

fn to_batch(records: &[AdRecord]) -> Result<RecordBatch> {
    let ids = UInt64Array::from(records.iter().map(|r| r.id).collect::<Vec<_>>());
    let titles = StringArray::from(records.iter().map(|r| Some(r.title.as_str())).collect::<Vec<_>>());
    let brands = StringArray::from(records.iter().map(|r| r.brand.as_deref()).collect::<Vec<_>>());
    let models = StringArray::from(records.iter().map(|r| r.model.as_deref()).collect::<Vec<_>>());
    let years = Int32Array::from(records.iter().map(|r| r.model_year).collect::<Vec<_>>());
    let mileage = Int64Array::from(records.iter().map(|r| r.mileage).collect::<Vec<_>>());
    let prices = Int64Array::from(records.iter().map(|r| r.price).collect::<Vec<_>>());
    let drivetrains =
        StringArray::from(records.iter().map(|r| r.drivetrain.as_deref()).collect::<Vec<_>>());
    let leasing = BooleanArray::from(records.iter().map(|r| r.is_leasing).collect::<Vec<_>>());

    let mut safety = ListBuilder::new(StringBuilder::new());
    for r in records {
        match &r.safety_elements {
            Some(items) => {
                for item in items {
                    safety.values().append_value(item);
                }
                safety.append(true);
            }
            None => safety.append(false),
        }
    }
    let safety = safety.finish();

    let links = StringArray::from(records.iter().map(|r| Some(r.link.as_str())).collect::<Vec<_>>());
    let sources =
        StringArray::from(records.iter().map(|r| Some(r.source.as_str())).collect::<Vec<_>>());

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids),
        Arc::new(titles),
        Arc::new(brands),
        Arc::new(models),
        Arc::new(years),
        Arc::new(mileage),
        Arc::new(prices),
        Arc::new(drivetrains),
        Arc::new(leasing),
        Arc::new(safety),
        Arc::new(links),
        Arc::new(sources),
    ];
    RecordBatch::try_new(Arc::new(schema()), columns).context("building ads record batch")
}

/// Replace the dataset at `path` with `records`.
///
/// Written to `<path>.tmp` and renamed over the old file, so readers never see
/// a half-written dataset.
pub fn write_dataset(path: &Path, records: &[AdRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("parquet.tmp");
    let batch = to_batch(records)?;

    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", tmp.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", tmp.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", tmp.display()))?;

    fs::rename(&tmp, path).with_context(|| format!("moving dataset into {}", path.display()))?;
    Ok(())
}

pub fn read_dataset(path: &Path) -> Result<Vec<AdRecord>> {
    let file = File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?
        .build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch {}", path.display()))?;
        records.extend(from_batch(&batch)?);
    }
    Ok(records)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let col = batch
        .column_by_name(name)
        .with_context(|| format!("dataset has no {} column", name))?;
    match col.as_any().downcast_ref::<T>() {
        Some(typed) => Ok(typed),
        None => bail!("column {} has unexpected type {}", name, col.data_type()),
    }
}

fn opt_string(a: &StringArray, i: usize) -> Option<String> {
    (!a.is_null(i)).then(|| a.value(i).to_string())
}

fn from_batch(batch: &RecordBatch) -> Result<Vec<AdRecord>> {
    let ids = column::<UInt64Array>(batch, "id")?;
    let titles = column::<StringArray>(batch, "title")?;
    let brands = column::<StringArray>(batch, "brand")?;
    let models = column::<StringArray>(batch, "model")?;
    let years = column::<Int32Array>(batch, "model_year")?;
    let mileage = column::<Int64Array>(batch, "mileage")?;
    let prices = column::<Int64Array>(batch, "price")?;
    let drivetrains = column::<StringArray>(batch, "drivetrain")?;
    let leasing = column::<BooleanArray>(batch, "is_leasing")?;
    let safety = column::<ListArray>(batch, "safety_elements")?;
    let links = column::<StringArray>(batch, "link")?;
    let sources = column::<StringArray>(batch, "source")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let safety_elements = if safety.is_null(i) {
            None
        } else {
            let values = safety.value(i);
            let strings = values
                .as_any()
                .downcast_ref::<StringArray>()
                .context("safety_elements items are not strings")?;
            Some((0..strings.len()).map(|j| strings.value(j).to_string()).collect())
        };
        let source = Source::parse(sources.value(i))
            .with_context(|| format!("unknown source {:?} in row {}", sources.value(i), i))?;

        rows.push(AdRecord {
            id: ids.value(i),
            title: titles.value(i).to_string(),
            brand: opt_string(brands, i),
            model: opt_string(models, i),
            model_year: (!years.is_null(i)).then(|| years.value(i)),
            mileage: mileage.value(i),
            price: prices.value(i),
            drivetrain: opt_string(drivetrains, i),
            is_leasing: leasing.value(i),
            safety_elements,
            link: links.value(i).to_string(),
            source,
        });
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) fn sample(id: u64, brand: &str, model: &str, year: Option<i32>, km: i64, price: i64) -> AdRecord {
    AdRecord {
        id,
        title: format!("{} {} {}", brand, model, id),
        brand: Some(brand.to_string()),
        model: Some(model.to_string()),
        model_year: year,
        mileage: km,
        price,
        drivetrain: None,
        is_leasing: false,
        safety_elements: None,
        link: format!("https://www.finn.no/mobility/item/{}", id),
        source: Source::Payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_preserves_rows_and_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("ads.parquet");

        let mut a = sample(2, "Tesla", "Model 3", Some(2021), 40_000, 320_000);
        a.drivetrain = Some("Firehjulsdrift".into());
        a.safety_elements = Some(vec!["Service".into(), "Garanti".into()]);
        let mut b = sample(1, "Hyundai", "IONIQ 5", None, 12_000, 450_000);
        b.brand = None;
        b.is_leasing = true;
        b.source = Source::Markup;
        b.safety_elements = Some(vec![]);

        write_dataset(&path, &[a.clone(), b.clone()]).unwrap();
        let back = read_dataset(&path).unwrap();
        assert_eq!(back, vec![a, b]);
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn empty_dataset_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ads.parquet");
        write_dataset(&path, &[]).unwrap();
        assert!(read_dataset(&path).unwrap().is_empty());
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ads.parquet");
        write_dataset(&path, &[sample(1, "A", "x", None, 1, 1), sample(2, "B", "y", None, 2, 2)])
            .unwrap();
        write_dataset(&path, &[sample(3, "C", "z", None, 3, 3)]).unwrap();
        let ids: Vec<u64> = read_dataset(&path).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn missing_dataset_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_dataset(&tmp.path().join("nope.parquet")).is_err());
    }
}
