mod config;
mod dashboard;
mod dataset;
mod parser;
mod scraper;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::parser::ExtractStats;
use crate::scraper::{FetchStats, Fetcher};
use crate::store::RawStore;

#[derive(Parser)]
#[command(name = "elbil", about = "Used electric car ads: crawl, extract, explore")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl search listings and save every ad page not already stored
    Fetch,
    /// Parse stored ad pages into the dataset file
    Extract,
    /// Fetch + extract in one go
    Run,
    /// Serve the interactive dashboard over the dataset
    Dashboard {
        /// Port to listen on (default: [dashboard] port from the config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show raw store and dataset counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let result = match cli.command {
        Commands::Fetch => run_fetch(&cfg).await.map(|stats| stats.print()),
        Commands::Extract => run_extract(&cfg).map(|stats| stats.print()),
        Commands::Run => {
            let t_fetch = Instant::now();
            let fetched = run_fetch(&cfg).await?;
            fetched.print();
            println!("Fetched in {}", format_duration(t_fetch.elapsed()));

            let t_extract = Instant::now();
            let extracted = run_extract(&cfg)?;
            println!("Extracted in {}", format_duration(t_extract.elapsed()));
            extracted.print();
            Ok(())
        }
        Commands::Dashboard { port } => {
            let path = cfg.storage.dataset_path();
            if !path.exists() {
                anyhow::bail!(
                    "No dataset at {}. Run 'elbil extract' first.",
                    path.display()
                );
            }
            let records = dataset::read_dataset(&path)?;
            dashboard::serve(records, port.unwrap_or(cfg.dashboard.port)).await
        }
        Commands::Stats => collect_stats(&cfg).map(|summary| summary.print()),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_fetch(cfg: &Config) -> anyhow::Result<FetchStats> {
    let store = RawStore::open(cfg.storage.raw_dir())?;
    let queries = cfg.search_queries();
    println!("Crawling {} search queries...", queries.len());
    let fetcher = Fetcher::new(&cfg.scraper)?;
    fetcher.fetch_all(&store, &queries).await
}

fn run_extract(cfg: &Config) -> anyhow::Result<ExtractStats> {
    let store = RawStore::open(cfg.storage.raw_dir())?;
    let raws = store.read_all()?;
    if raws.is_empty() {
        println!("No raw ads in {}. Run 'elbil fetch' first.", store.dir().display());
    } else {
        println!("Extracting {} raw ads...", raws.len());
    }

    let (records, stats) = parser::extract_all(&raws).context("Failed to set up progress bar")?;
    let path = cfg.storage.dataset_path();
    dataset::write_dataset(&path, &records)?;
    println!("Wrote {} rows to {}", records.len(), path.display());
    Ok(stats)
}

/// What the `stats` subcommand reports.
#[derive(Debug)]
struct StoreSummary {
    raw: usize,
    raw_dir: PathBuf,
    dataset: PathBuf,
    /// `None` until the first extract.
    rows: Option<usize>,
    /// (brand, ads), most common first.
    brands: Vec<(String, usize)>,
}

impl StoreSummary {
    fn print(&self) {
        println!("Raw ads:  {} ({})", self.raw, self.raw_dir.display());
        match self.rows {
            Some(rows) => {
                println!("Dataset:  {} rows ({})", rows, self.dataset.display());
                for (brand, ads) in self.brands.iter().take(10) {
                    println!("  {:<16} {:>5}", truncate(brand, 16), ads);
                }
            }
            None => println!("Dataset:  none yet ({})", self.dataset.display()),
        }
    }
}

fn collect_stats(cfg: &Config) -> anyhow::Result<StoreSummary> {
    let store = RawStore::open(cfg.storage.raw_dir())?;
    let path = cfg.storage.dataset_path();
    let mut summary = StoreSummary {
        raw: store.count()?,
        raw_dir: store.dir().to_path_buf(),
        dataset: path.clone(),
        rows: None,
        brands: Vec::new(),
    };
    if path.exists() {
        let rows = dataset::read_dataset(&path)?;
        let refs: Vec<&dataset::AdRecord> = rows.iter().collect();
        summary.rows = Some(rows.len());
        summary.brands = dashboard::stats::summarize(&refs).brands;
    }
    Ok(summary)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate("Tesla", 16), "Tesla");
        assert_eq!(truncate("Mercedes-Benz EQ", 10), "Mercede...");
    }

    #[test]
    fn stats_count_store_and_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let toml = format!(
            "[car_codes]\nmodel_3 = \"m3\"\n\n[storage]\ndata_dir = \"{}\"\n",
            tmp.path().display()
        );
        let cfg = config::parse_config(&toml).unwrap();

        let before = collect_stats(&cfg).unwrap();
        assert_eq!(before.raw, 0);
        assert_eq!(before.rows, None);
        assert!(before.brands.is_empty());

        let store = RawStore::open(cfg.storage.raw_dir()).unwrap();
        store.save(1, "<html>1</html>").unwrap();
        store.save(2, "<html>2</html>").unwrap();
        let rows = vec![
            dataset::sample(1, "Tesla", "Model 3", Some(2021), 41_000, 335_000),
            dataset::sample(2, "Kia", "EV6", Some(2022), 20_000, 400_000),
            dataset::sample(3, "Tesla", "Model Y", Some(2023), 12_000, 499_000),
        ];
        dataset::write_dataset(&cfg.storage.dataset_path(), &rows).unwrap();

        let after = collect_stats(&cfg).unwrap();
        assert_eq!(after.raw, 2);
        assert_eq!(after.rows, Some(3));
        assert_eq!(
            after.brands,
            vec![("Tesla".to_string(), 2), ("Kia".to_string(), 1)]
        );
    }

    /// Two queries with one listing page each: four ads fetched, none on the
    /// second run, four rows extracted.
    #[tokio::test]
    async fn crawl_then_extract() {
        let mut server = Server::new_async().await;
        let tmp = tempfile::tempdir().unwrap();
        let detail = std::fs::read_to_string("tests/fixtures/payload_model3.html").unwrap();

        let toml = format!(
            r#"
            [car_codes]
            model_3 = "m3"
            ioniq_5 = "i5"

            [scraper]
            search_url = "{url}/search?model="
            ad_url = "{url}/ad?finnkode="
            max_retries = 0

            [storage]
            data_dir = "{dir}"
            "#,
            url = server.url(),
            dir = tmp.path().display()
        );
        let cfg = config::parse_config(&toml).unwrap();

        let listing = |codes: [u64; 2]| {
            format!(
                r#"<html><body><a href="/car/used/ad.html?finnkode={}">a</a><a href="/mobility/item/{}">b</a></body></html>"#,
                codes[0], codes[1]
            )
        };
        let mut mocks = Vec::new();
        for (model, codes) in [("m3", [11, 12]), ("i5", [21, 22])] {
            mocks.push(
                server
                    .mock("GET", "/search")
                    .match_query(Matcher::AllOf(vec![
                        Matcher::UrlEncoded("model".into(), model.into()),
                        Matcher::UrlEncoded("page".into(), "1".into()),
                    ]))
                    .with_body(listing(codes))
                    .expect(2)
                    .create_async()
                    .await,
            );
            for code in codes {
                mocks.push(
                    server
                        .mock("GET", "/ad")
                        .match_query(Matcher::UrlEncoded("finnkode".into(), code.to_string()))
                        .with_body(detail.clone())
                        .expect(1)
                        .create_async()
                        .await,
                );
            }
        }

        let first = run_fetch(&cfg).await.unwrap();
        assert_eq!(first.saved, 4);
        let second = run_fetch(&cfg).await.unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.skipped, 4);
        for m in &mocks {
            m.assert_async().await;
        }

        let stats = run_extract(&cfg).unwrap();
        assert_eq!(stats.read, 4);
        assert_eq!(stats.payload, 4);
        let rows = dataset::read_dataset(&cfg.storage.dataset_path()).unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 12, 21, 22]);
    }
}
