use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use footy_formula::Formula;
use footy_formula::store::SqliteStore;
use footy_formula::synthetic::{self, SyntheticConfig};

const DEFAULT_DB: &str = "footy_formula.sqlite";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db_path = parse_arg("--db")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));

    let d = SyntheticConfig::default();
    let cfg = SyntheticConfig {
        seed: parse_arg("--seed")
            .and_then(|v| v.parse().ok())
            .unwrap_or(d.seed),
        season: parse_arg("--season")
            .and_then(|v| v.parse().ok())
            .unwrap_or(d.season),
        rounds: parse_arg("--rounds")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(d.rounds)
            .clamp(1, 60),
        missing_rate: parse_arg("--missing-rate")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(d.missing_rate)
            .clamp(0.0, 1.0),
    };

    let store = SqliteStore::open(&db_path)?;
    let season = synthetic::generate_season(cfg);
    season.write_to(&store).context("write synthetic season")?;

    let mut formulas = 0usize;
    for path in parse_all_args("--formula") {
        let raw = fs::read_to_string(&path).with_context(|| format!("read formula {path}"))?;
        let formula: Formula =
            serde_json::from_str(&raw).with_context(|| format!("parse formula {path}"))?;
        formula
            .validate()
            .with_context(|| format!("invalid formula {path}"))?;
        store.upsert_formula(&formula)?;
        formulas += 1;
    }

    println!("Synthetic season written");
    println!("DB: {}", db_path.display());
    println!("Season: {} seed={}", cfg.season, cfg.seed);
    println!("Matches: {}", season.matches.len());
    println!("Snapshots: {}", season.snapshots.len());
    println!("Formulas: {formulas}");
    Ok(())
}

fn parse_arg(name: &str) -> Option<String> {
    parse_all_args(name).into_iter().next()
}

fn parse_all_args(name: &str) -> Vec<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            out.push(raw.trim().to_string());
        } else if arg == name
            && let Some(next) = args.get(idx + 1)
        {
            out.push(next.trim().to_string());
        }
    }
    out.retain(|v| !v.is_empty());
    out
}
