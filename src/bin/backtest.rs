use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use footy_formula::metric::{self, MetricRegistry};
use footy_formula::repository::MatchFilter;
use footy_formula::service;
use footy_formula::store::SqliteStore;
use footy_formula::synthetic::{self, SyntheticConfig};
use footy_formula::{BacktestSummary, EngineConfig, Formula};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let formula_path = positional_arg().context("usage: backtest <formula.json> [--db path]")?;
    let raw = fs::read_to_string(&formula_path)
        .with_context(|| format!("read formula {}", formula_path.display()))?;
    let formula: Formula = serde_json::from_str(&raw).context("parse formula json")?;
    formula.validate().context("invalid formula")?;

    let registry = match parse_path_arg("--catalog") {
        Some(path) => metric::load_registry(&path)?,
        None => MetricRegistry::with_default_catalog(),
    };
    let cfg = EngineConfig::from_env();
    cfg.validate().context("invalid engine config")?;

    let filter = MatchFilter {
        season: parse_num_arg::<u16>("--season"),
        from_round: parse_num_arg::<u16>("--from-round"),
        to_round: parse_num_arg::<u16>("--to-round"),
        limit: parse_num_arg::<usize>("--limit"),
    };

    let (source, summary) = if let Some(db_path) = parse_path_arg("--db") {
        let store = SqliteStore::open(&db_path)?;
        let summary = if has_flag("--save") {
            store.upsert_formula(&formula)?;
            service::backtest_formula(&store, &store, &registry, &formula.id, &filter, &cfg)?
        } else {
            let history = service::load_history(&store, &store, &filter)?;
            service::backtest_history(&formula, &registry, &history, &cfg)?
        };
        (format!("sqlite {}", db_path.display()), summary)
    } else {
        let synth = SyntheticConfig {
            seed: parse_num_arg::<u64>("--seed").unwrap_or(7),
            rounds: parse_num_arg::<u16>("--rounds").unwrap_or(23).clamp(1, 60),
            missing_rate: parse_num_arg::<f64>("--missing-rate")
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            ..SyntheticConfig::default()
        };
        let store = synthetic::generate_season(synth).into_memory_store();
        let history = service::load_history(&store, &store, &filter)?;
        let summary = service::backtest_history(&formula, &registry, &history, &cfg)?;
        (format!("synthetic seed={}", synth.seed), summary)
    };

    println!("Formula backtest");
    println!("Formula: {} ({})", formula.name, formula.id);
    println!("Source: {source}");
    println!();
    print_summary(&summary);

    if has_flag("--json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn print_summary(s: &BacktestSummary) {
    println!("Games: {} (skipped {})", s.total_games, s.skipped_games);
    println!(
        "Correct: {}  accuracy={:.3}",
        s.correct_predictions, s.accuracy
    );
    println!("Avg confidence: {:.3}", s.avg_confidence);
    println!("Avg margin error: {:.1}", s.avg_margin_error);
    println!("Brier: {:.4}", s.brier_score);
    println!(
        "P/L: {:+.3}  roi={:+.4}  max_drawdown={:.3}",
        s.profit_loss, s.roi, s.max_drawdown
    );
}

fn positional_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with("--") {
            skip_next = !arg.contains('=') && !is_switch(arg);
            continue;
        }
        return Some(PathBuf::from(arg));
    }
    None
}

fn is_switch(arg: &str) -> bool {
    matches!(arg, "--save" | "--json")
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    arg_value(name)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_num_arg<T: std::str::FromStr>(name: &str) -> Option<T> {
    arg_value(name).and_then(|raw| raw.trim().parse::<T>().ok())
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            return Some(raw.to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
        {
            return Some(next.clone());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
