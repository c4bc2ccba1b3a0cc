use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use footy_formula::metric::{self, MetricRegistry};
use footy_formula::{EngineConfig, Formula, MatchMetricSnapshot, MatchResult, evaluate};

// Offline single-match prediction: reads a formula and a snapshot from disk
// and prints the prediction as JSON. `--result 92-80` also settles it.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let files = args
        .iter()
        .enumerate()
        .filter(|(idx, a)| !a.starts_with("--") && !follows_value_flag(&args, *idx))
        .map(|(_, a)| PathBuf::from(a))
        .collect::<Vec<_>>();
    let [formula_path, snapshot_path] = files.as_slice() else {
        return Err(anyhow!(
            "usage: predict <formula.json> <snapshot.json> [--catalog path] [--result H-A]"
        ));
    };

    let formula: Formula = read_json(formula_path).context("load formula")?;
    let snapshot: MatchMetricSnapshot = read_json(snapshot_path).context("load snapshot")?;

    let registry = match flag_value(&args, "--catalog") {
        Some(path) => metric::load_registry(&PathBuf::from(path))?,
        None => MetricRegistry::with_default_catalog(),
    };
    let cfg = EngineConfig::from_env();
    cfg.validate().context("invalid engine config")?;

    let mut prediction = evaluate(&formula, &registry, &snapshot, &cfg)?;
    if let Some(raw) = flag_value(&args, "--result") {
        let result = parse_result(raw).with_context(|| format!("bad --result {raw:?}"))?;
        prediction = prediction.with_result(&result);
    }

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse_result(raw: &str) -> Option<MatchResult> {
    let (home, away) = raw.split_once(['-', ':'])?;
    Some(MatchResult::new(
        home.trim().parse().ok()?,
        away.trim().parse().ok()?,
    ))
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let idx = args.iter().position(|a| a == name)?;
    args.get(idx + 1).map(String::as_str)
}

fn follows_value_flag(args: &[String], idx: usize) -> bool {
    idx > 0 && matches!(args[idx - 1].as_str(), "--catalog" | "--result")
}
