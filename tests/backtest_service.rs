use footy_formula::condition::{ComparisonOperator, Condition, ConditionAction};
use footy_formula::repository::{FormulaRepository, MatchFilter, MemoryStore};
use footy_formula::service;
use footy_formula::synthetic::{self, SyntheticConfig};
use footy_formula::{
    EngineConfig, EngineError, Formula, FormulaTerm, MetricRegistry, TermOperator, run_backtest,
};

fn form_formula() -> Formula {
    Formula::new(
        "form",
        "user-1",
        "Form and home ground",
        vec![
            FormulaTerm::add("elo_diff", 0.01),
            FormulaTerm::add("home_ground", 0.3),
            FormulaTerm::new("rain_mm", 0.02, TermOperator::Subtract).with_condition(
                Condition::threshold(ComparisonOperator::Lt, 1.0, ConditionAction::Exclude),
            ),
        ],
        0.6,
    )
    .expect("valid formula")
}

fn contrarian_formula() -> Formula {
    Formula::new(
        "contrarian",
        "user-2",
        "Back the away side",
        vec![FormulaTerm::new("elo_diff", 0.01, TermOperator::Subtract)],
        0.4,
    )
    .expect("valid formula")
}

fn season_store(cfg: SyntheticConfig) -> MemoryStore {
    let store = synthetic::generate_season(cfg).into_memory_store();
    store.insert_formula(form_formula());
    store.insert_formula(contrarian_formula());
    store
}

fn short_season() -> SyntheticConfig {
    SyntheticConfig {
        rounds: 8,
        ..SyntheticConfig::default()
    }
}

#[test]
fn predict_match_saves_the_prediction() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();
    let match_id = store
        .list_completed_matches(&MatchFilter::default())
        .unwrap()[0]
        .id
        .clone();

    let p = service::predict_match(&store, &store, &registry, "form", &match_id, &cfg).unwrap();
    assert_eq!(p.match_id, match_id);
    assert!(p.result.is_none());
    assert_eq!(store.predictions(), vec![p]);
}

#[test]
fn predict_match_reports_missing_inputs() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();

    let err = service::predict_match(&store, &store, &registry, "nope", "x", &cfg).unwrap_err();
    assert_eq!(err, EngineError::FormulaNotFound("nope".to_string()));

    let err =
        service::predict_match(&store, &store, &registry, "form", "no-such-match", &cfg).unwrap_err();
    assert_eq!(err, EngineError::SnapshotUnavailable("no-such-match".to_string()));
    assert!(store.predictions().is_empty());
}

#[test]
fn backtest_formula_caches_summary() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();

    let summary = service::backtest_formula(
        &store,
        &store,
        &registry,
        "form",
        &MatchFilter::default(),
        &cfg,
    )
    .unwrap();

    assert_eq!(summary.total_games, 8 * 9);
    assert_eq!(summary.skipped_games, 0);
    assert!(summary.correct_predictions <= summary.total_games);
    assert_eq!(
        store.load_formula("form").unwrap().backtest_results,
        Some(summary)
    );
    assert_eq!(store.summaries(), vec![("form".to_string(), summary)]);
}

#[test]
fn service_matches_pure_runner() {
    let season = synthetic::generate_season(short_season());
    let history = season.history();
    let store = season.into_memory_store();
    store.insert_formula(form_formula());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();

    let via_service = service::backtest_formula(
        &store,
        &store,
        &registry,
        "form",
        &MatchFilter::default(),
        &cfg,
    )
    .unwrap();
    let direct = run_backtest(&form_formula(), &registry, &history, &cfg).unwrap();
    assert_eq!(via_service, direct);
}

#[test]
fn dropped_metrics_become_skipped_games() {
    let store = season_store(SyntheticConfig {
        missing_rate: 0.3,
        ..short_season()
    });
    let registry = MetricRegistry::with_default_catalog();

    let summary = service::backtest_formula(
        &store,
        &store,
        &registry,
        "form",
        &MatchFilter::default(),
        &EngineConfig::default(),
    )
    .unwrap();

    assert!(summary.skipped_games > 0);
    assert_eq!(summary.total_games + summary.skipped_games, 8 * 9);
}

#[test]
fn round_window_narrows_the_history() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let filter = MatchFilter {
        from_round: Some(3),
        to_round: Some(4),
        ..MatchFilter::default()
    };

    let summary = service::backtest_formula(
        &store,
        &store,
        &registry,
        "form",
        &filter,
        &EngineConfig::default(),
    )
    .unwrap();
    assert_eq!(summary.total_games, 2 * 9);
}

#[test]
fn empty_window_is_an_error() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let filter = MatchFilter::season(1999);

    let err = service::backtest_formula(
        &store,
        &store,
        &registry,
        "form",
        &filter,
        &EngineConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, EngineError::EmptyBacktestSet);
    assert!(store.summaries().is_empty());
}

#[test]
fn repeated_backtests_agree() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();
    let filter = MatchFilter::default();

    let first = service::backtest_formula(&store, &store, &registry, "form", &filter, &cfg).unwrap();
    let second =
        service::backtest_formula(&store, &store, &registry, "form", &filter, &cfg).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.summaries().len(), 2);
}

#[test]
fn parallel_backtests_match_sequential_runs() {
    let store = season_store(short_season());
    let registry = MetricRegistry::with_default_catalog();
    let cfg = EngineConfig::default();
    let filter = MatchFilter::default();
    let ids = vec![
        "form".to_string(),
        "missing".to_string(),
        "contrarian".to_string(),
    ];

    let results = service::backtest_many(&store, &store, &registry, &ids, &filter, &cfg).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "form");
    assert_eq!(results[1].0, "missing");
    assert_eq!(
        results[1].1,
        Err(EngineError::FormulaNotFound("missing".to_string()))
    );

    let form = results[0].1.clone().unwrap();
    let contrarian = results[2].1.clone().unwrap();
    let sequential =
        service::backtest_formula(&store, &store, &registry, "form", &filter, &cfg).unwrap();
    assert_eq!(form, sequential);
    assert_eq!(form.total_games, contrarian.total_games);
    assert_eq!(store.summaries().len(), 3);
}
