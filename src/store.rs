//! SQLite-backed repository and snapshot provider.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::backtest::BacktestSummary;
use crate::error::{EngineError, Result};
use crate::formula::Formula;
use crate::model::{Match, MatchMetricSnapshot, MatchResult, MatchStatus};
use crate::prediction::Prediction;
use crate::repository::{FormulaRepository, MatchFilter, SnapshotProvider};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> AnyResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AnyResult<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AnyResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn upsert_formula(&self, formula: &Formula) -> Result<()> {
        write_formula(&self.conn(), formula)
    }

    fn query_formulas(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Formula>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }

    /// Removes the formula. Predictions and backtest runs are kept as history.
    pub fn delete_formula(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM formulas WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn upsert_match(&self, m: &Match) -> Result<()> {
        let (home_score, away_score) = match m.result {
            Some(r) => (Some(r.home_score), Some(r.away_score)),
            None => (None, None),
        };
        self.conn().execute(
            r#"
            INSERT INTO matches (
                match_id, season, round, home_team, away_team, venue, kickoff,
                status, home_score, away_score, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(match_id) DO UPDATE SET
                season = excluded.season,
                round = excluded.round,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                venue = excluded.venue,
                kickoff = excluded.kickoff,
                status = excluded.status,
                home_score = excluded.home_score,
                away_score = excluded.away_score,
                updated_at = excluded.updated_at
            "#,
            params![
                m.id,
                m.season,
                m.round,
                m.home_team,
                m.away_team,
                m.venue,
                time_str(m.kickoff),
                status_key(m.status),
                home_score,
                away_score,
                now_str(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_snapshot(&self, snapshot: &MatchMetricSnapshot) -> Result<()> {
        let values = serde_json::to_string(&snapshot.values)?;
        self.conn().execute(
            r#"
            INSERT INTO snapshots (match_id, as_of, values_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(match_id) DO UPDATE SET
                as_of = excluded.as_of,
                values_json = excluded.values_json
            "#,
            params![snapshot.match_id, snapshot.as_of.map(time_str), values],
        )?;
        Ok(())
    }

    pub fn predictions_for_formula(&self, formula_id: &str) -> Result<Vec<Prediction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT body FROM predictions WHERE formula_id = ?1 ORDER BY prediction_id",
        )?;
        let rows = stmt.query_map(params![formula_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }

    /// Backtest summaries for a formula, oldest first.
    pub fn backtest_runs(&self, formula_id: &str) -> Result<Vec<BacktestSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT summary_json FROM backtest_runs WHERE formula_id = ?1 ORDER BY run_id",
        )?;
        let rows = stmt.query_map(params![formula_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }
}

fn write_formula(conn: &Connection, formula: &Formula) -> Result<()> {
    let body = serde_json::to_string(formula)?;
    conn.execute(
        r#"
        INSERT INTO formulas (id, user_id, name, is_public, is_template, body, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            is_public = excluded.is_public,
            is_template = excluded.is_template,
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
        params![
            formula.id,
            formula.user_id,
            formula.name,
            formula.is_public,
            formula.is_template,
            body,
            now_str()
        ],
    )?;
    Ok(())
}

fn read_formula(conn: &Connection, id: &str) -> Result<Formula> {
    let body = conn
        .query_row(
            "SELECT body FROM formulas WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let Some(body) = body else {
        return Err(EngineError::FormulaNotFound(id.to_string()));
    };
    Ok(serde_json::from_str(&body)?)
}

fn init_schema(conn: &Connection) -> AnyResult<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS formulas (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_public INTEGER NOT NULL DEFAULT 0,
            is_template INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_formulas_user ON formulas(user_id);

        CREATE TABLE IF NOT EXISTS matches (
            match_id TEXT PRIMARY KEY,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            venue TEXT NOT NULL,
            kickoff TEXT NOT NULL,
            status TEXT NOT NULL,
            home_score INTEGER NULL,
            away_score INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff);

        CREATE TABLE IF NOT EXISTS snapshots (
            match_id TEXT PRIMARY KEY,
            as_of TEXT NULL,
            values_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS predictions (
            prediction_id INTEGER PRIMARY KEY AUTOINCREMENT,
            formula_id TEXT NOT NULL,
            match_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_formula ON predictions(formula_id);

        CREATE TABLE IF NOT EXISTS backtest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            formula_id TEXT NOT NULL,
            summary_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

impl SnapshotProvider for SqliteStore {
    fn snapshot(&self, match_id: &str) -> Result<MatchMetricSnapshot> {
        let row = self
            .conn()
            .query_row(
                "SELECT as_of, values_json FROM snapshots WHERE match_id = ?1",
                params![match_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((as_of, values_json)) = row else {
            return Err(EngineError::SnapshotUnavailable(match_id.to_string()));
        };
        Ok(MatchMetricSnapshot {
            match_id: match_id.to_string(),
            as_of: as_of.as_deref().map(parse_time).transpose()?,
            values: serde_json::from_str(&values_json)?,
        })
    }
}

impl FormulaRepository for SqliteStore {
    fn load_formula(&self, id: &str) -> Result<Formula> {
        read_formula(&self.conn(), id)
    }

    fn list_formulas(&self, user_id: &str) -> Result<Vec<Formula>> {
        self.query_formulas(
            "SELECT body FROM formulas WHERE user_id = ?1 ORDER BY name ASC, id ASC",
            params![user_id],
        )
    }

    fn list_shared_formulas(&self) -> Result<Vec<Formula>> {
        self.query_formulas(
            "SELECT body FROM formulas WHERE is_public = 1 OR is_template = 1 ORDER BY name ASC, id ASC",
            params![],
        )
    }

    /// Caches the summary on the formula and appends it to the run log in
    /// one transaction.
    fn save_backtest_summary(&self, formula_id: &str, summary: &BacktestSummary) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut formula = read_formula(&tx, formula_id)?;
        formula.backtest_results = Some(*summary);
        write_formula(&tx, &formula)?;

        let summary_json = serde_json::to_string(summary)?;
        tx.execute(
            "INSERT INTO backtest_runs (formula_id, summary_json, created_at) VALUES (?1, ?2, ?3)",
            params![formula_id, summary_json, now_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save_prediction(&self, prediction: &Prediction) -> Result<()> {
        let body = serde_json::to_string(prediction)?;
        self.conn().execute(
            r#"
            INSERT INTO predictions (formula_id, match_id, body, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![prediction.formula_id, prediction.match_id, body, now_str()],
        )?;
        Ok(())
    }

    fn list_completed_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT match_id, season, round, home_team, away_team, venue, kickoff,
                   status, home_score, away_score
            FROM matches
            WHERE status = 'completed'
              AND home_score IS NOT NULL
              AND away_score IS NOT NULL
              AND (?1 IS NULL OR season = ?1)
              AND (?2 IS NULL OR round >= ?2)
              AND (?3 IS NULL OR round <= ?3)
            ORDER BY kickoff ASC, match_id ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![filter.season, filter.from_round, filter.to_round],
            |row| {
                Ok(RawMatch {
                    id: row.get(0)?,
                    season: row.get(1)?,
                    round: row.get(2)?,
                    home_team: row.get(3)?,
                    away_team: row.get(4)?,
                    venue: row.get(5)?,
                    kickoff: row.get(6)?,
                    status: row.get(7)?,
                    home_score: row.get(8)?,
                    away_score: row.get(9)?,
                })
            },
        )?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_match()?);
            if filter.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }
}

struct RawMatch {
    id: String,
    season: u16,
    round: u16,
    home_team: String,
    away_team: String,
    venue: String,
    kickoff: String,
    status: String,
    home_score: Option<u32>,
    away_score: Option<u32>,
}

impl RawMatch {
    fn into_match(self) -> Result<Match> {
        let result = match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some(MatchResult::new(h, a)),
            _ => None,
        };
        Ok(Match {
            kickoff: parse_time(&self.kickoff)?,
            status: parse_status(&self.status)?,
            id: self.id,
            season: self.season,
            round: self.round,
            home_team: self.home_team,
            away_team: self.away_team,
            venue: self.venue,
            result,
        })
    }
}

fn status_key(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Scheduled => "scheduled",
        MatchStatus::Live => "live",
        MatchStatus::Completed => "completed",
        MatchStatus::Postponed => "postponed",
        MatchStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> Result<MatchStatus> {
    match raw {
        "scheduled" => Ok(MatchStatus::Scheduled),
        "live" => Ok(MatchStatus::Live),
        "completed" => Ok(MatchStatus::Completed),
        "postponed" => Ok(MatchStatus::Postponed),
        "cancelled" => Ok(MatchStatus::Cancelled),
        other => Err(EngineError::Storage(format!("unknown match status {other:?}"))),
    }
}

// RFC 3339 in UTC with a `Z` suffix sorts lexically in time order.
fn time_str(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now_str() -> String {
    time_str(Utc::now())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| EngineError::Storage(format!("bad timestamp {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaTerm;
    use chrono::TimeZone;

    #[test]
    fn time_round_trips_through_text() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 4, 35, 0).unwrap();
        assert_eq!(time_str(t), "2024-06-01T04:35:00Z");
        assert_eq!(parse_time(&time_str(t)).unwrap(), t);
    }

    #[test]
    fn unknown_status_is_a_storage_error() {
        assert!(matches!(parse_status("abandoned"), Err(EngineError::Storage(_))));
    }

    #[test]
    fn deleting_formula_keeps_predictions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = Formula::new("f1", "u1", "F", vec![FormulaTerm::add("elo_diff", 0.01)], 0.5).unwrap();
        store.upsert_formula(&f).unwrap();

        let snap = MatchMetricSnapshot::new("m1").with_value("elo_diff", 50.0);
        let registry = crate::metric::MetricRegistry::with_default_catalog();
        let p = crate::evaluator::evaluate(&f, &registry, &snap, &Default::default()).unwrap();
        store.save_prediction(&p).unwrap();

        assert!(store.delete_formula("f1").unwrap());
        assert!(matches!(store.load_formula("f1"), Err(EngineError::FormulaNotFound(_))));
        let kept = store.predictions_for_formula("f1").unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].match_id, "m1");
        assert_eq!(kept[0].predicted_winner, p.predicted_winner);
    }

    #[test]
    fn failed_run_log_insert_leaves_cached_summary_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = Formula::new("f1", "u1", "F", vec![FormulaTerm::add("elo_diff", 0.01)], 0.5).unwrap();
        store.upsert_formula(&f).unwrap();
        store.conn().execute_batch("DROP TABLE backtest_runs").unwrap();

        let summary = BacktestSummary {
            total_games: 4,
            ..BacktestSummary::default()
        };
        assert!(matches!(
            store.save_backtest_summary("f1", &summary),
            Err(EngineError::Storage(_))
        ));
        assert_eq!(store.load_formula("f1").unwrap().backtest_results, None);
    }

    #[test]
    fn open_reports_unusable_parent_directory() {
        let blocker = std::env::temp_dir().join(format!("footy_formula_blocker_{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = SqliteStore::open(&blocker.join("db.sqlite")).err().unwrap();
        assert!(err.to_string().contains("create db directory"));

        std::fs::remove_file(&blocker).unwrap();
    }
}
