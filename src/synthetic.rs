//! Seeded synthetic AFL season for demos, benches and tests.
//!
//! Each team gets a hidden strength; metrics and final scores are noisy
//! functions of the strength gap, so a sensible formula beats a coin flip.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backtest::HistoricalMatch;
use crate::error::Result;
use crate::model::{Match, MatchMetricSnapshot, MatchResult, MatchStatus};
use crate::repository::MemoryStore;
use crate::store::SqliteStore;

pub const AFL_TEAMS: [&str; 18] = [
    "ADE", "BRL", "CAR", "COL", "ESS", "FRE", "GEE", "GCS", "GWS", "HAW", "MEL", "NTH", "PTA",
    "RIC", "STK", "SYD", "WCE", "WBD",
];

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub season: u16,
    pub rounds: u16,
    /// Probability that any single metric is absent from a snapshot.
    pub missing_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            season: 2024,
            rounds: 23,
            missing_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticSeason {
    pub matches: Vec<Match>,
    pub snapshots: Vec<MatchMetricSnapshot>,
}

pub fn generate_season(cfg: SyntheticConfig) -> SyntheticSeason {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let strengths = AFL_TEAMS
        .iter()
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect::<Vec<f64>>();

    let season_start = Utc
        .with_ymd_and_hms(i32::from(cfg.season), 3, 7, 8, 30, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let mut out = SyntheticSeason::default();
    for round in 0..cfg.rounds {
        for (slot, (h, a)) in round_pairings(AFL_TEAMS.len(), round as usize)
            .into_iter()
            .enumerate()
        {
            let kickoff = season_start
                + Duration::weeks(i64::from(round))
                + Duration::hours(3 * slot as i64);
            let id = format!("{}-r{:02}-{}-{}", cfg.season, round + 1, AFL_TEAMS[h], AFL_TEAMS[a]);

            let home_ground = rng.gen_bool(0.8);
            let gap = strengths[h] - strengths[a] + if home_ground { 0.25 } else { 0.0 };

            let snapshot = metric_snapshot(&mut rng, &id, kickoff, gap, strengths[h], home_ground, cfg.missing_rate);

            let home_score = (80.0 + 14.0 * gap + rng.gen_range(-28.0..28.0)).max(20.0).round() as u32;
            let away_score = (80.0 - 14.0 * gap + rng.gen_range(-28.0..28.0)).max(20.0).round() as u32;

            out.matches.push(Match {
                id,
                season: cfg.season,
                round: round + 1,
                home_team: AFL_TEAMS[h].to_string(),
                away_team: AFL_TEAMS[a].to_string(),
                venue: format!("{} home", AFL_TEAMS[h]),
                kickoff,
                status: MatchStatus::Completed,
                result: Some(MatchResult::new(home_score, away_score)),
            });
            out.snapshots.push(snapshot);
        }
    }
    out
}

fn metric_snapshot(
    rng: &mut StdRng,
    match_id: &str,
    kickoff: DateTime<Utc>,
    gap: f64,
    home_strength: f64,
    home_ground: bool,
    missing_rate: f64,
) -> MatchMetricSnapshot {
    let mut noise = |spread: f64| rng.gen_range(-spread..spread);
    let values = [
        ("possession", (50.0 + 4.0 * gap + noise(3.0)).clamp(30.0, 70.0)),
        ("disposal_diff", 25.0 * gap + noise(20.0)),
        ("inside50_diff", 6.0 * gap + noise(6.0)),
        ("scoring_shot_diff", 5.0 * gap + noise(5.0)),
        ("clearance_diff", 4.0 * gap + noise(6.0)),
        ("tackle_diff", noise(15.0)),
        ("points_against_avg", (80.0 - 8.0 * home_strength + noise(6.0)).max(40.0)),
        ("last5_win_rate", (50.0 + 25.0 * gap + noise(20.0)).clamp(0.0, 100.0)),
        ("ladder_gap", (-6.0 * gap + noise(3.0)).round().clamp(-17.0, 17.0)),
        ("h2h_win_rate", (50.0 + 15.0 * gap + noise(25.0)).clamp(0.0, 100.0)),
        ("home_ground", if home_ground { 1.0 } else { 0.0 }),
        ("venue_win_rate", (55.0 + 10.0 * gap + noise(15.0)).clamp(0.0, 100.0)),
        ("travel_km", noise(1750.0) + 1750.0),
        ("rain_mm", (noise(10.0) + 2.0).max(0.0)),
        ("wind_kmh", noise(20.0) + 20.0),
        ("elo_diff", 120.0 * gap + noise(40.0)),
    ];

    let mut snapshot =
        MatchMetricSnapshot::new(match_id).with_as_of(kickoff - Duration::hours(24));
    for (metric_id, value) in values {
        if missing_rate > 0.0 && rng.gen_bool(missing_rate.clamp(0.0, 1.0)) {
            continue;
        }
        snapshot.values.insert(metric_id.to_string(), value);
    }
    snapshot
}

// Circle-method round robin: team 0 stays put, the rest rotate.
fn round_pairings(teams: usize, round: usize) -> Vec<(usize, usize)> {
    let n = teams - teams % 2;
    if n < 2 {
        return Vec::new();
    }
    let rotating = n - 1;
    let mut ring = Vec::with_capacity(n);
    ring.push(0);
    for i in 0..rotating {
        ring.push(1 + (i + round) % rotating);
    }
    (0..n / 2)
        .map(|i| {
            let (a, b) = (ring[i], ring[n - 1 - i]);
            if (round + i) % 2 == 0 { (a, b) } else { (b, a) }
        })
        .collect()
}

impl SyntheticSeason {
    /// Matches joined with their snapshots, in kickoff order.
    pub fn history(&self) -> Vec<HistoricalMatch> {
        self.matches
            .iter()
            .zip(&self.snapshots)
            .filter_map(|(m, s)| {
                Some(HistoricalMatch {
                    match_id: m.id.clone(),
                    kickoff: m.kickoff,
                    snapshot: s.clone(),
                    result: m.completed_result()?,
                })
            })
            .collect()
    }

    pub fn into_memory_store(self) -> MemoryStore {
        let store = MemoryStore::new();
        for m in self.matches {
            store.insert_match(m);
        }
        for s in self.snapshots {
            store.insert_snapshot(s);
        }
        store
    }

    pub fn write_to(&self, store: &SqliteStore) -> Result<()> {
        for m in &self.matches {
            store.upsert_match(m)?;
        }
        for s in &self.snapshots {
            store.upsert_snapshot(s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricRegistry;
    use std::collections::HashSet;

    #[test]
    fn pairings_cover_every_team_once_per_round() {
        for round in 0..17 {
            let pairs = round_pairings(18, round);
            assert_eq!(pairs.len(), 9);
            let seen = pairs
                .iter()
                .flat_map(|(a, b)| [*a, *b])
                .collect::<HashSet<_>>();
            assert_eq!(seen.len(), 18);
        }
    }

    #[test]
    fn same_seed_same_season() {
        let a = generate_season(SyntheticConfig::default());
        let b = generate_season(SyntheticConfig::default());
        assert_eq!(a.matches, b.matches);
        assert_eq!(a.snapshots, b.snapshots);
        assert_eq!(a.matches.len(), 23 * 9);
    }

    #[test]
    fn snapshot_values_respect_catalog() {
        let registry = MetricRegistry::with_default_catalog();
        let season = generate_season(SyntheticConfig {
            rounds: 4,
            ..SyntheticConfig::default()
        });
        for snap in &season.snapshots {
            for (id, v) in &snap.values {
                registry.validate_value(id, *v).unwrap();
            }
        }
    }

    #[test]
    fn missing_rate_drops_values() {
        let season = generate_season(SyntheticConfig {
            rounds: 3,
            missing_rate: 0.5,
            ..SyntheticConfig::default()
        });
        let total: usize = season.snapshots.iter().map(|s| s.values.len()).sum();
        assert!(total < season.snapshots.len() * 16);
    }
}
