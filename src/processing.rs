//! Pitch rows to plate appearances.
//!
//! Everything here works on rows ordered by game, then at-bat number. The
//! aggregation step establishes that order and every later step relies on it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{info, warn};

use crate::columns::{AggKind, PitchColumn};
use crate::config::PipelineConfig;
use crate::features::feature_engineering;
use crate::types::{PitchEvent, PlateAppearance, StartKey};

pub const AL_TEAMS: &[&str] = &[
    "BAL", "BOS", "NYY", "TB", "TOR", "CWS", "CLE", "DET", "KC", "MIN", "HOU", "LAA", "OAK",
    "SEA", "TEX",
];

/// Column -> aggregation kind used to reduce pitches to appearances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationPlan(BTreeMap<PitchColumn, AggKind>);

impl AggregationPlan {
    pub fn new(rules: BTreeMap<PitchColumn, AggKind>) -> Self {
        Self(rules)
    }

    pub fn standard() -> Self {
        use AggKind::*;
        use PitchColumn::*;
        Self(
            [
                (PitchNumber, Max),
                (Balls, Last),
                (Strikes, Last),
                (ReleaseSpeed, Max),
                (ReleaseSpinRate, Max),
                (OutsWhenUp, First),
                (BatScore, First),
                (FldScore, First),
                (PostBatScore, Last),
                (PostFldScore, Last),
                (OnFirst, First),
                (OnSecond, First),
                (OnThird, First),
                (Ball, Sum),
                (Strike, Sum),
                (InPlay, Max),
                (SwingingStrike, Sum),
                (CalledStrike, Sum),
                (Foul, Sum),
            ]
            .into(),
        )
    }

    pub fn contains(&self, col: PitchColumn) -> bool {
        self.0.contains_key(&col)
    }

    pub fn kind(&self, col: PitchColumn) -> Option<AggKind> {
        self.0.get(&col).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PitchColumn, AggKind)> + '_ {
        self.0.iter().map(|(c, k)| (*c, *k))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AggregationPlan {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanOptions {
    /// Statcast game types to keep ("R" is the regular season)
    pub game_types: Vec<String>,
    /// Keep only games hosted by American League clubs
    pub al_only: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            game_types: vec!["R".to_string()],
            al_only: false,
        }
    }
}

/// Drop out-of-scope games and sort by game, at-bat, pitch.
pub fn preliminary_clean(mut pitches: Vec<PitchEvent>, options: &CleanOptions) -> Vec<PitchEvent> {
    let before = pitches.len();
    pitches.retain(|p| {
        options.game_types.iter().any(|t| *t == p.game_type)
            && (!options.al_only || AL_TEAMS.contains(&p.home_team.as_str()))
    });
    pitches.sort_by_key(|p| (p.game_pk, p.at_bat_number, p.pitch_number));
    info!("preliminary clean kept {} of {} pitches", pitches.len(), before);
    pitches
}

/// One row per `(game_pk, at_bat_number)`. Identity fields come from the
/// first pitch, the event from the last; numeric columns follow `plan`.
pub fn aggregate_at_bats(pitches: &[PitchEvent], plan: &AggregationPlan) -> Vec<PlateAppearance> {
    let mut groups: BTreeMap<(i64, i64), Vec<&PitchEvent>> = BTreeMap::new();
    for p in pitches {
        groups.entry((p.game_pk, p.at_bat_number)).or_default().push(p);
    }

    groups
        .into_values()
        .filter_map(|mut group| {
            group.sort_by_key(|p| p.pitch_number);
            let first = *group.first()?;
            let last = *group.last()?;
            let aggregates = plan
                .iter()
                .filter_map(|(col, kind)| {
                    kind.apply(group.iter().filter_map(|p| p.value(col)))
                        .map(|v| (col, v))
                })
                .collect();
            Some(PlateAppearance {
                game_pk: first.game_pk,
                game_date: first.game_date.clone(),
                game_year: first.game_year,
                game_type: first.game_type.clone(),
                at_bat_number: first.at_bat_number,
                inning: first.inning,
                half: first.inning_topbot,
                pitcher: first.pitcher,
                batter: first.batter,
                pitcher_team: first.pitcher_team().to_string(),
                batter_team: first.batter_team().to_string(),
                stand: first.stand.clone(),
                p_throws: first.p_throws.clone(),
                events: last.events.clone(),
                outs_before: first.outs_when_up,
                outs_after: first.outs_when_up,
                batters_faced: 0,
                pulled: false,
                aggregates,
                features: BTreeMap::new(),
            })
        })
        .collect()
}

/// Outs recorded by a plate-appearance event.
pub fn outs_on_play(event: Option<&str>) -> i64 {
    match event {
        Some("triple_play") => 3,
        Some(
            "grounded_into_double_play"
            | "double_play"
            | "strikeout_double_play"
            | "sac_fly_double_play"
            | "sac_bunt_double_play",
        ) => 2,
        Some(
            "strikeout"
            | "field_out"
            | "force_out"
            | "sac_fly"
            | "sac_bunt"
            | "fielders_choice_out"
            | "other_out",
        ) => 1,
        Some(e) if e.starts_with("caught_stealing") || e.starts_with("pickoff_caught_stealing") => 1,
        _ => 0,
    }
}

/// Fill `outs_after` within each half-inning. An appearance ends with the
/// outs the next batter came up with; the last one of a half-inning ends
/// with three, unless the game ended there (walk-off or final out).
///
/// Source outs are trusted as-is: a decreasing count is carried through.
pub fn compute_outs_per_inning(appearances: &mut [PlateAppearance]) {
    for i in 0..appearances.len() {
        let outs_after = {
            let cur = &appearances[i];
            match appearances.get(i + 1) {
                Some(next)
                    if next.game_pk == cur.game_pk
                        && next.inning == cur.inning
                        && next.half == cur.half =>
                {
                    next.outs_before
                }
                Some(next) if next.game_pk == cur.game_pk => 3,
                _ => (cur.outs_before + outs_on_play(cur.events.as_deref())).min(3),
            }
        };
        appearances[i].outs_after = outs_after;
    }
}

/// Starter for each (game, fielding team): the first pitcher whose
/// appearance records an out, else the first pitcher seen.
pub fn starting_pitchers(appearances: &[PlateAppearance]) -> BTreeMap<(i64, String), i64> {
    let mut first_seen: BTreeMap<(i64, String), i64> = BTreeMap::new();
    let mut first_out: BTreeMap<(i64, String), i64> = BTreeMap::new();
    for pa in appearances {
        let key = (pa.game_pk, pa.pitcher_team.clone());
        first_seen.entry(key.clone()).or_insert(pa.pitcher);
        if pa.outs_after > pa.outs_before {
            first_out.entry(key).or_insert(pa.pitcher);
        }
    }
    for (key, pitcher) in first_out {
        first_seen.insert(key, pitcher);
    }
    first_seen
}

/// Keep only appearances thrown by the game's starters.
pub fn identify_starting_pitchers(
    appearances: Vec<PlateAppearance>,
    starters: &BTreeMap<(i64, String), i64>,
) -> Vec<PlateAppearance> {
    let before = appearances.len();
    let kept: Vec<PlateAppearance> = appearances
        .into_iter()
        .filter(|pa| {
            starters
                .get(&(pa.game_pk, pa.pitcher_team.clone()))
                .map_or(false, |s| *s == pa.pitcher)
        })
        .collect();
    info!(
        "kept {} of {} appearances thrown by {} starters",
        kept.len(),
        before,
        starters.len()
    );
    kept
}

/// Running batters-faced count per (game, pitcher), starting at 1.
pub fn compute_batters_faced(appearances: &mut [PlateAppearance]) {
    let mut counts: HashMap<(i64, i64), i64> = HashMap::new();
    for pa in appearances.iter_mut() {
        let n = counts.entry((pa.game_pk, pa.pitcher)).or_insert(0);
        *n += 1;
        pa.batters_faced = *n;
    }
}

/// Flag the last appearance of every start as the one the pitcher was
/// pulled after.
pub fn add_postouts(appearances: &mut [PlateAppearance]) {
    let mut last: HashMap<(i64, i64), usize> = HashMap::new();
    for (i, pa) in appearances.iter().enumerate() {
        last.insert((pa.game_pk, pa.pitcher), i);
    }
    for pa in appearances.iter_mut() {
        pa.pulled = false;
    }
    for i in last.into_values() {
        appearances[i].pulled = true;
    }
}

pub fn get_games_pitchers_years(appearances: &[PlateAppearance]) -> Vec<StartKey> {
    appearances
        .iter()
        .map(PlateAppearance::start_key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderingViolation {
    InningDecreased {
        key: StartKey,
        at_bat_number: i64,
        from: i64,
        to: i64,
    },
    OutsDecreased {
        key: StartKey,
        at_bat_number: i64,
        before: i64,
        after: i64,
    },
}

impl fmt::Display for OrderingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingViolation::InningDecreased {
                key,
                at_bat_number,
                from,
                to,
            } => write!(
                f,
                "game {} pitcher {} at-bat {}: inning went from {} to {}",
                key.game_pk, key.pitcher, at_bat_number, from, to
            ),
            OrderingViolation::OutsDecreased {
                key,
                at_bat_number,
                before,
                after,
            } => write!(
                f,
                "game {} pitcher {} at-bat {}: outs went from {} to {}",
                key.game_pk, key.pitcher, at_bat_number, before, after
            ),
        }
    }
}

/// Report appearances that break the chronological contract. Nothing is
/// modified.
pub fn check_ordering(appearances: &[PlateAppearance]) -> Vec<OrderingViolation> {
    let mut violations = Vec::new();
    let mut prev_inning: HashMap<StartKey, i64> = HashMap::new();
    for pa in appearances {
        let key = pa.start_key();
        if let Some(prev) = prev_inning.insert(key, pa.inning) {
            if pa.inning < prev {
                violations.push(OrderingViolation::InningDecreased {
                    key,
                    at_bat_number: pa.at_bat_number,
                    from: prev,
                    to: pa.inning,
                });
            }
        }
        if pa.outs_after < pa.outs_before {
            violations.push(OrderingViolation::OutsDecreased {
                key,
                at_bat_number: pa.at_bat_number,
                before: pa.outs_before,
                after: pa.outs_after,
            });
        }
    }
    violations
}

/// Full aggregator: clean, aggregate, outs, starters, batters faced,
/// removal flag, features. Empty input returns empty output.
pub fn process_pitches(pitches: Vec<PitchEvent>, config: &PipelineConfig) -> Vec<PlateAppearance> {
    if pitches.is_empty() {
        warn!("no pitches to process");
        return Vec::new();
    }
    let pitches = preliminary_clean(pitches, &config.clean);
    if pitches.is_empty() {
        warn!("no pitches left after cleaning");
        return Vec::new();
    }

    let mut appearances = aggregate_at_bats(&pitches, &config.aggregation);
    compute_outs_per_inning(&mut appearances);
    let starters = starting_pitchers(&appearances);
    let mut appearances = identify_starting_pitchers(appearances, &starters);
    compute_batters_faced(&mut appearances);
    add_postouts(&mut appearances);

    for v in check_ordering(&appearances) {
        warn!("ordering anomaly passed through: {}", v);
    }

    feature_engineering(&mut appearances, &config.features);
    info!(
        "processed {} pitches into {} starter appearances",
        pitches.len(),
        appearances.len()
    );
    appearances
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HalfInning;

    fn pitch(game_pk: i64, at_bat_number: i64, pitch_number: i64, pitcher: i64) -> PitchEvent {
        PitchEvent {
            game_pk,
            game_year: 2019,
            game_type: "R".into(),
            home_team: "CLE".into(),
            away_team: "MIN".into(),
            inning: 1,
            at_bat_number,
            pitch_number,
            pitcher,
            batter: 500 + at_bat_number,
            pitch_result: Some("B".into()),
            ..Default::default()
        }
    }

    fn appearance(game_pk: i64, at_bat_number: i64, pitcher: i64) -> PlateAppearance {
        PlateAppearance {
            game_pk,
            at_bat_number,
            pitcher,
            inning: 1,
            pitcher_team: "CLE".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_one_row_per_group() {
        let pitches = vec![
            pitch(1, 1, 1, 10),
            pitch(1, 1, 2, 10),
            pitch(1, 2, 1, 10),
            pitch(2, 1, 1, 20),
            pitch(2, 1, 2, 20),
            pitch(2, 1, 3, 20),
        ];
        let groups: BTreeSet<(i64, i64)> = pitches.iter().map(|p| (p.game_pk, p.at_bat_number)).collect();
        let pas = aggregate_at_bats(&pitches, &AggregationPlan::standard());
        assert_eq!(pas.len(), groups.len());
        assert_eq!(pas[0].aggregates[&PitchColumn::PitchNumber], 2.0);
        assert_eq!(pas[0].aggregates[&PitchColumn::Ball], 2.0);
        assert_eq!(pas[2].aggregates[&PitchColumn::PitchNumber], 3.0);
        assert!(!pas[0].aggregates.contains_key(&PitchColumn::ReleaseSpeed));
    }

    #[test]
    fn test_aggregate_orders_unsorted_input_and_takes_last_event() {
        let mut last = pitch(1, 1, 2, 10);
        last.events = Some("strikeout".into());
        last.strikes = 2;
        let mut first = pitch(1, 1, 1, 10);
        first.strikes = 1;
        let pas = aggregate_at_bats(&[pitch(1, 2, 1, 10), last, first], &AggregationPlan::standard());
        assert_eq!(pas.len(), 2);
        assert_eq!(pas[0].at_bat_number, 1);
        assert_eq!(pas[0].events.as_deref(), Some("strikeout"));
        assert_eq!(pas[0].aggregates[&PitchColumn::Strikes], 2.0);
    }

    #[test]
    fn test_outs_per_inning() {
        let mut pas: Vec<PlateAppearance> = (1..=5).map(|ab| appearance(1, ab, 10)).collect();
        // top 1st: 0, 1, 2 outs; bottom 1st: 0, then game over
        for (pa, outs) in pas.iter_mut().zip([0, 1, 2, 0, 0]) {
            pa.outs_before = outs;
        }
        pas[3].half = HalfInning::Bottom;
        pas[4].half = HalfInning::Bottom;
        pas[4].events = Some("grounded_into_double_play".into());

        compute_outs_per_inning(&mut pas);
        let after: Vec<i64> = pas.iter().map(|p| p.outs_after).collect();
        assert_eq!(after, vec![1, 2, 3, 0, 2]);
    }

    #[test]
    fn test_decreasing_outs_pass_through() {
        let mut pas = vec![appearance(1, 1, 10), appearance(1, 2, 10)];
        pas[0].outs_before = 2;
        pas[1].outs_before = 1;
        compute_outs_per_inning(&mut pas);
        assert_eq!(pas[0].outs_after, 1);
        let violations = check_ordering(&pas);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].to_string().contains("outs went from 2 to 1"));
    }

    #[test]
    fn test_inning_decrease_is_reported() {
        let mut pas = vec![appearance(1, 7, 10), appearance(1, 8, 10), appearance(2, 1, 10)];
        pas[0].inning = 2;
        pas[1].inning = 1;
        pas[2].inning = 1;
        let violations = check_ordering(&pas);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            OrderingViolation::InningDecreased { at_bat_number: 8, from: 2, to: 1, .. }
        ));
        assert!(violations[0].to_string().contains("inning went from 2 to 1"));
    }

    #[test]
    fn test_starter_is_first_pitcher_to_record_an_out() {
        let mut pas = vec![
            appearance(1, 1, 77),
            appearance(1, 2, 10),
            appearance(1, 3, 10),
            appearance(1, 4, 33),
        ];
        // opener 77 walks the only batter he faces
        pas[0].outs_after = 0;
        pas[1].outs_after = 1;
        let starters = starting_pitchers(&pas);
        assert_eq!(starters[&(1, "CLE".to_string())], 10);

        let kept = identify_starting_pitchers(pas, &starters);
        let abs: Vec<i64> = kept.iter().map(|p| p.at_bat_number).collect();
        assert_eq!(abs, vec![2, 3]);
    }

    #[test]
    fn test_batters_faced_resets_per_game() {
        let mut pas = vec![
            appearance(1, 1, 10),
            appearance(1, 2, 10),
            appearance(2, 1, 10),
        ];
        compute_batters_faced(&mut pas);
        let bf: Vec<i64> = pas.iter().map(|p| p.batters_faced).collect();
        assert_eq!(bf, vec![1, 2, 1]);
    }

    #[test]
    fn test_add_postouts_single_starter() {
        let mut pas = vec![appearance(1, 1, 10), appearance(1, 2, 10)];
        pas[0].outs_after = 1;
        pas[1].outs_after = 3;
        add_postouts(&mut pas);
        let pulled: Vec<bool> = pas.iter().map(|p| p.pulled).collect();
        assert_eq!(pulled, vec![false, true]);
    }

    #[test]
    fn test_add_postouts_interleaved_starters() {
        let mut pas = vec![
            appearance(1, 1, 10),
            appearance(1, 2, 20),
            appearance(1, 3, 10),
            appearance(1, 4, 20),
            appearance(1, 5, 10),
        ];
        add_postouts(&mut pas);
        for pitcher in [10, 20] {
            let flags: Vec<bool> = pas.iter().filter(|p| p.pitcher == pitcher).map(|p| p.pulled).collect();
            assert_eq!(flags.iter().filter(|f| **f).count(), 1);
            assert_eq!(flags.last(), Some(&true));
        }
    }

    #[test]
    fn test_preliminary_clean_filters_and_sorts() {
        let mut spring = pitch(3, 1, 1, 10);
        spring.game_type = "S".into();
        let mut nl = pitch(4, 1, 1, 10);
        nl.home_team = "CHC".into();
        let pitches = vec![pitch(2, 1, 1, 10), spring, nl, pitch(1, 2, 1, 10), pitch(1, 1, 1, 10)];

        let options = CleanOptions {
            al_only: true,
            ..Default::default()
        };
        let cleaned = preliminary_clean(pitches, &options);
        let keys: Vec<(i64, i64)> = cleaned.iter().map(|p| (p.game_pk, p.at_bat_number)).collect();
        assert_eq!(keys, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_process_empty_short_circuits() {
        let config = PipelineConfig::default();
        assert!(process_pitches(Vec::new(), &config).is_empty());
    }

    #[test]
    fn test_process_two_starters() {
        let mut pitches = Vec::new();
        // top 1st: home starter 10 gets three outs, then bottom 1st: away starter 20
        for ab in 1..=3 {
            let mut p = pitch(1, ab, 1, 10);
            p.outs_when_up = ab - 1;
            p.events = Some("field_out".into());
            pitches.push(p);
        }
        for ab in 4..=5 {
            let mut p = pitch(1, ab, 1, 20);
            p.inning_topbot = HalfInning::Bottom;
            p.outs_when_up = ab - 4;
            p.events = Some("strikeout".into());
            pitches.push(p);
        }
        // reliever for the home side in the 2nd
        let mut relief = pitch(1, 6, 1, 99);
        relief.inning = 2;
        relief.events = Some("field_out".into());
        pitches.push(relief);

        let pas = process_pitches(pitches, &PipelineConfig::default());
        assert_eq!(pas.len(), 5);
        assert!(pas.iter().all(|p| p.pitcher != 99));
        let keys = get_games_pitchers_years(&pas);
        assert_eq!(keys.len(), 2);
        let pulled: Vec<(i64, bool)> = pas.iter().map(|p| (p.at_bat_number, p.pulled)).collect();
        assert_eq!(
            pulled,
            vec![(1, false), (2, false), (3, true), (4, false), (5, true)]
        );
    }
}
