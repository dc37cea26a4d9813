//! Pulling Statcast pitch data and reading it back from the local table store.
//!
//! Data for one season lives in the `statcast_<year>` table of a single
//! SQLite file. Readers never fail on a missing season: they get an empty
//! result and the pipeline short-circuits downstream.

use chrono::{Datelike, NaiveDate};
use csv::StringRecord;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{HalfInning, PitchEvent};

pub const DB_FILE_NAME: &str = "statcast_pitches.db";

const SAVANT_SEARCH_URL: &str = "https://baseballsavant.mlb.com/statcast_search/csv";

impl FromSql for HalfInning {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "Top" => Ok(HalfInning::Top),
            "Bot" => Ok(HalfInning::Bottom),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for HalfInning {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Db,
    Csv,
}

impl FromStr for OutputType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "db" => Ok(OutputType::Db),
            "csv" => Ok(OutputType::Csv),
            other => Err(Error::Config(format!(
                "output_type must be one of {{'db', 'csv'}}, got `{}`",
                other
            ))),
        }
    }
}

pub fn table_name(year: i32) -> String {
    format!("statcast_{}", year)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("date `{}`: {}", s, e)))
}

/// Anything that can hand back pitch rows for an inclusive date range.
pub trait StatcastSource {
    fn fetch(&self, start: NaiveDate, end: NaiveDate, team: Option<&str>) -> Result<Vec<PitchEvent>>;
}

/// Rename repeated header names to `name.1`, `name.2`, ... leaving the
/// first occurrence as is. Savant exports list `pitcher` and `fielder_2`
/// twice.
pub fn dedup_headers(headers: &StringRecord) -> StringRecord {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    headers
        .iter()
        .map(|name| {
            let n = seen.entry(name).or_insert(0);
            let out = if *n == 0 {
                name.to_string()
            } else {
                format!("{}.{}", name, n)
            };
            *n += 1;
            out
        })
        .collect()
}

/// Parse a Statcast search CSV export. Columns not modelled by
/// `PitchEvent` are ignored.
pub fn parse_statcast_csv<R: Read>(reader: R) -> Result<Vec<PitchEvent>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = dedup_headers(rdr.headers()?);
    rdr.set_headers(headers);
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Baseball Savant search client. Searches are capped server-side, so the
/// range is requested one day at a time.
pub struct SavantClient {
    http: reqwest::blocking::Client,
    base_url: String,
    verbose: bool,
}

impl SavantClient {
    pub fn new(verbose: bool) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: SAVANT_SEARCH_URL.to_string(),
            verbose,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, day: NaiveDate, team: Option<&str>) -> String {
        format!(
            "{}?all=true&hfGT=R%7CPO%7CS%7C&player_type=pitcher&game_date_gt={day}&game_date_lt={day}&team={}&min_pitches=0&min_results=0&group_by=name&sort_col=pitches&sort_order=desc&min_abs=0&type=details",
            self.base_url,
            team.unwrap_or(""),
            day = day.format("%Y-%m-%d"),
        )
    }
}

impl StatcastSource for SavantClient {
    fn fetch(&self, start: NaiveDate, end: NaiveDate, team: Option<&str>) -> Result<Vec<PitchEvent>> {
        let mut rows = Vec::new();
        for day in start.iter_days().take_while(|d| *d <= end) {
            let body = self
                .http
                .get(self.search_url(day, team))
                .send()?
                .error_for_status()?
                .text()?;
            let day_rows = parse_statcast_csv(body.trim_start_matches('\u{feff}').as_bytes())?;
            if self.verbose {
                info!("{}: {} pitches", day, day_rows.len());
            } else {
                debug!("{}: {} pitches", day, day_rows.len());
            }
            rows.extend(day_rows);
        }
        Ok(rows)
    }
}

/// Parameters of one acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub start_dt: String,
    /// Defaults to `start_dt`
    pub end_dt: Option<String>,
    pub team: Option<String>,
    pub verbose: bool,
    /// `db` or `csv`
    pub output_type: String,
    pub overwrite: bool,
    pub output_path: PathBuf,
}

/// Pull pitches for the requested range and save them either into the
/// season table of `statcast_pitches.db` or as `statcast_<year>.csv`.
/// Returns the file written.
pub fn query_statcast(request: &AcquisitionRequest, source: &dyn StatcastSource) -> Result<PathBuf> {
    let output_type: OutputType = request.output_type.parse()?;
    let start = parse_date(&request.start_dt)?;
    let end = match &request.end_dt {
        Some(e) => parse_date(e)?,
        None => start,
    };
    if end < start {
        return Err(Error::InvalidInput(format!(
            "end date {} is before start date {}",
            end, start
        )));
    }

    let rows = source.fetch(start, end, request.team.as_deref())?;
    if request.verbose {
        info!("pulled {} pitches from {} to {}", rows.len(), start, end);
    }

    let year = start.year();
    match output_type {
        OutputType::Db => {
            let path = request.output_path.join(DB_FILE_NAME);
            let mut conn = Connection::open(&path)?;
            write_table(&mut conn, year, &rows, request.overwrite)?;
            Ok(path)
        }
        OutputType::Csv => {
            let path = request.output_path.join(format!("{}.csv", table_name(year)));
            write_csv(File::create(&path)?, &rows)?;
            Ok(path)
        }
    }
}

/// Store rows in the season table, replacing it when `overwrite` is set and
/// appending otherwise.
pub fn write_table(conn: &mut Connection, year: i32, rows: &[PitchEvent], overwrite: bool) -> Result<usize> {
    let table = table_name(year);
    let tx = conn.transaction()?;
    if overwrite {
        tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
    }
    let columns: Vec<String> = PitchEvent::COLUMNS
        .iter()
        .map(|(name, ty)| format!("\"{}\" {}", name, ty))
        .collect();
    tx.execute(
        &format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns.join(", ")),
        [],
    )?;
    {
        let names: Vec<String> = PitchEvent::COLUMNS.iter().map(|(n, _)| format!("\"{}\"", n)).collect();
        let slots: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            slots.join(", ")
        ))?;
        for p in rows {
            stmt.execute(params![
                p.game_pk,
                p.game_date,
                p.game_year,
                p.game_type,
                p.home_team,
                p.away_team,
                p.inning,
                p.inning_topbot,
                p.outs_when_up,
                p.at_bat_number,
                p.pitch_number,
                p.pitcher,
                p.batter,
                p.stand,
                p.p_throws,
                p.events,
                p.description,
                p.pitch_result,
                p.pitch_type,
                p.release_speed,
                p.release_spin_rate,
                p.balls,
                p.strikes,
                p.on_1b,
                p.on_2b,
                p.on_3b,
                p.bat_score,
                p.fld_score,
                p.post_bat_score,
                p.post_fld_score,
            ])?;
        }
    }
    tx.commit()?;
    info!("wrote {} rows to {}", rows.len(), table);
    Ok(rows.len())
}

pub fn write_csv<W: Write>(writer: W, rows: &[PitchEvent]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for p in rows {
        wtr.serialize(p)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Rows of an ad hoc projection over a season table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| match v {
                Value::Null => String::new(),
                Value::Integer(i) => i.to_string(),
                Value::Real(f) => f.to_string(),
                Value::Text(s) => s.clone(),
                Value::Blob(b) => format!("<{} bytes>", b.len()),
            }))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// `None` when the database file does not exist yet.
fn open_read_only(db_path: &Path) -> Result<Option<Connection>> {
    if !db_path.exists() {
        warn!("no database at {}; nothing to read", db_path.display());
        return Ok(None);
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(Some(conn))
}

/// `LIMIT` clause; a limit of 0 means no limit.
fn limit_clause(limit: Option<usize>) -> String {
    match limit {
        Some(n) if n > 0 => format!(" LIMIT {}", n),
        _ => String::new(),
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Select `columns` (all when `None`) from one season table, optionally
/// capped at `limit` rows (`Some(0)` reads everything). A season that was
/// never pulled, or a database file that does not exist, is an empty table.
pub fn query_db(db_path: impl AsRef<Path>, year: i32, columns: Option<&[String]>, limit: Option<usize>) -> Result<Table> {
    let db_path = db_path.as_ref();
    debug!("querying db at {}", db_path.display());
    let projection = match columns {
        Some(cols) if !cols.is_empty() => {
            if let Some(bad) = cols.iter().find(|c| !is_identifier(c)) {
                return Err(Error::InvalidInput(format!("column name `{}`", bad)));
            }
            cols.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
        }
        _ => "*".to_string(),
    };

    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Table::default());
    };
    let table = table_name(year);
    if !table_exists(&conn, &table)? {
        info!("{} not in {}; returning an empty table", table, db_path.display());
        return Ok(Table::default());
    }

    let mut sql = format!("SELECT {} FROM {}", projection, table);
    sql.push_str(&limit_clause(limit));
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = names.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })?
        .collect::<rusqlite::Result<Vec<Vec<Value>>>>()?;
    Ok(Table {
        columns: names,
        rows,
    })
}

/// Typed read of one season, optionally restricted to a single game, in
/// game / at-bat / pitch order.
pub fn query_pitches(
    db_path: impl AsRef<Path>,
    year: i32,
    game_pk: Option<i64>,
    limit: Option<usize>,
) -> Result<Vec<PitchEvent>> {
    let db_path = db_path.as_ref();
    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Vec::new());
    };
    let table = table_name(year);
    if !table_exists(&conn, &table)? {
        info!("{} not in {}; no pitches", table, db_path.display());
        return Ok(Vec::new());
    }

    let names: Vec<String> = PitchEvent::COLUMNS.iter().map(|(n, _)| format!("\"{}\"", n)).collect();
    let mut sql = format!("SELECT {} FROM {}", names.join(", "), table);
    if game_pk.is_some() {
        sql.push_str(" WHERE game_pk = ?1");
    }
    sql.push_str(" ORDER BY game_pk, at_bat_number, pitch_number");
    sql.push_str(&limit_clause(limit));

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PitchEvent> {
        Ok(PitchEvent {
            game_pk: row.get("game_pk")?,
            game_date: row.get("game_date")?,
            game_year: row.get("game_year")?,
            game_type: row.get("game_type")?,
            home_team: row.get("home_team")?,
            away_team: row.get("away_team")?,
            inning: row.get("inning")?,
            inning_topbot: row.get("inning_topbot")?,
            outs_when_up: row.get("outs_when_up")?,
            at_bat_number: row.get("at_bat_number")?,
            pitch_number: row.get("pitch_number")?,
            pitcher: row.get("pitcher")?,
            batter: row.get("batter")?,
            stand: row.get("stand")?,
            p_throws: row.get("p_throws")?,
            events: row.get("events")?,
            description: row.get("description")?,
            pitch_result: row.get("type")?,
            pitch_type: row.get("pitch_type")?,
            release_speed: row.get("release_speed")?,
            release_spin_rate: row.get("release_spin_rate")?,
            balls: row.get("balls")?,
            strikes: row.get("strikes")?,
            on_1b: row.get("on_1b")?,
            on_2b: row.get("on_2b")?,
            on_3b: row.get("on_3b")?,
            bat_score: row.get("bat_score")?,
            fld_score: row.get("fld_score")?,
            post_bat_score: row.get("post_bat_score")?,
            post_fld_score: row.get("post_fld_score")?,
        })
    };
    let pitches = match game_pk {
        Some(g) => stmt.query_map([g], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
        None => stmt.query_map([], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
    };
    debug!("read {} pitches from {}", pitches.len(), table);
    Ok(pitches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeSource {
        calls: Cell<usize>,
        rows: Vec<PitchEvent>,
    }

    impl FakeSource {
        fn new(rows: Vec<PitchEvent>) -> Self {
            Self {
                calls: Cell::new(0),
                rows,
            }
        }
    }

    impl StatcastSource for FakeSource {
        fn fetch(&self, _start: NaiveDate, _end: NaiveDate, _team: Option<&str>) -> Result<Vec<PitchEvent>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rows.clone())
        }
    }

    fn pitch(game_pk: i64, at_bat_number: i64, pitch_number: i64) -> PitchEvent {
        PitchEvent {
            game_pk,
            game_date: "2019-06-01".into(),
            game_year: 2019,
            game_type: "R".into(),
            home_team: "CLE".into(),
            away_team: "MIN".into(),
            inning: 1,
            inning_topbot: HalfInning::Bottom,
            at_bat_number,
            pitch_number,
            pitcher: 641745,
            batter: 596146,
            pitch_result: Some("S".into()),
            release_speed: Some(95.2),
            on_1b: Some(1),
            ..Default::default()
        }
    }

    fn request(dir: &Path, output_type: &str, overwrite: bool) -> AcquisitionRequest {
        AcquisitionRequest {
            start_dt: "2019-06-01".into(),
            end_dt: Some("2019-06-02".into()),
            team: None,
            verbose: false,
            output_type: output_type.into(),
            overwrite,
            output_path: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_invalid_output_type_fails_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![pitch(1, 1, 1)]);
        let err = query_statcast(&request(dir.path(), "parquet", true), &source).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("parquet"));
        assert_eq!(source.calls.get(), 0);
        assert!(!dir.path().join(DB_FILE_NAME).exists());
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "db", true);
        req.end_dt = Some("2019-05-01".into());
        let source = FakeSource::new(Vec::new());
        assert!(matches!(query_statcast(&req, &source), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_db_round_trip_overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![pitch(1, 1, 1), pitch(1, 1, 2)]);

        let path = query_statcast(&request(dir.path(), "db", true), &source).unwrap();
        assert_eq!(path, dir.path().join(DB_FILE_NAME));
        assert_eq!(query_db(&path, 2019, None, None).unwrap().len(), 2);

        query_statcast(&request(dir.path(), "db", false), &source).unwrap();
        assert_eq!(query_db(&path, 2019, None, None).unwrap().len(), 4);

        query_statcast(&request(dir.path(), "db", true), &source).unwrap();
        assert_eq!(query_db(&path, 2019, None, None).unwrap().len(), 2);

        let pitches = query_pitches(&path, 2019, Some(1), None).unwrap();
        assert_eq!(pitches, vec![pitch(1, 1, 1), pitch(1, 1, 2)]);
    }

    #[test]
    fn test_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![pitch(1, 1, 1)]);
        let path = query_statcast(&request(dir.path(), "csv", true), &source).unwrap();
        assert_eq!(path, dir.path().join("statcast_2019.csv"));
        let rows = parse_statcast_csv(File::open(&path).unwrap()).unwrap();
        assert_eq!(rows, vec![pitch(1, 1, 1)]);
    }

    #[test]
    fn test_absent_year_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join(DB_FILE_NAME)).unwrap();
        write_table(&mut conn, 2019, &[pitch(1, 1, 1)], true).unwrap();
        drop(conn);

        let db = dir.path().join(DB_FILE_NAME);
        let table = query_db(&db, 2015, None, None).unwrap();
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
        assert!(query_pitches(&db, 2015, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_projection_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(DB_FILE_NAME);
        let mut conn = Connection::open(&db).unwrap();
        let rows: Vec<PitchEvent> = (1..=5).map(|i| pitch(7, i, 1)).collect();
        write_table(&mut conn, 2019, &rows, true).unwrap();
        drop(conn);

        let cols = vec!["game_pk".to_string(), "at_bat_number".to_string(), "events".to_string()];
        let table = query_db(&db, 2019, Some(&cols), Some(3)).unwrap();
        assert_eq!(table.columns, cols);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0][0], Value::Integer(7));
        assert_eq!(table.rows[0][2], Value::Null);
        assert_eq!(table.column("at_bat_number"), Some(1));

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("game_pk,at_bat_number,events\n7,1,\n"));

        let bad = vec!["game_pk; DROP TABLE x".to_string()];
        assert!(matches!(query_db(&db, 2019, Some(&bad), None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_missing_database_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let table = query_db(&missing, 2019, None, None).unwrap();
        assert!(table.is_empty());
        assert!(query_pitches(&missing, 2019, Some(565717), None).unwrap().is_empty());
        assert!(!missing.exists());
    }

    #[test]
    fn test_zero_limit_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(DB_FILE_NAME);
        let mut conn = Connection::open(&db).unwrap();
        let rows: Vec<PitchEvent> = (1..=4).map(|i| pitch(7, i, 1)).collect();
        write_table(&mut conn, 2019, &rows, true).unwrap();
        drop(conn);

        assert_eq!(query_db(&db, 2019, None, Some(0)).unwrap().len(), 4);
        assert_eq!(query_pitches(&db, 2019, None, Some(0)).unwrap().len(), 4);
        assert_eq!(query_pitches(&db, 2019, None, Some(2)).unwrap().len(), 2);
    }

    /// Column order of a Baseball Savant detail export, including the
    /// repeated `pitcher` and `fielder_2` headers.
    const SAVANT_HEADER: &[&str] = &[
        "pitch_type", "game_date", "release_speed", "release_pos_x", "release_pos_z",
        "player_name", "batter", "pitcher", "events", "description", "spin_dir",
        "spin_rate_deprecated", "break_angle_deprecated", "break_length_deprecated", "zone",
        "des", "game_type", "stand", "p_throws", "home_team", "away_team", "type",
        "hit_location", "bb_type", "balls", "strikes", "game_year", "pfx_x", "pfx_z",
        "plate_x", "plate_z", "on_3b", "on_2b", "on_1b", "outs_when_up", "inning",
        "inning_topbot", "hc_x", "hc_y", "tfs_deprecated", "tfs_zulu_deprecated", "fielder_2",
        "umpire", "sv_id", "vx0", "vy0", "vz0", "ax", "ay", "az", "sz_top", "sz_bot",
        "hit_distance_sc", "launch_speed", "launch_angle", "effective_speed",
        "release_spin_rate", "release_extension", "game_pk", "pitcher", "fielder_2",
        "fielder_3", "fielder_4", "fielder_5", "fielder_6", "fielder_7", "fielder_8",
        "fielder_9", "release_pos_y", "estimated_ba_using_speedangle",
        "estimated_woba_using_speedangle", "woba_value", "woba_denom", "babip_value",
        "iso_value", "launch_speed_angle", "at_bat_number", "pitch_number", "pitch_name",
        "home_score", "away_score", "bat_score", "fld_score", "post_away_score",
        "post_home_score", "post_bat_score", "post_fld_score", "if_fielding_alignment",
        "of_fielding_alignment", "spin_axis", "delta_home_win_exp", "delta_run_exp",
    ];

    #[test]
    fn test_dedup_headers_suffixes_repeats() {
        let headers = StringRecord::from(vec!["pitcher", "fielder_2", "pitcher", "pitcher"]);
        let deduped = dedup_headers(&headers);
        assert_eq!(deduped, StringRecord::from(vec!["pitcher", "fielder_2", "pitcher.1", "pitcher.2"]));
    }

    #[test]
    fn test_parse_savant_export_with_repeated_headers() {
        let values: HashMap<&str, &str> = [
            ("pitch_type", "FF"),
            ("game_date", "2019-06-01"),
            ("release_speed", "94.1"),
            ("player_name", "Bieber, Shane"),
            ("batter", "596146"),
            ("pitcher", "669456"),
            ("events", "strikeout"),
            ("description", "swinging_strike"),
            ("game_type", "R"),
            ("stand", "L"),
            ("p_throws", "R"),
            ("home_team", "CLE"),
            ("away_team", "MIN"),
            ("type", "S"),
            ("balls", "1"),
            ("strikes", "2"),
            ("game_year", "2019"),
            ("on_1b", "621043"),
            ("outs_when_up", "1"),
            ("inning", "3"),
            ("inning_topbot", "Top"),
            ("fielder_2", "572287"),
            ("release_spin_rate", "2391"),
            ("game_pk", "565717"),
            ("at_bat_number", "21"),
            ("pitch_number", "5"),
            ("bat_score", "0"),
            ("fld_score", "2"),
            ("post_bat_score", "0"),
            ("post_fld_score", "2"),
        ]
        .into();

        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(SAVANT_HEADER).unwrap();
        wtr.write_record(SAVANT_HEADER.iter().map(|h| values.get(h).copied().unwrap_or("")))
            .unwrap();
        let text = String::from_utf8(wtr.into_inner().unwrap()).unwrap();

        let rows = parse_statcast_csv(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        let p = &rows[0];
        assert_eq!(p.pitcher, 669456);
        assert_eq!(p.game_pk, 565717);
        assert_eq!(p.at_bat_number, 21);
        assert_eq!(p.pitch_number, 5);
        assert_eq!(p.inning_topbot, HalfInning::Top);
        assert_eq!(p.pitch_result.as_deref(), Some("S"));
        assert_eq!(p.release_spin_rate, Some(2391.0));
        assert_eq!(p.on_1b, Some(621043));
        assert_eq!(p.on_2b, None);
        println!("✓ parsed {} Savant columns into one pitch", SAVANT_HEADER.len());
    }

    #[test]
    fn test_search_url_has_day_and_team() {
        let client = SavantClient::new(false).unwrap().with_base_url("http://localhost/csv");
        let day = NaiveDate::from_ymd_opt(2019, 6, 1).unwrap();
        let url = client.search_url(day, Some("CLE"));
        assert!(url.starts_with("http://localhost/csv?"));
        assert!(url.contains("game_date_gt=2019-06-01&game_date_lt=2019-06-01"));
        assert!(url.contains("team=CLE"));
    }
}
