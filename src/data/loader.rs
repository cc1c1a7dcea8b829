//! # Loader モジュール
//!
//! 駅座標ファイルとドローンごとのルートファイル（CSV）を読み込みます。
//!
//! - 駅座標: `名前,緯度,経度`
//! - ルート: `ドローンID,"緯度","経度","YYYY-MM-DD HH:MM:SS"`
//!
//! 値を囲む二重引用符は取り除き、空行は読み飛ばします。

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::common::{ActorId, Location, Waypoint};
use crate::models::route::Route;
use crate::models::traits::RouteDataSource;

/// ファイル内の日時表記
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 日時文字列を解析
pub fn parse_date_time(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), DATE_TIME_FORMAT)
}

/// データ読み込みエラー
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("ファイル読み込みエラー {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析エラー {}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// CSVファイル群からのデータ読み込み
#[derive(Debug, Clone)]
pub struct CsvRouteSource {
    pub stations_file: PathBuf,
    pub route_files: Vec<(ActorId, PathBuf)>,
}

impl CsvRouteSource {
    pub fn new(stations_file: PathBuf, route_files: Vec<(ActorId, PathBuf)>) -> Self {
        Self { stations_file, route_files }
    }
}

impl RouteDataSource for CsvRouteSource {
    fn stations(&self) -> Result<HashSet<Location>, LoadError> {
        info!(path = %self.stations_file.display(), "駅座標を読み込み中...");
        let stations: HashSet<Location> = parse_lines(&self.stations_file, |tokens| {
            let [_, latitude, longitude, ..] = tokens else {
                return Err(format!("3列必要ですが {} 列です", tokens.len()));
            };
            Ok(Some(Location::new(parse_coordinate(latitude)?, parse_coordinate(longitude)?)))
        })?
        .into_iter()
        .collect();
        info!("駅座標 {} 件の読み込み完了", stations.len());
        Ok(stations)
    }

    fn routes(&self, cutoff: NaiveDateTime) -> Result<BTreeMap<ActorId, Route>, LoadError> {
        let mut routes = BTreeMap::new();
        for (drone_id, path) in &self.route_files {
            info!(drone_id, path = %path.display(), "ルートを読み込み中...");
            let route: Route = parse_lines(path, |tokens| parse_waypoint(tokens, cutoff))?
                .into_iter()
                .collect();
            info!(drone_id, "経由地点数: {}", route.len());
            routes.insert(*drone_id, route);
        }
        Ok(routes)
    }
}

fn parse_waypoint(tokens: &[&str], cutoff: NaiveDateTime) -> Result<Option<Waypoint>, String> {
    let [_, latitude, longitude, time, ..] = tokens else {
        return Err(format!("4列必要ですが {} 列です", tokens.len()));
    };
    let time = parse_date_time(unquote(time)).map_err(|e| format!("日時 '{}' を解析できません: {}", time, e))?;
    if time > cutoff {
        debug!(%time, %cutoff, "終了時刻後の地点を除外");
        return Ok(None);
    }
    let location = Location::new(parse_coordinate(latitude)?, parse_coordinate(longitude)?);
    Ok(Some(Waypoint::new(location, time)))
}

fn unquote(token: &str) -> &str {
    token.trim().trim_matches('"')
}

fn parse_coordinate(token: &str) -> Result<f64, String> {
    let value = unquote(token);
    value
        .parse::<f64>()
        .map_err(|e| format!("座標 '{}' を解析できません: {}", value, e))
}

/// ファイルを1行ずつ解析（`None` を返した行は捨てる）
fn parse_lines<T, F>(path: &Path, mut parse: F) -> Result<Vec<T>, LoadError>
where
    F: FnMut(&[&str]) -> Result<Option<T>, String>,
{
    let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut items = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split(',').collect();
        match parse(&tokens) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(message) => {
                return Err(LoadError::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    message,
                });
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn cutoff() -> NaiveDateTime {
        parse_date_time("2011-03-22 08:10:00").unwrap()
    }

    #[test]
    fn test_load_stations() {
        let stations = write_file("Acton Town,51.503071,-0.280303\n\nAldgate,51.514342,-0.075627\nActon Town,51.503071,-0.280303\n");
        let source = CsvRouteSource::new(stations.path().to_path_buf(), Vec::new());
        let loaded = source.stations().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&Location::new(51.514342, -0.075627)));
    }

    #[test]
    fn test_load_routes_filters_after_cutoff() {
        let route = write_file(concat!(
            "5937,\"51.476105\",\"-0.100224\",\"2011-03-22 08:05:00\"\n",
            "5937,\"51.475967\",\"-0.100368\",\"2011-03-22 07:55:40\"\n",
            "5937,\"51.475967\",\"-0.100368\",\"2011-03-22 08:10:00\"\n",
            "5937,\"51.475702\",\"-0.100586\",\"2011-03-22 08:10:01\"\n",
        ));
        let stations = write_file("");
        let source = CsvRouteSource::new(
            stations.path().to_path_buf(),
            vec![(5937, route.path().to_path_buf())],
        );

        let mut routes = source.routes(cutoff()).unwrap();
        let route = routes.remove(&5937).unwrap();
        assert_eq!(route.len(), 3);
        assert_eq!(
            route.peek().map(|w| w.time),
            Some(parse_date_time("2011-03-22 07:55:40").unwrap())
        );
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let route = write_file("5937,\"51.47\",\"-0.10\",\"2011-03-22 08:00:00\"\n5937,\"abc\",\"-0.10\",\"2011-03-22 08:01:00\"\n");
        let source = CsvRouteSource::new(PathBuf::from("unused"), vec![(5937, route.path().to_path_buf())]);
        match source.routes(cutoff()) {
            Err(LoadError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("解析エラーが期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = CsvRouteSource::new(PathBuf::from("/nonexistent/stations.csv"), Vec::new());
        assert!(matches!(source.stations(), Err(LoadError::Io { .. })));
    }
}
