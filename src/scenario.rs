use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::data::CsvRouteSource;
use crate::data::loader::parse_date_time;
use crate::models::common::ActorId;

/// シナリオメタデータ
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// この時刻より後の経由地点は読み込まない（`YYYY-MM-DD HH:MM:SS`）
    pub end_date: String,
    /// レポート生成用乱数のシード
    #[serde(default)]
    pub seed: u64,
}

/// ディスパッチャ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct DispatcherConfig {
    pub id: ActorId,
    pub max_drone_capacity: usize,
    pub max_distance_to_station: f64,
    pub stations_file: PathBuf,
}

/// ドローン設定
#[derive(Debug, Deserialize, Serialize)]
pub struct DroneConfig {
    pub id: ActorId,
    pub route_file: PathBuf,
    /// 移動速度（座標単位/ミリ秒）
    pub speed: f64,
}

/// ログ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
            dir: default_log_dir(),
        }
    }
}

/// 完全なシナリオ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub dispatcher: DispatcherConfig,
    pub drones: Vec<DroneConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 相対パスの基準ディレクトリ（シナリオファイルの置き場所）
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let mut config = Self::from_yaml(&contents)
            .map_err(|e| match e {
                ScenarioError::ParseError(_, err) => ScenarioError::ParseError(path.to_path_buf(), err),
                other => other,
            })?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(config)
    }

    /// YAML文字列からシナリオ設定を読み込み（パスはカレントディレクトリ基準）
    pub fn from_yaml(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.end_date()?;

        if self.dispatcher.max_drone_capacity == 0 {
            return Err(ScenarioError::ValidationError("max_drone_capacity must be positive".to_string()));
        }
        if !(self.dispatcher.max_distance_to_station > 0.0) {
            return Err(ScenarioError::ValidationError("max_distance_to_station must be positive".to_string()));
        }
        if self.drones.is_empty() {
            return Err(ScenarioError::ValidationError("at least one drone is required".to_string()));
        }

        let mut seen = HashSet::new();
        for drone in &self.drones {
            if drone.id == self.dispatcher.id {
                return Err(ScenarioError::ValidationError(
                    format!("drone id {} collides with dispatcher id", drone.id)
                ));
            }
            if !seen.insert(drone.id) {
                return Err(ScenarioError::ValidationError(
                    format!("duplicate drone id {}", drone.id)
                ));
            }
            if !(drone.speed > 0.0) {
                return Err(ScenarioError::ValidationError(
                    format!("drone {} speed must be positive", drone.id)
                ));
            }
        }

        Ok(())
    }

    /// シミュレーション終了時刻
    pub fn end_date(&self) -> Result<NaiveDateTime, ScenarioError> {
        parse_date_time(&self.sim.end_date)
            .map_err(|e| ScenarioError::ValidationError(format!("invalid end_date '{}': {}", self.sim.end_date, e)))
    }

    /// 設定ファイルのパスを解決
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// 駅座標とルートのCSVデータソースを作成
    pub fn route_source(&self) -> CsvRouteSource {
        CsvRouteSource::new(
            self.resolve(&self.dispatcher.stations_file),
            self.drones
                .iter()
                .map(|drone| (drone.id, self.resolve(&drone.route_file)))
                .collect(),
        )
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("終了時刻: {}", self.sim.end_date);
        println!("シード値: {}", self.sim.seed);
        println!();

        println!("=== ディスパッチャ ===");
        println!("ID: {}", self.dispatcher.id);
        println!("最大積載数: {}地点", self.dispatcher.max_drone_capacity);
        println!("駅近接距離: {}", self.dispatcher.max_distance_to_station);
        println!("駅座標: {}", self.resolve(&self.dispatcher.stations_file).display());
        println!();

        println!("=== ドローン ===");
        println!("機数: {}機", self.drones.len());
        for drone in &self.drones {
            println!("  {}: 速度 {} (ルート: {})", drone.id, drone.speed, self.resolve(&drone.route_file).display());
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}
