//! # Simulation モジュール
//!
//! ドローンフリートシミュレーションの実行エンジンを提供します。
//!
//! エンジンはメッセージバスとレポートリポジトリを用意し、ディスパッチャに
//! 駅座標とルートを読み込ませたうえで、ディスパッチャと各ドローンを
//! 独立したtokioタスクとして起動します。起動したタスクのハンドルは
//! エンジンが保持し、すべての完了を待ってから集計を返します。
//!
//! ## 実行の流れ
//!
//! 1. **読み込み**: 駅座標とドローンごとのルートを読み込み（終了時刻以降は除外）
//! 2. **起動**: ディスパッチャが各ドローンに起動要求を送り、起動通知を待つ
//! 3. **配信**: 積載量の上限内で経由地点をバッチ配信し、問い合わせ・レポートを処理
//! 4. **停止**: 全ルート配信後に停止要求を送り、全ドローンの停止通知を待つ
//!
//! いずれかのアクターがプロトコル違反などで異常終了した場合は、残りの
//! タスクを中断してエラーを返します。
//!
//! ## 使用例
//!
//! ```rust,ignore
//! let config = ScenarioConfig::from_file("scenarios/london.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let summary = engine.run()?;
//! summary.print();
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::data::InMemoryReportRepository;
use crate::messaging::InMemoryChannel;
use crate::models::*;
use crate::scenario::{ScenarioConfig, ScenarioError};

/// シミュレーション実行エラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),
    #[error("ドローン {0} が異常終了しました: {1}")]
    Drone(ActorId, #[source] DroneError),
    #[error("アクタータスクの実行に失敗しました: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("ランタイムを作成できません: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("初期化されていません")]
    NotInitialized,
}

/// 実行結果の集計
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    /// ディスパッチャの集計
    pub dispatcher: DispatcherSummary,
    /// ドローンごとの統計
    pub drones: BTreeMap<ActorId, DroneStats>,
}

impl SimulationSummary {
    /// 集計を表示
    pub fn print(&self) {
        println!("=== シミュレーション結果 ===");
        println!("起動ドローン数: {}機", self.dispatcher.drones_activated);
        println!("停止ドローン数: {}機", self.dispatcher.drones_inactivated);
        println!("配信巡回数: {}", self.dispatcher.distribution_passes);
        println!("配信バッチ数: {}", self.dispatcher.batches_sent);
        println!("配信地点数: {}", self.dispatcher.waypoints_dispatched);
        println!("駅近接問い合わせ: {}件", self.dispatcher.proximity_queries);
        println!("レポート総数: {}件", self.dispatcher.reports_saved);
        println!();

        for (drone_id, stats) in &self.drones {
            println!(
                "  {}: 訪問 {}地点, レポート {}件, 最大積載 {}, 破棄バッチ {}",
                drone_id,
                stats.waypoints_visited,
                self.dispatcher.reports_by_drone.get(drone_id).copied().unwrap_or(0),
                self.dispatcher.peak_load.get(drone_id).copied().unwrap_or(0),
                stats.batches_discarded,
            );
        }
    }
}

/// アクタータスクの終了結果
enum ActorOutcome {
    Dispatcher(DispatcherSummary),
    Drone(ActorId, DroneStats),
}

/// ディスパッチャとドローンを起動し、すべての終了を待つ
///
/// `drones` は読み込み済みのディスパッチャが起動対象とするドローンで
/// なければなりません。
pub async fn run_fleet<C, R>(
    dispatcher: Dispatcher<C, R>,
    drones: Vec<Drone<C>>,
) -> Result<SimulationSummary, SimulationError>
where
    C: Channel,
    R: ReportRepository,
{
    let mut actors = JoinSet::new();

    for drone in drones {
        let drone_id = drone.id();
        actors.spawn(async move {
            drone
                .run()
                .await
                .map(|stats| ActorOutcome::Drone(drone_id, stats))
                .map_err(|e| SimulationError::Drone(drone_id, e))
        });
    }
    actors.spawn(async move {
        dispatcher
            .run()
            .await
            .map(ActorOutcome::Dispatcher)
            .map_err(SimulationError::from)
    });

    let mut summary = SimulationSummary::default();
    while let Some(joined) = actors.join_next().await {
        let outcome = match joined.map_err(SimulationError::from).and_then(|result| result) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("アクターが異常終了したため残りのタスクを中断します: {}", e);
                actors.abort_all();
                return Err(e);
            }
        };
        match outcome {
            ActorOutcome::Dispatcher(dispatcher) => summary.dispatcher = dispatcher,
            ActorOutcome::Drone(drone_id, stats) => {
                summary.drones.insert(drone_id, stats);
            }
        }
    }
    Ok(summary)
}

/// シナリオからシミュレーションを組み立てて実行するエンジン
pub struct SimulationEngine {
    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
    channel: Arc<InMemoryChannel>,
    repository: Arc<InMemoryReportRepository>,
    dispatcher: Option<Dispatcher<InMemoryChannel, InMemoryReportRepository>>,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        Self {
            scenario_config: scenario,
            verbose_level,
            channel: Arc::new(InMemoryChannel::new()),
            repository: Arc::new(InMemoryReportRepository::new()),
            dispatcher: None,
        }
    }

    /// ディスパッチャを作成し、駅座標とルートを読み込む
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        let source = self.scenario_config.route_source();
        let mut dispatcher = Dispatcher::new(
            self.dispatcher_settings()?,
            Arc::clone(&self.channel),
            Arc::clone(&self.repository),
        );
        dispatcher.load(&source)?;

        if self.verbose_level > 0 {
            info!("初期化完了: ドローン {}機が起動対象", dispatcher.drone_ids().len());
        }
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn dispatcher_settings(&self) -> Result<DispatcherSettings, SimulationError> {
        let config = &self.scenario_config;
        Ok(DispatcherSettings {
            id: config.dispatcher.id,
            max_drone_capacity: config.dispatcher.max_drone_capacity,
            max_distance_to_station: config.dispatcher.max_distance_to_station,
            end_date: config.end_date()?,
        })
    }

    /// 起動対象ドローンを作成
    fn build_drones(&self, drone_ids: &[ActorId]) -> Vec<Drone<InMemoryChannel>> {
        let config = &self.scenario_config;
        config
            .drones
            .iter()
            .filter(|drone| drone_ids.contains(&drone.id))
            .map(|drone| {
                let settings = DroneSettings {
                    dispatcher_id: config.dispatcher.id,
                    speed: drone.speed,
                    max_capacity: config.dispatcher.max_drone_capacity,
                    seed: config.sim.seed,
                };
                Drone::new(drone.id, settings, Arc::clone(&self.channel))
            })
            .collect()
    }

    /// マルチスレッドランタイム上でシミュレーションを実行
    pub fn run(&mut self) -> Result<SimulationSummary, SimulationError> {
        let dispatcher = self.dispatcher.take().ok_or(SimulationError::NotInitialized)?;
        let drones = self.build_drones(&dispatcher.drone_ids());

        info!("=== シミュレーション実行開始 ===");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()?;
        let summary = runtime.block_on(run_fleet(dispatcher, drones))?;
        info!("=== シミュレーション完了 ===");

        Ok(summary)
    }
}
