use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::data::LoadError;
use crate::messaging::{ChannelError, Envelope, Message, MessageKind};
use crate::models::{
    common::{ActorId, Location, TrafficReport},
    route::Route,
    traits::{Channel, ReportRepository, RouteDataSource},
};

/// ディスパッチャの動作パラメータ
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// ディスパッチャのID
    pub id: ActorId,
    /// ドローン1機が機上に保持できる経由地点の最大数
    pub max_drone_capacity: usize,
    /// 「駅の近く」とみなす最大距離（この値は含まない）
    pub max_distance_to_station: f64,
    /// この時刻より後の経由地点は読み込まない
    pub end_date: NaiveDateTime,
}

/// ディスパッチャの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// 駅座標とルートの読み込み待ち
    Loading,
    /// 起動要求を送り、起動通知を待機中
    Activating,
    /// 経由地点をバッチ配信中
    Distributing,
    /// 停止要求を送り、停止通知を待機中
    Draining,
    /// 全ドローン停止済み
    Terminated,
}

/// ディスパッチャのエラー
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("状態 {state:?} では {operation} を実行できません")]
    InvalidState {
        state: DispatcherState,
        operation: &'static str,
    },
    #[error("プロトコル違反: ドローン {drone_id} からの {kind}: {reason}")]
    ProtocolViolation {
        drone_id: ActorId,
        kind: MessageKind,
        reason: &'static str,
    },
}

/// 1回の実行におけるディスパッチャの集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherSummary {
    /// 起動通知を受け取ったドローン数
    pub drones_activated: usize,
    /// 停止通知を受け取ったドローン数
    pub drones_inactivated: usize,
    /// 配信の巡回回数
    pub distribution_passes: usize,
    /// 送信したバッチ数（空のバッチは送らない）
    pub batches_sent: usize,
    /// 配信した経由地点の総数
    pub waypoints_dispatched: usize,
    /// 回答した駅近接の問い合わせ数
    pub proximity_queries: usize,
    /// リポジトリに保存されたレポート総数
    pub reports_saved: u64,
    /// ドローンごとの追跡積載量の最大値
    pub peak_load: BTreeMap<ActorId, usize>,
    /// ドローンごとの保存済みレポート数
    pub reports_by_drone: BTreeMap<ActorId, u64>,
}

/// ディスパッチャエージェント
///
/// ドローンごとのルートと、各ドローンに配信済みで未消化の経由地点数
/// （追跡積載量）を管理します。積載量が上限を超えないようにバッチで
/// 経由地点を配信し、起動 → 配信 → 排出 → 停止 の順でフリートを制御します。
#[derive(Debug)]
pub struct Dispatcher<C: Channel, R: ReportRepository> {
    settings: DispatcherSettings,
    channel: Arc<C>,
    repository: Arc<R>,
    state: DispatcherState,
    routes: BTreeMap<ActorId, Route>,
    tube_stations: HashSet<Location>,
    /// 稼働中ドローン → 追跡積載量
    active_drones: BTreeMap<ActorId, usize>,
    ever_activated: BTreeSet<ActorId>,
    summary: DispatcherSummary,
}

impl<C: Channel, R: ReportRepository> Dispatcher<C, R> {
    pub fn new(settings: DispatcherSettings, channel: Arc<C>, repository: Arc<R>) -> Self {
        Self {
            settings,
            channel,
            repository,
            state: DispatcherState::Loading,
            routes: BTreeMap::new(),
            tube_stations: HashSet::new(),
            active_drones: BTreeMap::new(),
            ever_activated: BTreeSet::new(),
            summary: DispatcherSummary::default(),
        }
    }

    pub fn id(&self) -> ActorId {
        self.settings.id
    }

    #[cfg(test)]
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// 読み込み済みの（空でない）ルートを持つドローンID
    pub fn drone_ids(&self) -> Vec<ActorId> {
        self.routes.keys().copied().collect()
    }

    /// 駅座標とルートを読み込み、起動フェーズへ進む
    ///
    /// 経由地点が1つもないドローンは起動対象から外します。
    pub fn load<S: RouteDataSource + ?Sized>(&mut self, source: &S) -> Result<(), DispatcherError> {
        if self.state != DispatcherState::Loading {
            return Err(DispatcherError::InvalidState {
                state: self.state,
                operation: "load",
            });
        }

        self.tube_stations = source.stations()?;
        let mut routes = source.routes(self.settings.end_date)?;
        routes.retain(|drone_id, route| {
            if route.is_empty() {
                info!(drone_id = *drone_id, "経由地点がないため起動対象外");
            }
            !route.is_empty()
        });
        self.routes = routes;

        info!(
            dispatcher_id = self.id(),
            stations = self.tube_stations.len(),
            drones = self.routes.len(),
            waypoints = self.routes.values().map(Route::len).sum::<usize>(),
            "読み込み完了"
        );
        self.state = DispatcherState::Activating;
        Ok(())
    }

    /// 起動・配信・停止を順に実行し、集計を返す
    pub async fn run(mut self) -> Result<DispatcherSummary, DispatcherError> {
        if self.state != DispatcherState::Activating {
            return Err(DispatcherError::InvalidState {
                state: self.state,
                operation: "run",
            });
        }

        let result = self.drive().await;
        if let Err(e) = &result {
            error!(dispatcher_id = self.id(), state = ?self.state, "ディスパッチャ異常終了: {}", e);
        }
        result?;

        self.summary.reports_saved = self.repository.count();
        self.summary.reports_by_drone = self
            .ever_activated
            .iter()
            .map(|id| (*id, self.repository.count_by_drone(*id)))
            .collect();
        info!(reports = self.summary.reports_saved, "提出されたレポート総数");
        info!("シミュレーション完了");
        Ok(self.summary)
    }

    async fn drive(&mut self) -> Result<(), DispatcherError> {
        self.activate_drones().await?;
        self.coordinate_drones().await?;
        self.shut_down_system().await?;
        self.state = DispatcherState::Terminated;
        Ok(())
    }

    async fn activate_drones(&mut self) -> Result<(), DispatcherError> {
        info!("ドローンを起動中...");
        for drone_id in self.drone_ids() {
            debug!(drone_id, "起動要求を送信");
            self.send(drone_id, Message::Activate)?;
        }
        while self.active_drones.len() < self.routes.len() {
            self.handle_incoming_message().await?;
        }
        info!(drones = self.active_drones.len(), "全ドローン起動完了");
        Ok(())
    }

    async fn coordinate_drones(&mut self) -> Result<(), DispatcherError> {
        self.state = DispatcherState::Distributing;
        while !self.routes.is_empty() {
            self.distribute_waypoints()?;
            self.summary.distribution_passes += 1;
            self.handle_incoming_message().await?;
        }
        info!(
            passes = self.summary.distribution_passes,
            waypoints = self.summary.waypoints_dispatched,
            "全ルート配信完了"
        );
        Ok(())
    }

    /// 全ドローンに対して1巡分の配信を行う
    fn distribute_waypoints(&mut self) -> Result<(), DispatcherError> {
        let mut exhausted = Vec::new();

        for (drone_id, route) in self.routes.iter_mut() {
            let load = self.active_drones.get(drone_id).copied().unwrap_or(0);
            let remaining_capacity = self.settings.max_drone_capacity.saturating_sub(load);
            if remaining_capacity == 0 {
                continue;
            }

            let batch = route.take_batch(remaining_capacity);
            if route.is_empty() {
                exhausted.push(*drone_id);
            }
            if batch.is_empty() {
                continue;
            }

            let new_load = load + batch.len();
            debug!(
                drone_id = *drone_id,
                remaining_capacity,
                batch = batch.len(),
                load = new_load,
                "経由地点を配信"
            );
            self.summary.batches_sent += 1;
            self.summary.waypoints_dispatched += batch.len();
            self.active_drones.insert(*drone_id, new_load);
            let peak = self.summary.peak_load.entry(*drone_id).or_default();
            *peak = (*peak).max(new_load);

            self.channel.send(Envelope::new(
                self.settings.id,
                *drone_id,
                Message::Waypoints(batch),
            ))?;
        }

        for drone_id in exhausted {
            debug!(drone_id, "ルート配信完了");
            self.routes.remove(&drone_id);
        }
        Ok(())
    }

    async fn shut_down_system(&mut self) -> Result<(), DispatcherError> {
        self.state = DispatcherState::Draining;
        info!("ドローンを停止中...");
        let drone_ids: Vec<ActorId> = self.active_drones.keys().copied().collect();
        for drone_id in drone_ids {
            debug!(drone_id, "停止要求を送信");
            self.send(drone_id, Message::Shutdown)?;
        }
        while !self.active_drones.is_empty() {
            self.handle_incoming_message().await?;
        }
        info!("全ドローン停止");
        Ok(())
    }

    async fn handle_incoming_message(&mut self) -> Result<(), DispatcherError> {
        let envelope = self.channel.receive(self.settings.id).await?;
        self.handle_message(envelope)
    }

    fn handle_message(&mut self, envelope: Envelope) -> Result<(), DispatcherError> {
        let drone_id = envelope.sender();
        let kind = envelope.kind();
        let violation = |reason| DispatcherError::ProtocolViolation { drone_id, kind, reason };

        match envelope.into_message() {
            Message::DroneActive => {
                if self.state != DispatcherState::Activating {
                    return Err(violation("起動フェーズ外での起動通知"));
                }
                if !self.routes.contains_key(&drone_id) {
                    return Err(violation("起動要求していないドローン"));
                }
                if !self.ever_activated.insert(drone_id) {
                    return Err(violation("起動通知の重複"));
                }
                info!(drone_id, "ドローン起動を確認");
                self.active_drones.insert(drone_id, 0);
                self.summary.drones_activated += 1;
            }
            Message::DroneInactive => {
                if self.state != DispatcherState::Draining {
                    return Err(violation("停止要求前の停止通知"));
                }
                if self.active_drones.remove(&drone_id).is_none() {
                    return Err(violation("稼働中でないドローン"));
                }
                info!(drone_id, "ドローン停止を確認");
                self.summary.drones_inactivated += 1;
            }
            Message::TrafficReport(report) => {
                self.record_report(drone_id, report)
                    .map_err(violation)?;
            }
            Message::AssertTubeNearbyRequest(location) => {
                if !self.active_drones.contains_key(&drone_id) {
                    return Err(violation("稼働中でないドローン"));
                }
                let nearby = self.assert_tube_nearby(&location);
                debug!(drone_id, %location, nearby, "駅近接の問い合わせに回答");
                self.summary.proximity_queries += 1;
                if !nearby {
                    // レポートが続かないので、この時点で地点を消化済みとみなす
                    self.release_load(drone_id).map_err(violation)?;
                }
                self.send(drone_id, Message::AssertTubeNearbyResponse(nearby))?;
            }
            Message::Activate
            | Message::Shutdown
            | Message::Waypoints(_)
            | Message::AssertTubeNearbyResponse(_) => {
                return Err(violation("ディスパッチャ宛てでない種別"));
            }
        }
        Ok(())
    }

    fn record_report(&mut self, drone_id: ActorId, report: TrafficReport) -> Result<(), &'static str> {
        if report.drone_id != drone_id {
            return Err("送信元とレポートのドローンIDが不一致");
        }
        self.release_load(drone_id)?;
        info!(drone_id, %report, "交通状況レポート受信");
        self.repository.save(report);
        Ok(())
    }

    fn release_load(&mut self, drone_id: ActorId) -> Result<(), &'static str> {
        let load = self
            .active_drones
            .get_mut(&drone_id)
            .ok_or("稼働中でないドローン")?;
        *load = load.checked_sub(1).ok_or("積載量が0未満になる")?;
        Ok(())
    }

    /// 指定地点から最大距離未満に駅があるか（線形探索）
    pub fn assert_tube_nearby(&self, location: &Location) -> bool {
        let nearby = self
            .tube_stations
            .iter()
            .find(|station| station.distance_to(location) < self.settings.max_distance_to_station);
        if let Some(station) = nearby {
            debug!(%location, %station, "近くの駅を発見");
        }
        nearby.is_some()
    }

    fn send(&self, drone_id: ActorId, message: Message) -> Result<(), ChannelError> {
        self.channel
            .send(Envelope::new(self.settings.id, drone_id, message))
    }
}
