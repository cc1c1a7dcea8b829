use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::messaging::{ChannelError, Envelope, Message, MessageKind};
use crate::models::{
    common::{ActorId, Location, TrafficReport, Waypoint},
    route::Route,
    traits::Channel,
};

/// ドローンの動作パラメータ
#[derive(Debug, Clone)]
pub struct DroneSettings {
    /// ディスパッチャのID
    pub dispatcher_id: ActorId,
    /// 移動速度（座標単位/ミリ秒）
    pub speed: f64,
    /// 機上に保持できる経由地点の最大数
    pub max_capacity: usize,
    /// レポート生成用乱数のシード
    pub seed: u64,
}

/// ドローンの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneState {
    /// 起動要求待ち
    AwaitingActivation,
    /// 地点へ移動中
    Traveling,
    /// メッセージ処理・問い合わせ中
    Servicing,
    /// 停止完了を通知中
    Inactivating,
    /// 停止済み
    Terminated,
}

/// 1回の実行におけるドローンの統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroneStats {
    /// 訪問した経由地点数
    pub waypoints_visited: usize,
    /// 送信した交通状況レポート数
    pub reports_sent: usize,
    /// 容量超過で破棄したバッチ数
    pub batches_discarded: usize,
    /// 破棄したバッチに含まれていた経由地点数
    pub waypoints_discarded: usize,
}

/// ドローンのエラー
#[derive(Debug, Error)]
pub enum DroneError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("ドローン {drone_id} が状態 {state:?} で予期しないメッセージ {kind} を受信しました（送信元 {sender}）")]
    UnexpectedMessage {
        drone_id: ActorId,
        state: DroneState,
        kind: MessageKind,
        sender: ActorId,
    },
}

/// ドローンエージェント
///
/// 予定時刻順の経由地点キューを持ち、地点への移動とメッセージ処理を
/// 交互に行います。訪問地点の近くに駅があるかはディスパッチャに
/// 同期的に問い合わせ、近ければ交通状況レポートを送信します。
#[derive(Debug)]
pub struct Drone<C: Channel> {
    id: ActorId,
    settings: DroneSettings,
    channel: Arc<C>,
    waypoints: Route,
    current_location: Location,
    listening: bool,
    state: DroneState,
    stats: DroneStats,
    rng: StdRng,
}

impl<C: Channel> Drone<C> {
    pub fn new(id: ActorId, settings: DroneSettings, channel: Arc<C>) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed.wrapping_add(id));
        Self {
            id,
            settings,
            channel,
            waypoints: Route::new(),
            current_location: Location::new(0.0, 0.0),
            listening: true,
            state: DroneState::AwaitingActivation,
            stats: DroneStats::default(),
            rng,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    #[cfg(test)]
    pub fn state(&self) -> DroneState {
        self.state
    }

    /// ドローンのメインループ
    ///
    /// 停止要求を受け取り、かつ機上のキューが空になるまで繰り返します。
    /// 終了時にディスパッチャへ停止完了を通知します。
    pub async fn run(mut self) -> Result<DroneStats, DroneError> {
        info!(drone_id = self.id, "メッセージ受信待機開始");

        while self.listening || !self.waypoints.is_empty() {
            match self.waypoints.pop() {
                Some(waypoint) => self.visit(waypoint).await?,
                None => {
                    let envelope = self.channel.receive(self.id).await?;
                    self.handle_message(envelope)?;
                }
            }
        }

        self.state = DroneState::Inactivating;
        self.send(Message::DroneInactive)?;
        self.state = DroneState::Terminated;
        info!(
            drone_id = self.id,
            visited = self.stats.waypoints_visited,
            reports = self.stats.reports_sent,
            "停止しました"
        );
        Ok(self.stats)
    }

    async fn visit(&mut self, waypoint: Waypoint) -> Result<(), DroneError> {
        self.travel_to(waypoint.location).await;
        self.stats.waypoints_visited += 1;

        if self.assert_tube_nearby(waypoint.location).await? {
            self.send_traffic_report(&waypoint)?;
        }
        Ok(())
    }

    /// 移動時間 = 距離 / 速度（ミリ秒、端数切り捨て）
    pub fn travel_time(&self, distance: f64) -> Duration {
        Duration::from_millis((distance / self.settings.speed) as u64)
    }

    async fn travel_to(&mut self, destination: Location) {
        self.state = DroneState::Traveling;
        let distance = destination.distance_to(&self.current_location);
        let travel_time = self.travel_time(distance);
        debug!(
            drone_id = self.id,
            %destination,
            distance,
            travel_ms = travel_time.as_millis() as u64,
            "移動開始"
        );

        tokio::time::sleep(travel_time).await;

        self.current_location = destination;
        self.state = DroneState::Servicing;
        debug!(drone_id = self.id, location = %self.current_location, "到着");
    }

    /// 駅の近くかどうかをディスパッチャに問い合わせる
    ///
    /// 回答が届くまでに受信した他のメッセージは通常のハンドラで処理し、
    /// 引き続き回答を待ちます。
    async fn assert_tube_nearby(&mut self, location: Location) -> Result<bool, DroneError> {
        self.send(Message::AssertTubeNearbyRequest(location))?;
        loop {
            let envelope = self.channel.receive(self.id).await?;
            if let Message::AssertTubeNearbyResponse(nearby) = envelope.message() {
                debug!(drone_id = self.id, %location, nearby = *nearby, "駅近接の回答を受信");
                return Ok(*nearby);
            }
            self.handle_message(envelope)?;
        }
    }

    fn send_traffic_report(&mut self, waypoint: &Waypoint) -> Result<(), DroneError> {
        let report = TrafficReport::random_instance(self.id, waypoint.time, &mut self.rng);
        debug!(drone_id = self.id, %report, "交通状況レポート送信");
        self.send(Message::TrafficReport(report))?;
        self.stats.reports_sent += 1;
        Ok(())
    }

    fn handle_message(&mut self, envelope: Envelope) -> Result<(), DroneError> {
        let sender = envelope.sender();
        let kind = envelope.kind();

        match (self.state, envelope.into_message()) {
            (DroneState::AwaitingActivation, Message::Activate) => {
                info!(drone_id = self.id, "起動要求を受信、経由地点を待機");
                self.state = DroneState::Servicing;
                self.send(Message::DroneActive)?;
            }
            (DroneState::Traveling | DroneState::Servicing, Message::Waypoints(batch)) => {
                self.accept_batch(batch);
            }
            (DroneState::Traveling | DroneState::Servicing, Message::Shutdown) => {
                info!(
                    drone_id = self.id,
                    remaining = self.waypoints.len(),
                    "停止要求を受信、残りの地点を消化後に停止"
                );
                self.listening = false;
            }
            (state, _) => {
                return Err(DroneError::UnexpectedMessage {
                    drone_id: self.id,
                    state,
                    kind,
                    sender,
                });
            }
        }
        Ok(())
    }

    /// 容量内であればバッチ全体を取り込み、超える場合はバッチ全体を破棄
    fn accept_batch(&mut self, batch: Vec<Waypoint>) {
        let incoming = batch.len();
        if self.waypoints.len() + incoming <= self.settings.max_capacity {
            self.waypoints.extend(batch);
            debug!(drone_id = self.id, incoming, queued = self.waypoints.len(), "経由地点を受信");
        } else {
            // 送信元には通知しないため、ディスパッチャの積載量管理とずれる
            warn!(
                drone_id = self.id,
                incoming,
                queued = self.waypoints.len(),
                capacity = self.settings.max_capacity,
                "メモリ容量超過のためバッチを破棄"
            );
            self.stats.batches_discarded += 1;
            self.stats.waypoints_discarded += incoming;
        }
    }

    fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.channel
            .send(Envelope::new(self.id, self.settings.dispatcher_id, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::parse_date_time;
    use crate::messaging::InMemoryChannel;
    use chrono::NaiveDateTime;

    const DISPATCHER: ActorId = 0;
    const DRONE: ActorId = 7;

    fn at(value: &str) -> NaiveDateTime {
        parse_date_time(value).unwrap()
    }

    fn settings(max_capacity: usize) -> DroneSettings {
        DroneSettings {
            dispatcher_id: DISPATCHER,
            speed: 1000.0,
            max_capacity,
            seed: 1,
        }
    }

    fn to_drone(channel: &InMemoryChannel, message: Message) {
        channel.send(Envelope::new(DISPATCHER, DRONE, message)).unwrap();
    }

    fn spawn_drone(
        channel: &Arc<InMemoryChannel>,
        max_capacity: usize,
    ) -> tokio::task::JoinHandle<Result<DroneStats, DroneError>> {
        let drone = Drone::new(DRONE, settings(max_capacity), Arc::clone(channel));
        tokio::spawn(drone.run())
    }

    #[test]
    fn test_travel_time_truncates_to_millis() {
        let drone = Drone::new(
            DRONE,
            DroneSettings { speed: 0.5, ..settings(1) },
            Arc::new(InMemoryChannel::new()),
        );
        assert_eq!(drone.travel_time(10.0), Duration::from_millis(20));
        assert_eq!(drone.travel_time(0.3), Duration::from_millis(0));
        assert_eq!(drone.state(), DroneState::AwaitingActivation);
    }

    #[tokio::test]
    async fn test_visits_in_time_order_across_batches() {
        let channel = Arc::new(InMemoryChannel::new());
        let t1 = Waypoint::new(Location::new(1.0, 0.0), at("2011-03-22 08:01:00"));
        let t2 = Waypoint::new(Location::new(2.0, 0.0), at("2011-03-22 08:02:00"));
        let t3 = Waypoint::new(Location::new(3.0, 0.0), at("2011-03-22 08:03:00"));
        let t4 = Waypoint::new(Location::new(4.0, 0.0), at("2011-03-22 08:04:00"));

        to_drone(&channel, Message::Activate);
        to_drone(&channel, Message::Waypoints(vec![t3, t1]));
        to_drone(&channel, Message::Waypoints(vec![t4, t2]));
        let handle = spawn_drone(&channel, 10);

        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneActive);

        let mut visited = Vec::new();
        for _ in 0..4 {
            match channel.receive(DISPATCHER).await.unwrap().into_message() {
                Message::AssertTubeNearbyRequest(location) => visited.push(location),
                other => panic!("問い合わせが期待されます: {:?}", other),
            }
            to_drone(&channel, Message::AssertTubeNearbyResponse(false));
        }
        to_drone(&channel, Message::Shutdown);

        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneInactive);
        assert_eq!(visited, vec![t1.location, t2.location, t3.location, t4.location]);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.waypoints_visited, 4);
        assert_eq!(stats.reports_sent, 0);
    }

    #[tokio::test]
    async fn test_report_sent_only_when_nearby() {
        let channel = Arc::new(InMemoryChannel::new());
        let near = Waypoint::new(Location::new(0.5, 0.0), at("2011-03-22 08:01:00"));
        let far = Waypoint::new(Location::new(5.0, 5.0), at("2011-03-22 08:02:00"));

        to_drone(&channel, Message::Activate);
        to_drone(&channel, Message::Waypoints(vec![near, far]));
        to_drone(&channel, Message::Shutdown);
        let handle = spawn_drone(&channel, 10);

        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneActive);

        assert_eq!(
            channel.receive(DISPATCHER).await.unwrap().into_message(),
            Message::AssertTubeNearbyRequest(near.location)
        );
        to_drone(&channel, Message::AssertTubeNearbyResponse(true));
        match channel.receive(DISPATCHER).await.unwrap().into_message() {
            Message::TrafficReport(report) => {
                assert_eq!(report.drone_id, DRONE);
                assert_eq!(report.time, near.time);
            }
            other => panic!("レポートが期待されます: {:?}", other),
        }

        assert_eq!(
            channel.receive(DISPATCHER).await.unwrap().into_message(),
            Message::AssertTubeNearbyRequest(far.location)
        );
        to_drone(&channel, Message::AssertTubeNearbyResponse(false));
        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneInactive);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.reports_sent, 1);
    }

    #[tokio::test]
    async fn test_overflowing_batch_is_discarded_whole() {
        let channel = Arc::new(InMemoryChannel::new());
        let batch: Vec<Waypoint> = (1..=3)
            .map(|i| Waypoint::new(Location::new(f64::from(i), 0.0), at("2011-03-22 08:00:00")))
            .collect();

        to_drone(&channel, Message::Activate);
        to_drone(&channel, Message::Waypoints(batch));
        to_drone(&channel, Message::Shutdown);
        let handle = spawn_drone(&channel, 2);

        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneActive);
        assert_eq!(channel.receive(DISPATCHER).await.unwrap().kind(), MessageKind::DroneInactive);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.waypoints_visited, 0);
        assert_eq!(stats.batches_discarded, 1);
        assert_eq!(stats.waypoints_discarded, 3);
    }

    fn activated_drone(channel: &Arc<InMemoryChannel>) -> Drone<InMemoryChannel> {
        let mut drone = Drone::new(DRONE, settings(2), Arc::clone(channel));
        drone
            .handle_message(Envelope::new(DISPATCHER, DRONE, Message::Activate))
            .unwrap();
        drone
    }

    fn assert_unexpected(result: Result<(), DroneError>, expected_kind: MessageKind) {
        match result {
            Err(DroneError::UnexpectedMessage { drone_id, kind, state, sender }) => {
                assert_eq!(drone_id, DRONE);
                assert_eq!(kind, expected_kind);
                assert_eq!(state, DroneState::Servicing);
                assert_eq!(sender, DISPATCHER);
            }
            other => panic!("プロトコル違反が期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_second_activation_is_defect() {
        let channel = Arc::new(InMemoryChannel::new());
        let mut drone = activated_drone(&channel);

        let result = drone.handle_message(Envelope::new(DISPATCHER, DRONE, Message::Activate));
        assert_unexpected(result, MessageKind::Activate);
    }

    #[test]
    fn test_unsolicited_response_is_defect() {
        let channel = Arc::new(InMemoryChannel::new());
        let mut drone = activated_drone(&channel);

        let result = drone.handle_message(Envelope::new(
            DISPATCHER,
            DRONE,
            Message::AssertTubeNearbyResponse(true),
        ));
        assert_unexpected(result, MessageKind::AssertTubeNearbyResponse);
    }

    #[test]
    fn test_dispatcher_bound_kinds_are_defects() {
        let channel = Arc::new(InMemoryChannel::new());
        let mut drone = activated_drone(&channel);

        let messages = vec![
            Message::DroneActive,
            Message::DroneInactive,
            Message::AssertTubeNearbyRequest(Location::new(0.0, 0.0)),
        ];
        for message in messages {
            let kind = message.kind();
            let result = drone.handle_message(Envelope::new(DISPATCHER, DRONE, message));
            assert_unexpected(result, kind);
        }
    }

    #[tokio::test]
    async fn test_waypoints_before_activation_is_defect() {
        let channel = Arc::new(InMemoryChannel::new());
        to_drone(&channel, Message::Waypoints(Vec::new()));
        let handle = spawn_drone(&channel, 2);

        match handle.await.unwrap() {
            Err(DroneError::UnexpectedMessage { kind, state, .. }) => {
                assert_eq!(kind, MessageKind::Waypoint);
                assert_eq!(state, DroneState::AwaitingActivation);
            }
            other => panic!("プロトコル違反が期待されます: {:?}", other),
        }
    }
}
