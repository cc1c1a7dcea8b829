use std::fmt;

use crate::models::common::{ActorId, Location, TrafficReport, Waypoint};

/// メッセージ種別（閉じた集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// 起動要求
    Activate,
    /// 起動通知
    DroneActive,
    /// 停止要求
    Shutdown,
    /// 停止通知
    DroneInactive,
    /// 経由地点バッチ
    Waypoint,
    /// 交通状況レポート
    TrafficReport,
    /// 駅近接の問い合わせ
    AssertTubeNearbyRequest,
    /// 駅近接の回答
    AssertTubeNearbyResponse,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageKind::Activate => "ACTIVATE",
            MessageKind::DroneActive => "DRONE_ACTIVE",
            MessageKind::Shutdown => "SHUTDOWN",
            MessageKind::DroneInactive => "DRONE_INACTIVE",
            MessageKind::Waypoint => "WAYPOINT",
            MessageKind::TrafficReport => "TRAFFIC_REPORT",
            MessageKind::AssertTubeNearbyRequest => "ASSERT_TUBE_NEARBY_REQUEST",
            MessageKind::AssertTubeNearbyResponse => "ASSERT_TUBE_NEARBY_RESPONSE",
        };
        f.write_str(label)
    }
}

/// メッセージ本体
///
/// 種別ごとにペイロードの型が決まっているため、受信側の処理は
/// `match` で網羅的に検査されます。
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// ディスパッチャ → ドローン: 起動要求
    Activate,
    /// ドローン → ディスパッチャ: 起動完了
    DroneActive,
    /// ディスパッチャ → ドローン: 停止要求（残りの地点を消化してから停止）
    Shutdown,
    /// ドローン → ディスパッチャ: 停止完了
    DroneInactive,
    /// ディスパッチャ → ドローン: 予定時刻順の経由地点バッチ
    Waypoints(Vec<Waypoint>),
    /// ドローン → ディスパッチャ: 交通状況レポート
    TrafficReport(TrafficReport),
    /// ドローン → ディスパッチャ: 指定地点の近くに駅があるかの問い合わせ
    AssertTubeNearbyRequest(Location),
    /// ディスパッチャ → ドローン: 問い合わせへの回答
    AssertTubeNearbyResponse(bool),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Activate => MessageKind::Activate,
            Message::DroneActive => MessageKind::DroneActive,
            Message::Shutdown => MessageKind::Shutdown,
            Message::DroneInactive => MessageKind::DroneInactive,
            Message::Waypoints(_) => MessageKind::Waypoint,
            Message::TrafficReport(_) => MessageKind::TrafficReport,
            Message::AssertTubeNearbyRequest(_) => MessageKind::AssertTubeNearbyRequest,
            Message::AssertTubeNearbyResponse(_) => MessageKind::AssertTubeNearbyResponse,
        }
    }
}

/// 宛先付きのメッセージ単位
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    sender: ActorId,
    receiver: ActorId,
    message: Message,
}

impl Envelope {
    pub fn new(sender: ActorId, receiver: ActorId, message: Message) -> Self {
        Self { sender, receiver, message }
    }

    pub fn sender(&self) -> ActorId {
        self.sender
    }

    pub fn receiver(&self) -> ActorId {
        self.receiver
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.kind(), self.sender, self.receiver)
    }
}
