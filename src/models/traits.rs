use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use chrono::NaiveDateTime;

use crate::data::LoadError;
use crate::messaging::{ChannelError, Envelope};
use crate::models::common::{ActorId, Location, TrafficReport};
use crate::models::route::Route;

/// 全アクターが共有するメッセージバスのインターフェース
///
/// アクターはメールボックスの管理に直接触れず、送信と受信のみを行います。
pub trait Channel: Send + Sync + 'static {
    /// 宛先のメールボックスに追加（ブロックしない）
    fn send(&self, envelope: Envelope) -> Result<(), ChannelError>;

    /// 指定IDのメッセージが届くまで待機し、先頭を取り出す
    fn receive(&self, receiver: ActorId) -> impl Future<Output = Result<Envelope, ChannelError>> + Send;
}

/// 交通状況レポートの保存先
pub trait ReportRepository: Send + Sync + 'static {
    /// レポートを追記
    fn save(&self, report: TrafficReport);

    /// 保存済みレポートの総数
    fn count(&self) -> u64;

    /// 指定ドローンの保存済みレポート数
    fn count_by_drone(&self, drone_id: ActorId) -> u64;
}

/// 駅座標とドローンごとのルートの読み込み元
pub trait RouteDataSource {
    /// 駅座標の集合
    fn stations(&self) -> Result<HashSet<Location>, LoadError>;

    /// ドローンごとのルート（`cutoff` より後の地点は除外）
    fn routes(&self, cutoff: NaiveDateTime) -> Result<BTreeMap<ActorId, Route>, LoadError>;
}
