// 基本的なデータ型（座標、経由地点、レポート）
pub mod common;

// 予定時刻順の経由地点キュー
pub mod route;

// バス・リポジトリ・データソースのインターフェース（trait）定義
pub mod traits;

// 各アクターの実装
pub mod dispatcher;
pub mod drone;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use dispatcher::{Dispatcher, DispatcherError, DispatcherSettings, DispatcherSummary};
pub use drone::{Drone, DroneError, DroneSettings, DroneStats};
