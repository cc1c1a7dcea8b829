// CSVからの駅座標・ルート読み込み
pub mod loader;

// 交通状況レポートの保存先
pub mod repository;

pub use loader::{CsvRouteSource, LoadError};
pub use repository::InMemoryReportRepository;
