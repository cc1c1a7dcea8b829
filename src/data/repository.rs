use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::common::{ActorId, TrafficReport};
use crate::models::traits::ReportRepository;

/// メモリ上にレポートを保持するリポジトリ
///
/// シミュレーションとテスト用です。永続化は行いません。
#[derive(Debug, Default)]
pub struct InMemoryReportRepository {
    reports: Mutex<HashMap<ActorId, Vec<TrafficReport>>>,
}

impl InMemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定ドローンの保存済みレポートのコピー
    #[cfg(test)]
    pub fn reports_by_drone(&self, drone_id: ActorId) -> Vec<TrafficReport> {
        self.reports.lock().get(&drone_id).cloned().unwrap_or_default()
    }
}

impl ReportRepository for InMemoryReportRepository {
    fn save(&self, report: TrafficReport) {
        self.reports.lock().entry(report.drone_id).or_default().push(report);
    }

    fn count(&self) -> u64 {
        self.reports.lock().values().map(|reports| reports.len() as u64).sum()
    }

    fn count_by_drone(&self, drone_id: ActorId) -> u64 {
        self.reports
            .lock()
            .get(&drone_id)
            .map(|reports| reports.len() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::parse_date_time;
    use crate::models::common::Congestion;

    #[test]
    fn test_counts() {
        let repository = InMemoryReportRepository::new();
        let time = parse_date_time("2011-03-22 08:00:00").unwrap();
        repository.save(TrafficReport::new(1, time, 40.0, Congestion::Light));
        repository.save(TrafficReport::new(1, time, 12.0, Congestion::Heavy));
        repository.save(TrafficReport::new(2, time, 80.0, Congestion::Moderate));

        assert_eq!(repository.count(), 3);
        assert_eq!(repository.count_by_drone(1), 2);
        assert_eq!(repository.count_by_drone(2), 1);
        assert_eq!(repository.count_by_drone(3), 0);
        assert_eq!(repository.reports_by_drone(2)[0].congestion, Congestion::Moderate);
    }
}
