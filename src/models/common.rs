use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use rand::Rng;

/// アクター（ディスパッチャ、ドローン）の識別子
pub type ActorId = u64;

/// 地理座標を表す不変の値型
///
/// 等価性とハッシュは座標のビット表現に基づく構造的なものです。
#[derive(Debug, Clone, Copy)]
pub struct Location {
    /// 緯度
    pub latitude: f64,
    /// 経度
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// 2点間のユークリッド距離を計算
    pub fn distance_to(&self, other: &Location) -> f64 {
        ((self.latitude - other.latitude).powi(2) + (self.longitude - other.longitude).powi(2)).sqrt()
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// 訪問予定時刻付きの経由地点
///
/// 予定時刻の昇順で全順序付けされます。同時刻の場合は座標で順序を決め、
/// 同じ入力に対して常に同じ訪問順になるようにしています。
#[derive(Debug, Clone, Copy)]
pub struct Waypoint {
    /// 訪問する地点
    pub location: Location,
    /// 予定時刻
    pub time: NaiveDateTime,
}

impl Waypoint {
    pub fn new(location: Location, time: NaiveDateTime) -> Self {
        Self { location, time }
    }
}

impl Ord for Waypoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then(self.location.latitude.total_cmp(&other.location.latitude))
            .then(self.location.longitude.total_cmp(&other.location.longitude))
    }
}

impl PartialOrd for Waypoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waypoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waypoint {}

/// 渋滞レベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Congestion {
    /// 渋滞
    Heavy,
    /// やや混雑
    Moderate,
    /// 順調
    Light,
}

impl Congestion {
    pub const ALL: [Congestion; 3] = [Congestion::Heavy, Congestion::Moderate, Congestion::Light];
}

impl fmt::Display for Congestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Congestion::Heavy => "HEAVY",
            Congestion::Moderate => "MODERATE",
            Congestion::Light => "LIGHT",
        };
        f.write_str(label)
    }
}

/// 交通状況レポート
///
/// ドローンが駅の近くを訪問した際に作成し、ディスパッチャ経由で
/// レポートリポジトリに保存されます。
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficReport {
    /// 報告したドローンのID
    pub drone_id: ActorId,
    /// 訪問した経由地点の予定時刻
    pub time: NaiveDateTime,
    /// 観測速度（km/h）
    pub speed: f64,
    /// 渋滞レベル
    pub congestion: Congestion,
}

impl TrafficReport {
    /// 観測速度の上限（この値は含まない）
    pub const MAX_OBSERVED_SPEED: u32 = 140;

    pub fn new(drone_id: ActorId, time: NaiveDateTime, speed: f64, congestion: Congestion) -> Self {
        Self { drone_id, time, speed, congestion }
    }

    /// 速度と渋滞レベルを乱数で決めたレポートを生成
    pub fn random_instance<R: Rng + ?Sized>(drone_id: ActorId, time: NaiveDateTime, rng: &mut R) -> Self {
        let speed = f64::from(rng.random_range(0..Self::MAX_OBSERVED_SPEED));
        let congestion = Congestion::ALL[rng.random_range(0..Congestion::ALL.len())];
        Self::new(drone_id, time, speed, congestion)
    }
}

impl fmt::Display for TrafficReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrafficReport[drone={}, time={}, speed={:.0}, congestion={}]",
            self.drone_id, self.time, self.speed, self.congestion
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 3, 22)
            .and_then(|d| d.and_hms_opt(hour, min, 0))
            .expect("valid test time")
    }

    #[test]
    fn test_distance_is_euclidean() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(b.distance_to(&a), 5.0);
    }

    #[test]
    fn test_location_structural_equality() {
        let mut stations = HashSet::new();
        stations.insert(Location::new(51.5, -0.12));
        stations.insert(Location::new(51.5, -0.12));
        stations.insert(Location::new(51.5, -0.13));
        assert_eq!(stations.len(), 2);
    }

    #[test]
    fn test_waypoint_ordered_by_time() {
        let early = Waypoint::new(Location::new(9.0, 9.0), at(8, 0));
        let late = Waypoint::new(Location::new(0.0, 0.0), at(8, 5));
        assert!(early < late);

        let tie = Waypoint::new(Location::new(1.0, 1.0), at(8, 0));
        assert!(tie < early);
        assert_ne!(tie, early);
    }

    #[test]
    fn test_random_report_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let report = TrafficReport::random_instance(5937, at(8, 0), &mut rng);
            assert_eq!(report.drone_id, 5937);
            assert!(report.speed >= 0.0 && report.speed < 140.0);
            assert_eq!(report.speed.fract(), 0.0);
        }
    }
}
