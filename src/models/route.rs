use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::models::common::Waypoint;

/// 予定時刻順に消費される経由地点の優先度付きキュー
///
/// ディスパッチャが保持するドローンごとの未配信ルートと、
/// ドローン自身の機上キューの両方に使用します。
#[derive(Debug, Clone, Default)]
pub struct Route {
    heap: BinaryHeap<Reverse<Waypoint>>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最も早い予定時刻の地点を取り出す
    pub fn pop(&mut self) -> Option<Waypoint> {
        self.heap.pop().map(|Reverse(waypoint)| waypoint)
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<&Waypoint> {
        self.heap.peek().map(|Reverse(waypoint)| waypoint)
    }

    /// 先頭から最大 `limit` 件を時刻順に取り出す
    pub fn take_batch(&mut self, limit: usize) -> Vec<Waypoint> {
        let mut batch = Vec::with_capacity(limit.min(self.len()));
        while batch.len() < limit {
            match self.pop() {
                Some(waypoint) => batch.push(waypoint),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Extend<Waypoint> for Route {
    fn extend<I: IntoIterator<Item = Waypoint>>(&mut self, iter: I) {
        self.heap.extend(iter.into_iter().map(Reverse));
    }
}

impl FromIterator<Waypoint> for Route {
    fn from_iter<I: IntoIterator<Item = Waypoint>>(iter: I) -> Self {
        Self {
            heap: iter.into_iter().map(Reverse).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::Location;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 3, 22)
            .and_then(|d| d.and_hms_opt(8, min, 0))
            .expect("valid test time")
    }

    fn wp(min: u32) -> Waypoint {
        Waypoint::new(Location::new(f64::from(min), 0.0), at(min))
    }

    #[test]
    fn test_pop_in_time_order() {
        let mut route: Route = [wp(30), wp(10), wp(20)].into_iter().collect();
        assert_eq!(route.peek().map(|w| w.time), Some(at(10)));
        assert_eq!(route.pop().map(|w| w.time), Some(at(10)));
        assert_eq!(route.pop().map(|w| w.time), Some(at(20)));
        assert_eq!(route.pop().map(|w| w.time), Some(at(30)));
        assert!(route.pop().is_none());
    }

    #[test]
    fn test_take_batch_respects_limit() {
        let mut route: Route = (1..=5).map(wp).collect();
        let batch = route.take_batch(3);
        assert_eq!(batch.iter().map(|w| w.time).collect::<Vec<_>>(), vec![at(1), at(2), at(3)]);
        assert_eq!(route.len(), 2);

        let rest = route.take_batch(10);
        assert_eq!(rest.len(), 2);
        assert!(route.is_empty());
        assert!(route.take_batch(4).is_empty());
    }

    #[test]
    fn test_extend_merges_into_order() {
        let mut route: Route = [wp(5), wp(15)].into_iter().collect();
        route.extend([wp(10), wp(1)]);
        let order: Vec<_> = std::iter::from_fn(|| route.pop()).map(|w| w.time).collect();
        assert_eq!(order, vec![at(1), at(5), at(10), at(15)]);
    }
}
