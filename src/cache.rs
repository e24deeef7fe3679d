use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{AvailabilityResult, ControlType, FuelType, Ms, VehicleType};

/// Default freshness window. Staleness here only affects UI hints; the
/// write-path guard owns correctness.
pub const DEFAULT_TTL_MS: Ms = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub center_id: Ulid,
    pub date: NaiveDate,
    pub control: ControlType,
    pub vehicle: VehicleType,
    pub fuel: FuelType,
}

struct CacheEntry {
    expires_at: Ms,
    result: AvailabilityResult,
}

/// Short-TTL read cache for availability listings, keyed by the full query
/// tuple. Every mutation touching a `(center, date)` pair must call
/// [`AvailabilityCache::invalidate_day`]; a reschedule invalidates both the
/// old and the new day.
pub struct AvailabilityCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl_ms: Ms,
}

impl AvailabilityCache {
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
        }
    }

    pub fn get(&self, key: &CacheKey, now: Ms) -> Option<AvailabilityResult> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.result.clone())
    }

    pub fn put(&self, key: CacheKey, result: AvailabilityResult, now: Ms) {
        self.entries.insert(
            key,
            CacheEntry {
                expires_at: now + self.ttl_ms,
                result,
            },
        );
    }

    /// Drop every cached variant (control/vehicle/fuel) of one center/date.
    pub fn invalidate_day(&self, center_id: Ulid, date: NaiveDate) {
        self.entries
            .retain(|k, _| !(k.center_id == center_id && k.date == date));
    }

    /// Drop everything cached for one center, any date. Used when a
    /// recurring block changes and the affected dates are open-ended.
    pub fn invalidate_center(&self, center_id: Ulid) {
        self.entries.retain(|k, _| k.center_id != center_id);
    }

    /// Evict expired entries. Called periodically by the janitor task.
    pub fn sweep(&self, now: Ms) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(center_id: Ulid, date: NaiveDate) -> CacheKey {
        CacheKey {
            center_id,
            date,
            control: ControlType::Ctp,
            vehicle: VehicleType::Vp,
            fuel: FuelType::Essence,
        }
    }

    fn result() -> AvailabilityResult {
        AvailabilityResult {
            duration_min: 35,
            slots: Vec::new(),
            count: 0,
        }
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = AvailabilityCache::new(1_000);
        let k = key(Ulid::new(), NaiveDate::from_ymd_opt(2026, 4, 7).unwrap());
        cache.put(k, result(), 0);
        assert!(cache.get(&k, 500).is_some());
        assert!(cache.get(&k, 1_000).is_none());
    }

    #[test]
    fn invalidate_day_drops_all_variants() {
        let cache = AvailabilityCache::new(60_000);
        let center = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2026, 4, 7).unwrap();
        let other_date = NaiveDate::from_ymd_opt(2026, 4, 8).unwrap();

        let mut k1 = key(center, date);
        let mut k2 = key(center, date);
        k2.fuel = FuelType::Diesel;
        k1.vehicle = VehicleType::Vu;
        let k3 = key(center, other_date);

        cache.put(k1, result(), 0);
        cache.put(k2, result(), 0);
        cache.put(k3, result(), 0);

        cache.invalidate_day(center, date);
        assert!(cache.get(&k1, 1).is_none());
        assert!(cache.get(&k2, 1).is_none());
        assert!(cache.get(&k3, 1).is_some());
    }

    #[test]
    fn sweep_evicts_expired_only() {
        let cache = AvailabilityCache::new(1_000);
        let k1 = key(Ulid::new(), NaiveDate::from_ymd_opt(2026, 4, 7).unwrap());
        let k2 = key(Ulid::new(), NaiveDate::from_ymd_opt(2026, 4, 8).unwrap());
        cache.put(k1, result(), 0);
        cache.put(k2, result(), 5_000);
        cache.sweep(4_000);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&k2, 4_000).is_some());
    }
}
