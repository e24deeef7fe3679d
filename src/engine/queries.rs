use chrono::NaiveDate;
use ulid::Ulid;

use crate::cache::CacheKey;
use crate::limits::MAX_DATE_RANGE_DAYS;
use crate::model::*;

use super::availability::availability_for_day;
use super::conflict::now_ms;
use super::duration::service_duration;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for one center/date/request, served read-through from
    /// the short-TTL cache. A center with no published schedule answers with
    /// the duration and an empty list.
    pub async fn get_availability(
        &self,
        center_id: Ulid,
        date: NaiveDate,
        control: ControlType,
        vehicle: VehicleType,
        fuel: FuelType,
    ) -> Result<AvailabilityResult, EngineError> {
        let key = CacheKey {
            center_id,
            date,
            control,
            vehicle,
            fuel,
        };
        let now = now_ms();
        if let Some(hit) = self.cache.get(&key, now) {
            metrics::counter!(crate::observability::AVAILABILITY_CACHE_HITS_TOTAL).increment(1);
            return Ok(hit);
        }
        metrics::counter!(crate::observability::AVAILABILITY_CACHE_MISSES_TOTAL).increment(1);

        let result = match self.get_center(&center_id) {
            None => AvailabilityResult {
                duration_min: service_duration(control, vehicle, fuel),
                slots: Vec::new(),
                count: 0,
            },
            Some(cs) => {
                let guard = cs.read().await;
                availability_for_day(&guard, date, control, vehicle, fuel)
            }
        };
        self.cache.put(key, result.clone(), now);
        Ok(result)
    }

    /// Dates in `[from, to]` with at least one bookable slot. Bounded to a
    /// 60-day span; unspecified vehicle/fuel default to VP/essence.
    pub async fn get_available_dates(
        &self,
        center_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        control: ControlType,
        vehicle: Option<VehicleType>,
        fuel: Option<FuelType>,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if from > to {
            return Err(EngineError::Validation("date_from after date_to"));
        }
        if (to - from).num_days() >= MAX_DATE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        let vehicle = vehicle.unwrap_or(VehicleType::Vp);
        let fuel = fuel.unwrap_or(FuelType::Essence);

        let mut dates = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let result = self
                .get_availability(center_id, date, control, vehicle, fuel)
                .await?;
            if result.count > 0 {
                dates.push(date);
            }
        }
        Ok(dates)
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let center_id = self
            .center_for_appointment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cs = self
            .get_center(&center_id)
            .ok_or(EngineError::NotFound(center_id))?;
        let guard = cs.read().await;
        guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// One center's appointments on one day, sorted by start time.
    pub async fn list_appointments(
        &self,
        center_id: Ulid,
        date: NaiveDate,
    ) -> Vec<Appointment> {
        let Some(cs) = self.get_center(&center_id) else {
            return Vec::new();
        };
        let guard = cs.read().await;
        let mut appts: Vec<Appointment> = guard.day_appointments(date).cloned().collect();
        appts.sort_by_key(|a| (a.range.start, a.id));
        appts
    }

    /// The transition trail, oldest first. Empty for unknown ids.
    pub fn get_history(&self, appointment_id: Ulid) -> Vec<HistoryEntry> {
        self.history
            .get(&appointment_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}
