use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::janitor;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant (réseau) gets its own Engine,
/// WAL file, cache janitor and compactor. Tenant = database name from the
/// pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create the engine for a tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn cache janitor + WAL compactor for this tenant
        let janitor_engine = engine.clone();
        tokio::spawn(async move {
            janitor::run_cache_janitor(janitor_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            janitor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("creneau_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn day_schedule(center_id: Ulid, staff: Ulid) -> StaffSchedule {
        StaffSchedule {
            center_id,
            date: NaiveDate::from_ymd_opt(2026, 4, 7).unwrap(),
            closed: false,
            entries: vec![StaffEntry {
                id: staff,
                windows: vec![WorkWindow {
                    open: 480,
                    close: 720,
                    break_range: None,
                }],
                qualifications: vec![Qualification::Vl],
            }],
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let eng_a = tm.get_or_create("reseau_a").unwrap();
        let eng_b = tm.get_or_create("reseau_b").unwrap();

        let center = Ulid::new();
        let staff = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2026, 4, 7).unwrap();

        // Same center id in both tenants; only A gets a schedule
        eng_a
            .publish_schedule(day_schedule(center, staff))
            .await
            .unwrap();

        let avail_a = eng_a
            .get_availability(center, date, ControlType::Ctp, VehicleType::Vp, FuelType::Essence)
            .await
            .unwrap();
        let avail_b = eng_b
            .get_availability(center, date, ControlType::Ctp, VehicleType::Vp, FuelType::Essence)
            .await
            .unwrap();

        assert!(avail_a.count > 0);
        assert_eq!(avail_b.count, 0);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("reseau_sud").unwrap();
        assert!(dir.join("reseau_sud.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("tenant name too long"));
    }
}
