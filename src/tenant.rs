use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-organization engines. Each organization gets its own Engine + WAL + compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Characters allowed in an organization name, which doubles as its WAL file stem.
fn is_file_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create the engine for an organization.
    pub fn get_or_create(&self, organization: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(organization) {
            return Ok(engine.value().clone());
        }
        if organization.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "organization name too long",
            ));
        }

        if organization.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty organization name",
            ));
        }
        // Rejected rather than rewritten: a rewritten name could alias
        // another organization's WAL file.
        if !organization.chars().all(is_file_safe) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "organization name may only contain ASCII letters, digits, '_' and '-'",
            ));
        }

        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many organizations"));
        }

        // The vacant-entry guard serializes concurrent first connections for one organization.
        let engine = match self.engines.entry(organization.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{organization}.wal"));
                let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);

                let compactor_engine = engine.clone();
                let threshold = self.compact_threshold;
                tokio::spawn(async move {
                    compactor::run_compactor(compactor_engine, threshold).await;
                });

                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(organization, "organization loaded");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hallbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn organizations_are_isolated() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);
        let admin = Actor::new("ada", Role::Admin);

        let eng_a = tm.get_or_create("college_a").unwrap();
        let eng_b = tm.get_or_create("college_b").unwrap();

        eng_a
            .register_hall(&admin, "Main Auditorium".into(), 300, String::new(), vec![])
            .await
            .unwrap();

        assert_eq!(eng_a.list_halls().await.len(), 1);
        assert!(eng_b.list_halls().await.is_empty());
        // Same name is free in the other organization.
        eng_b
            .register_hall(&admin, "Main Auditorium".into(), 120, String::new(), vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_college").unwrap();
        assert!(dir.join("my_college.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn name_must_be_file_safe() {
        let dir = test_data_dir("file_safe");
        let tm = TenantManager::new(dir.clone(), 1000);

        for bad in ["../evil", "../..", "ac.me", "a b", ""] {
            let err = tm.get_or_create(bad).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{bad:?}");
        }
        assert!(fs::read_dir(&dir).unwrap().next().is_none());

        let _eng = tm.get_or_create("college-of_arts2").unwrap();
        assert!(dir.join("college-of_arts2.wal").exists());
    }

    #[tokio::test]
    async fn lookalike_names_never_share_a_wal() {
        let dir = test_data_dir("lookalike");
        let admin = Actor::new("ada", Role::Admin);
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            let acme = tm.get_or_create("acme").unwrap();
            acme.register_hall(&admin, "Hall A".into(), 30, String::new(), vec![])
                .await
                .unwrap();
            assert!(tm.get_or_create("ac.me").is_err());
            assert!(tm.get_or_create("acme/").is_err());
        }

        let tm = TenantManager::new(dir, 1000);
        let halls: Vec<String> = tm
            .get_or_create("acme")
            .unwrap()
            .list_halls()
            .await
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(halls, vec!["Hall A".to_string()]);
    }

    #[tokio::test]
    async fn name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("organization name too long"));
    }

    #[tokio::test]
    async fn engine_survives_reload() {
        let dir = test_data_dir("reload");
        let admin = Actor::new("ada", Role::Admin);
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            let engine = tm.get_or_create("acme").unwrap();
            engine
                .register_hall(&admin, "Lab 1".into(), 30, String::new(), vec![])
                .await
                .unwrap();
        }
        let tm = TenantManager::new(dir, 1000);
        let engine = tm.get_or_create("acme").unwrap();
        let halls = engine.list_halls().await;
        assert_eq!(halls.len(), 1);
        assert_eq!(halls[0].name, "Lab 1");
    }
}
