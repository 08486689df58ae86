//! Building the shared services from a YAML configuration.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use indexsync_core::config::Validatable;
use indexsync_core::features::cache::CacheRegion;
use indexsync_core::features::locking::LockRequest;
use indexsync_core::{escape, sanitize_id, CacheService, ObjectLockManager, SyncConfig};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
version: 1
content_service:
  base_url: "http://content.local/core/rest"
repositories:
  - id: bedroom
    username: admin
    password: secret
tracking:
  mime_types: "text/plain, application/pdf"
locks:
  stripes: 256
cache:
  regions:
    node:
      capacity: 2
      ttl_seconds: 1
    tree:
      enabled: false
"#;

fn load() -> SyncConfig {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    SyncConfig::from_yaml(file.path()).unwrap()
}

#[test]
fn test_services_follow_configuration() {
    let config = load();
    config.validate().unwrap();

    let locks = ObjectLockManager::with_stripes(config.locks.stripes);
    assert_eq!(locks.stripe_count(), 256);

    let caches = CacheService::new(&config.cache);
    let cache = caches.for_repository("bedroom");

    let tree = cache.region(CacheRegion::Tree);
    tree.put("root", &vec!["a".to_string()]);
    assert_eq!(tree.get::<Vec<String>>("root"), None);

    let nodes = cache.region(CacheRegion::Node);
    nodes.put("a", &1u32);
    assert_eq!(nodes.get::<u32>("a"), Some(1));
    thread::sleep(Duration::from_millis(1200));
    assert_eq!(nodes.get::<u32>("a"), None);

    assert_eq!(
        config.tracking.allowed_mime_types(),
        vec!["text/plain".to_string(), "application/pdf".to_string()]
    );
}

#[test]
fn test_locked_writers_with_sanitized_ids() {
    let locks = Arc::new(ObjectLockManager::with_stripes(16));
    let id = sanitize_id(" report:final ").unwrap();
    assert_eq!(id, escape("report:final"));

    let handles = (0..4)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let guard = locks.bulk_lock(&[
                        LockRequest::write("bedroom", id.as_str()),
                        LockRequest::read("bedroom", "other"),
                    ]);
                    locks.bulk_unlock(guard);
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
}
