//! Tests for the connection registry

#[cfg(test)]
mod tests {
    use crate::{
        EngineError, OpenFlags,
        config::KeyProvider,
        registry::{ConnectionRegistry, FauxCryptKeyer, SqlCipherKeyer, key_applier},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry_in(dir: &TempDir, provider: KeyProvider) -> ConnectionRegistry {
        ConnectionRegistry::with_keyer(Some(dir.path().to_path_buf()), key_applier(provider))
    }

    const RWC: OpenFlags = OpenFlags::READ_WRITE.union(OpenFlags::CREATE_IF_MISSING);

    #[tokio::test]
    async fn test_first_handle_is_one() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let handle = registry
            .open("test.db", OpenFlags::CREATE_IF_MISSING, "")
            .await
            .unwrap();
        assert_eq!(handle, 1);
        assert!(dir.path().join("test.db").exists());
    }

    #[tokio::test]
    async fn test_reopen_yields_fresh_handle() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let first = registry.open("test.db", RWC, "").await.unwrap();
        registry.close(first).await.unwrap();
        let second = registry.open("test.db", RWC, "").await.unwrap();

        assert_ne!(first, second);
        assert!(second > first);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_handles_are_distinct_while_live() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let a = registry.open("a.db", RWC, "").await.unwrap();
        let b = registry.open("a.db", RWC, "").await.unwrap();
        let c = registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_lookup_unknown_handle() {
        let registry = ConnectionRegistry::with_keyer(None, Arc::new(SqlCipherKeyer));

        match registry.lookup(99).await {
            Err(EngineError::UnknownHandle(99)) => {}
            other => panic!("expected UnknownHandle, got {:?}", other.map(|c| c.handle())),
        }
    }

    #[tokio::test]
    async fn test_double_close_fails() {
        let registry = ConnectionRegistry::with_keyer(None, Arc::new(SqlCipherKeyer));
        let handle = registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();

        registry.close(handle).await.unwrap();
        assert!(matches!(
            registry.close(handle).await,
            Err(EngineError::UnknownHandle(h)) if h == handle
        ));
        assert!(registry.lookup(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_batch() {
        let registry = Arc::new(ConnectionRegistry::with_keyer(None, Arc::new(SqlCipherKeyer)));
        let handle = registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();
        let conn = registry.lookup(handle).await.unwrap();

        // Stand in for a running batch
        let guard = conn.lock().await;

        let closer = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.close(handle).await })
        };

        // The handle is unpublished right away
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.lookup(handle).await.is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("handle still published");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closer.is_finished(), "close did not wait for the batch");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), closer)
            .await
            .expect("close stalled")
            .unwrap()
            .unwrap();
        assert!(conn.lock().await.conn.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_file_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let result = registry.open("missing.db", OpenFlags::READ_WRITE, "").await;
        assert!(matches!(result, Err(EngineError::Open(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_flags_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let conflicting = OpenFlags::READ_ONLY | OpenFlags::CREATE_IF_MISSING;
        assert!(matches!(
            registry.open("x.db", conflicting, "").await,
            Err(EngineError::Open(_))
        ));
        assert!(matches!(
            registry.open("x.db", OpenFlags::from_bits_retain(0x1000), "").await,
            Err(EngineError::Open(_))
        ));
        assert!(matches!(
            registry.open("  ", RWC, "").await,
            Err(EngineError::Open(_))
        ));
    }

    #[tokio::test]
    async fn test_key_on_plain_store_fails() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Sqlcipher);

        let plain = registry.open("plain.db", RWC, "").await.unwrap();
        registry.close(plain).await.unwrap();

        let result = registry.open("plain.db", RWC, "secret").await;
        assert!(matches!(result, Err(EngineError::Open(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_fauxcrypt_accepts_only_correct_key() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir, KeyProvider::Fauxcrypt);

        let handle = registry
            .open("keyed.db", RWC, FauxCryptKeyer::CORRECT_KEY)
            .await
            .unwrap();
        assert!(registry.lookup(handle).await.unwrap().is_keyed());

        let rejected = registry.open("keyed.db", RWC, "wrong").await;
        assert!(matches!(rejected, Err(EngineError::Open(msg)) if msg.contains("password key")));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let registry = ConnectionRegistry::with_keyer(None, Arc::new(SqlCipherKeyer));
        let handle = registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();
        registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert!(registry.lookup(handle).await.is_err());

        // The counter survives teardown
        let next = registry.open("", OpenFlags::IN_MEMORY, "").await.unwrap();
        assert_eq!(next, 3);
    }
}
