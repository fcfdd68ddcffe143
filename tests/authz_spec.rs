mod common;

use std::time::Duration;

use futures::future::join_all;
use kubemcp::authz::{AuthorizationCache, CallerIdentity};
use kubemcp::kube::ResourceAttributes;

use common::FakeCluster;

fn create_backups() -> ResourceAttributes {
    ResourceAttributes {
        verb: "create".into(),
        group: "velero.io".into(),
        resource: "backups".into(),
        subresource: None,
        namespace: Some("velero".into()),
    }
}

mod caching {
    use super::*;

    #[tokio::test]
    async fn second_query_within_ttl_is_a_hit() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        assert!(cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());
        assert!(cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());

        assert_eq!(cluster.ssar_calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn denials_are_cached_too() {
        let cluster = FakeCluster::new();
        cluster.deny("create", "velero.io", "backups");
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        for _ in 0..3 {
            assert!(!cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());
        }
        assert_eq!(cluster.ssar_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_the_ttl() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap();
        assert_eq!(cluster.ssar_calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap();
        assert_eq!(cluster.ssar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_fresh_decision_replaces_an_expired_one() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        assert!(cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());
        cluster.deny("create", "velero.io", "backups");
        assert!(cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_access() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        for namespace in ["a", "b", "c", "d"] {
            let mut attributes = create_backups();
            attributes.namespace = Some(namespace.into());
            cache.allowed(cluster.as_ref(), "test", &ambient, &attributes).await.unwrap();
        }
        assert_eq!(cache.len(), 4);

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap();

        assert_eq!(cache.len(), 1);
    }
}

mod keys {
    use super::*;

    #[tokio::test]
    async fn separate_namespaces_are_separate_decisions() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();

        let mut other = create_backups();
        other.namespace = Some("staging".into());
        cache.allowed(cluster.as_ref(), "test", &ambient, &create_backups()).await.unwrap();
        cache.allowed(cluster.as_ref(), "test", &ambient, &other).await.unwrap();

        assert_eq!(cluster.ssar_calls(), 2);
    }

    #[tokio::test]
    async fn callers_and_clusters_do_not_share_decisions() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let alice = CallerIdentity::bearer("alice", "token-a");
        let bob = CallerIdentity::bearer("bob", "token-b");

        cache.allowed(cluster.as_ref(), "test", &alice, &create_backups()).await.unwrap();
        cache.allowed(cluster.as_ref(), "test", &bob, &create_backups()).await.unwrap();
        cache.allowed(cluster.as_ref(), "prod", &alice, &create_backups()).await.unwrap();
        cache.allowed(cluster.as_ref(), "test", &alice, &create_backups()).await.unwrap();

        assert_eq!(cluster.ssar_calls(), 3);
        assert_eq!(cache.len(), 3);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrent_misses_share_one_query() {
        let cluster = FakeCluster::new();
        let cache = AuthorizationCache::new(Duration::from_secs(5));
        let ambient = CallerIdentity::ambient();
        let attributes = create_backups();

        let decisions = join_all(
            (0..16).map(|_| cache.allowed(cluster.as_ref(), "test", &ambient, &attributes)),
        )
        .await;

        assert!(decisions.into_iter().all(|d| d.unwrap()));
        assert_eq!(cluster.ssar_calls(), 1);
    }
}
