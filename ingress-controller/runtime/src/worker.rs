use crate::{
    core::{
        queue::{self, Queue},
        ProxyManager,
    },
    index::{self, SharedIndex},
};
use anyhow::Result;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Waits for the mirror to fill, then recomputes the proxy configuration whenever the queue
/// asks for it.
///
/// The first pass runs as soon as the mirror has synced, even if no synced resource was
/// relevant, so the proxy always gets at least the default upstream.
pub(crate) async fn process(
    index: SharedIndex,
    handle: queue::Handle,
    queue: Queue,
    manager: Arc<dyn ProxyManager>,
    shutdown: CancellationToken,
) {
    while !index.read().has_synced() {
        tracing::debug!("Waiting for caches to sync");
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
        }
    }
    tracing::info!("Caches synced");
    handle.enqueue();

    queue
        .run(
            move || sync_proxy(index.clone(), manager.clone()),
            shutdown,
        )
        .await;
    tracing::debug!("Worker stopped");
}

async fn sync_proxy(index: SharedIndex, manager: Arc<dyn ProxyManager>) -> Result<()> {
    let (mut config, options) = {
        let index = index.read();
        let config = index::resolve(index.cache(), index.config())?;
        (config, proxy_options(&index))
    };

    manager.read_config(&mut config, &options);
    if manager.check_and_reload(&config).await? {
        tracing::info!(upstreams = config.upstreams.len(), "Proxy reloaded");
    } else {
        tracing::debug!("Proxy configuration unchanged");
    }
    Ok(())
}

/// Reads the tuning options from the configured ConfigMap. A missing ConfigMap yields none.
fn proxy_options(index: &index::Index) -> BTreeMap<String, String> {
    let Some(id) = index.config().proxy_config_map.as_ref() else {
        return BTreeMap::new();
    };
    match index.cache().config_maps.get(id) {
        Some(cm) => cm.data.clone().unwrap_or_default(),
        None => {
            tracing::debug!(configmap = %id, "ConfigMap not found");
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{queue::QueueMetrics, rate_limit::TokenBucket, IngressConfig},
        k8s::{self, ObjectMeta, ResourceId},
    };
    use kubert::index::{IndexClusterResource, IndexNamespacedResource};
    use maplit::btreemap;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<IngressConfig>>,
    }

    #[async_trait::async_trait]
    impl ProxyManager for Recorder {
        async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool> {
            let mut applied = self.applied.lock();
            let changed = applied.last() != Some(config);
            applied.push(config.clone());
            Ok(changed)
        }
    }

    fn mk_config() -> index::Config {
        index::Config {
            default_backend_service: ResourceId::new("kube-system", "default-http-backend"),
            default_tls_secret: None,
            ingress_class: "h2-ingress".to_string(),
            proxy_config_map: Some(ResourceId::new("kube-system", "h2-ingress")),
            conf_dir: "/etc/h2-ingress".into(),
        }
    }

    fn mk_config_map(data: BTreeMap<String, String>) -> k8s::ConfigMap {
        k8s::ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("kube-system".to_string()),
                name: Some("h2-ingress".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn sync_all(index: &SharedIndex, config_maps: Vec<k8s::ConfigMap>) {
        let mut index = index.write();
        IndexNamespacedResource::<k8s::Ingress>::reset(&mut *index, vec![], Default::default());
        IndexNamespacedResource::<k8s::Service>::reset(&mut *index, vec![], Default::default());
        IndexNamespacedResource::<k8s::Endpoints>::reset(&mut *index, vec![], Default::default());
        IndexNamespacedResource::<k8s::Secret>::reset(&mut *index, vec![], Default::default());
        IndexNamespacedResource::<k8s::ConfigMap>::reset(
            &mut *index,
            config_maps,
            Default::default(),
        );
        IndexNamespacedResource::<k8s::Pod>::reset(&mut *index, vec![], Default::default());
        IndexClusterResource::<k8s::Node>::reset(&mut *index, vec![], Default::default());
    }

    #[tokio::test(start_paused = true)]
    async fn applies_configuration_after_sync() {
        let (handle, queue) = Queue::new(
            TokenBucket::new(10.0, 1).unwrap(),
            QueueMetrics::default(),
        );
        let index = index::Index::shared(
            Arc::new(mk_config()),
            handle.clone(),
            index::IndexMetrics::default(),
        );
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(process(
            index.clone(),
            handle,
            queue,
            recorder.clone(),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(recorder.applied.lock().is_empty(), "nothing runs before sync");

        // The ConfigMap in the initial listing and the sync itself coalesce into one pass.
        let workers = btreemap! { "workers".to_string() => "2".to_string() };
        sync_all(&index, vec![mk_config_map(workers)]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        {
            let applied = recorder.applied.lock();
            assert_eq!(applied.len(), 1);
            assert_eq!(
                applied[0].options,
                btreemap! { "workers".to_string() => "2".to_string() }
            );
            assert_eq!(applied[0].upstreams.len(), 1);
            assert!(applied[0].upstreams[0].is_default());
        }

        IndexNamespacedResource::<k8s::ConfigMap>::apply(
            &mut *index.write(),
            mk_config_map(btreemap! { "workers".to_string() => "8".to_string() }),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            recorder.applied.lock().last().map(|c| c.options.clone()),
            Some(btreemap! { "workers".to_string() => "8".to_string() })
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_while_waiting_for_sync() {
        let (handle, queue) = Queue::new(
            TokenBucket::new(10.0, 1).unwrap(),
            QueueMetrics::default(),
        );
        let index = index::Index::shared(
            Arc::new(mk_config()),
            handle.clone(),
            index::IndexMetrics::default(),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(process(
            index,
            handle,
            queue,
            Arc::new(Recorder::default()),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cluster_gets_the_default_upstream() {
        let (handle, queue) = Queue::new(
            TokenBucket::new(10.0, 1).unwrap(),
            QueueMetrics::default(),
        );
        let index = index::Index::shared(
            Arc::new(mk_config()),
            handle.clone(),
            index::IndexMetrics::default(),
        );
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(process(
            index.clone(),
            handle,
            queue,
            recorder.clone(),
            shutdown.clone(),
        ));

        // Nothing in the initial listings is relevant.
        sync_all(&index, vec![]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        {
            let applied = recorder.applied.lock();
            assert_eq!(applied.len(), 1);
            assert!(applied[0].options.is_empty());
            assert_eq!(applied[0].upstreams.len(), 1);
            assert!(applied[0].upstreams[0].is_default());
        }

        shutdown.cancel();
        task.await.unwrap();
    }
}
