use crate::{
    core::{
        queue::{Queue, QueueMetrics},
        rate_limit::TokenBucket,
        ProxyManager,
    },
    index::{self, Index, IndexMetrics},
    k8s::{self, ResourceId},
    status, worker, FileManager,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "h2-ingress", about = "An HTTP/2 ingress controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "h2_ingress=info,warn",
        env = "H2_INGRESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Service that handles requests no rule matches, as `namespace/name`.
    #[clap(long)]
    default_backend_service: ResourceId,

    /// Ingresses asking for any other class are ignored.
    #[clap(long, default_value = "h2-ingress")]
    ingress_class: String,

    /// Only watch Ingresses in this namespace.
    #[clap(long)]
    watch_namespace: Option<String>,

    /// ConfigMap holding proxy tuning options, as `namespace/name`.
    #[clap(long)]
    proxy_configmap: Option<ResourceId>,

    /// Secret holding the default TLS certificate, as `namespace/name`.
    #[clap(long)]
    default_tls_secret: Option<ResourceId>,

    /// Service whose addresses are published in Ingress status instead of the controller's.
    #[clap(long)]
    publish_service: Option<ResourceId>,

    /// Publish a node's internal IP when it has no external one.
    #[clap(long)]
    allow_internal_ip: bool,

    /// Configuration reloads per second.
    #[clap(long, default_value = "1.0")]
    reload_rate: f64,

    #[clap(long, default_value = "1")]
    reload_burst: u32,

    #[clap(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    status_interval_secs: u64,

    #[clap(long, default_value = "/etc/h2-ingress")]
    conf_dir: PathBuf,

    #[clap(long, env = "POD_NAME")]
    pod_name: Option<String>,

    #[clap(long, env = "POD_NAMESPACE")]
    pod_namespace: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            default_backend_service,
            ingress_class,
            watch_namespace,
            proxy_configmap,
            default_tls_secret,
            publish_service,
            allow_internal_ip,
            reload_rate,
            reload_burst,
            status_interval_secs,
            conf_dir,
            pod_name,
            pod_namespace,
        } = self;

        let pod_name = pod_name
            .filter(|name| !name.is_empty())
            .context("POD_NAME must be set")?;
        let pod_namespace = pod_namespace
            .filter(|ns| !ns.is_empty())
            .context("POD_NAMESPACE must be set")?;
        let limiter = TokenBucket::new(reload_rate, reload_burst)?;

        let mut prom = <Registry>::default();
        let queue_metrics = QueueMetrics::register(prom.sub_registry_with_prefix("queue"));
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("index"));
        let status_metrics =
            status::StatusMetrics::register(prom.sub_registry_with_prefix("status"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // The tuning ConfigMap is watched in its own namespace, or ours when none is configured.
        let config_map_namespace = proxy_configmap
            .as_ref()
            .map(|id| id.namespace.clone())
            .unwrap_or_else(|| pod_namespace.clone());

        let (queue_handle, queue) = Queue::new(limiter, queue_metrics);
        let index = Index::shared(
            Arc::new(index::Config {
                default_backend_service,
                default_tls_secret,
                ingress_class,
                proxy_config_map: proxy_configmap,
                conf_dir: conf_dir.clone(),
            }),
            queue_handle.clone(),
            index_metrics,
        );

        // Spawn resource watches.

        match watch_namespace.as_deref() {
            Some(ns) => {
                let ingresses = runtime.watch::<k8s::Ingress>(
                    k8s::Api::namespaced(runtime.client(), ns),
                    watcher::Config::default(),
                );
                tokio::spawn(
                    kubert::index::namespaced(index.clone(), ingresses)
                        .instrument(info_span!("ingresses", ns)),
                )
            }
            None => {
                let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(index.clone(), ingresses)
                        .instrument(info_span!("ingresses")),
                )
            }
        };

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), secrets).instrument(info_span!("secrets")),
        );

        let config_maps = runtime.watch::<k8s::ConfigMap>(
            k8s::Api::namespaced(runtime.client(), &config_map_namespace),
            watcher::Config::default(),
        );
        tokio::spawn(
            kubert::index::namespaced(index.clone(), config_maps)
                .instrument(info_span!("configmaps", ns = %config_map_namespace)),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(index.clone(), pods).instrument(info_span!("pods")));

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index.clone(), nodes).instrument(info_span!("nodes")));

        // Spawn the configuration worker and the status reconciler. Both stop when the runtime
        // begins shutting down.
        let shutdown = CancellationToken::new();

        let manager: Arc<dyn ProxyManager> = Arc::new(FileManager::new(conf_dir));
        let worker = tokio::spawn(
            worker::process(index.clone(), queue_handle, queue, manager, shutdown.clone())
                .instrument(info_span!("worker")),
        );

        let reconciler = status::Reconciler::new(
            index,
            status::KubeStatusApi::new(runtime.client()),
            status::StatusConfig {
                pod: ResourceId::new(pod_namespace, pod_name),
                publish_service,
                allow_internal_ip,
                interval: Duration::from_secs(status_interval_secs),
            },
            status_metrics,
        );
        let status = tokio::spawn(
            reconciler
                .run(shutdown.clone())
                .instrument(info_span!("status")),
        );

        // Hold the runtime's shutdown until the worker has finished its pass and the reconciler
        // has withdrawn this replica's address.
        let drain = runtime.shutdown_handle();
        tokio::spawn(async move {
            let release = drain.signaled().await;
            tracing::info!("Shutting down");
            shutdown.cancel();
            release
                .release_after(async move {
                    if let Err(error) = worker.await {
                        tracing::warn!(%error, "Worker task failed");
                    }
                    if let Err(error) = status.await {
                        tracing::warn!(%error, "Status task failed");
                    }
                })
                .await;
        });

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
