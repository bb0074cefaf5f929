use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use mnemon_api::build_app;
use mnemon_bus::{ConsumerFleet, FleetConfig, LocalBus, MessageBus, NatsBus, Producer};
use mnemon_config::Settings;
use mnemon_contracts::{load_contracts, resolve};
use mnemon_dispatch::{
    BudgetConfig, Dispatcher, DispatcherConfig, Handler, HandlerRegistry, QuarantineSink,
};
use mnemon_domain::{DomainId, EventKind, ProducerId};
use mnemon_fsm::FsmReducer;
use mnemon_memsvc::{
    HttpMemoryService, HttpMemoryServiceConfig, LocalMemoryService, MemoryService,
};
use mnemon_patterns::handlers::{
    ArchivePatternHandler, ClaudeHookHandler, DeprecatePatternHandler, DisablePatternHandler,
    LearnPatternsHandler, PromotePatternHandler,
};
use mnemon_patterns::{LearningPipeline, LifecycleReducer};
use mnemon_review::handlers::{
    FindingObservedHandler, FindingResolvedHandler, FixAppliedHandler, PatternInjectedHandler,
    SessionOutcomeHandler,
};
use mnemon_review::{FeedbackScorer, PairingConfig, PairingEngine};
use mnemon_store::{boot_handshake, DomainTaxonomyRow, MetaStore, PostgresStore};
use tracing::{info, warn};
use uuid::Uuid;

/// Run the service: settings → store → handshake → contracts → registry →
/// fleet → read API, then signal-driven drain.
pub async fn serve() -> Result<()> {
    let settings = Settings::from_env().context("resolve settings")?;
    let store = Arc::new(
        PostgresStore::connect(&settings.db_url)
            .await
            .context("connect to store")?,
    );

    // The handshake is the gate: a schema or fingerprint mismatch must
    // abort before any consumer or endpoint exists.
    boot_handshake(store.as_ref(), Utc::now())
        .await
        .context("boot handshake")?;

    let contracts = load_contracts(&settings.contracts_dir).context("load contracts")?;
    let resolved = resolve(&contracts).context("resolve contracts")?;
    info!(
        contracts = contracts.len(),
        subscriptions = resolved.subscriptions.len(),
        "contracts resolved"
    );

    let domain_id = ensure_default_domain(store.as_ref()).await?;
    let producer_id = ProducerId::new(settings.producer_id.clone());

    let memory: Arc<dyn MemoryService> = match &settings.memory_service_url {
        Some(url) => Arc::new(
            HttpMemoryService::new(HttpMemoryServiceConfig::new(url))
                .context("memory service client")?,
        ),
        None => {
            warn!("MEMORY_SERVICE_URL unset; pattern mirroring is local-only");
            Arc::new(LocalMemoryService::new())
        }
    };

    let fsm = Arc::new(FsmReducer::new(store.clone(), settings.lease_ttl));
    let lifecycle = Arc::new(LifecycleReducer::new(
        store.clone(),
        settings.pairing_confidence_floor,
    ));
    let pipeline = Arc::new(LearningPipeline::new(
        store.clone(),
        store.clone(),
        fsm.clone(),
        memory,
        producer_id.clone(),
    ));
    let pairing = Arc::new(PairingEngine::new(
        store.clone(),
        store.clone(),
        PairingConfig::new(settings.pairing_confidence_floor, domain_id),
    ));
    let scorer = Arc::new(FeedbackScorer::new(
        store.clone(),
        store.clone(),
        store.clone(),
        lifecycle.clone(),
    ));

    let mut registry = HandlerRegistry::new();
    for binding in &resolved.subscriptions {
        let handler = handler_for(
            binding.kind,
            &pipeline,
            &pairing,
            &scorer,
            &lifecycle,
            &fsm,
            &producer_id,
        )?;
        registry
            .register(binding.kind, binding.version, handler)
            .with_context(|| format!("register {}", binding.kind))?;
    }

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::new(QuarantineSink::default()),
        DispatcherConfig {
            handler_timeout: settings.handler_timeout,
            budget: BudgetConfig::default(),
            seen_capacity: 65_536,
        },
    ));

    // Consumers only run behind the activation gate; without it the
    // service is read-only and the fleet stays idle.
    let (bus, bus_reachable): (Arc<dyn MessageBus>, bool) = if settings.consumers_enabled() {
        let Some(bootstrap) = settings.bus_bootstrap.as_deref() else {
            bail!("ACTIVATION_GATE set without BUS_BOOTSTRAP");
        };
        match NatsBus::connect(bootstrap).await {
            Ok(bus) => (Arc::new(bus), true),
            Err(e) => {
                warn!(error = %e, "bus unreachable at startup, running degraded");
                (Arc::new(LocalBus::new()), false)
            }
        }
    } else {
        info!("ACTIVATION_GATE unset; consumers disabled, read-only mode");
        (Arc::new(LocalBus::new()), false)
    };

    let producer = Arc::new(Producer::new(bus.clone(), resolved.clone()));
    let fleet = Arc::new(ConsumerFleet::new(
        bus,
        dispatcher.clone(),
        producer,
        FleetConfig::default(),
    ));

    if settings.consumers_enabled() {
        if bus_reachable {
            fleet.start(&resolved).await.context("start consumer fleet")?;
        } else {
            fleet.mark_degraded("bus configured but unreachable at startup");
        }
    }

    spawn_retention_task(store.clone(), settings.retention_days_fsm_history);

    let api_task = match (&settings.api_bind, &settings.api_auth_token) {
        (Some(bind), Some(token)) => {
            let app = build_app(
                store.clone(),
                dispatcher.clone(),
                lifecycle.clone(),
                fleet.status(),
                Arc::new(token.clone()),
            );
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("bind {bind}"))?;
            info!(bind = %bind, "read api listening");
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    warn!(error = %e, "api server stopped");
                }
            }))
        }
        _ => {
            info!("API_BIND unset; read api disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("shutdown signal received, draining");
    fleet.drain().await;
    if let Some(task) = api_task {
        task.abort();
    }
    Ok(())
}

/// Deterministic default domain for this deployment's review stream.
async fn ensure_default_domain(meta: &dyn MetaStore) -> Result<DomainId> {
    let domain_id = DomainId(Uuid::new_v5(&Uuid::NAMESPACE_OID, b"mnemon.review.default"));
    if meta.get_domain(&domain_id).await?.is_none() {
        meta.upsert_domain(&DomainTaxonomyRow {
            domain_id,
            name: "default".to_string(),
            parent_id: None,
            session_success_duration_ceiling_ms:
                mnemon_store::DEFAULT_SESSION_DURATION_CEILING_MS,
        })
        .await?;
        info!(domain_id = %domain_id, "default domain created");
    }
    Ok(domain_id)
}

#[allow(clippy::too_many_arguments)]
fn handler_for(
    kind: EventKind,
    pipeline: &Arc<LearningPipeline>,
    pairing: &Arc<PairingEngine>,
    scorer: &Arc<FeedbackScorer>,
    lifecycle: &Arc<LifecycleReducer>,
    fsm: &Arc<FsmReducer>,
    producer_id: &ProducerId,
) -> Result<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match kind {
        EventKind::LearnPatterns => Arc::new(LearnPatternsHandler::new(pipeline.clone())),
        EventKind::FindingObserved => Arc::new(FindingObservedHandler::new(pairing.clone())),
        EventKind::FixApplied => Arc::new(FixAppliedHandler::new(pairing.clone())),
        EventKind::FindingResolved => Arc::new(FindingResolvedHandler::new(
            pairing.clone(),
            producer_id.clone(),
        )),
        EventKind::SessionOutcome => Arc::new(SessionOutcomeHandler::new(scorer.clone())),
        EventKind::PatternInjected => Arc::new(PatternInjectedHandler::new(scorer.clone())),
        EventKind::ClaudeHookEvent => Arc::new(ClaudeHookHandler::new(
            fsm.clone(),
            producer_id.clone(),
        )),
        EventKind::PromotePattern => Arc::new(PromotePatternHandler::new(
            lifecycle.clone(),
            producer_id.clone(),
        )),
        EventKind::DeprecatePattern => Arc::new(DeprecatePatternHandler::new(
            lifecycle.clone(),
            producer_id.clone(),
        )),
        EventKind::DisablePattern => Arc::new(DisablePatternHandler::new(
            lifecycle.clone(),
            producer_id.clone(),
        )),
        EventKind::ArchivePattern => Arc::new(ArchivePatternHandler::new(
            lifecycle.clone(),
            producer_id.clone(),
        )),
        other => bail!("contracts subscribe to '{other}' but no handler exists for it"),
    };
    Ok(handler)
}

fn spawn_retention_task(store: Arc<PostgresStore>, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match mnemon_store::FsmStore::prune_history(store.as_ref(), cutoff).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "fsm history pruned"),
                Err(e) => warn!(error = %e, "fsm history pruning failed"),
            }
        }
    });
}
