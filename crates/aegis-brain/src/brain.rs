//! The orchestrator.
//!
//! One pipeline coordinates the stages: input hygiene, builtins, intent
//! triage, then a route per intent class — composition plus risk for
//! command-class requests, templated chat for the rest.  The orchestrator
//! holds handles to the other components only; communication with the
//! executor is through its event stream, and an interaction is appended
//! to the session only once its execution (if any) is terminal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use aegis_compose::{ComposeError, Composer};
use aegis_exec::{
    ExecEvent, ExecStatus, ExecutionMode, ExecutionSnapshot, Executor, ResourceCaps, SpawnRequest,
};
use aegis_llm::{CompletionClient, Gateway, GatewayConfig, GenerateOptions, extract_json};
use aegis_registry::{RegistryError, RegistryStore, RiskAction, RiskLevel};
use aegis_risk::{RiskContext, RiskEvaluator, Verdict};
use aegis_store::{
    HistoryKind, Interaction, Session, SessionAnalytics, SessionStatus, SessionStore, WorkMode,
};

use crate::error::{BrainError, Result};
use crate::intent::Intent;
use crate::response::{CommandView, PlanStepView, PlanView, Response, SuggestionView};

/// How many recent command interactions feed prompt context.
const RECENT_TOOLS: usize = 5;

/// Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Severity at which execution requires explicit confirmation.
    pub confirm_at: RiskLevel,
    /// Deadline applied to executions the orchestrator spawns.
    pub default_deadline: Duration,
    /// Resource caps applied to executions the orchestrator spawns.
    pub caps: ResourceCaps,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            confirm_at: RiskLevel::High,
            default_deadline: Duration::from_secs(120),
            caps: ResourceCaps::default(),
        }
    }
}

/// A running execution handed back to the caller for streaming.
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub status: ExecStatus,
    pub events: broadcast::Receiver<ExecEvent>,
}

/// The registry-backed stages, rebuilt together on reload.
struct Engine {
    registry: Arc<RegistryStore>,
    gateway: Arc<Gateway>,
    composer: Composer,
    evaluator: RiskEvaluator,
}

/// Top-level request pipeline.
#[derive(Clone)]
pub struct Brain {
    inner: Arc<BrainInner>,
}

struct BrainInner {
    engine: RwLock<Arc<Engine>>,
    store: Arc<SessionStore>,
    executor: Executor,
    client: Arc<dyn CompletionClient>,
    gateway_config: GatewayConfig,
    config: BrainConfig,
}

impl Brain {
    pub fn new(
        registry: Arc<RegistryStore>,
        client: Arc<dyn CompletionClient>,
        gateway_config: GatewayConfig,
        store: Arc<SessionStore>,
        executor: Executor,
        config: BrainConfig,
    ) -> Self {
        let engine = build_engine(
            registry,
            client.clone(),
            gateway_config.clone(),
            config.confirm_at,
        );
        Self {
            inner: Arc::new(BrainInner {
                engine: RwLock::new(Arc::new(engine)),
                store,
                executor,
                client,
                gateway_config,
                config,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    pub async fn create_session(&self, role: aegis_registry::Role, mode: WorkMode) -> Result<Session> {
        Ok(self.inner.store.create(role, mode).await?)
    }

    pub async fn session_status(&self, session_id: Uuid) -> Result<SessionStatus> {
        Ok(self.inner.store.status(session_id).await?)
    }

    pub async fn history(&self, session_id: Uuid, kind: HistoryKind) -> Result<Vec<Interaction>> {
        Ok(self.inner.store.history(session_id, kind, None).await?)
    }

    pub async fn analytics(&self, session_id: Uuid) -> Result<SessionAnalytics> {
        Ok(self.inner.store.analytics(session_id).await?)
    }

    /// Destroy a session, its interaction log, and its output artifacts.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.inner.store.delete(session_id).await?;
        self.inner.executor.purge_session(session_id).await?;
        Ok(())
    }

    /// Destroy sessions idle past the TTL.
    pub async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.inner.store.sweep_expired().await?)
    }

    // -----------------------------------------------------------------------
    // Request processing
    // -----------------------------------------------------------------------

    /// Process a user request in the session's own mode.
    pub async fn process(&self, session_id: Uuid, input: &str) -> Result<Response> {
        self.process_with(session_id, input, None).await
    }

    /// Re-enter a plan step as a sub-request.
    ///
    /// Steps never inherit `quick` mode; each runs with interactive
    /// semantics and requires its own approval to execute.
    pub async fn process_plan_step(&self, session_id: Uuid, step_request: &str) -> Result<Response> {
        self.process_with(session_id, step_request, Some(WorkMode::Interactive))
            .await
    }

    async fn process_with(
        &self,
        session_id: Uuid,
        input: &str,
        mode_override: Option<WorkMode>,
    ) -> Result<Response> {
        let session = self.inner.store.get(session_id).await?;
        let _ = self.inner.store.touch(session_id).await;

        let cleaned = clean_input(input);
        if cleaned.is_empty() {
            return Ok(Response::error("input is empty", "input_error"));
        }

        if let Some(rest) = cleaned.strip_prefix('/') {
            return self.builtin(&session, rest).await;
        }

        let engine = self.engine().await;
        let started = Instant::now();
        let mode = mode_override.unwrap_or(session.mode);

        let intent = match self.classify(&engine, &session, &cleaned).await {
            Ok(intent) => intent,
            Err(reason) => {
                // Triage is down, but the command route still has
                // deterministic stages (literal pre-filter, registry
                // fallback composition), so try it before giving up.
                tracing::warn!(error = %reason, "triage unavailable, attempting command route");
                return self
                    .command_route(
                        &engine,
                        &session,
                        &cleaned,
                        mode,
                        Intent::CommandRequest,
                        started,
                    )
                    .await;
            }
        };

        tracing::info!(
            session_id = %session.id,
            intent = %intent,
            mode = %mode,
            "request classified"
        );

        if intent.is_command_class() {
            self.command_route(&engine, &session, &cleaned, mode, intent, started)
                .await
        } else if intent == Intent::ExplanationRequest {
            self.explain(&engine, &session, &cleaned, started).await
        } else if intent == Intent::PlanRequest {
            self.plan(&engine, &session, &cleaned, started).await
        } else {
            self.chat(&engine, &session, &cleaned, intent, started).await
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute an argv in a session, re-evaluating risk first.
    ///
    /// A `block` verdict refuses outright; `require_confirm` refuses
    /// unless `auto_confirm` is set.  The returned handle streams the
    /// execution's events.
    pub async fn execute(
        &self,
        session_id: Uuid,
        argv: Vec<String>,
        auto_confirm: bool,
        mode: ExecutionMode,
    ) -> Result<ExecutionHandle> {
        let session = self.inner.store.get(session_id).await?;
        let engine = self.engine().await;
        let started = Instant::now();

        let ctx = self.risk_context(&session).await;
        let verdict = engine.evaluator.evaluate(&argv.join(" "), &ctx).await;
        match verdict.action {
            RiskAction::Block => return Err(BrainError::RiskBlocked { verdict }),
            RiskAction::RequireConfirm if !auto_confirm => {
                return Err(BrainError::ConfirmationRequired { verdict });
            }
            _ => {}
        }

        let (tool, parser) = resolve_tool(&engine, &argv);
        let user_input = argv.join(" ");
        self.spawn_execution(
            &session,
            argv,
            mode,
            tool,
            parser,
            verdict,
            user_input,
            Intent::CommandRequest,
            started,
        )
    }

    /// Latest snapshot of an execution.
    pub fn execution(&self, execution_id: Uuid) -> Result<ExecutionSnapshot> {
        Ok(self.inner.executor.snapshot(execution_id)?)
    }

    /// Cancel an execution (idempotent).
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<ExecStatus> {
        Ok(self.inner.executor.cancel(execution_id)?)
    }

    /// Subscribe to an execution's future events.
    pub fn subscribe_execution(&self, execution_id: Uuid) -> Result<broadcast::Receiver<ExecEvent>> {
        Ok(self.inner.executor.subscribe(execution_id)?)
    }

    // -----------------------------------------------------------------------
    // Registry reload
    // -----------------------------------------------------------------------

    /// Re-read the registries from disk and swap in a fresh engine.
    /// In-flight requests keep the snapshot they started with.
    pub async fn reload(&self) -> std::result::Result<(), RegistryError> {
        let current = self.engine().await;
        let registry = Arc::new(current.registry.reload()?);
        let engine = build_engine(
            registry,
            self.inner.client.clone(),
            self.inner.gateway_config.clone(),
            self.inner.config.confirm_at,
        );
        *self.inner.engine.write().await = Arc::new(engine);
        tracing::info!("registries reloaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Routes
    // -----------------------------------------------------------------------

    async fn classify(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
    ) -> std::result::Result<Intent, String> {
        let bindings = HashMap::from([
            ("input".to_string(), input.to_string()),
            ("role".to_string(), session.role.to_string()),
            (
                "recent_tools".to_string(),
                self.recent_tools(session.id).await.join(", "),
            ),
        ]);

        let reply = engine
            .gateway
            .generate("triage", &bindings, GenerateOptions::deterministic())
            .await
            .map_err(|e| e.to_string())?;

        Ok(Intent::parse(&reply))
    }

    async fn chat(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
        intent: Intent,
        started: Instant,
    ) -> Result<Response> {
        let bindings = HashMap::from([
            ("input".to_string(), input.to_string()),
            ("role".to_string(), session.role.to_string()),
        ]);

        match engine
            .gateway
            .generate("chatbot", &bindings, GenerateOptions::with_temperature(0.3))
            .await
        {
            Ok(message) => {
                self.append_plain(session.id, input, intent, true, started).await;
                Ok(Response::Conversation { message })
            }
            Err(e) => Ok(Response::error(
                format!("model unavailable: {e}"),
                "llm_unavailable",
            )),
        }
    }

    async fn explain(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
        started: Instant,
    ) -> Result<Response> {
        let bindings = HashMap::from([
            ("topic".to_string(), input.to_string()),
            ("role".to_string(), session.role.to_string()),
        ]);

        match engine
            .gateway
            .generate("explain", &bindings, GenerateOptions::with_temperature(0.3))
            .await
        {
            Ok(message) => {
                self.append_plain(session.id, input, Intent::ExplanationRequest, true, started)
                    .await;
                Ok(Response::Explanation { message })
            }
            Err(e) => Ok(Response::error(
                format!("model unavailable: {e}"),
                "llm_unavailable",
            )),
        }
    }

    async fn plan(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
        started: Instant,
    ) -> Result<Response> {
        let bindings = HashMap::from([
            ("goal".to_string(), input.to_string()),
            ("role".to_string(), session.role.to_string()),
            (
                "tools".to_string(),
                engine.registry.selectable_names().join(", "),
            ),
        ]);

        let text = match engine
            .gateway
            .generate("planner", &bindings, GenerateOptions::deterministic())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                return Ok(Response::error(
                    format!("model unavailable: {e}"),
                    "llm_unavailable",
                ));
            }
        };

        let plan = match parse_plan(&text) {
            Some(plan) => plan,
            None => {
                tracing::warn!("planner reply was not a plan object");
                return Ok(Response::error("plan reply unparseable", "llm_error"));
            }
        };

        self.append_plain(session.id, input, Intent::PlanRequest, true, started)
            .await;
        Ok(Response::Plan { plan })
    }

    #[allow(clippy::too_many_arguments)]
    async fn command_route(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
        mode: WorkMode,
        intent: Intent,
        started: Instant,
    ) -> Result<Response> {
        if mode == WorkMode::Suggester {
            return self
                .suggest_route(engine, session, input, intent, started)
                .await;
        }

        let composed = match engine.composer.compose(input, session.role, None).await {
            Ok(composed) => composed,
            Err(e) => {
                self.append_plain(session.id, input, intent, false, started).await;
                return Ok(compose_error_response(e));
            }
        };

        let ctx = self.risk_context(session).await;
        let verdict = engine
            .evaluator
            .evaluate(&composed.argv.join(" "), &ctx)
            .await;

        let mut view = CommandView {
            tool_name: composed.tool,
            argv: composed.argv,
            explanation: composed.explanation,
            risk: verdict,
            execution_id: None,
            suggestions: Vec::new(),
        };

        // Auto-execute only in quick mode and only for `allow` verdicts.
        if mode == WorkMode::Quick && view.risk.action == RiskAction::Allow {
            let (tool, parser) = resolve_tool(engine, &view.argv);
            let tool = tool.or(Some(view.tool_name.clone()));
            let handle = self.spawn_execution(
                session,
                view.argv.clone(),
                ExecutionMode::Background,
                tool,
                parser,
                view.risk.clone(),
                input.to_string(),
                intent,
                started,
            )?;
            view.execution_id = Some(handle.execution_id);
        } else {
            // Preview only: record the interaction now, with no execution.
            self.append_command(session.id, input, intent, &view, started)
                .await;
        }

        Ok(Response::Command(view))
    }

    async fn suggest_route(
        &self,
        engine: &Engine,
        session: &Session,
        input: &str,
        intent: Intent,
        started: Instant,
    ) -> Result<Response> {
        let (tool, suggestions) = match engine
            .composer
            .compose_alternatives(input, session.role)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.append_plain(session.id, input, intent, false, started).await;
                return Ok(compose_error_response(e));
            }
        };

        let Some(first) = suggestions.first() else {
            return Ok(Response::error("no suggestions produced", "no_tool_found"));
        };

        let ctx = self.risk_context(session).await;
        let verdict = engine.evaluator.evaluate(&first.argv.join(" "), &ctx).await;

        let view = CommandView {
            tool_name: tool,
            argv: first.argv.clone(),
            explanation: first.explanation.clone(),
            risk: verdict,
            execution_id: None,
            suggestions: suggestions
                .into_iter()
                .map(|s| SuggestionView {
                    argv: s.argv,
                    explanation: s.explanation,
                })
                .collect(),
        };

        // Suggester mode never executes, whatever the verdict.
        self.append_command(session.id, input, intent, &view, started)
            .await;
        Ok(Response::Command(view))
    }

    async fn builtin(&self, session: &Session, rest: &str) -> Result<Response> {
        let engine = self.engine().await;
        let command = rest.split_whitespace().next().unwrap_or("");

        let message = match command {
            "help" => "Builtins: /status /list /version /reload /help. \
                       Anything else is processed as a request."
                .to_string(),
            "version" => format!("aegis {}", env!("CARGO_PKG_VERSION")),
            "list" => {
                let names = engine.registry.selectable_names();
                format!("{} tools available: {}", names.len(), names.join(", "))
            }
            "status" => {
                let status = self.inner.store.status(session.id).await?;
                format!(
                    "session {} — {} commands, tools [{}], active {}s",
                    status.session_id,
                    status.command_count,
                    status.tools_used.join(", "),
                    status.duration_secs,
                )
            }
            "reload" => match self.reload().await {
                Ok(()) => "registries reloaded".to_string(),
                Err(e) => {
                    return Ok(Response::error(
                        format!("reload failed: {e}"),
                        "registry_error",
                    ));
                }
            },
            other => {
                return Ok(Response::error(
                    format!("unknown builtin `/{other}`"),
                    "input_error",
                ));
            }
        };

        Ok(Response::Conversation { message })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn engine(&self) -> Arc<Engine> {
        Arc::clone(&*self.inner.engine.read().await)
    }

    async fn risk_context(&self, session: &Session) -> RiskContext {
        RiskContext {
            role: session.role,
            recent_tools: self.recent_tools(session.id).await,
        }
    }

    async fn recent_tools(&self, session_id: Uuid) -> Vec<String> {
        match self
            .inner
            .store
            .history(session_id, HistoryKind::Commands, Some(RECENT_TOOLS))
            .await
        {
            Ok(interactions) => interactions
                .into_iter()
                .filter_map(|i| i.tool)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Submit an execution and watch its event stream; the interaction is
    /// appended only once the terminal event arrives.
    #[allow(clippy::too_many_arguments)]
    fn spawn_execution(
        &self,
        session: &Session,
        argv: Vec<String>,
        mode: ExecutionMode,
        tool: Option<String>,
        parser: Option<String>,
        verdict: Verdict,
        user_input: String,
        intent: Intent,
        started: Instant,
    ) -> Result<ExecutionHandle> {
        debug_assert!(verdict.permits_execution());

        let mut request = SpawnRequest::new(session.id, argv.clone())
            .with_deadline(self.inner.config.default_deadline)
            .with_caps(self.inner.config.caps);
        request.mode = mode;
        request.parser = parser;

        let (execution_id, monitor_rx) = self.inner.executor.submit(request);
        // Second subscription for the caller, taken before yielding so no
        // event can slip between.
        let events = self.inner.executor.subscribe(execution_id)?;
        let status = self.inner.executor.snapshot(execution_id)?.status;

        let store = Arc::clone(&self.inner.store);
        let executor = self.inner.executor.clone();
        let session_id = session.id;

        tokio::spawn(async move {
            wait_for_complete(monitor_rx).await;

            let snapshot = executor.snapshot(execution_id).ok();
            let (success, output_bytes, parse_error) = match &snapshot {
                Some(s) => (
                    s.status == ExecStatus::Completed,
                    s.stdout_bytes + s.stderr_bytes,
                    s.parse_error.clone(),
                ),
                None => (false, 0, None),
            };

            let interaction = Interaction {
                timestamp: Utc::now(),
                user_input,
                intent: intent.wire_name().to_string(),
                command: Some(argv),
                tool,
                risk: Some(verdict),
                execution_id: Some(execution_id),
                success,
                duration_ms: started.elapsed().as_millis() as u64,
                output_bytes,
                parse_error,
            };

            if let Err(e) = store.append(session_id, interaction).await {
                tracing::warn!(
                    session_id = %session_id,
                    execution_id = %execution_id,
                    error = %e,
                    "failed to record interaction"
                );
            }
        });

        Ok(ExecutionHandle {
            execution_id,
            status,
            events,
        })
    }

    /// Record a command interaction that produced no execution.
    async fn append_command(
        &self,
        session_id: Uuid,
        input: &str,
        intent: Intent,
        view: &CommandView,
        started: Instant,
    ) {
        let interaction = Interaction {
            timestamp: Utc::now(),
            user_input: input.to_string(),
            intent: intent.wire_name().to_string(),
            command: Some(view.argv.clone()),
            tool: Some(view.tool_name.clone()),
            risk: Some(view.risk.clone()),
            execution_id: None,
            success: view.risk.permits_execution(),
            duration_ms: started.elapsed().as_millis() as u64,
            output_bytes: 0,
            parse_error: None,
        };
        if let Err(e) = self.inner.store.append(session_id, interaction).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to record interaction");
        }
    }

    /// Record a non-command interaction.
    async fn append_plain(
        &self,
        session_id: Uuid,
        input: &str,
        intent: Intent,
        success: bool,
        started: Instant,
    ) {
        let mut interaction = Interaction::conversational(input, intent.wire_name());
        interaction.success = success;
        interaction.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.inner.store.append(session_id, interaction).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to record interaction");
        }
    }
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("config", &self.inner.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_engine(
    registry: Arc<RegistryStore>,
    client: Arc<dyn CompletionClient>,
    gateway_config: GatewayConfig,
    confirm_at: RiskLevel,
) -> Engine {
    let gateway = Arc::new(Gateway::new(client, Arc::clone(&registry), gateway_config));
    Engine {
        composer: Composer::new(Arc::clone(&registry), Arc::clone(&gateway)),
        evaluator: RiskEvaluator::new(Arc::clone(&registry), Arc::clone(&gateway), confirm_at),
        gateway,
        registry,
    }
}

/// Trim and strip ANSI escape sequences.
fn clean_input(input: &str) -> String {
    static ANSI: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());
    ANSI.replace_all(input, "").trim().to_string()
}

/// Resolve the tool name and output parser for an argv by base command.
fn resolve_tool(engine: &Engine, argv: &[String]) -> (Option<String>, Option<String>) {
    let Some(base) = argv.first() else {
        return (None, None);
    };
    for summary in engine.registry.summaries() {
        if let Ok(spec) = engine.registry.lookup(&summary.name) {
            if &spec.base_command == base {
                return (Some(spec.name.clone()), spec.output_parser.clone());
            }
        }
    }
    (None, None)
}

/// Drain an execution's events until the `Complete` event.
async fn wait_for_complete(mut rx: broadcast::Receiver<ExecEvent>) {
    loop {
        match rx.recv().await {
            Ok(ExecEvent::Complete { .. }) => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "execution monitor lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn parse_plan(text: &str) -> Option<PlanView> {
    #[derive(serde::Deserialize)]
    struct PlanReply {
        goal: String,
        steps: Vec<StepReply>,
    }
    #[derive(serde::Deserialize)]
    struct StepReply {
        #[serde(default)]
        n: Option<u32>,
        description: String,
        #[serde(default)]
        tool_request: String,
        #[serde(default)]
        expected_outcome: String,
    }

    let reply: PlanReply = serde_json::from_str(extract_json(text)).ok()?;
    if reply.steps.is_empty() {
        return None;
    }

    Some(PlanView {
        goal: reply.goal,
        steps: reply
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| PlanStepView {
                n: s.n.unwrap_or(i as u32 + 1),
                description: s.description,
                tool_request: s.tool_request,
                expected_outcome: s.expected_outcome,
            })
            .collect(),
    })
}

fn compose_error_response(e: ComposeError) -> Response {
    let code = match &e {
        ComposeError::NoToolFound => "no_tool_found",
        ComposeError::UnresolvedPlaceholder { .. } => "unresolved_placeholder",
        ComposeError::MissingRequired { .. } => "missing_required",
        ComposeError::ValidationFailed { .. } => "validation_failed",
        ComposeError::LlmUnavailable { .. } => "llm_unavailable",
    };
    Response::error(e.to_string(), code)
}
