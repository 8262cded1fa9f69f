//! The turn engine — per-message orchestration of the whole runtime.
//!
//! States per turn: Received → Recalled → Contextualized → Scored →
//! Decided → (Clarifying | Acting) → (Validated | Replanned) → Executed →
//! Chained? → Synthesized → Persisted → Done. Turns are serialized per
//! session, bounded by a deadline, and always produce a response — a
//! normal answer, a clarification, or an apology carrying the error kind.

use picoagent_core::hook::{HookContext, HookEvent, HookRegistry};
use picoagent_core::provider::{ProviderClient, ToolScores};
use picoagent_core::session::Role;
use picoagent_core::tool::{ToolContext, ToolRegistry, ToolResult};
use picoagent_core::Decision;
use picoagent_memory::dual::{spawn_consolidation, ConsolidationRequest, DualMemoryStore};
use picoagent_memory::VectorMemory;
use picoagent_providers::LocalHeuristicClient;
use picoagent_routing::{AdaptiveThreshold, EntropyScheduler};
use picoagent_skills::{ActivationReason, SkillActivation, SkillLibrary};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::ContextBuilder;
use crate::sessions::SessionManager;
use crate::subagent::SubagentCoordinator;

const DEFAULT_MAX_TOOL_CHAIN: u32 = 3;
const DEFAULT_CHAIN_MARGIN: f64 = 0.1;
const DEFAULT_MEMORY_TOP_K: usize = 5;
const DEFAULT_HISTORY_WINDOW: usize = 12;
const DEFAULT_CONSOLIDATION_WINDOW: usize = 20;
const DEFAULT_TURN_DEADLINE_SECS: u64 = 120;
const DEFAULT_MAX_ACTIVE_SKILLS: usize = 3;

/// One executed tool call within a turn.
#[derive(Debug, Clone)]
pub struct ExecutedTool {
    pub name: String,
    pub args: serde_json::Value,
    pub result: ToolResult,
}

/// Everything a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub decision: Decision,
    pub executed: Vec<ExecutedTool>,
    pub active_skills: Vec<String>,
    pub subagent_note: Option<String>,
}

/// The top-level turn orchestrator.
pub struct AgentLoop {
    provider: Arc<dyn ProviderClient>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    scheduler: EntropyScheduler,
    adaptive: Option<Arc<Mutex<AdaptiveThreshold>>>,
    memory: Option<Arc<Mutex<VectorMemory>>>,
    memory_path: Option<PathBuf>,
    skills: Option<Arc<SkillLibrary>>,
    dual_memory: Option<Arc<DualMemoryStore>>,
    subagent: Option<SubagentCoordinator>,
    hooks: Arc<HookRegistry>,
    context: ContextBuilder,
    heuristic: LocalHeuristicClient,
    workspace_root: PathBuf,
    max_tool_chain: u32,
    chain_margin: f64,
    memory_top_k: usize,
    history_window: usize,
    consolidation_window: usize,
    turn_deadline: Duration,
    max_active_skills: usize,
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            tools,
            sessions,
            scheduler: EntropyScheduler::new(1.5),
            adaptive: None,
            memory: None,
            memory_path: None,
            skills: None,
            dual_memory: None,
            subagent: None,
            hooks: Arc::new(HookRegistry::new()),
            context: ContextBuilder::new(),
            heuristic: LocalHeuristicClient::new(),
            workspace_root: workspace_root.into(),
            max_tool_chain: DEFAULT_MAX_TOOL_CHAIN,
            chain_margin: DEFAULT_CHAIN_MARGIN,
            memory_top_k: DEFAULT_MEMORY_TOP_K,
            history_window: DEFAULT_HISTORY_WINDOW,
            consolidation_window: DEFAULT_CONSOLIDATION_WINDOW,
            turn_deadline: Duration::from_secs(DEFAULT_TURN_DEADLINE_SECS),
            max_active_skills: DEFAULT_MAX_ACTIVE_SKILLS,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scheduler(mut self, scheduler: EntropyScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_adaptive(mut self, adaptive: AdaptiveThreshold) -> Self {
        self.adaptive = Some(Arc::new(Mutex::new(adaptive)));
        self
    }

    pub fn with_memory(mut self, memory: VectorMemory, path: Option<PathBuf>) -> Self {
        self.memory = Some(Arc::new(Mutex::new(memory)));
        self.memory_path = path;
        self
    }

    pub fn with_skills(mut self, skills: Arc<SkillLibrary>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_dual_memory(mut self, dual: Arc<DualMemoryStore>) -> Self {
        self.dual_memory = Some(dual);
        self
    }

    pub fn with_subagent(mut self, subagent: SubagentCoordinator) -> Self {
        self.subagent = Some(subagent);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_tool_chain(mut self, max: u32) -> Self {
        self.max_tool_chain = max.max(1);
        self
    }

    pub fn with_turn_deadline(mut self, deadline: Duration) -> Self {
        self.turn_deadline = deadline;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_consolidation_window(mut self, window: usize) -> Self {
        self.consolidation_window = window.max(1);
        self
    }

    pub fn with_memory_top_k(mut self, k: usize) -> Self {
        self.memory_top_k = k;
        self
    }

    /// Handle one inbound message end to end.
    ///
    /// Turns for the same session are totally ordered: a second message
    /// waits until the previous turn has persisted. The whole turn runs
    /// under the deadline; expiry surfaces as a clarify-style failure.
    pub async fn handle_message(&self, channel: &str, sender: &str, text: &str) -> TurnOutcome {
        let session_id = format!("{channel}:{sender}");
        let lock = self.session_lock(&session_id).await;
        let _guard = lock.lock().await;

        match tokio::time::timeout(self.turn_deadline, self.run_turn(&session_id, channel, text))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(session_id, deadline_secs = self.turn_deadline.as_secs(), "Turn deadline exceeded");
                let response = format!(
                    "I could not finish within {}s (timeout). Please try a narrower request.",
                    self.turn_deadline.as_secs()
                );
                self.sessions
                    .append(&session_id, channel, Role::Assistant, &response)
                    .await;
                if let Err(e) = self.sessions.save().await {
                    warn!(session_id, error = %e, "Failed to persist session");
                }
                let ctx = Arc::new(HookContext {
                    session_id: session_id.clone(),
                    user_message: text.to_string(),
                    response: Some(response.clone()),
                    ..HookContext::default()
                });
                self.hooks.fire(HookEvent::TurnEnd, ctx).await;
                TurnOutcome {
                    response,
                    decision: Decision::Clarify {
                        reason: "turn-deadline".into(),
                        entropy_bits: 0.0,
                    },
                    executed: Vec::new(),
                    active_skills: Vec::new(),
                    subagent_note: None,
                }
            }
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run_turn(&self, session_id: &str, channel: &str, text: &str) -> TurnOutcome {
        // ── Receive ──
        let turn_index = self
            .sessions
            .append(session_id, channel, Role::User, text)
            .await;
        if let Err(e) = self.sessions.save().await {
            warn!(session_id, error = %e, "Failed to persist inbound message");
        }
        self.hooks
            .fire(
                HookEvent::TurnStart,
                Arc::new(HookContext {
                    session_id: session_id.to_string(),
                    turn_index,
                    user_message: text.to_string(),
                    ..HookContext::default()
                }),
            )
            .await;

        // ── Recall ──
        let memory_snippets = self.recall_memories(text).await;

        // ── Skills ──
        let activations = self.select_skills(text, session_id);
        let active_skills: Vec<String> =
            activations.iter().map(|a| a.skill.name.clone()).collect();

        // ── Context ──
        let skills_summary = self
            .skills
            .as_ref()
            .map(|s| s.summary())
            .unwrap_or_default();
        let long_term = self.dual_memory.as_ref().and_then(|d| d.memory_context());
        let mut history = self
            .sessions
            .recent(session_id, self.history_window + 1)
            .await;
        history.pop(); // the current user message rides separately
        let messages = self.context.build_messages(
            text,
            channel,
            &skills_summary,
            &memory_snippets,
            long_term.as_deref(),
            &activations,
            &history,
        );
        let stable_prefix = messages[0].content.clone();
        let routing_message = ContextBuilder::routing_text(&messages);

        // ── Score + Decide ──
        let threshold = self.current_threshold().await;
        let (scores, mut decision) = match self.skill_short_circuit(&activations) {
            Some(tool) => {
                info!(session_id, tool = %tool, "Skill short-circuit");
                (
                    None,
                    Decision::Act { tool, confidence: 1.0, entropy_bits: 0.0 },
                )
            }
            None => {
                let descriptors = self.tools.list();
                let scores = match self
                    .provider
                    .score_tools(&stable_prefix, &routing_message, &descriptors)
                    .await
                {
                    Ok(scores) => scores,
                    Err(e) => {
                        warn!(session_id, error = %e, "Scoring failed, using heuristic");
                        self.heuristic
                            .score_tools(&stable_prefix, text, &descriptors)
                            .await
                            .unwrap_or_default()
                    }
                };
                let decision = self.scheduler.decide(&scores, threshold);
                (Some(scores), decision)
            }
        };
        debug!(session_id, ?decision, threshold, "Turn decision");

        // ── Clarifying ──
        if !decision.is_act() {
            let response = clarification_text(&decision, scores.as_ref(), threshold);
            return self
                .finish_turn(
                    session_id,
                    channel,
                    text,
                    turn_index,
                    response,
                    decision,
                    Vec::new(),
                    active_skills,
                    scores,
                )
                .await;
        }

        // ── Plan + Validate ──
        let tool_name = decision.tool().expect("acting decision").to_string();
        let descriptor = match self.tools.get_descriptor(&tool_name) {
            Some(d) => d,
            None => {
                let response =
                    format!("I wanted to use '{tool_name}' but it is not available (tool-error).");
                let clarify = Decision::Clarify { reason: "tool-missing".into(), entropy_bits: 0.0 };
                return self
                    .finish_turn(
                        session_id, channel, text, turn_index, response, clarify,
                        Vec::new(), active_skills, scores,
                    )
                    .await;
            }
        };

        let args = match self.plan_valid_args(text, &descriptor, "").await {
            Ok(args) => args,
            Err(violations) => {
                let response = format!(
                    "I could not assemble valid arguments for '{tool_name}' \
                     ({}). Could you restate what you want?",
                    violations.join("; ")
                );
                let clarify = Decision::Clarify {
                    reason: "args-invalid".into(),
                    entropy_bits: decision.entropy_bits(),
                };
                return self
                    .finish_turn(
                        session_id, channel, text, turn_index, response, clarify,
                        Vec::new(), active_skills, scores,
                    )
                    .await;
            }
        };

        // ── Execute + Chain ──
        let mut executed = Vec::new();
        let mut last_result = self
            .execute_tool(session_id, turn_index, text, &tool_name, args, &scores, &decision, &mut executed)
            .await;

        while last_result.success && (executed.len() as u32) < self.max_tool_chain {
            let chained_context =
                format!("{routing_message}\n\nTool result: {}", last_result.output);
            let descriptors = self.tools.list();
            let chain_scores = match self
                .provider
                .score_tools(&stable_prefix, &chained_context, &descriptors)
                .await
            {
                Ok(scores) => scores,
                Err(e) => {
                    debug!(session_id, error = %e, "Chain re-scoring failed, stopping chain");
                    break;
                }
            };
            let chain_decision = self.scheduler.decide(&chain_scores, threshold);

            let Decision::Act { tool: next_tool, confidence, .. } = &chain_decision else {
                break;
            };
            let last_tool = &executed.last().expect("at least one execution").name;
            if next_tool == last_tool {
                debug!(session_id, tool = %next_tool, "Chain stopped on same-tool repeat");
                break;
            }
            if *confidence < threshold + self.chain_margin {
                debug!(session_id, confidence, "Chain confidence below continuation bar");
                break;
            }
            let Some(next_descriptor) = self.tools.get_descriptor(next_tool) else {
                break;
            };
            let next_args = match self
                .plan_valid_args(text, &next_descriptor, &last_result.output)
                .await
            {
                Ok(args) => args,
                Err(_) => break,
            };

            let next_tool = next_tool.clone();
            decision = chain_decision.clone();
            last_result = self
                .execute_tool(
                    session_id, turn_index, text, &next_tool, next_args,
                    &Some(chain_scores), &decision, &mut executed,
                )
                .await;
        }

        // ── Synthesize ──
        let mut response = match self
            .provider
            .synthesize_response(text, Some(&last_result), &memory_snippets)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id, error = %e, "Synthesis failed, using raw tool output");
                format!("Tool `{tool_name}` result:\n{}", last_result.output)
            }
        };

        // ── Subagent review ──
        let mut subagent_note = None;
        if let Some(subagent) = &self.subagent {
            if let Some(note) = subagent
                .maybe_review(self.provider.as_ref(), text, &decision, &last_result)
                .await
            {
                response = format!("{response}\n\nSecond opinion:\n{note}");
                subagent_note = Some(note);
            }
        }

        let mut outcome = self
            .finish_turn(
                session_id, channel, text, turn_index, response, decision,
                executed, active_skills, scores,
            )
            .await;
        outcome.subagent_note = subagent_note;
        outcome
    }

    /// Shared tail of every turn: remember, observe, consolidate, persist,
    /// and fire `on_turn_end`.
    #[allow(clippy::too_many_arguments)]
    async fn finish_turn(
        &self,
        session_id: &str,
        channel: &str,
        user_message: &str,
        turn_index: usize,
        response: String,
        decision: Decision,
        executed: Vec<ExecutedTool>,
        active_skills: Vec<String>,
        scores: Option<ToolScores>,
    ) -> TurnOutcome {
        // ── Memory store ──
        self.remember_turn(session_id, user_message, &response).await;

        // ── Adaptive update ──
        let acted = decision.is_act();
        let success = executed.last().map(|e| e.result.success).unwrap_or(true);
        if let Some(adaptive) = &self.adaptive {
            adaptive
                .lock()
                .await
                .observe(acted, success, decision.entropy_bits());
        }

        // ── Persist ──
        self.sessions
            .append(session_id, channel, Role::Assistant, &response)
            .await;
        if let Err(e) = self.sessions.save().await {
            warn!(session_id, error = %e, "Failed to persist session");
        }

        // ── Consolidation check (after persist so the offset math sees
        //    the full history) ──
        self.maybe_consolidate(session_id).await;

        self.hooks
            .fire(
                HookEvent::TurnEnd,
                Arc::new(HookContext {
                    session_id: session_id.to_string(),
                    turn_index,
                    user_message: user_message.to_string(),
                    scores,
                    decision: Some(decision.clone()),
                    tool_result: executed.last().map(|e| e.result.clone()),
                    response: Some(response.clone()),
                }),
            )
            .await;

        TurnOutcome {
            response,
            decision,
            executed,
            active_skills,
            subagent_note: None,
        }
    }

    async fn recall_memories(&self, text: &str) -> Vec<String> {
        let Some(memory) = &self.memory else { return Vec::new() };
        let embedding = match self.provider.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                debug!(error = %e, "Embedding failed, skipping recall");
                return Vec::new();
            }
        };
        match memory
            .lock()
            .await
            .recall(&embedding, self.memory_top_k, now_epoch())
        {
            Ok(hits) => {
                if !hits.is_empty() {
                    debug!(count = hits.len(), "Recalled memories");
                }
                hits.into_iter().map(|(record, _)| record.text).collect()
            }
            Err(e) => {
                warn!(error = %e, "Memory recall failed");
                Vec::new()
            }
        }
    }

    fn select_skills(&self, text: &str, session_id: &str) -> Vec<SkillActivation> {
        let Some(skills) = &self.skills else { return Vec::new() };
        let activations = skills.select_for_message(text, self.max_active_skills);
        for activation in &activations {
            skills.record_use(&activation.skill.name, session_id);
        }
        activations
    }

    /// An explicitly mentioned skill that declares a tool bypasses the
    /// scheduler for this turn.
    fn skill_short_circuit(&self, activations: &[SkillActivation]) -> Option<String> {
        let primary = activations.first()?;
        if primary.reason != ActivationReason::ExplicitMention {
            return None;
        }
        let tool = primary.skill.tool.clone()?;
        self.tools.get_descriptor(&tool)?;
        Some(tool)
    }

    async fn current_threshold(&self) -> f64 {
        match &self.adaptive {
            Some(adaptive) => adaptive.lock().await.current(),
            None => self.scheduler.default_threshold_bits(),
        }
    }

    /// Plan arguments, falling back to the heuristic planner when the
    /// provider's plan fails validation.
    async fn plan_valid_args(
        &self,
        user_message: &str,
        descriptor: &picoagent_core::tool::ToolDescriptor,
        context_hint: &str,
    ) -> Result<serde_json::Value, Vec<String>> {
        let planned = match self
            .provider
            .plan_tool_args(user_message, descriptor, context_hint)
            .await
        {
            Ok(args) if args.is_object() => args,
            _ => serde_json::Value::Object(serde_json::Map::new()),
        };
        if self.tools.validate(&descriptor.name, &planned).is_ok() {
            return Ok(planned);
        }

        let fallback = self
            .heuristic
            .plan_tool_args(user_message, descriptor, context_hint)
            .await
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        match self.tools.validate(&descriptor.name, &fallback) {
            Ok(()) => Ok(fallback),
            Err(picoagent_core::error::ToolError::Validation { violations }) => Err(violations),
            Err(e) => Err(vec![e.to_string()]),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_tool(
        &self,
        session_id: &str,
        turn_index: usize,
        user_message: &str,
        tool_name: &str,
        args: serde_json::Value,
        scores: &Option<ToolScores>,
        decision: &Decision,
        executed: &mut Vec<ExecutedTool>,
    ) -> ToolResult {
        let ctx = ToolContext::new(self.workspace_root.clone()).with_session(session_id);
        let result = match self.tools.run(tool_name, &args, &ctx).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.to_string()),
        };
        info!(
            session_id,
            tool = tool_name,
            success = result.success,
            latency_ms = result.latency_ms,
            "Tool executed"
        );

        self.hooks
            .fire(
                HookEvent::ToolResult,
                Arc::new(HookContext {
                    session_id: session_id.to_string(),
                    turn_index,
                    user_message: user_message.to_string(),
                    scores: scores.clone(),
                    decision: Some(decision.clone()),
                    tool_result: Some(result.clone()),
                    response: None,
                }),
            )
            .await;

        executed.push(ExecutedTool {
            name: tool_name.to_string(),
            args,
            result: result.clone(),
        });
        result
    }

    /// Store one record combining the user message and final response.
    async fn remember_turn(&self, session_id: &str, user_message: &str, response: &str) {
        let Some(memory) = &self.memory else { return };
        let combined = format!("[user] {user_message}\n[assistant] {response}");
        let embedding = match self.provider.embed(&[combined.clone()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            _ => return,
        };
        let mut tags = BTreeMap::new();
        tags.insert("type".to_string(), "turn".to_string());
        tags.insert("session".to_string(), session_id.to_string());

        let mut memory = memory.lock().await;
        if let Err(e) = memory.store(combined, embedding, now_epoch(), tags) {
            warn!(session_id, error = %e, "Failed to store turn memory");
            return;
        }
        if let Some(path) = &self.memory_path {
            if let Err(e) = memory.save(path) {
                warn!(session_id, error = %e, "Failed to persist vector memory");
            }
        }
    }

    /// Schedule background consolidation when enough history is pending.
    /// One task per session at a time; extra triggers coalesce.
    async fn maybe_consolidate(&self, session_id: &str) {
        let Some(dual) = &self.dual_memory else { return };
        let (pending, offset) = self.sessions.consolidation_state(session_id).await;
        if pending < self.consolidation_window {
            return;
        }
        if !dual.try_begin(session_id) {
            debug!(session_id, "Consolidation already in flight, coalescing");
            return;
        }
        let Some(session) = self.sessions.snapshot(session_id).await else {
            dual.finish(session_id);
            return;
        };
        let end = (offset + self.consolidation_window).min(session.history.len());
        let request = ConsolidationRequest {
            session_id: session_id.to_string(),
            messages: session.history[offset..end].to_vec(),
            new_offset: end,
        };
        info!(session_id, offset, end, "Scheduling consolidation");

        let sessions = self.sessions.clone();
        let sid = session_id.to_string();
        spawn_consolidation(dual.clone(), self.provider.clone(), request, move |new_offset| {
            tokio::spawn(async move {
                sessions.advance_consolidation(&sid, new_offset).await;
            });
        });
    }
}

/// Build the clarification question shown to the user.
fn clarification_text(decision: &Decision, scores: Option<&ToolScores>, threshold: f64) -> String {
    let Decision::Clarify { reason, entropy_bits } = decision else {
        return "Could you clarify what you want me to do?".into();
    };
    let candidates = scores
        .map(|s| {
            let total = s.total().max(f64::EPSILON);
            let mut ranked: Vec<(String, f64)> =
                s.iter().map(|(n, v)| (n.to_string(), v / total)).collect();
            ranked.sort_by(|(an, a), (bn, b)| {
                b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal).then_with(|| an.cmp(bn))
            });
            ranked
                .into_iter()
                .take(2)
                .map(|(name, p)| format!("{name} ({p:.2})"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "none".into());
    format!(
        "I am not confident enough to choose an action ({reason}). \
         Top candidates: {candidates}. \
         (entropy={entropy_bits:.2}, threshold={threshold:.2}) \
         Please clarify what you want."
    )
}

fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
