//! Chat turn orchestration.
//!
//! A turn runs strictly in sequence:
//!
//! 1. **Analyze** the latest user message with the completion provider and
//!    parse the embedded `AnalysisResult` JSON (falling back to a text-only
//!    analysis when none is found).
//! 2. **Generate** unit source with the code-generation provider.
//! 3. **Sample data**: optionally request a JSON payload to render against.
//! 4. **Sanitize** the generated text. When generation failed or the text
//!    has no unit name, a fallback unit is synthesized from the analysis.
//! 5. **Save** under a fresh filename and respond with its identity.
//!
//! Cancellation is observed only while waiting on providers. Once a save
//! has started it runs to completion.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use component_harness_core::analysis::{parse_analysis, parse_sample_data};
use component_harness_core::error::ProviderError;
use component_harness_core::models::{AnalysisResult, ChatMessage, GeneratedUnit};
use component_harness_core::sanitize::{sanitize, truncation_hints, validate_shape};
use component_harness_core::store::UnitStore;
use component_harness_core::synth::{fallback_unit_name, synthesize_fallback_unit};

use crate::providers::{CompletionProvider, Providers};

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers user questions \
and decides how the answer is best presented as a small interactive UI component. \
Be accurate and concise.";

const CODEGEN_SYSTEM_PROMPT: &str = "You are a React component generator. Return only the \
source of a single TypeScript React component using Tailwind CSS and shadcn/ui components. \
The file must contain exactly one `export default function Name(...)` declaration, every \
brace must be closed, and all JSX content must be wrapped in valid JSX elements. Never \
return standalone data access expressions like {data.property}. Do not include \
explanations, comments or markdown.";

const SAMPLE_DATA_SYSTEM_PROMPT: &str = "You produce realistic sample data. Respond with \
exactly one JSON object and nothing else.";

/// Where the saved unit's source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitOrigin {
    Generated,
    Fallback,
}

impl UnitOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOrigin::Generated => "generated",
            UnitOrigin::Fallback => "fallback",
        }
    }
}

/// Result of a chat turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub response_text: String,
    /// Id of the saved unit; embedded in `unit_filename`.
    pub unit_id: Option<String>,
    pub unit_filename: Option<String>,
    pub unit_name: Option<String>,
    pub created_at: Option<String>,
    pub analysis: AnalysisResult,
    pub sample_data: serde_json::Value,
    pub origin: UnitOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Save failure; the turn still answers with text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

/// Failures that leave a turn with no content at all.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("turn cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════════════════

/// Requests cancellation of the turn holding the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by a running turn.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|c| *c).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// Tracks the in-flight turn per session. Beginning a turn cancels the
/// previous one for the same session.
#[derive(Default)]
pub struct TurnTracker {
    next_id: Mutex<u64>,
    active: Mutex<HashMap<String, (u64, CancelHandle)>>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, session: &str) -> (u64, CancelSignal) {
        let id = match self.next_id.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(poisoned) => {
                let mut next = poisoned.into_inner();
                *next += 1;
                *next
            }
        };

        let (handle, signal) = cancel_pair();
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((prev, previous)) = active.insert(session.to_string(), (id, handle)) {
            debug!(session, turn = prev, "superseding previous turn");
            previous.cancel();
        }
        (id, signal)
    }

    /// Like [`begin`](Self::begin), but the turn ends when the returned
    /// guard drops, including when the request future is abandoned.
    pub fn enter(&self, session: &str) -> ActiveTurn<'_> {
        let (id, signal) = self.begin(session);
        ActiveTurn {
            tracker: self,
            session: session.to_string(),
            id,
            signal,
        }
    }

    /// Forget `turn` if it is still the session's current turn.
    pub fn end(&self, session: &str, turn: u64) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.get(session).map(|(id, _)| *id) == Some(turn) {
            active.remove(session);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

/// A turn registered with a [`TurnTracker`]; ends it on drop.
pub struct ActiveTurn<'a> {
    tracker: &'a TurnTracker,
    session: String,
    id: u64,
    signal: CancelSignal,
}

impl ActiveTurn<'_> {
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.tracker.end(&self.session, self.id);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════

pub struct Orchestrator {
    providers: Providers,
    store: Arc<dyn UnitStore>,
    extension: String,
}

impl Orchestrator {
    pub fn new(
        providers: Providers,
        store: Arc<dyn UnitStore>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            store,
            extension: extension.into(),
        }
    }

    /// Run one chat turn: analyze, generate, sanitize, save.
    pub async fn run_turn(
        &self,
        messages: &[ChatMessage],
        cancel: &CancelSignal,
    ) -> Result<TurnResponse, TurnError> {
        let request = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or_else(|| TurnError::Invalid("messages must include a user message".into()))?;

        // Step 1: analysis
        let completion = self.providers.completion.as_ref();
        let analysis_text =
            guarded(cancel, completion.complete(&analysis_messages(&request))).await??;
        let analysis = match parse_analysis(&analysis_text) {
            Some(a) => a,
            None => {
                debug!("completion reply had no analysis object; using text-only analysis");
                AnalysisResult::text_only(analysis_text.clone())
            }
        };
        info!(
            intent = %analysis.intent,
            display_type = %analysis.display_type.as_str(),
            "analyzed request"
        );

        // Step 2: code generation
        let mut fallback_reason = None;
        let generated = match &self.providers.codegen {
            Some(codegen) => {
                let reply = guarded(cancel, codegen.complete(&codegen_messages(&analysis))).await?;
                match reply {
                    Ok(raw) => Some(raw),
                    Err(e @ ProviderError::MissingCredentials { .. }) => return Err(e.into()),
                    Err(e) => {
                        warn!(error = %e, "code generation failed; synthesizing fallback unit");
                        fallback_reason = Some(e.to_string());
                        None
                    }
                }
            }
            None => {
                fallback_reason = Some("code generation disabled".to_string());
                None
            }
        };

        // Step 3: sample data
        let sample_data = match &self.providers.sample_data {
            Some(p) => self.sample_data(p.as_ref(), &analysis, cancel).await?,
            None => serde_json::json!({}),
        };

        // Step 4: sanitize, or synthesize
        let sanitized = generated.as_deref().map(|raw| (raw, sanitize(raw)));
        let (source, unit_name, origin) = match sanitized {
            Some((raw, Ok(unit))) => {
                if unit.braces_added > 0 {
                    info!(braces = unit.braces_added, "closed unbalanced braces");
                }
                for hint in truncation_hints(raw) {
                    debug!(hint = %hint, "generated text may be truncated");
                }
                (unit.source_text, unit.unit_name, UnitOrigin::Generated)
            }
            Some((_, Err(e))) => {
                warn!(error = %e, "generated text unusable; synthesizing fallback unit");
                fallback_reason = Some(e.to_string());
                fallback(&analysis)
            }
            None => fallback(&analysis),
        };

        let report = validate_shape(&source);
        for issue in &report.issues {
            warn!(unit = %unit_name, issue = %issue, "unit shape");
        }

        // Step 5: save
        let unit = GeneratedUnit::for_intent(&analysis.intent, unit_name, source, &self.extension);
        let (saved, error) = match self.store.save(&unit.filename, &unit.source_text).await {
            Ok(()) => {
                info!(filename = %unit.filename, unit = %unit.unit_name, ?origin, "saved unit");
                (Some(unit), None)
            }
            Err(e) => {
                warn!(filename = %unit.filename, error = %e, "failed to save unit");
                (None, Some(e.to_string()))
            }
        };

        Ok(TurnResponse {
            response_text: if analysis.response.is_empty() {
                analysis_text
            } else {
                analysis.response.clone()
            },
            unit_id: saved.as_ref().map(|u| u.id.clone()),
            unit_filename: saved.as_ref().map(|u| u.filename.clone()),
            unit_name: saved.as_ref().map(|u| u.unit_name.clone()),
            created_at: saved.map(|u| u.created_at),
            analysis,
            sample_data,
            origin,
            fallback_reason,
            error,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn sample_data(
        &self,
        provider: &dyn CompletionProvider,
        analysis: &AnalysisResult,
        cancel: &CancelSignal,
    ) -> Result<serde_json::Value, TurnError> {
        match guarded(cancel, provider.complete(&sample_data_messages(analysis))).await? {
            Ok(text) => Ok(parse_sample_data(&text)),
            Err(e) => {
                warn!(error = %e, "sample data unavailable; rendering against {{}}");
                Ok(serde_json::json!({}))
            }
        }
    }
}

/// Race `fut` against cancellation.
async fn guarded<F: Future>(cancel: &CancelSignal, fut: F) -> Result<F::Output, TurnError> {
    if cancel.is_cancelled() {
        return Err(TurnError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TurnError::Cancelled),
        out = fut => Ok(out),
    }
}

fn fallback(analysis: &AnalysisResult) -> (String, String, UnitOrigin) {
    (
        synthesize_fallback_unit(analysis),
        fallback_unit_name(&analysis.intent),
        UnitOrigin::Fallback,
    )
}

fn analysis_messages(request: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Analyze the user request below and determine:
1. What kind of information is being requested
2. The best way to display it (chart, table, list, card, form, dashboard, timeline, comparison, progress, etc.)
3. The data structure needed for the response
4. Specific instructions for building a UI component that displays it

Respond in this exact JSON format:
{{
  "intent": "brief description of the request",
  "displayType": "text|chart|table|list|card|form|dashboard|timeline|comparison|progress|weather|calendar|map|gallery|stats|profile|checklist",
  "dataStructure": {{
    "type": "object|array|string|number|boolean",
    "properties": "describe the expected data structure"
  }},
  "instructions": "detailed instructions for creating the UI component",
  "response": "your answer to the user"
}}

User request: {}"#,
        request
    );
    vec![
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

fn codegen_messages(analysis: &AnalysisResult) -> Vec<ChatMessage> {
    let prompt = format!(
        "Create a React component that displays the following information:\n\n\
         Intent: {}\nDisplay Type: {}\nData Structure: {}\nInstructions: {}\nResponse: {}\n\n\
         The component receives its payload as a single `data` prop. Use optional access \
         (data?.property) everywhere, include TypeScript types, and keep it responsive and \
         accessible.\n\n\
         IMPORTANT: Return only valid React/TypeScript code.",
        analysis.intent,
        analysis.display_type.as_str(),
        analysis.data_structure,
        analysis.instructions,
        analysis.response
    );
    vec![
        ChatMessage::system(CODEGEN_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

fn sample_data_messages(analysis: &AnalysisResult) -> Vec<ChatMessage> {
    let prompt = format!(
        "Generate plausible sample data for a \"{}\" view of: {}\nExpected structure: {}",
        analysis.display_type.as_str(),
        analysis.intent,
        analysis.data_structure
    );
    vec![
        ChatMessage::system(SAMPLE_DATA_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use component_harness_core::store::memory::InMemoryUnitStore;
    use std::time::Duration;

    enum Reply {
        Text(String),
        Fail(ProviderError),
        Hang,
    }

    struct Scripted(Reply);

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
            match &self.0 {
                Reply::Text(t) => Ok(t.clone()),
                Reply::Fail(e) => Err(e.clone()),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn text(s: &str) -> Arc<dyn CompletionProvider> {
        Arc::new(Scripted(Reply::Text(s.to_string())))
    }

    fn http_500() -> ProviderError {
        ProviderError::Http {
            provider: "codegen".into(),
            status: 500,
            body: "boom".into(),
        }
    }

    const ANALYSIS: &str = r#"Sure! {"intent": "Weather Dashboard!!", "displayType": "card",
        "dataStructure": {"type": "object"}, "instructions": "show it", "response": "Here you go",}"#;

    const GENERATED: &str = "Here is your component:\n```tsx\nimport React from 'react'\n\nexport default function WeatherCard({ data }) {\n  return <div>{data?.temperature}</div>\n```\nLet me know if you need anything else!";

    fn orchestrator(
        codegen: Option<Arc<dyn CompletionProvider>>,
        sample: Option<Arc<dyn CompletionProvider>>,
    ) -> (Orchestrator, Arc<InMemoryUnitStore>) {
        let store = Arc::new(InMemoryUnitStore::new());
        let providers = Providers {
            completion: text(ANALYSIS),
            codegen,
            sample_data: sample,
        };
        (Orchestrator::new(providers, store.clone(), "tsx"), store)
    }

    #[tokio::test]
    async fn test_generated_turn_saves_sanitized_unit() {
        let (o, store) = orchestrator(
            Some(text(GENERATED)),
            Some(text("```json\n{\"temperature\": 21}\n```")),
        );
        let resp = o
            .run_turn(&[ChatMessage::user("weather in Oslo?")], &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(resp.response_text, "Here you go");
        assert_eq!(resp.origin, UnitOrigin::Generated);
        assert_eq!(resp.unit_name.as_deref(), Some("WeatherCard"));
        assert_eq!(resp.sample_data, serde_json::json!({"temperature": 21}));

        let filename = resp.unit_filename.unwrap();
        let id = resp.unit_id.unwrap();
        assert!(filename.starts_with("weather_dashboard_"));
        assert_eq!(filename, format!("weather_dashboard_{}.tsx", id));
        assert!(chrono::DateTime::parse_from_rfc3339(&resp.created_at.unwrap()).is_ok());
        let saved = store.read(&filename).await.unwrap();
        assert!(saved.starts_with("import React"));
        assert!(!saved.contains("Let me know"));
        assert!(saved.trim_end().ends_with('}'));
    }

    #[tokio::test]
    async fn test_codegen_failure_synthesizes_fallback() {
        let failing: Arc<dyn CompletionProvider> = Arc::new(Scripted(Reply::Fail(http_500())));
        let (o, store) = orchestrator(Some(failing), None);
        let resp = o
            .run_turn(&[ChatMessage::user("weather?")], &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(resp.origin, UnitOrigin::Fallback);
        assert_eq!(resp.unit_name.as_deref(), Some("WeatherDashboard"));
        assert!(resp.fallback_reason.unwrap().contains("500"));
        assert_eq!(resp.sample_data, serde_json::json!({}));
        let saved = store.read(&resp.unit_filename.unwrap()).await.unwrap();
        assert!(saved.contains("export default function WeatherDashboard"));
    }

    #[tokio::test]
    async fn test_nameless_generation_synthesizes_fallback() {
        let (o, _) = orchestrator(Some(text("I cannot help with that.")), None);
        let resp = o
            .run_turn(&[ChatMessage::user("weather?")], &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resp.origin, UnitOrigin::Fallback);
        assert!(resp.unit_filename.is_some());
    }

    #[tokio::test]
    async fn test_missing_codegen_credentials_fail_turn() {
        let missing: Arc<dyn CompletionProvider> = Arc::new(Scripted(Reply::Fail(
            ProviderError::MissingCredentials {
                provider: "codegen".into(),
                env_var: "V0_API_KEY".into(),
            },
        )));
        let (o, _) = orchestrator(Some(missing), None);
        let err = o
            .run_turn(&[ChatMessage::user("x")], &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TurnError::Provider(ProviderError::MissingCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_requires_user_message() {
        let (o, _) = orchestrator(None, None);
        let err = o
            .run_turn(&[ChatMessage::system("hi")], &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_on_provider() {
        let hang: Arc<dyn CompletionProvider> = Arc::new(Scripted(Reply::Hang));
        let (o, store) = orchestrator(Some(hang), None);
        let (handle, signal) = cancel_pair();

        let turn = tokio::spawn(async move {
            o.run_turn(&[ChatMessage::user("x")], &signal).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = turn.await.unwrap();
        assert!(matches!(result, Err(TurnError::Cancelled)));
        assert!(store.list_generated().await.unwrap().is_empty());
    }

    #[test]
    fn test_tracker_supersedes_previous_turn() {
        let tracker = TurnTracker::new();
        let (first, first_signal) = tracker.begin("s1");
        let (second, second_signal) = tracker.begin("s1");
        assert!(first_signal.is_cancelled());
        assert!(!second_signal.is_cancelled());

        tracker.end("s1", first);
        assert_eq!(tracker.active_sessions(), 1);
        tracker.end("s1", second);
        assert_eq!(tracker.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_turn_leaves_no_session() {
        let tracker = Arc::new(TurnTracker::new());
        let hang: Arc<dyn CompletionProvider> = Arc::new(Scripted(Reply::Hang));
        let (o, _) = orchestrator(Some(hang), None);

        let turn = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let active = tracker.enter("s1");
                o.run_turn(&[ChatMessage::user("x")], active.signal()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tracker.active_sessions(), 1);

        turn.abort();
        assert!(turn.await.unwrap_err().is_cancelled());
        assert_eq!(tracker.active_sessions(), 0);
    }
}
