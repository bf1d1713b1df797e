//! Consensus fan-out and provider wire integration tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use natlang_core::{AggregateDecision, Decision, DriftLevel, Entry, SymbolicResult};
use natlang_validator::{
    AnthropicProvider, AssessmentRequest, ConsensusConfig, ConsensusValidator, HeuristicProvider,
    MockProvider, OllamaProvider, OpenAiProvider, Provider, ProviderError, ProviderKind,
    ProviderVerdict,
};

fn request() -> AssessmentRequest {
    AssessmentRequest::new("Alice pays Bob $10", "alice", "payment")
}

fn quick_config() -> ConsensusConfig {
    let mut config = ConsensusConfig::default();
    config.provider_timeout_ms = 100;
    config.assessment_timeout_ms = 2_000;
    config.retry.base_delay_ms = 10;
    config.retry.jitter = 0.0;
    config
}

fn validator(providers: Vec<Arc<dyn Provider>>) -> ConsensusValidator {
    ConsensusValidator::new(quick_config(), providers)
}

fn verdict_json(decision: &str) -> String {
    json!({
        "paraphrase": "Alice sends Bob ten dollars",
        "intent_match": true,
        "ambiguities": [],
        "adversarial_indicators": [],
        "decision": decision,
        "reasoning": "plain transfer"
    })
    .to_string()
}

// ============================================================================
// Aggregated outcomes
// ============================================================================

#[tokio::test]
async fn test_three_agreeing_providers_valid() {
    let consensus = validator(vec![
        Arc::new(MockProvider::new("a")),
        Arc::new(MockProvider::new("b")),
        Arc::new(MockProvider::new("c")),
    ]);
    let entry = Entry::new("Alice pays Bob $10", "alice", "payment");

    let record = consensus.assess(&entry, SymbolicResult::pass(), None).await;

    assert_eq!(record.aggregate_decision, AggregateDecision::Valid);
    assert_eq!(record.drift_score, 0.0);
    assert_eq!(record.drift_level, DriftLevel::D0);
    assert_eq!(record.quorum, 3);
    assert!(record.symbolic_result.passed);
    assert_eq!(record.paraphrases().len(), 3);
}

#[tokio::test]
async fn test_one_slow_provider_makes_outcome_ambiguous() {
    let slow = Arc::new(MockProvider::new("slow").with_delay(Duration::from_millis(500)));
    let consensus = validator(vec![
        slow.clone(),
        Arc::new(MockProvider::new("b")),
        Arc::new(MockProvider::new("c")),
    ]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;

    assert_eq!(outcome.aggregate.decision, AggregateDecision::Ambiguous);
    assert!(!outcome.aggregate.insufficient_quorum);
    assert!((outcome.aggregate.drift_score - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(outcome.aggregate.drift_level, DriftLevel::D2);

    let timed_out = &outcome.provider_results[0];
    assert_eq!(timed_out.decision, Decision::Error);
    assert!(timed_out.error.as_deref().unwrap_or_default().contains("Timed out"));
    // a timeout is transient, so it gets exactly one retry
    assert_eq!(slow.call_count(), 2);
}

#[tokio::test]
async fn test_adversarial_flag_rejects_despite_majority() {
    let flagged = ProviderVerdict::valid("Alice pays Bob").with_adversarial("hidden fee clause");
    let consensus = validator(vec![
        Arc::new(MockProvider::new("a")),
        Arc::new(MockProvider::new("b")),
        Arc::new(MockProvider::new("c").with_verdict(flagged)),
    ]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;
    assert_eq!(outcome.aggregate.decision, AggregateDecision::Invalid);
}

#[tokio::test]
async fn test_all_providers_timing_out_is_insufficient_quorum() {
    let consensus = validator(vec![
        Arc::new(MockProvider::new("a").with_delay(Duration::from_secs(5))),
        Arc::new(MockProvider::new("b").with_delay(Duration::from_secs(5))),
        Arc::new(MockProvider::new("c").with_delay(Duration::from_secs(5))),
    ]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;

    assert_eq!(outcome.aggregate.decision, AggregateDecision::Ambiguous);
    assert!(outcome.aggregate.insufficient_quorum);
    assert_eq!(outcome.aggregate.quorum, 0);
    assert_eq!(outcome.aggregate.drift_score, 1.0);
    assert!(outcome.provider_results.iter().all(|r| !r.is_success()));
}

#[tokio::test]
async fn test_caller_deadline_bounds_the_fan_out() {
    let mut config = quick_config();
    config.provider_timeout_ms = 5_000;
    config.assessment_timeout_ms = 10_000;
    let consensus = ConsensusValidator::new(
        config,
        vec![
            Arc::new(MockProvider::new("a").with_delay(Duration::from_secs(3))),
            Arc::new(MockProvider::new("b").with_delay(Duration::from_secs(3))),
        ],
    );

    let started = Instant::now();
    let outcome = consensus
        .assess_with_deadline(&request(), Some(started + Duration::from_millis(100)))
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(outcome.aggregate.insufficient_quorum);
    let ids: Vec<&str> = outcome.provider_results.iter().map(|r| r.provider_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_heuristic_judge_alone_reaches_decision() {
    let consensus = validator(vec![Arc::new(HeuristicProvider::default())]);

    let valid = consensus.assess_with_deadline(&request(), None).await;
    assert_eq!(valid.aggregate.decision, AggregateDecision::Valid);

    let vague = AssessmentRequest::new("Alice will pay Bob soon", "alice", "payment");
    let outcome = consensus.assess_with_deadline(&vague, None).await;
    assert_eq!(outcome.aggregate.decision, AggregateDecision::Ambiguous);
}

// ============================================================================
// Retry and cancellation
// ============================================================================

#[tokio::test]
async fn test_transient_failure_then_success() {
    let flaky = Arc::new(
        MockProvider::new("flaky").with_script([Err(ProviderError::Http {
            status: 503,
            body: "busy".into(),
        })]),
    );
    let consensus = validator(vec![flaky.clone(), Arc::new(MockProvider::new("b"))]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;

    assert_eq!(flaky.call_count(), 2);
    assert_eq!(outcome.provider_results[0].attempts, 2);
    assert_eq!(outcome.aggregate.decision, AggregateDecision::Valid);
}

#[tokio::test]
async fn test_parse_failure_not_retried() {
    let garbled = Arc::new(MockProvider::new("garbled").with_error(ProviderError::Parse("junk".into())));
    let consensus = validator(vec![garbled.clone(), Arc::new(MockProvider::new("b"))]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;

    assert_eq!(garbled.call_count(), 1);
    assert_eq!(outcome.aggregate.decision, AggregateDecision::Ambiguous);
}

/// Sets a flag only if its call runs to completion.
struct CompletionCheck {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Provider for CompletionCheck {
    fn id(&self) -> &str {
        "completion"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn assess(&self, _request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ProviderVerdict::valid("done"))
    }
}

#[tokio::test]
async fn test_dropping_assessment_cancels_provider_calls() {
    let finished = Arc::new(AtomicBool::new(false));
    let mut config = quick_config();
    config.provider_timeout_ms = 5_000;
    let consensus = ConsensusValidator::new(
        config,
        vec![Arc::new(CompletionCheck {
            finished: finished.clone(),
        })],
    );

    let req = request();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), consensus.assess_with_deadline(&req, None)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_provider_status_checks_everyone() {
    let consensus = validator(vec![
        Arc::new(MockProvider::new("up")),
        Arc::new(MockProvider::new("down").with_available(false)),
    ]);

    let status = consensus.provider_status().await;
    assert_eq!(status.len(), 2);
    assert!(status[0].available);
    assert!(!status[1].available);
    assert_eq!(consensus.provider_ids(), vec!["up", "down"]);
}

// ============================================================================
// Wire formats
// ============================================================================

#[tokio::test]
async fn test_openai_compatible_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": verdict_json("VALID")}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAiProvider::new("openai:test", server.uri(), "gpt-test", Some("test-key".into())).unwrap();
    let verdict = provider.assess(&request()).await.unwrap();

    assert_eq!(verdict.decision, Decision::Valid);
    assert_eq!(verdict.paraphrase, "Alice sends Bob ten dollars");
}

#[tokio::test]
async fn test_openai_503_retried_then_valid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": verdict_json("VALID")}}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("remote", server.uri(), "gpt-test", None).unwrap();
    let mut config = quick_config();
    config.provider_timeout_ms = 2_000;
    config.min_quorum = 1;
    let consensus = ConsensusValidator::new(config, vec![Arc::new(provider)]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;

    assert_eq!(outcome.provider_results[0].attempts, 2);
    assert_eq!(outcome.aggregate.decision, AggregateDecision::Valid);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
}

#[tokio::test]
async fn test_rate_limit_reported_after_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("remote", server.uri(), "gpt-test", None).unwrap();
    let mut config = quick_config();
    config.provider_timeout_ms = 2_000;
    let consensus = ConsensusValidator::new(config, vec![Arc::new(provider)]);

    let outcome = consensus.assess_with_deadline(&request(), None).await;
    let result = &outcome.provider_results[0];
    assert_eq!(result.decision, Decision::Error);
    assert!(result.error.as_deref().unwrap_or_default().contains("Rate limited"));
}

#[tokio::test]
async fn test_anthropic_messages_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": format!("```json\n{}\n```", verdict_json("INVALID"))}]
        })))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("claude-test", "sk-test")
        .unwrap()
        .with_base_url(server.uri());
    let verdict = provider.assess(&request()).await.unwrap();
    assert_eq!(verdict.decision, Decision::Invalid);
}

#[tokio::test]
async fn test_ollama_generate_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": verdict_json("NEEDS_REVIEW"),
            "done": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new("llama3.2").unwrap().with_base_url(server.uri());
    assert!(provider.is_available().await);
    let verdict = provider.assess(&request()).await.unwrap();
    assert_eq!(verdict.decision, Decision::NeedsReview);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    let provider = OllamaProvider::new("llama3.2")
        .unwrap()
        .with_base_url("http://127.0.0.1:1");
    assert!(!provider.is_available().await);
}
