use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use screening_harness::gateway::openai::OpenAiAdapter;
use screening_harness::gateway::{ChatGateway, NoopUsageSink, ProviderGateway};
use screening_harness::screening::normalize::DEFAULT_EXPLANATION;
use screening_harness::screening::{
    evaluate, evaluate_concurrent, ConcurrentEvaluationRequest, ConcurrentPlan, EvaluateRequest,
    EvaluateResponse, EvaluationConfig, Optimization, Profile, Rubric, RubricItem,
    ScoreDescriptions,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 10 }
    }))
}

fn user_prompt(request: &Request) -> String {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
    body["messages"]
        .as_array()
        .and_then(|messages| {
            messages
                .iter()
                .find(|m| m["role"] == "user")
                .and_then(|m| m["content"].as_str())
        })
        .unwrap_or_default()
        .to_string()
}

/// Scores each labelled profile in a batch prompt by its name.
struct NameJudge;

fn score_for_name(name: &str) -> u8 {
    match name {
        "Strong" => 5,
        "Mid" => 4,
        _ => 2,
    }
}

impl Respond for NameJudge {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let prompt = user_prompt(request);
        let mut slots = serde_json::Map::new();
        for line in prompt.lines().filter(|l| l.starts_with("PROFILE_")) {
            let Some((label, rest)) = line.split_once(" (") else {
                continue;
            };
            let Some(name) = rest
                .split_once("Name: ")
                .and_then(|(_, tail)| tail.strip_suffix("):"))
            else {
                continue;
            };
            slots.insert(
                label.to_lowercase(),
                json!({ "item1": { "score": score_for_name(name), "explanation": name } }),
            );
        }
        completion(&Value::Object(slots).to_string())
    }
}

async fn gateway(server: &MockServer) -> Arc<dyn ChatGateway> {
    let adapter =
        OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    Arc::new(ProviderGateway::with_adapter(adapter, Arc::new(NoopUsageSink)))
}

fn rubric() -> Rubric {
    Rubric {
        id: "r1".into(),
        title: "Engineering".into(),
        items: vec![RubricItem {
            id: "item1".into(),
            description: "Relevant experience".into(),
            score_descriptions: ScoreDescriptions::default(),
        }],
        created_at: Utc::now(),
    }
}

fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: id.into(),
        name: name.into(),
        ..Default::default()
    }
}

fn config() -> EvaluationConfig {
    EvaluationConfig {
        dispatch_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn batch_slot_scores_are_clamped_and_missing_slots_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion(
            r#"{"profile_1":{"item1":{"score":7,"explanation":"x"}}}"#,
        ))
        .mount(&server)
        .await;

    let plan = ConcurrentPlan::new(ConcurrentEvaluationRequest {
        profiles: vec![profile("p1", "A"), profile("p2", "B"), profile("p3", "C")],
        rubric: rubric(),
        max_concurrent: Some(2),
        batch_size: Some(3),
    })
    .unwrap();

    let evaluation = evaluate_concurrent(gateway(&server).await, plan, &config(), None, None)
        .await
        .unwrap();
    assert!(!evaluation.cancelled);
    assert_eq!(evaluation.results.len(), 3);

    let by_id = |id: &str| {
        evaluation
            .results
            .iter()
            .find(|r| r.profile_id == id)
            .unwrap()
            .clone()
    };
    let first = by_id("p1");
    assert_eq!(first.scores[0].score, 5);
    assert_eq!(first.scores[0].explanation, "x");
    for id in ["p2", "p3"] {
        let result = by_id(id);
        assert_eq!(result.scores.len(), 1);
        assert_eq!(result.scores[0].score, 3);
        assert_eq!(result.scores[0].explanation, DEFAULT_EXPLANATION);
    }

    // One batch of three means one call, on the batch model with provider defaults.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert!(body.get("temperature").is_none());
}

#[tokio::test]
async fn batching_mode_ranks_by_average_regardless_of_submission_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(NameJudge)
        .mount(&server)
        .await;

    let request = EvaluateRequest::from_value(json!({
        "profiles": [
            { "id": "w", "name": "Weak" },
            { "id": "s", "name": "Strong" },
            { "id": "m", "name": "Mid" }
        ],
        "rubric": { "id": "r1", "title": "Engineering", "items": [
            { "id": "item1", "description": "Relevant experience", "scoreDescriptions": {} }
        ]},
        "optimization": "batching",
        "batchSize": 2
    }))
    .unwrap();

    let response = evaluate(gateway(&server).await, request, &config())
        .await
        .unwrap();
    let EvaluateResponse::Multi(response) = response else {
        panic!("expected a multi-profile response");
    };

    assert_eq!(response.optimization, Optimization::Batching);
    assert_eq!(response.total_api_calls, Some(2));
    let order: Vec<&str> = response.results.iter().map(|r| r.profile_id.as_str()).collect();
    assert_eq!(order, vec!["s", "m", "w"]);
    assert_eq!(response.results[0].average_score, 5.0);
    assert_eq!(response.results[2].average_score, 2.0);
}

#[tokio::test]
async fn single_profile_accepts_fenced_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion(
            "```json\n{\"item1\": {\"score\": \"4\", \"explanation\": \"solid\"}}\n```",
        ))
        .mount(&server)
        .await;

    let request = EvaluateRequest::from_value(json!({
        "profile": { "id": "p1", "name": "Ada" },
        "rubric": { "id": "r1", "title": "Engineering", "items": [
            { "id": "item1", "description": "Relevant experience", "scoreDescriptions": {} }
        ]}
    }))
    .unwrap();

    let response = evaluate(gateway(&server).await, request, &config())
        .await
        .unwrap();
    let EvaluateResponse::Single(response) = response else {
        panic!("expected a single-profile response");
    };
    assert_eq!(response.profile_name, "Ada");
    assert_eq!(response.result.scores[0].score, 4);
    assert_eq!(response.result.scores[0].explanation, "solid");
    assert_eq!(response.result.total_score, 4);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["max_tokens"], 1000);
}

#[tokio::test]
async fn provider_outage_yields_defaults_for_every_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let profiles: Vec<Profile> = (0..4).map(|i| profile(&format!("p{i}"), "X")).collect();
    let plan = ConcurrentPlan::new(ConcurrentEvaluationRequest {
        profiles,
        rubric: rubric(),
        max_concurrent: Some(2),
        batch_size: Some(2),
    })
    .unwrap();

    let response = evaluate_concurrent(gateway(&server).await, plan, &config(), None, None)
        .await
        .unwrap()
        .into_response();

    assert_eq!(response.results.len(), 4);
    assert!(response
        .results
        .iter()
        .all(|r| r.scores.len() == 1 && r.scores[0].score == 3 && r.average_score == 3.0));
    // No retries: one call per batch.
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
