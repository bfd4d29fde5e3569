use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use screening_harness::gateway::{
    ChatGateway, ChatRequest, ChatResponse, FinishReason, ProviderError,
};
use screening_harness::screening::{
    evaluate_concurrent_stream, ConcurrentEvaluationRequest, ConcurrentPlan, EvaluationConfig,
    Profile, Rubric, RubricItem, ScoreDescriptions, WriterEventSink,
};
use serde_json::Value;

/// Answers every prompt with an empty object after a short pause.
struct SlowEmptyGateway;

#[async_trait::async_trait]
impl ChatGateway for SlowEmptyGateway {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(ChatResponse {
            content: "{}".into(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::from_millis(5),
            finish_reason: FinishReason::Stop,
            request_id: None,
        })
    }
}

fn plan(profiles: usize, batch_size: usize, max_concurrent: usize) -> ConcurrentPlan {
    ConcurrentPlan::new(ConcurrentEvaluationRequest {
        profiles: (0..profiles)
            .map(|i| Profile {
                id: format!("p{i}"),
                name: format!("Person {i}"),
                ..Default::default()
            })
            .collect(),
        rubric: Rubric {
            id: "r1".into(),
            title: "Engineering".into(),
            items: vec![RubricItem {
                id: "item1".into(),
                description: "Relevant experience".into(),
                score_descriptions: ScoreDescriptions::default(),
            }],
            created_at: Utc::now(),
        },
        max_concurrent: Some(max_concurrent),
        batch_size: Some(batch_size),
    })
    .unwrap()
}

fn config() -> EvaluationConfig {
    EvaluationConfig {
        dispatch_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn events(sink: WriterEventSink<Vec<u8>>) -> Vec<Value> {
    let bytes = sink.into_inner().unwrap();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn completed_counts_up_by_one_and_reaches_total_once() {
    let sink = WriterEventSink::new(Vec::new());
    evaluate_concurrent_stream(Arc::new(SlowEmptyGateway), plan(7, 2, 3), &config(), &sink, None)
        .await
        .unwrap();
    let events = events(sink);

    assert_eq!(events.first().unwrap()["type"], "start");
    assert_eq!(events[0]["total"], 7);
    assert_eq!(events[0]["maxConcurrent"], 3);
    assert_eq!(events[0]["batchSize"], 2);
    assert_eq!(events.last().unwrap()["type"], "done");

    let results: Vec<&Value> = events.iter().filter(|e| e["type"] == "result").collect();
    assert_eq!(results.len(), 7);
    for (i, event) in results.iter().enumerate() {
        assert_eq!(event["completed"], i + 1);
        assert_eq!(event["total"], 7);
        assert_eq!(event["result"]["scores"][0]["score"], 3);
    }
    assert_eq!(results.iter().filter(|e| e["completed"] == 7).count(), 1);

    let mut indices: Vec<u64> = results.iter().map(|e| e["index"].as_u64().unwrap()).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..7).collect::<Vec<u64>>());
}

#[tokio::test]
async fn cancelled_stream_ends_with_error_event() {
    let sink = WriterEventSink::new(Vec::new());
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::SeqCst);

    let evaluation = evaluate_concurrent_stream(
        Arc::new(SlowEmptyGateway),
        plan(4, 1, 1),
        &config(),
        &sink,
        Some(cancel),
    )
    .await
    .unwrap();
    assert!(evaluation.cancelled);

    let events = events(sink);
    assert_eq!(events.first().unwrap()["type"], "start");
    let last = events.last().unwrap();
    assert_eq!(last["type"], "error");
    assert_eq!(last["message"], "Evaluation cancelled");
    assert!(events.iter().all(|e| e["type"] != "done"));
}
