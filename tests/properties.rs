//! Property-based checks for the relay and the event queue

use bytes::Bytes;
use chrono::Utc;
use llm_meter::config::QueueCapacity;
use llm_meter::domain::{ChatRequest, MeteringEvent, RequestId, Usage};
use llm_meter::metering::EventQueue;
use llm_meter::proxy::capture::{copy_with_capture, BoundedCapture};
use llm_meter::proxy::streaming::{relay_event_stream, StreamTelemetry};
use proptest::prelude::*;
use std::io;
use tokio_util::io::StreamReader;

fn chunked_reader(chunks: Vec<Vec<u8>>) -> impl tokio::io::AsyncBufRead + Unpin {
    StreamReader::new(futures_util::stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Bytes::from(chunk))),
    ))
}

fn event(n: usize) -> MeteringEvent {
    MeteringEvent {
        request_id: RequestId::new(format!("req_{n}")),
        tenant: "default".to_string(),
        app_key: "abc".to_string(),
        provider: "openai".to_string(),
        model: "gpt-4".to_string(),
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        latency_ms: 0,
        status_code: 200,
        at: Utc::now(),
        stream: false,
    }
}

fn usage_strategy() -> impl Strategy<Value = Option<Usage>> {
    prop::option::of((0u64..10_000, 0u64..10_000).prop_map(|(prompt, completion)| Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }))
}

proptest! {
    #[test]
    fn prop_capture_keeps_prefix_and_forwards_everything(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..512), 0..16),
        limit in 0usize..4096,
    ) {
        let expected: Vec<u8> = chunks.concat();
        let mut upstream = chunked_reader(chunks);
        let mut client = Vec::new();
        let mut capture = BoundedCapture::with_limit(limit);

        let copied = tokio_test::block_on(copy_with_capture(&mut upstream, &mut client, &mut capture))
            .unwrap();

        prop_assert_eq!(copied, expected.len() as u64);
        prop_assert_eq!(&client, &expected);
        prop_assert!(capture.bytes().len() <= limit);
        prop_assert_eq!(capture.bytes(), &expected[..expected.len().min(limit)]);
    }

    #[test]
    fn prop_event_stream_relay_is_verbatim_and_tracks_last_values(
        frames in prop::collection::vec(("[a-z0-9-]{0,12}", usage_strategy()), 1..12),
        split in 1usize..64,
    ) {
        let mut input = String::new();
        for (model, usage) in &frames {
            let mut chunk = serde_json::json!({ "id": "c", "model": model, "choices": [] });
            if let Some(usage) = usage {
                chunk["usage"] = serde_json::to_value(usage).unwrap();
            }
            input.push_str(&format!("data: {chunk}\n\n"));
        }
        input.push_str("data: [DONE]\n\n");

        let chunks: Vec<Vec<u8>> = input.as_bytes().chunks(split).map(<[u8]>::to_vec).collect();
        let mut upstream = chunked_reader(chunks);
        let mut client = Vec::new();
        let mut telemetry = StreamTelemetry::default();

        tokio_test::block_on(relay_event_stream(&mut upstream, &mut client, &mut telemetry)).unwrap();

        let expected_model = frames
            .iter()
            .rev()
            .map(|(model, _)| model.as_str())
            .find(|model| !model.is_empty());
        let expected_usage = frames.iter().rev().find_map(|(_, usage)| *usage);

        // The relay stops at the sentinel line, so the trailing blank line is not sent
        prop_assert_eq!(&client[..], &input.as_bytes()[..input.len() - 1]);
        prop_assert_eq!(telemetry.model(), expected_model);
        prop_assert_eq!(telemetry.usage(), expected_usage);
    }

    #[test]
    fn prop_queue_keeps_oldest_and_counts_drops(capacity in 1usize..32, offered in 0usize..96) {
        let queue = EventQueue::new(QueueCapacity::new(capacity));
        for n in 0..offered {
            queue.enqueue(event(n));
        }

        let kept = offered.min(capacity);
        prop_assert_eq!(queue.len(), kept);
        prop_assert_eq!(queue.dropped_count(), (offered - kept) as u64);

        let ids: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|event| event.request_id.to_string())
            .collect();
        let expected: Vec<String> = (0..kept).map(|n| format!("req_{n}")).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn prop_request_decoding_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = ChatRequest::decode(&body);
    }
}
