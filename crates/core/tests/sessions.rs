mod common;

use common::*;
use std::sync::Arc;
use tariff_core::classifier::ClassifyRequest;
use tariff_core::error::{ClassifyError, RequestError};
use tariff_core::followup::NO_PRIOR_CLASSIFICATION;
use tariff_core::models::ClassificationResult;
use tariff_core::pipeline::{ChatReply, TariffService};
use tariff_core::session::{
    ConversationContext, ConversationStore, InMemoryConversationStore, SqliteConversationStore,
};

fn service(generator: Arc<FakeGenerator>, store: Arc<dyn ConversationStore>) -> TariffService {
    let backend = Arc::new(FakeBackend::with_hits(tyre_hits(), tyre_hits()));
    TariffService::new(classifier(backend, generator.clone()), responder(generator), store)
}

#[tokio::test]
async fn followup_without_generator_cites_rules_and_inclusions() {
    let previous = ClassificationResult {
        applied_rules: vec!["Rule 1".into()],
        inclusions: vec!["X".into()],
        ..Default::default()
    };
    let responder = responder(Arc::new(FakeGenerator::new(Reply::Fail)));
    let answer = responder
        .answer("¿por qué este código?", Some(&previous), None)
        .await;
    assert!(answer.contains("Rule 1"));
    assert!(answer.contains('X'));
}

#[tokio::test]
async fn followup_uses_generated_answer_and_sends_no_retrieval() {
    let generator = Arc::new(FakeGenerator::text("Because of GRI 1 and the chapter 40 notes."));
    let responder = responder(generator.clone());
    let previous = ClassificationResult {
        applied_rules: vec!["GRI 1".into()],
        ..Default::default()
    };
    let answer = responder
        .answer("why?", Some(&previous), Some("Turn 1:\nUser: tyres"))
        .await;
    assert_eq!(answer, "Because of GRI 1 and the chapter 40 notes.");
    let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("PREVIOUS CLASSIFICATION"));
    assert!(prompt.contains("Turn 1:"));
}

#[tokio::test]
async fn followup_without_previous_result() {
    let generator = Arc::new(FakeGenerator::text("should not be used"));
    let answer = responder(generator.clone()).answer("why?", None, None).await;
    assert_eq!(answer, NO_PRIOR_CLASSIFICATION);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn empty_generated_followup_falls_back() {
    let previous = ClassificationResult {
        missing_fields: vec!["Intended use".into()],
        ..Default::default()
    };
    let answer = responder(Arc::new(FakeGenerator::text("   ")))
        .answer("¿Qué falta?", Some(&previous), None)
        .await;
    assert!(answer.contains("Intended use"));
}

#[tokio::test]
async fn service_keeps_sessions_apart() {
    let store = Arc::new(InMemoryConversationStore::new());
    let service = service(Arc::new(FakeGenerator::text(TYRE_OUTPUT)), store.clone());

    service
        .classify("alice", &ClassifyRequest::text("Neumáticos radiales nuevos 205/55R16"))
        .await
        .unwrap();

    let alice = store.load("alice").await.unwrap();
    assert_eq!(alice.last_query.as_deref(), Some("Neumáticos radiales nuevos 205/55R16"));
    assert!(alice.has_context());
    assert_eq!(alice.history.len(), 1);
    assert!(alice.history[0].1.contains("4011.10"));

    let bob = store.load("bob").await.unwrap();
    assert_eq!(bob, ConversationContext::default());
    assert_eq!(store.session_count(), 1);
}

#[tokio::test]
async fn chat_routes_followups_and_new_products() {
    let store = Arc::new(InMemoryConversationStore::new());
    let service = service(Arc::new(FakeGenerator::text(TYRE_OUTPUT)), store.clone());

    let first = service
        .chat("s", "Neumáticos radiales nuevos 205/55R16")
        .await
        .unwrap();
    assert!(matches!(first, ChatReply::Classification(ref r) if !r.candidates.is_empty()));

    let second = service.chat("s", "¿Por qué este código?").await.unwrap();
    assert!(matches!(second, ChatReply::Answer(_)));

    let third = service
        .chat("s", "Láminas de acero laminadas en caliente de 2 mm de espesor para construcción naval")
        .await
        .unwrap();
    assert!(matches!(third, ChatReply::Classification(_)));

    let ctx = store.load("s").await.unwrap();
    assert_eq!(ctx.history.len(), 3);
    assert!(ctx.last_query.unwrap().starts_with("Láminas"));
}

#[tokio::test]
async fn short_reply_to_missing_fields_is_reclassified_from_context() {
    let store = Arc::new(InMemoryConversationStore::new());
    let generator = Arc::new(FakeGenerator::text(
        r#"{"candidates": [], "evidence": [], "missing_fields": ["Intended use"], "warnings": []}"#,
    ));
    let service = service(generator.clone(), store);

    service
        .chat("s", "Neumáticos de caucho sin especificar")
        .await
        .unwrap();
    let reply = service.chat("s", "para camiones").await.unwrap();
    assert!(matches!(reply, ChatReply::Answer(_)));

    let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("Reclassify with this new information"));
    assert!(prompt.contains("Neumáticos de caucho sin especificar"));
}

#[tokio::test]
async fn empty_followup_question_is_rejected() {
    let service = service(
        Arc::new(FakeGenerator::text(TYRE_OUTPUT)),
        Arc::new(InMemoryConversationStore::new()),
    );
    match service.followup("s", "  ").await {
        Err(ClassifyError::InvalidRequest(RequestError::MissingQuestion)) => {}
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn sqlite_store_round_trips_context() {
    let store = SqliteConversationStore::open("sqlite://file:core_sessions?mode=memory&cache=shared")
        .await
        .unwrap();
    assert_eq!(store.load("s1").await.unwrap(), ConversationContext::default());

    let service = service(Arc::new(FakeGenerator::text(TYRE_OUTPUT)), Arc::new(store.clone()));
    let result = service
        .classify("s1", &ClassifyRequest::text("Neumáticos radiales nuevos 205/55R16"))
        .await
        .unwrap();
    service.followup("s1", "dame un resumen").await.unwrap();

    let ctx = store.load("s1").await.unwrap();
    assert_eq!(ctx.last_result.as_ref(), Some(&result));
    assert_eq!(ctx.history.len(), 2);

    assert!(store.clear("s1").await.unwrap());
    assert!(!store.clear("s1").await.unwrap());
    assert!(!store.load("s1").await.unwrap().has_context());
}
