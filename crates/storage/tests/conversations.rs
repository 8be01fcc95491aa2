use storage::{connect, conversations, migrate};

#[tokio::test]
async fn upsert_then_load_and_delete() {
    let db = "sqlite://file:storage_conversations?mode=memory&cache=shared";
    let pool = connect(db).await.unwrap();
    migrate(&pool).await.unwrap();
    // Migrations are idempotent.
    migrate(&pool).await.unwrap();

    assert!(conversations::load(&pool, "s1").await.unwrap().is_none());

    conversations::upsert(&pool, "s1", "neumáticos", Some("{}"), "[]")
        .await
        .unwrap();
    conversations::upsert(&pool, "s1", "neumáticos radiales", None, "[[\"a\",\"b\"]]")
        .await
        .unwrap();

    let row = conversations::load(&pool, "s1").await.unwrap().unwrap();
    assert_eq!(row.last_query, "neumáticos radiales");
    assert_eq!(row.last_result, None);
    assert_eq!(row.history_json, "[[\"a\",\"b\"]]");
    assert!(row.updated_at > 0);

    assert!(conversations::delete(&pool, "s1").await.unwrap());
    assert!(!conversations::delete(&pool, "s1").await.unwrap());
}
